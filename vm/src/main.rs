use clap::Parser as ClapParser;
use std::process;

use bytecode::{BytecodeDecoder, FUNC_HEADER_SIZE, FunctionHeader};
use env_logger::Env;
use heap::HeapSettings;

use vm::{Image, RuntimeError, StdHost, VM, VMCreateInfo};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Compiled T3 image file
    #[arg(help = "The .t3 image to run")]
    image: String,

    /// Arguments handed to the program's entry function
    #[arg(trailing_var_arg = true, help = "Arguments passed to the program")]
    args: Vec<String>,

    #[arg(long, default_value_t = 4096, help = "Value-stack slots")]
    stack_size: usize,

    #[arg(long, default_value_t = 16384, help = "Undo ring capacity in records")]
    undo_records: usize,

    #[arg(long, default_value_t = 2000, help = "Allocations between collections")]
    gc_interval: usize,

    #[arg(long, help = "Seed for rand() instead of host entropy")]
    seed: Option<u64>,

    #[arg(long, help = "Log every executed instruction (at trace level)")]
    trace: bool,

    #[arg(long, value_name = "FILE", help = "Restore a saved state before running")]
    restore: Option<String>,

    #[arg(long, help = "Disassemble the entry function instead of running")]
    dump: bool,
}

fn main() {
    let cli = Cli::parse();
    let default_filter = if cli.trace { "trace" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let image = match Image::load(&cli.image) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("Error loading image '{}': {}", cli.image, err);
            process::exit(1);
        }
    };

    if cli.dump {
        dump_entry(&image);
        return;
    }

    let info = VMCreateInfo {
        stack_size: cli.stack_size,
        heap: HeapSettings {
            gc_interval: cli.gc_interval,
            undo_records: cli.undo_records,
        },
        trace: cli.trace,
        random_seed: cli.seed,
        ..VMCreateInfo::default()
    };
    let mut vm = match VM::new(image, Box::new(StdHost::new()), info) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("Error loading image '{}': {}", cli.image, err);
            process::exit(1);
        }
    };

    if let Some(path) = &cli.restore {
        let restored = vm
            .host_mut()
            .open_save(path)
            .map_err(vm::SaveError::from)
            .and_then(|mut file| vm.restore_state(&mut file));
        if let Err(err) = restored {
            eprintln!("Error restoring '{}': {}", path, err);
            process::exit(1);
        }
    }

    let args: Vec<&str> = cli.args.iter().map(String::as_str).collect();
    match vm.run_main(&args) {
        Ok(_) => {}
        Err(RuntimeError::Unhandled(exc)) => {
            let message = vm
                .exception_message(exc)
                .unwrap_or_else(|| format!("unhandled exception {exc}"));
            eprintln!("Unhandled exception: {message}");
            for frame in vm.last_trace() {
                eprintln!("    at {frame}");
            }
            process::exit(1);
        }
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    }
}

/// Print the entry function's header and instructions.
fn dump_entry(image: &Image) {
    let code = image.code.bytes();
    let entry = image.entry as usize;
    let header = match FunctionHeader::parse(code, entry) {
        Ok(h) => h,
        Err(err) => {
            eprintln!("Error reading entry function at {entry:#x}: {err}");
            process::exit(1);
        }
    };
    println!(
        "== entry {entry:#x}: argc {}{} opt {} locals {} stack {} ==",
        header.min_argc,
        if header.varargs { "+" } else { "" },
        header.opt_argc,
        header.locals,
        header.stack_depth,
    );

    // the function ends where its first trailing table starts
    let end = [header.exc_table, header.debug_table]
        .into_iter()
        .filter(|ofs| *ofs != 0)
        .map(|ofs| entry + ofs as usize)
        .min()
        .unwrap_or(code.len())
        .min(code.len());
    let mut decoder = BytecodeDecoder::at(&code[..end], entry + FUNC_HEADER_SIZE);
    while !decoder.is_at_end() {
        let at = decoder.offset();
        match decoder.decode_next() {
            Ok(instr) => println!("{:>6x}  {instr}", at - entry),
            Err(err) => {
                println!("{:>6x}  <{err}>", at - entry);
                break;
            }
        }
    }
}
