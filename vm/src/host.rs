//! The embedding environment: console, clock, entropy and save files.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;

pub trait Host {
    /// Write program output.
    fn write(&mut self, text: &str);

    /// Read one line of input without its terminator; `None` at end of input.
    fn read_line(&mut self) -> Option<String>;

    /// Whether the user asked to break into the debugger.
    fn poll_break(&mut self) -> bool {
        false
    }

    fn wall_clock(&self) -> SystemTime;

    /// Milliseconds since an arbitrary fixed point.
    fn ticks_ms(&self) -> u64;

    fn random_seed(&mut self) -> u64;

    fn open_save(&mut self, name: &str) -> io::Result<Box<dyn Read>>;

    fn create_save(&mut self, name: &str) -> io::Result<Box<dyn Write>>;
}

// ── StdHost ──

/// Standard streams and the real filesystem.
pub struct StdHost {
    start: Instant,
}

impl StdHost {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for StdHost {
    fn write(&mut self, text: &str) {
        let mut out = io::stdout().lock();
        // output errors (closed pipe) are not the program's concern
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']).len();
                line.truncate(trimmed);
                Some(line)
            }
        }
    }

    fn wall_clock(&self) -> SystemTime {
        SystemTime::now()
    }

    fn ticks_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn random_seed(&mut self) -> u64 {
        rand::random()
    }

    fn open_save(&mut self, name: &str) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(BufReader::new(File::open(name)?)))
    }

    fn create_save(&mut self, name: &str) -> io::Result<Box<dyn Write>> {
        Ok(Box::new(BufWriter::new(File::create(name)?)))
    }
}

// ── BufferHost ──

type SaveFiles = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// In-memory host: output goes to a shared buffer, input comes from a
/// script, and save files live in a map.
pub struct BufferHost {
    output: Arc<Mutex<String>>,
    input: VecDeque<String>,
    saves: SaveFiles,
    seed: u64,
    clock: SystemTime,
    start: Instant,
}

impl BufferHost {
    pub fn new() -> Self {
        Self {
            output: Arc::new(Mutex::new(String::new())),
            input: VecDeque::new(),
            saves: Arc::new(Mutex::new(HashMap::new())),
            seed: 0,
            clock: SystemTime::UNIX_EPOCH,
            start: Instant::now(),
        }
    }

    pub fn with_input<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_clock(mut self, clock: SystemTime) -> Self {
        self.clock = clock;
        self
    }

    /// Shared handle to everything written so far.
    pub fn output(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.output)
    }

    /// Shared handle to the in-memory save files.
    pub fn saves(&self) -> SaveFiles {
        Arc::clone(&self.saves)
    }
}

impl Default for BufferHost {
    fn default() -> Self {
        Self::new()
    }
}

/// A save file being written; stored under its name when dropped.
struct SaveSlot {
    name: String,
    bytes: Vec<u8>,
    saves: SaveFiles,
}

impl Write for SaveSlot {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SaveSlot {
    fn drop(&mut self) {
        let bytes = std::mem::take(&mut self.bytes);
        self.saves.lock().insert(std::mem::take(&mut self.name), bytes);
    }
}

impl Host for BufferHost {
    fn write(&mut self, text: &str) {
        self.output.lock().push_str(text);
    }

    fn read_line(&mut self) -> Option<String> {
        self.input.pop_front()
    }

    fn wall_clock(&self) -> SystemTime {
        self.clock
    }

    fn ticks_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn random_seed(&mut self) -> u64 {
        self.seed
    }

    fn open_save(&mut self, name: &str) -> io::Result<Box<dyn Read>> {
        match self.saves.lock().get(name) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("no saved state named {name}"))),
        }
    }

    fn create_save(&mut self, name: &str) -> io::Result<Box<dyn Write>> {
        Ok(Box::new(SaveSlot {
            name: name.to_string(),
            bytes: Vec::new(),
            saves: Arc::clone(&self.saves),
        }))
    }
}
