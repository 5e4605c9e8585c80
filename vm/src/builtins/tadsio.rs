//! The `tads-io` function set, reduced to line-oriented console I/O.

use object::Val;

use crate::VM;
use crate::builtins::BuiltinDesc;
use crate::error::RuntimeError;
use crate::primitives::Arity;

pub static FUNCTIONS: &[BuiltinDesc] = &[
    BuiltinDesc::new("tadsSay", Arity::AtLeast(0), io_say),
    BuiltinDesc::new("inputLine", Arity::Exact(0), io_input_line),
];

pub const SAY: u16 = 0;
pub const INPUT_LINE: u16 = 1;

/// Write each argument's display text; nil arguments print nothing.
pub fn io_say(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    for v in args.iter().filter(|v| !v.is_nil()) {
        let bytes = vm.to_display_bytes(*v)?;
        vm.host.write(&String::from_utf8_lossy(&bytes));
    }
    Ok(Val::Nil)
}

/// The next input line, or nil at end of input.
pub fn io_input_line(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    match vm.host.read_line() {
        Some(line) => Ok(vm.new_string(line.into_bytes())),
        None => Ok(Val::Nil),
    }
}
