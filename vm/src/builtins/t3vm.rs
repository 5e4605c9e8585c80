use object::{LookupKey, LookupTable, ObjectBody, PropId, Val};

use crate::VM;
use crate::builtins::{BuiltinDesc, expect_int_bif};
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::Arity;

pub static FUNCTIONS: &[BuiltinDesc] = &[
    BuiltinDesc::new("t3RunGC", Arity::Exact(0), t3_run_gc),
    BuiltinDesc::new("t3SetSay", Arity::Exact(1), t3_set_say),
    BuiltinDesc::new("t3GetVMVsn", Arity::Exact(0), t3_get_vm_vsn),
    BuiltinDesc::new("t3GetVMID", Arity::Exact(0), t3_get_vm_id),
    BuiltinDesc::new("t3GetVMBanner", Arity::Exact(0), t3_get_vm_banner),
    BuiltinDesc::new("t3GetVMPreinitMode", Arity::Exact(0), t3_get_vm_preinit_mode),
    BuiltinDesc::new("t3DebugTrace", Arity::AtLeast(1), t3_debug_trace),
    BuiltinDesc::new("t3GetGlobalSymbols", Arity::Exact(0), t3_get_global_symbols),
    BuiltinDesc::new("t3AllocProp", Arity::Exact(0), t3_alloc_prop),
    BuiltinDesc::new("t3GetStackTrace", Arity::Range(0, 1), t3_get_stack_trace),
];

pub const SET_SAY: u16 = 1;
pub const DEBUG_TRACE: u16 = 6;
pub const GET_GLOBAL_SYMBOLS: u16 = 7;
pub const ALLOC_PROP: u16 = 8;
pub const GET_STACK_TRACE: u16 = 9;

/// `t3SetSay` placeholders for "no function" and "no method".
pub const SETSAY_NO_FUNC: i32 = 1;
pub const SETSAY_NO_METHOD: i32 = 2;

const T3DBG_CHECK: i32 = 1;
const T3DBG_BREAK: i32 = 2;
const T3DBG_LOG: i32 = 3;

/// Major, minor and patch level packed as `0xMMmmpp`.
const VM_VERSION: i32 = 0x03_01_00;
const VM_ID: &str = "t3run";

pub fn t3_run_gc(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    vm.collect_garbage();
    Ok(Val::Nil)
}

/// Install a say function (function, object or `SETSAY_NO_FUNC`) or a say
/// method (property or `SETSAY_NO_METHOD`); returns the previous one.
pub fn t3_set_say(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    match args[0] {
        Val::Prop(_) | Val::Int(SETSAY_NO_METHOD) => {
            let old = if vm.say_method.is_valid() {
                Val::Prop(vm.say_method)
            } else {
                Val::Int(SETSAY_NO_METHOD)
            };
            vm.say_method = args[0].as_prop().unwrap_or(PropId::INVALID);
            Ok(old)
        }
        Val::FuncPtr(_) | Val::Obj(_) | Val::BifPtr { .. } | Val::Int(SETSAY_NO_FUNC) => {
            let new = if matches!(args[0], Val::Int(_)) { Val::Nil } else { args[0] };
            let old = vm.set_say_function(new);
            Ok(if old.is_nil() { Val::Int(SETSAY_NO_FUNC) } else { old })
        }
        _ => Err(RuntimeError::new(ErrorCode::BadTypeBif)),
    }
}

pub fn t3_get_vm_vsn(_vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(Val::Int(VM_VERSION))
}

pub fn t3_get_vm_id(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(vm.new_string(VM_ID.as_bytes().to_vec()))
}

pub fn t3_get_vm_banner(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    let banner = format!("{VM_ID} T3 VM {}", env!("CARGO_PKG_VERSION"));
    Ok(vm.new_string(banner.into_bytes()))
}

/// There is no preinit pass; programs always run in normal mode.
pub fn t3_get_vm_preinit_mode(_vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(Val::Nil)
}

/// With no debugger attached, checks and break requests both yield nil.
pub fn t3_debug_trace(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    match expect_int_bif(args[0])? {
        T3DBG_CHECK => Ok(Val::Nil),
        T3DBG_BREAK => {
            log::debug!("t3DebugTrace break at {:#x}; no debugger attached", vm.instr_start);
            Ok(Val::Nil)
        }
        T3DBG_LOG => {
            let msg = match args.get(1) {
                Some(v) => String::from_utf8_lossy(&vm.to_display_bytes(*v)?).into_owned(),
                None => String::new(),
            };
            log::info!("t3DebugTrace: {msg}");
            Ok(Val::Nil)
        }
        _ => Err(RuntimeError::with(ErrorCode::BadValBif, "t3DebugTrace mode")),
    }
}

/// A LookupTable of global symbol names to values, or nil if the image
/// carries no symbols.
pub fn t3_get_global_symbols(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    if vm.image.globals.is_empty() {
        return Ok(Val::Nil);
    }
    let globals = vm.image.globals.clone();
    let mut table = LookupTable::new();
    for (name, val) in globals {
        let key = vm.new_string(name.clone().into_bytes());
        table.insert(LookupKey::Str(name.into_bytes()), key, val);
    }
    Ok(Val::Obj(vm.heap.alloc(ObjectBody::LookupTable(table))))
}

pub fn t3_alloc_prop(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    if vm.next_prop == u16::MAX {
        return Err(RuntimeError::new(ErrorCode::OutOfRange));
    }
    let prop = PropId(vm.next_prop);
    vm.next_prop += 1;
    Ok(Val::Prop(prop))
}

/// The active frames as strings, innermost first, or just frame `level`
/// (1 being the caller of `t3GetStackTrace`).
pub fn t3_get_stack_trace(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let frames = vm.stack_trace();
    let level = match args.first() {
        Some(v) => Some(expect_int_bif(*v)?),
        None => None,
    };
    match level {
        Some(n) => {
            let frame = usize::try_from(n - 1)
                .ok()
                .and_then(|i| frames.get(i))
                .ok_or_else(|| RuntimeError::with(ErrorCode::BadValBif, "stack trace level"))?;
            Ok(vm.new_string(frame.clone().into_bytes()))
        }
        None => {
            let items = frames.into_iter().map(|f| vm.new_string(f.into_bytes())).collect();
            Ok(vm.new_list(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ImageBuilder, run_entry};
    use bytecode::{Instruction, MethodBuilder};

    fn call_t3(b: &mut ImageBuilder, index: u16, args: &[i32]) -> u32 {
        let mut m = MethodBuilder::new(0, 0);
        for a in args.iter().rev() {
            m.emit(Instruction::PushInt { value: *a });
        }
        m.emit(Instruction::Builtin { argc: args.len() as u16, set: ImageBuilder::T3VM, index });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        b.method(m)
    }

    #[test]
    fn set_say_swaps_functions_and_methods() {
        let mut b = ImageBuilder::new();
        let p = b.prop("sayIt");
        let mut vm = b.vm();
        let say = ImageBuilder::tads_say();

        assert_eq!(t3_set_say(&mut vm, &[say]), Ok(Val::Int(SETSAY_NO_FUNC)));
        assert_eq!(t3_set_say(&mut vm, &[Val::Int(SETSAY_NO_FUNC)]), Ok(say));
        assert_eq!(vm.say_func, Val::Nil);

        assert_eq!(t3_set_say(&mut vm, &[Val::Prop(p)]), Ok(Val::Int(SETSAY_NO_METHOD)));
        assert_eq!(t3_set_say(&mut vm, &[Val::Int(SETSAY_NO_METHOD)]), Ok(Val::Prop(p)));
        assert!(!vm.say_method.is_valid());

        let err = t3_set_say(&mut vm, &[Val::True]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BadTypeBif));
    }

    #[test]
    fn debug_trace_without_debugger() {
        let mut b = ImageBuilder::new();
        let entry = call_t3(&mut b, DEBUG_TRACE, &[T3DBG_BREAK]);
        b.entry(entry);
        let (_, result) = run_entry(b);
        assert_eq!(result, Ok(Val::Nil));
    }

    #[test]
    fn alloc_prop_is_fresh() {
        let mut b = ImageBuilder::new();
        let last = b.prop("last");
        let entry = call_t3(&mut b, ALLOC_PROP, &[]);
        b.entry(entry);
        let (_, result) = run_entry(b);
        let prop = result.expect("runs").as_prop().expect("a property");
        assert!(prop.0 > last.0);
    }

    #[test]
    fn stack_trace_lists_frames() {
        let mut b = ImageBuilder::new();
        let inner = call_t3(&mut b, GET_STACK_TRACE, &[]);
        b.symbol("inner", Val::FuncPtr(inner));
        let mut outer = MethodBuilder::new(0, 0);
        outer.emit(Instruction::Call { argc: 0, ofs: inner });
        outer.emit(Instruction::GetR0);
        outer.emit(Instruction::RetVal);
        let outer = b.method(outer);
        b.entry(outer);

        let (vm, result) = run_entry(b);
        let frames = vm.list_like_elements(result.expect("runs")).expect("list");
        assert_eq!(frames.len(), 2);
        let innermost = vm.string_value(frames[0]).expect("string");
        assert!(innermost.starts_with("inner +0x"), "{innermost}");
    }

    #[test]
    fn global_symbols_table() {
        let mut b = ImageBuilder::new();
        let prop = b.prop("weight");
        let entry = call_t3(&mut b, GET_GLOBAL_SYMBOLS, &[]);
        b.entry(entry);
        let (vm, result) = run_entry(b);
        let table = result.expect("runs");
        let key = LookupKey::Str(b"weight".to_vec());
        let found = vm
            .heap
            .get(table.as_obj().expect("object"))
            .and_then(ObjectBody::as_lookup_table)
            .and_then(|t| t.get(&key));
        assert_eq!(found, Some(Val::Prop(prop)));
    }
}
