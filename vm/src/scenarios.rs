//! Whole-program runs exercising several subsystems at once.

use bytecode::{Instruction, MethodBuilder};
use object::{LookupKey, LookupTable, ObjId, ObjectBody, PropId, Val};

use crate::builtins::{BuiltinDesc, FunctionSet, tadsgen};
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::Arity;
use crate::testing::{ImageBuilder, run_entry};
use crate::VM;

fn prop_value(vm: &VM, obj: ObjId, prop: PropId) -> Option<Val> {
    vm.heap.get(obj)?.as_tads()?.props.get(&prop).copied()
}

#[test]
fn arithmetic_then_divide_by_zero() {
    let mut b = ImageBuilder::new();
    let mut m = MethodBuilder::new(0, 1);
    m.emit(Instruction::PushInt { value: 3 });
    m.emit(Instruction::PushInt { value: 4 });
    m.emit(Instruction::Add);
    m.emit(Instruction::SetLcl { lcl: 0 });
    m.emit(Instruction::GetLcl { lcl: 0 });
    m.emit(Instruction::PushInt { value: 0 });
    m.emit(Instruction::Div);
    m.emit(Instruction::RetVal);
    let entry = b.method(m);
    b.entry(entry);

    let (vm, result) = run_entry(b);
    let Err(RuntimeError::Unhandled(exc)) = result else {
        panic!("expected an exception, got {result:?}");
    };
    assert_eq!(vm.error_number(exc), Some(ErrorCode::DivideByZero.number() as i32));
    assert!(vm.stack.is_empty());
}

#[test]
fn string_plus_integer_concatenates() {
    let mut b = ImageBuilder::new();
    let hello = b.string("hello ");
    let mut m = MethodBuilder::new(0, 0);
    m.emit(Instruction::PushStr { ofs: hello });
    m.emit(Instruction::PushInt { value: 42 });
    m.emit(Instruction::Add);
    m.emit(Instruction::RetVal);
    let entry = b.method(m);
    b.entry(entry);

    let (vm, result) = run_entry(b);
    let r = result.expect("runs");
    assert!(matches!(r, Val::Obj(_)));
    assert_eq!(vm.string_value(r).as_deref(), Some("hello 42"));
}

#[test]
fn prop_not_defined_reports_the_missing_name() {
    let mut b = ImageBuilder::new();
    let q = b.prop("q");
    let pnd = b.prop("propNotDefined");
    b.symbol("propNotDefined", Val::Prop(pnd));
    let q_name = b.string("q");
    let mut names = LookupTable::new();
    names.insert(LookupKey::Val(Val::Prop(q)), Val::Prop(q), Val::SString(q_name));
    let names = b.static_object(ObjectBody::LookupTable(names));

    // propNotDefined(p, ...) { return names[p]; }
    let mut method = MethodBuilder::new(1, 0).varargs();
    method.emit(Instruction::GetArg { arg: 0 });
    method.emit(Instruction::PushObj { obj: names.0 });
    method.emit(Instruction::Swap);
    method.emit(Instruction::Index);
    method.emit(Instruction::RetVal);
    let code = b.method(method);
    let c = b.class(&[], &[(pnd, Val::CodeOfs(code))]);
    let obj = b.object(&[c], &[]);

    let mut m = MethodBuilder::new(0, 0);
    m.emit(Instruction::ObjCallProp { argc: 0, obj: obj.0, prop: q.0 });
    m.emit(Instruction::GetR0);
    m.emit(Instruction::RetVal);
    let entry = b.method(m);
    b.entry(entry);

    let (vm, result) = run_entry(b);
    let r = result.expect("runs");
    assert_eq!(vm.string_value(r).as_deref(), Some("q"));
    assert_eq!(vm.symbol_name(Val::Prop(q)), Some("q"));
}

#[test]
fn exception_crosses_a_native_frame() {
    // invoke(f): call f from native code; an unhandled exception is thrown
    // on into the calling byte code
    fn invoke(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
        match vm.call_function(args[0], &[]) {
            Err(RuntimeError::Unhandled(exc)) => {
                assert!(vm.depth > 0);
                Err(RuntimeError::Unhandled(exc))
            }
            other => other,
        }
    }

    let mut b = ImageBuilder::new();
    b.function_set("native-call/010000");
    let set = b.function_set_count() - 1;
    let my_error = b.class(&[], &[]);
    let exc = b.object(&[my_error], &[]);

    let mut thrower = MethodBuilder::new(0, 0);
    thrower.emit(Instruction::PushObj { obj: exc.0 });
    thrower.emit(Instruction::Throw);
    let thrower = b.method(thrower);

    let mut m = MethodBuilder::new(0, 0);
    let start = m.current_offset();
    m.emit(Instruction::PushFnPtr { ofs: thrower });
    m.emit(Instruction::Builtin { argc: 1, set, index: 0 });
    let end = m.current_offset() - 1;
    m.emit(Instruction::RetNil);
    let handler = m.current_offset();
    m.emit(Instruction::RetVal);
    m.catch(start, end, my_error.0, handler);
    let entry = b.method(m);
    b.entry(entry);

    let mut vm = b.vm();
    vm.register_function_set(FunctionSet::new(
        "native-call",
        &[BuiltinDesc::new("invoke", Arity::Exact(1), invoke)],
    ));
    assert_eq!(vm.run_main(&[]), Ok(Val::Obj(exc)));
    assert!(vm.stack.is_empty());
    assert_eq!(vm.depth, 0);
}

#[test]
fn savepoint_and_undo() {
    let mut b = ImageBuilder::new();
    let p = b.prop("p");
    let obj = b.object(&[], &[(p, Val::Int(1))]);
    let mut m = MethodBuilder::new(0, 0);
    m.emit(Instruction::Builtin { argc: 0, set: ImageBuilder::TADS_GEN, index: tadsgen::SAVEPOINT });
    m.emit(Instruction::PushInt { value: 2 });
    m.emit(Instruction::ObjSetProp { obj: obj.0, prop: p.0 });
    m.emit(Instruction::ObjGetProp { obj: obj.0, prop: p.0 });
    m.emit(Instruction::GetR0);
    m.emit(Instruction::RetVal);
    let entry = b.method(m);
    b.entry(entry);

    let mut vm = b.vm();
    assert_eq!(vm.run_main(&[]), Ok(Val::Int(2)));
    assert_eq!(prop_value(&vm, obj, p), Some(Val::Int(2)));

    assert!(vm.undo().is_ok());
    assert_eq!(prop_value(&vm, obj, p), Some(Val::Int(1)));
    assert_eq!(vm.undo().unwrap_err().code(), Some(ErrorCode::NoUndo));

    // the builtin reports the same condition as nil
    let undo = Val::BifPtr { set: ImageBuilder::TADS_GEN, index: tadsgen::UNDO };
    assert_eq!(vm.call_function(undo, &[]), Ok(Val::Nil));
}

#[test]
fn save_and_restore_through_builtins() {
    let mut b = ImageBuilder::new();
    let p = b.prop("p");
    let obj = b.object(&[], &[(p, Val::Int(1))]);
    let name = b.string("slot1");
    let save_game = Val::BifPtr { set: ImageBuilder::TADS_GEN, index: tadsgen::SAVE_GAME };
    let restore_game = Val::BifPtr { set: ImageBuilder::TADS_GEN, index: tadsgen::RESTORE_GAME };
    let mut vm = b.vm();

    assert_eq!(vm.call_function(save_game, &[Val::SString(name)]), Ok(Val::Nil));
    vm.heap.set_prop(obj, p, Val::Int(7));
    assert_eq!(vm.call_function(restore_game, &[Val::SString(name)]), Ok(Val::Nil));
    assert_eq!(prop_value(&vm, obj, p), Some(Val::Int(1)));

    let missing = vm.new_string(b"no-such-slot".to_vec());
    let err = vm.call_function(restore_game, &[missing]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BadValBif));
}
