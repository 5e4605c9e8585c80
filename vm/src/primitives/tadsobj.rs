use object::{ObjId, ObjectBody, Val};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::{Arity, PrimitiveDesc, expect_list};

pub static METHODS: &[PrimitiveDesc] = &[
    PrimitiveDesc::new("createInstance", Arity::AtLeast(0), tadsobj_create_instance),
    PrimitiveDesc::new("createClone", Arity::Exact(0), tadsobj_create_clone),
    PrimitiveDesc::new("createTransientInstance", Arity::AtLeast(0), tadsobj_create_transient_instance),
    PrimitiveDesc::new("setSuperclassList", Arity::Exact(1), tadsobj_set_superclass_list),
];

fn expect_tads(vm: &VM, value: Val) -> Result<ObjId, RuntimeError> {
    match value {
        Val::Obj(id) if vm.heap.get(id).and_then(ObjectBody::as_tads).is_some() => Ok(id),
        _ => Err(RuntimeError::new(ErrorCode::ObjValReqd)),
    }
}

/// Instantiate `receiver` with the constructor getting `args`.
fn instantiate(vm: &mut VM, receiver: Val, args: &[Val], transient: bool) -> Result<Val, RuntimeError> {
    let class = expect_tads(vm, receiver)?;
    // the constructor takes its own copy of the arguments
    vm.stack.check_space(args.len())?;
    for a in args.iter().rev() {
        vm.stack.push(*a);
    }
    let id = vm.new_instance(vec![class], args.len(), transient)?;
    Ok(Val::Obj(id))
}

pub fn tadsobj_create_instance(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    instantiate(vm, receiver, args, false)
}

pub fn tadsobj_create_transient_instance(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    instantiate(vm, receiver, args, true)
}

/// A shallow copy: same superclasses and property values.
pub fn tadsobj_create_clone(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let id = expect_tads(vm, receiver)?;
    let body = vm
        .heap
        .get(id)
        .cloned()
        .ok_or(RuntimeError::new(ErrorCode::ObjValReqd))?;
    Ok(Val::Obj(vm.heap.alloc(body)))
}

pub fn tadsobj_set_superclass_list(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let id = expect_tads(vm, receiver)?;
    let mut supers = Vec::new();
    for sc in expect_list(vm, args[0])? {
        match sc {
            Val::Obj(sc) if vm.heap.get(sc).and_then(ObjectBody::as_tads).is_some() => supers.push(sc),
            _ => return Err(RuntimeError::new(ErrorCode::ObjValReqdSc)),
        }
    }
    // a class may not become its own ancestor
    if supers.iter().any(|sc| object::is_instance_of(vm.heap.objects(), *sc, id)) {
        return Err(RuntimeError::with(ErrorCode::BadValBif, "circular superclass"));
    }
    vm.heap.modify(id, |body| {
        if let Some(tads) = body.as_tads_mut() {
            tads.superclasses = supers;
        }
    });
    Ok(Val::Nil)
}
