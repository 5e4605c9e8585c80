use object::{ObjectBody, Val};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::{Arity, PrimitiveDesc, arg, index_of, span};

pub static METHODS: &[PrimitiveDesc] = &[
    PrimitiveDesc::new("toList", Arity::Range(0, 2), vector_to_list),
    PrimitiveDesc::new("length", Arity::Exact(0), vector_length),
    PrimitiveDesc::new("indexOf", Arity::Exact(1), vector_index_of),
];

fn expect_vector(vm: &VM, value: Val) -> Result<Vec<Val>, RuntimeError> {
    match value {
        Val::Obj(id) => match vm.heap.get(id) {
            Some(ObjectBody::Vector(items)) => Ok(items.clone()),
            _ => Err(RuntimeError::new(ErrorCode::InvalObjType)),
        },
        _ => Err(RuntimeError::new(ErrorCode::ObjValReqd)),
    }
}

pub fn vector_to_list(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let items = expect_vector(vm, receiver)?;
    let range = span(items.len(), arg(args, 0), arg(args, 1))?;
    Ok(vm.new_list(items[range].to_vec()))
}

pub fn vector_length(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(Val::Int(expect_vector(vm, receiver)?.len() as i32))
}

pub fn vector_index_of(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let items = expect_vector(vm, receiver)?;
    Ok(index_of(vm, &items, args[0]))
}
