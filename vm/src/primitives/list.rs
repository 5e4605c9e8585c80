use object::Val;

use crate::VM;
use crate::error::RuntimeError;
use crate::primitives::{Arity, PrimitiveDesc, arg, expect_list, index_of, span};

pub static METHODS: &[PrimitiveDesc] = &[
    PrimitiveDesc::new("length", Arity::Exact(0), list_length),
    PrimitiveDesc::new("sublist", Arity::Range(1, 2), list_sublist),
    PrimitiveDesc::new("indexOf", Arity::Exact(1), list_index_of),
    PrimitiveDesc::new("car", Arity::Exact(0), list_car),
    PrimitiveDesc::new("cdr", Arity::Exact(0), list_cdr),
];

pub fn list_length(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(Val::Int(expect_list(vm, receiver)?.len() as i32))
}

pub fn list_sublist(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let items = expect_list(vm, receiver)?;
    let range = span(items.len(), arg(args, 0), arg(args, 1))?;
    Ok(vm.new_list(items[range].to_vec()))
}

pub fn list_index_of(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let items = expect_list(vm, receiver)?;
    Ok(index_of(vm, &items, args[0]))
}

pub fn list_car(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(expect_list(vm, receiver)?.first().copied().unwrap_or(Val::Nil))
}

/// Everything after the first element; nil for an empty list.
pub fn list_cdr(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let items = expect_list(vm, receiver)?;
    match items.split_first() {
        Some((_, rest)) => Ok(vm.new_list(rest.to_vec())),
        None => Ok(Val::Nil),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ImageBuilder;
    use object::Metaclass;

    #[test]
    fn list_methods_on_constant_lists() {
        let mut b = ImageBuilder::new();
        let length = b.native(Metaclass::List, "length");
        let sublist = b.native(Metaclass::List, "sublist");
        let index_of = b.native(Metaclass::List, "indexOf");
        let car = b.native(Metaclass::List, "car");
        let cdr = b.native(Metaclass::List, "cdr");
        let l = b.list(&[Val::Int(10), Val::Int(20), Val::Int(30)]);
        let empty = b.list(&[]);
        let mut vm = b.vm();
        let l = Val::List(l);

        assert_eq!(vm.call_method(l, length, &[]), Ok(Val::Int(3)));
        assert_eq!(vm.call_method(l, index_of, &[Val::Int(20)]), Ok(Val::Int(2)));
        assert_eq!(vm.call_method(l, index_of, &[Val::Int(99)]), Ok(Val::Nil));
        assert_eq!(vm.call_method(l, car, &[]), Ok(Val::Int(10)));

        let tail = vm.call_method(l, cdr, &[]).expect("cdr");
        assert_eq!(vm.list_like_elements(tail), Some(vec![Val::Int(20), Val::Int(30)]));
        let mid = vm.call_method(l, sublist, &[Val::Int(2), Val::Int(1)]).expect("sublist");
        assert_eq!(vm.list_like_elements(mid), Some(vec![Val::Int(20)]));

        assert_eq!(vm.call_method(Val::List(empty), car, &[]), Ok(Val::Nil));
        assert_eq!(vm.call_method(Val::List(empty), cdr, &[]), Ok(Val::Nil));
    }
}
