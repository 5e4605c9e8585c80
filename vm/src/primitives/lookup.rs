use object::{LookupTable, ObjId, ObjectBody, Val};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::{Arity, PrimitiveDesc};

pub static METHODS: &[PrimitiveDesc] = &[
    PrimitiveDesc::new("isKeyPresent", Arity::Exact(1), lookup_is_key_present),
    PrimitiveDesc::new("removeElement", Arity::Exact(1), lookup_remove_element),
    PrimitiveDesc::new("getEntryCount", Arity::Exact(0), lookup_entry_count),
    PrimitiveDesc::new("keysToList", Arity::Exact(0), lookup_keys_to_list),
    PrimitiveDesc::new("valsToList", Arity::Exact(0), lookup_vals_to_list),
];

fn expect_table(vm: &VM, value: Val) -> Result<(ObjId, &LookupTable), RuntimeError> {
    match value {
        Val::Obj(id) => match vm.heap.get(id) {
            Some(ObjectBody::LookupTable(t)) => Ok((id, t)),
            _ => Err(RuntimeError::new(ErrorCode::InvalObjType)),
        },
        _ => Err(RuntimeError::new(ErrorCode::ObjValReqd)),
    }
}

pub fn lookup_is_key_present(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let key = vm.lookup_key(args[0]);
    let (_, table) = expect_table(vm, receiver)?;
    Ok(Val::bool(table.get(&key).is_some()))
}

/// Remove the entry for a key, returning its value (nil if absent).
pub fn lookup_remove_element(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let key = vm.lookup_key(args[0]);
    let (id, _) = expect_table(vm, receiver)?;
    Ok(vm.heap.table_remove(id, &key).unwrap_or(Val::Nil))
}

pub fn lookup_entry_count(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let (_, table) = expect_table(vm, receiver)?;
    Ok(Val::Int(table.len() as i32))
}

pub fn lookup_keys_to_list(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let (_, table) = expect_table(vm, receiver)?;
    let keys = table.pairs().map(|(k, _)| k).collect();
    Ok(vm.new_list(keys))
}

pub fn lookup_vals_to_list(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let (_, table) = expect_table(vm, receiver)?;
    let vals = table.pairs().map(|(_, v)| v).collect();
    Ok(vm.new_list(vals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ImageBuilder;
    use object::Metaclass;

    #[test]
    fn table_methods_with_string_keys() {
        let mut b = ImageBuilder::new();
        let present = b.native(Metaclass::LookupTable, "isKeyPresent");
        let remove = b.native(Metaclass::LookupTable, "removeElement");
        let count = b.native(Metaclass::LookupTable, "getEntryCount");
        let keys = b.native(Metaclass::LookupTable, "keysToList");
        let vals = b.native(Metaclass::LookupTable, "valsToList");
        let apple = b.string("apple");
        let mut vm = b.vm();

        let table = Val::Obj(vm.heap.alloc(ObjectBody::LookupTable(LookupTable::new())));
        // a heap string with the same text is the same key
        let heap_apple = vm.new_string(b"apple".to_vec());
        vm.set_index(table, heap_apple, Val::Int(1)).expect("store");
        vm.set_index(table, Val::Int(2), Val::Int(4)).expect("store");

        assert_eq!(vm.call_method(table, present, &[Val::SString(apple)]), Ok(Val::True));
        assert_eq!(vm.call_method(table, count, &[]), Ok(Val::Int(2)));
        let v = vm.call_method(table, vals, &[]).expect("vals");
        let mut v = vm.list_like_elements(v).expect("list");
        v.sort();
        assert_eq!(v, vec![Val::Int(1), Val::Int(4)]);
        let k = vm.call_method(table, keys, &[]).expect("keys");
        assert_eq!(vm.list_like_elements(k).map(|k| k.len()), Some(2));

        assert_eq!(vm.call_method(table, remove, &[Val::SString(apple)]), Ok(Val::Int(1)));
        assert_eq!(vm.call_method(table, remove, &[Val::SString(apple)]), Ok(Val::Nil));
        assert_eq!(vm.call_method(table, count, &[]), Ok(Val::Int(1)));
    }
}
