use object::Val;

use crate::VM;
use crate::error::RuntimeError;
use crate::primitives::{Arity, PrimitiveDesc, arg, expect_int, expect_string, span};

pub static METHODS: &[PrimitiveDesc] = &[
    PrimitiveDesc::new("length", Arity::Exact(0), string_length),
    PrimitiveDesc::new("substr", Arity::Range(1, 2), string_substr),
    PrimitiveDesc::new("toUpper", Arity::Exact(0), string_to_upper),
    PrimitiveDesc::new("toLower", Arity::Exact(0), string_to_lower),
    PrimitiveDesc::new("find", Arity::Range(1, 2), string_find),
    PrimitiveDesc::new("startsWith", Arity::Exact(1), string_starts_with),
    PrimitiveDesc::new("endsWith", Arity::Exact(1), string_ends_with),
];

/// Strings index by character, not byte.
fn chars(vm: &VM, value: Val) -> Result<Vec<char>, RuntimeError> {
    let bytes = expect_string(vm, value)?;
    Ok(String::from_utf8_lossy(&bytes).chars().collect())
}

fn alloc_vm_string(vm: &mut VM, chars: impl IntoIterator<Item = char>) -> Val {
    let s: String = chars.into_iter().collect();
    vm.new_string(s.into_bytes())
}

pub fn string_length(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(Val::Int(chars(vm, receiver)?.len() as i32))
}

pub fn string_substr(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let chars = chars(vm, receiver)?;
    let range = span(chars.len(), arg(args, 0), arg(args, 1))?;
    Ok(alloc_vm_string(vm, chars[range].iter().copied()))
}

pub fn string_to_upper(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let s = String::from_utf8_lossy(&expect_string(vm, receiver)?).to_uppercase();
    Ok(vm.new_string(s.into_bytes()))
}

pub fn string_to_lower(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let s = String::from_utf8_lossy(&expect_string(vm, receiver)?).to_lowercase();
    Ok(vm.new_string(s.into_bytes()))
}

/// 1-based character index of the first match at or after `start`, or nil.
pub fn string_find(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let hay = chars(vm, receiver)?;
    let needle = chars(vm, args[0])?;
    let start = match arg(args, 1) {
        Some(v) => (expect_int(v)?.max(1) - 1) as usize,
        None => 0,
    };
    if needle.len() > hay.len() || start > hay.len() - needle.len() {
        return Ok(Val::Nil);
    }
    let found = (start..=hay.len() - needle.len()).find(|&i| hay[i..].starts_with(&needle));
    Ok(found.map(|i| Val::Int(i as i32 + 1)).unwrap_or(Val::Nil))
}

pub fn string_starts_with(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let s = expect_string(vm, receiver)?;
    let prefix = expect_string(vm, args[0])?;
    Ok(Val::bool(s.starts_with(&prefix)))
}

pub fn string_ends_with(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let s = expect_string(vm, receiver)?;
    let suffix = expect_string(vm, args[0])?;
    Ok(Val::bool(s.ends_with(&suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testing::ImageBuilder;
    use object::Metaclass;

    fn text(vm: &VM, v: Result<Val, RuntimeError>) -> String {
        vm.string_value(v.expect("string result")).expect("a string")
    }

    #[test]
    fn length_counts_characters() {
        let mut b = ImageBuilder::new();
        let length = b.native(Metaclass::String, "length");
        let s = b.string("héllo");
        let mut vm = b.vm();
        assert_eq!(vm.call_method(Val::SString(s), length, &[]), Ok(Val::Int(5)));
    }

    #[test]
    fn substr_and_case() {
        let mut b = ImageBuilder::new();
        let substr = b.native(Metaclass::String, "substr");
        let upper = b.native(Metaclass::String, "toUpper");
        let lower = b.native(Metaclass::String, "toLower");
        let s = b.string("Hello World");
        let mut vm = b.vm();
        let s = Val::SString(s);

        let r = vm.call_method(s, substr, &[Val::Int(7)]);
        assert_eq!(text(&vm, r), "World");
        let r = vm.call_method(s, substr, &[Val::Int(1), Val::Int(5)]);
        assert_eq!(text(&vm, r), "Hello");
        let r = vm.call_method(s, substr, &[Val::Int(-3)]);
        assert_eq!(text(&vm, r), "rld");
        let r = vm.call_method(s, upper, &[]);
        assert_eq!(text(&vm, r), "HELLO WORLD");
        let r = vm.call_method(s, lower, &[]);
        assert_eq!(text(&vm, r), "hello world");
    }

    #[test]
    fn find_and_affixes() {
        let mut b = ImageBuilder::new();
        let find = b.native(Metaclass::String, "find");
        let starts = b.native(Metaclass::String, "startsWith");
        let ends = b.native(Metaclass::String, "endsWith");
        let s = b.string("abcabc");
        let bc = b.string("bc");
        let zz = b.string("zz");
        let mut vm = b.vm();
        let s = Val::SString(s);

        assert_eq!(vm.call_method(s, find, &[Val::SString(bc)]), Ok(Val::Int(2)));
        assert_eq!(vm.call_method(s, find, &[Val::SString(bc), Val::Int(3)]), Ok(Val::Int(5)));
        assert_eq!(vm.call_method(s, find, &[Val::SString(zz)]), Ok(Val::Nil));
        assert_eq!(vm.call_method(s, starts, &[Val::SString(bc)]), Ok(Val::Nil));
        assert_eq!(vm.call_method(s, ends, &[Val::SString(bc)]), Ok(Val::True));

        let err = vm.call_method(s, find, &[Val::Int(1)]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::StringValReqd));
    }
}
