//! Native methods of the intrinsic metaclasses.
//!
//! Each metaclass has a fixed table of [`PrimitiveDesc`]s. The image's
//! metaclass dependency table lists, per metaclass, the property ids the
//! program uses for these methods: the `i`th property maps to entry `i`.

use object::{Metaclass, ObjId, PropId, Val};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};

pub mod list;
pub mod lookup;
pub mod root;
pub mod string;
pub mod tadsobj;
pub mod vector;

/// A native method: `(vm, receiver, args)`. Arguments stay on the stack
/// for the duration of the call.
pub type PrimitiveFn = fn(&mut VM, Val, &[Val]) -> Result<Val, RuntimeError>;

/// Accepted argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(u8),
    Range(u8, u8),
    AtLeast(u8),
}

impl Arity {
    pub fn check(self, argc: usize) -> Result<(), RuntimeError> {
        let ok = match self {
            Arity::Exact(n) => argc == n as usize,
            Arity::Range(lo, hi) => (lo as usize..=hi as usize).contains(&argc),
            Arity::AtLeast(n) => argc >= n as usize,
        };
        if ok { Ok(()) } else { Err(RuntimeError::new(ErrorCode::WrongNumOfArgs)) }
    }
}

#[derive(Clone, Copy)]
pub struct PrimitiveDesc {
    pub name: &'static str,
    pub arity: Arity,
    pub func: PrimitiveFn,
}

impl PrimitiveDesc {
    pub const fn new(name: &'static str, arity: Arity, func: PrimitiveFn) -> Self {
        Self { name, arity, func }
    }
}

impl std::fmt::Debug for PrimitiveDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveDesc")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// The native method table of `meta`, in image order.
pub fn table(meta: Metaclass) -> &'static [PrimitiveDesc] {
    match meta {
        Metaclass::RootObject => root::METHODS,
        Metaclass::TadsObject => tadsobj::METHODS,
        Metaclass::String => string::METHODS,
        Metaclass::List => list::METHODS,
        Metaclass::Vector => vector::METHODS,
        Metaclass::LookupTable => lookup::METHODS,
        Metaclass::IntrinsicClass
        | Metaclass::IntClassMod
        | Metaclass::AnonFuncPtr
        | Metaclass::Collection => &[],
    }
}

pub fn primitive_index_by_name(meta: Metaclass, name: &str) -> Option<usize> {
    table(meta).iter().position(|p| p.name == name)
}

// ── Argument helpers ──

pub(crate) fn arg(args: &[Val], i: usize) -> Option<Val> {
    args.get(i).copied()
}

pub(crate) fn expect_int(value: Val) -> Result<i32, RuntimeError> {
    value.as_int().ok_or(RuntimeError::new(ErrorCode::IntValReqd))
}

pub(crate) fn expect_prop(value: Val) -> Result<PropId, RuntimeError> {
    value.as_prop().ok_or(RuntimeError::new(ErrorCode::PropPtrValReqd))
}

pub(crate) fn expect_obj(vm: &VM, value: Val) -> Result<ObjId, RuntimeError> {
    match value {
        Val::Obj(id) if vm.heap.objects().is_live(id) => Ok(id),
        _ => Err(RuntimeError::new(ErrorCode::ObjValReqd)),
    }
}

pub(crate) fn expect_string(vm: &VM, value: Val) -> Result<Vec<u8>, RuntimeError> {
    vm.string_bytes(value).ok_or(RuntimeError::new(ErrorCode::StringValReqd))
}

pub(crate) fn expect_list(vm: &VM, value: Val) -> Result<Vec<Val>, RuntimeError> {
    vm.list_like_elements(value).ok_or(RuntimeError::new(ErrorCode::ListValReqd))
}

/// An optional `(start, count)` pair of 1-based arguments resolved against
/// `len` items. A negative start counts from the end; a negative count
/// leaves that many items off the end.
pub(crate) fn span(len: usize, start: Option<Val>, count: Option<Val>) -> Result<std::ops::Range<usize>, RuntimeError> {
    let len_i = len as i64;
    let from = match start {
        None => 0,
        Some(v) => {
            let s = expect_int(v)? as i64;
            if s > 0 {
                s - 1
            } else if s < 0 {
                (len_i + s).max(0)
            } else {
                0
            }
        }
    }
    .min(len_i);
    let to = match count {
        None | Some(Val::Nil) => len_i,
        Some(v) => {
            let c = expect_int(v)? as i64;
            if c >= 0 { (from + c).min(len_i) } else { (len_i + c).max(from) }
        }
    };
    Ok(from as usize..to as usize)
}

/// 1-based position of the first element equal to `needle`.
pub(crate) fn index_of(vm: &VM, items: &[Val], needle: Val) -> Val {
    items
        .iter()
        .position(|v| vm.equals(*v, needle))
        .map(|i| Val::Int(i as i32 + 1))
        .unwrap_or(Val::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_checks() {
        assert!(Arity::Exact(1).check(1).is_ok());
        assert!(Arity::Exact(1).check(0).is_err());
        assert!(Arity::Range(1, 2).check(2).is_ok());
        assert!(Arity::Range(1, 2).check(3).is_err());
        assert!(Arity::AtLeast(0).check(7).is_ok());
        assert_eq!(
            Arity::AtLeast(2).check(1).unwrap_err().code(),
            Some(ErrorCode::WrongNumOfArgs)
        );
    }

    #[test]
    fn spans() {
        assert_eq!(span(5, None, None).unwrap(), 0..5);
        assert_eq!(span(5, Some(Val::Int(2)), None).unwrap(), 1..5);
        assert_eq!(span(5, Some(Val::Int(2)), Some(Val::Int(2))).unwrap(), 1..3);
        assert_eq!(span(5, Some(Val::Int(-2)), None).unwrap(), 3..5);
        assert_eq!(span(5, Some(Val::Int(1)), Some(Val::Int(-1))).unwrap(), 0..4);
        assert_eq!(span(5, Some(Val::Int(9)), Some(Val::Int(3))).unwrap(), 5..5);
    }

    #[test]
    fn names_resolve_to_positions() {
        assert_eq!(primitive_index_by_name(Metaclass::String, "length"), Some(0));
        assert!(primitive_index_by_name(Metaclass::Collection, "length").is_none());
        for meta in Metaclass::ALL {
            for (i, p) in table(meta).iter().enumerate() {
                assert_eq!(primitive_index_by_name(meta, p.name), Some(i));
            }
        }
    }
}
