//! Host-implemented function sets called with `BUILTIN*`.
//!
//! The image imports sets by name (`t3vm/010006`, `tads-gen/030008`, ...);
//! a builtin is addressed by the image's set index and its position in the
//! set.

use object::Val;

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::Arity;

pub mod t3vm;
pub mod tadsgen;
pub mod tadsio;

/// A builtin function: `(vm, args)` with argument 0 first.
pub type BuiltinFn = fn(&mut VM, &[Val]) -> Result<Val, RuntimeError>;

#[derive(Clone, Copy)]
pub struct BuiltinDesc {
    pub name: &'static str,
    pub arity: Arity,
    pub func: BuiltinFn,
}

impl BuiltinDesc {
    pub const fn new(name: &'static str, arity: Arity, func: BuiltinFn) -> Self {
        Self { name, arity, func }
    }
}

impl std::fmt::Debug for BuiltinDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinDesc")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FunctionSet {
    /// Name without the version suffix.
    pub name: String,
    pub funcs: Vec<BuiltinDesc>,
}

impl FunctionSet {
    pub fn new(name: impl Into<String>, funcs: &[BuiltinDesc]) -> Self {
        Self { name: name.into(), funcs: funcs.to_vec() }
    }
}

pub fn standard_sets() -> Vec<FunctionSet> {
    vec![
        FunctionSet::new("t3vm", t3vm::FUNCTIONS),
        FunctionSet::new("tads-gen", tadsgen::FUNCTIONS),
        FunctionSet::new("tads-io", tadsio::FUNCTIONS),
    ]
}

// ── Argument helpers ──

pub(crate) fn expect_int_bif(value: Val) -> Result<i32, RuntimeError> {
    value.as_int().ok_or(RuntimeError::new(ErrorCode::BadTypeBif))
}

impl VM {
    /// Run builtin `index` of the image's function set `set` with `argc`
    /// arguments on the stack; the result goes to R0.
    pub(crate) fn call_builtin(&mut self, set: u16, index: u16, argc: usize) -> Result<(), RuntimeError> {
        let set_name = || {
            self.image
                .function_sets
                .get(set as usize)
                .cloned()
                .unwrap_or_else(|| format!("#{set}"))
        };
        let pos = self
            .fnset_map
            .get(set as usize)
            .copied()
            .flatten()
            .ok_or_else(|| RuntimeError::with(ErrorCode::UnknownFuncSet, set_name()))?;
        let desc = self.function_sets[pos]
            .funcs
            .get(index as usize)
            .copied()
            .ok_or_else(|| RuntimeError::with(ErrorCode::UnknownFuncSet, format!("{}[{index}]", set_name())))?;
        desc.arity.check(argc)?;

        let args = self.stack.args(argc);
        let result = (desc.func)(self, &args);
        self.stack.discard(argc);
        self.r0 = result?;
        Ok(())
    }
}
