//! The value stack and activation-frame layout.
//!
//! A frame is eight bookkeeping slots pushed by the caller after the
//! arguments, followed by the callee's locals:
//!
//! ```text
//!   arg[argc-1] .. arg[0]  target_prop  orig_target  defining_obj  self
//!   return_ofs  caller_entry  argc  prev_fp   local[0] .. local[n-1]
//!                                   ^ fp
//! ```
//!
//! The frame pointer is the index of the `prev_fp` slot. `fp == 0` means no
//! frame is active.

use object::{PropId, Val};

use crate::error::{ErrorCode, RuntimeError};

/// Number of bookkeeping slots in a frame.
pub const FRAME_SIZE: usize = 8;

const OFS_ARGC: usize = 1;
const OFS_ENTRY: usize = 2;
const OFS_RETURN: usize = 3;
const OFS_SELF: usize = 4;
const OFS_DEFINING: usize = 5;
const OFS_ORIG_TARGET: usize = 6;
const OFS_TARGET_PROP: usize = 7;

#[derive(Debug)]
pub struct Stack {
    slots: Vec<Val>,
    limit: usize,
    reserve: usize,
    reserve_released: bool,
}

impl Stack {
    pub fn new(limit: usize, reserve: usize) -> Self {
        Self {
            slots: Vec::with_capacity(limit + reserve),
            limit,
            reserve,
            reserve_released: false,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Usable slots, including the reserve while it is released.
    fn capacity(&self) -> usize {
        if self.reserve_released { self.limit + self.reserve } else { self.limit }
    }

    /// Fail with a stack overflow unless `n` more slots fit.
    pub fn check_space(&self, n: usize) -> Result<(), RuntimeError> {
        if self.slots.len() + n > self.capacity() {
            return Err(RuntimeError::new(ErrorCode::StackOverflow));
        }
        Ok(())
    }

    /// Make the emergency reserve available while a stack-overflow
    /// exception is being built.
    pub fn release_reserve(&mut self) {
        self.reserve_released = true;
    }

    /// Take the reserve back once the stack is below the normal limit.
    pub fn restore_reserve(&mut self) {
        if self.slots.len() <= self.limit {
            self.reserve_released = false;
        }
    }

    pub fn reserve_released(&self) -> bool {
        self.reserve_released
    }

    #[inline(always)]
    pub fn push(&mut self, val: Val) {
        self.slots.push(val);
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Val {
        self.slots.pop().unwrap_or(Val::Nil)
    }

    /// Value `depth` slots below the top (0 is the top).
    #[inline(always)]
    pub fn peek(&self, depth: usize) -> Val {
        self.slots
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.slots.get(i))
            .copied()
            .unwrap_or(Val::Nil)
    }

    #[inline(always)]
    pub fn get(&self, idx: usize) -> Val {
        self.slots.get(idx).copied().unwrap_or(Val::Nil)
    }

    #[inline(always)]
    pub fn set(&mut self, idx: usize, val: Val) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = val;
        }
    }

    pub fn set_top(&mut self, depth: usize, val: Val) {
        if let Some(i) = self.slots.len().checked_sub(depth + 1) {
            self.slots[i] = val;
        }
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        let len = self.slots.len();
        if a < len && b < len {
            self.slots.swap(len - 1 - a, len - 1 - b);
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    pub fn discard(&mut self, n: usize) {
        let len = self.slots.len().saturating_sub(n);
        self.slots.truncate(len);
    }

    /// The top `argc` values as an argument list: the top of the stack is
    /// argument 0.
    pub fn args(&self, argc: usize) -> Vec<Val> {
        (0..argc).map(|i| self.peek(i)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Val> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Val> {
        self.slots.iter_mut()
    }

    // ── Frame slots ──

    pub fn argc(&self, fp: usize) -> usize {
        self.get(fp - OFS_ARGC).as_int().unwrap_or(0).max(0) as usize
    }

    pub fn caller_entry(&self, fp: usize) -> u32 {
        match self.get(fp - OFS_ENTRY) {
            Val::CodeOfs(ofs) => ofs,
            _ => 0,
        }
    }

    /// Method-relative return offset in the caller; 0 at a native boundary.
    pub fn return_ofs(&self, fp: usize) -> u32 {
        self.get(fp - OFS_RETURN).as_int().unwrap_or(0) as u32
    }

    pub fn self_val(&self, fp: usize) -> Val {
        self.get(fp - OFS_SELF)
    }

    pub fn set_self(&mut self, fp: usize, val: Val) {
        self.set(fp - OFS_SELF, val);
    }

    pub fn defining(&self, fp: usize) -> Val {
        self.get(fp - OFS_DEFINING)
    }

    pub fn set_defining(&mut self, fp: usize, val: Val) {
        self.set(fp - OFS_DEFINING, val);
    }

    pub fn orig_target(&self, fp: usize) -> Val {
        self.get(fp - OFS_ORIG_TARGET)
    }

    pub fn set_orig_target(&mut self, fp: usize, val: Val) {
        self.set(fp - OFS_ORIG_TARGET, val);
    }

    pub fn target_prop(&self, fp: usize) -> PropId {
        self.get(fp - OFS_TARGET_PROP).as_prop().unwrap_or(PropId::INVALID)
    }

    pub fn set_target_prop(&mut self, fp: usize, prop: PropId) {
        self.set(fp - OFS_TARGET_PROP, Val::Prop(prop));
    }

    pub fn prev_fp(&self, fp: usize) -> usize {
        match self.get(fp) {
            Val::StackPtr(p) => p as usize,
            _ => 0,
        }
    }

    /// Slot of argument `i`; fails when it would lie below the stack.
    pub fn arg_index(fp: usize, i: usize) -> Result<usize, RuntimeError> {
        fp.checked_sub(FRAME_SIZE + i)
            .ok_or_else(|| RuntimeError::new(ErrorCode::IndexOutOfRange))
    }

    pub fn local_index(fp: usize, i: usize) -> usize {
        fp + 1 + i
    }

    /// Stack length before the frame at `fp` and its arguments were pushed.
    pub fn frame_base(&self, fp: usize) -> usize {
        (fp + 1).saturating_sub(FRAME_SIZE + self.argc(fp))
    }
}
