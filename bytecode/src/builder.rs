use core::ops::{Deref, DerefMut};

use crate::header::{ExceptionEntry, FUNC_HEADER_SIZE, FunctionHeader, LineEntry};
use crate::instruction::Instruction;
use crate::op::Op;

/// A branch whose offset has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`] and [`BytecodeBuilder::switch`].
/// Resolve it with [`BytecodeBuilder::bind`].
#[derive(Debug)]
pub struct Label {
    /// Position of the i16 offset bytes in the buffer. Branch offsets are
    /// relative to this position.
    offset_pos: usize,
}

/// Builds a bytecode byte sequence.
///
/// [`emit`](Self::emit) picks the shortest encoding for each
/// [`Instruction`], so `PushInt { value: 1 }` becomes `PUSH_1` and
/// `GetLcl { lcl: 300 }` becomes `GETLCL2`. Argument counts above
/// `u8::MAX` must go through `VARARGC`.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    fn emit_branch(&mut self, target: u32) {
        let offset = (target as isize - self.buf.len() as isize) as i16;
        self.emit_i16(offset);
    }

    fn emit_narrow(&mut self, narrow: Op, wide: Op, v: u16) {
        if let Ok(v) = u8::try_from(v) {
            self.emit_op(narrow);
            self.emit_u8(v);
        } else {
            self.emit_op(wide);
            self.emit_u16(v);
        }
    }

    /// Emit one instruction using its shortest encoding.
    ///
    /// `Switch` is emitted with an empty case table and `PushStrI` with an
    /// empty string; use [`switch`](Self::switch) and
    /// [`push_str_inline`](Self::push_str_inline) to build real ones.
    pub fn emit(&mut self, instr: Instruction) {
        use Instruction as I;

        match instr {
            I::PushInt { value: 0 } => self.emit_op(Op::Push0),
            I::PushInt { value: 1 } => self.emit_op(Op::Push1),
            I::PushInt { value } => {
                if let Ok(v) = i8::try_from(value) {
                    self.emit_op(Op::PushInt8);
                    self.emit_u8(v as u8);
                } else {
                    self.emit_op(Op::PushInt);
                    self.emit_u32(value as u32);
                }
            }
            I::PushStr { ofs } => self.op_u32(Op::PushStr, ofs),
            I::PushLst { ofs } => self.op_u32(Op::PushLst, ofs),
            I::PushObj { obj } => self.op_u32(Op::PushObj, obj),
            I::PushNil => self.emit_op(Op::PushNil),
            I::PushTrue => self.emit_op(Op::PushTrue),
            I::PushPropId { prop } => self.op_u16(Op::PushPropId, prop),
            I::PushFnPtr { ofs } => self.op_u32(Op::PushFnPtr, ofs),
            I::PushStrI { .. } => self.push_str_inline(&[]),
            I::PushParLst { fixed } => self.op_u8(Op::PushParLst, fixed),
            I::MakeLstPar => self.emit_op(Op::MakeLstPar),
            I::PushEnum { value } => self.op_u32(Op::PushEnum, value),
            I::PushBifPtr { set, index } => {
                self.emit_op(Op::PushBifPtr);
                self.emit_u16(index);
                self.emit_u16(set);
            }

            I::Neg => self.emit_op(Op::Neg),
            I::BNot => self.emit_op(Op::BNot),
            I::Add => self.emit_op(Op::Add),
            I::Sub => self.emit_op(Op::Sub),
            I::Mul => self.emit_op(Op::Mul),
            I::BAnd => self.emit_op(Op::BAnd),
            I::BOr => self.emit_op(Op::BOr),
            I::Shl => self.emit_op(Op::Shl),
            I::AShr => self.emit_op(Op::AShr),
            I::Xor => self.emit_op(Op::Xor),
            I::Div => self.emit_op(Op::Div),
            I::Mod => self.emit_op(Op::Mod),
            I::Not => self.emit_op(Op::Not),
            I::Boolize => self.emit_op(Op::Boolize),
            I::Inc => self.emit_op(Op::Inc),
            I::Dec => self.emit_op(Op::Dec),
            I::LShr => self.emit_op(Op::LShr),
            I::Eq => self.emit_op(Op::Eq),
            I::Ne => self.emit_op(Op::Ne),
            I::Lt => self.emit_op(Op::Lt),
            I::Le => self.emit_op(Op::Le),
            I::Gt => self.emit_op(Op::Gt),
            I::Ge => self.emit_op(Op::Ge),

            I::RetVal => self.emit_op(Op::RetVal),
            I::RetNil => self.emit_op(Op::RetNil),
            I::RetTrue => self.emit_op(Op::RetTrue),
            I::Ret => self.emit_op(Op::Ret),
            I::Call { argc, ofs } => {
                self.op_u8(Op::Call, argc as u8);
                self.emit_u32(ofs);
            }
            I::PtrCall { argc } => self.op_u8(Op::PtrCall, argc as u8),

            I::GetProp { prop } => self.op_u16(Op::GetProp, prop),
            I::CallProp { argc, prop } => {
                self.op_u8(Op::CallProp, argc as u8);
                self.emit_u16(prop);
            }
            I::PtrCallProp { argc } => self.op_u8(Op::PtrCallProp, argc as u8),
            I::GetPropSelf { prop } => self.op_u16(Op::GetPropSelf, prop),
            I::CallPropSelf { argc, prop } => {
                self.op_u8(Op::CallPropSelf, argc as u8);
                self.emit_u16(prop);
            }
            I::PtrCallPropSelf { argc } => self.op_u8(Op::PtrCallPropSelf, argc as u8),
            I::ObjGetProp { obj, prop } => {
                self.op_u32(Op::ObjGetProp, obj);
                self.emit_u16(prop);
            }
            I::ObjCallProp { argc, obj, prop } => {
                self.op_u8(Op::ObjCallProp, argc as u8);
                self.emit_u32(obj);
                self.emit_u16(prop);
            }
            I::GetPropData { prop } => self.op_u16(Op::GetPropData, prop),
            I::PtrGetPropData => self.emit_op(Op::PtrGetPropData),
            I::GetPropLcl1 { lcl, prop } => {
                self.op_u8(Op::GetPropLcl1, lcl as u8);
                self.emit_u16(prop);
            }
            I::CallPropLcl1 { argc, lcl, prop } => {
                self.op_u8(Op::CallPropLcl1, argc as u8);
                self.emit_u8(lcl as u8);
                self.emit_u16(prop);
            }
            I::GetPropR0 { prop } => self.op_u16(Op::GetPropR0, prop),
            I::CallPropR0 { argc, prop } => {
                self.op_u8(Op::CallPropR0, argc as u8);
                self.emit_u16(prop);
            }

            I::Inherit { argc, prop } => {
                self.op_u8(Op::Inherit, argc as u8);
                self.emit_u16(prop);
            }
            I::PtrInherit { argc } => self.op_u8(Op::PtrInherit, argc as u8),
            I::ExpInherit { argc, prop, obj } => {
                self.op_u8(Op::ExpInherit, argc as u8);
                self.emit_u16(prop);
                self.emit_u32(obj);
            }
            I::PtrExpInherit { argc, obj } => {
                self.op_u8(Op::PtrExpInherit, argc as u8);
                self.emit_u32(obj);
            }
            I::VarArgc => self.emit_op(Op::VarArgc),
            I::Delegate { argc, prop } => {
                self.op_u8(Op::Delegate, argc as u8);
                self.emit_u16(prop);
            }
            I::PtrDelegate { argc } => self.op_u8(Op::PtrDelegate, argc as u8),

            I::Swap2 => self.emit_op(Op::Swap2),
            I::SwapN { a, b } => {
                self.op_u8(Op::SwapN, a);
                self.emit_u8(b);
            }
            I::GetLcl { lcl } => match lcl {
                0 => self.emit_op(Op::GetLclN0),
                1 => self.emit_op(Op::GetLclN1),
                2 => self.emit_op(Op::GetLclN2),
                3 => self.emit_op(Op::GetLclN3),
                4 => self.emit_op(Op::GetLclN4),
                5 => self.emit_op(Op::GetLclN5),
                _ => self.emit_narrow(Op::GetLcl1, Op::GetLcl2, lcl),
            },
            I::GetArg { arg } => match arg {
                0 => self.emit_op(Op::GetArgN0),
                1 => self.emit_op(Op::GetArgN1),
                2 => self.emit_op(Op::GetArgN2),
                3 => self.emit_op(Op::GetArgN3),
                _ => self.emit_narrow(Op::GetArg1, Op::GetArg2, arg),
            },
            I::PushSelf => self.emit_op(Op::PushSelf),
            I::GetDbLcl { lcl, level } => {
                self.op_u16(Op::GetDbLcl, lcl);
                self.emit_u16(level);
            }
            I::GetDbArg { arg, level } => {
                self.op_u16(Op::GetDbArg, arg);
                self.emit_u16(level);
            }
            I::GetArgc => self.emit_op(Op::GetArgc),
            I::Dup => self.emit_op(Op::Dup),
            I::Disc { count: 1 } => self.emit_op(Op::Disc),
            I::Disc { count } => self.op_u8(Op::Disc1, count),
            I::GetR0 => self.emit_op(Op::GetR0),
            I::GetDbArgc { level } => self.op_u16(Op::GetDbArgc, level),
            I::Swap => self.emit_op(Op::Swap),
            I::PushCtxEle { code } => self.op_u8(Op::PushCtxEle, code),
            I::Dup2 => self.emit_op(Op::Dup2),

            I::Switch { default, .. } => {
                self.op_u16(Op::Switch, 0);
                self.emit_branch(default);
            }
            I::Jmp { target } => self.op_branch(Op::Jmp, target),
            I::Jt { target } => self.op_branch(Op::Jt, target),
            I::Jf { target } => self.op_branch(Op::Jf, target),
            I::Je { target } => self.op_branch(Op::Je, target),
            I::Jne { target } => self.op_branch(Op::Jne, target),
            I::Jgt { target } => self.op_branch(Op::Jgt, target),
            I::Jge { target } => self.op_branch(Op::Jge, target),
            I::Jlt { target } => self.op_branch(Op::Jlt, target),
            I::Jle { target } => self.op_branch(Op::Jle, target),
            I::Jst { target } => self.op_branch(Op::Jst, target),
            I::Jsf { target } => self.op_branch(Op::Jsf, target),
            I::Ljsr { target } => self.op_branch(Op::Ljsr, target),
            I::Lret { lcl } => self.op_u16(Op::Lret, lcl),
            I::Jnil { target } => self.op_branch(Op::Jnil, target),
            I::JNotNil { target } => self.op_branch(Op::JNotNil, target),
            I::JR0T { target } => self.op_branch(Op::JR0T, target),
            I::JR0F { target } => self.op_branch(Op::JR0F, target),
            I::GetSetLcl1R0 { lcl } => self.op_u8(Op::GetSetLcl1R0, lcl as u8),
            I::GetSetLcl1 { lcl } => self.op_u8(Op::GetSetLcl1, lcl as u8),
            I::DupR0 => self.emit_op(Op::DupR0),
            I::GetSpN { idx } => self.op_u8(Op::GetSpN, idx),

            I::Say { ofs } => self.op_u32(Op::Say, ofs),
            I::Builtin { argc, set, index } => {
                match (set, u8::try_from(index)) {
                    (0..=3, Ok(index)) => {
                        let op = match set {
                            0 => Op::BuiltinA,
                            1 => Op::BuiltinB,
                            2 => Op::BuiltinC,
                            _ => Op::BuiltinD,
                        };
                        self.op_u8(op, argc as u8);
                        self.emit_u8(index);
                    }
                    (_, Ok(index)) => {
                        self.op_u8(Op::Builtin1, argc as u8);
                        self.emit_u8(index);
                        self.emit_u8(set as u8);
                    }
                    (_, Err(_)) => {
                        self.op_u8(Op::Builtin2, argc as u8);
                        self.emit_u16(index);
                        self.emit_u8(set as u8);
                    }
                }
            }
            I::CallExt { argc, index } => {
                self.op_u8(Op::CallExt, argc as u8);
                self.emit_u32(index);
            }
            I::Throw => self.emit_op(Op::Throw),
            I::SayVal => self.emit_op(Op::SayVal),
            I::Index => self.emit_op(Op::Index),
            I::IdxLcl1Int8 { lcl, index } => {
                self.op_u8(Op::IdxLcl1Int8, lcl as u8);
                self.emit_u8(index);
            }
            I::IdxInt8 { index } => self.op_u8(Op::IdxInt8, index),

            I::New { argc, meta, transient } => {
                match (u8::try_from(argc), u8::try_from(meta)) {
                    (Ok(argc), Ok(meta)) => {
                        self.emit_op(if transient { Op::TrNew1 } else { Op::New1 });
                        self.emit_u8(argc);
                        self.emit_u8(meta);
                    }
                    _ => {
                        self.emit_op(if transient { Op::TrNew2 } else { Op::New2 });
                        self.emit_u16(argc);
                        self.emit_u16(meta);
                    }
                }
            }

            I::IncLcl { lcl } => self.op_u16(Op::IncLcl, lcl),
            I::DecLcl { lcl } => self.op_u16(Op::DecLcl, lcl),
            I::AddILcl { lcl, value } => match (u8::try_from(lcl), i8::try_from(value)) {
                (Ok(lcl), Ok(value)) => {
                    self.op_u8(Op::AddILcl1, lcl);
                    self.emit_u8(value as u8);
                }
                _ => {
                    self.op_u16(Op::AddILcl4, lcl);
                    self.emit_u32(value as u32);
                }
            },
            I::AddToLcl { lcl } => self.op_u16(Op::AddToLcl, lcl),
            I::SubFromLcl { lcl } => self.op_u16(Op::SubFromLcl, lcl),
            I::ZeroLcl { lcl } => self.emit_narrow(Op::ZeroLcl1, Op::ZeroLcl2, lcl),
            I::NilLcl { lcl } => self.emit_narrow(Op::NilLcl1, Op::NilLcl2, lcl),
            I::OneLcl { lcl } => self.emit_narrow(Op::OneLcl1, Op::OneLcl2, lcl),

            I::SetLcl { lcl } => self.emit_narrow(Op::SetLcl1, Op::SetLcl2, lcl),
            I::SetArg { arg } => self.emit_narrow(Op::SetArg1, Op::SetArg2, arg),
            I::SetInd => self.emit_op(Op::SetInd),
            I::SetProp { prop } => self.op_u16(Op::SetProp, prop),
            I::PtrSetProp => self.emit_op(Op::PtrSetProp),
            I::SetPropSelf { prop } => self.op_u16(Op::SetPropSelf, prop),
            I::ObjSetProp { obj, prop } => {
                self.op_u32(Op::ObjSetProp, obj);
                self.emit_u16(prop);
            }
            I::SetDbLcl { lcl, level } => {
                self.op_u16(Op::SetDbLcl, lcl);
                self.emit_u16(level);
            }
            I::SetDbArg { arg, level } => {
                self.op_u16(Op::SetDbArg, arg);
                self.emit_u16(level);
            }
            I::SetSelf => self.emit_op(Op::SetSelf),
            I::LoadCtx => self.emit_op(Op::LoadCtx),
            I::StoreCtx => self.emit_op(Op::StoreCtx),
            I::SetLcl1R0 { lcl } => self.op_u8(Op::SetLcl1R0, lcl as u8),
            I::SetIndLcl1I8 { lcl, index } => {
                self.op_u8(Op::SetIndLcl1I8, lcl as u8);
                self.emit_u8(index);
            }

            I::Bp => self.emit_op(Op::Bp),
            I::Nop => self.emit_op(Op::Nop),
        }
    }

    fn op_u8(&mut self, op: Op, v: u8) {
        self.emit_op(op);
        self.emit_u8(v);
    }

    fn op_u16(&mut self, op: Op, v: u16) {
        self.emit_op(op);
        self.emit_u16(v);
    }

    fn op_u32(&mut self, op: Op, v: u32) {
        self.emit_op(op);
        self.emit_u32(v);
    }

    fn op_branch(&mut self, op: Op, target: u32) {
        self.emit_op(op);
        self.emit_branch(target);
    }

    /// `PUSHSTRI` with the given inline bytes.
    pub fn push_str_inline(&mut self, bytes: &[u8]) {
        self.op_u16(Op::PushStrI, bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
    }

    /// Emit a forward branch with opcode `op` (any of the `J*` opcodes or
    /// `LJSR`). Returns a [`Label`] that must be resolved later with
    /// [`bind`](Self::bind).
    pub fn jump(&mut self, op: Op) -> Label {
        self.emit_op(op);
        self.emit_jump_placeholder()
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        let offset = (target as isize - label.offset_pos as isize) as i16;
        self.buf[label.offset_pos..label.offset_pos + 2].copy_from_slice(&offset.to_le_bytes());
    }

    /// Emit a backward branch with opcode `op` to `target` (a byte offset
    /// obtained from [`current_offset`](Self::current_offset)).
    pub fn jump_back(&mut self, op: Op, target: usize) {
        self.op_branch(op, target as u32);
    }

    /// Emit a `SWITCH` over the given case dataholders.
    ///
    /// Returns one label per case followed by the default label.
    pub fn switch(&mut self, cases: &[[u8; 5]]) -> (Vec<Label>, Label) {
        self.op_u16(Op::Switch, cases.len() as u16);
        let mut labels = Vec::with_capacity(cases.len());
        for case in cases {
            self.buf.extend_from_slice(case);
            labels.push(self.emit_jump_placeholder());
        }
        let default = self.emit_jump_placeholder();
        (labels, default)
    }

    fn emit_jump_placeholder(&mut self) -> Label {
        let offset_pos = self.buf.len();
        self.emit_i16(0); // placeholder
        Label { offset_pos }
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a complete method: header, code, exception table and line table.
///
/// Offsets reported by [`current_offset`](BytecodeBuilder::current_offset)
/// are method-relative, so they can be used directly as exception table
/// ranges and handler offsets.
pub struct MethodBuilder {
    code: BytecodeBuilder,
    header: FunctionHeader,
    handlers: Vec<ExceptionEntry>,
    lines: Vec<LineEntry>,
}

impl MethodBuilder {
    pub fn new(argc: u8, locals: u16) -> Self {
        let mut code = BytecodeBuilder::new();
        code.buf.resize(FUNC_HEADER_SIZE, 0);
        Self {
            code,
            header: FunctionHeader {
                min_argc: argc,
                locals,
                stack_depth: 32,
                ..FunctionHeader::default()
            },
            handlers: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn optional(mut self, opt_argc: u8) -> Self {
        self.header.opt_argc = opt_argc;
        self
    }

    pub fn varargs(mut self) -> Self {
        self.header.varargs = true;
        self
    }

    pub fn stack_depth(mut self, depth: u16) -> Self {
        self.header.stack_depth = depth;
        self
    }

    /// Protect `start..=end` with a handler at `handler` for exceptions of
    /// `class` (0 catches everything).
    pub fn catch(&mut self, start: usize, end: usize, class: u32, handler: usize) {
        self.handlers.push(ExceptionEntry {
            start: start as u16,
            end: end as u16,
            class,
            handler: handler as u16,
        });
    }

    /// Record that code from the current offset on belongs to `line`.
    pub fn line(&mut self, line: u32) {
        let ofs = self.code.current_offset() as u16;
        self.lines.push(LineEntry { ofs, line });
    }

    pub fn finish(mut self) -> Vec<u8> {
        if !self.handlers.is_empty() {
            self.header.exc_table = self.code.current_offset() as u16;
            self.code.emit_u16(self.handlers.len() as u16);
            for e in &self.handlers {
                self.code.emit_u16(e.start);
                self.code.emit_u16(e.end);
                self.code.emit_u32(e.class);
                self.code.emit_u16(e.handler);
            }
        }
        if !self.lines.is_empty() {
            self.header.debug_table = self.code.current_offset() as u16;
            self.code.emit_u16(self.lines.len() as u16);
            for l in &self.lines {
                self.code.emit_u16(l.ofs);
                self.code.emit_u32(l.line);
            }
        }
        let mut bytes = self.code.into_bytes();
        bytes[..FUNC_HEADER_SIZE].copy_from_slice(&self.header.encode());
        bytes
    }
}

impl Deref for MethodBuilder {
    type Target = BytecodeBuilder;

    fn deref(&self) -> &BytecodeBuilder {
        &self.code
    }
}

impl DerefMut for MethodBuilder {
    fn deref_mut(&mut self) -> &mut BytecodeBuilder {
        &mut self.code
    }
}
