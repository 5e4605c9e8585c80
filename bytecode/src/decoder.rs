use core::fmt;

use crate::instruction::Instruction;
use crate::op::Op;

/// Size in bytes of one `SWITCH` case: a dataholder plus a branch offset.
pub const SWITCH_CASE_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte at `at` is not a known opcode.
    UnknownOpcode { byte: u8, at: usize },
    /// An operand runs past the end of the code.
    Truncated { at: usize },
    /// A branch target lies before the start of the code.
    BadBranch { at: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UnknownOpcode { byte, at } => {
                write!(f, "unknown opcode {byte:#04x} at {at:#x}")
            }
            Self::Truncated { at } => write!(f, "truncated instruction at {at:#x}"),
            Self::BadBranch { at } => write!(f, "branch out of range at {at:#x}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes a bytecode byte slice into [`Instruction`]s.
///
/// Every read is bounds-checked: malformed code yields a [`DecodeError`]
/// rather than reading past the slice. Positions, including branch targets,
/// are byte offsets from the start of the slice.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// A decoder positioned at `pos`.
    pub fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the instruction at the current position and advance past it.
    pub fn decode_next(&mut self) -> Result<Instruction, DecodeError> {
        let start = self.pos;
        let byte = self.read_u8()?;
        let op = Op::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode { byte, at: start })?;
        self.decode_op(op)
    }

    fn decode_op(&mut self, op: Op) -> Result<Instruction, DecodeError> {
        use Instruction as I;

        let instr = match op {
            Op::Push0 => I::PushInt { value: 0 },
            Op::Push1 => I::PushInt { value: 1 },
            Op::PushInt8 => I::PushInt { value: self.read_u8()? as i8 as i32 },
            Op::PushInt => I::PushInt { value: self.read_i32()? },
            Op::PushStr => I::PushStr { ofs: self.read_u32()? },
            Op::PushLst => I::PushLst { ofs: self.read_u32()? },
            Op::PushObj => I::PushObj { obj: self.read_u32()? },
            Op::PushNil => I::PushNil,
            Op::PushTrue => I::PushTrue,
            Op::PushPropId => I::PushPropId { prop: self.read_u16()? },
            Op::PushFnPtr => I::PushFnPtr { ofs: self.read_u32()? },
            Op::PushStrI => {
                let len = self.read_u16()?;
                let start = self.pos;
                self.skip(len as usize)?;
                I::PushStrI { start: start as u32, len }
            }
            Op::PushParLst => I::PushParLst { fixed: self.read_u8()? },
            Op::MakeLstPar => I::MakeLstPar,
            Op::PushEnum => I::PushEnum { value: self.read_u32()? },
            Op::PushBifPtr => {
                let index = self.read_u16()?;
                let set = self.read_u16()?;
                I::PushBifPtr { set, index }
            }

            Op::Neg => I::Neg,
            Op::BNot => I::BNot,
            Op::Add => I::Add,
            Op::Sub => I::Sub,
            Op::Mul => I::Mul,
            Op::BAnd => I::BAnd,
            Op::BOr => I::BOr,
            Op::Shl => I::Shl,
            Op::AShr => I::AShr,
            Op::Xor => I::Xor,
            Op::Div => I::Div,
            Op::Mod => I::Mod,
            Op::Not => I::Not,
            Op::Boolize => I::Boolize,
            Op::Inc => I::Inc,
            Op::Dec => I::Dec,
            Op::LShr => I::LShr,
            Op::Eq => I::Eq,
            Op::Ne => I::Ne,
            Op::Lt => I::Lt,
            Op::Le => I::Le,
            Op::Gt => I::Gt,
            Op::Ge => I::Ge,

            Op::RetVal => I::RetVal,
            Op::RetNil => I::RetNil,
            Op::RetTrue => I::RetTrue,
            Op::Ret => I::Ret,
            Op::Call => {
                let argc = self.read_argc()?;
                I::Call { argc, ofs: self.read_u32()? }
            }
            Op::PtrCall => I::PtrCall { argc: self.read_argc()? },

            Op::GetProp => I::GetProp { prop: self.read_u16()? },
            Op::CallProp => {
                let argc = self.read_argc()?;
                I::CallProp { argc, prop: self.read_u16()? }
            }
            Op::PtrCallProp => I::PtrCallProp { argc: self.read_argc()? },
            Op::GetPropSelf => I::GetPropSelf { prop: self.read_u16()? },
            Op::CallPropSelf => {
                let argc = self.read_argc()?;
                I::CallPropSelf { argc, prop: self.read_u16()? }
            }
            Op::PtrCallPropSelf => I::PtrCallPropSelf { argc: self.read_argc()? },
            Op::ObjGetProp => {
                let obj = self.read_u32()?;
                I::ObjGetProp { obj, prop: self.read_u16()? }
            }
            Op::ObjCallProp => {
                let argc = self.read_argc()?;
                let obj = self.read_u32()?;
                I::ObjCallProp { argc, obj, prop: self.read_u16()? }
            }
            Op::GetPropData => I::GetPropData { prop: self.read_u16()? },
            Op::PtrGetPropData => I::PtrGetPropData,
            Op::GetPropLcl1 => {
                let lcl = self.read_u8()? as u16;
                I::GetPropLcl1 { lcl, prop: self.read_u16()? }
            }
            Op::CallPropLcl1 => {
                let argc = self.read_argc()?;
                let lcl = self.read_u8()? as u16;
                I::CallPropLcl1 { argc, lcl, prop: self.read_u16()? }
            }
            Op::GetPropR0 => I::GetPropR0 { prop: self.read_u16()? },
            Op::CallPropR0 => {
                let argc = self.read_argc()?;
                I::CallPropR0 { argc, prop: self.read_u16()? }
            }

            Op::Inherit => {
                let argc = self.read_argc()?;
                I::Inherit { argc, prop: self.read_u16()? }
            }
            Op::PtrInherit => I::PtrInherit { argc: self.read_argc()? },
            Op::ExpInherit => {
                let argc = self.read_argc()?;
                let prop = self.read_u16()?;
                I::ExpInherit { argc, prop, obj: self.read_u32()? }
            }
            Op::PtrExpInherit => {
                let argc = self.read_argc()?;
                I::PtrExpInherit { argc, obj: self.read_u32()? }
            }
            Op::VarArgc => I::VarArgc,
            Op::Delegate => {
                let argc = self.read_argc()?;
                I::Delegate { argc, prop: self.read_u16()? }
            }
            Op::PtrDelegate => I::PtrDelegate { argc: self.read_argc()? },

            Op::Swap2 => I::Swap2,
            Op::SwapN => {
                let a = self.read_u8()?;
                I::SwapN { a, b: self.read_u8()? }
            }
            Op::GetArgN0 => I::GetArg { arg: 0 },
            Op::GetArgN1 => I::GetArg { arg: 1 },
            Op::GetArgN2 => I::GetArg { arg: 2 },
            Op::GetArgN3 => I::GetArg { arg: 3 },
            Op::GetLcl1 => I::GetLcl { lcl: self.read_u8()? as u16 },
            Op::GetLcl2 => I::GetLcl { lcl: self.read_u16()? },
            Op::GetArg1 => I::GetArg { arg: self.read_u8()? as u16 },
            Op::GetArg2 => I::GetArg { arg: self.read_u16()? },
            Op::PushSelf => I::PushSelf,
            Op::GetDbLcl => {
                let lcl = self.read_u16()?;
                I::GetDbLcl { lcl, level: self.read_u16()? }
            }
            Op::GetDbArg => {
                let arg = self.read_u16()?;
                I::GetDbArg { arg, level: self.read_u16()? }
            }
            Op::GetArgc => I::GetArgc,
            Op::Dup => I::Dup,
            Op::Disc => I::Disc { count: 1 },
            Op::Disc1 => I::Disc { count: self.read_u8()? },
            Op::GetR0 => I::GetR0,
            Op::GetDbArgc => I::GetDbArgc { level: self.read_u16()? },
            Op::Swap => I::Swap,
            Op::PushCtxEle => I::PushCtxEle { code: self.read_u8()? },
            Op::Dup2 => I::Dup2,

            Op::Switch => {
                let count = self.read_u16()?;
                let table = self.pos;
                self.skip(count as usize * SWITCH_CASE_SIZE)?;
                let default = self.read_branch()?;
                I::Switch { count, table: table as u32, default }
            }
            Op::Jmp => I::Jmp { target: self.read_branch()? },
            Op::Jt => I::Jt { target: self.read_branch()? },
            Op::Jf => I::Jf { target: self.read_branch()? },
            Op::Je => I::Je { target: self.read_branch()? },
            Op::Jne => I::Jne { target: self.read_branch()? },
            Op::Jgt => I::Jgt { target: self.read_branch()? },
            Op::Jge => I::Jge { target: self.read_branch()? },
            Op::Jlt => I::Jlt { target: self.read_branch()? },
            Op::Jle => I::Jle { target: self.read_branch()? },
            Op::Jst => I::Jst { target: self.read_branch()? },
            Op::Jsf => I::Jsf { target: self.read_branch()? },
            Op::Ljsr => I::Ljsr { target: self.read_branch()? },
            Op::Lret => I::Lret { lcl: self.read_u16()? },
            Op::Jnil => I::Jnil { target: self.read_branch()? },
            Op::JNotNil => I::JNotNil { target: self.read_branch()? },
            Op::JR0T => I::JR0T { target: self.read_branch()? },
            Op::JR0F => I::JR0F { target: self.read_branch()? },
            Op::GetSetLcl1R0 => I::GetSetLcl1R0 { lcl: self.read_u8()? as u16 },
            Op::GetSetLcl1 => I::GetSetLcl1 { lcl: self.read_u8()? as u16 },
            Op::DupR0 => I::DupR0,
            Op::GetSpN => I::GetSpN { idx: self.read_u8()? },
            Op::GetLclN0 => I::GetLcl { lcl: 0 },
            Op::GetLclN1 => I::GetLcl { lcl: 1 },
            Op::GetLclN2 => I::GetLcl { lcl: 2 },
            Op::GetLclN3 => I::GetLcl { lcl: 3 },
            Op::GetLclN4 => I::GetLcl { lcl: 4 },
            Op::GetLclN5 => I::GetLcl { lcl: 5 },

            Op::Say => I::Say { ofs: self.read_u32()? },
            Op::BuiltinA | Op::BuiltinB | Op::BuiltinC | Op::BuiltinD => {
                let argc = self.read_argc()?;
                let index = self.read_u8()? as u16;
                let set = (op as u8 - Op::BuiltinA as u8) as u16;
                I::Builtin { argc, set, index }
            }
            Op::Builtin1 => {
                let argc = self.read_argc()?;
                let index = self.read_u8()? as u16;
                I::Builtin { argc, set: self.read_u8()? as u16, index }
            }
            Op::Builtin2 => {
                let argc = self.read_argc()?;
                let index = self.read_u16()?;
                I::Builtin { argc, set: self.read_u8()? as u16, index }
            }
            Op::CallExt => {
                let argc = self.read_argc()?;
                I::CallExt { argc, index: self.read_u32()? }
            }
            Op::Throw => I::Throw,
            Op::SayVal => I::SayVal,
            Op::Index => I::Index,
            Op::IdxLcl1Int8 => {
                let lcl = self.read_u8()? as u16;
                I::IdxLcl1Int8 { lcl, index: self.read_u8()? }
            }
            Op::IdxInt8 => I::IdxInt8 { index: self.read_u8()? },

            Op::New1 | Op::TrNew1 => {
                let argc = self.read_argc()?;
                let meta = self.read_u8()? as u16;
                I::New { argc, meta, transient: op == Op::TrNew1 }
            }
            Op::New2 | Op::TrNew2 => {
                let argc = self.read_u16()?;
                let meta = self.read_u16()?;
                I::New { argc, meta, transient: op == Op::TrNew2 }
            }

            Op::IncLcl => I::IncLcl { lcl: self.read_u16()? },
            Op::DecLcl => I::DecLcl { lcl: self.read_u16()? },
            Op::AddILcl1 => {
                let lcl = self.read_u8()? as u16;
                I::AddILcl { lcl, value: self.read_u8()? as i8 as i32 }
            }
            Op::AddILcl4 => {
                let lcl = self.read_u16()?;
                I::AddILcl { lcl, value: self.read_i32()? }
            }
            Op::AddToLcl => I::AddToLcl { lcl: self.read_u16()? },
            Op::SubFromLcl => I::SubFromLcl { lcl: self.read_u16()? },
            Op::ZeroLcl1 => I::ZeroLcl { lcl: self.read_u8()? as u16 },
            Op::ZeroLcl2 => I::ZeroLcl { lcl: self.read_u16()? },
            Op::NilLcl1 => I::NilLcl { lcl: self.read_u8()? as u16 },
            Op::NilLcl2 => I::NilLcl { lcl: self.read_u16()? },
            Op::OneLcl1 => I::OneLcl { lcl: self.read_u8()? as u16 },
            Op::OneLcl2 => I::OneLcl { lcl: self.read_u16()? },

            Op::SetLcl1 => I::SetLcl { lcl: self.read_u8()? as u16 },
            Op::SetLcl2 => I::SetLcl { lcl: self.read_u16()? },
            Op::SetArg1 => I::SetArg { arg: self.read_u8()? as u16 },
            Op::SetArg2 => I::SetArg { arg: self.read_u16()? },
            Op::SetInd => I::SetInd,
            Op::SetProp => I::SetProp { prop: self.read_u16()? },
            Op::PtrSetProp => I::PtrSetProp,
            Op::SetPropSelf => I::SetPropSelf { prop: self.read_u16()? },
            Op::ObjSetProp => {
                let obj = self.read_u32()?;
                I::ObjSetProp { obj, prop: self.read_u16()? }
            }
            Op::SetDbLcl => {
                let lcl = self.read_u16()?;
                I::SetDbLcl { lcl, level: self.read_u16()? }
            }
            Op::SetDbArg => {
                let arg = self.read_u16()?;
                I::SetDbArg { arg, level: self.read_u16()? }
            }
            Op::SetSelf => I::SetSelf,
            Op::LoadCtx => I::LoadCtx,
            Op::StoreCtx => I::StoreCtx,
            Op::SetLcl1R0 => I::SetLcl1R0 { lcl: self.read_u8()? as u16 },
            Op::SetIndLcl1I8 => {
                let lcl = self.read_u8()? as u16;
                I::SetIndLcl1I8 { lcl, index: self.read_u8()? }
            }

            Op::Bp => I::Bp,
            Op::Nop => I::Nop,
        };
        Ok(instr)
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated { at: self.pos }
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(self.truncated());
        }
        self.pos += n;
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| self.truncated())?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }

    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.bytes.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(v)
    }

    #[inline(always)]
    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    #[inline(always)]
    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }

    #[inline(always)]
    fn read_argc(&mut self) -> Result<u16, DecodeError> {
        Ok(self.read_u8()? as u16)
    }

    /// Read a branch offset and resolve it against its own position.
    fn read_branch(&mut self) -> Result<u32, DecodeError> {
        let at = self.pos;
        let offset = self.read_u16()? as i16;
        branch_target(at, offset).ok_or(DecodeError::BadBranch { at })
    }
}

fn branch_target(at: usize, offset: i16) -> Option<u32> {
    let target = at as i64 + offset as i64;
    u32::try_from(target).ok()
}

/// Read case `i` of a `SWITCH` table starting at `table`.
///
/// Returns the raw case dataholder and the resolved branch target.
pub fn switch_case(bytes: &[u8], table: u32, i: u16) -> Option<([u8; 5], u32)> {
    let start = table as usize + i as usize * SWITCH_CASE_SIZE;
    let case = bytes.get(start..start + SWITCH_CASE_SIZE)?;
    let mut value = [0u8; 5];
    value.copy_from_slice(&case[..5]);
    let offset = i16::from_le_bytes([case[5], case[6]]);
    Some((value, branch_target(start + 5, offset)?))
}

impl<'a> Iterator for BytecodeDecoder<'a> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_at_end() {
            return None;
        }
        let result = self.decode_next();
        if result.is_err() {
            self.pos = self.bytes.len();
        }
        Some(result)
    }
}
