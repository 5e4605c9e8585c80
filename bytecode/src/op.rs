use core::fmt;

/// T3 bytecode opcodes.
///
/// Every opcode is one byte. Multi-byte operands follow the opcode in
/// little-endian order. Branch offsets are signed 16-bit values relative to
/// the position of the offset field itself.
///
/// Opcodes that carry an argument count (`argc`) may be preceded by the
/// [`VarArgc`](Op::VarArgc) modifier, in which case the count is popped from
/// the stack instead of being taken from the operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Push `Int(0)`.
    Push0 = 0x01,
    /// Push `Int(1)`.
    Push1 = 0x02,
    /// Push a small integer.
    /// Operands: `value:i8`
    PushInt8 = 0x03,
    /// Push a 32-bit integer.
    /// Operands: `value:i32`
    PushInt = 0x04,
    /// Push a constant string.
    /// Operands: `ofs:u32` (constant pool)
    PushStr = 0x05,
    /// Push a constant list.
    /// Operands: `ofs:u32` (constant pool)
    PushLst = 0x06,
    /// Push an object reference.
    /// Operands: `obj:u32`
    PushObj = 0x07,
    PushNil = 0x08,
    PushTrue = 0x09,
    /// Operands: `prop:u16`
    PushPropId = 0x0A,
    /// Push a function pointer.
    /// Operands: `ofs:u32` (code pool)
    PushFnPtr = 0x0B,
    /// Create a string object from inline bytes and push it.
    /// Operands: `len:u16`, `bytes[len]`
    PushStrI = 0x0C,
    /// Push a list of the arguments after the first `fixed`.
    /// Operands: `fixed:u8`
    PushParLst = 0x0D,
    /// Splat a list onto the stack, updating the argument counter beneath it.
    MakeLstPar = 0x0E,
    /// Operands: `value:u32`
    PushEnum = 0x0F,
    /// Push a builtin function pointer.
    /// Operands: `index:u16`, `set:u16`
    PushBifPtr = 0x10,

    Neg = 0x20,
    BNot = 0x21,
    Add = 0x22,
    Sub = 0x23,
    Mul = 0x24,
    BAnd = 0x25,
    BOr = 0x26,
    Shl = 0x27,
    /// Arithmetic shift right.
    AShr = 0x28,
    Xor = 0x29,
    Div = 0x2A,
    Mod = 0x2B,
    Not = 0x2C,
    Boolize = 0x2D,
    Inc = 0x2E,
    Dec = 0x2F,
    /// Logical shift right.
    LShr = 0x30,

    Eq = 0x40,
    Ne = 0x41,
    Lt = 0x42,
    Le = 0x43,
    Gt = 0x44,
    Ge = 0x45,

    /// Pop the return value into `R0` and return.
    RetVal = 0x50,
    RetNil = 0x51,
    RetTrue = 0x52,
    /// Return leaving `R0` untouched.
    Ret = 0x54,
    /// Call a function.
    /// Operands: `argc:u8`, `ofs:u32` (code pool)
    Call = 0x58,
    /// Call the function pointer popped from the stack.
    /// Operands: `argc:u8`
    PtrCall = 0x59,

    /// Pop an object and evaluate a property of it.
    /// Operands: `prop:u16`
    GetProp = 0x60,
    /// Operands: `argc:u8`, `prop:u16`
    CallProp = 0x61,
    /// Pop a property id, then an object, and call.
    /// Operands: `argc:u8`
    PtrCallProp = 0x62,
    /// Operands: `prop:u16`
    GetPropSelf = 0x63,
    /// Operands: `argc:u8`, `prop:u16`
    CallPropSelf = 0x64,
    /// Operands: `argc:u8`
    PtrCallPropSelf = 0x65,
    /// Operands: `obj:u32`, `prop:u16`
    ObjGetProp = 0x66,
    /// Operands: `argc:u8`, `obj:u32`, `prop:u16`
    ObjCallProp = 0x67,
    /// Like [`GetProp`](Op::GetProp) but refuses to run code.
    /// Operands: `prop:u16`
    GetPropData = 0x68,
    PtrGetPropData = 0x69,
    /// Operands: `lcl:u8`, `prop:u16`
    GetPropLcl1 = 0x6A,
    /// Operands: `argc:u8`, `lcl:u8`, `prop:u16`
    CallPropLcl1 = 0x6B,
    /// Operands: `prop:u16`
    GetPropR0 = 0x6C,
    /// Operands: `argc:u8`, `prop:u16`
    CallPropR0 = 0x6D,

    /// Operands: `argc:u8`, `prop:u16`
    Inherit = 0x72,
    /// Operands: `argc:u8`
    PtrInherit = 0x73,
    /// Inherit from an explicitly named superclass.
    /// Operands: `argc:u8`, `prop:u16`, `obj:u32`
    ExpInherit = 0x74,
    /// Operands: `argc:u8`, `obj:u32`
    PtrExpInherit = 0x75,
    /// Modifier: the next opcode's argc is popped from the stack.
    VarArgc = 0x76,
    /// Operands: `argc:u8`, `prop:u16`
    Delegate = 0x77,
    /// Operands: `argc:u8`
    PtrDelegate = 0x78,
    /// Swap the top two pairs of stack elements.
    Swap2 = 0x7A,
    /// Operands: `a:u8`, `b:u8`
    SwapN = 0x7B,
    GetArgN0 = 0x7C,
    GetArgN1 = 0x7D,
    GetArgN2 = 0x7E,
    GetArgN3 = 0x7F,

    /// Operands: `lcl:u8`
    GetLcl1 = 0x80,
    /// Operands: `lcl:u16`
    GetLcl2 = 0x81,
    /// Operands: `arg:u8`
    GetArg1 = 0x82,
    /// Operands: `arg:u16`
    GetArg2 = 0x83,
    PushSelf = 0x84,
    /// Operands: `lcl:u16`, `level:u16`
    GetDbLcl = 0x85,
    /// Operands: `arg:u16`, `level:u16`
    GetDbArg = 0x86,
    GetArgc = 0x87,
    Dup = 0x88,
    Disc = 0x89,
    /// Operands: `count:u8`
    Disc1 = 0x8A,
    GetR0 = 0x8B,
    /// Operands: `level:u16`
    GetDbArgc = 0x8C,
    Swap = 0x8D,
    /// Operands: `code:u8`
    PushCtxEle = 0x8E,
    Dup2 = 0x8F,

    /// Operands: `count:u16`, `count * (value:dataholder, ofs:i16)`, `default:i16`
    Switch = 0x90,
    /// Operands: `ofs:i16`
    Jmp = 0x91,
    Jt = 0x92,
    Jf = 0x93,
    Je = 0x94,
    Jne = 0x95,
    Jgt = 0x96,
    Jge = 0x97,
    Jlt = 0x98,
    Jle = 0x99,
    /// Jump, keeping the top of stack, if it is true.
    Jst = 0x9A,
    Jsf = 0x9B,
    /// Local subroutine call. Pushes the method-relative return offset.
    /// Operands: `ofs:i16`
    Ljsr = 0x9C,
    /// Return from a local subroutine through a local holding the offset.
    /// Operands: `lcl:u16`
    Lret = 0x9D,
    Jnil = 0x9E,
    JNotNil = 0x9F,
    JR0T = 0xA0,
    JR0F = 0xA1,
    /// Operands: `lcl:u8`
    GetSetLcl1R0 = 0xA3,
    /// Operands: `lcl:u8`
    GetSetLcl1 = 0xA4,
    DupR0 = 0xA5,
    /// Operands: `idx:u8`
    GetSpN = 0xA6,
    GetLclN0 = 0xAA,
    GetLclN1 = 0xAB,
    GetLclN2 = 0xAC,
    GetLclN3 = 0xAD,
    GetLclN4 = 0xAE,
    GetLclN5 = 0xAF,

    /// Display a self-printing string.
    /// Operands: `ofs:u32` (constant pool)
    Say = 0xB0,
    /// Operands: `argc:u8`, `index:u8` (set 0)
    BuiltinA = 0xB1,
    /// Operands: `argc:u8`, `index:u8` (set 1)
    BuiltinB = 0xB2,
    /// Operands: `argc:u8`, `index:u8` (set 2)
    BuiltinC = 0xB3,
    /// Operands: `argc:u8`, `index:u8` (set 3)
    BuiltinD = 0xB4,
    /// Operands: `argc:u8`, `index:u8`, `set:u8`
    Builtin1 = 0xB5,
    /// Operands: `argc:u8`, `index:u16`, `set:u8`
    Builtin2 = 0xB6,
    /// Operands: `argc:u8`, `index:u32`
    CallExt = 0xB7,
    Throw = 0xB8,
    SayVal = 0xB9,
    Index = 0xBA,
    /// Operands: `lcl:u8`, `index:u8`
    IdxLcl1Int8 = 0xBB,
    /// Operands: `index:u8`
    IdxInt8 = 0xBC,

    /// Operands: `argc:u8`, `meta:u8`
    New1 = 0xC0,
    /// Operands: `argc:u16`, `meta:u16`
    New2 = 0xC1,
    /// Operands: `argc:u8`, `meta:u8`
    TrNew1 = 0xC2,
    /// Operands: `argc:u16`, `meta:u16`
    TrNew2 = 0xC3,

    /// Operands: `lcl:u16`
    IncLcl = 0xD0,
    /// Operands: `lcl:u16`
    DecLcl = 0xD1,
    /// Operands: `lcl:u8`, `value:i8`
    AddILcl1 = 0xD2,
    /// Operands: `lcl:u16`, `value:i32`
    AddILcl4 = 0xD3,
    /// Operands: `lcl:u16`
    AddToLcl = 0xD4,
    /// Operands: `lcl:u16`
    SubFromLcl = 0xD5,
    /// Operands: `lcl:u8`
    ZeroLcl1 = 0xD6,
    /// Operands: `lcl:u16`
    ZeroLcl2 = 0xD7,
    NilLcl1 = 0xD8,
    NilLcl2 = 0xD9,
    OneLcl1 = 0xDA,
    OneLcl2 = 0xDB,

    /// Operands: `lcl:u8`
    SetLcl1 = 0xE0,
    /// Operands: `lcl:u16`
    SetLcl2 = 0xE1,
    /// Operands: `arg:u8`
    SetArg1 = 0xE2,
    /// Operands: `arg:u16`
    SetArg2 = 0xE3,
    /// Pops index, container and value; pushes the updated container.
    SetInd = 0xE4,
    /// Pops an object, then the value to store.
    /// Operands: `prop:u16`
    SetProp = 0xE5,
    PtrSetProp = 0xE6,
    /// Operands: `prop:u16`
    SetPropSelf = 0xE7,
    /// Operands: `obj:u32`, `prop:u16`
    ObjSetProp = 0xE8,
    /// Operands: `lcl:u16`, `level:u16`
    SetDbLcl = 0xE9,
    /// Operands: `arg:u16`, `level:u16`
    SetDbArg = 0xEA,
    SetSelf = 0xEB,
    LoadCtx = 0xEC,
    StoreCtx = 0xED,
    /// Operands: `lcl:u8`
    SetLcl1R0 = 0xEE,
    /// Operands: `lcl:u8`, `index:u8`
    SetIndLcl1I8 = 0xEF,

    Bp = 0xF1,
    Nop = 0xF2,
}

impl Op {
    /// Whether the opcode carries an argument count that [`Op::VarArgc`]
    /// may override.
    pub fn has_argc(self) -> bool {
        matches!(
            self,
            Op::Call
                | Op::PtrCall
                | Op::CallProp
                | Op::PtrCallProp
                | Op::CallPropSelf
                | Op::PtrCallPropSelf
                | Op::ObjCallProp
                | Op::CallPropLcl1
                | Op::CallPropR0
                | Op::Inherit
                | Op::PtrInherit
                | Op::ExpInherit
                | Op::PtrExpInherit
                | Op::Delegate
                | Op::PtrDelegate
                | Op::BuiltinA
                | Op::BuiltinB
                | Op::BuiltinC
                | Op::BuiltinD
                | Op::Builtin1
                | Op::Builtin2
                | Op::New1
                | Op::New2
                | Op::TrNew1
                | Op::TrNew2
        )
    }

    /// Net effect on the stack depth for opcodes whose effect does not
    /// depend on operands or run-time state.
    pub fn stack_effect(self) -> Option<i32> {
        let effect = match self {
            Op::Push0
            | Op::Push1
            | Op::PushInt8
            | Op::PushInt
            | Op::PushStr
            | Op::PushLst
            | Op::PushObj
            | Op::PushNil
            | Op::PushTrue
            | Op::PushPropId
            | Op::PushFnPtr
            | Op::PushStrI
            | Op::PushParLst
            | Op::PushEnum
            | Op::PushBifPtr
            | Op::GetArgN0
            | Op::GetArgN1
            | Op::GetArgN2
            | Op::GetArgN3
            | Op::GetLcl1
            | Op::GetLcl2
            | Op::GetArg1
            | Op::GetArg2
            | Op::PushSelf
            | Op::GetDbLcl
            | Op::GetDbArg
            | Op::GetArgc
            | Op::Dup
            | Op::GetR0
            | Op::GetDbArgc
            | Op::PushCtxEle
            | Op::GetSetLcl1R0
            | Op::GetSpN
            | Op::GetLclN0
            | Op::GetLclN1
            | Op::GetLclN2
            | Op::GetLclN3
            | Op::GetLclN4
            | Op::GetLclN5
            | Op::IdxLcl1Int8
            | Op::StoreCtx
            | Op::Ljsr => 1,
            Op::Dup2 | Op::DupR0 => 2,
            Op::Neg
            | Op::BNot
            | Op::Not
            | Op::Boolize
            | Op::Inc
            | Op::Dec
            | Op::Swap
            | Op::Swap2
            | Op::SwapN
            | Op::IdxInt8
            | Op::Nop
            | Op::Bp
            | Op::Jmp
            | Op::Lret
            | Op::JR0T
            | Op::JR0F
            | Op::GetSetLcl1
            | Op::IncLcl
            | Op::DecLcl
            | Op::AddILcl1
            | Op::AddILcl4
            | Op::ZeroLcl1
            | Op::ZeroLcl2
            | Op::NilLcl1
            | Op::NilLcl2
            | Op::OneLcl1
            | Op::OneLcl2
            | Op::SetLcl1R0 => 0,
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::BAnd
            | Op::BOr
            | Op::Shl
            | Op::AShr
            | Op::LShr
            | Op::Xor
            | Op::Div
            | Op::Mod
            | Op::Eq
            | Op::Ne
            | Op::Lt
            | Op::Le
            | Op::Gt
            | Op::Ge
            | Op::Index
            | Op::Disc
            | Op::Jt
            | Op::Jf
            | Op::Jnil
            | Op::JNotNil
            | Op::AddToLcl
            | Op::SubFromLcl
            | Op::SetLcl1
            | Op::SetLcl2
            | Op::SetArg1
            | Op::SetArg2
            | Op::SetPropSelf
            | Op::ObjSetProp
            | Op::SetDbLcl
            | Op::SetDbArg
            | Op::SetSelf
            | Op::LoadCtx
            | Op::SetIndLcl1I8
            | Op::Switch => -1,
            Op::SetProp
            | Op::SetInd
            | Op::Je
            | Op::Jne
            | Op::Jgt
            | Op::Jge
            | Op::Jlt
            | Op::Jle => -2,
            Op::PtrSetProp => -3,
            _ => return None,
        };
        Some(effect)
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Push0 => "PUSH_0",
            Op::Push1 => "PUSH_1",
            Op::PushInt8 => "PUSHINT8",
            Op::PushInt => "PUSHINT",
            Op::PushStr => "PUSHSTR",
            Op::PushLst => "PUSHLST",
            Op::PushObj => "PUSHOBJ",
            Op::PushNil => "PUSHNIL",
            Op::PushTrue => "PUSHTRUE",
            Op::PushPropId => "PUSHPROPID",
            Op::PushFnPtr => "PUSHFNPTR",
            Op::PushStrI => "PUSHSTRI",
            Op::PushParLst => "PUSHPARLST",
            Op::MakeLstPar => "MAKELSTPAR",
            Op::PushEnum => "PUSHENUM",
            Op::PushBifPtr => "PUSHBIFPTR",
            Op::Neg => "NEG",
            Op::BNot => "BNOT",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::BAnd => "BAND",
            Op::BOr => "BOR",
            Op::Shl => "SHL",
            Op::AShr => "ASHR",
            Op::Xor => "XOR",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Not => "NOT",
            Op::Boolize => "BOOLIZE",
            Op::Inc => "INC",
            Op::Dec => "DEC",
            Op::LShr => "LSHR",
            Op::Eq => "EQ",
            Op::Ne => "NE",
            Op::Lt => "LT",
            Op::Le => "LE",
            Op::Gt => "GT",
            Op::Ge => "GE",
            Op::RetVal => "RETVAL",
            Op::RetNil => "RETNIL",
            Op::RetTrue => "RETTRUE",
            Op::Ret => "RET",
            Op::Call => "CALL",
            Op::PtrCall => "PTRCALL",
            Op::GetProp => "GETPROP",
            Op::CallProp => "CALLPROP",
            Op::PtrCallProp => "PTRCALLPROP",
            Op::GetPropSelf => "GETPROPSELF",
            Op::CallPropSelf => "CALLPROPSELF",
            Op::PtrCallPropSelf => "PTRCALLPROPSELF",
            Op::ObjGetProp => "OBJGETPROP",
            Op::ObjCallProp => "OBJCALLPROP",
            Op::GetPropData => "GETPROPDATA",
            Op::PtrGetPropData => "PTRGETPROPDATA",
            Op::GetPropLcl1 => "GETPROPLCL1",
            Op::CallPropLcl1 => "CALLPROPLCL1",
            Op::GetPropR0 => "GETPROPR0",
            Op::CallPropR0 => "CALLPROPR0",
            Op::Inherit => "INHERIT",
            Op::PtrInherit => "PTRINHERIT",
            Op::ExpInherit => "EXPINHERIT",
            Op::PtrExpInherit => "PTREXPINHERIT",
            Op::VarArgc => "VARARGC",
            Op::Delegate => "DELEGATE",
            Op::PtrDelegate => "PTRDELEGATE",
            Op::Swap2 => "SWAP2",
            Op::SwapN => "SWAPN",
            Op::GetArgN0 => "GETARGN0",
            Op::GetArgN1 => "GETARGN1",
            Op::GetArgN2 => "GETARGN2",
            Op::GetArgN3 => "GETARGN3",
            Op::GetLcl1 => "GETLCL1",
            Op::GetLcl2 => "GETLCL2",
            Op::GetArg1 => "GETARG1",
            Op::GetArg2 => "GETARG2",
            Op::PushSelf => "PUSHSELF",
            Op::GetDbLcl => "GETDBLCL",
            Op::GetDbArg => "GETDBARG",
            Op::GetArgc => "GETARGC",
            Op::Dup => "DUP",
            Op::Disc => "DISC",
            Op::Disc1 => "DISC1",
            Op::GetR0 => "GETR0",
            Op::GetDbArgc => "GETDBARGC",
            Op::Swap => "SWAP",
            Op::PushCtxEle => "PUSHCTXELE",
            Op::Dup2 => "DUP2",
            Op::Switch => "SWITCH",
            Op::Jmp => "JMP",
            Op::Jt => "JT",
            Op::Jf => "JF",
            Op::Je => "JE",
            Op::Jne => "JNE",
            Op::Jgt => "JGT",
            Op::Jge => "JGE",
            Op::Jlt => "JLT",
            Op::Jle => "JLE",
            Op::Jst => "JST",
            Op::Jsf => "JSF",
            Op::Ljsr => "LJSR",
            Op::Lret => "LRET",
            Op::Jnil => "JNIL",
            Op::JNotNil => "JNOTNIL",
            Op::JR0T => "JR0T",
            Op::JR0F => "JR0F",
            Op::GetSetLcl1R0 => "GETSETLCL1R0",
            Op::GetSetLcl1 => "GETSETLCL1",
            Op::DupR0 => "DUPR0",
            Op::GetSpN => "GETSPN",
            Op::GetLclN0 => "GETLCLN0",
            Op::GetLclN1 => "GETLCLN1",
            Op::GetLclN2 => "GETLCLN2",
            Op::GetLclN3 => "GETLCLN3",
            Op::GetLclN4 => "GETLCLN4",
            Op::GetLclN5 => "GETLCLN5",
            Op::Say => "SAY",
            Op::BuiltinA => "BUILTIN_A",
            Op::BuiltinB => "BUILTIN_B",
            Op::BuiltinC => "BUILTIN_C",
            Op::BuiltinD => "BUILTIN_D",
            Op::Builtin1 => "BUILTIN1",
            Op::Builtin2 => "BUILTIN2",
            Op::CallExt => "CALLEXT",
            Op::Throw => "THROW",
            Op::SayVal => "SAYVAL",
            Op::Index => "INDEX",
            Op::IdxLcl1Int8 => "IDXLCL1INT8",
            Op::IdxInt8 => "IDXINT8",
            Op::New1 => "NEW1",
            Op::New2 => "NEW2",
            Op::TrNew1 => "TRNEW1",
            Op::TrNew2 => "TRNEW2",
            Op::IncLcl => "INCLCL",
            Op::DecLcl => "DECLCL",
            Op::AddILcl1 => "ADDILCL1",
            Op::AddILcl4 => "ADDILCL4",
            Op::AddToLcl => "ADDTOLCL",
            Op::SubFromLcl => "SUBFROMLCL",
            Op::ZeroLcl1 => "ZEROLCL1",
            Op::ZeroLcl2 => "ZEROLCL2",
            Op::NilLcl1 => "NILLCL1",
            Op::NilLcl2 => "NILLCL2",
            Op::OneLcl1 => "ONELCL1",
            Op::OneLcl2 => "ONELCL2",
            Op::SetLcl1 => "SETLCL1",
            Op::SetLcl2 => "SETLCL2",
            Op::SetArg1 => "SETARG1",
            Op::SetArg2 => "SETARG2",
            Op::SetInd => "SETIND",
            Op::SetProp => "SETPROP",
            Op::PtrSetProp => "PTRSETPROP",
            Op::SetPropSelf => "SETPROPSELF",
            Op::ObjSetProp => "OBJSETPROP",
            Op::SetDbLcl => "SETDBLCL",
            Op::SetDbArg => "SETDBARG",
            Op::SetSelf => "SETSELF",
            Op::LoadCtx => "LOADCTX",
            Op::StoreCtx => "STORECTX",
            Op::SetLcl1R0 => "SETLCL1R0",
            Op::SetIndLcl1I8 => "SETINDLCL1I8",
            Op::Bp => "BP",
            Op::Nop => "NOP",
        }
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let op = match byte {
            0x01 => Op::Push0,
            0x02 => Op::Push1,
            0x03 => Op::PushInt8,
            0x04 => Op::PushInt,
            0x05 => Op::PushStr,
            0x06 => Op::PushLst,
            0x07 => Op::PushObj,
            0x08 => Op::PushNil,
            0x09 => Op::PushTrue,
            0x0A => Op::PushPropId,
            0x0B => Op::PushFnPtr,
            0x0C => Op::PushStrI,
            0x0D => Op::PushParLst,
            0x0E => Op::MakeLstPar,
            0x0F => Op::PushEnum,
            0x10 => Op::PushBifPtr,
            0x20 => Op::Neg,
            0x21 => Op::BNot,
            0x22 => Op::Add,
            0x23 => Op::Sub,
            0x24 => Op::Mul,
            0x25 => Op::BAnd,
            0x26 => Op::BOr,
            0x27 => Op::Shl,
            0x28 => Op::AShr,
            0x29 => Op::Xor,
            0x2A => Op::Div,
            0x2B => Op::Mod,
            0x2C => Op::Not,
            0x2D => Op::Boolize,
            0x2E => Op::Inc,
            0x2F => Op::Dec,
            0x30 => Op::LShr,
            0x40 => Op::Eq,
            0x41 => Op::Ne,
            0x42 => Op::Lt,
            0x43 => Op::Le,
            0x44 => Op::Gt,
            0x45 => Op::Ge,
            0x50 => Op::RetVal,
            0x51 => Op::RetNil,
            0x52 => Op::RetTrue,
            0x54 => Op::Ret,
            0x58 => Op::Call,
            0x59 => Op::PtrCall,
            0x60 => Op::GetProp,
            0x61 => Op::CallProp,
            0x62 => Op::PtrCallProp,
            0x63 => Op::GetPropSelf,
            0x64 => Op::CallPropSelf,
            0x65 => Op::PtrCallPropSelf,
            0x66 => Op::ObjGetProp,
            0x67 => Op::ObjCallProp,
            0x68 => Op::GetPropData,
            0x69 => Op::PtrGetPropData,
            0x6A => Op::GetPropLcl1,
            0x6B => Op::CallPropLcl1,
            0x6C => Op::GetPropR0,
            0x6D => Op::CallPropR0,
            0x72 => Op::Inherit,
            0x73 => Op::PtrInherit,
            0x74 => Op::ExpInherit,
            0x75 => Op::PtrExpInherit,
            0x76 => Op::VarArgc,
            0x77 => Op::Delegate,
            0x78 => Op::PtrDelegate,
            0x7A => Op::Swap2,
            0x7B => Op::SwapN,
            0x7C => Op::GetArgN0,
            0x7D => Op::GetArgN1,
            0x7E => Op::GetArgN2,
            0x7F => Op::GetArgN3,
            0x80 => Op::GetLcl1,
            0x81 => Op::GetLcl2,
            0x82 => Op::GetArg1,
            0x83 => Op::GetArg2,
            0x84 => Op::PushSelf,
            0x85 => Op::GetDbLcl,
            0x86 => Op::GetDbArg,
            0x87 => Op::GetArgc,
            0x88 => Op::Dup,
            0x89 => Op::Disc,
            0x8A => Op::Disc1,
            0x8B => Op::GetR0,
            0x8C => Op::GetDbArgc,
            0x8D => Op::Swap,
            0x8E => Op::PushCtxEle,
            0x8F => Op::Dup2,
            0x90 => Op::Switch,
            0x91 => Op::Jmp,
            0x92 => Op::Jt,
            0x93 => Op::Jf,
            0x94 => Op::Je,
            0x95 => Op::Jne,
            0x96 => Op::Jgt,
            0x97 => Op::Jge,
            0x98 => Op::Jlt,
            0x99 => Op::Jle,
            0x9A => Op::Jst,
            0x9B => Op::Jsf,
            0x9C => Op::Ljsr,
            0x9D => Op::Lret,
            0x9E => Op::Jnil,
            0x9F => Op::JNotNil,
            0xA0 => Op::JR0T,
            0xA1 => Op::JR0F,
            0xA3 => Op::GetSetLcl1R0,
            0xA4 => Op::GetSetLcl1,
            0xA5 => Op::DupR0,
            0xA6 => Op::GetSpN,
            0xAA => Op::GetLclN0,
            0xAB => Op::GetLclN1,
            0xAC => Op::GetLclN2,
            0xAD => Op::GetLclN3,
            0xAE => Op::GetLclN4,
            0xAF => Op::GetLclN5,
            0xB0 => Op::Say,
            0xB1 => Op::BuiltinA,
            0xB2 => Op::BuiltinB,
            0xB3 => Op::BuiltinC,
            0xB4 => Op::BuiltinD,
            0xB5 => Op::Builtin1,
            0xB6 => Op::Builtin2,
            0xB7 => Op::CallExt,
            0xB8 => Op::Throw,
            0xB9 => Op::SayVal,
            0xBA => Op::Index,
            0xBB => Op::IdxLcl1Int8,
            0xBC => Op::IdxInt8,
            0xC0 => Op::New1,
            0xC1 => Op::New2,
            0xC2 => Op::TrNew1,
            0xC3 => Op::TrNew2,
            0xD0 => Op::IncLcl,
            0xD1 => Op::DecLcl,
            0xD2 => Op::AddILcl1,
            0xD3 => Op::AddILcl4,
            0xD4 => Op::AddToLcl,
            0xD5 => Op::SubFromLcl,
            0xD6 => Op::ZeroLcl1,
            0xD7 => Op::ZeroLcl2,
            0xD8 => Op::NilLcl1,
            0xD9 => Op::NilLcl2,
            0xDA => Op::OneLcl1,
            0xDB => Op::OneLcl2,
            0xE0 => Op::SetLcl1,
            0xE1 => Op::SetLcl2,
            0xE2 => Op::SetArg1,
            0xE3 => Op::SetArg2,
            0xE4 => Op::SetInd,
            0xE5 => Op::SetProp,
            0xE6 => Op::PtrSetProp,
            0xE7 => Op::SetPropSelf,
            0xE8 => Op::ObjSetProp,
            0xE9 => Op::SetDbLcl,
            0xEA => Op::SetDbArg,
            0xEB => Op::SetSelf,
            0xEC => Op::LoadCtx,
            0xED => Op::StoreCtx,
            0xEE => Op::SetLcl1R0,
            0xEF => Op::SetIndLcl1I8,
            0xF1 => Op::Bp,
            0xF2 => Op::Nop,
            other => return Err(other),
        };
        Ok(op)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
