use core::fmt;

/// A decoded instruction with all operands resolved to their widest types.
///
/// Short and long encodings of the same operation decode to one variant:
/// `GETLCL1`, `GETLCL2` and `GETLCLN0`..`GETLCLN5` all become
/// [`GetLcl`](Instruction::GetLcl), the four `PUSH_*`/`PUSHINT*` forms become
/// [`PushInt`](Instruction::PushInt), and so on. Branch targets are absolute
/// byte positions within the decoded slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    PushInt { value: i32 },
    PushStr { ofs: u32 },
    PushLst { ofs: u32 },
    PushObj { obj: u32 },
    PushNil,
    PushTrue,
    PushPropId { prop: u16 },
    PushFnPtr { ofs: u32 },
    /// Inline string bytes start at `start` and run for `len` bytes.
    PushStrI { start: u32, len: u16 },
    PushParLst { fixed: u8 },
    MakeLstPar,
    PushEnum { value: u32 },
    PushBifPtr { set: u16, index: u16 },

    Neg,
    BNot,
    Add,
    Sub,
    Mul,
    BAnd,
    BOr,
    Shl,
    AShr,
    Xor,
    Div,
    Mod,
    Not,
    Boolize,
    Inc,
    Dec,
    LShr,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    RetVal,
    RetNil,
    RetTrue,
    Ret,
    Call { argc: u16, ofs: u32 },
    PtrCall { argc: u16 },

    GetProp { prop: u16 },
    CallProp { argc: u16, prop: u16 },
    PtrCallProp { argc: u16 },
    GetPropSelf { prop: u16 },
    CallPropSelf { argc: u16, prop: u16 },
    PtrCallPropSelf { argc: u16 },
    ObjGetProp { obj: u32, prop: u16 },
    ObjCallProp { argc: u16, obj: u32, prop: u16 },
    GetPropData { prop: u16 },
    PtrGetPropData,
    GetPropLcl1 { lcl: u16, prop: u16 },
    CallPropLcl1 { argc: u16, lcl: u16, prop: u16 },
    GetPropR0 { prop: u16 },
    CallPropR0 { argc: u16, prop: u16 },

    Inherit { argc: u16, prop: u16 },
    PtrInherit { argc: u16 },
    ExpInherit { argc: u16, prop: u16, obj: u32 },
    PtrExpInherit { argc: u16, obj: u32 },
    VarArgc,
    Delegate { argc: u16, prop: u16 },
    PtrDelegate { argc: u16 },

    Swap2,
    SwapN { a: u8, b: u8 },
    GetLcl { lcl: u16 },
    GetArg { arg: u16 },
    PushSelf,
    GetDbLcl { lcl: u16, level: u16 },
    GetDbArg { arg: u16, level: u16 },
    GetArgc,
    Dup,
    Disc { count: u8 },
    GetR0,
    GetDbArgc { level: u16 },
    Swap,
    PushCtxEle { code: u8 },
    Dup2,

    /// `count` cases of `(dataholder, offset)` start at `table`.
    Switch { count: u16, table: u32, default: u32 },
    Jmp { target: u32 },
    Jt { target: u32 },
    Jf { target: u32 },
    Je { target: u32 },
    Jne { target: u32 },
    Jgt { target: u32 },
    Jge { target: u32 },
    Jlt { target: u32 },
    Jle { target: u32 },
    Jst { target: u32 },
    Jsf { target: u32 },
    Ljsr { target: u32 },
    Lret { lcl: u16 },
    Jnil { target: u32 },
    JNotNil { target: u32 },
    JR0T { target: u32 },
    JR0F { target: u32 },
    GetSetLcl1R0 { lcl: u16 },
    GetSetLcl1 { lcl: u16 },
    DupR0,
    GetSpN { idx: u8 },

    Say { ofs: u32 },
    Builtin { argc: u16, set: u16, index: u16 },
    CallExt { argc: u16, index: u32 },
    Throw,
    SayVal,
    Index,
    IdxLcl1Int8 { lcl: u16, index: u8 },
    IdxInt8 { index: u8 },

    New { argc: u16, meta: u16, transient: bool },

    IncLcl { lcl: u16 },
    DecLcl { lcl: u16 },
    AddILcl { lcl: u16, value: i32 },
    AddToLcl { lcl: u16 },
    SubFromLcl { lcl: u16 },
    ZeroLcl { lcl: u16 },
    NilLcl { lcl: u16 },
    OneLcl { lcl: u16 },

    SetLcl { lcl: u16 },
    SetArg { arg: u16 },
    SetInd,
    SetProp { prop: u16 },
    PtrSetProp,
    SetPropSelf { prop: u16 },
    ObjSetProp { obj: u32, prop: u16 },
    SetDbLcl { lcl: u16, level: u16 },
    SetDbArg { arg: u16, level: u16 },
    SetSelf,
    LoadCtx,
    StoreCtx,
    SetLcl1R0 { lcl: u16 },
    SetIndLcl1I8 { lcl: u16, index: u8 },

    Bp,
    Nop,
}

impl Instruction {
    /// The argument count operand, for instructions that carry one.
    pub fn argc(&self) -> Option<u16> {
        match *self {
            Self::Call { argc, .. }
            | Self::PtrCall { argc }
            | Self::CallProp { argc, .. }
            | Self::PtrCallProp { argc }
            | Self::CallPropSelf { argc, .. }
            | Self::PtrCallPropSelf { argc }
            | Self::ObjCallProp { argc, .. }
            | Self::CallPropLcl1 { argc, .. }
            | Self::CallPropR0 { argc, .. }
            | Self::Inherit { argc, .. }
            | Self::PtrInherit { argc }
            | Self::ExpInherit { argc, .. }
            | Self::PtrExpInherit { argc, .. }
            | Self::Delegate { argc, .. }
            | Self::PtrDelegate { argc }
            | Self::Builtin { argc, .. }
            | Self::New { argc, .. } => Some(argc),
            _ => None,
        }
    }

    /// Replace the argument count, as the `VARARGC` modifier does.
    ///
    /// Returns `None` for instructions without an argc operand.
    pub fn with_argc(mut self, new_argc: u16) -> Option<Self> {
        match &mut self {
            Self::Call { argc, .. }
            | Self::PtrCall { argc }
            | Self::CallProp { argc, .. }
            | Self::PtrCallProp { argc }
            | Self::CallPropSelf { argc, .. }
            | Self::PtrCallPropSelf { argc }
            | Self::ObjCallProp { argc, .. }
            | Self::CallPropLcl1 { argc, .. }
            | Self::CallPropR0 { argc, .. }
            | Self::Inherit { argc, .. }
            | Self::PtrInherit { argc }
            | Self::ExpInherit { argc, .. }
            | Self::PtrExpInherit { argc, .. }
            | Self::Delegate { argc, .. }
            | Self::PtrDelegate { argc }
            | Self::Builtin { argc, .. }
            | Self::New { argc, .. } => *argc = new_argc,
            _ => return None,
        }
        Some(self)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PushInt { value } => write!(f, "PUSHINT {value}"),
            Self::PushStr { ofs } => write!(f, "PUSHSTR @{ofs:#x}"),
            Self::PushLst { ofs } => write!(f, "PUSHLST @{ofs:#x}"),
            Self::PushObj { obj } => write!(f, "PUSHOBJ #{obj}"),
            Self::PushNil => f.write_str("PUSHNIL"),
            Self::PushTrue => f.write_str("PUSHTRUE"),
            Self::PushPropId { prop } => write!(f, "PUSHPROPID &{prop}"),
            Self::PushFnPtr { ofs } => write!(f, "PUSHFNPTR @{ofs:#x}"),
            Self::PushStrI { len, .. } => write!(f, "PUSHSTRI [{len} bytes]"),
            Self::PushParLst { fixed } => write!(f, "PUSHPARLST {fixed}"),
            Self::MakeLstPar => f.write_str("MAKELSTPAR"),
            Self::PushEnum { value } => write!(f, "PUSHENUM {value}"),
            Self::PushBifPtr { set, index } => write!(f, "PUSHBIFPTR {set}:{index}"),
            Self::Neg => f.write_str("NEG"),
            Self::BNot => f.write_str("BNOT"),
            Self::Add => f.write_str("ADD"),
            Self::Sub => f.write_str("SUB"),
            Self::Mul => f.write_str("MUL"),
            Self::BAnd => f.write_str("BAND"),
            Self::BOr => f.write_str("BOR"),
            Self::Shl => f.write_str("SHL"),
            Self::AShr => f.write_str("ASHR"),
            Self::Xor => f.write_str("XOR"),
            Self::Div => f.write_str("DIV"),
            Self::Mod => f.write_str("MOD"),
            Self::Not => f.write_str("NOT"),
            Self::Boolize => f.write_str("BOOLIZE"),
            Self::Inc => f.write_str("INC"),
            Self::Dec => f.write_str("DEC"),
            Self::LShr => f.write_str("LSHR"),
            Self::Eq => f.write_str("EQ"),
            Self::Ne => f.write_str("NE"),
            Self::Lt => f.write_str("LT"),
            Self::Le => f.write_str("LE"),
            Self::Gt => f.write_str("GT"),
            Self::Ge => f.write_str("GE"),
            Self::RetVal => f.write_str("RETVAL"),
            Self::RetNil => f.write_str("RETNIL"),
            Self::RetTrue => f.write_str("RETTRUE"),
            Self::Ret => f.write_str("RET"),
            Self::Call { argc, ofs } => write!(f, "CALL ({argc}) @{ofs:#x}"),
            Self::PtrCall { argc } => write!(f, "PTRCALL ({argc})"),
            Self::GetProp { prop } => write!(f, "GETPROP &{prop}"),
            Self::CallProp { argc, prop } => write!(f, "CALLPROP ({argc}) &{prop}"),
            Self::PtrCallProp { argc } => write!(f, "PTRCALLPROP ({argc})"),
            Self::GetPropSelf { prop } => write!(f, "GETPROPSELF &{prop}"),
            Self::CallPropSelf { argc, prop } => write!(f, "CALLPROPSELF ({argc}) &{prop}"),
            Self::PtrCallPropSelf { argc } => write!(f, "PTRCALLPROPSELF ({argc})"),
            Self::ObjGetProp { obj, prop } => write!(f, "OBJGETPROP #{obj} &{prop}"),
            Self::ObjCallProp { argc, obj, prop } => {
                write!(f, "OBJCALLPROP ({argc}) #{obj} &{prop}")
            }
            Self::GetPropData { prop } => write!(f, "GETPROPDATA &{prop}"),
            Self::PtrGetPropData => f.write_str("PTRGETPROPDATA"),
            Self::GetPropLcl1 { lcl, prop } => write!(f, "GETPROPLCL1 l{lcl} &{prop}"),
            Self::CallPropLcl1 { argc, lcl, prop } => {
                write!(f, "CALLPROPLCL1 ({argc}) l{lcl} &{prop}")
            }
            Self::GetPropR0 { prop } => write!(f, "GETPROPR0 &{prop}"),
            Self::CallPropR0 { argc, prop } => write!(f, "CALLPROPR0 ({argc}) &{prop}"),
            Self::Inherit { argc, prop } => write!(f, "INHERIT ({argc}) &{prop}"),
            Self::PtrInherit { argc } => write!(f, "PTRINHERIT ({argc})"),
            Self::ExpInherit { argc, prop, obj } => {
                write!(f, "EXPINHERIT ({argc}) &{prop} #{obj}")
            }
            Self::PtrExpInherit { argc, obj } => write!(f, "PTREXPINHERIT ({argc}) #{obj}"),
            Self::VarArgc => f.write_str("VARARGC"),
            Self::Delegate { argc, prop } => write!(f, "DELEGATE ({argc}) &{prop}"),
            Self::PtrDelegate { argc } => write!(f, "PTRDELEGATE ({argc})"),
            Self::Swap2 => f.write_str("SWAP2"),
            Self::SwapN { a, b } => write!(f, "SWAPN {a} {b}"),
            Self::GetLcl { lcl } => write!(f, "GETLCL l{lcl}"),
            Self::GetArg { arg } => write!(f, "GETARG a{arg}"),
            Self::PushSelf => f.write_str("PUSHSELF"),
            Self::GetDbLcl { lcl, level } => write!(f, "GETDBLCL l{lcl} ^{level}"),
            Self::GetDbArg { arg, level } => write!(f, "GETDBARG a{arg} ^{level}"),
            Self::GetArgc => f.write_str("GETARGC"),
            Self::Dup => f.write_str("DUP"),
            Self::Disc { count } => write!(f, "DISC {count}"),
            Self::GetR0 => f.write_str("GETR0"),
            Self::GetDbArgc { level } => write!(f, "GETDBARGC ^{level}"),
            Self::Swap => f.write_str("SWAP"),
            Self::PushCtxEle { code } => write!(f, "PUSHCTXELE {code}"),
            Self::Dup2 => f.write_str("DUP2"),
            Self::Switch { count, default, .. } => {
                write!(f, "SWITCH [{count} cases] default ->{default:#x}")
            }
            Self::Jmp { target } => write!(f, "JMP ->{target:#x}"),
            Self::Jt { target } => write!(f, "JT ->{target:#x}"),
            Self::Jf { target } => write!(f, "JF ->{target:#x}"),
            Self::Je { target } => write!(f, "JE ->{target:#x}"),
            Self::Jne { target } => write!(f, "JNE ->{target:#x}"),
            Self::Jgt { target } => write!(f, "JGT ->{target:#x}"),
            Self::Jge { target } => write!(f, "JGE ->{target:#x}"),
            Self::Jlt { target } => write!(f, "JLT ->{target:#x}"),
            Self::Jle { target } => write!(f, "JLE ->{target:#x}"),
            Self::Jst { target } => write!(f, "JST ->{target:#x}"),
            Self::Jsf { target } => write!(f, "JSF ->{target:#x}"),
            Self::Ljsr { target } => write!(f, "LJSR ->{target:#x}"),
            Self::Lret { lcl } => write!(f, "LRET l{lcl}"),
            Self::Jnil { target } => write!(f, "JNIL ->{target:#x}"),
            Self::JNotNil { target } => write!(f, "JNOTNIL ->{target:#x}"),
            Self::JR0T { target } => write!(f, "JR0T ->{target:#x}"),
            Self::JR0F { target } => write!(f, "JR0F ->{target:#x}"),
            Self::GetSetLcl1R0 { lcl } => write!(f, "GETSETLCL1R0 l{lcl}"),
            Self::GetSetLcl1 { lcl } => write!(f, "GETSETLCL1 l{lcl}"),
            Self::DupR0 => f.write_str("DUPR0"),
            Self::GetSpN { idx } => write!(f, "GETSPN {idx}"),
            Self::Say { ofs } => write!(f, "SAY @{ofs:#x}"),
            Self::Builtin { argc, set, index } => write!(f, "BUILTIN ({argc}) {set}:{index}"),
            Self::CallExt { argc, index } => write!(f, "CALLEXT ({argc}) {index}"),
            Self::Throw => f.write_str("THROW"),
            Self::SayVal => f.write_str("SAYVAL"),
            Self::Index => f.write_str("INDEX"),
            Self::IdxLcl1Int8 { lcl, index } => write!(f, "IDXLCL1INT8 l{lcl}[{index}]"),
            Self::IdxInt8 { index } => write!(f, "IDXINT8 [{index}]"),
            Self::New { argc, meta, transient } => {
                let name = if transient { "TRNEW" } else { "NEW" };
                write!(f, "{name} ({argc}) meta{meta}")
            }
            Self::IncLcl { lcl } => write!(f, "INCLCL l{lcl}"),
            Self::DecLcl { lcl } => write!(f, "DECLCL l{lcl}"),
            Self::AddILcl { lcl, value } => write!(f, "ADDILCL l{lcl} {value:+}"),
            Self::AddToLcl { lcl } => write!(f, "ADDTOLCL l{lcl}"),
            Self::SubFromLcl { lcl } => write!(f, "SUBFROMLCL l{lcl}"),
            Self::ZeroLcl { lcl } => write!(f, "ZEROLCL l{lcl}"),
            Self::NilLcl { lcl } => write!(f, "NILLCL l{lcl}"),
            Self::OneLcl { lcl } => write!(f, "ONELCL l{lcl}"),
            Self::SetLcl { lcl } => write!(f, "SETLCL l{lcl}"),
            Self::SetArg { arg } => write!(f, "SETARG a{arg}"),
            Self::SetInd => f.write_str("SETIND"),
            Self::SetProp { prop } => write!(f, "SETPROP &{prop}"),
            Self::PtrSetProp => f.write_str("PTRSETPROP"),
            Self::SetPropSelf { prop } => write!(f, "SETPROPSELF &{prop}"),
            Self::ObjSetProp { obj, prop } => write!(f, "OBJSETPROP #{obj} &{prop}"),
            Self::SetDbLcl { lcl, level } => write!(f, "SETDBLCL l{lcl} ^{level}"),
            Self::SetDbArg { arg, level } => write!(f, "SETDBARG a{arg} ^{level}"),
            Self::SetSelf => f.write_str("SETSELF"),
            Self::LoadCtx => f.write_str("LOADCTX"),
            Self::StoreCtx => f.write_str("STORECTX"),
            Self::SetLcl1R0 { lcl } => write!(f, "SETLCL1R0 l{lcl}"),
            Self::SetIndLcl1I8 { lcl, index } => write!(f, "SETINDLCL1I8 l{lcl}[{index}]"),
            Self::Bp => f.write_str("BP"),
            Self::Nop => f.write_str("NOP"),
        }
    }
}
