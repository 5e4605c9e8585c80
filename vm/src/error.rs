use core::fmt;
use std::io;

use object::{LoadDataError, ObjId};

/// Error numbers visible to programs through `RuntimeError` objects.
///
/// The numbering follows the T3 conventions so that library code checking
/// `errno_` keeps working.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // ── image loading ──
    UnknownMetaclass = 301,
    UnknownFuncSet = 302,
    ReadPastImgEnd = 303,
    NotAnImageFile = 304,
    UnknownImageBlock = 305,
    ImageBlockTooSmall = 306,
    ImagePoolBeforeDef = 307,
    ImageBadPoolId = 309,
    LoadBadPageIdx = 310,
    ImageNoEntrypt = 318,
    ImageIncompatVsn = 319,
    ImageIncompatHdrFmt = 321,
    InvalMetaclassData = 328,

    // ── saved state ──
    NotSavedState = 1201,
    WrongSavedState = 1202,
    SavedObjIdInvalid = 1206,
    BadSavedState = 1207,

    // ── types and arithmetic ──
    NoStrConv = 2001,
    BadTypeAdd = 2003,
    NumValReqd = 2004,
    IntValReqd = 2005,
    NoLogConv = 2006,
    BadTypeSub = 2007,
    DivideByZero = 2008,
    InvalidComparison = 2009,
    ObjValReqd = 2010,
    PropPtrValReqd = 2011,
    LogValReqd = 2012,
    FuncPtrValReqd = 2013,
    CannotIndexType = 2014,
    IndexOutOfRange = 2015,
    BadMetaclassIndex = 2016,
    BadDynamicNew = 2017,
    ObjValReqdSc = 2018,
    StringValReqd = 2019,
    ListValReqd = 2020,
    InvalObjType = 2022,
    BadTypeMul = 2024,
    BadTypeDiv = 2025,
    BadTypeNeg = 2026,
    OutOfRange = 2027,
    BadTypeMod = 2032,
    BadTypeBitAnd = 2033,
    BadTypeBitOr = 2034,
    BadTypeXor = 2035,
    BadTypeShl = 2036,
    BadTypeAshr = 2037,
    BadTypeBitNot = 2038,
    CodePtrValReqd = 2039,
    ExceptionObjReqd = 2040,
    BadTypeLshr = 2043,

    // ── calls ──
    WrongNumOfArgs = 2201,
    WrongNumOfArgsCalling = 2202,
    NilDeref = 2203,
    BadTypeCall = 2205,
    NilSelf = 2206,

    // ── control ──
    InvalidOpcode = 2301,
    UnhandledExc = 2302,
    StackOverflow = 2303,
    BadTypeBif = 2304,
    SayIsNotDefined = 2305,
    BadValBif = 2306,
    Breakpoint = 2307,
    CallextNotImpl = 2308,
    InvalidOpcodeMod = 2309,
    /// Not a T3 number: undo requested with no savepoint.
    NoUndo = 2390,

    BadSpecEval = 2501,
}

impl ErrorCode {
    pub fn number(self) -> u32 {
        self as u32
    }

    /// printf-style message template. `%d` and `%s` are replaced by the
    /// error's parameters in order.
    pub fn template(self) -> &'static str {
        use ErrorCode::*;
        match self {
            UnknownMetaclass => "this image file requires an unknown metaclass (\"%s\")",
            UnknownFuncSet => "this image file requires an unknown function set (\"%s\")",
            ReadPastImgEnd => "reading past end of image file",
            NotAnImageFile => "this file is not a valid T3 image file",
            UnknownImageBlock => "unknown mandatory image block \"%s\"",
            ImageBlockTooSmall => "image block \"%s\" is too small",
            ImagePoolBeforeDef => "pool page loaded before its pool was defined",
            ImageBadPoolId => "invalid pool id %d",
            LoadBadPageIdx => "pool page index %d is out of range",
            ImageNoEntrypt => "image file has no entrypoint",
            ImageIncompatVsn => "image file version %d is not supported",
            ImageIncompatHdrFmt => "image file has an incompatible %s header format",
            InvalMetaclassData => "invalid metaclass data for object #%d",
            NotSavedState => "file is not a valid saved state file",
            WrongSavedState => "saved state file is for a different image file",
            SavedObjIdInvalid => "saved state refers to invalid object #%d",
            BadSavedState => "saved state file is corrupted",
            NoStrConv => "cannot convert value to string",
            BadTypeAdd => "invalid datatypes for addition operator",
            NumValReqd => "numeric value required",
            IntValReqd => "integer value required",
            NoLogConv => "cannot convert value to logical (true/nil)",
            BadTypeSub => "invalid datatypes for subtraction operator",
            DivideByZero => "division by zero",
            InvalidComparison => "invalid comparison",
            ObjValReqd => "object value required",
            PropPtrValReqd => "property pointer required",
            LogValReqd => "logical value required",
            FuncPtrValReqd => "function pointer required",
            CannotIndexType => "invalid index operation - this type of value cannot be indexed",
            IndexOutOfRange => "index out of range",
            BadMetaclassIndex => "invalid metaclass index %d",
            BadDynamicNew => "invalid dynamic object creation (metaclass does not support NEW)",
            ObjValReqdSc => "object value required for base class",
            StringValReqd => "string value required",
            ListValReqd => "list value required",
            InvalObjType => "invalid object type - this operation is not valid for this object",
            BadTypeMul => "invalid datatypes for multiplication operator",
            BadTypeDiv => "invalid datatypes for division operator",
            BadTypeNeg => "invalid datatype for arithmetic negation operator",
            OutOfRange => "value out of range",
            BadTypeMod => "invalid datatypes for modulo operator",
            BadTypeBitAnd => "invalid datatypes for bitwise AND operator",
            BadTypeBitOr => "invalid datatypes for bitwise OR operator",
            BadTypeXor => "invalid datatypes for XOR operator",
            BadTypeShl => "invalid datatypes for left-shift operator '<<'",
            BadTypeAshr => "invalid datatypes for arithmetic right-shift operator '>>'",
            BadTypeBitNot => "invalid datatypes for bitwise NOT operator",
            CodePtrValReqd => "code pointer value required",
            ExceptionObjReqd => "exception object required, but value is not an object",
            BadTypeLshr => "invalid datatypes for logical right-shift operator '>>>'",
            WrongNumOfArgs => "wrong number of arguments",
            WrongNumOfArgsCalling => "wrong number of arguments calling %s",
            NilDeref => "nil object reference",
            BadTypeCall => "invalid type for call",
            NilSelf => "nil 'self' value is not allowed",
            InvalidOpcode => "invalid opcode %d",
            UnhandledExc => "unhandled exception",
            StackOverflow => "stack overflow",
            BadTypeBif => "invalid type for built-in function argument",
            SayIsNotDefined => "default output function is not defined",
            BadValBif => "invalid value for built-in function argument (%s)",
            Breakpoint => "breakpoint encountered",
            CallextNotImpl => "external function calls are not implemented in this version",
            InvalidOpcodeMod => "invalid opcode modifier",
            NoUndo => "no undo information is available",
            BadSpecEval => "invalid speculative expression",
        }
    }

    /// Render the template with `params`. Missing parameters render as
    /// nothing; extra ones are ignored.
    pub fn format(self, params: &[ErrParam]) -> String {
        let mut out = String::new();
        let mut params = params.iter();
        let mut chars = self.template().chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' && matches!(chars.peek(), Some('d' | 's')) {
                chars.next();
                if let Some(p) = params.next() {
                    out.push_str(&p.to_string());
                }
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// A parameter substituted into an error message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrParam {
    Int(i64),
    Str(String),
}

impl fmt::Display for ErrParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrParam::Int(i) => write!(f, "{i}"),
            ErrParam::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ErrParam {
    fn from(s: &str) -> Self {
        ErrParam::Str(s.to_string())
    }
}

impl From<String> for ErrParam {
    fn from(s: String) -> Self {
        ErrParam::Str(s)
    }
}

impl From<i64> for ErrParam {
    fn from(i: i64) -> Self {
        ErrParam::Int(i)
    }
}

// ── RuntimeError ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// An error detected by the VM. Becomes a program-visible exception
    /// object when it reaches the throw machinery.
    Vm { code: ErrorCode, params: Vec<ErrParam> },
    /// A program-visible exception object crossing a native boundary.
    Unhandled(ObjId),
    /// The halt flag was observed.
    Halted,
}

impl RuntimeError {
    pub fn new(code: ErrorCode) -> Self {
        RuntimeError::Vm { code, params: Vec::new() }
    }

    pub fn with(code: ErrorCode, param: impl Into<ErrParam>) -> Self {
        RuntimeError::Vm {
            code,
            params: vec![param.into()],
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RuntimeError::Vm { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<ErrorCode> for RuntimeError {
    fn from(code: ErrorCode) -> Self {
        RuntimeError::new(code)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Vm { code, params } => {
                write!(f, "[error {}] {}", code.number(), code.format(params))
            }
            RuntimeError::Unhandled(obj) => write!(f, "unhandled exception {obj}"),
            RuntimeError::Halted => f.write_str("execution halted"),
        }
    }
}

impl std::error::Error for RuntimeError {}

// ── Load / save errors ────────────────────────────────────────────────

#[derive(Debug)]
pub enum ImageError {
    Format { code: ErrorCode, params: Vec<ErrParam> },
    Io(io::Error),
}

impl ImageError {
    pub fn new(code: ErrorCode) -> Self {
        ImageError::Format { code, params: Vec::new() }
    }

    pub fn with(code: ErrorCode, param: impl Into<ErrParam>) -> Self {
        ImageError::Format {
            code,
            params: vec![param.into()],
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ImageError::Format { code, .. } => Some(*code),
            ImageError::Io(_) => None,
        }
    }
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Format { code, params } => {
                write!(f, "[error {}] {}", code.number(), code.format(params))
            }
            ImageError::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<io::Error> for ImageError {
    fn from(e: io::Error) -> Self {
        ImageError::Io(e)
    }
}

#[derive(Debug)]
pub enum SaveError {
    Format { code: ErrorCode, params: Vec<ErrParam> },
    Io(io::Error),
}

impl SaveError {
    pub fn new(code: ErrorCode) -> Self {
        SaveError::Format { code, params: Vec::new() }
    }

    pub fn with(code: ErrorCode, param: impl Into<ErrParam>) -> Self {
        SaveError::Format {
            code,
            params: vec![param.into()],
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SaveError::Format { code, .. } => Some(*code),
            SaveError::Io(_) => None,
        }
    }
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Format { code, params } => {
                write!(f, "[error {}] {}", code.number(), code.format(params))
            }
            SaveError::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<io::Error> for SaveError {
    fn from(e: io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<LoadDataError> for SaveError {
    fn from(_: LoadDataError) -> Self {
        SaveError::new(ErrorCode::BadSavedState)
    }
}

/// Save-file problems surface to programs as runtime errors with the same
/// code; i/o failures as a bad saved state.
impl From<SaveError> for RuntimeError {
    fn from(e: SaveError) -> Self {
        match e {
            SaveError::Format { code, params } => RuntimeError::Vm { code, params },
            SaveError::Io(e) => RuntimeError::with(ErrorCode::BadValBif, e.to_string()),
        }
    }
}
