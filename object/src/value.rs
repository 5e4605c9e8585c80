use core::fmt;

/// Size in bytes of a serialized value ("dataholder"): a type byte followed
/// by a four-byte little-endian payload.
pub const DATAHOLDER_SIZE: usize = 5;

/// Stable handle of an object in the object table. `0` is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjId(pub u32);

impl ObjId {
    pub const INVALID: ObjId = ObjId(0);

    #[inline(always)]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// `Some(self)` for a valid id.
    #[inline(always)]
    pub fn valid(self) -> Option<ObjId> {
        self.is_valid().then_some(self)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Property identifier. `0` is the invalid property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PropId(pub u16);

impl PropId {
    pub const INVALID: PropId = PropId(0);

    #[inline(always)]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{}", self.0)
    }
}

/// A VM value.
///
/// Constant-pool variants (`SString`, `DString`, `List`) and code-pool
/// variants (`CodeOfs`, `FuncPtr`) carry byte offsets into their pools.
/// `StackPtr` and `NativeCode` exist only on the stack and are never
/// stored in objects or saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Val {
    #[default]
    Nil,
    True,
    Int(i32),
    Enum(u32),
    Prop(PropId),
    Obj(ObjId),
    SString(u32),
    DString(u32),
    List(u32),
    CodeOfs(u32),
    FuncPtr(u32),
    BifPtr { set: u16, index: u16 },
    NativeCode,
    StackPtr(u32),
}

/// Dataholder type codes.
pub mod tag {
    pub const NIL: u8 = 1;
    pub const TRUE: u8 = 2;
    pub const STACK: u8 = 3;
    pub const CODEPTR: u8 = 4;
    pub const OBJ: u8 = 5;
    pub const PROP: u8 = 6;
    pub const INT: u8 = 7;
    pub const SSTRING: u8 = 8;
    pub const DSTRING: u8 = 9;
    pub const LIST: u8 = 10;
    pub const CODEOFS: u8 = 11;
    pub const FUNCPTR: u8 = 12;
    pub const EMPTY: u8 = 13;
    pub const NATIVE_CODE: u8 = 14;
    pub const ENUM: u8 = 15;
    pub const BIFPTR: u8 = 16;
}

impl Val {
    #[inline(always)]
    pub fn obj(id: ObjId) -> Val {
        if id.is_valid() { Val::Obj(id) } else { Val::Nil }
    }

    #[inline(always)]
    pub fn bool(b: bool) -> Val {
        if b { Val::True } else { Val::Nil }
    }

    #[inline(always)]
    pub fn is_nil(self) -> bool {
        matches!(self, Val::Nil)
    }

    #[inline(always)]
    pub fn as_int(self) -> Option<i32> {
        match self {
            Val::Int(i) => Some(i),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_obj(self) -> Option<ObjId> {
        match self {
            Val::Obj(id) => Some(id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_prop(self) -> Option<PropId> {
        match self {
            Val::Prop(p) => Some(p),
            _ => None,
        }
    }

    /// The type code used by `dataType()` and the dataholder format.
    pub fn type_code(self) -> u8 {
        match self {
            Val::Nil => tag::NIL,
            Val::True => tag::TRUE,
            Val::StackPtr(_) => tag::STACK,
            Val::Obj(_) => tag::OBJ,
            Val::Prop(_) => tag::PROP,
            Val::Int(_) => tag::INT,
            Val::SString(_) => tag::SSTRING,
            Val::DString(_) => tag::DSTRING,
            Val::List(_) => tag::LIST,
            Val::CodeOfs(_) => tag::CODEOFS,
            Val::FuncPtr(_) => tag::FUNCPTR,
            Val::NativeCode => tag::NATIVE_CODE,
            Val::Enum(_) => tag::ENUM,
            Val::BifPtr { .. } => tag::BIFPTR,
        }
    }

    /// Whether the value may live in an object or a saved state.
    pub fn is_persistable(self) -> bool {
        !matches!(self, Val::StackPtr(_) | Val::NativeCode)
    }

    pub fn to_dataholder(self) -> [u8; DATAHOLDER_SIZE] {
        let payload: u32 = match self {
            Val::Nil | Val::True | Val::NativeCode => 0,
            Val::Int(i) => i as u32,
            Val::Enum(e) => e,
            Val::Prop(p) => p.0 as u32,
            Val::Obj(id) => id.0,
            Val::SString(o)
            | Val::DString(o)
            | Val::List(o)
            | Val::CodeOfs(o)
            | Val::FuncPtr(o)
            | Val::StackPtr(o) => o,
            Val::BifPtr { set, index } => ((set as u32) << 16) | index as u32,
        };
        let mut out = [0u8; DATAHOLDER_SIZE];
        out[0] = self.type_code();
        out[1..].copy_from_slice(&payload.to_le_bytes());
        out
    }
}

/// The dataholder of an absent value.
pub const EMPTY_DATAHOLDER: [u8; DATAHOLDER_SIZE] = [tag::EMPTY, 0, 0, 0, 0];

/// Decode a dataholder. `Ok(None)` is the EMPTY pseudo-value.
pub fn read_dataholder(bytes: &[u8]) -> Result<Option<Val>, LoadDataError> {
    let b = bytes.get(..DATAHOLDER_SIZE).ok_or(LoadDataError::Truncated)?;
    let payload = u32::from_le_bytes([b[1], b[2], b[3], b[4]]);
    let val = match b[0] {
        tag::NIL => Val::Nil,
        tag::TRUE => Val::True,
        tag::OBJ => Val::obj(ObjId(payload)),
        tag::PROP => Val::Prop(PropId(payload as u16)),
        tag::INT => Val::Int(payload as i32),
        tag::SSTRING => Val::SString(payload),
        tag::DSTRING => Val::DString(payload),
        tag::LIST => Val::List(payload),
        tag::CODEOFS => Val::CodeOfs(payload),
        tag::FUNCPTR => Val::FuncPtr(payload),
        tag::ENUM => Val::Enum(payload),
        tag::BIFPTR => Val::BifPtr {
            set: (payload >> 16) as u16,
            index: payload as u16,
        },
        tag::EMPTY => return Ok(None),
        other => return Err(LoadDataError::BadDataholder(other)),
    };
    Ok(Some(val))
}

/// Decode a dataholder that must hold a value.
pub fn read_value(bytes: &[u8]) -> Result<Val, LoadDataError> {
    read_dataholder(bytes)?.ok_or(LoadDataError::BadDataholder(tag::EMPTY))
}

/// Malformed metaclass image or save data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDataError {
    /// The data ends before a declared field.
    Truncated,
    /// A dataholder has a type code that cannot be stored.
    BadDataholder(u8),
    /// A field holds a value outside its allowed range.
    BadValue,
}

impl fmt::Display for LoadDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => f.write_str("metaclass data truncated"),
            Self::BadDataholder(t) => write!(f, "invalid dataholder type {t}"),
            Self::BadValue => f.write_str("invalid metaclass data"),
        }
    }
}

impl std::error::Error for LoadDataError {}

/// Little-endian field reader over metaclass data.
pub struct DataReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> DataReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], LoadDataError> {
        let end = self.pos + n;
        let out = self.bytes.get(self.pos..end).ok_or(LoadDataError::Truncated)?;
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, LoadDataError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, LoadDataError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, LoadDataError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn dataholder(&mut self) -> Result<Option<Val>, LoadDataError> {
        read_dataholder(self.take(DATAHOLDER_SIZE)?)
    }

    pub fn value(&mut self) -> Result<Val, LoadDataError> {
        read_value(self.take(DATAHOLDER_SIZE)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataholder_layout() {
        assert_eq!(Val::Int(-2).to_dataholder(), [tag::INT, 0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(Val::Prop(PropId(0x1234)).to_dataholder(), [tag::PROP, 0x34, 0x12, 0, 0]);
        assert_eq!(
            Val::BifPtr { set: 1, index: 2 }.to_dataholder(),
            [tag::BIFPTR, 2, 0, 1, 0]
        );
    }

    #[test]
    fn dataholder_decode() {
        for v in [
            Val::Nil,
            Val::True,
            Val::Int(i32::MIN),
            Val::Obj(ObjId(99)),
            Val::SString(0x40),
            Val::FuncPtr(12),
            Val::Enum(7),
            Val::BifPtr { set: 3, index: 9 },
        ] {
            assert_eq!(read_dataholder(&v.to_dataholder()), Ok(Some(v)));
        }
        assert_eq!(read_dataholder(&EMPTY_DATAHOLDER), Ok(None));
        assert_eq!(read_dataholder(&[tag::OBJ, 0, 0, 0, 0]), Ok(Some(Val::Nil)));
        assert_eq!(
            read_dataholder(&Val::StackPtr(4).to_dataholder()),
            Err(LoadDataError::BadDataholder(tag::STACK))
        );
        assert_eq!(read_dataholder(&[tag::INT, 1]), Err(LoadDataError::Truncated));
    }

    #[test]
    fn reader_fields() {
        let mut r = DataReader::new(&[1, 0x02, 0x01, 4, 3, 2, 1]);
        assert_eq!(r.u8(), Ok(1));
        assert_eq!(r.u16(), Ok(0x0102));
        assert_eq!(r.u32(), Ok(0x0102_0304));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.u8(), Err(LoadDataError::Truncated));
    }
}
