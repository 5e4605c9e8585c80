use crate::value::{DATAHOLDER_SIZE, LoadDataError, Val, read_value};

/// An immutable, byte-addressed pool (the code pool or the constant pool).
///
/// Pools are assembled once at load time from the image's pages and never
/// change afterwards, so the interpreter shares them behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pool {
    bytes: Vec<u8>,
}

impl Pool {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn slice(&self, ofs: u32, len: usize) -> Option<&[u8]> {
        let start = ofs as usize;
        self.bytes.get(start..start + len)
    }

    pub fn read_u16(&self, ofs: u32) -> Option<u16> {
        self.slice(ofs, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Bytes of the length-prefixed string at `ofs`.
    pub fn const_str(&self, ofs: u32) -> Option<&[u8]> {
        let len = self.read_u16(ofs)? as usize;
        self.slice(ofs + 2, len)
    }

    /// Number of elements of the constant list at `ofs`.
    pub fn list_len(&self, ofs: u32) -> Option<usize> {
        self.read_u16(ofs).map(|n| n as usize)
    }

    /// Element `i` (0-based) of the constant list at `ofs`.
    pub fn list_item(&self, ofs: u32, i: usize) -> Option<Val> {
        if i >= self.list_len(ofs)? {
            return None;
        }
        let at = ofs as usize + 2 + i * DATAHOLDER_SIZE;
        read_value(self.bytes.get(at..at + DATAHOLDER_SIZE)?).ok()
    }

    /// All elements of the constant list at `ofs`.
    pub fn list_items(&self, ofs: u32) -> Result<Vec<Val>, LoadDataError> {
        let count = self.list_len(ofs).ok_or(LoadDataError::Truncated)?;
        let start = ofs as usize + 2;
        let data = self
            .bytes
            .get(start..start + count * DATAHOLDER_SIZE)
            .ok_or(LoadDataError::Truncated)?;
        data.chunks_exact(DATAHOLDER_SIZE).map(read_value).collect()
    }
}

/// Writes pool fragments. Used to assemble constant pools for tests and
/// tooling.
#[derive(Debug, Default)]
pub struct PoolWriter {
    bytes: Vec<u8>,
}

impl PoolWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Append a length-prefixed string and return its offset.
    pub fn add_str(&mut self, s: &str) -> u32 {
        let ofs = self.offset();
        self.bytes.extend_from_slice(&(s.len() as u16).to_le_bytes());
        self.bytes.extend_from_slice(s.as_bytes());
        ofs
    }

    /// Append a constant list and return its offset.
    pub fn add_list(&mut self, items: &[Val]) -> u32 {
        let ofs = self.offset();
        self.bytes.extend_from_slice(&(items.len() as u16).to_le_bytes());
        for item in items {
            self.bytes.extend_from_slice(&item.to_dataholder());
        }
        ofs
    }

    /// Append raw bytes (e.g. a method body) and return their offset.
    pub fn add_bytes(&mut self, bytes: &[u8]) -> u32 {
        let ofs = self.offset();
        self.bytes.extend_from_slice(bytes);
        ofs
    }

    pub fn finish(self) -> Pool {
        Pool::new(self.bytes)
    }
}
