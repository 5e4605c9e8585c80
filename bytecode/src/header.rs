use crate::decoder::DecodeError;

/// Size in bytes of a method header. Code begins immediately after it.
pub const FUNC_HEADER_SIZE: usize = 10;

/// Size in bytes of one exception table entry.
pub const EXC_ENTRY_SIZE: usize = 10;

const VARARGS_FLAG: u8 = 0x80;

/// The fixed header at the start of every method in the code pool.
///
/// Layout (little-endian):
///
/// | offset | field |
/// |---|---|
/// | 0 | `argc:u8`, high bit set for varargs |
/// | 1 | `opt_argc:u8` |
/// | 2 | `locals:u16` |
/// | 4 | `stack_depth:u16` |
/// | 6 | `exc_table:u16`, method-relative, 0 if none |
/// | 8 | `debug_table:u16`, method-relative, 0 if none |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionHeader {
    pub min_argc: u8,
    pub opt_argc: u8,
    pub varargs: bool,
    pub locals: u16,
    pub stack_depth: u16,
    pub exc_table: u16,
    pub debug_table: u16,
}

impl FunctionHeader {
    /// Parse the header of the method starting at `entry`.
    pub fn parse(code: &[u8], entry: usize) -> Result<Self, DecodeError> {
        let bytes = code
            .get(entry..entry + FUNC_HEADER_SIZE)
            .ok_or(DecodeError::Truncated { at: entry })?;
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        Ok(Self {
            min_argc: bytes[0] & !VARARGS_FLAG,
            opt_argc: bytes[1],
            varargs: bytes[0] & VARARGS_FLAG != 0,
            locals: u16_at(2),
            stack_depth: u16_at(4),
            exc_table: u16_at(6),
            debug_table: u16_at(8),
        })
    }

    pub fn encode(&self) -> [u8; FUNC_HEADER_SIZE] {
        let mut out = [0u8; FUNC_HEADER_SIZE];
        out[0] = self.min_argc | if self.varargs { VARARGS_FLAG } else { 0 };
        out[1] = self.opt_argc;
        out[2..4].copy_from_slice(&self.locals.to_le_bytes());
        out[4..6].copy_from_slice(&self.stack_depth.to_le_bytes());
        out[6..8].copy_from_slice(&self.exc_table.to_le_bytes());
        out[8..10].copy_from_slice(&self.debug_table.to_le_bytes());
        out
    }

    /// Whether a call with `argc` actual arguments is acceptable.
    pub fn accepts(&self, argc: usize) -> bool {
        let min = self.min_argc as usize;
        if self.varargs {
            argc >= min
        } else {
            argc >= min && argc <= min + self.opt_argc as usize
        }
    }
}

/// One entry of a method's exception table. Offsets are method-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start: u16,
    pub end: u16,
    /// Exception class object id, or 0 to catch everything.
    pub class: u32,
    pub handler: u16,
}

impl ExceptionEntry {
    /// Whether the protected range covers the method-relative offset `ofs`.
    pub fn covers(&self, ofs: usize) -> bool {
        self.start as usize <= ofs && ofs <= self.end as usize
    }
}

/// Read the exception table of the method at `entry`, if it has one.
pub fn exception_table(
    code: &[u8],
    entry: usize,
    header: &FunctionHeader,
) -> Result<Vec<ExceptionEntry>, DecodeError> {
    if header.exc_table == 0 {
        return Ok(Vec::new());
    }
    let base = entry + header.exc_table as usize;
    let count = read_u16(code, base)? as usize;
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let at = base + 2 + i * EXC_ENTRY_SIZE;
        entries.push(ExceptionEntry {
            start: read_u16(code, at)?,
            end: read_u16(code, at + 2)?,
            class: read_u32(code, at + 4)?,
            handler: read_u16(code, at + 8)?,
        });
    }
    Ok(entries)
}

/// A debug-line record mapping a method-relative code offset to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub ofs: u16,
    pub line: u32,
}

/// Source line for the method-relative offset `ofs`, if the method carries
/// a line table.
pub fn line_for_offset(
    code: &[u8],
    entry: usize,
    header: &FunctionHeader,
    ofs: usize,
) -> Option<u32> {
    if header.debug_table == 0 {
        return None;
    }
    let base = entry + header.debug_table as usize;
    let count = read_u16(code, base).ok()? as usize;
    let mut best = None;
    for i in 0..count {
        let at = base + 2 + i * 6;
        let start = read_u16(code, at).ok()? as usize;
        if start > ofs {
            break;
        }
        best = Some(read_u32(code, at + 2).ok()?);
    }
    best
}

fn read_u16(code: &[u8], at: usize) -> Result<u16, DecodeError> {
    code.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(DecodeError::Truncated { at })
}

fn read_u32(code: &[u8], at: usize) -> Result<u32, DecodeError> {
    code.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(DecodeError::Truncated { at })
}
