//! T3 image file reader.
//!
//! An image is a signature, a fixed header and a sequence of typed blocks.
//! The blocks this VM understands are the entrypoint (`ENTP`), pool
//! definitions and pages (`CPDF`, `CPPG`), metaclass and function-set
//! dependencies (`MCLD`, `FNSD`), static objects (`OBJS`), exported
//! symbols (`SYMD`) and global symbols (`GSYM`). Reading stops at `EOF `.

use std::fs;
use std::path::Path;

use object::{DATAHOLDER_SIZE, ObjId, Pool, PropId, Val, read_dataholder};

use crate::error::{ErrorCode, ImageError};

pub const IMAGE_SIGNATURE: &[u8; 11] = b"T3-image\r\n\x1a";
pub const IMAGE_ID_LEN: usize = 24;
const MAX_VERSION: u16 = 1;
const HEADER_SIZE: usize = IMAGE_SIGNATURE.len() + 2 + 32 + IMAGE_ID_LEN;
const BLOCK_HEADER_SIZE: usize = 10;
const BLOCK_MANDATORY: u16 = 0x0001;

const POOL_CODE: u16 = 1;
const POOL_CONST: u16 = 2;

const OBJS_LARGE: u16 = 0x0001;
const OBJS_TRANSIENT: u16 = 0x0002;

const GSYM_FUNCTION: u16 = 1;
const GSYM_OBJECT: u16 = 2;
const GSYM_PROPERTY: u16 = 3;
const GSYM_ENUM: u16 = 4;

/// A metaclass the image depends on, with the properties it maps onto the
/// metaclass's native methods (position `i` is native method `i`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaclassDep {
    pub name: String,
    pub props: Vec<PropId>,
}

/// An object defined in the image, still in its serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticObject {
    pub id: ObjId,
    pub meta_idx: u16,
    pub transient: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub version: u16,
    /// Build timestamp; identifies the image in saved states.
    pub id: [u8; IMAGE_ID_LEN],
    pub entry: u32,
    pub code: Pool,
    pub consts: Pool,
    pub metaclasses: Vec<MetaclassDep>,
    pub function_sets: Vec<String>,
    pub objects: Vec<StaticObject>,
    /// Exported symbols (`SYMD`): `RuntimeError`, `propNotDefined`, ...
    pub symbols: Vec<(String, Val)>,
    /// Debug global symbols (`GSYM`).
    pub globals: Vec<(String, Val)>,
}

impl Image {
    pub fn load(path: impl AsRef<Path>) -> Result<Image, ImageError> {
        let bytes = fs::read(path)?;
        Image::parse(&bytes)
    }

    pub fn symbol(&self, name: &str) -> Option<Val> {
        self.symbols.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn global(&self, name: &str) -> Option<Val> {
        self.globals.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn parse(bytes: &[u8]) -> Result<Image, ImageError> {
        if bytes.len() < HEADER_SIZE || !bytes.starts_with(IMAGE_SIGNATURE) {
            return Err(ImageError::new(ErrorCode::NotAnImageFile));
        }
        let mut r = Reader::new(bytes, IMAGE_SIGNATURE.len());
        let version = r.u16()?;
        if version > MAX_VERSION {
            return Err(ImageError::with(ErrorCode::ImageIncompatVsn, version as i64));
        }
        r.take(32)?;
        let mut id = [0u8; IMAGE_ID_LEN];
        id.copy_from_slice(r.take(IMAGE_ID_LEN)?);

        let mut image = Image { version, id, ..Image::default() };
        let mut pools = PoolPages::default();
        let mut have_entry = false;

        loop {
            let kind: [u8; 4] = r
                .take(4)?
                .try_into()
                .map_err(|_| ImageError::new(ErrorCode::ReadPastImgEnd))?;
            let size = r.u32()? as usize;
            let flags = r.u16()?;
            let body = r.take(size)?;
            let name = String::from_utf8_lossy(&kind).into_owned();
            let mut b = Reader::new(body, 0);
            match &kind {
                b"EOF " => break,
                b"ENTP" => {
                    image.entry = b.u32().map_err(|_| too_small(&name))?;
                    let header_size = b.u16().map_err(|_| too_small(&name))?;
                    if header_size as usize != bytecode::FUNC_HEADER_SIZE {
                        return Err(ImageError::with(ErrorCode::ImageIncompatHdrFmt, "method"));
                    }
                    if let Ok(exc_size) = b.u16() {
                        if exc_size as usize != bytecode::EXC_ENTRY_SIZE {
                            return Err(ImageError::with(
                                ErrorCode::ImageIncompatHdrFmt,
                                "exception table",
                            ));
                        }
                    }
                    have_entry = true;
                }
                b"CPDF" => pools.define(&mut b)?,
                b"CPPG" => pools.page(&mut b, body.len())?,
                b"MCLD" => image.metaclasses = read_mcld(&mut b)?,
                b"FNSD" => image.function_sets = read_fnsd(&mut b)?,
                b"OBJS" => read_objs(&mut b, &mut image.objects)?,
                b"SYMD" => image.symbols.extend(read_symd(&mut b)?),
                b"GSYM" => image.globals.extend(read_gsym(&mut b)?),
                _ if flags & BLOCK_MANDATORY != 0 => {
                    return Err(ImageError::with(ErrorCode::UnknownImageBlock, name));
                }
                _ => log::debug!("image: skipping optional block {name}"),
            }
        }

        if !have_entry {
            return Err(ImageError::new(ErrorCode::ImageNoEntrypt));
        }
        image.code = pools.finish(POOL_CODE);
        image.consts = pools.finish(POOL_CONST);
        Ok(image)
    }

    /// Serialize as an image file that [`parse`](Self::parse) accepts. Each
    /// pool is written as a single unmasked page.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(IMAGE_SIGNATURE);
        write_u16(&mut out, self.version);
        out.extend_from_slice(&[0u8; 32]);
        out.extend_from_slice(&self.id);

        let mut entp = Vec::new();
        write_u32(&mut entp, self.entry);
        write_u16(&mut entp, bytecode::FUNC_HEADER_SIZE as u16);
        write_u16(&mut entp, bytecode::EXC_ENTRY_SIZE as u16);
        write_block(&mut out, b"ENTP", &entp);

        for (pool_id, pool) in [(POOL_CODE, &self.code), (POOL_CONST, &self.consts)] {
            let mut def = Vec::new();
            write_u16(&mut def, pool_id);
            write_u32(&mut def, 1);
            write_u32(&mut def, pool.len().max(1) as u32);
            write_block(&mut out, b"CPDF", &def);

            let mut page = Vec::new();
            write_u16(&mut page, pool_id);
            write_u32(&mut page, 0);
            page.push(0);
            page.extend_from_slice(pool.bytes());
            write_block(&mut out, b"CPPG", &page);
        }

        let mut mcld = Vec::new();
        write_u16(&mut mcld, self.metaclasses.len() as u16);
        for dep in &self.metaclasses {
            let mut entry = Vec::new();
            entry.push(dep.name.len() as u8);
            entry.extend_from_slice(dep.name.as_bytes());
            write_u16(&mut entry, dep.props.len() as u16);
            write_u16(&mut entry, 2);
            for p in &dep.props {
                write_u16(&mut entry, p.0);
            }
            write_u16(&mut mcld, (entry.len() + 2) as u16);
            mcld.extend_from_slice(&entry);
        }
        write_block(&mut out, b"MCLD", &mcld);

        let mut fnsd = Vec::new();
        write_u16(&mut fnsd, self.function_sets.len() as u16);
        for name in &self.function_sets {
            fnsd.push(name.len() as u8);
            fnsd.extend_from_slice(name.as_bytes());
        }
        write_block(&mut out, b"FNSD", &fnsd);

        for obj in &self.objects {
            let mut objs = Vec::new();
            write_u16(&mut objs, 1);
            write_u16(&mut objs, obj.meta_idx);
            let large = obj.data.len() > u16::MAX as usize;
            let mut flags = if large { OBJS_LARGE } else { 0 };
            if obj.transient {
                flags |= OBJS_TRANSIENT;
            }
            write_u16(&mut objs, flags);
            write_u32(&mut objs, obj.id.0);
            if large {
                write_u32(&mut objs, obj.data.len() as u32);
            } else {
                write_u16(&mut objs, obj.data.len() as u16);
            }
            objs.extend_from_slice(&obj.data);
            write_block(&mut out, b"OBJS", &objs);
        }

        let mut symd = Vec::new();
        write_u16(&mut symd, self.symbols.len() as u16);
        for (name, val) in &self.symbols {
            symd.extend_from_slice(&val.to_dataholder());
            symd.push(name.len() as u8);
            symd.extend_from_slice(name.as_bytes());
        }
        write_block(&mut out, b"SYMD", &symd);

        if !self.globals.is_empty() {
            let mut gsym = Vec::new();
            write_u32(&mut gsym, self.globals.len() as u32);
            for (name, val) in &self.globals {
                let (kind, extra) = match *val {
                    Val::FuncPtr(ofs) => (GSYM_FUNCTION, ofs.to_le_bytes().to_vec()),
                    Val::Obj(id) => (GSYM_OBJECT, id.0.to_le_bytes().to_vec()),
                    Val::Prop(p) => (GSYM_PROPERTY, p.0.to_le_bytes().to_vec()),
                    Val::Enum(e) => (GSYM_ENUM, e.to_le_bytes().to_vec()),
                    _ => continue,
                };
                write_u16(&mut gsym, name.len() as u16);
                write_u16(&mut gsym, extra.len() as u16);
                write_u16(&mut gsym, kind);
                gsym.extend_from_slice(name.as_bytes());
                gsym.extend_from_slice(&extra);
            }
            write_block(&mut out, b"GSYM", &gsym);
        }

        write_block(&mut out, b"EOF ", &[]);
        out
    }
}

fn too_small(block: &str) -> ImageError {
    ImageError::with(ErrorCode::ImageBlockTooSmall, block)
}

// ── Pools ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct PoolPages {
    /// `(page_count, page_size, bytes)` per pool id.
    defs: [Option<(u32, u32, Vec<u8>)>; 2],
}

impl PoolPages {
    fn slot(&mut self, pool_id: u16) -> Result<&mut Option<(u32, u32, Vec<u8>)>, ImageError> {
        match pool_id {
            POOL_CODE | POOL_CONST => Ok(&mut self.defs[pool_id as usize - 1]),
            other => Err(ImageError::with(ErrorCode::ImageBadPoolId, other as i64)),
        }
    }

    fn define(&mut self, b: &mut Reader<'_>) -> Result<(), ImageError> {
        let pool_id = b.u16().map_err(|_| too_small("CPDF"))?;
        let count = b.u32().map_err(|_| too_small("CPDF"))?;
        let size = b.u32().map_err(|_| too_small("CPDF"))?;
        *self.slot(pool_id)? = Some((count, size, Vec::new()));
        Ok(())
    }

    fn page(&mut self, b: &mut Reader<'_>, block_len: usize) -> Result<(), ImageError> {
        let pool_id = b.u16().map_err(|_| too_small("CPPG"))?;
        let idx = b.u32().map_err(|_| too_small("CPPG"))?;
        let mask = b.u8().map_err(|_| too_small("CPPG"))?;
        let data = b.take(block_len - 7)?;
        let Some((count, size, bytes)) = self.slot(pool_id)? else {
            return Err(ImageError::new(ErrorCode::ImagePoolBeforeDef));
        };
        if idx >= *count {
            return Err(ImageError::with(ErrorCode::LoadBadPageIdx, idx as i64));
        }
        let start = idx as usize * *size as usize;
        let end = start + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        for (dst, src) in bytes[start..end].iter_mut().zip(data) {
            *dst = src ^ mask;
        }
        Ok(())
    }

    fn finish(&mut self, pool_id: u16) -> Pool {
        let bytes = self.defs[pool_id as usize - 1]
            .take()
            .map(|(_, _, bytes)| bytes)
            .unwrap_or_default();
        Pool::new(bytes)
    }
}

// ── Dependency and object blocks ──────────────────────────────────────

fn read_mcld(b: &mut Reader<'_>) -> Result<Vec<MetaclassDep>, ImageError> {
    let count = b.u16()?;
    let mut deps = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let entry_start = b.pos;
        let entry_size = b.u16()? as usize;
        let name = b.name_u8()?;
        let prop_count = b.u16()?;
        let prop_size = b.u16()? as usize;
        let mut props = Vec::with_capacity(prop_count as usize);
        for _ in 0..prop_count {
            let entry = b.take(prop_size)?;
            let id = entry
                .get(..2)
                .map(|p| u16::from_le_bytes([p[0], p[1]]))
                .ok_or_else(|| too_small("MCLD"))?;
            props.push(PropId(id));
        }
        b.pos = entry_start + entry_size;
        deps.push(MetaclassDep { name, props });
    }
    Ok(deps)
}

fn read_fnsd(b: &mut Reader<'_>) -> Result<Vec<String>, ImageError> {
    let count = b.u16()?;
    (0..count).map(|_| b.name_u8()).collect()
}

fn read_objs(b: &mut Reader<'_>, out: &mut Vec<StaticObject>) -> Result<(), ImageError> {
    let count = b.u16()?;
    let meta_idx = b.u16()?;
    let flags = b.u16()?;
    for _ in 0..count {
        let id = ObjId(b.u32()?);
        let size = if flags & OBJS_LARGE != 0 { b.u32()? as usize } else { b.u16()? as usize };
        let data = b.take(size)?.to_vec();
        if !id.is_valid() {
            return Err(ImageError::with(ErrorCode::InvalMetaclassData, 0));
        }
        out.push(StaticObject {
            id,
            meta_idx,
            transient: flags & OBJS_TRANSIENT != 0,
            data,
        });
    }
    Ok(())
}

fn read_symd(b: &mut Reader<'_>) -> Result<Vec<(String, Val)>, ImageError> {
    let count = b.u16()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let holder = b.take(DATAHOLDER_SIZE)?;
        let name = b.name_u8()?;
        let val = read_dataholder(holder)
            .map_err(|_| too_small("SYMD"))?
            .unwrap_or(Val::Nil);
        out.push((name, val));
    }
    Ok(out)
}

fn read_gsym(b: &mut Reader<'_>) -> Result<Vec<(String, Val)>, ImageError> {
    let count = b.u32()?;
    let mut out = Vec::new();
    for _ in 0..count {
        let name_len = b.u16()? as usize;
        let extra_len = b.u16()? as usize;
        let kind = b.u16()?;
        let name = String::from_utf8_lossy(b.take(name_len)?).into_owned();
        let mut extra = Reader::new(b.take(extra_len)?, 0);
        let val = match kind {
            GSYM_FUNCTION => Val::FuncPtr(extra.u32()?),
            GSYM_OBJECT => Val::obj(ObjId(extra.u32()?)),
            GSYM_PROPERTY => Val::Prop(PropId(extra.u16()?)),
            GSYM_ENUM => Val::Enum(extra.u32()?),
            _ => continue,
        };
        out.push((name, val));
    }
    Ok(out)
}

// ── Byte helpers ──────────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ImageError> {
        let end = self.pos + n;
        let out = self
            .bytes
            .get(self.pos..end)
            .ok_or(ImageError::new(ErrorCode::ReadPastImgEnd))?;
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name_u8(&mut self) -> Result<String, ImageError> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_block(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(kind);
    write_u32(out, body.len() as u32);
    let flags = if kind == b"EOF " || kind == b"GSYM" { 0 } else { BLOCK_MANDATORY };
    write_u16(out, flags);
    out.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::PoolWriter;

    fn sample() -> Image {
        let mut consts = PoolWriter::new();
        consts.add_str("hello");
        Image {
            version: 1,
            id: [7; IMAGE_ID_LEN],
            entry: 0,
            code: Pool::new(vec![0, 0, 0, 0, 32, 0, 0, 0, 0, 0, 0x51]),
            consts: consts.finish(),
            metaclasses: vec![
                MetaclassDep { name: "tads-object/030005".into(), props: vec![] },
                MetaclassDep {
                    name: "string/030008".into(),
                    props: vec![PropId(10), PropId(11)],
                },
            ],
            function_sets: vec!["t3vm/010006".into(), "tads-gen/030008".into()],
            objects: vec![StaticObject {
                id: ObjId(5),
                meta_idx: 0,
                transient: true,
                data: vec![0, 0, 0, 0, 0, 0],
            }],
            symbols: vec![("propNotDefined".into(), Val::Prop(PropId(3)))],
            globals: vec![
                ("main".into(), Val::FuncPtr(0)),
                ("obj".into(), Val::Obj(ObjId(5))),
            ],
        }
    }

    #[test]
    fn written_images_parse_back() {
        let image = sample();
        let parsed = Image::parse(&image.to_bytes()).expect("parse");
        assert_eq!(parsed, image);
        assert_eq!(parsed.symbol("propNotDefined"), Some(Val::Prop(PropId(3))));
        assert_eq!(parsed.global("obj"), Some(Val::Obj(ObjId(5))));
    }

    #[test]
    fn masked_pages_are_unmasked() {
        let image = sample();
        let mut bytes = image.to_bytes();
        // find the code CPPG page and mask it with 0xFF
        let pos = bytes.windows(4).position(|w| w == b"CPPG").expect("page");
        let body = pos + BLOCK_HEADER_SIZE;
        bytes[body + 6] = 0xFF;
        let len = image.code.len();
        for b in &mut bytes[body + 7..body + 7 + len] {
            *b ^= 0xFF;
        }
        assert_eq!(Image::parse(&bytes).expect("parse").code, image.code);
    }

    #[test]
    fn rejects_bad_files() {
        assert_eq!(
            Image::parse(b"not an image").map_err(|e| e.code()).err(),
            Some(Some(ErrorCode::NotAnImageFile))
        );

        let mut bytes = sample().to_bytes();
        bytes[IMAGE_SIGNATURE.len()] = 9;
        assert_eq!(
            Image::parse(&bytes).map_err(|e| e.code()).err(),
            Some(Some(ErrorCode::ImageIncompatVsn))
        );

        // truncate before EOF
        let bytes = sample().to_bytes();
        let cut = &bytes[..bytes.len() - BLOCK_HEADER_SIZE - 3];
        assert_eq!(
            Image::parse(cut).map_err(|e| e.code()).err(),
            Some(Some(ErrorCode::ReadPastImgEnd))
        );
    }

    #[test]
    fn unknown_blocks() {
        let image = sample();
        let bytes = image.to_bytes();
        let eof = bytes.len() - BLOCK_HEADER_SIZE;

        let mut optional = bytes[..eof].to_vec();
        write_block(&mut optional, b"GSYM", &0u32.to_le_bytes());
        optional.extend_from_slice(b"XTRA");
        write_u32(&mut optional, 2);
        write_u16(&mut optional, 0);
        optional.extend_from_slice(&[1, 2]);
        optional.extend_from_slice(&bytes[eof..]);
        assert!(Image::parse(&optional).is_ok());

        let mut mandatory = bytes[..eof].to_vec();
        write_block(&mut mandatory, b"XTRA", &[1, 2]);
        mandatory.extend_from_slice(&bytes[eof..]);
        assert_eq!(
            Image::parse(&mandatory).map_err(|e| e.code()).err(),
            Some(Some(ErrorCode::UnknownImageBlock))
        );
    }
}
