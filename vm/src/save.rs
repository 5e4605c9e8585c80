//! Saved-state files, restore and restart.
//!
//! A saved state is the signature, the image identifier, a metadata table
//! and every persistent object in the format its metaclass loads from an
//! image. Restore validates the whole file before touching the heap.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use heap::ObjectFlags;
use object::{DataReader, ObjId, ObjectBody, Val};

use crate::VM;
use crate::error::{ErrorCode, ImageError, RuntimeError, SaveError};
use crate::image::IMAGE_ID_LEN;

pub const SAVE_SIGNATURE: &[u8; 17] = b"T3-state-v0001\r\n\x1a";

const SAVED_TRANSIENT: u8 = 0x01;
const SAVED_IMAGE: u8 = 0x02;

/// A decoded object record, checked but not yet applied.
struct SavedObject {
    id: ObjId,
    body: ObjectBody,
    flags: ObjectFlags,
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_str(r: &mut DataReader<'_>) -> Result<String, SaveError> {
    let len = r.u16()? as usize;
    Ok(String::from_utf8_lossy(r.take(len)?).into_owned())
}

/// Read just the metadata table of a saved state.
pub fn read_metadata(r: &mut dyn Read) -> Result<Vec<(String, String)>, SaveError> {
    let mut bytes = Vec::new();
    r.read_to_end(&mut bytes)?;
    let mut rd = header(&bytes)?;
    metadata(&mut rd)
}

fn header(bytes: &[u8]) -> Result<DataReader<'_>, SaveError> {
    if !bytes.starts_with(SAVE_SIGNATURE) {
        return Err(SaveError::new(ErrorCode::NotSavedState));
    }
    let mut r = DataReader::new(&bytes[SAVE_SIGNATURE.len()..]);
    r.take(IMAGE_ID_LEN)?;
    Ok(r)
}

fn metadata(r: &mut DataReader<'_>) -> Result<Vec<(String, String)>, SaveError> {
    let count = r.u16()?;
    (0..count)
        .map(|_| Ok((read_str(r)?, read_str(r)?)))
        .collect()
}

impl VM {
    fn meta_index_of(&self, body: &ObjectBody) -> Option<u16> {
        let meta = body.metaclass();
        self.metaclasses
            .iter()
            .position(|m| m.meta == Some(meta))
            .map(|i| i as u16)
    }

    /// Write every persistent object to `w`. References to transient
    /// objects are saved as nil.
    pub fn save_state(&mut self, w: &mut dyn Write, metadata: &[(String, String)]) -> Result<(), SaveError> {
        // only reachable objects are worth saving
        self.collect_garbage();

        let mut out = Vec::new();
        out.extend_from_slice(SAVE_SIGNATURE);
        out.extend_from_slice(&self.image.id);
        out.extend_from_slice(&(metadata.len() as u16).to_le_bytes());
        for (k, v) in metadata {
            write_str(&mut out, k);
            write_str(&mut out, v);
        }

        let objects = self.heap.objects();
        let mut dropped = 0usize;
        let mut filter = |v: Val| match v {
            Val::Obj(id) if objects.is_transient(id) => {
                dropped += 1;
                Val::Nil
            }
            v if !v.is_persistable() => Val::Nil,
            v => v,
        };
        let mut records = Vec::new();
        let mut count = 0u32;
        for (id, entry) in objects.iter().filter(|(_, e)| !e.is_transient()) {
            let meta_idx = self
                .meta_index_of(&entry.body)
                .ok_or_else(|| SaveError::with(ErrorCode::UnknownMetaclass, entry.body.metaclass().name()))?;
            let mut body = Vec::new();
            entry.body.encode(&mut body, &mut filter);
            records.extend_from_slice(&id.0.to_le_bytes());
            records.extend_from_slice(&meta_idx.to_le_bytes());
            let flags = if entry.flags.contains(ObjectFlags::IMAGE) { SAVED_IMAGE } else { 0 };
            records.push(flags);
            records.extend_from_slice(&(body.len() as u32).to_le_bytes());
            records.extend_from_slice(&body);
            count += 1;
        }
        if dropped > 0 {
            log::warn!("save: {dropped} references to transient objects saved as nil");
        }
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&records);

        w.write_all(&out)?;
        w.flush()?;
        log::info!("save: {count} objects, {} bytes", out.len());
        Ok(())
    }

    /// Replace the persistent heap with the one saved in `r`. Transient
    /// objects are kept; undo history is discarded.
    pub fn restore_state(&mut self, r: &mut dyn Read) -> Result<Vec<(String, String)>, SaveError> {
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        if !bytes.starts_with(SAVE_SIGNATURE) {
            return Err(SaveError::new(ErrorCode::NotSavedState));
        }
        let id_start = SAVE_SIGNATURE.len();
        let saved_id = bytes
            .get(id_start..id_start + IMAGE_ID_LEN)
            .ok_or(SaveError::new(ErrorCode::NotSavedState))?;
        if saved_id != &self.image.id[..] {
            return Err(SaveError::new(ErrorCode::WrongSavedState));
        }

        let mut rd = header(&bytes)?;
        let meta = metadata(&mut rd)?;
        let count = rd.u32()?;
        let mut saved = Vec::new();
        let mut seen = HashSet::new();
        for _ in 0..count {
            let id = ObjId(rd.u32()?);
            let meta_idx = rd.u16()?;
            let flags = rd.u8()?;
            let len = rd.u32()? as usize;
            let data = rd.take(len)?;
            if !id.is_valid() || !seen.insert(id) {
                return Err(SaveError::with(ErrorCode::SavedObjIdInvalid, id.0 as i64));
            }
            let metaclass = self
                .metaclasses
                .get(meta_idx as usize)
                .and_then(|m| m.meta)
                .ok_or(SaveError::new(ErrorCode::BadSavedState))?;
            let body = ObjectBody::load(metaclass, data)?;
            let mut obj_flags = ObjectFlags::empty();
            if flags & SAVED_IMAGE != 0 {
                obj_flags |= ObjectFlags::IMAGE;
            }
            if flags & SAVED_TRANSIENT != 0 {
                return Err(SaveError::new(ErrorCode::BadSavedState));
            }
            saved.push(SavedObject { id, body, flags: obj_flags });
        }
        if rd.remaining() != 0 {
            return Err(SaveError::new(ErrorCode::BadSavedState));
        }

        // validated; now replace the persistent heap
        self.relocate_transients(&seen);
        let stale: Vec<ObjId> = self
            .heap
            .objects()
            .iter()
            .filter(|(id, e)| !e.is_transient() && !seen.contains(id))
            .map(|(id, _)| id)
            .collect();
        for id in &stale {
            self.heap.objects_mut().remove(*id);
        }
        for obj in saved {
            self.heap.objects_mut().insert_at(obj.id, obj.body, obj.flags);
        }
        self.heap.clear_undo();
        self.rekey_tables();
        self.index_class_objects();
        log::info!("restore: {count} objects, {} removed", stale.len());
        Ok(meta)
    }

    /// Move transient objects sitting on ids in `claimed` to fresh ids
    /// above every id in use, rewriting the references other transients
    /// and the VM's roots hold to them.
    fn relocate_transients(&mut self, claimed: &HashSet<ObjId>) {
        let clashing: Vec<ObjId> = claimed
            .iter()
            .copied()
            .filter(|id| self.heap.is_transient(*id))
            .collect();
        if clashing.is_empty() {
            return;
        }
        let mut next = claimed
            .iter()
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(1)
            .max(self.heap.objects().id_limit());
        let mut moved = HashMap::new();
        for old in clashing {
            if let Some(entry) = self.heap.objects_mut().remove(old) {
                let new = ObjId(next);
                next += 1;
                self.heap.objects_mut().insert_at(new, entry.body, entry.flags);
                moved.insert(old, new);
            }
        }

        let mut remap = |v: Val| match v {
            Val::Obj(id) => Val::Obj(moved.get(&id).copied().unwrap_or(id)),
            other => other,
        };
        let transients: Vec<ObjId> = self
            .heap
            .objects()
            .iter()
            .filter(|(_, e)| e.is_transient())
            .map(|(id, _)| id)
            .collect();
        for id in transients {
            if let Some(body) = self.heap.objects_mut().body_mut(id) {
                body.remap_refs(&mut remap);
            }
        }
        for v in self.stack.iter_mut().chain(self.scratch.iter_mut()).chain(self.globals.iter_mut()) {
            *v = remap(*v);
        }
        self.r0 = remap(self.r0);
        self.say_func = remap(self.say_func);
        self.trace_exc = self.trace_exc.map(|id| moved.get(&id).copied().unwrap_or(id));
        log::debug!("restore: relocated {} transient objects", moved.len());
    }

    /// Reset every image object to its load-time state and drop all
    /// persistent objects created since.
    pub fn restart(&mut self) -> Result<(), ImageError> {
        let dynamic: Vec<ObjId> = self
            .heap
            .objects()
            .iter()
            .filter(|(_, e)| !e.is_transient() && !e.flags.contains(ObjectFlags::IMAGE))
            .map(|(id, _)| id)
            .collect();
        for id in &dynamic {
            self.heap.objects_mut().remove(*id);
        }
        self.heap.clear_undo();
        self.load_image_objects()?;
        log::info!("restart: {} dynamic objects removed", dynamic.len());
        Ok(())
    }
}

impl From<ImageError> for RuntimeError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Format { code, params } => RuntimeError::Vm { code, params },
            ImageError::Io(e) => RuntimeError::with(ErrorCode::BadValBif, e.to_string()),
        }
    }
}
