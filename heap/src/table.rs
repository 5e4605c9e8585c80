use bitflags::bitflags;

use object::{Metaclass, ObjId, ObjectBody, ObjectGraph, PropId, Val};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u8 {
        /// Excluded from save, restore and undo.
        const TRANSIENT = 1 << 0;
        /// Loaded from the image; part of the root set.
        const IMAGE = 1 << 1;
        /// Reached during the current GC mark phase.
        const MARK = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub body: ObjectBody,
    pub flags: ObjectFlags,
}

impl ObjectEntry {
    pub fn is_transient(&self) -> bool {
        self.flags.contains(ObjectFlags::TRANSIENT)
    }
}

/// The object table: slot storage indexed by [`ObjId`].
///
/// Slot 0 is never used so that `ObjId(0)` stays invalid. Freed slots are
/// recycled through a free list.
#[derive(Debug, Default)]
pub struct ObjectTable {
    slots: Vec<Option<ObjectEntry>>,
    free: Vec<u32>,
    live: usize,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            free: Vec::new(),
            live: 0,
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn alloc(&mut self, body: ObjectBody, flags: ObjectFlags) -> ObjId {
        let entry = ObjectEntry { body, flags };
        while let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            if slot.is_none() {
                *slot = Some(entry);
                self.live += 1;
                return ObjId(idx);
            }
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Some(entry));
        self.live += 1;
        ObjId(idx)
    }

    /// Place an object at a fixed id, replacing whatever was there. Used by
    /// the image loader and restore.
    pub fn insert_at(&mut self, id: ObjId, body: ObjectBody, flags: ObjectFlags) {
        let idx = id.0 as usize;
        if idx == 0 {
            return;
        }
        if idx >= self.slots.len() {
            let old_len = self.slots.len();
            self.slots.resize(idx + 1, None);
            self.free.extend(old_len as u32..idx as u32);
        }
        if self.slots[idx].is_none() {
            self.live += 1;
        }
        self.slots[idx] = Some(ObjectEntry { body, flags });
    }

    pub fn remove(&mut self, id: ObjId) -> Option<ObjectEntry> {
        let entry = self.slots.get_mut(id.0 as usize)?.take()?;
        self.free.push(id.0);
        self.live -= 1;
        Some(entry)
    }

    #[inline]
    pub fn get(&self, id: ObjId) -> Option<&ObjectEntry> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: ObjId) -> Option<&mut ObjectEntry> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }

    #[inline]
    pub fn body(&self, id: ObjId) -> Option<&ObjectBody> {
        self.get(id).map(|e| &e.body)
    }

    #[inline]
    pub fn body_mut(&mut self, id: ObjId) -> Option<&mut ObjectBody> {
        self.get_mut(id).map(|e| &mut e.body)
    }

    #[inline]
    pub fn is_live(&self, id: ObjId) -> bool {
        self.get(id).is_some()
    }

    pub fn metaclass(&self, id: ObjId) -> Option<Metaclass> {
        self.body(id).map(|b| b.metaclass())
    }

    pub fn is_transient(&self, id: ObjId) -> bool {
        self.get(id).is_some_and(|e| e.is_transient())
    }

    /// Live objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjId, &ObjectEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (ObjId(i as u32), e)))
    }

    pub fn ids(&self) -> Vec<ObjId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Upper bound (exclusive) of ids currently in use.
    pub fn id_limit(&self) -> u32 {
        self.slots.len() as u32
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = (ObjId, &mut ObjectEntry)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|e| (ObjId(i as u32), e)))
    }
}

impl ObjectGraph for ObjectTable {
    fn superclasses(&self, obj: ObjId) -> Option<&[ObjId]> {
        self.body(obj)?.as_tads().map(|t| t.superclasses.as_slice())
    }

    fn own_prop(&self, obj: ObjId, prop: PropId) -> Option<Val> {
        self.body(obj)?.as_tads()?.props.get(&prop).copied()
    }
}
