//! Object storage for the VM: the object table, the garbage collector and
//! the undo log, combined in [`Heap`].
//!
//! All mutations of persistent objects that must be undoable go through the
//! `Heap` methods, which append undo records before changing the object.

mod gc;
mod table;
mod undo;

pub use gc::{GarbageCollectionStats, RootProvider};
pub use table::{ObjectEntry, ObjectFlags, ObjectTable};
pub use undo::{NoSavepoint, UndoLog, UndoRecord};

use object::{LookupKey, Metaclass, ObjId, ObjectBody, PropId, Val};

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSettings {
    /// Allocations between automatic collections.
    pub gc_interval: usize,
    /// Capacity of the undo ring, in records.
    pub undo_records: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            gc_interval: 2000,
            undo_records: 16384,
        }
    }
}

// ── Heap ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Heap {
    objects: ObjectTable,
    undo: UndoLog,
    settings: HeapSettings,
    allocs_since_gc: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapSettings::default())
    }
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Self {
        Self {
            objects: ObjectTable::new(),
            undo: UndoLog::new(settings.undo_records),
            settings,
            allocs_since_gc: 0,
        }
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline]
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// Raw table access. Changes made through it are not undoable.
    #[inline]
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    // ── Allocation ──

    pub fn alloc(&mut self, body: ObjectBody) -> ObjId {
        self.alloc_with(body, ObjectFlags::empty())
    }

    pub fn alloc_transient(&mut self, body: ObjectBody) -> ObjId {
        self.alloc_with(body, ObjectFlags::TRANSIENT)
    }

    pub fn alloc_with(&mut self, body: ObjectBody, flags: ObjectFlags) -> ObjId {
        self.allocs_since_gc += 1;
        self.objects.alloc(body, flags)
    }

    /// Whether enough allocations happened since the last collection that
    /// the VM should collect at its next safe point.
    pub fn should_collect(&self) -> bool {
        self.allocs_since_gc >= self.settings.gc_interval
    }

    pub fn collect(&mut self, roots: &mut dyn RootProvider) -> GarbageCollectionStats {
        let mut extra = Vec::new();
        self.undo.for_each_val(&mut |v| extra.push(v));
        let stats = gc::collect(&mut self.objects, roots, &extra);
        self.allocs_since_gc = 0;
        log::debug!("gc: {stats}");
        stats
    }

    // ── Access ──

    #[inline]
    pub fn get(&self, id: ObjId) -> Option<&ObjectBody> {
        self.objects.body(id)
    }

    #[inline]
    pub fn metaclass(&self, id: ObjId) -> Option<Metaclass> {
        self.objects.metaclass(id)
    }

    #[inline]
    pub fn is_transient(&self, id: ObjId) -> bool {
        self.objects.is_transient(id)
    }

    pub fn set_transient(&mut self, id: ObjId) {
        if let Some(entry) = self.objects.get_mut(id) {
            entry.flags.insert(ObjectFlags::TRANSIENT);
        }
    }

    fn record(&mut self, id: ObjId, record: impl FnOnce() -> UndoRecord) {
        if self.undo.has_savepoint() && !self.objects.is_transient(id) {
            self.undo.record(record());
        }
    }

    // ── Recorded mutations ──

    /// Store a property directly on a program-defined object. Returns
    /// `false` if `obj` has no property table.
    pub fn set_prop(&mut self, obj: ObjId, prop: PropId, val: Val) -> bool {
        let Some(old) = self
            .objects
            .body(obj)
            .and_then(|b| b.as_tads())
            .map(|t| t.props.get(&prop).copied())
        else {
            return false;
        };
        self.record(obj, || UndoRecord::Prop { obj, prop, old });
        if let Some(tads) = self.objects.body_mut(obj).and_then(|b| b.as_tads_mut()) {
            tads.props.insert(prop, val);
        }
        true
    }

    /// Store into an existing element of a vector. Returns `false` if `obj`
    /// is not a vector or `index` is out of range.
    pub fn set_element(&mut self, obj: ObjId, index: usize, val: Val) -> bool {
        let old = match self.objects.body(obj) {
            Some(ObjectBody::Vector(v)) => match v.get(index) {
                Some(old) => *old,
                None => return false,
            },
            _ => return false,
        };
        self.record(obj, || UndoRecord::Element { obj, index, old });
        if let Some(ObjectBody::Vector(v)) = self.objects.body_mut(obj) {
            v[index] = val;
        }
        true
    }

    /// Insert or replace a lookup-table entry.
    pub fn table_insert(&mut self, obj: ObjId, key: LookupKey, key_val: Val, val: Val) -> bool {
        let Some(old) = self
            .objects
            .body(obj)
            .and_then(|b| b.as_lookup_table())
            .map(|t| t.entry(&key))
        else {
            return false;
        };
        let undo_key = key.clone();
        self.record(obj, || UndoRecord::TableEntry { obj, key: undo_key, old });
        if let Some(t) = self.objects.body_mut(obj).and_then(|b| b.as_lookup_table_mut()) {
            t.insert(key, key_val, val);
        }
        true
    }

    /// Remove a lookup-table entry, returning its value.
    pub fn table_remove(&mut self, obj: ObjId, key: &LookupKey) -> Option<Val> {
        let old = self.objects.body(obj)?.as_lookup_table()?.entry(key)?;
        self.record(obj, || UndoRecord::TableEntry {
            obj,
            key: key.clone(),
            old: Some(old),
        });
        self.objects
            .body_mut(obj)?
            .as_lookup_table_mut()?
            .remove(key)
            .map(|(_, v)| v)
    }

    /// Apply `f` to an object's body after recording its full pre-image.
    pub fn modify<R>(&mut self, obj: ObjId, f: impl FnOnce(&mut ObjectBody) -> R) -> Option<R> {
        let snapshot = self.objects.body(obj)?.clone();
        self.record(obj, || UndoRecord::Snapshot {
            obj,
            body: Box::new(snapshot),
        });
        self.objects.body_mut(obj).map(f)
    }

    // ── Undo ──

    pub fn savepoint(&mut self) {
        self.undo.savepoint();
        log::debug!("undo: savepoint {}", self.undo.savepoints());
    }

    /// Roll back to the most recent savepoint. Returns the number of
    /// records applied.
    pub fn undo(&mut self) -> Result<usize, NoSavepoint> {
        let records = self.undo.pop_savepoint()?;
        let applied = records.len();
        for record in records {
            self.apply(record);
        }
        log::debug!("undo: applied {applied} records");
        Ok(applied)
    }

    pub fn clear_undo(&mut self) {
        self.undo.clear();
    }

    fn apply(&mut self, record: UndoRecord) {
        match record {
            UndoRecord::Savepoint => {}
            UndoRecord::Prop { obj, prop, old } => {
                if let Some(tads) = self.objects.body_mut(obj).and_then(|b| b.as_tads_mut()) {
                    match old {
                        Some(v) => tads.props.insert(prop, v),
                        None => tads.props.remove(&prop),
                    };
                }
            }
            UndoRecord::Element { obj, index, old } => {
                if let Some(ObjectBody::Vector(v)) = self.objects.body_mut(obj) {
                    if let Some(slot) = v.get_mut(index) {
                        *slot = old;
                    }
                }
            }
            UndoRecord::TableEntry { obj, key, old } => {
                if let Some(t) = self.objects.body_mut(obj).and_then(|b| b.as_lookup_table_mut()) {
                    match old {
                        Some((k, v)) => t.insert(key, k, v),
                        None => t.remove(&key),
                    };
                }
            }
            UndoRecord::Snapshot { obj, body } => {
                if let Some(slot) = self.objects.body_mut(obj) {
                    *slot = *body;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{LookupTable, TadsObject};

    struct NoRoots;

    impl RootProvider for NoRoots {
        fn visit_roots(&mut self, _visitor: &mut dyn FnMut(Val)) {}
    }

    fn prop_of(heap: &Heap, obj: ObjId, prop: PropId) -> Option<Val> {
        heap.get(obj)?.as_tads()?.props.get(&prop).copied()
    }

    #[test]
    fn undo_property_store() {
        let mut heap = Heap::default();
        let p = PropId(7);
        let o = heap.alloc(ObjectBody::Tads(TadsObject::new(vec![]).with_prop(p, Val::Int(1))));

        heap.savepoint();
        assert!(heap.set_prop(o, p, Val::Int(2)));
        assert!(heap.set_prop(o, PropId(8), Val::True));
        assert_eq!(prop_of(&heap, o, p), Some(Val::Int(2)));

        assert_eq!(heap.undo(), Ok(2));
        assert_eq!(prop_of(&heap, o, p), Some(Val::Int(1)));
        assert_eq!(prop_of(&heap, o, PropId(8)), None);
        assert_eq!(heap.undo(), Err(NoSavepoint));
    }

    #[test]
    fn transient_objects_are_not_recorded() {
        let mut heap = Heap::default();
        let o = heap.alloc_transient(ObjectBody::Tads(TadsObject::new(vec![])));
        heap.savepoint();
        heap.set_prop(o, PropId(1), Val::Int(5));
        assert_eq!(heap.undo(), Ok(0));
        assert_eq!(prop_of(&heap, o, PropId(1)), Some(Val::Int(5)));
    }

    #[test]
    fn undo_vector_and_table() {
        let mut heap = Heap::default();
        let v = heap.alloc(ObjectBody::Vector(vec![Val::Int(1), Val::Int(2)]));
        let t = heap.alloc(ObjectBody::LookupTable(LookupTable::new()));
        let key = LookupKey::Val(Val::Int(1));

        heap.savepoint();
        assert!(heap.set_element(v, 1, Val::Nil));
        assert!(!heap.set_element(v, 5, Val::Nil));
        assert!(heap.table_insert(t, key.clone(), Val::Int(1), Val::True));
        heap.modify(v, |b| {
            if let ObjectBody::Vector(items) = b {
                items.push(Val::Int(3));
            }
        });

        heap.undo().expect("undo");
        assert_eq!(heap.get(v), Some(&ObjectBody::Vector(vec![Val::Int(1), Val::Int(2)])));
        assert_eq!(heap.get(t).and_then(|b| b.as_lookup_table()).map(|t| t.len()), Some(0));
    }

    #[test]
    fn undo_records_keep_objects_alive() {
        let mut heap = Heap::default();
        let holder = heap.alloc_with(ObjectBody::Tads(TadsObject::new(vec![])), ObjectFlags::IMAGE);
        let old = heap.alloc(ObjectBody::String(b"old".to_vec()));
        heap.set_prop(holder, PropId(1), Val::Obj(old));

        heap.savepoint();
        heap.set_prop(holder, PropId(1), Val::Nil);
        let stats = heap.collect(&mut NoRoots);
        assert_eq!(stats.freed, 0);

        heap.undo().expect("undo");
        assert_eq!(prop_of(&heap, holder, PropId(1)), Some(Val::Obj(old)));
        assert!(heap.objects().is_live(old));
    }

    #[test]
    fn collection_is_scheduled_by_allocations() {
        let mut heap = Heap::new(HeapSettings { gc_interval: 2, ..HeapSettings::default() });
        heap.alloc(ObjectBody::List(vec![]));
        assert!(!heap.should_collect());
        heap.alloc(ObjectBody::List(vec![]));
        assert!(heap.should_collect());
        heap.collect(&mut NoRoots);
        assert!(!heap.should_collect());
        assert!(heap.objects().is_empty());
    }
}
