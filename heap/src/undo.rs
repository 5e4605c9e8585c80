use core::fmt;
use std::collections::VecDeque;

use object::{LookupKey, ObjId, ObjectBody, PropId, Val};

/// One entry of the undo log. Each mutation record holds the pre-image
/// needed to reverse it.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoRecord {
    Savepoint,
    /// A property store; `old` is `None` if the property was absent.
    Prop {
        obj: ObjId,
        prop: PropId,
        old: Option<Val>,
    },
    /// An in-place element store into a vector.
    Element { obj: ObjId, index: usize, old: Val },
    /// A lookup-table store or removal; `old` is the previous
    /// `(key, value)` entry if there was one.
    TableEntry {
        obj: ObjId,
        key: LookupKey,
        old: Option<(Val, Val)>,
    },
    /// Whole-object pre-image, for mutations without a finer record.
    Snapshot { obj: ObjId, body: Box<ObjectBody> },
}

impl UndoRecord {
    pub fn object(&self) -> Option<ObjId> {
        match self {
            UndoRecord::Savepoint => None,
            UndoRecord::Prop { obj, .. }
            | UndoRecord::Element { obj, .. }
            | UndoRecord::TableEntry { obj, .. }
            | UndoRecord::Snapshot { obj, .. } => Some(*obj),
        }
    }

    /// Values held by this record, for GC tracing.
    fn for_each_val(&self, f: &mut dyn FnMut(Val)) {
        match self {
            UndoRecord::Savepoint => {}
            UndoRecord::Prop { obj, old, .. } => {
                f(Val::Obj(*obj));
                if let Some(v) = old {
                    f(*v);
                }
            }
            UndoRecord::Element { obj, old, .. } => {
                f(Val::Obj(*obj));
                f(*old);
            }
            UndoRecord::TableEntry { obj, key, old } => {
                f(Val::Obj(*obj));
                if let LookupKey::Val(v) = key {
                    f(*v);
                }
                if let Some((k, v)) = old {
                    f(*k);
                    f(*v);
                }
            }
            UndoRecord::Snapshot { obj, body } => {
                f(Val::Obj(*obj));
                body.for_each_ref(&mut |id| f(Val::Obj(id)));
            }
        }
    }
}

/// Undo was requested but the log holds no savepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSavepoint;

impl fmt::Display for NoSavepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no undo information is available")
    }
}

impl std::error::Error for NoSavepoint {}

/// Bounded ring of undo records.
///
/// Mutations are only recorded while at least one savepoint exists. When
/// the ring is full the oldest savepoint is dropped together with all of
/// its records, so every remaining savepoint can still be rolled back
/// completely.
#[derive(Debug)]
pub struct UndoLog {
    records: VecDeque<UndoRecord>,
    capacity: usize,
    savepoints: usize,
}

impl UndoLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            savepoints: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn savepoints(&self) -> usize {
        self.savepoints
    }

    pub fn has_savepoint(&self) -> bool {
        self.savepoints > 0
    }

    pub fn savepoint(&mut self) {
        self.push(UndoRecord::Savepoint);
        self.savepoints += 1;
    }

    /// Append a mutation record. Ignored when there is no savepoint.
    pub fn record(&mut self, record: UndoRecord) {
        if self.savepoints == 0 {
            return;
        }
        self.push(record);
    }

    fn push(&mut self, record: UndoRecord) {
        while self.records.len() >= self.capacity {
            self.drop_oldest_savepoint();
        }
        // a mutation whose savepoint was just evicted has nothing to belong to
        if self.savepoints == 0 && record != UndoRecord::Savepoint {
            return;
        }
        self.records.push_back(record);
    }

    fn drop_oldest_savepoint(&mut self) {
        // leading records belong to the oldest savepoint
        if let Some(UndoRecord::Savepoint) = self.records.pop_front() {
            self.savepoints -= 1;
        }
        while let Some(front) = self.records.front() {
            if *front == UndoRecord::Savepoint {
                break;
            }
            self.records.pop_front();
        }
    }

    /// Remove the records made since the latest savepoint, newest first,
    /// along with the savepoint itself.
    pub fn pop_savepoint(&mut self) -> Result<Vec<UndoRecord>, NoSavepoint> {
        if self.savepoints == 0 {
            return Err(NoSavepoint);
        }
        let mut out = Vec::new();
        while let Some(record) = self.records.pop_back() {
            if record == UndoRecord::Savepoint {
                self.savepoints -= 1;
                return Ok(out);
            }
            out.push(record);
        }
        self.savepoints = 0;
        Ok(out)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.savepoints = 0;
    }

    /// Drop records that reference `obj`. Used when transient objects are
    /// excluded or objects are replaced wholesale.
    pub fn forget(&mut self, obj: ObjId) {
        self.records.retain(|r| r.object() != Some(obj));
    }

    pub fn for_each_val(&self, f: &mut dyn FnMut(Val)) {
        for r in &self.records {
            r.for_each_val(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(obj: u32, old: i32) -> UndoRecord {
        UndoRecord::Prop {
            obj: ObjId(obj),
            prop: PropId(1),
            old: Some(Val::Int(old)),
        }
    }

    #[test]
    fn nothing_recorded_without_savepoint() {
        let mut log = UndoLog::new(8);
        log.record(prop(1, 0));
        assert!(log.is_empty());
        assert_eq!(log.pop_savepoint(), Err(NoSavepoint));
    }

    #[test]
    fn pop_returns_newest_first() {
        let mut log = UndoLog::new(8);
        log.savepoint();
        log.record(prop(1, 1));
        log.savepoint();
        log.record(prop(1, 2));
        log.record(prop(1, 3));

        assert_eq!(log.pop_savepoint(), Ok(vec![prop(1, 3), prop(1, 2)]));
        assert_eq!(log.pop_savepoint(), Ok(vec![prop(1, 1)]));
        assert_eq!(log.pop_savepoint(), Err(NoSavepoint));
    }

    #[test]
    fn overflow_drops_oldest_savepoint_whole() {
        let mut log = UndoLog::new(4);
        log.savepoint();
        log.record(prop(1, 1));
        log.savepoint();
        log.record(prop(2, 2));
        // full; the first savepoint and its record go
        log.record(prop(2, 3));
        assert_eq!(log.savepoints(), 1);
        assert_eq!(log.pop_savepoint(), Ok(vec![prop(2, 3), prop(2, 2)]));
        assert_eq!(log.pop_savepoint(), Err(NoSavepoint));
    }

    #[test]
    fn overflow_of_single_savepoint_discards_it() {
        let mut log = UndoLog::new(2);
        log.savepoint();
        log.record(prop(1, 1));
        log.record(prop(1, 2));
        assert!(!log.has_savepoint());
        assert!(log.is_empty());
    }

    #[test]
    fn traced_values() {
        let mut log = UndoLog::new(8);
        log.savepoint();
        log.record(UndoRecord::Element {
            obj: ObjId(4),
            index: 0,
            old: Val::Obj(ObjId(5)),
        });
        let mut seen = Vec::new();
        log.for_each_val(&mut |v| seen.push(v));
        assert_eq!(seen, vec![Val::Obj(ObjId(4)), Val::Obj(ObjId(5))]);
    }
}
