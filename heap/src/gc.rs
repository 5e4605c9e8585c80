//! Mark-sweep collection over the [`ObjectTable`].
//!
//! Objects never move, so roots are only visited, never rewritten. The root
//! set is the union of:
//! - whatever a [`RootProvider`] reports (value stack, `R0`, host globals),
//! - every object loaded from the image,
//! - every value held by the undo log.

use core::fmt;

use object::{ObjId, Val};

use crate::table::{ObjectFlags, ObjectTable};

/// Supplies the roots the heap cannot see on its own.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(Val));
}

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GarbageCollectionStats {
    pub marked: usize,
    pub freed: usize,
    pub live: usize,
}

impl fmt::Display for GarbageCollectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marked {} freed {} live {}", self.marked, self.freed, self.live)
    }
}

// ── Mark ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Marker {
    worklist: Vec<ObjId>,
    marked: usize,
}

impl Marker {
    fn push(&mut self, table: &mut ObjectTable, id: ObjId) {
        let Some(entry) = table.get_mut(id) else {
            return;
        };
        if entry.flags.contains(ObjectFlags::MARK) {
            return;
        }
        entry.flags.insert(ObjectFlags::MARK);
        self.marked += 1;
        self.worklist.push(id);
    }

    fn drain(&mut self, table: &mut ObjectTable) {
        let mut refs = Vec::new();
        while let Some(id) = self.worklist.pop() {
            if let Some(body) = table.body(id) {
                body.for_each_ref(&mut |r| refs.push(r));
            }
            for r in refs.drain(..) {
                self.push(table, r);
            }
        }
    }
}

/// Mark everything reachable from `roots` plus `extra` and image objects,
/// then free the rest.
pub(crate) fn collect(
    table: &mut ObjectTable,
    roots: &mut dyn RootProvider,
    extra: &[Val],
) -> GarbageCollectionStats {
    let mut marker = Marker::default();

    let image: Vec<ObjId> = table
        .iter()
        .filter(|(_, e)| e.flags.contains(ObjectFlags::IMAGE))
        .map(|(id, _)| id)
        .collect();
    for id in image {
        marker.push(table, id);
    }

    let mut root_ids = Vec::new();
    roots.visit_roots(&mut |v| {
        if let Val::Obj(id) = v {
            root_ids.push(id);
        }
    });
    root_ids.extend(extra.iter().filter_map(|v| v.as_obj()));
    for id in root_ids {
        marker.push(table, id);
    }

    marker.drain(table);

    // ── Sweep ──
    let dead: Vec<ObjId> = table
        .slots_mut()
        .filter_map(|(id, entry)| {
            if entry.flags.contains(ObjectFlags::MARK) {
                entry.flags.remove(ObjectFlags::MARK);
                None
            } else {
                Some(id)
            }
        })
        .collect();
    for &id in &dead {
        table.remove(id);
    }

    GarbageCollectionStats {
        marked: marker.marked,
        freed: dead.len(),
        live: table.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{ObjectBody, PropId, TadsObject};

    struct Roots(Vec<Val>);

    impl RootProvider for Roots {
        fn visit_roots(&mut self, visitor: &mut dyn FnMut(Val)) {
            self.0.iter().for_each(|v| visitor(*v));
        }
    }

    fn list(items: Vec<Val>) -> ObjectBody {
        ObjectBody::List(items)
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let mut t = ObjectTable::new();
        let leaf = t.alloc(ObjectBody::String(b"leaf".to_vec()), ObjectFlags::empty());
        let root = t.alloc(list(vec![Val::Obj(leaf)]), ObjectFlags::empty());
        let garbage = t.alloc(list(vec![]), ObjectFlags::empty());

        let stats = collect(&mut t, &mut Roots(vec![Val::Obj(root)]), &[]);
        assert_eq!(stats, GarbageCollectionStats { marked: 2, freed: 1, live: 2 });
        assert!(t.is_live(leaf) && t.is_live(root));
        assert!(!t.is_live(garbage));
        // marks are cleared for the next cycle
        assert!(t.iter().all(|(_, e)| !e.flags.contains(ObjectFlags::MARK)));
    }

    #[test]
    fn cycles_and_image_roots() {
        let mut t = ObjectTable::new();
        let a = t.alloc(ObjectBody::Tads(TadsObject::new(vec![])), ObjectFlags::empty());
        let b = t.alloc(
            ObjectBody::Tads(TadsObject::new(vec![]).with_prop(PropId(1), Val::Obj(a))),
            ObjectFlags::empty(),
        );
        if let Some(obj) = t.body_mut(a).and_then(|b| b.as_tads_mut()) {
            obj.props.insert(PropId(1), Val::Obj(b));
        }
        let image = t.alloc(ObjectBody::Tads(TadsObject::new(vec![])), ObjectFlags::IMAGE);

        let stats = collect(&mut t, &mut Roots(vec![]), &[]);
        assert_eq!(stats.freed, 2);
        assert!(t.is_live(image));
    }

    #[test]
    fn extra_roots_keep_objects() {
        let mut t = ObjectTable::new();
        let kept = t.alloc(list(vec![]), ObjectFlags::TRANSIENT);
        let stats = collect(&mut t, &mut Roots(vec![Val::Int(3)]), &[Val::Obj(kept)]);
        assert_eq!(stats.live, 1);
        assert!(t.is_live(kept));
    }
}
