use crate::value::{ObjId, PropId, Val};

/// Read-only view of the object graph that property lookup walks.
pub trait ObjectGraph {
    /// Direct superclasses of a program-defined object, or `None` for
    /// objects without a superclass list.
    fn superclasses(&self, obj: ObjId) -> Option<&[ObjId]>;

    /// The value stored directly on `obj` for `prop`.
    fn own_prop(&self, obj: ObjId, prop: PropId) -> Option<Val>;
}

/// The result of a property lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// Property was not found.
    None,
    /// Property was found.
    Found {
        /// The object that defines the property (may differ from the
        /// receiver if it was found in a superclass).
        holder: ObjId,
        value: Val,
    },
}

impl LookupResult {
    pub fn is_found(&self) -> bool {
        matches!(self, LookupResult::Found { .. })
    }
}

/// Inheritance search order of `obj`: the object itself, then each
/// superclass's full ancestry left to right, depth first. An object
/// reachable along several paths appears only at its first position.
pub fn linearize<G: ObjectGraph + ?Sized>(graph: &G, obj: ObjId) -> Vec<ObjId> {
    let mut order = Vec::new();
    visit(graph, obj, &mut order);
    order
}

fn visit<G: ObjectGraph + ?Sized>(graph: &G, obj: ObjId, order: &mut Vec<ObjId>) {
    // Cycle check.
    if order.contains(&obj) {
        return;
    }
    order.push(obj);
    if let Some(supers) = graph.superclasses(obj) {
        for &sc in supers {
            visit(graph, sc, order);
        }
    }
}

/// Look up `prop` on `obj` and its superclasses in search order.
pub fn find_prop<G: ObjectGraph + ?Sized>(graph: &G, obj: ObjId, prop: PropId) -> LookupResult {
    let mut visited = Vec::new();
    search(graph, obj, prop, &mut visited)
}

fn search<G: ObjectGraph + ?Sized>(
    graph: &G,
    obj: ObjId,
    prop: PropId,
    visited: &mut Vec<ObjId>,
) -> LookupResult {
    if visited.contains(&obj) {
        return LookupResult::None;
    }
    visited.push(obj);

    if let Some(value) = graph.own_prop(obj, prop) {
        return LookupResult::Found { holder: obj, value };
    }
    if let Some(supers) = graph.superclasses(obj) {
        for &sc in supers {
            let found = search(graph, sc, prop, visited);
            if found.is_found() {
                return found;
            }
        }
    }
    LookupResult::None
}

/// Look up `prop` for `inherited`: search `self_obj`'s order starting just
/// after `defining`.
///
/// If `defining` is not in `self_obj`'s ancestry (the method was reached by
/// delegation), the search continues with `defining`'s own superclasses.
pub fn find_inherited<G: ObjectGraph + ?Sized>(
    graph: &G,
    self_obj: ObjId,
    prop: PropId,
    defining: ObjId,
) -> LookupResult {
    let mut order = linearize(graph, self_obj);
    let start = match order.iter().position(|&o| o == defining) {
        Some(pos) => pos + 1,
        None => {
            order = linearize(graph, defining);
            1
        }
    };
    for &obj in &order[start..] {
        if let Some(value) = graph.own_prop(obj, prop) {
            return LookupResult::Found { holder: obj, value };
        }
    }
    LookupResult::None
}

/// Whether `obj` is `class` or inherits from it.
pub fn is_instance_of<G: ObjectGraph + ?Sized>(graph: &G, obj: ObjId, class: ObjId) -> bool {
    obj == class || linearize(graph, obj).contains(&class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Graph {
        supers: HashMap<ObjId, Vec<ObjId>>,
        props: HashMap<(ObjId, PropId), Val>,
    }

    impl Graph {
        fn class(&mut self, id: u32, supers: &[u32]) -> ObjId {
            let id = ObjId(id);
            self.supers.insert(id, supers.iter().map(|&s| ObjId(s)).collect());
            id
        }

        fn define(&mut self, obj: ObjId, prop: u16, val: Val) {
            self.props.insert((obj, PropId(prop)), val);
        }
    }

    impl ObjectGraph for Graph {
        fn superclasses(&self, obj: ObjId) -> Option<&[ObjId]> {
            self.supers.get(&obj).map(|v| v.as_slice())
        }

        fn own_prop(&self, obj: ObjId, prop: PropId) -> Option<Val> {
            self.props.get(&(obj, prop)).copied()
        }
    }

    /// A, B(A), C(A), D(B, C)
    fn diamond() -> (Graph, [ObjId; 4]) {
        let mut g = Graph::default();
        let a = g.class(1, &[]);
        let b = g.class(2, &[1]);
        let c = g.class(3, &[1]);
        let d = g.class(4, &[2, 3]);
        (g, [a, b, c, d])
    }

    #[test]
    fn depth_first_left_to_right() {
        let (g, [a, b, c, d]) = diamond();
        assert_eq!(linearize(&g, d), vec![d, b, a, c]);
    }

    #[test]
    fn found_on_first_definer() {
        let (mut g, [a, b, c, d]) = diamond();
        g.define(a, 10, Val::Int(1));
        g.define(c, 10, Val::Int(3));

        // A precedes C in D's order
        assert_eq!(find_prop(&g, d, PropId(10)), LookupResult::Found { holder: a, value: Val::Int(1) });
        assert_eq!(find_prop(&g, c, PropId(10)), LookupResult::Found { holder: c, value: Val::Int(3) });
        assert_eq!(find_prop(&g, b, PropId(11)), LookupResult::None);
    }

    #[test]
    fn inherited_continues_after_definer() {
        let (mut g, [a, b, c, d]) = diamond();
        for obj in [a, b, c, d] {
            g.define(obj, 20, Val::Int(obj.0 as i32));
        }
        assert_eq!(
            find_inherited(&g, d, PropId(20), d),
            LookupResult::Found { holder: b, value: Val::Int(2) }
        );
        assert_eq!(
            find_inherited(&g, d, PropId(20), b),
            LookupResult::Found { holder: a, value: Val::Int(1) }
        );
        assert_eq!(
            find_inherited(&g, d, PropId(20), a),
            LookupResult::Found { holder: c, value: Val::Int(3) }
        );
        assert_eq!(find_inherited(&g, d, PropId(20), c), LookupResult::None);
    }

    #[test]
    fn inherited_from_foreign_definer() {
        let (mut g, [a, b, _, _]) = diamond();
        let other = g.class(9, &[]);
        g.define(a, 5, Val::True);
        assert_eq!(
            find_inherited(&g, other, PropId(5), b),
            LookupResult::Found { holder: a, value: Val::True }
        );
    }

    #[test]
    fn instance_of() {
        let (g, [a, b, c, d]) = diamond();
        assert!(is_instance_of(&g, d, a));
        assert!(is_instance_of(&g, d, d));
        assert!(!is_instance_of(&g, b, c));
    }

    #[test]
    fn cycles_terminate() {
        let mut g = Graph::default();
        let x = g.class(1, &[2]);
        let y = g.class(2, &[1]);
        assert_eq!(linearize(&g, x), vec![x, y]);
        assert_eq!(find_prop(&g, x, PropId(1)), LookupResult::None);
    }
}
