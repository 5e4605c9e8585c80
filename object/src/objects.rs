use std::collections::BTreeMap;

use crate::metaclass::Metaclass;
use crate::value::{DATAHOLDER_SIZE, DataReader, LoadDataError, ObjId, PropId, Val};

/// Object flag bit in `tads-object` image data: the object is a class.
pub const TADSOBJ_CLASS_FLAG: u16 = 0x0001;

/// Per-metaclass storage of one object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    Tads(TadsObject),
    String(Vec<u8>),
    List(Vec<Val>),
    Vector(Vec<Val>),
    LookupTable(LookupTable),
    IntrinsicClass(IntrinsicClass),
    IntClassMod(TadsObject),
    /// Element 0 is the function pointer; the rest is captured context.
    AnonFn(Vec<Val>),
}

// ── TadsObject ─────────────────────────────────────────────────────

/// A program-defined object: superclass list, property table, class flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TadsObject {
    pub superclasses: Vec<ObjId>,
    pub props: BTreeMap<PropId, Val>,
    pub is_class: bool,
}

impl TadsObject {
    pub fn new(superclasses: Vec<ObjId>) -> Self {
        Self { superclasses, ..Self::default() }
    }

    pub fn with_prop(mut self, prop: PropId, val: Val) -> Self {
        self.props.insert(prop, val);
        self
    }

    /// Image data: `sc_count:u16 prop_count:u16 flags:u16`, the superclass
    /// ids as `u32`s, then `(prop:u16, value:dataholder)` pairs.
    fn load(data: &[u8]) -> Result<Self, LoadDataError> {
        let mut r = DataReader::new(data);
        let sc_count = r.u16()? as usize;
        let prop_count = r.u16()? as usize;
        let flags = r.u16()?;
        let mut superclasses = Vec::with_capacity(sc_count);
        for _ in 0..sc_count {
            let id = ObjId(r.u32()?);
            if !id.is_valid() {
                return Err(LoadDataError::BadValue);
            }
            superclasses.push(id);
        }
        let mut props = BTreeMap::new();
        for _ in 0..prop_count {
            let prop = PropId(r.u16()?);
            if let Some(val) = r.dataholder()? {
                props.insert(prop, val);
            }
        }
        Ok(Self {
            superclasses,
            props,
            is_class: flags & TADSOBJ_CLASS_FLAG != 0,
        })
    }

    fn encode(&self, out: &mut Vec<u8>, filter: &mut dyn FnMut(Val) -> Val) {
        out.extend_from_slice(&(self.superclasses.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.props.len() as u16).to_le_bytes());
        let flags = if self.is_class { TADSOBJ_CLASS_FLAG } else { 0 };
        out.extend_from_slice(&flags.to_le_bytes());
        for sc in &self.superclasses {
            out.extend_from_slice(&sc.0.to_le_bytes());
        }
        for (prop, val) in &self.props {
            out.extend_from_slice(&prop.0.to_le_bytes());
            out.extend_from_slice(&filter(*val).to_dataholder());
        }
    }
}

// ── LookupTable ────────────────────────────────────────────────────

/// Hashing identity of a lookup-table key. Strings (constant or heap)
/// compare by content; everything else by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupKey {
    Str(Vec<u8>),
    Val(Val),
}

/// Associative table keyed by [`LookupKey`]. Each entry keeps the original
/// key value so it can be returned by `keysToList` and traced by the GC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupTable {
    entries: BTreeMap<LookupKey, (Val, Val)>,
    /// Value returned for missing keys.
    pub default: Val,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &LookupKey) -> Option<Val> {
        self.entries.get(key).map(|(_, v)| *v)
    }

    /// Entry for `key` as `(key value, value)`.
    pub fn entry(&self, key: &LookupKey) -> Option<(Val, Val)> {
        self.entries.get(key).copied()
    }

    /// Store `value` under `key`. Returns the previous entry.
    pub fn insert(&mut self, key: LookupKey, key_val: Val, value: Val) -> Option<(Val, Val)> {
        self.entries.insert(key, (key_val, value))
    }

    pub fn remove(&mut self, key: &LookupKey) -> Option<(Val, Val)> {
        self.entries.remove(key)
    }

    /// `(key, value)` pairs in a stable order.
    pub fn pairs(&self) -> impl Iterator<Item = (Val, Val)> + '_ {
        self.entries.values().copied()
    }

    /// Recompute every entry's [`LookupKey`].
    ///
    /// Image and save data only carry key values; string keys held in heap
    /// objects can only be resolved once all objects are loaded.
    pub fn rekey(&mut self, key_of: &dyn Fn(Val) -> LookupKey) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_values()
            .map(|(k, v)| (key_of(k), (k, v)))
            .collect();
    }

    /// Apply `f` to every key value, stored value and the default.
    fn remap(&mut self, f: &mut dyn FnMut(Val) -> Val) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .map(|(key, (k, v))| {
                let key = match key {
                    LookupKey::Val(kv) => LookupKey::Val(f(kv)),
                    other => other,
                };
                (key, (f(k), f(v)))
            })
            .collect();
        self.default = f(self.default);
    }

    /// Image data: `bucket_count:u16 value_count:u16 first_free:u16`,
    /// `bucket_count` bucket heads, `value_count` entries of
    /// `(key:dh, value:dh, next:u16)`, and an optional default value.
    /// Entries with an EMPTY key are free. Bucket chains are rebuilt rather
    /// than read.
    fn load(data: &[u8]) -> Result<Self, LoadDataError> {
        let mut r = DataReader::new(data);
        let bucket_count = r.u16()? as usize;
        let value_count = r.u16()? as usize;
        let _first_free = r.u16()?;
        r.take(bucket_count * 2)?;
        let mut table = LookupTable::new();
        for _ in 0..value_count {
            let key = r.dataholder()?;
            let value = r.dataholder()?;
            let _next = r.u16()?;
            if let Some(key) = key {
                table.insert(LookupKey::Val(key), key, value.unwrap_or(Val::Nil));
            }
        }
        if r.remaining() >= DATAHOLDER_SIZE {
            table.default = r.dataholder()?.unwrap_or(Val::Nil);
        }
        Ok(table)
    }

    fn encode(&self, out: &mut Vec<u8>, filter: &mut dyn FnMut(Val) -> Val) {
        let count = self.entries.len() as u16;
        // one bucket chaining every entry in order
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        let head: u16 = if count > 0 { 1 } else { 0 };
        out.extend_from_slice(&head.to_le_bytes());
        for (i, (k, v)) in self.entries.values().enumerate() {
            let key = filter(*k);
            out.extend_from_slice(&key.to_dataholder());
            out.extend_from_slice(&filter(*v).to_dataholder());
            let next = if i + 1 < count as usize { i as u16 + 2 } else { 0 };
            out.extend_from_slice(&next.to_le_bytes());
        }
        out.extend_from_slice(&filter(self.default).to_dataholder());
    }
}

// ── IntrinsicClass ─────────────────────────────────────────────────

/// First-class representative of a metaclass in the object graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntrinsicClass {
    /// Index into the image's metaclass dependency table.
    pub meta_idx: u16,
    /// Modifier object (`int-class-mod`) searched for program-defined
    /// extensions, or invalid.
    pub modifier: ObjId,
    pub class_state: Val,
}

impl IntrinsicClass {
    /// Image data: `size:u16 meta_idx:u16 modifier:u32` and an optional
    /// class-state dataholder.
    fn load(data: &[u8]) -> Result<Self, LoadDataError> {
        let mut r = DataReader::new(data);
        let _size = r.u16()?;
        let meta_idx = r.u16()?;
        let modifier = ObjId(r.u32()?);
        let class_state = if r.remaining() >= DATAHOLDER_SIZE {
            r.dataholder()?.unwrap_or(Val::Nil)
        } else {
            Val::Nil
        };
        Ok(Self { meta_idx, modifier, class_state })
    }

    fn encode(&self, out: &mut Vec<u8>, filter: &mut dyn FnMut(Val) -> Val) {
        out.extend_from_slice(&13u16.to_le_bytes());
        out.extend_from_slice(&self.meta_idx.to_le_bytes());
        out.extend_from_slice(&self.modifier.0.to_le_bytes());
        out.extend_from_slice(&filter(self.class_state).to_dataholder());
    }
}

// ── ObjectBody ─────────────────────────────────────────────────────

fn load_values(r: &mut DataReader<'_>, count: usize) -> Result<Vec<Val>, LoadDataError> {
    (0..count).map(|_| r.value()).collect()
}

fn encode_values(out: &mut Vec<u8>, vals: &[Val], filter: &mut dyn FnMut(Val) -> Val) {
    for v in vals {
        out.extend_from_slice(&filter(*v).to_dataholder());
    }
}

impl ObjectBody {
    pub fn metaclass(&self) -> Metaclass {
        match self {
            ObjectBody::Tads(_) => Metaclass::TadsObject,
            ObjectBody::String(_) => Metaclass::String,
            ObjectBody::List(_) => Metaclass::List,
            ObjectBody::Vector(_) => Metaclass::Vector,
            ObjectBody::LookupTable(_) => Metaclass::LookupTable,
            ObjectBody::IntrinsicClass(_) => Metaclass::IntrinsicClass,
            ObjectBody::IntClassMod(_) => Metaclass::IntClassMod,
            ObjectBody::AnonFn(_) => Metaclass::AnonFuncPtr,
        }
    }

    pub fn as_tads(&self) -> Option<&TadsObject> {
        match self {
            ObjectBody::Tads(t) | ObjectBody::IntClassMod(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tads_mut(&mut self) -> Option<&mut TadsObject> {
        match self {
            ObjectBody::Tads(t) | ObjectBody::IntClassMod(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            ObjectBody::String(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a list, vector or anonymous function.
    pub fn as_elements(&self) -> Option<&[Val]> {
        match self {
            ObjectBody::List(v) | ObjectBody::Vector(v) | ObjectBody::AnonFn(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_lookup_table(&self) -> Option<&LookupTable> {
        match self {
            ObjectBody::LookupTable(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_lookup_table_mut(&mut self) -> Option<&mut LookupTable> {
        match self {
            ObjectBody::LookupTable(t) => Some(t),
            _ => None,
        }
    }

    /// Call `visit` for every object this one references.
    pub fn for_each_ref(&self, visit: &mut dyn FnMut(ObjId)) {
        let mut val = |v: &Val| {
            if let Val::Obj(id) = v {
                visit(*id);
            }
        };
        match self {
            ObjectBody::Tads(t) | ObjectBody::IntClassMod(t) => {
                for sc in &t.superclasses {
                    val(&Val::Obj(*sc));
                }
                t.props.values().for_each(val);
            }
            ObjectBody::String(_) => {}
            ObjectBody::List(v) | ObjectBody::Vector(v) | ObjectBody::AnonFn(v) => {
                v.iter().for_each(val);
            }
            ObjectBody::LookupTable(t) => {
                for (k, v) in t.pairs() {
                    val(&k);
                    val(&v);
                }
                val(&t.default);
            }
            ObjectBody::IntrinsicClass(c) => {
                val(&Val::obj(c.modifier));
                val(&c.class_state);
            }
        }
    }

    /// Rewrite every value this object holds through `f`. Superclass and
    /// modifier ids are rewritten as object values.
    pub fn remap_refs(&mut self, f: &mut dyn FnMut(Val) -> Val) {
        fn id(id: ObjId, f: &mut dyn FnMut(Val) -> Val) -> ObjId {
            f(Val::obj(id)).as_obj().unwrap_or(id)
        }
        match self {
            ObjectBody::Tads(t) | ObjectBody::IntClassMod(t) => {
                for sc in &mut t.superclasses {
                    *sc = id(*sc, f);
                }
                for v in t.props.values_mut() {
                    *v = f(*v);
                }
            }
            ObjectBody::String(_) => {}
            ObjectBody::List(vals) | ObjectBody::Vector(vals) | ObjectBody::AnonFn(vals) => {
                for v in vals.iter_mut() {
                    *v = f(*v);
                }
            }
            ObjectBody::LookupTable(t) => t.remap(f),
            ObjectBody::IntrinsicClass(c) => {
                c.modifier = id(c.modifier, f);
                c.class_state = f(c.class_state);
            }
        }
    }

    /// Build an object from metaclass image data.
    pub fn load(meta: Metaclass, data: &[u8]) -> Result<ObjectBody, LoadDataError> {
        let mut r = DataReader::new(data);
        let body = match meta {
            Metaclass::TadsObject => ObjectBody::Tads(TadsObject::load(data)?),
            Metaclass::IntClassMod => ObjectBody::IntClassMod(TadsObject::load(data)?),
            Metaclass::String => {
                let len = r.u16()? as usize;
                ObjectBody::String(r.take(len)?.to_vec())
            }
            Metaclass::List => {
                let count = r.u16()? as usize;
                ObjectBody::List(load_values(&mut r, count)?)
            }
            Metaclass::Vector | Metaclass::AnonFuncPtr => {
                let _alloc = r.u16()?;
                let count = r.u16()? as usize;
                let elements = load_values(&mut r, count)?;
                if meta == Metaclass::Vector {
                    ObjectBody::Vector(elements)
                } else {
                    ObjectBody::AnonFn(elements)
                }
            }
            Metaclass::LookupTable => ObjectBody::LookupTable(LookupTable::load(data)?),
            Metaclass::IntrinsicClass => ObjectBody::IntrinsicClass(IntrinsicClass::load(data)?),
            Metaclass::RootObject | Metaclass::Collection => return Err(LoadDataError::BadValue),
        };
        Ok(body)
    }

    /// Serialize in the same format [`load`](Self::load) reads. `filter`
    /// may replace stored values (e.g. references that must not be saved).
    pub fn encode(&self, out: &mut Vec<u8>, filter: &mut dyn FnMut(Val) -> Val) {
        match self {
            ObjectBody::Tads(t) | ObjectBody::IntClassMod(t) => t.encode(out, filter),
            ObjectBody::String(s) => {
                out.extend_from_slice(&(s.len() as u16).to_le_bytes());
                out.extend_from_slice(s);
            }
            ObjectBody::List(v) => {
                out.extend_from_slice(&(v.len() as u16).to_le_bytes());
                encode_values(out, v, filter);
            }
            ObjectBody::Vector(v) | ObjectBody::AnonFn(v) => {
                out.extend_from_slice(&(v.len() as u16).to_le_bytes());
                out.extend_from_slice(&(v.len() as u16).to_le_bytes());
                encode_values(out, v, filter);
            }
            ObjectBody::LookupTable(t) => t.encode(out, filter),
            ObjectBody::IntrinsicClass(c) => c.encode(out, filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(v: Val) -> Val {
        v
    }

    fn encoded(body: &ObjectBody) -> Vec<u8> {
        let mut out = Vec::new();
        body.encode(&mut out, &mut identity);
        out
    }

    #[test]
    fn tads_object_image_data() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes()); // superclasses
        data.extend_from_slice(&2u16.to_le_bytes()); // props
        data.extend_from_slice(&TADSOBJ_CLASS_FLAG.to_le_bytes());
        data.extend_from_slice(&7u32.to_le_bytes());
        data.extend_from_slice(&10u16.to_le_bytes());
        data.extend_from_slice(&Val::Int(5).to_dataholder());
        data.extend_from_slice(&11u16.to_le_bytes());
        data.extend_from_slice(&Val::SString(40).to_dataholder());

        let body = ObjectBody::load(Metaclass::TadsObject, &data).expect("load");
        let tads = body.as_tads().expect("tads");
        assert!(tads.is_class);
        assert_eq!(tads.superclasses, vec![ObjId(7)]);
        assert_eq!(tads.props.get(&PropId(10)), Some(&Val::Int(5)));
        assert_eq!(tads.props.get(&PropId(11)), Some(&Val::SString(40)));
        assert_eq!(encoded(&body), data);
    }

    #[test]
    fn remap_rewrites_references() {
        let mut moved = |v: Val| if v == Val::Obj(ObjId(3)) { Val::Obj(ObjId(9)) } else { v };
        let mut tads = ObjectBody::Tads(TadsObject::new(vec![ObjId(3)]).with_prop(PropId(1), Val::Obj(ObjId(3))));
        tads.remap_refs(&mut moved);
        let t = tads.as_tads().expect("tads");
        assert_eq!(t.superclasses, vec![ObjId(9)]);
        assert_eq!(t.props.get(&PropId(1)), Some(&Val::Obj(ObjId(9))));

        let mut table = LookupTable::new();
        table.insert(LookupKey::Val(Val::Obj(ObjId(3))), Val::Obj(ObjId(3)), Val::Int(1));
        let mut body = ObjectBody::LookupTable(table);
        body.remap_refs(&mut moved);
        let table = body.as_lookup_table().expect("table");
        assert_eq!(table.get(&LookupKey::Val(Val::Obj(ObjId(9)))), Some(Val::Int(1)));
        assert_eq!(table.get(&LookupKey::Val(Val::Obj(ObjId(3)))), None);
    }

    #[test]
    fn truncated_data_is_rejected() {
        assert_eq!(
            ObjectBody::load(Metaclass::TadsObject, &[1, 0, 0, 0, 0, 0]),
            Err(LoadDataError::Truncated)
        );
        assert_eq!(ObjectBody::load(Metaclass::String, &[9, 0, b'a']), Err(LoadDataError::Truncated));
        assert_eq!(ObjectBody::load(Metaclass::Collection, &[]), Err(LoadDataError::BadValue));
    }

    #[test]
    fn lookup_table_encode_and_load() {
        let mut t = LookupTable::new();
        t.insert(LookupKey::Val(Val::Int(1)), Val::Int(1), Val::Obj(ObjId(3)));
        t.insert(LookupKey::Val(Val::Int(2)), Val::Int(2), Val::True);
        t.default = Val::Int(-1);
        let body = ObjectBody::LookupTable(t.clone());

        let loaded = ObjectBody::load(Metaclass::LookupTable, &encoded(&body)).expect("load");
        assert_eq!(loaded, body);

        let mut refs = Vec::new();
        loaded.for_each_ref(&mut |id| refs.push(id));
        assert_eq!(refs, vec![ObjId(3)]);
    }

    #[test]
    fn lookup_table_rekey_by_content() {
        let mut t = LookupTable::new();
        t.insert(LookupKey::Val(Val::Obj(ObjId(9))), Val::Obj(ObjId(9)), Val::Int(1));
        t.rekey(&|k| match k {
            Val::Obj(ObjId(9)) => LookupKey::Str(b"key".to_vec()),
            other => LookupKey::Val(other),
        });
        assert_eq!(t.get(&LookupKey::Str(b"key".to_vec())), Some(Val::Int(1)));
        assert_eq!(t.entry(&LookupKey::Str(b"key".to_vec())), Some((Val::Obj(ObjId(9)), Val::Int(1))));
    }

    #[test]
    fn vector_and_anon_fn() {
        let body = ObjectBody::AnonFn(vec![Val::FuncPtr(100), Val::Obj(ObjId(4))]);
        let bytes = encoded(&body);
        assert_eq!(ObjectBody::load(Metaclass::AnonFuncPtr, &bytes), Ok(body.clone()));
        assert_eq!(body.metaclass(), Metaclass::AnonFuncPtr);
        assert_eq!(body.as_elements().map(|e| e.len()), Some(2));
    }

    #[test]
    fn intrinsic_class_data() {
        let mut data = Vec::new();
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&12u32.to_le_bytes());
        let body = ObjectBody::load(Metaclass::IntrinsicClass, &data).expect("load");
        assert_eq!(
            body,
            ObjectBody::IntrinsicClass(IntrinsicClass {
                meta_idx: 3,
                modifier: ObjId(12),
                class_state: Val::Nil,
            })
        );
    }

    #[test]
    fn filter_replaces_values() {
        let body = ObjectBody::List(vec![Val::Obj(ObjId(2)), Val::Int(1)]);
        let mut out = Vec::new();
        body.encode(&mut out, &mut |v| if v == Val::Obj(ObjId(2)) { Val::Nil } else { v });
        assert_eq!(
            ObjectBody::load(Metaclass::List, &out),
            Ok(ObjectBody::List(vec![Val::Nil, Val::Int(1)]))
        );
    }
}
