//! Test support: assemble small images in memory and run them.
//!
//! Every builder image carries the scaffolding a compiled program would:
//! a `RuntimeError` class whose constructor stores the error number in
//! `errno_`, the `Constructor` and `exceptionMessage` properties, a
//! metaclass dependency for every metaclass with one property per native
//! method, an intrinsic class object per metaclass, and the three
//! standard function sets.

use std::sync::Arc;

use bytecode::{Instruction, MethodBuilder};
use object::{IntrinsicClass, LookupResult, Metaclass, ObjId, ObjectBody, Pool, PropId, TadsObject, Val, find_prop};
use parking_lot::Mutex;

use crate::error::RuntimeError;
use crate::host::{BufferHost, Host};
use crate::image::{MetaclassDep, StaticObject};
use crate::primitives;
use crate::{Image, VM, VMCreateInfo};

const ERRNO_PROP: &str = "errno_";

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    image: Image,
    code: Vec<u8>,
    consts: Vec<u8>,
    next_prop: u16,
    next_obj: u32,
    runtime_error: ObjId,
    constructor: PropId,
}

impl ImageBuilder {
    /// Image function-set indices of the standard sets.
    pub const T3VM: u16 = 0;
    pub const TADS_GEN: u16 = 1;
    pub const TADS_IO: u16 = 2;

    pub fn new() -> Self {
        let mut b = Self {
            image: Image::default(),
            code: Vec::new(),
            consts: Vec::new(),
            next_prop: 1,
            next_obj: 1,
            runtime_error: ObjId::INVALID,
            constructor: PropId::INVALID,
        };
        b.image.id[..10].copy_from_slice(b"test-image");
        for set in ["t3vm/010006", "tads-gen/030008", "tads-io/030007"] {
            b.function_set(set);
        }

        for meta in Metaclass::ALL {
            let props = primitives::table(meta).iter().map(|_| b.fresh_prop()).collect();
            b.image.metaclasses.push(MetaclassDep {
                name: format!("{}/030000", meta.name()),
                props,
            });
        }
        let class_meta = b.meta_index(Metaclass::IntrinsicClass);
        for meta_idx in 0..b.image.metaclasses.len() as u16 {
            let body = ObjectBody::IntrinsicClass(IntrinsicClass {
                meta_idx,
                modifier: ObjId::INVALID,
                class_state: Val::Nil,
            });
            b.add_object(class_meta, &body);
        }

        let constructor = b.prop("Constructor");
        let message = b.prop("exceptionMessage");
        let errno = b.prop(ERRNO_PROP);
        // construct(errno) { self.errno_ = errno; }
        let mut ctor = MethodBuilder::new(1, 0);
        ctor.emit(Instruction::GetArg { arg: 0 });
        ctor.emit(Instruction::SetPropSelf { prop: errno.0 });
        ctor.emit(Instruction::RetNil);
        let ctor = b.method(ctor);
        let runtime_error = b.class(&[], &[(constructor, Val::CodeOfs(ctor))]);

        b.symbol("RuntimeError", Val::Obj(runtime_error));
        b.image.symbols.push(("Constructor".into(), Val::Prop(constructor)));
        b.image.symbols.push(("exceptionMessage".into(), Val::Prop(message)));
        b.runtime_error = runtime_error;
        b.constructor = constructor;
        b
    }

    fn fresh_prop(&mut self) -> PropId {
        let p = PropId(self.next_prop);
        self.next_prop += 1;
        p
    }

    fn add_object(&mut self, meta_idx: u16, body: &ObjectBody) -> ObjId {
        let id = ObjId(self.next_obj);
        self.next_obj += 1;
        let mut data = Vec::new();
        body.encode(&mut data, &mut |v| v);
        self.image.objects.push(StaticObject { id, meta_idx, transient: false, data });
        id
    }

    // ── Code and constants ──

    pub fn method(&mut self, m: MethodBuilder) -> u32 {
        self.raw_method(&m.finish())
    }

    pub fn raw_method(&mut self, bytes: &[u8]) -> u32 {
        let ofs = self.next_code_offset();
        self.code.extend_from_slice(bytes);
        ofs
    }

    /// Offset the next method will be placed at.
    pub fn next_code_offset(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn entry(&mut self, ofs: u32) {
        self.image.entry = ofs;
    }

    pub fn string(&mut self, s: &str) -> u32 {
        let ofs = self.consts.len() as u32;
        self.consts.extend_from_slice(&(s.len() as u16).to_le_bytes());
        self.consts.extend_from_slice(s.as_bytes());
        ofs
    }

    pub fn list(&mut self, items: &[Val]) -> u32 {
        let ofs = self.consts.len() as u32;
        self.consts.extend_from_slice(&(items.len() as u16).to_le_bytes());
        for v in items {
            self.consts.extend_from_slice(&v.to_dataholder());
        }
        ofs
    }

    // ── Symbols ──

    /// A new property, named in the global symbol table.
    pub fn prop(&mut self, name: &str) -> PropId {
        let p = self.fresh_prop();
        self.image.globals.push((name.to_string(), Val::Prop(p)));
        p
    }

    /// Export `val` under `name` (both as a predefined and a global symbol).
    pub fn symbol(&mut self, name: &str, val: Val) {
        self.image.symbols.push((name.to_string(), val));
        self.image.globals.push((name.to_string(), val));
    }

    pub fn function_set(&mut self, name: &str) {
        self.image.function_sets.push(name.to_string());
    }

    pub fn function_set_count(&self) -> u16 {
        self.image.function_sets.len() as u16
    }

    // ── Objects ──

    fn tads(&mut self, supers: &[ObjId], props: &[(PropId, Val)], is_class: bool) -> ObjId {
        let mut obj = TadsObject::new(supers.to_vec());
        obj.props.extend(props.iter().copied());
        obj.is_class = is_class;
        let meta_idx = self.meta_index(Metaclass::TadsObject);
        self.add_object(meta_idx, &ObjectBody::Tads(obj))
    }

    pub fn class(&mut self, supers: &[ObjId], props: &[(PropId, Val)]) -> ObjId {
        self.tads(supers, props, true)
    }

    pub fn object(&mut self, supers: &[ObjId], props: &[(PropId, Val)]) -> ObjId {
        self.tads(supers, props, false)
    }

    /// Any other static object, e.g. a lookup table.
    pub fn static_object(&mut self, body: ObjectBody) -> ObjId {
        let meta_idx = self.meta_index(body.metaclass());
        self.add_object(meta_idx, &body)
    }

    pub fn runtime_error_class(&self) -> ObjId {
        self.runtime_error
    }

    pub fn constructor_prop(&self) -> PropId {
        self.constructor
    }

    /// Position of `meta` in the metaclass dependency table.
    pub fn meta_index(&self, meta: Metaclass) -> u16 {
        self.image
            .metaclasses
            .iter()
            .position(|d| Metaclass::from_name(&d.name) == Some(meta))
            .expect("every metaclass has a dependency") as u16
    }

    /// The property mapped to native method `name` of `meta`.
    pub fn native(&self, meta: Metaclass, name: &str) -> PropId {
        let idx = primitives::primitive_index_by_name(meta, name)
            .unwrap_or_else(|| panic!("{} has no native method {name}", meta.name()));
        self.image.metaclasses[self.meta_index(meta) as usize].props[idx]
    }

    /// The builtin that writes its arguments to the host.
    pub fn tads_say() -> Val {
        Val::BifPtr {
            set: Self::TADS_IO,
            index: crate::builtins::tadsio::SAY,
        }
    }

    // ── Building ──

    /// The finished image, passed through the image file format.
    pub fn build(self) -> Image {
        let mut image = self.image;
        image.code = Pool::new(self.code);
        image.consts = Pool::new(self.consts);
        Image::parse(&image.to_bytes()).expect("builder images parse")
    }

    pub fn vm_with_host(self, host: impl Host + 'static) -> VM {
        let info = VMCreateInfo {
            random_seed: Some(0),
            ..VMCreateInfo::default()
        };
        VM::new(self.build(), Box::new(host), info).expect("builder images load")
    }

    pub fn vm(self) -> VM {
        self.vm_with_host(BufferHost::new())
    }

    pub fn vm_with_output(self) -> (VM, Arc<Mutex<String>>) {
        let host = BufferHost::new();
        let output = host.output();
        (self.vm_with_host(host), output)
    }
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the image's entry function.
pub fn run_entry(b: ImageBuilder) -> (VM, Result<Val, RuntimeError>) {
    let mut vm = b.vm();
    let result = vm.run_main(&[]);
    (vm, result)
}

impl VM {
    /// `errno_` of an exception built from a VM error.
    pub fn error_number(&self, exc: ObjId) -> Option<i32> {
        let prop = self.image.global(ERRNO_PROP)?.as_prop()?;
        match find_prop(self.heap.objects(), exc, prop) {
            LookupResult::Found { value, .. } => value.as_int(),
            LookupResult::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_images_load() {
        let mut b = ImageBuilder::new();
        let p = b.prop("weight");
        let obj = b.object(&[], &[(p, Val::Int(3))]);
        let vm = b.vm();
        let class = vm.class_object(Metaclass::Vector).expect("class object");
        assert!(matches!(vm.heap.get(class), Some(ObjectBody::IntrinsicClass(_))));
        assert_eq!(vm.symbol_name(Val::Obj(obj)), None);
        assert_eq!(vm.symbol_name(Val::Prop(p)), Some("weight"));
        assert!(vm.predefs().runtime_error.is_some());
        assert!(vm.predefs().constructor.is_some());
    }
}
