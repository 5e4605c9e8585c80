pub mod arith;
pub mod builtins;
pub mod create;
pub mod error;
pub mod host;
pub mod image;
pub mod interpreter;
pub mod primitives;
pub mod props;
pub mod save;
pub mod say;
pub mod stack;
pub mod throw;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
pub mod testing;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use heap::{GarbageCollectionStats, Heap, HeapSettings, ObjectFlags, RootProvider};
use object::{Metaclass, ObjId, ObjectBody, PropId, Val};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub use builtins::{BuiltinDesc, FunctionSet};
pub use error::{ErrParam, ErrorCode, ImageError, RuntimeError, SaveError};
pub use host::{BufferHost, Host, StdHost};
pub use image::Image;

use stack::Stack;

// ── Configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VMCreateInfo {
    /// Value-stack slots available to programs.
    pub stack_size: usize,
    /// Extra slots released only while a stack-overflow error is built.
    pub stack_reserve: usize,
    pub heap: HeapSettings,
    /// Log every executed instruction at `trace` level.
    pub trace: bool,
    /// Seed for `rand()`; taken from the host when `None`.
    pub random_seed: Option<u64>,
}

impl Default for VMCreateInfo {
    fn default() -> Self {
        Self {
            stack_size: 4096,
            stack_reserve: 64,
            heap: HeapSettings::default(),
            trace: false,
            random_seed: None,
        }
    }
}

// ── Predefined symbols ────────────────────────────────────────────────

/// Objects and properties the image exports for the VM's own use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Predefs {
    pub runtime_error: Option<ObjId>,
    pub exception_message: Option<PropId>,
    pub prop_not_defined: Option<PropId>,
    pub object_call_prop: Option<PropId>,
    pub constructor: Option<PropId>,
    /// Highest property id the compiler assigned.
    pub last_prop: PropId,
}

impl Predefs {
    fn from_image(image: &Image) -> Self {
        let prop = |name| image.symbol(name).and_then(Val::as_prop).filter(|p| p.is_valid());
        Self {
            runtime_error: image.symbol("RuntimeError").and_then(Val::as_obj),
            exception_message: prop("exceptionMessage"),
            prop_not_defined: prop("propNotDefined"),
            object_call_prop: prop("ObjectCallProp"),
            constructor: prop("Constructor"),
            last_prop: prop("LastProp").unwrap_or_else(|| {
                let highest = image
                    .metaclasses
                    .iter()
                    .flat_map(|m| m.props.iter().copied())
                    .chain(image.symbols.iter().filter_map(|(_, v)| v.as_prop()))
                    .chain(image.globals.iter().filter_map(|(_, v)| v.as_prop()))
                    .max();
                highest.unwrap_or(PropId::INVALID)
            }),
        }
    }
}

/// A metaclass dependency resolved against the metaclasses this VM knows.
#[derive(Debug, Clone)]
pub(crate) struct MetaclassEntry {
    pub name: String,
    pub meta: Option<Metaclass>,
    pub props: Vec<PropId>,
    /// The `IntrinsicClass` object representing this metaclass, if any.
    pub class_obj: ObjId,
}

// ── VM ────────────────────────────────────────────────────────────────

pub struct VM {
    pub heap: Heap,
    pub(crate) image: Arc<Image>,
    pub(crate) stack: Stack,
    /// Frame pointer; 0 when no frame is active.
    pub(crate) fp: usize,
    /// Code-pool offset of the current method header.
    pub(crate) entry: u32,
    /// Code-pool offset of the next instruction.
    pub(crate) pc: u32,
    /// Code-pool offset of the instruction being executed.
    pub(crate) instr_start: u32,
    pub(crate) r0: Val,
    pub(crate) say_func: Val,
    pub(crate) say_method: PropId,
    pub(crate) predefs: Predefs,
    pub(crate) metaclasses: Vec<MetaclassEntry>,
    pub(crate) function_sets: Vec<FunctionSet>,
    /// Image function-set index -> position in `function_sets`.
    pub(crate) fnset_map: Vec<Option<usize>>,
    pub(crate) host: Box<dyn Host>,
    pub(crate) rng: StdRng,
    /// Values held by native code across allocations or re-entry.
    pub(crate) scratch: Vec<Val>,
    /// Roots registered by the host.
    pub(crate) globals: Vec<Val>,
    pub(crate) next_prop: u16,
    pub(crate) halt: Arc<AtomicBool>,
    pub(crate) break_requested: Arc<AtomicBool>,
    pub(crate) trace: bool,
    /// Nesting of native re-entries into the run loop.
    pub(crate) depth: usize,
    pub(crate) instr_count: u64,
    /// Frames captured where the last exception was first thrown.
    pub(crate) last_trace: Vec<String>,
    pub(crate) trace_exc: Option<ObjId>,
}

/// Borrowed view of everything the VM keeps alive.
pub(crate) struct VmRoots<'a> {
    stack: &'a Stack,
    r0: Val,
    say_func: Val,
    scratch: &'a [Val],
    globals: &'a [Val],
}

impl RootProvider for VmRoots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(Val)) {
        visitor(self.r0);
        visitor(self.say_func);
        for v in self.stack.iter() {
            visitor(*v);
        }
        for v in self.scratch.iter().chain(self.globals) {
            visitor(*v);
        }
    }
}

impl VM {
    pub fn new(image: Image, host: Box<dyn Host>, info: VMCreateInfo) -> Result<VM, ImageError> {
        let mut host = host;
        let seed = info.random_seed.unwrap_or_else(|| host.random_seed());
        let predefs = Predefs::from_image(&image);

        let mut metaclasses: Vec<MetaclassEntry> = image
            .metaclasses
            .iter()
            .map(|dep| MetaclassEntry {
                name: dep.name.clone(),
                meta: Metaclass::from_name(&dep.name),
                props: dep.props.clone(),
                class_obj: ObjId::INVALID,
            })
            .collect();
        // every metaclass needs an index so natively created objects can be saved
        for meta in Metaclass::ALL {
            if !metaclasses.iter().any(|m| m.meta == Some(meta)) {
                metaclasses.push(MetaclassEntry {
                    name: meta.name().to_string(),
                    meta: Some(meta),
                    props: Vec::new(),
                    class_obj: ObjId::INVALID,
                });
            }
        }

        let mut vm = VM {
            heap: Heap::new(info.heap),
            stack: Stack::new(info.stack_size, info.stack_reserve),
            fp: 0,
            entry: 0,
            pc: 0,
            instr_start: 0,
            r0: Val::Nil,
            say_func: Val::Nil,
            say_method: PropId::INVALID,
            next_prop: predefs.last_prop.0.saturating_add(1),
            predefs,
            metaclasses,
            function_sets: Vec::new(),
            fnset_map: Vec::new(),
            host,
            rng: StdRng::seed_from_u64(seed),
            scratch: Vec::new(),
            globals: Vec::new(),
            halt: Arc::new(AtomicBool::new(false)),
            break_requested: Arc::new(AtomicBool::new(false)),
            trace: info.trace,
            depth: 0,
            instr_count: 0,
            last_trace: Vec::new(),
            trace_exc: None,
            image: Arc::new(image),
        };
        for set in builtins::standard_sets() {
            vm.register_function_set(set);
        }
        vm.load_image_objects()?;

        log::info!(
            "image loaded: entry {:#x}, {} objects, metaclasses [{}], function sets [{}]",
            vm.image.entry,
            vm.image.objects.len(),
            vm.image.metaclasses.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", "),
            vm.image.function_sets.join(", "),
        );
        Ok(vm)
    }

    /// Materialize the image's static objects at their fixed ids.
    pub(crate) fn load_image_objects(&mut self) -> Result<(), ImageError> {
        let image = Arc::clone(&self.image);
        for obj in &image.objects {
            let entry = self
                .metaclasses
                .get(obj.meta_idx as usize)
                .ok_or_else(|| ImageError::with(ErrorCode::InvalMetaclassData, obj.id.0 as i64))?;
            let meta = entry
                .meta
                .ok_or_else(|| ImageError::with(ErrorCode::UnknownMetaclass, entry.name.clone()))?;
            let body = ObjectBody::load(meta, &obj.data)
                .map_err(|_| ImageError::with(ErrorCode::InvalMetaclassData, obj.id.0 as i64))?;
            let mut flags = ObjectFlags::IMAGE;
            if obj.transient {
                flags |= ObjectFlags::TRANSIENT;
            }
            self.heap.objects_mut().insert_at(obj.id, body, flags);
        }
        self.rekey_tables();
        self.index_class_objects();
        Ok(())
    }

    /// Recompute lookup-table keys now that string objects are in place.
    pub(crate) fn rekey_tables(&mut self) {
        let tables: Vec<ObjId> = self
            .heap
            .objects()
            .iter()
            .filter(|(_, e)| matches!(e.body, ObjectBody::LookupTable(_)))
            .map(|(id, _)| id)
            .collect();
        for id in tables {
            let Some(mut table) = self.heap.get(id).and_then(|b| b.as_lookup_table()).cloned() else {
                continue;
            };
            table.rekey(&|k| self.lookup_key(k));
            if let Some(body) = self.heap.objects_mut().body_mut(id) {
                *body = ObjectBody::LookupTable(table);
            }
        }
    }

    fn index_class_objects(&mut self) {
        for m in &mut self.metaclasses {
            m.class_obj = ObjId::INVALID;
        }
        for (id, entry) in self.heap.objects().iter() {
            if let ObjectBody::IntrinsicClass(c) = &entry.body {
                if let Some(m) = self.metaclasses.get_mut(c.meta_idx as usize) {
                    m.class_obj = id;
                }
            }
        }
    }

    // ── Accessors ──

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn predefs(&self) -> &Predefs {
        &self.predefs
    }

    pub fn r0(&self) -> Val {
        self.r0
    }

    pub fn host_mut(&mut self) -> &mut dyn Host {
        self.host.as_mut()
    }

    /// Setting the returned flag stops the interpreter at the next
    /// instruction boundary.
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Setting the returned flag requests a debugger break at the next poll.
    pub fn break_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.break_requested)
    }

    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::Relaxed)
    }

    /// Install the value `SAY`/`SAYVAL` route output through. Returns the
    /// previous one.
    pub fn set_say_function(&mut self, func: Val) -> Val {
        std::mem::replace(&mut self.say_func, func)
    }

    /// Stack trace captured where the last exception was thrown.
    pub fn last_trace(&self) -> &[String] {
        &self.last_trace
    }

    /// Keep `val` alive until [`remove_root`](Self::remove_root).
    pub fn add_root(&mut self, val: Val) {
        self.globals.push(val);
    }

    pub fn remove_root(&mut self, val: Val) {
        if let Some(pos) = self.globals.iter().position(|v| *v == val) {
            self.globals.swap_remove(pos);
        }
    }

    /// Register a function set; image imports with a matching name resolve
    /// to it, replacing an earlier registration of the same name.
    pub fn register_function_set(&mut self, set: FunctionSet) {
        match self.function_sets.iter().position(|s| s.name == set.name) {
            Some(pos) => self.function_sets[pos] = set,
            None => self.function_sets.push(set),
        }
        self.fnset_map = self
            .image
            .function_sets
            .iter()
            .map(|dep| {
                let name = dep.split('/').next().unwrap_or(dep);
                self.function_sets.iter().position(|s| s.name == name)
            })
            .collect();
    }

    pub fn collect_garbage(&mut self) -> GarbageCollectionStats {
        let mut roots = VmRoots {
            stack: &self.stack,
            r0: self.r0,
            say_func: self.say_func,
            scratch: &self.scratch,
            globals: &self.globals,
        };
        self.heap.collect(&mut roots)
    }

    // ── Undo ──

    pub fn savepoint(&mut self) {
        self.heap.savepoint();
    }

    /// Roll back to the last savepoint, returning the number of changes
    /// reverted.
    pub fn undo(&mut self) -> Result<usize, RuntimeError> {
        self.heap.undo().map_err(|_| RuntimeError::new(ErrorCode::NoUndo))
    }

    // ── Host entry points ──

    /// Run the image's entry function. If it takes an argument it receives
    /// `args` as a list of strings.
    pub fn run_main(&mut self, args: &[&str]) -> Result<Val, RuntimeError> {
        let entry = self.image.entry;
        let header = self.header_at(entry)?;
        let mut call_args = Vec::new();
        if header.accepts(1) {
            let items = args.iter().map(|a| self.new_string(a.as_bytes().to_vec())).collect();
            call_args.push(self.new_list(items));
        }
        self.call_function(Val::FuncPtr(entry), &call_args)
    }

    /// Call a function value (function pointer, anonymous function, callable
    /// object or builtin) from native code.
    pub fn call_function(&mut self, func: Val, args: &[Val]) -> Result<Val, RuntimeError> {
        self.stack.check_space(args.len())?;
        for arg in args.iter().rev() {
            self.stack.push(*arg);
        }
        let result = self.call_value_native(func, args.len());
        self.finish_host_call(result)
    }

    /// Evaluate `target.prop(args...)` from native code.
    pub fn call_method(&mut self, target: Val, prop: PropId, args: &[Val]) -> Result<Val, RuntimeError> {
        self.stack.check_space(args.len())?;
        for arg in args.iter().rev() {
            self.stack.push(*arg);
        }
        let result = self.call_prop_native(target, prop, args.len());
        self.finish_host_call(result)
    }

    fn finish_host_call(&mut self, result: Result<Val, RuntimeError>) -> Result<Val, RuntimeError> {
        if result.is_err() && self.fp == 0 {
            self.stack.truncate(0);
            self.stack.restore_reserve();
        }
        result
    }

    /// Text of a string value, if it is one.
    pub fn string_value(&self, val: Val) -> Option<String> {
        self.string_bytes(val)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Name of a value in the image's global symbol table.
    pub fn symbol_name(&self, val: Val) -> Option<&str> {
        self.image
            .globals
            .iter()
            .find(|(_, v)| *v == val)
            .map(|(n, _)| n.as_str())
    }

    /// The `exceptionMessage` of an exception object.
    pub fn exception_message(&self, exc: ObjId) -> Option<String> {
        let prop = self.predefs.exception_message?;
        let found = object::find_prop(self.heap.objects(), exc, prop);
        match found {
            object::LookupResult::Found { value, .. } => self.string_value(value),
            object::LookupResult::None => None,
        }
    }
}
