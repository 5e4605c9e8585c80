//! Property evaluation: lookup through the object graph and the intrinsic
//! method tables, then evaluation of whatever was found.

use object::{LookupResult, Metaclass, ObjId, ObjectBody, PropId, Val, find_inherited, find_prop};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::interpreter::{CallMode, Flow, MethodCtx};
use crate::primitives::{self, PrimitiveDesc};

/// Where a lookup starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Search {
    /// At the value itself.
    From(Val),
    /// In `self_obj`'s inheritance order, after `defining`.
    After { self_obj: ObjId, defining: ObjId },
}

/// A property lookup and the method context it establishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lookup {
    pub search: Search,
    pub self_val: Val,
    pub orig_target: Val,
    /// Reject anything with side effects.
    pub data_only: bool,
}

impl Lookup {
    pub fn call(target: Val) -> Self {
        Self {
            search: Search::From(target),
            self_val: target,
            orig_target: target,
            data_only: false,
        }
    }

    pub fn data(target: Val) -> Self {
        Self { data_only: true, ..Self::call(target) }
    }

    /// Search `target` but run with `self_val` as self.
    pub fn delegated(target: Val, self_val: Val) -> Self {
        Self {
            search: Search::From(target),
            self_val,
            orig_target: target,
            data_only: false,
        }
    }

    /// Receiver handed to native methods.
    fn native_self(&self) -> Val {
        match self.search {
            Search::From(target) => target,
            Search::After { self_obj, .. } => Val::Obj(self_obj),
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Found {
    Value { val: Val, holder: Val },
    Native(PrimitiveDesc),
    Missing,
}

impl VM {
    /// Native method bound to `prop` for metaclass `meta`, if the image
    /// maps one.
    fn native_for(&self, meta: Metaclass, prop: PropId) -> Option<PrimitiveDesc> {
        let entry = self.metaclasses.iter().find(|m| m.meta == Some(meta))?;
        let pos = entry.props.iter().position(|p| *p == prop)?;
        primitives::table(meta).get(pos).copied()
    }

    /// The `int-class-mod` object attached to `meta`'s class object.
    pub(crate) fn modifier_of(&self, meta: Metaclass) -> Option<ObjId> {
        let entry = self.metaclasses.iter().find(|m| m.meta == Some(meta))?;
        match self.heap.get(entry.class_obj)? {
            ObjectBody::IntrinsicClass(c) => c.modifier.valid(),
            _ => None,
        }
    }

    /// Intrinsic-class lookup: per ancestry level, the native table and
    /// then the modifier object.
    fn intrinsic_lookup(&self, meta: Metaclass, prop: PropId) -> Found {
        for m in meta.ancestry() {
            if let Some(desc) = self.native_for(m, prop) {
                return Found::Native(desc);
            }
            if let Some(modifier) = self.modifier_of(m) {
                if let LookupResult::Found { holder, value } = find_prop(self.heap.objects(), modifier, prop) {
                    return Found::Value { val: value, holder: Val::Obj(holder) };
                }
            }
        }
        Found::Missing
    }

    pub(crate) fn find_property(&self, search: Search, prop: PropId) -> Result<Found, RuntimeError> {
        let target = match search {
            Search::After { self_obj, defining } => {
                if let LookupResult::Found { holder, value } =
                    find_inherited(self.heap.objects(), self_obj, prop, defining)
                {
                    return Ok(Found::Value { val: value, holder: Val::Obj(holder) });
                }
                let meta = self
                    .heap
                    .metaclass(self_obj)
                    .ok_or(RuntimeError::new(ErrorCode::ObjValReqd))?;
                return Ok(self.intrinsic_lookup(meta, prop));
            }
            Search::From(target) => target,
        };
        match target {
            Val::Obj(id) => {
                let meta = self
                    .heap
                    .metaclass(id)
                    .ok_or(RuntimeError::new(ErrorCode::ObjValReqd))?;
                if matches!(meta, Metaclass::TadsObject | Metaclass::IntClassMod) {
                    if let LookupResult::Found { holder, value } = find_prop(self.heap.objects(), id, prop) {
                        return Ok(Found::Value { val: value, holder: Val::Obj(holder) });
                    }
                }
                Ok(self.intrinsic_lookup(meta, prop))
            }
            Val::SString(_) => Ok(self.intrinsic_lookup(Metaclass::String, prop)),
            Val::List(_) => Ok(self.intrinsic_lookup(Metaclass::List, prop)),
            Val::Nil => Err(RuntimeError::new(ErrorCode::NilDeref)),
            _ => Err(RuntimeError::new(ErrorCode::ObjValReqd)),
        }
    }

    /// Whether `obj` defines or inherits `prop`, natively or otherwise.
    pub(crate) fn defines_prop(&self, obj: Val, prop: PropId) -> bool {
        matches!(
            self.find_property(Search::From(obj), prop),
            Ok(Found::Value { .. } | Found::Native(_))
        )
    }

    /// Constant strings and lists become heap objects when they are about
    /// to run as `self` of a method.
    fn materialize_self(&mut self, val: Val) -> Result<Val, RuntimeError> {
        match val {
            Val::SString(_) => {
                let bytes = self.string_bytes(val).ok_or(RuntimeError::new(ErrorCode::StringValReqd))?;
                Ok(self.new_string(bytes))
            }
            Val::List(_) => {
                let items = self.list_like_elements(val).ok_or(RuntimeError::new(ErrorCode::ListValReqd))?;
                Ok(self.new_list(items))
            }
            _ => Ok(val),
        }
    }

    /// Evaluate `prop` with `argc` arguments on the stack. The result is in
    /// R0 once the callee (if any) returns.
    pub(crate) fn get_prop(&mut self, mode: CallMode, lookup: Lookup, prop: PropId, argc: usize) -> Result<Flow, RuntimeError> {
        match self.find_property(lookup.search, prop)? {
            Found::Value { val, holder } => {
                if lookup.data_only && matches!(val, Val::CodeOfs(_) | Val::DString(_)) {
                    return Err(RuntimeError::new(ErrorCode::BadSpecEval));
                }
                match val {
                    Val::CodeOfs(ofs) => {
                        let self_val = self.materialize_self(lookup.self_val)?;
                        let ctx = MethodCtx {
                            self_val,
                            target_prop: prop,
                            orig_target: lookup.orig_target,
                            defining: holder,
                        };
                        self.enter(mode, ofs, argc, ctx)
                    }
                    Val::DString(_) => {
                        if argc != 0 {
                            return Err(RuntimeError::new(ErrorCode::WrongNumOfArgs));
                        }
                        self.say_value(val, lookup.self_val)?;
                        self.r0 = Val::Nil;
                        Ok(Flow::Continue)
                    }
                    _ => {
                        if argc != 0 {
                            return Err(RuntimeError::new(ErrorCode::WrongNumOfArgs));
                        }
                        self.r0 = val;
                        Ok(Flow::Continue)
                    }
                }
            }
            Found::Native(desc) => {
                if lookup.data_only {
                    return Err(RuntimeError::new(ErrorCode::BadSpecEval));
                }
                self.call_primitive(desc, lookup.native_self(), argc)?;
                Ok(Flow::Continue)
            }
            Found::Missing => self.prop_not_defined(mode, lookup, prop, argc),
        }
    }

    /// Retry a failed lookup as `propNotDefined(prop, args...)`, or yield
    /// nil.
    fn prop_not_defined(&mut self, mode: CallMode, lookup: Lookup, prop: PropId, argc: usize) -> Result<Flow, RuntimeError> {
        if let Some(pnd) = self.predefs.prop_not_defined.filter(|p| *p != prop) {
            if let Found::Value { val: Val::CodeOfs(ofs), holder } = self.find_property(lookup.search, pnd)? {
                if lookup.data_only {
                    return Err(RuntimeError::new(ErrorCode::BadSpecEval));
                }
                self.stack.check_space(1)?;
                self.stack.push(Val::Prop(prop));
                let self_val = self.materialize_self(lookup.self_val)?;
                let ctx = MethodCtx {
                    self_val,
                    target_prop: pnd,
                    orig_target: lookup.orig_target,
                    defining: holder,
                };
                return self.enter(mode, ofs, argc + 1, ctx);
            }
        }
        self.stack.discard(argc);
        self.r0 = Val::Nil;
        Ok(Flow::Continue)
    }

    /// Run a native method; its arguments stay on the stack (and so stay
    /// rooted) until it returns.
    pub(crate) fn call_primitive(&mut self, desc: PrimitiveDesc, receiver: Val, argc: usize) -> Result<(), RuntimeError> {
        desc.arity.check(argc)?;
        let args = self.stack.args(argc);
        let mark = self.scratch.len();
        self.scratch.push(receiver);
        let result = (desc.func)(self, receiver, &args);
        self.scratch.truncate(mark);
        self.stack.discard(argc);
        self.r0 = result?;
        Ok(())
    }

    /// Store `val` in `obj.prop`.
    pub(crate) fn set_prop_value(&mut self, obj: Val, prop: PropId, val: Val) -> Result<(), RuntimeError> {
        match obj {
            Val::Obj(id) => {
                if !self.heap.objects().is_live(id) {
                    return Err(RuntimeError::new(ErrorCode::ObjValReqd));
                }
                if !self.heap.set_prop(id, prop, val) {
                    return Err(RuntimeError::new(ErrorCode::InvalObjType));
                }
                Ok(())
            }
            Val::Nil => Err(RuntimeError::new(ErrorCode::NilDeref)),
            _ => Err(RuntimeError::new(ErrorCode::ObjValReqd)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ImageBuilder, run_entry};
    use bytecode::{Instruction, MethodBuilder};

    /// `m() { return <name>; }` as a constant string.
    fn returns_name(b: &mut ImageBuilder, name: &str) -> u32 {
        let s = b.string(name);
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushStr { ofs: s });
        m.emit(Instruction::RetVal);
        b.method(m)
    }

    /// `m() { return inherited(); }`
    fn inherits(b: &mut ImageBuilder, prop: PropId) -> u32 {
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::Inherit { argc: 0, prop: prop.0 });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        b.method(m)
    }

    fn call_on(b: &mut ImageBuilder, obj: ObjId, prop: PropId) {
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::ObjCallProp { argc: 0, obj: obj.0, prop: prop.0 });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        let entry = b.method(m);
        b.entry(entry);
    }

    #[test]
    fn depth_first_left_to_right() {
        let mut b = ImageBuilder::new();
        let m = b.prop("m");
        let (ma, mb, mc) = (returns_name(&mut b, "A"), returns_name(&mut b, "B"), returns_name(&mut b, "C"));
        let a = b.class(&[], &[(m, Val::CodeOfs(ma))]);
        let bb = b.class(&[a], &[(m, Val::CodeOfs(mb))]);
        let c = b.class(&[a], &[(m, Val::CodeOfs(mc))]);
        let d = b.class(&[bb, c], &[]);
        let obj = b.object(&[d], &[]);
        call_on(&mut b, obj, m);

        let (vm, result) = run_entry(b);
        let r = result.expect("runs");
        assert_eq!(vm.string_value(r).as_deref(), Some("B"));
    }

    #[test]
    fn inherited_walks_the_linearization() {
        let mut b = ImageBuilder::new();
        let m = b.prop("m");
        let ma = returns_name(&mut b, "A");
        let mb = inherits(&mut b, m);
        let mc = returns_name(&mut b, "C");
        let md = inherits(&mut b, m);
        let a = b.class(&[], &[(m, Val::CodeOfs(ma))]);
        let bb = b.class(&[a], &[(m, Val::CodeOfs(mb))]);
        let c = b.class(&[a], &[(m, Val::CodeOfs(mc))]);
        let d = b.class(&[bb, c], &[(m, Val::CodeOfs(md))]);
        let obj = b.object(&[d], &[]);
        call_on(&mut b, obj, m);

        // D inherits into B, B inherits into A: depth first, so C is skipped
        let (vm, result) = run_entry(b);
        let r = result.expect("runs");
        assert_eq!(vm.string_value(r).as_deref(), Some("A"));
    }

    #[test]
    fn inherited_from_d_reaches_b() {
        let mut b = ImageBuilder::new();
        let m = b.prop("m");
        let ma = returns_name(&mut b, "A");
        let mb = returns_name(&mut b, "B");
        let mc = returns_name(&mut b, "C");
        let md = inherits(&mut b, m);
        let a = b.class(&[], &[(m, Val::CodeOfs(ma))]);
        let bb = b.class(&[a], &[(m, Val::CodeOfs(mb))]);
        let c = b.class(&[a], &[(m, Val::CodeOfs(mc))]);
        let d = b.class(&[bb, c], &[(m, Val::CodeOfs(md))]);
        let obj = b.object(&[d], &[]);
        call_on(&mut b, obj, m);

        let (vm, result) = run_entry(b);
        let r = result.expect("runs");
        assert_eq!(vm.string_value(r).as_deref(), Some("B"));
    }

    #[test]
    fn defining_object_is_the_holder() {
        let mut b = ImageBuilder::new();
        let m = b.prop("m");
        let mut method = MethodBuilder::new(0, 0);
        method.emit(Instruction::PushCtxEle { code: 3 });
        method.emit(Instruction::RetVal);
        let code = b.method(method);
        let base = b.class(&[], &[(m, Val::CodeOfs(code))]);
        let obj = b.object(&[base], &[]);
        call_on(&mut b, obj, m);
        assert_eq!(run_entry(b).1, Ok(Val::Obj(base)));
    }

    #[test]
    fn prop_not_defined_receives_the_property() {
        let mut b = ImageBuilder::new();
        let q = b.prop("q");
        let pnd = b.prop("propNotDefined");
        b.symbol("propNotDefined", Val::Prop(pnd));
        // propNotDefined(p, ...) { return toString(p) }: here just return p
        let mut method = MethodBuilder::new(1, 0).varargs();
        method.emit(Instruction::GetArg { arg: 0 });
        method.emit(Instruction::RetVal);
        let code = b.method(method);
        let c = b.class(&[], &[(pnd, Val::CodeOfs(code))]);
        let obj = b.object(&[c], &[]);
        call_on(&mut b, obj, q);
        assert_eq!(run_entry(b).1, Ok(Val::Prop(q)));
    }

    #[test]
    fn missing_property_yields_nil() {
        let mut b = ImageBuilder::new();
        let q = b.prop("q");
        let obj = b.object(&[], &[]);
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushInt { value: 1 });
        m.emit(Instruction::PushInt { value: 2 });
        m.emit(Instruction::ObjCallProp { argc: 2, obj: obj.0, prop: q.0 });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        let entry = b.method(m);
        b.entry(entry);
        let (vm, result) = run_entry(b);
        assert_eq!(result, Ok(Val::Nil));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn data_lookup_rejects_code() {
        let mut b = ImageBuilder::new();
        let m = b.prop("m");
        let code = returns_name(&mut b, "x");
        let obj = b.object(&[], &[(m, Val::CodeOfs(code))]);
        let mut main = MethodBuilder::new(0, 0);
        main.emit(Instruction::PushObj { obj: obj.0 });
        main.emit(Instruction::GetPropData { prop: m.0 });
        main.emit(Instruction::RetNil);
        let entry = b.method(main);
        b.entry(entry);
        let (vm, result) = run_entry(b);
        let Err(RuntimeError::Unhandled(exc)) = result else {
            panic!("expected an exception, got {result:?}");
        };
        assert_eq!(vm.error_number(exc), Some(ErrorCode::BadSpecEval.number() as i32));
    }

    #[test]
    fn nil_dereference() {
        let mut b = ImageBuilder::new();
        let m = b.prop("m");
        let mut main = MethodBuilder::new(0, 0);
        main.emit(Instruction::PushNil);
        main.emit(Instruction::GetProp { prop: m.0 });
        main.emit(Instruction::RetNil);
        let entry = b.method(main);
        b.entry(entry);
        let (vm, result) = run_entry(b);
        let Err(RuntimeError::Unhandled(exc)) = result else {
            panic!("expected an exception, got {result:?}");
        };
        assert_eq!(vm.error_number(exc), Some(ErrorCode::NilDeref.number() as i32));
    }

    #[test]
    fn set_prop_then_read() {
        let mut b = ImageBuilder::new();
        let p = b.prop("p");
        let obj = b.object(&[], &[(p, Val::Int(1))]);
        let mut main = MethodBuilder::new(0, 0);
        main.emit(Instruction::PushInt { value: 9 });
        main.emit(Instruction::ObjSetProp { obj: obj.0, prop: p.0 });
        main.emit(Instruction::ObjGetProp { obj: obj.0, prop: p.0 });
        main.emit(Instruction::GetR0);
        main.emit(Instruction::RetVal);
        let entry = b.method(main);
        b.entry(entry);
        assert_eq!(run_entry(b).1, Ok(Val::Int(9)));
    }
}
