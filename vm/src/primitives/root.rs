use object::{Metaclass, ObjId, ObjectBody, Val, is_instance_of};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::{Arity, PrimitiveDesc, arg, expect_int, expect_obj, expect_prop};
use crate::props::{Found, Search};

pub static METHODS: &[PrimitiveDesc] = &[
    PrimitiveDesc::new("ofKind", Arity::Exact(1), root_of_kind),
    PrimitiveDesc::new("getSuperclassList", Arity::Exact(0), root_superclass_list),
    PrimitiveDesc::new("propDefined", Arity::Range(1, 2), root_prop_defined),
    PrimitiveDesc::new("propType", Arity::Exact(1), root_prop_type),
    PrimitiveDesc::new("getPropList", Arity::Exact(0), root_prop_list),
    PrimitiveDesc::new("isClass", Arity::Exact(0), root_is_class),
    PrimitiveDesc::new("isTransient", Arity::Exact(0), root_is_transient),
];

// propDefined() flags
const PROPDEF_ANY: i32 = 1;
const PROPDEF_DIRECTLY: i32 = 2;
const PROPDEF_INHERITS: i32 = 3;
const PROPDEF_GET_CLASS: i32 = 4;

const TYPE_NATIVE_CODE: i32 = 14;

impl VM {
    /// Metaclass of any value that can receive a property evaluation.
    pub(crate) fn metaclass_of(&self, val: Val) -> Option<Metaclass> {
        match val {
            Val::Obj(id) => self.heap.metaclass(id),
            Val::SString(_) => Some(Metaclass::String),
            Val::List(_) => Some(Metaclass::List),
            _ => None,
        }
    }

    /// The `IntrinsicClass` object standing for `meta`, if the image has one.
    pub(crate) fn class_object(&self, meta: Metaclass) -> Option<ObjId> {
        self.metaclasses
            .iter()
            .find(|m| m.meta == Some(meta))
            .and_then(|m| m.class_obj.valid())
    }

    fn intrinsic_class_meta(&self, cls: ObjId) -> Option<Metaclass> {
        match self.heap.get(cls)? {
            ObjectBody::IntrinsicClass(c) => self.metaclasses.get(c.meta_idx as usize)?.meta,
            _ => None,
        }
    }

    /// `val.ofKind(cls)`: program-class inheritance, or metaclass ancestry
    /// when `cls` is an intrinsic class.
    pub(crate) fn is_kind_of(&self, val: Val, cls: ObjId) -> bool {
        if let Some(meta) = self.intrinsic_class_meta(cls) {
            return self.metaclass_of(val).is_some_and(|m| m.is_kind_of(meta));
        }
        match val {
            Val::Obj(id) => is_instance_of(self.heap.objects(), id, cls),
            _ => false,
        }
    }
}

pub fn root_of_kind(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let cls = expect_obj(vm, args[0])?;
    Ok(Val::bool(vm.is_kind_of(receiver, cls)))
}

pub fn root_superclass_list(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let supers: Vec<Val> = match receiver {
        Val::Obj(id) => match vm.heap.get(id) {
            Some(ObjectBody::Tads(t) | ObjectBody::IntClassMod(t)) => {
                t.superclasses.iter().copied().map(Val::Obj).collect()
            }
            Some(ObjectBody::IntrinsicClass(_)) => vm
                .intrinsic_class_meta(id)
                .and_then(Metaclass::parent)
                .and_then(|parent| vm.class_object(parent))
                .map(Val::Obj)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(vm.new_list(supers))
}

pub fn root_prop_defined(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let prop = expect_prop(args[0])?;
    let flags = match arg(args, 1) {
        Some(v) => expect_int(v)?,
        None => PROPDEF_ANY,
    };
    let found = vm.find_property(Search::From(receiver), prop)?;
    let holder = match found {
        Found::Value { holder, .. } => Some(holder),
        Found::Native(_) => Some(Val::Nil),
        Found::Missing => None,
    };
    let result = match flags {
        PROPDEF_ANY => holder.is_some(),
        PROPDEF_DIRECTLY => holder == Some(receiver),
        PROPDEF_INHERITS => holder.is_some_and(|h| h != receiver),
        PROPDEF_GET_CLASS => return Ok(holder.unwrap_or(Val::Nil)),
        _ => return Err(RuntimeError::with(ErrorCode::BadValBif, "propDefined flags")),
    };
    Ok(Val::bool(result))
}

pub fn root_prop_type(vm: &mut VM, receiver: Val, args: &[Val]) -> Result<Val, RuntimeError> {
    let prop = expect_prop(args[0])?;
    Ok(match vm.find_property(Search::From(receiver), prop)? {
        Found::Value { val, .. } => Val::Int(val.type_code() as i32),
        Found::Native(_) => Val::Int(TYPE_NATIVE_CODE),
        Found::Missing => Val::Nil,
    })
}

/// Properties defined directly on the receiver.
pub fn root_prop_list(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let props: Vec<Val> = match receiver {
        Val::Obj(id) => match vm.heap.get(id) {
            Some(ObjectBody::Tads(t) | ObjectBody::IntClassMod(t)) => t.props.keys().copied().map(Val::Prop).collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(vm.new_list(props))
}

pub fn root_is_class(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    let is_class = match receiver {
        Val::Obj(id) => match vm.heap.get(id) {
            Some(ObjectBody::Tads(t)) => t.is_class,
            Some(ObjectBody::IntrinsicClass(_)) => true,
            _ => false,
        },
        _ => false,
    };
    Ok(Val::bool(is_class))
}

pub fn root_is_transient(vm: &mut VM, receiver: Val, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(Val::bool(matches!(receiver, Val::Obj(id) if vm.heap.is_transient(id))))
}
