use heap::ObjectFlags;
use object::{LookupTable, Metaclass, ObjId, ObjectBody, TadsObject, Val};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::interpreter::CallMode;
use crate::props::Lookup;

/// Element counts are stored as u16 in image and save data.
const MAX_VECTOR_LEN: usize = u16::MAX as usize;

impl VM {
    fn alloc_object(&mut self, body: ObjectBody, transient: bool) -> ObjId {
        let flags = if transient { ObjectFlags::TRANSIENT } else { ObjectFlags::empty() };
        self.heap.alloc_with(body, flags)
    }

    /// Pop `argc` arguments, argument 0 first.
    fn pop_args(&mut self, argc: usize) -> Vec<Val> {
        (0..argc).map(|_| self.stack.pop()).collect()
    }

    /// `NEW`/`TRNEW`: build an instance of the image's metaclass `meta_idx`
    /// from `argc` stack arguments and leave it in R0.
    pub(crate) fn create_object(&mut self, meta_idx: u16, argc: usize, transient: bool) -> Result<(), RuntimeError> {
        let entry = self
            .metaclasses
            .get(meta_idx as usize)
            .ok_or_else(|| RuntimeError::with(ErrorCode::BadMetaclassIndex, meta_idx as i64))?;
        let meta = entry
            .meta
            .ok_or_else(|| RuntimeError::with(ErrorCode::UnknownMetaclass, entry.name.clone()))?;

        let id = match meta {
            Metaclass::TadsObject => {
                if argc == 0 {
                    return Err(RuntimeError::new(ErrorCode::WrongNumOfArgs));
                }
                let superclass = match self.stack.pop() {
                    Val::Obj(sc) if self.heap.get(sc).and_then(ObjectBody::as_tads).is_some() => sc,
                    _ => {
                        self.stack.discard(argc - 1);
                        return Err(RuntimeError::new(ErrorCode::ObjValReqdSc));
                    }
                };
                self.new_instance(vec![superclass], argc - 1, transient)?
            }
            Metaclass::String => {
                let args = self.pop_args(argc);
                let bytes = match args.first() {
                    Some(v) => self.to_display_bytes(*v)?,
                    None => Vec::new(),
                };
                self.alloc_object(ObjectBody::String(bytes), transient)
            }
            Metaclass::List => {
                let args = self.pop_args(argc);
                self.alloc_object(ObjectBody::List(args), transient)
            }
            Metaclass::Vector => {
                let args = self.pop_args(argc);
                let items = self.vector_source(&args)?;
                self.alloc_object(ObjectBody::Vector(items), transient)
            }
            Metaclass::LookupTable => {
                let args = self.pop_args(argc);
                if args.len() > 2 {
                    return Err(RuntimeError::new(ErrorCode::WrongNumOfArgs));
                }
                self.alloc_object(ObjectBody::LookupTable(LookupTable::new()), transient)
            }
            Metaclass::AnonFuncPtr => {
                let args = self.pop_args(argc);
                if !matches!(args.first(), Some(Val::FuncPtr(_))) {
                    return Err(RuntimeError::new(ErrorCode::FuncPtrValReqd));
                }
                self.alloc_object(ObjectBody::AnonFn(args), transient)
            }
            Metaclass::RootObject | Metaclass::Collection | Metaclass::IntrinsicClass | Metaclass::IntClassMod => {
                self.stack.discard(argc);
                return Err(RuntimeError::new(ErrorCode::BadDynamicNew));
            }
        };
        self.r0 = Val::Obj(id);
        Ok(())
    }

    /// `new Vector(capacity)`, `new Vector(capacity, count)` or
    /// `new Vector(capacity, source)`: capacity is only a hint.
    fn vector_source(&self, args: &[Val]) -> Result<Vec<Val>, RuntimeError> {
        match args {
            [] => Ok(Vec::new()),
            [first] => match first {
                Val::Int(_) => Ok(Vec::new()),
                other => self.list_like_elements(*other).ok_or(RuntimeError::new(ErrorCode::BadTypeBif)),
            },
            [_, Val::Int(n)] => match usize::try_from(*n) {
                Ok(n) if n <= MAX_VECTOR_LEN => Ok(vec![Val::Nil; n]),
                _ => Err(RuntimeError::with(ErrorCode::BadValBif, "vector element count")),
            },
            [_, source] => self.list_like_elements(*source).ok_or(RuntimeError::new(ErrorCode::ListValReqd)),
            _ => Err(RuntimeError::new(ErrorCode::WrongNumOfArgs)),
        }
    }

    /// Create a TadsObject with the given superclasses and run its
    /// constructor on the `argc` arguments on the stack. Arguments are
    /// consumed either way.
    pub(crate) fn new_instance(&mut self, supers: Vec<ObjId>, argc: usize, transient: bool) -> Result<ObjId, RuntimeError> {
        let id = self.alloc_object(ObjectBody::Tads(TadsObject::new(supers)), transient);
        let ctor = self
            .predefs
            .constructor
            .filter(|ctor| self.defines_prop(Val::Obj(id), *ctor));
        match ctor {
            Some(ctor) => {
                let mark = self.scratch.len();
                self.scratch.push(Val::Obj(id));
                let result = self.get_prop(CallMode::Native, Lookup::call(Val::Obj(id)), ctor, argc);
                self.scratch.truncate(mark);
                result?;
            }
            None if argc > 0 => {
                self.stack.discard(argc);
                return Err(RuntimeError::new(ErrorCode::WrongNumOfArgs));
            }
            None => {}
        }
        Ok(id)
    }
}
