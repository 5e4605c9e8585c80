//! Value conversions, arithmetic, comparison and indexing.
//!
//! Integer operands take the fast path with wrapping 32-bit arithmetic;
//! everything else dispatches on the left operand's type.

use std::cmp::Ordering;

use object::{LookupKey, ObjectBody, Val};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};

impl VM {
    // ── Conversions ──

    /// Truth value for conditional branches and `NOT`.
    pub(crate) fn truthy(&self, v: Val) -> Result<bool, RuntimeError> {
        match v {
            Val::Nil => Ok(false),
            Val::Int(n) => Ok(n != 0),
            Val::StackPtr(_) | Val::NativeCode => Err(RuntimeError::new(ErrorCode::NoLogConv)),
            _ => Ok(true),
        }
    }

    /// Bytes of a constant or heap string.
    pub(crate) fn string_bytes(&self, v: Val) -> Option<Vec<u8>> {
        match v {
            Val::SString(ofs) | Val::DString(ofs) => self.image.consts.const_str(ofs).map(<[u8]>::to_vec),
            Val::Obj(id) => self.heap.get(id)?.as_string().map(<[u8]>::to_vec),
            _ => None,
        }
    }

    /// Elements of a constant list, heap list or vector.
    pub(crate) fn list_like_elements(&self, v: Val) -> Option<Vec<Val>> {
        match v {
            Val::List(ofs) => self.image.consts.list_items(ofs).ok(),
            Val::Obj(id) => match self.heap.get(id)? {
                ObjectBody::List(items) | ObjectBody::Vector(items) => Some(items.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn is_list(&self, v: Val) -> bool {
        match v {
            Val::List(_) => true,
            Val::Obj(id) => matches!(self.heap.get(id), Some(ObjectBody::List(_))),
            _ => false,
        }
    }

    fn is_vector(&self, v: Val) -> bool {
        matches!(v, Val::Obj(id) if matches!(self.heap.get(id), Some(ObjectBody::Vector(_))))
    }

    pub(crate) fn new_string(&mut self, bytes: Vec<u8>) -> Val {
        Val::Obj(self.heap.alloc(ObjectBody::String(bytes)))
    }

    pub(crate) fn new_list(&mut self, items: Vec<Val>) -> Val {
        Val::Obj(self.heap.alloc(ObjectBody::List(items)))
    }

    /// Default string conversion, as used by `+` on strings and `toString`.
    pub(crate) fn to_display_bytes(&self, v: Val) -> Result<Vec<u8>, RuntimeError> {
        if let Some(bytes) = self.string_bytes(v) {
            return Ok(bytes);
        }
        match v {
            Val::Int(n) => Ok(n.to_string().into_bytes()),
            Val::Nil => Ok(b"nil".to_vec()),
            Val::True => Ok(b"true".to_vec()),
            _ if self.is_list(v) => {
                let items = self.list_like_elements(v).unwrap_or_default();
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    out.extend(self.to_display_bytes(item)?);
                }
                Ok(out)
            }
            _ => Err(RuntimeError::new(ErrorCode::NoStrConv)),
        }
    }

    /// Key identity in a lookup table: strings by content.
    pub(crate) fn lookup_key(&self, v: Val) -> LookupKey {
        match self.string_bytes(v) {
            Some(bytes) if !matches!(v, Val::DString(_)) => LookupKey::Str(bytes),
            _ => LookupKey::Val(v),
        }
    }

    // ── Arithmetic ──

    pub(crate) fn add(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        if let (Val::Int(x), Val::Int(y)) = (a, b) {
            return Ok(Val::Int(x.wrapping_add(y)));
        }
        if let Some(mut bytes) = self.string_bytes(a) {
            bytes.extend(self.to_display_bytes(b)?);
            return Ok(self.new_string(bytes));
        }
        if let Some(mut items) = self.list_like_elements(a) {
            // a list operand concatenates, anything else appends
            match self.list_like_elements(b) {
                Some(rhs) => items.extend(rhs),
                None => items.push(b),
            }
            let body = if self.is_vector(a) { ObjectBody::Vector(items) } else { ObjectBody::List(items) };
            return Ok(Val::Obj(self.heap.alloc(body)));
        }
        Err(RuntimeError::new(ErrorCode::BadTypeAdd))
    }

    pub(crate) fn sub(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        if let (Val::Int(x), Val::Int(y)) = (a, b) {
            return Ok(Val::Int(x.wrapping_sub(y)));
        }
        if let Some(items) = self.list_like_elements(a) {
            let removed = match self.list_like_elements(b) {
                Some(rhs) => rhs,
                None => vec![b],
            };
            let kept: Vec<Val> = items
                .into_iter()
                .filter(|item| !removed.iter().any(|r| self.equals(*item, *r)))
                .collect();
            let body = if self.is_vector(a) { ObjectBody::Vector(kept) } else { ObjectBody::List(kept) };
            return Ok(Val::Obj(self.heap.alloc(body)));
        }
        Err(RuntimeError::new(ErrorCode::BadTypeSub))
    }

    fn int_pair(a: Val, b: Val, code: ErrorCode) -> Result<(i32, i32), RuntimeError> {
        match (a, b) {
            (Val::Int(x), Val::Int(y)) => Ok((x, y)),
            _ => Err(RuntimeError::new(code)),
        }
    }

    pub(crate) fn mul(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeMul)?;
        Ok(Val::Int(x.wrapping_mul(y)))
    }

    pub(crate) fn div(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeDiv)?;
        if y == 0 {
            return Err(RuntimeError::new(ErrorCode::DivideByZero));
        }
        Ok(Val::Int(x.wrapping_div(y)))
    }

    pub(crate) fn modulo(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeMod)?;
        if y == 0 {
            return Err(RuntimeError::new(ErrorCode::DivideByZero));
        }
        Ok(Val::Int(x.wrapping_rem(y)))
    }

    pub(crate) fn neg(&mut self, a: Val) -> Result<Val, RuntimeError> {
        match a {
            Val::Int(x) => Ok(Val::Int(x.wrapping_neg())),
            _ => Err(RuntimeError::new(ErrorCode::BadTypeNeg)),
        }
    }

    pub(crate) fn bit_not(&mut self, a: Val) -> Result<Val, RuntimeError> {
        match a {
            Val::Int(x) => Ok(Val::Int(!x)),
            _ => Err(RuntimeError::new(ErrorCode::BadTypeBitNot)),
        }
    }

    pub(crate) fn bit_and(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeBitAnd)?;
        Ok(Val::Int(x & y))
    }

    pub(crate) fn bit_or(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeBitOr)?;
        Ok(Val::Int(x | y))
    }

    pub(crate) fn xor(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        // XOR doubles as logical exclusive-or on true/nil
        if matches!(a, Val::Nil | Val::True) && matches!(b, Val::Nil | Val::True) {
            return Ok(Val::bool((a == Val::True) != (b == Val::True)));
        }
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeXor)?;
        Ok(Val::Int(x ^ y))
    }

    pub(crate) fn shl(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeShl)?;
        Ok(Val::Int(if (0..32).contains(&y) { x.wrapping_shl(y as u32) } else { 0 }))
    }

    pub(crate) fn ashr(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeAshr)?;
        Ok(Val::Int(x >> y.clamp(0, 31)))
    }

    pub(crate) fn lshr(&mut self, a: Val, b: Val) -> Result<Val, RuntimeError> {
        let (x, y) = Self::int_pair(a, b, ErrorCode::BadTypeLshr)?;
        Ok(Val::Int(if (0..32).contains(&y) { ((x as u32) >> y) as i32 } else { 0 }))
    }

    // ── Comparison ──

    pub(crate) fn equals(&self, a: Val, b: Val) -> bool {
        if a == b {
            return true;
        }
        if let (Some(x), Some(y)) = (self.string_bytes(a), self.string_bytes(b)) {
            return x == y;
        }
        if (self.is_list(a) || self.is_vector(a)) && (self.is_list(b) || self.is_vector(b)) {
            if let (Some(x), Some(y)) = (self.list_like_elements(a), self.list_like_elements(b)) {
                return x.len() == y.len() && x.iter().zip(&y).all(|(p, q)| self.equals(*p, *q));
            }
        }
        false
    }

    pub(crate) fn compare(&self, a: Val, b: Val) -> Result<Ordering, RuntimeError> {
        if let (Val::Int(x), Val::Int(y)) = (a, b) {
            return Ok(x.cmp(&y));
        }
        if let (Some(x), Some(y)) = (self.string_bytes(a), self.string_bytes(b)) {
            return Ok(x.cmp(&y));
        }
        Err(RuntimeError::new(ErrorCode::InvalidComparison))
    }

    // ── Indexing ──

    fn one_based(idx: Val, len: usize) -> Result<usize, RuntimeError> {
        let i = idx.as_int().ok_or(RuntimeError::new(ErrorCode::IntValReqd))?;
        if i < 1 || i as usize > len {
            return Err(RuntimeError::new(ErrorCode::IndexOutOfRange));
        }
        Ok(i as usize - 1)
    }

    pub(crate) fn index_value(&self, container: Val, idx: Val) -> Result<Val, RuntimeError> {
        if let Val::Obj(id) = container {
            match self.heap.get(id) {
                Some(ObjectBody::LookupTable(t)) => {
                    return Ok(t.get(&self.lookup_key(idx)).unwrap_or(t.default));
                }
                Some(ObjectBody::List(items) | ObjectBody::Vector(items) | ObjectBody::AnonFn(items)) => {
                    return Ok(items[Self::one_based(idx, items.len())?]);
                }
                _ => return Err(RuntimeError::new(ErrorCode::CannotIndexType)),
            }
        }
        match self.list_like_elements(container) {
            Some(items) => Ok(items[Self::one_based(idx, items.len())?]),
            None => Err(RuntimeError::new(ErrorCode::CannotIndexType)),
        }
    }

    /// Store into `container[idx]`. Lists are immutable and yield a new
    /// list; vectors and lookup tables are updated in place.
    pub(crate) fn set_index(&mut self, container: Val, idx: Val, val: Val) -> Result<Val, RuntimeError> {
        if let Val::Obj(id) = container {
            match self.heap.get(id) {
                Some(ObjectBody::LookupTable(_)) => {
                    let key = self.lookup_key(idx);
                    self.heap.table_insert(id, key, idx, val);
                    return Ok(container);
                }
                Some(ObjectBody::Vector(items)) => {
                    let len = items.len();
                    let i = idx.as_int().ok_or(RuntimeError::new(ErrorCode::IntValReqd))?;
                    if i < 1 {
                        return Err(RuntimeError::new(ErrorCode::IndexOutOfRange));
                    }
                    let i = i as usize - 1;
                    if i < len {
                        self.heap.set_element(id, i, val);
                    } else {
                        // storing past the end grows the vector
                        self.heap.modify(id, |body| {
                            if let ObjectBody::Vector(items) = body {
                                items.resize(i + 1, Val::Nil);
                                items[i] = val;
                            }
                        });
                    }
                    return Ok(container);
                }
                Some(ObjectBody::List(_)) => {}
                _ => return Err(RuntimeError::new(ErrorCode::CannotIndexType)),
            }
        }
        if !self.is_list(container) {
            return Err(RuntimeError::new(ErrorCode::CannotIndexType));
        }
        let mut items = self.list_like_elements(container).unwrap_or_default();
        let i = Self::one_based(idx, items.len())?;
        items[i] = val;
        Ok(self.new_list(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ImageBuilder, run_entry};
    use bytecode::{Instruction, MethodBuilder};
    use object::ObjId;

    fn vm() -> VM {
        ImageBuilder::new().vm()
    }

    #[test]
    fn string_plus_int() {
        let mut b = ImageBuilder::new();
        let s = b.string("hello ");
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushStr { ofs: s });
        m.emit(Instruction::PushInt { value: 42 });
        m.emit(Instruction::Add);
        m.emit(Instruction::RetVal);
        let entry = b.method(m);
        b.entry(entry);

        let (vm, result) = run_entry(b);
        let r = result.expect("runs");
        assert!(matches!(r, Val::Obj(_)));
        assert_eq!(vm.string_value(r).as_deref(), Some("hello 42"));
    }

    #[test]
    fn list_plus_and_minus() {
        let mut vm = vm();
        let list = vm.new_list(vec![Val::Int(1), Val::Int(2), Val::Int(1)]);
        let appended = vm.add(list, Val::Int(3)).expect("add");
        assert_eq!(
            vm.list_like_elements(appended),
            Some(vec![Val::Int(1), Val::Int(2), Val::Int(1), Val::Int(3)])
        );
        let other = vm.new_list(vec![Val::Int(9)]);
        let joined = vm.add(list, other).expect("add");
        assert_eq!(vm.list_like_elements(joined).map(|v| v.len()), Some(4));
        let removed = vm.sub(list, Val::Int(1)).expect("sub");
        assert_eq!(vm.list_like_elements(removed), Some(vec![Val::Int(2)]));
        // the original is untouched
        assert_eq!(vm.list_like_elements(list).map(|v| v.len()), Some(3));
    }

    #[test]
    fn integer_errors() {
        let mut vm = vm();
        assert_eq!(vm.div(Val::Int(1), Val::Int(0)).map_err(|e| e.code()), Err(Some(ErrorCode::DivideByZero)));
        assert_eq!(vm.modulo(Val::Int(1), Val::Int(0)).map_err(|e| e.code()), Err(Some(ErrorCode::DivideByZero)));
        assert_eq!(vm.div(Val::Int(i32::MIN), Val::Int(-1)), Ok(Val::Int(i32::MIN)));
        assert_eq!(vm.mul(Val::Nil, Val::Int(1)).map_err(|e| e.code()), Err(Some(ErrorCode::BadTypeMul)));
        assert_eq!(vm.add(Val::True, Val::Int(1)).map_err(|e| e.code()), Err(Some(ErrorCode::BadTypeAdd)));
        assert_eq!(vm.lshr(Val::Int(-1), Val::Int(28)), Ok(Val::Int(0xF)));
        assert_eq!(vm.ashr(Val::Int(-16), Val::Int(2)), Ok(Val::Int(-4)));
        assert_eq!(vm.xor(Val::True, Val::Nil), Ok(Val::True));
    }

    #[test]
    fn equality_by_content() {
        let mut vm = vm();
        let a = vm.new_string(b"abc".to_vec());
        let b = vm.new_string(b"abc".to_vec());
        assert!(vm.equals(a, b));
        let l1 = vm.new_list(vec![a, Val::Int(1)]);
        let l2 = vm.new_list(vec![b, Val::Int(1)]);
        assert!(vm.equals(l1, l2));
        assert!(!vm.equals(Val::Int(1), Val::True));
        assert_eq!(vm.compare(a, b), Ok(Ordering::Equal));
        assert!(vm.compare(a, Val::Int(1)).is_err());
        assert_eq!(vm.lookup_key(a), vm.lookup_key(b));
    }

    #[test]
    fn truth_values() {
        let vm = vm();
        assert_eq!(vm.truthy(Val::Nil), Ok(false));
        assert_eq!(vm.truthy(Val::Int(0)), Ok(false));
        assert_eq!(vm.truthy(Val::Obj(ObjId(1))), Ok(true));
        assert!(vm.truthy(Val::StackPtr(0)).is_err());
    }

    #[test]
    fn list_store_copies_vector_store_mutates() {
        let mut vm = vm();
        let list = vm.new_list(vec![Val::Int(1), Val::Int(2)]);
        let updated = vm.set_index(list, Val::Int(2), Val::Int(5)).expect("store");
        assert_ne!(updated, list);
        assert_eq!(vm.index_value(updated, Val::Int(2)), Ok(Val::Int(5)));
        assert_eq!(vm.index_value(list, Val::Int(2)), Ok(Val::Int(2)));
        assert!(vm.index_value(list, Val::Int(3)).is_err());

        let vec = Val::Obj(vm.heap.alloc(ObjectBody::Vector(vec![Val::Int(1)])));
        assert_eq!(vm.set_index(vec, Val::Int(3), Val::True), Ok(vec));
        assert_eq!(vm.list_like_elements(vec), Some(vec![Val::Int(1), Val::Nil, Val::True]));
    }

    #[test]
    fn lookup_table_string_keys() {
        let mut vm = vm();
        let table = Val::Obj(vm.heap.alloc(ObjectBody::LookupTable(Default::default())));
        let k1 = vm.new_string(b"key".to_vec());
        let k2 = vm.new_string(b"key".to_vec());
        vm.set_index(table, k1, Val::Int(7)).expect("store");
        assert_eq!(vm.index_value(table, k2), Ok(Val::Int(7)));
        assert_eq!(vm.index_value(table, Val::Int(1)), Ok(Val::Nil));
    }
}
