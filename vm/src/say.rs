use object::Val;

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::interpreter::CallMode;
use crate::props::Lookup;

impl VM {
    /// Print `val` on behalf of `self_val`: through `self_val`'s say method
    /// when it defines one, else through the say function.
    pub(crate) fn say_value(&mut self, val: Val, self_val: Val) -> Result<(), RuntimeError> {
        // self-printing strings are handed on as ordinary strings
        let val = match val {
            Val::DString(ofs) => Val::SString(ofs),
            other => other,
        };

        if let Val::Obj(_) = self_val {
            if self.say_method.is_valid() && self.defines_prop(self_val, self.say_method) {
                self.stack.check_space(1)?;
                self.stack.push(val);
                self.get_prop(CallMode::Native, Lookup::call(self_val), self.say_method, 1)?;
                return Ok(());
            }
        }

        if self.say_func.is_nil() {
            return Err(RuntimeError::new(ErrorCode::SayIsNotDefined));
        }
        self.stack.check_space(1)?;
        self.stack.push(val);
        let func = self.say_func;
        self.call_value_native(func, 1)?;
        Ok(())
    }
}
