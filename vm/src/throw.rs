use bytecode::{FunctionHeader, exception_table, line_for_offset};
use object::{ObjId, ObjectBody, TadsObject, Val, is_instance_of};

use crate::VM;
use crate::error::{ErrParam, ErrorCode, RuntimeError};
use crate::interpreter::CallMode;
use crate::props::Lookup;

impl VM {
    /// Unwind to the innermost handler for `exc`.
    ///
    /// On success execution resumes at the handler with `exc` on top of the
    /// stack. Reaching a native boundary pops that frame and hands the
    /// exception to the native caller as [`RuntimeError::Unhandled`].
    pub(crate) fn throw(&mut self, exc: ObjId) -> Result<(), RuntimeError> {
        if self.trace_exc != Some(exc) {
            self.trace_exc = Some(exc);
            self.last_trace = self.stack_trace();
        }

        let mut ofs = self.instr_start.saturating_sub(self.entry) as usize;
        loop {
            if self.fp == 0 {
                return Err(RuntimeError::Unhandled(exc));
            }
            let header = self.header_at(self.entry).unwrap_or_default();
            let table = exception_table(self.image.code.bytes(), self.entry as usize, &header).unwrap_or_default();
            let handler = table.iter().find(|e| {
                e.covers(ofs) && (e.class == 0 || is_instance_of(self.heap.objects(), exc, ObjId(e.class)))
            });
            if let Some(handler) = handler {
                self.stack.truncate(self.fp + 1 + header.locals as usize);
                self.stack.push(Val::Obj(exc));
                self.pc = self.entry + handler.handler as u32;
                self.stack.restore_reserve();
                return Ok(());
            }

            let ret = self.pop_frame();
            if ret == 0 {
                log::debug!("exception {exc} unhandled at native boundary (depth {})", self.depth);
                return Err(RuntimeError::Unhandled(exc));
            }
            // the call instruction ends just before the return offset
            ofs = ret as usize - 1;
        }
    }

    /// Build the program-visible exception for a VM-detected error: an
    /// instance of the image's `RuntimeError` class constructed with the
    /// error number, with its message in `exceptionMessage`.
    pub(crate) fn make_runtime_error(&mut self, code: ErrorCode, params: &[ErrParam]) -> Result<ObjId, RuntimeError> {
        if code == ErrorCode::StackOverflow {
            self.stack.release_reserve();
        }
        let class = self
            .predefs
            .runtime_error
            .filter(|c| self.heap.objects().is_live(*c));
        let exc = self
            .heap
            .alloc(ObjectBody::Tads(TadsObject::new(class.into_iter().collect())));

        let mark = self.scratch.len();
        self.scratch.push(Val::Obj(exc));
        let result = self.construct_runtime_error(exc, code, params);
        self.scratch.truncate(mark);
        result.map(|()| exc)
    }

    fn construct_runtime_error(&mut self, exc: ObjId, code: ErrorCode, params: &[ErrParam]) -> Result<(), RuntimeError> {
        if let Some(ctor) = self.predefs.constructor {
            if self.defines_prop(Val::Obj(exc), ctor) {
                self.stack.check_space(1)?;
                self.stack.push(Val::Int(code.number() as i32));
                match self.get_prop(CallMode::Native, Lookup::call(Val::Obj(exc)), ctor, 1) {
                    Ok(_) => {}
                    // a failing constructor leaves the bare object
                    Err(RuntimeError::Vm { code: inner, .. }) => {
                        log::debug!("RuntimeError constructor failed with {}", inner.number());
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        if let Some(msg) = self.predefs.exception_message {
            let text = self.new_string(code.format(params).into_bytes());
            self.heap.set_prop(exc, msg, text);
        }
        Ok(())
    }

    fn describe_function(&self, fp: usize, entry: u32) -> String {
        let prop = self.stack.target_prop(fp);
        if prop.is_valid() {
            let target = match self.stack.self_val(fp) {
                Val::Obj(id) => self
                    .symbol_name(Val::Obj(id))
                    .map(str::to_string)
                    .unwrap_or_else(|| id.to_string()),
                other => format!("{other:?}"),
            };
            let prop_name = self
                .symbol_name(Val::Prop(prop))
                .map(str::to_string)
                .unwrap_or_else(|| prop.to_string());
            return format!("{target}.{prop_name}");
        }
        match self.symbol_name(Val::FuncPtr(entry)) {
            Some(name) => name.to_string(),
            None => format!("function@{entry:#x}"),
        }
    }

    /// One line per active frame, innermost first.
    pub fn stack_trace(&self) -> Vec<String> {
        let mut frames = Vec::new();
        let mut fp = self.fp;
        let mut entry = self.entry;
        let mut ofs = Some(self.instr_start.saturating_sub(self.entry));
        while fp != 0 {
            let mut line = self.describe_function(fp, entry);
            if let Some(ofs) = ofs {
                line.push_str(&format!(" +{ofs:#x}"));
                let header: FunctionHeader = self.header_at(entry).unwrap_or_default();
                if let Some(src) = line_for_offset(self.image.code.bytes(), entry as usize, &header, ofs as usize) {
                    line.push_str(&format!(" (line {src})"));
                }
            }
            frames.push(line);

            let ret = self.stack.return_ofs(fp);
            entry = self.stack.caller_entry(fp);
            fp = self.stack.prev_fp(fp);
            ofs = ret.checked_sub(1);
        }
        frames
    }
}
