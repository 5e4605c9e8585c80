use std::sync::atomic::Ordering;

use bytecode::{BytecodeDecoder, DecodeError, FUNC_HEADER_SIZE, FunctionHeader, Instruction, switch_case};
use object::{ObjId, ObjectBody, PropId, Val, read_dataholder};

use crate::VM;
use crate::error::{ErrorCode, RuntimeError};
use crate::props::{Lookup, Search};
use crate::stack::{FRAME_SIZE, Stack};

/// Instructions between polls of the break flag.
const BREAK_POLL_INTERVAL: u64 = 1024;

/// What the run loop does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The frame entered from native code returned.
    Return,
}

/// How a callee is entered: by pushing a frame the current run loop picks
/// up, or by a nested run loop that returns once the callee does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallMode {
    Bytecode,
    Native,
}

/// The method-context slots of a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MethodCtx {
    pub self_val: Val,
    pub target_prop: PropId,
    pub orig_target: Val,
    pub defining: Val,
}

impl MethodCtx {
    /// Context of a plain function call.
    pub fn function() -> Self {
        Self {
            self_val: Val::Nil,
            target_prop: PropId::INVALID,
            orig_target: Val::Nil,
            defining: Val::Nil,
        }
    }
}

fn decode_error(e: DecodeError) -> RuntimeError {
    match e {
        DecodeError::UnknownOpcode { byte, .. } => RuntimeError::with(ErrorCode::InvalidOpcode, byte as i64),
        DecodeError::Truncated { at } | DecodeError::BadBranch { at } => {
            RuntimeError::with(ErrorCode::InvalidOpcode, at as i64)
        }
    }
}

impl VM {
    // ── Frames ──

    pub(crate) fn header_at(&self, entry: u32) -> Result<FunctionHeader, RuntimeError> {
        FunctionHeader::parse(self.image.code.bytes(), entry as usize)
            .map_err(|_| RuntimeError::new(ErrorCode::CodePtrValReqd))
    }

    /// Push a frame for the method at `target`. `ret` is the caller's
    /// method-relative resume offset, 0 for a call from native code.
    pub(crate) fn do_call(&mut self, ret: u32, target: u32, argc: usize, ctx: MethodCtx) -> Result<(), RuntimeError> {
        let header = self.header_at(target)?;
        if !header.accepts(argc) {
            return Err(match self.symbol_name(Val::FuncPtr(target)) {
                Some(name) => RuntimeError::with(ErrorCode::WrongNumOfArgsCalling, name.to_string()),
                None => RuntimeError::new(ErrorCode::WrongNumOfArgs),
            });
        }
        self.stack
            .check_space(FRAME_SIZE + header.locals as usize + header.stack_depth as usize)?;

        self.stack.push(Val::Prop(ctx.target_prop));
        self.stack.push(ctx.orig_target);
        self.stack.push(ctx.defining);
        self.stack.push(ctx.self_val);
        self.stack.push(Val::Int(ret as i32));
        self.stack.push(Val::CodeOfs(self.entry));
        self.stack.push(Val::Int(argc as i32));
        self.stack.push(Val::StackPtr(self.fp as u32));
        self.fp = self.stack.len() - 1;
        self.entry = target;
        self.pc = target + FUNC_HEADER_SIZE as u32;
        for _ in 0..header.locals {
            self.stack.push(Val::Nil);
        }
        Ok(())
    }

    /// Remove the current frame and its arguments. Returns the frame's
    /// return offset.
    pub(crate) fn pop_frame(&mut self) -> u32 {
        let fp = self.fp;
        let ret = self.stack.return_ofs(fp);
        let base = self.stack.frame_base(fp);
        self.entry = self.stack.caller_entry(fp);
        self.fp = self.stack.prev_fp(fp);
        self.stack.truncate(base);
        ret
    }

    fn do_return(&mut self) -> Flow {
        match self.pop_frame() {
            0 => Flow::Return,
            ret => {
                self.pc = self.entry + ret;
                Flow::Continue
            }
        }
    }

    /// Enter the method at `target` with `argc` arguments on the stack.
    pub(crate) fn enter(&mut self, mode: CallMode, target: u32, argc: usize, ctx: MethodCtx) -> Result<Flow, RuntimeError> {
        match mode {
            CallMode::Bytecode => {
                let ret = self.pc - self.entry;
                self.do_call(ret, target, argc, ctx)?;
            }
            CallMode::Native => {
                self.call_native(target, argc, ctx)?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Run the method at `target` to completion in a nested run loop and
    /// return its result.
    pub(crate) fn call_native(&mut self, target: u32, argc: usize, ctx: MethodCtx) -> Result<Val, RuntimeError> {
        let (pc, instr_start) = (self.pc, self.instr_start);
        let (fp, entry) = (self.fp, self.entry);
        let base = self.stack.len().saturating_sub(argc);
        if let Err(e) = self.do_call(0, target, argc, ctx) {
            self.stack.discard(argc);
            return Err(e);
        }
        self.depth += 1;
        log::debug!("native re-entry: depth {}", self.depth);
        let result = self.run();
        self.depth -= 1;
        log::debug!("native re-entry: back to depth {}", self.depth);
        if let Err(RuntimeError::Halted) = result {
            // a halt abandons every frame the nested loop still had active
            self.stack.truncate(base);
            self.fp = fp;
            self.entry = entry;
        }
        self.pc = pc;
        self.instr_start = instr_start;
        result.map(|()| self.r0)
    }

    /// Call a function-like value: a function pointer, a property of
    /// `self`, an anonymous function, an object answering `ObjectCallProp`,
    /// or a builtin.
    pub(crate) fn call_value(&mut self, mode: CallMode, func: Val, argc: usize) -> Result<Flow, RuntimeError> {
        match func {
            Val::FuncPtr(ofs) | Val::CodeOfs(ofs) => self.enter(mode, ofs, argc, MethodCtx::function()),
            Val::Prop(prop) => {
                let self_val = self.current_self();
                self.get_prop(mode, Lookup::call(self_val), prop, argc)
            }
            Val::Obj(id) => {
                let anon_fn = match self.heap.get(id) {
                    Some(ObjectBody::AnonFn(elements)) => elements.first().copied(),
                    Some(_) => None,
                    None => return Err(RuntimeError::new(ErrorCode::FuncPtrValReqd)),
                };
                match anon_fn {
                    Some(Val::FuncPtr(ofs) | Val::CodeOfs(ofs)) => {
                        let ctx = MethodCtx {
                            self_val: func,
                            target_prop: PropId::INVALID,
                            orig_target: func,
                            defining: func,
                        };
                        self.enter(mode, ofs, argc, ctx)
                    }
                    Some(_) => Err(RuntimeError::new(ErrorCode::FuncPtrValReqd)),
                    None => {
                        let prop = self
                            .predefs
                            .object_call_prop
                            .ok_or(RuntimeError::new(ErrorCode::FuncPtrValReqd))?;
                        self.get_prop(mode, Lookup::call(func), prop, argc)
                    }
                }
            }
            Val::BifPtr { set, index } => {
                self.call_builtin(set, index, argc)?;
                Ok(Flow::Continue)
            }
            _ => Err(RuntimeError::new(ErrorCode::FuncPtrValReqd)),
        }
    }

    /// [`call_value`](Self::call_value) from native code; returns the result.
    pub(crate) fn call_value_native(&mut self, func: Val, argc: usize) -> Result<Val, RuntimeError> {
        self.call_value(CallMode::Native, func, argc)?;
        Ok(self.r0)
    }

    /// Evaluate `target.prop` with `argc` arguments on the stack from
    /// native code; returns the result.
    pub(crate) fn call_prop_native(&mut self, target: Val, prop: PropId, argc: usize) -> Result<Val, RuntimeError> {
        self.get_prop(CallMode::Native, Lookup::call(target), prop, argc)?;
        Ok(self.r0)
    }

    // ── Context ──

    pub(crate) fn current_self(&self) -> Val {
        if self.fp == 0 { Val::Nil } else { self.stack.self_val(self.fp) }
    }

    fn current_argc(&self) -> usize {
        if self.fp == 0 { 0 } else { self.stack.argc(self.fp) }
    }

    fn local(&self, lcl: u16) -> Val {
        self.stack.get(Stack::local_index(self.fp, lcl as usize))
    }

    fn set_local(&mut self, lcl: u16, val: Val) {
        self.stack.set(Stack::local_index(self.fp, lcl as usize), val);
    }

    fn arg(&self, arg: u16) -> Result<Val, RuntimeError> {
        Ok(self.stack.get(Stack::arg_index(self.fp, arg as usize)?))
    }

    /// Frame `level` frames out from the current one.
    fn frame_at(&self, level: u16) -> Result<usize, RuntimeError> {
        let mut fp = self.fp;
        for _ in 0..level {
            if fp == 0 {
                break;
            }
            fp = self.stack.prev_fp(fp);
        }
        if fp == 0 {
            return Err(RuntimeError::new(ErrorCode::IndexOutOfRange));
        }
        Ok(fp)
    }

    fn pop_int(&mut self) -> Result<i32, RuntimeError> {
        self.stack
            .pop()
            .as_int()
            .ok_or(RuntimeError::new(ErrorCode::IntValReqd))
    }

    fn pop_prop(&mut self) -> Result<PropId, RuntimeError> {
        self.stack
            .pop()
            .as_prop()
            .ok_or(RuntimeError::new(ErrorCode::PropPtrValReqd))
    }

    // ── Run loop ──

    /// Execute until the frame entered from native code returns.
    pub(crate) fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.halt.load(Ordering::Relaxed) {
                log::warn!("halt requested; stopping at {:#x}", self.pc);
                return Err(RuntimeError::Halted);
            }
            self.instr_count += 1;
            if self.instr_count % BREAK_POLL_INTERVAL == 0 {
                self.poll_break();
            }
            if self.heap.should_collect() {
                self.collect_garbage();
            }

            self.instr_start = self.pc;
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return) => return Ok(()),
                Err(e) => self.handle_error(e)?,
            }
        }
    }

    fn poll_break(&mut self) {
        let flag = self.break_requested.swap(false, Ordering::Relaxed);
        if flag || self.host.poll_break() {
            log::debug!("break requested at {:#x}; no debugger attached", self.pc);
        }
    }

    /// Turn an error into a program-visible exception and throw it.
    fn handle_error(&mut self, err: RuntimeError) -> Result<(), RuntimeError> {
        let exc = match err {
            RuntimeError::Halted => return Err(RuntimeError::Halted),
            RuntimeError::Unhandled(exc) => exc,
            RuntimeError::Vm { code, params } => match self.make_runtime_error(code, &params) {
                Ok(exc) => exc,
                Err(RuntimeError::Unhandled(exc)) => exc,
                Err(e) => return Err(e),
            },
        };
        self.throw(exc)
    }

    fn decode_at(&self, pc: u32) -> Result<(Instruction, u32), RuntimeError> {
        let mut decoder = BytecodeDecoder::at(self.image.code.bytes(), pc as usize);
        let instr = decoder.decode_next().map_err(decode_error)?;
        Ok((instr, decoder.offset() as u32))
    }

    fn step(&mut self) -> Result<Flow, RuntimeError> {
        let (mut instr, next) = self.decode_at(self.pc)?;
        self.pc = next;
        if instr == Instruction::VarArgc {
            let argc = self.pop_int()?;
            let (modified, next) = self.decode_at(self.pc)?;
            self.pc = next;
            instr = modified
                .with_argc(argc.max(0) as u16)
                .ok_or(RuntimeError::new(ErrorCode::InvalidOpcodeMod))?;
        }
        if self.trace {
            log::trace!("{:#08x} {}", self.instr_start, instr);
        }
        self.execute(instr)
    }

    fn jump_if(&mut self, cond: bool, target: u32) {
        if cond {
            self.pc = target;
        }
    }

    fn execute(&mut self, instr: Instruction) -> Result<Flow, RuntimeError> {
        use Instruction as I;

        match instr {
            // ── Constants ──
            I::PushInt { value } => self.stack.push(Val::Int(value)),
            I::PushStr { ofs } => self.stack.push(Val::SString(ofs)),
            I::PushLst { ofs } => self.stack.push(Val::List(ofs)),
            I::PushObj { obj } => self.stack.push(Val::obj(ObjId(obj))),
            I::PushNil => self.stack.push(Val::Nil),
            I::PushTrue => self.stack.push(Val::True),
            I::PushPropId { prop } => self.stack.push(Val::Prop(PropId(prop))),
            I::PushFnPtr { ofs } => self.stack.push(Val::FuncPtr(ofs)),
            I::PushEnum { value } => self.stack.push(Val::Enum(value)),
            I::PushBifPtr { set, index } => self.stack.push(Val::BifPtr { set, index }),
            I::PushStrI { start, len } => {
                let bytes = self
                    .image
                    .code
                    .slice(start, len as usize)
                    .ok_or(RuntimeError::with(ErrorCode::InvalidOpcode, start as i64))?
                    .to_vec();
                let s = self.new_string(bytes);
                self.stack.push(s);
            }
            I::PushParLst { fixed } => {
                let argc = self.current_argc();
                let items = (fixed as usize..argc)
                    .map(|i| self.arg(i as u16))
                    .collect::<Result<_, _>>()?;
                let list = self.new_list(items);
                self.stack.push(list);
            }
            I::MakeLstPar => {
                let val = self.stack.pop();
                let count = self.pop_int()?;
                match self.list_like_elements(val) {
                    Some(items) => {
                        self.stack.check_space(items.len() + 1)?;
                        for item in items.iter().rev() {
                            self.stack.push(*item);
                        }
                        self.stack.push(Val::Int(count.wrapping_add(items.len() as i32)));
                    }
                    None => {
                        self.stack.push(val);
                        self.stack.push(Val::Int(count.wrapping_add(1)));
                    }
                }
            }

            // ── Arithmetic ──
            I::Neg => {
                let a = self.stack.pop();
                let r = self.neg(a)?;
                self.stack.push(r);
            }
            I::BNot => {
                let a = self.stack.pop();
                let r = self.bit_not(a)?;
                self.stack.push(r);
            }
            I::Add | I::Sub | I::Mul | I::Div | I::Mod | I::BAnd | I::BOr | I::Xor | I::Shl | I::AShr | I::LShr => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                let r = match instr {
                    I::Add => self.add(a, b)?,
                    I::Sub => self.sub(a, b)?,
                    I::Mul => self.mul(a, b)?,
                    I::Div => self.div(a, b)?,
                    I::Mod => self.modulo(a, b)?,
                    I::BAnd => self.bit_and(a, b)?,
                    I::BOr => self.bit_or(a, b)?,
                    I::Xor => self.xor(a, b)?,
                    I::Shl => self.shl(a, b)?,
                    I::AShr => self.ashr(a, b)?,
                    _ => self.lshr(a, b)?,
                };
                self.stack.push(r);
            }
            I::Inc => {
                let a = self.stack.pop();
                let r = self.add(a, Val::Int(1))?;
                self.stack.push(r);
            }
            I::Dec => {
                let a = self.stack.pop();
                let r = self.sub(a, Val::Int(1))?;
                self.stack.push(r);
            }
            I::Not => {
                let a = self.stack.pop();
                self.stack.push(Val::bool(!self.truthy(a)?));
            }
            I::Boolize => {
                let a = self.stack.pop();
                self.stack.push(Val::bool(self.truthy(a)?));
            }

            // ── Comparison ──
            I::Eq | I::Ne => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                let eq = self.equals(a, b);
                self.stack.push(Val::bool(eq == matches!(instr, I::Eq)));
            }
            I::Lt | I::Le | I::Gt | I::Ge => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                let ord = self.compare(a, b)?;
                let r = match instr {
                    I::Lt => ord.is_lt(),
                    I::Le => ord.is_le(),
                    I::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                };
                self.stack.push(Val::bool(r));
            }

            // ── Calls and returns ──
            I::RetVal => {
                self.r0 = self.stack.pop();
                return Ok(self.do_return());
            }
            I::RetNil => {
                self.r0 = Val::Nil;
                return Ok(self.do_return());
            }
            I::RetTrue => {
                self.r0 = Val::True;
                return Ok(self.do_return());
            }
            I::Ret => return Ok(self.do_return()),
            I::Call { argc, ofs } => {
                return self.enter(CallMode::Bytecode, ofs, argc as usize, MethodCtx::function());
            }
            I::PtrCall { argc } => {
                let func = self.stack.pop();
                return self.call_value(CallMode::Bytecode, func, argc as usize);
            }

            // ── Property evaluation ──
            I::GetProp { prop } => {
                let target = self.stack.pop();
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), 0);
            }
            I::CallProp { argc, prop } => {
                let target = self.stack.pop();
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), argc as usize);
            }
            I::PtrCallProp { argc } => {
                let prop = self.pop_prop()?;
                let target = self.stack.pop();
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), prop, argc as usize);
            }
            I::GetPropSelf { prop } => {
                let target = self.current_self();
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), 0);
            }
            I::CallPropSelf { argc, prop } => {
                let target = self.current_self();
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), argc as usize);
            }
            I::PtrCallPropSelf { argc } => {
                let prop = self.pop_prop()?;
                let target = self.current_self();
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), prop, argc as usize);
            }
            I::ObjGetProp { obj, prop } => {
                let target = Val::obj(ObjId(obj));
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), 0);
            }
            I::ObjCallProp { argc, obj, prop } => {
                let target = Val::obj(ObjId(obj));
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), argc as usize);
            }
            I::GetPropData { prop } => {
                let target = self.stack.pop();
                return self.get_prop(CallMode::Bytecode, Lookup::data(target), PropId(prop), 0);
            }
            I::PtrGetPropData => {
                let prop = self.pop_prop()?;
                let target = self.stack.pop();
                return self.get_prop(CallMode::Bytecode, Lookup::data(target), prop, 0);
            }
            I::GetPropLcl1 { lcl, prop } => {
                let target = self.local(lcl);
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), 0);
            }
            I::CallPropLcl1 { argc, lcl, prop } => {
                let target = self.local(lcl);
                return self.get_prop(CallMode::Bytecode, Lookup::call(target), PropId(prop), argc as usize);
            }
            I::GetPropR0 { prop } => {
                return self.get_prop(CallMode::Bytecode, Lookup::call(self.r0), PropId(prop), 0);
            }
            I::CallPropR0 { argc, prop } => {
                return self.get_prop(CallMode::Bytecode, Lookup::call(self.r0), PropId(prop), argc as usize);
            }
            I::Inherit { argc, prop } => {
                let lookup = self.inherited_lookup()?;
                return self.get_prop(CallMode::Bytecode, lookup, PropId(prop), argc as usize);
            }
            I::PtrInherit { argc } => {
                let prop = self.pop_prop()?;
                let lookup = self.inherited_lookup()?;
                return self.get_prop(CallMode::Bytecode, lookup, prop, argc as usize);
            }
            I::ExpInherit { argc, prop, obj } => {
                let lookup = Lookup::delegated(Val::obj(ObjId(obj)), self.current_self());
                return self.get_prop(CallMode::Bytecode, lookup, PropId(prop), argc as usize);
            }
            I::PtrExpInherit { argc, obj } => {
                let prop = self.pop_prop()?;
                let lookup = Lookup::delegated(Val::obj(ObjId(obj)), self.current_self());
                return self.get_prop(CallMode::Bytecode, lookup, prop, argc as usize);
            }
            I::Delegate { argc, prop } => {
                let target = self.stack.pop();
                let lookup = Lookup::delegated(target, self.current_self());
                return self.get_prop(CallMode::Bytecode, lookup, PropId(prop), argc as usize);
            }
            I::PtrDelegate { argc } => {
                let prop = self.pop_prop()?;
                let target = self.stack.pop();
                let lookup = Lookup::delegated(target, self.current_self());
                return self.get_prop(CallMode::Bytecode, lookup, prop, argc as usize);
            }
            I::VarArgc => return Err(RuntimeError::new(ErrorCode::InvalidOpcodeMod)),

            // ── Stack and frame access ──
            I::Swap2 => {
                self.stack.swap(0, 2);
                self.stack.swap(1, 3);
            }
            I::SwapN { a, b } => self.stack.swap(a as usize, b as usize),
            I::GetLcl { lcl } => self.stack.push(self.local(lcl)),
            I::GetArg { arg } => {
                let v = self.arg(arg)?;
                self.stack.push(v);
            }
            I::PushSelf => self.stack.push(self.current_self()),
            I::GetArgc => self.stack.push(Val::Int(self.current_argc() as i32)),
            I::Dup => self.stack.push(self.stack.peek(0)),
            I::Disc { count } => self.stack.discard(count as usize),
            I::GetR0 => self.stack.push(self.r0),
            I::Swap => self.stack.swap(0, 1),
            I::Dup2 => {
                self.stack.push(self.stack.peek(1));
                self.stack.push(self.stack.peek(1));
            }
            I::DupR0 => {
                self.stack.push(self.r0);
                self.stack.push(self.r0);
            }
            I::GetSpN { idx } => self.stack.push(self.stack.peek(idx as usize)),
            I::GetDbLcl { lcl, level } => {
                let fp = self.frame_at(level)?;
                self.stack.push(self.stack.get(Stack::local_index(fp, lcl as usize)));
            }
            I::GetDbArg { arg, level } => {
                let fp = self.frame_at(level)?;
                let slot = Stack::arg_index(fp, arg as usize)?;
                self.stack.push(self.stack.get(slot));
            }
            I::GetDbArgc { level } => {
                let fp = self.frame_at(level)?;
                self.stack.push(Val::Int(self.stack.argc(fp) as i32));
            }
            I::SetDbLcl { lcl, level } => {
                let fp = self.frame_at(level)?;
                let val = self.stack.pop();
                self.stack.set(Stack::local_index(fp, lcl as usize), val);
            }
            I::SetDbArg { arg, level } => {
                let fp = self.frame_at(level)?;
                let slot = Stack::arg_index(fp, arg as usize)?;
                let val = self.stack.pop();
                self.stack.set(slot, val);
            }
            I::PushCtxEle { code } => {
                let val = match code {
                    1 => Val::Prop(self.stack.target_prop(self.fp)),
                    2 => self.stack.orig_target(self.fp),
                    3 => self.stack.defining(self.fp),
                    4 => Val::FuncPtr(self.entry),
                    _ => return Err(RuntimeError::with(ErrorCode::InvalidOpcode, code as i64)),
                };
                self.stack.push(val);
            }
            I::SetSelf => {
                let val = self.stack.pop();
                self.stack.set_self(self.fp, val);
            }
            I::StoreCtx => {
                let ctx = vec![
                    self.current_self(),
                    Val::Prop(self.stack.target_prop(self.fp)),
                    self.stack.orig_target(self.fp),
                    self.stack.defining(self.fp),
                ];
                let list = self.new_list(ctx);
                self.stack.push(list);
            }
            I::LoadCtx => {
                let ctx = self.stack.pop();
                let items = self
                    .list_like_elements(ctx)
                    .filter(|items| items.len() >= 4)
                    .ok_or(RuntimeError::new(ErrorCode::ListValReqd))?;
                let fp = self.fp;
                self.stack.set_self(fp, items[0]);
                self.stack
                    .set_target_prop(fp, items[1].as_prop().unwrap_or(PropId::INVALID));
                self.stack.set_orig_target(fp, items[2]);
                self.stack.set_defining(fp, items[3]);
            }

            // ── Branches ──
            I::Switch { count, table, default } => {
                let val = self.stack.pop();
                let mut target = default;
                for i in 0..count {
                    let (holder, case_target) = switch_case(self.image.code.bytes(), table, i)
                        .ok_or(RuntimeError::with(ErrorCode::InvalidOpcode, table as i64))?;
                    let case = read_dataholder(&holder)
                        .map_err(|_| RuntimeError::with(ErrorCode::InvalidOpcode, table as i64))?;
                    if case.is_some_and(|c| self.equals(val, c)) {
                        target = case_target;
                        break;
                    }
                }
                self.pc = target;
            }
            I::Jmp { target } => self.pc = target,
            I::Jt { target } => {
                let v = self.stack.pop();
                let cond = self.truthy(v)?;
                self.jump_if(cond, target);
            }
            I::Jf { target } => {
                let v = self.stack.pop();
                let cond = !self.truthy(v)?;
                self.jump_if(cond, target);
            }
            I::Je { target } | I::Jne { target } => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                let eq = self.equals(a, b);
                self.jump_if(eq == matches!(instr, I::Je { .. }), target);
            }
            I::Jgt { target } | I::Jge { target } | I::Jlt { target } | I::Jle { target } => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                let ord = self.compare(a, b)?;
                let cond = match instr {
                    I::Jgt { .. } => ord.is_gt(),
                    I::Jge { .. } => ord.is_ge(),
                    I::Jlt { .. } => ord.is_lt(),
                    _ => ord.is_le(),
                };
                self.jump_if(cond, target);
            }
            I::Jst { target } | I::Jsf { target } => {
                let v = self.stack.peek(0);
                let cond = self.truthy(v)? == matches!(instr, I::Jst { .. });
                if cond {
                    self.pc = target;
                } else {
                    self.stack.pop();
                }
            }
            I::Ljsr { target } => {
                self.stack.push(Val::Int((self.pc - self.entry) as i32));
                self.pc = target;
            }
            I::Lret { lcl } => {
                let ofs = self
                    .local(lcl)
                    .as_int()
                    .ok_or(RuntimeError::new(ErrorCode::IntValReqd))?;
                self.pc = self.entry + ofs as u32;
            }
            I::Jnil { target } => {
                let v = self.stack.pop();
                self.jump_if(v.is_nil(), target);
            }
            I::JNotNil { target } => {
                let v = self.stack.pop();
                self.jump_if(!v.is_nil(), target);
            }
            I::JR0T { target } => {
                let cond = self.truthy(self.r0)?;
                self.jump_if(cond, target);
            }
            I::JR0F { target } => {
                let cond = !self.truthy(self.r0)?;
                self.jump_if(cond, target);
            }

            // ── Locals ──
            I::GetSetLcl1R0 { lcl } => {
                self.stack.push(self.r0);
                self.set_local(lcl, self.r0);
            }
            I::GetSetLcl1 { lcl } => self.set_local(lcl, self.stack.peek(0)),
            I::SetLcl1R0 { lcl } => self.set_local(lcl, self.r0),
            I::SetLcl { lcl } => {
                let v = self.stack.pop();
                self.set_local(lcl, v);
            }
            I::SetArg { arg } => {
                let slot = Stack::arg_index(self.fp, arg as usize)?;
                let v = self.stack.pop();
                self.stack.set(slot, v);
            }
            I::IncLcl { lcl } => {
                let r = self.add(self.local(lcl), Val::Int(1))?;
                self.set_local(lcl, r);
            }
            I::DecLcl { lcl } => {
                let r = self.sub(self.local(lcl), Val::Int(1))?;
                self.set_local(lcl, r);
            }
            I::AddILcl { lcl, value } => {
                let r = self.add(self.local(lcl), Val::Int(value))?;
                self.set_local(lcl, r);
            }
            I::AddToLcl { lcl } => {
                let v = self.stack.pop();
                let r = self.add(self.local(lcl), v)?;
                self.set_local(lcl, r);
            }
            I::SubFromLcl { lcl } => {
                let v = self.stack.pop();
                let r = self.sub(self.local(lcl), v)?;
                self.set_local(lcl, r);
            }
            I::ZeroLcl { lcl } => self.set_local(lcl, Val::Int(0)),
            I::NilLcl { lcl } => self.set_local(lcl, Val::Nil),
            I::OneLcl { lcl } => self.set_local(lcl, Val::Int(1)),

            // ── Output, builtins, exceptions ──
            I::Say { ofs } => {
                let self_val = self.current_self();
                self.say_value(Val::SString(ofs), self_val)?;
            }
            I::SayVal => {
                let v = self.stack.pop();
                let self_val = self.current_self();
                self.say_value(v, self_val)?;
            }
            I::Builtin { argc, set, index } => self.call_builtin(set, index, argc as usize)?,
            I::CallExt { .. } => return Err(RuntimeError::new(ErrorCode::CallextNotImpl)),
            I::Throw => {
                return match self.stack.pop() {
                    Val::Obj(exc) => Err(RuntimeError::Unhandled(exc)),
                    _ => Err(RuntimeError::new(ErrorCode::ExceptionObjReqd)),
                };
            }

            // ── Indexing ──
            I::Index => {
                let idx = self.stack.pop();
                let container = self.stack.pop();
                let r = self.index_value(container, idx)?;
                self.stack.push(r);
            }
            I::IdxInt8 { index } => {
                let container = self.stack.pop();
                let r = self.index_value(container, Val::Int(index as i32))?;
                self.stack.push(r);
            }
            I::IdxLcl1Int8 { lcl, index } => {
                let r = self.index_value(self.local(lcl), Val::Int(index as i32))?;
                self.stack.push(r);
            }
            I::SetInd => {
                let idx = self.stack.pop();
                let container = self.stack.pop();
                let val = self.stack.pop();
                let r = self.set_index(container, idx, val)?;
                self.stack.push(r);
            }
            I::SetIndLcl1I8 { lcl, index } => {
                let val = self.stack.pop();
                let r = self.set_index(self.local(lcl), Val::Int(index as i32), val)?;
                self.set_local(lcl, r);
            }

            // ── Objects ──
            I::New { argc, meta, transient } => self.create_object(meta, argc as usize, transient)?,
            I::SetProp { prop } => {
                let obj = self.stack.pop();
                let val = self.stack.pop();
                self.set_prop_value(obj, PropId(prop), val)?;
            }
            I::PtrSetProp => {
                let prop = self.pop_prop()?;
                let obj = self.stack.pop();
                let val = self.stack.pop();
                self.set_prop_value(obj, prop, val)?;
            }
            I::SetPropSelf { prop } => {
                let val = self.stack.pop();
                self.set_prop_value(self.current_self(), PropId(prop), val)?;
            }
            I::ObjSetProp { obj, prop } => {
                let val = self.stack.pop();
                self.set_prop_value(Val::obj(ObjId(obj)), PropId(prop), val)?;
            }

            I::Bp => return Err(RuntimeError::new(ErrorCode::Breakpoint)),
            I::Nop => {}
        }
        Ok(Flow::Continue)
    }

    fn inherited_lookup(&self) -> Result<Lookup, RuntimeError> {
        let self_obj = match self.current_self() {
            Val::Obj(id) => id,
            Val::Nil => return Err(RuntimeError::new(ErrorCode::NilSelf)),
            _ => return Err(RuntimeError::new(ErrorCode::ObjValReqd)),
        };
        let defining = self
            .stack
            .defining(self.fp)
            .as_obj()
            .ok_or(RuntimeError::new(ErrorCode::ObjValReqd))?;
        Ok(Lookup {
            search: Search::After { self_obj, defining },
            self_val: Val::Obj(self_obj),
            orig_target: self.stack.orig_target(self.fp),
            data_only: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ImageBuilder, run_entry};
    use bytecode::{MethodBuilder, Op};

    fn run_method(m: MethodBuilder) -> Result<Val, RuntimeError> {
        let mut b = ImageBuilder::new();
        let entry = b.method(m);
        b.entry(entry);
        run_entry(b).1
    }

    #[test]
    fn arithmetic_and_locals() {
        let mut m = MethodBuilder::new(0, 1);
        m.emit(Instruction::PushInt { value: 3 });
        m.emit(Instruction::PushInt { value: 4 });
        m.emit(Instruction::Add);
        m.emit(Instruction::SetLcl { lcl: 0 });
        m.emit(Instruction::AddILcl { lcl: 0, value: 10 });
        m.emit(Instruction::IncLcl { lcl: 0 });
        m.emit(Instruction::GetLcl { lcl: 0 });
        m.emit(Instruction::RetVal);
        assert_eq!(run_method(m), Ok(Val::Int(18)));
    }

    #[test]
    fn integer_overflow_wraps() {
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushInt { value: i32::MAX });
        m.emit(Instruction::Inc);
        m.emit(Instruction::RetVal);
        assert_eq!(run_method(m), Ok(Val::Int(i32::MIN)));
    }

    #[test]
    fn loop_with_backward_jump() {
        // sum 1..=10
        let mut m = MethodBuilder::new(0, 2);
        m.emit(Instruction::ZeroLcl { lcl: 0 });
        m.emit(Instruction::OneLcl { lcl: 1 });
        let top = m.current_offset();
        m.emit(Instruction::GetLcl { lcl: 1 });
        m.emit(Instruction::AddToLcl { lcl: 0 });
        m.emit(Instruction::IncLcl { lcl: 1 });
        m.emit(Instruction::GetLcl { lcl: 1 });
        m.emit(Instruction::PushInt { value: 10 });
        m.jump_back(Op::Jle, top);
        m.emit(Instruction::GetLcl { lcl: 0 });
        m.emit(Instruction::RetVal);
        assert_eq!(run_method(m), Ok(Val::Int(55)));
    }

    #[test]
    fn jst_keeps_value_only_when_jumping() {
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushInt { value: 7 });
        m.emit(Instruction::PushInt { value: 0 });
        let skip = m.jump(Op::Jst);
        // not taken: the 0 was popped, 7 remains
        m.emit(Instruction::RetVal);
        m.bind(skip);
        m.emit(Instruction::RetNil);
        assert_eq!(run_method(m), Ok(Val::Int(7)));
    }

    #[test]
    fn static_call_passes_arguments() {
        let mut b = ImageBuilder::new();
        let mut callee = MethodBuilder::new(2, 0);
        callee.emit(Instruction::GetArg { arg: 0 });
        callee.emit(Instruction::GetArg { arg: 1 });
        callee.emit(Instruction::Sub);
        callee.emit(Instruction::RetVal);
        let callee = b.method(callee);

        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushInt { value: 3 }); // arg 1
        m.emit(Instruction::PushInt { value: 10 }); // arg 0
        m.emit(Instruction::Call { argc: 2, ofs: callee });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        let entry = b.method(m);
        b.entry(entry);

        let (vm, result) = run_entry(b);
        assert_eq!(result, Ok(Val::Int(7)));
        // frames and arguments are gone
        assert!(vm.stack.is_empty());
        assert_eq!(vm.fp, 0);
    }

    #[test]
    fn wrong_argument_count_is_catchable() {
        let mut b = ImageBuilder::new();
        let mut callee = MethodBuilder::new(1, 0);
        callee.emit(Instruction::RetNil);
        let callee = b.method(callee);

        let mut m = MethodBuilder::new(0, 0);
        let start = m.current_offset();
        m.emit(Instruction::Call { argc: 0, ofs: callee });
        let end = m.current_offset();
        m.emit(Instruction::RetNil);
        let handler = m.current_offset();
        // the handler returns the exception object left on the stack
        m.emit(Instruction::RetVal);
        m.catch(start, end, 0, handler);
        let entry = b.method(m);
        b.entry(entry);
        let (vm, result) = run_entry(b);
        let exc = result.expect("caught").as_obj().expect("exception object");
        assert_eq!(vm.error_number(exc), Some(ErrorCode::WrongNumOfArgs.number() as i32));
    }

    #[test]
    fn varargc_overrides_argument_count() {
        let mut b = ImageBuilder::new();
        let mut callee = MethodBuilder::new(0, 0).varargs();
        callee.emit(Instruction::GetArgc);
        callee.emit(Instruction::RetVal);
        let callee = b.method(callee);

        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushInt { value: 1 });
        m.emit(Instruction::PushInt { value: 2 });
        m.emit(Instruction::PushInt { value: 3 });
        m.emit(Instruction::PushInt { value: 3 }); // dynamic argc
        m.emit(Instruction::VarArgc);
        m.emit(Instruction::Call { argc: 0, ofs: callee });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        let entry = b.method(m);
        b.entry(entry);
        assert_eq!(run_entry(b).1, Ok(Val::Int(3)));
    }

    #[test]
    fn makelstpar_spreads_lists() {
        let mut b = ImageBuilder::new();
        let list = b.list(&[Val::Int(5), Val::Int(6)]);
        let mut callee = MethodBuilder::new(0, 0).varargs();
        callee.emit(Instruction::GetArgc);
        callee.emit(Instruction::GetArg { arg: 1 });
        callee.emit(Instruction::Add);
        callee.emit(Instruction::RetVal);
        let callee = b.method(callee);

        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushLst { ofs: list });
        m.emit(Instruction::PushInt { value: 1 }); // fixed argument
        m.emit(Instruction::Swap);
        m.emit(Instruction::PushInt { value: 1 });
        m.emit(Instruction::Swap);
        // stack: 1, count=1, list
        m.emit(Instruction::MakeLstPar);
        m.emit(Instruction::VarArgc);
        m.emit(Instruction::Call { argc: 0, ofs: callee });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        let entry = b.method(m);
        b.entry(entry);
        // the elements land ahead of the value already pushed:
        // arg 0 = 5, arg 1 = 6, arg 2 = 1
        assert_eq!(run_entry(b).1, Ok(Val::Int(3 + 6)));
    }

    #[test]
    fn local_subroutine() {
        let mut m = MethodBuilder::new(0, 2);
        m.emit(Instruction::ZeroLcl { lcl: 0 });
        let sub = m.jump(Op::Ljsr);
        let sub2 = m.jump(Op::Ljsr);
        m.emit(Instruction::GetLcl { lcl: 0 });
        m.emit(Instruction::RetVal);
        m.bind(sub);
        m.bind(sub2);
        m.emit(Instruction::SetLcl { lcl: 1 });
        m.emit(Instruction::IncLcl { lcl: 0 });
        m.emit(Instruction::Lret { lcl: 1 });
        assert_eq!(run_method(m), Ok(Val::Int(2)));
    }

    #[test]
    fn switch_selects_matching_case() {
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::PushInt { value: 2 });
        let (cases, default) = m.switch(&[Val::Int(1).to_dataholder(), Val::Int(2).to_dataholder()]);
        m.bind(default);
        m.emit(Instruction::PushInt { value: 0 });
        m.emit(Instruction::RetVal);
        let mut cases = cases.into_iter();
        if let Some(one) = cases.next() {
            m.bind(one);
        }
        m.emit(Instruction::PushInt { value: 10 });
        m.emit(Instruction::RetVal);
        if let Some(two) = cases.next() {
            m.bind(two);
        }
        m.emit(Instruction::PushInt { value: 20 });
        m.emit(Instruction::RetVal);
        assert_eq!(run_method(m), Ok(Val::Int(20)));
    }

    #[test]
    fn halt_flag_stops_execution() {
        let mut m = MethodBuilder::new(0, 0);
        let top = m.current_offset();
        m.emit(Instruction::Nop);
        m.jump_back(Op::Jmp, top);
        let mut b = ImageBuilder::new();
        let entry = b.method(m);
        b.entry(entry);
        let mut vm = b.vm();
        vm.halt_flag().store(true, Ordering::Relaxed);
        assert_eq!(vm.run_main(&[]), Err(RuntimeError::Halted));
        assert!(vm.stack.is_empty());
        assert_eq!(vm.fp, 0);
        assert_eq!(vm.depth, 0);
    }

    #[test]
    fn vm_is_reusable_after_halt() {
        let mut b = ImageBuilder::new();
        let mut spin = MethodBuilder::new(1, 2);
        let top = spin.current_offset();
        spin.emit(Instruction::Nop);
        spin.jump_back(Op::Jmp, top);
        let spin = b.method(spin);
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::RetNil);
        let entry = b.method(m);
        b.entry(entry);

        let mut vm = b.vm();
        let halt = vm.halt_flag();
        halt.store(true, Ordering::Relaxed);
        let result = vm.call_function(Val::FuncPtr(spin), &[Val::Int(1)]);
        assert_eq!(result, Err(RuntimeError::Halted));
        assert!(vm.stack.is_empty());
        assert_eq!((vm.fp, vm.depth), (0, 0));

        halt.store(false, Ordering::Relaxed);
        assert_eq!(vm.run_main(&[]), Ok(Val::Nil));
    }

    #[test]
    fn argument_below_stack_bottom_throws() {
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::GetArg { arg: 3 });
        m.emit(Instruction::RetVal);
        let mut b = ImageBuilder::new();
        let entry = b.method(m);
        b.entry(entry);
        let (vm, result) = run_entry(b);
        let Err(RuntimeError::Unhandled(exc)) = result else {
            panic!("expected an exception, got {result:?}");
        };
        assert_eq!(vm.error_number(exc), Some(ErrorCode::IndexOutOfRange.number() as i32));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn invalid_opcode_raises() {
        let mut b = ImageBuilder::new();
        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::Nop);
        let mut bytes = m.finish();
        // the first code byte: replace NOP with an unassigned opcode
        bytes[FUNC_HEADER_SIZE] = 0x00;
        let entry = b.raw_method(&bytes);
        b.entry(entry);
        let (vm, result) = run_entry(b);
        let Err(RuntimeError::Unhandled(exc)) = result else {
            panic!("expected an unhandled exception, got {result:?}");
        };
        assert_eq!(vm.error_number(exc), Some(ErrorCode::InvalidOpcode.number() as i32));
    }

    #[test]
    fn store_and_load_context() {
        let mut b = ImageBuilder::new();
        let p = b.prop("m");
        let mut method = MethodBuilder::new(0, 1);
        method.emit(Instruction::StoreCtx);
        method.emit(Instruction::SetLcl { lcl: 0 });
        method.emit(Instruction::PushNil);
        method.emit(Instruction::SetSelf);
        method.emit(Instruction::GetLcl { lcl: 0 });
        method.emit(Instruction::LoadCtx);
        method.emit(Instruction::PushCtxEle { code: 1 });
        method.emit(Instruction::RetVal);
        let code = b.method(method);
        let obj = b.object(&[], &[(p, Val::CodeOfs(code))]);

        let mut m = MethodBuilder::new(0, 0);
        m.emit(Instruction::ObjGetProp { obj: obj.0, prop: p.0 });
        m.emit(Instruction::GetR0);
        m.emit(Instruction::RetVal);
        let entry = b.method(m);
        b.entry(entry);
        assert_eq!(run_entry(b).1, Ok(Val::Prop(p)));
    }
}
