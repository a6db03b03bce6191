//! The interpreter: dispatch loop, call frames, and scope resolution.
//!
//! Execution is single-threaded and strictly in program order. The VM owns
//! the evaluation stack, the call-frame stack, and the heap; one `run`
//! executes one script to completion. The only exits from the dispatch
//! loop are a `RETURN` from the outermost frame and a [`VmError`], and in
//! both cases the heap is torn down before control returns to the host.

mod binary;
mod format;

use std::rc::Rc;

use crate::{
    bytecode::Opcode,
    error::{VmError, VmResult},
    heap::{ClosureData, Heap, HeapData, HeapId},
    host::HostValue,
    io::{StdIo, VmIo},
    libs,
    script::Script,
    value::{Kind, Value},
};

/// A single call activation.
///
/// `saved_ptr`/`saved_pc` restore the caller's frame base and program
/// counter on return; the outermost frame never restores them.
#[derive(Debug)]
struct Frame {
    /// The scope created for this call, chained to the closure's captured
    /// scope.
    scope: HeapId,
    /// The script this frame executes; keeps the code alive while the
    /// frame is live.
    script: Rc<Script>,
    param_count: usize,
    saved_ptr: usize,
    saved_pc: i64,
}

/// The virtual machine.
///
/// Heap state (live set, collector colour) is per-instance, so multiple
/// interpreters can coexist in one process.
pub struct Vm<'io, P: VmIo> {
    /// Evaluation stack.
    stack: Vec<Value>,
    /// Call frames; never empty while executing.
    frames: Vec<Frame>,
    heap: Heap,
    io: &'io mut P,
    /// The root library object resolved by `LOAD_LIB`.
    libs: HeapId,
    /// Current frame's scope (cached from `frames.last()`).
    scope: HeapId,
    /// Current scope's bindings object (cached).
    locals: HeapId,
    /// Current frame's script (cached).
    script: Rc<Script>,
    /// Program counter. Signed: a wild jump must be representable so the
    /// next fetch can report it.
    pc: i64,
    /// Frame base: the stack index where the current call's temporaries
    /// begin. Arguments lie below it.
    ptr: usize,
}

impl<'io, P: VmIo> Vm<'io, P> {
    /// Creates a VM writing and reading through `io`.
    pub fn new(io: &'io mut P) -> Self {
        let mut heap = Heap::new();
        let libs = libs::bootstrap(&mut heap);
        let scope = heap.alloc_scope(None);
        let locals = heap.scope(scope).locals;
        Self {
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(16),
            heap,
            io,
            libs,
            scope,
            locals,
            script: Rc::new(Script::default()),
            pc: 0,
            ptr: 1,
        }
    }

    /// Executes `script` to completion and returns its result detached
    /// from the heap.
    ///
    /// The heap is torn down before returning, on success and on error
    /// alike; [`live_heap_objects`](Self::live_heap_objects) is zero
    /// afterwards.
    pub fn run(&mut self, script: &Script) -> VmResult<HostValue> {
        self.reset(script);
        let result = self
            .execute()
            .map(|value| HostValue::from_value(&self.heap, value));
        self.stack.clear();
        self.frames.clear();
        self.heap.clear();
        result
    }

    /// Number of live heap objects, for GC diagnostics.
    #[must_use]
    pub fn live_heap_objects(&self) -> usize {
        self.heap.live_objects()
    }

    /// Rebuilds the initial state: the library object at the bottom of
    /// the stack, one frame with a fresh root scope, `ptr = 1`, `pc = 0`.
    fn reset(&mut self, script: &Script) {
        self.stack.clear();
        self.frames.clear();
        self.heap.clear();

        self.libs = libs::bootstrap(&mut self.heap);
        self.stack.push(Value::Object(self.libs));

        self.script = Rc::new(script.clone());
        let scope = self.heap.alloc_scope(None);
        self.frames.push(Frame {
            scope,
            script: Rc::clone(&self.script),
            param_count: 0,
            saved_ptr: 0,
            saved_pc: -1,
        });
        self.scope = scope;
        self.locals = self.heap.scope(scope).locals;
        self.pc = 0;
        self.ptr = 1;
    }

    /// The dispatch loop.
    fn execute(&mut self) -> VmResult<Value> {
        loop {
            let byte = self.fetch_byte()?;
            let op = Opcode::from_repr(byte)
                .ok_or_else(|| VmError::new(format!("Unknown instruction {byte}")))?;

            match op {
                Opcode::Load => self.op_load()?,
                Opcode::Store => self.op_store()?,
                Opcode::LoadSuper => self.op_load_super()?,
                Opcode::StoreSuper => self.op_store_super()?,
                Opcode::LoadField => self.op_load_field()?,
                Opcode::StoreField => self.op_store_field()?,
                Opcode::LoadItem => self.op_load_item()?,
                Opcode::StoreItem => self.op_store_item()?,
                Opcode::PushBint => {
                    let v = self.fetch_i8()?;
                    self.push(Value::Int(i64::from(v)));
                }
                Opcode::PushWint => {
                    let v = self.fetch_i16()?;
                    self.push(Value::Int(i64::from(v)));
                }
                Opcode::PushDwint => {
                    let v = self.fetch_i32()?;
                    self.push(Value::Int(i64::from(v)));
                }
                Opcode::PushInt => {
                    let v = self.fetch_i64()?;
                    self.push(Value::Int(v));
                }
                Opcode::PushFloat => {
                    let v = self.fetch_f64()?;
                    self.push(Value::Float(v));
                }
                Opcode::PushString => self.op_push_string()?,
                Opcode::PushClosure => self.op_push_closure()?,
                Opcode::PushArg => self.op_push_arg()?,
                Opcode::PushSelf => self.push(Value::Object(self.locals)),
                Opcode::PushSuper => self.op_push_super()?,
                Opcode::NewArray => self.op_new_array()?,
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Dup => {
                    let top = self.peek(0)?;
                    self.push(top);
                }
                Opcode::Add => self.op_add()?,
                Opcode::Sub => self.op_sub()?,
                Opcode::Mul => self.op_mul()?,
                Opcode::Div => self.op_div()?,
                Opcode::Rem => self.op_rem()?,
                Opcode::Pos => self.op_pos()?,
                Opcode::Neg => self.op_neg()?,
                Opcode::Band => self.op_band()?,
                Opcode::Bor => self.op_bor()?,
                Opcode::Bxor => self.op_bxor()?,
                Opcode::Binv => self.op_binv()?,
                Opcode::Shl => self.op_shl()?,
                Opcode::Shr => self.op_shr()?,
                Opcode::Ushr => self.op_ushr()?,
                Opcode::CmpEq => self.op_equality(false)?,
                Opcode::CmpNe => self.op_equality(true)?,
                Opcode::CmpGt => self.op_cmp_gt()?,
                Opcode::CmpLt => self.op_cmp_lt()?,
                Opcode::CmpGe => self.op_cmp_ge()?,
                Opcode::CmpLe => self.op_cmp_le()?,
                Opcode::Not => self.op_not()?,
                Opcode::Len => self.op_len()?,
                Opcode::Jump => {
                    let offset = self.fetch_i8()?;
                    self.pc += i64::from(offset);
                }
                Opcode::JumpIf => self.op_jump_cond(true)?,
                Opcode::JumpUnless => self.op_jump_cond(false)?,
                Opcode::Call => self.op_call()?,
                Opcode::Return => {
                    if let Some(value) = self.op_return()? {
                        return Ok(value);
                    }
                }
                Opcode::In => self.op_in()?,
                Opcode::Out => self.op_out()?,
                Opcode::LoadLib => self.op_load_lib()?,
            }
        }
    }

    // === Operand fetching ===

    fn fetch_byte(&mut self) -> VmResult<u8> {
        let code = self.script.code();
        if self.pc < 0 || self.pc >= code.len() as i64 {
            return Err(VmError::new(format!(
                "PC (={}) goes out of script range",
                self.pc
            )));
        }
        let byte = code[self.pc as usize];
        self.pc += 1;
        Ok(byte)
    }

    fn fetch_bytes<const N: usize>(&mut self) -> VmResult<[u8; N]> {
        let mut buf = [0u8; N];
        for byte in &mut buf {
            *byte = self.fetch_byte()?;
        }
        Ok(buf)
    }

    fn fetch_i8(&mut self) -> VmResult<i8> {
        Ok(self.fetch_byte()? as i8)
    }

    fn fetch_i16(&mut self) -> VmResult<i16> {
        Ok(i16::from_le_bytes(self.fetch_bytes()?))
    }

    fn fetch_i32(&mut self) -> VmResult<i32> {
        Ok(i32::from_le_bytes(self.fetch_bytes()?))
    }

    fn fetch_i64(&mut self) -> VmResult<i64> {
        Ok(i64::from_le_bytes(self.fetch_bytes()?))
    }

    fn fetch_f64(&mut self) -> VmResult<f64> {
        Ok(f64::from_le_bytes(self.fetch_bytes()?))
    }

    /// Fetches a string-pool operand and returns the script it resolves
    /// against; the clone detaches the name's borrow from `self`.
    fn fetch_name(&mut self) -> VmResult<(Rc<Script>, u8)> {
        let idx = self.fetch_byte()?;
        Ok((Rc::clone(&self.script), idx))
    }

    // === Stack access ===

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops one value; popping past the current frame base fails.
    fn pop(&mut self) -> VmResult<Value> {
        if self.stack.len() <= self.ptr {
            return Err(VmError::frame_empty());
        }
        Ok(self.stack.pop().expect("stack longer than frame base"))
    }

    /// The value `offset` slots below the top, without popping.
    fn peek(&self, offset: usize) -> VmResult<Value> {
        let size = self
            .stack
            .len()
            .checked_sub(offset)
            .ok_or_else(VmError::frame_empty)?;
        if size <= self.ptr {
            return Err(VmError::frame_empty());
        }
        Ok(self.stack[size - 1])
    }

    fn top_mut(&mut self) -> VmResult<&mut Value> {
        if self.stack.len() <= self.ptr {
            return Err(VmError::frame_empty());
        }
        Ok(self.stack.last_mut().expect("stack longer than frame base"))
    }

    // === Scope opcodes ===

    fn op_load(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let name = script.get_string(idx)?;
        let value = self
            .heap
            .object(self.locals)
            .get(name)
            .copied()
            .unwrap_or(Value::Nil);
        self.push(value);
        Ok(())
    }

    fn op_store(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let value = self.pop()?;
        let name = script.get_string(idx)?;
        let locals = self.heap.object_mut(self.locals);
        if value.is_nil() {
            locals.remove(name);
        } else {
            locals.insert(name.to_owned(), value);
        }
        Ok(())
    }

    /// The bindings object of the enclosing scope, or the level-0 error.
    fn super_locals(&self) -> VmResult<HeapId> {
        let enclosing = self.heap.scope(self.scope).enclosing.ok_or_else(|| {
            VmError::new("Trying to get level 0 super closure which does not exist")
        })?;
        Ok(self.heap.scope(enclosing).locals)
    }

    fn op_load_super(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let super_locals = self.super_locals()?;
        let name = script.get_string(idx)?;
        let value = self
            .heap
            .object(super_locals)
            .get(name)
            .copied()
            .unwrap_or(Value::Nil);
        self.push(value);
        Ok(())
    }

    fn op_store_super(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let super_locals = self.super_locals()?;
        let value = self.pop()?;
        let name = script.get_string(idx)?;
        let bindings = self.heap.object_mut(super_locals);
        if value.is_nil() {
            bindings.remove(name);
        } else {
            bindings.insert(name.to_owned(), value);
        }
        Ok(())
    }

    // === Field & item opcodes ===

    fn op_load_field(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let target = self.pop()?;
        let Value::Object(obj) = target else {
            return Err(VmError::expected(target.kind(), Kind::Object));
        };
        let name = script.get_string(idx)?;
        let value = self
            .heap
            .object(obj)
            .get(name)
            .copied()
            .unwrap_or(Value::Nil);
        self.push(value);
        Ok(())
    }

    fn op_store_field(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let value = self.pop()?;
        let target = self.pop()?;
        let Value::Object(obj) = target else {
            return Err(VmError::expected(target.kind(), Kind::Object));
        };
        let name = script.get_string(idx)?;
        let fields = self.heap.object_mut(obj);
        if value.is_nil() {
            fields.remove(name);
        } else {
            fields.insert(name.to_owned(), value);
        }
        Ok(())
    }

    /// Normalises an array index, counting negative values from the end.
    fn array_index(&self, arr: HeapId, index: i64) -> VmResult<usize> {
        let len = self.heap.array(arr).len() as i64;
        let idx = if index >= 0 { index } else { len + index };
        if idx < 0 || idx >= len {
            return Err(VmError::new(format!("Array index ({idx}) out of bound")));
        }
        Ok(idx as usize)
    }

    fn op_load_item(&mut self) -> VmResult<()> {
        let key = self.pop()?;
        let target = self.pop()?;
        match target {
            Value::Object(obj) => {
                let Value::Str(key_id) = key else {
                    return Err(VmError::expected(key.kind(), Kind::String));
                };
                let name = self.heap.str_value(key_id);
                let value = self.heap.object(obj).get(name).copied().unwrap_or(Value::Nil);
                self.push(value);
            }
            Value::Array(arr) => {
                let Value::Int(index) = key else {
                    return Err(VmError::expected(key.kind(), Kind::Int));
                };
                let idx = self.array_index(arr, index)?;
                let value = self.heap.array(arr)[idx];
                self.push(value);
            }
            _ => return Err(VmError::invalid(target.kind())),
        }
        Ok(())
    }

    fn op_store_item(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let key = self.pop()?;
        let target = self.pop()?;
        match target {
            Value::Object(obj) => {
                let Value::Str(key_id) = key else {
                    return Err(VmError::expected(key.kind(), Kind::String));
                };
                let name = self.heap.str_value(key_id).to_owned();
                let fields = self.heap.object_mut(obj);
                if value.is_nil() {
                    fields.remove(&name);
                } else {
                    fields.insert(name, value);
                }
            }
            Value::Array(arr) => {
                let Value::Int(index) = key else {
                    return Err(VmError::expected(key.kind(), Kind::Int));
                };
                let idx = self.array_index(arr, index)?;
                self.heap.array_mut(arr)[idx] = value;
            }
            _ => return Err(VmError::invalid(target.kind())),
        }
        Ok(())
    }

    // === Values & frames ===

    fn op_push_string(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let name = script.get_string(idx)?;
        let id = self.heap.alloc_str(name);
        self.push(Value::Str(id));
        Ok(())
    }

    fn op_push_closure(&mut self) -> VmResult<()> {
        let entry = self.fetch_byte()?;
        let id = self.heap.alloc(HeapData::Closure(ClosureData {
            scope: self.scope,
            script: Rc::clone(&self.script),
            entry: i64::from(entry),
        }));
        self.push(Value::Closure(id));
        Ok(())
    }

    fn op_push_arg(&mut self) -> VmResult<()> {
        let index = usize::from(self.fetch_byte()?);
        let param_count = self
            .frames
            .last()
            .expect("frame stack never empty while executing")
            .param_count;
        let value = if index < param_count {
            self.stack[self.ptr - param_count + index]
        } else {
            Value::Nil
        };
        self.push(value);
        Ok(())
    }

    fn op_push_super(&mut self) -> VmResult<()> {
        let level = self.fetch_byte()?;
        let mut scope = self.scope;
        for _ in 0..=level {
            scope = self.heap.scope(scope).enclosing.ok_or_else(|| {
                VmError::new(format!(
                    "Trying to get level {level} super closure which does not exist"
                ))
            })?;
        }
        let locals = self.heap.scope(scope).locals;
        self.push(Value::Object(locals));
        Ok(())
    }

    fn op_new_array(&mut self) -> VmResult<()> {
        let count = usize::from(self.fetch_byte()?);
        if self.stack.len() < self.ptr + count {
            return Err(VmError::frame_empty());
        }
        let items = self.stack.split_off(self.stack.len() - count);
        let id = self.heap.alloc(HeapData::Array(items));
        self.push(Value::Array(id));
        Ok(())
    }

    fn op_jump_cond(&mut self, jump_when: bool) -> VmResult<()> {
        let condition = self.pop()?;
        let Value::Bool(flag) = condition else {
            return Err(VmError::expected(condition.kind(), Kind::Bool));
        };
        let offset = self.fetch_i8()?;
        if flag == jump_when {
            self.pc += i64::from(offset);
        }
        Ok(())
    }

    fn op_call(&mut self) -> VmResult<()> {
        let arg_count = usize::from(self.fetch_byte()?);
        let callee = self.peek(arg_count)?;
        let Value::Closure(id) = callee else {
            return Err(VmError::expected(callee.kind(), Kind::Closure));
        };
        let closure = self.heap.closure(id).clone();

        let scope = self.heap.alloc_scope(Some(closure.scope));
        self.frames.push(Frame {
            scope,
            script: Rc::clone(&closure.script),
            param_count: arg_count,
            saved_ptr: self.ptr,
            saved_pc: self.pc,
        });
        self.script = closure.script;
        self.pc = closure.entry;
        self.ptr = self.stack.len();
        self.scope = scope;
        self.locals = self.heap.scope(scope).locals;
        Ok(())
    }

    /// Executes `RETURN`. Returns the final value when the outermost
    /// frame returns, `None` when execution continues in the caller.
    fn op_return(&mut self) -> VmResult<Option<Value>> {
        if self.stack.len() != self.ptr + 1 {
            return Err(VmError::new("Incorrect stack top position"));
        }
        let value = *self.stack.last().expect("checked above");
        let param_count = self
            .frames
            .last()
            .expect("frame stack never empty while executing")
            .param_count;

        // Drop the return value, the arguments, and the callee, then put
        // the return value back.
        self.stack.truncate(self.stack.len() - param_count - 2);
        self.stack.push(value);

        if self.frames.len() <= 1 {
            return Ok(Some(value));
        }

        let finished = self.frames.pop().expect("more than one frame");
        self.pc = finished.saved_pc;
        self.ptr = finished.saved_ptr;
        let caller = self.frames.last().expect("caller frame present");
        self.script = Rc::clone(&caller.script);
        self.scope = caller.scope;
        self.locals = self.heap.scope(caller.scope).locals;

        self.collect_garbage();
        Ok(None)
    }

    /// Mark-and-sweep from the evaluation stack and the live frame chain.
    fn collect_garbage(&mut self) {
        let roots: Vec<HeapId> = self
            .stack
            .iter()
            .filter_map(|value| value.heap_id())
            .chain(self.frames.iter().map(|frame| frame.scope))
            .collect();
        self.heap.collect(roots);
    }

    // === IO & libraries ===

    fn op_in(&mut self) -> VmResult<()> {
        let token = self
            .io
            .read_token()
            .ok_or_else(|| VmError::new("Failed to read from stdin"))?;
        let id = self.heap.alloc_str(token);
        self.push(Value::Str(id));
        Ok(())
    }

    fn op_out(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let text = format::stringify(&self.heap, value);
        self.io.write_line(&text);
        Ok(())
    }

    fn op_load_lib(&mut self) -> VmResult<()> {
        let (script, idx) = self.fetch_name()?;
        let name = script.get_string(idx)?;
        let value = self.heap.object(self.libs).get(name).copied();
        match value {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => Err(VmError::new(format!("Unknown library {name}"))),
        }
    }
}

/// Runs `script` with standard IO, printing any VM error as
/// `ERROR: {message}` on standard output. The convenience driver for
/// hosts that only care about the script's own output.
pub fn run_script(script: &Script) {
    let mut io = StdIo::new();
    let mut vm = Vm::new(&mut io);
    if let Err(err) = vm.run(script) {
        println!("ERROR: {err}");
    }
}
