//! Byte-level assembler.
//!
//! Instructions are appended as an opcode byte plus little-endian immediates.
//! Control-flow targets are referenced by label name: the emitter writes a
//! u32 placeholder and records a fixup, `close` patches every placeholder
//! once all label offsets are known. Unresolved labels are fatal at close.

use crate::executable::Executable;
use crate::op::{OpCode, PCallCode};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// How a call transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Push a new frame, return here on `Ret`.
    Normal,
    /// Reuse the current frame; execution does not come back.
    Tail,
    /// Run the target on a new executor, push a future for its result.
    Forked,
}

/// Errors detected while building a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    UnresolvedLabel(String),
    DuplicateLabel(String),
    NoEntrypoint,
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::UnresolvedLabel(name) => write!(f, "unresolved label '{name}'"),
            AsmError::DuplicateLabel(name) => write!(f, "duplicate label '{name}'"),
            AsmError::NoEntrypoint => write!(f, "no entrypoint set"),
        }
    }
}

impl Error for AsmError {}

/// Builder for an [`Executable`].
pub struct Assembler {
    code: Vec<u8>,
    lit_strings: Vec<Vec<u8>>,
    lit_lookup: HashMap<Vec<u8>, u32>,
    labels: HashMap<String, u32>,
    fixups: Vec<(String, usize)>,
    entrypoint: Option<String>,
    errors: Vec<AsmError>,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler {
            code: Vec::new(),
            lit_strings: Vec::new(),
            lit_lookup: HashMap::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            entrypoint: None,
            errors: Vec::new(),
        }
    }

    /// Current offset into the instruction buffer.
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Bind `name` to the current offset.
    pub fn label(&mut self, name: &str) {
        if self
            .labels
            .insert(name.to_string(), self.offset())
            .is_some()
        {
            self.errors.push(AsmError::DuplicateLabel(name.to_string()));
        }
    }

    /// Record the label execution starts at.
    pub fn set_entrypoint(&mut self, name: &str) {
        self.entrypoint = Some(name.to_string());
    }

    // Literal loads. The int load picks the most compact encoding.

    pub fn add_load_lit_int(&mut self, val: i32) {
        match val {
            0 => self.op(OpCode::LoadLitInt0),
            1 => self.op(OpCode::LoadLitInt1),
            2..=255 => {
                self.op(OpCode::LoadLitIntSmall);
                self.code.push(val as u8);
            }
            _ => {
                self.op(OpCode::LoadLitInt);
                self.write_i32(val);
            }
        }
    }

    pub fn add_load_lit_long(&mut self, val: i64) {
        self.op(OpCode::LoadLitLong);
        self.code.extend_from_slice(&val.to_le_bytes());
    }

    pub fn add_load_lit_float(&mut self, val: f32) {
        self.op(OpCode::LoadLitFloat);
        self.code.extend_from_slice(&val.to_le_bytes());
    }

    /// Intern `val` in the literal table and load it. Identical literals
    /// share one table entry.
    pub fn add_load_lit_string(&mut self, val: &str) {
        let index = match self.lit_lookup.get(val.as_bytes()) {
            Some(&index) => index,
            None => {
                let index = self.lit_strings.len() as u32;
                self.lit_strings.push(val.as_bytes().to_vec());
                self.lit_lookup.insert(val.as_bytes().to_vec(), index);
                index
            }
        };
        self.op(OpCode::LoadLitString);
        self.write_u32(index);
    }

    pub fn add_load_lit_ip(&mut self, label: &str) {
        self.op(OpCode::LoadLitIp);
        self.write_label_ref(label);
    }

    // Stack frame ops. Allocs and slot accesses pick the small form when the
    // operand fits in a byte.

    pub fn add_stack_alloc(&mut self, amount: u16) {
        if amount <= u8::MAX as u16 {
            self.op(OpCode::StackAllocSmall);
            self.code.push(amount as u8);
        } else {
            self.op(OpCode::StackAlloc);
            self.write_u16(amount);
        }
    }

    pub fn add_stack_store(&mut self, slot: u16) {
        if slot <= u8::MAX as u16 {
            self.op(OpCode::StackStoreSmall);
            self.code.push(slot as u8);
        } else {
            self.op(OpCode::StackStore);
            self.write_u16(slot);
        }
    }

    pub fn add_stack_load(&mut self, slot: u16) {
        if slot <= u8::MAX as u16 {
            self.op(OpCode::StackLoadSmall);
            self.code.push(slot as u8);
        } else {
            self.op(OpCode::StackLoad);
            self.write_u16(slot);
        }
    }

    // Structs.

    pub fn add_make_struct(&mut self, field_count: u8) {
        self.op(OpCode::MakeStruct);
        self.code.push(field_count);
    }

    pub fn add_make_null_struct(&mut self) {
        self.op(OpCode::MakeNullStruct);
    }

    pub fn add_struct_load_field(&mut self, index: u8) {
        self.op(OpCode::StructLoadField);
        self.code.push(index);
    }

    pub fn add_struct_store_field(&mut self, index: u8) {
        self.op(OpCode::StructStoreField);
        self.code.push(index);
    }

    // Atomics.

    pub fn add_make_atomic(&mut self, initial: i32) {
        self.op(OpCode::MakeAtomic);
        self.write_i32(initial);
    }

    pub fn add_atomic_load(&mut self) {
        self.op(OpCode::AtomicLoad);
    }

    pub fn add_atomic_compare_swap(&mut self, expected: i32, desired: i32) {
        self.op(OpCode::AtomicCompareSwap);
        self.write_i32(expected);
        self.write_i32(desired);
    }

    pub fn add_atomic_block(&mut self, expected: i32) {
        self.op(OpCode::AtomicBlock);
        self.write_i32(expected);
    }

    // Control flow.

    pub fn add_jump(&mut self, label: &str) {
        self.op(OpCode::Jump);
        self.write_label_ref(label);
    }

    pub fn add_jump_if(&mut self, label: &str) {
        self.op(OpCode::JumpIf);
        self.write_label_ref(label);
    }

    pub fn add_call(&mut self, label: &str, arg_count: u8, mode: CallMode) {
        self.op(match mode {
            CallMode::Normal => OpCode::Call,
            CallMode::Tail => OpCode::CallTail,
            CallMode::Forked => OpCode::CallForked,
        });
        self.code.push(arg_count);
        self.write_label_ref(label);
    }

    pub fn add_call_dyn(&mut self, arg_count: u8, mode: CallMode) {
        self.op(match mode {
            CallMode::Normal => OpCode::CallDyn,
            CallMode::Tail => OpCode::CallDynTail,
            CallMode::Forked => OpCode::CallDynForked,
        });
        self.code.push(arg_count);
    }

    pub fn add_ret(&mut self) {
        self.op(OpCode::Ret);
    }

    pub fn add_future_wait_nano(&mut self) {
        self.op(OpCode::FutureWaitNano);
    }

    pub fn add_future_block(&mut self) {
        self.op(OpCode::FutureBlock);
    }

    pub fn add_pcall(&mut self, code: PCallCode) {
        self.op(OpCode::PCall);
        self.code.push(code as u8);
    }

    pub fn add_dup(&mut self) {
        self.op(OpCode::Dup);
    }

    pub fn add_pop(&mut self) {
        self.op(OpCode::Pop);
    }

    pub fn add_swap(&mut self) {
        self.op(OpCode::Swap);
    }

    pub fn add_fail(&mut self) {
        self.op(OpCode::Fail);
    }

    /// Append any opcode without immediates (arithmetic, comparisons,
    /// conversions, string ops).
    pub fn add_op(&mut self, op: OpCode) {
        self.op(op);
    }

    /// Resolve all fixups and produce the executable image.
    pub fn close(mut self) -> Result<Executable, AsmError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        for (name, pos) in &self.fixups {
            let offset = *self
                .labels
                .get(name)
                .ok_or_else(|| AsmError::UnresolvedLabel(name.clone()))?;
            self.code[*pos..*pos + 4].copy_from_slice(&offset.to_le_bytes());
        }
        let entry_label = self.entrypoint.ok_or(AsmError::NoEntrypoint)?;
        let entrypoint = *self
            .labels
            .get(&entry_label)
            .ok_or(AsmError::UnresolvedLabel(entry_label))?;
        Ok(Executable::new(entrypoint, self.lit_strings, self.code))
    }

    fn op(&mut self, op: OpCode) {
        self.code.push(op as u8);
    }

    fn write_u16(&mut self, val: u16) {
        self.code.extend_from_slice(&val.to_le_bytes());
    }

    fn write_i32(&mut self, val: i32) {
        self.code.extend_from_slice(&val.to_le_bytes());
    }

    fn write_u32(&mut self, val: u32) {
        self.code.extend_from_slice(&val.to_le_bytes());
    }

    fn write_label_ref(&mut self, label: &str) {
        self.fixups.push((label.to_string(), self.code.len()));
        self.write_u32(0);
    }
}

impl Default for Assembler {
    fn default() -> Assembler {
        Assembler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_resolve_forward_and_backward() {
        let mut asmb = Assembler::new();
        asmb.label("start");
        asmb.add_jump("end"); // Forward reference.
        asmb.add_jump("start"); // Backward reference.
        asmb.label("end");
        asmb.add_ret();
        asmb.set_entrypoint("start");

        let exe = asmb.close().unwrap();
        assert_eq!(exe.entrypoint(), 0);

        // Jump target bytes: opcode at 0, u32 at 1..5 pointing at "end" (10).
        assert_eq!(&exe.code()[1..5], &10u32.to_le_bytes());
        assert_eq!(&exe.code()[6..10], &0u32.to_le_bytes());
    }

    #[test]
    fn unresolved_label_is_fatal() {
        let mut asmb = Assembler::new();
        asmb.label("entry");
        asmb.add_jump("nowhere");
        asmb.set_entrypoint("entry");
        assert_eq!(
            asmb.close(),
            Err(AsmError::UnresolvedLabel("nowhere".to_string()))
        );
    }

    #[test]
    fn duplicate_label_is_fatal() {
        let mut asmb = Assembler::new();
        asmb.label("a");
        asmb.add_ret();
        asmb.label("a");
        asmb.set_entrypoint("a");
        assert_eq!(asmb.close(), Err(AsmError::DuplicateLabel("a".to_string())));
    }

    #[test]
    fn missing_entrypoint_is_fatal() {
        let mut asmb = Assembler::new();
        asmb.add_ret();
        assert_eq!(asmb.close(), Err(AsmError::NoEntrypoint));
    }

    #[test]
    fn string_literals_are_interned() {
        let mut asmb = Assembler::new();
        asmb.label("entry");
        asmb.add_load_lit_string("hello");
        asmb.add_load_lit_string("world");
        asmb.add_load_lit_string("hello");
        asmb.add_ret();
        asmb.set_entrypoint("entry");

        let exe = asmb.close().unwrap();
        assert_eq!(exe.lit_string_count(), 2);
        assert_eq!(exe.lit_string(0), b"hello");
        assert_eq!(exe.lit_string(1), b"world");
    }

    #[test]
    fn int_loads_pick_compact_encodings() {
        let mut asmb = Assembler::new();
        asmb.label("entry");
        asmb.add_load_lit_int(0);
        asmb.add_load_lit_int(1);
        asmb.add_load_lit_int(200);
        asmb.add_load_lit_int(100_000);
        asmb.add_ret();
        asmb.set_entrypoint("entry");

        let code = asmb.close().unwrap().code().to_vec();
        assert_eq!(code[0], OpCode::LoadLitInt0 as u8);
        assert_eq!(code[1], OpCode::LoadLitInt1 as u8);
        assert_eq!(code[2], OpCode::LoadLitIntSmall as u8);
        assert_eq!(code[3], 200);
        assert_eq!(code[4], OpCode::LoadLitInt as u8);
        assert_eq!(&code[5..9], &100_000i32.to_le_bytes());
    }
}
