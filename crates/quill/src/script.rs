//! Compiled scripts: a flat code byte sequence plus a string pool.

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::Opcode,
    error::{VmError, VmResult},
};

/// Maximum number of string-pool entries; operands index the pool with a
/// single unsigned byte.
pub const MAX_STRING_POOL: usize = 256;

/// A compiled script.
///
/// `code` holds opcodes and their immediate operands (little-endian).
/// `string_pool` holds every literal and identifier string the code refers
/// to, indexed by a one-byte operand. Scripts are produced by an external
/// compiler front-end, by [`ScriptBuilder`], or by [`Script::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    code: Vec<u8>,
    string_pool: Vec<String>,
}

impl Script {
    /// Creates a script from raw parts.
    #[must_use]
    pub fn new(code: Vec<u8>, string_pool: Vec<String>) -> Self {
        Self { code, string_pool }
    }

    /// The raw code bytes.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// The string pool.
    #[must_use]
    pub fn string_pool(&self) -> &[String] {
        &self.string_pool
    }

    /// Resolves a string-pool operand.
    pub(crate) fn get_string(&self, idx: u8) -> VmResult<&str> {
        self.string_pool
            .get(usize::from(idx))
            .map(String::as_str)
            .ok_or_else(|| VmError::new(format!("String pool index ({idx}) out of range")))
    }

    /// Serializes the script to a binary blob.
    ///
    /// The blob is a caching convenience for hosts and the CLI, not a
    /// stable interchange format.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a script produced by [`Script::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Incremental builder for [`Script`]s.
///
/// The supported way to construct bytecode by hand: emit opcodes with
/// typed operand helpers, interning operand strings into the pool as they
/// appear. Forward jumps are emitted with a placeholder offset and patched
/// once the target is known.
///
/// # Panics
/// Interning more than [`MAX_STRING_POOL`] distinct strings panics; the
/// pool index is a single byte by construction.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    code: Vec<u8>,
    string_pool: Vec<String>,
}

impl ScriptBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length of the emitted code, i.e. the offset the next
    /// instruction will land on.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Emits an opcode with no operand.
    pub fn emit(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    /// Emits an opcode with a one-byte unsigned operand.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.emit(op);
        self.code.push(operand);
    }

    /// Emits an opcode with a one-byte signed operand.
    pub fn emit_i8(&mut self, op: Opcode, operand: i8) {
        self.emit(op);
        self.code.push(operand as u8);
    }

    /// Emits an opcode with a string operand, interning the string.
    pub fn emit_str(&mut self, op: Opcode, name: &str) {
        let idx = self.intern(name);
        self.emit_u8(op, idx);
    }

    /// Interns `name` into the string pool and returns its index.
    pub fn intern(&mut self, name: &str) -> u8 {
        if let Some(idx) = self.string_pool.iter().position(|s| s == name) {
            return idx as u8;
        }
        assert!(
            self.string_pool.len() < MAX_STRING_POOL,
            "string pool exceeds {MAX_STRING_POOL} entries"
        );
        self.string_pool.push(name.to_owned());
        (self.string_pool.len() - 1) as u8
    }

    /// Pushes a one-byte signed integer literal.
    pub fn push_bint(&mut self, value: i8) {
        self.emit_i8(Opcode::PushBint, value);
    }

    /// Pushes a two-byte signed integer literal.
    pub fn push_wint(&mut self, value: i16) {
        self.emit(Opcode::PushWint);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Pushes a four-byte signed integer literal.
    pub fn push_dwint(&mut self, value: i32) {
        self.emit(Opcode::PushDwint);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Pushes an eight-byte signed integer literal.
    pub fn push_int(&mut self, value: i64) {
        self.emit(Opcode::PushInt);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Pushes a float literal.
    pub fn push_float(&mut self, value: f64) {
        self.emit(Opcode::PushFloat);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Pushes a string literal from the pool.
    pub fn push_string(&mut self, value: &str) {
        self.emit_str(Opcode::PushString, value);
    }

    /// Emits a jump with a placeholder offset; returns the operand
    /// position for [`patch_jump`](Self::patch_jump).
    pub fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_i8(op, 0);
        self.code.len() - 1
    }

    /// Patches the jump emitted at `operand_pos` to land on the current
    /// offset.
    ///
    /// # Panics
    /// Panics if the distance does not fit in the one-byte offset.
    pub fn patch_jump(&mut self, operand_pos: usize) {
        // The offset is applied after the operand byte has been read.
        let distance = self.code.len() as i64 - (operand_pos as i64 + 1);
        let offset = i8::try_from(distance).expect("jump offset exceeds one byte");
        self.code[operand_pos] = offset as u8;
    }

    /// Finishes the build.
    #[must_use]
    pub fn build(self) -> Script {
        Script::new(self.code, self.string_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut b = ScriptBuilder::new();
        let first = b.intern("x");
        let again = b.intern("x");
        let other = b.intern("y");
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(b.build().string_pool(), ["x", "y"]);
    }

    #[test]
    fn literal_emitters_use_little_endian() {
        let mut b = ScriptBuilder::new();
        b.push_wint(0x0102);
        let script = b.build();
        assert_eq!(script.code(), [Opcode::PushWint as u8, 0x02, 0x01]);
    }

    #[test]
    fn patched_jump_skips_the_gap() {
        let mut b = ScriptBuilder::new();
        let jump = b.emit_jump(Opcode::Jump);
        b.push_bint(1);
        b.emit(Opcode::Pop);
        b.patch_jump(jump);
        let script = b.build();
        // Offset lands just past the three skipped bytes.
        assert_eq!(script.code()[jump], 3);
    }

    #[test]
    fn dump_load_round_trip() {
        let mut b = ScriptBuilder::new();
        b.push_bint(7);
        b.emit_str(Opcode::Store, "seven");
        b.emit(Opcode::Return);
        let script = b.build();

        let blob = script.dump().unwrap();
        let restored = Script::load(&blob).unwrap();
        assert_eq!(restored.code(), script.code());
        assert_eq!(restored.string_pool(), script.string_pool());
    }

    #[test]
    fn string_pool_operand_out_of_range() {
        let script = Script::new(vec![], vec!["only".to_owned()]);
        assert!(script.get_string(0).is_ok());
        let err = script.get_string(1).unwrap_err();
        assert_eq!(err.message(), "String pool index (1) out of range");
    }
}
