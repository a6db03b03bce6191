//! Opcode definitions for the bytecode VM.
//!
//! Code is stored as a raw `Vec<u8>`. The `Opcode` enum is a pure
//! discriminant with no data - operands are fetched separately from the
//! byte stream. Opcode values are assigned densely starting at zero, and
//! every opcode has a fixed operand width (see [`Opcode::operand`]), so a
//! disassembler or verifier can walk code linearly without other context.
//!
//! # Operand encoding
//!
//! - signed 1/2/4/8-byte integers and 8-byte floats are little-endian
//! - string operands are a one-byte index into the script's string pool
//! - jump offsets are a signed byte, applied after the operand is read

use strum::{FromRepr, IntoStaticStr};

/// Opcode discriminant - identifies the instruction type.
///
/// With `#[repr(u8)]` each opcode is exactly one byte. `strum::FromRepr`
/// provides the byte-to-opcode conversion; `IntoStaticStr` the listing
/// names used by the disassembler.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // === Scope access ===
    /// Push the named binding of the current scope, or nil if unset.
    /// Operand: string.
    Load,
    /// Pop a value into the named binding of the current scope; a nil
    /// value removes the binding. Operand: string.
    Store,
    /// Like `Load`, on the enclosing scope. Operand: string.
    LoadSuper,
    /// Like `Store`, on the enclosing scope. Operand: string.
    StoreSuper,
    /// Pop an object, push its named field (nil if missing).
    /// Operand: string.
    LoadField,
    /// Pop a value, pop an object, set its named field; nil removes the
    /// field. Operand: string.
    StoreField,
    /// Pop a key, pop a container, push the element. Objects take string
    /// keys; arrays take integer indices, negative counting from the end.
    LoadItem,
    /// Pop a value, pop a key, pop a container, store the element.
    StoreItem,

    // === Literals ===
    /// Push a signed 1-byte integer. Operand: i8.
    PushBint,
    /// Push a signed 2-byte integer. Operand: i16.
    PushWint,
    /// Push a signed 4-byte integer. Operand: i32.
    PushDwint,
    /// Push a signed 8-byte integer. Operand: i64.
    PushInt,
    /// Push 8 raw bytes reinterpreted as a binary64 float. Operand: f64.
    PushFloat,
    /// Push a fresh string from the pool. Operand: string.
    PushString,

    // === Closures & frames ===
    /// Push a closure capturing the current scope. Operand: u8 entry
    /// offset into the current script.
    PushClosure,
    /// Push the i-th argument of the current call, nil if out of range.
    /// Operand: u8.
    PushArg,
    /// Push the current scope's bindings object.
    PushSelf,
    /// Push the bindings object `level + 1` scopes up. Operand: u8 level.
    PushSuper,

    // === Stack shuffling ===
    /// Pop n values, push them as an array in push order. Operand: u8.
    NewArray,
    /// Discard top of stack.
    Pop,
    /// Duplicate top of stack.
    Dup,

    // === Arithmetic ===
    /// a + b: int, float, or string concatenation.
    Add,
    /// a - b: int or float.
    Sub,
    /// a * b: int or float.
    Mul,
    /// a / b: int or float.
    Div,
    /// a % b: int only.
    Rem,
    /// Type-check numeric, leave the value.
    Pos,
    /// Negate an int or float.
    Neg,

    // === Bitwise (int only) ===
    /// a & b.
    Band,
    /// a | b.
    Bor,
    /// a ^ b.
    Bxor,
    /// ~a.
    Binv,
    /// a << b.
    Shl,
    /// a >> b (arithmetic).
    Shr,
    /// a >> b zero-filled.
    Ushr,

    // === Comparison ===
    /// a == b: by value for scalars and strings, by identity otherwise.
    CmpEq,
    /// a != b.
    CmpNe,
    /// a > b: int, float, or string.
    CmpGt,
    /// a < b.
    CmpLt,
    /// a >= b, defined as `not (a < b)`.
    CmpGe,
    /// a <= b, defined as `not (a > b)`.
    CmpLe,

    // === Unary logic & length ===
    /// Logical not on a bool.
    Not,
    /// Length: string byte length, object key count, array element count.
    Len,

    // === Control flow ===
    /// Relative jump. Operand: i8 offset.
    Jump,
    /// Pop a bool, jump if true. Operand: i8 offset.
    JumpIf,
    /// Pop a bool, jump if false. Operand: i8 offset.
    JumpUnless,

    // === Calls ===
    /// Call the closure below the n arguments on the stack. Operand: u8
    /// argument count.
    Call,
    /// Return the single value above the frame base; pops the frame and
    /// triggers garbage collection.
    Return,

    // === IO & libraries ===
    /// Read one whitespace-delimited token from input, push as a string.
    In,
    /// Pop a value, write its stringified form as one output line.
    Out,
    /// Push a value from the library registry. Operand: string.
    LoadLib,
}

/// Operand shape of an opcode, fixed per opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// No operand bytes.
    None,
    /// One signed byte (literals and jump offsets).
    I8,
    /// Two-byte little-endian signed integer.
    I16,
    /// Four-byte little-endian signed integer.
    I32,
    /// Eight-byte little-endian signed integer.
    I64,
    /// Eight-byte little-endian binary64.
    F64,
    /// One unsigned byte (counts, levels, entry offsets).
    U8,
    /// One-byte string-pool index.
    StrIdx,
}

impl Operand {
    /// Number of operand bytes following the opcode byte.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::I8 | Self::U8 | Self::StrIdx => 1,
            Self::I16 => 2,
            Self::I32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }
}

impl Opcode {
    /// The operand shape this opcode is encoded with.
    #[must_use]
    pub fn operand(self) -> Operand {
        match self {
            Self::Load
            | Self::Store
            | Self::LoadSuper
            | Self::StoreSuper
            | Self::LoadField
            | Self::StoreField
            | Self::PushString
            | Self::LoadLib => Operand::StrIdx,
            Self::PushBint | Self::Jump | Self::JumpIf | Self::JumpUnless => Operand::I8,
            Self::PushWint => Operand::I16,
            Self::PushDwint => Operand::I32,
            Self::PushInt => Operand::I64,
            Self::PushFloat => Operand::F64,
            Self::PushClosure | Self::PushArg | Self::PushSuper | Self::NewArray | Self::Call => {
                Operand::U8
            }
            _ => Operand::None,
        }
    }

    /// The listing name, e.g. `LOAD_SUPER`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(InvalidOpcodeError(byte))
    }
}

/// Error returned when a byte is not a valid opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOpcodeError(pub u8);

impl std::fmt::Display for InvalidOpcodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid opcode byte: {}", self.0)
    }
}

impl std::error::Error for InvalidOpcodeError {}
