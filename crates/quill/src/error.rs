//! The single runtime failure kind shared by every opcode.

use thiserror::Error;

use crate::value::Kind;

/// Result type alias for operations that can fail at runtime.
pub type VmResult<T> = Result<T, VmError>;

/// A runtime error raised by the interpreter.
///
/// Every failure - decoding, type mismatch, bounds, stack shape,
/// environment - shares this one kind and differs only in its message.
/// There is no recovery: an error unwinds the dispatch loop to the top of
/// [`Vm::run`](crate::Vm::run), which tears the heap down before returning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct VmError {
    message: String,
}

impl VmError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The formatted error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Binary operator applied to operands it does not accept.
    pub(crate) fn op_types(op: &str, lhs: Kind, rhs: Kind) -> Self {
        Self::new(format!("Cannot apply '{op}' on types {lhs} and {rhs}"))
    }

    /// Unary operator applied to an operand it does not accept.
    pub(crate) fn op_type(op: &str, kind: Kind) -> Self {
        Self::new(format!("Cannot apply '{op}' on type {kind}"))
    }

    /// A value whose tag does not match the single expected tag.
    pub(crate) fn expected(got: Kind, want: Kind) -> Self {
        Self::new(format!("Invalid type {got}, {want} expected"))
    }

    /// A value whose tag is outside the accepted set.
    pub(crate) fn invalid(got: Kind) -> Self {
        Self::new(format!("Invalid type {got}"))
    }

    /// Pop or peek past the base of the current call frame.
    pub(crate) fn frame_empty() -> Self {
        Self::new("Current stack frame empty")
    }
}
