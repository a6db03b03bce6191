//! Bytecode definitions: the opcode table and the disassembler.

mod disassemble;
mod op;

pub use disassemble::disassemble;
pub use op::{InvalidOpcodeError, Opcode, Operand};
