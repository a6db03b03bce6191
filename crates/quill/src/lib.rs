#![doc = include_str!("../../../README.md")]
mod bytecode;
mod error;
mod heap;
mod host;
mod io;
mod libs;
mod script;
mod value;
mod vm;

pub use crate::{
    bytecode::{disassemble, InvalidOpcodeError, Opcode, Operand},
    error::{VmError, VmResult},
    host::HostValue,
    io::{BufferedIo, StdIo, VmIo, MAX_TOKEN_LEN},
    script::{Script, ScriptBuilder, MAX_STRING_POOL},
    vm::{run_script, Vm},
};
