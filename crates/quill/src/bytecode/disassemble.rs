//! Human-readable listing of a script's code.

use std::fmt::Write;

use crate::{
    bytecode::{Opcode, Operand},
    script::Script,
};

/// Renders `script`'s code as one instruction per line:
/// `"{offset} {NAME} {operand}"`.
///
/// String operands are resolved through the pool (or shown as
/// `[bad string index: {i}]` when out of range). An unknown opcode byte
/// renders as `[Unknown: {byte}]` and decoding continues at the next
/// byte; a truncated operand ends the listing.
#[must_use]
pub fn disassemble(script: &Script) -> String {
    let code = script.code();
    let mut out = String::new();
    let mut idx = 0;

    while idx < code.len() {
        let at = idx;
        let byte = code[idx];
        idx += 1;
        let Ok(op) = Opcode::try_from(byte) else {
            let _ = writeln!(out, "{at} [Unknown: {byte}]");
            continue;
        };

        let width = op.operand().width();
        let Some(operand) = code.get(idx..idx + width) else {
            let _ = writeln!(out, "{at} {} [truncated]", op.name());
            break;
        };
        idx += width;

        let _ = write!(out, "{at} {}", op.name());
        match op.operand() {
            Operand::None => {}
            Operand::I8 => {
                let _ = write!(out, " {}", operand[0] as i8);
            }
            Operand::I16 => {
                let v = i16::from_le_bytes([operand[0], operand[1]]);
                let _ = write!(out, " {v}");
            }
            Operand::I32 => {
                let v = i32::from_le_bytes(operand.try_into().expect("width checked"));
                let _ = write!(out, " {v}");
            }
            Operand::I64 => {
                let v = i64::from_le_bytes(operand.try_into().expect("width checked"));
                let _ = write!(out, " {v}");
            }
            Operand::F64 => {
                let v = f64::from_le_bytes(operand.try_into().expect("width checked"));
                let _ = write!(out, " {v:.6}");
            }
            Operand::U8 => {
                let _ = write!(out, " {}", operand[0]);
            }
            Operand::StrIdx => match script.get_string(operand[0]) {
                Ok(s) => {
                    let _ = write!(out, " {s}");
                }
                Err(_) => {
                    let _ = write!(out, " [bad string index: {}]", operand[0]);
                }
            },
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptBuilder;

    #[test]
    fn listing_matches_emitted_code() {
        let mut b = ScriptBuilder::new();
        b.push_bint(2);
        b.push_bint(3);
        b.emit(Opcode::Add);
        b.emit_str(Opcode::Store, "sum");
        b.emit(Opcode::Return);
        let listing = disassemble(&b.build());

        assert_eq!(
            listing,
            "0 PUSH_BINT 2\n\
             2 PUSH_BINT 3\n\
             4 ADD\n\
             5 STORE sum\n\
             7 RETURN\n"
        );
    }

    #[test]
    fn wide_literals_decode_little_endian() {
        let mut b = ScriptBuilder::new();
        b.push_wint(-2);
        b.push_dwint(1_000_000);
        b.push_int(1 << 40);
        b.push_float(0.5);
        let listing = disassemble(&b.build());

        assert_eq!(
            listing,
            "0 PUSH_WINT -2\n\
             3 PUSH_DWINT 1000000\n\
             8 PUSH_INT 1099511627776\n\
             17 PUSH_FLOAT 0.500000\n"
        );
    }

    #[test]
    fn unknown_byte_is_reported_and_skipped() {
        let script = Script::new(vec![200, Opcode::Pop as u8], vec![]);
        let listing = disassemble(&script);
        assert_eq!(listing, "0 [Unknown: 200]\n1 POP\n");
    }

    #[test]
    fn truncated_operand_ends_the_listing() {
        let script = Script::new(vec![Opcode::PushInt as u8, 1, 2], vec![]);
        let listing = disassemble(&script);
        assert_eq!(listing, "0 PUSH_INT [truncated]\n");
    }
}
