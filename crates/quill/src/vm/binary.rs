//! Arithmetic, bitwise, comparison, and length opcodes.
//!
//! Binary operators require both operands to share a tag; mixed tags fail
//! rather than coerce. Integer arithmetic wraps on overflow; division and
//! remainder by zero, and out-of-range shift amounts, raise VM errors.

use super::Vm;
use crate::{
    error::{VmError, VmResult},
    io::VmIo,
    value::{Kind, Value},
};

impl<P: VmIo> Vm<'_, P> {
    pub(super) fn op_add(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
            (Value::Str(a), Value::Str(b)) => {
                let mut text = self.heap.str_value(a).to_owned();
                text.push_str(self.heap.str_value(b));
                Value::Str(self.heap.alloc_str(text))
            }
            _ => return Err(VmError::op_types("+", lhs.kind(), rhs.kind())),
        };
        self.push(result);
        Ok(())
    }

    pub(super) fn op_sub(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a - b),
            _ => return Err(VmError::op_types("-", lhs.kind(), rhs.kind())),
        };
        self.push(result);
        Ok(())
    }

    pub(super) fn op_mul(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a * b),
            _ => return Err(VmError::op_types("*", lhs.kind(), rhs.kind())),
        };
        self.push(result);
        Ok(())
    }

    pub(super) fn op_div(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                if b == 0 {
                    return Err(VmError::new("Division by zero"));
                }
                Value::Int(a.wrapping_div(b))
            }
            (Value::Float(a), Value::Float(b)) => Value::Float(a / b),
            _ => return Err(VmError::op_types("/", lhs.kind(), rhs.kind())),
        };
        self.push(result);
        Ok(())
    }

    pub(super) fn op_rem(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                if b == 0 {
                    return Err(VmError::new("Division by zero"));
                }
                Value::Int(a.wrapping_rem(b))
            }
            _ => return Err(VmError::op_types("%", lhs.kind(), rhs.kind())),
        };
        self.push(result);
        Ok(())
    }

    /// `POS` only type-checks; the value is left untouched.
    pub(super) fn op_pos(&mut self) -> VmResult<()> {
        let top = self.peek(0)?;
        match top {
            Value::Int(_) | Value::Float(_) => Ok(()),
            _ => Err(VmError::invalid(top.kind())),
        }
    }

    pub(super) fn op_neg(&mut self) -> VmResult<()> {
        let top = self.top_mut()?;
        match top {
            Value::Int(v) => *v = v.wrapping_neg(),
            Value::Float(v) => *v = -*v,
            _ => return Err(VmError::invalid(top.kind())),
        }
        Ok(())
    }

    fn int_operands(&mut self, op: &str) -> VmResult<(i64, i64)> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok((a, b)),
            _ => Err(VmError::op_types(op, lhs.kind(), rhs.kind())),
        }
    }

    pub(super) fn op_band(&mut self) -> VmResult<()> {
        let (a, b) = self.int_operands("&")?;
        self.push(Value::Int(a & b));
        Ok(())
    }

    pub(super) fn op_bor(&mut self) -> VmResult<()> {
        let (a, b) = self.int_operands("|")?;
        self.push(Value::Int(a | b));
        Ok(())
    }

    pub(super) fn op_bxor(&mut self) -> VmResult<()> {
        let (a, b) = self.int_operands("^")?;
        self.push(Value::Int(a ^ b));
        Ok(())
    }

    pub(super) fn op_binv(&mut self) -> VmResult<()> {
        let top = self.top_mut()?;
        match top {
            Value::Int(v) => {
                *v = !*v;
                Ok(())
            }
            _ => Err(VmError::expected(top.kind(), Kind::Int)),
        }
    }

    /// Validates a shift amount against the 64-bit operand width.
    fn shift_amount(amount: i64) -> VmResult<u32> {
        if !(0..64).contains(&amount) {
            return Err(VmError::new(format!(
                "Shift amount ({amount}) out of range"
            )));
        }
        Ok(amount as u32)
    }

    pub(super) fn op_shl(&mut self) -> VmResult<()> {
        let (a, b) = self.int_operands("<<")?;
        let shift = Self::shift_amount(b)?;
        self.push(Value::Int(a << shift));
        Ok(())
    }

    pub(super) fn op_shr(&mut self) -> VmResult<()> {
        let (a, b) = self.int_operands(">>")?;
        let shift = Self::shift_amount(b)?;
        self.push(Value::Int(a >> shift));
        Ok(())
    }

    pub(super) fn op_ushr(&mut self) -> VmResult<()> {
        let (a, b) = self.int_operands(">>>")?;
        let shift = Self::shift_amount(b)?;
        self.push(Value::Int(((a as u64) >> shift) as i64));
        Ok(())
    }

    /// Content equality for scalars and strings, identity for objects,
    /// arrays and closures. Unequal tags are never equal and never an
    /// error. Float equality follows IEEE `==`, so NaN is unequal to
    /// itself.
    fn values_equal(&self, lhs: Value, rhs: Value) -> bool {
        match (lhs, rhs) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => {
                a == b || self.heap.str_value(a) == self.heap.str_value(b)
            }
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => a == b,
            _ => false,
        }
    }

    fn is_greater(&self, lhs: Value, rhs: Value) -> VmResult<bool> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(a > b),
            (Value::Float(a), Value::Float(b)) => Ok(a > b),
            (Value::Str(a), Value::Str(b)) => Ok(self.heap.str_value(a) > self.heap.str_value(b)),
            _ => Err(VmError::op_types(">", lhs.kind(), rhs.kind())),
        }
    }

    fn is_less(&self, lhs: Value, rhs: Value) -> VmResult<bool> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(a < b),
            (Value::Float(a), Value::Float(b)) => Ok(a < b),
            (Value::Str(a), Value::Str(b)) => Ok(self.heap.str_value(a) < self.heap.str_value(b)),
            _ => Err(VmError::op_types("<", lhs.kind(), rhs.kind())),
        }
    }

    pub(super) fn op_equality(&mut self, invert: bool) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let equal = self.values_equal(lhs, rhs);
        self.push(Value::Bool(equal != invert));
        Ok(())
    }

    pub(super) fn op_cmp_gt(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self.is_greater(lhs, rhs)?;
        self.push(Value::Bool(result));
        Ok(())
    }

    pub(super) fn op_cmp_lt(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self.is_less(lhs, rhs)?;
        self.push(Value::Bool(result));
        Ok(())
    }

    /// `>=` is `not <`, so a NaN operand compares true.
    pub(super) fn op_cmp_ge(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self.is_less(lhs, rhs)?;
        self.push(Value::Bool(!result));
        Ok(())
    }

    /// `<=` is `not >`, so a NaN operand compares true.
    pub(super) fn op_cmp_le(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = self.is_greater(lhs, rhs)?;
        self.push(Value::Bool(!result));
        Ok(())
    }

    pub(super) fn op_not(&mut self) -> VmResult<()> {
        let top = self.top_mut()?;
        match top {
            Value::Bool(b) => {
                *b = !*b;
                Ok(())
            }
            _ => Err(VmError::expected(top.kind(), Kind::Bool)),
        }
    }

    pub(super) fn op_len(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let length = match value {
            Value::Str(id) => self.heap.str_value(id).len(),
            Value::Object(id) => self.heap.object(id).len(),
            Value::Array(id) => self.heap.array(id).len(),
            _ => return Err(VmError::op_type("#", value.kind())),
        };
        self.push(Value::Int(length as i64));
        Ok(())
    }
}
