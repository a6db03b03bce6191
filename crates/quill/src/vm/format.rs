//! Value stringification for the `OUT` opcode.

use crate::{heap::Heap, value::Value};

/// Renders `value` as `OUT` prints it.
///
/// Objects, arrays and closures render an identity token built from their
/// heap slot index, stable within a run.
pub(super) fn stringify(heap: &Heap, value: Value) -> String {
    match value {
        Value::Nil => "null".to_owned(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => format_float(v),
        Value::Bool(true) => "true".to_owned(),
        Value::Bool(false) => "false".to_owned(),
        Value::Str(id) => heap.str_value(id).to_owned(),
        Value::Object(id) => format!("object@{}", id.index()),
        Value::Array(id) => format!("array@{}", id.index()),
        Value::Closure(id) => format!("closure@{}", id.index()),
    }
}

/// Fixed-point form with six fractional digits, matching C `%f`
/// (including the `nan` / `inf` / `-inf` spellings).
fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_owned()
    } else {
        format!("{value:.6}")
    }
}
