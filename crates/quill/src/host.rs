//! Detached values handed back to the host.

use std::collections::BTreeMap;

use ahash::AHashSet;

use crate::{
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

/// A deep, self-contained copy of a VM value.
///
/// The heap is torn down when a run finishes, so results cross the VM
/// boundary as `HostValue`s: strings, objects and arrays are copied out,
/// closures become an opaque marker. Object keys are ordered so values
/// compare deterministically in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Object(BTreeMap<String, HostValue>),
    Array(Vec<HostValue>),
    /// Closures have no meaningful detached form.
    Closure,
}

impl HostValue {
    /// Deep-converts `value` out of `heap`.
    ///
    /// A container re-encountered while its own conversion is in progress
    /// (a reference cycle) converts to `Nil` at the back-edge.
    pub(crate) fn from_value(heap: &Heap, value: Value) -> Self {
        let mut visiting = AHashSet::new();
        convert(heap, value, &mut visiting)
    }
}

fn convert(heap: &Heap, value: Value, visiting: &mut AHashSet<HeapId>) -> HostValue {
    match value {
        Value::Nil => HostValue::Nil,
        Value::Int(i) => HostValue::Int(i),
        Value::Float(f) => HostValue::Float(f),
        Value::Bool(b) => HostValue::Bool(b),
        Value::Str(id) => HostValue::Str(heap.str_value(id).to_owned()),
        Value::Closure(_) => HostValue::Closure,
        Value::Object(id) => {
            if !visiting.insert(id) {
                return HostValue::Nil;
            }
            let HeapData::Object(map) = heap.get(id) else {
                unreachable!("object value points at non-object slot");
            };
            let converted = map
                .iter()
                .map(|(k, v)| (k.clone(), convert(heap, *v, visiting)))
                .collect();
            visiting.remove(&id);
            HostValue::Object(converted)
        }
        Value::Array(id) => {
            if !visiting.insert(id) {
                return HostValue::Nil;
            }
            let HeapData::Array(items) = heap.get(id) else {
                unreachable!("array value points at non-array slot");
            };
            let converted = items.iter().map(|v| convert(heap, *v, visiting)).collect();
            visiting.remove(&id);
            HostValue::Array(converted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containers_convert_deeply() {
        let mut heap = Heap::new();
        let s = heap.alloc_str("hi");
        let arr = heap.alloc(HeapData::Array(vec![Value::Int(1), Value::Str(s)]));
        let obj = heap.alloc_object();
        heap.object_mut(obj).insert("xs".to_owned(), Value::Array(arr));

        let host = HostValue::from_value(&heap, Value::Object(obj));
        let HostValue::Object(map) = host else {
            panic!("expected object");
        };
        assert_eq!(
            map["xs"],
            HostValue::Array(vec![HostValue::Int(1), HostValue::Str("hi".to_owned())])
        );
    }

    #[test]
    fn cycles_convert_to_nil_at_the_back_edge() {
        let mut heap = Heap::new();
        let obj = heap.alloc_object();
        heap.object_mut(obj).insert("me".to_owned(), Value::Object(obj));

        let host = HostValue::from_value(&heap, Value::Object(obj));
        let HostValue::Object(map) = host else {
            panic!("expected object");
        };
        assert_eq!(map["me"], HostValue::Nil);
    }
}
