//! Arena heap and mark-and-sweep garbage collector.
//!
//! Every heap-allocated payload lives in one slot of an arena owned by the
//! VM instance. Values reference slots through [`HeapId`] handles, so the
//! collector never chases raw pointers and the arena can hand freed slots
//! back out through a free list.
//!
//! Collection is mark-and-sweep with a colour flip: the heap holds a
//! current-colour bit, every entry holds its own, and a collection cycle
//! flips the heap's bit before marking. Freshly allocated entries take the
//! current colour, which keeps them alive until the next cycle. Marking
//! uses an explicit worklist so deep or cyclic scope graphs cannot exhaust
//! the host stack.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{script::Script, value::Value};

/// Field storage for object values and for scope locals.
pub(crate) type ObjectMap = AHashMap<String, Value>;

/// Unique identifier for a slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(usize);

impl HeapId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// A closure: captured scope chain plus an entry point into a script.
#[derive(Debug, Clone)]
pub(crate) struct ClosureData {
    /// The scope that was current when the closure was constructed.
    pub scope: HeapId,
    /// The script whose code the closure executes.
    pub script: Rc<Script>,
    /// Entry offset into `script`'s code.
    pub entry: i64,
}

/// A scope frame: the object holding local bindings plus the lexical link
/// to the enclosing scope. The root scope has no enclosing link.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScopeData {
    pub enclosing: Option<HeapId>,
    /// Always an [`HeapData::Object`] slot.
    pub locals: HeapId,
}

/// Payload of one heap slot.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(String),
    Object(ObjectMap),
    Array(Vec<Value>),
    Closure(ClosureData),
    Scope(ScopeData),
}

#[derive(Debug)]
struct HeapEntry {
    colour: bool,
    data: HeapData,
}

/// The arena heap.
///
/// `entries` may contain `None` holes where a sweep reclaimed a slot; the
/// slot index is then on `free_list` for reuse by the next allocation.
#[derive(Debug, Default)]
pub(crate) struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
    colour: bool,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates a slot for `data`, coloured with the current colour.
    pub(crate) fn alloc(&mut self, data: HeapData) -> HeapId {
        let entry = HeapEntry {
            colour: self.colour,
            data,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    pub(crate) fn alloc_str(&mut self, text: impl Into<String>) -> HeapId {
        self.alloc(HeapData::Str(text.into()))
    }

    pub(crate) fn alloc_object(&mut self) -> HeapId {
        self.alloc(HeapData::Object(ObjectMap::default()))
    }

    /// Allocates a scope with a fresh empty locals object.
    pub(crate) fn alloc_scope(&mut self, enclosing: Option<HeapId>) -> HeapId {
        let locals = self.alloc_object();
        self.alloc(HeapData::Scope(ScopeData { enclosing, locals }))
    }

    /// Returns the payload stored at `id`.
    ///
    /// # Panics
    /// Panics if the slot is missing or has been swept. Reachable handles
    /// always refer to live slots; hitting this is an interpreter bug.
    pub(crate) fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
            .data
    }

    pub(crate) fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
    }

    /// The string at `id`. Panics if the slot does not hold a string.
    pub(crate) fn str_value(&self, id: HeapId) -> &str {
        match self.get(id) {
            HeapData::Str(s) => s,
            _ => panic!("Heap::str_value: entry is not a string"),
        }
    }

    pub(crate) fn object(&self, id: HeapId) -> &ObjectMap {
        match self.get(id) {
            HeapData::Object(map) => map,
            _ => panic!("Heap::object: entry is not an object"),
        }
    }

    pub(crate) fn object_mut(&mut self, id: HeapId) -> &mut ObjectMap {
        match self.get_mut(id) {
            HeapData::Object(map) => map,
            _ => panic!("Heap::object_mut: entry is not an object"),
        }
    }

    pub(crate) fn array(&self, id: HeapId) -> &Vec<Value> {
        match self.get(id) {
            HeapData::Array(items) => items,
            _ => panic!("Heap::array: entry is not an array"),
        }
    }

    pub(crate) fn array_mut(&mut self, id: HeapId) -> &mut Vec<Value> {
        match self.get_mut(id) {
            HeapData::Array(items) => items,
            _ => panic!("Heap::array_mut: entry is not an array"),
        }
    }

    pub(crate) fn closure(&self, id: HeapId) -> &ClosureData {
        match self.get(id) {
            HeapData::Closure(c) => c,
            _ => panic!("Heap::closure: entry is not a closure"),
        }
    }

    pub(crate) fn scope(&self, id: HeapId) -> ScopeData {
        match self.get(id) {
            HeapData::Scope(s) => *s,
            _ => panic!("Heap::scope: entry is not a scope"),
        }
    }

    /// Number of live (non-swept) slots.
    pub(crate) fn live_objects(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Runs one mark-and-sweep cycle from the given roots.
    ///
    /// Flips the current colour, marks everything reachable from `roots`
    /// with the new colour, then sweeps every entry still carrying the old
    /// one. Entries are visited at most once per cycle: a marked entry
    /// already has the new colour and is skipped, which terminates the walk
    /// on cyclic scope and object graphs.
    pub(crate) fn collect(&mut self, roots: impl IntoIterator<Item = HeapId>) {
        self.colour = !self.colour;

        let mut work: Vec<HeapId> = roots.into_iter().collect();
        while let Some(id) = work.pop() {
            let entry = self
                .entries
                .get_mut(id.index())
                .expect("Heap::collect: root or child slot missing")
                .as_mut()
                .expect("Heap::collect: root or child already freed");
            if entry.colour == self.colour {
                continue;
            }
            entry.colour = self.colour;
            push_children(&entry.data, &mut work);
        }

        for (index, slot) in self.entries.iter_mut().enumerate() {
            if let Some(entry) = slot {
                if entry.colour != self.colour {
                    *slot = None;
                    self.free_list.push(HeapId(index));
                }
            }
        }
    }

    /// Destroys every remaining entry. Used at the end of a run and after
    /// a caught VM error.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.free_list.clear();
    }
}

/// Pushes the heap handles directly reachable from `data` onto the
/// marking worklist.
fn push_children(data: &HeapData, work: &mut Vec<HeapId>) {
    match data {
        HeapData::Str(_) => {}
        HeapData::Object(map) => {
            work.extend(map.values().filter_map(|v| v.heap_id()));
        }
        HeapData::Array(items) => {
            work.extend(items.iter().filter_map(|v| v.heap_id()));
        }
        HeapData::Closure(closure) => work.push(closure.scope),
        HeapData::Scope(scope) => {
            work.push(scope.locals);
            if let Some(enclosing) = scope.enclosing {
                work.push(enclosing);
            }
        }
    }
}
