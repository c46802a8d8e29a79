//! Opaque containers
//!
//! Collections keep their elements in heap buffers whose slots move as the
//! collection grows, so they can't be described by fixed offsets. They
//! report their elements through [`Container`] instead; the resulting edges
//! have no addressable slot and can't be cleared one by one.

use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::object::{Container, ObjRef, Object};

/// Ordered list of strong references
#[derive(Default)]
pub struct ObjectList {
    items: Mutex<Vec<ObjRef>>,
}

impl ObjectList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a list owning clones of `items`
    pub fn from_refs<'a>(items: impl IntoIterator<Item = &'a ObjRef>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().cloned().collect()),
        }
    }

    /// Append an element
    pub fn push(&self, item: ObjRef) {
        self.items.lock().push(item);
    }

    /// Remove every occurrence of `item`, returning how many were removed
    pub fn remove(&self, item: &ObjRef) -> usize {
        let removed: Vec<ObjRef> = {
            let mut items = self.items.lock();
            let (removed, kept) = std::mem::take(&mut *items)
                .into_iter()
                .partition(|existing| existing.ptr_eq(item));
            *items = kept;
            removed
        };
        removed.len()
    }

    /// Release every element
    pub fn clear(&self) {
        let items = std::mem::take(&mut *self.items.lock());
        drop(items);
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<ObjRef> {
        self.items.lock().get(index).cloned()
    }
}

impl Container for ObjectList {
    fn for_each_owned(&self, visit: &mut dyn FnMut(&ObjRef)) {
        for item in self.items.lock().iter() {
            visit(item);
        }
    }
}

// SAFETY: opaque storage declares no offsets.
unsafe impl Object for ObjectList {
    fn container(&self) -> Option<&dyn Container> {
        Some(self)
    }
}

impl fmt::Debug for ObjectList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectList")
            .field("len", &self.len())
            .finish()
    }
}

/// String-keyed map of strong references, iterated in insertion order
#[derive(Default)]
pub struct ObjectMap {
    entries: Mutex<IndexMap<String, ObjRef>>,
}

impl ObjectMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the previous value
    pub fn insert(&self, key: impl Into<String>, value: ObjRef) -> Option<ObjRef> {
        self.entries.lock().insert(key.into(), value)
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<ObjRef> {
        self.entries.lock().shift_remove(key)
    }

    /// Look up an entry
    pub fn get(&self, key: &str) -> Option<ObjRef> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Container for ObjectMap {
    fn for_each_owned(&self, visit: &mut dyn FnMut(&ObjRef)) {
        for value in self.entries.lock().values() {
            visit(value);
        }
    }
}

// SAFETY: opaque storage declares no offsets.
unsafe impl Object for ObjectMap {
    fn container(&self) -> Option<&dyn Container> {
        Some(self)
    }
}

impl fmt::Debug for ObjectMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectMap")
            .field("len", &self.len())
            .finish()
    }
}
