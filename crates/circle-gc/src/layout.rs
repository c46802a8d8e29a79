//! Strong layout cache
//!
//! Resolves, once per type, the byte offsets at which an object stores its
//! owning references. Class layouts contribute their ancestors' fields first,
//! rebased on the embedding offset; closures contribute their strong
//! captures rebased on the environment offset. Types that can't describe
//! their storage get the opaque marker and are enumerated through their
//! container capability.

use std::any::TypeId;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::object::Object;
use crate::storage::{ClassLayout, Field, Storage};

/// Resolved strong-reference layout of a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrongLayout {
    /// Byte offsets of every strong slot, ancestors first
    Slots(Box<[usize]>),
    /// Enumerate through the object's container capability
    Opaque,
}

impl StrongLayout {
    /// Offsets for slot layouts, `None` for the opaque marker
    pub fn offsets(&self) -> Option<&[usize]> {
        match self {
            StrongLayout::Slots(offsets) => Some(&offsets[..]),
            StrongLayout::Opaque => None,
        }
    }

    fn resolve(storage: Storage) -> Self {
        match storage {
            Storage::Leaf => StrongLayout::Slots(Box::default()),
            Storage::Class(layout) => StrongLayout::Slots(class_offsets(layout).into()),
            Storage::Closure(captures) => {
                let mut offsets = Vec::new();
                push_owning(&mut offsets, captures.env_offset, captures.captures);
                StrongLayout::Slots(offsets.into())
            }
            Storage::Opaque => StrongLayout::Opaque,
        }
    }
}

/// Walk a class and its ancestors, root ancestor first.
fn class_offsets(layout: &'static ClassLayout) -> Vec<usize> {
    let mut chain = vec![(0usize, layout)];
    let mut current = layout;
    let mut base = 0usize;
    while let Some(sup) = current.superclass {
        base += sup.offset;
        current = sup.layout;
        chain.push((base, current));
    }

    let mut offsets = Vec::new();
    for (base, layout) in chain.into_iter().rev() {
        push_owning(&mut offsets, base, layout.fields);
    }
    offsets
}

fn push_owning(offsets: &mut Vec<usize>, base: usize, fields: &[Field]) {
    offsets.extend(
        fields
            .iter()
            .filter(|field| field.kind.is_owning())
            .map(|field| base + field.offset),
    );
}

/// Type → layout mapping, populated lazily and never mutated per entry
///
/// Lookups take a shared lock; only the first lookup of a type takes the
/// write lock. Share one cache between collectors with `Arc<LayoutCache>`.
#[derive(Default)]
pub struct LayoutCache {
    layouts: RwLock<FxHashMap<TypeId, Arc<StrongLayout>>>,
}

impl LayoutCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout of `object`'s concrete type, computing it on first use
    pub fn layout_for(&self, object: &dyn Object) -> Arc<StrongLayout> {
        let key = object.type_key();
        if let Some(layout) = self.layouts.read().get(&key) {
            return Arc::clone(layout);
        }

        let resolved = Arc::new(StrongLayout::resolve(object.storage()));
        let mut layouts = self.layouts.write();
        // Another thread may have resolved the same type meanwhile; keep the first.
        let layout = layouts.entry(key).or_insert_with(|| {
            tracing::trace!(
                target: "circle::gc",
                type_name = object.type_name(),
                layout = ?resolved,
                "Resolved strong layout"
            );
            resolved
        });
        Arc::clone(layout)
    }

    /// Whether a layout for type `T` has been resolved
    pub fn contains<T: Object>(&self) -> bool {
        self.layouts.read().contains_key(&TypeId::of::<T>())
    }

    /// Number of resolved types
    pub fn len(&self) -> usize {
        self.layouts.read().len()
    }

    /// Whether no type has been resolved yet
    pub fn is_empty(&self) -> bool {
        self.layouts.read().is_empty()
    }
}

impl std::fmt::Debug for LayoutCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutCache")
            .field("types", &self.len())
            .finish()
    }
}
