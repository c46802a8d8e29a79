//! Managed object handles
//!
//! Every object the collector can look at lives behind an [`ObjRef`], a
//! reference-counted handle over `Arc<dyn Object>`. The strong count of that
//! `Arc` is the retain count the collector reads, and [`WeakRef`] is the
//! non-owning relation it keeps for candidates.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::storage::Storage;
use crate::weak_ref::WeakRef;

/// Identity of a managed object (its data address)
///
/// Identities are only meaningful while the object is alive. Once it is
/// destroyed the address may be reused by a later allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(usize);

impl ObjId {
    /// Create an identity from a raw address
    pub const fn from_raw(addr: usize) -> Self {
        Self(addr)
    }

    /// Raw address
    pub const fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId(#{:x})", self.0)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Trait for objects managed by the reference-counted runtime
///
/// # Safety
///
/// Implementors vouch for the storage description they return: every offset
/// declared with [`FieldKind::Strong`](crate::FieldKind::Strong) (directly, via
/// a superclass layout, or via closure captures) must address a
/// [`StrongSlot`](crate::StrongSlot) inside `Self`. The collector reads and
/// clears slots through those offsets. `type_key` and `type_name` must not be
/// overridden.
pub unsafe trait Object: Any + Send + Sync {
    /// Describe where this type stores its strong references.
    ///
    /// Called once per type by the layout cache. The default is
    /// [`Storage::Opaque`], which requires [`Object::container`].
    fn storage(&self) -> Storage {
        Storage::Opaque
    }

    /// Container capability for storage that can't be described statically
    fn container(&self) -> Option<&dyn Container> {
        None
    }

    /// Type identity used as the layout cache key
    fn type_key(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    /// Human readable type name
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Enumeration capability for objects whose owned references live in
/// dynamically sized storage
pub trait Container {
    /// Call `visit` once for every strong reference the container owns.
    fn for_each_owned(&self, visit: &mut dyn FnMut(&ObjRef));
}

/// Strong, owning handle to a managed object
#[derive(Clone)]
pub struct ObjRef(Arc<dyn Object>);

impl ObjRef {
    /// Allocate a new managed object
    pub fn new<T: Object>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Identity of the referenced object
    pub fn id(&self) -> ObjId {
        ObjId(Arc::as_ptr(&self.0) as *const () as usize)
    }

    /// Create a non-owning handle
    pub fn downgrade(&self) -> WeakRef {
        WeakRef::from_weak(Arc::downgrade(&self.0))
    }

    /// Number of strong handles currently keeping the object alive
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both handles refer to the same object
    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        self.id() == other.id()
    }

    /// Name of the object's concrete type
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    /// Borrow the object as its concrete type
    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        if self.0.type_key() == TypeId::of::<T>() {
            // SAFETY: the concrete type was just checked, and the data pointer
            // of an `Arc<dyn Object>` points at that concrete value.
            Some(unsafe { &*(Arc::as_ptr(&self.0) as *const T) })
        } else {
            None
        }
    }

    /// Borrow the object through its capability trait
    pub fn object(&self) -> &dyn Object {
        &*self.0
    }

    /// Start of the object's value in memory
    pub(crate) fn data_ptr(&self) -> *const u8 {
        Arc::as_ptr(&self.0) as *const u8
    }

    pub(crate) fn from_arc(inner: Arc<dyn Object>) -> Self {
        Self(inner)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjRef")
            .field("id", &self.id())
            .field("type", &self.type_name())
            .field("strong", &self.strong_count())
            .finish()
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjRef {}

// Leaf types hold no references at all
macro_rules! leaf_object {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: leaf storage declares no strong offsets.
            unsafe impl Object for $ty {
                fn storage(&self) -> Storage {
                    Storage::Leaf
                }
            }
        )*
    };
}

leaf_object!((), bool, i64, f64, String);
