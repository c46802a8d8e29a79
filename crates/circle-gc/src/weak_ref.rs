//! Weak references to managed objects.
//!
//! A weak reference never contributes to the strong count, so holding one
//! does not change what the collector sees when it compares retain counts.

use std::fmt;
use std::sync::Weak;

use parking_lot::Mutex;

use crate::object::{ObjId, ObjRef, Object};

/// Non-owning handle that resolves to an [`ObjRef`] while the object lives
#[derive(Clone)]
pub struct WeakRef(Weak<dyn Object>);

impl WeakRef {
    pub(crate) fn from_weak(inner: Weak<dyn Object>) -> Self {
        Self(inner)
    }

    /// Try to produce a temporary strong handle.
    ///
    /// Returns `None` once the object has been destroyed.
    pub fn upgrade(&self) -> Option<ObjRef> {
        self.0.upgrade().map(ObjRef::from_arc)
    }

    /// Identity of the referenced object (stable even after destruction)
    pub fn id(&self) -> ObjId {
        ObjId::from_raw(self.0.as_ptr() as *const () as usize)
    }

    /// Whether the object is still alive
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Whether this handle refers to `obj`
    pub fn refers_to(&self, obj: &ObjRef) -> bool {
        self.id() == obj.id() && self.is_alive()
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("id", &self.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A weak reference field inside a managed object.
///
/// Declared with [`FieldKind::Weak`](crate::FieldKind::Weak); the layout
/// cache never treats it as an edge.
#[derive(Default)]
pub struct WeakSlot {
    target: Mutex<Option<WeakRef>>,
}

impl WeakSlot {
    /// Create a slot pointing at `target`
    pub fn new(target: Option<&ObjRef>) -> Self {
        Self {
            target: Mutex::new(target.map(ObjRef::downgrade)),
        }
    }

    /// Resolve the target if it is still alive
    pub fn get(&self) -> Option<ObjRef> {
        self.target.lock().as_ref().and_then(WeakRef::upgrade)
    }

    /// Point the slot at a new target
    pub fn set(&self, target: Option<&ObjRef>) {
        *self.target.lock() = target.map(ObjRef::downgrade);
    }
}

impl fmt::Debug for WeakSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSlot")
            .field("target", &*self.target.lock())
            .finish()
    }
}
