//! Strong reference fields.

use std::fmt;

use parking_lot::Mutex;

use crate::object::{ObjId, ObjRef};

/// An owning, nullable reference field inside a managed object.
///
/// The slot owns exactly one strong count on its target. Replacing or
/// clearing the target releases that count after the slot lock is dropped,
/// so destructors triggered by the release never run under the lock.
#[derive(Default)]
pub struct StrongSlot {
    target: Mutex<Option<ObjRef>>,
}

/// Outcome of a compare-and-take on a slot
#[derive(Debug)]
pub(crate) enum Take {
    /// The slot held the expected target and is now null
    Cleared(ObjRef),
    /// The slot was already null
    Empty,
    /// The slot holds a different object
    Changed(ObjId),
}

impl StrongSlot {
    /// Create a slot owning `target`
    pub fn new(target: Option<ObjRef>) -> Self {
        Self {
            target: Mutex::new(target),
        }
    }

    /// Create a slot owning a clone of `target`
    pub fn to(target: &ObjRef) -> Self {
        Self::new(Some(target.clone()))
    }

    /// Get a new strong handle to the target
    pub fn get(&self) -> Option<ObjRef> {
        self.target.lock().clone()
    }

    /// Replace the target, returning the previous one
    pub fn replace(&self, target: Option<ObjRef>) -> Option<ObjRef> {
        std::mem::replace(&mut *self.target.lock(), target)
    }

    /// Store a new target, releasing the previous one
    pub fn set(&self, target: Option<ObjRef>) {
        drop(self.replace(target));
    }

    /// Release the target and null the slot
    pub fn clear(&self) {
        self.set(None);
    }

    /// Whether the slot is null
    pub fn is_null(&self) -> bool {
        self.target.lock().is_none()
    }

    /// Identity of the current target
    pub fn target_id(&self) -> Option<ObjId> {
        self.target.lock().as_ref().map(ObjRef::id)
    }

    /// Look at the target without taking a new strong handle
    pub(crate) fn peek<R>(&self, f: impl FnOnce(Option<&ObjRef>) -> R) -> R {
        f(self.target.lock().as_ref())
    }

    /// Take the target only if it is still `expected`.
    pub(crate) fn take_if(&self, expected: ObjId) -> Take {
        let mut target = self.target.lock();
        match target.take() {
            None => Take::Empty,
            Some(current) if current.id() == expected => Take::Cleared(current),
            Some(current) => {
                let found = current.id();
                *target = Some(current);
                Take::Changed(found)
            }
        }
    }
}

impl fmt::Debug for StrongSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrongSlot")
            .field("target", &self.target_id())
            .finish()
    }
}
