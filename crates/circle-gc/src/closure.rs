//! Closure objects
//!
//! A closure is a managed callable whose layout is its capture set rather
//! than a type hierarchy. The environment type declares each captured
//! variable with the same [`Field`] descriptors classes use, so the layout
//! cache walks both the same way.

use std::fmt;
use std::mem::offset_of;

use crate::object::Object;
use crate::storage::{CaptureLayout, Field, Storage};

/// Captured variables of a closure environment
///
/// # Safety
///
/// Every capture declared [`FieldKind::Strong`](crate::FieldKind::Strong)
/// must be the offset of a [`StrongSlot`](crate::StrongSlot) inside `Self`.
pub unsafe trait Captures: Send + Sync + 'static {
    /// Captured variables, with offsets relative to `Self`
    const CAPTURES: &'static [Field];
}

/// A managed closure: an environment plus the code that runs over it
pub struct Closure<E: Captures> {
    env: E,
    body: fn(&E),
}

impl<E: Captures> Closure<E> {
    /// Create a closure over `env`
    pub fn new(env: E, body: fn(&E)) -> Self {
        Self { env, body }
    }

    /// Invoke the closure
    pub fn call(&self) {
        (self.body)(&self.env)
    }

    /// Captured environment
    pub fn env(&self) -> &E {
        &self.env
    }
}

// SAFETY: capture offsets are rebased on the environment's offset inside the
// closure, and `Captures` guarantees the strong ones address `StrongSlot`s.
unsafe impl<E: Captures> Object for Closure<E> {
    fn storage(&self) -> Storage {
        Storage::Closure(CaptureLayout {
            env_offset: offset_of!(Self, env),
            captures: E::CAPTURES,
        })
    }
}

impl<E: Captures> fmt::Debug for Closure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("captures", &E::CAPTURES.len())
            .finish()
    }
}
