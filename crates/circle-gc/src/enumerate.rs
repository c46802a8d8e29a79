//! Strong reference enumeration
//!
//! This is the only module that turns a layout offset into a slot. Everything
//! downstream works with [`Edge`](crate::Edge) values.

use crate::error::{CircleError, Result};
use crate::layout::{LayoutCache, StrongLayout};
use crate::object::ObjRef;
use crate::slot::StrongSlot;

/// Visits the outgoing strong references of objects
#[derive(Debug, Clone, Copy)]
pub struct ReferenceEnumerator<'a> {
    cache: &'a LayoutCache,
}

impl<'a> ReferenceEnumerator<'a> {
    /// Create an enumerator resolving layouts through `cache`
    pub fn new(cache: &'a LayoutCache) -> Self {
        Self { cache }
    }

    /// Layout cache in use
    pub fn cache(&self) -> &'a LayoutCache {
        self.cache
    }

    /// Call `visit(slot, target)` for every strong reference `obj` owns.
    ///
    /// `slot` is the byte offset of the owning slot, or `None` for elements
    /// reported by a container. Null slots are skipped. Fails with
    /// [`CircleError::LayoutUnavailable`] before visiting anything when the
    /// type is opaque and has no container capability.
    pub fn enumerate(
        &self,
        obj: &ObjRef,
        visit: &mut dyn FnMut(Option<usize>, &ObjRef),
    ) -> Result<()> {
        let layout = self.cache.layout_for(obj.object());
        match &*layout {
            StrongLayout::Slots(offsets) => {
                for &offset in offsets.iter() {
                    slot_at(obj, offset).peek(|target| {
                        if let Some(target) = target {
                            visit(Some(offset), target);
                        }
                    });
                }
                Ok(())
            }
            StrongLayout::Opaque => {
                let container =
                    obj.object()
                        .container()
                        .ok_or(CircleError::LayoutUnavailable {
                            type_name: obj.type_name(),
                        })?;
                container.for_each_owned(&mut |target| visit(None, target));
                Ok(())
            }
        }
    }
}

/// Slot at `offset` inside `obj`.
///
/// Offsets must come from the layout of `obj`'s own type.
pub(crate) fn slot_at(obj: &ObjRef, offset: usize) -> &StrongSlot {
    // SAFETY: the offset was produced by the layout cache for this object's
    // concrete type, and `Object` implementors guarantee that every strong
    // offset addresses a `StrongSlot` inside the value. The returned borrow
    // is tied to `obj`, which keeps the value alive.
    unsafe { &*(obj.data_ptr().add(offset) as *const StrongSlot) }
}
