//! Cycle breaking
//!
//! Clears the slots behind a search's `edges_to_zero`. Each slot is cleared
//! with a compare-and-take: a slot that already holds nothing is left alone,
//! and a slot that was reassigned since discovery is reported and left alone.
//! Released targets are dropped outside the slot lock.

use crate::enumerate::slot_at;
use crate::error::CircleError;
use crate::graph::{Edge, RetainSet};
use crate::slot::Take;

/// What a breaking pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ZeroReport {
    /// Slots cleared (one release each)
    pub cleared: usize,
    /// Slots already null
    pub already_clear: usize,
    /// Edges without an addressable slot
    pub skipped_opaque: usize,
    /// Slots left untouched because they changed or their owner wasn't retained
    pub conflicts: Vec<CircleError>,
}

impl ZeroReport {
    /// Whether every edge ended up cleared without conflicts
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.skipped_opaque == 0
    }
}

/// Clears owning slots named by edges
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleBreaker;

impl CycleBreaker {
    /// Create a breaker
    pub fn new() -> Self {
        Self
    }

    /// Clear the slot behind every edge.
    ///
    /// `retained` must hold a strong handle for each edge's source, normally
    /// [`SearchResult::retained`](crate::SearchResult::retained). Running the
    /// same edges twice releases each target once.
    pub fn zero<'e>(
        &self,
        edges: impl IntoIterator<Item = &'e Edge>,
        retained: &RetainSet,
    ) -> ZeroReport {
        let mut report = ZeroReport::default();

        for edge in edges {
            let Some(offset) = edge.slot() else {
                report.skipped_opaque += 1;
                continue;
            };
            let Some(owner) = retained.get(edge.source()) else {
                report.conflicts.push(CircleError::SourceNotRetained {
                    owner: edge.source(),
                });
                continue;
            };

            match slot_at(owner, offset).take_if(edge.target()) {
                Take::Cleared(target) => {
                    tracing::trace!(
                        target: "circle::gc",
                        owner = %edge.source(),
                        offset,
                        target = %edge.target(),
                        "Cleared slot"
                    );
                    drop(target);
                    report.cleared += 1;
                }
                Take::Empty => report.already_clear += 1,
                Take::Changed(found) => {
                    let conflict = CircleError::ZeroingConflict {
                        owner: edge.source(),
                        offset,
                        expected: edge.target(),
                        found,
                    };
                    tracing::warn!(target: "circle::gc", "{conflict}");
                    report.conflicts.push(conflict);
                }
            }
        }

        report
    }
}
