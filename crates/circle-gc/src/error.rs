//! Collector error types
//!
//! Nothing in this crate fails a collection pass. These values are recorded
//! as diagnostics on search results and collection reports so callers can see
//! why an object was not collected.

use thiserror::Error;

use crate::object::ObjId;

/// Degraded conditions observed while searching for or breaking cycles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircleError {
    /// The type declares no storage layout and exposes no container capability
    #[error("LayoutUnavailable: {type_name} has no strong layout and no container capability")]
    LayoutUnavailable {
        /// Name of the offending type
        type_name: &'static str,
    },

    /// A candidate was destroyed before the pass could resolve it
    #[error("CandidateGone: candidate {id} was already destroyed")]
    CandidateGone {
        /// Identity the candidate had while alive
        id: ObjId,
    },

    /// A slot no longer held the target it held when the edge was discovered
    #[error("ZeroingConflict: slot +{offset} of {owner} holds {found}, expected {expected}")]
    ZeroingConflict {
        /// Object owning the slot
        owner: ObjId,
        /// Byte offset of the slot
        offset: usize,
        /// Target recorded at discovery
        expected: ObjId,
        /// Target currently stored in the slot
        found: ObjId,
    },

    /// An edge was handed to the breaker without a handle keeping its source alive
    #[error("SourceNotRetained: no retained handle for {owner}")]
    SourceNotRetained {
        /// Object owning the slot
        owner: ObjId,
    },
}

/// Result type for collector operations
pub type Result<T> = std::result::Result<T, CircleError>;
