//! # Circle
//!
//! Candidate-driven cycle collector for reference-counted objects.
//!
//! ## Design
//!
//! - **Candidates**: held weakly; the host nominates objects it suspects
//! - **Search**: walks strong references from a candidate and compares each
//!   object's strong count with the references found inside the walk
//! - **Breaking**: a cycle through the candidate that nothing outside owns has
//!   its edges cleared slot by slot, after which ordinary reference counting
//!   reclaims it together with whatever it alone pointed at
//! - **Layouts**: objects describe where they keep strong references; each
//!   type is resolved once into a list of slot offsets

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod breaker;
pub mod closure;
pub mod collector;
pub mod containers;
pub mod enumerate;
pub mod error;
pub mod graph;
pub mod layout;
pub mod object;
pub mod slot;
pub mod storage;
pub mod weak_ref;

pub use breaker::{CycleBreaker, ZeroReport};
pub use closure::{Captures, Closure};
pub use collector::{CandidateGraph, CandidateRegistry, CollectReport, CollectorConfig, CollectorStats};
pub use containers::{ObjectList, ObjectMap};
pub use enumerate::ReferenceEnumerator;
pub use error::{CircleError, Result};
pub use graph::{CycleGraphBuilder, Edge, FxIndexMap, FxIndexSet, ObjectInfo, RetainSet, SearchResult};
pub use layout::{LayoutCache, StrongLayout};
pub use object::{Container, ObjId, ObjRef, Object};
pub use slot::StrongSlot;
pub use storage::{CaptureLayout, ClassLayout, Field, FieldKind, Storage, Superclass};
pub use weak_ref::{WeakRef, WeakSlot};
