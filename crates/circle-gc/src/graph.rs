//! Cycle search
//!
//! A search starts at one candidate and walks every strong reference
//! reachable from it, breadth-first and in discovery order. Each visited
//! object is pinned by one temporary strong handle, so an object's strong
//! count at the end of the walk decomposes into:
//!
//! - one count per strong reference discovered inside the walk,
//! - one count for the search's own handle,
//! - one more for the root, held by the caller,
//! - anything else, which must come from outside the walked subgraph.
//!
//! An object with "anything else" is externally referenced.
//!
//! The verdict covers the root's cyclic component: the strongly connected
//! component containing the root. Every walked referrer of a member is itself
//! a member, so the members' counts are fully explained by the component. The
//! component is an unclaimed cycle when the root lies on a cycle and no member
//! is externally referenced. Objects the component merely points at are leaf
//! nodes; they can be externally referenced without keeping the cycle alive,
//! and they are released by ordinary reference counting once it is broken.
//!
//! A reference hidden inside an object whose layout is unavailable still shows
//! up as an unexplained count on its target, so such objects only block the
//! verdict when they are the root or point back into the component.
//!
//! ## Early exit
//!
//! An object's internal reference count is only final once every referrer has
//! been enumerated, so the walk itself always completes unless the root's own
//! layout is unavailable. Without `gather_all` the search then stops as soon as
//! the root is known not to lie on a cycle, or at the first externally
//! referenced member of its component, skipping object infos. Both modes
//! always agree on the verdict.

use std::collections::VecDeque;
use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::enumerate::ReferenceEnumerator;
use crate::error::CircleError;
use crate::layout::LayoutCache;
use crate::object::{ObjId, ObjRef};
use crate::weak_ref::WeakRef;

/// Insertion-ordered set with the Fx hasher
pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;
/// Insertion-ordered map with the Fx hasher
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// A strong reference discovered during a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    source: ObjId,
    slot: Option<usize>,
    target: ObjId,
}

impl Edge {
    pub(crate) fn new(source: ObjId, slot: Option<usize>, target: ObjId) -> Self {
        Self {
            source,
            slot,
            target,
        }
    }

    /// Object owning the reference
    pub fn source(&self) -> ObjId {
        self.source
    }

    /// Byte offset of the owning slot, `None` for container elements
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Referenced object
    pub fn target(&self) -> ObjId {
        self.target
    }

    /// Whether the breaker can clear this edge on its own
    pub fn is_addressable(&self) -> bool {
        self.slot.is_some()
    }
}

/// What one search learned about one object
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    object: WeakRef,
    type_name: &'static str,
    owners: usize,
    internal_references: usize,
    externally_referenced: bool,
    part_of_cycle: bool,
    leaked: bool,
    incoming_references: FxIndexSet<Edge>,
    referring_objects: FxIndexSet<ObjId>,
}

impl ObjectInfo {
    /// Identity of the object
    pub fn id(&self) -> ObjId {
        self.object.id()
    }

    /// Non-owning handle to the object
    pub fn object(&self) -> &WeakRef {
        &self.object
    }

    /// Concrete type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Strong count observed during the search, minus the collector's own handles
    pub fn owners(&self) -> usize {
        self.owners
    }

    /// Strong references to this object found inside the search, with multiplicity
    pub fn internal_references(&self) -> usize {
        self.internal_references
    }

    /// Whether some owner exists outside the searched subgraph
    pub fn externally_referenced(&self) -> bool {
        self.externally_referenced
    }

    /// Whether the object lies on a strong-reference cycle
    pub fn part_of_cycle(&self) -> bool {
        self.part_of_cycle
    }

    /// Whether the object belongs to the root's cycle and nothing outside owns it
    pub fn leaked(&self) -> bool {
        self.leaked
    }

    /// Edges found inside the search whose target is this object
    pub fn incoming_references(&self) -> &FxIndexSet<Edge> {
        &self.incoming_references
    }

    /// Sources of the incoming edges
    pub fn referring_objects(&self) -> &FxIndexSet<ObjId> {
        &self.referring_objects
    }
}

/// Strong handles that keep the sources of edges alive until they are cleared
#[derive(Debug, Default)]
pub struct RetainSet {
    handles: FxHashMap<ObjId, ObjRef>,
}

impl RetainSet {
    /// Handle for `id`, if retained
    pub fn get(&self, id: ObjId) -> Option<&ObjRef> {
        self.handles.get(&id)
    }

    /// Whether `id` is retained
    pub fn contains(&self, id: ObjId) -> bool {
        self.handles.contains_key(&id)
    }

    /// Number of retained objects
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn insert(&mut self, obj: ObjRef) {
        self.handles.insert(obj.id(), obj);
    }
}

/// Outcome of one search
///
/// Handles retained for breaking are released when the result is dropped.
#[derive(Debug, Default)]
pub struct SearchResult {
    is_unclaimed_cycle: bool,
    breakable: bool,
    edges_to_zero: Vec<Edge>,
    infos: FxIndexMap<ObjId, ObjectInfo>,
    diagnostics: Vec<CircleError>,
    retained: RetainSet,
}

impl SearchResult {
    /// Whether the root lies on a cycle nothing outside owns
    pub fn is_unclaimed_cycle(&self) -> bool {
        self.is_unclaimed_cycle
    }

    /// Whether every cycle edge has an addressable slot
    pub fn is_breakable(&self) -> bool {
        self.breakable
    }

    /// References to clear to break the cycle (empty unless leaked and breakable)
    pub fn edges_to_zero(&self) -> &[Edge] {
        &self.edges_to_zero
    }

    /// Per-object info, in discovery order (empty unless gathering all)
    pub fn infos(&self) -> &FxIndexMap<ObjId, ObjectInfo> {
        &self.infos
    }

    /// Info for one object
    pub fn info(&self, id: ObjId) -> Option<&ObjectInfo> {
        self.infos.get(&id)
    }

    /// Degraded conditions observed during the search
    pub fn diagnostics(&self) -> &[CircleError] {
        &self.diagnostics
    }

    /// Handles keeping the sources of `edges_to_zero` alive
    pub fn retained(&self) -> &RetainSet {
        &self.retained
    }

    /// Drop the retained handles and keep the infos
    pub fn into_infos(self) -> FxIndexMap<ObjId, ObjectInfo> {
        self.infos
    }

    pub(crate) fn take_diagnostics(&mut self) -> Vec<CircleError> {
        std::mem::take(&mut self.diagnostics)
    }

    fn claimed(diagnostics: Vec<CircleError>) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }
}

/// Per-object bookkeeping during a walk
struct Node {
    handle: ObjRef,
    internal: usize,
    incoming: FxIndexSet<Edge>,
    referrers: FxIndexSet<ObjId>,
    unavailable: bool,
}

impl Node {
    fn new(handle: ObjRef) -> Self {
        Self {
            handle,
            internal: 0,
            incoming: FxIndexSet::default(),
            referrers: FxIndexSet::default(),
            unavailable: false,
        }
    }
}

/// Searches the subgraph reachable from a root for unclaimed cycles
#[derive(Debug, Clone, Copy)]
pub struct CycleGraphBuilder<'a> {
    enumerator: ReferenceEnumerator<'a>,
}

impl<'a> CycleGraphBuilder<'a> {
    /// Create a builder resolving layouts through `cache`
    pub fn new(cache: &'a LayoutCache) -> Self {
        Self {
            enumerator: ReferenceEnumerator::new(cache),
        }
    }

    /// Search from `root`.
    ///
    /// The caller's `root` handle must be one strong count above what the
    /// object would otherwise hold (for example a handle just upgraded from a
    /// weak reference). With `gather_all`, the search always runs to the end
    /// and fills in [`SearchResult::infos`].
    pub fn search(&self, root: &ObjRef, gather_all: bool) -> SearchResult {
        let mut nodes: Vec<Node> = vec![Node::new(root.clone())];
        let mut index: FxHashMap<ObjId, usize> = FxHashMap::default();
        index.insert(root.id(), 0);
        let mut edges: Vec<(usize, usize, Edge)> = Vec::new();
        let mut worklist: VecDeque<usize> = VecDeque::from([0]);
        let mut diagnostics = Vec::new();

        // Phase 1: walk every strong reference reachable from the root
        while let Some(current) = worklist.pop_front() {
            let source = nodes[current].handle.clone();
            let source_id = source.id();

            let outcome = self.enumerator.enumerate(&source, &mut |slot, target| {
                let target_id = target.id();
                let target_idx = match index.get(&target_id) {
                    Some(&idx) => idx,
                    None => {
                        let idx = nodes.len();
                        nodes.push(Node::new(target.clone()));
                        index.insert(target_id, idx);
                        worklist.push_back(idx);
                        idx
                    }
                };

                let edge = Edge::new(source_id, slot, target_id);
                let node = &mut nodes[target_idx];
                node.internal += 1;
                node.incoming.insert(edge);
                node.referrers.insert(source_id);
                edges.push((current, target_idx, edge));
            });

            if let Err(err) = outcome {
                tracing::warn!(target: "circle::gc", object = %source_id, "{err}");
                nodes[current].unavailable = true;
                diagnostics.push(err);
                // A root that can't be enumerated has no known way back to itself.
                if current == 0 && !gather_all {
                    return SearchResult::claimed(diagnostics);
                }
            }
        }

        // Phase 2: cycle membership
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for &(from, to, _) in &edges {
            successors[from].push(to);
        }
        let components = strongly_connected(&successors);
        let root_component = components.component[0];
        let in_root = |idx: usize| components.component[idx] == root_component;
        let root_cyclic = components.cyclic[0];

        if !root_cyclic && !gather_all {
            tracing::trace!(
                target: "circle::gc",
                root = %root.id(),
                visited = nodes.len(),
                "Root is not on a cycle"
            );
            return SearchResult::claimed(diagnostics);
        }

        // Phase 3: compare observed strong counts with what the walk explains
        let mut external = vec![false; nodes.len()];
        let mut owners = vec![0usize; nodes.len()];
        let mut anchored = false;
        for (idx, node) in nodes.iter().enumerate() {
            if !gather_all && !in_root(idx) {
                continue;
            }
            let ours = 1 + usize::from(idx == 0);
            let actual = node.handle.strong_count();
            owners[idx] = actual.saturating_sub(ours);
            if node.unavailable || actual != node.internal + ours {
                external[idx] = true;
                if in_root(idx) {
                    anchored = true;
                    if !gather_all {
                        tracing::trace!(
                            target: "circle::gc",
                            root = %root.id(),
                            anchor = %node.handle.id(),
                            visited = nodes.len(),
                            "Search anchored externally"
                        );
                        return SearchResult::claimed(diagnostics);
                    }
                }
            }
        }

        let is_unclaimed_cycle = root_cyclic && !anchored;
        let mut cycle_edges = Vec::new();
        if is_unclaimed_cycle {
            cycle_edges.extend(
                edges
                    .iter()
                    .filter(|(from, to, _)| in_root(*from) && in_root(*to))
                    .map(|&(_, _, edge)| edge),
            );
        }
        let breakable = is_unclaimed_cycle && cycle_edges.iter().all(Edge::is_addressable);

        tracing::trace!(
            target: "circle::gc",
            root = %root.id(),
            visited = nodes.len(),
            edges = edges.len(),
            is_unclaimed_cycle,
            breakable,
            "Search complete"
        );

        let mut result = SearchResult {
            is_unclaimed_cycle,
            breakable,
            diagnostics,
            ..SearchResult::default()
        };

        if gather_all {
            for (idx, node) in nodes.iter().enumerate() {
                let info = ObjectInfo {
                    object: node.handle.downgrade(),
                    type_name: node.handle.type_name(),
                    owners: owners[idx],
                    internal_references: node.internal,
                    externally_referenced: external[idx],
                    part_of_cycle: components.cyclic[idx],
                    leaked: is_unclaimed_cycle && in_root(idx),
                    incoming_references: node.incoming.clone(),
                    referring_objects: node.referrers.clone(),
                };
                result.infos.insert(node.handle.id(), info);
            }
        }

        if breakable {
            let sources: FxHashSet<ObjId> = cycle_edges.iter().map(Edge::source).collect();
            for node in nodes {
                if sources.contains(&node.handle.id()) {
                    result.retained.insert(node.handle);
                }
            }
            result.edges_to_zero = cycle_edges;
        }

        result
    }
}

/// Strongly connected components of a successor graph
struct Components {
    /// Component id per node
    component: Vec<usize>,
    /// Whether the node lies on a cycle (component of two or more, or a self edge)
    cyclic: Vec<bool>,
}

/// Tarjan's algorithm, iterative so deep chains can't overflow the stack.
fn strongly_connected(successors: &[Vec<usize>]) -> Components {
    const UNVISITED: usize = usize::MAX;

    let n = successors.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut component = vec![UNVISITED; n];
    let mut cyclic = vec![false; n];
    let mut next_index = 0usize;
    let mut next_component = 0usize;
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }
        index[start] = next_index;
        low[start] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start] = true;
        frames.push((start, 0));

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            if let Some(&succ) = successors[node].get(frame.1) {
                frame.1 += 1;
                if index[succ] == UNVISITED {
                    index[succ] = next_index;
                    low[succ] = next_index;
                    next_index += 1;
                    stack.push(succ);
                    on_stack[succ] = true;
                    frames.push((succ, 0));
                } else if on_stack[succ] {
                    low[node] = low[node].min(index[succ]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                low[parent] = low[parent].min(low[node]);
            }

            if low[node] == index[node] {
                let mut members = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    members.push(member);
                    if member == node {
                        break;
                    }
                }
                let is_cycle = members.len() > 1 || successors[node].contains(&node);
                for member in members {
                    component[member] = next_component;
                    cyclic[member] = is_cycle;
                }
                next_component += 1;
            }
        }
    }

    Components { component, cyclic }
}
