//! Cycle collection tests
//!
//! These tests build small object graphs, drop every outside owner, and check
//! that the collector reclaims exactly the subgraphs nothing else owns.

use std::mem::offset_of;
use std::sync::Arc;

use circle_gc::{
    CandidateRegistry, Captures, CircleError, ClassLayout, Closure, CollectorConfig,
    CycleBreaker, CycleGraphBuilder, Field, LayoutCache, ObjId, ObjRef, Object, ObjectList,
    Storage, StrongSlot, WeakSlot,
};

/// Test object with one of every field kind
struct Node {
    name: String,
    next: StrongSlot,
    other: StrongSlot,
    prev: WeakSlot,
    owner: Option<ObjId>,
}

static NODE: ClassLayout = ClassLayout::new(
    "Node",
    &[
        Field::plain("name", offset_of!(Node, name)),
        Field::strong("next", offset_of!(Node, next)),
        Field::strong("other", offset_of!(Node, other)),
        Field::weak("prev", offset_of!(Node, prev)),
        Field::unowned("owner", offset_of!(Node, owner)),
    ],
);

// SAFETY: `next` and `other` are StrongSlots.
unsafe impl Object for Node {
    fn storage(&self) -> Storage {
        Storage::Class(&NODE)
    }
}

fn node(name: &str) -> ObjRef {
    ObjRef::new(Node {
        name: name.to_string(),
        next: StrongSlot::default(),
        other: StrongSlot::default(),
        prev: WeakSlot::default(),
        owner: None,
    })
}

fn as_node(obj: &ObjRef) -> &Node {
    obj.downcast_ref::<Node>().unwrap()
}

fn link(from: &ObjRef, to: &ObjRef) {
    as_node(from).next.set(Some(to.clone()));
}

fn link_other(from: &ObjRef, to: &ObjRef) {
    as_node(from).other.set(Some(to.clone()));
}

/// Base class with an owning field
struct View {
    frame: i64,
    delegate: StrongSlot,
}

/// Subclass that embeds `View`
struct Button {
    base: View,
    title: String,
}

static VIEW: ClassLayout = ClassLayout::new(
    "View",
    &[
        Field::plain("frame", offset_of!(View, frame)),
        Field::strong("delegate", offset_of!(View, delegate)),
    ],
);

static BUTTON: ClassLayout =
    ClassLayout::new("Button", &[Field::plain("title", offset_of!(Button, title))])
        .extends(offset_of!(Button, base), &VIEW);

// SAFETY: the only strong field is the inherited `delegate` StrongSlot.
unsafe impl Object for Button {
    fn storage(&self) -> Storage {
        Storage::Class(&BUTTON)
    }
}

/// Closure environment capturing one object strongly
struct Handler {
    target: StrongSlot,
    label: &'static str,
}

// SAFETY: `target` is a StrongSlot.
unsafe impl Captures for Handler {
    const CAPTURES: &'static [Field] = &[
        Field::strong("target", offset_of!(Handler, target)),
        Field::plain("label", offset_of!(Handler, label)),
    ];
}

/// Owns a reference but describes neither slots nor elements
struct Foreign {
    held: StrongSlot,
}

// SAFETY: no offsets are declared.
unsafe impl Object for Foreign {}

#[test]
fn test_acyclic_chain_is_never_leaked() {
    let cache = LayoutCache::new();
    let a = node("a");
    let b = node("b");
    let c = node("c");
    link(&a, &b);
    link(&b, &c);
    let (weak_b, weak_c) = (b.downgrade(), c.downgrade());
    drop(b);
    drop(c);

    let result = CycleGraphBuilder::new(&cache).search(&a, true);
    assert!(!result.is_unclaimed_cycle());
    assert!(result.edges_to_zero().is_empty());
    assert_eq!(result.infos().len(), 3);
    for info in result.infos().values() {
        assert!(!info.externally_referenced());
        assert!(!info.part_of_cycle());
        assert!(!info.leaked());
    }
    drop(result);

    let mut registry = CandidateRegistry::new();
    registry.add_candidate(&a);
    let report = registry.collect();
    assert_eq!(report.cycles_found, 0);
    assert!(weak_b.is_alive());
    assert!(weak_c.is_alive());
    assert_eq!(as_node(&a).next.target_id(), Some(weak_b.id()));
}

#[test]
fn test_two_node_leaked_cycle() {
    let cache = LayoutCache::new();
    let a = node("a");
    let b = node("b");
    link(&a, &b);
    link(&b, &a);
    let weak_a = a.downgrade();
    let weak_b = b.downgrade();
    drop(b);

    let result = CycleGraphBuilder::new(&cache).search(&a, true);
    assert!(result.is_unclaimed_cycle());
    assert!(result.is_breakable());

    let info_a = result.info(a.id()).unwrap();
    assert!(info_a.leaked());
    assert!(info_a.part_of_cycle());
    assert!(!info_a.externally_referenced());
    assert_eq!(info_a.owners(), 1);
    assert_eq!(info_a.internal_references(), 1);
    assert_eq!(info_a.type_name(), std::any::type_name::<Node>());
    assert_eq!(
        info_a.referring_objects().iter().copied().collect::<Vec<_>>(),
        vec![weak_b.id()]
    );
    let incoming = info_a.incoming_references().first().unwrap();
    assert_eq!(incoming.source(), weak_b.id());
    assert_eq!(incoming.slot(), Some(offset_of!(Node, next)));

    let edges = result.edges_to_zero();
    assert_eq!(edges.len(), 2);
    assert_eq!((edges[0].source(), edges[0].target()), (a.id(), weak_b.id()));
    assert_eq!((edges[1].source(), edges[1].target()), (weak_b.id(), a.id()));

    let report = CycleBreaker::new().zero(edges, result.retained());
    assert_eq!(report.cleared, 2);
    assert!(as_node(&a).next.is_null());
    assert!(as_node(&weak_b.upgrade().unwrap()).next.is_null());

    drop(result);
    drop(a);
    assert!(weak_a.upgrade().is_none());
    assert!(weak_b.upgrade().is_none());
}

#[test]
fn test_registry_reclaims_leaked_cycle() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let b = node("b");
    link(&a, &b);
    link(&b, &a);
    registry.add_candidate(&a);
    let weak_a = a.downgrade();
    let weak_b = b.downgrade();
    drop(a);
    drop(b);

    let report = registry.collect();
    assert_eq!(report.searched, 1);
    assert_eq!(report.cycles_broken, 1);
    assert_eq!(report.edges_cleared, 2);
    assert!(report.diagnostics.is_empty());
    assert!(!weak_a.is_alive());
    assert!(!weak_b.is_alive());
}

#[test]
fn test_externally_anchored_cycle_is_kept() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let b = node("b");
    link(&a, &b);
    link(&b, &a);
    registry.add_candidate(&a);
    let weak_a = a.downgrade();
    drop(a);

    let report = registry.collect();
    assert_eq!(report.cycles_found, 0);
    assert!(weak_a.is_alive());
    assert_eq!(as_node(&b).next.target_id(), Some(weak_a.id()));

    let graphs = registry.object_infos();
    let infos = graphs[0].infos();
    assert!(infos[&b.id()].externally_referenced());
    assert!(!infos[&weak_a.id()].externally_referenced());
    assert!(infos.values().all(|info| info.part_of_cycle() && !info.leaked()));

    as_node(&b).next.clear();
}

#[test]
fn test_externally_held_tail_does_not_keep_cycle() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let b = node("b");
    let tail = node("tail");
    link(&a, &b);
    link(&b, &a);
    link_other(&b, &tail);
    let weak_b = b.downgrade();
    drop(b);

    let result = CycleGraphBuilder::new(registry.layout_cache()).search(&a, true);
    assert!(result.is_unclaimed_cycle());
    assert_eq!(result.edges_to_zero().len(), 2);
    let info = result.info(tail.id()).unwrap();
    assert!(info.externally_referenced());
    assert!(!info.part_of_cycle());
    assert!(!info.leaked());
    assert!(result.info(a.id()).unwrap().leaked());
    drop(result);

    registry.add_candidate(&a);
    let weak_a = a.downgrade();
    drop(a);

    let report = registry.collect();
    assert_eq!(report.cycles_broken, 1);
    assert!(!weak_a.is_alive());
    assert!(!weak_b.is_alive());
    assert_eq!(tail.strong_count(), 1);
}

#[test]
fn test_anchored_downstream_cycle_is_left_alone() {
    // a <-> b is unowned; b.other -> c, c <-> d, and d is held here
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let b = node("b");
    let c = node("c");
    let d = node("d");
    link(&a, &b);
    link(&b, &a);
    link_other(&b, &c);
    link(&c, &d);
    link(&d, &c);
    let (weak_b, weak_c) = (b.downgrade(), c.downgrade());
    drop(b);
    drop(c);

    let builder = CycleGraphBuilder::new(registry.layout_cache());
    assert!(builder.search(&a, false).is_unclaimed_cycle());
    let result = builder.search(&a, true);
    assert!(result.is_unclaimed_cycle());
    let pairs: Vec<_> = result
        .edges_to_zero()
        .iter()
        .map(|edge| (edge.source(), edge.target()))
        .collect();
    assert_eq!(pairs, vec![(a.id(), weak_b.id()), (weak_b.id(), a.id())]);
    let downstream = &result.infos()[&d.id()];
    assert!(downstream.part_of_cycle());
    assert!(downstream.externally_referenced());
    assert!(!downstream.leaked());
    assert!(!result.infos()[&weak_c.id()].leaked());
    drop(result);

    registry.add_candidate(&a);
    let weak_a = a.downgrade();
    drop(a);

    let report = registry.collect();
    assert_eq!(report.cycles_broken, 1);
    assert_eq!(report.edges_cleared, 2);
    assert!(!weak_a.is_alive());
    assert!(!weak_b.is_alive());
    assert!(weak_c.is_alive());
    assert_eq!(as_node(&d).next.target_id(), Some(weak_c.id()));

    as_node(&d).next.clear();
    assert!(!weak_c.is_alive());
    assert_eq!(d.strong_count(), 1);
}

#[test]
fn test_undescribed_leaf_does_not_block_collection() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let b = node("b");
    let foreign = ObjRef::new(Foreign {
        held: StrongSlot::default(),
    });
    link(&a, &b);
    link(&b, &a);
    link_other(&a, &foreign);
    let weak_foreign = foreign.downgrade();
    drop(foreign);
    drop(b);

    let result = CycleGraphBuilder::new(registry.layout_cache()).search(&a, false);
    assert!(result.is_unclaimed_cycle());
    assert!(result.is_breakable());
    assert!(matches!(
        result.diagnostics(),
        [CircleError::LayoutUnavailable { .. }]
    ));
    drop(result);

    registry.add_candidate(&a);
    let weak_a = a.downgrade();
    drop(a);

    let report = registry.collect();
    assert_eq!(report.cycles_broken, 1);
    assert!(!weak_a.is_alive());
    assert!(!weak_foreign.is_alive());
}

/// a <-> b, b -> leaf, a.other -> d, d -> a
fn build_graph() -> (ObjRef, Vec<ObjRef>) {
    let a = node("a");
    let b = node("b");
    let d = node("d");
    let leaf = ObjRef::new(String::from("leaf"));
    link(&a, &b);
    link(&b, &a);
    link_other(&b, &leaf);
    link_other(&a, &d);
    link(&d, &a);
    (a, vec![b, d, leaf])
}

/// Edges of a result rewritten in terms of discovery positions
fn shape(cache: &LayoutCache, root: &ObjRef) -> (bool, Vec<(usize, Option<usize>, usize)>) {
    let result = CycleGraphBuilder::new(cache).search(root, true);
    let position = |id: ObjId| result.infos().get_index_of(&id).unwrap();
    let edges = result
        .edges_to_zero()
        .iter()
        .map(|edge| (position(edge.source()), edge.slot(), position(edge.target())))
        .collect();
    (result.is_unclaimed_cycle(), edges)
}

#[test]
fn test_search_is_deterministic() {
    let cache = LayoutCache::new();
    let (first, rest) = build_graph();
    drop(rest);
    let (second, rest) = build_graph();
    drop(rest);

    let run_one = shape(&cache, &first);
    let run_two = shape(&cache, &first);
    let other_graph = shape(&cache, &second);
    assert_eq!(run_one, run_two);
    assert_eq!(run_one, other_graph);
    assert!(run_one.0);
    // a->b, a->d, b->a, d->a, in discovery order
    assert_eq!(
        run_one.1,
        vec![
            (0, Some(offset_of!(Node, next)), 1),
            (0, Some(offset_of!(Node, other)), 2),
            (1, Some(offset_of!(Node, next)), 0),
            (2, Some(offset_of!(Node, next)), 0),
        ]
    );

    for root in [first, second] {
        as_node(&root).next.clear();
        as_node(&root).other.clear();
    }
}

#[test]
fn test_breaking_twice_releases_once() {
    let cache = LayoutCache::new();
    let (a, rest) = build_graph();
    let weak_leaf = rest[2].downgrade();
    drop(rest);

    let result = CycleGraphBuilder::new(&cache).search(&a, false);
    let breaker = CycleBreaker::new();
    let first = breaker.zero(result.edges_to_zero(), result.retained());
    let second = breaker.zero(result.edges_to_zero(), result.retained());
    assert_eq!(first.cleared, 4);
    assert_eq!(second.cleared, 0);
    assert_eq!(second.already_clear, 4);
    assert!(second.conflicts.is_empty());
    assert_eq!(a.strong_count(), 2);

    drop(result);
    assert_eq!(a.strong_count(), 1);
    assert!(!weak_leaf.is_alive());

    let mut registry = CandidateRegistry::new();
    registry.add_candidate(&a);
    drop(a);
    assert_eq!(registry.collect().dropped, 1);
    assert_eq!(registry.collect().dropped, 0);
}

#[test]
fn test_early_exit_agrees_with_full_search() {
    let cache = LayoutCache::new();
    let builder = CycleGraphBuilder::new(&cache);
    let verdicts = |root: &ObjRef| {
        let fast = builder.search(root, false).is_unclaimed_cycle();
        let full = builder.search(root, true).is_unclaimed_cycle();
        assert_eq!(fast, full);
        fast
    };

    // acyclic
    let a = node("a");
    link(&a, &node("b"));
    assert!(!verdicts(&a));

    // leaked
    let (leaked, rest) = build_graph();
    drop(rest);
    assert!(verdicts(&leaked));

    // anchored
    let x = node("x");
    let y = node("y");
    link(&x, &y);
    link(&y, &x);
    assert!(!verdicts(&x));

    // opaque layout
    let f = ObjRef::new(Foreign {
        held: StrongSlot::default(),
    });
    link(&a, &f);
    assert!(!verdicts(&a));

    // leaked, pointing at the anchored cycle and the opaque object
    let p = node("p");
    link_other(&p, &x);
    let q = node("q");
    link(&q, &p);
    link_other(&q, &f);
    link(&p, &q);
    drop(q);
    assert!(verdicts(&p));
    assert!(!verdicts(&f));

    as_node(&leaked).next.clear();
    as_node(&leaked).other.clear();
    as_node(&x).next.clear();
    as_node(&p).next.clear();
    as_node(&p).other.clear();
    assert!(f.downcast_ref::<Foreign>().unwrap().held.is_null());
}

#[test]
fn test_container_cycle_is_not_breakable() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let list = ObjRef::new(ObjectList::new());
    link(&a, &list);
    list.downcast_ref::<ObjectList>().unwrap().push(a.clone());
    registry.add_candidate(&a);
    let weak_a = a.downgrade();
    let weak_list = list.downgrade();
    drop(list);

    let result = CycleGraphBuilder::new(registry.layout_cache()).search(&a, true);
    assert!(result.is_unclaimed_cycle());
    assert!(!result.is_breakable());
    assert!(result.edges_to_zero().is_empty());
    assert!(result.retained().is_empty());
    assert!(result.infos().values().all(|info| info.leaked()));
    drop(result);
    drop(a);

    let report = registry.collect();
    assert_eq!(report.cycles_found, 1);
    assert_eq!(report.unbreakable, 1);
    assert_eq!(report.cycles_broken, 0);
    assert_eq!(registry.stats().unbreakable_cycles, 1);
    assert!(weak_a.is_alive());

    let list = weak_list.upgrade().unwrap();
    list.downcast_ref::<ObjectList>().unwrap().clear();
    drop(list);
    assert!(!weak_a.is_alive());
    assert!(!weak_list.is_alive());
}

#[test]
fn test_closure_capture_cycle_is_broken() {
    let mut registry = CandidateRegistry::new();
    let owner = node("owner");
    let callback = ObjRef::new(Closure::new(
        Handler {
            target: StrongSlot::to(&owner),
            label: "on_click",
        },
        |env| assert!(!env.label.is_empty()),
    ));
    link_other(&owner, &callback);
    callback.downcast_ref::<Closure<Handler>>().unwrap().call();

    registry.add_candidate(&callback);
    let weak_owner = owner.downgrade();
    let weak_callback = callback.downgrade();
    drop(owner);
    drop(callback);

    let report = registry.collect();
    assert_eq!(report.cycles_broken, 1);
    assert_eq!(report.edges_cleared, 2);
    assert!(!weak_owner.is_alive());
    assert!(!weak_callback.is_alive());
}

#[test]
fn test_inherited_field_cycle_is_broken() {
    let mut registry = CandidateRegistry::new();
    let button = ObjRef::new(Button {
        base: View {
            frame: 0,
            delegate: StrongSlot::default(),
        },
        title: String::from("OK"),
    });
    let controller = node("controller");
    link(&controller, &button);
    let view = &button.downcast_ref::<Button>().unwrap().base;
    view.delegate.set(Some(controller.clone()));
    assert_eq!(view.frame, 0);
    assert_eq!(button.downcast_ref::<Button>().unwrap().title, "OK");

    registry.add_candidate(&controller);
    let weak_button = button.downgrade();
    let weak_controller = controller.downgrade();
    drop(button);
    drop(controller);

    let report = registry.collect();
    assert_eq!(report.cycles_broken, 1);
    assert!(!weak_button.is_alive());
    assert!(!weak_controller.is_alive());
}

#[test]
fn test_weak_and_unowned_fields_are_not_edges() {
    let cache = LayoutCache::new();
    let parent = node("parent");
    let child = ObjRef::new(Node {
        name: String::from("child"),
        next: StrongSlot::default(),
        other: StrongSlot::default(),
        prev: WeakSlot::new(Some(&parent)),
        owner: Some(parent.id()),
    });
    link(&parent, &child);
    assert_eq!(as_node(&child).owner, Some(parent.id()));
    drop(child);

    let result = CycleGraphBuilder::new(&cache).search(&parent, true);
    assert!(!result.is_unclaimed_cycle());
    assert_eq!(result.infos().len(), 2);
    assert!(result.info(parent.id()).unwrap().incoming_references().is_empty());

    let child = as_node(&parent).next.get().unwrap();
    assert_eq!(as_node(&child).name, "child");
    assert_eq!(as_node(&child).prev.get().map(|p| p.id()), Some(parent.id()));
}

#[test]
fn test_undescribed_type_is_never_leaked() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let foreign = ObjRef::new(Foreign {
        held: StrongSlot::to(&a),
    });
    link(&a, &a);
    link_other(&a, &foreign);
    registry.add_candidate(&a);
    let weak_a = a.downgrade();
    drop(foreign);

    let result = CycleGraphBuilder::new(registry.layout_cache()).search(&a, true);
    assert!(!result.is_unclaimed_cycle());
    assert!(matches!(
        result.diagnostics(),
        [CircleError::LayoutUnavailable { .. }]
    ));
    drop(result);
    drop(a);

    let report = registry.collect();
    assert_eq!(report.cycles_found, 0);
    assert!(matches!(
        report.diagnostics.as_slice(),
        [CircleError::LayoutUnavailable { .. }]
    ));
    assert!(weak_a.is_alive());

    let a = weak_a.upgrade().unwrap();
    as_node(&a).next.clear();
    as_node(&a).other.clear();
    drop(a);
    assert!(!weak_a.is_alive());
}

#[test]
fn test_gone_candidates_are_dropped() {
    let mut registry = CandidateRegistry::new();
    let kept = node("kept");
    let gone = node("gone");
    registry.add_candidate(&kept);
    registry.add_candidate(&gone);
    let gone_id = gone.id();
    drop(gone);

    let report = registry.collect();
    assert_eq!(report.searched, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.diagnostics, vec![CircleError::CandidateGone { id: gone_id }]);
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(&kept));
}

#[test]
fn test_layouts_are_resolved_once_per_type() {
    let cache = Arc::new(LayoutCache::new());
    let mut registry = CandidateRegistry::with_cache(CollectorConfig::default(), cache.clone());
    let nodes: Vec<ObjRef> = (0..8).map(|i| node(&format!("n{i}"))).collect();
    for pair in nodes.windows(2) {
        link(&pair[0], &pair[1]);
    }
    link_other(&nodes[7], &ObjRef::new(42i64));
    registry.add_candidate(&nodes[0]);

    registry.object_infos();
    registry.collect();
    assert_eq!(cache.len(), 2);
    assert!(cache.contains::<Node>());
    assert!(cache.contains::<i64>());
}

#[test]
fn test_object_infos_repeat_shared_objects() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    let b = node("b");
    link(&a, &b);
    link(&b, &a);
    registry.add_candidate(&a);
    registry.add_candidate(&b);
    drop(a);
    drop(b);

    let graphs = registry.object_infos();
    assert_eq!(graphs.len(), 2);
    assert!(graphs.iter().all(|graph| graph.infos().len() == 2 && graph.is_leaked()));
    assert_eq!(
        graphs[0].infos().keys().collect::<Vec<_>>(),
        graphs[1].infos().keys().rev().collect::<Vec<_>>()
    );
    drop(graphs);

    let report = registry.collect();
    assert_eq!(report.cycles_broken, 1);
    assert_eq!(report.dropped, 1);
    assert!(registry.is_empty());
}

#[test]
fn test_full_search_mode_matches_default() {
    let mut registry = CandidateRegistry::with_config(CollectorConfig {
        early_exit: false,
        ..CollectorConfig::default()
    });
    let (a, rest) = build_graph();
    let weaks: Vec<_> = rest.iter().map(ObjRef::downgrade).collect();
    registry.add_candidate(&a);
    drop(rest);
    drop(a);

    let report = registry.collect();
    assert_eq!(report.cycles_broken, 1);
    assert_eq!(report.edges_cleared, 4);
    assert!(weaks.iter().all(|weak| !weak.is_alive()));
}

#[test]
fn test_registry_moves_across_threads() {
    let mut registry = CandidateRegistry::new();
    let a = node("a");
    link(&a, &a);
    registry.add_candidate(&a);
    let weak = a.downgrade();
    drop(a);

    let report = std::thread::spawn(move || registry.collect())
        .join()
        .unwrap();
    assert_eq!(report.cycles_broken, 1);
    assert!(!weak.is_alive());
}
