//! Demo object graphs and the actions that build and collect them.

use std::io::Write;
use std::mem::offset_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use circle_gc::{
    CandidateRegistry, Captures, ClassLayout, Closure, CollectorConfig, Field, ObjId, ObjRef,
    Object, ObjectList, Storage, StrongSlot, WeakRef, WeakSlot,
};
use clap::ValueEnum;

/// Linked node used by every scene
struct DemoNode {
    name: String,
    next: StrongSlot,
    handler: StrongSlot,
    prev: WeakSlot,
}

static DEMO_NODE: ClassLayout = ClassLayout::new(
    "DemoNode",
    &[
        Field::plain("name", offset_of!(DemoNode, name)),
        Field::strong("next", offset_of!(DemoNode, next)),
        Field::strong("handler", offset_of!(DemoNode, handler)),
        Field::weak("prev", offset_of!(DemoNode, prev)),
    ],
);

// SAFETY: `next` and `handler` are StrongSlots.
unsafe impl Object for DemoNode {
    fn storage(&self) -> Storage {
        Storage::Class(&DEMO_NODE)
    }
}

/// Environment of a click handler that captures its owner
struct ClickHandler {
    owner: StrongSlot,
    clicks: AtomicUsize,
}

// SAFETY: `owner` is a StrongSlot.
unsafe impl Captures for ClickHandler {
    const CAPTURES: &'static [Field] = &[
        Field::strong("owner", offset_of!(ClickHandler, owner)),
        Field::plain("clicks", offset_of!(ClickHandler, clicks)),
    ];
}

fn on_click(env: &ClickHandler) {
    env.clicks.fetch_add(1, Ordering::Relaxed);
}

/// One step of a demo run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Build a cycle and keep a reference to it
    MakeCycle,
    /// Build a cycle and drop every outside reference
    LeakCycle,
    /// Build a chain whose back-pointers are weak and keep it
    MakeNonCycle,
    /// Leak a node that owns a closure capturing the node
    LeakClosure,
    /// Leak a node that owns a list containing the node
    LeakContainer,
    /// Drop every reference kept by earlier actions
    Release,
    /// Print what a full search sees from every candidate
    Infos,
    /// Run a collection pass
    Collect,
    /// Print which built objects are still alive
    Status,
}

struct Tracked {
    label: String,
    object: WeakRef,
}

/// Objects built so far, the references kept to them, and the collector
pub struct Scene {
    registry: CandidateRegistry,
    held: Vec<ObjRef>,
    tracked: Vec<Tracked>,
    length: usize,
    built: usize,
}

impl Scene {
    /// Create an empty scene whose cycles and chains have `length` nodes
    pub fn new(config: CollectorConfig, length: usize) -> Self {
        Self {
            registry: CandidateRegistry::with_config(config),
            held: Vec::new(),
            tracked: Vec::new(),
            length: length.max(1),
            built: 0,
        }
    }

    /// Perform one action, writing what it did to `out`
    pub fn apply(&mut self, action: Action, out: &mut impl Write) -> anyhow::Result<()> {
        tracing::debug!(?action, "Applying action");
        match action {
            Action::MakeCycle => {
                let head = self.ring("cycle");
                writeln!(out, "made cycle at {}", head.id())?;
                self.held.push(head);
            }
            Action::LeakCycle => {
                let head = self.ring("leak");
                writeln!(out, "leaked cycle at {}", head.id())?;
            }
            Action::MakeNonCycle => {
                let head = self.chain("chain");
                writeln!(out, "made chain at {}", head.id())?;
                self.held.push(head);
            }
            Action::LeakClosure => {
                let owner = self.leak_closure();
                writeln!(out, "leaked closure cycle at {owner}")?;
            }
            Action::LeakContainer => {
                let owner = self.leak_container();
                writeln!(out, "leaked container cycle at {owner}")?;
            }
            Action::Release => {
                let released = self.held.len();
                self.held.clear();
                writeln!(out, "released {released} reference(s)")?;
            }
            Action::Infos => {
                let graphs = self.registry.object_infos();
                if graphs.is_empty() {
                    writeln!(out, "no candidates")?;
                }
                for graph in graphs {
                    write!(out, "{graph}")?;
                }
            }
            Action::Collect => {
                let report = self.registry.collect();
                writeln!(out, "collect: {report}")?;
            }
            Action::Status => {
                let alive = self.alive();
                writeln!(out, "{} of {} object(s) alive", alive, self.tracked.len())?;
                for tracked in &self.tracked {
                    let state = if tracked.object.is_alive() { "alive" } else { "freed" };
                    writeln!(
                        out,
                        "  {:<12} {:<16} {}",
                        tracked.label,
                        tracked.object.id().to_string(),
                        state
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Number of built objects that are still alive
    pub fn alive(&self) -> usize {
        self.tracked
            .iter()
            .filter(|tracked| tracked.object.is_alive())
            .count()
    }

    /// Registry driving the collection passes
    pub fn registry(&self) -> &CandidateRegistry {
        &self.registry
    }

    fn node(&mut self, prefix: &str) -> ObjRef {
        self.built += 1;
        let label = format!("{prefix}-{}", self.built);
        let node = ObjRef::new(DemoNode {
            name: label.clone(),
            next: StrongSlot::default(),
            handler: StrongSlot::default(),
            prev: WeakSlot::default(),
        });
        self.track(label, &node);
        node
    }

    fn track(&mut self, label: String, object: &ObjRef) {
        self.tracked.push(Tracked {
            label,
            object: object.downgrade(),
        });
    }

    /// Nodes linked head to tail, with weak back-pointers
    fn nodes(&mut self, prefix: &str) -> Vec<ObjRef> {
        let nodes: Vec<ObjRef> = (0..self.length).map(|_| self.node(prefix)).collect();
        for pair in nodes.windows(2) {
            let (from, to) = (demo_node(&pair[0]), demo_node(&pair[1]));
            from.next.set(Some(pair[1].clone()));
            to.prev.set(Some(&pair[0]));
            tracing::trace!(from = %from.name, to = %to.name, "Linked");
        }
        nodes
    }

    fn ring(&mut self, prefix: &str) -> ObjRef {
        let nodes = self.nodes(prefix);
        let head = nodes[0].clone();
        if let Some(tail) = nodes.last() {
            demo_node(tail).next.set(Some(head.clone()));
        }
        self.registry.add_candidate(&head);
        head
    }

    fn chain(&mut self, prefix: &str) -> ObjRef {
        let head = self.nodes(prefix).swap_remove(0);
        self.registry.add_candidate(&head);
        head
    }

    fn leak_closure(&mut self) -> ObjId {
        let owner = self.node("closure");
        let handler = ObjRef::new(Closure::new(
            ClickHandler {
                owner: StrongSlot::to(&owner),
                clicks: AtomicUsize::new(0),
            },
            on_click,
        ));
        if let Some(closure) = handler.downcast_ref::<Closure<ClickHandler>>() {
            closure.call();
        }
        self.track(format!("handler-{}", self.built), &handler);
        demo_node(&owner).handler.set(Some(handler));
        self.registry.add_candidate(&owner);
        owner.id()
    }

    fn leak_container(&mut self) -> ObjId {
        let owner = self.node("list");
        let list = ObjRef::new(ObjectList::new());
        if let Some(items) = list.downcast_ref::<ObjectList>() {
            items.push(owner.clone());
        }
        self.track(format!("items-{}", self.built), &list);
        demo_node(&owner).next.set(Some(list));
        self.registry.add_candidate(&owner);
        owner.id()
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        // Container cycles outlive any collection pass; release them by hand.
        for tracked in &self.tracked {
            if let Some(list) = tracked.object.upgrade() {
                if let Some(items) = list.downcast_ref::<ObjectList>() {
                    items.clear();
                }
            }
        }
    }
}

fn demo_node(obj: &ObjRef) -> &DemoNode {
    match obj.downcast_ref::<DemoNode>() {
        Some(node) => node,
        None => unreachable!("scene nodes are always DemoNode"),
    }
}
