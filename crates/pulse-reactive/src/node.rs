//! Reactive nodes: the common representation shared by signals, computeds and effects.

use std::any::Any;

use slotmap::{new_key_type, Key};

use crate::Root;

/// Allocates a new node owned by the current scope and links it into the owner's `children` so it
/// gets disposed along with its parent.
#[cfg_attr(debug_assertions, track_caller)]
pub(crate) fn insert_node(
    root: &'static Root,
    kind: NodeKind,
    value: Option<Box<dyn Any>>,
    callback: Option<Box<dyn FnMut(&mut Option<Box<dyn Any>>) -> bool>>,
) -> NodeId {
    let parent = root.current_node.get();
    let node = ReactiveNode {
        kind,
        value,
        callback,
        children: Vec::new(),
        parent,
        dependents: Vec::new(),
        dependencies: Vec::new(),
        cleanups: Vec::new(),
        context: Vec::new(),
        state: NodeState::Clean,
        mark: Mark::None,
        #[cfg(debug_assertions)]
        created_at: std::panic::Location::caller(),
    };
    let id = root.nodes.borrow_mut().insert(node);
    if !parent.is_null() {
        if let Some(parent_node) = root.nodes.borrow_mut().get_mut(parent) {
            parent_node.children.push(id);
        }
    }
    id
}

/// Allocates a bare node with no value or callback, used as a child-scope marker.
#[cfg_attr(debug_assertions, track_caller)]
pub(crate) fn create_marker_node(root: &'static Root, kind: NodeKind) -> NodeId {
    insert_node(root, kind, None, None)
}

new_key_type! {
    /// Identifies a single node in the reactive graph.
    pub struct NodeId;
}

/// What kind of reactive node this is. Signals hold a value set from the outside; computeds
/// derive their value lazily from other nodes; effects re-run eagerly for their side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Signal,
    Computed,
    Effect,
}

/// A node in the reactive graph. Plain signals, computed signals and effects are all represented
/// uniformly so the dependency tracker and propagation algorithm don't need to special-case any
/// of them.
pub(crate) struct ReactiveNode {
    pub kind: NodeKind,
    /// Current value. `None` for effects, which have no publicly observable value.
    pub value: Option<Box<dyn Any>>,
    /// Derivation/body closure. Returns `true` if the value changed (computeds use this to decide
    /// whether to notify dependents; effects always return `true`).
    pub callback: Option<Box<dyn FnMut(&mut Option<Box<dyn Any>>) -> bool>>,
    /// Nodes owned by this node (child scopes, signals created during this node's last run).
    pub children: Vec<NodeId>,
    /// The parent/owner of this node. The root node's parent is the null key.
    pub parent: NodeId,
    /// Nodes that read this node during their last run.
    pub dependents: Vec<NodeId>,
    /// Nodes this node read during its last run.
    pub dependencies: Vec<NodeId>,
    /// Cleanup callbacks registered while this node was the active owner. Run in reverse
    /// (LIFO) order before the node's next run and on disposal.
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    /// Context values provided in this node's scope.
    pub context: Vec<Box<dyn Any>>,
    pub state: NodeState,
    /// Scratch mark used by the DFS topological sort during propagation.
    pub mark: Mark,
    #[cfg(debug_assertions)]
    pub created_at: &'static std::panic::Location<'static>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    /// Value (if any) is up to date.
    Clean,
    /// A dependency changed; must be re-derived before it can be read again.
    Dirty,
    /// Currently being (re)computed. Re-entering `get()` on a node in this state is a cycle.
    Computing,
}

/// A mark used for DFS traversal of the reactive graph during propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mark {
    /// Mark set when DFS first reaches this node.
    Temp,
    /// Mark set when DFS is done exploring this node's dependents.
    Permanent,
    /// No mark.
    None,
}

/// A handle to a disposable node (a signal, computed, effect, or scope).
#[derive(Debug, Clone, Copy)]
pub struct NodeHandle(pub(crate) NodeId);

impl NodeHandle {
    /// Disposes this node: runs its cleanups (and those of every descendant, innermost first)
    /// and removes it from the graph. Idempotent.
    pub fn dispose(self) {
        self.0.dispose();
    }
}

impl NodeId {
    pub(crate) fn dispose(self) {
        let root = Root::global();
        if !root.nodes.borrow().contains_key(self) {
            return;
        }
        self.dispose_children();
        root.nodes.borrow_mut().remove(self);
    }

    /// Runs cleanups and disposes every child node, without removing `self`. Used both by
    /// `dispose` and before re-running a node's derivation.
    pub(crate) fn dispose_children(self) {
        let root = Root::global();
        let Some(node) = root.nodes.borrow_mut().get_mut(self) else {
            return;
        };
        let cleanups = std::mem::take(&mut node.cleanups);
        let children = std::mem::take(&mut node.children);
        drop(node);
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        for child in children {
            child.dispose();
        }
    }
}
