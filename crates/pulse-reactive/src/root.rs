//! [`Root`]: the thread-local state backing every signal, computed and effect.

use std::cell::{Cell, RefCell};

use slotmap::{Key, SlotMap};
use smallvec::SmallVec;

use crate::*;

/// The struct managing the state of the reactive system. Only one should be created per running
/// app.
///
/// This is intended to be leaked to get a `&'static Root`, which is what lets every signal handle
/// be `Copy` without a lifetime parameter. The `Root` can still be disposed through its
/// [`RootHandle`]; disposing frees every node's resources even though the `Root` allocation itself
/// stays around for the life of the program.
pub(crate) struct Root {
    /// If this is `Some`, that means we are tracking signal accesses.
    pub tracker: RefCell<Option<DependencyTracker>>,
    /// A temporary buffer used in `propagate_updates` to prevent allocating a new Vec every time
    /// it is called.
    pub rev_sorted_buf: RefCell<Vec<NodeId>>,
    /// The current node that owns everything created in its scope.
    /// If we are at the top-level, then this is the "null" key.
    pub current_node: Cell<NodeId>,
    /// The root node of the reactive graph.
    pub root_node: Cell<NodeId>,
    /// All the nodes created in this `Root`.
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    /// Start nodes whose propagation is deferred until the end of the current batch.
    pub node_update_queue: RefCell<Vec<NodeId>>,
    /// Whether we are currently batching signal updates. If this is true, propagation is deferred
    /// until the end of the batch instead of running immediately.
    pub batching: Cell<bool>,
}

thread_local! {
    /// The current reactive root.
    static GLOBAL_ROOT: Cell<Option<&'static Root>> = const { Cell::new(None) };
}

impl Root {
    /// Get the current reactive root. Panics if no root is found.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn global() -> &'static Root {
        GLOBAL_ROOT.with(|root| root.get()).expect(
            "no reactive root found: signals, computeds and effects can only be used inside a \
             closure passed to `create_root`",
        )
    }

    /// Sets the current reactive root. Returns the previous root.
    pub fn set_global(root: Option<&'static Root>) -> Option<&'static Root> {
        GLOBAL_ROOT.with(|r| r.replace(root))
    }

    /// Create a new reactive root. This root is leaked and so lives until the end of the program.
    pub fn new_static() -> &'static Self {
        let this = Self {
            tracker: RefCell::new(None),
            rev_sorted_buf: RefCell::new(Vec::new()),
            current_node: Cell::new(NodeId::null()),
            root_node: Cell::new(NodeId::null()),
            nodes: RefCell::new(SlotMap::default()),
            node_update_queue: RefCell::new(Vec::new()),
            batching: Cell::new(false),
        };
        let _ref = Box::leak(Box::new(this));
        _ref.reinit();
        _ref
    }

    /// Disposes of all the resources held on by this root and resets the state.
    pub fn reinit(&'static self) {
        let prev = Root::set_global(Some(self));
        NodeHandle(self.root_node.get()).dispose();
        Root::set_global(prev);

        let _ = self.tracker.take();
        let _ = self.rev_sorted_buf.take();
        let _ = self.node_update_queue.take();
        let _ = self.current_node.take();
        let _ = self.root_node.take();
        let _ = self.nodes.take();
        self.batching.set(false);

        // Create a new root node.
        Root::set_global(Some(self));
        let root_node = create_child_scope(|| {});
        Root::set_global(None);
        self.root_node.set(root_node.0);
    }

    /// Create a new child scope. Implementation detail for [`create_child_scope`].
    pub fn create_child_scope(&'static self, f: impl FnOnce()) -> NodeHandle {
        let node = create_marker_node(self, NodeKind::Signal);
        let prev = self.current_node.replace(node);
        f();
        self.current_node.set(prev);
        NodeHandle(node)
    }

    /// Run the provided closure in a tracked scope. This will detect all the signals that are
    /// accessed and track them in a dependency list.
    pub fn tracked_scope<T>(&self, f: impl FnOnce() -> T) -> (T, DependencyTracker) {
        let prev = self.tracker.replace(Some(DependencyTracker::default()));
        let ret = f();
        (ret, self.tracker.replace(prev).unwrap())
    }

    /// Re-derives the value of `current` by running its callback, relinking its dependencies and
    /// recursively disposing anything it owned from its previous run.
    ///
    /// Caller is responsible for having set `current`'s state to something other than `Clean`
    /// beforehand. Leaves `current` in the `Clean` state.
    #[cfg_attr(
        all(feature = "trace", not(debug_assertions)),
        tracing::instrument(skip(self))
    )]
    #[cfg_attr(
        all(feature = "trace", debug_assertions),
        tracing::instrument(skip(self), fields(created_at = self.nodes.borrow()[current].created_at.to_string()))
    )]
    fn update_node(&'static self, current: NodeId) -> bool {
        debug_assert_ne!(
            self.nodes.borrow()[current].state,
            NodeState::Clean,
            "should only update when dirty or computing"
        );
        // Remove old dependency links.
        let dependencies = std::mem::take(&mut self.nodes.borrow_mut()[current].dependencies);
        for dependency in dependencies {
            self.nodes.borrow_mut()[dependency]
                .dependents
                .retain(|&id| id != current);
        }
        // We take the callback out because that requires a mut ref and we cannot hold that while
        // running update itself.
        let mut nodes_mut = self.nodes.borrow_mut();
        let mut callback = nodes_mut[current].callback.take().unwrap();
        let mut value = nodes_mut[current].value.take();
        drop(nodes_mut); // End RefMut borrow.

        NodeHandle(current).dispose_children(); // Destroy anything created in a previous run.

        let prev = self.current_node.replace(current);
        let (changed, tracker) = self.tracked_scope(|| callback(&mut value));
        self.current_node.set(prev);

        tracker.create_dependency_link(self, current);

        let mut nodes_mut = self.nodes.borrow_mut();
        nodes_mut[current].callback = Some(callback); // Put the callback back in.
        nodes_mut[current].value = value;
        nodes_mut[current].state = NodeState::Clean;
        drop(nodes_mut);

        changed
    }

    /// Eagerly re-runs an effect node. Always cascades to its dependents afterwards (effects
    /// normally have none, but this keeps the logic uniform).
    pub(crate) fn run_effect(&'static self, current: NodeId) {
        let changed = self.update_node(current);
        if changed {
            self.mark_dependents_dirty(current);
        }
    }

    /// Lazily re-derives a computed node if it is dirty. Called from the computed's getter, never
    /// from propagation.
    ///
    /// # Panics
    /// Panics if `current` is already being computed, i.e. its own derivation reads itself.
    pub(crate) fn recompute_computed_if_needed(&'static self, current: NodeId) {
        let state = self.nodes.borrow()[current].state;
        match state {
            NodeState::Clean => {}
            NodeState::Computing => panic!(
                "reactive cycle detected: a computed signal was read while it was still being \
                 computed"
            ),
            NodeState::Dirty => {
                self.nodes.borrow_mut()[current].state = NodeState::Computing;
                // A computed's own dependents were already conservatively marked dirty while it
                // was dirty, so we don't need to propagate further here: the change (if any) will
                // be picked up the next time each dependent is itself read or flushed.
                self.update_node(current);
            }
        }
    }

    // Mark any dependent node of the current node as dirty.
    fn mark_dependents_dirty(&self, current: NodeId) {
        let mut nodes_mut = self.nodes.borrow_mut();
        let dependents = std::mem::take(&mut nodes_mut[current].dependents);
        for &dependent in &dependents {
            if let Some(dependent) = nodes_mut.get_mut(dependent) {
                if dependent.state == NodeState::Clean {
                    dependent.state = NodeState::Dirty;
                }
            }
        }
        nodes_mut[current].dependents = dependents;
    }

    /// If there are no cyclic dependencies, then the reactive graph is a DAG (Directed Acyclic
    /// Graph). We can therefore use DFS to get a topological sorting of all the reactive nodes
    /// reachable from `start_nodes`.
    ///
    /// We then walk this topological sorting once. Computed nodes are simply marked dirty and left
    /// for their next read to re-derive (they stay lazy); effect nodes are re-run immediately, in
    /// the same order their dependencies appear in the sort, which for a DAG built up left-to-right
    /// is the order they were registered in.
    fn propagate_node_updates(&'static self, start_nodes: &[NodeId]) {
        // Try to reuse the shared buffer if possible.
        let mut rev_sorted = Vec::new();
        let mut rev_sorted_buf = self.rev_sorted_buf.try_borrow_mut();
        let rev_sorted = if let Ok(rev_sorted_buf) = rev_sorted_buf.as_mut() {
            rev_sorted_buf.clear();
            rev_sorted_buf
        } else {
            &mut rev_sorted
        };

        // Traverse reactive graph.
        for &node in start_nodes {
            Self::dfs(node, &mut self.nodes.borrow_mut(), rev_sorted);
            self.mark_dependents_dirty(node);
        }
        #[cfg(feature = "trace")]
        tracing::trace!("update len: {}", rev_sorted.len());

        for &node in rev_sorted.iter().rev() {
            let mut nodes_mut = self.nodes.borrow_mut();
            // Only run if node is still alive.
            let Some(node_mut) = nodes_mut.get_mut(node) else {
                continue;
            };
            node_mut.mark = Mark::None; // Reset value.
            if node_mut.state != NodeState::Dirty {
                continue;
            }
            let kind = node_mut.kind;
            drop(nodes_mut);

            match kind {
                // Effects run now, in topological order. Running one may mark further
                // dependents dirty, which is fine: they are later in `rev_sorted`.
                NodeKind::Effect => self.run_effect(node),
                // Computeds stay dirty; cascade the (conservative) dirty mark onwards so anything
                // downstream knows it might need to recompute too, without running this node.
                NodeKind::Computed => self.mark_dependents_dirty(node),
                NodeKind::Signal => {}
            }
        }
    }

    /// Call this if `start_node` has been updated manually. This will automatically update all
    /// effects and invalidate all computed signals that depend on `start_node`.
    ///
    /// If we are currently batching, defers updating the signal until the end of the batch.
    #[cfg_attr(debug_assertions, track_caller)]
    #[cfg_attr(
        all(feature = "trace", not(debug_assertions)),
        tracing::instrument(skip(self))
    )]
    #[cfg_attr(
        all(feature = "trace", debug_assertions),
        tracing::instrument(skip(self), fields(created_at = self.nodes.borrow()[start_node].created_at.to_string()))
    )]
    pub fn propagate_updates(&'static self, start_node: NodeId) {
        if self.batching.get() {
            self.node_update_queue.borrow_mut().push(start_node);
        } else {
            // Set the global root.
            let prev = Root::set_global(Some(self));
            // Propagate any signal updates.
            self.propagate_node_updates(&[start_node]);
            Root::set_global(prev);
        }
    }

    /// Run depth-first-search on the reactive graph starting at `current`.
    fn dfs(current_id: NodeId, nodes: &mut SlotMap<NodeId, ReactiveNode>, buf: &mut Vec<NodeId>) {
        let Some(current) = nodes.get_mut(current_id) else {
            // If signal is dead, don't even visit it.
            return;
        };

        match current.mark {
            Mark::Temp => panic!("cyclic reactive dependency"),
            Mark::Permanent => return,
            Mark::None => {}
        }
        current.mark = Mark::Temp;

        // Take the `dependents` field out temporarily to avoid borrow checker.
        let children = std::mem::take(&mut current.dependents);
        for child in &children {
            Self::dfs(*child, nodes, buf);
        }
        nodes[current_id].dependents = children;

        nodes[current_id].mark = Mark::Permanent;
        buf.push(current_id);
    }

    /// Sets the batch flag to `true`.
    fn start_batch(&self) {
        self.batching.set(true);
    }

    /// Sets the batch flag to `false` and flushes all the queued updates.
    fn end_batch(&'static self) {
        self.batching.set(false);
        let nodes = self.node_update_queue.take();
        if !nodes.is_empty() {
            self.propagate_node_updates(&nodes);
        }
    }
}

/// A handle to a root. This lets you reinitialize or dispose the root for resource cleanup.
///
/// This is generally obtained from [`create_root`].
#[derive(Clone, Copy)]
pub struct RootHandle {
    _ref: &'static Root,
}

impl RootHandle {
    /// Destroy everything that was created in this scope.
    pub fn dispose(&self) {
        self._ref.reinit();
    }

    /// Runs the closure in the current scope of the root.
    pub fn run_in<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = Root::set_global(Some(self._ref));
        let ret = f();
        Root::set_global(prev);
        ret
    }
}

/// Tracks nodes that are accessed inside a reactive scope.
#[derive(Default)]
pub(crate) struct DependencyTracker {
    /// A list of reactive nodes that were accessed.
    pub dependencies: SmallVec<[NodeId; 1]>,
}

impl DependencyTracker {
    /// Sets the `dependents` field for all the nodes that have been tracked and updates
    /// `dependencies` of the `dependent`.
    pub fn create_dependency_link(self, root: &Root, dependent: NodeId) {
        for node in &self.dependencies {
            root.nodes.borrow_mut()[*node].dependents.push(dependent);
        }
        // Set the signal dependencies so that it is updated automatically.
        root.nodes.borrow_mut()[dependent].dependencies = self.dependencies;
    }
}

/// Creates a new reactive root with a top-level reactive node. The returned [`RootHandle`] can be
/// used to [`dispose`](RootHandle::dispose) the root.
///
/// # Example
/// ```rust
/// # use pulse_reactive::*;
///
/// create_root(|| {
///     let signal = create_signal(123);
///
///     let child_scope = create_child_scope(move || {
///         // ...
///     });
/// });
/// ```
#[must_use = "root should be disposed"]
pub fn create_root(f: impl FnOnce()) -> RootHandle {
    let _ref = Root::new_static();
    #[cfg(not(target_arch = "wasm32"))]
    {
        /// An unsafe wrapper around a raw pointer which we promise to never touch, effectively
        /// making it thread-safe.
        #[allow(dead_code)]
        struct UnsafeSendPtr<T>(*const T);
        /// We never ever touch the pointer inside so surely this is safe!
        unsafe impl<T> Send for UnsafeSendPtr<T> {}

        /// A static variable to keep on holding to the allocated `Root`s to prevent Miri and
        /// Valgrind from complaining.
        static KEEP_ALIVE: std::sync::Mutex<Vec<UnsafeSendPtr<Root>>> =
            std::sync::Mutex::new(Vec::new());
        KEEP_ALIVE
            .lock()
            .unwrap()
            .push(UnsafeSendPtr(_ref as *const Root));
    }

    Root::set_global(Some(_ref));
    f();
    Root::set_global(None);
    RootHandle { _ref }
}

/// Create a child scope.
///
/// Returns the created [`NodeHandle`] which can be used to dispose it.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_child_scope(f: impl FnOnce()) -> NodeHandle {
    Root::global().create_child_scope(f)
}

/// Adds a callback that is called when the scope is destroyed.
///
/// # Example
/// ```rust
/// # use pulse_reactive::*;
/// # create_root(|| {
/// let child_scope = create_child_scope(|| {
///     on_cleanup(|| {
///         println!("Child scope is being dropped");
///     });
/// });
/// child_scope.dispose(); // Executes the on_cleanup callback.
/// # });
/// ```
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let root = Root::global();
    if !root.current_node.get().is_null() {
        root.nodes.borrow_mut()[root.current_node.get()]
            .cleanups
            .push(Box::new(f));
    }
}

/// Batch updates from related signals together and only run effects once, at the end of the
/// closure. Reading a computed signal inside the batch still observes up-to-date values: computed
/// signals are lazy and always recompute from scratch on the first read after a dependency change,
/// batched or not.
///
/// # Example
///
/// ```
/// # use pulse_reactive::*;
/// # let _ = create_root(|| {
/// let state = create_signal(1);
/// let runs = create_signal(0);
/// create_effect(move || {
///     state.track();
///     runs.set(runs.get_untracked() + 1);
/// });
/// batch(move || {
///     state.set(2);
///     state.set(3);
/// });
/// assert_eq!(runs.get(), 2); // once for the initial run, once for the whole batch.
/// # });
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let root = Root::global();
    root.start_batch();
    let ret = f();
    root.end_batch();
    ret
}

/// Run the passed closure inside an untracked dependency scope.
///
/// See also [`ReadSignal::get_untracked`].
///
/// # Example
///
/// ```
/// # use pulse_reactive::*;
/// # create_root(|| {
/// let state = create_signal(1);
/// let double = create_computed(move || untrack(|| state.get() * 2));
/// assert_eq!(double.get(), 2);
///
/// state.set(2);
/// // double value should still be old value because state was untracked
/// assert_eq!(double.get(), 2);
/// # });
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    untrack_in_scope(f, Root::global())
}

/// Same as [`untrack`] but for a specific [`Root`].
pub(crate) fn untrack_in_scope<T>(f: impl FnOnce() -> T, root: &'static Root) -> T {
    let prev = root.tracker.replace(None);
    let ret = f();
    root.tracker.replace(prev);
    ret
}

/// Get a handle to the current reactive scope.
pub fn use_current_scope() -> NodeHandle {
    let root = Root::global();
    NodeHandle(root.current_node.get())
}

/// Get a handle to the root reactive scope.
pub fn use_global_scope() -> NodeHandle {
    let root = Root::global();
    NodeHandle(root.root_node.get())
}
