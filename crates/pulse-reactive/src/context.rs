//! Context state management: passing values down the scope tree without threading them through
//! every constructor.

use crate::{NodeId, Root};

/// Provides a context value in the current scope. The value can later be retrieved with
/// [`use_context`] (or [`try_use_context`]) from this scope or any of its descendants.
///
/// # Panics
/// Panics if a context of the same type has already been provided in this exact scope. Providing
/// the same type again in a *child* scope is fine and shadows the outer value for that subtree.
///
/// # Example
/// ```
/// # use pulse_reactive::*;
/// # create_root(|| {
/// provide_context(42i32);
/// let child = create_child_scope(|| {
///     assert_eq!(use_context::<i32>(), 42);
/// });
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn provide_context<T: Clone + 'static>(value: T) {
    let root = Root::global();
    let current = root.current_node.get();
    let mut nodes = root.nodes.borrow_mut();
    let node = nodes
        .get_mut(current)
        .expect("context can only be provided inside a reactive scope");
    if node.context.iter().any(|v| v.is::<T>()) {
        panic!("existing context with type exists already");
    }
    node.context.push(Box::new(value));
}

/// Tries to get a context value of the given type, searching the current scope and then walking
/// up through its ancestors. Returns `None` if no context of that type was ever provided. For a
/// panicking version, see [`use_context`].
pub fn try_use_context<T: Clone + 'static>() -> Option<T> {
    let root = Root::global();
    let mut current = root.current_node.get();
    loop {
        if current.is_null() {
            return None;
        }
        let found = {
            let nodes = root.nodes.borrow();
            let node = nodes.get(current)?;
            node.context
                .iter()
                .find_map(|v| v.downcast_ref::<T>().cloned())
        };
        if found.is_some() {
            return found;
        }
        current = parent_of(root, current)?;
    }
}

fn parent_of(root: &'static Root, node: NodeId) -> Option<NodeId> {
    root.nodes.borrow().get(node).map(|n| n.parent)
}

/// Gets a context value of the given type.
///
/// # Panics
/// Panics if the context cannot be found anywhere in the current scope hierarchy. For a
/// non-panicking version, see [`try_use_context`].
#[cfg_attr(debug_assertions, track_caller)]
pub fn use_context<T: Clone + 'static>() -> T {
    try_use_context().expect("context not found for type")
}

/// Gets a context value of the given type, or computes and provides it (in the current scope) if
/// it doesn't exist yet.
pub fn use_context_or_else<T, F>(f: F) -> T
where
    T: Clone + 'static,
    F: FnOnce() -> T,
{
    try_use_context().unwrap_or_else(|| {
        let value = f();
        provide_context(value.clone());
        value
    })
}

/// Returns the depth of the current scope. The root scope has depth `0`.
pub fn scope_depth() -> u32 {
    let root = Root::global();
    let mut depth = 0;
    let mut current = root.current_node.get();
    while let Some(parent) = parent_of(root, current).filter(|p| !p.is_null()) {
        current = parent;
        depth += 1;
    }
    depth
}
