//! Computed signals: values lazily derived from other reactive state.

use std::cell::RefCell;

use crate::node::insert_node;
use crate::{create_signal, NodeKind, NodeState, ReadSignal, Root, Signal};

/// A lazily-derived reactive value.
///
/// Unlike a plain derived closure (`|| signal.get() * 2`), a `Computed` caches its result: the
/// derivation only re-runs the first time it is read after one of its dependencies has changed.
/// Unlike an effect, it never runs on its own — nothing is computed until something reads it.
pub type Computed<T> = ReadSignal<T>;

/// Creates a computed signal with a custom equality function.
///
/// Unlike [`create_computed`], this does not mark dependents dirty when the newly derived value
/// compares equal to the previous one under `eq`, cutting off further propagation early the next
/// time each dependent happens to be read.
///
/// To use the type's [`PartialEq`] implementation instead of a custom function, use
/// [`create_selector`].
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_computed_with<T: 'static>(
    mut f: impl FnMut() -> T + 'static,
    mut eq: impl FnMut(&T, &T) -> bool + 'static,
) -> Computed<T> {
    let root = Root::global();
    let id = insert_node(root, NodeKind::Computed, None, None);

    root.nodes.borrow_mut()[id].callback = Some(Box::new(move |value| match value {
        Some(existing) => {
            let existing_mut = existing
                .downcast_mut::<T>()
                .expect("wrong computed signal type");
            let new = f();
            if eq(&new, existing_mut) {
                false
            } else {
                *existing_mut = new;
                true
            }
        }
        None => {
            *value = Some(Box::new(f()));
            true
        }
    }));
    // Starts dirty so the first read runs the derivation.
    root.nodes.borrow_mut()[id].state = NodeState::Dirty;

    ReadSignal::from_node(id)
}

/// Creates a computed value derived from other reactive state.
///
/// The value is re-derived lazily: nothing runs when a dependency changes, only the next time the
/// computed is actually read, and derivation re-tracks dependencies from scratch on every run (so
/// conditionally-read signals are dropped from the dependency set once they stop being read).
///
/// # Example
/// ```
/// # use pulse_reactive::*;
/// # create_root(|| {
/// let state = create_signal(0);
/// let double = create_computed(move || state.get() * 2);
///
/// assert_eq!(double.get(), 0);
/// state.set(1);
/// assert_eq!(double.get(), 2);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_computed<T: 'static>(f: impl FnMut() -> T + 'static) -> Computed<T> {
    create_computed_with(f, |_, _| false)
}

/// Creates a computed value that only notifies dependents when the derived value actually
/// changes, per [`PartialEq`].
///
/// To specify a custom comparison function, use [`create_computed_with`].
///
/// # Example
/// ```
/// # use pulse_reactive::*;
/// # create_root(|| {
/// let state = create_signal(1);
/// let squared = create_selector(move || state.get() * state.get());
/// assert_eq!(squared.get(), 1);
///
/// state.set(-1); // Does not trigger anything downstream: 1 squared is still 1.
/// assert_eq!(squared.get(), 1);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_selector<T: 'static>(f: impl FnMut() -> T + 'static) -> Computed<T>
where
    T: PartialEq,
{
    create_computed_with(f, PartialEq::eq)
}

/// An alternative to [`create_signal`] that derives the next value from a reducer function.
///
/// Returns a [`Signal`] and a dispatch function to send messages to the reducer. Unlike a plain
/// [`Computed`], the reducer result is itself a [`Signal`]: it's the source of truth, not derived
/// from anything else.
///
/// # Example
/// ```
/// # use pulse_reactive::*;
/// enum Msg {
///     Increment,
///     Decrement,
/// }
///
/// # create_root(|| {
/// let (state, dispatch) = create_reducer(0, |&state, msg: Msg| match msg {
///     Msg::Increment => state + 1,
///     Msg::Decrement => state - 1,
/// });
///
/// assert_eq!(state.get(), 0);
/// dispatch(Msg::Increment);
/// assert_eq!(state.get(), 1);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_reducer<T: 'static, Msg>(
    initial: T,
    reduce: impl FnMut(&T, Msg) -> T,
) -> (Computed<T>, impl Fn(Msg)) {
    let reduce = RefCell::new(reduce);
    let signal: Signal<T> = create_signal(initial);
    let dispatch = move |msg| signal.update(|value| *value = reduce.borrow_mut()(value, msg));
    (*signal, dispatch)
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn computed() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let double = create_computed(move || state.get() * 2);

            assert_eq!(double.get(), 0);
            state.set(1);
            assert_eq!(double.get(), 2);
            state.set(2);
            assert_eq!(double.get(), 4);
        });
    }

    /// Make sure the derivation only re-runs when read, not eagerly on write.
    #[test]
    fn computed_is_lazy() {
        let _ = create_root(|| {
            let state = create_signal(0);

            let runs = create_signal(0);
            let double = create_computed(move || {
                runs.set_silent(runs.get_untracked() + 1);
                state.get() * 2
            });

            assert_eq!(runs.get(), 0); // not run yet: nothing has read it.
            assert_eq!(double.get(), 0);
            assert_eq!(runs.get(), 1);

            state.set(2);
            assert_eq!(runs.get(), 1); // still not re-run: write alone doesn't trigger it.
            assert_eq!(double.get(), 4);
            assert_eq!(runs.get(), 2);
            assert_eq!(double.get(), 4);
            assert_eq!(runs.get(), 2); // clean: second read doesn't re-run it.
        });
    }

    #[test]
    fn dependency_on_computed() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let double = create_computed(move || state.get() * 2);
            let quadruple = create_computed(move || double.get() * 2);

            assert_eq!(quadruple.get(), 0);
            state.set(1);
            assert_eq!(quadruple.get(), 4);
        });
    }

    #[test]
    fn untracked_computed() {
        let _ = create_root(|| {
            let state = create_signal(1);
            let double = create_computed(move || state.get_untracked() * 2);

            assert_eq!(double.get(), 2);
            state.set(2);
            assert_eq!(double.get(), 2); // read was untracked, so no dependency was recorded.
        });
    }

    #[test]
    fn computeds_recreate_dependencies_each_run() {
        let _ = create_root(|| {
            let condition = create_signal(true);

            let state1 = create_signal(0);
            let state2 = create_signal(1);

            let runs = create_signal(0);
            let derived = create_computed(move || {
                runs.set_silent(runs.get_untracked() + 1);

                if condition.get() {
                    state1.track();
                } else {
                    state2.track();
                }
            });

            derived.get();
            assert_eq!(runs.get(), 1);

            state1.set(1);
            derived.get();
            assert_eq!(runs.get(), 2);

            state2.set(1);
            derived.get();
            assert_eq!(runs.get(), 2); // not tracked

            condition.set(false);
            derived.get();
            assert_eq!(runs.get(), 3);

            state1.set(2);
            derived.get();
            assert_eq!(runs.get(), 3); // not tracked anymore

            state2.set(2);
            derived.get();
            assert_eq!(runs.get(), 4); // tracked after condition flipped
        });
    }

    #[test]
    fn destroy_computeds_on_scope_dispose() {
        let _ = create_root(|| {
            let counter = create_signal(0);
            let trigger = create_signal(());

            let child_scope = create_child_scope(move || {
                let c = create_computed(move || {
                    trigger.track();
                    counter.set_silent(counter.get_untracked() + 1);
                    counter.get_untracked()
                });
                c.get();
            });

            assert_eq!(counter.get(), 1);

            child_scope.dispose();
            trigger.set(());
            assert_eq!(counter.get(), 1); // computed was destroyed and is no longer reachable.
        });
    }

    #[test]
    fn selector() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let double = create_selector(move || state.get() * 2);

            let counter = create_signal(0);
            create_effect(move || {
                counter.set(counter.get_untracked() + 1);
                double.track();
            });
            assert_eq!(double.get(), 0);
            assert_eq!(counter.get(), 1);

            state.set(0);
            state.set(0);
            state.set(0);
            assert_eq!(double.get(), 0);
            assert_eq!(counter.get(), 1);

            state.set(2);
            assert_eq!(double.get(), 4);
            assert_eq!(counter.get(), 2);
        });
    }

    #[test]
    fn reducer() {
        let _ = create_root(|| {
            enum Msg {
                Increment,
                Decrement,
            }

            let (state, dispatch) = create_reducer(0, |state, msg: Msg| match msg {
                Msg::Increment => *state + 1,
                Msg::Decrement => *state - 1,
            });

            assert_eq!(state.get(), 0);
            dispatch(Msg::Increment);
            assert_eq!(state.get(), 1);
            dispatch(Msg::Decrement);
            assert_eq!(state.get(), 0);
            dispatch(Msg::Increment);
            dispatch(Msg::Increment);
            assert_eq!(state.get(), 2);
        });
    }

    #[test]
    fn computed_reducer() {
        let _ = create_root(|| {
            enum Msg {
                Increment,
                Decrement,
            }

            let (state, dispatch) = create_reducer(0, |state, msg: Msg| match msg {
                Msg::Increment => *state + 1,
                Msg::Decrement => *state - 1,
            });
            let doubled = create_computed(move || state.get() * 2);

            assert_eq!(doubled.get(), 0);
            dispatch(Msg::Increment);
            assert_eq!(doubled.get(), 2);
            dispatch(Msg::Decrement);
            assert_eq!(doubled.get(), 0);
        });
    }
}
