//! Version tokens: the discipline that lets async work outlive its relevance without corrupting
//! reactive state.
//!
//! A promise/future is typically not cancellable in a way that stops its side effects, so instead
//! of trying to kill stale work outright, every async hook hands out a [`VersionToken`] when it
//! begins an operation and only ever publishes through [`VersionController::if_current`]. A
//! response that arrives after a newer operation has already started is silently dropped.

use std::cell::Cell;
use std::rc::Rc;

/// A generation counter shared between a hook and the tokens it hands out.
#[derive(Clone)]
pub struct VersionController {
    generation: Rc<Cell<u64>>,
}

impl Default for VersionController {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionController {
    /// Creates a new controller starting at generation 0.
    pub fn new() -> Self {
        VersionController {
            generation: Rc::new(Cell::new(0)),
        }
    }

    /// Begins a new operation: bumps the live generation and returns a token for it. Any token
    /// from a previous `begin()` call immediately stops being current.
    pub fn begin(&self) -> VersionToken {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        VersionToken {
            generation: next,
            controller: self.generation.clone(),
        }
    }

    /// The live generation, i.e. the generation of the most recently begun operation.
    pub fn current_generation(&self) -> u64 {
        self.generation.get()
    }
}

/// A handle to one specific async operation's generation.
///
/// Cloning a token does not mint a new generation; it's the same operation viewed from more than
/// one place (e.g. a success and an error continuation of the same future).
#[derive(Clone)]
pub struct VersionToken {
    generation: u64,
    controller: Rc<Cell<u64>>,
}

impl VersionToken {
    /// Whether this token's generation is still the live one, i.e. no newer operation has begun
    /// since this token was handed out.
    pub fn is_current(&self) -> bool {
        self.controller.get() == self.generation
    }

    /// Runs `f` only if this token is still current, returning `Some(f())`'s result, or `None` if
    /// a newer operation has since superseded this one. This is the single gate every hook uses
    /// before writing a completed async result into a reactive signal.
    pub fn if_current<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        self.is_current().then(f)
    }

    /// The raw generation number, exposed for diagnostics/logging.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_is_current_until_superseded() {
        let ctrl = VersionController::new();
        let a = ctrl.begin();
        assert!(a.is_current());

        let b = ctrl.begin();
        assert!(!a.is_current());
        assert!(b.is_current());
    }

    #[test]
    fn if_current_gates_execution() {
        let ctrl = VersionController::new();
        let a = ctrl.begin();
        let _b = ctrl.begin();

        let ran = a.if_current(|| 42);
        assert_eq!(ran, None);
    }

    #[test]
    fn clone_shares_the_same_generation() {
        let ctrl = VersionController::new();
        let a = ctrl.begin();
        let a2 = a.clone();
        assert_eq!(a.generation(), a2.generation());
        let _b = ctrl.begin();
        assert!(!a.is_current());
        assert!(!a2.is_current());
    }
}
