//! The host-provided event sources `refetchOnFocus`/`refetchOnReconnect` hook into (§4.5).
//!
//! The reactive core has no notion of a window or a network interface of its own (that belongs to
//! a DOM/host adapter, out of scope per the spec), so those policies are expressed against a
//! trait the host implements once and hands to every query.

/// A subscribable host event, such as "window regained focus" or "network came back online".
pub trait EventSource {
    /// Registers `callback` to run every time the event fires. Returns a disposer that
    /// unsubscribes it.
    fn subscribe(&self, callback: Box<dyn Fn()>) -> Box<dyn FnOnce()>;
}

/// An [`EventSource`] that never fires, used as the default when a host doesn't provide one. Also
/// handy in tests.
pub struct NeverFires;

impl EventSource for NeverFires {
    fn subscribe(&self, _callback: Box<dyn Fn()>) -> Box<dyn FnOnce()> {
        Box::new(|| {})
    }
}
