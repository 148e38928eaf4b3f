//! Scope-bound spawning of `!Send` futures.
//!
//! Grounded on `sycamore_futures::spawn_local_scoped`: a future spawned here is aborted the
//! instant the reactive scope it was spawned from is disposed, via [`pulse_reactive::on_cleanup`].
//! This is what lets `use_query`/`use_mutation`/`use_subscription` fire off async work without
//! ever touching a signal after its owning component has gone away — the version-token discipline
//! (§4.5/§5) handles *stale* completions, and this handles completions whose destination no longer
//! exists at all.

use std::future::Future;
use std::time::Duration;

use futures::future::{abortable, AbortHandle};
use pulse_reactive::on_cleanup;

/// Sleeps for `duration`, using `tokio::time::sleep` natively and `gloo_timers` on `wasm32`.
pub async fn sleep(duration: Duration) {
    #[cfg(not(target_arch = "wasm32"))]
    tokio::time::sleep(duration).await;

    #[cfg(target_arch = "wasm32")]
    gloo_timers::future::sleep(duration).await;
}

/// Spawns a `!Send` future on the current scope. If the scope is disposed before the future
/// completes, it is aborted immediately, so it never touches reactive state past that point.
pub fn spawn_local_scoped(f: impl Future<Output = ()> + 'static) {
    spawn_local_scoped_abortable(f);
}

/// Like [`spawn_local_scoped`], but also returns the [`AbortHandle`] so the caller can cancel the
/// future on its own terms (e.g. a pending retry timer cancelled by an explicit `unsubscribe()`),
/// in addition to the automatic abort-on-scope-disposal behavior both functions share.
pub fn spawn_local_scoped_abortable(f: impl Future<Output = ()> + 'static) -> AbortHandle {
    let (abortable, handle) = abortable(f);
    let cleanup_handle = handle.clone();
    on_cleanup(move || cleanup_handle.abort());

    #[cfg(not(target_arch = "wasm32"))]
    tokio::task::spawn_local(abortable);

    #[cfg(target_arch = "wasm32")]
    wasm_bindgen_futures::spawn_local(async move {
        let _ = abortable.await;
    });

    handle
}

/// Runs `f` inside a `tokio::task::LocalSet` on native targets (required for
/// [`spawn_local_scoped`] to have somewhere to run); a no-op wrapper on `wasm32`, where the browser
/// event loop already plays that role.
///
/// Application code calls this once at the top of its async entry point, exactly as
/// `sycamore_futures::provide_executor_scope` does.
pub async fn provide_executor_scope<T>(f: impl Future<Output = T>) -> T {
    #[cfg(target_arch = "wasm32")]
    {
        f.await
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        let local = tokio::task::LocalSet::new();
        local.run_until(f).await
    }
}
