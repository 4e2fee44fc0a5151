//! Named, tracked task spawning.
//!
//! Spawning through this module rather than `tokio::spawn` directly gives
//! every background task a name that shows up in panics and in
//! `tokio-console`, mirroring `mz_ore::task`.

use std::future::Future;

use tracing::Instrument;

/// Spawns a new named asynchronous task.
///
/// `name` is called lazily so that callers can build a name from values that
/// are only available at the call site without paying for it when tracing is
/// disabled.
pub fn spawn<Name, Fut>(name: impl FnOnce() -> Name, future: Fut) -> tokio::task::JoinHandle<Fut::Output>
where
    Name: AsRef<str>,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let name = name().as_ref().to_string();
    let span = tracing::info_span!("task", name = %name);
    tokio::spawn(future.instrument(span))
}
