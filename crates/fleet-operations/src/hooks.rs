//! The per-class hook set an [`Operation`](crate::Operation) carries (spec
//! §3 "Operation" invariants): a task-class operation runs `on_run` and may
//! declare `on_cancel`; a websocket-class operation must declare
//! `on_connect`; a token-class operation declares neither `on_run` nor
//! `on_cancel` and cancels synchronously.

use std::pin::Pin;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// A duplex byte stream, type-erased so `on_connect` doesn't need to be
/// generic over the concrete transport (an axum-upgraded websocket, a
/// hijacked HTTP connection, or a devlxd Unix socket).
pub trait DuplexTransport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexTransport for T {}

pub type ConnectTransport = Pin<Box<dyn DuplexTransport>>;

/// Runs the body of a task-class operation. Receives a cancellation token
/// that fires when `cancel()` is called without a declared `on_cancel`
/// hook's involvement is not applicable here — this token is wired so the
/// body can observe *context* cancellation (the caller's HTTP connection
/// dropping), per spec §5 "Cancellation".
pub type OnRunHook =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<serde_json::Value, anyhow::Error>> + Send>;

/// Runs when `cancel()` is called on a running task-class operation that
/// declared this hook. Returning `Ok` transitions the operation to
/// `cancelled`; returning `Err` reverts the operation to its prior status
/// (spec §4.1 "cancel()").
pub type OnCancelHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), anyhow::Error>> + Send>;

/// Runs when a websocket-class operation's `connect()` is called. Takes
/// ownership of the transport for the rest of its lifetime.
pub type OnConnectHook = Box<dyn FnOnce(ConnectTransport) -> BoxFuture<'static, ()> + Send>;

/// The hook set attached to an operation at `create()` time.
#[derive(Default)]
pub struct Hooks {
    pub on_run: Option<OnRunHook>,
    pub on_cancel: Option<OnCancelHook>,
    pub on_connect: Option<OnConnectHook>,
}

impl Hooks {
    pub fn task(on_run: OnRunHook) -> Hooks {
        Hooks {
            on_run: Some(on_run),
            on_cancel: None,
            on_connect: None,
        }
    }

    pub fn task_with_cancel(on_run: OnRunHook, on_cancel: OnCancelHook) -> Hooks {
        Hooks {
            on_run: Some(on_run),
            on_cancel: Some(on_cancel),
            on_connect: None,
        }
    }

    pub fn websocket(on_connect: OnConnectHook) -> Hooks {
        Hooks {
            on_run: None,
            on_cancel: None,
            on_connect: Some(on_connect),
        }
    }

    pub fn token() -> Hooks {
        Hooks::default()
    }
}
