//! Credential extraction (spec §4.3 "Credential extraction"): on connection
//! acceptance, the listener records the socket's `SO_PEERCRED` (`pid, uid,
//! gid`) against the connection's identity, in a process-wide
//! connection-to-credential mapping.
//!
//! This replaces the reflection-based peer extraction the distilled spec's
//! redesign flag calls out: rather than inspecting the accepted stream
//! later (by which point the peer may have exited or been replaced by a
//! reused fd), the credential is captured exactly once, at `accept()` time,
//! and carried alongside the connection for its whole lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};

/// Opaque handle identifying one accepted connection, used as the key into
/// the credential map. Cheap to copy and hand to a request-handling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

/// The peer credential captured at `accept()` time.
#[derive(Debug, Clone, Copy)]
pub struct PeerCredential {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// A Unix listener that captures `SO_PEERCRED` for every accepted
/// connection and tracks it in a process-wide map (spec §5 "Shared-resource
/// policy": "a single mutex; entries are created on connection-new and
/// removed on hijack/close").
pub struct CredentialedListener {
    listener: UnixListener,
    next_id: AtomicU64,
    credentials: Arc<Mutex<std::collections::HashMap<u64, PeerCredential>>>,
}

impl CredentialedListener {
    pub fn bind(path: &std::path::Path) -> anyhow::Result<CredentialedListener> {
        let listener = UnixListener::bind(path)?;
        Ok(CredentialedListener {
            listener,
            next_id: AtomicU64::new(1),
            credentials: Arc::new(Mutex::new(std::collections::HashMap::new())),
        })
    }

    /// Accepts one connection, capturing its peer credential.
    pub async fn accept(&self) -> anyhow::Result<(UnixStream, ConnectionId, PeerCredential)> {
        let (stream, _addr) = self.listener.accept().await?;
        let cred = peer_credential(&stream)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().insert(id, cred);
        Ok((stream, ConnectionId(id), cred))
    }

    /// Looks up a previously captured credential.
    pub fn lookup(&self, id: ConnectionId) -> Option<PeerCredential> {
        self.credentials.lock().get(&id.0).copied()
    }

    /// Removes a connection's credential, called on hijack (the connection
    /// is handed off to a long-lived stream handler) or on close.
    pub fn forget(&self, id: ConnectionId) {
        self.credentials.lock().remove(&id.0);
    }

    pub fn credential_map_handle(&self) -> Arc<Mutex<std::collections::HashMap<u64, PeerCredential>>> {
        self.credentials.clone()
    }
}

fn peer_credential(stream: &UnixStream) -> anyhow::Result<PeerCredential> {
    let creds = getsockopt(stream, PeerCredentials)?;
    Ok(PeerCredential {
        pid: creds.pid(),
        uid: creds.uid(),
        gid: creds.gid(),
    })
}
