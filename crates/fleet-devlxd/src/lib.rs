//! The `devlxd` guest-to-host trust channel (spec §4.3): a per-container
//! Unix socket that authenticates its caller by kernel-captured
//! credentials, resolves which container instance that caller belongs to,
//! and exposes a narrow read/write surface gated by `security.devlxd*`
//! config flags.
//!
//! Grounded on the teacher's `mz-orchestrator-process` (the one backend
//! that, like devlxd, talks to local processes via the filesystem rather
//! than a remote control plane) for the credentialed-listener shape, and
//! on the redesign flag in this spec away from reflection-based peer
//! extraction and towards `SO_PEERCRED` captured at `accept()`.

pub mod authz;
pub mod credential;
pub mod endpoints;
pub mod procfs;
pub mod resolve;

pub use authz::{authorize_caller, check_features, AuthzError};
pub use credential::{CredentialedListener, PeerCredential};
pub use endpoints::{DevlxdHandlers, GuestState, RootResponse, StateChange};
pub use procfs::RealProcReader;
pub use resolve::{find_container_for_pid, InstanceDirectory, NotInContainer, ProcReader, RunningInstance};
