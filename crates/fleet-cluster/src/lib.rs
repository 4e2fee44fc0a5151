//! The cluster consistency layer (spec §4.2): preserves the illusion of a
//! single API across members while keeping authoritative writes on one
//! member per resource.
//!
//! Grounded on the teacher's `mz-orchestrator`/`mz-orchestrator-kubernetes`
//! split between "what the orchestrator exposes" and "how a concrete
//! backend does it", and on `mz-service::grpc`'s client-connection pattern
//! for the outbound forwarding client.

pub mod cert_rotation;
pub mod forward;
pub mod leader;
pub mod members;
pub mod notifier;

pub use cert_rotation::{CertRotationTask, ClusterCertificate};
pub use forward::{ForwardedRequest, ForwardedResponse, Forwarder};
pub use leader::{LeaderInfo, LeaderResolver};
pub use members::{ClusterMember, MemberTable};
pub use notifier::{Notifier, CLUSTER_NOTIFICATION_HEADER};
