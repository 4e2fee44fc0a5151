//! Wire types and error taxonomy shared by the fleetd control plane, the
//! devlxd transport, and the cluster gateway.
//!
//! Nothing in this crate talks to the network or the KV store; it exists so
//! that `fleet-operations`, `fleet-cluster`, `fleet-devlxd`,
//! `fleet-recovery`, and `fleetd` agree on one definition of each resource
//! without depending on each other.

pub mod envelope;
pub mod error;
pub mod etag;
pub mod instance;
pub mod network;
pub mod operation;
pub mod profile;
pub mod project;
pub mod storage;

pub use envelope::Envelope;
pub use error::SmartError;
