//! The storage-recovery engine (spec §4.4): after a catastrophic loss of
//! the KV store, reconstructs the database from the still-intact on-disk
//! storage pools. Two-pass (scan, then validate-or-import) and re-entrant.
//!
//! Grounded on the teacher's orchestrator trait split (`StorageDriver`
//! mirrors `mz-orchestrator`'s `NamespacedOrchestrator` — one vtable, many
//! backends) and on `mz-stash`'s transactional-commit discipline for the
//! reverter stack's all-or-nothing guarantee.

pub mod dependency;
pub mod driver;
pub mod import;
pub mod registry;
pub mod reverter;
pub mod scan;

pub use dependency::{validate_instance, validate_instance_dependencies, DependencyChecker, DependencyError};
pub use driver::{DirDriver, DriverUnknownVolume, NotSupported, StorageDriver};
pub use import::{run as run_recovery, RecoveryMode, RecoveryRequest, ValidationReport};
pub use registry::UnknownVolumeRegistry;
pub use reverter::Reverter;
pub use scan::{mount_all, resolve_pool_handle, scan_unknown_volumes, PoolHandle, ScanError};
