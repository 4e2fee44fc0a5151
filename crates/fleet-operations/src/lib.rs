//! The operations framework (spec §4.1): gives every long-running or
//! observable server-side action a uniform identity, lifecycle,
//! cancellation semantics, and cluster-wide visibility.
//!
//! Grounded on the teacher's `mz-coord`/`mz-dataflow-types::client`
//! command-and-completion-channel shape, generalized from "one dataflow
//! command" to "one operation of class task, websocket, or token".

pub mod event_bus;
pub mod hooks;
pub mod operation;
pub mod registry;

pub use event_bus::EventBus;
pub use hooks::{ConnectTransport, Hooks, OnCancelHook, OnConnectHook, OnRunHook};
pub use operation::{Operation, OperationError};
pub use registry::OperationsRegistry;
