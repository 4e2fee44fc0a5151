//! Wire-level shapes for the operations framework (spec §3, §4.1). The
//! actual operation lifecycle lives in `fleet-operations`; this module holds
//! only the types that cross the HTTP boundary, so that crate doesn't need
//! to depend on an HTTP framework.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of operation this is, which determines which hooks are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Task,
    Websocket,
    Token,
}

/// The operation's position in its (monotone) state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Cancelling,
    Success,
    Failure,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Failure | OperationStatus::Cancelled
        )
    }
}

/// The JSON rendering of an `Operation`, as returned by
/// `GET /1.0/operations/<uuid>` and carried in the lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedOperation {
    pub id: Uuid,
    pub class: OperationClass,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resources: BTreeMap<String, Vec<String>>,
    pub metadata: serde_json::Value,
    pub may_cancel: bool,
    pub err: Option<String>,
    pub project: Option<String>,
}
