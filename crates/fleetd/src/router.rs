//! HTTP routing (spec §4.2 "Target-member forwarding", §4.5, §6): wires
//! [`crate::handlers`] onto the `/1.0` surface, layering cluster
//! forwarding/replication and session auth the way the teacher layers
//! `tower_http`/`tower` middleware onto `mz-environmentd`'s router rather
//! than hand-rolling dispatch.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response};
use axum::middleware::{self, Next};
use axum::routing::{get, post};
use axum::Router;
use fleet_api_types::error::SmartError;
use fleet_cluster::forward::ForwardedRequest;
use fleet_cluster::notifier::is_notification;

use crate::auth;
use crate::handlers;
use crate::state::Daemon;

/// Builds the control-plane router, bound on `config.https_listen_addr`.
pub fn build(daemon: Daemon) -> Router {
    let instances = Router::new()
        .route(
            "/1.0/instances/:project/:name",
            get(handlers::get_instance)
                .put(handlers::create_instance)
                .patch(handlers::patch_instance),
        )
        .route_layer(middleware::from_fn_with_state(daemon.clone(), cluster_forward_and_notify));

    let recovery = Router::new()
        .route("/1.0/storage-pools/recover", post(handlers::recover_storage_pool));

    let operations = Router::new()
        .route("/1.0/operations", get(handlers::list_operations))
        .route(
            "/1.0/operations/:id",
            get(handlers::get_operation).delete(handlers::cancel_operation),
        )
        .route("/1.0/operations/:id/wait", get(handlers::wait_operation));

    let authenticated = instances
        .merge(recovery)
        .merge(operations)
        .route_layer(middleware::from_fn_with_state(daemon.clone(), auth::require_session));

    let public = Router::new()
        .route("/1.0", get(handlers::root_info))
        .route("/1.0/auth/login", post(auth::login));

    public.merge(authenticated).with_state(daemon)
}

/// Bound on `config.metrics_listen_addr` (spec §6: metrics bind
/// separately so it can carry weaker network restrictions than the
/// control plane).
pub fn build_metrics() -> Router {
    Router::new().route("/metrics", get(handlers::metrics))
}

/// Forwards non-leader writes to the leader and replicates leader-committed
/// writes to every peer (spec §4.2 "Leader resolution", "Target-member
/// forwarding", "Notifier"). A request already carrying
/// [`fleet_cluster::notifier::CLUSTER_NOTIFICATION_HEADER`] is itself a
/// replicated write and is applied locally without forwarding or
/// re-notifying, or every member would forward to every other member
/// forever.
async fn cluster_forward_and_notify(
    State(daemon): State<Daemon>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<axum::response::Response, SmartError> {
    let notification = is_notification(request.headers());

    if !notification {
        let leader_info = daemon.leader.leader_info().await;
        if !leader_info.leader {
            return forward_to_leader(&daemon, &leader_info.address, request).await;
        }
    }

    let method = request.method().clone();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|p| p.to_string())
        .unwrap_or_default();
    let (parts, body) = request.into_parts();
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|err| SmartError::Internal(err.into()))?;
    let rebuilt = Request::from_parts(parts, Body::from(bytes.clone()));

    let response = next.run(rebuilt).await;
    if !notification && is_mutating(&method) && response.status().is_success() {
        daemon.notifier.notify_all(method, &path_and_query, bytes).await;
    }
    Ok(response)
}

/// Only writes are replicated (spec §4.2 "Notifier"); a `GET`/`HEAD`
/// handled locally on the leader has nothing to fan out.
fn is_mutating(method: &axum::http::Method) -> bool {
    !matches!(*method, axum::http::Method::GET | axum::http::Method::HEAD | axum::http::Method::OPTIONS)
}

async fn forward_to_leader(
    daemon: &Daemon,
    leader_address: &str,
    request: Request<Body>,
) -> Result<axum::response::Response, SmartError> {
    let (parts, body) = request.into_parts();
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|err| SmartError::Internal(err.into()))?;
    let forwarded_request = ForwardedRequest {
        method: parts.method,
        path_and_query: parts.uri.path_and_query().map(|p| p.to_string()).unwrap_or_default(),
        headers: parts.headers,
        body: bytes,
    };
    let forwarded = daemon
        .forwarder
        .forward(leader_address, forwarded_request)
        .await
        .map_err(SmartError::Internal)?;

    let mut builder = Response::builder().status(forwarded.status);
    for (name, value) in forwarded.headers.iter() {
        builder = builder.header(name, value);
    }
    let body = axum::body::boxed(Body::wrap_stream(forwarded.body));
    builder
        .body(body)
        .map_err(|err| SmartError::Internal(err.into()))
}
