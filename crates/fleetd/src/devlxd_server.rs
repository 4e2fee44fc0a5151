//! The devlxd guest-facing Unix socket (spec §4.3, §6 "devlxd surface").
//!
//! One socket is bind-mounted into every running container; the caller is
//! identified per-connection by [`CredentialedListener`]/`find_container_for_pid`,
//! not by which socket it dialed. Grounded on the teacher's
//! `materialized::http::handle_connection`: a `hyper::service::service_fn`
//! matching on `(method, path)`, built fresh per accepted connection.

use std::convert::Infallible;
use std::sync::Arc;

use fleet_devlxd::{
    authorize_caller, check_features, CredentialedListener, DevlxdHandlers, RealProcReader,
};
use futures::StreamExt;
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::devlxd_directory::CachedInstanceDirectory;
use crate::instance_store::InstanceStore;
use crate::state::Daemon;

/// Runs the devlxd accept loop until `cancel` fires.
pub async fn serve(
    daemon: Daemon,
    directory: Arc<CachedInstanceDirectory>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    daemon.dirs.ensure_exists()?;
    let socket_path = daemon.devlxd_listener_root.join("sock");
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = Arc::new(CredentialedListener::bind(&socket_path)?);
    let proc_reader = Arc::new(RealProcReader);
    let handlers = Arc::new(DevlxdHandlers::new(daemon.event_bus.clone()));
    let store = Arc::new(InstanceStore::new(daemon.stash.clone()));

    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };
        let (stream, conn_id, cred) = match accepted {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "devlxd accept failed");
                continue;
            }
        };
        let listener = listener.clone();
        let proc_reader = proc_reader.clone();
        let directory = directory.clone();
        let handlers = handlers.clone();
        let store = store.clone();
        fleet_ore::task::spawn(
            move || format!("devlxd-connection-{}", cred.pid),
            async move {
                let result = handle_connection(stream, cred, &proc_reader, &directory, &handlers, &store).await;
                listener.forget(conn_id);
                if let Err(err) = result {
                    tracing::debug!(error = %err, "devlxd connection ended with error");
                }
            },
        );
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    cred: fleet_devlxd::PeerCredential,
    proc_reader: &RealProcReader,
    directory: &CachedInstanceDirectory,
    handlers: &Arc<DevlxdHandlers>,
    store: &Arc<InstanceStore>,
) -> anyhow::Result<()> {
    let handlers = handlers.clone();
    let store = store.clone();
    let (project, name) = match fleet_devlxd::find_container_for_pid(proc_reader, directory, cred.pid) {
        Ok(found) => found,
        Err(_) => {
            let svc = hyper::service::service_fn(move |_req: Request<Body>| {
                let response = not_in_container();
                async move { Ok::<_, Infallible>(response) }
            });
            return hyper::server::conn::Http::new().serve_connection(stream, svc).await.map_err(Into::into);
        }
    };
    let caller_uid = cred.uid;

    let svc = hyper::service::service_fn(move |req: Request<Body>| {
        let handlers = handlers.clone();
        let store = store.clone();
        let project = project.clone();
        let name = name.clone();
        async move { Ok::<_, Infallible>(dispatch(req, caller_uid, project, name, handlers, store).await) }
    });
    hyper::server::conn::Http::new().serve_connection(stream, svc).await.map_err(Into::into)
}

async fn dispatch(
    req: Request<Body>,
    caller_uid: u32,
    project: String,
    name: String,
    handlers: Arc<DevlxdHandlers>,
    store: Arc<InstanceStore>,
) -> Response<Body> {
    let instance = match store.load_instance(&project, &name).await {
        Ok(Some(instance)) => instance,
        Ok(None) => return not_in_container(),
        Err(err) => return internal_error(&err),
    };
    if let Err(err) = authorize_caller(&instance, caller_uid) {
        return json_response(StatusCode::FORBIDDEN, &serde_json::json!({ "error": err.to_string() }));
    }
    let (expanded, devices) = match store.expand(&instance, &project).await {
        Ok(v) => v,
        Err(err) => return internal_error(&err),
    };
    if let Err(err) = check_features(&instance, &expanded, &["security.devlxd"]) {
        return json_response(StatusCode::FORBIDDEN, &serde_json::json!({ "error": err.to_string() }));
    }

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/1.0") => {
            let ready = expanded.get("volatile.last_state.ready").map(String::as_str) == Some("true");
            json_response(StatusCode::OK, &handlers.root(&instance, "none", ready))
        }
        (&Method::PATCH, "/1.0") => match hyper::body::to_bytes(req.into_body()).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(change) => {
                    let _transition = handlers.patch_root(&instance, change);
                    if let Err(err) = store.put_instance(instance).await {
                        return internal_error(&err);
                    }
                    json_response(StatusCode::OK, &serde_json::json!({}))
                }
                Err(err) => json_response(StatusCode::BAD_REQUEST, &serde_json::json!({ "error": err.to_string() })),
            },
            Err(err) => internal_error(&err.into()),
        },
        (&Method::GET, "/1.0/config") => {
            json_response(StatusCode::OK, &handlers.config_keys(&expanded))
        }
        (&Method::GET, path) if path.starts_with("/1.0/config/") => {
            let key = &path["/1.0/config/".len()..];
            match handlers.config_value(&expanded, key) {
                Some(value) => Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, "text/plain")
                    .body(Body::from(value))
                    .expect("valid response"),
                None => not_found(),
            }
        }
        (&Method::GET, "/1.0/meta-data") => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "text/plain")
            .body(Body::from(handlers.meta_data(&instance)))
            .expect("valid response"),
        (&Method::GET, "/1.0/devices") => {
            json_response(StatusCode::OK, &handlers.devices(&devices, &expanded))
        }
        (&Method::GET, "/1.0/events") => stream_events(&project, &handlers),
        (&Method::GET, "/1.0/images/export") => match handlers.check_image_export_enabled(&instance, &expanded) {
            Ok(()) => json_response(StatusCode::NOT_IMPLEMENTED, &serde_json::json!({ "error": "image export not implemented" })),
            Err(err) => json_response(StatusCode::FORBIDDEN, &serde_json::json!({ "error": err.to_string() })),
        },
        _ => not_found(),
    }
}

/// Hijacks into a chunked, newline-delimited-JSON stream of this instance's
/// lifecycle events (spec §4.3: "hijacks into a chunked HTTP stream").
fn stream_events(project: &str, handlers: &Arc<DevlxdHandlers>) -> Response<Body> {
    let mut subscriber = handlers.subscribe_events(project);
    let body_stream = futures::stream::poll_fn(move |cx| subscriber.rx.poll_recv(cx)).map(|event| {
        let mut line = serde_json::to_vec(&event.payload).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, std::io::Error>(line)
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header(hyper::header::TRANSFER_ENCODING, "chunked")
        .body(Body::wrap_stream(body_stream))
        .expect("valid response")
}

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap_or_default()))
        .expect("valid response")
}

fn not_found() -> Response<Body> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": "not found" }))
}

/// Every resolution/lookup failure collapses to this single response: the
/// guest never learns whether it dialed the wrong PID namespace or the
/// instance row is simply missing (spec §4.3).
fn not_in_container() -> Response<Body> {
    json_response(StatusCode::FORBIDDEN, &serde_json::json!({ "error": "not in container" }))
}

fn internal_error(err: &anyhow::Error) -> Response<Body> {
    tracing::warn!(error = %err, "devlxd handler failed");
    json_response(StatusCode::INTERNAL_SERVER_ERROR, &serde_json::json!({ "error": "internal error" }))
}
