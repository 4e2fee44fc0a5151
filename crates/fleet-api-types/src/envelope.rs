//! The `{type, status, status_code, metadata}` JSON envelope every response
//! on `/1.0` conforms to (spec §6).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::SmartError;

/// The envelope `type` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Sync,
    Async,
    Error,
}

/// The uniform response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub status: String,
    pub status_code: u16,
    pub metadata: T,
}

impl<T: Serialize> Envelope<T> {
    /// Wraps a synchronous success payload.
    pub fn sync(metadata: T) -> Envelope<T> {
        Envelope {
            kind: EnvelopeType::Sync,
            status: "Success".into(),
            status_code: 200,
            metadata,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// An async operation has been created; the location header points callers
/// at `/1.0/operations/<uuid>`.
pub struct AsyncEnvelope {
    pub operation_id: uuid::Uuid,
}

impl IntoResponse for AsyncEnvelope {
    fn into_response(self) -> Response {
        let body = Envelope {
            kind: EnvelopeType::Async,
            status: "Operation created".into(),
            status_code: 202,
            metadata: serde_json::json!({ "id": self.operation_id }),
        };
        let location = format!("/1.0/operations/{}", self.operation_id);
        let mut resp = (StatusCode::ACCEPTED, Json(body)).into_response();
        resp.headers_mut().insert(
            axum::http::header::LOCATION,
            location.parse().expect("uuid renders to a valid header value"),
        );
        resp
    }
}

impl IntoResponse for SmartError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Envelope {
            kind: EnvelopeType::Error,
            status: self.to_string(),
            status_code,
            metadata: serde_json::Value::Null,
        };
        (status, Json(body)).into_response()
    }
}
