//! Response encoding: JSON by default, MessagePack on request.
//!
//! Collection endpoints answer `{"key": value}` envelopes in JSON; with
//! `?compress=msgpack` they answer the bare value as MessagePack, which
//! is what the gossip client on the other side expects.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Content type of MessagePack responses.
pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

fn msgpack_response<T: Serialize>(value: &T) -> Response {
    match rmp_serde::to_vec_named(value) {
        Ok(bytes) => {
            let mut response = bytes.into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(MSGPACK_CONTENT_TYPE),
            );
            response
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encoding error: {e}"),
        )
            .into_response(),
    }
}

/// Encodes a keyed collection.
pub fn reply_keyed<T: Serialize>(key: &str, value: &T, compress: Option<&str>) -> Response {
    if compress == Some("msgpack") {
        msgpack_response(value)
    } else {
        axum::Json(serde_json::json!({ key: value })).into_response()
    }
}

/// Encodes a bare record (status, block, account).
pub fn reply_value<T: Serialize>(value: &T, compress: Option<&str>) -> Response {
    if compress == Some("msgpack") {
        msgpack_response(value)
    } else {
        axum::Json(serde_json::json!(value)).into_response()
    }
}

/// 403 with a plain-text reason; the catch-all error shape.
pub fn forbidden(message: impl Into<String>) -> Response {
    (StatusCode::FORBIDDEN, message.into()).into_response()
}

/// 404 for block lookups.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found".to_string()).into_response()
}
