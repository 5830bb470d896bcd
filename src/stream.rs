//! Resolves an SID to actual bytes. Spec §4.F.
//!
//! If the `Ri`'s source names a resolver running on this node, we ask that
//! resolver to open the bytes directly (`Resolver::open_bytes`). Otherwise
//! the `Ri` is remote: its `url` (the LAN resolver rewrites incoming ones to
//! point at the originating peer's own HTTP API, see `lan::mod`) is proxied,
//! streaming, never buffered fully in memory.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::model::Sid;
use crate::platform::Platform;

pub enum StreamError {
    UnknownSid,
    UpstreamError(reqwest::Error),
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        match self {
            StreamError::UnknownSid => {
                (StatusCode::NOT_FOUND, "unknown sid").into_response()
            }
            StreamError::UpstreamError(err) => {
                (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
            }
        }
    }
}

/// Streams the bytes for `sid`: a local resolver is asked first, and only
/// if none claims it do we fall back to proxying the `Ri`'s URL.
pub async fn stream(platform: &Platform, sid: &Sid) -> Result<Response, StreamError> {
    let ri = platform
        .registry()
        .locate_sid(sid.clone())
        .await
        .ok_or(StreamError::UnknownSid)?;

    if let Some(resolver) = platform
        .resolvers()
        .iter()
        .find(|r| r.name() == ri.source)
    {
        if let Some(source) = resolver.open_bytes(sid).await {
            let body = Body::from_stream(source.stream);
            let mut response = Response::new(body);
            *response.status_mut() = StatusCode::OK;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_str(&source.mimetype)
                    .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream")),
            );
            if let Some(len) = source.size_bytes {
                if let Ok(value) = header::HeaderValue::from_str(&len.to_string()) {
                    response.headers_mut().insert(header::CONTENT_LENGTH, value);
                }
            }
            return Ok(response);
        }
    }

    let Some(url) = ri.url else {
        return Err(StreamError::UnknownSid);
    };

    let upstream = platform
        .http_client()
        .get(&url)
        .send()
        .await
        .map_err(StreamError::UpstreamError)?;

    let status = upstream.status();
    if !status.is_success() {
        return Ok((StatusCode::BAD_GATEWAY, format!("upstream returned {status}"))
            .into_response());
    }
    let content_length = upstream.content_length();

    let body = Body::from_stream(upstream.bytes_stream());
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_str(&ri.mimetype)
            .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(len) = content_length {
        if let Ok(value) = header::HeaderValue::from_str(&len.to_string()) {
            response.headers_mut().insert(header::CONTENT_LENGTH, value);
        }
    }
    Ok(response)
}
