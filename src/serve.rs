//! File-backed entry point.

use std::io;
use std::path::Path;

use axum::http::{header, HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use tokio::fs::File;
use tracing::{debug, error};

use crate::config::ServeConfig;
use crate::error::RangeError;
use crate::{KnownSize, Ranged, RangedResponse};

/// Answer a `GET` or `HEAD` for the file at `path`, honoring its `Range` header.
///
/// Every failure is logged and mapped to its status here, once.
pub async fn serve_file(
    method: &Method,
    headers: &HeaderMap,
    path: &Path,
    config: &ServeConfig,
) -> Response {
    match try_serve_file(method, headers, path, config).await {
        Ok(response) => response.into_response(),
        Err(err) => {
            if err.is_internal() {
                error!(path = %path.display(), error = %err, "failed to serve file");
            } else {
                debug!(path = %path.display(), status = %err.status(), "refused request: {err}");
            }
            err.into_response()
        }
    }
}

/// [`serve_file`] without the final mapping to a response.
pub async fn try_serve_file(
    method: &Method,
    headers: &HeaderMap,
    path: &Path,
    config: &ServeConfig,
) -> Result<RangedResponse<KnownSize<File>>, RangeError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(RangeError::MethodNotAllowed);
    }

    let file = File::open(path).await.map_err(open_error)?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(RangeError::NotFound);
    }
    let body = KnownSize::sized(file, metadata.len());

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let range = headers
        .get(header::RANGE)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    let mut ranged = Ranged::new(range, body, Some(mime.to_string()))
        .method(method.clone())
        .accept_ranges(config.supports_ranges(mime.essence_str()))
        .policy(config.policy);
    if let Some(name) = path.file_name() {
        ranged = ranged.filename(name.to_string_lossy());
    }

    let response = ranged.try_respond()?;
    if config.buffer_multipart {
        response.buffer_multipart(config.max_buffered_length).await
    } else {
        Ok(response)
    }
}

fn open_error(err: io::Error) -> RangeError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => RangeError::NotFound,
        _ => RangeError::Internal(err),
    }
}
