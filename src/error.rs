use std::io;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::ContentRange;
use axum_extra::TypedHeader;
use thiserror::Error;

/// Failure signals raised while answering a range request.
///
/// Every variant renders to an empty-bodied response. Details travel in
/// headers only.
#[derive(Error, Debug)]
pub enum RangeError {
    /// The `Range` header did not use the `bytes` unit.
    #[error("range unit is not bytes")]
    InvalidUnit,

    /// The range set was malformed, out of bounds, or rejected as abusive.
    #[error("range not satisfiable for resource of {file_size} bytes")]
    NotSatisfiable { file_size: u64 },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("resource not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(#[from] io::Error),
}

impl RangeError {
    pub(crate) fn not_satisfiable(file_size: u64) -> Self {
        RangeError::NotSatisfiable { file_size }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RangeError::InvalidUnit | RangeError::NotSatisfiable { .. } => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            RangeError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RangeError::NotFound => StatusCode::NOT_FOUND,
            RangeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors are expected traffic; internal ones are not.
    pub fn is_internal(&self) -> bool {
        matches!(self, RangeError::Internal(_))
    }
}

impl IntoResponse for RangeError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            RangeError::NotSatisfiable { file_size } => {
                let header = TypedHeader(ContentRange::unsatisfied_bytes(file_size));
                (status, header, ()).into_response()
            }
            RangeError::MethodNotAllowed => {
                let allow = [(header::ALLOW, HeaderValue::from_static("GET,HEAD"))];
                (status, allow, ()).into_response()
            }
            _ => (status, ()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_satisfiable_response() {
        let response = RangeError::not_satisfiable(1000).into_response();
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert_eq!(
            Some(HeaderValue::from_static("bytes */1000")).as_ref(),
            response.headers().get(header::CONTENT_RANGE)
        );
    }

    #[test]
    fn test_invalid_unit_has_no_content_range() {
        let response = RangeError::InvalidUnit.into_response();
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    }

    #[test]
    fn test_method_not_allowed_response() {
        let response = RangeError::MethodNotAllowed.into_response();
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, response.status());
        assert_eq!(
            Some(HeaderValue::from_static("GET,HEAD")).as_ref(),
            response.headers().get(header::ALLOW)
        );
    }

    #[test]
    fn test_internal_status() {
        let err = RangeError::from(io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert!(err.is_internal());
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, err.status());
        assert_eq!(StatusCode::NOT_FOUND, RangeError::NotFound.status());
    }
}
