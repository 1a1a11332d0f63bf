//! # axum-byteranges
//!
//! HTTP range responses for [`axum`][1], single and `multipart/byteranges`.
//!
//! Fully generic, supports any body implementing the [`RangeBody`] trait.
//!
//! Any type implementing both [`AsyncRead`] and [`AsyncSeekStart`] can be
//! used through the [`KnownSize`] adapter struct. There is also special cased
//! support for [`tokio::fs::File`], see the [`KnownSize::file`] method, and a
//! ready-made file handler in [`serve_file`].
//!
//! A `Range` header goes through three stages before any byte is read:
//! [`parse`] normalizes it into a byte-range-set in client order, [`policy`]
//! checks bounds and scores the set for abusive shapes, and [`multipart`]
//! frames sets of more than one part. [`MultipartStream`] then reads the parts
//! strictly one after another from the single underlying body.
//!
//! ```
//! use axum::Router;
//! use axum::http::{HeaderMap, Method, header};
//! use axum::routing::any;
//!
//! use axum_byteranges::{Ranged, KnownSize, RangeError, RangedResponse};
//!
//! async fn file(method: Method, headers: HeaderMap)
//!     -> Result<RangedResponse<KnownSize<tokio::fs::File>>, RangeError>
//! {
//!     let body = KnownSize::open("document.txt").await.map_err(|_| RangeError::NotFound)?;
//!     let range = headers.get(header::RANGE)
//!         .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
//!     Ranged::new(range, body, Some("text/plain".to_string()))
//!         .method(method)
//!         .try_respond()
//! }
//!
//! let _app = Router::<()>::new().route("/", any(file));
//! ```
//!
//! [1]: https://docs.rs/axum

mod file;
mod stream;

pub mod config;
pub mod error;
pub mod multipart;
pub mod parse;
pub mod policy;
pub mod serve;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{AcceptRanges, CacheControl, ContentLength, ContentRange, HeaderMapExt};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek};
use tracing::debug;

pub use config::{ConfigError, PolicyConfig, ScoreWeights, ServeConfig};
pub use error::RangeError;
pub use file::KnownSize;
pub use multipart::extract_boundary;
pub use parse::RangeParseResult;
pub use serve::serve_file;
pub use stream::{RangedStream, MultipartStream};

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
///
/// Byte spans are read by seeking to their start and reading their width.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the underlying file.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// A body that turns out shorter than this fails the response with
    /// [`io::ErrorKind::UnexpectedEof`].
    fn byte_size(&self) -> u64;
}

/// A single byte range, both ends inclusive.
///
/// Ranges straight out of [`parse`] may be inverted (`start > end`) or reach
/// past the resource; [`policy::check`] rejects those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    /// Width in bytes, zero for an inverted range.
    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start).saturating_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
/// The request dispatcher. Implements [`IntoResponse`].
///
/// Decides between whole-body delivery, a single `206` span and a
/// `multipart/byteranges` `206`, or fails with a [`RangeError`].
pub struct Ranged<B: RangeBody + Send + 'static> {
    method: Method,
    range: Option<String>,
    body: B,
    content_type: Option<String>,
    filename: Option<String>,
    accept_ranges: bool,
    policy: PolicyConfig,
}

impl<B: RangeBody + Send + 'static> Ranged<B> {
    /// Construct a ranged `GET` response over any type implementing
    /// [`RangeBody`] and the raw value of an optional `Range` header.
    pub fn new(range: Option<String>, body: B, content_type: Option<String>) -> Self {
        Ranged {
            method: Method::GET,
            range,
            body,
            content_type,
            filename: None,
            accept_ranges: true,
            policy: PolicyConfig::default(),
        }
    }

    /// Request method. Anything but `GET` and `HEAD` is refused.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Name offered in `Content-Disposition: attachment`.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Whether this representation honors `Range` at all. When `false`
    /// the header is ignored and the whole body is sent.
    pub fn accept_ranges(mut self, accept_ranges: bool) -> Self {
        self.accept_ranges = accept_ranges;
        self
    }

    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Responds to the request, returning headers and body as
    /// [`RangedResponse`]. No byte of the body is read here.
    pub fn try_respond(self) -> Result<RangedResponse<B>, RangeError> {
        let head = match self.method {
            Method::GET => false,
            Method::HEAD => true,
            _ => return Err(RangeError::MethodNotAllowed),
        };

        let file_size = self.body.byte_size();
        let representation = Representation {
            content_type: self.content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            filename: self.filename,
            accept_ranges: self.accept_ranges,
            head,
        };

        let header = match self.range {
            Some(header) if self.accept_ranges => header,
            _ => {
                debug!(file_size, head, "no applicable range, sending whole body");
                let stream = RangedStream::new(self.body, 0, file_size);
                return Ok(RangedResponse::Full {
                    content_length: ContentLength(file_size),
                    stream,
                    representation,
                });
            }
        };

        let RangeParseResult { ranges, total_length } =
            parse::parse_range_header(&header, file_size, &self.policy)?;
        policy::check(&ranges, file_size, &self.policy)?;

        if let [range] = ranges.as_slice() {
            debug!(start = range.start, end = range.end, file_size, head, "single range");
            let content_range = ContentRange::bytes(range.start..=range.end, file_size)
                .map_err(|_| RangeError::not_satisfiable(file_size))?;
            let stream = RangedStream::new(self.body, range.start, range.len());
            return Ok(RangedResponse::Single {
                content_range,
                content_length: ContentLength(range.len()),
                stream,
                representation,
            });
        }

        let boundary = multipart::generate_boundary();
        let headers = multipart::build_headers(
            &ranges,
            &boundary,
            &representation.content_type,
            file_size,
        );
        let content_length = multipart::content_length(&headers, total_length, &boundary);
        debug!(parts = ranges.len(), content_length, file_size, head, "multipart ranges");

        let stream = MultipartStream::new(
            self.body,
            &ranges,
            headers.headers,
            multipart::closing_boundary(&boundary),
            content_length,
        );
        Ok(RangedResponse::Multiple {
            boundary,
            content_length: ContentLength(content_length),
            body: MultipartBody::Stream(stream),
            representation,
        })
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for Ranged<B> {
    fn into_response(self) -> Response {
        self.try_respond().into_response()
    }
}

/// What is being sent, independent of which bytes of it.
#[derive(Debug, Clone)]
pub struct Representation {
    pub content_type: String,
    pub filename: Option<String>,
    pub accept_ranges: bool,
    /// Headers only, no body.
    pub head: bool,
}

impl Representation {
    /// Headers shared by every successful response.
    fn common_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.typed_insert(CacheControl::new().with_no_cache());
        if self.accept_ranges {
            headers.typed_insert(AcceptRanges::bytes());
        }
        if let Some(filename) = &self.filename {
            let disposition = HeaderValue::from_str(&format!("attachment; filename={}", quoted(filename)))
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
            headers.insert(header::CONTENT_DISPOSITION, disposition);
        }
        headers
    }

    fn content_type_header(&self) -> HeaderValue {
        HeaderValue::from_str(&self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE))
    }
}

/// `value` as a quoted-string, backslash-escaping `"` and `\`.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Body of a multipart response: streamed as parts are read, or fully read up front.
#[derive(Debug)]
pub enum MultipartBody<B> {
    Stream(MultipartStream<B>),
    Buffered(Bytes),
}

#[derive(Debug)]
/// Data type containing computed headers and body for a range response. Implements [`IntoResponse`].
pub enum RangedResponse<B> {
    /// Whole body, `200`.
    Full {
        content_length: ContentLength,
        stream: RangedStream<B>,
        representation: Representation,
    },
    /// One satisfiable range, `206`.
    Single {
        content_range: ContentRange,
        content_length: ContentLength,
        stream: RangedStream<B>,
        representation: Representation,
    },
    /// Several satisfiable ranges, `206` `multipart/byteranges`.
    Multiple {
        boundary: String,
        content_length: ContentLength,
        body: MultipartBody<B>,
        representation: Representation,
    },
}

impl<B: RangeBody + Send + 'static> RangedResponse<B> {
    /// Read a streamed multipart body completely, so that a span failure
    /// surfaces here as [`RangeError::Internal`] instead of cutting a `206`
    /// short after its headers went out.
    ///
    /// Bodies longer than `max_length` bytes stay streamed. Other responses
    /// pass through.
    pub async fn buffer_multipart(self, max_length: u64) -> Result<Self, RangeError> {
        match self {
            RangedResponse::Multiple {
                boundary,
                content_length,
                body: MultipartBody::Stream(stream),
                representation,
            } if !representation.head => {
                let body = if content_length.0 > max_length {
                    debug!(content_length = content_length.0, max_length, "multipart body too long to buffer");
                    MultipartBody::Stream(stream)
                } else {
                    MultipartBody::Buffered(stream.buffer().await?)
                };
                Ok(RangedResponse::Multiple {
                    boundary,
                    content_length,
                    body,
                    representation,
                })
            }
            other => Ok(other),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RangedResponse::Full { .. } => StatusCode::OK,
            RangedResponse::Single { .. } | RangedResponse::Multiple { .. } => {
                StatusCode::PARTIAL_CONTENT
            }
        }
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedResponse<B> {
    fn into_response(self) -> Response {
        let status = self.status();

        use RangedResponse::*;
        match self {
            Full { content_length, stream, representation } => {
                let mut headers = representation.common_headers();
                headers.insert(header::CONTENT_TYPE, representation.content_type_header());
                headers.typed_insert(content_length);
                let body = if representation.head { Body::empty() } else { Body::new(stream) };
                (status, headers, body).into_response()
            }
            Single { content_range, content_length, stream, representation } => {
                let mut headers = representation.common_headers();
                headers.insert(header::CONTENT_TYPE, representation.content_type_header());
                headers.typed_insert(content_range);
                headers.typed_insert(content_length);
                let body = if representation.head { Body::empty() } else { Body::new(stream) };
                (status, headers, body).into_response()
            }
            Multiple { boundary, content_length, body, representation } => {
                let mut headers = representation.common_headers();
                let content_type = format!("multipart/byteranges; boundary={boundary}");
                match HeaderValue::from_str(&content_type) {
                    Ok(value) => { headers.insert(header::CONTENT_TYPE, value); }
                    Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                }
                headers.typed_insert(content_length);
                let body = match body {
                    _ if representation.head => Body::empty(),
                    MultipartBody::Stream(stream) => Body::new(stream),
                    MultipartBody::Buffered(bytes) => Body::from(bytes),
                };
                (status, headers, body).into_response()
            }
        }
    }
}
