use std::{io, mem};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::{pin_mut, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, error};

use crate::error::RangeError;
use crate::{ByteRange, RangeBody};

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Progress through one byte span of the underlying body.
#[derive(Debug)]
enum SpanState {
    Seek { start: u64, length: u64 },
    Seeking { remaining: u64 },
    Reading { buffer: BytesMut, remaining: u64 },
    Done,
}

impl SpanState {
    fn new(start: u64, length: u64) -> Self {
        SpanState::Seek { start, length }
    }
}

/// Drive `state` one step: yields the next chunk of the span, `None` once all
/// of its bytes have been produced.
fn poll_span<B: RangeBody>(
    mut body: Pin<&mut B>,
    state: &mut SpanState,
    cx: &mut Context<'_>,
) -> Poll<Option<io::Result<Bytes>>> {
    if let SpanState::Seek { start, length } = *state {
        if length == 0 {
            *state = SpanState::Done;
            return Poll::Ready(None);
        }
        if let Err(e) = body.as_mut().start_seek(start) {
            *state = SpanState::Done;
            return Poll::Ready(Some(Err(e)));
        }
        *state = SpanState::Seeking { remaining: length };
    }

    if let SpanState::Seeking { remaining } = *state {
        match body.as_mut().poll_complete(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => {
                *state = SpanState::Done;
                return Poll::Ready(Some(Err(e)));
            }
            Poll::Ready(Ok(())) => {
                *state = SpanState::Reading { buffer: allocate_buffer(), remaining };
            }
        }
    }

    if let SpanState::Reading { buffer, remaining } = state {
        if *remaining == 0 {
            *state = SpanState::Done;
            return Poll::Ready(None);
        }

        let uninit = buffer.spare_capacity_mut();

        // read no more than the buffer holds and no more than the span has left
        let nbytes = std::cmp::min(
            uninit.len(),
            usize::try_from(*remaining).unwrap_or(usize::MAX),
        );

        let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

        match body.as_mut().poll_read(cx, &mut read_buf) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => {
                *state = SpanState::Done;
                return Poll::Ready(Some(Err(e)));
            }
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                if n == 0 {
                    // the body is shorter than advertised
                    let missing = *remaining;
                    *state = SpanState::Done;
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("body ended with {missing} bytes of the span unread"),
                    ))));
                }

                // SAFETY: poll_read has filled the buffer with `n`
                // additional bytes. `buffer.len` should always be
                // 0 here, but include it for rigorous correctness
                unsafe { buffer.set_len(buffer.len() + n); }

                let chunk = mem::replace(buffer, allocate_buffer());

                // n <= remaining because of the cmp::min above
                *remaining -= n as u64;

                return Poll::Ready(Some(Ok(chunk.freeze())));
            }
        }
    }

    Poll::Ready(None)
}

/// Single-span response body. Implements [`Stream`], [`Body`], and [`IntoResponse`].
#[pin_project]
pub struct RangedStream<B> {
    state: SpanState,
    length: u64,
    #[pin]
    body: B,
}

impl<B: RangeBody + Send + 'static> RangedStream<B> {
    pub(crate) fn new(body: B, start: u64, length: u64) -> Self {
        RangedStream {
            state: SpanState::new(start, length),
            length,
            body,
        }
    }
}

impl<B> std::fmt::Debug for RangedStream<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedStream")
            .field("state", &self.state)
            .field("length", &self.length)
            .finish()
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedStream<B> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<B: RangeBody> Body for RangedStream<B> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<B: RangeBody> Stream for RangedStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.project();
        poll_span(this.body, this.state, cx)
    }
}

/// One part of a multipart body: its header block and the span it frames.
#[derive(Debug, Clone)]
struct Part {
    header: Bytes,
    range: ByteRange,
}

#[derive(Debug)]
enum MultipartState {
    Header,
    Span(SpanState),
    Closing,
    Finished,
}

/// `multipart/byteranges` body over a single [`RangeBody`].
///
/// Parts are produced strictly one after another in set order: a part's
/// header block, then every byte of its span, and only then the next part.
/// Since all spans are read from the same body, at most one span is ever
/// open. The first read error ends the stream. Implements [`Stream`],
/// [`Body`], and [`IntoResponse`].
#[pin_project]
pub struct MultipartStream<B> {
    state: MultipartState,
    parts: Vec<Part>,
    current: usize,
    closing: Bytes,
    content_length: u64,
    #[pin]
    body: B,
}

impl<B: RangeBody + Send + 'static> MultipartStream<B> {
    /// `headers` must hold one header block per range, in the same order.
    pub(crate) fn new(
        body: B,
        ranges: &[ByteRange],
        headers: Vec<String>,
        closing: String,
        content_length: u64,
    ) -> Self {
        debug_assert_eq!(ranges.len(), headers.len());
        let parts = headers
            .into_iter()
            .zip(ranges)
            .map(|(header, range)| Part { header: Bytes::from(header), range: range.clone() })
            .collect();
        MultipartStream {
            state: MultipartState::Header,
            parts,
            current: 0,
            closing: Bytes::from(closing),
            content_length,
            body,
        }
    }

    /// Drain the whole body into `sink`, honoring its back-pressure.
    ///
    /// Returns the number of bytes written. A sink that reports it was closed
    /// stops the transfer without an error: the open span is dropped and no
    /// further spans are started. A read failure on any span is returned as
    /// [`RangeError::Internal`].
    pub async fn write_all<W>(self, sink: &mut W) -> Result<u64, RangeError>
    where
        W: AsyncWrite + Unpin,
    {
        let stream = self;
        pin_mut!(stream);

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Err(e) = sink.write_all(&chunk).await {
                if is_closed(&e) {
                    debug!(written, "sink closed, abandoning multipart body");
                    return Ok(written);
                }
                return Err(e.into());
            }
            written += chunk.len() as u64;
        }

        match sink.flush().await {
            Err(e) if is_closed(&e) => debug!(written, "sink closed before flush"),
            other => other?,
        }
        Ok(written)
    }

    /// Collect the whole body in memory.
    ///
    /// The buffer grows with the bytes actually read, so callers bound
    /// [`Body::size_hint`] before reaching for this.
    pub async fn buffer(self) -> Result<Bytes, RangeError> {
        let capacity = usize::try_from(self.content_length)
            .unwrap_or(usize::MAX)
            .min(IO_BUFFER_SIZE);
        let mut sink = Vec::with_capacity(capacity);
        self.write_all(&mut sink).await?;
        Ok(Bytes::from(sink))
    }
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero
    )
}

impl<B> std::fmt::Debug for MultipartStream<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartStream")
            .field("state", &self.state)
            .field("parts", &self.parts.len())
            .field("current", &self.current)
            .field("content_length", &self.content_length)
            .finish()
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for MultipartStream<B> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<B: RangeBody> Body for MultipartStream<B> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.content_length)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
                  -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<B: RangeBody> Stream for MultipartStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        loop {
            match this.state {
                MultipartState::Header => match this.parts.get(*this.current) {
                    Some(part) => {
                        let header = part.header.clone();
                        *this.state = MultipartState::Span(SpanState::new(part.range.start, part.range.len()));
                        return Poll::Ready(Some(Ok(header)));
                    }
                    None => {
                        *this.state = MultipartState::Closing;
                    }
                },

                MultipartState::Span(span) => {
                    match ready!(poll_span(this.body.as_mut(), span, cx)) {
                        Some(Ok(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                        Some(Err(e)) => {
                            // headers are long gone by now, so all we can do is cut the body short
                            error!(
                                part = *this.current,
                                error = %e,
                                "multipart span failed, aborting body"
                            );
                            *this.state = MultipartState::Finished;
                            return Poll::Ready(Some(Err(e)));
                        }
                        None => {
                            *this.current += 1;
                            *this.state = MultipartState::Header;
                        }
                    }
                }

                MultipartState::Closing => {
                    *this.state = MultipartState::Finished;
                    return Poll::Ready(Some(Ok(this.closing.clone())));
                }

                MultipartState::Finished => {
                    return Poll::Ready(None);
                }
            }
        }
    }
}

fn allocate_buffer() -> BytesMut {
    BytesMut::with_capacity(IO_BUFFER_SIZE)
}
