//! Body capture.
//!
//! Request bodies are read ahead: [`capture`] reads frames from a body before
//! the downstream consumer does, keeping a copy of the data for logging. The
//! returned [`ReplayBody`] hands the consumer every frame that was read ahead,
//! in order, and then the untouched remainder of the original body. Buffering
//! for the log stops as soon as the limit is exceeded, so at most `limit`
//! bytes plus one frame are held per body.
//!
//! Response bodies are teed instead: [`TeeBody`] copies frames as the
//! transport polls them and reports the capture once the body ends, so a
//! streaming response is never held back.

use crate::error::CaptureError;
use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Logged in place of a body larger than the configured limit.
pub const BODY_TOO_LARGE: &str = "Body too large to log";

/// Logged in place of a body that is not valid UTF-8.
pub const BINARY_BODY: &str = "<binary body>";

/// Logged in place of a body whose stream failed.
pub const UNREADABLE_BODY: &str = "Unable to read body";

/// Logged in place of a response body with a non-loggable content type.
pub const SKIPPED_BODY: &str = "Skipped logging due to content type";

/// What the capturer kept of a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyCapture {
    /// The whole body, within the limit.
    Buffered(Bytes),
    /// The body exceeded the limit.
    Truncated,
    /// The body stream failed before completing.
    Unreadable,
    /// Capture was not attempted for this body.
    Skipped,
}

impl BodyCapture {
    pub fn is_truncated(&self) -> bool {
        matches!(self, BodyCapture::Truncated)
    }

    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            BodyCapture::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Text logged for this body.
    pub fn render(&self) -> String {
        match self {
            BodyCapture::Buffered(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => BINARY_BODY.to_string(),
            },
            BodyCapture::Truncated => BODY_TOO_LARGE.to_string(),
            BodyCapture::Unreadable => UNREADABLE_BODY.to_string(),
            BodyCapture::Skipped => SKIPPED_BODY.to_string(),
        }
    }
}

/// Body that replays read-ahead frames before resuming the original body.
///
/// A stream error hit during read-ahead is replayed at the same position, so
/// the consumer sees exactly what the original body would have produced.
pub struct ReplayBody<B: Body> {
    replay: VecDeque<Frame<B::Data>>,
    error: Option<B::Error>,
    inner: Option<Pin<Box<B>>>,
}

// Fields are never pin-projected; the inner body is pinned on the heap.
impl<B: Body> Unpin for ReplayBody<B> {}

impl<B: Body> ReplayBody<B> {
    /// Wrap a body without reading anything ahead.
    pub fn passthrough(body: B) -> Self {
        Self::resume(Box::pin(body))
    }

    fn resume(inner: Pin<Box<B>>) -> Self {
        Self {
            replay: VecDeque::new(),
            error: None,
            inner: Some(inner),
        }
    }

    /// Number of frames held for replay.
    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }
}

impl<B> Body for ReplayBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if let Some(frame) = this.replay.pop_front() {
            return Poll::Ready(Some(Ok(frame)));
        }

        if let Some(err) = this.error.take() {
            this.inner = None;
            return Poll::Ready(Some(Err(err)));
        }

        match this.inner.as_mut() {
            Some(inner) => inner.as_mut().poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.replay.is_empty()
            && self.error.is_none()
            && self
                .inner
                .as_ref()
                .map_or(true, |inner| inner.as_ref().is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let buffered: u64 = self
            .replay
            .iter()
            .filter_map(Frame::data_ref)
            .map(|data| data.len() as u64)
            .sum();

        let remaining = self
            .inner
            .as_ref()
            .map_or_else(|| SizeHint::with_exact(0), |inner| inner.as_ref().size_hint());

        let mut hint = SizeHint::new();
        hint.set_lower(remaining.lower() + buffered);
        if let Some(upper) = remaining.upper() {
            hint.set_upper(upper + buffered);
        }
        hint
    }
}

/// Read `body` ahead up to `limit` bytes.
///
/// Returns the body to hand downstream and what was captured for logging.
/// A `limit` of 0 never buffers: any non-empty body is reported as truncated.
pub async fn capture<B>(body: B, limit: usize) -> (ReplayBody<B>, BodyCapture)
where
    B: Body<Data = Bytes>,
{
    let mut inner = Box::pin(body);

    if inner.as_ref().is_end_stream() {
        return (ReplayBody::resume(inner), BodyCapture::Buffered(Bytes::new()));
    }

    if limit == 0 || inner.as_ref().size_hint().lower() > limit as u64 {
        return (ReplayBody::resume(inner), BodyCapture::Truncated);
    }

    let mut replay = VecDeque::new();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut buffered = 0usize;

    loop {
        match inner.frame().await {
            None => {
                let body = ReplayBody {
                    replay,
                    error: None,
                    inner: None,
                };
                return (body, BodyCapture::Buffered(concat(chunks, buffered)));
            }
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    buffered += data.len();
                    if buffered <= limit {
                        chunks.push(data.clone());
                    }
                }
                replay.push_back(frame);

                if buffered > limit {
                    let body = ReplayBody {
                        replay,
                        error: None,
                        inner: Some(inner),
                    };
                    return (body, BodyCapture::Truncated);
                }
            }
            Some(Err(err)) => {
                tracing::debug!(
                    target: "wiretap",
                    error = %CaptureError::Stream { buffered },
                    "body capture degraded"
                );
                let body = ReplayBody {
                    replay,
                    error: Some(err),
                    inner: None,
                };
                return (body, BodyCapture::Unreadable);
            }
        }
    }
}

/// Called with the capture once a teed body has ended.
type OnComplete = Box<dyn FnOnce(BodyCapture) + Send + Sync>;

/// Body that copies data frames into a capture buffer as they are polled.
///
/// The completion callback runs exactly once, when the body reaches its end
/// (or fails). A body dropped before that point never runs the callback;
/// it is dropped instead.
pub struct TeeBody<B> {
    inner: Pin<Box<B>>,
    tee: Option<Tee>,
}

impl<B: std::fmt::Debug> std::fmt::Debug for TeeBody<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeBody")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

struct Tee {
    limit: usize,
    buffered: usize,
    overflowed: bool,
    chunks: Vec<Bytes>,
    on_complete: OnComplete,
}

impl Tee {
    fn observe(&mut self, data: &Bytes) {
        self.buffered += data.len();
        if self.overflowed {
            return;
        }
        if self.buffered > self.limit {
            self.overflowed = true;
            self.chunks = Vec::new();
        } else {
            self.chunks.push(data.clone());
        }
    }

    fn finish(self) {
        let captured = if self.overflowed {
            BodyCapture::Truncated
        } else {
            BodyCapture::Buffered(concat(self.chunks, self.buffered))
        };
        (self.on_complete)(captured);
    }

    fn fail(self) {
        tracing::debug!(
            target: "wiretap",
            error = %CaptureError::Stream { buffered: self.buffered },
            "body capture degraded"
        );
        (self.on_complete)(BodyCapture::Unreadable);
    }
}

impl<B: Body> TeeBody<B> {
    /// Forward `body` without capturing anything.
    pub fn passthrough(body: B) -> Self {
        Self {
            inner: Box::pin(body),
            tee: None,
        }
    }

    /// Capture up to `limit` bytes of `body` as it is consumed.
    ///
    /// A body that is already at its end completes immediately. A size hint
    /// above `limit` marks the capture truncated without buffering anything.
    pub fn new<F>(body: B, limit: usize, on_complete: F) -> Self
    where
        F: FnOnce(BodyCapture) + Send + Sync + 'static,
    {
        let inner = Box::pin(body);
        let overflowed = inner.as_ref().size_hint().lower() > limit as u64;
        let tee = Tee {
            limit,
            buffered: 0,
            overflowed,
            chunks: Vec::new(),
            on_complete: Box::new(on_complete),
        };

        if inner.as_ref().is_end_stream() {
            tee.finish();
            return Self { inner, tee: None };
        }

        Self {
            inner,
            tee: Some(tee),
        }
    }

    /// Whether the capture is still waiting for the end of the body.
    pub fn is_capturing(&self) -> bool {
        self.tee.is_some()
    }
}

impl<B> Body for TeeBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(tee), Some(data)) = (this.tee.as_mut(), frame.data_ref()) {
                    tee.observe(data);
                }
                // Transports stop polling once the body reports its end.
                if this.inner.as_ref().is_end_stream() {
                    if let Some(tee) = this.tee.take() {
                        tee.finish();
                    }
                }
            }
            Poll::Ready(Some(Err(_))) => {
                if let Some(tee) = this.tee.take() {
                    tee.fail();
                }
            }
            Poll::Ready(None) => {
                if let Some(tee) = this.tee.take() {
                    tee.finish();
                }
            }
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.as_ref().size_hint()
    }
}

fn concat(mut chunks: Vec<Bytes>, len: usize) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.pop().unwrap_or_default(),
        _ => {
            let mut buf = BytesMut::with_capacity(len);
            for chunk in chunks {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    }
}
