//! The interceptor pipeline.
//!
//! [`Interceptor::intercept`] wraps one request/response exchange:
//!
//! ```text
//! Idle -> ResolvingId -> SamplingDecided -> CapturingRequest
//!      -> AwaitingHandler -> CapturingResponse -> Emitting -> Done
//! ```
//!
//! A handler error moves the exchange to `Failed` before it is emitted.
//! Everything on the logging path is recovered locally: the handler's
//! response (or error) always reaches the caller untouched.
//!
//! The response is handed back as soon as the handler produces it. When its
//! body is captured, the exchange stays in `CapturingResponse` until the body
//! has been streamed to the end, and is emitted from there.

use crate::aggregator::{publish, run_periodic_flush, StatusAggregator};
use crate::capture::{capture, BodyCapture, ReplayBody, TeeBody, UNREADABLE_BODY};
use crate::config::InterceptorConfig;
use crate::context::{content_type, RequestContext, ResponseContext};
use crate::correlation::CorrelationTracker;
use crate::error::ConfigError;
use crate::latency::LatencyMonitor;
use crate::mask::Masker;
use crate::queue::{run_writer, EventQueue, PipelineStats, PipelineStatsSnapshot};
use crate::record::{ExchangeOutcome, LogRecordBuilder, MaskedRequest};
use crate::sampling::SamplingDecider;
use crate::sink::{LogSink, SinkEvent};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use serde::Serialize;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Where an exchange is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    ResolvingId,
    SamplingDecided,
    CapturingRequest,
    AwaitingHandler,
    CapturingResponse,
    Emitting,
    Done,
    Failed,
}

/// HTTP observability interceptor.
///
/// Cheap to clone; clones share configuration, counters and background
/// tasks.
///
/// # Example
///
/// ```ignore
/// use wiretap_core::{Interceptor, InterceptorConfig, TracingSink};
///
/// let interceptor = Interceptor::new(InterceptorConfig::new().sample_rate(0.1), TracingSink)?;
/// let response = interceptor.intercept(request, |req| handler(req)).await;
/// interceptor.shutdown().await;
/// ```
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<Inner>,
}

struct Inner {
    config: InterceptorConfig,
    sampler: SamplingDecider,
    latency: LatencyMonitor,
    masker: Masker,
    correlation: CorrelationTracker,
    builder: LogRecordBuilder,
    aggregator: Arc<StatusAggregator>,
    queue: Arc<EventQueue>,
    stats: Arc<PipelineStats>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

struct BackgroundTasks {
    stop_flush: oneshot::Sender<()>,
    flusher: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Internal result of an exchange, before bodies are rendered.
enum Finish {
    Completed(ResponseContext),
    HandlerFailed {
        class: &'static str,
        latency: f64,
    },
    Aborted {
        stage: Stage,
        latency: f64,
    },
}

impl Interceptor {
    /// Validate `config` and start the background aggregation and writer
    /// tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S: LogSink>(config: InterceptorConfig, sink: S) -> Result<Self, ConfigError> {
        Self::with_shared_sink(config, Arc::new(sink))
    }

    /// Like [`new`](Self::new), for a sink that is already shared.
    pub fn with_shared_sink(
        config: InterceptorConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let hostname = config.hostname.clone().unwrap_or_else(resolve_hostname);
        let builder =
            LogRecordBuilder::new(hostname, config.app_version.clone(), config.latency_threshold);
        let correlation = CorrelationTracker::new(
            config.correlation_headers.clone(),
            config.response_correlation_header.clone(),
        );

        let stats = Arc::new(PipelineStats::default());
        let queue = Arc::new(EventQueue::new(config.queue_capacity, stats.clone()));
        let aggregator = Arc::new(StatusAggregator::new());

        let (stop_flush, stop_rx) = oneshot::channel();
        let flusher = tokio::spawn(run_periodic_flush(
            aggregator.clone(),
            queue.clone(),
            config.aggregation_period(),
            config.emit_empty_summaries,
            stop_rx,
        ));
        let writer = tokio::spawn(run_writer(queue.clone(), sink, stats.clone()));

        tracing::info!(
            target: "wiretap",
            sample_rate = config.sample_rate,
            latency_threshold = config.latency_threshold,
            max_body_size = config.max_body_size,
            "interceptor started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                sampler: SamplingDecider::new(config.sample_rate),
                latency: LatencyMonitor::new(config.latency_threshold),
                masker: Masker::new(config.masked_fields.iter().cloned()),
                correlation,
                builder,
                aggregator,
                queue,
                stats,
                tasks: Mutex::new(Some(BackgroundTasks {
                    stop_flush,
                    flusher,
                    writer,
                })),
                config,
            }),
        })
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.inner.config
    }

    /// Status counters for the current aggregation window.
    pub fn aggregator(&self) -> &StatusAggregator {
        &self.inner.aggregator
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Flush the final aggregation window and wait until every queued event
    /// has reached the sink. Further calls return immediately.
    pub async fn shutdown(&self) {
        let tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tasks) = tasks else {
            return;
        };

        let _ = tasks.stop_flush.send(());
        if let Err(err) = tasks.flusher.await {
            tracing::warn!(target: "wiretap", error = %err, "status aggregation task failed");
        }

        self.inner.queue.close();
        if let Err(err) = tasks.writer.await {
            tracing::warn!(target: "wiretap", error = %err, "event writer task failed");
        }

        tracing::info!(target: "wiretap", "interceptor stopped");
    }

    /// Run one exchange through the interceptor.
    ///
    /// `next` receives the request with its body intact and its result is
    /// returned unchanged, apart from the correlation header on responses.
    ///
    /// A sampled exchange whose response body is captured is recorded when
    /// that body ends. Dropping the body before its end records the exchange
    /// as aborted.
    pub async fn intercept<B, ResB, E, F, Fut>(
        &self,
        request: Request<B>,
        next: F,
    ) -> Result<Response<TeeBody<ResB>>, E>
    where
        B: Body<Data = Bytes>,
        ResB: Body<Data = Bytes>,
        F: FnOnce(Request<ReplayBody<B>>) -> Fut,
        Fut: Future<Output = Result<Response<ResB>, E>>,
    {
        let inner = &self.inner;

        if inner.config.is_excluded(request.uri().path()) {
            let result = next(request.map(ReplayBody::passthrough)).await;
            inner.aggregator.record(status_of(&result));
            return result.map(|response| response.map(TeeBody::passthrough));
        }

        let timer = LatencyMonitor::start();
        trace_stage(Stage::ResolvingId, request.uri().path());
        let correlation_id = inner.correlation.resolve(request.headers());

        trace_stage(Stage::SamplingDecided, request.uri().path());
        if !inner.sampler.should_sample() {
            let result = next(request.map(ReplayBody::passthrough)).await;
            inner.aggregator.record(status_of(&result));
            return result.map(|mut response| {
                inner
                    .correlation
                    .attach(response.headers_mut(), &correlation_id);
                response.map(TeeBody::passthrough)
            });
        }

        let (parts, body) = request.into_parts();
        let bodiless = parts.method == Method::HEAD;
        let context = RequestContext::from_parts(&parts, correlation_id, timer);
        let mut guard = ExchangeGuard::new(inner.clone(), context);

        guard.advance(Stage::CapturingRequest);
        let (body, request_body) = capture(body, inner.config.max_body_size).await;
        guard.context.body = request_body;

        guard.advance(Stage::AwaitingHandler);
        let result = next(Request::from_parts(parts, body)).await;
        let latency = LatencyMonitor::stop(timer);

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                inner
                    .aggregator
                    .record(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
                guard.advance(Stage::Failed);
                guard.finish(Finish::HandlerFailed {
                    class: std::any::type_name::<E>(),
                    latency,
                });
                return Err(err);
            }
        };

        guard.advance(Stage::CapturingResponse);
        let (mut parts, body) = response.into_parts();
        inner
            .correlation
            .attach(&mut parts.headers, &guard.context.correlation_id);
        inner.aggregator.record(parts.status.as_u16());

        let loggable = content_type(&parts.headers)
            .as_deref()
            .is_some_and(|ct| inner.config.is_loggable_content_type(ct));

        let response_body = if !inner.config.capture_response_body {
            None
        } else if !loggable {
            Some(BodyCapture::Skipped)
        } else if bodiless {
            // The transport discards the body of a HEAD response unread.
            Some(BodyCapture::Buffered(Bytes::new()))
        } else {
            let mut observed = ResponseContext::from_parts(&parts, None, latency);
            let body = TeeBody::new(body, inner.config.max_body_size, move |captured| {
                observed.body = Some(captured);
                guard.finish(Finish::Completed(observed));
            });
            return Ok(Response::from_parts(parts, body));
        };

        let observed = ResponseContext::from_parts(&parts, response_body, latency);
        guard.finish(Finish::Completed(observed));

        Ok(Response::from_parts(parts, TeeBody::passthrough(body)))
    }
}

impl Inner {
    /// Assemble and enqueue the events for a finished exchange. Never panics
    /// and never blocks on the sink.
    fn emit(&self, context: &RequestContext, finish: Finish) {
        let assembled = panic::catch_unwind(AssertUnwindSafe(|| self.assemble(context, finish)));

        match assembled {
            Ok(events) => {
                for event in events {
                    if !self.queue.push(event) {
                        tracing::debug!(
                            target: "wiretap",
                            correlation_id = %context.correlation_id,
                            "interceptor shut down, event discarded"
                        );
                    }
                }
            }
            Err(_) => {
                self.stats.meta_error();
                tracing::error!(
                    target: "wiretap",
                    method = %context.method,
                    path = %context.path,
                    correlation_id = %context.correlation_id,
                    "failed to assemble log record"
                );
            }
        }
    }

    fn assemble(&self, context: &RequestContext, finish: Finish) -> Vec<SinkEvent> {
        let masked = MaskedRequest {
            headers: self.masker.mask_headers(&context.headers),
            query_params: self.masker.mask_query(&context.query_params),
            body: self.render_body(&context.body, context.content_type.as_deref(), context),
        };

        let outcome = match finish {
            Finish::Completed(response) => ExchangeOutcome::Completed {
                status_code: response.status_code,
                latency: response.latency,
                body: response
                    .body
                    .map(|b| self.render_body(&b, response.content_type.as_deref(), context)),
            },
            Finish::HandlerFailed { class, latency } => ExchangeOutcome::HandlerFailed {
                class: class.to_string(),
                latency,
            },
            Finish::Aborted { stage, latency } => ExchangeOutcome::Aborted { stage, latency },
        };

        let mut events = vec![SinkEvent::Record(
            self.builder.build(context, &masked, &outcome),
        )];

        let latency = outcome.latency();
        if self.latency.is_slow(latency) {
            events.push(SinkEvent::Alert(self.builder.build_alert(context, latency)));
        }

        events
    }

    /// Logged text for a captured body, masked when it is structured.
    ///
    /// A body that looks structured but fails to parse is replaced by
    /// [`UNREADABLE_BODY`] rather than logged unmasked.
    fn render_body(
        &self,
        body: &BodyCapture,
        content_type: Option<&str>,
        context: &RequestContext,
    ) -> String {
        let text = match body.bytes().map(|b| std::str::from_utf8(b)) {
            Some(Ok(text)) if !text.is_empty() => text,
            _ => return body.render(),
        };

        match self.masker.mask_body(text, content_type) {
            Ok(Some(masked)) => masked,
            Ok(None) => text.to_string(),
            Err(err) => {
                tracing::debug!(
                    target: "wiretap",
                    error = %err,
                    correlation_id = %context.correlation_id,
                    "body masking failed, body withheld"
                );
                UNREADABLE_BODY.to_string()
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Shutdown was never called: flush the last window here, then let the
        // writer drain and exit.
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.flusher.abort();
            publish(&self.aggregator, &self.queue, self.config.emit_empty_summaries);
        }
        self.queue.close();
    }
}

/// Owns a sampled exchange. Dropping it before [`finish`](Self::finish)
/// emits an aborted record.
struct ExchangeGuard {
    inner: Arc<Inner>,
    context: RequestContext,
    stage: Stage,
    armed: bool,
}

impl ExchangeGuard {
    fn new(inner: Arc<Inner>, context: RequestContext) -> Self {
        Self {
            inner,
            context,
            stage: Stage::SamplingDecided,
            armed: true,
        }
    }

    fn advance(&mut self, stage: Stage) {
        trace_stage(stage, &self.context.path);
        self.stage = stage;
    }

    fn finish(mut self, finish: Finish) {
        self.armed = false;
        self.advance(Stage::Emitting);
        self.inner.emit(&self.context, finish);
        self.advance(Stage::Done);
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let latency = self.context.timer.elapsed_secs();
        tracing::debug!(
            target: "wiretap",
            stage = ?self.stage,
            correlation_id = %self.context.correlation_id,
            "exchange aborted"
        );
        self.inner.emit(
            &self.context,
            Finish::Aborted {
                stage: self.stage,
                latency,
            },
        );
    }
}

fn trace_stage(stage: Stage, path: &str) {
    tracing::trace!(target: "wiretap", ?stage, path, "exchange stage");
}

fn status_of<T, E>(result: &Result<Response<T>, E>) -> u16 {
    match result {
        Ok(response) => response.status().as_u16(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
    }
}

fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
