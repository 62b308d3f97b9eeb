//! Tower integration.

use crate::capture::{ReplayBody, TeeBody};
use crate::pipeline::Interceptor;
use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that runs every request through an [`Interceptor`].
///
/// # Example
///
/// ```ignore
/// use tower::ServiceBuilder;
/// use wiretap_core::{Interceptor, InterceptorConfig, TracingSink, WiretapLayer};
///
/// let interceptor = Interceptor::new(InterceptorConfig::new(), TracingSink)?;
/// let service = ServiceBuilder::new()
///     .layer(WiretapLayer::new(interceptor))
///     .service(app);
/// ```
#[derive(Clone)]
pub struct WiretapLayer {
    interceptor: Interceptor,
}

impl WiretapLayer {
    pub fn new(interceptor: Interceptor) -> Self {
        Self { interceptor }
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }
}

impl<S> Layer<S> for WiretapLayer {
    type Service = WiretapService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        WiretapService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Service produced by [`WiretapLayer`].
///
/// The wrapped service receives the request with a [`ReplayBody`], which
/// yields exactly the bytes the client sent. Responses come back wrapped in a
/// [`TeeBody`] that streams the handler's body through unchanged.
#[derive(Clone)]
pub struct WiretapService<S> {
    inner: S,
    interceptor: Interceptor,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for WiretapService<S>
where
    S: Service<Request<ReplayBody<ReqBody>>, Response = Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Send,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Send,
{
    type Response = Response<TeeBody<ResBody>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The service driven to ready is the one that gets called.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        Box::pin(async move {
            interceptor
                .intercept(request, move |request| inner.call(request))
                .await
        })
    }
}
