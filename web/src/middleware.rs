//! Correlation ids for requests.
//!
//! Payment gateways retry notifications and tag each delivery with their
//! own request id; clients can do the same for checkout. The id travels in
//! `X-Correlation-ID`: a caller-supplied value is kept if it is short
//! printable ASCII, otherwise a UUID is minted. The id is stored in request
//! extensions as [`CorrelationId`] and echoed on the response. The layer
//! opens a `correlation` span carrying the id; layers and handlers inside it
//! (the HTTP trace span included) open their spans as its children.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/webhook", post(webhook::receive))
//!     .layer(correlation_id_layer());
//! ```

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

const MAX_LEN: usize = 128;

/// Correlation id of the current request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Keeps `raw` if it is 1..=128 visible ASCII characters.
    #[must_use]
    pub fn accept(raw: &str) -> Option<Self> {
        let ok = !raw.is_empty()
            && raw.len() <= MAX_LEN
            && raw.bytes().all(|b| b.is_ascii_graphic());
        ok.then(|| Self(raw.to_string()))
    }

    /// A fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer adding [`CorrelationIdMiddleware`] to a router.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// See [`correlation_id_layer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Tags each request with a [`CorrelationId`].
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(CorrelationId::accept)
            .unwrap_or_else(CorrelationId::generate);

        let span = tracing::info_span!("correlation", correlation_id = %id);
        let header = HeaderValue::from_str(id.as_str()).ok();
        req.extensions_mut().insert(id);

        // Inner layers create their spans in `call`.
        let fut = {
            let _entered = span.enter();
            self.inner.call(req)
        };
        Box::pin(async move {
            let mut response = fut.instrument(span).await?;
            if let Some(header) = header {
                response.headers_mut().insert(CORRELATION_ID_HEADER, header);
            }
            Ok(response)
        })
    }
}
