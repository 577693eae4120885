//! HTTP/1.1 execution for requests an HTTP/2 server turned away.
//!
//! The connection pool, framing and keep-alive of HTTP/1.1 live outside this
//! crate; the transaction only needs a way to run one request over it.

use crate::base::neterror::NetError;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Runs a request over HTTP/1.1.
pub trait Http11Fallback: Send + Sync {
    /// `via_proxy` is set when the request goes through `request.proxy`
    /// and the proxy itself demanded HTTP/1.1.
    fn execute<'a>(
        &'a self,
        request: &'a HttpRequest,
        via_proxy: bool,
    ) -> BoxFuture<'a, Result<HttpResponse, NetError>>;
}

impl<F: Http11Fallback + ?Sized> Http11Fallback for Arc<F> {
    fn execute<'a>(
        &'a self,
        request: &'a HttpRequest,
        via_proxy: bool,
    ) -> BoxFuture<'a, Result<HttpResponse, NetError>> {
        (**self).execute(request, via_proxy)
    }
}

/// Fallback for deployments without an HTTP/1.1 stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHttp11Fallback;

impl Http11Fallback for NoHttp11Fallback {
    fn execute<'a>(
        &'a self,
        _request: &'a HttpRequest,
        _via_proxy: bool,
    ) -> BoxFuture<'a, Result<HttpResponse, NetError>> {
        Box::pin(async { Err(NetError::Http11Required) })
    }
}
