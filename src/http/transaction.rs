//! One logical request, run over a pooled HTTP/2 session or HTTP/1.1.
//!
//! Based on Chromium's `HttpNetworkTransaction`: a small state machine that
//! finds or opens a session, claims a matching push or opens a stream, sends
//! the request and reads the response. Retryable failures restart it once.

use crate::base::failure::RequestFailure;
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::http::networksession::HttpNetworkSession;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::http::retry::{calculate_backoff, should_retry, RetryConfig, RetryReason};
use crate::spdy::handle::SpdyStreamHandle;
use crate::spdy::headers::HeaderBlock;
use crate::spdy::sessionkey::SchemeHostPort;
use std::sync::Arc;
use tokio::sync::watch;

/// Internal state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    CreateStream,
    SendRequest,
    ReadHeaders,
    ReadBody,
    Http11Fallback,
    Done,
}

impl State {
    /// Map internal state to public LoadState.
    fn to_load_state(self) -> LoadState {
        match self {
            State::Idle => LoadState::Idle,
            State::CreateStream => LoadState::Connecting,
            State::SendRequest | State::Http11Fallback => LoadState::SendingRequest,
            State::ReadHeaders => LoadState::WaitingForResponse,
            State::ReadBody => LoadState::ReadingResponse,
            State::Done => LoadState::Idle,
        }
    }
}

struct AttemptError {
    failure: RequestFailure,
    reused_session: bool,
}

pub struct HttpNetworkTransaction {
    network: Arc<HttpNetworkSession>,
    request: HttpRequest,
    state: State,
    load_state: watch::Sender<LoadState>,
    stream: Option<SpdyStreamHandle>,
    reused_session: bool,
    response_headers: Option<HeaderBlock>,
    response: Option<HttpResponse>,
    retry_config: RetryConfig,
    retry_attempts: usize,
    /// Skip unclaimed pushes; set after a claimed push failed.
    skip_push: bool,
    /// The server or proxy asked for HTTP/1.1 during this transaction.
    force_http11: bool,
}

impl HttpNetworkTransaction {
    pub fn new(network: Arc<HttpNetworkSession>, request: HttpRequest) -> Self {
        let retry_config = network.retry_config.clone();
        let (load_state, _) = watch::channel(LoadState::Idle);
        Self {
            network,
            request,
            state: State::Idle,
            load_state,
            stream: None,
            reused_session: false,
            response_headers: None,
            response: None,
            retry_config,
            retry_attempts: 0,
            skip_push: false,
            force_http11: false,
        }
    }

    /// Set custom retry configuration.
    pub fn set_retry_config(&mut self, config: RetryConfig) {
        self.retry_config = config;
    }

    /// Get the current load state (for progress reporting).
    pub fn get_load_state(&self) -> LoadState {
        *self.load_state.borrow()
    }

    /// Follow load state changes from another task while `start` runs.
    pub fn subscribe_load_state(&self) -> watch::Receiver<LoadState> {
        self.load_state.subscribe()
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Number of retries the last `start` used.
    pub fn retry_attempts(&self) -> usize {
        self.retry_attempts
    }

    /// Run the transaction, retrying once on retryable failures.
    pub async fn start(&mut self) -> Result<(), NetError> {
        self.retry_attempts = 0;
        self.set_state(State::CreateStream);

        loop {
            let AttemptError { failure, reused_session } = match self.do_loop().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            self.stream = None;
            self.response_headers = None;

            // HTTP/1.1 is the last resort; its errors are final.
            if self.state == State::Http11Fallback {
                self.set_state(State::Done);
                return Err(failure.error);
            }
            let Some(reason) = RetryReason::from_failure(&failure, reused_session) else {
                self.set_state(State::Done);
                return Err(failure.error);
            };
            if !should_retry(self.retry_attempts, &self.retry_config) {
                tracing::warn!(
                    url = %self.request.url,
                    error = %failure.error,
                    attempts = self.retry_attempts,
                    "giving up on request"
                );
                self.set_state(State::Done);
                return Err(failure.error);
            }

            self.prepare_retry(reason);
            let delay = calculate_backoff(self.retry_attempts, &self.retry_config);
            self.retry_attempts += 1;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.set_state(State::CreateStream);
        }
    }

    /// Run to completion and return the response.
    pub async fn run(mut self) -> Result<HttpResponse, NetError> {
        self.start().await?;
        self.take_response().ok_or(NetError::EmptyResponse)
    }

    /// Take ownership of the response.
    /// Can only be called once - subsequent calls return None.
    pub fn take_response(&mut self) -> Option<HttpResponse> {
        self.response.take()
    }

    fn set_state(&mut self, state: State) {
        self.state = state;
        self.load_state.send_replace(state.to_load_state());
    }

    fn fail(&self, failure: RequestFailure) -> AttemptError {
        AttemptError { failure, reused_session: self.reused_session }
    }

    fn current_stream(&self) -> Result<&SpdyStreamHandle, AttemptError> {
        self.stream
            .as_ref()
            .ok_or_else(|| self.fail(RequestFailure::unsent(NetError::ConnectionClosed)))
    }

    fn prepare_retry(&mut self, reason: RetryReason) {
        tracing::debug!(url = %self.request.url, ?reason, "retrying request");
        let properties = &self.network.server_properties;
        let nak = &self.request.network_anonymization_key;
        match reason {
            RetryReason::Http11Required => {
                if let Ok(destination) = self.request.destination() {
                    properties.set_http11_required(&destination, nak);
                }
            }
            RetryReason::ProxyHttp11Required => {
                if let Some(proxy) = &self.request.proxy {
                    properties.set_proxy_http11_required(proxy, nak);
                }
            }
            RetryReason::Http2ClaimedPushedStreamResetByServer
            | RetryReason::Http2PushedResponseDoesNotMatch => {
                self.skip_push = true;
            }
            RetryReason::Http2ServerRefusedStream
            | RetryReason::Http2SessionGoingAway
            | RetryReason::ConnectionReset => {
                self.network.spdy_session_pool.remove_unavailable();
            }
        }
        if reason.requires_http11() {
            self.force_http11 = true;
        }
    }

    fn must_use_http11(&self, destination: &SchemeHostPort) -> bool {
        let properties = &self.network.server_properties;
        let nak = &self.request.network_anonymization_key;
        self.force_http11
            || properties.requires_http11(destination, nak)
            || self.request.proxy.as_ref().is_some_and(|p| properties.proxy_requires_http11(p, nak))
    }

    async fn do_loop(&mut self) -> Result<(), AttemptError> {
        loop {
            match self.state {
                State::Idle | State::Done => return Ok(()),
                State::CreateStream => self.do_create_stream().await?,
                State::SendRequest => self.do_send_request().await?,
                State::ReadHeaders => self.do_read_headers().await?,
                State::ReadBody => self.do_read_body().await?,
                State::Http11Fallback => self.do_http11_fallback().await?,
            }
        }
    }

    async fn do_create_stream(&mut self) -> Result<(), AttemptError> {
        self.reused_session = false;
        let key = self.request.session_key().map_err(|e| self.fail(RequestFailure::unsent(e)))?;
        if self.must_use_http11(&key.destination) {
            self.set_state(State::Http11Fallback);
            return Ok(());
        }

        let network = self.network.clone();
        let pool = &network.spdy_session_pool;
        let ip_pooling = network.enable_ip_based_pooling;
        self.reused_session = pool.find_available_session(&key, ip_pooling).is_some();
        let session = match pool.get_or_connect(&key, &*network.connector, ip_pooling).await {
            Ok(session) => session,
            Err(NetError::AlpnNegotiationFailed) => {
                tracing::debug!(host = %key.destination, "no h2, using HTTP/1.1");
                self.set_state(State::Http11Fallback);
                return Ok(());
            }
            Err(e) => return Err(self.fail(RequestFailure::unsent(e))),
        };

        let stream_request =
            self.request.to_stream_request().map_err(|e| self.fail(RequestFailure::unsent(e)))?;
        if !self.skip_push {
            if let Some(stream) = session.try_claim_push(&stream_request) {
                tracing::debug!(url = %self.request.url, "serving request from push");
                self.stream = Some(stream);
                self.set_state(State::ReadHeaders);
                return Ok(());
            }
        }

        let stream = session
            .open_stream(stream_request)
            .await
            .map_err(|e| self.fail(RequestFailure::unsent(e)))?;
        self.stream = Some(stream);
        self.set_state(State::SendRequest);
        Ok(())
    }

    async fn do_send_request(&mut self) -> Result<(), AttemptError> {
        let body = self.request.body.clone().filter(|b| !b.is_empty());
        let stream = self.current_stream()?;
        stream.send_request_headers(body.is_none()).await.map_err(|f| self.fail(f))?;
        if let Some(body) = body {
            stream.write_data(body, true).await.map_err(|f| self.fail(f))?;
        }
        self.set_state(State::ReadHeaders);
        Ok(())
    }

    async fn do_read_headers(&mut self) -> Result<(), AttemptError> {
        let stream = self.current_stream()?;
        let headers = stream.read_response_headers().await.map_err(|f| self.fail(f))?;
        self.response_headers = Some(headers);
        self.set_state(State::ReadBody);
        Ok(())
    }

    async fn do_read_body(&mut self) -> Result<(), AttemptError> {
        let stream = self.current_stream()?;
        let body = stream.read_to_end().await.map_err(|f| self.fail(f))?;
        let trailers = stream.trailers();
        let headers = self
            .response_headers
            .take()
            .ok_or_else(|| self.fail(RequestFailure::new(NetError::InvalidResponse, true, true)))?;
        let response = HttpResponse::from_h2(&headers, body, trailers.as_ref())
            .map_err(|e| self.fail(RequestFailure::new(e, true, true)))?;

        self.response = Some(response);
        self.stream = None;
        self.set_state(State::Done);
        Ok(())
    }

    async fn do_http11_fallback(&mut self) -> Result<(), AttemptError> {
        let via_proxy = self.request.proxy.is_some();
        tracing::debug!(url = %self.request.url, via_proxy, "sending over HTTP/1.1");
        let network = self.network.clone();
        let response = network
            .fallback
            .execute(&self.request, via_proxy)
            .await
            .map_err(|e| self.fail(RequestFailure::new(e, true, false)))?;
        self.response = Some(response);
        self.set_state(State::Done);
        Ok(())
    }
}
