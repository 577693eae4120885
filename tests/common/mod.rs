//! A scripted HTTP/2 server for driving sessions end to end.
#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use http::{HeaderMap, StatusCode, Version};
use spdynet::base::neterror::NetError;
use spdynet::http::{Http11Fallback, HttpRequest, HttpResponse};
use spdynet::socket::stream::BoxedSocket;
use spdynet::socket::transport::{AlreadyConfirmed, ConnectedSocket, SessionConnector, SslInfo};
use spdynet::spdy::frame::{encode_header_block, Frame, FrameDecoder};
use spdynet::spdy::hpack::{HeaderCodec, HpackCodec};
use spdynet::spdy::protocol::{ErrorCode, SettingsId, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE};
use spdynet::spdy::{HeaderBlock, SpdySessionKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Hands the server end of every new connection to the test.
pub struct PeerConnector {
    ssl_info: SslInfo,
    peers: mpsc::UnboundedSender<DuplexStream>,
    pub connects: AtomicUsize,
}

impl PeerConnector {
    pub fn new(names: &[&str]) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector =
            Self { ssl_info: SslInfo::h2(names), peers: tx, connects: AtomicUsize::new(0) };
        (Arc::new(connector), rx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl SessionConnector for PeerConnector {
    fn connect<'a>(
        &'a self,
        _key: &'a SpdySessionKey,
    ) -> BoxFuture<'a, Result<ConnectedSocket, NetError>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let (client, server) = tokio::io::duplex(256 * 1024);
            self.peers.send(server).map_err(|_| NetError::ConnectionRefused)?;
            Ok(ConnectedSocket {
                socket: BoxedSocket::new(client),
                ssl_info: self.ssl_info.clone(),
                confirmer: Arc::new(AlreadyConfirmed),
                early_data: false,
            })
        })
    }
}

/// HTTP/1.1 stand-in that records what it was asked to send.
#[derive(Default)]
pub struct RecordingFallback {
    pub requests: Mutex<Vec<(String, bool)>>,
}

impl RecordingFallback {
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Http11Fallback for RecordingFallback {
    fn execute<'a>(
        &'a self,
        request: &'a HttpRequest,
        via_proxy: bool,
    ) -> BoxFuture<'a, Result<HttpResponse, NetError>> {
        self.requests.lock().unwrap().push((request.url.to_string(), via_proxy));
        Box::pin(async {
            let body = Bytes::from_static(b"over h1");
            Ok(HttpResponse::new(StatusCode::OK, Version::HTTP_11, HeaderMap::new(), body))
        })
    }
}

pub struct ScriptedPeer {
    io: DuplexStream,
    decoder: FrameDecoder,
    codec: HpackCodec,
    buf: BytesMut,
    seen_preface: bool,
    /// HEADERS frames received so far.
    pub headers_received: usize,
}

impl ScriptedPeer {
    pub fn new(io: DuplexStream) -> Self {
        Self {
            io,
            decoder: FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE),
            codec: HpackCodec::new(),
            buf: BytesMut::new(),
            seen_preface: false,
            headers_received: 0,
        }
    }

    /// Wait for the next connection and send our SETTINGS on it.
    pub async fn accept(
        rx: &mut mpsc::UnboundedReceiver<DuplexStream>,
        settings: &[(SettingsId, u32)],
    ) -> Self {
        let io = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no connection")
            .expect("connector dropped");
        let mut peer = Self::new(io);
        peer.send(Frame::Settings { ack: false, values: settings.to_vec() }).await;
        peer
    }

    /// Next frame from the client. Non-ack SETTINGS are acked on the way.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.seen_preface {
                if self.buf.len() >= CONNECTION_PREFACE.len() {
                    assert!(self.buf.starts_with(CONNECTION_PREFACE), "bad preface");
                    let _ = self.buf.split_to(CONNECTION_PREFACE.len());
                    self.seen_preface = true;
                    continue;
                }
            } else if let Some(frame) =
                self.decoder.decode(&mut self.buf).expect("client sent a bad frame")
            {
                if let Frame::Settings { ack: false, .. } = frame {
                    self.send(Frame::Settings { ack: true, values: Vec::new() }).await;
                }
                return Some(frame);
            }
            match self.io.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Skip frames until a complete request header block arrives.
    pub async fn expect_request(&mut self) -> (u32, HeaderBlock) {
        let mut partial: Option<(u32, BytesMut)> = None;
        loop {
            match self.next_frame().await.expect("connection closed while waiting for a request") {
                Frame::Headers { stream_id, block, end_headers, .. } => {
                    self.headers_received += 1;
                    if end_headers {
                        return (stream_id, self.codec.decode(&block).expect("bad header block"));
                    }
                    partial = Some((stream_id, BytesMut::from(&block[..])));
                }
                Frame::Continuation { block, end_headers, .. } => {
                    let (stream_id, mut buf) =
                        partial.take().expect("CONTINUATION without HEADERS");
                    buf.extend_from_slice(&block);
                    if end_headers {
                        return (stream_id, self.codec.decode(&buf).expect("bad header block"));
                    }
                    partial = Some((stream_id, buf));
                }
                _ => {}
            }
        }
    }

    /// Assert that no request shows up for `within`.
    pub async fn expect_no_request(&mut self, within: Duration) {
        let result = tokio::time::timeout(within, self.expect_request()).await;
        let unexpected = result.map(|(id, h)| (id, h.path().map(String::from)));
        assert!(unexpected.is_err(), "unexpected request: {:?}", unexpected);
    }

    /// Skip frames until one matches `pred`.
    pub async fn expect_frame<F: Fn(&Frame) -> bool>(&mut self, pred: F) -> Frame {
        loop {
            let frame =
                self.next_frame().await.expect("connection closed while waiting for a frame");
            if pred(&frame) {
                return frame;
            }
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        self.io.write_all(&frame.to_bytes()).await.expect("peer write failed");
    }

    fn encode(&mut self, headers: &[(&str, &str)]) -> Bytes {
        let mut block = HeaderBlock::new();
        for (name, value) in headers {
            block.append(name, value);
        }
        self.codec.encode(&block)
    }

    pub async fn send_headers(
        &mut self,
        stream_id: u32,
        headers: &[(&str, &str)],
        end_stream: bool,
    ) {
        let block = self.encode(headers);
        let mut out = BytesMut::new();
        encode_header_block(&mut out, stream_id, block, end_stream, None, DEFAULT_MAX_FRAME_SIZE);
        self.io.write_all(&out).await.expect("peer write failed");
    }

    pub async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        self.send(Frame::data(stream_id, Bytes::copy_from_slice(data), end_stream)).await;
    }

    /// A complete `200` response.
    pub async fn respond(&mut self, stream_id: u32, body: &[u8]) {
        self.send_headers(stream_id, &[(":status", "200")], false).await;
        self.send_data(stream_id, body, true).await;
    }

    pub async fn push_promise(
        &mut self,
        stream_id: u32,
        promised_id: u32,
        url_path: &str,
        extra: &[(&str, &str)],
    ) {
        let mut headers = vec![
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", url_path),
        ];
        headers.extend_from_slice(extra);
        let block = self.encode(&headers);
        self.send(Frame::PushPromise { stream_id, promised_id, block, end_headers: true }).await;
    }

    pub async fn reset(&mut self, stream_id: u32, error_code: ErrorCode) {
        self.send(Frame::RstStream { stream_id, error_code }).await;
    }

    pub async fn go_away(&mut self, last_stream_id: u32, error_code: ErrorCode) {
        self.send(Frame::GoAway { last_stream_id, error_code, debug_data: Bytes::new() }).await;
    }
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    for _ in 0..5000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
