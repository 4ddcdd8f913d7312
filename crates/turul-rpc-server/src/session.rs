//! Per-connection HTTP session.
//!
//! A session owns its stream and buffers and runs on a single task, so the
//! only state shared with other connections is the read-only config and
//! dispatcher held by [`ConnectionContext`].

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use http::{Method, StatusCode};
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};
use turul_rpc_core::{JsonRpcDispatcher, JsonRpcError, JsonRpcMessage, Processed};

use crate::config::ServerConfig;
use crate::http1::{self, FramingError, RequestHead, ResponseHead};
use crate::stream::ByteStream;

/// Read-ahead reserved before each read
const READ_CHUNK: usize = 8 * 1024;

/// Shared, read-only state handed to every connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub dispatcher: Arc<JsonRpcDispatcher>,
}

impl ConnectionContext {
    pub fn new(config: Arc<ServerConfig>, dispatcher: Arc<JsonRpcDispatcher>) -> Self {
        Self { config, dispatcher }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Reading,
    Dispatching,
    Writing,
    Closing,
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side between (or in the middle of) requests
    PeerClosed,
    /// No bytes arrived, or a write stalled, for longer than the idle timeout
    IdleTimeout,
    /// The last request asked for the connection to close
    ConnectionClose,
    /// The request could not be framed; an error status was sent
    ProtocolError,
    /// The stream failed
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Requests answered (notifications included)
    pub requests: usize,
    pub close: CloseReason,
}

/// What to send back for one request; the body lives in the session's
/// output buffer.
#[derive(Debug, Clone, Copy)]
struct Reply {
    status: StatusCode,
    content_type: Option<&'static str>,
    allow: Option<&'static str>,
}

impl Reply {
    fn json(status: StatusCode) -> Self {
        Self {
            status,
            content_type: Some(http1::CONTENT_TYPE_JSON),
            allow: None,
        }
    }

    fn text(status: StatusCode) -> Self {
        Self {
            status,
            content_type: Some(http1::CONTENT_TYPE_TEXT),
            allow: None,
        }
    }

    fn empty(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            allow: None,
        }
    }
}

enum ReadOutcome {
    Request(RequestHead),
    Closed(CloseReason),
    Rejected(FramingError),
}

/// HTTP/1.1 keep-alive loop over one [`ByteStream`]
pub struct Session<S> {
    stream: S,
    ctx: ConnectionContext,
    peer: SocketAddr,
    state: SessionState,
    /// Unconsumed request bytes, pipelined requests included
    recv: BytesMut,
    /// Response body, reused across requests
    body: Vec<u8>,
    /// Encoded response, reused across requests
    send: Vec<u8>,
    requests: usize,
}

impl<S: ByteStream> Session<S> {
    /// `buffered` holds bytes already read from the stream (e.g. while sniffing
    /// for TLS); they are treated as the start of the first request.
    pub fn new(stream: S, ctx: ConnectionContext, peer: SocketAddr, buffered: BytesMut) -> Self {
        Self {
            stream,
            ctx,
            peer,
            state: SessionState::Reading,
            recv: buffered,
            body: Vec::new(),
            send: Vec::new(),
            requests: 0,
        }
    }

    /// Serve requests until the connection ends, then close it gracefully
    pub async fn run(mut self) -> SessionSummary {
        debug!(
            peer = %self.peer,
            transport = %self.stream.transport(),
            "Session started"
        );

        let close = self.serve().await;
        self.close().await;

        let summary = SessionSummary {
            requests: self.requests,
            close,
        };
        debug!(
            peer = %self.peer,
            transport = %self.stream.transport(),
            requests = summary.requests,
            reason = ?summary.close,
            "Session closed"
        );
        summary
    }

    fn transition(&mut self, next: SessionState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            self.transition(SessionState::Reading);
            let head = match self.read_request().await {
                ReadOutcome::Request(head) => head,
                ReadOutcome::Closed(reason) => return reason,
                ReadOutcome::Rejected(err) => {
                    warn!(peer = %self.peer, error = %err, "Rejecting request");
                    self.transition(SessionState::Writing);
                    self.body.clear();
                    self.body.extend_from_slice(err.to_string().as_bytes());
                    return match self.write_reply(Reply::text(err.status()), false).await {
                        Ok(()) => CloseReason::ProtocolError,
                        Err(reason) => reason,
                    };
                }
            };

            self.transition(SessionState::Dispatching);
            let reply = self.dispatch(&head);

            self.transition(SessionState::Writing);
            if let Err(reason) = self.write_reply(reply, head.keep_alive).await {
                return reason;
            }

            self.recv.advance(head.message_len());
            self.requests += 1;

            if !head.keep_alive {
                return CloseReason::ConnectionClose;
            }
        }
    }

    /// Accumulate one complete request (head and body) in `recv`
    async fn read_request(&mut self) -> ReadOutcome {
        let max_header_size = self.ctx.config.max_header_size;
        let max_body_size = self.ctx.config.max_body_size;

        let head = loop {
            match http1::parse_head(&self.recv, max_header_size) {
                Ok(Some(head)) => break head,
                Ok(None) => {}
                Err(err) => return ReadOutcome::Rejected(err),
            }
            if let Err(reason) = self.fill().await {
                return ReadOutcome::Closed(reason);
            }
        };

        if head.content_length > max_body_size {
            return ReadOutcome::Rejected(FramingError::BodyTooLarge {
                size: head.content_length,
                limit: max_body_size,
            });
        }

        if head.expect_continue && self.recv.len() < head.message_len() {
            trace!(peer = %self.peer, "Sending 100 Continue");
            if let Err(reason) = self.write_timed(http1::CONTINUE).await {
                return ReadOutcome::Closed(reason);
            }
        }

        while self.recv.len() < head.message_len() {
            if let Err(reason) = self.fill().await {
                return ReadOutcome::Closed(reason);
            }
        }

        trace!(
            peer = %self.peer,
            method = %head.method,
            path = %head.path,
            content_length = head.content_length,
            "Request received"
        );
        ReadOutcome::Request(head)
    }

    /// One read into `recv`, bounded by the idle timeout
    async fn fill(&mut self) -> Result<(), CloseReason> {
        self.recv.reserve(READ_CHUNK);
        match timeout(self.ctx.config.idle_timeout, self.stream.read(&mut self.recv)).await {
            Err(_) => {
                debug!(peer = %self.peer, "Idle timeout while reading");
                Err(CloseReason::IdleTimeout)
            }
            Ok(Err(e)) => {
                debug!(peer = %self.peer, error = %e, "Read failed");
                Err(CloseReason::Io)
            }
            Ok(Ok(0)) => {
                if !self.recv.is_empty() {
                    debug!(
                        peer = %self.peer,
                        pending = self.recv.len(),
                        "Peer closed mid-request"
                    );
                }
                Err(CloseReason::PeerClosed)
            }
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Route the request and leave the response body in `self.body`
    fn dispatch(&mut self, head: &RequestHead) -> Reply {
        self.body.clear();

        if head.path != self.ctx.config.rpc_path {
            debug!(peer = %self.peer, path = %head.path, "No route");
            self.body.extend_from_slice(b"Not Found");
            return Reply::text(StatusCode::NOT_FOUND);
        }
        if head.method != Method::POST {
            debug!(peer = %self.peer, method = %head.method, "Method not allowed");
            return Reply {
                allow: Some("POST"),
                ..Reply::empty(StatusCode::METHOD_NOT_ALLOWED)
            };
        }

        let request = &self.recv[head.head_len..head.message_len()];
        let dispatcher = &self.ctx.dispatcher;
        let out = &mut self.body;
        let processed = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.process(request, out)));

        match processed {
            Ok(Processed::Reply) => Reply::json(StatusCode::OK),
            Ok(Processed::Notification) => Reply::empty(StatusCode::NO_CONTENT),
            Ok(Processed::Rejected) => Reply::json(StatusCode::BAD_REQUEST),
            Err(_) => {
                error!(peer = %self.peer, "Dispatcher panicked");
                let message: JsonRpcMessage =
                    JsonRpcError::internal_error(None, "request processing failed").into();
                if message.write_to(&mut self.body).is_err() {
                    self.body.clear();
                }
                Reply::json(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn write_reply(&mut self, reply: Reply, keep_alive: bool) -> Result<(), CloseReason> {
        let head = ResponseHead {
            status: reply.status,
            content_type: reply.content_type,
            keep_alive,
            server: &self.ctx.config.server_name,
            allow: reply.allow,
        };
        http1::encode_response(&mut self.send, &head, &self.body);

        trace!(
            peer = %self.peer,
            status = reply.status.as_u16(),
            bytes = self.send.len(),
            "Writing response"
        );
        let send = std::mem::take(&mut self.send);
        let written = self.write_timed(&send).await;
        self.send = send;
        written
    }

    async fn write_timed(&mut self, data: &[u8]) -> Result<(), CloseReason> {
        match timeout(self.ctx.config.idle_timeout, self.stream.write_all(data)).await {
            Err(_) => {
                debug!(peer = %self.peer, "Idle timeout while writing");
                Err(CloseReason::IdleTimeout)
            }
            Ok(Err(e)) => {
                debug!(peer = %self.peer, error = %e, "Write failed");
                Err(CloseReason::Io)
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.transition(SessionState::Closing);
        match timeout(self.ctx.config.idle_timeout, self.stream.shutdown()).await {
            Err(_) => debug!(peer = %self.peer, "Idle timeout during shutdown"),
            Ok(Err(e)) => trace!(peer = %self.peer, error = %e, "Shutdown failed"),
            Ok(Ok(())) => {}
        }
        self.transition(SessionState::Closed);
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("buffered", &self.recv.len())
            .field("requests", &self.requests)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::PlainStream;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use turul_rpc_core::{MethodCallback, RequestId};

    fn context(dispatcher: JsonRpcDispatcher) -> ConnectionContext {
        let config = ServerConfig {
            server_name: "test".to_string(),
            ..Default::default()
        };
        ConnectionContext::new(Arc::new(config), Arc::new(dispatcher))
    }

    fn calculator() -> JsonRpcDispatcher {
        JsonRpcDispatcher::new()
            .with_method("add", |a: i64, b: i64| a + b)
            .with_method("mul", |a: i64, b: i64| a * b)
    }

    fn spawn_session(
        ctx: ConnectionContext,
    ) -> (DuplexStream, tokio::task::JoinHandle<SessionSummary>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let session = Session::new(PlainStream::new(server), ctx, peer, BytesMut::new());
        (client, tokio::spawn(session.run()))
    }

    fn post(body: &str, connection: &str) -> String {
        format!(
            "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: {}\r\n\r\n{}",
            body.len(),
            connection,
            body
        )
    }

    async fn exchange(ctx: ConnectionContext, raw: &[u8]) -> (String, SessionSummary) {
        let (mut client, handle) = spawn_session(ctx);
        client.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        (String::from_utf8(out).unwrap(), handle.await.unwrap())
    }

    #[tokio::test]
    async fn test_single_request_with_connection_close() {
        let raw = post(r#"{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1}"#, "close");
        let (response, summary) = exchange(context(calculator()), raw.as_bytes()).await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/json\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\n{\"jsonrpc\":\"2.0\",\"result\":3,\"id\":1}"));
        assert_eq!(
            summary,
            SessionSummary {
                requests: 1,
                close: CloseReason::ConnectionClose
            }
        );
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let mut raw = post(r#"{"method":"add","params":[1,2],"id":1}"#, "keep-alive");
        raw.push_str(&post(r#"{"method":"mul","params":[45,22],"id":2}"#, "close"));

        let (response, summary) = exchange(context(calculator()), raw.as_bytes()).await;
        let first = response.find(r#""result":3,"id":1"#).unwrap();
        let second = response.find(r#""result":990,"id":2"#).unwrap();
        assert!(first < second);
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.close, CloseReason::ConnectionClose);
    }

    #[tokio::test]
    async fn test_keep_alive_until_peer_closes() {
        let (mut client, handle) = spawn_session(context(calculator()));
        for id in 1..=3 {
            let body = format!(r#"{{"method":"add","params":[{id},{id}],"id":{id}}}"#);
            client.write_all(post(&body, "keep-alive").as_bytes()).await.unwrap();

            let mut buf = vec![0u8; 4096];
            let n = client.read(&mut buf).await.unwrap();
            let text = std::str::from_utf8(&buf[..n]).unwrap();
            assert!(text.contains(&format!(r#""result":{},"id":{}"#, id * 2, id)));
            assert!(text.contains("Connection: keep-alive\r\n"));
        }
        client.shutdown().await.unwrap();

        let summary = handle.await.unwrap();
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.close, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_notification_gets_no_content() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let dispatcher = JsonRpcDispatcher::new().with_method("inc_count", move || {
            counter.fetch_add(1, Ordering::SeqCst)
        });

        let raw = post(r#"{"jsonrpc":"2.0","method":"inc_count"}"#, "close");
        let (response, _) = exchange(context(dispatcher), raw.as_bytes()).await;

        assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(response.contains("Content-Length: 0\r\n"));
        assert!(!response.contains("Content-Type"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let raw = post(r#"{"method":"add""#, "close");
        let (response, _) = exchange(context(calculator()), raw.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains(r#""code":-32700"#));
        assert!(response.contains(r#""id":null"#));
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let raw = b"POST /other HTTP/1.1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let (response, _) = exchange(context(calculator()), raw).await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));

        let raw = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let (response, _) = exchange(context(calculator()), raw).await;
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(response.contains("Allow: POST\r\n"));
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n";
        let (response, summary) = exchange(context(calculator()), raw).await;
        assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert_eq!(summary.close, CloseReason::ProtocolError);
        assert_eq!(summary.requests, 0);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_reading() {
        let config = ServerConfig {
            max_body_size: 8,
            ..Default::default()
        };
        let ctx = ConnectionContext::new(Arc::new(config), Arc::new(calculator()));
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 1000\r\n\r\n";
        let (response, summary) = exchange(ctx, raw).await;
        assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert_eq!(summary.close, CloseReason::ProtocolError);
    }

    #[tokio::test]
    async fn test_expect_continue() {
        let (mut client, handle) = spawn_session(context(calculator()));
        let body = r#"{"method":"add","params":[2,3],"id":7}"#;
        let head = format!(
            "POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        client.write_all(head.as_bytes()).await.unwrap();

        let mut interim = vec![0u8; http1::CONTINUE.len()];
        client.read_exact(&mut interim).await.unwrap();
        assert_eq!(interim, http1::CONTINUE);

        client.write_all(body.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains(r#""result":5,"id":7"#));
        assert_eq!(handle.await.unwrap().requests, 1);
    }

    #[tokio::test]
    async fn test_buffered_bytes_start_the_first_request() {
        let (mut client, server) = tokio::io::duplex(4096);
        let raw = post(r#"{"method":"mul","params":[3,4],"id":1}"#, "close");
        let (already_read, rest) = raw.as_bytes().split_at(10);

        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let session = Session::new(
            PlainStream::new(server),
            context(calculator()),
            peer,
            BytesMut::from(already_read),
        );
        let handle = tokio::spawn(session.run());

        client.write_all(rest).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains(r#""result":12"#));
        assert_eq!(handle.await.unwrap().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_silent_connection() {
        let (mut client, handle) = spawn_session(context(calculator()));

        let summary = handle.await.unwrap();
        assert_eq!(summary.close, CloseReason::IdleTimeout);
        assert_eq!(summary.requests, 0);

        let mut out = Vec::new();
        assert_eq!(client.read_to_end(&mut out).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_after_partial_request() {
        let config = ServerConfig {
            idle_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let ctx = ConnectionContext::new(Arc::new(config), Arc::new(calculator()));
        let (mut client, handle) = spawn_session(ctx);
        client.write_all(b"POST / HTTP/1.1\r\nContent-Le").await.unwrap();

        let summary = handle.await.unwrap();
        assert_eq!(summary.close, CloseReason::IdleTimeout);
    }

    #[tokio::test]
    async fn test_escaped_panic_is_http_500() {
        // raw callbacks bypass the typed adapter and its panic guard
        let mut dispatcher = calculator();
        let raw: MethodCallback = Arc::new(
            |_params: Option<&Value>, _id: Option<RequestId>| -> JsonRpcMessage {
                panic!("raw callback exploded")
            },
        );
        dispatcher.add_callback("raw", raw);

        let raw = post(r#"{"method":"raw","id":1}"#, "keep-alive");
        let (mut client, handle) = spawn_session(context(dispatcher));
        client.write_all(raw.as_bytes()).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        let response = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.contains(r#""code":-32603"#));
        assert!(response.contains(r#""id":null"#));

        // the connection survives and keeps serving
        client
            .write_all(post(r#"{"method":"add","params":[1,1],"id":2}"#, "close").as_bytes())
            .await
            .unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains(r#""result":2,"id":2"#));
        assert_eq!(handle.await.unwrap().requests, 2);
    }
}
