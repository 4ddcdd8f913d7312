//! Shared helpers for transport tests: a calculator server on an ephemeral
//! port and a tiny HTTP/1.1 client.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};
use turul_rpc_server::{JsonRpcServer, TlsConfig};

pub struct TestServer {
    pub addr: SocketAddr,
    pub counter: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

pub async fn start_server(tls: Option<TlsConfig>) -> TestServer {
    let counter = Arc::new(AtomicUsize::new(0));
    let inc = Arc::clone(&counter);

    let mut builder = JsonRpcServer::builder()
        .bind_address("127.0.0.1:0".parse().unwrap())
        .idle_timeout(Duration::from_secs(5))
        .server_name("turul-rpc-test")
        .method("add", |a: i64, b: i64| a + b)
        .method("mul", |a: i64, b: i64| a * b)
        .method("status", || "ok")
        .method("inc_count", move || inc.fetch_add(1, Ordering::SeqCst) + 1)
        .method("create_user", |name: String| -> Result<Value, String> {
            if name.len() < 4 {
                return Err("Name is too short".to_string());
            }
            Ok(json!({"id": "1000000", "name": name}))
        });
    if let Some(tls) = tls {
        builder = builder.tls(tls);
    }

    let server = builder.build().unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());

    TestServer { addr, counter }
}

pub fn post(path: &str, body: &str, connection: &str) -> Vec<u8> {
    format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: {}\r\n\r\n{}",
        path,
        body.len(),
        connection,
        body
    )
    .into_bytes()
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// Read one response; bytes past its end stay in `pending`.
pub async fn read_response<R>(stream: &mut R, pending: &mut Vec<u8>) -> HttpResponse
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        if let httparse::Status::Complete(head_len) = response.parse(pending).unwrap() {
            let status = response.code.unwrap();
            let fields: Vec<(String, String)> = response
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect();
            let content_length: usize = fields
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
                .map(|(_, v)| v.parse().unwrap())
                .unwrap_or(0);

            let total = head_len + content_length;
            if pending.len() >= total {
                let body = pending[head_len..total].to_vec();
                pending.drain(..total);
                return HttpResponse {
                    status,
                    headers: fields,
                    body,
                };
            }
        }

        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before a full response arrived");
        pending.extend_from_slice(&chunk[..n]);
    }
}

/// Drain the stream until the server closes it.
pub async fn read_to_close<R>(stream: &mut R) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut rest = Vec::new();
    // a reset after close is still a close
    let _ = stream.read_to_end(&mut rest).await;
    rest
}
