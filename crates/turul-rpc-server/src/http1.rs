//! Minimal HTTP/1.1 framing: request heads in, responses out.
//!
//! Bodies are framed by `Content-Length` only. Request heads are parsed with
//! `httparse` straight out of the session's receive buffer; responses are
//! encoded into a caller-owned `Vec` that is reused across requests.

use http::{Method, StatusCode, Version};
use thiserror::Error;

/// Upper bound on request headers we are willing to look at
pub const MAX_HEADERS: usize = 64;

/// Interim response for `Expect: 100-continue`
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Why a request could not be framed. Each maps to the status sent before
/// the connection is closed.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("invalid request method")]
    InvalidMethod,

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    #[error("Transfer-Encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("request body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },
}

impl FramingError {
    pub fn status(&self) -> StatusCode {
        match self {
            FramingError::Malformed(_)
            | FramingError::InvalidMethod
            | FramingError::InvalidContentLength => StatusCode::BAD_REQUEST,
            FramingError::UnsupportedTransferEncoding => StatusCode::NOT_IMPLEMENTED,
            FramingError::HeadTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            FramingError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Everything the session needs from a request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Request target without the query string
    pub path: String,
    pub version: Version,
    /// Bytes taken by the request line and headers, terminator included
    pub head_len: usize,
    pub content_length: usize,
    pub keep_alive: bool,
    pub expect_continue: bool,
}

impl RequestHead {
    /// Total size of head plus body in the receive buffer
    pub fn message_len(&self) -> usize {
        self.head_len + self.content_length
    }
}

/// Try to parse a request head from the front of `buf`.
///
/// `Ok(None)` means the head is not complete yet.
pub fn parse_head(buf: &[u8], max_head: usize) -> Result<Option<RequestHead>, FramingError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial if buf.len() > max_head => {
            return Err(FramingError::HeadTooLarge { limit: max_head });
        }
        httparse::Status::Partial => return Ok(None),
    };
    if head_len > max_head {
        return Err(FramingError::HeadTooLarge { limit: max_head });
    }

    let method = req
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(FramingError::InvalidMethod)?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let path = req
        .path
        .map(|p| p.split('?').next().unwrap_or(p))
        .unwrap_or("/")
        .to_string();

    let mut content_length: Option<usize> = None;
    let mut close = false;
    let mut keep_alive_token = false;
    let mut expect_continue = false;

    for header in req.headers.iter() {
        let name = header.name;
        if name.eq_ignore_ascii_case("content-length") {
            // 1*DIGIT only; `parse` alone would take a leading `+`
            let digits = header.value.trim_ascii();
            if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
                return Err(FramingError::InvalidContentLength);
            }
            let value = std::str::from_utf8(digits)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or(FramingError::InvalidContentLength)?;
            // repeated headers must agree
            if content_length.is_some_and(|existing| existing != value) {
                return Err(FramingError::InvalidContentLength);
            }
            content_length = Some(value);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(FramingError::UnsupportedTransferEncoding);
        } else if name.eq_ignore_ascii_case("connection") {
            for token in header.value.split(|b| *b == b',') {
                let token = token.trim_ascii();
                if token.eq_ignore_ascii_case(b"close") {
                    close = true;
                } else if token.eq_ignore_ascii_case(b"keep-alive") {
                    keep_alive_token = true;
                }
            }
        } else if name.eq_ignore_ascii_case("expect") {
            expect_continue = header.value.trim_ascii().eq_ignore_ascii_case(b"100-continue");
        }
    }

    let keep_alive = if version == Version::HTTP_10 {
        keep_alive_token && !close
    } else {
        !close
    };

    Ok(Some(RequestHead {
        method,
        path,
        version,
        head_len,
        content_length: content_length.unwrap_or(0),
        keep_alive,
        expect_continue,
    }))
}

/// Response metadata; the body is passed separately to [`encode_response`]
#[derive(Debug, Clone, Copy)]
pub struct ResponseHead<'a> {
    pub status: StatusCode,
    pub content_type: Option<&'a str>,
    pub keep_alive: bool,
    pub server: &'a str,
    /// Value of an `Allow` header, sent with 405 responses
    pub allow: Option<&'a str>,
}

/// Encode a complete response into `out`, replacing its previous contents.
pub fn encode_response(out: &mut Vec<u8>, head: &ResponseHead<'_>, body: &[u8]) {
    out.clear();
    out.reserve(128 + body.len());

    push_all(out, &["HTTP/1.1 ", head.status.as_str(), " "]);
    out.extend_from_slice(head.status.canonical_reason().unwrap_or("Unknown").as_bytes());
    out.extend_from_slice(b"\r\n");

    push_header(out, "Server", head.server);
    if let Some(content_type) = head.content_type {
        push_header(out, "Content-Type", content_type);
    }
    push_header(out, "Content-Length", &body.len().to_string());
    if let Some(allow) = head.allow {
        push_header(out, "Allow", allow);
    }
    push_header(
        out,
        "Connection",
        if head.keep_alive { "keep-alive" } else { "close" },
    );

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    push_all(out, &[name, ": ", value, "\r\n"]);
}

fn push_all(out: &mut Vec<u8>, parts: &[&str]) {
    for part in parts {
        out.extend_from_slice(part.as_bytes());
    }
}
