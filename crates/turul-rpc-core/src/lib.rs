//! # JSON-RPC 2.0 Engine
//!
//! A transport-agnostic JSON-RPC 2.0 request processor: parse, validate,
//! invoke, marshal. Transports hand it a request body and write back whatever
//! bytes it produces.
//!
//! ## Features
//! - Strongly-typed methods bound to positional params at registration time
//! - Result/error envelopes that always carry `jsonrpc` and `id`
//! - Notifications executed for side effects with nothing to send back
//! - Application errors and panics converted to `InternalError`
//!
//! ```rust
//! use turul_rpc_core::JsonRpcDispatcher;
//!
//! let mut dispatcher = JsonRpcDispatcher::new();
//! dispatcher.add_method("add", |a: i64, b: i64| a + b);
//!
//! let mut out = Vec::new();
//! dispatcher.process(br#"{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1}"#, &mut out);
//! assert_eq!(out, br#"{"jsonrpc":"2.0","result":3,"id":1}"#);
//! ```

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod params;
pub mod prelude;
pub mod request;
pub mod response;
pub mod types;

// Re-export main types
pub use dispatch::{JsonRpcDispatcher, Processed};
pub use error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use handler::{Handler, Json, MethodCallback, MethodOutput, into_callback};
pub use params::{FromParams, ParamsError};
pub use request::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, parse_message, parse_value};
pub use response::{JsonRpcMessage, JsonRpcResponse};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
