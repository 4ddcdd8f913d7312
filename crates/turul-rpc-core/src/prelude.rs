//! # JSON-RPC Engine Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use turul_rpc_core::prelude::*;
//! ```

pub use crate::dispatch::{JsonRpcDispatcher, Processed};
pub use crate::error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use crate::handler::{Handler, Json, MethodOutput};
pub use crate::request::{IncomingMessage, JsonRpcNotification, JsonRpcRequest};
pub use crate::response::{JsonRpcMessage, JsonRpcResponse};
pub use crate::types::{JsonRpcVersion, RequestId};

// Standard error codes
pub use crate::error_codes::*;
