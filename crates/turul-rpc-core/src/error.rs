use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{JsonRpcVersion, RequestId};

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError(i64), // -32099 to -32000
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => crate::error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => crate::error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => crate::error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => crate::error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => crate::error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::ServerError(_) => "Server error",
        }
    }

    /// Map a wire code back onto the taxonomy.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            crate::error_codes::PARSE_ERROR => Some(JsonRpcErrorCode::ParseError),
            crate::error_codes::INVALID_REQUEST => Some(JsonRpcErrorCode::InvalidRequest),
            crate::error_codes::METHOD_NOT_FOUND => Some(JsonRpcErrorCode::MethodNotFound),
            crate::error_codes::INVALID_PARAMS => Some(JsonRpcErrorCode::InvalidParams),
            crate::error_codes::INTERNAL_ERROR => Some(JsonRpcErrorCode::InternalError),
            c if (crate::error_codes::SERVER_ERROR_START..=crate::error_codes::SERVER_ERROR_END)
                .contains(&c) =>
            {
                Some(JsonRpcErrorCode::ServerError(c))
            }
            _ => None,
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// JSON-RPC Error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    /// Canonical message plus a detail string in `data`.
    pub fn with_detail(code: JsonRpcErrorCode, detail: impl Into<String>) -> Self {
        Self::new(code, None, Some(Value::String(detail.into())))
    }

    /// For applications that reject a well-formed call on their own terms.
    pub fn invalid_request(data: Option<Value>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, None, data)
    }

    pub fn method_not_found() -> Self {
        Self::new(JsonRpcErrorCode::MethodNotFound, None, None)
    }

    /// Application-defined error in the reserved server range.
    /// Returns `None` when `code` lies outside -32099..=-32000.
    pub fn server_error(code: i64, message: &str, data: Option<Value>) -> Option<Self> {
        if !(crate::error_codes::SERVER_ERROR_START..=crate::error_codes::SERVER_ERROR_END)
            .contains(&code)
        {
            return None;
        }
        Some(Self::new(
            JsonRpcErrorCode::ServerError(code),
            Some(message.to_string()),
            data,
        ))
    }

    pub fn kind(&self) -> Option<JsonRpcErrorCode> {
        JsonRpcErrorCode::from_code(self.code)
    }
}

/// JSON-RPC Error response
///
/// `id` is always serialized; an unknown id goes out as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub error: JsonRpcErrorObject,
    pub id: Option<RequestId>,
}

impl JsonRpcError {
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorObject) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            error,
            id,
        }
    }

    pub fn parse_error(id: Option<RequestId>, detail: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorObject::with_detail(JsonRpcErrorCode::ParseError, detail),
        )
    }

    pub fn method_not_found(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorObject::method_not_found())
    }

    pub fn internal_error(id: Option<RequestId>, detail: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorObject::with_detail(JsonRpcErrorCode::InternalError, detail),
        )
    }

    pub fn code(&self) -> i64 {
        self.error.code
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JSON-RPC Error {}: {}",
            self.error.code, self.error.message
        )
    }
}

impl std::error::Error for JsonRpcError {}
