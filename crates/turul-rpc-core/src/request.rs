use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::JsonRpcError;
use crate::types::{JsonRpcVersion, RequestId};

/// A JSON-RPC request that expects a response.
///
/// `id` is `None` when the caller sent an explicit `"id": null`; the response
/// then echoes `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    pub fn new(id: Option<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
            id,
        }
    }

    /// Create a new request with positional parameters
    pub fn with_array_params(id: RequestId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(Some(id), method, Some(Value::Array(params)))
    }

    /// Get a parameter by position
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.as_ref()?.as_array()?.get(index)
    }
}

/// A JSON-RPC notification (request without an id)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Get the method name
    pub fn method(&self) -> &str {
        match self {
            IncomingMessage::Request(req) => &req.method,
            IncomingMessage::Notification(notif) => &notif.method,
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, IncomingMessage::Notification(_))
    }

    /// Get the request ID if this is a request with a non-null id
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            IncomingMessage::Request(req) => req.id.as_ref(),
            IncomingMessage::Notification(_) => None,
        }
    }
}

enum IdMember {
    Absent,
    Null,
    Present(RequestId),
}

impl IdMember {
    fn extract(obj: &mut Map<String, Value>) -> Result<Self, JsonRpcError> {
        match obj.remove("id") {
            None => Ok(IdMember::Absent),
            Some(Value::Null) => Ok(IdMember::Null),
            Some(value) => RequestId::from_value(&value)
                .map(IdMember::Present)
                .ok_or_else(|| {
                    JsonRpcError::parse_error(None, "id must be a number, a string or null")
                }),
        }
    }

    fn known(&self) -> Option<RequestId> {
        match self {
            IdMember::Present(id) => Some(id.clone()),
            _ => None,
        }
    }
}

/// Parse a request body into a JSON-RPC message.
///
/// Only the envelope is inspected here; `params` stays raw JSON until a handler
/// binds it. Every failure is a `ParseError` carrying the best-known id.
pub fn parse_message(body: &[u8]) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| JsonRpcError::parse_error(None, e.to_string()))?;
    parse_value(value)
}

/// Same as [`parse_message`] for an already decoded JSON value.
pub fn parse_value(value: Value) -> Result<IncomingMessage, JsonRpcError> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => {
            return Err(JsonRpcError::parse_error(None, "batch requests are not supported"));
        }
        _ => return Err(JsonRpcError::parse_error(None, "request must be a JSON object")),
    };

    let id = IdMember::extract(&mut obj)?;

    match obj.get("jsonrpc") {
        None => {}
        Some(Value::String(v)) if v == JsonRpcVersion::V2_0.as_str() => {}
        Some(other) => {
            return Err(JsonRpcError::parse_error(
                id.known(),
                format!("unsupported jsonrpc version: {}", other),
            ));
        }
    }

    let method = match obj.remove("method") {
        Some(Value::String(method)) => method,
        Some(_) => {
            return Err(JsonRpcError::parse_error(id.known(), "method must be a string"));
        }
        None => return Err(JsonRpcError::parse_error(id.known(), "missing method")),
    };

    let params = match obj.remove("params") {
        None | Some(Value::Null) => None,
        Some(params) => Some(params),
    };

    Ok(match id {
        IdMember::Absent => IncomingMessage::Notification(JsonRpcNotification::new(method, params)),
        IdMember::Null => IncomingMessage::Request(JsonRpcRequest::new(None, method, params)),
        IdMember::Present(id) => {
            IncomingMessage::Request(JsonRpcRequest::new(Some(id), method, params))
        }
    })
}
