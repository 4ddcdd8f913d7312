use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error, trace};

use crate::error::JsonRpcError;
use crate::handler::{Handler, MethodCallback, into_callback};
use crate::request::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, parse_message};
use crate::response::JsonRpcMessage;
use crate::types::RequestId;

/// Written when an envelope cannot be serialized at all.
const INTERNAL_ERROR_FALLBACK: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#;

/// What [`JsonRpcDispatcher::process`] left in the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// A response envelope (result or error) to send back.
    Reply,
    /// The message was a notification; the buffer is empty and nothing is sent.
    Notification,
    /// The body was not a JSON-RPC request; the buffer holds a `ParseError` envelope.
    Rejected,
}

/// Method registry: name to type-erased callback.
///
/// Registration takes `&mut self`, dispatch takes `&self`. Build the table
/// first, then share it (`Arc<JsonRpcDispatcher>`) with every connection.
#[derive(Default)]
pub struct JsonRpcDispatcher {
    methods: HashMap<String, MethodCallback>,
}

impl JsonRpcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed function under `name`, replacing any earlier entry.
    pub fn add_method<H, Args>(&mut self, name: impl Into<String>, handler: H)
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let name = name.into();
        if self.methods.insert(name.clone(), into_callback(handler)).is_some() {
            debug!(method = %name, "Replaced existing method");
        }
    }

    /// Register an already erased callback.
    pub fn add_callback(&mut self, name: impl Into<String>, callback: MethodCallback) {
        self.methods.insert(name.into(), callback);
    }

    /// Builder-style [`add_method`](Self::add_method).
    pub fn with_method<H, Args>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_method(name, handler);
        self
    }

    /// Invoke `method` and return the typed envelope.
    pub fn call(&self, method: &str, params: Option<&Value>, id: Option<RequestId>) -> JsonRpcMessage {
        match self.methods.get(method) {
            Some(callback) => {
                trace!(method, "Dispatching");
                callback(params, id)
            }
            None => {
                debug!(method, "Method not found");
                JsonRpcError::method_not_found(id).into()
            }
        }
    }

    /// Invoke `method` and return the serialized envelope.
    pub fn dispatch(&self, method: &str, params: Option<&Value>, id: Option<&RequestId>) -> Vec<u8> {
        let mut out = Vec::new();
        self.dispatch_into(method, params, id, &mut out);
        out
    }

    /// Invoke `method` and serialize the envelope into `out`.
    ///
    /// `out` is truncated first; afterwards it holds exactly one envelope.
    pub fn dispatch_into(
        &self,
        method: &str,
        params: Option<&Value>,
        id: Option<&RequestId>,
        out: &mut Vec<u8>,
    ) {
        let message = self.call(method, params, id.cloned());
        write_message(&message, out);
    }

    pub fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        self.call(&request.method, request.params.as_ref(), request.id)
    }

    /// Run a notification for its side effects. Unknown methods are ignored.
    pub fn handle_notification(&self, notification: JsonRpcNotification) {
        match self.methods.get(&notification.method) {
            Some(callback) => {
                let message = callback(notification.params.as_ref(), None);
                if let Some(error) = message.error_object() {
                    debug!(
                        method = %notification.method,
                        code = error.code,
                        "Notification failed"
                    );
                }
            }
            None => {
                debug!(method = %notification.method, "Ignoring notification for unknown method");
            }
        }
    }

    /// Parse a request body, dispatch it and serialize the outcome into `out`.
    pub fn process(&self, body: &[u8], out: &mut Vec<u8>) -> Processed {
        out.clear();
        match parse_message(body) {
            Ok(IncomingMessage::Request(request)) => {
                let message = self.handle_request(request);
                write_message(&message, out);
                Processed::Reply
            }
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(notification);
                Processed::Notification
            }
            Err(rejection) => {
                debug!(error = %rejection, "Rejected request body");
                write_message(&JsonRpcMessage::Error(rejection), out);
                Processed::Rejected
            }
        }
    }
}

impl std::fmt::Debug for JsonRpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcDispatcher")
            .field("methods", &self.methods.len())
            .finish()
    }
}

fn write_message(message: &JsonRpcMessage, out: &mut Vec<u8>) {
    if let Err(e) = message.write_to(out) {
        error!(error = %e, "Failed to serialize JSON-RPC envelope");
        out.clear();
        out.extend_from_slice(INTERNAL_ERROR_FALLBACK);
    }
}
