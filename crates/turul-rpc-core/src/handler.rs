//! Binding strongly-typed functions to the uniform method callback.
//!
//! Any `Fn(A1, .., An) -> R` with `Ai: DeserializeOwned` and `R: MethodOutput`
//! is a [`Handler`]. [`into_callback`] erases it into a [`MethodCallback`] once,
//! at registration time.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{JsonRpcErrorCode, JsonRpcErrorObject};
use crate::params::FromParams;
use crate::response::JsonRpcMessage;
use crate::types::RequestId;

/// Type-erased method: raw params and the echoed id in, envelope out.
pub type MethodCallback =
    Arc<dyn Fn(Option<&Value>, Option<RequestId>) -> JsonRpcMessage + Send + Sync>;

/// Wrapper for returning any `Serialize` type from a method.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

/// Values a method may return.
///
/// `Err` values of a `Result` are reported as `InternalError` with the error
/// text in `data`.
pub trait MethodOutput {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject>;
}

fn serialize_result<T: Serialize + ?Sized>(value: &T) -> Result<Value, JsonRpcErrorObject> {
    serde_json::to_value(value).map_err(|e| {
        JsonRpcErrorObject::with_detail(
            JsonRpcErrorCode::InternalError,
            format!("failed to serialize result: {}", e),
        )
    })
}

macro_rules! impl_serialize_output {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MethodOutput for $ty {
                fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
                    serialize_result(&self)
                }
            }
        )*
    };
}

impl_serialize_output!(
    bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, char,
    String, &'static str, (),
);

impl MethodOutput for Value {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        Ok(self)
    }
}

impl<T: Serialize> MethodOutput for Json<T> {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        serialize_result(&self.0)
    }
}

impl<T: Serialize> MethodOutput for Vec<T> {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        serialize_result(&self)
    }
}

impl<T: Serialize> MethodOutput for Option<T> {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        serialize_result(&self)
    }
}

impl<T: Serialize> MethodOutput for HashMap<String, T> {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        serialize_result(&self)
    }
}

impl<T: Serialize> MethodOutput for BTreeMap<String, T> {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        serialize_result(&self)
    }
}

impl<T: Serialize, E: Display> MethodOutput for Result<T, E> {
    fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        match self {
            Ok(value) => serialize_result(&value),
            Err(e) => Err(JsonRpcErrorObject::with_detail(
                JsonRpcErrorCode::InternalError,
                e.to_string(),
            )),
        }
    }
}

/// A function that can serve a JSON-RPC method.
///
/// `Args` is the positional argument tuple; it only exists to let one closure
/// type implement the trait for exactly one arity.
pub trait Handler<Args>: Send + Sync + 'static {
    fn invoke(&self, params: Option<&Value>) -> Result<Value, JsonRpcErrorObject>;
}

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        #[allow(non_snake_case)]
        impl<F, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: MethodOutput,
            $($ty: DeserializeOwned,)*
        {
            fn invoke(&self, params: Option<&Value>) -> Result<Value, JsonRpcErrorObject> {
                let ($($ty,)*) = <($($ty,)*) as FromParams>::bind(params)
                    .map_err(|e| e.to_error_object())?;
                (self)($($ty),*).into_result()
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "method panicked".to_string()
    }
}

/// Erase a typed handler into the uniform callback.
///
/// The whole invocation, binding included, runs under `catch_unwind`; a panic
/// becomes an `InternalError` envelope instead of unwinding into the transport.
pub fn into_callback<H, Args>(handler: H) -> MethodCallback
where
    H: Handler<Args>,
    Args: 'static,
{
    Arc::new(move |params: Option<&Value>, id: Option<RequestId>| {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(params)));
        match outcome {
            Ok(Ok(result)) => JsonRpcMessage::success(id, result),
            Ok(Err(error)) => JsonRpcMessage::error(id, error),
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                warn!(detail = %detail, "method panicked");
                JsonRpcMessage::error(
                    id,
                    JsonRpcErrorObject::with_detail(JsonRpcErrorCode::InternalError, detail),
                )
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call<H, Args>(handler: H, params: Option<Value>) -> JsonRpcMessage
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let callback = into_callback(handler);
        callback(params.as_ref(), Some(RequestId::from(1i64)))
    }

    fn error_code(message: &JsonRpcMessage) -> Option<i64> {
        message.error_object().map(|e| e.code)
    }

    #[test]
    fn test_binds_typed_function() {
        let message = call(|a: i64, b: i64| a + b, Some(json!([1, 2])));
        assert_eq!(message.result(), Some(&json!(3)));
        assert_eq!(message.id(), Some(&RequestId::from(1i64)));
    }

    #[test]
    fn test_zero_argument_function_ignores_params() {
        let message = call(|| 42u32, Some(json!(["ignored"])));
        assert_eq!(message.result(), Some(&json!(42)));

        let message = call(|| "pong", None);
        assert_eq!(message.result(), Some(&json!("pong")));
    }

    #[test]
    fn test_missing_params_for_required_arguments() {
        let message = call(|a: i64| a, None);
        assert_eq!(error_code(&message), Some(-32602));
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        let message = call(|a: i64, b: i64| a * b, Some(json!([1, {"b": 2}])));
        assert_eq!(error_code(&message), Some(-32700));
    }

    #[test]
    fn test_application_error_is_internal_error() {
        let message = call(
            |name: String| -> Result<String, String> {
                if name.len() < 4 {
                    Err("Name is too short".to_string())
                } else {
                    Ok(name)
                }
            },
            Some(json!(["bob"])),
        );
        let error = message.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.data, Some(json!("Name is too short")));
    }

    #[test]
    fn test_panicking_method_is_internal_error() {
        let message = call(
            |divisor: i64| -> i64 {
                if divisor == 0 {
                    panic!("division by zero");
                }
                100 / divisor
            },
            Some(json!([0])),
        );
        let error = message.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.data, Some(json!("division by zero")));
    }

    #[test]
    fn test_struct_results_through_json_wrapper() {
        #[derive(Serialize, serde::Deserialize)]
        struct User {
            id: String,
            name: String,
        }

        let message = call(
            |mut user: User| {
                user.id = "1000000".to_string();
                Json(user)
            },
            Some(json!([{"id": "", "name": "alice"}])),
        );
        assert_eq!(
            message.result(),
            Some(&json!({"id": "1000000", "name": "alice"}))
        );
    }

    #[test]
    fn test_unit_result_is_null() {
        let message = call(|_flag: bool| (), Some(json!([true])));
        assert_eq!(message.result(), Some(&Value::Null));
    }
}
