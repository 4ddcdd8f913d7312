//! Positional parameter binding.
//!
//! A JSON `params` array is bound element by element onto a tuple of
//! [`DeserializeOwned`] types. Tuples of up to eight elements are supported.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::{JsonRpcErrorCode, JsonRpcErrorObject};

/// Why a `params` value could not be bound to an argument tuple.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("params are required")]
    Absent,

    #[error("missing parameter at position {0}")]
    Missing(usize),

    #[error("expected at most {expected} parameters, got {actual}")]
    TooMany { expected: usize, actual: usize },

    #[error("params must be a positional array")]
    NotPositional,

    #[error("parameter {index} is malformed: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl ParamsError {
    /// Arity problems are `InvalidParams`; anything structural is `ParseError`.
    pub fn code(&self) -> JsonRpcErrorCode {
        match self {
            ParamsError::Absent | ParamsError::Missing(_) | ParamsError::TooMany { .. } => {
                JsonRpcErrorCode::InvalidParams
            }
            ParamsError::NotPositional | ParamsError::Malformed { .. } => {
                JsonRpcErrorCode::ParseError
            }
        }
    }

    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject::with_detail(self.code(), self.to_string())
    }
}

/// An argument tuple that can be built from positional JSON params.
pub trait FromParams: Sized {
    /// Number of positional arguments.
    const ARITY: usize;

    fn from_params(params: &[Value]) -> Result<Self, ParamsError>;

    /// Bind the raw `params` member of a request.
    ///
    /// Zero-arity tuples accept anything, including absent params.
    fn bind(params: Option<&Value>) -> Result<Self, ParamsError> {
        if Self::ARITY == 0 {
            return Self::from_params(&[]);
        }
        match params {
            None => Err(ParamsError::Absent),
            Some(Value::Array(items)) => Self::from_params(items),
            Some(_) => Err(ParamsError::NotPositional),
        }
    }
}

/// Bind one position. A missing element only succeeds for types that accept
/// JSON `null`, such as `Option<T>`.
fn bind_position<T: DeserializeOwned>(params: &[Value], index: usize) -> Result<T, ParamsError> {
    match params.get(index) {
        Some(value) => {
            <T as Deserialize>::deserialize(value)
                .map_err(|source| ParamsError::Malformed { index, source })
        }
        None => <T as Deserialize>::deserialize(&Value::Null)
            .map_err(|_| ParamsError::Missing(index)),
    }
}

impl FromParams for () {
    const ARITY: usize = 0;

    fn from_params(_params: &[Value]) -> Result<Self, ParamsError> {
        Ok(())
    }
}

macro_rules! impl_from_params {
    ($arity:expr; $($ty:ident => $idx:tt),+) => {
        impl<$($ty),+> FromParams for ($($ty,)+)
        where
            $($ty: DeserializeOwned,)+
        {
            const ARITY: usize = $arity;

            fn from_params(params: &[Value]) -> Result<Self, ParamsError> {
                if params.len() > Self::ARITY {
                    return Err(ParamsError::TooMany {
                        expected: Self::ARITY,
                        actual: params.len(),
                    });
                }
                Ok(($(bind_position::<$ty>(params, $idx)?,)+))
            }
        }
    };
}

impl_from_params!(1; A1 => 0);
impl_from_params!(2; A1 => 0, A2 => 1);
impl_from_params!(3; A1 => 0, A2 => 1, A3 => 2);
impl_from_params!(4; A1 => 0, A2 => 1, A3 => 2, A4 => 3);
impl_from_params!(5; A1 => 0, A2 => 1, A3 => 2, A4 => 3, A5 => 4);
impl_from_params!(6; A1 => 0, A2 => 1, A3 => 2, A4 => 3, A5 => 4, A6 => 5);
impl_from_params!(7; A1 => 0, A2 => 1, A3 => 2, A4 => 3, A5 => 4, A6 => 5, A7 => 6);
impl_from_params!(8; A1 => 0, A2 => 1, A3 => 2, A4 => 3, A5 => 4, A6 => 5, A7 => 6, A8 => 7);
