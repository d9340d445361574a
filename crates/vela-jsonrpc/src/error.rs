use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 error codes defined by the protocol itself. Domain-specific
/// codes live with the API that defines them and share the same wire shape.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Wire-level error object: `{code, message, data?}`.
///
/// Well-known errors are kept as templates and specialised per call site with
/// [`ErrorObject::with_data`], which clones the template without mutating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Clone this template with an attached `data` payload. Values that fail
    /// to serialize are dropped rather than poisoning the response.
    pub fn with_data(&self, data: impl Serialize) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            data: serde_json::to_value(data).ok(),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(codes::INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found() -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "Method Not Found")
    }

    pub fn invalid_params() -> Self {
        Self::new(codes::INVALID_PARAMS, "Invalid Params")
    }

    pub fn internal_error() -> Self {
        Self::new(codes::INTERNAL_ERROR, "Internal error")
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorObject {}
