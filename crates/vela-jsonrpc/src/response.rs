use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorObject;
use crate::request::RequestId;

/// A response envelope. Exactly one of `result` / `error` is present; the id
/// mirrors the request, or is `null` for parse and invalid-request failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    pub id: RequestId,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: crate::request::VERSION.to_owned(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: RequestId, error: ErrorObject) -> Self {
        Self {
            jsonrpc: crate::request::VERSION.to_owned(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
