use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Protocol version string expected in every envelope.
pub const VERSION: &str = "2.0";

/// Request identifier. The JSON-RPC spec permits numbers, strings and an
/// explicit `null`; an *absent* id is modelled as `None` on [`Request::id`]
/// and marks the request as a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Null,
    Number(i64),
    String(String),
}

/// Request parameters: positional array or named object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::Array(values) => values.is_empty(),
            Params::Object(map) => map.is_empty(),
        }
    }
}

/// A decoded request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Params>,
    #[serde(default, deserialize_with = "id_or_explicit_null")]
    pub id: Option<RequestId>,
}

impl Request {
    /// A request without an id is a notification and never gets a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

// Distinguishes `"id": null` (a real id, mirrored in the response) from a
// missing field (a notification). Serde only calls this when the field is
// present, so the `default` covers the absent case.
fn id_or_explicit_null<'de, D>(deserializer: D) -> Result<Option<RequestId>, D::Error>
where
    D: Deserializer<'de>,
{
    RequestId::deserialize(deserializer).map(Some)
}
