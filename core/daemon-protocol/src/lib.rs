//! IPC protocol types and validation for playgate-daemon.
//!
//! Shared by the daemon and the front-end so the two sides cannot drift. The
//! daemon stays the authority on validation; clients reuse the same types to
//! build requests and decode replies.
//!
//! One request per connection, encoded as a single line of JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

pub const ERROR_INVALID_PARAMS: &str = "invalid_params";
pub const ERROR_PROTOCOL_MISMATCH: &str = "protocol_mismatch";
pub const ERROR_STORE_UNAVAILABLE: &str = "store_unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    RequestUnlock,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some(id.into()),
            params: None,
        }
    }

    /// Checks the envelope before dispatch.
    ///
    /// None of the current methods take parameters, so anything other than
    /// an absent, `null`, or empty-object payload is rejected.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                ERROR_PROTOCOL_MISMATCH,
                "unsupported protocol version",
            ));
        }

        match &self.params {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Object(map)) if map.is_empty() => Ok(()),
            Some(_) => Err(ErrorInfo::new(
                ERROR_INVALID_PARAMS,
                format!("{} takes no parameters", self.method.as_str()),
            )),
        }
    }
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetHealth => "get_health",
            Method::GetStatus => "get_status",
            Method::RequestUnlock => "request_unlock",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Reply to `request_unlock`. Advisory only: the store is the durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_until: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub active: bool,
    #[serde(default)]
    pub unlocked_until: Option<i64>,
    #[serde(default)]
    pub remaining_ms: Option<i64>,
    #[serde(default)]
    pub gated_domains: Vec<String>,
}
