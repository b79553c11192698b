//! Front-end message protocol: opcodes, reply codes, and parameter shapes.
//!
//! Requests arrive as JSON objects with an integer `type` opcode and, for
//! everything except `connect`, a `session` key. Reply type codes are part of
//! the wire contract and must never change.

use serde::Deserialize;
use serde_json::{json, Value};

/// Reply type codes (wire contract with the front-end).
pub const REPLY_OK: i64 = 0;
pub const REPLY_DATA: i64 = 1;
pub const REPLY_ERROR: i64 = 2;

/// Fixed reply texts that form part of the front-end contract.
pub const ERR_INVALID_SESSION: &str = "Invalid session identifier.";
pub const ERR_MISSING_SESSION: &str = "Missing session specification.";
pub const ERR_UNSUPPORTED: &str = "Operation not supported.";

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect = 1,
    Disconnect = 2,
    Get = 3,
    GetConfig = 4,
    EditConfig = 5,
    CopyConfig = 6,
    DeleteConfig = 7,
    Lock = 8,
    Unlock = 9,
    Kill = 10,
    Info = 11,
    Generic = 12,
    GetSchema = 13,
    ReloadHello = 14,
    NtfGetHistory = 15,
    Validate = 16,
}

impl Operation {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Operation::Connect,
            2 => Operation::Disconnect,
            3 => Operation::Get,
            4 => Operation::GetConfig,
            5 => Operation::EditConfig,
            6 => Operation::CopyConfig,
            7 => Operation::DeleteConfig,
            8 => Operation::Lock,
            9 => Operation::Unlock,
            10 => Operation::Kill,
            11 => Operation::Info,
            12 => Operation::Generic,
            13 => Operation::GetSchema,
            14 => Operation::ReloadHello,
            15 => Operation::NtfGetHistory,
            16 => Operation::Validate,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Parameters of a `connect` request.
#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct GetRequest {
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetConfigRequest {
    pub source: Option<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditConfigRequest {
    pub target: Option<String>,
    pub config: Option<String>,
    #[serde(rename = "default-operation")]
    pub default_operation: Option<String>,
    #[serde(rename = "error-option")]
    pub error_option: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CopyConfigRequest {
    pub target: Option<String>,
    pub source: Option<String>,
    pub config: Option<String>,
    pub url: Option<String>,
}

/// Shared shape of delete-config, lock, unlock and validate requests.
#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub target: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KillRequest {
    #[serde(rename = "session-id")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenericRequest {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetSchemaRequest {
    pub identifier: Option<String>,
    pub version: Option<String>,
    pub format: Option<String>,
}

/// Notification history window, in seconds relative to now.
#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
}

pub fn reply_ok() -> Value {
    json!({ "type": REPLY_OK })
}

pub fn reply_ok_with_session(session: &str) -> Value {
    json!({ "type": REPLY_OK, "session": session })
}

pub fn reply_data(data: &str) -> Value {
    json!({ "type": REPLY_DATA, "data": data })
}

pub fn reply_error(message: &str) -> Value {
    json!({ "type": REPLY_ERROR, "error-message": message })
}
