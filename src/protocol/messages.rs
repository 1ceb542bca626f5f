//! Lobby protocol commands and JSON payloads

use crate::error::{MatchbotError, Result};
use crate::protocol::codec::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Outbound commands
pub const LOGIN: &str = "LOGIN";
pub const OPEN_QUEUE: &str = "OPENQUEUE";
pub const CLOSE_QUEUE: &str = "CLOSEQUEUE";
pub const JOIN_QUEUE_ACCEPT: &str = "JOINQUEUEACCEPT";
pub const JOIN_QUEUE_DENY: &str = "JOINQUEUEDENY";
pub const READY_CHECK: &str = "READYCHECK";
pub const READY_CHECK_RESULT: &str = "READYCHECKRESULT";
pub const CONNECT_USER: &str = "CONNECTUSER";
pub const PING: &str = "PING";
pub const EXIT: &str = "EXIT";

/// Inbound commands
pub const LOGIN_INFO_END: &str = "LOGININFOEND";
pub const JOIN_QUEUE_REQUEST: &str = "JOINQUEUEREQUEST";
pub const QUEUE_LEFT: &str = "QUEUELEFT";
pub const REMOVE_USER: &str = "REMOVEUSER";
pub const READY_CHECK_RESPONSE: &str = "READYCHECKRESPONSE";
pub const QUEUE_OPENED: &str = "QUEUEOPENED";
pub const SERVER_MSG: &str = "SERVERMSG";
pub const FAILED: &str = "FAILED";

/// Inbound commands the matchbot acknowledges but does not act on
pub const IGNORED_COMMANDS: &[&str] = &[
    "TASServer",
    "MOTD",
    "PONG",
    "ADDUSER",
    "CLIENTSTATUS",
    "OPENQUEUE",
    "ACCEPTED",
];

/// Ready-check result sent when every player readied up
pub const READY_CHECK_PASS: &str = "pass";
/// Ready-check result sent when the game could not be started
pub const READY_CHECK_FAIL: &str = "fail";
/// Ready-check result sent when the deadline passed
pub const READY_CHECK_TIMEOUT: &str = "timeout waiting for players to ready up";
/// Response a player sends to accept a ready check
pub const READY_RESPONSE: &str = "ready";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueRequest {
    pub name: String,
    #[serde(default)]
    pub user_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueAccept {
    pub name: String,
    pub user_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueDeny {
    pub name: String,
    pub user_names: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLeft {
    pub name: String,
    #[serde(default)]
    pub user_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyCheck {
    pub name: String,
    pub user_names: Vec<String>,
    pub response_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyCheckResponse {
    pub name: String,
    pub user_name: String,
    pub response: String,
    #[serde(default)]
    pub response_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyCheckResult {
    pub name: String,
    pub user_names: Vec<String>,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectUser {
    pub user_name: String,
    pub ip: String,
    pub port: String,
    pub password: String,
    pub engine: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseQueue {
    pub name: String,
}

/// Parse the JSON payload of an inbound message
pub fn parse_payload<T: DeserializeOwned>(message: &Message) -> Result<T> {
    serde_json::from_str(&message.data).map_err(|e| {
        MatchbotError::MalformedPayload {
            command: message.command.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Serialize an outbound payload into the single protocol parameter
pub fn serialize_payload<T: Serialize>(payload: &T) -> Result<String> {
    serde_json::to_string(payload).map_err(|e| {
        MatchbotError::InternalError {
            message: format!("Failed to serialize payload: {}", e),
        }
        .into()
    })
}
