//! Phoenix channel framing used by the realtime websocket (`vsn=1.0.0`,
//! JSON objects) and decoding of `postgres_changes` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::backend::ChangeEvent;
use crate::error::AppError;
use crate::models::Bookmark;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_SYSTEM: &str = "system";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// What the postgres side of the channel should stream to us.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    pub schema: String,
    pub table: String,
    pub user_id: Uuid,
}

impl ChangeFilter {
    pub fn filter_expression(&self) -> String {
        format!("user_id=eq.{}", self.user_id)
    }
}

impl PhoenixMessage {
    pub fn join(topic: &str, filter: &ChangeFilter, access_token: &str, join_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": filter.schema,
                        "table": filter.table,
                        "filter": filter.filter_expression(),
                    }],
                    "private": false,
                },
                "access_token": access_token,
            }),
            msg_ref: Some(join_ref.clone()),
            join_ref: Some(join_ref),
        }
    }

    pub fn heartbeat(msg_ref: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }

    pub fn leave(topic: &str, msg_ref: String, join_ref: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref,
        }
    }

    pub fn to_text(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Status of the channel as seen by the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionStatus::Subscribed => "SUBSCRIBED",
            SubscriptionStatus::ChannelError => "CHANNEL_ERROR",
            SubscriptionStatus::TimedOut => "TIMED_OUT",
            SubscriptionStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// An inbound frame, sorted by what the subscriber has to do with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Reply {
        msg_ref: Option<String>,
        status: String,
        response: Value,
    },
    Change(ChangeEvent),
    System {
        status: String,
        message: String,
    },
    Close,
    Error(String),
    Other(String),
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(rename = "type", alias = "eventType")]
    kind: String,
    #[serde(default, alias = "new")]
    record: Option<Value>,
    #[serde(default, alias = "old")]
    old_record: Option<Value>,
}

pub fn classify(message: PhoenixMessage) -> Result<Incoming, AppError> {
    match message.event.as_str() {
        EVENT_REPLY => Ok(Incoming::Reply {
            msg_ref: message.msg_ref,
            status: message
                .payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            response: message.payload.get("response").cloned().unwrap_or(Value::Null),
        }),
        EVENT_POSTGRES_CHANGES => decode_change(message.payload).map(Incoming::Change),
        EVENT_SYSTEM => Ok(Incoming::System {
            status: message
                .payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            message: message
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        EVENT_CLOSE => Ok(Incoming::Close),
        EVENT_ERROR => Ok(Incoming::Error(message.payload.to_string())),
        other => Ok(Incoming::Other(other.to_string())),
    }
}

/// `payload.data` carries `type`, `record` and `old_record`.
pub fn decode_change(payload: Value) -> Result<ChangeEvent, AppError> {
    let data = match payload {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    let data: ChangeData = serde_json::from_value(data)?;

    match data.kind.as_str() {
        "INSERT" => Ok(ChangeEvent::Insert(record(data.record, "record")?)),
        "UPDATE" => Ok(ChangeEvent::Update(record(data.record, "record")?)),
        "DELETE" => {
            let old = data
                .old_record
                .ok_or_else(|| AppError::Realtime("DELETE change without old_record".to_string()))?;
            let id = old
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Realtime("DELETE change without old_record.id".to_string()))?;
            let id = Uuid::parse_str(id)
                .map_err(|e| AppError::Realtime(format!("DELETE change has malformed id {id}: {e}")))?;
            Ok(ChangeEvent::Delete { id })
        }
        other => Err(AppError::Realtime(format!("Unknown change type: {other}"))),
    }
}

fn record(value: Option<Value>, field: &str) -> Result<Bookmark, AppError> {
    let value = value.ok_or_else(|| AppError::Realtime(format!("Change without {field}")))?;
    Ok(serde_json::from_value(value)?)
}
