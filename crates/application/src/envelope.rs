//! 线上消息信封编解码
//!
//! 入站信封先按原始 JSON 结构解析，再按 `type` 字段分派；未知类型不算解析失败，
//! 由路由层回复错误信封。出站信封为带 `type` 标签的联合类型，每次扇出只序列化一次。

use std::sync::Arc;

use domain::{ChatMessage, ContentType, MessageId, RoomId, ThreadId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 已序列化的出站信封，可在多个连接之间共享。
pub type EncodedEnvelope = Arc<str>;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    content_type: Option<String>,
}

/// 入站消息的目标字段，原样保留，由路由层校验。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundTarget {
    pub room_id: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub target: InboundTarget,
    pub content: String,
    pub content_type: Option<String>,
}

/// 客户端发来的信封
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnvelope {
    NewMessage(InboundMessage),
    Typing(InboundTarget),
    StopTyping(InboundTarget),
    Ping,
    Unknown { kind: String },
}

impl InboundEnvelope {
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawInbound = serde_json::from_str(text).map_err(EnvelopeError::Malformed)?;
        let target = InboundTarget {
            room_id: raw.room_id,
            thread_id: raw.thread_id,
        };

        Ok(match raw.kind.as_str() {
            "new_message" => InboundEnvelope::NewMessage(InboundMessage {
                target,
                content: raw.content,
                content_type: raw.content_type,
            }),
            "typing" => InboundEnvelope::Typing(target),
            "stop_typing" => InboundEnvelope::StopTyping(target),
            "ping" => InboundEnvelope::Ping,
            _ => InboundEnvelope::Unknown { kind: raw.kind },
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            InboundEnvelope::NewMessage(_) => "new_message",
            InboundEnvelope::Typing(_) => "typing",
            InboundEnvelope::StopTyping(_) => "stop_typing",
            InboundEnvelope::Ping => "ping",
            InboundEnvelope::Unknown { kind } => kind,
        }
    }
}

/// 服务端推送给客户端的信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    NewMessage {
        message_id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<ThreadId>,
        sender_id: UserId,
        content: String,
        content_type: ContentType,
        created_at: Timestamp,
    },
    UserJoined {
        sender_id: UserId,
    },
    UserLeft {
        sender_id: UserId,
    },
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<ThreadId>,
        sender_id: UserId,
    },
    StopTyping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<ThreadId>,
        sender_id: UserId,
    },
    Pong {
        sender_id: UserId,
    },
    /// 错误回复，`sender_id` 为接收者自身
    Error {
        sender_id: UserId,
        error: String,
    },
}

impl OutboundEnvelope {
    pub fn error(recipient: &UserId, message: impl Into<String>) -> Self {
        OutboundEnvelope::Error {
            sender_id: recipient.clone(),
            error: message.into(),
        }
    }

    pub fn encode(&self) -> Result<EncodedEnvelope, EnvelopeError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(EnvelopeError::Encode)
    }
}

impl From<&ChatMessage> for OutboundEnvelope {
    fn from(message: &ChatMessage) -> Self {
        OutboundEnvelope::NewMessage {
            message_id: message.id.clone(),
            room_id: message.target.room_id().cloned(),
            thread_id: message.target.thread_id().cloned(),
            sender_id: message.sender_id.clone(),
            content: message.content.as_str().to_owned(),
            content_type: message.content_type,
            created_at: message.created_at,
        }
    }
}
