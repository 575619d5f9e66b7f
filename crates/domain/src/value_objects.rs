use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

const MAX_ID_LEN: usize = 64;

fn parse_identifier(field: &'static str, value: String) -> Result<String, DomainError> {
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(DomainError::invalid_argument(field, "cannot be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(DomainError::invalid_argument(
            field,
            format!("cannot exceed {MAX_ID_LEN} characters"),
        ));
    }
    Ok(value)
}

/// 声明字符串标识类型，构造与反序列化时都会校验
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                parse_identifier($field, value.into()).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_id!(
    /// 用户唯一标识（由会话校验器给出）。
    UserId,
    "user_id"
);

string_id!(
    /// 聊天室唯一标识。
    RoomId,
    "room_id"
);

string_id!(
    /// 私聊会话唯一标识。
    ThreadId,
    "thread_id"
);

string_id!(
    /// 消息唯一标识，由服务端分配。
    MessageId,
    "message_id"
);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// 非空消息内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::EmptyContent);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageContent {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageContent> for String {
    fn from(value: MessageContent) -> Self {
        value.0
    }
}

/// 消息内容类型标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    ImageUrl,
    FileUrl,
    SystemNotification,
    CallStarted,
    CallEnded,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::ImageUrl => "image_url",
            ContentType::FileUrl => "file_url",
            ContentType::SystemNotification => "system_notification",
            ContentType::CallStarted => "call_started",
            ContentType::CallEnded => "call_ended",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(ContentType::Text),
            "image_url" => Ok(ContentType::ImageUrl),
            "file_url" => Ok(ContentType::FileUrl),
            "system_notification" => Ok(ContentType::SystemNotification),
            "call_started" => Ok(ContentType::CallStarted),
            "call_ended" => Ok(ContentType::CallEnded),
            other => Err(DomainError::invalid_argument(
                "content_type",
                format!("unsupported content type '{other}'"),
            )),
        }
    }
}
