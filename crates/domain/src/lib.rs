//! 聊天系统核心领域模型
//!
//! 包含用户、房间、私聊会话与聊天消息的标识和校验规则。

pub mod errors;
pub mod message;
pub mod value_objects;

pub use errors::{DomainError, RepositoryError};
pub use message::{ChatMessage, MessageTarget, NewChatMessage};
pub use value_objects::{
    ContentType, MessageContent, MessageId, RoomId, ThreadId, Timestamp, UserId,
};
