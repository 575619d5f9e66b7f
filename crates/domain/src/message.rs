use crate::errors::DomainError;
use crate::value_objects::{
    ContentType, MessageContent, MessageId, RoomId, ThreadId, Timestamp, UserId,
};

/// 消息的投递目标：聊天室或私聊会话，二者必居其一。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    Room(RoomId),
    Thread(ThreadId),
}

impl MessageTarget {
    pub fn from_parts(
        room_id: Option<RoomId>,
        thread_id: Option<ThreadId>,
    ) -> Result<Self, DomainError> {
        match (room_id, thread_id) {
            (Some(room_id), None) => Ok(Self::Room(room_id)),
            (None, Some(thread_id)) => Ok(Self::Thread(thread_id)),
            _ => Err(DomainError::AmbiguousTarget),
        }
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::Room(room_id) => Some(room_id),
            Self::Thread(_) => None,
        }
    }

    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            Self::Room(_) => None,
            Self::Thread(thread_id) => Some(thread_id),
        }
    }
}

/// 尚未持久化的消息，id 与时间戳由消息存储分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub target: MessageTarget,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub content_type: ContentType,
}

impl NewChatMessage {
    pub fn new(
        target: MessageTarget,
        sender_id: UserId,
        content: MessageContent,
        content_type: Option<ContentType>,
    ) -> Self {
        Self {
            target,
            sender_id,
            content,
            content_type: content_type.unwrap_or_default(),
        }
    }

    /// 附上存储分配的 id 与时间戳。
    pub fn into_persisted(self, id: MessageId, created_at: Timestamp) -> ChatMessage {
        ChatMessage {
            id,
            target: self.target,
            sender_id: self.sender_id,
            content: self.content,
            content_type: self.content_type,
            created_at,
        }
    }
}

/// 已持久化的聊天消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub target: MessageTarget,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub content_type: ContentType,
    pub created_at: Timestamp,
}
