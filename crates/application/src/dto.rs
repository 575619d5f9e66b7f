use domain::{ChatMessage, ContentType, MessageId, RoomId, ThreadId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub sender_id: UserId,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: Timestamp,
}

impl From<&ChatMessage> for MessageDto {
    fn from(message: &ChatMessage) -> Self {
        Self {
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

/// 页码分页参数，页码从 1 开始。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: Some(page),
            page_size: Some(page_size),
        }
    }

    /// 非法或缺省值回落到默认值，page_size 上限为 100
    pub fn normalized(&self) -> (u32, u32) {
        let page = self.page.filter(|page| *page >= 1).unwrap_or(1);
        let page_size = match self.page_size {
            Some(size) if size >= 1 => size.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        };
        (page, page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedMessages {
    pub messages: Vec<MessageDto>,
    pub current_page: u32,
    pub page_size: u32,
    pub has_more: bool,
}
