//! 历史消息分页查询
//!
//! 按创建时间倒序，多取一条用于判断是否还有下一页。

use std::sync::Arc;

use domain::{ChatMessage, RoomId, ThreadId};

use crate::dto::{MessageDto, PageRequest, PaginatedMessages};
use crate::error::ApplicationResult;
use crate::store::MessageStore;

pub struct MessageHistoryService {
    store: Arc<dyn MessageStore>,
}

impl MessageHistoryService {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub async fn room_history(
        &self,
        room_id: &RoomId,
        request: PageRequest,
    ) -> ApplicationResult<PaginatedMessages> {
        let (page, page_size) = request.normalized();
        let (limit, offset) = window(page, page_size);
        let messages = self
            .store
            .list_room_messages(room_id, limit, offset)
            .await?;
        Ok(paginate(messages, page, page_size))
    }

    pub async fn thread_history(
        &self,
        thread_id: &ThreadId,
        request: PageRequest,
    ) -> ApplicationResult<PaginatedMessages> {
        let (page, page_size) = request.normalized();
        let (limit, offset) = window(page, page_size);
        let messages = self
            .store
            .list_thread_messages(thread_id, limit, offset)
            .await?;
        Ok(paginate(messages, page, page_size))
    }
}

fn window(page: u32, page_size: u32) -> (u32, u32) {
    let offset = (page - 1).saturating_mul(page_size);
    (page_size + 1, offset)
}

fn paginate(mut messages: Vec<ChatMessage>, page: u32, page_size: u32) -> PaginatedMessages {
    let has_more = messages.len() > page_size as usize;
    messages.truncate(page_size as usize);
    PaginatedMessages {
        messages: messages.iter().map(MessageDto::from).collect(),
        current_page: page,
        page_size,
        has_more,
    }
}
