//! 内存消息存储，未配置数据库时使用，也用于测试。

use std::{collections::HashMap, sync::Arc};

use application::{Clock, MessageStore, SystemClock};
use async_trait::async_trait;
use domain::{
    ChatMessage, MessageId, MessageTarget, NewChatMessage, RepositoryError, RoomId, ThreadId,
    UserId,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    // 按写入顺序保存
    messages: Vec<ChatMessage>,
    rooms: HashMap<RoomId, Vec<UserId>>,
    threads: HashMap<ThreadId, [UserId; 2]>,
}

pub struct InMemoryMessageStore {
    clock: Arc<dyn Clock>,
    state: RwLock<MemoryState>,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// 加入房间，重复加入无效果
    pub async fn add_room_member(&self, room_id: RoomId, user_id: UserId) {
        let mut state = self.state.write().await;
        let members = state.rooms.entry(room_id).or_default();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
    }

    pub async fn create_thread(
        &self,
        thread_id: ThreadId,
        first: UserId,
        second: UserId,
    ) -> Result<(), RepositoryError> {
        if first == second {
            return Err(RepositoryError::storage(
                "thread participants must be distinct",
            ));
        }
        let mut state = self.state.write().await;
        if state.threads.contains_key(&thread_id) {
            return Err(RepositoryError::Conflict);
        }
        state.threads.insert(thread_id, [first, second]);
        Ok(())
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    async fn list_by_target(
        &self,
        target: &MessageTarget,
        limit: u32,
        offset: u32,
    ) -> Vec<ChatMessage> {
        let state = self.state.read().await;
        let mut matching: Vec<&ChatMessage> = state
            .messages
            .iter()
            .filter(|message| &message.target == target)
            .collect();
        // 时间相同的按写入顺序倒排
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist(&self, message: NewChatMessage) -> Result<ChatMessage, RepositoryError> {
        let mut state = self.state.write().await;
        let persisted = message.into_persisted(MessageId::generate(), self.clock.now());
        state.messages.push(persisted.clone());
        Ok(persisted)
    }

    async fn list_room_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .rooms
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_thread_participants(
        &self,
        thread_id: &ThreadId,
    ) -> Result<[UserId; 2], RepositoryError> {
        self.state
            .read()
            .await
            .threads
            .get(thread_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_room_messages(
        &self,
        room_id: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let target = MessageTarget::Room(room_id.clone());
        Ok(self.list_by_target(&target, limit, offset).await)
    }

    async fn list_thread_messages(
        &self,
        thread_id: &ThreadId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let target = MessageTarget::Thread(thread_id.clone());
        Ok(self.list_by_target(&target, limit, offset).await)
    }
}
