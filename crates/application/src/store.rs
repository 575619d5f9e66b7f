use async_trait::async_trait;
use domain::{ChatMessage, NewChatMessage, RepositoryError, RoomId, ThreadId, UserId};

/// 消息存储与成员关系查询。
///
/// 实现方负责分配消息 id 与创建时间，且同一发送者的消息按到达顺序落库。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist(&self, message: NewChatMessage) -> Result<ChatMessage, RepositoryError>;

    /// 房间成员列表，未知房间返回空列表
    async fn list_room_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, RepositoryError>;

    /// 私聊会话的两位参与者，未知会话返回 `NotFound`
    async fn list_thread_participants(
        &self,
        thread_id: &ThreadId,
    ) -> Result<[UserId; 2], RepositoryError>;

    // 历史查询按创建时间倒序
    async fn list_room_messages(
        &self,
        room_id: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;

    async fn list_thread_messages(
        &self,
        thread_id: &ThreadId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;
}
