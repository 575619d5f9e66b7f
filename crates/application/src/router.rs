//! 入站信封路由
//!
//! 新消息先持久化，再回显给发送者，最后扇出给房间成员或私聊对方；持久化失败时不会扇出。
//! 输入状态与心跳不落库。校验失败、未知类型与存储失败都以 `error` 信封回复发送者。

use std::sync::Arc;

use domain::{
    ContentType, MessageContent, MessageTarget, NewChatMessage, RoomId, ThreadId, UserId,
};
use tracing::{debug, error, warn};

use crate::envelope::{InboundEnvelope, InboundMessage, InboundTarget, OutboundEnvelope};
use crate::hub::{ConnectionHandle, Hub};
use crate::store::MessageStore;

const INVALID_FORMAT: &str = "Invalid message format";
const EMPTY_CONTENT: &str = "Message content cannot be empty";
const INVALID_TARGET: &str = "Message must specify either room_id or thread_id";
const STORE_FAILED: &str = "Failed to store message";

pub struct MessageRouter {
    hub: Hub,
    store: Arc<dyn MessageStore>,
}

impl MessageRouter {
    pub fn new(hub: Hub, store: Arc<dyn MessageStore>) -> Self {
        Self { hub, store }
    }

    /// 解码并处理一帧文本；解码失败时回复错误，连接保持。
    pub async fn handle_frame(&self, origin: &ConnectionHandle, text: &str) {
        match InboundEnvelope::decode(text) {
            Ok(envelope) => self.dispatch(origin, envelope).await,
            Err(err) => {
                debug!(user_id = %origin.user_id(), error = %err, "failed to decode inbound frame");
                self.reply_error(origin, INVALID_FORMAT);
            }
        }
    }

    pub async fn dispatch(&self, origin: &ConnectionHandle, envelope: InboundEnvelope) {
        match envelope {
            InboundEnvelope::NewMessage(message) => self.route_new_message(origin, message).await,
            InboundEnvelope::Typing(target) => {
                self.route_typing(origin, target, TypingState::Started).await
            }
            InboundEnvelope::StopTyping(target) => {
                self.route_typing(origin, target, TypingState::Stopped).await
            }
            InboundEnvelope::Ping => self.reply(
                origin,
                OutboundEnvelope::Pong {
                    sender_id: origin.user_id().clone(),
                },
            ),
            InboundEnvelope::Unknown { kind } => {
                debug!(user_id = %origin.user_id(), kind = %kind, "unknown envelope type");
                self.reply_error(origin, format!("Unknown message type: {kind}"));
            }
        }
    }

    async fn route_new_message(&self, origin: &ConnectionHandle, message: InboundMessage) {
        let draft = match build_draft(origin.user_id(), message) {
            Ok(draft) => draft,
            Err(reason) => {
                self.reply_error(origin, reason);
                return;
            }
        };

        let persisted = match self.store.persist(draft).await {
            Ok(persisted) => persisted,
            Err(err) => {
                error!(user_id = %origin.user_id(), error = %err, "failed to persist message");
                self.reply_error(origin, STORE_FAILED);
                return;
            }
        };

        let envelope = OutboundEnvelope::from(&persisted);
        // 回显先于扇出入队
        self.reply(origin, envelope.clone());

        let result = match &persisted.target {
            MessageTarget::Room(room_id) => {
                self.hub
                    .send_to_room(room_id, &envelope, Some(origin.user_id()))
                    .await
            }
            MessageTarget::Thread(thread_id) => {
                self.hub
                    .send_to_thread(thread_id, &envelope, Some(origin.user_id()))
                    .await
            }
        };
        if let Err(err) = result {
            warn!(
                message_id = %persisted.id,
                error = %err,
                "failed to fan out persisted message"
            );
        }
    }

    async fn route_typing(
        &self,
        origin: &ConnectionHandle,
        target: InboundTarget,
        state: TypingState,
    ) {
        let target = match parse_target(target) {
            Ok(target) => target,
            Err(reason) => {
                self.reply_error(origin, reason);
                return;
            }
        };

        let sender_id = origin.user_id().clone();
        let (room_id, thread_id) = (target.room_id().cloned(), target.thread_id().cloned());
        let envelope = match state {
            TypingState::Started => OutboundEnvelope::Typing {
                room_id,
                thread_id,
                sender_id,
            },
            TypingState::Stopped => OutboundEnvelope::StopTyping {
                room_id,
                thread_id,
                sender_id,
            },
        };

        let result = match &target {
            MessageTarget::Room(room_id) => {
                self.hub
                    .send_to_room(room_id, &envelope, Some(origin.user_id()))
                    .await
            }
            MessageTarget::Thread(thread_id) => {
                self.hub
                    .send_to_thread(thread_id, &envelope, Some(origin.user_id()))
                    .await
            }
        };
        if let Err(err) = result {
            debug!(user_id = %origin.user_id(), error = %err, "typing indicator not delivered");
        }
    }

    fn reply_error(&self, origin: &ConnectionHandle, message: impl Into<String>) {
        self.reply(origin, OutboundEnvelope::error(origin.user_id(), message));
    }

    fn reply(&self, origin: &ConnectionHandle, envelope: OutboundEnvelope) {
        if let Err(err) = self.hub.deliver(origin, &envelope) {
            error!(user_id = %origin.user_id(), error = %err, "failed to reply to sender");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TypingState {
    Started,
    Stopped,
}

fn parse_target(target: InboundTarget) -> Result<MessageTarget, String> {
    let room_id = target
        .room_id
        .map(RoomId::parse)
        .transpose()
        .map_err(|err| err.to_string())?;
    let thread_id = target
        .thread_id
        .map(ThreadId::parse)
        .transpose()
        .map_err(|err| err.to_string())?;
    MessageTarget::from_parts(room_id, thread_id).map_err(|_| INVALID_TARGET.to_string())
}

fn build_draft(sender_id: &UserId, message: InboundMessage) -> Result<NewChatMessage, String> {
    let content = MessageContent::new(message.content).map_err(|_| EMPTY_CONTENT.to_string())?;
    let target = parse_target(message.target)?;
    let content_type = match message.content_type.as_deref() {
        None | Some("") => None,
        Some(value) => Some(
            value
                .parse::<ContentType>()
                .map_err(|err| err.to_string())?,
        ),
    };
    Ok(NewChatMessage::new(
        target,
        sender_id.clone(),
        content,
        content_type,
    ))
}
