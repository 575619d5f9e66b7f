//! 应用层实现。
//!
//! 实时消息中枢：连接注册表与扇出（`hub`）、入站消息路由（`router`）、
//! 线上消息信封编解码（`envelope`），以及对外部协作者（消息存储、会话校验）的抽象。

pub mod clock;
pub mod dto;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod router;
pub mod services;
pub mod session;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use dto::{MessageDto, PageRequest, PaginatedMessages};
pub use envelope::{EncodedEnvelope, EnvelopeError, InboundEnvelope, OutboundEnvelope};
pub use error::{ApplicationError, ApplicationResult};
pub use hub::{ConnectionHandle, ConnectionId, Delivery, FanOutReport, Hub, HubRunner, HubSettings};
pub use router::MessageRouter;
pub use services::MessageHistoryService;
pub use session::{SessionError, SessionValidator};
pub use store::MessageStore;

#[cfg(any(test, feature = "testing"))]
pub use session::MockSessionValidator;
#[cfg(any(test, feature = "testing"))]
pub use store::MockMessageStore;
