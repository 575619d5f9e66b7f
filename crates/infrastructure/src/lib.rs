//! 基础设施层实现。
//!
//! 提供 PostgreSQL 与内存两种消息存储，实现应用层定义的 `MessageStore` 接口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError, StoreBackend};
pub use memory::InMemoryMessageStore;
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageStore};
