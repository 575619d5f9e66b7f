use std::sync::Arc;

use application::MessageStore;
use config::DatabaseConfig;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    memory::InMemoryMessageStore,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgMessageStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 已装配的存储后端
#[derive(Clone)]
pub enum StoreBackend {
    Postgres(Arc<PgMessageStore>),
    Memory(Arc<InMemoryMessageStore>),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub backend: StoreBackend,
}

impl Infrastructure {
    /// 配置了数据库地址时连接 PostgreSQL 并执行迁移，否则退回内存存储
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, InfrastructureError> {
        let backend = match config.url.as_deref() {
            Some(url) => {
                let pool = create_pg_pool(url, config.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                info!("connected to postgres message store");
                StoreBackend::Postgres(Arc::new(PgMessageStore::new(pool)))
            }
            None => {
                warn!("no database configured, messages are kept in memory only");
                StoreBackend::Memory(Arc::new(InMemoryMessageStore::new()))
            }
        };
        Ok(Self { backend })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory(Arc::new(InMemoryMessageStore::new())),
        }
    }

    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        match &self.backend {
            StoreBackend::Postgres(store) => store.clone(),
            StoreBackend::Memory(store) => store.clone(),
        }
    }
}
