use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("credential is missing")]
    Missing,
    #[error("credential has expired")]
    Expired,
    #[error("invalid credential: {0}")]
    Invalid(String),
}

/// 将客户端凭证解析为用户身份。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<UserId, SessionError>;
}
