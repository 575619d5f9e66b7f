use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    /// 中枢命令循环已停止
    #[error("hub is not running")]
    HubClosed,
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
