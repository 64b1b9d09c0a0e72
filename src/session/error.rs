use thiserror::Error;

use crate::persist::PersistError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
