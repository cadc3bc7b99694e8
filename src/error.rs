use crate::zone::ZoneError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("state lock poisoned")]
    StateLock,
    #[error("source {0:?} is already streaming")]
    SessionBusy(String),
    #[error("frame source error: {0}")]
    Source(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("zone configuration error: {0}")]
    Zone(#[from] ZoneError),
}
