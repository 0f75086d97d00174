use thiserror::Error;
use unfurl_providers::TransportError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The snapshot lookup worked but the job has not finished.
    #[error("job is not complete (status: {status})")]
    FallbackIncomplete {
        status: String,
        error: Option<String>,
    },

    #[error("fallback fetch failed: {0}")]
    FallbackFailed(String),

    /// An in-band `error:` frame.
    #[error("{0}")]
    Application(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session is no longer running")]
    SessionClosed,
}
