//! Error types for Drape

use thiserror::Error;

/// The main error type for gateway operations.
///
/// Everything except [`DrapeError::AllProvidersUnavailable`] and
/// [`DrapeError::Cancelled`] describes the failure of a single provider
/// attempt; the orchestrator recovers from those locally.
#[derive(Debug, Error)]
pub enum DrapeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("{provider}: HTTP status {status}")]
    Http { provider: String, status: u16 },

    #[error("{provider}: transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider}: job failed: {message}")]
    ProviderFailed { provider: String, message: String },

    #[error("{provider}: timed out after {attempts} poll attempts")]
    Timeout { provider: String, attempts: u32 },

    #[error("{provider}: invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{provider}: unsupported request: {message}")]
    Unsupported { provider: String, message: String },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("All providers unavailable ({attempts} attempts failed)")]
    AllProvidersUnavailable { attempts: usize },
}

impl DrapeError {
    /// Shorthand for [`DrapeError::InvalidResponse`]
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        DrapeError::InvalidResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`DrapeError::Unsupported`]
    pub fn unsupported(provider: impl Into<String>, message: impl Into<String>) -> Self {
        DrapeError::Unsupported {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// True for the polling-exhaustion condition
    pub fn is_timeout(&self) -> bool {
        matches!(self, DrapeError::Timeout { .. })
    }
}

/// Result type alias for Drape operations
pub type Result<T> = std::result::Result<T, DrapeError>;

impl From<toml::de::Error> for DrapeError {
    fn from(err: toml::de::Error) -> Self {
        DrapeError::TomlParse(err.to_string())
    }
}
