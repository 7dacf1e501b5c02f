use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("invalid configuration for {key}: {message}")]
    #[diagnostic(help("set {key} in the environment, in .env, or in the --config file"))]
    Configuration { key: String, message: String },

    #[error("remote spreadsheet unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("download failed for '{ingredient}' after {attempts} attempt(s): {message}")]
    FetchFailed {
        ingredient: String,
        attempts: u32,
        message: String,
    },

    #[error("registry request failed: {0}")]
    SourceHttp(String),

    #[error("registry returned status {status}: {message}")]
    SourceStatus { status: u16, message: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl RegistryError {
    pub fn configuration(key: &str, message: impl Into<String>) -> Self {
        RegistryError::Configuration {
            key: key.to_string(),
            message: message.into(),
        }
    }
}
