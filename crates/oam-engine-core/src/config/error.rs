use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("failed to parse config value: {0}")]
    ParseError(String),

    #[error("validation failed: {message} (field: {field})")]
    ValidationFailed { message: String, field: String },
}

impl ConfigError {
    pub fn parse_error(message: impl Into<String>, _section: &str, field: &str) -> Self {
        ConfigError::ParseError(format!("{field}: {}", message.into()))
    }

    pub fn validation_failed(message: impl Into<String>, field: impl Into<String>) -> Self {
        ConfigError::ValidationFailed {
            message: message.into(),
            field: field.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
