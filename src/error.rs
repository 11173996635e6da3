use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Proxy tunnel error: {0}")]
    ProxyTunnel(String),

    #[error("Review UI error: {0}")]
    UiDesync(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the batch driver may retry the whole place after this
    /// failure. Field-level extraction problems never reach here; they are
    /// swallowed per card.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Browser(_)
                | AppError::Navigation(_)
                | AppError::ProxyTunnel(_)
                | AppError::UiDesync(_)
        )
    }
}

impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.to_string()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
