use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Empty blob")]
    Empty,

    #[error("Invalid content id: {0}")]
    InvalidContentId(String),

    #[error("Blob storage error: {0}")]
    Io(#[from] std::io::Error),
}
