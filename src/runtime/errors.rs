//! Error types for the runtime system

/// Error type for queue and worker operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Worker '{0}' panicked")]
    Panicked(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown signal received")]
    Shutdown,
}

/// Result type for runtime operations
pub type WorkResult<T = ()> = Result<T, WorkError>;
