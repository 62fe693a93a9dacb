//! Errors

/// Engine construction and configuration error
#[derive(Debug, thiserror::Error)]
pub enum RiloadError {
    #[error("Missing required 'media' property")]
    MissingMedia,

    #[error("The 'media' breakpoint table is empty")]
    EmptyMedia,

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event bus delivery error
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Subscriber of '{topic}' failed: {message}")]
    Subscriber { topic: String, message: String },
}
