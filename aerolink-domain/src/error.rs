use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum LinkError {
    // ---
    #[error("connection error: {0}")]
    Connection(String),

    #[error("send failure: {0}")]
    Send(String),

    #[error("receive failure: {0}")]
    Receive(String),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("message timed out after retry exhaustion: {0}")]
    AckTimeout(String),

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("agent already running")]
    AlreadyRunning,
}

// ---

pub type Result<T> = std::result::Result<T, LinkError>;
