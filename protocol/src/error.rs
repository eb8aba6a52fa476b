use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Handler failure for {command}: {reason}")]
    HandlerFailure { command: String, reason: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(#[from] std::io::Error),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
