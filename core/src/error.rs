/// Error types for the conversation core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Edit not allowed for message {0}")]
    EditNotAllowed(String),

    #[error("No authenticated viewer")]
    NoViewer,

    #[error("No active conversation")]
    NoConversation,

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;
