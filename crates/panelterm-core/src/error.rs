//! Error types for the session multiplexer

use thiserror::Error;

/// Main error type for the multiplexer
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Control channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
