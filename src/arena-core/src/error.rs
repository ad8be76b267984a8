//! Error types for the debate arena.

use thiserror::Error;

use crate::turn::{TurnId, TurnStatus};

#[derive(Error, Debug)]
pub enum DebateError {
    #[error("Connection Error: {0}")]
    Connection(String),

    #[error("Debater client is not connected")]
    NotConnected,

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Speech synthesis error: {0}")]
    TtsError(String),

    #[error("News fetch error: {0}")]
    News(String),

    #[error("Failed to parse RSS feed: {0}")]
    FeedParse(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Turn {id} cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        id: TurnId,
        from: TurnStatus,
        to: TurnStatus,
    },

    #[error("Unknown turn: {0}")]
    UnknownTurn(TurnId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Debate controller has shut down")]
    ControllerClosed,
}
