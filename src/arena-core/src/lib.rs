//! Debate Arena Core Library
//!
//! Three AI personas debate a topic in round-robin turns. Reply generation,
//! speech synthesis and playback run as a bounded pipeline so the next
//! speaker is ready while the current one is still talking.

pub mod config;
pub mod controller;
pub mod debater;
pub mod error;
pub mod inference;
pub mod news;
pub mod playback;
pub mod session;
pub mod transcript;
pub mod tts;
pub mod turn;

#[cfg(test)]
mod test_support;

pub use config::{Config, Settings};
pub use controller::{Collaborators, DebateCallback, DebateController, DebateHandle};
pub use debater::Debater;
pub use error::DebateError;
pub use inference::{DebaterClient, OpenAiDebaters, ReplyRequest};
pub use news::{NewsFeed, NewsItem, RssFeed};
pub use playback::{PlaybackDevice, ProcessPlayer, SilentPlayer};
pub use session::{Command, DebateEvent, DebateSession, DebateState, NewsBoard};
pub use transcript::{Message, Sender, Transcript};
pub use tts::{AudioHandle, RotatingSynthesizer, SpeechSynthesizer};
pub use turn::{Turn, TurnId, TurnQueue, TurnStatus};
