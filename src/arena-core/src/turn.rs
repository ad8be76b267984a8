//! Turn records and the bounded turn queue.
//!
//! A turn moves strictly forward through
//! `PendingText -> TextReady -> PendingAudio -> AudioReady` and leaves the
//! queue once it has been played. The queue head is always the next turn to
//! play.

use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

use crate::debater::Debater;
use crate::error::DebateError;
use crate::tts::AudioHandle;

/// Opaque unique turn identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(Uuid);

impl TurnId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TurnStatus {
    PendingText,
    TextReady,
    PendingAudio,
    AudioReady,
}

impl TurnStatus {
    /// The only status this one may advance to.
    fn successor(self) -> Option<TurnStatus> {
        match self {
            TurnStatus::PendingText => Some(TurnStatus::TextReady),
            TurnStatus::TextReady => Some(TurnStatus::PendingAudio),
            TurnStatus::PendingAudio => Some(TurnStatus::AudioReady),
            TurnStatus::AudioReady => None,
        }
    }
}

/// One debater's reply on its way through the pipeline.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    pub sender: Debater,
    pub text: Option<String>,
    pub audio: Option<AudioHandle>,
    pub status: TurnStatus,
}

impl Turn {
    fn new(sender: Debater) -> Self {
        Self {
            id: TurnId::new(),
            sender,
            text: None,
            audio: None,
            status: TurnStatus::PendingText,
        }
    }

    fn advance(&mut self, to: TurnStatus) -> Result<(), DebateError> {
        if self.status.successor() != Some(to) {
            return Err(DebateError::IllegalTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Whether the turn has non-empty text to show.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// FIFO of in-flight turns.
#[derive(Debug, Clone, Default)]
pub struct TurnQueue {
    turns: VecDeque<Turn>,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fresh `PendingText` turn for `sender`.
    pub fn enqueue(&mut self, sender: Debater) -> TurnId {
        let turn = Turn::new(sender);
        let id = turn.id;
        self.turns.push_back(turn);
        id
    }

    pub fn head(&self) -> Option<&Turn> {
        self.turns.front()
    }

    pub fn pop_head(&mut self) -> Option<Turn> {
        self.turns.pop_front()
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: TurnId) -> bool {
        self.get(id).is_some()
    }

    /// First turn, in queue order, with the given status.
    pub fn first_with_status(&self, status: TurnStatus) -> Option<&Turn> {
        self.turns.iter().find(|t| t.status == status)
    }

    pub fn any_with_status(&self, status: TurnStatus) -> bool {
        self.first_with_status(status).is_some()
    }

    /// `PendingText -> TextReady`, storing the reply.
    pub fn text_ready(&mut self, id: TurnId, text: String) -> Result<(), DebateError> {
        let turn = self.get_mut(id)?;
        turn.advance(TurnStatus::TextReady)?;
        turn.text = Some(text);
        Ok(())
    }

    /// `TextReady -> PendingAudio`.
    pub fn audio_pending(&mut self, id: TurnId) -> Result<(), DebateError> {
        self.get_mut(id)?.advance(TurnStatus::PendingAudio)
    }

    /// `PendingAudio -> AudioReady`; `audio` is `None` when synthesis failed.
    pub fn audio_ready(&mut self, id: TurnId, audio: Option<AudioHandle>) -> Result<(), DebateError> {
        let turn = self.get_mut(id)?;
        turn.advance(TurnStatus::AudioReady)?;
        turn.audio = audio;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    fn get_mut(&mut self, id: TurnId) -> Result<&mut Turn, DebateError> {
        self.turns
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(DebateError::UnknownTurn(id))
    }
}
