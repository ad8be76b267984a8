//! Audio playback devices.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::DebateError;
use crate::tts::AudioHandle;

/// Plays a clip to completion.
///
/// Dropping the returned future must stop playback; the controller relies on
/// this to halt audio when a debate is stopped.
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// `volume` and `rate` are fractions (1.0 = unchanged).
    async fn play(&self, clip: &AudioHandle, volume: f32, rate: f32) -> Result<(), DebateError>;
}

/// Plays through an external ffplay-compatible program.
pub struct ProcessPlayer {
    program: String,
}

impl ProcessPlayer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl PlaybackDevice for ProcessPlayer {
    async fn play(&self, clip: &AudioHandle, volume: f32, rate: f32) -> Result<(), DebateError> {
        debug!(program = %self.program, clip = %clip, volume, rate, "starting playback");
        let status = Command::new(&self.program)
            .args(player_args(clip, volume, rate))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| DebateError::Playback(format!("failed to start {}: {}", self.program, e)))?;

        if !status.success() {
            return Err(DebateError::Playback(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

fn player_args(clip: &AudioHandle, volume: f32, rate: f32) -> Vec<String> {
    vec![
        "-nodisp".to_string(),
        "-autoexit".to_string(),
        "-loglevel".to_string(),
        "quiet".to_string(),
        "-af".to_string(),
        format!(
            "volume={:.2},atempo={:.2}",
            volume.clamp(0.0, 1.0),
            rate.clamp(0.5, 2.0)
        ),
        clip.as_str().to_string(),
    ]
}

/// Resolves immediately; used when no audio output is wanted.
#[derive(Debug, Default)]
pub struct SilentPlayer;

#[async_trait]
impl PlaybackDevice for SilentPlayer {
    async fn play(&self, _clip: &AudioHandle, _volume: f32, _rate: f32) -> Result<(), DebateError> {
        Ok(())
    }
}
