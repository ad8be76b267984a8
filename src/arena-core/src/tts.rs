//! Speech synthesis for debate turns.
//!
//! A [`RotatingSynthesizer`] spreads requests over several interchangeable
//! backends, starting after the last one that succeeded and falling through
//! to the others when a backend fails.

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::{SpeechBackendConfig, SpeechConfig};
use crate::error::DebateError;

/// Sample rate of the kokoro engine output.
const KOKORO_SAMPLE_RATE: u32 = 24_000;

/// Kokoro has a ~200 character safe limit per synthesis call.
const KOKORO_CHUNK_CHARS: usize = 200;

const STARTING_UP: &str = "starting up";

/// Locator of a playable audio clip.
///
/// Handles made from a synthesized temp file own it: the file is removed
/// when the last clone is dropped, i.e. once the turn has been played or
/// abandoned.
#[derive(Debug, Clone)]
pub struct AudioHandle {
    locator: String,
    clip: Option<Arc<TempPath>>,
}

impl AudioHandle {
    /// Borrowed locator; nothing is cleaned up.
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            clip: None,
        }
    }

    /// Take ownership of a synthesized clip file.
    pub fn temp_clip(path: TempPath) -> Self {
        Self {
            locator: path.to_string_lossy().into_owned(),
            clip: Some(Arc::new(path)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.locator
    }
}

impl PartialEq for AudioHandle {
    fn eq(&self, other: &Self) -> bool {
        self.locator == other.locator
    }
}

impl Eq for AudioHandle {}

impl fmt::Display for AudioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator)
    }
}

/// Turns text into audio for a given voice.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioHandle, DebateError>;
}

/// One synthesis service in the rotation.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioHandle, DebateError>;
}

/// Round-robin over interchangeable backends.
pub struct RotatingSynthesizer {
    backends: Vec<Box<dyn SpeechBackend>>,
    next: AtomicUsize,
}

impl RotatingSynthesizer {
    pub fn new(backends: Vec<Box<dyn SpeechBackend>>) -> Result<Self, DebateError> {
        if backends.is_empty() {
            return Err(DebateError::ConfigError(
                "at least one speech backend is required".to_string(),
            ));
        }
        Ok(Self {
            backends,
            next: AtomicUsize::new(0),
        })
    }

    /// Build the configured backends, writing clips under `speech.output_dir`
    /// or the system temp directory.
    pub fn from_config(speech: &SpeechConfig) -> Result<Self, DebateError> {
        let output_dir = speech
            .output_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("debate-arena"));
        std::fs::create_dir_all(&output_dir)?;

        let backends = speech
            .backends
            .iter()
            .map(|backend| -> Result<Box<dyn SpeechBackend>, DebateError> {
                match backend {
                    SpeechBackendConfig::Http {
                        base_url,
                        model,
                        api_key,
                    } => Ok(Box::new(HttpSpeechBackend::new(
                        base_url,
                        model,
                        api_key.clone(),
                        &output_dir,
                    )?)),
                    SpeechBackendConfig::Local => {
                        Ok(Box::new(LocalKokoroBackend::new(&output_dir)))
                    }
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(backends)
    }
}

#[async_trait]
impl SpeechSynthesizer for RotatingSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioHandle, DebateError> {
        let count = self.backends.len();
        let start = self.next.load(Ordering::Relaxed) % count;
        let mut last_error = None;

        for attempt in 0..count {
            let index = (start + attempt) % count;
            let backend = &self.backends[index];
            debug!(
                backend = backend.name(),
                attempt = attempt + 1,
                of = count,
                "routing TTS request"
            );

            match backend.synthesize(text, voice).await {
                Ok(handle) => {
                    self.next.store((index + 1) % count, Ordering::Relaxed);
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "TTS backend failed");
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        if last.contains(STARTING_UP) {
            return Err(DebateError::TtsError(
                "All TTS services are starting up, please try again in a moment.".to_string(),
            ));
        }
        Err(DebateError::TtsError(format!(
            "TTS generation failed on all available services. Last error: {}",
            last
        )))
    }
}

/// OpenAI-style `POST {base_url}/audio/speech` endpoint.
pub struct HttpSpeechBackend {
    name: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
    output_dir: PathBuf,
}

impl HttpSpeechBackend {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        output_dir: &Path,
    ) -> Result<Self, DebateError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            name: base.to_string(),
            endpoint: format!("{}/audio/speech", base),
            model: model.to_string(),
            api_key,
            http,
            output_dir: output_dir.to_path_buf(),
        })
    }
}

#[async_trait]
impl SpeechBackend for HttpSpeechBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioHandle, DebateError> {
        let mut request = self.http.post(&self.endpoint).json(&json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": "wav",
            "speed": 1.0,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(DebateError::TtsError(format!(
                "{} is {}",
                self.name, STARTING_UP
            )));
        }
        let bytes = response.error_for_status()?.bytes().await?;
        if bytes.is_empty() {
            return Err(DebateError::TtsError(format!(
                "{} returned no audio",
                self.name
            )));
        }

        let clip = new_clip(&self.output_dir)?;
        tokio::fs::write(&clip, &bytes).await?;
        Ok(AudioHandle::temp_clip(clip))
    }
}

/// In-process kokoro-tiny engine, initialised on first use (downloads the
/// model on first run). Synthesis runs on the blocking thread pool.
pub struct LocalKokoroBackend {
    engine: Arc<Mutex<Option<TtsEngine>>>,
    init: tokio::sync::Mutex<()>,
    output_dir: PathBuf,
}

impl LocalKokoroBackend {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            engine: Arc::new(Mutex::new(None)),
            init: tokio::sync::Mutex::new(()),
            output_dir: output_dir.to_path_buf(),
        }
    }

    async fn ensure_engine(&self) -> Result<(), DebateError> {
        let _init = self.init.lock().await;
        if lock_engine(&self.engine)?.is_some() {
            return Ok(());
        }
        info!("initialising local kokoro engine");
        let engine = TtsEngine::new()
            .await
            .map_err(|e| DebateError::TtsError(format!("Failed to initialize TTS: {}", e)))?;
        *lock_engine(&self.engine)? = Some(engine);
        Ok(())
    }
}

#[async_trait]
impl SpeechBackend for LocalKokoroBackend {
    fn name(&self) -> &str {
        "kokoro-tiny"
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioHandle, DebateError> {
        self.ensure_engine().await?;
        render_on_blocking_pool(
            Arc::clone(&self.engine),
            text.to_string(),
            voice.to_string(),
            self.output_dir.clone(),
        )
        .await
    }
}

async fn render_on_blocking_pool(
    engine: Arc<Mutex<Option<TtsEngine>>>,
    text: String,
    voice: String,
    output_dir: PathBuf,
) -> Result<AudioHandle, DebateError> {
    tokio::task::spawn_blocking(move || render_clip(&engine, &text, &voice, &output_dir))
        .await
        .map_err(|e| DebateError::TtsError(format!("Synthesis task panicked: {}", e)))?
}

fn lock_engine(
    engine: &Mutex<Option<TtsEngine>>,
) -> Result<MutexGuard<'_, Option<TtsEngine>>, DebateError> {
    engine
        .lock()
        .map_err(|_| DebateError::TtsError("TTS engine lock poisoned".to_string()))
}

/// Synthesize `text` chunk by chunk and save it as a temp clip. Blocking.
fn render_clip(
    engine: &Mutex<Option<TtsEngine>>,
    text: &str,
    voice: &str,
    output_dir: &Path,
) -> Result<AudioHandle, DebateError> {
    let mut guard = lock_engine(engine)?;
    let Some(engine) = guard.as_mut() else {
        return Err(DebateError::TtsError("TTS engine unavailable".to_string()));
    };

    if !engine.voices().iter().any(|v| v == voice) {
        return Err(DebateError::TtsError(format!("Unknown voice '{}'", voice)));
    }

    let mut samples = Vec::new();
    for chunk in split_into_chunks(text, KOKORO_CHUNK_CHARS) {
        let chunk_samples = engine
            .synthesize(&chunk, Some(voice))
            .map_err(|e| DebateError::TtsError(format!("Synthesis failed: {}", e)))?;
        samples.extend(chunk_samples);
        // 0.3s pause between chunks so sentences don't run together
        samples.extend(std::iter::repeat_n(0.0, 7_200));
    }
    drop(guard);

    if samples.is_empty() {
        return Err(DebateError::TtsError("Nothing to synthesize".to_string()));
    }

    let clip = new_clip(output_dir)?;
    write_wav(&clip, &samples, KOKORO_SAMPLE_RATE)?;
    Ok(AudioHandle::temp_clip(clip))
}

/// Reserve a uniquely named `.wav` file in `dir`, deleted when dropped.
fn new_clip(dir: &Path) -> Result<TempPath, DebateError> {
    Ok(tempfile::Builder::new()
        .prefix("turn-")
        .suffix(".wav")
        .tempfile_in(dir)?
        .into_temp_path())
}

/// Write mono float samples as a WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), DebateError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let wav_error = |e: hound::Error| DebateError::TtsError(format!("Failed to save WAV: {}", e));

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

/// Split text into chunks that are safe for TTS synthesis.
///
/// Sentences are kept together where possible; overlong ones are broken at
/// commas, then at words, then hard at `max_chars`.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if sentence.len() <= max_chars {
            append_piece(&mut chunks, &mut current, sentence, max_chars);
            continue;
        }

        for part in sentence.split_inclusive(',') {
            let part = part.trim();
            if part.len() <= max_chars {
                append_piece(&mut chunks, &mut current, part, max_chars);
                continue;
            }
            for word in part.split_whitespace() {
                if word.len() <= max_chars {
                    append_piece(&mut chunks, &mut current, word, max_chars);
                    continue;
                }
                let chars: Vec<char> = word.chars().collect();
                for piece in chars.chunks(max_chars.max(1)) {
                    let piece: String = piece.iter().collect();
                    append_piece(&mut chunks, &mut current, &piece, max_chars);
                }
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Add `piece` to the chunk being built, starting a new one if it would
/// overflow.
fn append_piece(chunks: &mut Vec<String>, current: &mut String, piece: &str, max_chars: usize) {
    if !current.is_empty() && current.len() + 1 + piece.len() > max_chars {
        chunks.push(std::mem::take(current));
    }
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(piece);
}
