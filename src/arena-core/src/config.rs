//! Configuration module for loading TOML config files.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::debater::Debater;
use crate::error::DebateError;

/// Default topic when neither a user topic nor a news item is available.
pub const DEFAULT_TOPIC: &str = "the future of artificial intelligence";

/// Number of turns allowed in flight at once.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2;

pub const DEFAULT_FEED_URL: &str = "http://feeds.bbci.co.uk/news/rss.xml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub pipeline: PipelineConfig,
    pub api: ApiConfig,
    pub debaters: DebatersConfig,
    pub speech: SpeechConfig,
    pub news: NewsConfig,
    pub playback: PlaybackConfig,
}

/// User-adjustable debate settings, read by value whenever a request is issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Past turns per debater fed back as context.
    pub context_turns: usize,
    /// Reply length limit in characters.
    pub char_limit: usize,
    /// Playback volume in percent.
    pub speech_volume: u8,
    /// Playback rate in percent.
    pub speech_rate: u16,
    pub auto_play: bool,
    pub debate_rounds: usize,
    pub voices: VoicesConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            context_turns: 4,
            char_limit: 280,
            speech_volume: 100,
            speech_rate: 100,
            auto_play: true,
            debate_rounds: 5,
            voices: VoicesConfig::default(),
        }
    }
}

impl Settings {
    /// Pull every numeric option back into its supported range.
    pub fn clamped(mut self) -> Self {
        self.context_turns = self.context_turns.clamp(1, 10);
        self.char_limit = self.char_limit.clamp(50, 500);
        self.speech_volume = self.speech_volume.min(100);
        self.speech_rate = self.speech_rate.clamp(50, 200);
        self.debate_rounds = self.debate_rounds.clamp(1, 10);
        self
    }

    /// Total turns in one debate.
    pub fn max_turns(&self) -> usize {
        self.debate_rounds * Debater::COUNT
    }

    /// Transcript entries fed to a debater.
    pub fn history_len(&self) -> usize {
        self.context_turns * Debater::COUNT
    }

    /// Completion token budget derived from the character limit.
    pub fn max_tokens(&self) -> u32 {
        (self.char_limit as f64 / 2.2).ceil() as u32
    }

    pub fn volume(&self) -> f32 {
        f32::from(self.speech_volume) / 100.0
    }

    pub fn rate(&self) -> f32 {
        f32::from(self.speech_rate) / 100.0
    }

    pub fn voice_for(&self, debater: Debater) -> &str {
        self.voices.get(debater)
    }
}

/// Voice selection per debater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    pub tom: String,
    pub mark: String,
    pub sam: String,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            tom: "bm_daniel".to_string(),
            mark: "bm_george".to_string(),
            sam: "am_eric".to_string(),
        }
    }
}

impl VoicesConfig {
    pub fn get(&self, debater: Debater) -> &str {
        match debater {
            Debater::Tom => &self.tom,
            Debater::Mark => &self.mark,
            Debater::Sam => &self.sam,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub buffer_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// OpenAI-compatible endpoint shared by all debaters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

/// Model and prompt for one debater.
#[derive(Debug, Clone, Deserialize)]
pub struct DebaterConfig {
    pub model: String,
    /// Prompt template; `{name}`, `{history}` and `{char_limit}` are replaced.
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebatersConfig {
    pub tom: DebaterConfig,
    pub mark: DebaterConfig,
    pub sam: DebaterConfig,
}

impl Default for DebatersConfig {
    fn default() -> Self {
        Self {
            tom: DebaterConfig {
                model: "gemma3:4b".to_string(),
                prompt: DEFAULT_TOM_PROMPT.to_string(),
            },
            mark: DebaterConfig {
                model: "gemma3:270m".to_string(),
                prompt: DEFAULT_MARK_PROMPT.to_string(),
            },
            sam: DebaterConfig {
                model: "gemma3:1b".to_string(),
                prompt: DEFAULT_SAM_PROMPT.to_string(),
            },
        }
    }
}

impl DebatersConfig {
    pub fn get(&self, debater: Debater) -> &DebaterConfig {
        match debater {
            Debater::Tom => &self.tom,
            Debater::Mark => &self.mark,
            Debater::Sam => &self.sam,
        }
    }
}

/// One interchangeable speech synthesis backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpeechBackendConfig {
    /// OpenAI-style `/audio/speech` endpoint (e.g. Kokoro-FastAPI).
    Http {
        base_url: String,
        #[serde(default = "default_speech_model")]
        model: String,
        #[serde(default)]
        api_key: Option<String>,
    },
    /// In-process kokoro-tiny engine.
    Local,
}

fn default_speech_model() -> String {
    "kokoro".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Tried in rotation; order only matters for the first request.
    pub backends: Vec<SpeechBackendConfig>,
    /// Directory synthesized clips are written to.
    pub output_dir: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            backends: vec![
                SpeechBackendConfig::Http {
                    base_url: "http://localhost:8880/v1".to_string(),
                    model: default_speech_model(),
                    api_key: None,
                },
                SpeechBackendConfig::Local,
            ],
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub feed_url: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// External player; must accept ffplay-style arguments.
    pub program: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            program: "ffplay".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        config.settings = config.settings.clamped();
        Ok(config)
    }

    fn validate(&self) -> Result<(), DebateError> {
        if self.pipeline.buffer_capacity == 0 {
            return Err(DebateError::ConfigError(
                "pipeline.buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.speech.backends.is_empty() {
            return Err(DebateError::ConfigError(
                "speech.backends must list at least one backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the prompt for a debater, with placeholders replaced.
    pub fn get_prompt(&self, debater: Debater, history: &str, char_limit: usize) -> String {
        self.debaters
            .get(debater)
            .prompt
            .replace("{name}", debater.name())
            .replace("{history}", history)
            .replace("{char_limit}", &char_limit.to_string())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

const DEFAULT_TOM_PROMPT: &str = "You are {name}, an optimistic debater. Based on the last statements:
{history}

Directly state your insightful, optimistic argument in under {char_limit} characters. Do not include any preamble (e.g., \"Okay, here's my response:\"). Your response must end with a challenging question for the others.";

const DEFAULT_MARK_PROMPT: &str = "You are {name}, a skeptical debater. Based on the last statements:
{history}

Directly state your concise, skeptical counter-argument in under {char_limit} characters. Do not use introductory phrases. Your response must end with a challenging question.";

const DEFAULT_SAM_PROMPT: &str = "You are {name}, a pragmatic debater. Based on the last statements:
{history}

Directly state your balanced, pragmatic rebuttal in under {char_limit} characters. Avoid conversational filler. Your response must end with a clarifying question.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.pipeline.buffer_capacity, 2);
        assert_eq!(config.news.feed_url, DEFAULT_FEED_URL);
        assert_eq!(config.speech.backends.len(), 2);
    }

    #[test]
    fn test_partial_settings_override() {
        let config = Config::from_str(
            r#"
            [settings]
            debate_rounds = 2
            auto_play = false

            [settings.voices]
            mark = "af_sky"
            "#,
        )
        .unwrap();
        assert_eq!(config.settings.debate_rounds, 2);
        assert!(!config.settings.auto_play);
        assert_eq!(config.settings.voice_for(Debater::Mark), "af_sky");
        assert_eq!(config.settings.voice_for(Debater::Tom), "bm_daniel");
        assert_eq!(config.settings.char_limit, 280);
    }

    #[test]
    fn test_speech_backends_parse() {
        let config = Config::from_str(
            r#"
            [speech]
            backends = [
                { kind = "http", base_url = "http://tts-a/v1" },
                { kind = "local" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.speech.backends[0],
            SpeechBackendConfig::Http {
                base_url: "http://tts-a/v1".to_string(),
                model: "kokoro".to_string(),
                api_key: None,
            }
        );
        assert_eq!(config.speech.backends[1], SpeechBackendConfig::Local);
    }

    #[test]
    fn test_zero_buffer_is_rejected() {
        let err = Config::from_str("[pipeline]\nbuffer_capacity = 0").unwrap_err();
        assert!(matches!(err, DebateError::ConfigError(_)));
    }

    #[test]
    fn test_settings_are_clamped() {
        let settings = Settings {
            context_turns: 0,
            char_limit: 5000,
            speech_volume: 250,
            speech_rate: 10,
            debate_rounds: 0,
            ..Settings::default()
        }
        .clamped();
        assert_eq!(settings.context_turns, 1);
        assert_eq!(settings.char_limit, 500);
        assert_eq!(settings.speech_volume, 100);
        assert_eq!(settings.speech_rate, 50);
        assert_eq!(settings.debate_rounds, 1);
    }

    #[test]
    fn test_derived_limits() {
        let settings = Settings::default();
        assert_eq!(settings.max_turns(), 15);
        assert_eq!(settings.history_len(), 12);
        // 280 / 2.2 = 127.27...
        assert_eq!(settings.max_tokens(), 128);
    }

    #[test]
    fn test_get_prompt_replaces_placeholders() {
        let config = default_config();
        let prompt = config.get_prompt(Debater::Sam, "Tom: hi", 120);
        assert!(prompt.starts_with("You are Sam"));
        assert!(prompt.contains("Tom: hi"));
        assert!(prompt.contains("under 120 characters"));
    }
}
