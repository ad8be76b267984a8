//! Debater inference: connecting to the three persona models and asking
//! them for replies.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, Config, Settings};
use crate::debater::Debater;
use crate::error::DebateError;
use crate::transcript::Message;

/// Everything a debater needs to produce one reply, captured when the
/// request is issued.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub debater: Debater,
    /// Recent transcript, already bounded to the context window.
    pub history: Vec<Message>,
    pub settings: Settings,
}

/// Source of debater replies.
#[async_trait]
pub trait DebaterClient: Send + Sync {
    /// Establish sessions for all three personas. All-or-nothing; calling
    /// again after success is a no-op.
    async fn connect(&self) -> Result<(), DebateError>;

    /// Generate the next reply for `request.debater`.
    async fn reply(&self, request: ReplyRequest) -> Result<String, DebateError>;
}

/// Debaters served by an OpenAI-compatible chat completions API, one model
/// per persona.
pub struct OpenAiDebaters {
    config: Config,
    http: reqwest::Client,
    client: Client<OpenAIConfig>,
    connected: AtomicBool,
}

impl OpenAiDebaters {
    pub fn new(config: Config) -> Result<Self, DebateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let mut openai = OpenAIConfig::new().with_api_base(&config.api.api_base);
        if let Some(key) = &config.api.api_key {
            openai = openai.with_api_key(key);
        }
        let client = Client::with_config(openai).with_http_client(http.clone());

        Ok(Self {
            config,
            http,
            client,
            connected: AtomicBool::new(false),
        })
    }

    async fn check_model(&self, debater: Debater) -> Result<(), DebateError> {
        let model = &self.config.debaters.get(debater).model;
        let url = models_url(&self.config.api, model);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.config.api.api_key {
            request = request.bearer_auth(key);
        }
        request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DebateError::Connection(format!("{} ({}): {}", debater, model, e)))?;
        debug!(%debater, %model, "model reachable");
        Ok(())
    }
}

#[async_trait]
impl DebaterClient for OpenAiDebaters {
    async fn connect(&self) -> Result<(), DebateError> {
        if self.connected.load(Ordering::Acquire) {
            debug!("models already connected");
            return Ok(());
        }

        info!("connecting to AI debaters");
        tokio::try_join!(
            self.check_model(Debater::Tom),
            self.check_model(Debater::Mark),
            self.check_model(Debater::Sam),
        )?;
        self.connected.store(true, Ordering::Release);
        info!("connected to all three models");
        Ok(())
    }

    async fn reply(&self, request: ReplyRequest) -> Result<String, DebateError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(DebateError::NotConnected);
        }

        let ReplyRequest {
            debater,
            history,
            settings,
        } = request;
        let prompt = self
            .config
            .get_prompt(debater, &format_history(&history), settings.char_limit);

        let completion = CreateChatCompletionRequestArgs::default()
            .model(&self.config.debaters.get(debater).model)
            .max_completion_tokens(settings.max_tokens())
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: prompt.into(),
                    name: None,
                },
            )])
            .build()?;

        let response = self.client.chat().create(completion).await?;
        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let reply = sanitize_response(&content);
        if reply.is_empty() {
            warn!(%debater, "model returned an empty reply");
        }
        Ok(reply)
    }
}

fn models_url(api: &ApiConfig, model: &str) -> String {
    format!("{}/models/{}", api.api_base.trim_end_matches('/'), model)
}

/// Render transcript lines as `Sender: text`.
pub fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.sender, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

static REASONING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(thinking|think|reflection|reflect|internal|reasoning|thought|scratchpad|scratch|plan|analysis)\b[^>]*>.*?</(thinking|think|reflection|reflect|internal|reasoning|thought|scratchpad|scratch|plan|analysis)>",
    )
    .expect("valid reasoning regex")
});

static ORPHAN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?\w+[^>]*>").expect("valid tag regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Strip reasoning blocks, stray tags, markdown emphasis and extra
/// whitespace from a model reply.
pub fn sanitize_response(response: &str) -> String {
    let result = REASONING_BLOCK.replace_all(response, "");
    let result = ORPHAN_TAG.replace_all(&result, "");
    let result = result.replace('*', "");
    WHITESPACE.replace_all(&result, " ").trim().to_string()
}
