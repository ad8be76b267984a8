//! Debate session state machine.
//!
//! `DebateSession` owns every piece of debate state: lifecycle, turn queue,
//! counters, transcript and the news board. It never performs I/O. Each
//! [`Command`] or [`Completion`] is applied as one atomic step, after which
//! the three pipeline stages are re-evaluated and any work they want done is
//! returned as [`Effect`]s for the controller to execute.

use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_TOPIC, Settings};
use crate::debater::Debater;
use crate::error::DebateError;
use crate::inference::ReplyRequest;
use crate::news::NewsItem;
use crate::transcript::{Message, Sender, Transcript};
use crate::tts::AudioHandle;
use crate::turn::{TurnId, TurnQueue, TurnStatus};

/// Characters of the topic quoted in the conclusion notice.
const TOPIC_PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateState {
    Idle,
    Connecting,
    Running,
    Stopping,
}

impl fmt::Display for DebateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebateState::Idle => "idle",
            DebateState::Connecting => "connecting",
            DebateState::Running => "running",
            DebateState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Requests from the user interface.
#[derive(Debug, Clone)]
pub enum Command {
    /// Start a debate. An explicit topic wins over the selected news item.
    Start { topic: Option<String> },
    Stop,
    /// Add a user note to the transcript.
    Inject(String),
    UpdateSettings(Settings),
    /// Choose the news item used for the next start; ignored while running.
    SelectNews(Option<usize>),
    RefreshNews,
}

/// Results of work requested through an [`Effect`].
#[derive(Debug)]
pub enum Completion {
    Connected(Result<(), DebateError>),
    Reply {
        turn: TurnId,
        result: Result<String, DebateError>,
    },
    Speech {
        turn: TurnId,
        result: Result<AudioHandle, DebateError>,
    },
    /// Playback of a turn finished (or failed, which counts as finished).
    Played { turn: TurnId },
    News(Result<Vec<NewsItem>, DebateError>),
}

/// Work for the controller to carry out.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Run the debater connection handshake.
    Connect,
    Reply {
        turn: TurnId,
        request: ReplyRequest,
    },
    Speech {
        turn: TurnId,
        text: String,
        voice: String,
    },
    Play {
        turn: TurnId,
        audio: Option<AudioHandle>,
        volume: f32,
        rate: f32,
    },
    /// Abandon all in-flight reply, speech and playback work.
    Halt,
    FetchNews { feed_url: String },
}

/// Notifications for the user interface.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// A message was appended to the transcript.
    Message(Message),
    /// The transcript was emptied for a new debate.
    TranscriptCleared,
    /// Debater with an outstanding reply request.
    Thinking(Option<Debater>),
    /// Debater currently being voiced.
    NowPlaying(Option<Debater>),
    State(DebateState),
    SettingsChanged(Settings),
    NewsLoading,
    NewsLoaded {
        items: Vec<NewsItem>,
        selected: Option<usize>,
    },
    NewsFailed(String),
    NewsSelected(Option<usize>),
}

/// Fetched news items and the current selection.
#[derive(Debug, Clone, Default)]
pub struct NewsBoard {
    pub items: Vec<NewsItem>,
    pub selected: Option<usize>,
    pub loading: bool,
    pub error: Option<String>,
}

impl NewsBoard {
    pub fn selected_item(&self) -> Option<&NewsItem> {
        self.selected.and_then(|i| self.items.get(i))
    }
}

/// Outcome of evaluating one stage.
enum Step {
    Idle,
    /// State changed without any external work.
    Advanced,
    Dispatch(Effect),
}

pub struct DebateSession {
    state: DebateState,
    connected: bool,
    settings: Settings,
    buffer_capacity: usize,
    feed_url: String,
    queue: TurnQueue,
    turns_completed: usize,
    transcript: Transcript,
    topic: String,
    thinking: Option<Debater>,
    now_playing: Option<Debater>,
    playing: Option<TurnId>,
    news_cycle: bool,
    news: NewsBoard,
    /// Requested topic held while the connection handshake runs.
    pending_start: Option<Option<String>>,
    events: Vec<DebateEvent>,
}

impl DebateSession {
    pub fn new(config: &Config) -> Self {
        Self {
            state: DebateState::Idle,
            connected: false,
            settings: config.settings.clone().clamped(),
            buffer_capacity: config.pipeline.buffer_capacity.max(1),
            feed_url: config.news.feed_url.clone(),
            queue: TurnQueue::new(),
            turns_completed: 0,
            transcript: Transcript::new(),
            topic: String::new(),
            thinking: None,
            now_playing: None,
            playing: None,
            news_cycle: false,
            news: NewsBoard::default(),
            pending_start: None,
            events: Vec::new(),
        }
    }

    pub fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        let mut effects = Vec::new();
        match command {
            Command::Start { topic } => self.request_start(topic, &mut effects),
            Command::Stop => self.user_stop(&mut effects),
            Command::Inject(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    self.system(format!(
                        "A new point has been injected into the debate: \"{}\"",
                        text
                    ));
                }
            }
            Command::UpdateSettings(settings) => {
                self.settings = settings.clamped();
                self.events
                    .push(DebateEvent::SettingsChanged(self.settings.clone()));
                self.check_exhausted(&mut effects);
            }
            Command::SelectNews(index) => self.select_news(index),
            Command::RefreshNews => {
                if !self.news.loading {
                    self.news.loading = true;
                    self.news.error = None;
                    self.events.push(DebateEvent::NewsLoading);
                    effects.push(Effect::FetchNews {
                        feed_url: self.feed_url.clone(),
                    });
                }
            }
        }
        self.schedule(&mut effects);
        effects
    }

    pub fn handle_completion(&mut self, completion: Completion) -> Vec<Effect> {
        let mut effects = Vec::new();
        match completion {
            Completion::Connected(result) => self.on_connected(result, &mut effects),
            Completion::Reply { turn, result } => self.on_reply(turn, result, &mut effects),
            Completion::Speech { turn, result } => self.on_speech(turn, result),
            Completion::Played { turn } => self.on_played(turn, &mut effects),
            Completion::News(result) => self.on_news(result),
        }
        self.schedule(&mut effects);
        effects
    }

    /// Take the notifications produced since the last call.
    pub fn drain_events(&mut self) -> Vec<DebateEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn state(&self) -> DebateState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == DebateState::Running
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn queue(&self) -> &TurnQueue {
        &self.queue
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn turns_completed(&self) -> usize {
        self.turns_completed
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn thinking(&self) -> Option<Debater> {
        self.thinking
    }

    pub fn now_playing(&self) -> Option<Debater> {
        self.now_playing
    }

    pub fn news_cycle(&self) -> bool {
        self.news_cycle
    }

    pub fn news(&self) -> &NewsBoard {
        &self.news
    }

    // --- lifecycle ---

    fn request_start(&mut self, topic: Option<String>, effects: &mut Vec<Effect>) {
        if self.state != DebateState::Idle {
            debug!(state = %self.state, "start ignored");
            return;
        }
        if self.connected {
            self.launch(topic, effects);
            return;
        }
        self.set_state(DebateState::Connecting);
        self.system("Connecting to AI debaters...");
        self.pending_start = Some(topic);
        effects.push(Effect::Connect);
    }

    fn on_connected(&mut self, result: Result<(), DebateError>, effects: &mut Vec<Effect>) {
        let pending = self.pending_start.take();
        match result {
            Ok(()) => {
                self.connected = true;
                match pending {
                    Some(topic) if self.state == DebateState::Connecting => {
                        self.system("Connection successful! Starting debate...");
                        self.launch(topic, effects);
                    }
                    _ => debug!("connected without a pending start"),
                }
            }
            Err(e) => {
                error!(error = %e, "failed to connect to debaters");
                if self.state == DebateState::Connecting {
                    self.system(format!("Failed to connect to models: {}", e));
                    self.set_state(DebateState::Idle);
                }
            }
        }
    }

    /// User-initiated start: pick the topic, reset the transcript, run.
    fn launch(&mut self, requested: Option<String>, effects: &mut Vec<Effect>) {
        let requested = requested
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        self.transcript.clear();
        self.events.push(DebateEvent::TranscriptCleared);

        let topic = if let Some(topic) = requested {
            self.news_cycle = false;
            topic
        } else if let Some(item) = self.news.selected_item() {
            let topic = item.topic();
            self.news_cycle = true;
            topic
        } else {
            self.news_cycle = false;
            self.system("No topic provided. Starting a general debate.");
            DEFAULT_TOPIC.to_string()
        };

        self.begin_debate(topic, effects);
    }

    /// Reset the pipeline for `topic` and enter `Running`. The transcript is
    /// left as is.
    fn begin_debate(&mut self, topic: String, effects: &mut Vec<Effect>) {
        effects.push(Effect::Halt);
        self.queue.clear();
        self.turns_completed = 0;
        self.playing = None;
        self.set_thinking(None);
        self.set_now_playing(None);

        info!(topic = %topic, news_cycle = self.news_cycle, "debate starting");
        self.system(format!("Debate Topic: {}", topic));
        self.topic = topic;
        self.set_state(DebateState::Running);
    }

    fn user_stop(&mut self, effects: &mut Vec<Effect>) {
        match self.state {
            DebateState::Running => {
                self.stop(effects);
                self.system("Debate stopped by user.");
            }
            DebateState::Connecting => {
                self.pending_start = None;
                self.set_state(DebateState::Idle);
                self.system("Debate stopped by user.");
            }
            _ => debug!(state = %self.state, "stop ignored"),
        }
    }

    fn stop(&mut self, effects: &mut Vec<Effect>) {
        self.set_state(DebateState::Stopping);
        effects.push(Effect::Halt);
        self.news_cycle = false;
        self.queue.clear();
        self.playing = None;
        self.set_thinking(None);
        self.set_now_playing(None);
        self.turns_completed = 0;
        self.set_state(DebateState::Idle);
        info!("debate stopped");
    }

    /// Round budget reached: chain to the next news item or stop.
    fn conclude(&mut self, effects: &mut Vec<Effect>) {
        let preview: String = self.topic.chars().take(TOPIC_PREVIEW_CHARS).collect();
        self.system(format!(
            "Debate on \"{}...\" concluded after {} rounds.",
            preview, self.settings.debate_rounds
        ));

        if !self.news_cycle {
            self.stop(effects);
            return;
        }

        let next = self.news.selected.map_or(0, |i| i + 1);
        match self.news.items.get(next).map(NewsItem::topic) {
            Some(topic) => {
                self.system("Starting next debate...");
                self.news.selected = Some(next);
                self.events.push(DebateEvent::NewsSelected(Some(next)));
                self.begin_debate(topic, effects);
            }
            None => {
                self.system("News cycle complete. All topics have been debated.");
                self.stop(effects);
            }
        }
    }

    /// A settings change can shrink the round budget below what was already
    /// played; nothing else would notice.
    fn check_exhausted(&mut self, effects: &mut Vec<Effect>) {
        if self.is_running()
            && self.playing.is_none()
            && self.queue.is_empty()
            && self.turns_completed >= self.settings.max_turns()
        {
            self.conclude(effects);
        }
    }

    // --- pipeline stages ---

    fn schedule(&mut self, effects: &mut Vec<Effect>) {
        loop {
            let mut advanced = false;
            for step in [self.text_stage(), self.speech_stage(), self.playback_stage()] {
                match step {
                    Step::Idle => {}
                    Step::Advanced => advanced = true,
                    Step::Dispatch(effect) => {
                        effects.push(effect);
                        advanced = true;
                    }
                }
            }
            if !advanced {
                break;
            }
        }
    }

    /// Producer 1: keep the buffer topped up with reply requests.
    fn text_stage(&mut self) -> Step {
        if !self.is_running() || self.queue.any_with_status(TurnStatus::PendingText) {
            return Step::Idle;
        }
        let queued = self.queue.len();
        let turn_number = self.turns_completed + queued;
        if turn_number >= self.settings.max_turns() || queued >= self.buffer_capacity {
            return Step::Idle;
        }

        let debater = Debater::for_turn(turn_number);
        let turn = self.queue.enqueue(debater);
        self.set_thinking(Some(debater));
        debug!(%debater, turn_number, "requesting reply");

        Step::Dispatch(Effect::Reply {
            turn,
            request: ReplyRequest {
                debater,
                history: self.transcript.recent(self.settings.history_len()),
                settings: self.settings.clone(),
            },
        })
    }

    /// Producer 2: voice the oldest turn whose text is ready.
    fn speech_stage(&mut self) -> Step {
        if !self.is_running()
            || !self.settings.auto_play
            || self.queue.any_with_status(TurnStatus::PendingAudio)
        {
            return Step::Idle;
        }
        let Some(turn) = self.queue.first_with_status(TurnStatus::TextReady) else {
            return Step::Idle;
        };
        let (id, sender, has_text) = (turn.id, turn.sender, turn.has_text());
        let text = turn.text.clone().unwrap_or_default();

        if let Err(e) = self.queue.audio_pending(id) {
            warn!(error = %e, "speech stage transition failed");
            return Step::Idle;
        }
        if !has_text {
            // Nothing to say; let playback drop it.
            if let Err(e) = self.queue.audio_ready(id, None) {
                warn!(error = %e, "speech stage transition failed");
            }
            return Step::Advanced;
        }

        Step::Dispatch(Effect::Speech {
            turn: id,
            text,
            voice: self.settings.voice_for(sender).to_string(),
        })
    }

    /// Consumer: play the head of the queue, never anything behind it.
    fn playback_stage(&mut self) -> Step {
        if !self.is_running() || self.playing.is_some() {
            return Step::Idle;
        }
        let mut advanced = false;
        loop {
            let Some(head) = self.queue.head() else {
                break;
            };
            let playable = match head.status {
                TurnStatus::AudioReady => true,
                TurnStatus::TextReady => !self.settings.auto_play,
                TurnStatus::PendingText | TurnStatus::PendingAudio => false,
            };
            if !playable {
                break;
            }
            if !head.has_text() {
                debug!(turn = %head.id, "dropping turn without text");
                self.queue.pop_head();
                advanced = true;
                continue;
            }

            let (id, sender) = (head.id, head.sender);
            let text = head.text.clone().unwrap_or_default();
            let audio = if self.settings.auto_play {
                head.audio.clone()
            } else {
                None
            };

            self.playing = Some(id);
            self.set_now_playing(Some(sender));
            self.push_message(Sender::Debater(sender), text);
            return Step::Dispatch(Effect::Play {
                turn: id,
                audio,
                volume: self.settings.volume(),
                rate: self.settings.rate(),
            });
        }
        if advanced { Step::Advanced } else { Step::Idle }
    }

    // --- completions ---

    fn on_reply(
        &mut self,
        turn: TurnId,
        result: Result<String, DebateError>,
        effects: &mut Vec<Effect>,
    ) {
        let Some(debater) = self.live_turn_sender(turn) else {
            debug!(%turn, "discarding reply for abandoned turn");
            return;
        };
        self.set_thinking(None);

        match result {
            Ok(text) => {
                if let Err(e) = self.queue.text_ready(turn, text) {
                    warn!(error = %e, "reply for turn in unexpected state");
                }
            }
            Err(e) => {
                error!(%debater, error = %e, "reply failed");
                self.system(format!("Error from {}. Stopping debate.", debater));
                self.stop(effects);
            }
        }
    }

    fn on_speech(&mut self, turn: TurnId, result: Result<AudioHandle, DebateError>) {
        let Some(debater) = self.live_turn_sender(turn) else {
            debug!(%turn, "discarding speech for abandoned turn");
            return;
        };

        let audio = match result {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%debater, error = %e, "speech synthesis failed");
                self.system(format!(
                    "TTS Error for {}. Continuing without audio for this turn.",
                    debater
                ));
                None
            }
        };
        if let Err(e) = self.queue.audio_ready(turn, audio) {
            warn!(error = %e, "speech for turn in unexpected state");
        }
    }

    fn on_played(&mut self, turn: TurnId, effects: &mut Vec<Effect>) {
        if !self.is_running() || self.playing != Some(turn) {
            debug!(%turn, "discarding playback completion");
            return;
        }
        self.playing = None;
        self.turns_completed += 1;
        self.set_now_playing(None);
        self.queue.pop_head();

        if self.turns_completed >= self.settings.max_turns() {
            self.conclude(effects);
        }
    }

    fn on_news(&mut self, result: Result<Vec<NewsItem>, DebateError>) {
        self.news.loading = false;
        match result {
            Ok(items) => {
                // A running news cycle keeps walking its own position.
                if !self.is_running() {
                    self.news.selected = if items.is_empty() { None } else { Some(0) };
                }
                self.news.items = items;
                self.news.error = None;
                self.events.push(DebateEvent::NewsLoaded {
                    items: self.news.items.clone(),
                    selected: self.news.selected,
                });
            }
            Err(e) => {
                warn!(error = %e, "news fetch failed");
                let message = format!("Failed to fetch news: {}", e);
                self.news.error = Some(message.clone());
                self.events.push(DebateEvent::NewsFailed(message));
            }
        }
    }

    fn select_news(&mut self, index: Option<usize>) {
        if self.is_running() {
            debug!("news selection is locked while a debate runs");
            return;
        }
        if let Some(i) = index {
            if i >= self.news.items.len() {
                debug!(index = i, "news selection out of range");
                return;
            }
        }
        self.news.selected = index;
        self.events.push(DebateEvent::NewsSelected(index));
    }

    // --- helpers ---

    /// Sender of `turn` if the debate is live and the turn is still queued.
    fn live_turn_sender(&self, turn: TurnId) -> Option<Debater> {
        if !self.is_running() {
            return None;
        }
        self.queue.get(turn).map(|t| t.sender)
    }

    fn system(&mut self, text: impl Into<String>) {
        self.push_message(Sender::System, text);
    }

    fn push_message(&mut self, sender: Sender, text: impl Into<String>) {
        let message = self.transcript.push(sender, text);
        self.events.push(DebateEvent::Message(message));
    }

    fn set_state(&mut self, state: DebateState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "state change");
            self.state = state;
            self.events.push(DebateEvent::State(state));
        }
    }

    fn set_thinking(&mut self, debater: Option<Debater>) {
        if self.thinking != debater {
            self.thinking = debater;
            self.events.push(DebateEvent::Thinking(debater));
        }
    }

    fn set_now_playing(&mut self, debater: Option<Debater>) {
        if self.now_playing != debater {
            self.now_playing = debater;
            self.events.push(DebateEvent::NowPlaying(debater));
        }
    }
}
