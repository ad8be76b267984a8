//! Async driver for a [`DebateSession`].
//!
//! The controller owns the session and is the only place it is mutated.
//! Commands from the UI and results from collaborator tasks are applied one
//! at a time; the effects the session asks for are spawned as tasks whose
//! results come back as completions.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::{Config, Settings};
use crate::error::DebateError;
use crate::inference::{DebaterClient, OpenAiDebaters};
use crate::news::{NewsFeed, RssFeed};
use crate::playback::{PlaybackDevice, ProcessPlayer, SilentPlayer};
use crate::session::{Command, Completion, DebateEvent, DebateSession, Effect};
use crate::tts::{RotatingSynthesizer, SpeechSynthesizer};

/// Callback for debate events.
pub type DebateCallback = Box<dyn Fn(DebateEvent) + Send + Sync>;

const COMMAND_BUFFER: usize = 32;

/// External services the debate depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub debaters: Arc<dyn DebaterClient>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub player: Arc<dyn PlaybackDevice>,
    pub news: Arc<dyn NewsFeed>,
}

impl Collaborators {
    /// Production collaborators. With `audio` off clips are never played.
    pub fn from_config(config: &Config, audio: bool) -> Result<Self, DebateError> {
        let player: Arc<dyn PlaybackDevice> = if audio {
            Arc::new(ProcessPlayer::new(config.playback.program.clone()))
        } else {
            Arc::new(SilentPlayer)
        };
        Ok(Self {
            debaters: Arc::new(OpenAiDebaters::new(config.clone())?),
            speech: Arc::new(RotatingSynthesizer::from_config(&config.speech)?),
            player,
            news: Arc::new(RssFeed::new()?),
        })
    }
}

/// Cloneable sender side of a running controller.
#[derive(Clone)]
pub struct DebateHandle {
    commands: mpsc::Sender<Command>,
}

impl DebateHandle {
    pub async fn send(&self, command: Command) -> Result<(), DebateError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DebateError::ControllerClosed)
    }

    pub async fn start(&self, topic: Option<String>) -> Result<(), DebateError> {
        self.send(Command::Start { topic }).await
    }

    pub async fn stop(&self) -> Result<(), DebateError> {
        self.send(Command::Stop).await
    }

    pub async fn inject(&self, text: impl Into<String>) -> Result<(), DebateError> {
        self.send(Command::Inject(text.into())).await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<(), DebateError> {
        self.send(Command::UpdateSettings(settings)).await
    }

    pub async fn select_news(&self, index: Option<usize>) -> Result<(), DebateError> {
        self.send(Command::SelectNews(index)).await
    }

    pub async fn refresh_news(&self) -> Result<(), DebateError> {
        self.send(Command::RefreshNews).await
    }
}

pub struct DebateController {
    session: DebateSession,
    collaborators: Collaborators,
    callback: Option<DebateCallback>,
    commands: mpsc::Receiver<Command>,
    /// Reply, speech and playback work; aborted wholesale on halt.
    pipeline: JoinSet<Completion>,
    /// Connection and news work, which outlives a stopped debate.
    background: JoinSet<Completion>,
}

impl DebateController {
    pub fn new(config: &Config, collaborators: Collaborators) -> (Self, DebateHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let controller = Self {
            session: DebateSession::new(config),
            collaborators,
            callback: None,
            commands: rx,
            pipeline: JoinSet::new(),
            background: JoinSet::new(),
        };
        (controller, DebateHandle { commands: tx })
    }

    /// Set a callback for debate events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands and completions until every handle is dropped.
    pub async fn run(mut self) {
        info!("debate controller started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    debug!(?command, "command received");
                    let effects = self.session.handle_command(command);
                    self.apply(effects);
                }
                Some(joined) = self.pipeline.join_next(), if !self.pipeline.is_empty() => {
                    self.complete(joined);
                }
                Some(joined) = self.background.join_next(), if !self.background.is_empty() => {
                    self.complete(joined);
                }
            }
            self.emit_events();
        }
        self.pipeline.abort_all();
        self.background.abort_all();
        info!("debate controller stopped");
    }

    fn complete(&mut self, joined: Result<Completion, JoinError>) {
        match joined {
            Ok(completion) => {
                let effects = self.session.handle_completion(completion);
                self.apply(effects);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "debate task panicked"),
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Connect => {
                    let debaters = Arc::clone(&self.collaborators.debaters);
                    self.background
                        .spawn(async move { Completion::Connected(debaters.connect().await) });
                }
                Effect::Reply { turn, request } => {
                    let debaters = Arc::clone(&self.collaborators.debaters);
                    self.pipeline.spawn(async move {
                        Completion::Reply {
                            turn,
                            result: debaters.reply(request).await,
                        }
                    });
                }
                Effect::Speech { turn, text, voice } => {
                    let speech = Arc::clone(&self.collaborators.speech);
                    self.pipeline.spawn(async move {
                        Completion::Speech {
                            turn,
                            result: speech.synthesize(&text, &voice).await,
                        }
                    });
                }
                Effect::Play {
                    turn,
                    audio,
                    volume,
                    rate,
                } => {
                    let player = Arc::clone(&self.collaborators.player);
                    self.pipeline.spawn(async move {
                        if let Some(clip) = audio {
                            if let Err(e) = player.play(&clip, volume, rate).await {
                                warn!(%turn, error = %e, "playback failed");
                            }
                        }
                        Completion::Played { turn }
                    });
                }
                Effect::Halt => {
                    if !self.pipeline.is_empty() {
                        debug!(tasks = self.pipeline.len(), "halting pipeline");
                    }
                    self.pipeline.abort_all();
                }
                Effect::FetchNews { feed_url } => {
                    let news = Arc::clone(&self.collaborators.news);
                    self.background
                        .spawn(async move { Completion::News(news.fetch(&feed_url).await) });
                }
            }
        }
    }

    fn emit_events(&mut self) {
        for event in self.session.drain_events() {
            if let Some(ref callback) = self.callback {
                callback(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debater::Debater;
    use crate::inference::ReplyRequest;
    use crate::news::NewsItem;
    use crate::session::DebateState;
    use crate::transcript::Sender;
    use crate::tts::AudioHandle;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeDebaters {
        connects: AtomicUsize,
        replies: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl DebaterClient for FakeDebaters {
        async fn connect(&self) -> Result<(), DebateError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reply(&self, request: ReplyRequest) -> Result<String, DebateError> {
            let n = self.replies.fetch_add(1, Ordering::SeqCst) + 1;
            // Later speakers answer faster than earlier ones.
            let delay = match request.debater {
                Debater::Tom => 12,
                Debater::Mark => 6,
                Debater::Sam => 1,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.fail_on == Some(n) {
                return Err(DebateError::Connection("model crashed".to_string()));
            }
            Ok(format!("{} point {}", request.debater, n))
        }
    }

    #[derive(Default)]
    struct FakeSpeech {
        calls: AtomicUsize,
        fail_on: Option<usize>,
        /// Write real temp clips here instead of returning bare locators.
        clip_dir: Option<PathBuf>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(&self, text: &str, _voice: &str) -> Result<AudioHandle, DebateError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(DebateError::TtsError("all services down".to_string()));
            }
            match &self.clip_dir {
                Some(dir) => {
                    let clip = tempfile::Builder::new()
                        .suffix(".wav")
                        .tempfile_in(dir)?
                        .into_temp_path();
                    std::fs::write(&clip, text)?;
                    Ok(AudioHandle::temp_clip(clip))
                }
                None => Ok(AudioHandle::new(text)),
            }
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakePlayer {
        played: Mutex<Vec<String>>,
        block: bool,
        started: Notify,
        halted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PlaybackDevice for FakePlayer {
        async fn play(&self, clip: &AudioHandle, _volume: f32, _rate: f32) -> Result<(), DebateError> {
            self.played.lock().unwrap().push(clip.to_string());
            self.started.notify_one();
            if self.block {
                let _guard = DropFlag(Arc::clone(&self.halted));
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(())
        }
    }

    struct FakeNews(Vec<NewsItem>);

    #[async_trait]
    impl NewsFeed for FakeNews {
        async fn fetch(&self, _feed_url: &str) -> Result<Vec<NewsItem>, DebateError> {
            Ok(self.0.clone())
        }
    }

    struct Harness {
        handle: DebateHandle,
        events: mpsc::UnboundedReceiver<DebateEvent>,
        log: Vec<DebateEvent>,
    }

    impl Harness {
        fn new(rounds: usize, collaborators: Collaborators) -> Self {
            let mut config = Config::default();
            config.settings.debate_rounds = rounds;
            let (tx, rx) = mpsc::unbounded_channel();
            let (controller, handle) = DebateController::new(&config, collaborators);
            controller
                .with_callback(Box::new(move |event| {
                    let _ = tx.send(event);
                }))
                .spawn();
            Self {
                handle,
                events: rx,
                log: Vec::new(),
            }
        }

        async fn wait_for(&mut self, matches: impl Fn(&DebateEvent) -> bool) {
            let found = tokio::time::timeout(Duration::from_secs(5), async {
                while let Some(event) = self.events.recv().await {
                    let hit = matches(&event);
                    self.log.push(event);
                    if hit {
                        return true;
                    }
                }
                false
            })
            .await;
            assert_eq!(found, Ok(true), "expected event never arrived");
        }

        async fn wait_idle(&mut self) {
            self.wait_for(|e| matches!(e, DebateEvent::State(DebateState::Idle)))
                .await;
        }

        fn speakers(&self) -> Vec<Debater> {
            self.log
                .iter()
                .filter_map(|e| match e {
                    DebateEvent::Message(m) => match m.sender {
                        Sender::Debater(d) => Some(d),
                        Sender::System => None,
                    },
                    _ => None,
                })
                .collect()
        }

        fn debater_texts(&self) -> Vec<String> {
            self.log
                .iter()
                .filter_map(|e| match e {
                    DebateEvent::Message(m) if m.sender != Sender::System => Some(m.text.clone()),
                    _ => None,
                })
                .collect()
        }

        fn system_texts(&self) -> Vec<String> {
            self.log
                .iter()
                .filter_map(|e| match e {
                    DebateEvent::Message(m) if m.sender == Sender::System => Some(m.text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    fn collaborators(
        debaters: Arc<FakeDebaters>,
        speech: Arc<FakeSpeech>,
        player: Arc<FakePlayer>,
        news: Vec<NewsItem>,
    ) -> Collaborators {
        Collaborators {
            debaters,
            speech,
            player,
            news: Arc::new(FakeNews(news)),
        }
    }

    #[tokio::test]
    async fn test_debate_plays_in_order_and_concludes() {
        let debaters = Arc::new(FakeDebaters::default());
        let player = Arc::new(FakePlayer::default());
        let mut harness = Harness::new(
            2,
            collaborators(
                Arc::clone(&debaters),
                Arc::new(FakeSpeech::default()),
                Arc::clone(&player),
                Vec::new(),
            ),
        );

        harness.handle.start(Some("tea".to_string())).await.unwrap();
        harness.wait_idle().await;

        let expected: Vec<Debater> = (0..6).map(Debater::for_turn).collect();
        assert_eq!(harness.speakers(), expected);
        // Each clip was voiced from the text shown with it.
        assert_eq!(*player.played.lock().unwrap(), harness.debater_texts());
        assert_eq!(debaters.connects.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.system_texts().last().unwrap(),
            "Debate on \"tea...\" concluded after 2 rounds."
        );
    }

    #[tokio::test]
    async fn test_speech_failure_keeps_debate_going() {
        let player = Arc::new(FakePlayer::default());
        let speech = Arc::new(FakeSpeech {
            fail_on: Some(2),
            ..FakeSpeech::default()
        });
        let mut harness = Harness::new(
            2,
            collaborators(
                Arc::new(FakeDebaters::default()),
                speech,
                Arc::clone(&player),
                Vec::new(),
            ),
        );

        harness.handle.start(Some("tea".to_string())).await.unwrap();
        harness.wait_idle().await;

        assert_eq!(harness.speakers().len(), 6);
        assert_eq!(player.played.lock().unwrap().len(), 5);
        assert!(
            harness
                .system_texts()
                .contains(&"TTS Error for Mark. Continuing without audio for this turn.".to_string())
        );
    }

    #[tokio::test]
    async fn test_reply_failure_stops_debate() {
        let debaters = Arc::new(FakeDebaters {
            fail_on: Some(3),
            ..FakeDebaters::default()
        });
        let mut harness = Harness::new(
            2,
            collaborators(
                Arc::clone(&debaters),
                Arc::new(FakeSpeech::default()),
                Arc::new(FakePlayer::default()),
                Vec::new(),
            ),
        );

        harness.handle.start(Some("tea".to_string())).await.unwrap();
        harness.wait_idle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(debaters.replies.load(Ordering::SeqCst), 3);
        assert!(harness.speakers().len() <= 2);
        assert!(
            harness
                .system_texts()
                .contains(&"Error from Sam. Stopping debate.".to_string())
        );
    }

    #[tokio::test]
    async fn test_stop_halts_playback() {
        let player = Arc::new(FakePlayer {
            block: true,
            ..FakePlayer::default()
        });
        let mut harness = Harness::new(
            2,
            collaborators(
                Arc::new(FakeDebaters::default()),
                Arc::new(FakeSpeech::default()),
                Arc::clone(&player),
                Vec::new(),
            ),
        );

        harness.handle.start(Some("tea".to_string())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), player.started.notified())
            .await
            .expect("playback never started");

        harness.handle.stop().await.unwrap();
        harness.wait_idle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(player.halted.load(Ordering::SeqCst));
        assert_eq!(player.played.lock().unwrap().len(), 1);
        assert_eq!(
            harness.system_texts().last().unwrap(),
            "Debate stopped by user."
        );
        while let Ok(event) = harness.events.try_recv() {
            assert!(
                !matches!(event, DebateEvent::Message(ref m) if m.sender != Sender::System),
                "debater spoke after stop"
            );
        }
    }

    #[tokio::test]
    async fn test_connects_once_across_debates() {
        let debaters = Arc::new(FakeDebaters::default());
        let mut harness = Harness::new(
            1,
            collaborators(
                Arc::clone(&debaters),
                Arc::new(FakeSpeech::default()),
                Arc::new(FakePlayer::default()),
                Vec::new(),
            ),
        );

        harness.handle.start(Some("tea".to_string())).await.unwrap();
        harness.wait_idle().await;
        harness.handle.start(Some("coffee".to_string())).await.unwrap();
        harness.wait_idle().await;

        assert_eq!(debaters.connects.load(Ordering::SeqCst), 1);
        let notices = harness
            .system_texts()
            .iter()
            .filter(|t| *t == "Connecting to AI debaters...")
            .count();
        assert_eq!(notices, 1);
        assert_eq!(harness.speakers().len(), 6);
    }

    #[tokio::test]
    async fn test_news_cycle_runs_every_item() {
        let items = ["Moon", "Mars"]
            .iter()
            .map(|title| NewsItem {
                title: title.to_string(),
                link: String::new(),
                pub_date: String::new(),
                description: "summary".to_string(),
            })
            .collect();
        let mut harness = Harness::new(
            1,
            collaborators(
                Arc::new(FakeDebaters::default()),
                Arc::new(FakeSpeech::default()),
                Arc::new(FakePlayer::default()),
                items,
            ),
        );

        harness.handle.refresh_news().await.unwrap();
        harness
            .wait_for(|e| matches!(e, DebateEvent::NewsLoaded { selected: Some(0), .. }))
            .await;
        harness.handle.start(None).await.unwrap();
        harness.wait_idle().await;

        assert_eq!(harness.speakers().len(), 6);
        let system = harness.system_texts();
        assert_eq!(
            system.iter().filter(|t| t.starts_with("Debate Topic:")).count(),
            2
        );
        assert_eq!(
            system.last().unwrap(),
            "News cycle complete. All topics have been debated."
        );
    }

    fn clip_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_clips_removed_after_playback() {
        let dir = tempfile::tempdir().unwrap();
        let player = Arc::new(FakePlayer::default());
        let speech = Arc::new(FakeSpeech {
            clip_dir: Some(dir.path().to_path_buf()),
            ..FakeSpeech::default()
        });
        let mut harness = Harness::new(
            1,
            collaborators(
                Arc::new(FakeDebaters::default()),
                speech,
                Arc::clone(&player),
                Vec::new(),
            ),
        );

        harness.handle.start(Some("tea".to_string())).await.unwrap();
        harness.wait_idle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(player.played.lock().unwrap().len(), 3);
        assert_eq!(clip_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_clips_removed_when_debate_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let player = Arc::new(FakePlayer {
            block: true,
            ..FakePlayer::default()
        });
        let speech = Arc::new(FakeSpeech {
            clip_dir: Some(dir.path().to_path_buf()),
            ..FakeSpeech::default()
        });
        let mut harness = Harness::new(
            2,
            collaborators(
                Arc::new(FakeDebaters::default()),
                speech,
                Arc::clone(&player),
                Vec::new(),
            ),
        );

        harness.handle.start(Some("tea".to_string())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), player.started.notified())
            .await
            .expect("playback never started");
        // Let the next turn's clip get synthesized while the first plays.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(clip_count(dir.path()) >= 1);

        harness.handle.stop().await.unwrap();
        harness.wait_idle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(clip_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_inject_reaches_transcript() {
        let mut harness = Harness::new(
            1,
            collaborators(
                Arc::new(FakeDebaters::default()),
                Arc::new(FakeSpeech::default()),
                Arc::new(FakePlayer::default()),
                Vec::new(),
            ),
        );

        harness.handle.inject("cats are better").await.unwrap();
        harness
            .wait_for(|e| matches!(e, DebateEvent::Message(m) if m.text.contains("cats are better")))
            .await;
    }
}
