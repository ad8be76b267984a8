//! Debate Arena CLI
//!
//! Watch three AI personas debate a topic, or a whole news cycle, in the
//! terminal. Lines typed while the debate runs are injected as new points.

use arena_core::config::{self, Config};
use arena_core::{
    Collaborators, DebateCallback, DebateController, DebateEvent, DebateState, Debater, Sender,
};
use clap::Parser;
use colored::{ColoredString, Colorize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "debate-arena",
    version,
    about = "AI Debate Arena - Watch three AIs argue it out",
    long_about = "Three AI personas debate a topic in turns, voiced through a text-to-speech pipeline. \
                  Type a line while the debate runs to inject a point; /stop ends the debate."
)]
struct Cli {
    /// The topic to debate
    #[arg(value_name = "TOPIC")]
    topic: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Rounds per debate (each debater speaks once per round)
    #[arg(short, long, value_name = "ROUNDS", value_parser = clap::value_parser!(u8).range(1..=10))]
    rounds: Option<u8>,

    /// Show text only, without synthesizing or playing speech
    #[arg(long)]
    no_audio: bool,

    /// Debate the latest news stories one after another when no topic is given
    #[arg(long)]
    news: bool,

    /// RSS feed used with --news
    #[arg(long, value_name = "URL")]
    feed_url: Option<String>,
}

/// What the main loop needs to know from the event stream.
enum Signal {
    State(DebateState),
    NewsSettled,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => config::default_config(),
    };

    if let Ok(api_base) = env::var("OPENAI_API_BASE").or_else(|_| env::var("OPENAI_BASE_URL")) {
        config.api.api_base = api_base;
    }
    if let Ok(api_key) = env::var("OPENAI_API_KEY") {
        config.api.api_key = Some(api_key);
    }
    if let Some(rounds) = cli.rounds {
        config.settings.debate_rounds = usize::from(rounds);
    }
    if cli.no_audio {
        config.settings.auto_play = false;
    }
    if let Some(feed_url) = &cli.feed_url {
        config.news.feed_url = feed_url.clone();
    }
    debug!(api_base = %config.api.api_base, "configuration loaded");

    let collaborators = Collaborators::from_config(&config, !cli.no_audio)?;
    let (signal_tx, mut signals) = mpsc::unbounded_channel();
    let (controller, handle) = DebateController::new(&config, collaborators);
    controller
        .with_callback(create_console_callback(signal_tx))
        .spawn();

    print_header(&config, cli.topic.as_deref(), cli.news);

    let topic = cli.topic.clone();
    if topic.is_none() && cli.news {
        handle.refresh_news().await?;
        while let Some(signal) = signals.recv().await {
            if matches!(signal, Signal::NewsSettled) {
                break;
            }
        }
    }
    handle.start(topic).await?;

    let input = handle.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            let sent = match line {
                "" => continue,
                "/stop" => input.stop().await,
                point => input.inject(point).await,
            };
            if sent.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(Signal::State(DebateState::Idle)) | None => break,
                Some(_) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                handle.stop().await?;
                // Give the controller a moment to halt playback.
                let _ = tokio::time::timeout(Duration::from_secs(2), async {
                    while let Some(signal) = signals.recv().await {
                        if matches!(signal, Signal::State(DebateState::Idle)) {
                            break;
                        }
                    }
                })
                .await;
                break;
            }
        }
    }

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Debate concluded.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

fn print_header(config: &Config, topic: Option<&str>, news: bool) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", "Debate Arena".bold()).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    match topic {
        Some(topic) => println!("{} {}", "Topic:".bold(), topic.bright_white()),
        None if news => println!("{} {}", "Topics:".bold(), config.news.feed_url.bright_white()),
        None => {}
    }
    println!(
        "{} {}",
        "Rounds:".bold(),
        config.settings.debate_rounds.to_string().bright_white()
    );
    println!();
    println!("{}", "Debaters:".bold());
    for debater in Debater::ALL {
        println!(
            "  {} - using {}",
            debater_color(debater, &debater.display_name()),
            config.debaters.get(debater).model.dimmed()
        );
    }
    println!();
    println!(
        "{}",
        "Type a line to inject a point, /stop to end the debate.".dimmed()
    );
    println!("{}", "─".repeat(70).dimmed());
}

fn debater_color(debater: Debater, text: &str) -> ColoredString {
    match debater {
        Debater::Tom => text.bright_cyan(),
        Debater::Mark => text.bright_red(),
        Debater::Sam => text.bright_green(),
    }
}

/// Create a callback that prints debate events to the console.
fn create_console_callback(signals: mpsc::UnboundedSender<Signal>) -> DebateCallback {
    Box::new(move |event| match event {
        DebateEvent::Message(message) => match message.sender {
            Sender::System => {
                println!("{} {}", "»".bright_magenta(), message.text.bright_magenta());
                println!();
            }
            Sender::Debater(debater) => {
                println!(
                    "{} {} {}",
                    "▶".bright_cyan(),
                    debater_color(debater, debater.name()).bold(),
                    format!("({})", debater.persona()).yellow()
                );
                // Word wrap and indent the content
                let wrapped = textwrap(&message.text, 66);
                for line in wrapped.lines() {
                    println!("  {}", line);
                }
                println!();
            }
        },
        DebateEvent::Thinking(Some(debater)) => {
            println!("{}", format!("  … {} is thinking", debater.name()).dimmed());
        }
        DebateEvent::State(state) => {
            let _ = signals.send(Signal::State(state));
        }
        DebateEvent::NewsLoaded { items, selected } => {
            let first = selected
                .and_then(|i| items.get(i))
                .map(|item| item.title.as_str())
                .unwrap_or("-");
            println!(
                "{} {} stories loaded, starting with: {}",
                "»".bright_magenta(),
                items.len(),
                first.bright_white()
            );
            println!();
            let _ = signals.send(Signal::NewsSettled);
        }
        DebateEvent::NewsFailed(error) => {
            eprintln!("{} {}", "Error:".red().bold(), error);
            let _ = signals.send(Signal::NewsSettled);
        }
        _ => {}
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_line_len + word_len + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word_len;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_breaks_on_width() {
        let wrapped = textwrap("one two three four", 9);
        assert_eq!(wrapped, "one two\nthree\nfour");
    }

    #[test]
    fn test_cli_rejects_out_of_range_rounds() {
        assert!(Cli::try_parse_from(["debate-arena", "--rounds", "11"]).is_err());
        let cli = Cli::try_parse_from(["debate-arena", "tea", "--rounds", "3", "--no-audio"]).unwrap();
        assert_eq!(cli.topic.as_deref(), Some("tea"));
        assert_eq!(cli.rounds, Some(3));
        assert!(cli.no_audio);
    }
}
