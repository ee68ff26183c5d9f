//! Terminal chat client for the assistant backend.

mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use assistant_core::{
    ChatMode, Conversation, DEFAULT_SESSION_ID, ExchangeOptions, ExchangeOutcome, MessageDraft,
    ThinkingDisplay, Transcript, TranscriptChange, init_observability,
};
use assistant_stream::{BackendConfig, HttpBackend};
use clap::Parser;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::render::Renderer;

#[derive(Parser, Debug)]
#[command(name = "assistant")]
#[command(about = "Chat with the assistant backend from the terminal")]
#[command(version)]
struct Cli {
    /// Backend base URL; overrides ASSISTANT_API_BASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Chat mode: chat, focus or text2sql
    #[arg(long, default_value = "chat")]
    mode: ChatMode,

    /// Session id sent with streamed exchanges
    #[arg(long, default_value = DEFAULT_SESSION_ID)]
    session_id: String,

    /// Keep reasoning in the thinking state until the first answer fragment
    #[arg(long)]
    hold_thinking: bool,

    /// Request timeout in seconds; overrides ASSISTANT_TIMEOUT_SECS
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Probe backend health and exit
    #[arg(long)]
    check: bool,

    /// Send one message and exit instead of starting the interactive loop
    #[arg(long, short)]
    message: Option<String>,
}

impl Cli {
    fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        let mut config = BackendConfig::from_env().context("invalid backend environment")?;
        if let Some(base_url) = &self.base_url {
            config = config.base_url(base_url.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.request_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    fn exchange_options(&self) -> ExchangeOptions {
        let display = if self.hold_thinking {
            ThinkingDisplay::HoldUntilAnswer
        } else {
            ThinkingDisplay::FlipToAnswer
        };
        ExchangeOptions::default().with_thinking_display(display)
    }
}

/// Interactive session state.
struct Session {
    conversation: Conversation,
    feed: broadcast::Receiver<TranscriptChange>,
    renderer: Renderer,
    mode: ChatMode,
    session_id: String,
}

impl Session {
    /// Runs one exchange, rendering transcript changes while it is in flight.
    ///
    /// Ctrl-C cancels a streamed exchange.
    async fn exchange(&mut self, text: &str) -> anyhow::Result<ExchangeOutcome> {
        if !self.mode.is_streamed() {
            let report = self
                .conversation
                .complete_single_shot_exchange(text, self.mode)
                .await;
            self.renderer.drain(&mut self.feed);
            return Ok(report.outcome);
        }

        self.conversation.transcript().append(MessageDraft::user(text));
        let handle = self
            .conversation
            .begin_streamed_exchange(text, self.mode, &self.session_id);
        let cancel = handle.cancel_handle();
        let join = handle.join();
        tokio::pin!(join);
        let outcome = loop {
            tokio::select! {
                outcome = &mut join => break outcome?,
                received = self.feed.recv() => self.renderer.print_received(received),
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    info!("cancelling exchange");
                    cancel.cancel();
                }
            }
        };
        self.renderer.drain(&mut self.feed);
        Ok(outcome)
    }

    /// Handles a `/command`. Returns `false` when the loop should stop.
    fn command(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("/quit" | "/exit") => return false,
            Some("/clear") => {
                self.conversation.transcript().clear();
                self.renderer.drain(&mut self.feed);
            }
            Some("/mode") => match parts.next().map(str::parse::<ChatMode>) {
                Some(Ok(mode)) => {
                    self.mode = mode;
                    println!("mode: {} ({})", mode.display_name(), mode.description());
                    println!("{}", mode.placeholder());
                }
                Some(Err(err)) => println!("{err}"),
                None => print_modes(self.mode),
            },
            _ => println!("commands: /mode <chat|focus|text2sql>, /clear, /quit"),
        }
        true
    }
}

fn print_modes(current: ChatMode) {
    for mode in ChatMode::ALL {
        let marker = if mode == current { "*" } else { " " };
        println!("{marker} {:<9} {:<9} {}", mode.as_str(), mode.display_name(), mode.description());
    }
}

fn describe(outcome: &ExchangeOutcome) -> Option<&'static str> {
    match outcome {
        ExchangeOutcome::Cancelled => Some("(cancelled)"),
        ExchangeOutcome::Failed(_) => Some("(exchange failed)"),
        ExchangeOutcome::Answered | ExchangeOutcome::ThinkingOnly => None,
    }
}

async fn run_interactive(mut session: Session) -> anyhow::Result<()> {
    session.conversation.greet();
    session.renderer.drain(&mut session.feed);
    println!();
    print_modes(session.mode);
    println!("{}", session.mode.placeholder());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n[{}] you> ", session.mode.as_str());
        std::io::Write::flush(&mut std::io::stdout())?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            if !session.command(line) {
                break;
            }
            continue;
        }
        let outcome = session.exchange(line).await?;
        if let Some(note) = describe(&outcome) {
            println!("\n{note}");
        }
    }
    println!("bye");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_observability("warn");

    let cli = Cli::parse();
    debug!(?cli, "parsed arguments");
    let config = cli.backend_config()?;
    info!(base_url = %config.base_url, "using backend");
    let backend = Arc::new(HttpBackend::new(config).context("failed to create backend client")?);
    let conversation =
        Conversation::new(Transcript::new(), backend).with_options(cli.exchange_options());

    if cli.check {
        if conversation.check_health().await {
            println!("backend healthy");
            return Ok(());
        }
        anyhow::bail!("backend unreachable or unhealthy");
    }

    let feed = conversation.transcript().subscribe();
    let mut session = Session {
        conversation,
        feed,
        renderer: Renderer::new(),
        mode: cli.mode,
        session_id: cli.session_id,
    };

    match cli.message {
        Some(message) => {
            let message = message.trim();
            if message.is_empty() {
                anyhow::bail!("message is empty");
            }
            let outcome = session.exchange(message).await?;
            println!();
            match outcome {
                ExchangeOutcome::Failed(err) => Err(err).context("exchange failed"),
                _ => Ok(()),
            }
        }
        None => run_interactive(session).await,
    }
}
