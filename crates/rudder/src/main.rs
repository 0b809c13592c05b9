//! Interactive command-line agent driven by the rudder engine.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Basic interactive session
//! rudder --model anthropic/claude-sonnet-4
//!
//! # Bounded session: hard token ceiling and turn cap
//! rudder --session-token-limit 150000 --max-session-turns 200
//!
//! # Verbose engine logging
//! rudder -v
//! ```
//!
//! In-session commands: `/compress` forces a compression pass, `/new`
//! resets the session, `/quit` exits. Ctrl-C cancels the in-flight turn.

use clap::Parser;
use rudder::context::CompressionOutcome;
use rudder::prelude::*;
use rudder::session::SessionStatus;
use rudder::session::config::RecorderConfig;
use std::io::Write as _;
use std::process;

/// Interactive command-line agent with adaptive context management.
#[derive(Parser)]
#[command(name = "rudder")]
struct Cli {
    // ── Model selection ────────────────────────────────────────
    /// Model to use
    #[arg(long, default_value = "anthropic/claude-sonnet-4")]
    model: String,

    /// System instruction for the session
    #[arg(long, default_value = "You are a helpful assistant.")]
    system: String,

    // ── Session limits ─────────────────────────────────────────
    /// Hard session token ceiling (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    session_token_limit: usize,

    /// Maximum turns for the whole session (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_session_turns: u32,

    /// Per-request turn budget (tool rounds and continuations included)
    #[arg(long, default_value_t = 100)]
    max_turns: u32,

    /// Context window size in tokens
    #[arg(long, default_value_t = 200_000)]
    context_window: usize,

    // ── Generation parameters ──────────────────────────────────
    /// Maximum tokens per model response
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.7)]
    temperature: f32,

    // ── Behavior ───────────────────────────────────────────────
    /// Retries for transient failures on auxiliary calls
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Disable session manifest recording
    #[arg(long)]
    no_record: bool,

    /// Verbose engine logging
    #[arg(short, long)]
    verbose: bool,
}

/// Prints streamed text to stdout and engine notices to stderr.
struct CliHandler;

impl EventHandler for CliHandler {
    fn on_event(&self, event: &TurnEvent<'_>) {
        match event {
            TurnEvent::TextDelta(delta) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            TurnEvent::ToolCallRequested { name, .. } => {
                eprintln!("\n[tool] {name}");
            }
            TurnEvent::ChatCompressed {
                tokens_before,
                tokens_after,
            } => {
                eprintln!("(history compressed: ~{tokens_before} -> ~{tokens_after} tokens)");
            }
            TurnEvent::MaxSessionTurnsExceeded { limit } => {
                eprintln!("(session turn limit reached: {limit}. Start a new session with /new)");
            }
            TurnEvent::SessionTokenLimitExceeded { estimated, limit } => {
                eprintln!(
                    "(session token limit exceeded: ~{estimated} > {limit}. \
                     Try /compress or /new)"
                );
            }
            TurnEvent::Error { message } => {
                eprintln!("\n(provider error: {message})");
            }
            TurnEvent::Cancelled => {
                eprintln!("\n(cancelled)");
            }
            _ => {}
        }
    }
}

async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable not set");
            process::exit(1);
        }
    };

    let boundary = match OpenRouterClient::new(api_key) {
        Ok(client) => client.with_retries(cli.retries),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let mut config = SessionConfig::new(&cli.model, &cli.system)
        .with_session_token_limit(cli.session_token_limit)
        .with_max_session_turns(cli.max_session_turns)
        .with_max_turns_per_request(cli.max_turns)
        .with_max_tokens(cli.max_tokens)
        .with_temperature(cli.temperature)
        .with_context_window(cli.context_window);
    if cli.no_record {
        config.recorder = RecorderConfig::disabled();
    }

    let mut session = ChatSession::new(config);
    let dispatcher = NullDispatcher;

    eprintln!("rudder — {} (/compress, /new, /quit)", cli.model);

    loop {
        eprint!("\n> ");
        let Some(line) = read_line().await else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match line.as_str() {
            "/quit" | "/exit" => break,
            "/new" => {
                session.reset();
                eprintln!("(session reset)");
                continue;
            }
            "/compress" => {
                match session.force_compress(&boundary, CancelSignal::new()).await {
                    CompressionOutcome::Compressed {
                        tokens_before,
                        tokens_after,
                        ..
                    } => eprintln!("(compressed: ~{tokens_before} -> ~{tokens_after} tokens)"),
                    CompressionOutcome::Skipped(reason) => {
                        eprintln!("(compression skipped: {reason:?})");
                    }
                    CompressionOutcome::Failed(reason) => {
                        eprintln!("(compression failed: {reason:?})");
                    }
                }
                continue;
            }
            _ => {}
        }

        // Ctrl-C during the turn cancels it without exiting the REPL.
        let cancel = CancelSignal::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = session
            .run_turn(
                &boundary,
                &dispatcher,
                vec![Part::text(line)],
                &CliHandler,
                cancel,
            )
            .await;
        watcher.abort();

        match result {
            Ok(outcome) => {
                if outcome.status == TurnStatus::Completed {
                    println!();
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }

    session.finish(SessionStatus::Completed);
}
