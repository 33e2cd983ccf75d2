//! Opsloom CLI - chat with opsloom assistants from the terminal.
//!
//! This is the entry point for the `oloom` binary.

mod render;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use opsloom_chat::{ChatEvent, ChatStore, Dispatcher, SessionController, TurnOutcome};
use opsloom_client::{ClientConfig, Credentials, Feedback, HttpTransport, DEFAULT_BASE_URL};
use opsloom_core::{AssistantId, MessageId, SessionId};

use render::ReplyPrinter;

/// Opsloom CLI - chat with opsloom assistants from the terminal.
#[derive(Parser, Debug)]
#[command(name = "oloom")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service root URL.
    #[arg(long, env = "OPSLOOM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Bearer token for authentication.
    #[arg(long, env = "OPSLOOM_TOKEN", conflicts_with = "cookie")]
    token: Option<String>,

    /// Raw session cookie, e.g. `session=...`.
    #[arg(long, env = "OPSLOOM_COOKIE")]
    cookie: Option<String>,

    /// Timeout for non-streaming requests, in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available assistants.
    Assistants,
    /// List past sessions, newest first.
    History,
    /// Print the stored timeline of a session.
    Show {
        /// Session to print.
        session: SessionId,
    },
    /// Start an interactive chat (the default).
    Chat {
        /// Assistant for new sessions; defaults to the first one.
        #[arg(long, short)]
        assistant: Option<AssistantId>,
        /// Resume an existing session.
        #[arg(long, short)]
        session: Option<SessionId>,
    },
    /// Rate an assistant reply.
    Feedback {
        /// Rated message.
        message: MessageId,
        /// Rating.
        #[arg(value_enum)]
        rating: Rating,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Rating {
    Up,
    Down,
    Clear,
}

impl From<Rating> for Feedback {
    fn from(rating: Rating) -> Self {
        match rating {
            Rating::Up => Feedback::Positive,
            Rating::Down => Feedback::Negative,
            Rating::Clear => Feedback::Neutral,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("opsloom_cli=debug,opsloom_chat=debug,opsloom_client=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let credentials = match (args.token, args.cookie) {
        (Some(token), _) => Credentials::Bearer(token),
        (None, Some(cookie)) => Credentials::Cookie(cookie),
        (None, None) => Credentials::None,
    };
    let config = ClientConfig {
        request_timeout_seconds: args.timeout,
        ..ClientConfig::new(args.base_url)
    }
    .with_credentials(credentials);

    tracing::debug!(base_url = %config.base_url, "Connecting to assistant service");
    let transport = Arc::new(HttpTransport::new(&config)?);
    let session = SessionController::new(transport, ChatStore::new());
    session
        .init()
        .await
        .context("failed to load assistants and history; are you logged in?")?;

    match args.command.unwrap_or(Command::Chat {
        assistant: None,
        session: None,
    }) {
        Command::Assistants => {
            for assistant in session.store().assistants() {
                println!("{}", render::render_assistant(&assistant));
            }
        }
        Command::History => print_history(&session),
        Command::Show { session: id } => {
            session.open(&id).await?;
            for message in session.store().messages() {
                println!("{}", render::render_message(&message));
            }
        }
        Command::Feedback { message, rating } => {
            session.submit_feedback(&message, rating.into()).await?;
            println!("Feedback recorded.");
        }
        Command::Chat {
            assistant,
            session: resume,
        } => run_chat(Dispatcher::new(session), assistant, resume).await?,
    }

    Ok(())
}

fn print_history(session: &SessionController<HttpTransport>) {
    let history = session.history_sorted();
    if history.is_empty() {
        println!("No conversations yet.");
    }
    for entry in history {
        println!("{}", render::render_history_entry(&entry));
    }
}

/// Interactive read-eval loop over stdin.
async fn run_chat(
    dispatcher: Dispatcher<HttpTransport>,
    assistant: Option<AssistantId>,
    resume: Option<SessionId>,
) -> anyhow::Result<()> {
    let store = dispatcher.store().clone();
    let assistant = assistant
        .or_else(|| store.assistants().first().map(|a| a.id.clone()))
        .context("no assistants available")?;
    dispatcher.session().select_assistant(&assistant)?;

    if let Some(id) = resume {
        dispatcher.navigate(Some(&id)).await?;
        for message in store.messages() {
            println!("{}", render::render_message(&message));
        }
    }

    println!("Chatting with {assistant}. Commands: /new, /open <id>, /history, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => {}
            ("/quit" | "/exit", _) => break,
            ("/new", _) => {
                dispatcher.navigate(None).await?;
                if store.selected_assistant().is_none() {
                    dispatcher.session().select_assistant(&assistant)?;
                }
                println!("Started a new conversation.");
            }
            ("/history", _) => print_history(dispatcher.session()),
            ("/open", id) => match id.trim().parse::<SessionId>() {
                Ok(id) => match dispatcher.navigate(Some(&id)).await {
                    Ok(()) => {
                        for message in store.messages() {
                            println!("{}", render::render_message(&message));
                        }
                    }
                    Err(e) => eprintln!("Could not open {id}: {e}"),
                },
                Err(_) => eprintln!("Usage: /open <session-id>"),
            },
            _ => run_turn(&dispatcher, line).await?,
        }
    }

    Ok(())
}

/// Send one message and print the reply as it streams. Ctrl-C stops reading.
async fn run_turn(dispatcher: &Dispatcher<HttpTransport>, text: &str) -> anyhow::Result<()> {
    let store = dispatcher.store().clone();
    let mut events = store.subscribe();
    let mut printer = ReplyPrinter::new(store.messages().len());

    let mut task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let text = text.to_string();
        async move { dispatcher.send(&text).await }
    });

    let outcome = loop {
        tokio::select! {
            joined = &mut task => break joined?,
            event = events.recv() => match event {
                Ok(ChatEvent::TimelineChanged) | Err(RecvError::Lagged(_)) => {
                    if let Some(out) = printer.advance(&store.messages()) {
                        print!("{out}");
                        std::io::stdout().flush()?;
                    }
                }
                Ok(_) | Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => dispatcher.cancel(),
        }
    };

    if let Some(out) = printer.advance(&store.messages()) {
        print!("{out}");
    }
    println!();

    match outcome {
        TurnOutcome::Cancelled => println!("(stopped)"),
        TurnOutcome::Skipped => println!("(a message is already in flight)"),
        TurnOutcome::Completed | TurnOutcome::Failed(_) => {}
    }
    Ok(())
}
