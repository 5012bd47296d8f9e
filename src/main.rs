//! # Hub CLI (`hub`)
//!
//! Ask questions, chat interactively, manage stored sessions, inspect the
//! source map, and run the HTTP chat server.
//!
//! ## Usage
//!
//! ```bash
//! hub --config ./config/hub.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hub ask "<q>"` | Answer one question (optionally within `--session`) |
//! | `hub chat` | Interactive chat (`--session ID` or `--latest` to resume) |
//! | `hub sessions` | List recent sessions |
//! | `hub history <id>` | Print a session's messages |
//! | `hub forget <id>` | Delete one session |
//! | `hub wipe --yes` | Delete all history |
//! | `hub sources` | Print the source map |
//! | `hub route "<q>"` | Show how a question would be routed |
//! | `hub serve` | Start the HTTP chat server |
//! | `hub completions <shell>` | Print shell completions |
//!
//! Logs go to stderr; set `RUST_LOG=debug` for routing and gather details.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use hub_agent::config;
use hub_agent::models::{RouteTarget, RoutingDecision};
use hub_agent::pipeline::build_assistant;
use hub_agent::server;
use hub_agent::session::{SessionController, TurnReply};
use hub_agent::sources;

/// Hub CLI: a spreadsheet-backed project assistant.
///
/// All commands except `completions` read a TOML configuration file given
/// by `--config`. See `config/hub.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hub",
    about = "Hub: answer project questions from spreadsheet data",
    version,
    long_about = "Routes each question to the spreadsheet that holds the answer, gathers a bounded \
    slice of its tables, and asks a language model to answer from that data. Conversation history \
    is stored in a spreadsheet so sessions can be resumed."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question.
    Ask {
        query: String,
        /// Continue an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
    },

    /// Interactive chat.
    ///
    /// Inside the chat: /new, /resume <id>, /sessions, /history,
    /// /forget <id>, /wipe, /quit.
    Chat {
        /// Resume this session.
        #[arg(long, conflicts_with = "latest")]
        session: Option<String>,
        /// Resume the most recently active session.
        #[arg(long)]
        latest: bool,
    },

    /// List recent sessions, newest first.
    Sessions {
        /// Maximum sessions to show (default: `[sessions].list_limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one session's messages.
    History { id: String },

    /// Delete one session's history.
    Forget { id: String },

    /// Delete all conversation history.
    Wipe {
        /// Confirm the destructive wipe.
        #[arg(long)]
        yes: bool,
    },

    /// Print the source map.
    Sources,

    /// Show the routing decision for a question without answering it.
    Route { query: String },

    /// Start the HTTP chat server on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn describe_target(decision: &RoutingDecision) -> String {
    if !decision.category.is_empty() {
        return decision.category.clone();
    }
    match &decision.target {
        RouteTarget::Document(reference) => reference.clone(),
        RouteTarget::InternalTasks => "internal tasks".to_string(),
        RouteTarget::NoMatch => "no match".to_string(),
    }
}

fn print_reply(reply: &TurnReply) {
    if let Some(decision) = &reply.routing {
        eprintln!("[routing: {}] {}", describe_target(decision), decision.reason);
    }
    for w in &reply.warnings {
        eprintln!("warning: {}", w);
    }
    println!("{}", reply.answer);
}

fn print_history(controller: &SessionController) {
    if controller.messages().is_empty() {
        println!("(no messages in session {})", controller.session_id());
        return;
    }
    for m in controller.messages() {
        println!("[{}] {}: {}", m.timestamp, m.role, m.content);
    }
}

async fn print_sessions(controller: &SessionController) {
    let sessions = controller.list_sessions().await;
    if sessions.is_empty() {
        println!("No stored sessions.");
        return;
    }
    println!("{:<38} LAST ACTIVE", "SESSION");
    for s in sessions {
        let marker = if s.session_id == controller.session_id() { " *" } else { "" };
        println!("{:<38} {}{}", s.session_id, s.last_timestamp, marker);
    }
}

async fn run_chat(mut controller: SessionController) -> anyhow::Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    if interactive {
        println!(
            "Session {} ({} messages). Type /quit to exit.",
            controller.session_id(),
            controller.messages().len()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if interactive {
            print!("you> ");
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        match command {
            "/quit" | "/exit" => break,
            "/new" => println!("New session {}", controller.new_session()),
            "/resume" if !arg.is_empty() => {
                let n = controller.resume_session(arg).await;
                println!("Resumed session {} ({} messages)", controller.session_id(), n);
            }
            "/sessions" => print_sessions(&controller).await,
            "/history" => print_history(&controller),
            "/forget" if !arg.is_empty() => match controller.delete_session(arg).await {
                Ok(n) => println!("Removed {} message(s).", n),
                Err(e) => eprintln!("error: {}", e),
            },
            "/wipe" => match controller.wipe_all_history().await {
                Ok(()) => println!("All history wiped. New session {}", controller.session_id()),
                Err(e) => eprintln!("error: {}", e),
            },
            c if c.starts_with('/') => {
                eprintln!("Commands: /new, /resume <id>, /sessions, /history, /forget <id>, /wipe, /quit")
            }
            _ => {
                let reply = controller.submit(line).await;
                print_reply(&reply);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "hub", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(match cli.command {
        Commands::Serve => "info",
        _ => "warn",
    });

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        return server::run_server(&cfg).await;
    }

    let assistant = Arc::new(build_assistant(&cfg)?);

    match cli.command {
        Commands::Ask { query, session } => {
            let mut controller = SessionController::new(assistant);
            if let Some(id) = session {
                controller.resume_session(&id).await;
            }
            let reply = controller.submit(&query).await;
            print_reply(&reply);
            eprintln!("session: {}", reply.session_id);
        }
        Commands::Chat { session, latest } => {
            let controller = if latest {
                SessionController::resume_latest(assistant).await
            } else {
                let mut c = SessionController::new(assistant);
                if let Some(id) = session {
                    c.resume_session(&id).await;
                }
                c
            };
            run_chat(controller).await?;
        }
        Commands::Sessions { limit } => {
            let limit = limit.unwrap_or(cfg.sessions.list_limit);
            let sessions = assistant.conversations().list_sessions(Some(limit)).await;
            if sessions.is_empty() {
                println!("No stored sessions.");
            } else {
                println!("{:<38} LAST ACTIVE", "SESSION");
                for s in sessions {
                    println!("{:<38} {}", s.session_id, s.last_timestamp);
                }
            }
        }
        Commands::History { id } => {
            let mut controller = SessionController::new(assistant);
            controller.resume_session(&id).await;
            print_history(&controller);
        }
        Commands::Forget { id } => {
            let removed = assistant.conversations().delete_session(&id).await?;
            println!("Removed {} message(s) from session {}.", removed, id);
        }
        Commands::Wipe { yes } => {
            if !yes {
                bail!("Refusing to delete all history without --yes");
            }
            assistant.conversations().wipe_all().await?;
            println!("All conversation history deleted.");
        }
        Commands::Sources => {
            sources::list_sources(&assistant).await?;
        }
        Commands::Route { query } => {
            let outcome = assistant.route(&query, &[]).await?;
            let d = &outcome.decision;
            println!("tier:     {:?}", d.tier);
            println!("target:   {}", describe_target(d));
            println!("reason:   {}", d.reason);
            if outcome.targets.is_empty() {
                println!("targets:  (none)");
            } else {
                println!("targets:");
                for t in &outcome.targets {
                    println!("  {}  {}", t.label, t.document_reference);
                }
            }
        }
        Commands::Serve | Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
