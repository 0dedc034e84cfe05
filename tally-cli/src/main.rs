//! `tally`: live polls from the terminal.
//!
//! `serve` runs the sync server, `watch` prints every snapshot it receives
//! and `shell` is an interactive observer that also issues commands.

mod render;
mod state;

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use tally_collab::{
    ClientConfig, EngineConfig, PollSession, RemoteStore, ServerConfig, SyncServer,
};
use tally_core::Operation;

use render::{render_snapshot, render_view};
use state::{AppState, Command, HELP};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(author, version, about = "Live polls: add topics, add answers, vote, watch it update")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the sync server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:9090")]
        bind: String,

        /// RocksDB directory (in-memory if omitted)
        #[arg(long, value_name = "DIR")]
        data: Option<PathBuf>,
    },
    /// Print every snapshot the server pushes
    Watch {
        #[arg(long, default_value = "ws://127.0.0.1:9090")]
        server: String,
    },
    /// Interactive shell
    Shell {
        #[arg(long, default_value = "ws://127.0.0.1:9090")]
        server: String,

        /// Name sent to the server on connect
        #[arg(long, default_value = "Anonymous")]
        name: String,

        /// Retry conflicting writes up to N times instead of overwriting
        #[arg(long, value_name = "N")]
        optimistic: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Mode::Serve { bind, data } => serve(bind, data).await,
        Mode::Watch { server } => watch(server).await,
        Mode::Shell {
            server,
            name,
            optimistic,
        } => shell(server, name, optimistic).await,
    };

    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}

async fn serve(bind: String, data: Option<PathBuf>) -> Result<(), BoxError> {
    let server = SyncServer::new(ServerConfig {
        bind_addr: bind,
        storage_path: data,
        ..ServerConfig::default()
    })?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            server.store().sync()?;
        }
    }
    Ok(())
}

async fn watch(server: String) -> Result<(), BoxError> {
    let store = Arc::new(RemoteStore::connect(ClientConfig::new(server, "watch")).await?);
    let session = PollSession::open(store.clone(), EngineConfig::default()).await?;
    let mut view = session.observe("watch");

    loop {
        tokio::select! {
            snapshot = view.recv() => match snapshot {
                Some(snapshot) => print!("{}", render_snapshot(&snapshot)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    store.close().await;
    Ok(())
}

async fn shell(server: String, name: String, optimistic: Option<u32>) -> Result<(), BoxError> {
    let store = Arc::new(RemoteStore::connect(ClientConfig::new(server, name)).await?);
    let config = match optimistic {
        Some(attempts) => EngineConfig::optimistic(attempts),
        None => EngineConfig::default(),
    };
    let session = PollSession::open(store.clone(), config).await?;
    let mut view = session.observe("shell");
    let mut state = AppState::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Highest revision already on screen
    let mut shown: Option<u64> = None;

    println!("{HELP}");
    loop {
        tokio::select! {
            snapshot = view.recv() => {
                let Some(snapshot) = snapshot else {
                    warn!("Snapshot stream ended");
                    break;
                };
                if shown.is_none_or(|r| snapshot.revision > r) {
                    shown = Some(snapshot.revision);
                    print!("{}", render_view(&snapshot, &mut state));
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line, state.reset_dialog) {
                    Ok(Command::Quit) => break,
                    Ok(Command::Help) => println!("{HELP}"),
                    Ok(command) => execute(&session, &mut state, command).await,
                    Err(message) => state.errors.show(message),
                }
                let snapshot = session.current_snapshot();
                shown = shown.max(Some(snapshot.revision));
                print!("{}", render_view(&snapshot, &mut state));
            }
        }
    }

    session.close();
    store.close().await;
    Ok(())
}

/// Run one command against the session. Failures land in the error slot;
/// the shell keeps going.
async fn execute(session: &PollSession, state: &mut AppState, command: Command) {
    let snapshot = session.current_snapshot();
    match command {
        Command::AddTopic(title) => {
            if let Err(e) = session.add_topic(&title).await {
                state.report(Operation::AddTopic, &e);
            }
        }
        Command::Select(position) => {
            state.select(&snapshot, position);
        }
        Command::AddAnswer(text) => match state.selected_topic(&snapshot) {
            Some(topic) => {
                if let Err(e) = session.add_answer(topic.id, &text).await {
                    state.report(Operation::AddAnswer, &e);
                }
            }
            None => state.errors.show("Select a topic first with 'select <n>'."),
        },
        Command::Vote(position, answer) => {
            if let Some(topic) = state.topic_at(&snapshot, position) {
                if let Err(e) = session.cast_vote(topic.id, answer - 1).await {
                    state.report(Operation::CastVote, &e);
                }
            }
        }
        Command::Delete(position) => {
            if let Some(topic) = state.topic_at(&snapshot, position) {
                if let Err(e) = session.delete_topic(topic.id).await {
                    state.report(Operation::DeleteTopic, &e);
                }
            }
        }
        Command::OpenReset => state.open_reset(),
        Command::Passphrase(passphrase) => match session.reset_all(&passphrase).await {
            Ok(deleted) => {
                info!("Reset removed {deleted} topics");
                state.close_reset();
            }
            Err(e) => state.report(Operation::ResetAll, &e),
        },
        Command::CancelReset => state.close_reset(),
        Command::Dismiss => {
            state.errors.dismiss();
        }
        Command::Help | Command::Quit | Command::Nothing => {}
    }
}
