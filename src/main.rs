//! Random 1:1 Chat Server - Entry Point
//!
//! `serve` starts the TCP listener and session hub actor, accepting
//! connections. `issue-token` prints an access token for a user.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roulette_chat::config::ServeArgs;
use roulette_chat::{handle_connection, AppError, AppState, Cli, Command, MemoryRoomStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=roulette_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roulette_chat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::IssueToken(args) => {
            let identity = args.identity.build()?;
            println!("{}", identity.issue_token(args.user)?);
        }
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<(), AppError> {
    args.limits.validate()?;

    let identity = Arc::new(args.identity.build()?);
    if identity.user_count() < 2 {
        info!("Fewer than two users in the directory; nobody can be matched yet");
    }
    let store = Arc::new(MemoryRoomStore::new());

    let (state, hub) = AppState::new(identity, store, &args.limits);
    tokio::spawn(hub.run());

    let listener = TcpListener::bind(&args.addr).await?;
    info!("WebSocket Chat Server listening on {}", args.addr);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let state = state.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
