// crates/server/src/main.rs
//! Bookchat progress server binary.
//!
//! Serves the progress API and hands the broadcaster to the embedding
//! pipeline, which runs in the same process and drives
//! `ProgressBroadcaster::advance` as it processes chunks.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bookchat_progress::ProgressBroadcaster;
use bookchat_server::{create_app, AppState};

#[derive(Debug, Parser)]
#[command(name = "bookchat", about = "Embedding progress server")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "BOOKCHAT_PORT", default_value_t = 4817)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "BOOKCHAT_BIND", default_value = "127.0.0.1")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let app = create_app(AppState::with_broadcaster(Arc::clone(&broadcaster)));

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "bookchat progress server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
