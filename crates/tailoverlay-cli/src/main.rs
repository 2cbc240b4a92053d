//! TailOverlay CLI - Share a workspace across your tailnet
//!
//! One device hosts a workspace behind a six digit code; other devices on
//! the same tailnet ask to join and, once the host approves, share files,
//! screenshots and chat in real time.
//!
//! ## Quick Start
//!
//! ```bash
//! # Host a workspace
//! tailoverlay host
//!
//! # Ask to join it (on another device)
//! tailoverlay join my-laptop 482913
//!
//! # Approve the request (on the host)
//! tailoverlay approve <request-id>
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Host(args) => commands::host::run(args).await,
        Command::Join(args) => commands::join::run(args).await,
        Command::Requests(args) => commands::control::requests(args).await,
        Command::Approve(args) => commands::control::approve(args).await,
        Command::Deny(args) => commands::control::deny(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,tailoverlay=info,tailoverlay_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
