//! Back-office CLI - command-line access to the restaurant back-office API.
//!
//! Signs in once, keeps the session in the configured credential store and
//! sends authenticated JSON requests. Expired access tokens are refreshed
//! transparently.

mod app;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

#[derive(Debug, Parser)]
#[command(name = "backoffice", version, about = "Restaurant back-office API client")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long, short)]
        username: Option<String>,
    },
    /// Revoke and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show configuration and session state
    Status,
    /// GET an API path and print the JSON response
    Get { path: String },
    /// POST a JSON body to an API path
    Post { path: String, body: String },
    /// PUT a JSON body to an API path
    Put { path: String, body: String },
    /// DELETE an API path
    Delete { path: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g., RUST_LOG=backoffice_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let cli = Cli::parse();
    debug!(command = ?cli.command, "Starting");

    let mut app = App::new(cli.config)?;
    run(&mut app, cli.command).await
}

async fn run(app: &mut App, command: Command) -> Result<()> {
    match command {
        Command::Login { username } => app.login(username).await,
        Command::Logout => app.logout().await,
        Command::Whoami => app.whoami(),
        Command::Status => app.status(),
        Command::Get { path } => print_json(&app.api().get(&path).await?),
        Command::Post { path, body } => {
            let body = parse_body(&body)?;
            print_json(&app.api().post(&path, &body).await?)
        }
        Command::Put { path, body } => {
            let body = parse_body(&body)?;
            print_json(&app.api().put(&path, &body).await?)
        }
        Command::Delete { path } => print_json(&app.api().delete(&path).await?),
    }
}

fn parse_body(body: &str) -> Result<Value> {
    serde_json::from_str(body).context("Request body is not valid JSON")
}

fn print_json(value: &Value) -> Result<()> {
    // 204s and empty bodies decode as null
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
