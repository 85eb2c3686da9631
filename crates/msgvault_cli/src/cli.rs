//! Argument parsing, in the same `clap::Parser`/`Subcommand` shape
//! `thalo_cli::cli` uses. Peripheral per spec §6: exit codes are 0 on
//! success, non-zero on any fatal error, which `main`'s `anyhow::Error`
//! propagation already gives us for free.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "msgvault", about = "Multi-tenant event-sourcing message store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the HTTP/RPC/SSE server.
    Serve(ServeArgs),
    /// Streams a namespace's messages to stdout as NDJSON, in global-position order.
    Export(ExportArgs),
    /// Reads NDJSON messages from stdin and imports them into a namespace.
    Import(ImportArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BackendKind {
    Sled,
    Sqlite,
    Postgres,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Disables the admin-token requirement and permits in-memory SQLite
    /// namespaces (spec §4.3, §4.6).
    #[arg(long)]
    pub test_mode: bool,

    /// The admin bearer token required by `ns.create`/`ns.delete`/`ns.list`.
    /// Ignored in test mode.
    #[arg(long, env = "MSGVAULT_ADMIN_TOKEN")]
    pub token: Option<String>,

    #[arg(long, value_enum, env = "MSGVAULT_BACKEND", default_value = "sled")]
    pub backend: BackendKind,

    /// Base directory for the namespace registry and, for the sled/sqlite
    /// backends, each namespace's on-disk store.
    #[arg(long, env = "MSGVAULT_DATA_DIR", default_value = "./msgvault-data")]
    pub data_dir: PathBuf,

    /// Connection string for the Postgres backend. Required when
    /// `--backend postgres`.
    #[arg(long, env = "MSGVAULT_DATABASE_URL")]
    pub database_url: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub server: String,

    #[arg(long, env = "MSGVAULT_TOKEN")]
    pub token: String,
}

#[derive(Parser, Debug)]
pub struct ImportArgs {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub server: String,

    #[arg(long, env = "MSGVAULT_TOKEN")]
    pub token: String,
}

pub async fn run() -> Result<()> {
    let cli = Cli::try_parse()?;

    match cli.command {
        Command::Serve(args) => crate::serve::run(args).await,
        Command::Export(args) => crate::export::run(args).await,
        Command::Import(args) => crate::import::run(args).await,
    }
}

pub fn socket_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}
