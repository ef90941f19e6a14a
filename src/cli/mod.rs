pub mod commands;
pub mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::session::Region;

#[derive(Parser)]
#[command(name = "pumpsync")]
#[command(about = "Fetch, decode and cache insulin pump telemetry")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a .pumpsync.toml in the current directory
    Init(InitArgs),
    /// Check credentials and print the account's owner id
    Login(AuthArgs),
    /// List devices that have uploaded reports
    Devices(AuthArgs),
    /// Fetch and decode events directly, bypassing the cache
    Events(EventsArgs),
    /// Read events through the local range cache
    Query(QueryArgs),
    /// Delete the local range cache
    ClearCache,
}

#[derive(clap::Args)]
pub struct InitArgs {
    /// Account identity (email address)
    #[arg(long)]
    pub identity: String,

    /// Platform region: US or EU
    #[arg(long, default_value = "US")]
    pub region: Region,

    /// Device to read (defaults to the most recently active one)
    #[arg(long)]
    pub device_id: Option<String>,

    /// Cache directory (defaults to the platform cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct AuthArgs {
    /// Account password
    #[arg(long, env = "PUMPSYNC_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(clap::Args)]
pub struct EventsArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Start of the range (RFC 3339 or YYYY-MM-DD, UTC)
    #[arg(long)]
    pub start: String,

    /// End of the range (defaults to now)
    #[arg(long)]
    pub end: Option<String>,

    /// Device to read (overrides the config file)
    #[arg(long)]
    pub device_id: Option<String>,
}

#[derive(clap::Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Read the last N hours (ignored when --start is given)
    #[arg(long, default_value = "24")]
    pub hours: i64,

    /// Start of the range (RFC 3339 or YYYY-MM-DD, UTC)
    #[arg(long)]
    pub start: Option<String>,

    /// End of the range (defaults to now)
    #[arg(long, requires = "start")]
    pub end: Option<String>,
}
