use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DatabaseEngine;

#[derive(Parser)]
#[command(name = "stackup")]
#[command(version)]
#[command(
    about = "Idempotent installer for a web application stack",
    long_about = "Converges one host toward the stack described in stackup.toml: \
                  packages, service account, database, env file, source checkout, \
                  service units and reverse proxy site. Safe to re-run."
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to ./stackup.toml, then /etc/stackup/stackup.toml)
    #[arg(short, long, global = true, env = "STACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge the host toward the configured stack
    Install(InstallArgs),

    /// Show the observed state of every managed resource
    Status(StatusArgs),

    /// Stop and remove service units and proxy sites
    Remove(RemoveArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Install
// ============================================================================

#[derive(Args)]
pub struct InstallArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Probe and show what would change without touching the host
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Set a new password on an existing database role
    #[arg(long)]
    pub rotate_db_password: bool,

    /// Run the deploy hooks even when the checkout is current
    #[arg(long)]
    pub redeploy: bool,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

/// Per-run overrides of stackup.toml values
#[derive(Args, Debug, Default, Clone)]
pub struct OverrideArgs {
    /// Application name
    #[arg(long = "app-name", value_name = "NAME")]
    pub app_name: Option<String>,

    /// Run-as user
    #[arg(long)]
    pub user: Option<String>,

    /// Base directory of the installation
    #[arg(long = "base-dir", value_name = "DIR")]
    pub base_dir: Option<String>,

    /// host:port the web service binds to
    #[arg(long)]
    pub bind: Option<String>,

    /// Git repository to deploy
    #[arg(long = "repo-url", value_name = "URL")]
    pub repo_url: Option<String>,

    /// Branch to deploy
    #[arg(long)]
    pub branch: Option<String>,

    /// Web service unit name
    #[arg(long = "web-service", value_name = "NAME")]
    pub web_service: Option<String>,

    /// Enforcer service unit name
    #[arg(long = "enforcer-service", value_name = "NAME")]
    pub enforcer_service: Option<String>,

    /// Database engine
    #[arg(long = "db-engine", value_enum, value_name = "ENGINE")]
    pub db_engine: Option<DatabaseEngine>,

    /// Port the proxy site listens on
    #[arg(long = "listen-port", value_name = "PORT")]
    pub listen_port: Option<u16>,

    /// server_name of the proxy site
    #[arg(long = "server-name", value_name = "NAME")]
    pub server_name: Option<String>,
}

// ============================================================================
// Status / Remove
// ============================================================================

#[derive(Args)]
pub struct StatusArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Only show resources matching a kind or name (e.g. `service_unit`, `nginx`)
    pub target: Option<String>,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Service unit to remove (repeatable); defaults to every managed unit
    #[arg(long = "service", value_name = "NAME")]
    pub services: Vec<String>,

    /// Proxy site to remove (repeatable); defaults to the managed site
    #[arg(long = "site", value_name = "NAME")]
    pub sites: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would be removed without touching the host
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}
