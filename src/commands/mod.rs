pub mod install;
pub mod remove;
pub mod status;

use anyhow::{Context as _, Result};
use declarative::{ConvergeError, Operation};

use crate::Context;
use crate::cli::OverrideArgs;
use crate::config::{DatabaseEngine, ReverseProxy, StackConfig};
use crate::runner;
use crate::ui;

/// Config file, then CLI overrides, then validation for `operation`
pub fn load_config(
    ctx: &Context,
    overrides: &OverrideArgs,
    operation: Operation,
) -> Result<StackConfig> {
    let (mut config, path) = StackConfig::load(ctx.config.as_deref())?;
    match &path {
        Some(path) => log::info!("Loaded {}", path.display()),
        None => log::info!("No stackup.toml found, using defaults"),
    }
    config.apply_overrides(overrides);
    config
        .validate_for(operation)
        .context("Invalid stack configuration")?;
    Ok(config)
}

/// Mutating operations run as root
pub fn require_root(operation: &str) -> Result<(), ConvergeError> {
    if runner::is_root() {
        Ok(())
    } else {
        Err(ConvergeError::validation(format!(
            "{} must run as root; re-run with sudo (or use --dry-run)",
            operation
        )))
    }
}

/// Tools this config will call, by name
fn required_tools(config: &StackConfig) -> Vec<&'static str> {
    let mut tools = vec!["apt-get", "dpkg-query", "systemctl", "git", "runuser"];
    tools.push(match config.database.engine {
        DatabaseEngine::Postgres => "psql",
        DatabaseEngine::Mysql => "mysql",
    });
    if matches!(config.proxy, ReverseProxy::DirectSite(_)) {
        tools.push("nginx");
    }
    tools
}

/// Warn about missing collaborators up front. Packages installed by the
/// plan itself (psql, nginx) may legitimately be absent on a fresh host.
pub fn preflight(config: &StackConfig) {
    let missing: Vec<_> = required_tools(config)
        .into_iter()
        .filter(|tool| !runner::command_exists(tool))
        .collect();
    if !missing.is_empty() {
        ui::warn(&format!(
            "Not on PATH yet: {} (installed packages may provide them)",
            missing.join(", ")
        ));
    }
}
