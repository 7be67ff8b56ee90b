//! Secret resolution, done once before any mutation
//!
//! Database password sources, first match wins:
//! 1. `DB_PASSWORD` in the existing env file
//! 2. the environment variable named by `database.password_env`
//! 3. a confirmed prompt on the controlling terminal

use anyhow::{Context, Result};

use crate::config::StackConfig;
use crate::render::env;
use crate::resource::read_optional;
use crate::secret::{self, Secret, SecretCollector, SecretError, TerminalInput};

/// Where the database password came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    EnvFile,
    Environment(String),
    Prompt,
    /// Dry run without any source: nothing will be written
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct Secrets {
    pub db_password: Secret,
    pub secret_key: Secret,
    pub db_password_source: SecretSource,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub dry_run: bool,
    /// Ignore the env file's password; a new one is set on the role
    pub rotate_db_password: bool,
}

pub fn resolve(config: &StackConfig, opts: ResolveOptions) -> Result<Secrets> {
    resolve_with(
        config,
        opts,
        |name| std::env::var(name).ok(),
        |label| {
            let input = TerminalInput::open()?;
            SecretCollector::new(input).collect_confirmed(label)
        },
    )
}

pub fn resolve_with(
    config: &StackConfig,
    opts: ResolveOptions,
    env_var: impl Fn(&str) -> Option<String>,
    prompt: impl FnOnce(&str) -> Result<Secret, SecretError>,
) -> Result<Secrets> {
    let env_path = config.env_file();
    let existing = match read_optional(&env_path) {
        Ok(content) => content.map(|c| env::parse(&c)).unwrap_or_default(),
        // Unprivileged dry runs cannot read a mode 600 env file
        Err(e) if opts.dry_run => {
            log::warn!("Cannot read {}: {}", env_path.display(), e);
            Default::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Could not read {}", env_path.display()));
        }
    };

    let from_file = existing
        .get("DB_PASSWORD")
        .filter(|v| !v.is_empty() && !opts.rotate_db_password);
    let var = &config.database.password_env;

    let (db_password, db_password_source) = if let Some(value) = from_file {
        log::info!("Using database password from {}", env_path.display());
        (Secret::new(value.as_str()), SecretSource::EnvFile)
    } else if let Some(value) = env_var(var).filter(|v| !v.is_empty()) {
        log::info!("Using database password from ${}", var);
        (Secret::new(value), SecretSource::Environment(var.clone()))
    } else if opts.dry_run {
        (Secret::default(), SecretSource::Placeholder)
    } else {
        let label = format!("Database password for role '{}'", config.database_user());
        let secret = prompt(&label).map_err(|e| match e {
            SecretError::NoTerminal => anyhow::anyhow!(
                "No terminal available to prompt for the database password; set ${} instead",
                var
            ),
            other => anyhow::Error::new(other),
        })?;
        (secret, SecretSource::Prompt)
    };

    let secret_key = match existing.get("SECRET_KEY").filter(|v| !v.is_empty()) {
        Some(key) => Secret::new(key.as_str()),
        None => secret::generate_secret_key().context("Could not read the OS random device")?,
    };

    Ok(Secrets {
        db_password,
        secret_key,
        db_password_source,
    })
}
