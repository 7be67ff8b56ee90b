//! The application's environment file
//!
//! Content is never overwritten: once the file exists, operator edits win.
//! A missing file is rendered and written with mode 600. An existing file
//! only gets its owner and mode corrected, plus the `DB_PASSWORD` line when
//! a password rotation was requested.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use declarative::{ConvergeError, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext};

use super::deployment::restart_mark;
use super::{mode_string, read_optional, run_apply, run_probe, write_atomic};
use crate::render::{self, ArtifactParams, EnvParams};

pub const ENV_FILE_MODE: u32 = 0o600;

const PASSWORD_KEY: &str = "DB_PASSWORD";

#[derive(Debug)]
pub struct EnvFile {
    spec: ResourceSpec,
    path: PathBuf,
    owner: String,
    group: String,
    params: EnvParams,
    rotate_db_password: bool,
    services: Vec<String>,
}

impl EnvFile {
    pub fn new(path: impl AsRef<Path>, owner: &str, group: &str, params: EnvParams) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            spec: ResourceSpec::new(ResourceKind::EnvFile, path.to_string_lossy())
                .with_attr("owner", format!("{}:{}", owner, group))
                .with_attr("mode", format!("{:o}", ENV_FILE_MODE)),
            path,
            owner: owner.to_string(),
            group: group.to_string(),
            params,
            rotate_db_password: false,
            services: Vec::new(),
        }
    }

    /// Rewrite the stored database password to the one being set on the role
    pub fn rotate_db_password(mut self, rotate: bool) -> Self {
        self.rotate_db_password = rotate;
        self
    }

    /// Services that read this file and restart when it changes
    pub fn services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }

    fn key(&self) -> &str {
        &self.spec.identity_key
    }

    fn desired_owner(&self) -> String {
        format!("{}:{}", self.owner, self.group)
    }

    fn desired_mode(&self) -> String {
        format!("{:o}", ENV_FILE_MODE)
    }

    fn io_err(&self, what: &str, e: &io::Error) -> ConvergeError {
        ConvergeError::apply(
            self.key(),
            format!("cannot {} {}: {}", what, self.path.display(), e),
        )
    }

    /// Returns `false` when the file appeared in the meantime
    fn create(&self, content: &str) -> io::Result<bool> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(ENV_FILE_MODE)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e),
        };
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(true)
    }

    fn observed_owner(&self, ctx: &RunContext) -> Result<String, ConvergeError> {
        let path = self.path.to_string_lossy();
        let output = run_probe(ctx, self.key(), "stat", &["-c", "%U:%G", &path])?;
        if !output.success {
            return Err(ConvergeError::probe(self.key(), output.diagnostics()));
        }
        Ok(output.stdout_str().trim().to_string())
    }

    fn stored_password_matches(&self) -> Result<bool, ConvergeError> {
        let content = read_optional(&self.path).map_err(|e| {
            ConvergeError::probe(
                self.key(),
                format!("cannot read {}: {}", self.path.display(), e),
            )
        })?;
        let stored = content.map(|c| render::env::parse(&c).remove(PASSWORD_KEY));
        Ok(stored.flatten().as_deref() == Some(self.params.db_password.expose()))
    }

    /// Swap the `DB_PASSWORD` value in place; returns whether the file changed
    fn replace_password(&self) -> Result<bool, ConvergeError> {
        let current = read_optional(&self.path)
            .map_err(|e| self.io_err("read", &e))?
            .unwrap_or_default();
        let updated =
            render::env::set_value(&current, PASSWORD_KEY, self.params.db_password.expose());
        if updated == current {
            return Ok(false);
        }
        write_atomic(&self.path, &updated, ENV_FILE_MODE).map_err(|e| self.io_err("write", &e))?;
        Ok(true)
    }
}

impl Resource for EnvFile {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("Environment file {}", self.path.display())
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        let mode = match mode_string(&self.path) {
            Ok(mode) => mode,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ProbeResult::absent()),
            Err(e) => {
                return Err(ConvergeError::probe(
                    self.key(),
                    format!("cannot stat {}: {}", self.path.display(), e),
                ));
            }
        };

        let owner = self.observed_owner(ctx)?;
        let mut probe = ProbeResult::present()
            .compare("owner", &owner, &self.desired_owner())
            .compare("mode", &mode, &self.desired_mode());
        if self.rotate_db_password && !self.stored_password_matches()? {
            probe = probe.with_drift("db_password");
        }
        Ok(probe)
    }

    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        let content = render::render(&ArtifactParams::EnvFile(self.params.clone()));
        let created = self.create(&content).map_err(|e| self.io_err("write", &e))?;

        if !created {
            log::info!("{} already exists; keeping its content", self.path.display());
            if self.rotate_db_password && self.replace_password()? {
                log::info!("Stored the new database password in {}", self.path.display());
                for service in &self.services {
                    ctx.mark(restart_mark(service));
                }
            }
            fs::set_permissions(&self.path, fs::Permissions::from_mode(ENV_FILE_MODE))
                .map_err(|e| self.io_err("chmod", &e))?;
        }

        let path = self.path.to_string_lossy();
        run_apply(ctx, self.key(), "chown", &[&self.desired_owner(), &path])?;
        Ok(())
    }

    fn preview(&self, current: &ProbeResult) -> Option<String> {
        if !current.exists {
            return Some(render::env::render_masked(&self.params));
        }
        let mut lines = Vec::new();
        if current.drifted.contains("owner") {
            lines.push(format!("chown {} {}", self.desired_owner(), self.path.display()));
        }
        if current.drifted.contains("mode") {
            lines.push(format!("chmod {} {}", self.desired_mode(), self.path.display()));
        }
        if current.drifted.contains("db_password") {
            lines.push(format!("{}=******** (other lines kept)", PASSWORD_KEY));
        }
        Some(lines.join("\n"))
    }
}
