//! Application deployment - source checkout plus deploy hooks
//!
//! Converged when the checkout's HEAD matches the remote branch head.
//! Apply clones or fast-forwards as the application user, then runs the
//! deploy hooks in the source tree with the env file's variables set.

use std::path::{Path, PathBuf};

use declarative::{
    ConvergeError, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext,
};

use super::{io_message, read_optional, run_apply, run_probe};
use crate::render::env;

/// Set once the tree has been deployed in this run
pub fn deployed_mark(app_dir: &Path) -> String {
    format!("deployed:{}", app_dir.display())
}

/// Set for every service that must restart to pick up new code
pub fn restart_mark(service: &str) -> String {
    format!("restart:{}", service)
}

#[derive(Debug)]
pub struct Deployment {
    spec: ResourceSpec,
    app_dir: PathBuf,
    repo_url: String,
    branch: String,
    user: String,
    env_file: PathBuf,
    hooks: Vec<String>,
    services: Vec<String>,
    redeploy: bool,
}

impl Deployment {
    pub fn new(app_dir: impl Into<PathBuf>, repo_url: &str, branch: &str, user: &str) -> Self {
        let app_dir = app_dir.into();
        Self {
            spec: ResourceSpec::new(ResourceKind::Deployment, app_dir.to_string_lossy())
                .with_attr("repo_url", repo_url)
                .with_attr("branch", branch),
            app_dir,
            repo_url: repo_url.to_string(),
            branch: branch.to_string(),
            user: user.to_string(),
            env_file: PathBuf::new(),
            hooks: Vec::new(),
            services: Vec::new(),
            redeploy: false,
        }
    }

    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = path.into();
        self
    }

    /// Commands run through `sh -c` in the source tree, in order
    pub fn hooks(mut self, hooks: Vec<String>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Services restarted after a deployment
    pub fn services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }

    /// Run the hooks again even when the checkout is current
    pub fn redeploy(mut self, redeploy: bool) -> Self {
        self.redeploy = redeploy;
        self
    }

    fn key(&self) -> &str {
        &self.spec.identity_key
    }

    fn is_checkout(&self) -> bool {
        self.app_dir.join(".git").exists()
    }

    /// git as the application user
    fn git_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["-u", self.user.as_str(), "--", "git"];
        full.extend_from_slice(args);
        full
    }

    fn remote_head(&self, ctx: &RunContext, dir: &str) -> Result<String, ConvergeError> {
        let refname = format!("refs/heads/{}", self.branch);
        let output = run_probe(
            ctx,
            self.key(),
            "runuser",
            &self.git_args(&["-C", dir, "ls-remote", "origin", &refname]),
        )?;
        let stdout = output.stdout_str();
        let head = stdout.split_whitespace().next().unwrap_or_default();
        if !output.success || head.is_empty() {
            return Err(ConvergeError::probe(
                self.key(),
                format!("cannot resolve {} on origin: {}", self.branch, output.diagnostics()),
            ));
        }
        Ok(head.to_string())
    }

    fn hook_env(&self) -> Vec<(String, String)> {
        match read_optional(&self.env_file) {
            Ok(Some(content)) => env::parse(&content).into_iter().collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("cannot read {}: {}", self.env_file.display(), e);
                Vec::new()
            }
        }
    }

    fn run_hooks(&self, ctx: &RunContext) -> Result<(), ConvergeError> {
        let envs = self.hook_env();
        for hook in &self.hooks {
            log::info!("deploy hook: {}", hook);
            let output = ctx
                .host
                .run_in(
                    &self.app_dir,
                    &envs,
                    "runuser",
                    &["-u", &self.user, "--", "sh", "-c", hook],
                )
                .map_err(|e| ConvergeError::apply(self.key(), io_message("runuser", &e)))?;
            if !output.success {
                let message = format!("deploy hook `{}` failed", hook);
                return Err(ConvergeError::apply(self.key(), message)
                    .with_diagnostics(output.diagnostics()));
            }
        }
        Ok(())
    }
}

impl Resource for Deployment {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("Deploy {} ({}) to {}", self.repo_url, self.branch, self.app_dir.display())
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        if !self.is_checkout() {
            return Ok(ProbeResult::absent());
        }

        let dir = self.app_dir.to_string_lossy();
        let local = run_probe(
            ctx,
            self.key(),
            "runuser",
            &self.git_args(&["-C", &dir, "rev-parse", "HEAD"]),
        )?;
        if !local.success {
            return Err(ConvergeError::probe(self.key(), local.diagnostics()));
        }
        let local = local.stdout_str().trim().to_string();
        let remote = self.remote_head(ctx, &dir)?;

        let probe = ProbeResult::present().compare("revision", &local, &remote);
        if self.redeploy && !ctx.is_marked(&deployed_mark(&self.app_dir)) {
            return Ok(probe.with_drift("redeploy"));
        }
        Ok(probe)
    }

    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        let dir = self.app_dir.to_string_lossy();
        if self.is_checkout() {
            run_apply(
                ctx,
                self.key(),
                "runuser",
                &self.git_args(&["-C", &dir, "pull", "--ff-only", "origin", &self.branch]),
            )?;
        } else {
            run_apply(
                ctx,
                self.key(),
                "runuser",
                &self.git_args(&[
                    "clone",
                    "--branch",
                    &self.branch,
                    "--single-branch",
                    &self.repo_url,
                    &dir,
                ]),
            )?;
        }

        self.run_hooks(ctx)?;

        ctx.mark(deployed_mark(&self.app_dir));
        for service in &self.services {
            ctx.mark(restart_mark(service));
        }
        Ok(())
    }

    fn preview(&self, current: &ProbeResult) -> Option<String> {
        let mut lines = vec![if self.is_checkout() {
            format!("git pull --ff-only origin {}", self.branch)
        } else {
            format!("git clone --branch {} {}", self.branch, self.repo_url)
        }];
        if let Some(rev) = current.observed.get("revision") {
            lines.push(format!("current revision {}", rev));
        }
        lines.extend(self.hooks.iter().map(|h| format!("run: {}", h)));
        Some(lines.join("\n"))
    }
}
