//! System user and its primary group

use std::path::PathBuf;

use declarative::{ConvergeError, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext};

use super::{io_message, run_probe};

/// A system account (no login shell, no home creation) and its group.
/// Existence by name is all that is checked; ids are left alone.
#[derive(Debug)]
pub struct UserGroup {
    spec: ResourceSpec,
    user: String,
    group: String,
    home: PathBuf,
}

impl UserGroup {
    pub fn new(user: &str, group: &str, home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            spec: ResourceSpec::new(ResourceKind::UserGroup, user)
                .with_attr("group", group)
                .with_attr("home", home.to_string_lossy()),
            user: user.to_string(),
            group: group.to_string(),
            home,
        }
    }

    fn exists(&self, ctx: &RunContext, database: &str, name: &str) -> Result<bool, ConvergeError> {
        Ok(run_probe(ctx, &self.spec.identity_key, "getent", &[database, name])?.success)
    }

    /// Run an account command; "already exists" is confirmed with getent
    fn create(
        &self,
        ctx: &RunContext,
        database: &str,
        name: &str,
        program: &str,
        args: &[&str],
    ) -> Result<(), ConvergeError> {
        let key = &self.spec.identity_key;
        let output = ctx
            .host
            .run(program, args)
            .map_err(|e| ConvergeError::apply(key, io_message(program, &e)))?;
        if output.success || self.exists(ctx, database, name)? {
            return Ok(());
        }
        Err(ConvergeError::apply(key, format!("{} {} failed", program, name))
            .with_diagnostics(output.diagnostics()))
    }
}

impl Resource for UserGroup {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("Ensure user {} in group {}", self.user, self.group)
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        let group = self.exists(ctx, "group", &self.group)?;
        let user = self.exists(ctx, "passwd", &self.user)?;
        let presence = |b: bool| if b { "present" } else { "absent" };
        Ok(ProbeResult {
            exists: group && user,
            ..ProbeResult::absent()
                .with_observed("group", presence(group))
                .with_observed("user", presence(user))
        })
    }

    fn apply(&self, ctx: &mut RunContext, current: &ProbeResult) -> Result<(), ConvergeError> {
        let observed = |field: &str| current.observed.get(field).is_some_and(|v| v == "present");

        if !observed("group") {
            self.create(ctx, "group", &self.group, "groupadd", &["--system", &self.group])?;
        }
        if !observed("user") {
            let home = self.home.to_string_lossy();
            self.create(
                ctx,
                "passwd",
                &self.user,
                "useradd",
                &[
                    "--system",
                    "--gid",
                    &self.group,
                    "--home-dir",
                    &home,
                    "--no-create-home",
                    "--shell",
                    "/usr/sbin/nologin",
                    &self.user,
                ],
            )?;
        }
        Ok(())
    }

    fn preview(&self, current: &ProbeResult) -> Option<String> {
        let mut steps = Vec::new();
        if current.observed.get("group").is_none_or(|v| v != "present") {
            steps.push(format!("groupadd --system {}", self.group));
        }
        if current.observed.get("user").is_none_or(|v| v != "present") {
            steps.push(format!("useradd --system {}", self.user));
        }
        Some(steps.join("\n"))
    }
}
