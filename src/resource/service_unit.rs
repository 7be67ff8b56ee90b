//! systemd service units
//!
//! The unit file is compared byte for byte with its render. Running and
//! enabled state are reported but never count as drift; they are handled
//! by the post-plan health check in [`Resource::finalize`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use declarative::{
    ConvergeError, ProbeResult, RemoveOutcome, Resource, ResourceKind, ResourceSpec, RunContext,
};

use super::deployment::restart_mark;
use super::{io_message, read_optional, run_advisory, run_apply, write_atomic};
use crate::render;

const UNIT_MODE: u32 = 0o644;
const JOURNAL_LINES: &str = "30";

#[derive(Debug)]
pub struct ServiceUnit {
    spec: ResourceSpec,
    path: PathBuf,
    content: String,
    health_wait: Duration,
}

impl ServiceUnit {
    pub fn new(
        name: &str,
        unit_dir: impl AsRef<Path>,
        content: String,
        health_wait: Duration,
    ) -> Self {
        Self {
            spec: ResourceSpec::new(ResourceKind::ServiceUnit, name)
                .with_attr("hash", render::content_hash(&content)),
            path: unit_dir.as_ref().join(format!("{}.service", name)),
            content,
            health_wait,
        }
    }

    /// A unit known only by name, for removal
    pub fn existing(name: &str, unit_dir: impl AsRef<Path>) -> Self {
        Self::new(name, unit_dir, String::new(), Duration::ZERO)
    }

    fn name(&self) -> &str {
        &self.spec.identity_key
    }

    /// First line of `systemctl <verb> <unit>`, or `unknown` without systemctl
    fn query(&self, ctx: &RunContext, verb: &str) -> String {
        match ctx.host.run("systemctl", &[verb, self.name()]) {
            Ok(output) => output
                .stdout_str()
                .lines()
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string(),
            Err(e) => {
                log::debug!("{}", io_message("systemctl", &e));
                "unknown".to_string()
            }
        }
    }

    fn systemctl(&self, ctx: &RunContext, verb: &str) -> Result<(), ConvergeError> {
        run_apply(ctx, self.name(), "systemctl", &[verb, self.name()]).map(drop)
    }

    fn file_err(&self, what: &str, e: &io::Error) -> ConvergeError {
        ConvergeError::apply(
            self.name(),
            format!("cannot {} {}: {}", what, self.path.display(), e),
        )
    }

    fn restore(&self, ctx: &RunContext, previous: Option<&str>) {
        let restored = match previous {
            Some(content) => write_atomic(&self.path, content, UNIT_MODE),
            None => match fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        match restored {
            Ok(()) => log::info!("{}: restored previous unit file", self.name()),
            Err(e) => log::warn!("{}: could not roll back unit file: {}", self.name(), e),
        }
        run_advisory(ctx, "systemctl", &["daemon-reload"]);
    }

    fn journal(&self, ctx: &RunContext) -> String {
        match ctx.host.run(
            "journalctl",
            &["-u", self.name(), "-n", JOURNAL_LINES, "--no-pager"],
        ) {
            Ok(output) => output.stdout_str(),
            Err(e) => io_message("journalctl", &e),
        }
    }
}

impl Resource for ServiceUnit {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("Service unit {}", self.path.display())
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        let current = read_optional(&self.path).map_err(|e| {
            ConvergeError::probe(self.name(), format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let Some(current) = current else {
            return Ok(ProbeResult::absent());
        };

        let mut probe = ProbeResult::present()
            .with_observed("hash", render::content_hash(&current))
            .with_observed("active", self.query(ctx, "is-active"))
            .with_observed("enabled", self.query(ctx, "is-enabled"));
        if current != self.content {
            probe = probe.with_drift("content");
        }
        Ok(probe)
    }

    /// The previous unit file comes back when systemd refuses the new one
    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        let previous = read_optional(&self.path).map_err(|e| self.file_err("read", &e))?;
        write_atomic(&self.path, &self.content, UNIT_MODE)
            .map_err(|e| self.file_err("write", &e))?;

        let loaded = run_apply(ctx, self.name(), "systemctl", &["daemon-reload"])
            .and_then(|_| self.systemctl(ctx, "enable"));
        if let Err(err) = loaded {
            self.restore(ctx, previous.as_deref());
            return Err(err);
        }
        ctx.mark(restart_mark(self.name()));
        Ok(())
    }

    /// Enable, (re)start, wait, then require `active`
    fn finalize(&self, ctx: &mut RunContext) -> Result<(), ConvergeError> {
        if self.query(ctx, "is-enabled") != "enabled" {
            self.systemctl(ctx, "enable")?;
        }

        let verb = if ctx.take_mark(&restart_mark(self.name())) {
            "restart"
        } else if self.query(ctx, "is-active") != "active" {
            "start"
        } else {
            log::debug!("{} already active", self.name());
            return Ok(());
        };

        if let Err(err) = self.systemctl(ctx, verb) {
            return Err(err.with_diagnostics(self.journal(ctx)));
        }

        ctx.host.pause(self.health_wait);

        let state = self.query(ctx, "is-active");
        if state != "active" {
            return Err(ConvergeError::verification(
                self.name(),
                format!("service is {} after {}", state, verb),
            )
            .with_diagnostics(self.journal(ctx)));
        }
        log::info!("{} is active", self.name());
        Ok(())
    }

    fn remove(&self, ctx: &mut RunContext) -> Result<RemoveOutcome, ConvergeError> {
        if !self.path.exists() {
            return Ok(RemoveOutcome::NotFound);
        }

        run_advisory(ctx, "systemctl", &["stop", self.name()]);
        run_advisory(ctx, "systemctl", &["disable", self.name()]);

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConvergeError::apply(
                    self.name(),
                    format!("cannot delete {}: {}", self.path.display(), e),
                ));
            }
        }

        run_advisory(ctx, "systemctl", &["daemon-reload"]);
        run_advisory(ctx, "systemctl", &["reset-failed", self.name()]);
        Ok(RemoveOutcome::Removed)
    }

    fn preview(&self, current: &ProbeResult) -> Option<String> {
        if !current.exists {
            return Some(format!("write {}", self.path.display()));
        }
        let on_disk = fs::read_to_string(&self.path).unwrap_or_default();
        Some(render::unified_diff(
            &on_disk,
            &self.content,
            &self.path.display().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use declarative::{Action, NoProgress, Plan, install, remove};

    fn unit(dir: &Path, name: &str, content: &str) -> ServiceUnit {
        ServiceUnit::new(name, dir, content.to_string(), Duration::from_secs(3))
    }

    #[test]
    fn install_writes_enables_and_health_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let mut ctx = RunContext::new(&host);
        let plan = Plan::new().with(Box::new(unit(tmp.path(), "demo_gunicorn", "[Unit]\n")));

        let report = install(&plan, &mut ctx, &mut NoProgress);
        assert!(report.is_success());
        assert_eq!(report.action_of("demo_gunicorn"), Some(Action::Created));
        assert_eq!(
            fs::read_to_string(tmp.path().join("demo_gunicorn.service")).unwrap(),
            "[Unit]\n"
        );
        assert!(host.called("systemctl daemon-reload"));
        assert!(host.called("systemctl restart demo_gunicorn"));
        assert_eq!(host.state().pauses, vec![Duration::from_secs(3)]);
        assert!(host.state().active.contains("demo_gunicorn"));
    }

    #[test]
    fn unchanged_active_unit_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let plan = Plan::new().with(Box::new(unit(tmp.path(), "demo_gunicorn", "[Unit]\n")));
        install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        host.clear_calls();

        let report = install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert_eq!(report.action_of("demo_gunicorn"), Some(Action::Skipped));
        assert!(!host.called("systemctl restart"));
        assert!(!host.called("systemctl start"));
    }

    #[test]
    fn stopped_unit_is_started() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let plan = Plan::new().with(Box::new(unit(tmp.path(), "demo_enforcer", "x\n")));
        install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        host.update(|s| {
            s.active.clear();
        });

        install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert!(host.called("systemctl start demo_enforcer"));
    }

    #[test]
    fn content_change_is_an_update_with_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        install(
            &Plan::new().with(Box::new(unit(tmp.path(), "web", "old\n"))),
            &mut RunContext::new(&host),
            &mut NoProgress,
        );
        host.clear_calls();

        let report = install(
            &Plan::new().with(Box::new(unit(tmp.path(), "web", "new\n"))),
            &mut RunContext::new(&host),
            &mut NoProgress,
        );
        assert_eq!(report.action_of("web"), Some(Action::Updated));
        assert!(host.called("systemctl restart web"));
    }

    #[test]
    fn refused_unit_is_rolled_back_and_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let old = Plan::new().with(Box::new(unit(tmp.path(), "web", "old\n")));
        install(&old, &mut RunContext::new(&host), &mut NoProgress);

        host.fail("systemctl", "Failed to reload daemon: Access denied");
        let new = Plan::new().with(Box::new(unit(tmp.path(), "web", "new\n")));
        let report = install(&new, &mut RunContext::new(&host), &mut NoProgress);
        assert!(report.fatal.is_some());
        assert_eq!(fs::read_to_string(tmp.path().join("web.service")).unwrap(), "old\n");

        host.recover("systemctl");
        host.clear_calls();
        let again = install(&new, &mut RunContext::new(&host), &mut NoProgress);
        assert!(again.is_success(), "{:?}", again.fatal);
        assert_eq!(again.action_of("web"), Some(Action::Updated));
        assert!(host.called("systemctl daemon-reload"));
        assert!(host.called("systemctl restart web"));
    }

    #[test]
    fn refused_new_unit_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.fail("systemctl", "Failed to reload daemon");
        let plan = Plan::new().with(Box::new(unit(tmp.path(), "web", "x\n")));

        let report = install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert!(report.fatal.is_some());
        assert!(!tmp.path().join("web.service").exists());
    }

    #[test]
    fn inactive_after_start_is_fatal_with_journal() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.update(|s| {
            s.broken_units.insert("web".to_string());
        });
        let mut ctx = RunContext::new(&host);
        let plan = Plan::new().with(Box::new(unit(tmp.path(), "web", "x\n")));

        let report = install(&plan, &mut ctx, &mut NoProgress);
        let fatal = report.fatal.expect("health check must fail");
        assert!(matches!(fatal, ConvergeError::Verification { .. }));
        assert!(fatal.to_string().contains("failed after restart"));
        assert!(fatal.diagnostics().unwrap().contains("RuntimeError: boom"));
        assert!(host.called("journalctl -u web -n 30 --no-pager"));
    }

    #[test]
    fn runtime_state_is_reported_without_drift() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("web.service"), "x\n").unwrap();
        let host = FakeHost::new();
        let probe = unit(tmp.path(), "web", "x\n").probe(&RunContext::new(&host)).unwrap();
        assert!(probe.is_converged());
        assert_eq!(probe.observed["active"], "inactive");
        assert_eq!(probe.observed["enabled"], "disabled");
    }

    #[test]
    fn remove_then_remove_again() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("svc_demo.service"), "x\n").unwrap();
        let host = FakeHost::new();
        host.update(|s| {
            s.active.insert("svc_demo".to_string());
            s.enabled.insert("svc_demo".to_string());
        });
        let plan = Plan::new().with(Box::new(ServiceUnit::existing("svc_demo", tmp.path())));

        let first = remove(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert!(first.is_success());
        assert_eq!(first.action_of("svc_demo"), Some(Action::Removed));
        let calls = host.calls();
        let stop = calls.iter().position(|c| c == "systemctl stop svc_demo").unwrap();
        let disable = calls.iter().position(|c| c == "systemctl disable svc_demo").unwrap();
        assert!(stop < disable);
        assert!(!tmp.path().join("svc_demo.service").exists());
        assert!(host.state().active.is_empty());

        let second = remove(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert!(second.is_success());
        let record = second.record("svc_demo").unwrap();
        assert_eq!(record.action, Action::Skipped);
        assert_eq!(record.reason, "not found");
    }

    #[test]
    fn preview_is_a_diff() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("web.service"), "A=1\n").unwrap();
        let web = unit(tmp.path(), "web", "A=2\n");
        let diff = web.preview(&ProbeResult::present().with_drift("content")).unwrap();
        assert!(diff.contains("-A=1"));
        assert!(diff.contains("+A=2"));
    }
}
