//! nginx sites (sites-available plus the sites-enabled link)

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use declarative::{
    ConvergeError, ProbeResult, RemoveOutcome, Resource, ResourceKind, ResourceSpec, RunContext,
};

use super::{read_optional, run_advisory, run_apply, write_atomic};
use crate::render;

const SITE_MODE: u32 = 0o644;
const DEFAULT_SITE: &str = "default";

#[derive(Debug)]
pub struct ProxySite {
    spec: ResourceSpec,
    available: PathBuf,
    enabled: PathBuf,
    default_link: PathBuf,
    content: String,
    replace_default: bool,
}

impl ProxySite {
    pub fn new(
        name: &str,
        nginx_dir: impl AsRef<Path>,
        content: String,
        replace_default: bool,
    ) -> Self {
        let nginx_dir = nginx_dir.as_ref();
        Self {
            spec: ResourceSpec::new(ResourceKind::ProxySite, name)
                .with_attr("hash", render::content_hash(&content))
                .with_attr("enabled", "true"),
            available: nginx_dir.join("sites-available").join(name),
            enabled: nginx_dir.join("sites-enabled").join(name),
            default_link: nginx_dir.join("sites-enabled").join(DEFAULT_SITE),
            content,
            replace_default,
        }
    }

    /// A site known only by name, for removal
    pub fn existing(name: &str, nginx_dir: impl AsRef<Path>) -> Self {
        Self::new(name, nginx_dir, String::new(), false)
    }

    fn name(&self) -> &str {
        &self.spec.identity_key
    }

    fn link_present(&self) -> bool {
        fs::symlink_metadata(&self.enabled).is_ok()
    }

    fn link_correct(&self) -> bool {
        fs::read_link(&self.enabled).is_ok_and(|target| target == self.available)
    }

    fn apply_err(&self, what: &str, path: &Path, e: &io::Error) -> ConvergeError {
        ConvergeError::apply(self.name(), format!("cannot {} {}: {}", what, path.display(), e))
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn reload(&self, ctx: &RunContext) -> Result<(), ConvergeError> {
        run_apply(ctx, self.name(), "nginx", &["-t"])?;
        run_apply(ctx, self.name(), "systemctl", &["reload-or-restart", "nginx"])?;
        Ok(())
    }

    fn snapshot(&self) -> Result<Previous, ConvergeError> {
        let content = read_optional(&self.available)
            .map_err(|e| self.apply_err("read", &self.available, &e))?;
        Ok(Previous {
            content,
            link: fs::read_link(&self.enabled).ok(),
            default_link: fs::read_link(&self.default_link).ok(),
        })
    }

    /// Write, link, then let nginx validate and reload
    fn activate(&self, ctx: &RunContext) -> Result<(), ConvergeError> {
        write_atomic(&self.available, &self.content, SITE_MODE)
            .map_err(|e| self.apply_err("write", &self.available, &e))?;

        if !self.link_correct() {
            self.unlink(&self.enabled)
                .map_err(|e| self.apply_err("replace", &self.enabled, &e))?;
            if let Some(parent) = self.enabled.parent() {
                fs::create_dir_all(parent).map_err(|e| self.apply_err("create", parent, &e))?;
            }
            symlink(&self.available, &self.enabled)
                .map_err(|e| self.apply_err("link", &self.enabled, &e))?;
        }

        if self.replace_default {
            self.unlink(&self.default_link)
                .map_err(|e| self.apply_err("disable", &self.default_link, &e))?;
        }

        self.reload(ctx)
    }

    /// Put the site files back the way [`Self::snapshot`] found them
    fn restore(&self, previous: &Previous) {
        let content = match &previous.content {
            Some(content) => write_atomic(&self.available, content, SITE_MODE),
            None => self.unlink(&self.available),
        };
        let link = self.unlink(&self.enabled).and_then(|()| match &previous.link {
            Some(target) => symlink(target, &self.enabled),
            None => Ok(()),
        });
        let default_link = match &previous.default_link {
            Some(target) if fs::symlink_metadata(&self.default_link).is_err() => {
                symlink(target, &self.default_link)
            }
            _ => Ok(()),
        };

        for result in [content, link, default_link] {
            if let Err(e) = result {
                log::warn!("{}: could not roll back site files: {}", self.name(), e);
            }
        }
        log::info!("{}: restored previous site files", self.name());
    }
}

/// Site files as found before an apply
#[derive(Debug)]
struct Previous {
    content: Option<String>,
    link: Option<PathBuf>,
    default_link: Option<PathBuf>,
}

impl Resource for ProxySite {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("Proxy site {}", self.available.display())
    }

    fn probe(&self, _ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        let current = read_optional(&self.available).map_err(|e| {
            let message = format!("cannot read {}: {}", self.available.display(), e);
            ConvergeError::probe(self.name(), message)
        })?;
        let enabled = self.link_correct();
        let Some(current) = current else {
            return Ok(ProbeResult::absent().with_observed("enabled", enabled.to_string()));
        };

        let mut probe = ProbeResult::present()
            .with_observed("hash", render::content_hash(&current))
            .compare("enabled", &enabled.to_string(), "true");
        if current != self.content {
            probe = probe.with_drift("content");
        }
        if self.replace_default && fs::symlink_metadata(&self.default_link).is_ok() {
            probe = probe.with_drift("default_site");
        }
        Ok(probe)
    }

    /// A rejected config is rolled back, so the next run sees the drift again
    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        let previous = self.snapshot()?;
        if let Err(err) = self.activate(ctx) {
            self.restore(&previous);
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, ctx: &mut RunContext) -> Result<RemoveOutcome, ConvergeError> {
        if !self.available.exists() && !self.link_present() {
            return Ok(RemoveOutcome::NotFound);
        }

        self.unlink(&self.enabled)
            .map_err(|e| self.apply_err("delete", &self.enabled, &e))?;
        self.unlink(&self.available)
            .map_err(|e| self.apply_err("delete", &self.available, &e))?;

        if run_advisory(ctx, "nginx", &["-t"]) {
            run_advisory(ctx, "systemctl", &["reload-or-restart", "nginx"]);
        }
        Ok(RemoveOutcome::Removed)
    }

    fn preview(&self, current: &ProbeResult) -> Option<String> {
        let mut lines = Vec::new();
        if current.exists && current.drifted.contains("content") {
            let on_disk = fs::read_to_string(&self.available).unwrap_or_default();
            lines.push(render::unified_diff(
                &on_disk,
                &self.content,
                &self.available.display().to_string(),
            ));
        } else if !current.exists {
            lines.push(format!("write {}", self.available.display()));
        }
        if current.observed.get("enabled").is_none_or(|v| v != "true") {
            lines.push(format!("link {}", self.enabled.display()));
        }
        if current.drifted.contains("default_site") {
            lines.push(format!("unlink {}", self.default_link.display()));
        }
        lines.push("nginx -t && systemctl reload-or-restart nginx".to_string());
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use declarative::{Action, NoProgress, Plan, install, remove};

    #[test]
    fn install_links_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("sites-enabled")).unwrap();
        let default_link = tmp.path().join("sites-enabled/default");
        symlink("/etc/nginx/sites-available/default", default_link).unwrap();
        let host = FakeHost::new();
        let site = ProxySite::new("demo", tmp.path(), "server {}\n".to_string(), true);
        let plan = Plan::new().with(Box::new(site));

        let report = install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert_eq!(report.action_of("demo"), Some(Action::Created));
        assert_eq!(
            fs::read_link(tmp.path().join("sites-enabled/demo")).unwrap(),
            tmp.path().join("sites-available/demo")
        );
        assert!(fs::symlink_metadata(tmp.path().join("sites-enabled/default")).is_err());
        let calls = host.calls();
        assert_eq!(calls, vec!["nginx -t", "systemctl reload-or-restart nginx"]);

        let again = install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert_eq!(again.action_of("demo"), Some(Action::Skipped));
    }

    #[test]
    fn unlinked_site_is_drift() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("sites-available")).unwrap();
        fs::write(tmp.path().join("sites-available/demo"), "server {}\n").unwrap();
        let site = ProxySite::new("demo", tmp.path(), "server {}\n".to_string(), false);

        let host = FakeHost::new();
        let probe = site.probe(&RunContext::new(&host)).unwrap();
        assert!(probe.exists);
        assert_eq!(probe.drift_list(), "enabled");
    }

    #[test]
    fn invalid_config_is_fatal_with_nginx_output() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.fail("nginx", "nginx: [emerg] unknown directive \"proxy_pas\"");
        let site = ProxySite::new("demo", tmp.path(), "x".to_string(), false);
        let plan = Plan::new().with(Box::new(site));

        let report = install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        let fatal = report.fatal.unwrap();
        assert!(fatal.diagnostics().unwrap().contains("unknown directive"));
        assert!(!host.called("systemctl"));
    }

    #[test]
    fn rejected_new_site_is_retried_on_next_run() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.fail("nginx", "nginx: [emerg] host not found in upstream");
        let plan = Plan::new().with(Box::new(ProxySite::new(
            "demo",
            tmp.path(),
            "server {}\n".to_string(),
            false,
        )));

        let first = install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert!(first.fatal.is_some());
        assert!(!tmp.path().join("sites-available/demo").exists());
        assert!(fs::symlink_metadata(tmp.path().join("sites-enabled/demo")).is_err());

        host.recover("nginx");
        host.clear_calls();
        let second = install(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert!(second.is_success(), "{:?}", second.fatal);
        assert_eq!(second.action_of("demo"), Some(Action::Created));
        assert_eq!(host.calls(), vec!["nginx -t", "systemctl reload-or-restart nginx"]);
    }

    #[test]
    fn rejected_update_restores_previous_site() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let default_target = PathBuf::from("/etc/nginx/sites-available/default");
        fs::create_dir_all(tmp.path().join("sites-enabled")).unwrap();
        symlink(&default_target, tmp.path().join("sites-enabled/default")).unwrap();
        let old = ProxySite::new("demo", tmp.path(), "old\n".to_string(), false);
        install(&Plan::new().with(Box::new(old)), &mut RunContext::new(&host), &mut NoProgress);

        host.fail("nginx", "nginx: [emerg] unknown directive");
        let new = Plan::new().with(Box::new(ProxySite::new(
            "demo",
            tmp.path(),
            "new\n".to_string(),
            true,
        )));
        let report = install(&new, &mut RunContext::new(&host), &mut NoProgress);
        assert!(report.fatal.is_some());
        assert_eq!(
            fs::read_to_string(tmp.path().join("sites-available/demo")).unwrap(),
            "old\n"
        );
        assert_eq!(
            fs::read_link(tmp.path().join("sites-enabled/default")).unwrap(),
            default_target
        );

        host.recover("nginx");
        let again = install(&new, &mut RunContext::new(&host), &mut NoProgress);
        assert_eq!(again.action_of("demo"), Some(Action::Updated));
    }

    #[test]
    fn remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let site = ProxySite::new("demo", tmp.path(), "server {}\n".to_string(), false);
        install(&Plan::new().with(Box::new(site)), &mut RunContext::new(&host), &mut NoProgress);

        let plan = Plan::new().with(Box::new(ProxySite::existing("demo", tmp.path())));
        let first = remove(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert_eq!(first.action_of("demo"), Some(Action::Removed));
        assert!(!tmp.path().join("sites-available/demo").exists());

        let second = remove(&plan, &mut RunContext::new(&host), &mut NoProgress);
        assert!(second.is_success());
        assert_eq!(second.action_of("demo"), Some(Action::Skipped));
    }
}
