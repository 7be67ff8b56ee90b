//! `stackup install` - converge the host toward the configured stack

use anyhow::{Result, bail};
use declarative::{Action, Operation, ResourceKind, RunContext, RunReport};

use crate::Context;
use crate::cli::InstallArgs;
use crate::config::{ReverseProxy, StackConfig};
use crate::engine::{
    self, InstallOptions, ResolveOptions, SecretSource, Secrets, TerminalProgress, differ,
    executor,
};
use crate::runner::SystemHost;
use crate::ui;

pub fn run(ctx: &Context, args: InstallArgs) -> Result<()> {
    let config = super::load_config(ctx, &args.overrides, Operation::Install)?;
    if !args.dry_run {
        super::require_root("install")?;
    }
    super::preflight(&config);

    let secrets = engine::secrets::resolve(
        &config,
        ResolveOptions {
            dry_run: args.dry_run,
            rotate_db_password: args.rotate_db_password,
        },
    )?;
    if secrets.db_password_source == SecretSource::Placeholder {
        ui::info(&format!(
            "No database password available; dry run continues without one (set ${} to supply it)",
            config.database.password_env
        ));
    }

    let plan = engine::install_plan(
        &config,
        &secrets,
        InstallOptions {
            rotate_db_password: args.rotate_db_password,
            redeploy: args.redeploy,
        },
    );

    if !ctx.quiet {
        differ::display_plan(&plan, &format!("Install {}", config.app.name));
    }
    if !args.yes && !args.dry_run && !executor::confirm_proceed("Converge this host?")? {
        println!();
        ui::warn("Aborted");
        return Ok(());
    }

    let host = SystemHost;
    let mut run_ctx = RunContext::new(&host).dry_run(args.dry_run);
    let mut progress = TerminalProgress::new(ctx.verbose > 0);
    let report = declarative::install(&plan, &mut run_ctx, &mut progress);

    executor::print_summary(&report, args.dry_run);
    if let Some(err) = &report.fatal {
        executor::print_failure(err);
        bail!(
            "install failed at {}",
            err.identity_key().unwrap_or("configuration")
        );
    }
    if args.dry_run {
        return Ok(());
    }

    if role_changed(&report) {
        print_credentials(&config, &secrets);
    }
    print_access(&config);
    println!();
    ui::success(&format!("{} is up", config.app.name));
    Ok(())
}

/// Whether this run set the role's password
fn role_changed(report: &RunReport) -> bool {
    report
        .records
        .iter()
        .filter(|r| r.kind == ResourceKind::DatabaseRole)
        .any(|r| matches!(r.action, Action::Created | Action::Updated))
}

/// The one place the database password is shown
fn print_credentials(config: &StackConfig, secrets: &Secrets) {
    println!();
    ui::boxed(
        "Database credentials (shown once)",
        &[
            ("Engine", config.database.engine.to_string()),
            (
                "Host",
                format!("{}:{}", config.database.host, config.database_port()),
            ),
            ("Database", config.database_name()),
            ("User", config.database_user()),
            ("Password", secrets.db_password.expose().to_string()),
            ("Stored in", config.env_file().display().to_string()),
        ],
    );
}

fn print_access(config: &StackConfig) {
    ui::section("Access");
    match &config.proxy {
        ReverseProxy::DirectSite(site) => {
            let host = if site.server_name == "_" {
                "<server-ip>"
            } else {
                site.server_name.as_str()
            };
            let url = if site.listen_port == 80 {
                format!("http://{}/", host)
            } else {
                format!("http://{}:{}/", host, site.listen_port)
            };
            ui::kv("Site", &url);
            ui::kv("Upstream", &config.app.bind);
        }
        ReverseProxy::ManagedGateway { public_url } => {
            ui::kv("Upstream", &format!("http://{}", config.app.bind));
            if let Some(url) = public_url {
                ui::kv("Public URL", url);
            }
            ui::dim(&format!(
                "Point the gateway's upstream at http://{}; no local proxy is managed.",
                config.app.bind
            ));
        }
        ReverseProxy::None => {
            ui::kv("Web service", &format!("http://{}", config.app.bind));
        }
    }
    for service in config.services() {
        ui::dim(&format!("journalctl -u {} -f", service));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ExecutionRecord, ResourceSpec};

    fn record(kind: ResourceKind, action: Action) -> ExecutionRecord {
        ExecutionRecord::new(&ResourceSpec::new(kind, "demo"), action, "")
    }

    #[test]
    fn credentials_only_after_role_change() {
        let mut report = RunReport::new(Operation::Install);
        report.records.push(record(ResourceKind::UserGroup, Action::Created));
        report.records.push(record(ResourceKind::DatabaseRole, Action::Skipped));
        assert!(!role_changed(&report));

        report.records.push(record(ResourceKind::DatabaseRole, Action::Created));
        assert!(role_changed(&report));
    }
}
