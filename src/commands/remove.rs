//! `stackup remove` - stop and delete service units and proxy sites
//!
//! Code, data, the database and the env file are never touched here.

use anyhow::{Result, bail};
use declarative::{Operation, RunContext};

use crate::Context;
use crate::cli::RemoveArgs;
use crate::engine::{self, TerminalProgress, differ, executor};
use crate::runner::SystemHost;
use crate::ui;

pub fn run(ctx: &Context, args: RemoveArgs) -> Result<()> {
    let config = super::load_config(ctx, &args.overrides, Operation::Remove)?;
    if !args.dry_run {
        super::require_root("remove")?;
    }

    let plan = engine::remove_plan(&config, &args.services, &args.sites);
    if plan.is_empty() {
        ui::info("Nothing to remove");
        return Ok(());
    }

    if !ctx.quiet {
        differ::display_plan(&plan, "Remove");
    }
    if !args.yes && !args.dry_run && !executor::confirm_proceed("Remove these resources?")? {
        println!();
        ui::warn("Aborted");
        return Ok(());
    }

    let host = SystemHost;
    let mut run_ctx = RunContext::new(&host).dry_run(args.dry_run);
    let mut progress = TerminalProgress::new(ctx.verbose > 0);
    let report = declarative::remove(&plan, &mut run_ctx, &mut progress);

    executor::print_summary(&report, args.dry_run);
    if let Some(err) = &report.fatal {
        executor::print_failure(err);
        bail!("remove failed at {}", err.identity_key().unwrap_or("configuration"));
    }
    if !args.dry_run {
        ui::dim(&format!(
            "Application files under {} were left in place.",
            config.base_dir().display()
        ));
    }
    Ok(())
}
