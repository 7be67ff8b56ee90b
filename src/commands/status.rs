//! `stackup status` - read-only report of every managed resource

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use declarative::{Operation, RunContext, StatusEntry};
use serde::Serialize;

use crate::Context;
use crate::cli::StatusArgs;
use crate::engine::{self, differ};
use crate::runner::SystemHost;
use crate::ui;

#[derive(Serialize)]
struct StatusJson<'a> {
    generated_at: DateTime<Utc>,
    app: &'a str,
    entries: &'a [StatusEntry],
}

pub fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let config = super::load_config(ctx, &args.overrides, Operation::Status)?;
    let plan = engine::status_plan(&config).filter_by_target(args.target.as_deref());
    if plan.is_empty() {
        ui::warn(&format!(
            "Nothing matches '{}'",
            args.target.as_deref().unwrap_or_default()
        ));
        return Ok(());
    }

    let host = SystemHost;
    let report = declarative::status(&plan, &RunContext::new(&host));

    if args.json {
        let json = StatusJson {
            generated_at: Utc::now(),
            app: &config.app.name,
            entries: &report.entries,
        };
        let text = serde_json::to_string_pretty(&json).context("Failed to serialize status")?;
        println!("{}", text);
        return Ok(());
    }

    if !ctx.quiet {
        ui::header(&format!("{} on this host", config.app.name));
        ui::kv("Base directory", &config.base_dir().display().to_string());
        ui::kv("Database", &format!("{} {}", config.database.engine, config.database_name()));
    }
    differ::display_status(&report);
    Ok(())
}
