//! Terminal side of an engine run - progress lines, summary, failure detail

use anyhow::Result;
use colored::{ColoredString, Colorize};

use declarative::{
    Action, ConvergeError, ExecutionRecord, Operation, ProgressCallback, ResourceSpec, RunReport,
};

/// Prints one line per resource as the engine reaches it
pub struct TerminalProgress {
    total: usize,
    index: usize,
    verbose: bool,
}

impl TerminalProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            total: 0,
            index: 0,
            verbose,
        }
    }

    fn counter(&self) -> String {
        let width = self.total.to_string().len();
        format!("[{:>width$}/{}]", self.index.min(self.total), self.total)
    }
}

fn symbol(action: Action) -> ColoredString {
    match action {
        Action::Created | Action::Updated | Action::Removed => "✓".green(),
        Action::Skipped => "○".dimmed(),
        Action::Failed => "✗".red(),
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_plan_start(&mut self, operation: Operation, count: usize) {
        self.total = count;
        self.index = 0;
        let verb = match operation {
            Operation::Install => "Converging",
            Operation::Status => "Inspecting",
            Operation::Remove => "Removing",
        };
        println!();
        println!("  {} {} {} resources...", "→".cyan(), verb, count);
    }

    fn on_resource_start(&mut self, _spec: &ResourceSpec, description: &str) {
        self.index += 1;
        if self.verbose {
            println!("    {} {}", self.counter().dimmed(), description.dimmed());
        }
    }

    fn on_preview(&mut self, _spec: &ResourceSpec, preview: &str) {
        for line in preview.lines() {
            let line = if line.starts_with('+') && !line.starts_with("+++") {
                line.green()
            } else if line.starts_with('-') && !line.starts_with("---") {
                line.red()
            } else {
                line.dimmed()
            };
            println!("        {}", line);
        }
    }

    fn on_resource_complete(&mut self, record: &ExecutionRecord) {
        let action = match record.action {
            Action::Skipped => record.action.to_string().dimmed(),
            Action::Failed => record.action.to_string().red(),
            _ => record.action.to_string().green(),
        };
        println!(
            "  {} {} {:<14} {:<32} {} {}",
            symbol(record.action),
            self.counter().dimmed(),
            record.kind.label(),
            record.identity_key,
            action,
            record.reason.dimmed()
        );
    }

    fn on_plan_complete(&mut self, _report: &RunReport) {}
}

/// Ask before mutating the host
pub fn confirm_proceed(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Counts per action, then the advisories
pub fn print_summary(report: &RunReport, dry_run: bool) {
    let summary = report.summary();
    println!();
    if dry_run {
        println!("  {} Dry run - no changes made", "ℹ".blue());
    } else if !report.is_success() {
        println!("  {} {} stopped with errors", "✗".red().bold(), report.operation);
    } else if report.advisories.is_empty() {
        println!("  {} {} complete", "✓".green().bold(), report.operation);
    } else {
        println!("  {} {} complete with warnings", "⚠".yellow().bold(), report.operation);
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.removed > 0 {
        println!("    • {} resources removed", summary.removed);
    }
    if summary.skipped > 0 {
        println!("    • {} resources unchanged", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }

    for advisory in &report.advisories {
        println!("    {} {}", "⚠".yellow(), advisory);
    }
}

/// The failing resource, the error, and whatever its collaborator said
pub fn print_failure(err: &ConvergeError) {
    eprintln!();
    eprintln!("{} {}", "✗".red().bold(), err.to_string().bold());
    if let Some(output) = err.diagnostics() {
        eprintln!();
        for line in output.lines() {
            eprintln!("    {}", line.dimmed());
        }
    }
}
