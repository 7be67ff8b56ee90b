//! Plan and status display

use colored::Colorize;
use declarative::{Plan, ResourceKind, StatusEntry, StatusReport};

/// How one status entry compares with the desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Converged,
    Drifted,
    Missing,
    Unknown,
}

impl EntryState {
    pub fn of(entry: &StatusEntry) -> Self {
        if entry.error.is_some() {
            Self::Unknown
        } else if !entry.exists {
            Self::Missing
        } else if entry.drifted.is_empty() {
            Self::Converged
        } else {
            Self::Drifted
        }
    }
}

fn heading(kind: ResourceKind, current: &mut Option<ResourceKind>) {
    if *current != Some(kind) {
        println!("│ {}", kind.heading().bold());
        *current = Some(kind);
    }
}

/// What an install run will look at, grouped by kind
pub fn display_plan(plan: &Plan, title: &str) {
    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        title.bold()
    );

    let mut current = None;
    for resource in plan.iter() {
        let spec = resource.spec();
        if current != Some(spec.kind) {
            println!("│");
        }
        heading(spec.kind, &mut current);
        println!("│   {} {}", "•".cyan(), resource.description());
    }

    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!("│ {} resources", plan.len().to_string().bold());
    println!("└─────────────────────────────────────────────────────┘");
}

/// Observed state of every resource, grouped by kind
pub fn display_status(report: &StatusReport) {
    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Stack Status".bold()
    );

    let mut current = None;
    let mut counts = [0usize; 4];
    for entry in &report.entries {
        if current != Some(entry.kind) {
            println!("│");
        }
        heading(entry.kind, &mut current);

        let state = EntryState::of(entry);
        let (symbol, detail) = match state {
            EntryState::Converged => ("✓".green(), observed_line(entry)),
            EntryState::Drifted => {
                let names: Vec<_> = entry.drifted.iter().cloned().collect();
                ("~".yellow(), format!("drifted: {}", names.join(", ")))
            }
            EntryState::Missing => ("✗".red(), "(missing)".to_string()),
            EntryState::Unknown => ("?".dimmed(), entry.error.clone().unwrap_or_default()),
        };
        counts[state as usize] += 1;
        println!("│   {} {:<32} {}", symbol, entry.identity_key, detail.dimmed());
    }

    let [converged, drifted, missing, unknown] = counts;
    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ {} ok, {} drifted, {} missing, {} unknown",
        converged.to_string().green(),
        drifted.to_string().yellow(),
        missing.to_string().red(),
        unknown
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn observed_line(entry: &StatusEntry) -> String {
    entry
        .observed
        .iter()
        .filter(|(key, _)| key.as_str() != "hash")
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}
