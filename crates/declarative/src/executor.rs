//! Convergence engine - drives a plan through probe, diff, apply, verify
//!
//! Per resource: `Planned → Probed → {Skipped | Applied | Failed}`.
//! Execution is strictly sequential; later resources depend on earlier ones.

use crate::context::{ProgressCallback, RunContext};
use crate::error::{ConvergeError, Criticality};
use crate::planner::Plan;
use crate::resource::{ConvergePolicy, RemoveOutcome, Resource};
use crate::types::{
    Action, ExecutionRecord, Operation, ProbeResult, RunReport, StatusEntry, StatusReport,
};

/// Forward convergence of the whole plan.
///
/// Stops at the first fatal failure: resources after it are not attempted
/// and do not appear in the report. Already-applied resources are left in
/// place. When every resource converged, each one is finalized (service
/// start/restart and health check).
pub fn install(
    plan: &Plan,
    ctx: &mut RunContext,
    progress: &mut dyn ProgressCallback,
) -> RunReport {
    let mut report = RunReport::new(Operation::Install);
    progress.on_plan_start(Operation::Install, plan.len());

    for resource in plan.iter() {
        let spec = resource.spec();
        progress.on_resource_start(spec, &resource.description());

        let record = match converge(resource, ctx, progress) {
            Ok(record) => record,
            Err(err) => {
                let record = ExecutionRecord::new(spec, Action::Failed, err.to_string());
                progress.on_resource_complete(&record);
                report.records.push(record);
                if err.is_fatal(resource.criticality(), Operation::Install) {
                    log::error!("{}", err);
                    report.fatal = Some(err);
                    progress.on_plan_complete(&report);
                    return report;
                }
                log::warn!("{} (continuing)", err);
                report.advisories.push(err);
                continue;
            }
        };

        progress.on_resource_complete(&record);
        report.records.push(record);
    }

    if !ctx.dry_run {
        for resource in plan.iter() {
            if let Err(err) = resource.finalize(ctx) {
                let record =
                    ExecutionRecord::new(resource.spec(), Action::Failed, err.to_string());
                progress.on_resource_complete(&record);
                report.records.push(record);
                if err.is_fatal(resource.criticality(), Operation::Install) {
                    log::error!("{}", err);
                    report.fatal = Some(err);
                    break;
                }
                log::warn!("{} (continuing)", err);
                report.advisories.push(err);
            }
        }
    }

    progress.on_plan_complete(&report);
    report
}

/// Probe-only report. Takes the context immutably: nothing is recorded
/// and nothing is applied.
pub fn status(plan: &Plan, ctx: &RunContext) -> StatusReport {
    let entries = plan
        .iter()
        .map(|resource| {
            let spec = resource.spec();
            match resource.probe(ctx) {
                Ok(probe) => StatusEntry {
                    kind: spec.kind,
                    identity_key: spec.identity_key.clone(),
                    exists: probe.exists,
                    drifted: probe.drifted,
                    observed: probe.observed,
                    error: None,
                },
                Err(err) => {
                    log::warn!("{}", err);
                    StatusEntry {
                        kind: spec.kind,
                        identity_key: spec.identity_key.clone(),
                        exists: false,
                        drifted: Default::default(),
                        observed: Default::default(),
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect();

    StatusReport { entries }
}

/// Reverse-order, best-effort convergence toward absence.
///
/// A resource that is already gone is a successful no-op. Collaborator
/// failures are advisory; only a resource that still exists after a
/// reported removal aborts the run.
pub fn remove(
    plan: &Plan,
    ctx: &mut RunContext,
    progress: &mut dyn ProgressCallback,
) -> RunReport {
    let mut report = RunReport::new(Operation::Remove);
    progress.on_plan_start(Operation::Remove, plan.len());

    for resource in plan.iter().rev() {
        let spec = resource.spec();
        progress.on_resource_start(spec, &resource.description());

        let outcome = if ctx.dry_run {
            preview_removal(resource, ctx)
        } else {
            remove_one(resource, ctx)
        };

        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                let record = ExecutionRecord::new(spec, Action::Failed, err.to_string());
                progress.on_resource_complete(&record);
                report.records.push(record);
                if err.is_fatal(Criticality::BestEffort, Operation::Remove) {
                    log::error!("{}", err);
                    report.fatal = Some(err);
                    progress.on_plan_complete(&report);
                    return report;
                }
                log::warn!("{} (continuing)", err);
                report.advisories.push(err);
                continue;
            }
        };

        progress.on_resource_complete(&record);
        report.records.push(record);
    }

    progress.on_plan_complete(&report);
    report
}

/// Probe, decide, apply and re-verify one resource
fn converge(
    resource: &dyn Resource,
    ctx: &mut RunContext,
    progress: &mut dyn ProgressCallback,
) -> Result<ExecutionRecord, ConvergeError> {
    let spec = resource.spec();
    let policy = resource.policy();

    let current = match resource.probe(ctx) {
        Ok(probe) => probe,
        Err(err) => {
            log::warn!("{}; assuming absent", err);
            ProbeResult::unknown()
        }
    };

    if current.exists
        && (current.drifted.is_empty() || policy == ConvergePolicy::ExistenceSufficient)
    {
        return Ok(ExecutionRecord::new(spec, Action::Skipped, skip_reason(&current, policy)));
    }

    let action = if current.exists {
        Action::Updated
    } else {
        Action::Created
    };

    if ctx.dry_run {
        if let Some(preview) = resource.preview(&current) {
            progress.on_preview(spec, &preview);
        }
        return Ok(ExecutionRecord::new(
            spec,
            Action::Skipped,
            format!("dry run: would be {}", change_reason(action, &current)),
        ));
    }

    log::info!("applying {} ({})", spec, change_reason(action, &current));
    resource.apply(ctx, &current)?;

    let after = resource.probe(ctx).map_err(|err| {
        ConvergeError::verification(&spec.identity_key, format!("re-probe failed: {}", err))
    })?;
    if !after.exists {
        return Err(ConvergeError::verification(
            &spec.identity_key,
            "still absent after apply",
        ));
    }
    if policy == ConvergePolicy::CompareContent && !after.drifted.is_empty() {
        return Err(ConvergeError::verification(
            &spec.identity_key,
            format!("still drifted after apply: {}", after.drift_list()),
        ));
    }

    Ok(ExecutionRecord::new(spec, action, change_reason(action, &current)))
}

fn remove_one(
    resource: &dyn Resource,
    ctx: &mut RunContext,
) -> Result<ExecutionRecord, ConvergeError> {
    let spec = resource.spec();
    match resource.remove(ctx)? {
        RemoveOutcome::NotFound => Ok(ExecutionRecord::new(spec, Action::Skipped, "not found")),
        RemoveOutcome::Removed => {
            if let Ok(after) = resource.probe(ctx)
                && after.exists
            {
                return Err(ConvergeError::verification(
                    &spec.identity_key,
                    "still present after removal",
                ));
            }
            Ok(ExecutionRecord::new(spec, Action::Removed, "removed"))
        }
    }
}

fn preview_removal(
    resource: &dyn Resource,
    ctx: &RunContext,
) -> Result<ExecutionRecord, ConvergeError> {
    let spec = resource.spec();
    let probe = resource.probe(ctx)?;
    let reason = if probe.exists {
        "dry run: would be removed"
    } else {
        "not found"
    };
    Ok(ExecutionRecord::new(spec, Action::Skipped, reason))
}

fn skip_reason(current: &ProbeResult, policy: ConvergePolicy) -> String {
    if current.drifted.is_empty() {
        "already in desired state".to_string()
    } else {
        debug_assert_eq!(policy, ConvergePolicy::ExistenceSufficient);
        format!("exists, preserved as-is (differs in: {})", current.drift_list())
    }
}

fn change_reason(action: Action, current: &ProbeResult) -> String {
    match action {
        Action::Created if current.is_unknown() => {
            "created (state could not be inspected)".to_string()
        }
        Action::Created => "created".to_string(),
        Action::Updated => format!("updated ({})", current.drift_list()),
        other => other.to_string(),
    }
}
