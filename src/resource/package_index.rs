//! Package index refresh - the once-per-run `apt-get update`

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use declarative::{
    ConvergeError, Criticality, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext,
};

use super::run_apply;

const REFRESHED: &str = "package-index:refreshed";

#[derive(Debug)]
pub struct PackageIndex {
    spec: ResourceSpec,
    lists_dir: PathBuf,
    max_age: Duration,
}

impl PackageIndex {
    pub fn new(lists_dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            spec: ResourceSpec::new(ResourceKind::PackageIndex, "apt")
                .with_attr("max_age", format!("{}s", max_age.as_secs())),
            lists_dir: lists_dir.into(),
            max_age,
        }
    }

    fn age(&self) -> std::io::Result<Duration> {
        let modified = std::fs::metadata(&self.lists_dir)?.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }
}

impl Resource for PackageIndex {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        "Refresh package index".to_string()
    }

    fn criticality(&self) -> Criticality {
        Criticality::BestEffort
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        if ctx.is_marked(REFRESHED) {
            return Ok(ProbeResult::present().with_observed("age", "0s"));
        }
        match self.age() {
            Ok(age) => {
                let probe =
                    ProbeResult::absent().with_observed("age", format!("{}s", age.as_secs()));
                Ok(ProbeResult {
                    exists: age <= self.max_age,
                    ..probe
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProbeResult::absent()),
            Err(e) => Err(ConvergeError::probe(
                &self.spec.identity_key,
                format!("cannot read {}: {}", self.lists_dir.display(), e),
            )),
        }
    }

    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        run_apply(ctx, &self.spec.identity_key, "apt-get", &["update", "-q"])?;
        ctx.mark(REFRESHED);
        Ok(())
    }

    fn preview(&self, _current: &ProbeResult) -> Option<String> {
        Some("apt-get update".to_string())
    }
}
