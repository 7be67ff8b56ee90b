//! Resource trait for host convergence
//!
//! A Resource knows how to inspect one object on the host, how to bring
//! it to the desired state, and (optionally) how to take it away again.

use std::fmt;

use crate::context::RunContext;
use crate::error::{ConvergeError, Criticality};
use crate::types::{ProbeResult, ResourceKind, ResourceSpec};

/// When an existing resource counts as converged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergePolicy {
    /// Present and no drifted fields
    #[default]
    CompareContent,
    /// Present is enough; drift is reported but never corrected
    ExistenceSufficient,
}

/// Outcome of a removal attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Core trait for every managed resource
///
/// # Example
///
/// ```ignore
/// use declarative::{ConvergeError, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext};
///
/// #[derive(Debug)]
/// struct Marker { spec: ResourceSpec }
///
/// impl Resource for Marker {
///     fn spec(&self) -> &ResourceSpec { &self.spec }
///     fn description(&self) -> String { format!("Marker {}", self.spec.identity_key) }
///
///     fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
///         if ctx.is_marked(&self.spec.identity_key) {
///             Ok(ProbeResult::present())
///         } else {
///             Ok(ProbeResult::absent())
///         }
///     }
///
///     fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
///         ctx.mark(self.spec.identity_key.clone());
///         Ok(())
///     }
/// }
/// ```
pub trait Resource: fmt::Debug {
    /// Declared identity and desired attributes
    fn spec(&self) -> &ResourceSpec;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    fn policy(&self) -> ConvergePolicy {
        ConvergePolicy::CompareContent
    }

    fn criticality(&self) -> Criticality {
        Criticality::Core
    }

    /// Inspect the host. Must not mutate anything, and must report
    /// absence as `Ok(ProbeResult::absent())` rather than an error.
    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError>;

    /// Bring the resource to its desired state. Must tolerate the
    /// resource already existing (the probe may have been inconclusive).
    fn apply(&self, ctx: &mut RunContext, current: &ProbeResult) -> Result<(), ConvergeError>;

    /// Converge toward absence. Resources that cannot be removed keep
    /// the default, which refuses.
    fn remove(&self, _ctx: &mut RunContext) -> Result<RemoveOutcome, ConvergeError> {
        Err(ConvergeError::validation(format!(
            "{} cannot be removed by this tool",
            self.spec()
        )))
    }

    /// Post-apply step run once after the whole plan succeeded
    /// (start/restart and health check for services).
    fn finalize(&self, _ctx: &mut RunContext) -> Result<(), ConvergeError> {
        Ok(())
    }

    /// Dry-run preview of the change `apply` would make
    fn preview(&self, _current: &ProbeResult) -> Option<String> {
        None
    }
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Shorthand accessors for any resource
pub trait ResourceExt {
    fn kind(&self) -> ResourceKind;
    fn identity_key(&self) -> &str;
}

impl<R: Resource + ?Sized> ResourceExt for R {
    fn kind(&self) -> ResourceKind {
        self.spec().kind
    }

    fn identity_key(&self) -> &str {
        &self.spec().identity_key
    }
}
