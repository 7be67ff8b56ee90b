//! # Declarative
//!
//! Idempotent convergence of a single host toward a declared state.
//!
//! ## Core Concepts
//!
//! - **Resource**: something on the host that can be probed and applied
//!   (package, user, directory, database role, unit file, proxy site, ...)
//! - **ProbeResult**: what a read-only inspection found, including drifted fields
//! - **Plan**: resources ordered by a fixed kind ranking (packages before
//!   users before directories before databases before services before sites)
//! - **Executor**: `install`, `status` and `remove` over a plan, producing
//!   per-resource [`ExecutionRecord`]s
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{install, NoProgress, Plan, RunContext};
//!
//! let mut plan = Plan::new();
//! plan.push(Box::new(my_package));
//! plan.push(Box::new(my_unit));
//!
//! let mut ctx = RunContext::new(&host);
//! let report = install(&plan, &mut ctx, &mut NoProgress);
//! if let Some(err) = &report.fatal {
//!     eprintln!("{err}");
//! }
//! ```
//!
//! ## Provider Traits
//!
//! - [`HostExecutor`]: runs external collaborators (package manager,
//!   service manager, database client, ...)
//! - [`ProgressCallback`]: receives progress updates
//!
//! Re-running `install` re-probes everything; there is no persisted plan
//! or state database. Every apply step must therefore be idempotent.

pub mod context;
pub mod error;
pub mod executor;
pub mod planner;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{HostExecutor, NoProgress, ProgressCallback, RunContext};
pub use error::{ConvergeError, Criticality};
pub use executor::{install, remove, status};
pub use planner::Plan;
pub use resource::{BoxedResource, ConvergePolicy, RemoveOutcome, Resource, ResourceExt};
pub use types::{
    Action, Attributes, CommandOutput, ExecutionRecord, Operation, ProbeResult, ResourceKind,
    ResourceSpec, RunReport, RunSummary, StatusEntry, StatusReport,
};
