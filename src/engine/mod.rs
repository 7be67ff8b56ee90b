//! Stack engine for stackup
//!
//! 1. Secrets - resolve passwords and keys once, before anything runs
//! 2. Planning - turn the stack config into an ordered resource plan
//! 3. Executing - drive the plan through `declarative` with terminal output

pub mod differ;
pub mod executor;
pub mod planner;
pub mod secrets;

pub use executor::TerminalProgress;
pub use planner::{InstallOptions, install_plan, remove_plan, status_plan};
pub use secrets::{ResolveOptions, SecretSource, Secrets};
