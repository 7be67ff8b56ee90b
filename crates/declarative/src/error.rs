//! Error taxonomy for convergence runs.
//!
//! Errors are categorized so the engine can decide between aborting the
//! run and logging an advisory. The decision also depends on the
//! resource's [`Criticality`] and the operation being run.

use thiserror::Error;

use crate::types::Operation;

/// How much a resource matters to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Criticality {
    /// Failure to apply aborts `install`
    #[default]
    Core,
    /// Failure is logged and the run continues
    BestEffort,
}

/// Errors raised while probing, applying or verifying a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvergeError {
    /// Missing or malformed input, raised before any mutation
    #[error("invalid input: {message}")]
    Validation { message: String },

    /// The inspection tool itself is unavailable or misbehaved
    #[error("could not inspect {identity_key}: {message}")]
    Probe {
        identity_key: String,
        message: String,
    },

    /// An external collaborator reported failure
    #[error("failed to apply {identity_key}: {message}")]
    Apply {
        identity_key: String,
        message: String,
        diagnostics: Option<String>,
    },

    /// Apply claimed success but the resource did not converge
    #[error("{identity_key} did not converge: {message}")]
    Verification {
        identity_key: String,
        message: String,
        diagnostics: Option<String>,
    },
}

impl ConvergeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn probe(identity_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Probe {
            identity_key: identity_key.into(),
            message: message.into(),
        }
    }

    pub fn apply(identity_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Apply {
            identity_key: identity_key.into(),
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn verification(identity_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Verification {
            identity_key: identity_key.into(),
            message: message.into(),
            diagnostics: None,
        }
    }

    /// Attach collaborator output, kept verbatim for the operator.
    /// Ignored for variants that carry no diagnostics.
    pub fn with_diagnostics(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if output.trim().is_empty() {
            return self;
        }
        match &mut self {
            Self::Apply { diagnostics, .. } | Self::Verification { diagnostics, .. } => {
                *diagnostics = Some(output);
            }
            Self::Validation { .. } | Self::Probe { .. } => {}
        }
        self
    }

    pub fn identity_key(&self) -> Option<&str> {
        match self {
            Self::Validation { .. } => None,
            Self::Probe { identity_key, .. }
            | Self::Apply { identity_key, .. }
            | Self::Verification { identity_key, .. } => Some(identity_key),
        }
    }

    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Apply { diagnostics, .. } | Self::Verification { diagnostics, .. } => {
                diagnostics.as_deref()
            }
            Self::Validation { .. } | Self::Probe { .. } => None,
        }
    }

    /// Whether this error aborts the remaining plan.
    ///
    /// Apply failures only abort `install`, and only for core resources;
    /// during `remove` every apply step is best-effort.
    pub fn is_fatal(&self, criticality: Criticality, operation: Operation) -> bool {
        match self {
            Self::Validation { .. } | Self::Verification { .. } => true,
            Self::Probe { .. } => false,
            Self::Apply { .. } => {
                operation == Operation::Install && criticality == Criticality::Core
            }
        }
    }
}
