//! Maps domain and infrastructure failures to the process exit codes the
//! CLI surface promises: 0 success, 2 usage (handled by clap itself), 3
//! not-found, 4 runtime.

use std::fmt;

use trellis_core::{ControlError, PlannerError, TransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    NotFound,
    Runtime,
}

/// A CLI-boundary error: an underlying failure plus the exit code it maps to.
#[derive(Debug)]
pub struct CliError {
    kind: ExitKind,
    source: anyhow::Error,
}

impl CliError {
    pub fn not_found(err: impl Into<anyhow::Error>) -> Self {
        Self { kind: ExitKind::NotFound, source: err.into() }
    }

    pub fn runtime(err: impl Into<anyhow::Error>) -> Self {
        Self { kind: ExitKind::Runtime, source: err.into() }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ExitKind::NotFound => 3,
            ExitKind::Runtime => 4,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.source)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::runtime(err)
    }
}

impl From<PlannerError> for CliError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::WorkflowTreeNotFound { .. }
            | PlannerError::WorkflowTreeVersionNotFound { .. }
            | PlannerError::RunNotFound(_) => Self::not_found(err),
            PlannerError::AmbiguousWorkflowTreeVersion { .. } => Self::runtime(err),
        }
    }
}

impl From<ControlError> for CliError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::RunNotFound(_) => Self::not_found(err),
            ControlError::InvalidForStatus { .. } => Self::runtime(err),
        }
    }
}

impl From<TransitionError> for CliError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::RunNodeNotFound(_) | TransitionError::RunNotFound(_) => {
                Self::not_found(err)
            }
            _ => Self::runtime(err),
        }
    }
}
