use crate::backend::BackendError;
use std::error::Error;
use std::fmt;

use super::workflow::Step;

/// Problems caught locally, before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BlankQuestion,
    BlankSql,
    EmptySelection,
    IncompleteConfig(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::BlankQuestion => write!(
                f,
                "Please enter a natural language query or select recommendations."
            ),
            ValidationError::BlankSql => write!(f, "Please generate an SQL query first."),
            ValidationError::EmptySelection => write!(f, "Select at least one table."),
            ValidationError::IncompleteConfig(field) => {
                write!(f, "Connection configuration is missing '{}'", field)
            }
        }
    }
}

impl Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    ConfigNotFound,
    Store(String),
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::ConfigNotFound => write!(
                f,
                "No database configuration found. Please connect to a database first."
            ),
            ResolutionError::Store(msg) => {
                write!(f, "Error loading database configuration: {}", msg)
            }
        }
    }
}

impl Error for ResolutionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    Validation(ValidationError),
    Resolution(ResolutionError),
    Backend(BackendError),
    /// The action is not available from the current step.
    InvalidTransition { step: Step, action: &'static str },
    /// The session moved on while the operation was in flight; its result was dropped.
    Stale,
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Validation(e) => write!(f, "{}", e),
            WorkflowError::Resolution(e) => write!(f, "{}", e),
            WorkflowError::Backend(e) => write!(f, "{}", e),
            WorkflowError::InvalidTransition { step, action } => {
                write!(f, "Cannot {} while at step '{}'", action, step)
            }
            WorkflowError::Stale => write!(f, "The session changed before the operation finished"),
        }
    }
}

impl Error for WorkflowError {}

impl From<ValidationError> for WorkflowError {
    fn from(err: ValidationError) -> Self {
        WorkflowError::Validation(err)
    }
}

impl From<ResolutionError> for WorkflowError {
    fn from(err: ResolutionError) -> Self {
        WorkflowError::Resolution(err)
    }
}

impl From<BackendError> for WorkflowError {
    fn from(err: BackendError) -> Self {
        WorkflowError::Backend(err)
    }
}
