//! Typed error contract for registration, tracking and reset.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_model::ObjectError;

const ERROR_CONFIGURATION: &str = "FE-TRACK-0001";
const ERROR_INVALID_OPERATION: &str = "FE-TRACK-0002";
const ERROR_OBJECT_MODEL: &str = "FE-TRACK-0003";

pub type TrackingResult<T> = Result<T, TrackingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    InvalidOperation,
    ObjectModel,
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingError {
    #[error("configuration error for `{type_name}`: {detail}")]
    Configuration { type_name: String, detail: String },
    #[error("invalid operation: {detail}")]
    InvalidOperation { detail: String },
    #[error("object model error: {0}")]
    Object(#[from] ObjectError),
    /// An operation failed and undoing its partial effects failed as well.
    #[error("{error} (rollback incomplete: {})", .rollback.join("; "))]
    RollbackIncomplete {
        error: Box<TrackingError>,
        rollback: Vec<String>,
    },
}

impl TrackingError {
    pub fn configuration(type_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Configuration {
            type_name: type_name.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_operation(detail: impl Into<String>) -> Self {
        Self::InvalidOperation {
            detail: detail.into(),
        }
    }

    /// Attach rollback failures to `error`; unchanged when there are none.
    pub fn with_rollback_failures(error: TrackingError, rollback: Vec<String>) -> Self {
        if rollback.is_empty() {
            error
        } else {
            Self::RollbackIncomplete {
                error: Box::new(error),
                rollback,
            }
        }
    }

    /// The error that started the failed operation.
    pub fn root_cause(&self) -> &TrackingError {
        match self {
            Self::RollbackIncomplete { error, .. } => error.root_cause(),
            other => other,
        }
    }

    pub fn stable_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => ERROR_CONFIGURATION,
            Self::InvalidOperation { .. } => ERROR_INVALID_OPERATION,
            Self::Object(_) => ERROR_OBJECT_MODEL,
            Self::RollbackIncomplete { error, .. } => error.stable_code(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::InvalidOperation { .. } => ErrorCategory::InvalidOperation,
            Self::Object(_) => ErrorCategory::ObjectModel,
            Self::RollbackIncomplete { error, .. } => error.category(),
        }
    }
}
