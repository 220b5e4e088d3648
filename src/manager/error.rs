use thiserror::Error;

use crate::backend::{BackendAction, BackendError};
use crate::storage::StoreError;

/// Every failure the calendar manager reports.
#[derive(Debug, Error)]
pub enum BusinessError {
    #[error("Invalid calendar: {0}")]
    Validation(String),
    #[error("Backend '{0}' is not enabled")]
    BackendDisabled(String),
    #[error("Backend '{backend}' cannot {action}")]
    ActionNotImplemented {
        backend: String,
        action: BackendAction,
    },
    #[error("Calendar not found: {0}")]
    NotFound(String),
    #[error("Calendar already exists: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("{0} is not supported yet")]
    NotSupported(String),
    #[error("{message}")]
    Backend {
        message: String,
        #[source]
        source: BackendError,
    },
    #[error("Store failure: {0}")]
    Store(#[source] StoreError),
}

impl BusinessError {
    /// HTTP-style status for the controller layer, when one applies.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BusinessError::Validation(_)
            | BusinessError::BackendDisabled(_)
            | BusinessError::ActionNotImplemented { .. } => Some(400),
            BusinessError::NotFound(_) => Some(404),
            BusinessError::Conflict(_) => Some(409),
            BusinessError::Internal(_) | BusinessError::Store(_) => Some(500),
            BusinessError::NotSupported(_) => None,
            BusinessError::Backend { source, .. } => match source {
                BackendError::NotFound(_) => Some(404),
                _ => Some(500),
            },
        }
    }
}

impl From<StoreError> for BusinessError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => BusinessError::NotFound(what),
            StoreError::MultipleFound(what) => {
                BusinessError::Internal(format!("more than one calendar matches {}", what))
            }
            other => BusinessError::Store(other),
        }
    }
}

pub type BusinessResult<T> = Result<T, BusinessError>;
