pub mod local;
pub mod registry;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

use crate::calendar::Calendar;

pub use local::LocalBackend;
pub use registry::{Backend, BackendRegistry};
pub use remote::RemoteBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Calendar not found: {0}")]
    NotFound(String),
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Cached calendar is outdated: {0}")]
    CacheOutdated(String),
    #[error("Backend does not implement {0}")]
    NotImplemented(BackendAction),
}

/// Mutating operations a backend may or may not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendAction {
    CreateCalendar,
    UpdateCalendar,
    DeleteCalendar,
}

impl std::fmt::Display for BackendAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendAction::CreateCalendar => "create calendar",
            BackendAction::UpdateCalendar => "update calendar",
            BackendAction::DeleteCalendar => "delete calendar",
        };
        f.write_str(name)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    fn implements(&self, action: BackendAction) -> bool;

    /// Creates the calendar on the backend. The returned record may carry a
    /// rewritten `private_uri`.
    async fn create_calendar(&self, calendar: &Calendar) -> Result<Calendar, BackendError>;

    async fn update_calendar(&self, calendar: &Calendar) -> Result<Calendar, BackendError>;

    async fn delete_calendar(&self, private_uri: &str, user_id: &str) -> Result<(), BackendError>;
}
