use async_trait::async_trait;

use crate::backend::{BackendAction, BackendApi, BackendError};
use crate::calendar::Calendar;

/// Backend whose data lives in the same database as the calendar records.
/// There is nothing to provision, so every operation succeeds as is.
#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BackendApi for LocalBackend {
    fn implements(&self, _action: BackendAction) -> bool {
        true
    }

    async fn create_calendar(&self, calendar: &Calendar) -> Result<Calendar, BackendError> {
        tracing::debug!("Local backend created {:?}", calendar.private_uri);
        Ok(calendar.clone())
    }

    async fn update_calendar(&self, calendar: &Calendar) -> Result<Calendar, BackendError> {
        tracing::debug!("Local backend updated {:?}", calendar.private_uri);
        Ok(calendar.clone())
    }

    async fn delete_calendar(&self, private_uri: &str, user_id: &str) -> Result<(), BackendError> {
        tracing::debug!("Local backend deleted {} of {}", private_uri, user_id);
        Ok(())
    }
}
