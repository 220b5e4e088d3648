use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendAction, BackendApi, BackendError};
use crate::calendar::Calendar;

/// Backend that keeps calendar collections on a remote HTTP/JSON service.
pub struct RemoteBackend {
    base_url: String,
    token: Option<String>,
    read_only: bool,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCollection<'a> {
    uri: Option<&'a str>,
    display_name: Option<&'a str>,
    color: Option<&'a str>,
    timezone: Option<&'a str>,
    components: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct CreatedCollection {
    uri: Option<String>,
}

impl RemoteBackend {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            read_only: false,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn collections_url(&self, user_id: &str) -> String {
        format!(
            "{}/users/{}/calendars",
            self.base_url,
            urlencoding::encode(user_id)
        )
    }

    fn collection_url(&self, user_id: &str, private_uri: &str) -> String {
        format!(
            "{}/{}",
            self.collections_url(user_id),
            urlencoding::encode(private_uri)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn ensure_implemented(&self, action: BackendAction) -> Result<(), BackendError> {
        if self.implements(action) {
            Ok(())
        } else {
            Err(BackendError::NotImplemented(action))
        }
    }

    fn to_collection(calendar: &Calendar) -> RemoteCollection<'_> {
        RemoteCollection {
            uri: calendar.private_uri.as_deref(),
            display_name: calendar.display_name.as_deref(),
            color: calendar.color.as_deref(),
            timezone: calendar.timezone.as_deref(),
            components: calendar.components.map(|c| c.bits()),
        }
    }

    async fn check_status(response: Response, target: &str) -> Result<Response, BackendError> {
        let status = response.status();
        tracing::info!("Remote backend response status for {}: {}", target, status);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::error!("Authentication failed for {}", target);
                Err(BackendError::AuthenticationFailed)
            }
            StatusCode::NOT_FOUND => Err(BackendError::NotFound(target.to_string())),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(BackendError::CacheOutdated(target.to_string()))
            }
            s if !s.is_success() => {
                let body = response.text().await?;
                tracing::error!("Remote request for {} failed. Status: {}, Body: {}", target, s, body);
                Err(BackendError::RequestError(format!("Status {}: {}", s, body)))
            }
            _ => Ok(response),
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, BackendError> {
    value
        .as_deref()
        .ok_or_else(|| BackendError::RequestError(format!("calendar has no {}", field)))
}

#[async_trait]
impl BackendApi for RemoteBackend {
    fn implements(&self, _action: BackendAction) -> bool {
        !self.read_only
    }

    async fn create_calendar(&self, calendar: &Calendar) -> Result<Calendar, BackendError> {
        self.ensure_implemented(BackendAction::CreateCalendar)?;
        let user_id = required(&calendar.user_id, "user id")?;
        let url = self.collections_url(user_id);
        let body = Self::to_collection(calendar);

        tracing::debug!("POST {} with payload: {:?}", url, body);

        let response = self.authorize(self.client.post(&url)).json(&body).send().await?;
        let response = Self::check_status(response, &url).await?;

        // 201/204 without a body keeps the private uri that was sent.
        let body = response.text().await?;
        let created = if body.trim().is_empty() {
            CreatedCollection { uri: None }
        } else {
            serde_json::from_str::<CreatedCollection>(&body).map_err(|e| {
                BackendError::RequestError(format!("Unexpected create response from {}: {}", url, e))
            })?
        };

        let mut calendar = calendar.clone();
        if let Some(uri) = created.uri {
            tracing::info!("Remote backend assigned private uri {}", uri);
            calendar.private_uri = Some(uri);
        }
        Ok(calendar)
    }

    async fn update_calendar(&self, calendar: &Calendar) -> Result<Calendar, BackendError> {
        self.ensure_implemented(BackendAction::UpdateCalendar)?;
        let user_id = required(&calendar.user_id, "user id")?;
        let private_uri = required(&calendar.private_uri, "private uri")?;
        let url = self.collection_url(user_id, private_uri);
        let body = Self::to_collection(calendar);

        tracing::debug!("PUT {} with payload: {:?}", url, body);

        let response = self.authorize(self.client.put(&url)).json(&body).send().await?;
        Self::check_status(response, &url).await?;

        Ok(calendar.clone())
    }

    async fn delete_calendar(&self, private_uri: &str, user_id: &str) -> Result<(), BackendError> {
        self.ensure_implemented(BackendAction::DeleteCalendar)?;
        let url = self.collection_url(user_id, private_uri);

        tracing::debug!("DELETE {}", url);

        let response = self.authorize(self.client.delete(&url)).send().await?;
        Self::check_status(response, &url).await?;

        Ok(())
    }
}
