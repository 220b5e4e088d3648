use chrono::Utc;
use tracing::Span;

use crate::backend::{Backend, BackendAction, BackendError, BackendRegistry};
use crate::calendar::{Calendar, Components, Cruds};
use crate::manager::error::{BusinessError, BusinessResult};
use crate::manager::uri::{is_valid_color, is_valid_uri, slugify, suggest_uri};
use crate::storage::CalendarStore;

/// Business layer validating, creating, updating and deleting calendars on
/// behalf of the configured backends.
pub struct CalendarManager<S: CalendarStore> {
    store: S,
    backends: BackendRegistry,
    span: Span,
}

fn required<'a, T>(value: &'a Option<T>, field: &str) -> BusinessResult<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| BusinessError::Validation(format!("{} is not set", field)))
}

impl<S: CalendarStore> CalendarManager<S> {
    pub fn new(store: S, backends: BackendRegistry) -> Self {
        Self {
            store,
            backends,
            span: tracing::info_span!("calendar_manager"),
        }
    }

    /// Logs of this manager are recorded under `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    // QUERIES:

    pub fn find_all(
        &self,
        user_id: &str,
        limit: Option<u32>,
        offset: Option<u32>,
        active_backends_only: bool,
    ) -> BusinessResult<Vec<Calendar>> {
        let calendars = self.store.find_all(user_id, limit, offset)?;
        if !active_backends_only {
            return Ok(calendars);
        }

        let enabled = self.backends.enabled();
        Ok(calendars
            .into_iter()
            .filter(|c| c.backend.as_ref().is_some_and(|b| enabled.contains(b)))
            .collect())
    }

    pub fn count(&self, user_id: &str, active_backends_only: bool) -> BusinessResult<u64> {
        if active_backends_only {
            let calendars = self.find_all(user_id, None, None, true)?;
            return Ok(calendars.len() as u64);
        }
        Ok(self.store.count(user_id)?)
    }

    pub fn count_on_backend(&self, backend: &str, user_id: &str) -> BusinessResult<u64> {
        Ok(self.store.count_on_backend(backend, user_id)?)
    }

    pub fn find(&self, public_uri: &str, user_id: &str) -> BusinessResult<Calendar> {
        let calendar = self.store.find(public_uri, user_id)?;
        self.check_backend_enabled(required(&calendar.backend, "backend")?)?;
        Ok(calendar)
    }

    pub fn find_by_id(&self, id: i64, user_id: &str) -> BusinessResult<Calendar> {
        let calendar = self.store.find_by_id(id, user_id)?;
        self.check_backend_enabled(required(&calendar.backend, "backend")?)?;
        Ok(calendar)
    }

    pub fn exists(&self, public_uri: &str, user_id: &str) -> BusinessResult<bool> {
        Ok(self.store.does_exist(public_uri, user_id)?)
    }

    pub fn allows(&self, cruds: Cruds, public_uri: &str, user_id: &str) -> BusinessResult<bool> {
        Ok(self.store.does_allow(cruds, public_uri, user_id)?)
    }

    pub fn supports(
        &self,
        components: Components,
        public_uri: &str,
        user_id: &str,
    ) -> BusinessResult<bool> {
        Ok(self.store.does_support(components, public_uri, user_id)?)
    }

    // CREATE:

    /// Creates the calendar on its backend, then records it.
    ///
    /// A backend failure leaves no row behind. A store failure after the
    /// backend succeeded is reported but the backend calendar is not rolled back.
    pub async fn create(&self, mut calendar: Calendar) -> BusinessResult<Calendar> {
        self.check_is_valid(&calendar)?;
        let backend = self.check_backend_enabled(required(&calendar.backend, "backend")?)?;
        self.check_backend_supports(backend, BackendAction::CreateCalendar)?;

        let public_uri = required(&calendar.public_uri, "public uri")?;
        let user_id = required(&calendar.user_id, "user id")?;
        if self.store.does_exist(public_uri, user_id)? {
            return Err(BusinessError::Conflict(format!(
                "{} of user {}",
                public_uri, user_id
            )));
        }

        let created = backend
            .api()
            .create_calendar(&calendar)
            .await
            .map_err(|e| self.backend_failure(backend, BackendAction::CreateCalendar, e))?;
        if created.private_uri.is_some() {
            calendar.private_uri = created.private_uri;
        }

        let inserted = self.store.insert(&calendar)?;
        tracing::info!(
            parent: &self.span,
            "Created calendar {:?} of {:?} on backend '{}'",
            inserted.public_uri,
            inserted.user_id,
            backend.id
        );
        Ok(inserted)
    }

    /// Fills in the defaults of a partially specified calendar for `user_id`
    /// and creates it.
    pub async fn create_from_request(
        &self,
        mut calendar: Calendar,
        user_id: &str,
    ) -> BusinessResult<Calendar> {
        calendar.user_id.get_or_insert_with(|| user_id.to_string());
        calendar.owner_id.get_or_insert_with(|| user_id.to_string());
        calendar
            .backend
            .get_or_insert_with(|| self.backends.reset().id.clone());

        if calendar.public_uri.is_none()
            && let Some(name) = calendar.display_name.as_deref()
            && !name.trim().is_empty()
        {
            let owner = calendar.user_id.as_deref().unwrap_or(user_id);
            calendar.public_uri = Some(self.free_uri(slugify(name), owner)?);
        }

        if calendar.private_uri.is_none() {
            calendar.private_uri = calendar.public_uri.clone();
        }
        calendar.cruds.get_or_insert(Cruds::ALL);
        calendar.components.get_or_insert(Components::ALL);
        calendar.ctag.get_or_insert(0);
        calendar.enabled.get_or_insert(true);
        calendar.order.get_or_insert(0);

        self.create(calendar).await
    }

    /// Creates every calendar it can; failures are logged and skipped.
    pub async fn create_collection<C>(&self, calendars: impl IntoIterator<Item = Calendar>) -> C
    where
        C: Default + Extend<Calendar>,
    {
        let mut created = C::default();
        for calendar in calendars {
            let uri = calendar.public_uri.clone();
            match self.create(calendar).await {
                Ok(calendar) => created.extend(Some(calendar)),
                Err(e) => {
                    tracing::warn!(parent: &self.span, "Skipping calendar {:?}: {}", uri, e)
                }
            }
        }
        created
    }

    pub async fn create_collection_from_request<C>(
        &self,
        calendars: impl IntoIterator<Item = Calendar>,
        user_id: &str,
    ) -> C
    where
        C: Default + Extend<Calendar>,
    {
        let mut created = C::default();
        for calendar in calendars {
            let name = calendar.display_name.clone();
            match self.create_from_request(calendar, user_id).await {
                Ok(calendar) => created.extend(Some(calendar)),
                Err(e) => {
                    tracing::warn!(parent: &self.span, "Skipping calendar {:?}: {}", name, e)
                }
            }
        }
        created
    }

    fn free_uri(&self, mut uri: String, user_id: &str) -> BusinessResult<String> {
        while self.store.does_exist(&uri, user_id)? {
            let suggestion = suggest_uri(&uri);
            if suggestion == uri {
                break;
            }
            uri = suggestion;
        }
        Ok(uri)
    }

    // UPDATE:

    /// Replaces the calendar found at `old_public_uri` of `old_user_id`.
    ///
    /// Changing the user is a transfer, changing the backend a move (or a
    /// merge when the target uri is taken). None of these are implemented.
    pub async fn update(
        &self,
        calendar: Calendar,
        old_public_uri: &str,
        old_user_id: &str,
    ) -> BusinessResult<Calendar> {
        let old = self.find(old_public_uri, old_user_id)?;
        self.check_is_valid(&calendar)?;
        let backend = self.check_backend_enabled(required(&calendar.backend, "backend")?)?;

        if calendar.user_id != old.user_id {
            return self.transfer(&calendar, &old);
        }

        if calendar.backend != old.backend {
            let public_uri = required(&calendar.public_uri, "public uri")?;
            let user_id = required(&calendar.user_id, "user id")?;
            return if self.store.does_exist(public_uri, user_id)? {
                self.merge(&calendar, &old)
            } else {
                self.move_to_backend(&calendar, &old)
            };
        }

        self.update_properties(calendar, &old, backend).await
    }

    pub async fn update_from_request(
        &self,
        calendar: Calendar,
        public_uri: &str,
        user_id: &str,
    ) -> BusinessResult<Calendar> {
        let old = self.find(public_uri, user_id)?;
        let calendar = Self::carry_over(calendar, &old);
        self.update(calendar, public_uri, user_id).await
    }

    pub async fn update_from_request_by_id(
        &self,
        calendar: Calendar,
        id: i64,
        user_id: &str,
    ) -> BusinessResult<Calendar> {
        let old = self.find_by_id(id, user_id)?;
        let public_uri = required(&old.public_uri, "public uri")?.clone();
        let calendar = Self::carry_over(calendar, &old);
        self.update(calendar, &public_uri, user_id).await
    }

    pub async fn patch_from_request(
        &self,
        calendar: Calendar,
        public_uri: &str,
        user_id: &str,
    ) -> BusinessResult<Calendar> {
        let old = self.find(public_uri, user_id)?;
        let calendar = Self::carry_over(Self::overlay(calendar, &old), &old);
        self.update(calendar, public_uri, user_id).await
    }

    pub async fn patch_from_request_by_id(
        &self,
        calendar: Calendar,
        id: i64,
        user_id: &str,
    ) -> BusinessResult<Calendar> {
        let old = self.find_by_id(id, user_id)?;
        let public_uri = required(&old.public_uri, "public uri")?.clone();
        let calendar = Self::carry_over(Self::overlay(calendar, &old), &old);
        self.update(calendar, &public_uri, user_id).await
    }

    /// Marks the calendar as modified: bumps the sync tag and stamps the time.
    pub async fn touch(&self, public_uri: &str, user_id: &str) -> BusinessResult<Calendar> {
        let mut calendar = self.find(public_uri, user_id)?;
        calendar.touch(Utc::now());
        self.update(calendar, public_uri, user_id).await
    }

    /// Copies `user_id`, `owner_id`, `cruds` and `ctag` from `old` where
    /// `calendar` leaves them unset.
    pub fn reset_read_only_properties(calendar: &mut Calendar, old: &Calendar) {
        if calendar.user_id.is_none() {
            calendar.user_id = old.user_id.clone();
        }
        if calendar.owner_id.is_none() {
            calendar.owner_id = old.owner_id.clone();
        }
        if calendar.cruds.is_none() {
            calendar.cruds = old.cruds;
        }
        // Takes the old permission bits, not the old ctag. Kept until the
        // intended value is confirmed; see DESIGN.md.
        if calendar.ctag.is_none() {
            calendar.ctag = old.cruds.map(|c| u64::from(c.bits()));
        }
    }

    fn overlay(calendar: Calendar, old: &Calendar) -> Calendar {
        if calendar.has_unset_fields() {
            calendar.overlay(old)
        } else {
            calendar
        }
    }

    fn carry_over(mut calendar: Calendar, old: &Calendar) -> Calendar {
        calendar.id = old.id;
        calendar.private_uri = old.private_uri.clone();
        Self::reset_read_only_properties(&mut calendar, old);
        calendar
    }

    async fn update_properties(
        &self,
        mut calendar: Calendar,
        old: &Calendar,
        backend: &Backend,
    ) -> BusinessResult<Calendar> {
        self.check_users_equal(&calendar, old)?;
        calendar.id = old.id;

        let public_uri = required(&calendar.public_uri, "public uri")?;
        let user_id = required(&calendar.user_id, "user id")?;
        if calendar.public_uri != old.public_uri && self.store.does_exist(public_uri, user_id)? {
            return Err(BusinessError::Conflict(format!(
                "{} of user {}",
                public_uri, user_id
            )));
        }

        if backend.api().implements(BackendAction::UpdateCalendar) {
            let updated = backend
                .api()
                .update_calendar(&calendar)
                .await
                .map_err(|e| self.backend_failure(backend, BackendAction::UpdateCalendar, e))?;
            if updated.private_uri.is_some() {
                calendar.private_uri = updated.private_uri;
            }
        }

        self.store.update(&calendar)?;
        tracing::info!(
            parent: &self.span,
            "Updated calendar {:?} of {:?}",
            calendar.public_uri,
            calendar.user_id
        );
        Ok(calendar)
    }

    fn transfer(&self, calendar: &Calendar, old: &Calendar) -> BusinessResult<Calendar> {
        tracing::info!(
            parent: &self.span,
            "Refusing to transfer {:?} from {:?} to {:?}",
            old.public_uri,
            old.user_id,
            calendar.user_id
        );
        Err(BusinessError::NotSupported(
            "Transferring calendars between users".to_string(),
        ))
    }

    fn move_to_backend(&self, calendar: &Calendar, old: &Calendar) -> BusinessResult<Calendar> {
        tracing::info!(
            parent: &self.span,
            "Refusing to move {:?} from backend {:?} to {:?}",
            old.public_uri,
            old.backend,
            calendar.backend
        );
        Err(BusinessError::NotSupported(
            "Moving calendars between backends".to_string(),
        ))
    }

    fn merge(&self, calendar: &Calendar, old: &Calendar) -> BusinessResult<Calendar> {
        tracing::info!(
            parent: &self.span,
            "Refusing to merge {:?} into {:?} on backend {:?}",
            old.public_uri,
            calendar.public_uri,
            calendar.backend
        );
        Err(BusinessError::NotSupported("Merging calendars".to_string()))
    }

    // DELETE:

    /// Deletes the calendar on its backend, then removes the record.
    /// A store failure after the backend delete is not rolled back.
    pub async fn delete(&self, calendar: &Calendar) -> BusinessResult<()> {
        let backend = self.check_backend_enabled(required(&calendar.backend, "backend")?)?;
        self.check_backend_supports(backend, BackendAction::DeleteCalendar)?;

        let private_uri = required(&calendar.private_uri, "private uri")?;
        let user_id = required(&calendar.user_id, "user id")?;
        backend
            .api()
            .delete_calendar(private_uri, user_id)
            .await
            .map_err(|e| self.backend_failure(backend, BackendAction::DeleteCalendar, e))?;

        self.store.delete(calendar)?;
        tracing::info!(
            parent: &self.span,
            "Deleted calendar {:?} of {}",
            calendar.public_uri,
            user_id
        );
        Ok(())
    }

    // CHECKS:

    pub fn check_is_valid(&self, calendar: &Calendar) -> BusinessResult<()> {
        let mut missing = Vec::new();
        let fields = [
            ("user id", calendar.user_id.is_none()),
            ("owner id", calendar.owner_id.is_none()),
            ("backend", calendar.backend.is_none()),
            ("public uri", calendar.public_uri.is_none()),
            ("private uri", calendar.private_uri.is_none()),
            ("display name", calendar.display_name.is_none()),
            ("cruds", calendar.cruds.is_none()),
            ("ctag", calendar.ctag.is_none()),
            ("enabled", calendar.enabled.is_none()),
            ("order", calendar.order.is_none()),
        ];
        for (field, unset) in fields {
            if unset {
                missing.push(field);
            }
        }
        if !missing.is_empty() {
            return Err(BusinessError::Validation(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        let public_uri = required(&calendar.public_uri, "public uri")?;
        if !is_valid_uri(public_uri) {
            return Err(BusinessError::Validation(format!(
                "malformed public uri '{}'",
                public_uri
            )));
        }

        if required(&calendar.display_name, "display name")?.trim().is_empty() {
            return Err(BusinessError::Validation("display name is blank".to_string()));
        }

        if let Some(color) = calendar.color.as_deref()
            && !is_valid_color(color)
        {
            return Err(BusinessError::Validation(format!("malformed color '{}'", color)));
        }

        Ok(())
    }

    pub fn check_backend_enabled(&self, backend: &str) -> BusinessResult<&Backend> {
        match self.backends.find(backend) {
            Some(found) if found.enabled => Ok(found),
            _ => Err(BusinessError::BackendDisabled(backend.to_string())),
        }
    }

    pub fn check_backend_supports(
        &self,
        backend: &Backend,
        action: BackendAction,
    ) -> BusinessResult<()> {
        if backend.api().implements(action) {
            Ok(())
        } else {
            Err(BusinessError::ActionNotImplemented {
                backend: backend.id.clone(),
                action,
            })
        }
    }

    pub fn check_users_equal(&self, calendar: &Calendar, old: &Calendar) -> BusinessResult<()> {
        if calendar.user_id == old.user_id {
            Ok(())
        } else {
            Err(BusinessError::Validation(
                "calendar belongs to another user".to_string(),
            ))
        }
    }

    fn backend_failure(
        &self,
        backend: &Backend,
        action: BackendAction,
        error: BackendError,
    ) -> BusinessError {
        tracing::debug!(
            parent: &self.span,
            "Backend '{}' failed to {}: {}",
            backend.id,
            action,
            error
        );
        BusinessError::Backend {
            message: format!("backend '{}' failed to {}", backend.id, action),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, MockBackendApi};
    use crate::storage::SqliteCalendarStore;
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;
    use std::sync::Arc;

    fn create_test_store() -> SqliteCalendarStore {
        let store = SqliteCalendarStore::new(Connection::open_in_memory().unwrap());
        store.initialize().unwrap();
        store
    }

    fn local(id: &str, enabled: bool) -> Backend {
        Backend::new(id, enabled, Arc::new(LocalBackend::new()))
    }

    fn mocked(id: &str, enabled: bool, api: MockBackendApi) -> Backend {
        Backend::new(id, enabled, Arc::new(api))
    }

    fn create_manager_with(extra: Vec<Backend>) -> CalendarManager<SqliteCalendarStore> {
        let mut backends = vec![local("local", true), local("other", true), local("archive", false)];
        backends.extend(extra);
        let registry = BackendRegistry::new(backends, "local").unwrap();
        CalendarManager::new(create_test_store(), registry)
    }

    fn create_test_manager() -> CalendarManager<SqliteCalendarStore> {
        create_manager_with(Vec::new())
    }

    fn test_calendar(public_uri: &str, user_id: &str, backend: &str) -> Calendar {
        Calendar {
            id: None,
            user_id: Some(user_id.to_string()),
            owner_id: Some(user_id.to_string()),
            backend: Some(backend.to_string()),
            public_uri: Some(public_uri.to_string()),
            private_uri: Some(public_uri.to_string()),
            display_name: Some(format!("Calendar {}", public_uri)),
            components: Some(Components::EVENT),
            color: Some("#1a73e8".to_string()),
            timezone: None,
            cruds: Some(Cruds::READ | Cruds::UPDATE | Cruds::DELETE),
            ctag: Some(4),
            enabled: Some(true),
            order: Some(0),
            last_properties_update: None,
        }
    }

    fn stored(manager: &CalendarManager<SqliteCalendarStore>, calendar: Calendar) -> Calendar {
        manager.store().insert(&calendar).unwrap()
    }

    // create

    #[tokio::test]
    async fn created_calendar_can_be_found_with_backend_private_uri() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_create_calendar().times(1).returning(|calendar| {
            let mut created = calendar.clone();
            created.private_uri = Some("remote-work".to_string());
            Ok(created)
        });
        let manager = create_manager_with(vec![mocked("dav", true, api)]);
        let calendar = test_calendar("work", "alice", "dav");

        let created = manager.create(calendar.clone()).await.unwrap();
        let found = manager.find("work", "alice").unwrap();

        assert_eq!(found, created);
        assert_eq!(
            found,
            Calendar {
                id: created.id,
                private_uri: Some("remote-work".to_string()),
                ..calendar
            }
        );
    }

    #[tokio::test]
    async fn create_conflicts_with_existing_uri() {
        let manager = create_test_manager();
        manager.create(test_calendar("work", "alice", "local")).await.unwrap();

        let result = manager.create(test_calendar("work", "alice", "other")).await;

        assert!(matches!(result, Err(BusinessError::Conflict(_))));
        assert_eq!(manager.count("alice", false).unwrap(), 1);
    }

    #[tokio::test]
    async fn same_uri_for_another_user_is_no_conflict() {
        let manager = create_test_manager();
        manager.create(test_calendar("work", "alice", "local")).await.unwrap();

        let result = manager.create(test_calendar("work", "bob", "local")).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn create_on_disabled_backend_never_reaches_backend() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_create_calendar().never();
        let manager = create_manager_with(vec![mocked("dav", false, api)]);

        let result = manager.create(test_calendar("work", "alice", "dav")).await;

        assert!(matches!(result, Err(BusinessError::BackendDisabled(_))));
        assert!(!manager.exists("work", "alice").unwrap());
    }

    #[tokio::test]
    async fn create_on_unknown_backend_is_rejected() {
        let manager = create_test_manager();

        let result = manager.create(test_calendar("work", "alice", "ftp")).await;

        assert!(matches!(result, Err(BusinessError::BackendDisabled(_))));
    }

    #[tokio::test]
    async fn create_requires_backend_create_support() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(false);
        api.expect_create_calendar().never();
        let manager = create_manager_with(vec![mocked("readonly", true, api)]);

        let result = manager.create(test_calendar("work", "alice", "readonly")).await;

        assert!(matches!(
            result,
            Err(BusinessError::ActionNotImplemented {
                action: BackendAction::CreateCalendar,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn failing_backend_create_leaves_no_row() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_create_calendar()
            .returning(|_| Err(BackendError::AuthenticationFailed));
        let manager = create_manager_with(vec![mocked("dav", true, api)]);

        let result = manager.create(test_calendar("work", "alice", "dav")).await;

        assert!(matches!(result, Err(BusinessError::Backend { .. })));
        assert!(!manager.exists("work", "alice").unwrap());
    }

    #[tokio::test]
    async fn create_rejects_malformed_candidates() {
        let manager = create_test_manager();

        let mut bad_uri = test_calendar("work", "alice", "local");
        bad_uri.public_uri = Some("no spaces allowed".to_string());
        let mut bad_color = test_calendar("work", "alice", "local");
        bad_color.color = Some("blue".to_string());
        let mut incomplete = test_calendar("work", "alice", "local");
        incomplete.cruds = None;

        for candidate in [bad_uri, bad_color, incomplete] {
            let result = manager.create(candidate).await;
            assert!(matches!(result, Err(BusinessError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn create_from_request_fills_in_defaults() {
        let manager = create_test_manager();

        let created = manager
            .create_from_request(Calendar::named("My Calendar"), "alice")
            .await
            .unwrap();

        assert_eq!(created.public_uri.as_deref(), Some("my-calendar"));
        assert_eq!(created.private_uri.as_deref(), Some("my-calendar"));
        assert_eq!(created.user_id.as_deref(), Some("alice"));
        assert_eq!(created.owner_id.as_deref(), Some("alice"));
        assert_eq!(created.backend.as_deref(), Some("local"));
        assert_eq!(created.cruds, Some(Cruds::ALL));
        assert_eq!(created.components, Some(Components::ALL));
        assert_eq!(created.ctag, Some(0));
        assert_eq!(created.enabled, Some(true));
        assert_eq!(created.order, Some(0));
    }

    #[tokio::test]
    async fn create_from_request_picks_free_uri() {
        let manager = create_test_manager();

        let mut uris = Vec::new();
        for _ in 0..3 {
            let created = manager
                .create_from_request(Calendar::named("My Calendar"), "alice")
                .await
                .unwrap();
            uris.push(created.public_uri.unwrap());
        }

        assert_eq!(uris, vec!["my-calendar", "my-calendar-1", "my-calendar-2"]);
    }

    #[tokio::test]
    async fn create_from_request_keeps_explicit_values() {
        let manager = create_test_manager();
        let candidate = Calendar {
            public_uri: Some("team".to_string()),
            backend: Some("other".to_string()),
            cruds: Some(Cruds::READ),
            order: Some(3),
            ..Calendar::named("Team")
        };

        let created = manager.create_from_request(candidate, "alice").await.unwrap();

        assert_eq!(created.public_uri.as_deref(), Some("team"));
        assert_eq!(created.backend.as_deref(), Some("other"));
        assert_eq!(created.cruds, Some(Cruds::READ));
        assert_eq!(created.order, Some(3));
    }

    #[tokio::test]
    async fn create_from_request_without_name_or_uri_is_invalid() {
        let manager = create_test_manager();

        let result = manager.create_from_request(Calendar::default(), "alice").await;

        assert!(matches!(result, Err(BusinessError::Validation(_))));
    }

    #[tokio::test]
    async fn request_with_unknown_bits_never_reaches_the_store() {
        let manager = create_test_manager();
        manager
            .create_from_request(Calendar::named("Good"), "alice")
            .await
            .unwrap();

        for body in [
            r#"{"displayName":"Bad","cruds":255}"#,
            r#"{"displayName":"Bad","components":8}"#,
        ] {
            assert!(serde_json::from_str::<Calendar>(body).is_err());
        }

        let listed = manager.find_all("alice", None, None, true).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].public_uri.as_deref(), Some("good"));
        assert!(!manager.exists("bad", "alice").unwrap());
    }

    #[tokio::test]
    async fn create_collection_skips_failures() {
        let manager = create_test_manager();
        let candidates = vec![
            test_calendar("work", "alice", "local"),
            test_calendar("old", "alice", "archive"),
            test_calendar("work", "alice", "other"),
            test_calendar("home", "alice", "local"),
        ];

        let created: Vec<Calendar> = manager.create_collection(candidates).await;

        let uris: Vec<_> = created.iter().filter_map(|c| c.public_uri.as_deref()).collect();
        assert_eq!(uris, vec!["work", "home"]);
    }

    #[tokio::test]
    async fn create_collection_from_request_applies_defaults() {
        let manager = create_test_manager();
        let candidates = vec![Calendar::named("Work"), Calendar::default(), Calendar::named("Work")];

        let created: Vec<Calendar> = manager
            .create_collection_from_request(candidates, "alice")
            .await;

        let uris: Vec<_> = created.iter().filter_map(|c| c.public_uri.as_deref()).collect();
        assert_eq!(uris, vec!["work", "work-1"]);
    }

    // queries

    #[tokio::test]
    async fn find_is_scoped_to_user() {
        let manager = create_test_manager();
        let created = manager.create(test_calendar("work", "alice", "local")).await.unwrap();

        assert_eq!(manager.find("work", "alice").unwrap(), created);
        assert!(matches!(manager.find("work", "bob"), Err(BusinessError::NotFound(_))));
    }

    #[test]
    fn find_by_id_returns_stored_calendar() {
        let manager = create_test_manager();
        let calendar = stored(&manager, test_calendar("work", "alice", "local"));

        let found = manager.find_by_id(calendar.id.unwrap(), "alice").unwrap();

        assert_eq!(found, calendar);
    }

    #[test]
    fn find_on_disabled_backend_fails() {
        let manager = create_test_manager();
        let calendar = stored(&manager, test_calendar("old", "alice", "archive"));

        assert!(matches!(
            manager.find("old", "alice"),
            Err(BusinessError::BackendDisabled(_))
        ));
        assert!(matches!(
            manager.find_by_id(calendar.id.unwrap(), "alice"),
            Err(BusinessError::BackendDisabled(_))
        ));
    }

    #[test]
    fn duplicate_rows_are_an_internal_error() {
        let manager = create_test_manager();
        stored(&manager, test_calendar("work", "alice", "local"));
        stored(&manager, test_calendar("work", "alice", "local"));

        let result = manager.find("work", "alice");

        assert!(matches!(result, Err(BusinessError::Internal(_))));
        assert_eq!(result.unwrap_err().status_code(), Some(500));
    }

    #[test]
    fn find_all_hides_disabled_backends_by_default() {
        let manager = create_test_manager();
        stored(&manager, test_calendar("work", "alice", "local"));
        stored(&manager, test_calendar("old", "alice", "archive"));

        let active = manager.find_all("alice", None, None, true).unwrap();
        let all = manager.find_all("alice", None, None, false).unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].public_uri.as_deref(), Some("work"));
        assert_eq!(all.len(), 2);
        assert_eq!(manager.count("alice", true).unwrap(), 1);
        assert_eq!(manager.count("alice", false).unwrap(), 2);
        assert_eq!(manager.count_on_backend("archive", "alice").unwrap(), 1);
    }

    #[test]
    fn count_of_user_without_calendars_is_not_found() {
        let manager = create_test_manager();

        assert!(matches!(manager.count("alice", false), Err(BusinessError::NotFound(_))));
        assert_eq!(manager.count("alice", true).unwrap(), 0);
    }

    #[test]
    fn predicates_pass_through_to_store() {
        let manager = create_test_manager();
        stored(&manager, test_calendar("work", "alice", "local"));

        assert!(manager.exists("work", "alice").unwrap());
        assert!(!manager.exists("work", "bob").unwrap());
        assert!(manager.allows(Cruds::UPDATE, "work", "alice").unwrap());
        assert!(!manager.allows(Cruds::SHARE, "work", "alice").unwrap());
        assert!(manager.supports(Components::EVENT, "work", "alice").unwrap());
        assert!(!manager.supports(Components::TODO, "work", "alice").unwrap());
    }

    // update

    #[tokio::test]
    async fn update_with_changed_user_is_rejected_as_transfer() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        let candidate = Calendar {
            user_id: Some("bob".to_string()),
            display_name: Some("Renamed".to_string()),
            backend: Some("other".to_string()),
            ..old
        };

        let result = manager.update(candidate, "work", "alice").await;

        assert!(matches!(result, Err(BusinessError::NotSupported(_))));
        let unchanged = manager.find("work", "alice").unwrap();
        assert_eq!(unchanged.display_name.as_deref(), Some("Calendar work"));
    }

    #[tokio::test]
    async fn update_to_other_backend_with_free_uri_is_rejected_as_move() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        let candidate = Calendar {
            backend: Some("other".to_string()),
            public_uri: Some("moved".to_string()),
            ..old
        };

        let result = manager.update(candidate, "work", "alice").await;

        match result {
            Err(BusinessError::NotSupported(what)) => assert!(what.starts_with("Moving")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_to_other_backend_with_taken_uri_is_rejected_as_merge() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        stored(&manager, test_calendar("home", "alice", "other"));
        let candidate = Calendar {
            backend: Some("other".to_string()),
            public_uri: Some("home".to_string()),
            ..old
        };

        let result = manager.update(candidate, "work", "alice").await;

        match result {
            Err(BusinessError::NotSupported(what)) => assert!(what.starts_with("Merging")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_properties_calls_backend_then_persists() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_update_calendar()
            .times(1)
            .withf(|calendar| calendar.display_name.as_deref() == Some("Renamed"))
            .returning(|calendar| Ok(calendar.clone()));
        let manager = create_manager_with(vec![mocked("dav", true, api)]);
        let old = stored(&manager, test_calendar("work", "alice", "dav"));
        let candidate = Calendar {
            display_name: Some("Renamed".to_string()),
            ..old.clone()
        };

        let updated = manager.update(candidate, "work", "alice").await.unwrap();

        assert_eq!(updated.id, old.id);
        assert_eq!(
            manager.find("work", "alice").unwrap().display_name.as_deref(),
            Some("Renamed")
        );
    }

    #[tokio::test]
    async fn update_skips_backend_without_update_support() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(false);
        api.expect_update_calendar().never();
        let manager = create_manager_with(vec![mocked("readonly", true, api)]);
        let old = stored(&manager, test_calendar("work", "alice", "readonly"));
        let candidate = Calendar {
            order: Some(9),
            ..old
        };

        let updated = manager.update(candidate, "work", "alice").await.unwrap();

        assert_eq!(updated.order, Some(9));
        assert_eq!(manager.find("work", "alice").unwrap().order, Some(9));
    }

    #[tokio::test]
    async fn update_onto_taken_uri_conflicts() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        stored(&manager, test_calendar("home", "alice", "local"));
        let candidate = Calendar {
            public_uri: Some("home".to_string()),
            ..old
        };

        let result = manager.update(candidate, "work", "alice").await;

        assert!(matches!(result, Err(BusinessError::Conflict(_))));
    }

    #[tokio::test]
    async fn update_to_disabled_backend_never_reaches_backend() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_update_calendar().never();
        let manager = create_manager_with(vec![mocked("dav", true, api)]);
        let old = stored(&manager, test_calendar("work", "alice", "dav"));
        let candidate = Calendar {
            backend: Some("archive".to_string()),
            ..old
        };

        let result = manager.update(candidate, "work", "alice").await;

        assert!(matches!(result, Err(BusinessError::BackendDisabled(_))));
    }

    #[tokio::test]
    async fn update_of_missing_calendar_is_not_found() {
        let manager = create_test_manager();

        let result = manager
            .update(test_calendar("work", "alice", "local"), "work", "alice")
            .await;

        assert!(matches!(result, Err(BusinessError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_from_request_keeps_id_and_private_uri() {
        let manager = create_test_manager();
        let mut original = test_calendar("work", "alice", "local");
        original.private_uri = Some("backend-work".to_string());
        let old = stored(&manager, original);
        let candidate = Calendar {
            id: Some(999),
            private_uri: Some("hijacked".to_string()),
            ..test_calendar("work", "alice", "local")
        };

        let updated = manager
            .update_from_request(candidate, "work", "alice")
            .await
            .unwrap();

        assert_eq!(updated.id, old.id);
        assert_eq!(updated.private_uri.as_deref(), Some("backend-work"));
    }

    #[tokio::test]
    async fn update_from_request_restores_read_only_fields() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        let candidate = Calendar {
            user_id: None,
            owner_id: None,
            cruds: None,
            ctag: None,
            display_name: Some("Office".to_string()),
            ..old.clone()
        };

        let updated = manager
            .update_from_request(candidate, "work", "alice")
            .await
            .unwrap();

        assert_eq!(updated.user_id, old.user_id);
        assert_eq!(updated.owner_id, old.owner_id);
        assert_eq!(updated.cruds, old.cruds);
        assert_eq!(updated.display_name.as_deref(), Some("Office"));
    }

    #[tokio::test]
    async fn update_from_request_fills_unset_ctag_with_old_cruds_bits() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        let candidate = Calendar {
            ctag: None,
            ..old.clone()
        };

        let updated = manager
            .update_from_request(candidate, "work", "alice")
            .await
            .unwrap();

        let cruds_bits = u64::from((Cruds::READ | Cruds::UPDATE | Cruds::DELETE).bits());
        assert_eq!(updated.ctag, Some(cruds_bits));
        assert_ne!(updated.ctag, old.ctag);
    }

    #[tokio::test]
    async fn update_from_request_by_id_targets_stored_uri() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        let candidate = Calendar {
            enabled: Some(false),
            ..old.clone()
        };

        let updated = manager
            .update_from_request_by_id(candidate, old.id.unwrap(), "alice")
            .await
            .unwrap();

        assert_eq!(updated.enabled, Some(false));
        assert_eq!(manager.find("work", "alice").unwrap().enabled, Some(false));
    }

    #[tokio::test]
    async fn patch_with_display_name_only_keeps_everything_else() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));

        let patched = manager
            .patch_from_request(Calendar::named("Office"), "work", "alice")
            .await
            .unwrap();

        assert_eq!(
            patched,
            Calendar {
                display_name: Some("Office".to_string()),
                ..old
            }
        );
        assert_eq!(manager.find("work", "alice").unwrap(), patched);
    }

    #[tokio::test]
    async fn patch_by_id_overlays_given_fields() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));
        let patch = Calendar {
            color: Some("#33b679".to_string()),
            order: Some(2),
            ..Calendar::default()
        };

        let patched = manager
            .patch_from_request_by_id(patch, old.id.unwrap(), "alice")
            .await
            .unwrap();

        assert_eq!(patched.color.as_deref(), Some("#33b679"));
        assert_eq!(patched.order, Some(2));
        assert_eq!(patched.display_name, old.display_name);
        assert_eq!(patched.ctag, old.ctag);
    }

    #[tokio::test]
    async fn patch_changing_user_is_still_a_transfer() {
        let manager = create_test_manager();
        stored(&manager, test_calendar("work", "alice", "local"));
        let patch = Calendar {
            user_id: Some("bob".to_string()),
            ..Calendar::default()
        };

        let result = manager.patch_from_request(patch, "work", "alice").await;

        assert!(matches!(result, Err(BusinessError::NotSupported(_))));
    }

    #[tokio::test]
    async fn touch_bumps_ctag_and_stamps_time() {
        let manager = create_test_manager();
        let old = stored(&manager, test_calendar("work", "alice", "local"));

        let touched = manager.touch("work", "alice").await.unwrap();

        assert_eq!(touched.ctag, Some(old.ctag.unwrap() + 1));
        assert!(touched.last_properties_update.is_some());
        assert_eq!(manager.find("work", "alice").unwrap(), touched);
    }

    #[test]
    fn reset_read_only_properties_only_fills_unset_fields() {
        let old = test_calendar("work", "alice", "local");
        let mut calendar = Calendar {
            owner_id: Some("carol".to_string()),
            ..Calendar::named("New")
        };

        CalendarManager::<SqliteCalendarStore>::reset_read_only_properties(&mut calendar, &old);

        assert_eq!(calendar.user_id.as_deref(), Some("alice"));
        assert_eq!(calendar.owner_id.as_deref(), Some("carol"));
        assert_eq!(calendar.cruds, old.cruds);
        assert_eq!(calendar.ctag, old.cruds.map(|c| u64::from(c.bits())));
        assert_eq!(calendar.public_uri, None);
    }

    // delete

    #[tokio::test]
    async fn delete_calls_backend_then_removes_row() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_delete_calendar()
            .times(1)
            .withf(|private_uri, user_id| {
                private_uri.to_string() == "backend-work" && user_id.to_string() == "alice"
            })
            .returning(|_, _| Ok(()));
        let manager = create_manager_with(vec![mocked("dav", true, api)]);
        let mut calendar = test_calendar("work", "alice", "dav");
        calendar.private_uri = Some("backend-work".to_string());
        let calendar = stored(&manager, calendar);

        manager.delete(&calendar).await.unwrap();

        assert!(!manager.exists("work", "alice").unwrap());
    }

    #[tokio::test]
    async fn failing_backend_delete_keeps_row() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_delete_calendar()
            .returning(|uri, _| Err(BackendError::CacheOutdated(uri.to_string())));
        let manager = create_manager_with(vec![mocked("dav", true, api)]);
        let calendar = stored(&manager, test_calendar("work", "alice", "dav"));

        let result = manager.delete(&calendar).await;

        assert!(matches!(result, Err(BusinessError::Backend { .. })));
        assert!(manager.exists("work", "alice").unwrap());
    }

    #[tokio::test]
    async fn delete_on_disabled_backend_never_reaches_backend() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(true);
        api.expect_delete_calendar().never();
        let manager = create_manager_with(vec![mocked("dav", false, api)]);
        let calendar = stored(&manager, test_calendar("work", "alice", "dav"));

        let result = manager.delete(&calendar).await;

        assert!(matches!(result, Err(BusinessError::BackendDisabled(_))));
        assert!(manager.exists("work", "alice").unwrap());
    }

    #[tokio::test]
    async fn delete_requires_backend_delete_support() {
        let mut api = MockBackendApi::new();
        api.expect_implements().return_const(false);
        api.expect_delete_calendar().never();
        let manager = create_manager_with(vec![mocked("readonly", true, api)]);
        let calendar = stored(&manager, test_calendar("work", "alice", "readonly"));

        let result = manager.delete(&calendar).await;

        assert!(matches!(
            result,
            Err(BusinessError::ActionNotImplemented {
                action: BackendAction::DeleteCalendar,
                ..
            })
        ));
    }
}
