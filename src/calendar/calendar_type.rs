use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{Components, Cruds};

/// Metadata record of one calendar.
///
/// Every field is optional so the same type carries both stored records and
/// partially specified candidates coming from a request. `None` means "unset".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Calendar {
    pub id: Option<i64>,
    pub user_id: Option<String>,
    pub owner_id: Option<String>,
    pub backend: Option<String>,
    pub public_uri: Option<String>,
    pub private_uri: Option<String>,
    pub display_name: Option<String>,
    pub components: Option<Components>,
    pub color: Option<String>,
    pub timezone: Option<String>,
    pub cruds: Option<Cruds>,
    pub ctag: Option<u64>,
    pub enabled: Option<bool>,
    pub order: Option<i32>,
    pub last_properties_update: Option<DateTime<Utc>>,
}

impl Calendar {
    /// Candidate carrying only a display name.
    pub fn named(display_name: &str) -> Self {
        Self {
            display_name: Some(display_name.to_string()),
            ..Self::default()
        }
    }

    pub fn has_unset_fields(&self) -> bool {
        self.id.is_none()
            || self.user_id.is_none()
            || self.owner_id.is_none()
            || self.backend.is_none()
            || self.public_uri.is_none()
            || self.private_uri.is_none()
            || self.display_name.is_none()
            || self.components.is_none()
            || self.color.is_none()
            || self.timezone.is_none()
            || self.cruds.is_none()
            || self.ctag.is_none()
            || self.enabled.is_none()
            || self.order.is_none()
            || self.last_properties_update.is_none()
    }

    /// Returns `base` with every field this candidate sets written over it.
    pub fn overlay(self, base: &Calendar) -> Calendar {
        let base = base.clone();
        Calendar {
            id: self.id.or(base.id),
            user_id: self.user_id.or(base.user_id),
            owner_id: self.owner_id.or(base.owner_id),
            backend: self.backend.or(base.backend),
            public_uri: self.public_uri.or(base.public_uri),
            private_uri: self.private_uri.or(base.private_uri),
            display_name: self.display_name.or(base.display_name),
            components: self.components.or(base.components),
            color: self.color.or(base.color),
            timezone: self.timezone.or(base.timezone),
            cruds: self.cruds.or(base.cruds),
            ctag: self.ctag.or(base.ctag),
            enabled: self.enabled.or(base.enabled),
            order: self.order.or(base.order),
            last_properties_update: self.last_properties_update.or(base.last_properties_update),
        }
    }

    /// Bumps the sync tag and stamps the modification time.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.ctag = Some(self.ctag.unwrap_or(0).saturating_add(1));
        self.last_properties_update = Some(now);
    }

    pub fn allows(&self, cruds: Cruds) -> bool {
        self.cruds.is_some_and(|granted| granted.contains(cruds))
    }

    pub fn supports(&self, components: Components) -> bool {
        self.components.is_some_and(|held| held.contains(components))
    }
}
