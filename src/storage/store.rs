use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use std::path::Path;
use thiserror::Error;

use crate::calendar::{Calendar, Components, Cruds};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Calendar not found: {0}")]
    NotFound(String),
    #[error("More than one calendar matches {0}")]
    MultipleFound(String),
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Failed to prepare database location: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Persistence of calendar metadata rows, independent of any backend.
pub trait CalendarStore {
    fn find_all(
        &self,
        user_id: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Calendar>, StoreError>;

    fn count(&self, user_id: &str) -> Result<u64, StoreError>;

    fn count_on_backend(&self, backend: &str, user_id: &str) -> Result<u64, StoreError>;

    fn find(&self, public_uri: &str, user_id: &str) -> Result<Calendar, StoreError>;

    fn find_by_id(&self, id: i64, user_id: &str) -> Result<Calendar, StoreError>;

    fn does_exist(&self, public_uri: &str, user_id: &str) -> Result<bool, StoreError>;

    fn does_allow(&self, cruds: Cruds, public_uri: &str, user_id: &str) -> Result<bool, StoreError>;

    fn does_support(
        &self,
        components: Components,
        public_uri: &str,
        user_id: &str,
    ) -> Result<bool, StoreError>;

    /// Persists a new row and returns it with the assigned id.
    fn insert(&self, calendar: &Calendar) -> Result<Calendar, StoreError>;

    fn update(&self, calendar: &Calendar) -> Result<(), StoreError>;

    fn delete(&self, calendar: &Calendar) -> Result<(), StoreError>;
}

const COLUMNS: &str = "id, user_id, owner_id, backend, public_uri, private_uri, display_name, \
                       components, color, timezone, cruds, ctag, enabled, ord, last_properties_update";

pub struct SqliteCalendarStore {
    conn: Connection,
}

impl SqliteCalendarStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::new(Connection::open(path)?);
        store.initialize()?;
        Ok(store)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS calendars (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                backend TEXT NOT NULL,
                public_uri TEXT NOT NULL,
                private_uri TEXT NOT NULL,
                display_name TEXT NOT NULL,
                components INTEGER NOT NULL DEFAULT 7,
                color TEXT,
                timezone TEXT,
                cruds INTEGER NOT NULL,
                ctag INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                ord INTEGER NOT NULL DEFAULT 0,
                last_properties_update TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_calendars_user_uri ON calendars(user_id, public_uri);",
        )?;
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        let result: rusqlite::Result<i32> = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        );
        result.unwrap_or(0) > 0
    }

    fn count_where(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM calendars WHERE {}", clause);
        let count: i64 = self.conn.query_row(&sql, params, |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn select_one(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
        description: String,
    ) -> Result<Calendar, StoreError> {
        let sql = format!("SELECT {} FROM calendars WHERE {} LIMIT 2", COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut matches = stmt
            .query_map(params, calendar_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match matches.len() {
            0 => Err(StoreError::NotFound(description)),
            1 => Ok(matches.remove(0)),
            _ => Err(StoreError::MultipleFound(description)),
        }
    }
}

impl CalendarStore for SqliteCalendarStore {
    fn find_all(
        &self,
        user_id: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Calendar>, StoreError> {
        let sql = format!(
            "SELECT {} FROM calendars WHERE user_id = ?1 ORDER BY ord ASC, id ASC LIMIT ?2 OFFSET ?3",
            COLUMNS
        );
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(i64::from).unwrap_or(-1);
        let offset = offset.map(i64::from).unwrap_or(0);

        let mut stmt = self.conn.prepare(&sql)?;
        let calendars = stmt
            .query_map(params![user_id, limit, offset], calendar_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(calendars)
    }

    fn count(&self, user_id: &str) -> Result<u64, StoreError> {
        let count = self.count_where("user_id = ?1", &[&user_id])?;
        if count == 0 {
            return Err(StoreError::NotFound(format!("no calendars for user {}", user_id)));
        }
        Ok(count)
    }

    fn count_on_backend(&self, backend: &str, user_id: &str) -> Result<u64, StoreError> {
        self.count_where("backend = ?1 AND user_id = ?2", &[&backend, &user_id])
    }

    fn find(&self, public_uri: &str, user_id: &str) -> Result<Calendar, StoreError> {
        self.select_one(
            "public_uri = ?1 AND user_id = ?2",
            &[&public_uri, &user_id],
            format!("{} of user {}", public_uri, user_id),
        )
    }

    fn find_by_id(&self, id: i64, user_id: &str) -> Result<Calendar, StoreError> {
        self.select_one(
            "id = ?1 AND user_id = ?2",
            &[&id, &user_id],
            format!("#{} of user {}", id, user_id),
        )
    }

    fn does_exist(&self, public_uri: &str, user_id: &str) -> Result<bool, StoreError> {
        let count =
            self.count_where("public_uri = ?1 AND user_id = ?2", &[&public_uri, &user_id])?;
        Ok(count > 0)
    }

    fn does_allow(&self, cruds: Cruds, public_uri: &str, user_id: &str) -> Result<bool, StoreError> {
        let mask = i64::from(cruds.bits());
        let count = self.count_where(
            "public_uri = ?1 AND user_id = ?2 AND (cruds & ?3) = ?3",
            &[&public_uri, &user_id, &mask],
        )?;
        Ok(count > 0)
    }

    fn does_support(
        &self,
        components: Components,
        public_uri: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        let mask = i64::from(components.bits());
        let count = self.count_where(
            "public_uri = ?1 AND user_id = ?2 AND (components & ?3) = ?3",
            &[&public_uri, &user_id, &mask],
        )?;
        Ok(count > 0)
    }

    fn insert(&self, calendar: &Calendar) -> Result<Calendar, StoreError> {
        let row = CalendarRow::try_from(calendar)?;
        self.conn.execute(
            "INSERT INTO calendars (user_id, owner_id, backend, public_uri, private_uri,
                display_name, components, color, timezone, cruds, ctag, enabled, ord,
                last_properties_update)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                row.user_id,
                row.owner_id,
                row.backend,
                row.public_uri,
                row.private_uri,
                row.display_name,
                row.components,
                row.color,
                row.timezone,
                row.cruds,
                row.ctag,
                row.enabled,
                row.order,
                row.last_properties_update,
            ],
        )?;

        let mut inserted = calendar.clone();
        inserted.id = Some(self.conn.last_insert_rowid());
        Ok(inserted)
    }

    fn update(&self, calendar: &Calendar) -> Result<(), StoreError> {
        let id = calendar
            .id
            .ok_or_else(|| StoreError::InvalidRecord("cannot update a calendar without id".to_string()))?;
        let row = CalendarRow::try_from(calendar)?;
        let changed = self.conn.execute(
            "UPDATE calendars SET owner_id = ?3, backend = ?4, public_uri = ?5, private_uri = ?6,
                display_name = ?7, components = ?8, color = ?9, timezone = ?10, cruds = ?11,
                ctag = ?12, enabled = ?13, ord = ?14, last_properties_update = ?15
             WHERE id = ?1 AND user_id = ?2",
            params![
                id,
                row.user_id,
                row.owner_id,
                row.backend,
                row.public_uri,
                row.private_uri,
                row.display_name,
                row.components,
                row.color,
                row.timezone,
                row.cruds,
                row.ctag,
                row.enabled,
                row.order,
                row.last_properties_update,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("#{}", id)));
        }
        Ok(())
    }

    fn delete(&self, calendar: &Calendar) -> Result<(), StoreError> {
        let id = calendar
            .id
            .ok_or_else(|| StoreError::InvalidRecord("cannot delete a calendar without id".to_string()))?;
        let changed = self.conn.execute(
            "DELETE FROM calendars WHERE id = ?1 AND user_id = ?2",
            params![id, calendar.user_id],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("#{}", id)));
        }
        Ok(())
    }
}

/// Column values of one calendar row in their SQL representation.
struct CalendarRow<'a> {
    user_id: Option<&'a str>,
    owner_id: Option<&'a str>,
    backend: Option<&'a str>,
    public_uri: Option<&'a str>,
    private_uri: Option<&'a str>,
    display_name: Option<&'a str>,
    components: Option<i64>,
    color: Option<&'a str>,
    timezone: Option<&'a str>,
    cruds: Option<i64>,
    ctag: Option<i64>,
    enabled: Option<bool>,
    order: Option<i32>,
    last_properties_update: Option<String>,
}

impl<'a> TryFrom<&'a Calendar> for CalendarRow<'a> {
    type Error = StoreError;

    fn try_from(calendar: &'a Calendar) -> Result<Self, StoreError> {
        let ctag = calendar
            .ctag
            .map(i64::try_from)
            .transpose()
            .map_err(|_| StoreError::InvalidRecord(format!("ctag {:?} out of range", calendar.ctag)))?;

        Ok(Self {
            user_id: calendar.user_id.as_deref(),
            owner_id: calendar.owner_id.as_deref(),
            backend: calendar.backend.as_deref(),
            public_uri: calendar.public_uri.as_deref(),
            private_uri: calendar.private_uri.as_deref(),
            display_name: calendar.display_name.as_deref(),
            components: calendar.components.map(|c| i64::from(c.bits())),
            color: calendar.color.as_deref(),
            timezone: calendar.timezone.as_deref(),
            cruds: calendar.cruds.map(|c| i64::from(c.bits())),
            ctag,
            enabled: calendar.enabled,
            order: calendar.order,
            last_properties_update: calendar.last_properties_update.map(|t| t.to_rfc3339()),
        })
    }
}

fn conversion_error(index: usize, kind: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, kind, message.into())
}

fn calendar_from_row(row: &Row) -> rusqlite::Result<Calendar> {
    let components: i64 = row.get(7)?;
    let components = u8::try_from(components)
        .ok()
        .and_then(Components::from_bits)
        .ok_or_else(|| conversion_error(7, Type::Integer, format!("invalid components {}", components)))?;

    let cruds: i64 = row.get(10)?;
    let cruds = u8::try_from(cruds)
        .ok()
        .and_then(Cruds::from_bits)
        .ok_or_else(|| conversion_error(10, Type::Integer, format!("invalid cruds {}", cruds)))?;

    let ctag: i64 = row.get(11)?;
    let ctag = u64::try_from(ctag)
        .map_err(|_| conversion_error(11, Type::Integer, format!("invalid ctag {}", ctag)))?;

    let last_properties_update = row
        .get::<_, Option<String>>(14)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(14, Type::Text, e.to_string()))
        })
        .transpose()?;

    Ok(Calendar {
        id: Some(row.get(0)?),
        user_id: Some(row.get(1)?),
        owner_id: Some(row.get(2)?),
        backend: Some(row.get(3)?),
        public_uri: Some(row.get(4)?),
        private_uri: Some(row.get(5)?),
        display_name: Some(row.get(6)?),
        components: Some(components),
        color: row.get(8)?,
        timezone: row.get(9)?,
        cruds: Some(cruds),
        ctag: Some(ctag),
        enabled: Some(row.get(12)?),
        order: Some(row.get(13)?),
        last_properties_update,
    })
}
