pub mod config;
pub mod store;

pub use config::{BackendConfig, BackendKind, Config, ConfigError};
pub use store::{CalendarStore, SqliteCalendarStore, StoreError};
