pub mod backend;
pub mod calendar;
pub mod manager;
pub mod storage;

pub use backend::{Backend, BackendAction, BackendApi, BackendError, BackendRegistry};
pub use calendar::{Calendar, Components, Cruds};
pub use manager::{BusinessError, BusinessResult, CalendarManager};
pub use storage::{CalendarStore, Config, SqliteCalendarStore};
