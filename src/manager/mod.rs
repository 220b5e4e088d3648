pub mod calendar_manager;
pub mod error;
pub mod uri;

pub use calendar_manager::CalendarManager;
pub use error::{BusinessError, BusinessResult};
