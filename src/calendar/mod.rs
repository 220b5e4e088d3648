pub mod calendar_type;
pub mod permissions;

pub use calendar_type::Calendar;
pub use permissions::{Components, Cruds};
