pub mod error;
pub mod grammar;
pub mod timer;

pub use error::RecurrenceError;
pub use grammar::{CalendarGrammar, Recurrence, RecurrenceGrammar};
pub use timer::{spawn_timer, TimerHandle};
