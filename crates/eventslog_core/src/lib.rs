pub mod api;
pub mod clock;
pub mod dialect;
pub mod error;
pub mod event;
pub mod task;

pub use api::*;
pub use dialect::Dialect;
pub use error::{EventsLogError, EventsLogResult};
pub use event::*;
pub use task::{RecurringTask, TaskHandle, TaskScheduler, TokioScheduler, recurring};
