//! Event sinks for pipe observability.
//!
//! Event types emitted by pipes:
//! - `pipe.started`, `pipe.completed`, `pipe.failed`
//! - `task.skipped`, `task.failed`, `task.background_failed`

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
