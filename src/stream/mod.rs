/// Keyed store of streaming sessions and retained results
mod session;
pub use session::{SessionStore, Subject, DEFAULT_BACKLOG, DEFAULT_RETENTION};

/// Labelled handle used to publish events for one execution
mod sink;
pub use sink::EventSink;
