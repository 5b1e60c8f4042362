use std::sync::Arc;

use protocol::{ExecutionId, LogEvent, StreamMessage};

use super::SessionStore;

/// Where one component of an execution reports progress.
/// Cheap to clone; each clone carries its own source label.
#[derive(Debug, Clone)]
pub struct EventSink {
    store: Arc<SessionStore>,
    id: ExecutionId,
    source: String,
}

impl EventSink {
    pub fn new(store: Arc<SessionStore>, id: ExecutionId, source: impl Into<String>) -> Self {
        Self {
            store,
            id,
            source: source.into(),
        }
    }

    /// Same execution, different component label (e.g. one workflow step).
    pub fn relabel(&self, source: impl Into<String>) -> Self {
        Self {
            store: Arc::clone(&self.store),
            id: self.id.clone(),
            source: source.into(),
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("[{}] {}", self.source, message);
        self.store.emit(&self.id, LogEvent::info(&self.source, message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[{}] {}", self.source, message);
        self.store.emit(&self.id, LogEvent::warning(&self.source, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("[{}] {}", self.source, message);
        self.store.emit(&self.id, LogEvent::error(&self.source, message));
    }

    pub fn is_cancelled(&self) -> bool {
        self.store.is_cancelled(&self.id)
    }

    /// Deliver the one terminal message of this execution.
    pub fn finish(&self, terminal: StreamMessage) -> bool {
        self.store.finish(&self.id, terminal)
    }
}
