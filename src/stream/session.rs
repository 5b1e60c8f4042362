use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use protocol::{error_type, ExecutionId, ExecutionRequest, ExecutionResult, LogEvent, StreamMessage};
use util::{lock, HashMap};
use workflow::Plan;

/// Sessions whose result nobody collected are dropped after this long.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);
/// Events kept for a client that hasn't attached yet.
pub const DEFAULT_BACKLOG: usize = 256;

/// What an execution id stands for.
#[derive(Debug, Clone)]
pub enum Subject {
    Execution(Arc<ExecutionRequest>),
    Workflow(Arc<Plan>),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Execution(request) => {
                write!(f, "{} on {}", request.optimizer, request.problem)
            }
            Subject::Workflow(plan) => write!(f, "workflow of {} steps", plan.len()),
        }
    }
}

#[derive(Debug)]
struct Session {
    subject: Subject,
    sender: Option<UnboundedSender<StreamMessage>>,
    backlog: VecDeque<LogEvent>,
    cancelled: bool,
    terminal: Option<StreamMessage>,
    finished_at: Option<Instant>,
}

impl Session {
    fn new(subject: Subject) -> Self {
        Self {
            subject,
            sender: None,
            backlog: VecDeque::new(),
            cancelled: false,
            terminal: None,
            finished_at: None,
        }
    }

    /// Forward to the attached client, or keep for later.
    fn push(&mut self, mut event: LogEvent, backlog_len: usize) {
        if let Some(sender) = &self.sender {
            match sender.send(StreamMessage::Log(event)) {
                Ok(()) => return,
                Err(SendError(StreamMessage::Log(e))) => event = e,
                Err(_) => return,
            }
            // client went away; hold on to events in case it comes back.
            self.sender = None;
        }
        if self.backlog.len() >= backlog_len {
            self.backlog.pop_front();
        }
        self.backlog.push_back(event);
    }
}

/// Service-owned table of streaming sessions, keyed by execution id.
///
/// A session is opened at submission. Log events are forwarded to the
/// attached client, or buffered (bounded, oldest dropped) until one attaches.
/// Exactly one terminal message is ever produced per session: it is handed to
/// the attached client, which removes the session, or retained for polling
/// until the retention window runs out.
///
/// Every method holds the lock only for a few map operations; nothing awaits
/// under it.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<ExecutionId, Session>>,
    retention: Duration,
    backlog_len: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_BACKLOG)
    }
}

impl SessionStore {
    pub fn new(retention: Duration, backlog_len: usize) -> Self {
        Self {
            sessions: Mutex::new(util::hash_map(64)),
            retention,
            backlog_len: backlog_len.max(1),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Create the session for a new execution. Returns false if the id is taken.
    pub fn open(&self, id: &ExecutionId, subject: Subject) -> bool {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(id) {
            log::warn!("Session {id} already exists");
            return false;
        }
        sessions.insert(id.clone(), Session::new(subject));
        true
    }

    /// Start receiving the stream of `id`.
    ///
    /// Buffered events are replayed first. If the execution already finished,
    /// the terminal message follows right away and the session is removed.
    /// A second attach replaces the first client. Returns `None` for unknown ids.
    pub fn attach(&self, id: &ExecutionId) -> Option<UnboundedReceiver<StreamMessage>> {
        let (tx, rx) = unbounded_channel();
        let mut sessions = lock(&self.sessions);
        let session = sessions.get_mut(id)?;

        // the receiver is alive for the whole block, so sends can't fail:
        for event in session.backlog.drain(..) {
            let _ = tx.send(StreamMessage::Log(event));
        }
        match session.terminal.take() {
            Some(terminal) => {
                let _ = tx.send(terminal);
                sessions.remove(id);
                log::debug!("Delivered retained result of {id} on attach");
            }
            None => {
                if session.sender.replace(tx).is_some() {
                    log::debug!("New client attached to {id}; dropping the previous one");
                }
            }
        }
        Some(rx)
    }

    /// Publish a log event. Events after the terminal message are dropped.
    pub fn emit(&self, id: &ExecutionId, event: LogEvent) {
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(id) {
            Some(session) if session.terminal.is_none() => session.push(event, self.backlog_len),
            Some(_) => log::debug!("Dropping event for finished execution {id}: {}", event.message),
            None => log::debug!("Dropping event for unknown execution {id}: {}", event.message),
        }
    }

    /// Deliver the terminal message of `id`.
    ///
    /// The first call wins; later calls are ignored and return false. If a
    /// client is attached it gets the message and the session goes away,
    /// otherwise the message is retained for `attach` or `poll_result`.
    pub fn finish(&self, id: &ExecutionId, terminal: StreamMessage) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(id) else {
            log::warn!("Terminal message for unknown or delivered execution {id} ignored");
            return false;
        };
        if session.terminal.is_some() {
            log::warn!("Execution {id} already has a terminal message; ignoring another");
            return false;
        }

        let undelivered = match session.sender.take() {
            Some(sender) => match sender.send(terminal) {
                Ok(()) => None,
                Err(e) => Some(e.0),
            },
            None => Some(terminal),
        };
        match undelivered {
            None => {
                sessions.remove(id);
                log::debug!("Delivered terminal message of {id}");
            }
            Some(terminal) => {
                session.terminal = Some(terminal);
                session.finished_at = Some(Instant::now());
            }
        }
        true
    }

    /// The retained result of a finished execution nobody was attached to.
    /// An `error` terminal comes back as a failed result.
    pub fn poll_result(&self, id: &ExecutionId) -> Option<ExecutionResult> {
        let sessions = lock(&self.sessions);
        match sessions.get(id)?.terminal.as_ref()? {
            StreamMessage::Result(result) => Some(result.clone()),
            StreamMessage::Error(e) => Some(ExecutionResult::failure(
                error_type::ORCHESTRATOR,
                e.message.clone(),
            )),
            StreamMessage::Log(_) => None,
        }
    }

    /// Forget a session right away, whatever its state.
    pub fn close(&self, id: &ExecutionId) -> bool {
        lock(&self.sessions).remove(id).is_some()
    }

    /// Ask for the execution to stop. Returns false if it is unknown or already finished.
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(id) {
            Some(session) if session.terminal.is_none() => {
                if !session.cancelled {
                    session.cancelled = true;
                    let event = LogEvent::warning("orchestrator", "Cancellation requested");
                    session.push(event, self.backlog_len);
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self, id: &ExecutionId) -> bool {
        lock(&self.sessions)
            .get(id)
            .map(|s| s.cancelled)
            .unwrap_or(false)
    }

    pub fn subject(&self, id: &ExecutionId) -> Option<Subject> {
        lock(&self.sessions).get(id).map(|s| s.subject.clone())
    }

    /// Drop finished sessions older than the retention window.
    /// Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|id, session| match session.finished_at {
            Some(t) if now.duration_since(t) >= self.retention => {
                log::debug!("Result of {id} expired without being collected");
                false
            }
            _ => true,
        });
        before - sessions.len()
    }

    pub fn contains(&self, id: &ExecutionId) -> bool {
        lock(&self.sessions).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
