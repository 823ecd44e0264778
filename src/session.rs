//! Per-browser session state
//!
//! A session owns its active thread, the messages on screen, and a cache of
//! known threads for the sidebar. Each session handles one action at a time;
//! an action arriving while a reply is streaming is rejected as busy.

use crate::graph::{
    is_default_name, ChatGraph, ConversationState, GraphError, Message, StepEvent, StepStream,
    ThreadId, ThreadSummary, DEFAULT_CHAT_NAME,
};
use crate::threads::retrieve_all_threads;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Characters of the first message kept in the provisional sidebar name
const PROVISIONAL_NAME_CHARS: usize = 30;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session is busy with another request")]
    Busy,
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Name shown in the sidebar while the first reply is still streaming
pub fn provisional_chat_name(text: &str) -> String {
    if text.chars().count() > PROVISIONAL_NAME_CHARS {
        let kept: String = text.chars().take(PROVISIONAL_NAME_CHARS).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

/// Serializable snapshot of a session for the browser
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub thread_id: ThreadId,
    pub chat_name: String,
    pub messages: Vec<Message>,
    /// Most recently added first
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    thread_id: ThreadId,
    messages: Vec<Message>,
    /// Known threads in the order they were added
    threads: Vec<ThreadSummary>,
}

impl Session {
    /// Fresh session on a new empty thread. `directory` is newest first.
    fn new(id: String, directory: Vec<ThreadSummary>) -> Self {
        let mut session = Self {
            id,
            thread_id: ThreadId::new(),
            messages: Vec::new(),
            threads: directory.into_iter().rev().collect(),
        };
        session.remember(ThreadSummary::untitled(session.thread_id.clone()));
        session
    }

    /// Cached display name of the active thread
    pub fn chat_name(&self) -> &str {
        self.cached_name(&self.thread_id).unwrap_or(DEFAULT_CHAT_NAME)
    }

    fn cached_name(&self, thread_id: &ThreadId) -> Option<&str> {
        self.threads
            .iter()
            .find(|t| &t.id == thread_id)
            .map(|t| t.name.as_str())
    }

    /// Add a thread to the cache unless it is already known
    fn remember(&mut self, summary: ThreadSummary) {
        if self.cached_name(&summary.id).is_none() {
            self.threads.push(summary);
        }
    }

    /// Update a known thread's name; unknown threads are ignored
    fn set_name(&mut self, thread_id: &ThreadId, name: &str) {
        if let Some(entry) = self.threads.iter_mut().find(|t| &t.id == thread_id) {
            entry.name = name.to_string();
        }
    }

    /// Start a new thread. No-op while the active thread is still empty.
    pub fn new_chat(&mut self) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        self.thread_id = ThreadId::new();
        self.messages.clear();
        self.remember(ThreadSummary::untitled(self.thread_id.clone()));
        true
    }

    /// Show a thread whose state was just loaded
    fn show_thread(&mut self, thread_id: ThreadId, state: ConversationState) {
        self.remember(ThreadSummary::untitled(thread_id.clone()));
        if !is_default_name(&state.chat_name) {
            self.set_name(&thread_id, &state.chat_name);
        }
        self.thread_id = thread_id;
        self.messages = state.messages;
    }

    /// Record the user's message on screen, and give an unnamed thread a
    /// provisional name. Returns what to restore if the turn does not land.
    fn begin_turn(&mut self, text: &str) -> TurnUndo {
        let undo = TurnUndo {
            thread_id: self.thread_id.clone(),
            message_count: self.messages.len(),
            previous_name: self.chat_name().to_string(),
        };

        if is_default_name(self.chat_name()) {
            let thread_id = self.thread_id.clone();
            self.set_name(&thread_id, &provisional_chat_name(text));
        }
        self.messages.push(Message::user(text));
        undo
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            chat_name: self.chat_name().to_string(),
            messages: self.messages.clone(),
            threads: self.threads.iter().rev().cloned().collect(),
        }
    }
}

struct TurnUndo {
    thread_id: ThreadId,
    message_count: usize,
    previous_name: String,
}

/// A submitted turn holding its session until the reply lands.
///
/// Dropped without [`PendingTurn::commit`] (model error, store error, or the
/// client going away), it removes the optimistic message and name.
struct PendingTurn {
    session: OwnedMutexGuard<Session>,
    undo: TurnUndo,
    committed: bool,
}

impl PendingTurn {
    fn commit(&mut self, reply: Message, chat_name: &str) {
        let session = &mut *self.session;
        session.messages.push(reply);
        session.set_name(&self.undo.thread_id, chat_name);
        self.committed = true;
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let session = &mut *self.session;
        session.messages.truncate(self.undo.message_count);
        session.set_name(&self.undo.thread_id, &self.undo.previous_name);
        tracing::debug!(
            session_id = %session.id,
            thread_id = %self.undo.thread_id,
            "Turn rolled back"
        );
    }
}

/// Registry of live browser sessions
pub struct SessionManager {
    graph: Arc<ChatGraph>,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(graph: Arc<ChatGraph>) -> Self {
        Self {
            graph,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session on a fresh thread, with the sidebar seeded from the
    /// thread directory
    pub async fn create(&self) -> SessionView {
        let directory = match retrieve_all_threads(&**self.graph.store()).await {
            Ok(threads) => threads,
            Err(e) => {
                tracing::warn!(error = %e, "Thread directory unavailable, starting with empty sidebar");
                Vec::new()
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), directory);
        let view = session.view();

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        tracing::info!(session_id = %id, thread_id = %view.thread_id, "Session created");
        view
    }

    async fn get(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn acquire(&self, session_id: &str) -> Result<OwnedMutexGuard<Session>, SessionError> {
        self.get(session_id)
            .await?
            .try_lock_owned()
            .map_err(|_| SessionError::Busy)
    }

    /// Current snapshot; waits for an in-flight turn to settle
    pub async fn view(&self, session_id: &str) -> Result<SessionView, SessionError> {
        let session = self.get(session_id).await?;
        let view = session.lock().await.view();
        Ok(view)
    }

    pub async fn new_chat(&self, session_id: &str) -> Result<SessionView, SessionError> {
        let mut session = self.acquire(session_id).await?;
        if session.new_chat() {
            tracing::info!(session_id, thread_id = %session.thread_id, "New chat started");
        }
        Ok(session.view())
    }

    /// Switch to a stored thread. A store failure leaves the session as it was.
    pub async fn select_thread(
        &self,
        session_id: &str,
        thread_id: ThreadId,
    ) -> Result<SessionView, SessionError> {
        let mut session = self.acquire(session_id).await?;
        let state = self.graph.get_state(&thread_id).await?;
        session.show_thread(thread_id, state);
        Ok(session.view())
    }

    /// Submit a user message and stream the turn.
    ///
    /// The session stays locked until the returned stream finishes or is
    /// dropped.
    pub async fn submit(&self, session_id: &str, text: String) -> Result<StepStream, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let mut session = self.acquire(session_id).await?;
        let undo = session.begin_turn(&text);
        let mut events = self.graph.stream(undo.thread_id.clone(), text);

        let mut turn = PendingTurn {
            session,
            undo,
            committed: false,
        };

        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = events.next().await {
                if let StepEvent::Done { message, chat_name } = &event {
                    turn.commit(message.clone(), chat_name);
                }
                yield event;
            }
        }))
    }

    /// Rename a thread and refresh the name in every idle session that
    /// shows it
    pub async fn rename_thread(
        &self,
        thread_id: &ThreadId,
        name: &str,
    ) -> Result<String, SessionError> {
        let name = self.graph.rename(thread_id, name).await?;

        for session in self.sessions.read().await.values() {
            if let Ok(mut session) = session.try_lock() {
                session.set_name(thread_id, &name);
            }
        }
        Ok(name)
    }
}
