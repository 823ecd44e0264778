//! Mock implementations for testing
//!
//! These mocks drive the graph, the session controller, and the HTTP layer
//! without a model endpoint or a database file.

use super::store::CheckpointStore;
use super::{ConversationState, StateUpdate, ThreadId};
use crate::db::Checkpoint;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, TextStream, Usage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// Mock LLM Service
// ============================================================================

type StreamScript = Result<Vec<Result<String, LlmError>>, LlmError>;

/// Mock model that replays queued replies and records every request
pub struct MockLlmService {
    completions: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            model_id: "mock-model".to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful completion
    pub fn queue_text(&self, text: impl Into<String>) {
        self.completions.lock().unwrap().push_back(Ok(LlmResponse {
            text: text.into(),
            usage: Usage::default(),
        }));
    }

    /// Queue a failed completion
    pub fn queue_error(&self, error: LlmError) {
        self.completions.lock().unwrap().push_back(Err(error));
    }

    /// Queue a stream that yields the given fragments
    pub fn queue_stream<I, S>(&self, fragments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = fragments.into_iter().map(|f| Ok(f.into())).collect();
        self.streams.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a stream that yields the fragments and then fails
    pub fn queue_broken_stream<I, S>(&self, fragments: I, error: LlmError)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut items: Vec<_> = fragments.into_iter().map(|f| Ok(f.into())).collect();
        items.push(Err(error));
        self.streams.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a stream that fails to open
    pub fn queue_stream_error(&self, error: LlmError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockLlmService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let items = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock stream queued")))?;
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// In-memory checkpoint store
// ============================================================================

/// Append-only snapshot list with injectable failures
pub struct MemoryStore {
    checkpoints: Mutex<Vec<Checkpoint>>,
    failing_gets: Mutex<HashSet<ThreadId>>,
    fail_puts: AtomicBool,
    fail_list: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            checkpoints: Mutex::new(Vec::new()),
            failing_gets: Mutex::new(HashSet::new()),
            fail_puts: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
        }
    }

    /// Make `get` fail for one thread
    pub fn fail_get_for(&self, thread_id: &ThreadId) {
        self.failing_gets.lock().unwrap().insert(thread_id.clone());
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Number of snapshots written so far
    pub fn put_count(&self) -> usize {
        self.checkpoints.lock().unwrap().len()
    }

    fn latest(checkpoints: &[Checkpoint], thread_id: &ThreadId) -> Option<ConversationState> {
        checkpoints
            .iter()
            .rev()
            .find(|c| &c.thread_id == thread_id)
            .map(|c| c.state.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, String> {
        if self.failing_gets.lock().unwrap().contains(thread_id) {
            return Err(format!("injected read failure for {thread_id}"));
        }
        Ok(Self::latest(&self.checkpoints.lock().unwrap(), thread_id))
    }

    async fn put(
        &self,
        thread_id: &ThreadId,
        update: &StateUpdate,
    ) -> Result<ConversationState, String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err("injected write failure".to_string());
        }

        let mut checkpoints = self.checkpoints.lock().unwrap();
        let mut state = Self::latest(&checkpoints, thread_id).unwrap_or_default();
        state.apply(update);

        let checkpoint_id = i64::try_from(checkpoints.len()).unwrap() + 1;
        checkpoints.push(Checkpoint {
            checkpoint_id,
            thread_id: thread_id.clone(),
            state: state.clone(),
            created_at: Utc::now(),
        });
        Ok(state)
    }

    async fn list_thread_ids(&self) -> Result<Vec<ThreadId>, String> {
        let mut seen = HashSet::new();
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .map(|checkpoint| checkpoint.thread_id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Checkpoint>, String> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err("injected list failure".to_string());
        }
        Ok(self.checkpoints.lock().unwrap().iter().rev().cloned().collect())
    }
}
