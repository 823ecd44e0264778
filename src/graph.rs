//! Single-node conversation graph
//!
//! `START -> chat_node -> END`: each user turn sends the thread's full history
//! to the model, names the thread on its first turn, and merges the reply back
//! into the checkpoint store.

mod state;
mod store;
#[cfg(test)]
pub mod testing;

pub use state::*;
pub use store::{CheckpointStore, DatabaseStore};

use crate::chat_name::generate_chat_name;
use crate::llm::{LlmError, LlmRequest, LlmService};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Longest accepted manual name
pub const MAX_MANUAL_NAME_CHARS: usize = 60;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Checkpoint store error: {0}")]
    Store(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("Invalid chat name: {0}")]
    InvalidName(String),
}

/// Progress of one streamed turn
#[derive(Debug)]
pub enum StepEvent {
    /// Next fragment of the assistant reply
    Delta(String),
    /// The turn was persisted
    Done { message: Message, chat_name: String },
    /// The turn failed and nothing was persisted
    Error(GraphError),
}

pub type StepStream = Pin<Box<dyn Stream<Item = StepEvent> + Send>>;

/// Whether this turn should name the thread: exactly one user message so far
/// and the name is still a default sentinel.
pub fn needs_name(state: &ConversationState) -> bool {
    state.user_messages().count() == 1 && is_default_name(&state.chat_name)
}

fn history_request(state: &ConversationState) -> LlmRequest {
    LlmRequest::new(state.messages.iter().map(Message::to_llm).collect())
}

/// Freshly generated name when this is the naming turn
async fn resolve_name(state: &ConversationState, llm: &dyn LlmService) -> Option<String> {
    if !needs_name(state) {
        return None;
    }
    let first = state.user_messages().next()?;
    Some(generate_chat_name(&first.content, llm).await)
}

/// The conversation step.
///
/// `state` already ends with the new user message. Returns the assistant
/// reply plus the chat name when this turn generated one. Model failures
/// propagate; no reply is fabricated.
#[allow(dead_code)] // Driven through `ChatGraph::invoke`
pub async fn chat_node(
    state: &ConversationState,
    llm: &dyn LlmService,
) -> Result<StateUpdate, LlmError> {
    let chat_name = resolve_name(state, llm).await;
    let response = llm.complete(&history_request(state)).await?;

    let mut update = StateUpdate::new().message(Message::assistant(response.text));
    update.generated_name = chat_name;
    Ok(update)
}

/// The compiled graph with its injected store and model
pub struct ChatGraph {
    store: Arc<dyn CheckpointStore>,
    llm: Arc<dyn LlmService>,
}

impl ChatGraph {
    pub fn compile(store: Arc<dyn CheckpointStore>, llm: Arc<dyn LlmService>) -> Self {
        Self { store, llm }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Latest state of a thread; a thread never written reads as the default
    pub async fn get_state(&self, thread_id: &ThreadId) -> Result<ConversationState, GraphError> {
        self.store
            .get(thread_id)
            .await
            .map(Option::unwrap_or_default)
            .map_err(GraphError::Store)
    }

    async fn begin_turn(
        store: &dyn CheckpointStore,
        thread_id: &ThreadId,
        user_text: &str,
    ) -> Result<(ConversationState, Message), GraphError> {
        let mut state = store
            .get(thread_id)
            .await
            .map_err(GraphError::Store)?
            .unwrap_or_default();
        let user_message = Message::user(user_text);
        state.messages.push(user_message.clone());
        Ok((state, user_message))
    }

    /// Run one turn to completion and persist it
    #[allow(dead_code)] // Blocking counterpart of `stream`
    pub async fn invoke(
        &self,
        thread_id: &ThreadId,
        user_text: &str,
    ) -> Result<ConversationState, GraphError> {
        let (state, user_message) = Self::begin_turn(&*self.store, thread_id, user_text).await?;
        let step = chat_node(&state, &*self.llm).await?;

        let mut update = StateUpdate::new().message(user_message);
        update.messages.extend(step.messages);
        update.generated_name = step.generated_name;

        self.store
            .put(thread_id, &update)
            .await
            .map_err(GraphError::Store)
    }

    /// Run one turn, yielding reply fragments as they arrive.
    ///
    /// The turn is persisted only after the model finishes; an error or an
    /// early drop of the stream leaves the thread untouched.
    pub fn stream(&self, thread_id: ThreadId, user_text: String) -> StepStream {
        let store = Arc::clone(&self.store);
        let llm = Arc::clone(&self.llm);

        Box::pin(async_stream::stream! {
            let (state, user_message) =
                match Self::begin_turn(&*store, &thread_id, &user_text).await {
                    Ok(turn) => turn,
                    Err(e) => {
                        yield StepEvent::Error(e);
                        return;
                    }
                };

            let generated_name = resolve_name(&state, &*llm).await;

            let mut fragments = match llm.stream(&history_request(&state)).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    yield StepEvent::Error(e.into());
                    return;
                }
            };

            let mut reply = String::new();
            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        reply.push_str(&fragment);
                        yield StepEvent::Delta(fragment);
                    }
                    Err(e) => {
                        tracing::warn!(thread_id = %thread_id, error = %e, "Reply stream failed");
                        yield StepEvent::Error(e.into());
                        return;
                    }
                }
            }

            if reply.trim().is_empty() {
                yield StepEvent::Error(LlmError::empty_response("Model returned an empty reply").into());
                return;
            }

            let assistant = Message::assistant(reply);
            let mut update = StateUpdate::new()
                .message(user_message)
                .message(assistant.clone());
            update.generated_name = generated_name;

            match store.put(&thread_id, &update).await {
                Ok(merged) => {
                    tracing::info!(
                        thread_id = %thread_id,
                        messages = merged.messages.len(),
                        chat_name = %merged.chat_name,
                        "Turn persisted"
                    );
                    yield StepEvent::Done {
                        message: assistant,
                        chat_name: merged.chat_name,
                    };
                }
                Err(e) => {
                    yield StepEvent::Error(GraphError::Store(e));
                }
            }
        })
    }

    /// Set a thread's name by hand.
    ///
    /// Writes a name-only snapshot. A non-default name also stops automatic
    /// naming for a thread that has no messages yet.
    pub async fn rename(&self, thread_id: &ThreadId, name: &str) -> Result<String, GraphError> {
        let name = name.trim();
        if is_default_name(name) {
            return Err(GraphError::InvalidName(
                "name must not be empty or a placeholder".to_string(),
            ));
        }
        if name.chars().count() > MAX_MANUAL_NAME_CHARS {
            return Err(GraphError::InvalidName(format!(
                "name must be at most {MAX_MANUAL_NAME_CHARS} characters"
            )));
        }

        let merged = self
            .store
            .put(thread_id, &StateUpdate::new().chat_name(name))
            .await
            .map_err(GraphError::Store)?;
        Ok(merged.chat_name)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{MemoryStore, MockLlmService};
    use super::*;
    use crate::llm::{LlmErrorKind, MessageRole};

    fn graph() -> (ChatGraph, Arc<MemoryStore>, Arc<MockLlmService>) {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlmService::new());
        let graph = ChatGraph::compile(store.clone(), llm.clone());
        (graph, store, llm)
    }

    async fn collect(stream: StepStream) -> Vec<StepEvent> {
        stream.collect().await
    }

    #[test]
    fn test_needs_name() {
        let mut state = ConversationState::default();
        assert!(!needs_name(&state));

        state.messages.push(Message::user("hi"));
        assert!(needs_name(&state));

        state.chat_name = "Greetings".to_string();
        assert!(!needs_name(&state));

        state.chat_name = "New Chat".to_string();
        state.messages.push(Message::assistant("hello"));
        state.messages.push(Message::user("again"));
        assert!(!needs_name(&state));
    }

    #[tokio::test]
    async fn test_chat_node_first_turn_names_thread() {
        let llm = MockLlmService::new();
        llm.queue_text("Black Holes");
        llm.queue_text("They are regions of spacetime.");

        let mut state = ConversationState::default();
        state.messages.push(Message::user("Tell me about black holes"));

        let update = chat_node(&state, &llm).await.unwrap();
        assert_eq!(update.generated_name.as_deref(), Some("Black Holes"));
        assert_eq!(
            update.messages,
            vec![Message::assistant("They are regions of spacetime.")]
        );

        // Second request carries the whole history
        let requests = llm.recorded_requests();
        assert_eq!(requests[1].messages.len(), 1);
        assert_eq!(requests[1].messages[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_chat_node_propagates_model_failure() {
        let llm = MockLlmService::new();
        let mut state = ConversationState {
            chat_name: "Named".to_string(),
            ..Default::default()
        };
        state.messages.push(Message::user("hi"));
        llm.queue_error(LlmError::server_error("boom"));

        let err = chat_node(&state, &llm).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::ServerError);
    }

    #[tokio::test]
    async fn test_invoke_round_trip_with_fallback_name() {
        let (graph, store, llm) = graph();
        let thread = ThreadId::from("t1");
        llm.queue_error(LlmError::network("naming down"));
        llm.queue_text("Black holes are dense.");

        let state = graph
            .invoke(&thread, "Tell me about black holes")
            .await
            .unwrap();
        assert_eq!(state.chat_name, "Tell me about black holes");
        assert_eq!(
            state.messages,
            vec![
                Message::user("Tell me about black holes"),
                Message::assistant("Black holes are dense.")
            ]
        );
        assert_eq!(store.put_count(), 1);
        assert_eq!(graph.get_state(&thread).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_naming_happens_once_per_thread() {
        let (graph, _store, llm) = graph();
        let thread = ThreadId::from("t1");

        llm.queue_text("Space Talk");
        llm.queue_text("Sure.");
        graph.invoke(&thread, "Let's talk about space").await.unwrap();

        llm.queue_text("More.");
        let state = graph.invoke(&thread, "Tell me more").await.unwrap();
        assert_eq!(state.chat_name, "Space Talk");
        // naming + reply, then reply only
        assert_eq!(llm.recorded_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_invoke_failure_persists_nothing() {
        let (graph, store, llm) = graph();
        llm.queue_text("Name");
        llm.queue_error(LlmError::auth("no key"));

        let err = graph.invoke(&ThreadId::from("t"), "hello").await.unwrap_err();
        assert!(matches!(err, GraphError::Llm(_)));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_then_done() {
        let (graph, store, llm) = graph();
        let thread = ThreadId::from("t1");
        llm.queue_text("Black Holes");
        llm.queue_stream(["Black ", "holes ", "are dense."]);

        let events = collect(graph.stream(thread.clone(), "Tell me about black holes".into())).await;
        let deltas: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StepEvent::Delta(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, ["Black ", "holes ", "are dense."]);

        match events.last() {
            Some(StepEvent::Done { message, chat_name }) => {
                assert_eq!(message, &Message::assistant("Black holes are dense."));
                assert_eq!(chat_name, "Black Holes");
            }
            other => panic!("expected Done, got {other:?}"),
        }

        assert_eq!(store.put_count(), 1);
        let state = graph.get_state(&thread).await.unwrap();
        assert_eq!(state.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_error_midway_persists_nothing() {
        let (graph, store, llm) = graph();
        llm.queue_text("Name");
        llm.queue_broken_stream(["partial"], LlmError::network("reset"));

        let events = collect(graph.stream(ThreadId::from("t"), "hello".into())).await;
        assert!(matches!(events.last(), Some(StepEvent::Error(GraphError::Llm(_)))));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_empty_reply_is_error() {
        let (graph, store, llm) = graph();
        llm.queue_text("Name");
        llm.queue_stream(Vec::<String>::new());

        let events = collect(graph.stream(ThreadId::from("t"), "hello".into())).await;
        match events.as_slice() {
            [StepEvent::Error(GraphError::Llm(e))] => {
                assert_eq!(e.kind, LlmErrorKind::EmptyResponse);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_dropped_early_persists_nothing() {
        let (graph, store, llm) = graph();
        llm.queue_text("Name");
        llm.queue_stream(["one", "two"]);

        let mut stream = graph.stream(ThreadId::from("t"), "hello".into());
        assert!(matches!(stream.next().await, Some(StepEvent::Delta(_))));
        drop(stream);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_store_read_failure() {
        let (graph, store, _llm) = graph();
        let thread = ThreadId::from("broken");
        store.fail_get_for(&thread);

        let events = collect(graph.stream(thread, "hello".into())).await;
        assert!(matches!(events.as_slice(), [StepEvent::Error(GraphError::Store(_))]));
    }

    #[tokio::test]
    async fn test_rename() {
        let (graph, _store, llm) = graph();
        let thread = ThreadId::from("t");

        assert_eq!(graph.rename(&thread, "  Physics  ").await.unwrap(), "Physics");
        assert!(matches!(
            graph.rename(&thread, "Untitled Chat").await,
            Err(GraphError::InvalidName(_))
        ));
        assert!(matches!(
            graph.rename(&thread, &"x".repeat(61)).await,
            Err(GraphError::InvalidName(_))
        ));

        // A manual name suppresses automatic naming
        llm.queue_text("Reply");
        let state = graph.invoke(&thread, "first message").await.unwrap();
        assert_eq!(state.chat_name, "Physics");
        assert_eq!(llm.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_during_first_turn_survives() {
        let (graph, _store, llm) = graph();
        let thread = ThreadId::from("t");
        llm.queue_text("Generated Name");
        llm.queue_stream(["Hello", " there"]);

        let mut stream = graph.stream(thread.clone(), "first message".into());
        assert!(matches!(stream.next().await, Some(StepEvent::Delta(_))));
        graph.rename(&thread, "Manual").await.unwrap();

        let rest: Vec<_> = stream.collect().await;
        match rest.last() {
            Some(StepEvent::Done { chat_name, .. }) => assert_eq!(chat_name, "Manual"),
            other => panic!("expected Done, got {other:?}"),
        }

        let state = graph.get_state(&thread).await.unwrap();
        assert_eq!(state.chat_name, "Manual");
        assert_eq!(state.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_store_write_failure() {
        let (graph, store, llm) = graph();
        let thread = ThreadId::from("t");
        llm.queue_text("Name");
        llm.queue_stream(["a reply"]);
        store.set_fail_puts(true);

        let events = collect(graph.stream(thread.clone(), "hello".into())).await;
        assert!(matches!(
            events.last(),
            Some(StepEvent::Error(GraphError::Store(_)))
        ));
        assert!(!events.iter().any(|e| matches!(e, StepEvent::Done { .. })));
        assert_eq!(store.put_count(), 0);
        assert_eq!(graph.get_state(&thread).await.unwrap(), ConversationState::default());
    }
}
