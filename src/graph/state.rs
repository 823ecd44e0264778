//! Conversation state carried through the graph and stored per thread

use crate::llm::LlmMessage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder name a thread carries until its first message names it
pub const DEFAULT_CHAT_NAME: &str = "Untitled Chat";

/// Names that still count as "not yet named"
const DEFAULT_CHAT_NAMES: &[&str] = &[DEFAULT_CHAT_NAME, "New Chat", ""];

pub fn is_default_name(name: &str) -> bool {
    DEFAULT_CHAT_NAMES.contains(&name.trim())
}

fn default_chat_name() -> String {
    DEFAULT_CHAT_NAME.to_string()
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single conversation message. The role is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn to_llm(&self) -> LlmMessage {
        match self.role {
            Role::User => LlmMessage::user(&self.content),
            Role::Assistant => LlmMessage::assistant(&self.content),
        }
    }
}

/// Full state of one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_chat_name")]
    pub chat_name: String,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            chat_name: default_chat_name(),
        }
    }
}

impl ConversationState {
    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::User)
    }

    /// Merge a partial update: messages append, a present name replaces,
    /// and a generated name lands only on a thread that is still unnamed.
    pub fn apply(&mut self, update: &StateUpdate) {
        self.messages.extend(update.messages.iter().cloned());
        if let Some(name) = &update.chat_name {
            self.chat_name.clone_from(name);
        } else if let Some(name) = &update.generated_name {
            if is_default_name(&self.chat_name) {
                self.chat_name.clone_from(name);
            }
        }
    }
}

/// Partial update produced by a step and merged by the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    /// Name produced by the naming procedure; never overwrites a real name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_name: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn chat_name(mut self, name: impl Into<String>) -> Self {
        self.chat_name = Some(name.into());
        self
    }
}

/// Opaque thread identifier, minted client-side per conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Mint a fresh random identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub name: String,
}

impl ThreadSummary {
    pub fn new(id: ThreadId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn untitled(id: ThreadId) -> Self {
        Self::new(id, DEFAULT_CHAT_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_names() {
        assert!(is_default_name("Untitled Chat"));
        assert!(is_default_name("New Chat"));
        assert!(is_default_name(""));
        assert!(!is_default_name("Black Holes Explained"));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::to_string(&Message::assistant("hi")).unwrap(),
            r#"{"role":"assistant","content":"hi"}"#
        );
    }

    #[test]
    fn test_state_defaults_when_fields_missing() {
        let state: ConversationState = serde_json::from_str("{}").unwrap();
        assert!(state.messages.is_empty());
        assert_eq!(state.chat_name, DEFAULT_CHAT_NAME);
    }

    #[test]
    fn test_apply_appends_and_replaces_name() {
        let mut state = ConversationState::default();
        state.apply(&StateUpdate::new().message(Message::user("one")));
        assert_eq!(state.chat_name, DEFAULT_CHAT_NAME);

        state.apply(
            &StateUpdate::new()
                .message(Message::assistant("two"))
                .chat_name("Counting"),
        );
        assert_eq!(
            state.messages,
            vec![Message::user("one"), Message::assistant("two")]
        );
        assert_eq!(state.chat_name, "Counting");
        assert_eq!(state.user_messages().count(), 1);
    }

    fn generated(name: &str) -> StateUpdate {
        StateUpdate {
            generated_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_name_only_fills_placeholder() {
        let mut state = ConversationState::default();
        state.apply(&generated("Generated"));
        assert_eq!(state.chat_name, "Generated");

        state.apply(&generated("Second Guess"));
        assert_eq!(state.chat_name, "Generated");

        let mut renamed = ConversationState {
            chat_name: "Manual".to_string(),
            ..Default::default()
        };
        renamed.apply(&generated("Generated").message(Message::user("first")));
        assert_eq!(renamed.chat_name, "Manual");
        assert_eq!(renamed.messages.len(), 1);
    }

    #[test]
    fn test_thread_id_is_transparent() {
        let id = ThreadId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""abc""#);
        assert_ne!(ThreadId::new(), ThreadId::new());
    }

    #[test]
    fn test_summary_shape() {
        let summary = ThreadSummary::untitled(ThreadId::from("t1"));
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            serde_json::json!({"id": "t1", "name": "Untitled Chat"})
        );
    }

    fn arb_update() -> impl Strategy<Value = StateUpdate> {
        (
            prop::collection::vec((any::<bool>(), "[a-z ]{0,12}"), 0..4),
            prop::option::of("[A-Za-z ]{1,20}"),
        )
            .prop_map(|(messages, chat_name)| StateUpdate {
                messages: messages
                    .into_iter()
                    .map(|(from_user, text)| {
                        if from_user {
                            Message::user(text)
                        } else {
                            Message::assistant(text)
                        }
                    })
                    .collect(),
                chat_name,
                generated_name: None,
            })
    }

    proptest! {
        #[test]
        fn prop_apply_appends_in_order_and_last_name_wins(
            updates in prop::collection::vec(arb_update(), 0..8)
        ) {
            let mut state = ConversationState::default();
            for update in &updates {
                state.apply(update);
            }

            let expected: Vec<Message> =
                updates.iter().flat_map(|u| u.messages.clone()).collect();
            prop_assert_eq!(&state.messages, &expected);

            let expected_name = updates
                .iter()
                .filter_map(|u| u.chat_name.clone())
                .last()
                .unwrap_or_else(|| DEFAULT_CHAT_NAME.to_string());
            prop_assert_eq!(state.chat_name, expected_name);
        }
    }
}
