//! Chat naming for new threads
//!
//! Asks the model for a short display name based on the first user message.
//! Any failure falls back to a deterministic truncation of the message.

use crate::graph::DEFAULT_CHAT_NAME;
use crate::llm::{LlmRequest, LlmService};
use std::time::Duration;
use tokio::time::timeout;

const NAMING_PROMPT: &str = "Give this conversation a concise name of at most 5 words and \
at most 30 characters. Reply with the name only, without quotes or trailing punctuation.

First message:";

const NAMING_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest name the model may return
pub const MAX_CHAT_NAME_CHARS: usize = 30;

/// Characters kept by the fallback before the ellipsis
const FALLBACK_KEEP_CHARS: usize = 27;

/// Deterministic name derived from the message text alone.
///
/// Lengths are counted in characters, so multi-byte text is never split.
pub fn fallback_chat_name(text: &str) -> String {
    if text.chars().count() > FALLBACK_KEEP_CHARS {
        let kept: String = text.chars().take(FALLBACK_KEEP_CHARS).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

/// Name a thread from its first user message.
///
/// Never fails: a model error, timeout, empty reply, or over-long reply all
/// resolve to [`fallback_chat_name`].
pub async fn generate_chat_name(text: &str, llm: &dyn LlmService) -> String {
    let request = LlmRequest::prompt(format!("{NAMING_PROMPT}\n{text}")).with_max_tokens(50);

    let generated = match timeout(NAMING_TIMEOUT, llm.complete(&request)).await {
        Ok(Ok(response)) => accept_generated_name(&response.text),
        Ok(Err(e)) => {
            tracing::warn!(error = %e.message, "Chat naming failed, using fallback");
            None
        }
        Err(_) => {
            tracing::warn!("Chat naming timed out, using fallback");
            None
        }
    };

    let name = generated.unwrap_or_else(|| fallback_chat_name(text));
    if name.trim().is_empty() {
        DEFAULT_CHAT_NAME.to_string()
    } else {
        name
    }
}

/// Clean up a model reply; `None` if it is unusable as a name
fn accept_generated_name(raw: &str) -> Option<String> {
    let name = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim();

    if name.is_empty() || name.chars().count() > MAX_CHAT_NAME_CHARS {
        return None;
    }
    Some(name.to_string())
}
