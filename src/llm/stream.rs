//! Server-sent-event payloads from streaming providers

use super::LlmError;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use std::time::Duration;

/// Send a request, waiting at most `timeout` for the response headers
pub async fn send(
    builder: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<reqwest::Response, LlmError> {
    tokio::time::timeout(timeout, builder.send())
        .await
        .map_err(|_| LlmError::network(format!("No response within {timeout:?}")))?
        .map_err(|e| LlmError::from_reqwest(&e))
}

/// Turn a streaming HTTP response into its sequence of `data:` payloads.
///
/// Each event must arrive within `idle` of the previous one; a silent
/// connection ends the stream with a network error instead of hanging.
pub fn data_payloads(
    response: reqwest::Response,
    idle: Duration,
) -> impl Stream<Item = Result<String, LlmError>> + Send {
    let mut events = Box::pin(response.bytes_stream().eventsource());

    async_stream::try_stream! {
        loop {
            let next = tokio::time::timeout(idle, events.next())
                .await
                .map_err(|_| LlmError::network(format!("No stream data for {idle:?}")))?;
            let Some(event) = next else { break };
            let event = event.map_err(|e| LlmError::network(format!("Stream read failed: {e}")))?;
            if !event.data.is_empty() {
                yield event.data;
            }
        }
    }
}
