//! Thread directory: every thread the checkpoint store knows about

use crate::graph::{CheckpointStore, ThreadSummary};

/// List every distinct thread with its current name, most recently written
/// first.
///
/// A thread's own read failure degrades that entry to the default name. A
/// failure to list the store at all is returned to the caller.
pub async fn retrieve_all_threads(
    store: &dyn CheckpointStore,
) -> Result<Vec<ThreadSummary>, String> {
    let ids = store.list_thread_ids().await?;

    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        let summary = match store.get(&id).await {
            Ok(Some(state)) => ThreadSummary::new(id, state.chat_name),
            Ok(None) => ThreadSummary::untitled(id),
            Err(e) => {
                tracing::warn!(thread_id = %id, error = %e, "Failed to load thread name");
                ThreadSummary::untitled(id)
            }
        };
        summaries.push(summary);
    }

    Ok(summaries)
}
