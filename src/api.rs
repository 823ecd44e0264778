//! HTTP API and browser UI

mod assets;
mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::graph::ChatGraph;
use crate::session::SessionManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<ChatGraph>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(graph: Arc<ChatGraph>) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(graph.clone())),
            graph,
        }
    }
}
