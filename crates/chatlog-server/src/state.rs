use std::sync::Arc;

use chatlog_core::ChatService;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        Self {
            chat: Arc::new(chat),
        }
    }
}
