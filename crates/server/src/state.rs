use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use costsync_queue::QueueConsumer;
use costsync_sync::SyncOrchestrator;

pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Bearer token → domain it may act on (`*` = any domain).
    pub api_tokens: HashMap<String, String>,
    pub started_at: Instant,
    /// Task queue the worker polls; reported on `/health` when set.
    pub queue: Option<Arc<dyn QueueConsumer>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, api_tokens: HashMap<String, String>) -> Self {
        Self {
            orchestrator,
            api_tokens,
            started_at: Instant::now(),
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn QueueConsumer>) -> Self {
        self.queue = Some(queue);
        self
    }
}
