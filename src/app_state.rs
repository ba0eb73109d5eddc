use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::queue::DurableQueue;
use crate::services::storage::ArtifactStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ArtifactStore>,
    pub queue: Arc<dyn DurableQueue>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn DurableQueue>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config: Arc::new(config),
        }
    }
}
