use sse_hub::ClientRegistry;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub registry: ClientRegistry,
    pub config: AppConfig,
    /// Cancelled on shutdown; per-connection tasks hang child tokens off it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            registry: ClientRegistry::new(),
            config,
            shutdown: CancellationToken::new(),
        }
    }
}
