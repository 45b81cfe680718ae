//! Application state shared by every route.

use std::sync::Arc;

use crate::assistant::Assistant;
use crate::broker::Broker;
use crate::config::ServerConfig;
use crate::ws::{Dispatcher, Hub};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The connection hub.
    pub hub: Hub,
    /// Broker for presence; `None` disables `/online-users`.
    pub broker: Option<Arc<dyn Broker>>,
    /// Inbound message dispatcher.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Creates application state around an existing hub.
    #[must_use]
    pub fn new(config: ServerConfig, hub: Hub, assistant: Arc<dyn Assistant>) -> Self {
        let dispatcher = Dispatcher::new(
            hub.clone(),
            assistant,
            config.assistant_timeout,
            config.analysis_timeout,
        );
        Self {
            broker: hub.broker().cloned(),
            hub,
            dispatcher,
            config: Arc::new(config),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("broker", &self.broker)
            .field("config", &self.config)
            .finish()
    }
}
