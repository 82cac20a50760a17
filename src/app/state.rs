//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::maps::MapSource;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config, map_source: Arc<dyn MapSource>) -> Self {
        let registry = Arc::new(MatchRegistry::new(
            config.rules.clone(),
            map_source,
            config.match_seed,
        ));

        Self {
            config: Arc::new(config),
            registry,
        }
    }
}
