use crate::{config::AppConfig, query::AnalyticsEngine};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: AnalyticsEngine,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, engine: AnalyticsEngine) -> Self {
        Self { config, engine }
    }
}
