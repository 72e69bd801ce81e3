#![recursion_limit = "256"]

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod models;
pub mod normalize;
pub mod pagination;
pub mod query;
pub mod schema;
pub mod server;
pub mod state;
pub mod telemetry;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the analytics service using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config).await?.run().await
}
