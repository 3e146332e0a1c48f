//! BleepGate library: an S3-compatible gateway with a browser console.
//!
//! Every request enters through one gateway function (see [`server`]),
//! runs the ordered [`pipeline`], and is then dispatched through either the
//! storage route table or the console route table depending on its path.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod console;
pub mod context;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod xml;

use crate::auth::SigningContext;
use crate::config::{Config, ServerConfig};
use crate::console::assets::{AssetStore, BuiltinAssets, DirAssets};
use crate::console::client::{SignedClient, StorageClient};
use crate::engine::StorageEngine;
use crate::pipeline::{Pipeline, StageEnv};
use crate::routes::RouteTable;

/// Shared application state passed to the gateway via `axum::extract::State`.
///
/// Everything here is read-only once built.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Credentials used to verify inbound and sign outbound requests.
    pub signing: Arc<SigningContext>,
    /// Storage engine the handlers delegate to.
    pub engine: Arc<dyn StorageEngine>,
    pub storage_routes: RouteTable,
    pub console_routes: RouteTable,
    pub pipeline: Pipeline,
    /// Console bundle files.
    pub assets: Arc<dyn AssetStore>,
    /// Client the console RPC service uses to reach storage.
    pub storage_client: Arc<dyn StorageClient>,
}

impl AppState {
    /// Build the state for `config` on top of `engine`.
    ///
    /// Fails when the credentials are unusable or a route template does not
    /// compile; both are fatal at startup.
    pub fn new(config: Config, engine: Arc<dyn StorageEngine>) -> anyhow::Result<Self> {
        config::validate(&config)?;

        let signing = Arc::new(SigningContext::new(
            config.auth.access_key.clone(),
            config.auth.secret_key.clone(),
            config.server.region.clone(),
        )?);
        let storage_routes = routes::storage_routes()?;
        let console_routes = routes::console_routes(&config.console.prefix)?;

        let assets: Arc<dyn AssetStore> = match &config.console.assets_dir {
            Some(dir) => Arc::new(DirAssets::new(dir)),
            None => Arc::new(BuiltinAssets),
        };
        let storage_client = Arc::new(SignedClient::new(
            local_endpoint(&config.server),
            Arc::clone(&signing),
        )?);

        Ok(Self {
            config,
            signing,
            engine,
            storage_routes,
            console_routes,
            pipeline: Pipeline::standard(),
            assets,
            storage_client,
        })
    }

    /// Replace the console's storage client.
    pub fn with_storage_client(mut self, client: Arc<dyn StorageClient>) -> Self {
        self.storage_client = client;
        self
    }

    /// Replace the console's asset source.
    pub fn with_assets(mut self, assets: Arc<dyn AssetStore>) -> Self {
        self.assets = assets;
        self
    }

    /// Collaborators the pipeline stages read.
    pub fn stage_env(&self) -> StageEnv<'_> {
        StageEnv {
            config: &self.config,
            signing: &self.signing,
            console_routes: &self.console_routes,
        }
    }
}

/// URL the console uses to reach this gateway's own listener.
fn local_endpoint(server: &ServerConfig) -> String {
    let host = match server.host.as_str() {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        host => host,
    };
    format!("http://{host}:{}", server.port)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_endpoint() {
        let mut server = ServerConfig::default();
        assert_eq!(local_endpoint(&server), "http://127.0.0.1:9000");
        server.host = "10.0.0.5".into();
        server.port = 9100;
        assert_eq!(local_endpoint(&server), "http://10.0.0.5:9100");
    }

    #[test]
    fn test_bad_credentials_are_fatal() {
        let mut config = Config::default();
        config.auth.secret_key = "short".into();
        assert!(AppState::new(config, Arc::new(engine::MemoryEngine::new())).is_err());
    }
}
