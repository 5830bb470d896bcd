//! The shared handle passed to every resolver and every HTTP handler.
//!
//! This plays the role the teacher's `DNSServerData`/`ServerState` plays for
//! `servers.rs` and `web/mod.rs`: one cheaply-cloneable struct threading the
//! config snapshot, the registry actor handle, and process-wide shutdown
//! state through to every task, without any of them touching a global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ConfigFile;
use crate::lan::node_table::NodeTable;
use crate::registry;
use crate::resolver::Resolver;

#[derive(Clone)]
pub struct Platform {
    config: Arc<ConfigFile>,
    registry: registry::Handle,
    resolvers: Arc<Vec<Arc<dyn Resolver>>>,
    http_client: reqwest::Client,
    shutting_down: Arc<AtomicBool>,
    /// The LAN resolver's roster, exposed directly for `/lan/roster` so the
    /// HTTP layer doesn't need a round trip through the resolver trait for
    /// something that isn't part of the resolve contract. `None` when no
    /// LAN resolver is running (tests, or a future non-LAN-only build).
    lan_roster: Option<Arc<NodeTable>>,
}

impl Platform {
    pub fn new(
        config: ConfigFile,
        registry: registry::Handle,
        resolvers: Vec<Arc<dyn Resolver>>,
        lan_roster: Option<Arc<NodeTable>>,
    ) -> Self {
        Platform {
            config: Arc::new(config),
            registry,
            resolvers: Arc::new(resolvers),
            http_client: reqwest::Client::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            lan_roster,
        }
    }

    pub fn lan_roster(&self) -> Option<&Arc<NodeTable>> {
        self.lan_roster.as_ref()
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn registry(&self) -> &registry::Handle {
        &self.registry
    }

    pub fn resolvers(&self) -> &[Arc<dyn Resolver>] {
        &self.resolvers
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Flips the shutdown flag so long-lived loops (LAN receive loop, HTTP
    /// long-poll handlers) can notice and wind down.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }
}
