//! Configuration file loading and defaults.
//!
//! Playdar is configured with a single JSON file, `playdar.conf`, inside a
//! config directory selected either explicitly (`-c/--config`) or by
//! searching the usual per-OS locations. See [`find_config_dir`].

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use config::{Config, File};
use gethostname::gethostname;
use serde::{Deserialize, Serialize};

use crate::error::PlaydarError;

pub const CONFIG_FILENAME: &str = "playdar.conf";
const DEFAULT_HTTP_PORT: u16 = 8888;
const DEFAULT_LISTEN_PORT: u16 = 60210;
const DEFAULT_MULTICAST_GROUP: &str = "239.255.0.1";

/// The main config blob for Playdar. Write this as JSON and point `-c` at
/// the directory containing it (or let [`find_config_dir`] find it for you).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    /// This node's name, announced in LAN ping/pong. Defaults to the hostname.
    pub name: String,
    /// Port the JSON HTTP API listens on.
    pub http_port: u16,
    /// Worker thread count for the HTTP listener. Defaults to `cores + 1`.
    pub http_threads: usize,
    /// Explicit unicast LAN targets (`"ip:port"` or bare `"ip"`, which then
    /// uses `listenport`). Empty means "just the multicast group".
    pub endpoints: Vec<String>,
    /// Address the UDP socket binds to.
    pub listenip: String,
    /// Port the UDP socket binds to, and the default port for bare-IP
    /// entries in `endpoints`.
    pub listenport: u16,
    /// IPv4 multicast group used for LAN presence/gossip.
    pub multicast_group: Ipv4Addr,
    /// Redundancy factor: how many times each outbound UDP message is sent.
    pub numcopies: u8,
    /// Score at which a query is considered solved (does not halt other resolvers).
    pub solve_threshold: f32,
    /// How long a live query record survives without being reaped.
    pub query_ttl_secs: u64,
    /// How long a LAN node entry survives without a refreshing ping/pong.
    pub lan_node_ttl_secs: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let name = gethostname().into_string().unwrap_or_else(|_| "playdar".to_string());
        Self {
            name,
            http_port: DEFAULT_HTTP_PORT,
            http_threads: std::thread::available_parallelism()
                .map(|n| n.get() + 1)
                .unwrap_or(2),
            endpoints: vec![],
            listenip: "0.0.0.0".to_string(),
            listenport: DEFAULT_LISTEN_PORT,
            multicast_group: DEFAULT_MULTICAST_GROUP
                .parse()
                .expect("default multicast group is valid"),
            numcopies: 1,
            solve_threshold: 1.0,
            query_ttl_secs: 20 * 60,
            lan_node_ttl_secs: 180,
        }
    }
}

impl ConfigFile {
    /// Pretty-printed JSON, suitable for writing out a fresh `playdar.conf`.
    pub fn as_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("ConfigFile always serializes")
    }

    /// Bindable address for the HTTP JSON API.
    pub fn http_listener_address(&self) -> SocketAddr {
        SocketAddr::new("0.0.0.0".parse().expect("valid"), self.http_port)
    }

    /// Bindable address for the LAN UDP socket.
    pub fn udp_listener_address(&self) -> Result<SocketAddr, PlaydarError> {
        Ok(format!("{}:{}", self.listenip, self.listenport).parse()?)
    }

    /// Load `playdar.conf` from `dir`, falling back to defaults for any
    /// field the file doesn't set (and tolerating unknown keys, per spec).
    pub fn load(dir: &Path) -> Result<ConfigFile, PlaydarError> {
        let config_path = dir.join(CONFIG_FILENAME);
        if !config_path.exists() {
            return Err(PlaydarError::ConfigError(format!(
                "config file not found: {}",
                config_path.display()
            )));
        }
        let builder = Config::builder()
            .add_source(File::from(config_path.clone()).format(config::FileFormat::Json));
        let loaded = builder.build()?;

        let default = ConfigFile::default();
        Ok(ConfigFile {
            name: loaded.get("name").unwrap_or(default.name),
            http_port: loaded.get("http_port").unwrap_or(default.http_port),
            http_threads: loaded.get("http_threads").unwrap_or(default.http_threads),
            endpoints: loaded.get("endpoints").unwrap_or(default.endpoints),
            listenip: loaded.get("listenip").unwrap_or(default.listenip),
            listenport: loaded.get("listenport").unwrap_or(default.listenport),
            multicast_group: loaded
                .get::<String>("multicast_group")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.multicast_group),
            numcopies: loaded.get("numcopies").unwrap_or(default.numcopies),
            solve_threshold: loaded
                .get("solve_threshold")
                .unwrap_or(default.solve_threshold),
            query_ttl_secs: loaded
                .get("query_ttl_secs")
                .unwrap_or(default.query_ttl_secs),
            lan_node_ttl_secs: loaded
                .get("lan_node_ttl_secs")
                .unwrap_or(default.lan_node_ttl_secs),
        })
    }
}

/// Finds the config directory when `--config` wasn't given: `$PLAYDAR_HOME`,
/// else the platform config dir (`$XDG_CONFIG_HOME/playdar` or
/// `~/.config/playdar` on Unix, Application Support on macOS, `%APPDATA%`
/// on Windows) via the `directories` crate.
pub fn find_config_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("PLAYDAR_HOME") {
        let path = PathBuf::from(shellexpand::tilde(&home).into_owned());
        if path.join(CONFIG_FILENAME).exists() {
            return Some(path);
        }
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "playdar") {
        let path = dirs.config_dir().to_path_buf();
        if path.join(CONFIG_FILENAME).exists() {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.listenport, DEFAULT_LISTEN_PORT);
        assert_eq!(config.numcopies, 1);
        assert_eq!(config.solve_threshold, 1.0);
    }

    #[test]
    fn load_tolerates_unknown_keys_and_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            r#"{"name": "node-a", "http_port": 9999, "something_unknown": true}"#,
        )
        .expect("write config");

        let config = ConfigFile::load(dir.path()).expect("load config");
        assert_eq!(config.name, "node-a");
        assert_eq!(config.http_port, 9999);
        // unset fields fall back to defaults
        assert_eq!(config.listenport, DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(ConfigFile::load(dir.path()).is_err());
    }
}
