pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod lan;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod servers;
pub mod stream;

/// Timeout applied to individual LAN sends and the graceful-shutdown pang.
pub const NET_OP_TIMEOUT_MS: u64 = 1000;
