use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use playdar::cli::Cli;
use playdar::config::{find_config_dir, ConfigFile};
use playdar::lan::LanResolver;
use playdar::logging::init_logging;
use playdar::platform::Platform;
use playdar::registry;
use playdar::resolver::Resolver;
use playdar::servers::Servers;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    if cli.is_export_config() {
        playdar::cli::default_config();
        return Ok(());
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if cli.is_config_check() {
        println!("configuration OK:\n{}", config.as_json_pretty());
        return Ok(());
    }

    if let Err(err) = init_logging(cli.debug()) {
        eprintln!("failed to initialize logging: {err}");
    }

    info!(name = %config.name, "starting playdar");

    let (agent_tx, _) = tokio::sync::broadcast::channel(64);
    let mut servers = Servers::build(agent_tx);

    let (registry_handle, registry_join) =
        registry::spawn_supervised(Duration::from_secs(config.query_ttl_secs));
    servers = servers.with_registry(registry_join);

    let lan_resolver = match LanResolver::bind(&config).await {
        Ok(resolver) => Arc::new(resolver),
        Err(err) => {
            error!(%err, "failed to bind LAN UDP socket");
            return Err(err);
        }
    };
    let node_table = lan_resolver.node_table();

    let resolvers: Vec<Arc<dyn Resolver>> = vec![lan_resolver.clone()];
    let platform = Platform::new(
        config.clone(),
        registry_handle,
        resolvers.clone(),
        Some(node_table),
    );

    for resolver in &resolvers {
        if !resolver.init(platform.clone()).await {
            warn!(name = resolver.name(), "resolver declined to initialize");
        }
    }

    servers = servers.with_lan(playdar::lan::spawn_supervised(
        lan_resolver.clone(),
        platform.clone(),
        Duration::from_secs(config.lan_node_ttl_secs),
    ));

    let http_addr = config.http_listener_address();
    let app = playdar::http::router(platform.clone());
    let http_platform = platform.clone();
    servers = servers.with_http(tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        info!(%http_addr, "HTTP API listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(http_platform))
            .await
    }));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        _ = supervise(&servers) => {
            warn!("a background task stopped unexpectedly");
        }
    }

    platform.begin_shutdown();
    let _ = tokio::time::timeout(
        Duration::from_millis(playdar::NET_OP_TIMEOUT_MS),
        lan_resolver.send_pang(),
    )
    .await;

    Ok(())
}

async fn shutdown_signal(platform: Platform) {
    loop {
        if platform.is_shutting_down() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn supervise(servers: &Servers) {
    loop {
        if servers.any_finished() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

fn load_config(cli: &Cli) -> Result<ConfigFile, playdar::error::PlaydarError> {
    match cli.config().map(PathBuf::from).or_else(find_config_dir) {
        Some(dir) => ConfigFile::load(&dir),
        None => {
            warn!("no config file found, using built-in defaults");
            Ok(ConfigFile::default())
        }
    }
}
