use anyhow::Result;
use clap::Parser;
use fairq_server::metrics::MetricsReader;
use fairq_server::{
    AppState, KeyLayout, KvEngine, LimiterRegistry, QueueDriver, ServerConfig, StrategyRegistry,
    create_router, spawn_sweeper,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fairq-server")]
#[command(about = "FairQ - Fair Job-Dispatch Broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        ServerConfig::from_file(&args.config)?
    } else {
        info!("Config file not found, using defaults");
        ServerConfig::default()
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize tracing based on config
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());

    match config.logging.format.as_str() {
        "json" => {
            // JSON format for production (structured logging)
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            // Pretty format for development (human-readable)
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .init();
        }
    }

    info!("Starting FairQ Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config);
    info!(
        "Log format: {}, level: {}",
        config.logging.format, config.logging.level
    );

    // Shared keyspace and layout
    let kv = Arc::new(KvEngine::new());
    let keys = Arc::new(KeyLayout::new(&config.broker.prefix));
    info!("Keyspace initialized (prefix: {})", config.broker.prefix);

    // Resolve strategy and limiter from the registries; unknown names fail
    // here, before the server binds.
    let broker = if config.broker.enabled {
        let strategy = StrategyRegistry::with_builtins().resolve(&config.broker.strategy, &config.broker)?;
        let limiter = LimiterRegistry::with_builtins().resolve(&config.broker.limiter, &config.broker)?;
        info!(
            "Queue broker enabled (strategy: {}, limiter: {})",
            strategy.name(),
            limiter.name()
        );
        Some(QueueDriver::new(
            kv.clone(),
            keys.clone(),
            strategy,
            limiter,
            config.broker.default_partition.clone(),
        ))
    } else {
        info!("Queue broker disabled");
        None
    };

    let reader = MetricsReader::new(kv.clone(), keys.clone());

    // Start delayed-job sweeper
    if config.sweeper.enabled {
        if let Some(driver) = broker.clone() {
            spawn_sweeper(driver, reader.clone(), config.sweeper.interval_secs);
            info!(
                "Sweeper enabled (interval: {}s)",
                config.sweeper.interval_secs
            );
        }
    } else {
        info!("Sweeper disabled; delayed jobs need an external promoter");
    }

    // Create application state
    let app_state = AppState {
        strategy_name: config.broker.strategy.clone(),
        limiter_name: config.broker.limiter.clone(),
        max_concurrent: broker
            .as_ref()
            .and_then(|driver| driver.limiter().max_concurrent()),
        broker,
        reader,
    };

    // Create router with the metrics gate
    let app = create_router(app_state, &config.prometheus)?;

    if config.prometheus.enabled {
        info!(
            "Metrics endpoint enabled at {} (gate: {:?})",
            config.prometheus.route, config.prometheus.middleware
        );
    }

    // Bind server
    let addr: SocketAddr = config.server_addr().parse()?;
    info!("Listening on http://{}", addr);

    // Start server; connect info feeds the IP allow-list gate
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
