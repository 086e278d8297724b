use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use invoice_gateway::{
    batch::{BatchEnricher, CatalogLookup, LogSink, ProgressReporter},
    config::Config,
    create_router,
    simulate::{run_simulation, SimulationOptions},
    utils::{init_logger, LogFormat},
    AppState, Gateway,
};

#[derive(Parser)]
#[command(name = "invoice-gateway", version, about = "Outbound request gateway for the invoicing assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway and serve the health endpoints (default)
    Serve,
    /// Run a synthetic enrichment batch through the gateway
    Simulate {
        #[arg(long, default_value_t = 200)]
        items: usize,
        /// Defaults to BATCH_CHUNK_SIZE
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Probability that a single attempt fails transiently
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,
        /// Upper bound of the random per-attempt latency
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,
    },
    /// Look up SKUs in the invoicing API catalog through the gateway
    Enrich {
        #[arg(long)]
        tenant: String,
        /// Defaults to BATCH_CHUNK_SIZE
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(required = true)]
        skus: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LogFormat::from_env());
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Simulate {
            items,
            chunk_size,
            failure_rate,
            latency_ms,
        } => {
            if !(0.0..=1.0).contains(&failure_rate) {
                anyhow::bail!("--failure-rate must be between 0 and 1");
            }
            let options = SimulationOptions {
                items,
                chunk_size: chunk_size.unwrap_or(config.batch.chunk_size),
                failure_rate,
                latency_ms,
            };
            let report = run_simulation(&config, options).await?;
            println!("{}", report.summary);
            println!("{}", serde_json::to_string_pretty(&report.stats)?);
            Ok(())
        }
        Command::Enrich {
            tenant,
            chunk_size,
            skus,
        } => enrich(config, tenant, chunk_size, skus).await,
    }
}

async fn enrich(config: Config, tenant: String, chunk_size: Option<usize>, skus: Vec<String>) -> anyhow::Result<()> {
    let lookup = CatalogLookup::from_config(&config.downstream, tenant)?;
    info!(base_url = %lookup.base_url(), items = skus.len(), "Enriching catalog items");

    let gateway = Gateway::new(config.gateway.clone());
    gateway.start()?;

    let enricher = BatchEnricher::from_config(gateway.clone(), &config.batch);
    let mut progress = ProgressReporter::new(Arc::new(LogSink), "enrich");
    let result = enricher
        .process(
            skus,
            chunk_size.unwrap_or(config.batch.chunk_size),
            Arc::new(lookup),
            &mut progress,
        )
        .await;
    gateway.stop().await;

    for outcome in &result.outcomes {
        match &outcome.result {
            Ok(product) => println!("{}\t{}", outcome.item, product),
            Err(e) => println!("{}\terror: {}", outcome.item, e),
        }
    }
    println!("{}", result.summary());
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let gateway = Gateway::new(config.gateway.clone());
    gateway.start()?;

    // Create shared state
    let state = AppState::new(gateway.clone(), config.clone());
    let app = create_router(state);

    // Start server
    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    gateway.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
