use std::sync::Arc;

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use meshgate::{
    adapters::{GatewayServer, LocalOverlay},
    config::{ConfigValidator, GatewayConfig, ResolvedConfig, env, loader::load_config},
    core::Topology,
    ports::OverlayTransport,
    tracing_setup::{self, LogFormat},
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (YAML, TOML or JSON); environment variables are used when absent
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Log output format
    #[clap(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the configuration and print the routing table
    Validate,
    /// Start the gateway (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_command(args.config.as_deref()).await,
        Commands::Serve => serve_command(args.config.as_deref(), args.log_format).await,
    }
}

async fn load_gateway_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    match config_path {
        Some(path) => {
            tracing::info!("Loading configuration from {path}");
            load_config(path)
                .await
                .with_context(|| format!("Failed to load config from {path}"))
        }
        None => {
            tracing::info!("Loading configuration from environment");
            env::from_env().context("Failed to read configuration from environment")
        }
    }
}

async fn resolve(config_path: Option<&str>) -> Result<ResolvedConfig> {
    let config = load_gateway_config(config_path).await?;
    ConfigValidator::resolve(&config).context("Configuration validation failed")
}

async fn serve_command(config_path: Option<&str>, log_format: LogFormat) -> Result<()> {
    tracing_setup::init_tracing(log_format)?;

    let config = resolve(config_path).await.inspect_err(log_config_error)?;
    let overlay: Arc<dyn OverlayTransport> = Arc::new(LocalOverlay::new());
    let topology = Topology::from_config(&config, overlay.clone())
        .context("Failed to build routing table")
        .inspect_err(log_config_error)?;

    tracing::info!(
        "Starting meshgate: {} services, {} tenants, {} hosts, HTTP port {}, overlay port {}",
        config.services.len(),
        config.tenants.len(),
        topology.routes.len(),
        config.http_port,
        config.overlay_port
    );

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    GatewayServer::new(&config, topology, overlay)
        .run(graceful_shutdown.token())
        .await?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

fn log_config_error(err: &color_eyre::eyre::Report) {
    tracing::error!("{err}: {}", err.root_cause());
}

/// Validate configuration and print the expanded routing table
async fn validate_command(config_path: Option<&str>) -> Result<()> {
    let source = config_path.unwrap_or("environment");
    println!("Validating configuration from {source}");

    let config = match resolve(config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    let overlay: Arc<dyn OverlayTransport> = Arc::new(LocalOverlay::new());
    let topology = match Topology::from_config(&config, overlay) {
        Ok(topology) => topology,
        Err(e) => {
            eprintln!("Routing table construction failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    println!("Configuration validation: OK");
    println!();
    println!("Summary:");
    println!("   • HTTP port: {}", config.http_port);
    println!("   • Overlay port: {}", config.overlay_port);
    println!("   • System hosts: {}", config.system_hosts.join(", "));
    println!("   • Services: {}", config.services.len());
    println!("   • Tenants: {}", config.tenants.len());
    println!();
    println!("Routing table:");
    for (host, (service, tenant)) in topology.routes.snapshot() {
        println!("   {host} -> {service} (tenant {tenant})");
    }
    Ok(())
}
