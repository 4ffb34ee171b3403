use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use xbridge_arbitrage::{
    config::ArbitrageConfig,
    connectors::{
        CoinWalletRpc, JsonRpcTransport, ProxyPriceClient, ThorchainClient, XBridgeClient,
    },
    recovery::ShutdownCoordinator,
    state::TradeStateStore,
    strategy::ArbitrageEngine,
    utils::logger,
    Result,
};

#[derive(Parser)]
#[command(name = "xbridge-arbitrage")]
#[command(about = "XBridge/Thorchain taker-side arbitrage engine")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/arbitrage.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/arbitrage.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine (recover interrupted trades, then evaluate)
    Run {
        /// Evaluate and log opportunities without submitting orders
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate configuration
    Validate,
    /// Print persisted trade states
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    logger::init(&cli.log_level, &cli.log_file)?;

    info!(
        "Starting {} v{}",
        xbridge_arbitrage::APP_NAME,
        xbridge_arbitrage::VERSION
    );

    let mut config = ArbitrageConfig::from_file(&cli.config)?;
    config.validate()?;
    info!("Configuration loaded from: {}", cli.config.display());

    match cli.command {
        Commands::Run { dry_run } => {
            if dry_run {
                config.strategy.dry_mode = true;
            }
            run_engine(config).await
        }
        Commands::Validate => {
            println!("Configuration validation passed!");
            Ok(())
        }
        Commands::Status => show_status(config),
    }
}

async fn run_engine(config: ArbitrageConfig) -> Result<()> {
    if config.strategy.dry_mode {
        info!("Dry mode enabled; no orders will be submitted");
    }

    let dex_transport = Arc::new(JsonRpcTransport::new(
        &config.xbridge.rpc_host,
        config.xbridge.rpc_port,
        &config.xbridge.rpc_user,
        &config.xbridge.rpc_password,
        config.xbridge.rpc_timeout_secs,
    )?);
    let dex = Arc::new(XBridgeClient::new(dex_transport, config.xbridge.clone()));
    let swap = Arc::new(ThorchainClient::new(&config.thorchain)?);
    let prices = Arc::new(ProxyPriceClient::new(&config.pricing)?);

    let mut wallets = CoinWalletRpc::new();
    for (token, rpc) in &config.wallets {
        let transport = JsonRpcTransport::new(
            &rpc.rpc_host,
            rpc.rpc_port,
            &rpc.rpc_user,
            &rpc.rpc_password,
            config.xbridge.rpc_timeout_secs,
        )?;
        wallets.register(token, Arc::new(transport));
    }
    if !config.strategy.dry_mode && wallets.registered_tokens().is_empty() {
        warn!("No wallet RPCs configured; swap legs will fail operationally");
    }

    let store = Arc::new(TradeStateStore::new(&config.persistence.state_dir)?);
    let shutdown = ShutdownCoordinator::new();

    let engine = Arc::new(ArbitrageEngine::new(
        config,
        dex,
        swap,
        prices,
        Arc::new(wallets),
        store,
        shutdown.clone(),
    ));

    // Interrupted trades must be resolved before the first tick
    engine.recover().await?;

    let loop_engine = engine.clone();
    let loop_handle = tokio::spawn(async move { loop_engine.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received; shutting down");
            shutdown.signal_stop();
        }
        _ = shutdown.wait() => {}
    }

    match loop_handle.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "Evaluation loop panicked"),
    }

    let trades = engine.status().await;
    info!(trades = trades.len(), "Engine stopped");
    Ok(())
}

fn show_status(config: ArbitrageConfig) -> Result<()> {
    let store = TradeStateStore::new(&config.persistence.state_dir)?;
    let trades = store.load_all()?;

    println!("Persisted trades: {}", trades.len());
    for trade in trades {
        println!(
            "  {} {} {} created {} legs {}",
            trade.id,
            trade.opportunity.pair_symbol,
            trade.status,
            trade.created_at.format("%Y-%m-%d %H:%M:%S"),
            trade
                .legs
                .iter()
                .map(|l| format!("{}:{}", l.venue, l.status))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }
}
