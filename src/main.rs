//! Position Sentinel - Main Entry Point
//!
//! Spawns one risk-supervision loop per configured symbol and runs until
//! shutdown. `status` takes a one-shot snapshot; `drill` rehearses the close
//! protocol against the in-process mock venue.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use position_sentinel::config::Config;
use position_sentinel::exchange::{
    BinanceClient, ExchangeGateway, MockGateway,
};
use position_sentinel::risk::{
    normalize, unrealized_return_pct, RiskPolicy, RiskSupervisor,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Position Sentinel CLI
#[derive(Parser)]
#[command(name = "position-sentinel")]
#[command(version, about = "Automated position risk supervision with kill-switch unwinding")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a one-shot snapshot of each supervised symbol and exit
    Status,

    /// Rehearse the close protocol against a simulated position
    Drill {
        /// Symbol for the simulated position
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Position size in contracts
        #[arg(long, default_value = "1")]
        size: Decimal,

        /// Average entry price
        #[arg(long, default_value = "100")]
        entry: Decimal,

        /// Current market price
        #[arg(long, default_value = "112")]
        price: Decimal,

        /// Simulate a short instead of a long
        #[arg(long)]
        short: bool,

        /// Leverage multiplier
        #[arg(long, default_value = "1")]
        leverage: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Status) => return show_status(&config).await,
        Some(Commands::Drill {
            symbol,
            size,
            entry,
            price,
            short,
            leverage,
        }) => {
            return run_drill(&config, &symbol, size, entry, price, short, leverage).await;
        }
        None => {}
    }

    info!(
        "Position Sentinel v{} - supervising {} symbol(s)",
        env!("CARGO_PKG_VERSION"),
        config.symbols.len()
    );
    log_config(&config);

    anyhow::ensure!(
        !config.gateway.api_key.is_empty() && !config.gateway.secret_key.is_empty(),
        "API credentials are required to supervise live positions"
    );

    let gateway: Arc<dyn ExchangeGateway> =
        Arc::new(BinanceClient::new(&config.gateway).context("Failed to create exchange client")?);
    let policy = RiskPolicy::from_config(&config);

    // Resolve every symbol against the venue before any loop starts; a typo
    // in the config must abort here, not spin inside the loop.
    let mut supervisors = Vec::new();
    for symbol in &config.symbols {
        let supervisor = RiskSupervisor::new(symbol, policy.clone(), gateway.clone());
        supervisor
            .preflight()
            .await
            .with_context(|| format!("Preflight failed for symbol {}", symbol))?;
        info!(%symbol, "Preflight ok");
        supervisors.push(supervisor);
    }

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    info!("Starting supervision loops...");

    let mut handles = Vec::new();
    for supervisor in supervisors {
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let symbol = supervisor.symbol().to_string();
            if let Err(e) = supervisor.run(shutdown).await {
                error!(%symbol, error = %e, "Supervisor exited with error");
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Supervisor task panicked");
        }
    }

    info!("Position Sentinel shutdown complete");
    Ok(())
}

/// Initialize logging with stdout and hourly rolling file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "position-sentinel.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("position_sentinel=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Log the active risk policy on startup.
fn log_config(config: &Config) {
    info!("Risk policy:");
    info!("   Symbols: {}", config.symbols.join(", "));
    info!("   Target: +{}%", config.risk.target_percent);
    info!("   Max loss: {}%", config.risk.max_loss_percent);
    info!("   Max notional: ${}", config.risk.max_notional);
    match config.risk.min_account_value {
        Some(floor) => info!("   Account floor: ${}", floor),
        None => info!("   Account floor: disabled"),
    }
    info!(
        "   Poll: {}s | Fill wait: {}s | Cooldown: {}s",
        config.timing.poll_interval_secs, config.timing.fill_wait_secs, config.timing.cooldown_secs
    );
    if config.risk.max_unwind_attempts == 0 {
        warn!("   Unwind attempts: unbounded");
    } else {
        info!("   Unwind attempts: {}", config.risk.max_unwind_attempts);
    }
}

/// One-shot snapshot of every supervised symbol.
async fn show_status(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.gateway.api_key.is_empty() && !config.gateway.secret_key.is_empty(),
        "API credentials are required for status"
    );

    let client = BinanceClient::new(&config.gateway)?;

    let balance = client.account_balance().await?;
    info!("Account balance: ${:.2}", balance);

    for symbol in &config.symbols {
        let position = normalize(symbol, client.position(symbol).await?);
        if position.is_flat() {
            info!(%symbol, "flat");
            continue;
        }

        let quote = client.best_bid_ask(symbol).await?;
        let percent = unrealized_return_pct(&position, quote.mid());
        let notional = client.position_notional(symbol).await?;

        info!(
            %symbol,
            side = %position.side,
            size = %position.size,
            entry = %position.entry_price,
            mark = %quote.mid(),
            return_pct = %percent.round_dp(4),
            notional = %notional,
            "Open position"
        );
    }

    Ok(())
}

/// Run one supervised tick against a seeded mock venue, end to end, using
/// the configured risk policy.
async fn run_drill(
    config: &Config,
    symbol: &str,
    size: Decimal,
    entry: Decimal,
    price: Decimal,
    short: bool,
    leverage: Decimal,
) -> Result<()> {
    let signed_size = if short { -size } else { size };

    let gateway = Arc::new(MockGateway::new());
    gateway.set_book(symbol, price, price).await;
    gateway
        .set_position(symbol, signed_size, entry, Some(leverage))
        .await;
    gateway.set_balance(dec!(10000)).await;

    let mut policy = RiskPolicy::from_config(config);
    policy.fill_wait = std::time::Duration::from_millis(100);

    info!(
        %symbol,
        side = if short { "short" } else { "long" },
        %size,
        %entry,
        %price,
        %leverage,
        "Drill: running one supervised tick against the mock venue"
    );

    let supervisor = RiskSupervisor::new(symbol, policy, gateway.clone());
    let action = supervisor.tick(&AtomicBool::new(false)).await?;

    info!(action = ?action, "Drill tick complete");
    for order in gateway.placed_orders().await {
        info!(
            symbol = %order.symbol,
            side = ?order.side,
            size = %order.size,
            price = %order.price,
            "Drill close order"
        );
    }
    info!(
        remaining = %gateway.position_qty(symbol).await,
        "Drill position after tick"
    );

    Ok(())
}
