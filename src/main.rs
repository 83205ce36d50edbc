use chrono::{Timelike, Utc};
use clap::{Parser, Subcommand};
use tokio::time::{interval_at, Duration, Instant};
use uuid::Uuid;

use paperbot::db::PostgresStore;
use paperbot::models::{AccountState, Interval, SizingMode};
use paperbot::notify::WebhookNotifier;
use paperbot::sim::{EngineParams, Simulator};
use paperbot::Result;

#[derive(Parser)]
#[command(name = "paperbot", about = "Simulated trading strategy engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one simulation batch over all running accounts
    Tick,
    /// Run batches continuously, aligned to minute boundaries
    Run,
    /// Manage simulation accounts
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Create a new simulation account
    Create {
        /// Trading pair, e.g. BTC-USDT
        #[arg(long)]
        symbol: String,
        /// Evaluation interval: 15m, 1h, 4h or 1d
        #[arg(long, default_value = "1h")]
        interval: String,
        /// Starting simulated balance in USD
        #[arg(long, default_value_t = 10000.0)]
        balance: f64,
        /// Fixed base trade amount in USD
        #[arg(long, default_value_t = 6.0)]
        base: f64,
        /// Size trades as this percent of the balance instead of a fixed base
        #[arg(long)]
        percent: Option<f64>,
        /// Floor in USD for percent sizing
        #[arg(long, default_value_t = 5.0)]
        floor: f64,
        /// Neutral zone half-width, percent of the band half-width
        #[arg(long, default_value_t = 10.0)]
        hold_zone: f64,
        /// Start the account immediately
        #[arg(long)]
        start: bool,
    },
    /// Set the running flag
    Start { id: Uuid },
    /// Clear the running flag
    Stop { id: Uuid },
    /// Print an account's current state
    Show { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let store = PostgresStore::new(&get_database_url()).await?;

    match cli.command {
        Command::Tick => {
            let simulator = Simulator::new(store, WebhookNotifier::from_env(), get_engine_params());
            simulator.run_batch(Utc::now()).await?;
        }
        Command::Run => {
            let simulator = Simulator::new(store, WebhookNotifier::from_env(), get_engine_params());
            run_loop(simulator).await;
        }
        Command::Account { command } => {
            handle_account_command(&store, command).await?;
        }
    }

    Ok(())
}

/// Poll loop: first batch at the next minute boundary, then every
/// POLL_INTERVAL_SECS. The per-account throttle turns redundant polls into
/// no-ops, so polling faster than the account intervals is harmless.
async fn run_loop(simulator: Simulator) {
    let poll_secs = get_poll_interval_secs();

    tracing::info!("🚀 paperbot running - polling every {}s", poll_secs);

    let mut ticker = interval_at(next_minute_boundary(), Duration::from_secs(poll_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = simulator.run_batch(Utc::now()).await {
                    tracing::error!("Batch failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    tracing::info!("👋 paperbot stopped");
}

async fn handle_account_command(store: &PostgresStore, command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Create {
            symbol,
            interval,
            balance,
            base,
            percent,
            floor,
            hold_zone,
            start,
        } => {
            let interval = Interval::parse(&interval)
                .ok_or_else(|| format!("Unknown interval: {}", interval))?;

            let sizing = match percent {
                Some(percent) => SizingMode::PercentOfBalance {
                    percent,
                    floor_usd: floor,
                },
                None => SizingMode::Fixed { base_usd: base },
            };

            let mut account = AccountState::new(symbol, interval, sizing, balance);
            account.hold_zone_percent = hold_zone;
            account.is_running = start;

            store.insert_account(&account).await?;
            println!("Created account {}", account.id);
        }
        AccountCommand::Start { id } => {
            store.set_running(id, true).await?;
            println!("Account {} started", id);
        }
        AccountCommand::Stop { id } => {
            store.set_running(id, false).await?;
            println!("Account {} stopped", id);
        }
        AccountCommand::Show { id } => {
            let account = store.load_account(id).await?;
            println!("Account {}", account.id);
            println!("  Symbol:        {} ({})", account.symbol, account.interval.as_str());
            println!("  Running:       {}", account.is_running);
            println!("  Balance:       ${:.2}", account.balance_usd);
            println!("  Held:          {:.8}", account.held_quantity);
            println!("  Avg cost:      ${:.2}", account.avg_cost_usd);
            println!("  Realized P&L:  ${:.2}", account.realized_profit_usd);
            println!(
                "  Trades:        {} ({} winning, {:.1}% win rate)",
                account.total_trades,
                account.winning_trades,
                account.win_rate()
            );
        }
    }

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paperbot=info".into()),
        )
        .init();
}

fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/paperbot".to_string())
}

fn get_poll_interval_secs() -> u64 {
    std::env::var("POLL_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60)
}

fn get_engine_params() -> EngineParams {
    let defaults = EngineParams::default();
    EngineParams {
        period: std::env::var("BB_PERIOD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.period),
        band_multiplier: std::env::var("BB_MULTIPLIER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.band_multiplier),
    }
}

/// When the next wall-clock minute starts (XX:XX:00)
fn next_minute_boundary() -> Instant {
    let now = Utc::now();
    let seconds_until_next = 60 - now.second().min(59);
    Instant::now() + Duration::from_secs(seconds_until_next as u64)
}
