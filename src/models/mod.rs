use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OHLCV candlestick supplied by the price ingestion job.
///
/// Candle series handed to the engine are ordered ascending by time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: Interval,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle / evaluation interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Interval {
    M15,
    H1,
    H4,
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Interval> {
        match s {
            "15m" => Some(Interval::M15),
            "1h" => Some(Interval::H1),
            "4h" => Some(Interval::H4),
            "1d" => Some(Interval::D1),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Interval::M15 => Duration::minutes(15),
            Interval::H1 => Duration::hours(1),
            Interval::H4 => Duration::hours(4),
            Interval::D1 => Duration::days(1),
        }
    }
}

/// Bollinger band values for one evaluation. Derived, never persisted on
/// their own - trade and action rows carry a snapshot of these fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub price: f64,
}

/// How the per-tick base trade amount is derived for an account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum SizingMode {
    /// Fixed USD amount per evaluation
    Fixed { base_usd: f64 },
    /// Percentage of the current simulated balance, with a USD floor
    PercentOfBalance { percent: f64, floor_usd: f64 },
}

impl SizingMode {
    /// Base USD amount for one evaluation given the current balance
    pub fn base_amount(&self, balance_usd: f64) -> f64 {
        match *self {
            SizingMode::Fixed { base_usd } => base_usd,
            SizingMode::PercentOfBalance { percent, floor_usd } => {
                (balance_usd * percent / 100.0).max(floor_usd)
            }
        }
    }
}

/// Per-account simulation state. Created on first use, mutated only by the
/// orchestrator/ledger, persisted after every evaluated tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub id: Uuid,
    pub symbol: String,
    pub interval: Interval,
    pub is_running: bool,
    pub sizing: SizingMode,
    pub hold_zone_percent: f64,
    /// Interval bucket of the last committed evaluation (throttle marker)
    pub last_evaluated_bucket: Option<DateTime<Utc>>,
    pub balance_usd: f64,
    pub held_quantity: f64,
    /// Weighted average cost over currently open lots, 0 when none
    pub avg_cost_usd: f64,
    pub realized_profit_usd: f64,
    pub total_trades: i32,
    pub winning_trades: i32,
    /// Optimistic concurrency version, bumped on every persisted write
    pub version: i64,
}

impl AccountState {
    /// Fresh account with a simulated starting balance
    pub fn new(symbol: String, interval: Interval, sizing: SizingMode, balance_usd: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            interval,
            is_running: false,
            sizing,
            hold_zone_percent: 10.0,
            last_evaluated_bucket: None,
            balance_usd,
            held_quantity: 0.0,
            avg_cost_usd: 0.0,
            realized_profit_usd: 0.0,
            total_trades: 0,
            winning_trades: 0,
            version: 0,
        }
    }

    /// Win rate over completed trades, as a percentage
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LotStatus {
    Open,
    Closed,
}

/// FIFO purchase lot. Created by a BUY, consumed oldest-first by SELLs,
/// closed once remaining quantity reaches zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,
    pub account_id: Uuid,
    pub quantity: f64,
    pub unit_price_usd: f64,
    pub remaining_quantity: f64,
    pub status: LotStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Executed simulated trade, with the indicator snapshot at decision time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub side: TradeSide,
    pub quantity: f64,
    pub price_usd: f64,
    pub volume_usd: f64,
    pub band_upper: f64,
    pub band_middle: f64,
    pub band_lower: f64,
    pub distance_ratio: f64,
    pub multiplier: f64,
    pub status: TradeStatus,
    /// Cost basis per unit of the consumed lots (SELL only)
    pub cost_basis_usd: Option<f64>,
    /// Realized profit against that cost basis (SELL only)
    pub profit_usd: Option<f64>,
    pub executed_at: DateTime<Utc>,
}

/// Outcome kind of one evaluated tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ActionKind {
    Hold,
    Buy,
    Sell,
    InsufficientBalance,
    NoPosition,
    InsufficientData,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Hold => "HOLD",
            ActionKind::Buy => "BUY",
            ActionKind::Sell => "SELL",
            ActionKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ActionKind::NoPosition => "NO_POSITION",
            ActionKind::InsufficientData => "INSUFFICIENT_DATA",
        }
    }

    pub fn parse(s: &str) -> Option<ActionKind> {
        match s {
            "HOLD" => Some(ActionKind::Hold),
            "BUY" => Some(ActionKind::Buy),
            "SELL" => Some(ActionKind::Sell),
            "INSUFFICIENT_BALANCE" => Some(ActionKind::InsufficientBalance),
            "NO_POSITION" => Some(ActionKind::NoPosition),
            "INSUFFICIENT_DATA" => Some(ActionKind::InsufficientData),
            _ => None,
        }
    }
}

/// Audit log row written for every evaluated tick, trade or not.
/// Indicator fields are None when no bands could be computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: ActionKind,
    pub reason: String,
    pub price_usd: Option<f64>,
    pub band_upper: Option<f64>,
    pub band_middle: Option<f64>,
    pub band_lower: Option<f64>,
    pub distance_ratio: Option<f64>,
    pub multiplier: Option<f64>,
    pub volume_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Best-effort push notification payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}
