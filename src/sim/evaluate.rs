use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::indicators::{calculate_bands, DEFAULT_MULTIPLIER, DEFAULT_PERIOD};
use crate::ledger::PositionLedger;
use crate::models::{
    AccountState, ActionKind, ActionLogEntry, Bands, Candle, Notification, TradeRecord, TradeSide,
    TradeStatus,
};
use crate::strategy::{SignalAction, SignalStrategy, StrategyInputs, TradeSignal};
use crate::throttle;

/// Indicator parameters shared by every account in a batch
#[derive(Debug, Clone, Copy)]
pub struct EngineParams {
    pub period: usize,
    pub band_multiplier: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            band_multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

/// Result of one account tick
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Already evaluated in this bucket - nothing was changed or written
    Skipped,
    /// Evaluated: one log entry, maybe a trade, maybe a notification
    Evaluated(EvaluationRecord),
}

/// Everything an evaluated tick produced. The caller persists the log
/// entry, the trade (with the ledger's lots) and the updated account in one
/// transaction, then delivers the notification best-effort.
#[derive(Debug, Clone)]
pub struct EvaluationRecord {
    pub log: ActionLogEntry,
    pub trade: Option<TradeRecord>,
    pub notification: Option<Notification>,
}

impl EvaluationRecord {
    pub fn kind(&self) -> ActionKind {
        self.log.kind
    }
}

/// Evaluate one account against the latest candles.
///
/// Pure with respect to I/O: mutates only the passed-in account and ledger,
/// and reports what should be persisted. The throttle marker advances on
/// every evaluated outcome, HOLD and INSUFFICIENT_DATA included, so each
/// account commits at most one outcome per interval bucket.
pub fn evaluate_tick(
    account: &mut AccountState,
    ledger: &mut PositionLedger,
    candles: &[Candle],
    strategy: &dyn SignalStrategy,
    params: &EngineParams,
    now: DateTime<Utc>,
) -> TickOutcome {
    if throttle::already_evaluated(account, now) {
        tracing::debug!(
            "Account {} already evaluated in bucket {:?}, skipping",
            account.id,
            account.last_evaluated_bucket
        );
        return TickOutcome::Skipped;
    }
    throttle::mark_evaluated(account, now);

    // Need a full indicator window plus the current price
    let required = params.period + 1;
    if candles.len() < required {
        let reason = format!(
            "Insufficient price data: {} candles, need {}",
            candles.len(),
            required
        );
        tracing::warn!("Account {}: {}", account.id, reason);
        let log = data_log_entry(account, candles.last().map(|c| c.close), reason, now);
        return TickOutcome::Evaluated(EvaluationRecord {
            log,
            trade: None,
            notification: None,
        });
    }

    let prices: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let bands = calculate_bands(&prices, params.period, params.band_multiplier);

    let inputs = StrategyInputs {
        base_usd: account.sizing.base_amount(account.balance_usd),
        hold_zone_percent: account.hold_zone_percent,
    };
    let signal = strategy.evaluate(&bands, &inputs);

    match signal.action {
        SignalAction::Hold => {
            let log = signal_log_entry(account, &bands, &signal, ActionKind::Hold, now);
            TickOutcome::Evaluated(EvaluationRecord {
                log,
                trade: None,
                notification: None,
            })
        }
        SignalAction::Buy => execute_buy(account, ledger, &bands, &signal, now),
        SignalAction::Sell => execute_sell(account, ledger, &bands, &signal, now),
    }
}

fn execute_buy(
    account: &mut AccountState,
    ledger: &mut PositionLedger,
    bands: &Bands,
    signal: &TradeSignal,
    now: DateTime<Utc>,
) -> TickOutcome {
    if account.balance_usd < signal.volume_usd {
        let reason = format!(
            "Insufficient balance: {:.2} < {:.2}",
            account.balance_usd, signal.volume_usd
        );
        tracing::info!("Account {}: {}", account.id, reason);
        let mut log = signal_log_entry(account, bands, signal, ActionKind::InsufficientBalance, now);
        log.reason = reason;
        return TickOutcome::Evaluated(EvaluationRecord {
            log,
            trade: None,
            notification: None,
        });
    }

    let outcome = match ledger.apply_buy(account, bands.price, signal.volume_usd, now) {
        Ok(outcome) => outcome,
        Err(e) => {
            // Balance was checked above; a failure here means the ledger
            // rejected the trade and the tick degrades to a logged hold
            tracing::error!("Account {}: buy rejected: {}", account.id, e);
            let mut log = signal_log_entry(account, bands, signal, ActionKind::Hold, now);
            log.reason = e.to_string();
            return TickOutcome::Evaluated(EvaluationRecord {
                log,
                trade: None,
                notification: None,
            });
        }
    };

    let trade = TradeRecord {
        id: Uuid::new_v4(),
        account_id: account.id,
        side: TradeSide::Buy,
        quantity: outcome.quantity,
        price_usd: bands.price,
        volume_usd: signal.volume_usd,
        band_upper: bands.upper,
        band_middle: bands.middle,
        band_lower: bands.lower,
        distance_ratio: signal.distance_ratio,
        multiplier: signal.multiplier,
        status: TradeStatus::Open,
        cost_basis_usd: None,
        profit_usd: None,
        executed_at: now,
    };

    let notification = Notification {
        title: format!("Simulated BUY: {}", account.symbol),
        body: format!(
            "Bought {:.8} {} for ${:.2} @ ${:.2}. {}",
            outcome.quantity, account.symbol, signal.volume_usd, bands.price, signal.reason
        ),
    };

    let log = signal_log_entry(account, bands, signal, ActionKind::Buy, now);
    TickOutcome::Evaluated(EvaluationRecord {
        log,
        trade: Some(trade),
        notification: Some(notification),
    })
}

fn execute_sell(
    account: &mut AccountState,
    ledger: &mut PositionLedger,
    bands: &Bands,
    signal: &TradeSignal,
    now: DateTime<Utc>,
) -> TickOutcome {
    if account.held_quantity <= 0.0 {
        tracing::info!("Account {}: sell signal with no position", account.id);
        let mut log = signal_log_entry(account, bands, signal, ActionKind::NoPosition, now);
        log.reason = "No position to sell".to_string();
        return TickOutcome::Evaluated(EvaluationRecord {
            log,
            trade: None,
            notification: None,
        });
    }

    let outcome = match ledger.apply_sell(account, bands.price, signal.volume_usd) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Account {}: sell rejected: {}", account.id, e);
            let mut log = signal_log_entry(account, bands, signal, ActionKind::NoPosition, now);
            log.reason = e.to_string();
            return TickOutcome::Evaluated(EvaluationRecord {
                log,
                trade: None,
                notification: None,
            });
        }
    };

    let trade = TradeRecord {
        id: Uuid::new_v4(),
        account_id: account.id,
        side: TradeSide::Sell,
        quantity: outcome.quantity,
        price_usd: bands.price,
        // Notional of what was actually consumed, which may be below the
        // signal volume when holdings ran short
        volume_usd: outcome.proceeds_usd,
        band_upper: bands.upper,
        band_middle: bands.middle,
        band_lower: bands.lower,
        distance_ratio: signal.distance_ratio,
        multiplier: signal.multiplier,
        status: TradeStatus::Closed,
        cost_basis_usd: Some(outcome.cost_basis_usd),
        profit_usd: Some(outcome.profit_usd),
        executed_at: now,
    };

    let notification = Notification {
        title: format!("Simulated SELL: {}", account.symbol),
        body: format!(
            "Sold {:.8} {} for ${:.2} @ ${:.2} (profit ${:.2}). {}",
            outcome.quantity,
            account.symbol,
            outcome.proceeds_usd,
            bands.price,
            outcome.profit_usd,
            signal.reason
        ),
    };

    let log = signal_log_entry(account, bands, signal, ActionKind::Sell, now);
    TickOutcome::Evaluated(EvaluationRecord {
        log,
        trade: Some(trade),
        notification: Some(notification),
    })
}

/// Log entry for an evaluation that produced bands and a signal
fn signal_log_entry(
    account: &AccountState,
    bands: &Bands,
    signal: &TradeSignal,
    kind: ActionKind,
    now: DateTime<Utc>,
) -> ActionLogEntry {
    ActionLogEntry {
        id: Uuid::new_v4(),
        account_id: account.id,
        kind,
        reason: signal.reason.clone(),
        price_usd: Some(bands.price),
        band_upper: Some(bands.upper),
        band_middle: Some(bands.middle),
        band_lower: Some(bands.lower),
        distance_ratio: Some(signal.distance_ratio),
        multiplier: Some(signal.multiplier),
        volume_usd: Some(signal.volume_usd),
        created_at: now,
    }
}

/// Log entry for a tick that never got as far as computing bands
fn data_log_entry(
    account: &AccountState,
    price: Option<f64>,
    reason: String,
    now: DateTime<Utc>,
) -> ActionLogEntry {
    ActionLogEntry {
        id: Uuid::new_v4(),
        account_id: account.id,
        kind: ActionKind::InsufficientData,
        reason,
        price_usd: price,
        band_upper: None,
        band_middle: None,
        band_lower: None,
        distance_ratio: None,
        multiplier: None,
        volume_usd: None,
        created_at: now,
    }
}
