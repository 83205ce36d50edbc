use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AccountState, Lot, LotStatus};

/// Result of a FIFO disposal
#[derive(Debug, Clone, Copy)]
pub struct SellOutcome {
    /// Quantity actually consumed (clamped to holdings)
    pub quantity: f64,
    /// Quantity-weighted cost per unit of the consumed lots
    pub cost_basis_usd: f64,
    /// (sell price - cost basis) * quantity
    pub profit_usd: f64,
    /// USD credited to the balance
    pub proceeds_usd: f64,
}

/// Result of a purchase
#[derive(Debug, Clone, Copy)]
pub struct BuyOutcome {
    pub lot_id: Uuid,
    pub quantity: f64,
}

/// FIFO lot book for one account.
///
/// Owns the account's open lots and keeps the aggregate fields on
/// `AccountState` (held quantity, weighted average cost, balance, profit,
/// trade counters) consistent with them. Lots are append-mostly: a SELL
/// decrements `remaining_quantity` oldest-first and closes a lot when it
/// reaches zero.
pub struct PositionLedger {
    lots: Vec<Lot>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self { lots: Vec::new() }
    }

    /// Restore from persisted lots. Sorted oldest-first so FIFO consumption
    /// walks them in purchase order.
    pub fn with_lots(mut lots: Vec<Lot>) -> Self {
        lots.sort_by_key(|lot| lot.created_at);
        Self { lots }
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    /// Total remaining quantity across open lots
    pub fn open_quantity(&self) -> f64 {
        self.lots
            .iter()
            .filter(|lot| lot.status == LotStatus::Open)
            .map(|lot| lot.remaining_quantity)
            .sum()
    }

    /// Apply a BUY: append a new open lot and debit the balance.
    ///
    /// The orchestrator checks the balance before calling; the error here is
    /// a guard against ledger corruption, not a policy outcome.
    pub fn apply_buy(
        &mut self,
        account: &mut AccountState,
        price_usd: f64,
        volume_usd: f64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<BuyOutcome> {
        if price_usd <= 0.0 {
            anyhow::bail!("Buy price must be positive, got {}", price_usd);
        }
        if account.balance_usd < volume_usd {
            anyhow::bail!(
                "Insufficient balance: {:.2} < {:.2}",
                account.balance_usd,
                volume_usd
            );
        }

        let quantity = volume_usd / price_usd;
        let lot = Lot {
            id: Uuid::new_v4(),
            account_id: account.id,
            quantity,
            unit_price_usd: price_usd,
            remaining_quantity: quantity,
            status: LotStatus::Open,
            created_at: at,
        };
        let lot_id = lot.id;
        self.lots.push(lot);

        account.balance_usd -= volume_usd;
        account.total_trades += 1;
        self.recompute_holdings(account);

        tracing::debug!(
            "Buy {:.8} {} @ ${:.2} (avg cost now ${:.2})",
            quantity,
            account.symbol,
            price_usd,
            account.avg_cost_usd
        );

        Ok(BuyOutcome { lot_id, quantity })
    }

    /// Apply a SELL: consume open lots oldest-first and credit the balance.
    ///
    /// The desired quantity is `volume_usd / price_usd` clamped to the held
    /// quantity. Errors when nothing is held - the orchestrator records a
    /// NO_POSITION outcome instead of calling this.
    pub fn apply_sell(
        &mut self,
        account: &mut AccountState,
        price_usd: f64,
        volume_usd: f64,
    ) -> anyhow::Result<SellOutcome> {
        if price_usd <= 0.0 {
            anyhow::bail!("Sell price must be positive, got {}", price_usd);
        }

        let held = self.open_quantity();
        if held <= 0.0 {
            anyhow::bail!("No open position to sell");
        }

        let desired_quantity = (volume_usd / price_usd).min(held);

        let mut remaining_to_consume = desired_quantity;
        let mut consumed_quantity = 0.0;
        let mut consumed_cost = 0.0;

        for lot in self.lots.iter_mut().filter(|l| l.status == LotStatus::Open) {
            if remaining_to_consume <= 0.0 {
                break;
            }

            let take = lot.remaining_quantity.min(remaining_to_consume);
            consumed_quantity += take;
            consumed_cost += take * lot.unit_price_usd;
            remaining_to_consume -= take;

            if take >= lot.remaining_quantity {
                lot.remaining_quantity = 0.0;
                lot.status = LotStatus::Closed;
            } else {
                lot.remaining_quantity -= take;
            }
        }

        let cost_basis_usd = consumed_cost / consumed_quantity;
        let profit_usd = (price_usd - cost_basis_usd) * consumed_quantity;
        let proceeds_usd = price_usd * consumed_quantity;

        account.balance_usd += proceeds_usd;
        account.realized_profit_usd += profit_usd;
        account.total_trades += 1;
        if profit_usd > 0.0 {
            account.winning_trades += 1;
        }
        self.recompute_holdings(account);

        tracing::debug!(
            "Sell {:.8} {} @ ${:.2} (basis ${:.2}, profit ${:.2})",
            consumed_quantity,
            account.symbol,
            price_usd,
            cost_basis_usd,
            profit_usd
        );

        Ok(SellOutcome {
            quantity: consumed_quantity,
            cost_basis_usd,
            profit_usd,
            proceeds_usd,
        })
    }

    /// Recompute held quantity and weighted average cost from open lots.
    /// Average cost is 0 once nothing remains open.
    fn recompute_holdings(&self, account: &mut AccountState) {
        let mut quantity = 0.0;
        let mut cost = 0.0;

        for lot in self.lots.iter().filter(|l| l.status == LotStatus::Open) {
            quantity += lot.remaining_quantity;
            cost += lot.remaining_quantity * lot.unit_price_usd;
        }

        account.held_quantity = quantity;
        account.avg_cost_usd = if quantity > 0.0 { cost / quantity } else { 0.0 };
    }
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self::new()
    }
}
