use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::PostgresStore;
use crate::ledger::PositionLedger;
use crate::models::{AccountState, ActionKind};
use crate::notify::WebhookNotifier;
use crate::sim::evaluate::{evaluate_tick, EngineParams, TickOutcome};
use crate::strategy::{BandDistanceStrategy, SignalStrategy};
use crate::Result;

/// How one account's tick ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickDisposition {
    /// Already evaluated in the current bucket
    Throttled,
    /// Evaluated with this committed outcome
    Evaluated(ActionKind),
}

/// Summary of one batch over all running accounts
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<(Uuid, TickDisposition)>,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn processed(&self) -> usize {
        self.results.len()
    }

    fn count(&self, wanted: TickDisposition) -> usize {
        self.results.iter().filter(|(_, d)| *d == wanted).count()
    }
}

/// Batch orchestrator: drives every running account through one tick.
///
/// Stateless between invocations - all state lives in the store. Account
/// failures (missing data is not a failure; store or conflict errors are)
/// are logged and isolated so the rest of the batch continues.
pub struct Simulator {
    store: PostgresStore,
    notifier: Option<WebhookNotifier>,
    strategy: Box<dyn SignalStrategy>,
    params: EngineParams,
}

impl Simulator {
    pub fn new(store: PostgresStore, notifier: Option<WebhookNotifier>, params: EngineParams) -> Self {
        Self {
            store,
            notifier,
            strategy: Box::new(BandDistanceStrategy::new()),
            params,
        }
    }

    /// Swap the signal strategy (defaults to band distance)
    pub fn with_strategy(mut self, strategy: Box<dyn SignalStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Run one batch at the given wall-clock time
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchOutcome> {
        let accounts = self.store.load_running_accounts().await?;

        if accounts.is_empty() {
            tracing::info!("No running accounts, nothing to do");
            return Ok(BatchOutcome::default());
        }

        tracing::info!("Starting batch for {} running account(s)", accounts.len());

        let mut outcome = BatchOutcome::default();

        for mut account in accounts {
            let account_id = account.id;
            match self.tick_account(&mut account, now).await {
                Ok(disposition) => {
                    outcome.results.push((account_id, disposition));
                }
                Err(e) => {
                    // One account must never take the batch down
                    tracing::error!("Account {} tick failed: {}", account_id, e);
                    outcome.failed += 1;
                }
            }
        }

        tracing::info!(
            "✅ Batch complete: {} evaluated, {} throttled, {} failed",
            outcome.processed() - outcome.count(TickDisposition::Throttled),
            outcome.count(TickDisposition::Throttled),
            outcome.failed
        );

        Ok(outcome)
    }

    async fn tick_account(
        &self,
        account: &mut AccountState,
        now: DateTime<Utc>,
    ) -> Result<TickDisposition> {
        // period + a few spare candles, the window the indicator needs
        let limit = (self.params.period + 5) as i64;
        let candles = self
            .store
            .load_recent_candles(&account.symbol, account.interval, limit)
            .await?;

        let open_lots = self.store.load_open_lots(account.id).await?;
        let mut ledger = PositionLedger::with_lots(open_lots);

        let outcome = evaluate_tick(
            account,
            &mut ledger,
            &candles,
            self.strategy.as_ref(),
            &self.params,
            now,
        );

        let record = match outcome {
            TickOutcome::Skipped => return Ok(TickDisposition::Throttled),
            TickOutcome::Evaluated(record) => record,
        };

        self.store
            .commit_evaluation(account, ledger.lots(), &record)
            .await?;

        let kind = record.kind();
        tracing::info!(
            "Account {} [{}]: {} - {}",
            account.id,
            account.symbol,
            kind.as_str(),
            record.log.reason
        );

        // Best-effort, after the ledger is safely committed
        if let (Some(notifier), Some(notification)) = (&self.notifier, &record.notification) {
            notifier.send(notification).await;
        }

        Ok(TickDisposition::Evaluated(kind))
    }
}
