use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AccountState, ActionLogEntry, Candle, Interval, Lot, LotStatus, SizingMode, TradeRecord,
    TradeSide, TradeStatus,
};
use crate::sim::EvaluationRecord;

/// Persistence errors. Policy outcomes (hold, insufficient balance, ...)
/// are ActionKind values, never errors; this covers the store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("account {account_id} not found")]
    NotFound { account_id: Uuid },
    #[error("account {account_id} was modified concurrently")]
    VersionConflict { account_id: Uuid },
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

type Result<T> = std::result::Result<T, StoreError>;

/// Postgres store for accounts, lots, trades, actions and candle history
pub struct PostgresStore {
    pool: PgPool,
}

/// NUMERIC columns come back as Decimal; the engine works in f64
fn numeric(row: &sqlx::postgres::PgRow, column: &str) -> Result<f64> {
    let value: rust_decimal::Decimal = row.get(column);
    value
        .to_string()
        .parse()
        .map_err(|e| StoreError::InvalidRow(format!("{}: {}", column, e)))
}

fn optional_numeric(row: &sqlx::postgres::PgRow, column: &str) -> Result<Option<f64>> {
    let value: Option<rust_decimal::Decimal> = row.get(column);
    value
        .map(|v| {
            v.to_string()
                .parse()
                .map_err(|e| StoreError::InvalidRow(format!("{}: {}", column, e)))
        })
        .transpose()
}

impl PostgresStore {
    /// Connect to Postgres and run pending migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    /// Insert a freshly created account
    pub async fn insert_account(&self, account: &AccountState) -> Result<()> {
        let (sizing_mode, base_trade_usd, trade_percent, trade_min_usd) = match account.sizing {
            SizingMode::Fixed { base_usd } => ("fixed", Some(base_usd), None, None),
            SizingMode::PercentOfBalance { percent, floor_usd } => {
                ("percent", None, Some(percent), Some(floor_usd))
            }
        };

        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, symbol, interval, is_running,
                sizing_mode, base_trade_usd, trade_percent, trade_min_usd,
                hold_zone_percent, last_evaluated_bucket,
                balance_usd, held_quantity, avg_cost_usd, realized_profit_usd,
                total_trades, winning_trades, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(account.id)
        .bind(&account.symbol)
        .bind(account.interval.as_str())
        .bind(account.is_running)
        .bind(sizing_mode)
        .bind(base_trade_usd)
        .bind(trade_percent)
        .bind(trade_min_usd)
        .bind(account.hold_zone_percent)
        .bind(account.last_evaluated_bucket)
        .bind(account.balance_usd)
        .bind(account.held_quantity)
        .bind(account.avg_cost_usd)
        .bind(account.realized_profit_usd)
        .bind(account.total_trades)
        .bind(account.winning_trades)
        .bind(account.version)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Created account {} ({} {})",
            account.id,
            account.symbol,
            account.interval.as_str()
        );

        Ok(())
    }

    /// Load one account by id
    pub async fn load_account(&self, account_id: Uuid) -> Result<AccountState> {
        let row = sqlx::query(ACCOUNT_SELECT)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { account_id })?;

        account_from_row(&row)
    }

    /// Load every account with the running flag set
    pub async fn load_running_accounts(&self) -> Result<Vec<AccountState>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, interval, is_running,
                   sizing_mode, base_trade_usd, trade_percent, trade_min_usd,
                   hold_zone_percent, last_evaluated_bucket,
                   balance_usd, held_quantity, avg_cost_usd, realized_profit_usd,
                   total_trades, winning_trades, version
            FROM accounts
            WHERE is_running = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(account_from_row(&row)?);
        }

        tracing::debug!("Loaded {} running accounts", accounts.len());

        Ok(accounts)
    }

    /// Toggle the running flag (the external start/stop control)
    pub async fn set_running(&self, account_id: Uuid, running: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE accounts SET is_running = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(account_id)
        .bind(running)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { account_id });
        }

        Ok(())
    }

    /// Most recent candles for a symbol/interval, ascending by time.
    ///
    /// Fetched newest-first with a limit, then reversed to chronological
    /// order for the indicator window.
    pub async fn load_recent_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: i64,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, interval, candle_time,
                   open_price, high_price, low_price, close_price, volume
            FROM price_history
            WHERE symbol = $1 AND interval = $2
            ORDER BY candle_time DESC
            LIMIT $3
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut candles = Vec::new();
        for row in rows.iter().rev() {
            candles.push(Candle {
                symbol: row.get("symbol"),
                interval,
                timestamp: row.get("candle_time"),
                open: numeric(row, "open_price")?,
                high: numeric(row, "high_price")?,
                low: numeric(row, "low_price")?,
                close: numeric(row, "close_price")?,
                volume: numeric(row, "volume")?,
            });
        }

        Ok(candles)
    }

    /// Open lots for an account, oldest first (FIFO order)
    pub async fn load_open_lots(&self, account_id: Uuid) -> Result<Vec<Lot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, quantity, unit_price_usd, remaining_quantity,
                   status, created_at
            FROM lots
            WHERE account_id = $1 AND status = 'Open'
            ORDER BY created_at ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut lots = Vec::new();
        for row in rows {
            let status_str: String = row.get("status");
            let status = match status_str.as_str() {
                "Open" => LotStatus::Open,
                "Closed" => LotStatus::Closed,
                other => {
                    return Err(StoreError::InvalidRow(format!("lot status {}", other)));
                }
            };

            lots.push(Lot {
                id: row.get("id"),
                account_id: row.get("account_id"),
                quantity: numeric(&row, "quantity")?,
                unit_price_usd: numeric(&row, "unit_price_usd")?,
                remaining_quantity: numeric(&row, "remaining_quantity")?,
                status,
                created_at: row.get("created_at"),
            });
        }

        Ok(lots)
    }

    /// Trade history for an account, newest first
    pub async fn load_trades(&self, account_id: Uuid, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, side, quantity, price_usd, volume_usd,
                   band_upper, band_middle, band_lower, distance_ratio, multiplier,
                   status, cost_basis_usd, profit_usd, executed_at
            FROM trades
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::new();
        for row in rows {
            let side_str: String = row.get("side");
            let side = match side_str.as_str() {
                "BUY" => TradeSide::Buy,
                "SELL" => TradeSide::Sell,
                other => return Err(StoreError::InvalidRow(format!("trade side {}", other))),
            };
            let status_str: String = row.get("status");
            let status = match status_str.as_str() {
                "Open" => TradeStatus::Open,
                "Closed" => TradeStatus::Closed,
                other => return Err(StoreError::InvalidRow(format!("trade status {}", other))),
            };

            trades.push(TradeRecord {
                id: row.get("id"),
                account_id: row.get("account_id"),
                side,
                quantity: numeric(&row, "quantity")?,
                price_usd: numeric(&row, "price_usd")?,
                volume_usd: numeric(&row, "volume_usd")?,
                band_upper: numeric(&row, "band_upper")?,
                band_middle: numeric(&row, "band_middle")?,
                band_lower: numeric(&row, "band_lower")?,
                distance_ratio: numeric(&row, "distance_ratio")?,
                multiplier: numeric(&row, "multiplier")?,
                status,
                cost_basis_usd: optional_numeric(&row, "cost_basis_usd")?,
                profit_usd: optional_numeric(&row, "profit_usd")?,
                executed_at: row.get("executed_at"),
            });
        }

        Ok(trades)
    }

    /// Persist one evaluated tick atomically: the action log entry, the
    /// trade if one executed, the touched lots, and the updated account.
    ///
    /// The account update is guarded by its version; losing the race to a
    /// concurrent batch aborts the whole transaction with
    /// [`StoreError::VersionConflict`] so no partial outcome is committed.
    pub async fn commit_evaluation(
        &self,
        account: &AccountState,
        lots: &[Lot],
        record: &EvaluationRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_action(&mut tx, &record.log).await?;

        if let Some(trade) = &record.trade {
            insert_trade(&mut tx, trade).await?;
            for lot in lots {
                upsert_lot(&mut tx, lot).await?;
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                last_evaluated_bucket = $3,
                balance_usd = $4,
                held_quantity = $5,
                avg_cost_usd = $6,
                realized_profit_usd = $7,
                total_trades = $8,
                winning_trades = $9,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(account.id)
        .bind(account.version)
        .bind(account.last_evaluated_bucket)
        .bind(account.balance_usd)
        .bind(account.held_quantity)
        .bind(account.avg_cost_usd)
        .bind(account.realized_profit_usd)
        .bind(account.total_trades)
        .bind(account.winning_trades)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict {
                account_id: account.id,
            });
        }

        tx.commit().await?;

        tracing::debug!(
            "Committed {} outcome for account {}",
            record.log.kind.as_str(),
            account.id
        );

        Ok(())
    }
}

const ACCOUNT_SELECT: &str = r#"
    SELECT id, symbol, interval, is_running,
           sizing_mode, base_trade_usd, trade_percent, trade_min_usd,
           hold_zone_percent, last_evaluated_bucket,
           balance_usd, held_quantity, avg_cost_usd, realized_profit_usd,
           total_trades, winning_trades, version
    FROM accounts
    WHERE id = $1
"#;

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<AccountState> {
    let interval_str: String = row.get("interval");
    let interval = Interval::parse(&interval_str)
        .ok_or_else(|| StoreError::InvalidRow(format!("interval {}", interval_str)))?;

    let sizing_mode: String = row.get("sizing_mode");
    let sizing = match sizing_mode.as_str() {
        "fixed" => SizingMode::Fixed {
            base_usd: optional_numeric(row, "base_trade_usd")?.unwrap_or(6.0),
        },
        "percent" => SizingMode::PercentOfBalance {
            percent: optional_numeric(row, "trade_percent")?.unwrap_or(1.0),
            floor_usd: optional_numeric(row, "trade_min_usd")?.unwrap_or(5.0),
        },
        other => {
            return Err(StoreError::InvalidRow(format!("sizing mode {}", other)));
        }
    };

    Ok(AccountState {
        id: row.get("id"),
        symbol: row.get("symbol"),
        interval,
        is_running: row.get("is_running"),
        sizing,
        hold_zone_percent: numeric(row, "hold_zone_percent")?,
        last_evaluated_bucket: row.get("last_evaluated_bucket"),
        balance_usd: numeric(row, "balance_usd")?,
        held_quantity: numeric(row, "held_quantity")?,
        avg_cost_usd: numeric(row, "avg_cost_usd")?,
        realized_profit_usd: numeric(row, "realized_profit_usd")?,
        total_trades: row.get("total_trades"),
        winning_trades: row.get("winning_trades"),
        version: row.get("version"),
    })
}

async fn insert_action(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    log: &ActionLogEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO actions (
            id, account_id, kind, reason, price_usd,
            band_upper, band_middle, band_lower,
            distance_ratio, multiplier, volume_usd, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(log.id)
    .bind(log.account_id)
    .bind(log.kind.as_str())
    .bind(&log.reason)
    .bind(log.price_usd)
    .bind(log.band_upper)
    .bind(log.band_middle)
    .bind(log.band_lower)
    .bind(log.distance_ratio)
    .bind(log.multiplier)
    .bind(log.volume_usd)
    .bind(log.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_trade(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    trade: &TradeRecord,
) -> Result<()> {
    let side = match trade.side {
        TradeSide::Buy => "BUY",
        TradeSide::Sell => "SELL",
    };
    let status = match trade.status {
        TradeStatus::Open => "Open",
        TradeStatus::Closed => "Closed",
    };

    sqlx::query(
        r#"
        INSERT INTO trades (
            id, account_id, side, quantity, price_usd, volume_usd,
            band_upper, band_middle, band_lower, distance_ratio, multiplier,
            status, cost_basis_usd, profit_usd, executed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(trade.id)
    .bind(trade.account_id)
    .bind(side)
    .bind(trade.quantity)
    .bind(trade.price_usd)
    .bind(trade.volume_usd)
    .bind(trade.band_upper)
    .bind(trade.band_middle)
    .bind(trade.band_lower)
    .bind(trade.distance_ratio)
    .bind(trade.multiplier)
    .bind(status)
    .bind(trade.cost_basis_usd)
    .bind(trade.profit_usd)
    .bind(trade.executed_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn upsert_lot(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    lot: &Lot,
) -> Result<()> {
    let status = match lot.status {
        LotStatus::Open => "Open",
        LotStatus::Closed => "Closed",
    };

    sqlx::query(
        r#"
        INSERT INTO lots (
            id, account_id, quantity, unit_price_usd, remaining_quantity,
            status, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            remaining_quantity = EXCLUDED.remaining_quantity,
            status = EXCLUDED.status,
            updated_at = NOW()
        "#,
    )
    .bind(lot.id)
    .bind(lot.account_id)
    .bind(lot.quantity)
    .bind(lot.unit_price_usd)
    .bind(lot.remaining_quantity)
    .bind(status)
    .bind(lot.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, Notification};
    use crate::sim::EvaluationRecord;
    use chrono::{DateTime, Utc};

    async fn get_test_db() -> PostgresStore {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/paperbot_test".to_string());

        PostgresStore::new(&database_url)
            .await
            .expect("Failed to connect to test database")
    }

    fn test_account() -> AccountState {
        let mut account = AccountState::new(
            "BTC-USDT".to_string(),
            Interval::H1,
            SizingMode::Fixed { base_usd: 6.0 },
            10000.0,
        );
        account.is_running = true;
        account
    }

    fn hold_record(account: &AccountState) -> EvaluationRecord {
        EvaluationRecord {
            log: ActionLogEntry {
                id: Uuid::new_v4(),
                account_id: account.id,
                kind: ActionKind::Hold,
                reason: "Price in neutral zone (±10% from MA)".to_string(),
                price_usd: Some(100.0),
                band_upper: Some(104.0),
                band_middle: Some(100.0),
                band_lower: Some(96.0),
                distance_ratio: Some(0.0),
                multiplier: Some(1.0),
                volume_usd: Some(0.0),
                created_at: Utc::now(),
            },
            trade: None,
            notification: None,
        }
    }

    async fn clear_account(db: &PostgresStore, account_id: Uuid) {
        for table in ["actions", "trades", "lots"] {
            sqlx::query(&format!("DELETE FROM {} WHERE account_id = $1", table))
                .bind(account_id)
                .execute(&db.pool)
                .await
                .unwrap();
        }
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(account_id)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_insert_and_load_account() {
        let db = get_test_db().await;
        let account = test_account();

        db.insert_account(&account).await.unwrap();

        let loaded = db.load_account(account.id).await.unwrap();
        assert_eq!(loaded.symbol, "BTC-USDT");
        assert_eq!(loaded.interval, Interval::H1);
        assert_eq!(loaded.sizing, SizingMode::Fixed { base_usd: 6.0 });
        assert_eq!(loaded.balance_usd, 10000.0);
        assert_eq!(loaded.version, 0);

        let running = db.load_running_accounts().await.unwrap();
        assert!(running.iter().any(|a| a.id == account.id));

        clear_account(&db, account.id).await;
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_set_running_toggles_flag() {
        let db = get_test_db().await;
        let account = test_account();
        db.insert_account(&account).await.unwrap();

        db.set_running(account.id, false).await.unwrap();
        let loaded = db.load_account(account.id).await.unwrap();
        assert!(!loaded.is_running);

        clear_account(&db, account.id).await;
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_set_running_unknown_account() {
        let db = get_test_db().await;
        let result = db.set_running(Uuid::new_v4(), true).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_candles_come_back_chronological() {
        let db = get_test_db().await;
        let base: DateTime<Utc> = "2025-03-01T00:00:00Z".parse().unwrap();

        for (i, close) in [100.0f64, 101.0, 102.0].iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO price_history (symbol, interval, candle_time,
                    open_price, high_price, low_price, close_price, volume)
                VALUES ($1, '1h', $2, $3, $3, $3, $3, 0)
                ON CONFLICT (symbol, interval, candle_time) DO UPDATE SET
                    close_price = EXCLUDED.close_price
                "#,
            )
            .bind("TEST-CHRONO")
            .bind(base + chrono::Duration::hours(i as i64))
            .bind(*close)
            .execute(&db.pool)
            .await
            .unwrap();
        }

        let candles = db
            .load_recent_candles("TEST-CHRONO", Interval::H1, 25)
            .await
            .unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].close, 100.0);
        assert_eq!(candles[2].close, 102.0);

        sqlx::query("DELETE FROM price_history WHERE symbol = 'TEST-CHRONO'")
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_commit_evaluation_persists_trade_and_lots() {
        let db = get_test_db().await;
        let mut account = test_account();
        db.insert_account(&account).await.unwrap();

        // Simulate a buy outcome
        let mut ledger = crate::ledger::PositionLedger::new();
        ledger
            .apply_buy(&mut account, 100.0, 12.0, Utc::now())
            .unwrap();
        crate::throttle::mark_evaluated(&mut account, Utc::now());

        let mut record = hold_record(&account);
        record.log.kind = ActionKind::Buy;
        record.trade = Some(TradeRecord {
            id: Uuid::new_v4(),
            account_id: account.id,
            side: TradeSide::Buy,
            quantity: 0.12,
            price_usd: 100.0,
            volume_usd: 12.0,
            band_upper: 104.0,
            band_middle: 102.0,
            band_lower: 100.0,
            distance_ratio: 1.0,
            multiplier: 2.0,
            status: TradeStatus::Open,
            cost_basis_usd: None,
            profit_usd: None,
            executed_at: Utc::now(),
        });
        record.notification = Some(Notification {
            title: "Simulated BUY: BTC-USDT".to_string(),
            body: "test".to_string(),
        });

        db.commit_evaluation(&account, ledger.lots(), &record)
            .await
            .unwrap();

        let loaded = db.load_account(account.id).await.unwrap();
        assert_eq!(loaded.version, account.version + 1);
        assert!((loaded.balance_usd - 9988.0).abs() < 1e-9);
        assert_eq!(loaded.total_trades, 1);

        let lots = db.load_open_lots(account.id).await.unwrap();
        assert_eq!(lots.len(), 1);
        assert!((lots[0].remaining_quantity - 0.12).abs() < 1e-9);

        let trades = db.load_trades(account.id, 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, TradeSide::Buy);

        clear_account(&db, account.id).await;
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_commit_evaluation_detects_version_conflict() {
        let db = get_test_db().await;
        let mut account = test_account();
        db.insert_account(&account).await.unwrap();

        crate::throttle::mark_evaluated(&mut account, Utc::now());
        let record = hold_record(&account);

        // First commit wins and bumps the stored version
        db.commit_evaluation(&account, &[], &record).await.unwrap();

        // Second commit with the stale in-memory version must be rejected
        let record = hold_record(&account);
        let result = db.commit_evaluation(&account, &[], &record).await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));

        // And it must not have written its action row
        let row = sqlx::query("SELECT COUNT(*) as count FROM actions WHERE account_id = $1")
            .bind(account.id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let count: i64 = row.get("count");
        assert_eq!(count, 1);

        clear_account(&db, account.id).await;
    }
}
