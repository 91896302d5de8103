//! Embedded, per-(symbol, timeframe) OHLCV store with retention, grounded on
//! the teacher's `infrastructure::persistence::database::Database` — same
//! `SqlitePool`-owns-its-schema pattern, extended with a `timeframe` column
//! since the spec's primary key is `(symbol, timeframe, mts)` rather than
//! the teacher's `(symbol, timestamp)`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub mts: i64,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
}

#[derive(Clone)]
pub struct CandleStore {
    pool: SqlitePool,
}

impl CandleStore {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("creating candle store directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to candle store")?;

        let store = Self { pool };
        store.init().await?;
        info!("CandleStore: connected to {}", db_url);
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                mts INTEGER NOT NULL,
                open TEXT NOT NULL,
                close TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, mts)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating candles table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_symbol_tf_mts
            ON candles (symbol, timeframe, mts DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating candle index")?;

        Ok(())
    }

    /// Upserts a batch; single-writer discipline via the pool's own
    /// connection-acquisition serialization (spec §5 "internal mutex
    /// serializes writes").
    pub async fn store(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for c in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (symbol, timeframe, mts, open, close, high, low, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (symbol, timeframe, mts) DO UPDATE SET
                    open = excluded.open,
                    close = excluded.close,
                    high = excluded.high,
                    low = excluded.low,
                    volume = excluded.volume
                "#,
            )
            .bind(symbol)
            .bind(timeframe)
            .bind(c.mts)
            .bind(c.open.to_string())
            .bind(c.close.to_string())
            .bind(c.high.to_string())
            .bind(c.low.to_string())
            .bind(c.volume.to_string())
            .execute(&mut *tx)
            .await
            .context("upserting candle")?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Newest-first.
    pub async fn load(&self, symbol: &str, timeframe: &str, limit: i64) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT mts, open, close, high, low, volume FROM candles \
             WHERE symbol = ? AND timeframe = ? ORDER BY mts DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("loading candles")?;

        Ok(rows.into_iter().map(row_to_candle).collect())
    }

    pub async fn get_last(&self, symbol: &str, timeframe: &str) -> Result<Option<Candle>> {
        Ok(self.load(symbol, timeframe, 1).await?.into_iter().next())
    }

    /// Delete-by-age then per-pair trim, executed inside one transaction.
    pub async fn enforce_retention(&self, max_days: u32, max_rows_per_pair: u32) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed: u64 = 0;

        if max_days > 0 {
            let cutoff_ms = chrono::Utc::now().timestamp_millis() - (max_days as i64) * 86_400_000;
            let res = sqlx::query("DELETE FROM candles WHERE mts < ?")
                .bind(cutoff_ms)
                .execute(&mut *tx)
                .await
                .context("deleting aged candles")?;
            removed += res.rows_affected();
        }

        if max_rows_per_pair > 0 {
            let res = sqlx::query(
                r#"
                DELETE FROM candles
                WHERE rowid IN (
                    SELECT rowid FROM (
                        SELECT rowid,
                               ROW_NUMBER() OVER (
                                   PARTITION BY symbol, timeframe ORDER BY mts DESC
                               ) AS rn
                        FROM candles
                    )
                    WHERE rn > ?
                )
                "#,
            )
            .bind(max_rows_per_pair as i64)
            .execute(&mut *tx)
            .await
            .context("trimming candles per pair")?;
            removed += res.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }
}

fn row_to_candle(row: sqlx::sqlite::SqliteRow) -> Candle {
    let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
    Candle {
        mts: row.get::<i64, _>("mts"),
        open: parse(row.get::<String, _>("open")),
        close: parse(row.get::<String, _>("close")),
        high: parse(row.get::<String, _>("high")),
        low: parse(row.get::<String, _>("low")),
        volume: parse(row.get::<String, _>("volume")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(mts: i64) -> Candle {
        Candle {
            mts,
            open: dec!(100),
            close: dec!(101),
            high: dec!(102),
            low: dec!(99),
            volume: dec!(10),
        }
    }

    #[tokio::test]
    async fn store_and_load_newest_first() {
        let store = CandleStore::new("sqlite::memory:").await.unwrap();
        store
            .store("tBTCUSD", "1m", &[candle(1000), candle(2000), candle(3000)])
            .await
            .unwrap();

        let loaded = store.load("tBTCUSD", "1m", 10).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].mts, 3000);
        assert_eq!(loaded[2].mts, 1000);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = CandleStore::new("sqlite::memory:").await.unwrap();
        store.store("tBTCUSD", "1m", &[candle(1000)]).await.unwrap();
        let mut updated = candle(1000);
        updated.close = dec!(999);
        store.store("tBTCUSD", "1m", &[updated]).await.unwrap();

        let loaded = store.load("tBTCUSD", "1m", 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].close, dec!(999));
    }

    #[tokio::test]
    async fn retention_trims_by_row_count() {
        let store = CandleStore::new("sqlite::memory:").await.unwrap();
        let candles: Vec<Candle> = (0..10).map(|i| candle(i * 1000)).collect();
        store.store("tBTCUSD", "1m", &candles).await.unwrap();

        let removed = store.enforce_retention(0, 3).await.unwrap();
        assert_eq!(removed, 7);
        let loaded = store.load("tBTCUSD", "1m", 100).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].mts, 9000);
    }

    #[tokio::test]
    async fn get_last_returns_newest() {
        let store = CandleStore::new("sqlite::memory:").await.unwrap();
        store.store("tBTCUSD", "1m", &[candle(1000), candle(5000)]).await.unwrap();
        let last = store.get_last("tBTCUSD", "1m").await.unwrap().unwrap();
        assert_eq!(last.mts, 5000);
    }
}
