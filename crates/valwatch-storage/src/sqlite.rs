//! SQLite storage backend for valwatch.
//!
//! Persists subscriptions, validator records and recent blocks to a single
//! SQLite file. Attendance history and subscriber lists are stored as JSON
//! documents. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use valwatch_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./valwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use valwatch_core::store::{BlockStore, SubscriptionStore, ValidatorStore};
use valwatch_core::types::{
    BlockRecord, Description, Subscriber, TrackingUpdate, ValidatorRecord, ValidatorSubscription,
};
use valwatch_core::{BlocksHistory, WatchError};

fn db_err(e: sqlx::Error) -> WatchError {
    WatchError::Storage(e.to_string())
}

fn json_err(e: serde_json::Error) -> WatchError {
    WatchError::Storage(format!("corrupt JSON column: {e}"))
}

/// SQLite-backed store for subscriptions, validators and blocks.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./valwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./valwatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, WatchError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        debug!(path, "sqlite store opened");
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, WatchError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), WatchError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                operator_address    TEXT    PRIMARY KEY,
                consecutive_counter INTEGER NOT NULL,
                alert_level         INTEGER NOT NULL,
                last_missed_block   INTEGER NOT NULL,
                blocks_history      TEXT    NOT NULL,
                subscribers         TEXT    NOT NULL,
                updated_at          INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS validators (
                operator_address        TEXT    PRIMARY KEY,
                hex_address             TEXT    NOT NULL,
                self_delegation_address TEXT    NOT NULL,
                consensus_pubkey        TEXT    NOT NULL,
                jailed                  INTEGER NOT NULL,
                description             TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_validators_hex ON validators (hex_address);")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                height           INTEGER PRIMARY KEY,
                proposer_address TEXT    NOT NULL,
                tx_count         INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn subscription_from_row(row: &SqliteRow) -> Result<ValidatorSubscription, WatchError> {
    let history: String = row.get("blocks_history");
    let subscribers: String = row.get("subscribers");
    Ok(ValidatorSubscription {
        operator_address: row.get("operator_address"),
        consecutive_counter: row.get::<i64, _>("consecutive_counter") as u64,
        alert_level: row.get::<i64, _>("alert_level") as u32,
        last_missed_block: row.get::<i64, _>("last_missed_block") as u64,
        blocks_history: serde_json::from_str::<BlocksHistory>(&history).map_err(json_err)?,
        subscribers: serde_json::from_str::<Vec<Subscriber>>(&subscribers).map_err(json_err)?,
        updated_at: row.get("updated_at"),
    })
}

fn validator_from_row(row: &SqliteRow) -> Result<ValidatorRecord, WatchError> {
    let description: String = row.get("description");
    Ok(ValidatorRecord {
        operator_address: row.get("operator_address"),
        hex_address: row.get("hex_address"),
        self_delegation_address: row.get("self_delegation_address"),
        consensus_pubkey: row.get("consensus_pubkey"),
        jailed: row.get::<i64, _>("jailed") != 0,
        description: serde_json::from_str::<Description>(&description).map_err(json_err)?,
    })
}

// ─── SubscriptionStore impl ──────────────────────────────────────────────────

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn find_subscription(
        &self,
        operator: &str,
    ) -> Result<Option<ValidatorSubscription>, WatchError> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE operator_address = ?")
            .bind(operator)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn all_subscriptions(&self) -> Result<Vec<ValidatorSubscription>, WatchError> {
        let rows = sqlx::query("SELECT * FROM subscriptions ORDER BY operator_address")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn insert_subscription(&self, sub: ValidatorSubscription) -> Result<(), WatchError> {
        let history = serde_json::to_string(&sub.blocks_history).map_err(json_err)?;
        let subscribers = serde_json::to_string(&sub.subscribers).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO subscriptions
             (operator_address, consecutive_counter, alert_level, last_missed_block,
              blocks_history, subscribers, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&sub.operator_address)
        .bind(sub.consecutive_counter as i64)
        .bind(sub.alert_level as i64)
        .bind(sub.last_missed_block as i64)
        .bind(&history)
        .bind(&subscribers)
        .bind(sub.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(validator = %sub.operator_address, "subscription inserted");
        Ok(())
    }

    async fn update_tracking(&self, operator: &str, update: TrackingUpdate) -> Result<(), WatchError> {
        let history = serde_json::to_string(&update.blocks_history).map_err(json_err)?;
        let result = sqlx::query(
            "UPDATE subscriptions
             SET consecutive_counter = ?, alert_level = ?, last_missed_block = ?,
                 blocks_history = ?, updated_at = ?
             WHERE operator_address = ?",
        )
        .bind(update.consecutive_counter as i64)
        .bind(update.alert_level as i64)
        .bind(update.last_missed_block as i64)
        .bind(&history)
        .bind(chrono::Utc::now().timestamp())
        .bind(operator)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(WatchError::NotFound(format!("subscription {operator}")));
        }
        Ok(())
    }

    async fn set_subscribers(
        &self,
        operator: &str,
        subscribers: Vec<Subscriber>,
    ) -> Result<(), WatchError> {
        let subscribers = serde_json::to_string(&subscribers).map_err(json_err)?;
        let result = sqlx::query(
            "UPDATE subscriptions SET subscribers = ?, updated_at = ? WHERE operator_address = ?",
        )
        .bind(&subscribers)
        .bind(chrono::Utc::now().timestamp())
        .bind(operator)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(WatchError::NotFound(format!("subscription {operator}")));
        }
        Ok(())
    }

    async fn delete_subscription(&self, operator: &str) -> Result<(), WatchError> {
        sqlx::query("DELETE FROM subscriptions WHERE operator_address = ?")
            .bind(operator)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ─── ValidatorStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl ValidatorStore for SqliteStore {
    async fn find_validator(&self, operator: &str) -> Result<Option<ValidatorRecord>, WatchError> {
        let row = sqlx::query("SELECT * FROM validators WHERE operator_address = ?")
            .bind(operator)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(validator_from_row).transpose()
    }

    async fn find_validator_by_hex(
        &self,
        hex_address: &str,
    ) -> Result<Option<ValidatorRecord>, WatchError> {
        let row = sqlx::query("SELECT * FROM validators WHERE hex_address = ? COLLATE NOCASE LIMIT 1")
            .bind(hex_address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(validator_from_row).transpose()
    }

    async fn all_validators(&self) -> Result<Vec<ValidatorRecord>, WatchError> {
        let rows = sqlx::query("SELECT * FROM validators ORDER BY operator_address")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(validator_from_row).collect()
    }

    async fn upsert_validator(&self, record: ValidatorRecord) -> Result<(), WatchError> {
        let description = serde_json::to_string(&record.description).map_err(json_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO validators
             (operator_address, hex_address, self_delegation_address, consensus_pubkey, jailed, description)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.operator_address)
        .bind(&record.hex_address)
        .bind(&record.self_delegation_address)
        .bind(&record.consensus_pubkey)
        .bind(record.jailed as i64)
        .bind(&description)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_jailed(&self, operator: &str, jailed: bool) -> Result<bool, WatchError> {
        let result = sqlx::query(
            "UPDATE validators SET jailed = ? WHERE operator_address = ? AND jailed != ?",
        )
        .bind(jailed as i64)
        .bind(operator)
        .bind(jailed as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() > 0 {
            debug!(validator = %operator, jailed, "jailed flag changed");
            return Ok(true);
        }
        match self.find_validator(operator).await? {
            Some(_) => Ok(false),
            None => Err(WatchError::NotFound(format!("validator {operator}"))),
        }
    }
}

// ─── BlockStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl BlockStore for SqliteStore {
    async fn insert_block(&self, record: BlockRecord, limit: usize) -> Result<(), WatchError> {
        sqlx::query(
            "INSERT OR REPLACE INTO blocks (height, proposer_address, tx_count) VALUES (?, ?, ?)",
        )
        .bind(record.height as i64)
        .bind(&record.proposer_address)
        .bind(record.tx_count as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "DELETE FROM blocks WHERE height NOT IN
             (SELECT height FROM blocks ORDER BY height DESC LIMIT ?)",
        )
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn blocks(&self) -> Result<Vec<BlockRecord>, WatchError> {
        let rows = sqlx::query("SELECT height, proposer_address, tx_count FROM blocks ORDER BY height")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|r| BlockRecord {
                height: r.get::<i64, _>("height") as u64,
                proposer_address: r.get("proposer_address"),
                tx_count: r.get::<i64, _>("tx_count") as u32,
            })
            .collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use valwatch_core::HistoryEntry;

    fn record(op: &str, hex: &str) -> ValidatorRecord {
        ValidatorRecord {
            operator_address: op.into(),
            hex_address: hex.into(),
            self_delegation_address: format!("{op}-self"),
            consensus_pubkey: "cosmosvalconspub1xyz".into(),
            jailed: false,
            description: Description {
                moniker: "Figment".into(),
                website: "https://figment.io".into(),
                ..Default::default()
            },
        }
    }

    // ── SubscriptionStore ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn subscription_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut sub = ValidatorSubscription::new("cosmosvaloper1a");
        sub.add_subscriber(Subscriber::new("chat-1"));
        store.insert_subscription(sub.clone()).await.unwrap();

        let loaded = store.find_subscription("cosmosvaloper1a").await.unwrap().unwrap();
        assert_eq!(loaded, sub);
        assert!(store.find_subscription("cosmosvaloper1b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_subscription(ValidatorSubscription::new("cosmosvaloper1a"))
            .await
            .unwrap();
        let err = store
            .insert_subscription(ValidatorSubscription::new("cosmosvaloper1a"))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Storage(_)));
    }

    #[tokio::test]
    async fn update_tracking_replaces_fields() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut sub = ValidatorSubscription::new("cosmosvaloper1a");
        sub.add_subscriber(Subscriber::new("chat-1"));
        store.insert_subscription(sub.clone()).await.unwrap();

        let mut history = BlocksHistory::default();
        history.push(HistoryEntry { height: 10, found: true }, 100);
        history.push(HistoryEntry { height: 11, found: false }, 100);
        store
            .update_tracking(
                "cosmosvaloper1a",
                TrackingUpdate {
                    consecutive_counter: 1,
                    alert_level: 1,
                    last_missed_block: 11,
                    blocks_history: history.clone(),
                },
            )
            .await
            .unwrap();

        let loaded = store.find_subscription("cosmosvaloper1a").await.unwrap().unwrap();
        assert_eq!(loaded.consecutive_counter, 1);
        assert_eq!(loaded.last_missed_block, 11);
        assert_eq!(loaded.blocks_history, history);
        assert_eq!(loaded.subscribers, sub.subscribers, "subscribers untouched");

        let err = store
            .update_tracking(
                "cosmosvaloper1zzz",
                TrackingUpdate {
                    consecutive_counter: 0,
                    alert_level: 1,
                    last_missed_block: 0,
                    blocks_history: BlocksHistory::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn subscribers_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_subscription(ValidatorSubscription::new("cosmosvaloper1b"))
            .await
            .unwrap();
        store
            .insert_subscription(ValidatorSubscription::new("cosmosvaloper1a"))
            .await
            .unwrap();
        store
            .set_subscribers("cosmosvaloper1b", vec![Subscriber::new("x"), Subscriber::new("y")])
            .await
            .unwrap();

        let all = store.all_subscriptions().await.unwrap();
        let ops: Vec<&str> = all.iter().map(|s| s.operator_address.as_str()).collect();
        assert_eq!(ops, vec!["cosmosvaloper1a", "cosmosvaloper1b"]);
        assert_eq!(all[1].subscribers.len(), 2);

        store.delete_subscription("cosmosvaloper1b").await.unwrap();
        assert_eq!(store.all_subscriptions().await.unwrap().len(), 1);
    }

    // ── ValidatorStore ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn validator_upsert_and_hex_lookup() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .upsert_validator(record("cosmosvaloper1a", "AE216C2EF5247A3782C135EFA279A3E4CDC61094"))
            .await
            .unwrap();

        let by_hex = store
            .find_validator_by_hex("ae216c2ef5247a3782c135efa279a3e4cdc61094")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_hex.operator_address, "cosmosvaloper1a");
        assert_eq!(by_hex.description.website, "https://figment.io");

        let mut edited = record("cosmosvaloper1a", "AE216C2EF5247A3782C135EFA279A3E4CDC61094");
        edited.description.moniker = "Figment Networks".into();
        store.upsert_validator(edited).await.unwrap();
        let all = store.all_validators().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name(), "Figment Networks");
    }

    #[tokio::test]
    async fn set_jailed_is_compare_and_set() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_validator(record("cosmosvaloper1a", "AA")).await.unwrap();

        assert!(store.set_jailed("cosmosvaloper1a", true).await.unwrap());
        assert!(!store.set_jailed("cosmosvaloper1a", true).await.unwrap());
        assert!(store.find_validator("cosmosvaloper1a").await.unwrap().unwrap().jailed);
        assert!(store.set_jailed("cosmosvaloper1a", false).await.unwrap());
        assert!(matches!(
            store.set_jailed("cosmosvaloper1zzz", true).await,
            Err(WatchError::NotFound(_))
        ));
    }

    // ── BlockStore ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn blocks_are_fifo_capped() {
        let store = SqliteStore::in_memory().await.unwrap();
        for height in 1..=8u64 {
            store
                .insert_block(
                    BlockRecord {
                        height,
                        proposer_address: if height % 2 == 0 { "AA".into() } else { "BB".into() },
                        tx_count: height as u32,
                    },
                    5,
                )
                .await
                .unwrap();
        }
        let blocks = store.blocks().await.unwrap();
        let heights: Vec<u64> = blocks.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![4, 5, 6, 7, 8]);
        assert_eq!(blocks[0].proposer_address, "AA");
        assert_eq!(blocks[4].tx_count, 8);
    }
}
