//! PostgreSQL transaction and checkpoint store

use super::{BlockStore, ListTxsFilter, SignedTx, TxRecord, TxStatus, TxStore};
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, TransactionReceipt};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info};

/// Transaction store persisted in PostgreSQL
pub struct PgTxStore {
    pool: PgPool,
}

impl PgTxStore {
    /// Connect to the database
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id VARCHAR(64) PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                to_address VARCHAR(42) NOT NULL,
                data BYTEA NOT NULL,
                gas_limit BIGINT NOT NULL,
                nonce BIGINT,
                signed_tx JSONB,
                receipt JSONB,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                status_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_status
            ON transactions (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                chain_id BIGINT NOT NULL,
                contract VARCHAR(42) NOT NULL,
                number BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (chain_id, contract)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    async fn fetch_state(&self, id: &str) -> RelayerResult<Option<PgRow>> {
        let row = sqlx::query("SELECT status, nonce FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    fn record_from_row(row: &PgRow) -> RelayerResult<TxRecord> {
        let to: String = row.get("to_address");
        let to = to
            .parse::<Address>()
            .map_err(|e| RelayerError::Internal(format!("invalid stored address {}: {}", to, e)))?;

        let status: String = row.get("status");
        let signed_tx: Option<Json<SignedTx>> = row.get("signed_tx");
        let receipt: Option<Json<TransactionReceipt>> = row.get("receipt");
        let data: Vec<u8> = row.get("data");

        Ok(TxRecord {
            id: row.get("id"),
            chain_id: row.get::<i64, _>("chain_id") as u64,
            to,
            data: Bytes::from(data),
            gas_limit: row.get::<i64, _>("gas_limit") as u64,
            nonce: row.get::<Option<i64>, _>("nonce").map(|n| n as u64),
            signed_tx: signed_tx.map(|j| j.0),
            receipt: receipt.map(|j| j.0),
            status: status.parse()?,
            status_message: row.get("status_message"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }
}

#[async_trait]
impl TxStore for PgTxStore {
    async fn store_tx(&self, tx: TxRecord) -> RelayerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions
                (id, chain_id, to_address, data, gas_limit, nonce, signed_tx, receipt,
                 status, status_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&tx.id)
        .bind(tx.chain_id as i64)
        .bind(format!("{:?}", tx.to))
        .bind(tx.data.to_vec())
        .bind(tx.gas_limit as i64)
        .bind(tx.nonce.map(|n| n as i64))
        .bind(tx.signed_tx.as_ref().map(Json))
        .bind(tx.receipt.as_ref().map(Json))
        .bind(tx.status.as_str())
        .bind(&tx.status_message)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::TransactionExists { tx_id: tx.id });
        }

        debug!("Stored transaction {} for chain {}", tx.id, tx.chain_id);
        Ok(())
    }

    async fn update_raw_tx(&self, id: &str, signed_tx: SignedTx) -> RelayerResult<()> {
        let nonce = signed_tx.nonce;
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET signed_tx = $2, nonce = COALESCE(nonce, $3), updated_at = NOW()
            WHERE id = $1 AND (nonce IS NULL OR nonce = $3)
            "#,
        )
        .bind(id)
        .bind(Json(&signed_tx))
        .bind(nonce as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.fetch_state(id).await? {
            None => Err(RelayerError::TransactionNotFound {
                tx_id: id.to_string(),
            }),
            Some(row) => Err(RelayerError::NonceMismatch {
                tx_id: id.to_string(),
                recorded: row.get::<Option<i64>, _>("nonce").unwrap_or_default() as u64,
                got: nonce,
            }),
        }
    }

    async fn update_tx_status(
        &self,
        id: &str,
        status: TxStatus,
        message: Option<String>,
        receipt: Option<TransactionReceipt>,
    ) -> RelayerResult<()> {
        if status == TxStatus::Pending {
            return Err(RelayerError::InvalidStateTransition {
                from: "any".to_string(),
                to: status.to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, status_message = $3, receipt = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&message)
        .bind(receipt.as_ref().map(Json))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.fetch_state(id).await? {
            None => Err(RelayerError::TransactionNotFound {
                tx_id: id.to_string(),
            }),
            Some(row) => Err(RelayerError::InvalidStateTransition {
                from: row.get("status"),
                to: status.to_string(),
            }),
        }
    }

    async fn get_tx(&self, id: &str) -> RelayerResult<Option<TxRecord>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_txs(&self, filter: ListTxsFilter) -> RelayerResult<Vec<TxRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE ($1::VARCHAR IS NULL OR status = $1)
            ORDER BY created_at
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BlockStore for PgTxStore {
    async fn get_handled_block(
        &self,
        chain_id: u64,
        contract: Address,
    ) -> RelayerResult<Option<u64>> {
        let row = sqlx::query("SELECT number FROM blocks WHERE chain_id = $1 AND contract = $2")
            .bind(chain_id as i64)
            .bind(format!("{:?}", contract))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("number") as u64))
    }

    async fn set_handled_block(
        &self,
        chain_id: u64,
        contract: Address,
        block_number: u64,
    ) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blocks (chain_id, contract, number)
            VALUES ($1, $2, $3)
            ON CONFLICT (chain_id, contract) DO UPDATE
            SET number = GREATEST(blocks.number, EXCLUDED.number), updated_at = NOW()
            "#,
        )
        .bind(chain_id as i64)
        .bind(format!("{:?}", contract))
        .bind(block_number as i64)
        .execute(&self.pool)
        .await?;

        debug!(
            "Stored handled block {} for chain {} contract {:?}",
            block_number, chain_id, contract
        );
        Ok(())
    }
}
