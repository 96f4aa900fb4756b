use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub mod memory;
pub mod models;

pub use memory::MemoryEventStore;
pub use models::*;

use crate::types::{BridgeEvent, ChainId, EventStatus};

/// Dedup store plus watermark store shared by every ingestion path.
///
/// `save_bridge_event` is the atomic check-then-write: it inserts only when
/// `tx_id` is absent and reports whether it did.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn is_event_processed(&self, tx_id: &str) -> Result<bool>;

    /// Insert if absent. Returns `false` when the tx id was already stored.
    async fn save_bridge_event(&self, event: &BridgeEvent) -> Result<bool>;

    /// Returns `false` when no record matched
    async fn update_event_status(
        &self,
        tx_id: &str,
        status: EventStatus,
        proof_hash: Option<&str>,
    ) -> Result<bool>;

    /// Raise the stored confirmation count; never lowers it
    async fn update_confirmations(&self, tx_id: &str, confirmations: u64) -> Result<()>;

    /// Pending events of `chain_id` with fewer than `below` confirmations
    async fn unconfirmed_events(
        &self,
        chain_id: ChainId,
        below: u64,
        limit: i64,
    ) -> Result<Vec<BridgeEvent>>;

    async fn get_event(&self, tx_id: &str) -> Result<Option<EventRecord>>;

    /// Watermark of `chain_id`, 0 when unset
    async fn get_last_processed_block(&self, chain_id: ChainId) -> Result<u64>;

    /// Advance the watermark; lower values are ignored
    async fn save_processed_block(&self, chain_id: ChainId, block_number: u64) -> Result<()>;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Check if a bridge event exists by tx id
pub async fn bridge_event_exists(pool: &PgPool, tx_id: &str) -> Result<bool> {
    let row: (bool,) =
        sqlx::query_as(r#"SELECT EXISTS(SELECT 1 FROM bridge_events WHERE tx_id = $1)"#)
            .bind(tx_id)
            .fetch_one(pool)
            .await
            .wrap_err("Failed to check bridge event existence")?;

    Ok(row.0)
}

/// Insert a bridge event unless its tx id is already stored
pub async fn insert_bridge_event(pool: &PgPool, event: &BridgeEvent) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO bridge_events (tx_id, event_type, source_chain, target_chain, user_address,
            token_address, target_address, amount, block_number, transaction_hash,
            confirmations, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9, $10, $11, $12)
        ON CONFLICT (tx_id) DO NOTHING
        "#,
    )
    .bind(&event.tx_id)
    .bind(event.event_type.as_str())
    .bind(to_db_int(event.source_chain)?)
    .bind(to_db_int(event.target_chain)?)
    .bind(&event.user_address)
    .bind(&event.token_address)
    .bind(&event.target_address)
    .bind(&event.amount)
    .bind(to_db_int(event.block_number)?)
    .bind(&event.transaction_hash)
    .bind(to_db_int(event.confirmations)?)
    .bind(event.status)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to insert bridge event {}", event.tx_id))?;

    Ok(result.rows_affected() == 1)
}

/// Update bridge event status and proof hash
pub async fn update_bridge_event_status(
    pool: &PgPool,
    tx_id: &str,
    status: EventStatus,
    proof_hash: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE bridge_events
        SET status = $2, proof_hash = COALESCE($3, proof_hash), updated_at = NOW()
        WHERE tx_id = $1
        "#,
    )
    .bind(tx_id)
    .bind(status)
    .bind(proof_hash)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update bridge event {} status to {}", tx_id, status))?;

    Ok(result.rows_affected() > 0)
}

/// Raise the confirmation count of a bridge event
pub async fn update_bridge_event_confirmations(
    pool: &PgPool,
    tx_id: &str,
    confirmations: u64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE bridge_events
        SET confirmations = GREATEST(confirmations, $2), updated_at = NOW()
        WHERE tx_id = $1
        "#,
    )
    .bind(tx_id)
    .bind(to_db_int(confirmations)?)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update confirmations of {}", tx_id))?;

    Ok(())
}

const SELECT_BRIDGE_EVENT: &str = r#"
    SELECT tx_id, event_type, source_chain, target_chain, user_address, token_address,
        target_address, amount::TEXT AS amount, block_number, transaction_hash, confirmations,
        status, proof_hash, created_at, updated_at
    FROM bridge_events
"#;

/// Get pending events of a chain that are below a confirmation threshold
pub async fn get_unconfirmed_events(
    pool: &PgPool,
    chain_id: ChainId,
    below: u64,
    limit: i64,
) -> Result<Vec<BridgeEventRow>> {
    let query = format!(
        "{} WHERE source_chain = $1 AND status = 'pending' AND confirmations < $2 \
         ORDER BY block_number ASC LIMIT $3",
        SELECT_BRIDGE_EVENT
    );
    let rows = sqlx::query_as::<_, BridgeEventRow>(&query)
        .bind(to_db_int(chain_id)?)
        .bind(to_db_int(below)?)
        .bind(limit)
        .fetch_all(pool)
        .await
        .wrap_err_with(|| format!("Failed to get unconfirmed events for chain {}", chain_id))?;

    Ok(rows)
}

/// Get a bridge event by tx id
pub async fn get_bridge_event(pool: &PgPool, tx_id: &str) -> Result<Option<BridgeEventRow>> {
    let query = format!("{} WHERE tx_id = $1", SELECT_BRIDGE_EVENT);
    let row = sqlx::query_as::<_, BridgeEventRow>(&query)
        .bind(tx_id)
        .fetch_optional(pool)
        .await
        .wrap_err_with(|| format!("Failed to get bridge event {}", tx_id))?;

    Ok(row)
}

/// Get last processed block for a chain
pub async fn get_last_processed_block(pool: &PgPool, chain_id: ChainId) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"SELECT last_processed_block FROM processed_blocks WHERE chain_id = $1"#,
    )
    .bind(to_db_int(chain_id)?)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to get last processed block")?;

    Ok(row.map(|r| r.0))
}

/// Update last processed block for a chain (never moves backwards)
pub async fn update_last_processed_block(
    pool: &PgPool,
    chain_id: ChainId,
    block_number: u64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO processed_blocks (chain_id, last_processed_block)
        VALUES ($1, $2)
        ON CONFLICT (chain_id) DO UPDATE
        SET last_processed_block = GREATEST(processed_blocks.last_processed_block, EXCLUDED.last_processed_block),
            updated_at = NOW()
        "#,
    )
    .bind(to_db_int(chain_id)?)
    .bind(to_db_int(block_number)?)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update last processed block for chain {}", chain_id))?;

    Ok(())
}

/// [`EventStore`] backed by Postgres
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn is_event_processed(&self, tx_id: &str) -> Result<bool> {
        bridge_event_exists(&self.pool, tx_id).await
    }

    async fn save_bridge_event(&self, event: &BridgeEvent) -> Result<bool> {
        insert_bridge_event(&self.pool, event).await
    }

    async fn update_event_status(
        &self,
        tx_id: &str,
        status: EventStatus,
        proof_hash: Option<&str>,
    ) -> Result<bool> {
        update_bridge_event_status(&self.pool, tx_id, status, proof_hash).await
    }

    async fn update_confirmations(&self, tx_id: &str, confirmations: u64) -> Result<()> {
        update_bridge_event_confirmations(&self.pool, tx_id, confirmations).await
    }

    async fn unconfirmed_events(
        &self,
        chain_id: ChainId,
        below: u64,
        limit: i64,
    ) -> Result<Vec<BridgeEvent>> {
        get_unconfirmed_events(&self.pool, chain_id, below, limit)
            .await?
            .into_iter()
            .map(|row| EventRecord::try_from(row).map(|record| record.event))
            .collect()
    }

    async fn get_event(&self, tx_id: &str) -> Result<Option<EventRecord>> {
        get_bridge_event(&self.pool, tx_id)
            .await?
            .map(EventRecord::try_from)
            .transpose()
    }

    async fn get_last_processed_block(&self, chain_id: ChainId) -> Result<u64> {
        match get_last_processed_block(&self.pool, chain_id).await? {
            Some(block) => from_db_int(block),
            None => Ok(0),
        }
    }

    async fn save_processed_block(&self, chain_id: ChainId, block_number: u64) -> Result<()> {
        update_last_processed_block(&self.pool, chain_id, block_number).await
    }
}
