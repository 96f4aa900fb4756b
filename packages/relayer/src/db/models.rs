use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::Serialize;
use sqlx::FromRow;

use crate::types::{BridgeEvent, EventStatus};

// Amounts are NUMERIC(78,0) in the database. Inserts cast the decimal string
// with $n::NUMERIC and reads select amount::TEXT, so no big-decimal type is
// needed on the Rust side.

/// Row of the `bridge_events` table
#[derive(Debug, Clone, FromRow)]
pub struct BridgeEventRow {
    pub tx_id: String,
    pub event_type: String,
    pub source_chain: i64,
    pub target_chain: i64,
    pub user_address: String,
    pub token_address: String,
    pub target_address: String,
    pub amount: String,
    pub block_number: i64,
    pub transaction_hash: String,
    pub confirmations: i64,
    pub status: String,
    pub proof_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted bridge event plus its completion data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub event: BridgeEvent,
    pub proof_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// Fresh record for a just-admitted event
    pub fn new(event: BridgeEvent) -> Self {
        let now = Utc::now();
        Self {
            event,
            proof_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TryFrom<BridgeEventRow> for EventRecord {
    type Error = eyre::Report;

    fn try_from(row: BridgeEventRow) -> Result<Self> {
        let event = BridgeEvent {
            event_type: row
                .event_type
                .parse()
                .wrap_err_with(|| format!("Bad event_type on row {}", row.tx_id))?,
            source_chain: from_db_int(row.source_chain)?,
            target_chain: from_db_int(row.target_chain)?,
            user_address: row.user_address,
            token_address: row.token_address,
            target_address: row.target_address,
            amount: row.amount,
            block_number: from_db_int(row.block_number)?,
            transaction_hash: row.transaction_hash,
            confirmations: from_db_int(row.confirmations)?,
            status: row
                .status
                .parse::<EventStatus>()
                .wrap_err_with(|| format!("Bad status on row {}", row.tx_id))?,
            tx_id: row.tx_id,
        };

        Ok(Self {
            event,
            proof_hash: row.proof_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres has no unsigned integers; BIGINT columns hold u64 values
pub fn to_db_int(value: u64) -> Result<i64> {
    i64::try_from(value).wrap_err_with(|| format!("{} does not fit in BIGINT", value))
}

pub fn from_db_int(value: i64) -> Result<u64> {
    u64::try_from(value).wrap_err_with(|| format!("negative value {} in unsigned column", value))
}
