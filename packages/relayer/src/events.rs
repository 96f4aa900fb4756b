//! Conversion of observed contract logs into canonical records
//!
//! The live subscriber and the backfill scanner both go through
//! [`resolve_log`], so a burn seen on either path resolves identically.

use thiserror::Error;

use crate::chain::{BridgeChain, LogPayload, ObservedLog};
use crate::types::{BridgeEvent, BridgeEventKind, ChainId, EventStatus};

/// Data-integrity failures while converting a log. The log is dropped and
/// left for a later backfill pass.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("transaction record lookup failed for {tx_id}: {reason}")]
    Lookup { tx_id: String, reason: String },

    #[error("transaction record for {tx_id} has no target chain")]
    NoTargetChain { tx_id: String },
}

impl ResolveError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            ResolveError::Lookup { .. } => "lookup_failed",
            ResolveError::NoTargetChain { .. } => "no_target_chain",
        }
    }
}

/// What an observed log means for the event store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLog {
    /// A new transfer intent to admit
    Event(BridgeEvent),
    /// Status update for an existing record
    Completed {
        tx_id: String,
        chain_id: ChainId,
        transaction_hash: String,
    },
}

/// Convert a log observed on `chain` into its canonical form.
///
/// TokenBurned needs a follow-up `getTransaction` read for its routing data.
pub async fn resolve_log(
    chain: &dyn BridgeChain,
    log: ObservedLog,
) -> Result<ResolvedLog, ResolveError> {
    let source_chain = chain.chain_id();
    let ObservedLog {
        payload,
        block_number,
        transaction_hash,
    } = log;

    match payload {
        LogPayload::TokenLocked {
            tx_id,
            user,
            token,
            amount,
            target_chain,
            target_address,
        } => Ok(ResolvedLog::Event(BridgeEvent {
            tx_id,
            event_type: BridgeEventKind::TokenLocked,
            source_chain,
            target_chain,
            user_address: user,
            token_address: token,
            target_address,
            amount,
            block_number,
            transaction_hash,
            confirmations: 0,
            status: EventStatus::Pending,
        })),
        LogPayload::TokenBurned {
            tx_id,
            user,
            token,
            amount,
        } => {
            let record = match chain.get_transaction(&tx_id).await {
                Ok(record) => record,
                Err(e) => {
                    return Err(ResolveError::Lookup {
                        tx_id,
                        reason: format!("{:#}", e),
                    })
                }
            };
            if record.target_chain == 0 {
                return Err(ResolveError::NoTargetChain { tx_id });
            }

            Ok(ResolvedLog::Event(BridgeEvent {
                tx_id,
                event_type: BridgeEventKind::TokenBurned,
                source_chain,
                target_chain: record.target_chain,
                user_address: user,
                token_address: token,
                target_address: record.target_address,
                amount,
                block_number,
                transaction_hash,
                confirmations: 0,
                status: EventStatus::Pending,
            }))
        }
        LogPayload::BridgeCompleted { tx_id } => Ok(ResolvedLog::Completed {
            tx_id,
            chain_id: source_chain,
            transaction_hash,
        }),
    }
}
