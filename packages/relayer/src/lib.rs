//! Bridge relayer - event-sourcing engine
//!
//! Watches the bridge contract on every configured chain, deduplicates bridge
//! events by tx id and persists them, reconciling live-subscription gaps with
//! a periodic historical backfill. Re-exports modules for integration tests.

pub mod alerts;
pub mod api;
pub mod backfill;
pub mod chain;
pub mod config;
pub mod confirmation;
pub mod connection;
pub mod contracts;
pub mod db;
pub mod events;
pub mod metrics;
pub mod processor;
pub mod relayer;
pub mod status;
pub mod subscriber;
pub mod types;

pub use relayer::Relayer;
