//! Durable storage: session/consumer/cost-ledger contracts plus an
//! in-memory and a Postgres-backed implementation of each.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::{InMemoryConsumerStore, InMemoryCostLedger, InMemorySessionStore};
pub use sql::{SqlConsumerStore, SqlCostLedger, SqlSessionStore};
pub use traits::{Consumer, ConsumerStore, CostInsertOutcome, CostLedger, CostRecord, SessionStore};
