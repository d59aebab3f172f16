//! Storage contracts for sessions, consumers, and cost records. One
//! implementation lives in memory for tests and local runs
//! ([`crate::store::memory`]); the durable one talks to Postgres
//! ([`crate::store::sql`]).

use async_trait::async_trait;

use fleet_core::error::FleetError;
use fleet_core::session::Session;

/// A consumer's budget state, namespaced away from HTTP-layer account data
/// this repo never owns.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub id: String,
    pub monthly_budget_limit: f64,
    pub current_period_spend: f64,
    pub alert_sent: bool,
    pub webhook_target: Option<String>,
}

/// One idempotent hourly charge.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRecord {
    pub session_id: String,
    pub consumer_id: String,
    pub provider: String,
    pub gpu_model: String,
    pub hour_bucket_s: i64,
    pub amount: f64,
    pub currency: String,
}

/// Whether a cost-record insert actually wrote a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostInsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Session persistence. `insert` enforces I2 (one active session per
/// consumer+offer) by rejecting a second active insert for the same pair;
/// `compare_and_swap_status` enforces I1 by requiring the caller to name
/// the status it believes is current.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), FleetError>;
    async fn get(&self, session_id: &str) -> Result<Option<Session>, FleetError>;
    async fn compare_and_swap_status(
        &self,
        session_id: &str,
        expected: fleet_core::session::SessionStatus,
        next: fleet_core::session::SessionStatus,
    ) -> Result<Session, FleetError>;
    async fn update(&self, session: Session) -> Result<(), FleetError>;
    async fn list_active(&self) -> Result<Vec<Session>, FleetError>;
    async fn list_all(&self) -> Result<Vec<Session>, FleetError>;
    async fn active_session_for(
        &self,
        consumer_id: &str,
        offer_id: &str,
    ) -> Result<Option<Session>, FleetError>;
}

#[async_trait]
pub trait ConsumerStore: Send + Sync {
    async fn get(&self, consumer_id: &str) -> Result<Option<Consumer>, FleetError>;
    async fn upsert(&self, consumer: Consumer) -> Result<(), FleetError>;
}

/// Append-only, idempotent by (session id, hour-bucket).
#[async_trait]
pub trait CostLedger: Send + Sync {
    async fn record(&self, record: CostRecord) -> Result<CostInsertOutcome, FleetError>;
    async fn total_for_period(&self, consumer_id: &str, since_hour_bucket_s: i64) -> Result<f64, FleetError>;
}
