//! In-memory store implementations. Used by tests and local/dev runs; the
//! insert-if-absent shape for cost-record idempotence follows the same
//! atomic-single-map-operation pattern the old trade-ID registry used.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use fleet_core::error::{FleetError, FleetErrorKind};
use fleet_core::session::{Session, SessionStatus};

use crate::store::traits::{Consumer, ConsumerStore, CostInsertOutcome, CostLedger, CostRecord, SessionStore};

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), FleetError> {
        let mut sessions = self.sessions.write().await;
        let conflict = sessions.values().any(|existing| {
            existing.consumer_id == session.consumer_id
                && existing.offer_id == session.offer_id
                && existing.status.is_active()
        });
        if conflict {
            return Err(FleetError::new(
                FleetErrorKind::DuplicateSession,
                &session.id,
                "an active session already exists for this consumer and offer",
            ));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, FleetError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn compare_and_swap_status(
        &self,
        session_id: &str,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<Session, FleetError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::new(FleetErrorKind::NotFound, session_id, "session not found"))?;
        if session.status != expected {
            return Err(FleetError::new(
                FleetErrorKind::TerminalSession,
                session_id,
                format!("expected status {:?}, found {:?}", expected, session.status),
            ));
        }
        session.status = next;
        Ok(session.clone())
    }

    async fn update(&self, session: Session) -> Result<(), FleetError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(FleetError::new(
                FleetErrorKind::NotFound,
                &session.id,
                "session not found",
            ));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Session>, FleetError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Session>, FleetError> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }

    async fn active_session_for(
        &self,
        consumer_id: &str,
        offer_id: &str,
    ) -> Result<Option<Session>, FleetError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.consumer_id == consumer_id && s.offer_id == offer_id && s.status.is_active())
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConsumerStore {
    consumers: RwLock<HashMap<String, Consumer>>,
}

impl InMemoryConsumerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsumerStore for InMemoryConsumerStore {
    async fn get(&self, consumer_id: &str) -> Result<Option<Consumer>, FleetError> {
        Ok(self.consumers.read().await.get(consumer_id).cloned())
    }

    async fn upsert(&self, consumer: Consumer) -> Result<(), FleetError> {
        self.consumers.write().await.insert(consumer.id.clone(), consumer);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCostLedger {
    records: RwLock<HashMap<(String, i64), CostRecord>>,
}

impl InMemoryCostLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CostLedger for InMemoryCostLedger {
    async fn record(&self, record: CostRecord) -> Result<CostInsertOutcome, FleetError> {
        let key = (record.session_id.clone(), record.hour_bucket_s);
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Ok(CostInsertOutcome::AlreadyPresent);
        }
        records.insert(key, record);
        Ok(CostInsertOutcome::Inserted)
    }

    async fn total_for_period(&self, consumer_id: &str, since_hour_bucket_s: i64) -> Result<f64, FleetError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.consumer_id == consumer_id && r.hour_bucket_s >= since_hour_bucket_s)
            .map(|r| r.amount)
            .sum())
    }
}
