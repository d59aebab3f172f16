//! Hourly cost accrual, final-cost-on-termination, and budget threshold
//! alerts. Pure bucket/ratio math lives in `fleet_core::cost`; this module
//! owns the idempotent append and the consumer-side bookkeeping.

use std::sync::Arc;

use tracing::{info, warn};

use fleet_core::cost::{classify_budget, hour_buckets, truncate_to_hour, BudgetAlert};
use fleet_core::error::FleetError;
use fleet_core::session::{Session, SessionStatus};

use crate::store::{Consumer, ConsumerStore, CostInsertOutcome, CostLedger, CostRecord, SessionStore};

const CURRENCY: &str = "USD";

pub struct CostTracker {
    sessions: Arc<dyn SessionStore>,
    consumers: Arc<dyn ConsumerStore>,
    ledger: Arc<dyn CostLedger>,
}

impl CostTracker {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        consumers: Arc<dyn ConsumerStore>,
        ledger: Arc<dyn CostLedger>,
    ) -> Self {
        Self { sessions, consumers, ledger }
    }

    /// Every `cost_accrual_interval`: append one record per running session
    /// for the current hour-bucket, then re-check that consumer's budget.
    pub async fn run_accrual_tick_at(&self, now_s: i64) -> Result<u32, FleetError> {
        let bucket = truncate_to_hour(now_s);
        let running = self
            .sessions
            .list_active()
            .await?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Running);

        let mut recorded = 0;
        for session in running {
            let inserted = self.append_record(&session, bucket).await?;
            if inserted == CostInsertOutcome::Inserted {
                recorded += 1;
                self.recheck_budget(&session.consumer_id).await?;
            }
        }
        Ok(recorded)
    }

    /// On termination, back-fill every hour-bucket between creation and
    /// the stop time that has not already been recorded (idempotent — a
    /// crash between accrual and destroy never double-charges).
    pub async fn record_final(&self, session: &Session, stopped_at_ms: u64) -> Result<(), FleetError> {
        let buckets = hour_buckets(
            (session.created_at_ms / 1000) as i64,
            (stopped_at_ms / 1000) as i64,
        );
        for bucket in buckets {
            self.append_record(session, bucket).await?;
        }
        self.recheck_budget(&session.consumer_id).await?;
        Ok(())
    }

    async fn append_record(&self, session: &Session, hour_bucket_s: i64) -> Result<CostInsertOutcome, FleetError> {
        let record = CostRecord {
            session_id: session.id.clone(),
            consumer_id: session.consumer_id.clone(),
            provider: session.provider.clone(),
            gpu_model: session.gpu_model.clone(),
            hour_bucket_s,
            amount: session.price_per_hour,
            currency: CURRENCY.to_string(),
        };
        let outcome = self.ledger.record(record).await?;
        if outcome == CostInsertOutcome::Inserted {
            info!(session_id = %session.id, hour_bucket_s, "recorded cost accrual");
            if let Some(mut consumer) = self.consumers.get(&session.consumer_id).await? {
                consumer.current_period_spend += session.price_per_hour;
                self.consumers.upsert(consumer).await?;
            }
        }
        Ok(outcome)
    }

    async fn recheck_budget(&self, consumer_id: &str) -> Result<(), FleetError> {
        let Some(mut consumer) = self.consumers.get(consumer_id).await? else {
            return Ok(());
        };
        match classify_budget(
            consumer.current_period_spend,
            consumer.monthly_budget_limit,
            consumer.alert_sent,
        ) {
            Some(BudgetAlert::Exceeded) => {
                warn!(consumer_id, spend = consumer.current_period_spend, "consumer exceeded monthly budget");
                consumer.alert_sent = true;
                self.consumers.upsert(consumer).await?;
            }
            Some(BudgetAlert::Warning) => {
                warn!(consumer_id, spend = consumer.current_period_spend, "consumer approaching monthly budget");
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryConsumerStore, InMemoryCostLedger, InMemorySessionStore};
    use fleet_core::session::{LaunchMode, SessionConfig, StoragePolicy};

    fn session(consumer_id: &str) -> Session {
        Session {
            id: "s1".to_string(),
            consumer_id: consumer_id.to_string(),
            offer_id: "o1".to_string(),
            provider: "vastai".to_string(),
            gpu_model: "A100".to_string(),
            provider_instance_id: Some("inst-1".to_string()),
            config: SessionConfig {
                workload_tag: "train".to_string(),
                reservation_hours: 2,
                idle_threshold_minutes: 30,
                storage_policy: StoragePolicy::Destroy,
                hard_max_override: false,
                launch_mode: LaunchMode::Ssh,
            },
            reachability: None,
            status: SessionStatus::Running,
            created_at_ms: 0,
            expires_at_ms: 7_200_000,
            stopped_at_ms: None,
            last_error: None,
            price_per_hour: 0.6,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn accrual_tick_charges_every_running_session_once_per_bucket() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let consumers = Arc::new(InMemoryConsumerStore::new());
        let ledger = Arc::new(InMemoryCostLedger::new());
        sessions.insert(session("c1")).await.unwrap();
        consumers
            .upsert(Consumer {
                id: "c1".to_string(),
                monthly_budget_limit: 100.0,
                current_period_spend: 0.0,
                alert_sent: false,
                webhook_target: None,
            })
            .await
            .unwrap();

        let tracker = CostTracker::new(sessions, consumers.clone(), ledger);
        let recorded = tracker.run_accrual_tick_at(3_600).await.unwrap();
        assert_eq!(recorded, 1);
        let recorded_again = tracker.run_accrual_tick_at(3_600).await.unwrap();
        assert_eq!(recorded_again, 0);

        let consumer = consumers.get("c1").await.unwrap().unwrap();
        assert_eq!(consumer.current_period_spend, 0.6);
    }

    #[tokio::test]
    async fn budget_exceeded_sets_the_one_shot_alert_flag() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let consumers = Arc::new(InMemoryConsumerStore::new());
        let ledger = Arc::new(InMemoryCostLedger::new());
        sessions.insert(session("c1")).await.unwrap();
        consumers
            .upsert(Consumer {
                id: "c1".to_string(),
                monthly_budget_limit: 1.0,
                current_period_spend: 0.9,
                alert_sent: false,
                webhook_target: None,
            })
            .await
            .unwrap();

        let tracker = CostTracker::new(sessions, consumers.clone(), ledger);
        tracker.run_accrual_tick_at(3_600).await.unwrap();
        let consumer = consumers.get("c1").await.unwrap().unwrap();
        assert!(consumer.alert_sent);
    }
}
