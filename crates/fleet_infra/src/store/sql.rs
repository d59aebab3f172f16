//! Postgres-backed durable store. Schema is assumed pre-migrated; this
//! module only issues queries. Cost-record idempotence is enforced at the
//! database layer via a unique constraint on `(session_id, hour_bucket_s)`,
//! caught and translated rather than pre-checked.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use fleet_core::error::{FleetError, FleetErrorKind};
use fleet_core::session::{
    LaunchMode, ReachabilityHandle, Session, SessionConfig, SessionStatus, StoragePolicy,
};

use crate::store::traits::{Consumer, ConsumerStore, CostInsertOutcome, CostLedger, CostRecord, SessionStore};

pub struct SqlSessionStore {
    pool: PgPool,
}

impl SqlSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Pending => "pending",
        SessionStatus::Provisioning => "provisioning",
        SessionStatus::Running => "running",
        SessionStatus::Stopping => "stopping",
        SessionStatus::Stopped => "stopped",
        SessionStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> Result<SessionStatus, FleetError> {
    match s {
        "pending" => Ok(SessionStatus::Pending),
        "provisioning" => Ok(SessionStatus::Provisioning),
        "running" => Ok(SessionStatus::Running),
        "stopping" => Ok(SessionStatus::Stopping),
        "stopped" => Ok(SessionStatus::Stopped),
        "failed" => Ok(SessionStatus::Failed),
        other => Err(FleetError::new(
            FleetErrorKind::NotFound,
            other,
            "unrecognized session status in storage",
        )),
    }
}

fn storage_policy_to_str(policy: StoragePolicy) -> &'static str {
    match policy {
        StoragePolicy::Preserve => "preserve",
        StoragePolicy::Destroy => "destroy",
    }
}

fn launch_mode_to_str(mode: LaunchMode) -> &'static str {
    match mode {
        LaunchMode::Ssh => "ssh",
        LaunchMode::Entrypoint => "entrypoint",
    }
}

fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session, FleetError> {
    let status_str: String = row.try_get("status").map_err(sql_err)?;
    let storage_policy_str: String = row.try_get("storage_policy").map_err(sql_err)?;
    let launch_mode_str: String = row.try_get("launch_mode").map_err(sql_err)?;
    let host: Option<String> = row.try_get("host").map_err(sql_err)?;

    let reachability = host.map(|host| ReachabilityHandle {
        host,
        port: row.try_get::<i32, _>("port").unwrap_or(22) as u16,
        user: row.try_get("user_name").unwrap_or_else(|_| "root".to_string()),
        api_endpoint: row.try_get("api_endpoint").ok(),
    });

    Ok(Session {
        id: row.try_get("id").map_err(sql_err)?,
        consumer_id: row.try_get("consumer_id").map_err(sql_err)?,
        offer_id: row.try_get("offer_id").map_err(sql_err)?,
        provider: row.try_get("provider").map_err(sql_err)?,
        gpu_model: row.try_get("gpu_model").map_err(sql_err)?,
        provider_instance_id: row.try_get("provider_instance_id").map_err(sql_err)?,
        config: SessionConfig {
            workload_tag: row.try_get("workload_tag").map_err(sql_err)?,
            reservation_hours: row.try_get::<i32, _>("reservation_hours").map_err(sql_err)? as u32,
            idle_threshold_minutes: row.try_get::<i32, _>("idle_threshold_minutes").map_err(sql_err)? as u32,
            storage_policy: match storage_policy_str.as_str() {
                "preserve" => StoragePolicy::Preserve,
                _ => StoragePolicy::Destroy,
            },
            hard_max_override: row.try_get("hard_max_override").map_err(sql_err)?,
            launch_mode: match launch_mode_str.as_str() {
                "entrypoint" => LaunchMode::Entrypoint,
                _ => LaunchMode::Ssh,
            },
        },
        reachability,
        status: status_from_str(&status_str)?,
        created_at_ms: row.try_get::<i64, _>("created_at_ms").map_err(sql_err)? as u64,
        expires_at_ms: row.try_get::<i64, _>("expires_at_ms").map_err(sql_err)? as u64,
        stopped_at_ms: row
            .try_get::<Option<i64>, _>("stopped_at_ms")
            .map_err(sql_err)?
            .map(|v| v as u64),
        last_error: row.try_get("last_error").map_err(sql_err)?,
        price_per_hour: row.try_get("price_per_hour").map_err(sql_err)?,
        retry_count: row.try_get::<i32, _>("retry_count").map_err(sql_err)? as u32,
    })
}

fn sql_err(e: sqlx::Error) -> FleetError {
    FleetError::new(FleetErrorKind::NotFound, "sql", e.to_string())
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn insert(&self, session: Session) -> Result<(), FleetError> {
        let existing = self
            .active_session_for(&session.consumer_id, &session.offer_id)
            .await?;
        if existing.is_some() {
            return Err(FleetError::new(
                FleetErrorKind::DuplicateSession,
                &session.id,
                "an active session already exists for this consumer and offer",
            ));
        }

        sqlx::query(
            "INSERT INTO sessions (id, consumer_id, offer_id, provider, gpu_model, provider_instance_id, \
             workload_tag, reservation_hours, idle_threshold_minutes, storage_policy, \
             hard_max_override, launch_mode, host, port, user_name, api_endpoint, status, \
             created_at_ms, expires_at_ms, stopped_at_ms, last_error, price_per_hour, retry_count) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23)",
        )
        .bind(&session.id)
        .bind(&session.consumer_id)
        .bind(&session.offer_id)
        .bind(&session.provider)
        .bind(&session.gpu_model)
        .bind(&session.provider_instance_id)
        .bind(&session.config.workload_tag)
        .bind(session.config.reservation_hours as i32)
        .bind(session.config.idle_threshold_minutes as i32)
        .bind(storage_policy_to_str(session.config.storage_policy))
        .bind(session.config.hard_max_override)
        .bind(launch_mode_to_str(session.config.launch_mode))
        .bind(session.reachability.as_ref().map(|r| r.host.clone()))
        .bind(session.reachability.as_ref().map(|r| r.port as i32))
        .bind(session.reachability.as_ref().map(|r| r.user.clone()))
        .bind(session.reachability.as_ref().and_then(|r| r.api_endpoint.clone()))
        .bind(status_to_str(session.status))
        .bind(session.created_at_ms as i64)
        .bind(session.expires_at_ms as i64)
        .bind(session.stopped_at_ms.map(|v| v as i64))
        .bind(&session.last_error)
        .bind(session.price_per_hour)
        .bind(session.retry_count as i32)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, FleetError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn compare_and_swap_status(
        &self,
        session_id: &str,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<Session, FleetError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = $1 WHERE id = $2 AND status = $3 RETURNING *",
        )
        .bind(status_to_str(next))
        .bind(session_id)
        .bind(status_to_str(expected))
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;

        match result {
            Some(row) => row_to_session(&row),
            None => Err(FleetError::new(
                FleetErrorKind::TerminalSession,
                session_id,
                "status did not match expected value, or session does not exist",
            )),
        }
    }

    async fn update(&self, session: Session) -> Result<(), FleetError> {
        sqlx::query(
            "UPDATE sessions SET provider_instance_id = $1, host = $2, port = $3, user_name = $4, \
             api_endpoint = $5, status = $6, stopped_at_ms = $7, last_error = $8, retry_count = $9 \
             WHERE id = $10",
        )
        .bind(&session.provider_instance_id)
        .bind(session.reachability.as_ref().map(|r| r.host.clone()))
        .bind(session.reachability.as_ref().map(|r| r.port as i32))
        .bind(session.reachability.as_ref().map(|r| r.user.clone()))
        .bind(session.reachability.as_ref().and_then(|r| r.api_endpoint.clone()))
        .bind(status_to_str(session.status))
        .bind(session.stopped_at_ms.map(|v| v as i64))
        .bind(&session.last_error)
        .bind(session.retry_count as i32)
        .bind(&session.id)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Session>, FleetError> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE status IN ('pending', 'provisioning', 'running')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;
        rows.iter().map(row_to_session).collect()
    }

    async fn list_all(&self) -> Result<Vec<Session>, FleetError> {
        let rows = sqlx::query("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        rows.iter().map(row_to_session).collect()
    }

    async fn active_session_for(
        &self,
        consumer_id: &str,
        offer_id: &str,
    ) -> Result<Option<Session>, FleetError> {
        let row = sqlx::query(
            "SELECT * FROM sessions WHERE consumer_id = $1 AND offer_id = $2 \
             AND status IN ('pending', 'provisioning', 'running') LIMIT 1",
        )
        .bind(consumer_id)
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        row.as_ref().map(row_to_session).transpose()
    }
}

pub struct SqlConsumerStore {
    pool: PgPool,
}

impl SqlConsumerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConsumerStore for SqlConsumerStore {
    async fn get(&self, consumer_id: &str) -> Result<Option<Consumer>, FleetError> {
        let row = sqlx::query("SELECT * FROM consumers WHERE id = $1")
            .bind(consumer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(row.map(|row| Consumer {
            id: row.get("id"),
            monthly_budget_limit: row.get("monthly_budget_limit"),
            current_period_spend: row.get("current_period_spend"),
            alert_sent: row.get("alert_sent"),
            webhook_target: row.get("webhook_target"),
        }))
    }

    async fn upsert(&self, consumer: Consumer) -> Result<(), FleetError> {
        sqlx::query(
            "INSERT INTO consumers (id, monthly_budget_limit, current_period_spend, alert_sent, webhook_target) \
             VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (id) DO UPDATE SET monthly_budget_limit = $2, current_period_spend = $3, \
             alert_sent = $4, webhook_target = $5",
        )
        .bind(&consumer.id)
        .bind(consumer.monthly_budget_limit)
        .bind(consumer.current_period_spend)
        .bind(consumer.alert_sent)
        .bind(&consumer.webhook_target)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }
}

pub struct SqlCostLedger {
    pool: PgPool,
}

impl SqlCostLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CostLedger for SqlCostLedger {
    async fn record(&self, record: CostRecord) -> Result<CostInsertOutcome, FleetError> {
        let result = sqlx::query(
            "INSERT INTO cost_records (session_id, consumer_id, provider, gpu_model, hour_bucket_s, amount, currency) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) ON CONFLICT (session_id, hour_bucket_s) DO NOTHING",
        )
        .bind(&record.session_id)
        .bind(&record.consumer_id)
        .bind(&record.provider)
        .bind(&record.gpu_model)
        .bind(record.hour_bucket_s)
        .bind(record.amount)
        .bind(&record.currency)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        Ok(if result.rows_affected() == 0 {
            CostInsertOutcome::AlreadyPresent
        } else {
            CostInsertOutcome::Inserted
        })
    }

    async fn total_for_period(&self, consumer_id: &str, since_hour_bucket_s: i64) -> Result<f64, FleetError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM cost_records \
             WHERE consumer_id = $1 AND hour_bucket_s >= $2",
        )
        .bind(consumer_id)
        .bind(since_hour_bucket_s)
        .fetch_one(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.get::<f64, _>("total"))
    }
}
