//! Audit trail for policy and identity changes.
//!
//! Handlers publish onto a broadcast bus; a background listener persists each
//! event into `audit_log`, chaining rows with SHA256(prev_hash || payload).
//! Publishing never fails the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<String>,
    pub severity: Severity,
    pub payload: Value,
}

pub type EventBus = broadcast::Sender<DomainEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<DomainEvent>) {
    broadcast::channel(1024)
}

/// Publishes `<entity>.<action>` for the given entity.
pub fn log_activity<T: Loggable>(event_bus: &EventBus, action: &str, actor_id: Option<Uuid>, entity: &T) {
    let event = DomainEvent {
        id: Uuid::new_v4(),
        name: format!("{}.{}", T::entity_type(), action),
        occurred_at: Utc::now(),
        actor_id,
        subject_id: Some(entity.subject_id()),
        severity: entity.severity_for_action(action),
        payload: serde_json::to_value(entity).unwrap_or_default(),
    };

    tracing::debug!(event = %event.name, subject = ?event.subject_id, "audit event published");

    // no subscriber means auditing is disabled for this process
    let _ = event_bus.send(event);
}

pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn start_activity_listener(mut rx: broadcast::Receiver<DomainEvent>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged; events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Err(err) = persist_event(&pool, &event).await {
            tracing::error!(error = %err, event = %event.name, "failed to write audit log");
        }
    }
}

async fn persist_event(pool: &SqlitePool, event: &DomainEvent) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();

    let mut tx = pool.begin().await?;

    let last: Option<(String, i64)> = sqlx::query_as("SELECT hash, seq FROM audit_log ORDER BY seq DESC LIMIT 1")
        .fetch_optional(&mut *tx)
        .await?;

    let prev_hash = last.as_ref().map(|(hash, _)| hash.as_str());
    let seq = last.as_ref().map(|(_, seq)| seq + 1).unwrap_or(1);
    let hash = chain_hash(prev_hash, &payload);

    sqlx::query(
        "INSERT INTO audit_log (id, event_name, actor_id, subject_id, occurred_at, payload, severity, prev_hash, hash, seq) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(&event.name)
    .bind(event.actor_id.map(|id| id.to_string()))
    .bind(&event.subject_id)
    .bind(event.occurred_at)
    .bind(&payload)
    .bind(event.severity.as_str())
    .bind(prev_hash)
    .bind(&hash)
    .bind(seq)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}
