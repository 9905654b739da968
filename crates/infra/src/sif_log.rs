//! Append-only SIF event log (system-level audit trail).
//!
//! Every fiscally relevant action (record creation, batch lifecycle,
//! authority exchanges, integrity checks) leaves one event here. Events are
//! never updated or removed.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use fiscalchain_core::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SifEventKind {
    RecordCreate,
    RecordCancel,
    BatchCreate,
    AeatSubmit,
    AeatResponse,
    BatchDead,
    IntegrityCheck,
    IntegrityBroken,
}

impl SifEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SifEventKind::RecordCreate => "RECORD_CREATE",
            SifEventKind::RecordCancel => "RECORD_CANCEL",
            SifEventKind::BatchCreate => "BATCH_CREATE",
            SifEventKind::AeatSubmit => "AEAT_SUBMIT",
            SifEventKind::AeatResponse => "AEAT_RESPONSE",
            SifEventKind::BatchDead => "BATCH_DEAD",
            SifEventKind::IntegrityCheck => "INTEGRITY_CHECK",
            SifEventKind::IntegrityBroken => "INTEGRITY_BROKEN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SifEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub kind: SifEventKind,
    pub occurred_at: DateTime<Utc>,
    pub details: JsonValue,
}

impl SifEvent {
    pub fn new(
        tenant_id: TenantId,
        kind: SifEventKind,
        occurred_at: DateTime<Utc>,
        details: JsonValue,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            tenant_id,
            kind,
            occurred_at,
            details,
        }
    }
}

#[derive(Debug, Error)]
pub enum SifLogError {
    #[error("sif log storage error: {0}")]
    Storage(String),
}

pub trait SifEventLog: Send + Sync {
    fn append(&self, event: SifEvent) -> Result<(), SifLogError>;

    /// Events of one tenant in append order.
    fn list(&self, tenant_id: TenantId) -> Result<Vec<SifEvent>, SifLogError>;
}

impl<L> SifEventLog for Arc<L>
where
    L: SifEventLog + ?Sized,
{
    fn append(&self, event: SifEvent) -> Result<(), SifLogError> {
        (**self).append(event)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<SifEvent>, SifLogError> {
        (**self).list(tenant_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySifEventLog {
    events: RwLock<Vec<SifEvent>>,
}

impl InMemorySifEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SifEventLog for InMemorySifEventLog {
    fn append(&self, event: SifEvent) -> Result<(), SifLogError> {
        self.events
            .write()
            .map_err(|_| SifLogError::Storage("lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<SifEvent>, SifLogError> {
        let events = self
            .events
            .read()
            .map_err(|_| SifLogError::Storage("lock poisoned".to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

/// Append an event; the action it describes has already happened, so a log
/// failure is reported but not propagated.
pub(crate) fn record_event(
    log: &dyn SifEventLog,
    tenant_id: TenantId,
    kind: SifEventKind,
    occurred_at: DateTime<Utc>,
    details: JsonValue,
) {
    if let Err(err) = log.append(SifEvent::new(tenant_id, kind, occurred_at, details)) {
        tracing::error!(
            tenant_id = %tenant_id,
            kind = kind.as_str(),
            error = %err,
            "failed to write sif event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_serialize_as_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(SifEventKind::IntegrityBroken).unwrap(),
            json!("INTEGRITY_BROKEN")
        );
        assert_eq!(SifEventKind::AeatSubmit.as_str(), "AEAT_SUBMIT");
    }

    #[test]
    fn list_is_tenant_scoped_and_ordered() {
        let log = InMemorySifEventLog::new();
        let a = TenantId::new();
        let b = TenantId::new();
        let now = Utc::now();

        log.append(SifEvent::new(a, SifEventKind::RecordCreate, now, json!({ "sequence_no": 1 })))
            .unwrap();
        log.append(SifEvent::new(b, SifEventKind::RecordCreate, now, json!({})))
            .unwrap();
        log.append(SifEvent::new(a, SifEventKind::BatchCreate, now, json!({})))
            .unwrap();

        let kinds: Vec<_> = log.list(a).unwrap().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SifEventKind::RecordCreate, SifEventKind::BatchCreate]);
    }
}
