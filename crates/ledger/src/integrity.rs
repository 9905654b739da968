//! Chain verification over stored records.
//!
//! Verification only reads: a break is evidence of tampering or storage
//! corruption and is reported, never repaired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fiscalchain_core::TenantId;

use crate::hash::GENESIS_HASH;
use crate::record::InvoiceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    Valid,
    Broken,
    Empty,
}

/// First point where a stored chain stops being self-consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChainBreak {
    /// Recomputed digest differs from the stored `hash_record`.
    HashMismatch { sequence_no: u64 },
    /// Stored `hash_previous` differs from the predecessor's stored `hash_record`.
    LinkMismatch { sequence_no: u64 },
    /// Sequence numbers are not contiguous from 1.
    SequenceGap { expected: u64, found: u64 },
}

impl ChainBreak {
    pub fn sequence_no(&self) -> u64 {
        match self {
            ChainBreak::HashMismatch { sequence_no } | ChainBreak::LinkMismatch { sequence_no } => {
                *sequence_no
            }
            ChainBreak::SequenceGap { found, .. } => *found,
        }
    }

    /// Number of leading records that verified before the break.
    pub fn verified_before(&self) -> u64 {
        match self {
            ChainBreak::HashMismatch { sequence_no } | ChainBreak::LinkMismatch { sequence_no } => {
                sequence_no.saturating_sub(1)
            }
            ChainBreak::SequenceGap { expected, .. } => expected.saturating_sub(1),
        }
    }
}

impl core::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ChainBreak::HashMismatch { sequence_no } => {
                write!(f, "hash mismatch at sequence {sequence_no}")
            }
            ChainBreak::LinkMismatch { sequence_no } => {
                write!(f, "broken link at sequence {sequence_no}")
            }
            ChainBreak::SequenceGap { expected, found } => {
                write!(f, "sequence gap: expected {expected}, found {found}")
            }
        }
    }
}

/// Walk `records` (ascending by sequence) and return how many were checked.
///
/// Record 1 is recomputed from the genesis constant; every later record is
/// recomputed from the previous record's *stored* `hash_record`.
pub fn verify_chain(records: &[InvoiceRecord]) -> Result<u64, ChainBreak> {
    let mut previous_hash = GENESIS_HASH;
    let mut expected_sequence = 1u64;

    for record in records {
        if record.sequence_no() != expected_sequence {
            return Err(ChainBreak::SequenceGap {
                expected: expected_sequence,
                found: record.sequence_no(),
            });
        }
        if record.recompute_hash(previous_hash) != record.hash_record() {
            return Err(ChainBreak::HashMismatch {
                sequence_no: record.sequence_no(),
            });
        }
        if record.hash_previous() != previous_hash {
            return Err(ChainBreak::LinkMismatch {
                sequence_no: record.sequence_no(),
            });
        }
        previous_hash = record.hash_record();
        expected_sequence += 1;
    }

    Ok(expected_sequence - 1)
}

/// Outcome of one integrity check over a tenant chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheckResult {
    pub tenant_id: TenantId,
    pub status: IntegrityStatus,
    pub broken_at_sequence_no: Option<u64>,
    pub chain_break: Option<ChainBreak>,
    pub records_checked: u64,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityCheckResult {
    pub fn evaluate(
        tenant_id: TenantId,
        records: &[InvoiceRecord],
        checked_at: DateTime<Utc>,
    ) -> Self {
        if records.is_empty() {
            return Self {
                tenant_id,
                status: IntegrityStatus::Empty,
                broken_at_sequence_no: None,
                chain_break: None,
                records_checked: 0,
                checked_at,
            };
        }

        match verify_chain(records) {
            Ok(checked) => Self {
                tenant_id,
                status: IntegrityStatus::Valid,
                broken_at_sequence_no: None,
                chain_break: None,
                records_checked: checked,
                checked_at,
            },
            Err(chain_break) => Self {
                tenant_id,
                status: IntegrityStatus::Broken,
                broken_at_sequence_no: Some(chain_break.sequence_no()),
                records_checked: chain_break.verified_before(),
                chain_break: Some(chain_break),
                checked_at,
            },
        }
    }

    pub fn is_broken(&self) -> bool {
        self.status == IntegrityStatus::Broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{CanonicalPayload, RecordKind};
    use crate::record::{SignatureRef, TenantChainState};
    use proptest::prelude::*;

    fn build_chain(tenant_id: TenantId, payloads: &[String]) -> Vec<InvoiceRecord> {
        let mut tail = TenantChainState::genesis(tenant_id);
        let mut records = Vec::with_capacity(payloads.len());
        for (i, text) in payloads.iter().enumerate() {
            let payload =
                CanonicalPayload::from_parts(RecordKind::Alta, format!("INV-{i}"), text.clone());
            let signature = SignatureRef::new(format!("sig-{i}"));
            let record = InvoiceRecord::seal(&tail, &payload, signature, Utc::now());
            tail = tail.advanced_by(&record);
            records.push(record);
        }
        records
    }

    /// Simulate storage tampering by rewriting a persisted field.
    fn tamper(record: &InvoiceRecord, field: &str, value: &str) -> InvoiceRecord {
        let mut json = serde_json::to_value(record).unwrap();
        json[field] = serde_json::Value::String(value.to_string());
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn empty_chain_is_reported_as_empty() {
        let result = IntegrityCheckResult::evaluate(TenantId::new(), &[], Utc::now());
        assert_eq!(result.status, IntegrityStatus::Empty);
        assert_eq!(result.broken_at_sequence_no, None);
    }

    #[test]
    fn corrupted_hash_breaks_at_that_record() {
        let tenant = TenantId::new();
        let payloads: Vec<String> = (1..=5).map(|i| format!("p{i}")).collect();
        let mut records = build_chain(tenant, &payloads);
        records[1] = tamper(&records[1], "hash_record", "DEADBEEF");

        let result = IntegrityCheckResult::evaluate(tenant, &records, Utc::now());
        assert_eq!(result.status, IntegrityStatus::Broken);
        assert_eq!(result.broken_at_sequence_no, Some(2));
        assert_eq!(result.records_checked, 1);
    }

    #[test]
    fn edited_payload_is_detected() {
        let tenant = TenantId::new();
        let payloads: Vec<String> = (1..=3).map(|i| format!("p{i}")).collect();
        let mut records = build_chain(tenant, &payloads);
        records[2] = tamper(&records[2], "canonical_payload", "ImporteTotal=0.01");

        assert_eq!(
            verify_chain(&records),
            Err(ChainBreak::HashMismatch { sequence_no: 3 })
        );
    }

    #[test]
    fn rewritten_link_field_is_detected() {
        let tenant = TenantId::new();
        let payloads: Vec<String> = (1..=3).map(|i| format!("p{i}")).collect();
        let mut records = build_chain(tenant, &payloads);
        records[0] = tamper(&records[0], "hash_previous", "FF");

        assert_eq!(
            verify_chain(&records),
            Err(ChainBreak::LinkMismatch { sequence_no: 1 })
        );
    }

    #[test]
    fn missing_record_is_a_gap() {
        let tenant = TenantId::new();
        let payloads: Vec<String> = (1..=4).map(|i| format!("p{i}")).collect();
        let mut records = build_chain(tenant, &payloads);
        records.remove(1);

        assert_eq!(
            verify_chain(&records),
            Err(ChainBreak::SequenceGap { expected: 2, found: 3 })
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: an untouched chain always verifies and links to genesis.
        #[test]
        fn untouched_chain_is_valid(payloads in prop::collection::vec("[a-z0-9=&]{0,24}", 1..40)) {
            let records = build_chain(TenantId::new(), &payloads);

            prop_assert_eq!(records[0].hash_previous(), GENESIS_HASH);
            for pair in records.windows(2) {
                prop_assert_eq!(pair[1].hash_previous(), pair[0].hash_record());
            }
            prop_assert_eq!(verify_chain(&records), Ok(records.len() as u64));
        }

        /// Property: corrupting any single stored hash is reported at that record.
        #[test]
        fn any_corrupted_hash_is_located(
            payloads in prop::collection::vec("[a-z]{1,12}", 2..30),
            index in any::<prop::sample::Index>(),
        ) {
            let tenant = TenantId::new();
            let mut records = build_chain(tenant, &payloads);
            let i = index.index(records.len());
            records[i] = tamper(&records[i], "hash_record", "00");

            let result = IntegrityCheckResult::evaluate(tenant, &records, Utc::now());
            prop_assert_eq!(result.status, IntegrityStatus::Broken);
            prop_assert_eq!(result.broken_at_sequence_no, Some(i as u64 + 1));
        }
    }
}
