//! Adjudication queue: outstanding disagreements, append-only resolution
//! history, JSON-lines ledger, and worksheet import.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::canonical::Vocabularies;
use crate::config::BinaryCoercion;
use crate::error::ReconError;
use crate::loader::parse_value;
use crate::model::{ConsensusRecord, EntityId, Provenance, RaterId, Value};
use crate::schema::SchemaRegistry;

type Key = (EntityId, String);

fn key(entity_id: &str, variable: &str) -> Key {
    (entity_id.to_string(), variable.to_string())
}

/// Short digest of the candidate values. Worksheet rows carry it so a
/// resolution made against outdated candidates can be detected on import.
pub fn fingerprint(entity_id: &str, variable: &str, candidates: &BTreeMap<RaterId, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(variable.as_bytes());
    for (rater, value) in candidates {
        hasher.update([0u8]);
        hasher.update(rater.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.render().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationItem {
    pub entity_id: EntityId,
    pub variable: String,
    pub candidates: BTreeMap<RaterId, Value>,
    pub fingerprint: String,
    pub enqueued_at: DateTime<Utc>,
}

impl AdjudicationItem {
    pub fn raters(&self) -> Vec<RaterId> {
        self.candidates.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AdjudicationQueue {
    outstanding: BTreeMap<Key, AdjudicationItem>,
    history: BTreeMap<Key, Vec<ConsensusRecord>>,
}

impl AdjudicationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild resolution history from a JSON-lines ledger.
    pub fn from_ledger(ledger: &str) -> Result<Self, ReconError> {
        let mut queue = Self::new();
        for (line_no, line) in ledger.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: ConsensusRecord = serde_json::from_str(line)?;
            if record.provenance != Provenance::Adjudicated {
                return Err(ReconError::InvalidRecord(format!(
                    "ledger line {}: provenance is {}, expected adjudicated",
                    line_no + 1,
                    record.provenance
                )));
            }
            queue
                .history
                .entry(key(&record.entity_id, &record.variable))
                .or_default()
                .push(record);
        }
        Ok(queue)
    }

    /// Queue a disagreement. Returns false when the pair is already resolved
    /// or already queued with the same candidates.
    pub fn enqueue(
        &mut self,
        entity_id: &str,
        variable: &str,
        candidates: BTreeMap<RaterId, Value>,
    ) -> bool {
        let key = key(entity_id, variable);
        if self.history.contains_key(&key) {
            debug!(entity = entity_id, variable, "already adjudicated; not queued");
            return false;
        }
        let fingerprint = fingerprint(entity_id, variable, &candidates);
        if self
            .outstanding
            .get(&key)
            .is_some_and(|item| item.fingerprint == fingerprint)
        {
            return false;
        }
        self.outstanding.insert(
            key,
            AdjudicationItem {
                entity_id: entity_id.to_string(),
                variable: variable.to_string(),
                candidates,
                fingerprint,
                enqueued_at: Utc::now(),
            },
        );
        true
    }

    /// Drop all outstanding items; resolution history is kept.
    pub fn clear_pending(&mut self) {
        self.outstanding.clear();
    }

    /// Record an adjudicated value. Resolving twice appends a superseding
    /// record; earlier ones stay in the history.
    pub fn resolve(
        &mut self,
        registry: &SchemaRegistry,
        entity_id: &str,
        variable: &str,
        final_value: Value,
        adjudicator: &str,
    ) -> Result<ConsensusRecord, ReconError> {
        let def = registry.lookup(variable)?;
        if def.is_derived() {
            return Err(ReconError::DerivedOverride(variable.to_string()));
        }
        if !def.kind.admits(&final_value) {
            return Err(ReconError::InvalidValue {
                variable: variable.to_string(),
                value: final_value.render(),
                expected: def.kind.expected(),
            });
        }
        if adjudicator.trim().is_empty() {
            return Err(ReconError::InvalidRecord("adjudicator id must not be empty".into()));
        }

        let key = key(entity_id, variable);
        let raters = match self.outstanding.remove(&key) {
            Some(item) => item.raters(),
            None => self
                .latest(entity_id, variable)
                .map(|r| r.raters.clone())
                .unwrap_or_default(),
        };

        let record = ConsensusRecord {
            entity_id: entity_id.to_string(),
            variable: variable.to_string(),
            value: Some(final_value),
            provenance: Provenance::Adjudicated,
            adjudicator: Some(adjudicator.to_string()),
            raters,
            tokens: Vec::new(),
            decided_at: Utc::now(),
        };
        info!(
            entity = entity_id,
            variable,
            adjudicator,
            value = %record.rendered_value(),
            "adjudicated"
        );
        self.history.entry(key).or_default().push(record.clone());
        Ok(record)
    }

    /// The resolution currently in force for (entity, variable).
    pub fn latest(&self, entity_id: &str, variable: &str) -> Option<&ConsensusRecord> {
        self.history
            .get(&key(entity_id, variable))
            .and_then(|records| records.last())
    }

    /// Every resolution for (entity, variable), oldest first.
    pub fn history(&self, entity_id: &str, variable: &str) -> &[ConsensusRecord] {
        self.history
            .get(&key(entity_id, variable))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn item(&self, entity_id: &str, variable: &str) -> Option<&AdjudicationItem> {
        self.outstanding.get(&key(entity_id, variable))
    }

    /// Outstanding items in (entity, variable) order, as of this call.
    pub fn pending(&self) -> impl Iterator<Item = &AdjudicationItem> + '_ {
        self.outstanding.values()
    }

    pub fn pending_count(&self) -> usize {
        self.outstanding.len()
    }

    /// The full history as JSON lines.
    pub fn to_ledger(&self) -> Result<String, ReconError> {
        let records: Vec<_> = self.history.values().flatten().cloned().collect();
        ledger_lines(&records)
    }

    /// Resolve every completed worksheet row. Rows with an empty final value
    /// are skipped; invalid rows are rejected without touching the queue.
    pub fn apply_worksheet(
        &mut self,
        rows: &[WorksheetRow],
        registry: &SchemaRegistry,
        vocabularies: &Vocabularies,
        coercion: BinaryCoercion,
        adjudicator: &str,
    ) -> WorksheetImport {
        let mut import = WorksheetImport::default();
        for row in rows {
            if row.final_value.trim().is_empty() {
                import.skipped += 1;
                continue;
            }
            let reject = |reason: String| RejectedRow {
                entity_id: row.entity_id.clone(),
                variable: row.variable.clone(),
                reason,
            };

            let current = self.item(&row.entity_id, &row.variable);
            if let (Some(item), Some(expected)) = (current, row.fingerprint.as_deref()) {
                if !expected.is_empty() && item.fingerprint != expected {
                    import
                        .rejected
                        .push(reject("candidate values changed since export".into()));
                    continue;
                }
            }

            let value = registry
                .lookup(&row.variable)
                .and_then(|def| parse_value(def, row.final_value.trim(), coercion, vocabularies));
            let who = row
                .adjudicator
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or(adjudicator);
            match value.and_then(|v| self.resolve(registry, &row.entity_id, &row.variable, v, who)) {
                Ok(record) => import.applied.push(record),
                Err(e) => import.rejected.push(reject(e.to_string())),
            }
        }
        import
    }
}

/// Serialize records as one JSON document per line.
pub fn ledger_lines(records: &[ConsensusRecord]) -> Result<String, ReconError> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Worksheet
// ---------------------------------------------------------------------------

/// A worksheet row as read back from the adjudicator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorksheetRow {
    pub entity_id: EntityId,
    pub variable: String,
    pub fingerprint: Option<String>,
    pub final_value: String,
    pub adjudicator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    pub entity_id: EntityId,
    pub variable: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorksheetImport {
    pub applied: Vec<ConsensusRecord>,
    pub rejected: Vec<RejectedRow>,
    pub skipped: usize,
}
