//! Consensus merge: one final value per (entity, variable).
//!
//! Rules, in order: a single contributing rater yields `single-rater`;
//! agreement of every rater yields `unanimous`; a strict majority among three
//! or more raters yields `majority`; disagreeing list values merge to their
//! token union; anything else stays `pending` and is escalated. Derived
//! variables are then recomputed from the merged values of their components,
//! either as a sum or as the number of distinct tokens across list components.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::adjudication::AdjudicationQueue;
use crate::error::ReconError;
use crate::model::{
    ConsensusRecord, DataIssue, EntityId, NormalizedRecord, Provenance, RaterId, TokenProvenance,
    TokenSupport, Value,
};
use crate::schema::{Derivation, SchemaRegistry, VariableDefinition, VariableKind};

/// A disagreement the merge rules cannot settle.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    pub entity_id: EntityId,
    pub variable: String,
    pub candidates: BTreeMap<RaterId, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityMerge {
    pub records: Vec<ConsensusRecord>,
    pub escalations: Vec<Escalation>,
    pub issues: Vec<DataIssue>,
}

fn contributions(variable: &str, records: &[&NormalizedRecord]) -> BTreeMap<RaterId, Value> {
    records
        .iter()
        .filter_map(|r| {
            r.values
                .get(variable)
                .map(|v| (r.rater_id.clone(), v.clone()))
        })
        .collect()
}

fn token_union(candidates: &BTreeMap<RaterId, Value>) -> (BTreeSet<String>, Vec<TokenSupport>) {
    let mut support: BTreeMap<&str, usize> = BTreeMap::new();
    for value in candidates.values() {
        if let Value::List(tokens) = value {
            for token in tokens {
                *support.entry(token.as_str()).or_default() += 1;
            }
        }
    }
    let total = candidates.len();
    let annotated = support
        .iter()
        .map(|(token, &raters)| TokenSupport {
            token: token.to_string(),
            raters,
            support: if raters == total {
                TokenProvenance::Unanimous
            } else if raters * 2 > total {
                TokenProvenance::Majority
            } else {
                TokenProvenance::Minority
            },
        })
        .collect();
    (support.keys().map(|t| t.to_string()).collect(), annotated)
}

/// Apply the merge rules to one (entity, variable). `None` when nobody
/// contributed, or for free text that raters did not agree on.
pub fn merge_values(
    def: &VariableDefinition,
    entity_id: &str,
    candidates: &BTreeMap<RaterId, Value>,
    decided_at: DateTime<Utc>,
) -> Option<ConsensusRecord> {
    let first = candidates.values().next()?;
    let raters: Vec<RaterId> = candidates.keys().cloned().collect();
    let record = |value: Option<Value>, provenance: Provenance, tokens: Vec<TokenSupport>| {
        ConsensusRecord {
            entity_id: entity_id.to_string(),
            variable: def.name.clone(),
            value,
            provenance,
            adjudicator: None,
            raters: raters.clone(),
            tokens,
            decided_at,
        }
    };

    if candidates.len() == 1 {
        return Some(record(Some(first.clone()), Provenance::SingleRater, Vec::new()));
    }
    if candidates.values().all(|v| v == first) {
        return Some(record(Some(first.clone()), Provenance::Unanimous, Vec::new()));
    }
    if def.kind == VariableKind::FreeText {
        return None;
    }
    let is_list = matches!(def.kind, VariableKind::List { .. });
    if candidates.len() >= 3 && !is_list {
        let mut tally: BTreeMap<&Value, usize> = BTreeMap::new();
        for value in candidates.values() {
            *tally.entry(value).or_default() += 1;
        }
        if let Some((value, _)) = tally
            .into_iter()
            .find(|(_, count)| count * 2 > candidates.len())
        {
            return Some(record(Some(value.clone()), Provenance::Majority, Vec::new()));
        }
    }
    if is_list {
        let (tokens, support) = token_union(candidates);
        return Some(record(Some(Value::List(tokens)), Provenance::Union, support));
    }
    Some(record(None, Provenance::Pending, Vec::new()))
}

/// Merge one variable for one entity. `records` must all belong to the same
/// entity. Derived variables are recomputed from their merged components.
pub fn merge(
    registry: &SchemaRegistry,
    variable: &str,
    records: &[&NormalizedRecord],
    decided_at: DateTime<Utc>,
) -> Result<Option<ConsensusRecord>, ReconError> {
    let def = registry.lookup(variable)?;
    let Some(entity_id) = records.first().map(|r| r.entity_id.as_str()) else {
        return Ok(None);
    };
    if !def.is_derived() {
        return Ok(merge_values(def, entity_id, &contributions(variable, records), decided_at));
    }
    let components = registry
        .derived_components(variable)?
        .into_iter()
        .map(|c| merge_values(c, entity_id, &contributions(&c.name, records), decided_at))
        .collect::<Vec<_>>();
    match derive(def, entity_id, components.iter().flatten(), decided_at) {
        Derived::Record(record) => Ok(Some(record)),
        Derived::Uncoded | Derived::Overflow => Ok(None),
    }
}

/// Sorted distinct tokens across list values; other values are ignored.
pub fn distinct_tokens<'a>(values: impl IntoIterator<Item = &'a Value>) -> BTreeSet<String> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::List(tokens) => Some(tokens),
            _ => None,
        })
        .flatten()
        .cloned()
        .collect()
}

fn checked_total(values: impl IntoIterator<Item = u64>) -> Option<u64> {
    values.into_iter().try_fold(0u64, u64::checked_add)
}

fn token_count(tokens: &BTreeSet<String>) -> Option<u64> {
    u64::try_from(tokens.len()).ok()
}

/// Value a rater's own components derive to. `None` unless the rater coded
/// every component and the total fits a count.
fn rater_derivation(def: &VariableDefinition, record: &NormalizedRecord) -> Option<u64> {
    match def.derivation {
        Derivation::Sum => {
            let counts = def
                .derived_from
                .iter()
                .map(|c| record.values.get(c).and_then(Value::as_count))
                .collect::<Option<Vec<u64>>>()?;
            checked_total(counts)
        }
        Derivation::DistinctTokens => {
            let lists = def
                .derived_from
                .iter()
                .map(|c| record.values.get(c))
                .collect::<Option<Vec<&Value>>>()?;
            token_count(&distinct_tokens(lists))
        }
    }
}

enum Derived {
    Record(ConsensusRecord),
    /// No component was coded.
    Uncoded,
    Overflow,
}

/// Recompute a derived value from merged components. Pending if any
/// component is pending.
fn derive<'a>(
    def: &VariableDefinition,
    entity_id: &str,
    components: impl Iterator<Item = &'a ConsensusRecord>,
    decided_at: DateTime<Utc>,
) -> Derived {
    let components: Vec<&ConsensusRecord> = components.collect();
    let Some(weakest) = components
        .iter()
        .min_by_key(|c| c.provenance.strength())
    else {
        return Derived::Uncoded;
    };

    let raters: BTreeSet<RaterId> = components
        .iter()
        .flat_map(|c| c.raters.iter().cloned())
        .collect();
    let value = if weakest.is_pending() {
        None
    } else {
        let merged = components.iter().filter_map(|c| c.value.as_ref());
        let total = match def.derivation {
            Derivation::Sum => checked_total(merged.filter_map(Value::as_count)),
            Derivation::DistinctTokens => token_count(&distinct_tokens(merged)),
        };
        match total {
            Some(total) => Some(Value::Count(total)),
            None => return Derived::Overflow,
        }
    };

    Derived::Record(ConsensusRecord {
        entity_id: entity_id.to_string(),
        variable: def.name.clone(),
        value,
        provenance: weakest.provenance,
        adjudicator: weakest.adjudicator.clone(),
        raters: raters.into_iter().collect(),
        tokens: Vec::new(),
        decided_at,
    })
}

/// Merge every variable for one entity, applying adjudications in force.
///
/// Adjudicated records always win over freshly computed ones and are flagged
/// stale when the contributing rater set has changed since. Pending items are
/// returned as escalations for the caller to enqueue.
pub fn merge_entity(
    registry: &SchemaRegistry,
    entity_id: &str,
    records: &[&NormalizedRecord],
    adjudications: &AdjudicationQueue,
    decided_at: DateTime<Utc>,
) -> Result<EntityMerge, ReconError> {
    let mut out = EntityMerge::default();
    let mut merged: BTreeMap<&str, ConsensusRecord> = BTreeMap::new();

    for def in registry.variables().filter(|v| !v.is_derived()) {
        let candidates = contributions(&def.name, records);
        let computed = merge_values(def, entity_id, &candidates, decided_at);

        if let Some(adjudicated) = adjudications.latest(entity_id, &def.name) {
            let current: Vec<RaterId> = candidates.keys().cloned().collect();
            if adjudicated.raters != current {
                warn!(
                    entity = entity_id,
                    variable = %def.name,
                    "adjudication was recorded for a different rater set"
                );
                out.issues.push(DataIssue::StaleAdjudication {
                    entity_id: entity_id.to_string(),
                    variable: def.name.clone(),
                    adjudicated_raters: adjudicated.raters.clone(),
                    current_raters: current,
                });
            }
            merged.insert(&def.name, adjudicated.clone());
            continue;
        }

        if let Some(record) = computed {
            if record.is_pending() {
                out.escalations.push(Escalation {
                    entity_id: entity_id.to_string(),
                    variable: def.name.clone(),
                    candidates,
                });
            }
            merged.insert(&def.name, record);
        }
    }

    for def in registry.variables().filter(|v| v.is_derived()) {
        let reported: Vec<(&NormalizedRecord, u64)> = records
            .iter()
            .filter_map(|r| match r.values.get(&def.name) {
                Some(Value::Count(n)) => Some((*r, *n)),
                _ => None,
            })
            .collect();

        for &(record, reported_value) in &reported {
            let Some(component_sum) = rater_derivation(def, record) else {
                continue;
            };
            if component_sum != reported_value {
                warn!(
                    entity = entity_id,
                    rater = %record.rater_id,
                    variable = %def.name,
                    reported = reported_value,
                    component_sum,
                    "derived value disagrees with the rater's own components"
                );
                out.issues.push(DataIssue::DerivationInconsistency {
                    entity_id: entity_id.to_string(),
                    rater_id: record.rater_id.clone(),
                    variable: def.name.clone(),
                    reported: reported_value,
                    component_sum,
                });
            }
        }

        let components = def.derived_from.iter().filter_map(|c| merged.get(c.as_str()));
        match derive(def, entity_id, components, decided_at) {
            Derived::Record(record) => {
                merged.insert(&def.name, record);
            }
            Derived::Uncoded if !reported.is_empty() => {
                out.issues.push(DataIssue::DerivationUnresolvable {
                    entity_id: entity_id.to_string(),
                    variable: def.name.clone(),
                });
            }
            Derived::Uncoded => {}
            Derived::Overflow => {
                warn!(entity = entity_id, variable = %def.name, "derived total overflows");
                out.issues.push(DataIssue::DerivationOverflow {
                    entity_id: entity_id.to_string(),
                    variable: def.name.clone(),
                });
            }
        }
    }

    out.records = registry
        .variables()
        .filter_map(|def| merged.remove(def.name.as_str()))
        .collect();
    Ok(out)
}
