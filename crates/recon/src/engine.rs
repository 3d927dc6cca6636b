use std::collections::BTreeMap;

use chrono::Utc;
use rayon::prelude::*;
use tracing::info;

use crate::adjudication::AdjudicationQueue;
use crate::agreement::build_report;
use crate::canonical::Vocabularies;
use crate::config::{LoaderConfig, ReconConfig};
use crate::error::ReconError;
use crate::loader::{load, normalize, RawRecord, RecordStore};
use crate::merge::{merge_entity, EntityMerge};
use crate::model::{
    ConsensusRecord, ConsensusSummary, DataIssue, NormalizedRecord, RunMeta, ReconResult,
};
use crate::schema::SchemaRegistry;

/// Validate raw records for one rater and insert them into the store,
/// replacing earlier records for the same (entity, rater). Returns the number
/// of records that replaced an existing one.
pub fn ingest(
    store: &mut RecordStore,
    raws: Vec<RawRecord>,
    rater_id: &str,
    registry: &SchemaRegistry,
    options: &LoaderConfig,
) -> Result<usize, ReconError> {
    let mut replaced = 0;
    for raw in raws {
        let outcome = load(raw, rater_id, registry, options)?;
        if store.insert(outcome).is_some() {
            replaced += 1;
        }
    }
    Ok(replaced)
}

/// Run agreement and consensus over everything in `store`.
///
/// Outstanding queue items are rebuilt from scratch each run; resolution
/// history in `queue` is kept and wins over computed values.
pub fn run(
    config: &ReconConfig,
    registry: &SchemaRegistry,
    vocabularies: &Vocabularies,
    store: &RecordStore,
    queue: &mut AdjudicationQueue,
) -> Result<ReconResult, ReconError> {
    if !registry.is_sealed() {
        return Err(ReconError::RegistryNotSealed);
    }
    let now = Utc::now();

    let raw: Vec<_> = store.records().collect();
    let normalized: Vec<(NormalizedRecord, Vec<DataIssue>)> = raw
        .par_iter()
        .map(|record| normalize(record, registry, vocabularies))
        .collect::<Result<_, ReconError>>()?;

    let mut issues: Vec<DataIssue> = store.load_issues().cloned().collect();
    let mut records = Vec::with_capacity(normalized.len());
    for (record, record_issues) in normalized {
        records.push(record);
        issues.extend(record_issues);
    }

    let agreement = build_report(registry, &records, &config.agreement)?;

    let mut by_entity: BTreeMap<&str, Vec<&NormalizedRecord>> = BTreeMap::new();
    for record in &records {
        by_entity
            .entry(record.entity_id.as_str())
            .or_default()
            .push(record);
    }
    let by_entity: Vec<_> = by_entity.into_iter().collect();

    queue.clear_pending();
    let merged: Vec<EntityMerge> = {
        let resolved = &*queue;
        by_entity
            .par_iter()
            .map(|(entity_id, entity_records)| {
                merge_entity(registry, entity_id, entity_records, resolved, now)
            })
            .collect::<Result<_, ReconError>>()?
    };

    let mut consensus = Vec::new();
    for entity in merged {
        for escalation in entity.escalations {
            queue.enqueue(
                &escalation.entity_id,
                &escalation.variable,
                escalation.candidates,
            );
        }
        consensus.extend(entity.records);
        issues.extend(entity.issues);
    }

    let pending: Vec<_> = queue.pending().cloned().collect();
    let summary = summarize(&consensus, &issues, pending.len());
    info!(
        entities = by_entity.len(),
        records = records.len(),
        consensus = summary.total_records,
        pending = summary.pending,
        issues = issues.len(),
        "run complete"
    );

    Ok(ReconResult {
        meta: RunMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: now.to_rfc3339(),
            raters: store.raters().into_iter().collect(),
            entities: by_entity.len(),
            variables: registry.len(),
        },
        summary,
        agreement,
        entities: store.entities(),
        consensus,
        pending,
        issues,
    })
}

fn summarize(consensus: &[ConsensusRecord], issues: &[DataIssue], pending: usize) -> ConsensusSummary {
    let mut summary = ConsensusSummary {
        total_records: consensus.len(),
        pending,
        ..ConsensusSummary::default()
    };
    for record in consensus {
        *summary
            .by_provenance
            .entry(record.provenance.as_str().to_string())
            .or_default() += 1;
    }
    for issue in issues {
        *summary
            .issues_by_kind
            .entry(issue.code().to_string())
            .or_default() += 1;
        if let DataIssue::UnmappedToken {
            vocabulary, token, ..
        } = issue
        {
            *summary
                .unmapped_tokens
                .entry(vocabulary.clone())
                .or_default()
                .entry(token.clone())
                .or_default() += 1;
        }
    }
    summary
}
