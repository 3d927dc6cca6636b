//! Tabular exports: agreement report, consensus dataset, adjudication
//! worksheet, and the data-issue audit list. Everything renders to a CSV
//! string; writing files is the caller's job.

use std::collections::HashMap;

use crate::adjudication::{AdjudicationItem, WorksheetRow};
use crate::agreement::{AgreementResult, Statistic};
use crate::error::ReconError;
use crate::merge::distinct_tokens;
use crate::model::{ConsensusRecord, DataIssue, Entity, RaterId, LIST_RENDER_SEPARATOR};
use crate::schema::{Derivation, SchemaRegistry};

pub const WORKSHEET_FINAL_COLUMN: &str = "final_value";

fn writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new().from_writer(Vec::new())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ReconError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| ReconError::Csv(e.into_error().into()))?;
    String::from_utf8(bytes).map_err(|e| ReconError::InvalidRecord(e.to_string()))
}

/// One row per (variable, scope, metric).
pub fn agreement_csv(results: &[AgreementResult]) -> Result<String, ReconError> {
    let mut w = writer();
    w.write_record([
        "variable",
        "scope",
        "metric",
        "value",
        "status",
        "degenerate",
        "n_entities",
        "n_excluded",
        "primary",
        "interpretation",
    ])?;
    for r in results {
        let (value, status) = match r.statistic {
            Statistic::Defined(v) => (format!("{v:.4}"), "defined".to_string()),
            Statistic::Undefined(reason) => (String::new(), reason.to_string()),
        };
        w.write_record([
            r.variable.clone(),
            r.scope.to_string(),
            r.metric.to_string(),
            value,
            status,
            r.statistic.is_degenerate().to_string(),
            r.n_entities.to_string(),
            r.n_excluded.to_string(),
            r.primary.to_string(),
            r.interpretation().unwrap_or_default().to_string(),
        ])?;
    }
    finish(w)
}

/// One row per entity; each variable gets a value column and a
/// `<variable>_provenance` column, in declaration order.
pub fn consensus_csv(
    registry: &SchemaRegistry,
    entities: &[Entity],
    consensus: &[ConsensusRecord],
) -> Result<String, ReconError> {
    let by_key: HashMap<(&str, &str), &ConsensusRecord> = consensus
        .iter()
        .map(|r| ((r.entity_id.as_str(), r.variable.as_str()), r))
        .collect();

    let mut header = vec![
        "entity_id".to_string(),
        "entity_name".to_string(),
        "access".to_string(),
    ];
    for def in registry.variables() {
        header.push(def.name.clone());
        header.push(format!("{}_provenance", def.name));
        if def.derivation == Derivation::DistinctTokens && def.is_derived() {
            header.push(format!("{}_list", def.name));
        }
    }

    let mut w = writer();
    w.write_record(&header)?;
    for entity in entities {
        let mut row = vec![
            entity.id.clone(),
            entity.name.clone().unwrap_or_default(),
            entity.access.clone().unwrap_or_default(),
        ];
        for def in registry.variables() {
            let record = by_key.get(&(entity.id.as_str(), def.name.as_str()));
            match record {
                Some(record) => {
                    row.push(record.rendered_value());
                    row.push(record.provenance.to_string());
                }
                None => {
                    row.push(String::new());
                    row.push(String::new());
                }
            }
            if def.derivation == Derivation::DistinctTokens && def.is_derived() {
                // Alphabetized tokens behind the count, from the merged lists.
                let tokens = match record {
                    Some(_) => distinct_tokens(def.derived_from.iter().filter_map(|c| {
                        by_key
                            .get(&(entity.id.as_str(), c.as_str()))
                            .and_then(|r| r.value.as_ref())
                    })),
                    None => Default::default(),
                };
                row.push(tokens.into_iter().collect::<Vec<_>>().join(LIST_RENDER_SEPARATOR));
            }
        }
        w.write_record(&row)?;
    }
    finish(w)
}

/// Side-by-side candidates per pending item with an empty `final_value`
/// column for the adjudicator to fill in.
pub fn worksheet_csv(items: &[AdjudicationItem], raters: &[RaterId]) -> Result<String, ReconError> {
    let mut header = vec![
        "entity_id".to_string(),
        "variable".to_string(),
        "fingerprint".to_string(),
    ];
    header.extend(raters.iter().cloned());
    header.push(WORKSHEET_FINAL_COLUMN.to_string());
    header.push("adjudicator".to_string());

    let mut w = writer();
    w.write_record(&header)?;
    for item in items {
        let mut row = vec![
            item.entity_id.clone(),
            item.variable.clone(),
            item.fingerprint.clone(),
        ];
        row.extend(
            raters
                .iter()
                .map(|r| item.candidates.get(r).map(|v| v.render()).unwrap_or_default()),
        );
        row.push(String::new());
        row.push(String::new());
        w.write_record(&row)?;
    }
    finish(w)
}

/// Read a completed worksheet. Rater columns are ignored; `fingerprint` and
/// `adjudicator` are optional.
pub fn read_worksheet(csv_data: &str) -> Result<Vec<WorksheetRow>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let position = |name: &str| headers.iter().position(|h| h == name);
    let require = |name: &str| {
        position(name).ok_or_else(|| {
            ReconError::InvalidRecord(format!("worksheet is missing the '{name}' column"))
        })
    };

    let entity_idx = require("entity_id")?;
    let variable_idx = require("variable")?;
    let final_idx = require(WORKSHEET_FINAL_COLUMN)?;
    let fingerprint_idx = position("fingerprint");
    let adjudicator_idx = position("adjudicator");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |i: usize| record.get(i).unwrap_or("").trim().to_string();
        let optional = |i: Option<usize>| i.map(cell).filter(|v| !v.is_empty());
        let entity_id = cell(entity_idx);
        if entity_id.is_empty() {
            continue;
        }
        rows.push(WorksheetRow {
            entity_id,
            variable: cell(variable_idx),
            fingerprint: optional(fingerprint_idx),
            final_value: cell(final_idx),
            adjudicator: optional(adjudicator_idx),
        });
    }
    Ok(rows)
}

pub fn issues_csv(issues: &[DataIssue]) -> Result<String, ReconError> {
    let mut w = writer();
    w.write_record(["issue", "entity_id", "rater_id", "variable", "detail"])?;
    for issue in issues {
        w.write_record([
            issue.code(),
            issue.entity_id(),
            issue.rater_id().unwrap_or_default(),
            issue.variable(),
            issue.detail().as_str(),
        ])?;
    }
    finish(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjudication::fingerprint;
    use crate::agreement::{Metric, Scope};
    use crate::model::{Provenance, Value};
    use crate::schema::VariableDefinition;
    use crate::stats::UndefinedReason;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn agreement_rows_flag_degenerate() {
        let results = vec![
            AgreementResult {
                variable: "API".into(),
                metric: Metric::CohenKappa,
                scope: Scope::pair("claude", "human"),
                statistic: Statistic::Undefined(UndefinedReason::InsufficientVariance),
                n_entities: 4,
                n_excluded: 1,
                primary: true,
            },
            AgreementResult {
                variable: "API".into(),
                metric: Metric::PercentAgreement,
                scope: Scope::pair("claude", "human"),
                statistic: Statistic::Defined(1.0),
                n_entities: 4,
                n_excluded: 1,
                primary: false,
            },
        ];
        let csv = agreement_csv(&results).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines[1],
            "API,claude~human,cohen_kappa,,insufficient variance,true,4,1,true,"
        );
        assert_eq!(
            lines[2],
            "API,claude~human,percent_agreement,1.0000,defined,false,4,1,false,"
        );
    }

    #[test]
    fn consensus_has_parallel_provenance_columns() {
        let mut registry = SchemaRegistry::new();
        registry.define(VariableDefinition::binary("API")).unwrap();
        registry.define(VariableDefinition::count("SDK")).unwrap();
        registry.seal().unwrap();

        let entities = vec![Entity {
            id: "VG1".into(),
            name: Some("Alpha, Inc".into()),
            access: None,
        }];
        let consensus = vec![ConsensusRecord {
            entity_id: "VG1".into(),
            variable: "API".into(),
            value: Some(Value::Binary(1)),
            provenance: Provenance::SingleRater,
            adjudicator: None,
            raters: vec!["claude".into()],
            tokens: Vec::new(),
            decided_at: Utc::now(),
        }];
        let csv = consensus_csv(&registry, &entities, &consensus).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "entity_id,entity_name,access,API,API_provenance,SDK,SDK_provenance"
        );
        assert_eq!(lines[1], "VG1,\"Alpha, Inc\",,1,single-rater,,");
    }

    #[test]
    fn distinct_token_variable_exports_its_list() {
        let mut registry = SchemaRegistry::new();
        registry
            .define(VariableDefinition::list("SDK_lang", "natural_languages"))
            .unwrap();
        registry
            .define(VariableDefinition::list("COM_lang", "natural_languages"))
            .unwrap();
        registry
            .define(
                VariableDefinition::count("LINGUISTIC_VARIETY")
                    .derived_from(["SDK_lang", "COM_lang"])
                    .distinct_tokens(),
            )
            .unwrap();
        registry.seal().unwrap();

        let record = |variable: &str, value: Value| ConsensusRecord {
            entity_id: "VG1".into(),
            variable: variable.into(),
            value: Some(value),
            provenance: Provenance::Unanimous,
            adjudicator: None,
            raters: vec!["claude".into(), "human".into()],
            tokens: Vec::new(),
            decided_at: Utc::now(),
        };
        let list = |tokens: &[&str]| Value::List(tokens.iter().map(|t| t.to_string()).collect());
        let consensus = vec![
            record("SDK_lang", list(&["Japanese", "English"])),
            record("COM_lang", list(&["English", "German"])),
            record("LINGUISTIC_VARIETY", Value::Count(3)),
        ];
        let csv = consensus_csv(&registry, &[Entity::new("VG1")], &consensus).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert!(lines[0].ends_with(
            "LINGUISTIC_VARIETY,LINGUISTIC_VARIETY_provenance,LINGUISTIC_VARIETY_list"
        ));
        assert!(lines[1].ends_with(",3,unanimous,English; German; Japanese"));
    }

    #[test]
    fn worksheet_round_trips_through_reader() {
        let candidates = BTreeMap::from([
            ("claude".to_string(), Value::Binary(1)),
            ("human".to_string(), Value::Binary(0)),
        ]);
        let item = AdjudicationItem {
            entity_id: "VG1".into(),
            variable: "API".into(),
            fingerprint: fingerprint("VG1", "API", &candidates),
            candidates,
            enqueued_at: Utc::now(),
        };
        let raters = vec!["claude".to_string(), "chatgpt".to_string(), "human".to_string()];
        let csv = worksheet_csv(std::slice::from_ref(&item), &raters).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(
            header,
            "entity_id,variable,fingerprint,claude,chatgpt,human,final_value,adjudicator"
        );

        let filled = csv.replacen(",,\n", ",1,lead\n", 1);
        let rows = read_worksheet(&filled).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].final_value, "1");
        assert_eq!(rows[0].adjudicator.as_deref(), Some("lead"));
        assert_eq!(rows[0].fingerprint.as_deref(), Some(item.fingerprint.as_str()));
    }

    #[test]
    fn worksheet_requires_final_value_column() {
        let err = read_worksheet("entity_id,variable\nVG1,API\n").unwrap_err();
        assert!(err.to_string().contains("final_value"));
    }

    #[test]
    fn issues_list_every_kind() {
        let issues = vec![DataIssue::DerivationUnresolvable {
            entity_id: "VG1".into(),
            variable: "EVENT".into(),
        }];
        let csv = issues_csv(&issues).unwrap();
        assert_eq!(
            csv.lines().nth(1).unwrap(),
            "derivation_unresolvable,VG1,,EVENT,reported directly but no component was coded"
        );
    }
}
