use std::collections::HashMap;

use concord_recon::adjudication::AdjudicationQueue;
use concord_recon::agreement::{Metric, Scope, Statistic};
use concord_recon::canonical::Vocabularies;
use concord_recon::config::ReconConfig;
use concord_recon::engine::{ingest, run};
use concord_recon::export::{consensus_csv, read_worksheet, worksheet_csv};
use concord_recon::loader::{load_csv_records, parse_json_record, RecordStore};
use concord_recon::model::{Provenance, ReconResult, Value};
use concord_recon::schema::SchemaRegistry;
use concord_recon::stats::UndefinedReason;

const CONFIG: &str = r#"
name = "Boundary resources"

[loader]
binary_coercion = "positive_is_one"

[[raters]]
id = "claude"
path = "records/claude"

[[raters]]
id = "chatgpt"
path = "records/chatgpt"

[[raters]]
id = "human"
path = "records/human.csv"
id_column = "platform_id"

[vocabularies.natural_languages]
file = "vocab/natural_languages.csv"

[vocabularies.programming_languages]
canonical = ["Python", "JavaScript", "Java", "C#"]
aliases = { "py" = "Python", "csharp" = "C#" }

[[variables]]
name = "API"
kind = "binary"

[[variables]]
name = "EVENT_webinars"
kind = "binary"

[[variables]]
name = "EVENT_hackathon"
kind = "binary"

[[variables]]
name = "EVENT"
kind = "count"
derived_from = ["EVENT_webinars", "EVENT_hackathon"]

[[variables]]
name = "OPEN"
kind = "ordinal"
levels = ["closed", "partial", "open"]

[[variables]]
name = "SDK_langs"
kind = "list"
vocabulary = "programming_languages"

[[variables]]
name = "LANG"
kind = "list"
vocabulary = "natural_languages"

[[variables]]
name = "COM_lang"
kind = "list"
vocabulary = "natural_languages"

[[variables]]
name = "LINGUISTIC_VARIETY"
kind = "count"
derived_from = ["LANG", "COM_lang"]
derivation = "distinct_tokens"
"#;

const NATURAL_LANGUAGES: &str = "\
raw_label,canonical_token
English,English
German,German
Japanese,Japanese
Deutsch,German
日本語,Japanese
";

struct Project {
    config: ReconConfig,
    registry: SchemaRegistry,
    vocabularies: Vocabularies,
    store: RecordStore,
}

impl Project {
    fn new() -> Self {
        let config = ReconConfig::from_toml(CONFIG).unwrap();
        let registry = config.build_registry().unwrap();
        let files = HashMap::from([(
            "natural_languages".to_string(),
            NATURAL_LANGUAGES.to_string(),
        )]);
        let vocabularies = config.build_vocabularies(&files).unwrap();
        Self {
            config,
            registry,
            vocabularies,
            store: RecordStore::new(),
        }
    }

    fn json(&mut self, rater: &str, json: &str) -> &mut Self {
        let raw = parse_json_record(json, self.config.loader.flatten_sections).unwrap();
        ingest(&mut self.store, vec![raw], rater, &self.registry, &self.config.loader).unwrap();
        self
    }

    fn csv(&mut self, rater: &str, csv: &str) -> &mut Self {
        let raws = load_csv_records(csv, "platform_id").unwrap();
        ingest(&mut self.store, raws, rater, &self.registry, &self.config.loader).unwrap();
        self
    }

    fn run(&self, queue: &mut AdjudicationQueue) -> ReconResult {
        run(&self.config, &self.registry, &self.vocabularies, &self.store, queue).unwrap()
    }
}

fn consensus<'a>(
    result: &'a ReconResult,
    entity: &str,
    variable: &str,
) -> Option<&'a concord_recon::ConsensusRecord> {
    result
        .consensus
        .iter()
        .find(|r| r.entity_id == entity && r.variable == variable)
}

// -------------------------------------------------------------------------
// Consensus
// -------------------------------------------------------------------------

#[test]
fn agreeing_raters_are_unanimous() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"API": 1}}"#)
        .json("human", r#"{"entity_id": "X", "values": {"API": "1"}}"#);
    let result = p.run(&mut AdjudicationQueue::new());
    let api = consensus(&result, "X", "API").unwrap();
    assert_eq!(api.value, Some(Value::Binary(1)));
    assert_eq!(api.provenance, Provenance::Unanimous);
}

#[test]
fn every_coded_pair_gets_a_record() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "VG1", "values": {"API": 1, "OPEN": "open"}}"#)
        .json("human", r#"{"entity_id": "VG1", "values": {"API": 0}}"#)
        .json("chatgpt", r#"{"entity_id": "VG2", "values": {"OPEN": "partial"}}"#);
    let result = p.run(&mut AdjudicationQueue::new());
    for (entity, variable) in [("VG1", "API"), ("VG1", "OPEN"), ("VG2", "OPEN")] {
        assert!(
            consensus(&result, entity, variable).is_some(),
            "missing {entity}/{variable}"
        );
    }
    assert!(consensus(&result, "VG2", "API").is_none());
}

#[test]
fn split_binary_waits_for_adjudication() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"API": 1}}"#)
        .json("human", r#"{"entity_id": "X", "values": {"API": 0}}"#);
    let mut queue = AdjudicationQueue::new();

    let before = p.run(&mut queue);
    assert_eq!(before.pending.len(), 1);
    assert_eq!(before.pending[0].variable, "API");
    let api = consensus(&before, "X", "API").unwrap();
    assert_eq!(api.provenance, Provenance::Pending);
    assert!(api.value.is_none());

    let resolved = queue
        .resolve(&p.registry, "X", "API", Value::Binary(1), "human1")
        .unwrap();
    assert_eq!(resolved.provenance, Provenance::Adjudicated);

    let after = p.run(&mut queue);
    assert!(after.pending.is_empty());
    let api = consensus(&after, "X", "API").unwrap();
    assert_eq!(api.provenance, Provenance::Adjudicated);
    assert_eq!(api.value, Some(Value::Binary(1)));
    assert_eq!(api.adjudicator.as_deref(), Some("human1"));
}

#[test]
fn list_spellings_converge_to_unanimous() {
    let mut p = Project::new();
    p.json(
        "claude",
        r#"{"entity_id": "X", "values": {"SDK_langs": "Python; JavaScript"}}"#,
    )
    .json(
        "human",
        r#"{"entity_id": "X", "values": {"SDK_langs": "javascript; python"}}"#,
    );
    let result = p.run(&mut AdjudicationQueue::new());
    let langs = consensus(&result, "X", "SDK_langs").unwrap();
    assert_eq!(langs.provenance, Provenance::Unanimous);
    assert_eq!(langs.rendered_value(), "JavaScript; Python");
    assert!(result.issues.is_empty());
}

#[test]
fn list_disagreement_never_escalates() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"LANG": "English; 日本語"}}"#)
        .json("human", r#"{"entity_id": "X", "values": {"LANG": "english; Deutsch"}}"#);
    let result = p.run(&mut AdjudicationQueue::new());
    assert!(result.pending.is_empty());
    let lang = consensus(&result, "X", "LANG").unwrap();
    assert_eq!(lang.provenance, Provenance::Union);
    assert_eq!(lang.rendered_value(), "English; German; Japanese");
}

#[test]
fn three_raters_with_a_majority_list_still_take_the_union() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"SDK_langs": "Python"}}"#)
        .json("chatgpt", r#"{"entity_id": "X", "values": {"SDK_langs": "py"}}"#)
        .csv("human", "platform_id,SDK_langs\nX,Python; JavaScript\n");
    let result = p.run(&mut AdjudicationQueue::new());
    assert!(result.pending.is_empty());
    let langs = consensus(&result, "X", "SDK_langs").unwrap();
    assert_eq!(langs.provenance, Provenance::Union);
    assert_eq!(langs.rendered_value(), "JavaScript; Python");
}

#[test]
fn linguistic_variety_counts_distinct_merged_languages() {
    let mut p = Project::new();
    p.json(
        "claude",
        r#"{"entity_id": "X", "values": {"LANG": "English; 日本語", "COM_lang": "English", "LINGUISTIC_VARIETY": 2}}"#,
    )
    .json(
        "human",
        r#"{"entity_id": "X", "values": {"LANG": "english; Japanese", "COM_lang": "Deutsch"}}"#,
    );
    let result = p.run(&mut AdjudicationQueue::new());
    let variety = consensus(&result, "X", "LINGUISTIC_VARIETY").unwrap();
    // LANG is unanimous, COM_lang unions English and German.
    assert_eq!(variety.value, Some(Value::Count(3)));
    assert_eq!(variety.provenance, Provenance::Union);
    assert!(!result
        .summary
        .issues_by_kind
        .contains_key("derivation_inconsistency"));

    let csv = consensus_csv(&p.registry, &result.entities, &result.consensus).unwrap();
    let row = csv.lines().nth(1).unwrap();
    assert!(row.ends_with(",3,union,English; German; Japanese"));
}

#[test]
fn derived_count_is_recomputed_and_inconsistency_noted() {
    let mut p = Project::new();
    p.json(
        "claude",
        r#"{"entity_id": "X", "values": {"EVENT_webinars": 1, "EVENT_hackathon": 1, "EVENT": 3}}"#,
    );
    let result = p.run(&mut AdjudicationQueue::new());
    let event = consensus(&result, "X", "EVENT").unwrap();
    assert_eq!(event.value, Some(Value::Count(2)));
    assert_eq!(result.summary.issues_by_kind["derivation_inconsistency"], 1);
}

#[test]
fn majority_of_three_wins() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"OPEN": "open"}}"#)
        .json("chatgpt", r#"{"entity_id": "X", "values": {"OPEN": "Open"}}"#)
        .csv("human", "platform_id,OPEN\nX,closed\n");
    let result = p.run(&mut AdjudicationQueue::new());
    let open = consensus(&result, "X", "OPEN").unwrap();
    assert_eq!(open.provenance, Provenance::Majority);
    assert_eq!(open.rendered_value(), "open");
}

#[test]
fn reloading_a_record_replaces_it_wholesale() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"API": 1, "OPEN": "open"}}"#)
        .json("claude", r#"{"entity_id": "X", "values": {"API": 0}}"#);
    let result = p.run(&mut AdjudicationQueue::new());
    assert_eq!(
        consensus(&result, "X", "API").unwrap().value,
        Some(Value::Binary(0))
    );
    assert!(consensus(&result, "X", "OPEN").is_none());
}

#[test]
fn mismatched_values_are_excluded_not_fatal() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"API": "maybe"}}"#)
        .json("human", r#"{"entity_id": "X", "values": {"API": 1}}"#);
    let result = p.run(&mut AdjudicationQueue::new());
    let api = consensus(&result, "X", "API").unwrap();
    assert_eq!(api.provenance, Provenance::SingleRater);
    assert_eq!(api.raters, vec!["human"]);
    assert_eq!(result.summary.issues_by_kind["type_mismatch"], 1);
}

// -------------------------------------------------------------------------
// Agreement
// -------------------------------------------------------------------------

#[test]
fn constant_variable_is_undefined_not_perfect() {
    let mut p = Project::new();
    for entity in ["A", "B", "C"] {
        let json = format!(r#"{{"entity_id": "{entity}", "values": {{"API": 1}}}}"#);
        p.json("claude", &json).json("human", &json);
    }
    let result = p.run(&mut AdjudicationQueue::new());
    let kappa = result
        .agreement
        .results
        .iter()
        .find(|r| r.variable == "API" && r.metric == Metric::CohenKappa)
        .unwrap();
    assert_eq!(
        kappa.statistic,
        Statistic::Undefined(UndefinedReason::InsufficientVariance)
    );
    let pa = result
        .agreement
        .results
        .iter()
        .find(|r| r.variable == "API" && r.metric == Metric::PercentAgreement)
        .unwrap();
    assert_eq!(pa.statistic, Statistic::Defined(1.0));
}

#[test]
fn chance_corrected_statistics_stay_in_range() {
    let mut p = Project::new();
    let codes = [(1, 1), (1, 0), (0, 0), (0, 1), (1, 1), (0, 0)];
    for (i, (a, b)) in codes.iter().enumerate() {
        p.json(
            "claude",
            &format!(r#"{{"entity_id": "E{i}", "values": {{"API": {a}}}}}"#),
        )
        .json(
            "human",
            &format!(r#"{{"entity_id": "E{i}", "values": {{"API": {b}}}}}"#),
        );
    }
    let result = p.run(&mut AdjudicationQueue::new());
    for metric in [Metric::CohenKappa, Metric::GwetAc1] {
        let r = result
            .agreement
            .results
            .iter()
            .find(|r| r.variable == "API" && r.metric == metric)
            .unwrap();
        let value = r.statistic.value().unwrap();
        assert!((-1.0..=1.0).contains(&value), "{metric} = {value}");
    }
}

#[test]
fn entities_with_one_coder_are_counted_separately() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "A", "values": {"API": 1}}"#)
        .json("human", r#"{"entity_id": "A", "values": {"API": 1}}"#)
        .json("claude", r#"{"entity_id": "B", "values": {"API": 0}}"#)
        .json("human", r#"{"entity_id": "B", "values": {"API": 0}}"#)
        .json("claude", r#"{"entity_id": "C", "values": {"API": 0}}"#);
    let result = p.run(&mut AdjudicationQueue::new());
    let pa = result
        .agreement
        .results
        .iter()
        .find(|r| r.variable == "API" && r.metric == Metric::PercentAgreement)
        .unwrap();
    assert_eq!(pa.scope, Scope::pair("claude", "human"));
    assert_eq!(pa.n_entities, 2);
    assert_eq!(pa.n_excluded, 1);
}

// -------------------------------------------------------------------------
// Worksheet + ledger replay
// -------------------------------------------------------------------------

#[test]
fn worksheet_and_ledger_replay() {
    let mut p = Project::new();
    p.json("claude", r#"{"entity_id": "X", "values": {"API": 1, "EVENT_webinars": 0}}"#)
        .json("human", r#"{"entity_id": "X", "values": {"API": 0, "EVENT_webinars": 1}}"#);
    let mut queue = AdjudicationQueue::new();
    let first = p.run(&mut queue);
    assert_eq!(first.pending.len(), 2);

    let sheet = worksheet_csv(&first.pending, &first.meta.raters).unwrap();
    let mut rows = read_worksheet(&sheet).unwrap();
    rows[0].final_value = "yes".into();
    let import = queue.apply_worksheet(
        &rows,
        &p.registry,
        &p.vocabularies,
        p.config.loader.binary_coercion,
        "lead",
    );
    assert_eq!(import.applied.len(), 1);
    assert_eq!(import.skipped, 1);

    let ledger = queue.to_ledger().unwrap();
    let mut replayed = AdjudicationQueue::from_ledger(&ledger).unwrap();
    let second = p.run(&mut replayed);
    assert_eq!(second.pending.len(), 1);
    assert_eq!(
        consensus(&second, "X", "API").unwrap().provenance,
        Provenance::Adjudicated
    );

    let csv = consensus_csv(&p.registry, &second.entities, &second.consensus).unwrap();
    let row = csv.lines().nth(1).unwrap();
    assert!(row.starts_with("X,,,1,adjudicated,"));
}
