//! Rater record ingestion: JSON/CSV parsing, type validation against the
//! schema, list canonicalization, and the per-(entity, rater) record store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::canonical::Vocabularies;
use crate::config::{BinaryCoercion, LoaderConfig};
use crate::error::ReconError;
use crate::model::{
    DataIssue, Entity, EntityId, NormalizedRecord, RaterId, RaterRecord, RecordValue, Value,
};
use crate::schema::{SchemaRegistry, VariableDefinition, VariableKind, MAX_COUNT};

const ENTITY_ID_KEYS: &[&str] = &["entity_id", "platform_id", "platform_ID"];
const ENTITY_NAME_KEYS: &[&str] = &["entity_name", "platform_name"];
const RATER_KEYS: &[&str] = &["rater_id", "coder"];
const VALUE_SECTIONS: &[&str] = &["values", "variables"];
const METADATA_KEYS: &[&str] = &["access", "captured_at"];

// ---------------------------------------------------------------------------
// Raw records
// ---------------------------------------------------------------------------

/// An inbound record before validation: entity metadata plus a flat
/// variable-name -> raw value map.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub entity: Entity,
    pub rater_id: Option<RaterId>,
    pub captured_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, JsonValue>,
}

fn scalar_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_of(map: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| map.get(*k).and_then(scalar_string))
}

pub fn parse_json_record(json: &str, flatten_sections: bool) -> Result<RawRecord, ReconError> {
    let JsonValue::Object(map) = serde_json::from_str::<JsonValue>(json)? else {
        return Err(ReconError::InvalidRecord("record must be a JSON object".into()));
    };

    let id = first_of(&map, ENTITY_ID_KEYS).ok_or_else(|| {
        ReconError::InvalidRecord(format!(
            "missing entity id (expected one of {})",
            ENTITY_ID_KEYS.join(", ")
        ))
    })?;

    let captured_at = match map.get("captured_at").and_then(JsonValue::as_str) {
        Some(ts) => Some(
            DateTime::parse_from_rfc3339(ts)
                .map_err(|e| {
                    ReconError::InvalidRecord(format!("entity '{id}': bad captured_at '{ts}': {e}"))
                })?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let mut record = RawRecord {
        entity: Entity {
            id,
            name: first_of(&map, ENTITY_NAME_KEYS),
            access: first_of(&map, &["access"]),
        },
        rater_id: first_of(&map, RATER_KEYS),
        captured_at,
        fields: BTreeMap::new(),
    };

    for (key, value) in map {
        let reserved = ENTITY_ID_KEYS
            .iter()
            .chain(ENTITY_NAME_KEYS)
            .chain(RATER_KEYS)
            .chain(METADATA_KEYS)
            .any(|k| *k == key);
        if reserved {
            continue;
        }
        match value {
            JsonValue::Object(section)
                if VALUE_SECTIONS.contains(&key.as_str()) || flatten_sections =>
            {
                record.fields.extend(section);
            }
            other => {
                record.fields.insert(key, other);
            }
        }
    }

    Ok(record)
}

/// Parse a coding sheet: one row per entity, one column per variable.
/// Empty cells are "not coded" and rows without an id are skipped.
pub fn load_csv_records(csv_data: &str, id_column: &str) -> Result<Vec<RawRecord>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let id_idx = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| ReconError::InvalidRecord(format!("missing id column '{id_column}'")))?;
    let name_idx = headers
        .iter()
        .position(|h| ENTITY_NAME_KEYS.contains(&h.as_str()));
    let access_idx = headers.iter().position(|h| h == "access");

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row?;
        let id = row.get(id_idx).unwrap_or("");
        if id.is_empty() {
            debug!(line = line + 2, "skipping coding-sheet row without an id");
            continue;
        }
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let mut record = RawRecord {
            entity: Entity {
                id: id.to_string(),
                name: cell(name_idx),
                access: cell(access_idx),
            },
            ..RawRecord::default()
        };
        for (i, header) in headers.iter().enumerate() {
            if Some(i) == name_idx || Some(i) == access_idx || i == id_idx {
                continue;
            }
            if let Some(v) = row.get(i).filter(|v| !v.is_empty()) {
                record
                    .fields
                    .insert(header.clone(), JsonValue::String(v.to_string()));
            }
        }
        records.push(record);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Type validation
// ---------------------------------------------------------------------------

/// Outcome of checking one raw value against a variable kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coerced {
    /// Null or empty: the rater did not code this variable.
    Missing,
    Value(RecordValue),
    Mismatch,
}

fn integral(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn coerce_binary(raw: &JsonValue, coercion: BinaryCoercion) -> Option<u8> {
    if let JsonValue::Bool(b) = raw {
        return Some(u8::from(*b));
    }
    if let JsonValue::String(s) = raw {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => return Some(1),
            "false" | "no" | "n" => return Some(0),
            _ => {}
        }
    }
    match (integral(raw)?, coercion) {
        (0, _) => Some(0),
        (1, _) => Some(1),
        (n, BinaryCoercion::PositiveIsOne) if n > 1 => Some(1),
        _ => None,
    }
}

pub fn coerce(kind: &VariableKind, raw: &JsonValue, coercion: BinaryCoercion) -> Coerced {
    match raw {
        JsonValue::Null => return Coerced::Missing,
        JsonValue::String(s) if s.trim().is_empty() => return Coerced::Missing,
        _ => {}
    }

    let value = match kind {
        VariableKind::Binary => coerce_binary(raw, coercion).map(RecordValue::Binary),
        VariableKind::Count => integral(raw)
            .and_then(|n| u64::try_from(n).ok())
            .filter(|n| *n <= MAX_COUNT)
            .map(RecordValue::Count),
        VariableKind::Ordinal { levels } => scalar_string(raw).and_then(|label| {
            levels
                .iter()
                .find(|l| **l == label)
                .or_else(|| levels.iter().find(|l| l.eq_ignore_ascii_case(&label)))
                .map(|l| RecordValue::Ordinal(l.clone()))
        }),
        VariableKind::List { .. } => match raw {
            JsonValue::String(s) => Some(RecordValue::List(s.clone())),
            _ => None,
        },
        VariableKind::FreeText => scalar_string(raw).map(RecordValue::Text),
    };

    value.map_or(Coerced::Mismatch, Coerced::Value)
}

fn render_raw(raw: &JsonValue) -> String {
    match raw {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub record: RaterRecord,
    pub issues: Vec<DataIssue>,
}

/// Validate a raw record for `source_rater_id`. Unknown keys are dropped and
/// values failing their type check become [`RecordValue::Mismatch`].
pub fn load(
    raw: RawRecord,
    source_rater_id: &str,
    registry: &SchemaRegistry,
    options: &LoaderConfig,
) -> Result<LoadOutcome, ReconError> {
    if raw.entity.id.trim().is_empty() {
        return Err(ReconError::InvalidRecord("empty entity id".into()));
    }
    if let Some(claimed) = raw.rater_id.as_deref() {
        if claimed != source_rater_id {
            debug!(
                entity = %raw.entity.id,
                claimed,
                rater = source_rater_id,
                "record names a different rater; using the source rater"
            );
        }
    }

    let entity_id = raw.entity.id.clone();
    let mut values = BTreeMap::new();
    let mut issues = Vec::new();

    for (key, value) in raw.fields {
        let Some(def) = registry.get(&key) else {
            warn!(entity = %entity_id, rater = source_rater_id, variable = %key, "unknown variable dropped");
            issues.push(DataIssue::UnknownVariable {
                entity_id: entity_id.clone(),
                rater_id: source_rater_id.to_string(),
                variable: key,
            });
            continue;
        };
        match coerce(&def.kind, &value, options.binary_coercion) {
            Coerced::Missing => {}
            Coerced::Value(v) => {
                values.insert(key, v);
            }
            Coerced::Mismatch => {
                let rendered = render_raw(&value);
                warn!(
                    entity = %entity_id,
                    rater = source_rater_id,
                    variable = %key,
                    raw = %rendered,
                    "type mismatch; value excluded"
                );
                issues.push(DataIssue::TypeMismatch {
                    entity_id: entity_id.clone(),
                    rater_id: source_rater_id.to_string(),
                    variable: key.clone(),
                    expected: def.kind.expected(),
                    raw: rendered.clone(),
                });
                values.insert(key, RecordValue::Mismatch(rendered));
            }
        }
    }

    Ok(LoadOutcome {
        record: RaterRecord {
            entity: raw.entity,
            rater_id: source_rater_id.to_string(),
            captured_at: raw.captured_at.unwrap_or_else(Utc::now),
            values,
        },
        issues,
    })
}

// ---------------------------------------------------------------------------
// Normalize
// ---------------------------------------------------------------------------

/// Convert a validated value into its canonical form. Returns the value and
/// any list segments the vocabulary could not map. `None` for mismatches.
pub fn normalize_value(
    def: &VariableDefinition,
    value: &RecordValue,
    vocabularies: &Vocabularies,
) -> Result<Option<(Value, BTreeSet<String>)>, ReconError> {
    let normalized = match (&def.kind, value) {
        (_, RecordValue::Mismatch(_)) => None,
        (VariableKind::Binary, RecordValue::Binary(v)) => Some(Value::Binary(*v)),
        (VariableKind::Count, RecordValue::Count(v)) => Some(Value::Count(*v)),
        (VariableKind::Ordinal { levels }, RecordValue::Ordinal(label)) => levels
            .iter()
            .position(|l| l == label)
            .map(|rank| Value::Ordinal {
                rank,
                label: label.clone(),
            }),
        (VariableKind::List { vocabulary, delimiter }, RecordValue::List(raw)) => {
            let set = vocabularies.canonicalize(raw, vocabulary, delimiter)?;
            return Ok(Some((Value::List(set.tokens), set.unmapped)));
        }
        (VariableKind::FreeText, RecordValue::Text(text)) => Some(Value::Text(text.clone())),
        _ => None,
    };
    Ok(normalized.map(|v| (v, BTreeSet::new())))
}

/// Parse a single textual value (e.g. a worksheet cell) for `def`.
pub fn parse_value(
    def: &VariableDefinition,
    raw: &str,
    coercion: BinaryCoercion,
    vocabularies: &Vocabularies,
) -> Result<Value, ReconError> {
    let invalid = || ReconError::InvalidValue {
        variable: def.name.clone(),
        value: raw.to_string(),
        expected: def.kind.expected(),
    };
    let Coerced::Value(record_value) =
        coerce(&def.kind, &JsonValue::String(raw.to_string()), coercion)
    else {
        return Err(invalid());
    };
    normalize_value(def, &record_value, vocabularies)?
        .map(|(value, _)| value)
        .ok_or_else(invalid)
}

/// Build the normalized view of `record`, reporting unmapped list tokens.
pub fn normalize(
    record: &RaterRecord,
    registry: &SchemaRegistry,
    vocabularies: &Vocabularies,
) -> Result<(NormalizedRecord, Vec<DataIssue>), ReconError> {
    let mut values = BTreeMap::new();
    let mut issues = Vec::new();

    for (name, value) in &record.values {
        let Some(def) = registry.get(name) else {
            continue;
        };
        let Some((normalized, unmapped)) = normalize_value(def, value, vocabularies)? else {
            continue;
        };
        if let VariableKind::List { vocabulary, .. } = &def.kind {
            for token in unmapped {
                warn!(
                    entity = %record.entity.id,
                    rater = %record.rater_id,
                    variable = %name,
                    %vocabulary,
                    %token,
                    "unmapped list token kept verbatim"
                );
                issues.push(DataIssue::UnmappedToken {
                    entity_id: record.entity.id.clone(),
                    rater_id: record.rater_id.clone(),
                    variable: name.clone(),
                    vocabulary: vocabulary.clone(),
                    token,
                });
            }
        }
        values.insert(name.clone(), normalized);
    }

    Ok((
        NormalizedRecord {
            entity_id: record.entity.id.clone(),
            rater_id: record.rater_id.clone(),
            captured_at: record.captured_at,
            values,
        },
        issues,
    ))
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

/// One record per (entity, rater). Inserting replaces the whole prior record
/// together with its load issues.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: BTreeMap<(EntityId, RaterId), LoadOutcome>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a loaded record, returning the record it replaced.
    pub fn insert(&mut self, outcome: LoadOutcome) -> Option<RaterRecord> {
        let key = (
            outcome.record.entity.id.clone(),
            outcome.record.rater_id.clone(),
        );
        self.records.insert(key, outcome).map(|prev| prev.record)
    }

    pub fn get(&self, entity_id: &str, rater_id: &str) -> Option<&RaterRecord> {
        self.records
            .get(&(entity_id.to_string(), rater_id.to_string()))
            .map(|o| &o.record)
    }

    /// Records ordered by (entity, rater).
    pub fn records(&self) -> impl Iterator<Item = &RaterRecord> {
        self.records.values().map(|o| &o.record)
    }

    pub fn load_issues(&self) -> impl Iterator<Item = &DataIssue> {
        self.records.values().flat_map(|o| o.issues.iter())
    }

    /// Entity metadata merged across raters; the first non-empty field wins.
    pub fn entities(&self) -> Vec<Entity> {
        let mut merged: BTreeMap<&str, Entity> = BTreeMap::new();
        for record in self.records() {
            let entry = merged
                .entry(record.entity.id.as_str())
                .or_insert_with(|| Entity::new(record.entity.id.clone()));
            if entry.name.is_none() {
                entry.name.clone_from(&record.entity.name);
            }
            if entry.access.is_none() {
                entry.access.clone_from(&record.entity.access);
            }
        }
        merged.into_values().collect()
    }

    pub fn raters(&self) -> BTreeSet<RaterId> {
        self.records.keys().map(|(_, r)| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Vocabulary;
    use crate::schema::VariableDefinition;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.define(VariableDefinition::binary("API")).unwrap();
        registry
            .define(VariableDefinition::ordinal("OPEN", &["closed", "partial", "open"]))
            .unwrap();
        registry.define(VariableDefinition::count("SDK_count")).unwrap();
        registry
            .define(VariableDefinition::list("SDK_lang", "programming_languages"))
            .unwrap();
        registry.define(VariableDefinition::free_text("NOTES")).unwrap();
        registry.seal().unwrap();
        registry
    }

    fn vocabularies() -> Vocabularies {
        let mut vocab = Vocabulary::new("programming_languages");
        vocab.add_canonical("Python");
        vocab.add_canonical("JavaScript");
        let mut all = Vocabularies::new();
        all.insert(vocab);
        all
    }

    #[test]
    fn parse_json_flattens_sections_and_aliases() {
        let raw = parse_json_record(
            r#"{
                "platform_ID": "VG1",
                "platform_name": "Acme",
                "coder": "claude",
                "application": { "API": 1, "OPEN": "open" },
                "development": { "SDK_lang": "Python; javascript" },
                "extra": 5
            }"#,
            true,
        )
        .unwrap();
        assert_eq!(raw.entity.id, "VG1");
        assert_eq!(raw.entity.name.as_deref(), Some("Acme"));
        assert_eq!(raw.rater_id.as_deref(), Some("claude"));
        assert_eq!(raw.fields.len(), 4);
        assert!(raw.fields.contains_key("OPEN"));
        assert!(raw.fields.contains_key("extra"));
    }

    #[test]
    fn parse_json_without_flatten_keeps_sections_as_fields() {
        let raw = parse_json_record(
            r#"{"entity_id": "VG1", "variables": {"API": 0}, "application": {"OPEN": "open"}}"#,
            false,
        )
        .unwrap();
        assert!(raw.fields.contains_key("API"));
        assert!(raw.fields.contains_key("application"));
    }

    #[test]
    fn parse_json_requires_entity_id() {
        let err = parse_json_record(r#"{"values": {"API": 1}}"#, true).unwrap_err();
        assert!(matches!(err, ReconError::InvalidRecord(_)));
    }

    #[test]
    fn binary_coercion_policies() {
        let kind = VariableKind::Binary;
        let strict = BinaryCoercion::Strict;
        assert_eq!(
            coerce(&kind, &JsonValue::from(1), strict),
            Coerced::Value(RecordValue::Binary(1))
        );
        assert_eq!(
            coerce(&kind, &JsonValue::from("no"), strict),
            Coerced::Value(RecordValue::Binary(0))
        );
        assert_eq!(
            coerce(&kind, &JsonValue::from(true), strict),
            Coerced::Value(RecordValue::Binary(1))
        );
        assert_eq!(coerce(&kind, &JsonValue::from(3), strict), Coerced::Mismatch);
        assert_eq!(
            coerce(&kind, &JsonValue::from(3), BinaryCoercion::PositiveIsOne),
            Coerced::Value(RecordValue::Binary(1))
        );
        assert_eq!(
            coerce(&kind, &JsonValue::from(-1), BinaryCoercion::PositiveIsOne),
            Coerced::Mismatch
        );
        assert_eq!(coerce(&kind, &JsonValue::Null, strict), Coerced::Missing);
        assert_eq!(coerce(&kind, &JsonValue::from(" "), strict), Coerced::Missing);
    }

    #[test]
    fn count_accepts_integral_floats_only() {
        let kind = VariableKind::Count;
        let strict = BinaryCoercion::Strict;
        assert_eq!(
            coerce(&kind, &JsonValue::from("3.0"), strict),
            Coerced::Value(RecordValue::Count(3))
        );
        assert_eq!(coerce(&kind, &JsonValue::from(2.5), strict), Coerced::Mismatch);
        assert_eq!(coerce(&kind, &JsonValue::from(-2), strict), Coerced::Mismatch);
    }

    #[test]
    fn count_above_domain_is_mismatch() {
        let kind = VariableKind::Count;
        let strict = BinaryCoercion::Strict;
        assert_eq!(
            coerce(&kind, &JsonValue::from(MAX_COUNT), strict),
            Coerced::Value(RecordValue::Count(MAX_COUNT))
        );
        assert_eq!(
            coerce(&kind, &JsonValue::from(i64::MAX), strict),
            Coerced::Mismatch
        );
    }

    #[test]
    fn ordinal_matches_declared_levels_case_insensitively() {
        let kind = VariableKind::Ordinal {
            levels: vec!["closed".into(), "open".into()],
        };
        assert_eq!(
            coerce(&kind, &JsonValue::from("OPEN"), BinaryCoercion::Strict),
            Coerced::Value(RecordValue::Ordinal("open".into()))
        );
        assert_eq!(
            coerce(&kind, &JsonValue::from("ajar"), BinaryCoercion::Strict),
            Coerced::Mismatch
        );
    }

    #[test]
    fn load_drops_unknown_and_marks_mismatch() {
        let raw = parse_json_record(
            r#"{"entity_id": "VG1", "values": {"API": "maybe", "BOGUS": 1, "SDK_count": 2, "NOTES": ""}}"#,
            true,
        )
        .unwrap();
        let outcome = load(raw, "claude", &registry(), &LoaderConfig::default()).unwrap();
        let record = &outcome.record;
        assert_eq!(record.rater_id, "claude");
        assert_eq!(record.values.get("SDK_count"), Some(&RecordValue::Count(2)));
        assert_eq!(
            record.values.get("API"),
            Some(&RecordValue::Mismatch("maybe".into()))
        );
        assert!(!record.values.contains_key("BOGUS"));
        assert!(!record.values.contains_key("NOTES"));
        let codes: Vec<_> = outcome.issues.iter().map(DataIssue::code).collect();
        assert_eq!(codes, vec!["type_mismatch", "unknown_variable"]);
    }

    #[test]
    fn normalize_canonicalizes_lists_and_skips_mismatches() {
        let raw = parse_json_record(
            r#"{"entity_id": "VG1", "values": {"API": 7, "OPEN": "partial", "SDK_lang": "javascript;Python;Cobol"}}"#,
            true,
        )
        .unwrap();
        let outcome = load(raw, "human", &registry(), &LoaderConfig::default()).unwrap();
        let (normalized, issues) =
            normalize(&outcome.record, &registry(), &vocabularies()).unwrap();
        assert!(!normalized.values.contains_key("API"));
        assert_eq!(
            normalized.values.get("OPEN"),
            Some(&Value::Ordinal {
                rank: 1,
                label: "partial".into()
            })
        );
        assert_eq!(
            normalized.values["SDK_lang"].render(),
            "Cobol; JavaScript; Python"
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code(), "unmapped_token");
    }

    #[test]
    fn csv_records_skip_empty_cells() {
        let csv = "platform_id,platform_name,API,OPEN,SDK_lang\n\
                   VG1,Acme,1,open,Python\n\
                   VG2,Beta,,closed,\n\
                   ,,,,\n";
        let records = load_csv_records(csv, "platform_id").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity.name.as_deref(), Some("Acme"));
        assert_eq!(records[0].fields.len(), 3);
        assert_eq!(records[1].fields.len(), 1);
    }

    #[test]
    fn csv_missing_id_column_is_error() {
        assert!(load_csv_records("name,API\nx,1\n", "platform_id").is_err());
    }

    #[test]
    fn store_replaces_whole_record() {
        let registry = registry();
        let options = LoaderConfig::default();
        let mut store = RecordStore::new();

        let first = parse_json_record(
            r#"{"entity_id": "VG1", "values": {"API": 1, "SDK_count": 4}}"#,
            true,
        )
        .unwrap();
        assert!(store
            .insert(load(first, "claude", &registry, &options).unwrap())
            .is_none());

        let second =
            parse_json_record(r#"{"entity_id": "VG1", "values": {"API": 0}}"#, true).unwrap();
        let previous = store
            .insert(load(second, "claude", &registry, &options).unwrap())
            .unwrap();
        assert_eq!(previous.values.len(), 2);

        let current = store.get("VG1", "claude").unwrap();
        assert_eq!(current.values.len(), 1);
        assert_eq!(current.values["API"], RecordValue::Binary(0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn parse_value_uses_loader_rules() {
        let registry = registry();
        let vocabularies = vocabularies();
        let open = registry.lookup("OPEN").unwrap();
        assert_eq!(
            parse_value(open, "Open", BinaryCoercion::Strict, &vocabularies).unwrap(),
            Value::Ordinal {
                rank: 2,
                label: "open".into()
            }
        );
        let api = registry.lookup("API").unwrap();
        assert!(matches!(
            parse_value(api, "2", BinaryCoercion::Strict, &vocabularies),
            Err(ReconError::InvalidValue { .. })
        ));
    }
}
