use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adjudication::AdjudicationItem;
use crate::agreement::AgreementReport;

pub type EntityId = String;
pub type RaterId = String;

/// Separator used whenever a list value is rendered for output.
pub const LIST_RENDER_SEPARATOR: &str = "; ";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// The unit being coded. Name and access are carried through as metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// A rater's value after type validation, before list canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecordValue {
    Binary(u8),
    /// Declared level label, spelled as declared.
    Ordinal(String),
    Count(u64),
    /// Raw delimiter-separated list, canonicalized during normalization.
    List(String),
    Text(String),
    /// The raw value failed its type check; excluded from agreement and merge.
    Mismatch(String),
}

/// One record per (entity, rater). Replaced wholesale on re-submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaterRecord {
    pub entity: Entity,
    pub rater_id: RaterId,
    pub captured_at: DateTime<Utc>,
    pub values: BTreeMap<String, RecordValue>,
}

// ---------------------------------------------------------------------------
// Normalized values
// ---------------------------------------------------------------------------

/// A value that satisfies its variable's kind and domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Binary(u8),
    Ordinal { rank: usize, label: String },
    Count(u64),
    List(BTreeSet<String>),
    Text(String),
}

impl Value {
    /// Numeric code used by the agreement statistics. Lists and text have none.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Self::Binary(v) => Some(f64::from(*v)),
            Self::Ordinal { rank, .. } => Some(*rank as f64),
            Self::Count(v) => Some(*v as f64),
            Self::List(_) | Self::Text(_) => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Binary(v) => Some(u64::from(*v)),
            Self::Count(v) => Some(*v),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Binary(v) => v.to_string(),
            Self::Ordinal { label, .. } => label.clone(),
            Self::Count(v) => v.to_string(),
            Self::List(tokens) => tokens
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(LIST_RENDER_SEPARATOR),
            Self::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Read-only view of a [`RaterRecord`] after validation and canonicalization.
/// Mismatched values are absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub entity_id: EntityId,
    pub rater_id: RaterId,
    pub captured_at: DateTime<Utc>,
    pub values: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Data issues
// ---------------------------------------------------------------------------

/// Non-fatal data-quality note. Every run carries the full list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum DataIssue {
    UnknownVariable {
        entity_id: EntityId,
        rater_id: RaterId,
        variable: String,
    },
    TypeMismatch {
        entity_id: EntityId,
        rater_id: RaterId,
        variable: String,
        expected: String,
        raw: String,
    },
    UnmappedToken {
        entity_id: EntityId,
        rater_id: RaterId,
        variable: String,
        vocabulary: String,
        token: String,
    },
    DerivationInconsistency {
        entity_id: EntityId,
        rater_id: RaterId,
        variable: String,
        reported: u64,
        component_sum: u64,
    },
    /// A derived variable was reported but none of its components were coded.
    DerivationUnresolvable { entity_id: EntityId, variable: String },
    /// Component total does not fit a count.
    DerivationOverflow { entity_id: EntityId, variable: String },
    /// An adjudication recorded against a different rater set than the current one.
    StaleAdjudication {
        entity_id: EntityId,
        variable: String,
        adjudicated_raters: Vec<RaterId>,
        current_raters: Vec<RaterId>,
    },
}

impl DataIssue {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownVariable { .. } => "unknown_variable",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::UnmappedToken { .. } => "unmapped_token",
            Self::DerivationInconsistency { .. } => "derivation_inconsistency",
            Self::DerivationUnresolvable { .. } => "derivation_unresolvable",
            Self::DerivationOverflow { .. } => "derivation_overflow",
            Self::StaleAdjudication { .. } => "stale_adjudication",
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::UnknownVariable { entity_id, .. }
            | Self::TypeMismatch { entity_id, .. }
            | Self::UnmappedToken { entity_id, .. }
            | Self::DerivationInconsistency { entity_id, .. }
            | Self::DerivationUnresolvable { entity_id, .. }
            | Self::DerivationOverflow { entity_id, .. }
            | Self::StaleAdjudication { entity_id, .. } => entity_id,
        }
    }

    pub fn variable(&self) -> &str {
        match self {
            Self::UnknownVariable { variable, .. }
            | Self::TypeMismatch { variable, .. }
            | Self::UnmappedToken { variable, .. }
            | Self::DerivationInconsistency { variable, .. }
            | Self::DerivationUnresolvable { variable, .. }
            | Self::DerivationOverflow { variable, .. }
            | Self::StaleAdjudication { variable, .. } => variable,
        }
    }

    pub fn rater_id(&self) -> Option<&str> {
        match self {
            Self::UnknownVariable { rater_id, .. }
            | Self::TypeMismatch { rater_id, .. }
            | Self::UnmappedToken { rater_id, .. }
            | Self::DerivationInconsistency { rater_id, .. } => Some(rater_id),
            Self::DerivationUnresolvable { .. }
            | Self::DerivationOverflow { .. }
            | Self::StaleAdjudication { .. } => None,
        }
    }

    /// Human-readable detail for the issues export.
    pub fn detail(&self) -> String {
        match self {
            Self::UnknownVariable { .. } => "key not in schema; dropped".to_string(),
            Self::TypeMismatch { expected, raw, .. } => {
                format!("expected {expected}, got '{raw}'")
            }
            Self::UnmappedToken {
                vocabulary, token, ..
            } => format!("'{token}' has no mapping in vocabulary '{vocabulary}'"),
            Self::DerivationInconsistency {
                reported,
                component_sum,
                ..
            } => format!("reported {reported}, components sum to {component_sum}"),
            Self::DerivationUnresolvable { .. } => {
                "reported directly but no component was coded".to_string()
            }
            Self::DerivationOverflow { .. } => "component total exceeds the count range".to_string(),
            Self::StaleAdjudication {
                adjudicated_raters,
                current_raters,
                ..
            } => format!(
                "adjudicated for [{}], current raters [{}]",
                adjudicated_raters.join(", "),
                current_raters.join(", ")
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Unanimous,
    Majority,
    SingleRater,
    /// Token-level union of disagreeing list values.
    Union,
    Adjudicated,
    Pending,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unanimous => "unanimous",
            Self::Majority => "majority",
            Self::SingleRater => "single-rater",
            Self::Union => "union",
            Self::Adjudicated => "adjudicated",
            Self::Pending => "pending",
        }
    }

    /// Ordering used when a derived value inherits from several components:
    /// the weakest component provenance wins.
    pub(crate) fn strength(&self) -> u8 {
        match self {
            Self::Unanimous => 5,
            Self::Adjudicated => 4,
            Self::Majority => 3,
            Self::Union => 2,
            Self::SingleRater => 1,
            Self::Pending => 0,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Support level of a single token inside a merged list value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenProvenance {
    Unanimous,
    Majority,
    Minority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSupport {
    pub token: String,
    pub raters: usize,
    pub support: TokenProvenance,
}

/// One final value per (entity, variable). `value` is `None` only while pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub entity_id: EntityId,
    pub variable: String,
    pub value: Option<Value>,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjudicator: Option<String>,
    /// Contributing raters, sorted. Together with entity and variable this is
    /// the replay key for adjudications.
    pub raters: Vec<RaterId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<TokenSupport>,
    pub decided_at: DateTime<Utc>,
}

impl ConsensusRecord {
    pub fn is_pending(&self) -> bool {
        self.provenance == Provenance::Pending
    }

    pub fn rendered_value(&self) -> String {
        self.value.as_ref().map(Value::render).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub raters: Vec<RaterId>,
    pub entities: usize,
    pub variables: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsensusSummary {
    pub total_records: usize,
    pub by_provenance: BTreeMap<String, usize>,
    pub pending: usize,
    pub issues_by_kind: BTreeMap<String, usize>,
    /// vocabulary -> raw label -> occurrences, for vocabulary extension.
    pub unmapped_tokens: BTreeMap<String, BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: RunMeta,
    pub summary: ConsensusSummary,
    pub agreement: AgreementReport,
    pub entities: Vec<Entity>,
    pub consensus: Vec<ConsensusRecord>,
    pub pending: Vec<AdjudicationItem>,
    pub issues: Vec<DataIssue>,
}

impl ReconResult {
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
