use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;

use crate::canonical::{Vocabularies, Vocabulary};
use crate::error::ReconError;
use crate::schema::{
    Derivation, SchemaRegistry, VariableDefinition, VariableKind, DEFAULT_LIST_DELIMITER,
};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    /// Default delimiter for list variables.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub agreement: AgreementConfig,
    #[serde(default)]
    pub adjudication: AdjudicationConfig,
    #[serde(default)]
    pub raters: Vec<RaterConfig>,
    #[serde(default)]
    pub vocabularies: BTreeMap<String, VocabularyConfig>,
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
}

fn default_delimiter() -> String {
    DEFAULT_LIST_DELIMITER.to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// How loosely binary values are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryCoercion {
    /// 0/1, true/false, yes/no only.
    #[default]
    Strict,
    /// Additionally map any positive integer to 1.
    PositiveIsOne,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub binary_coercion: BinaryCoercion,
    /// Flatten nested category objects one level into the value map.
    #[serde(default = "default_true")]
    pub flatten_sections: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            binary_coercion: BinaryCoercion::Strict,
            flatten_sections: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Agreement + adjudication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AgreementConfig {
    #[serde(default = "default_low_agreement")]
    pub low_agreement_threshold: f64,
    /// Base rate outside `[t, 1 - t]` makes Gwet's AC1 the primary statistic.
    #[serde(default = "default_skew")]
    pub skew_threshold: f64,
    #[serde(default = "default_min_icc_subjects")]
    pub min_icc_subjects: usize,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            low_agreement_threshold: default_low_agreement(),
            skew_threshold: default_skew(),
            min_icc_subjects: default_min_icc_subjects(),
        }
    }
}

fn default_low_agreement() -> f64 {
    0.80
}

fn default_skew() -> f64 {
    0.20
}

fn default_min_icc_subjects() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjudicationConfig {
    #[serde(default = "default_ledger")]
    pub ledger: String,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger(),
        }
    }
}

fn default_ledger() -> String {
    "adjudications.jsonl".to_string()
}

// ---------------------------------------------------------------------------
// Raters, vocabularies, variables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RaterConfig {
    pub id: String,
    /// Directory of JSON records or a single CSV coding sheet.
    pub path: String,
    /// Entity id column for CSV coding sheets.
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

fn default_id_column() -> String {
    "entity_id".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VocabularyConfig {
    /// Two-column CSV: `raw_label,canonical_token`.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub canonical: Vec<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindName {
    Binary,
    Ordinal,
    Count,
    #[serde(alias = "categorical_list")]
    List,
    FreeText,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariableConfig {
    pub name: String,
    pub kind: KindName,
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub vocabulary: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub derived_from: Vec<String>,
    /// `sum` (default) or `distinct_tokens`; only with `derived_from`.
    #[serde(default)]
    pub derivation: Option<Derivation>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.raters.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one rater is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for rater in &self.raters {
            if rater.id.trim().is_empty() {
                return Err(ReconError::ConfigValidation("rater id must not be empty".into()));
            }
            if !seen.insert(rater.id.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "duplicate rater id '{}'",
                    rater.id
                )));
            }
        }

        for (label, value) in [
            ("low_agreement_threshold", self.agreement.low_agreement_threshold),
            ("skew_threshold", self.agreement.skew_threshold),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ReconError::ConfigValidation(format!(
                    "agreement.{label} must be within (0, 1), got {value}"
                )));
            }
        }
        if self.agreement.min_icc_subjects < 2 {
            return Err(ReconError::ConfigValidation(
                "agreement.min_icc_subjects must be at least 2".into(),
            ));
        }

        if self.delimiter.is_empty() {
            return Err(ReconError::ConfigValidation("delimiter must not be empty".into()));
        }

        for (id, vocab) in &self.vocabularies {
            if vocab.file.is_none() && vocab.canonical.is_empty() && vocab.aliases.is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "vocabulary '{id}' declares no file, canonical tokens or aliases"
                )));
            }
        }

        // Defining and sealing catches duplicates and bad derivations.
        self.build_registry()?;
        Ok(())
    }

    /// Build and seal the schema registry from `[[variables]]`.
    pub fn build_registry(&self) -> Result<SchemaRegistry, ReconError> {
        let mut registry = SchemaRegistry::new();
        for variable in &self.variables {
            registry.define(self.definition(variable)?)?;
        }
        registry.seal()?;
        Ok(registry)
    }

    fn definition(&self, variable: &VariableConfig) -> Result<VariableDefinition, ReconError> {
        let invalid = |msg: String| {
            ReconError::ConfigValidation(format!("variable '{}': {msg}", variable.name))
        };
        if variable.name.trim().is_empty() {
            return Err(ReconError::ConfigValidation("variable name must not be empty".into()));
        }
        if variable.kind != KindName::Ordinal && !variable.levels.is_empty() {
            return Err(invalid("levels are only allowed on ordinal variables".into()));
        }

        let kind = match variable.kind {
            KindName::Binary => VariableKind::Binary,
            KindName::Count => VariableKind::Count,
            KindName::FreeText => VariableKind::FreeText,
            KindName::Ordinal => {
                let distinct: HashSet<_> = variable.levels.iter().collect();
                if variable.levels.len() < 2 || distinct.len() != variable.levels.len() {
                    return Err(invalid("ordinal variables need at least 2 distinct levels".into()));
                }
                VariableKind::Ordinal {
                    levels: variable.levels.clone(),
                }
            }
            KindName::List => {
                let vocabulary = variable
                    .vocabulary
                    .clone()
                    .ok_or_else(|| invalid("list variables need a vocabulary".into()))?;
                if !self.vocabularies.contains_key(&vocabulary) {
                    return Err(invalid(format!("unknown vocabulary '{vocabulary}'")));
                }
                let delimiter = variable
                    .delimiter
                    .clone()
                    .unwrap_or_else(|| self.delimiter.clone());
                if delimiter.is_empty() {
                    return Err(invalid("delimiter must not be empty".into()));
                }
                VariableKind::List {
                    vocabulary,
                    delimiter,
                }
            }
        };

        if variable.derivation.is_some() && variable.derived_from.is_empty() {
            return Err(invalid("derivation requires derived_from".into()));
        }

        let mut definition = VariableDefinition::new(variable.name.clone(), kind)
            .derived_from(variable.derived_from.iter().cloned());
        definition.derivation = variable.derivation.unwrap_or_default();
        Ok(definition)
    }

    /// Build vocabularies. `files` holds the contents of each vocabulary's
    /// `file`, keyed by vocabulary id.
    pub fn build_vocabularies(
        &self,
        files: &HashMap<String, String>,
    ) -> Result<Vocabularies, ReconError> {
        let mut vocabularies = Vocabularies::new();
        for (id, vocab) in &self.vocabularies {
            let mut table = match &vocab.file {
                Some(path) => {
                    let contents = files.get(id).ok_or_else(|| {
                        ReconError::ConfigValidation(format!(
                            "vocabulary '{id}': file '{path}' was not loaded"
                        ))
                    })?;
                    Vocabulary::from_csv(id.clone(), contents)?
                }
                None => Vocabulary::new(id.clone()),
            };
            for token in &vocab.canonical {
                table.add_canonical(token);
            }
            for (raw, canonical) in &vocab.aliases {
                table.add_alias(raw, canonical);
            }
            vocabularies.insert(table);
        }
        Ok(vocabularies)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
