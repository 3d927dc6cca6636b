use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::model::Value;

pub const DEFAULT_LIST_DELIMITER: &str = ";";

/// Largest accepted count. Keeps derived totals far from `u64` overflow.
pub const MAX_COUNT: u64 = u32::MAX as u64;

// ---------------------------------------------------------------------------
// Variable definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableKind {
    Binary,
    Ordinal { levels: Vec<String> },
    Count,
    List { vocabulary: String, delimiter: String },
    /// Carried through to the export, excluded from agreement and merge.
    FreeText,
}

impl VariableKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Ordinal { .. } => "ordinal",
            Self::Count => "count",
            Self::List { .. } => "list",
            Self::FreeText => "free_text",
        }
    }

    /// Human description of the accepted domain, used in mismatch notes.
    pub fn expected(&self) -> String {
        match self {
            Self::Binary => "0 or 1".to_string(),
            Self::Ordinal { levels } => format!("one of [{}]", levels.join(", ")),
            Self::Count => format!("an integer in 0..={MAX_COUNT}"),
            Self::List { delimiter, .. } => format!("a '{delimiter}'-delimited string"),
            Self::FreeText => "text".to_string(),
        }
    }

    /// True when `value` is a legal value of this kind.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Binary, Value::Binary(v)) => *v <= 1,
            (Self::Ordinal { levels }, Value::Ordinal { rank, label }) => {
                levels.get(*rank).is_some_and(|l| l == label)
            }
            (Self::Count, Value::Count(v)) => *v <= MAX_COUNT,
            (Self::List { .. }, Value::List(_)) => true,
            (Self::FreeText, Value::Text(_)) => true,
            _ => false,
        }
    }
}

/// How a derived variable is computed from its components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    /// Sum of binary or count components.
    #[default]
    Sum,
    /// Number of distinct tokens across list components.
    DistinctTokens,
}

impl Derivation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::DistinctTokens => "distinct_tokens",
        }
    }
}

/// Declared at configuration time; immutable once the registry is sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDefinition {
    pub name: String,
    pub kind: VariableKind,
    /// Components the value is derived from. Empty for plain variables.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub derived_from: Vec<String>,
    pub derivation: Derivation,
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            derived_from: Vec::new(),
            derivation: Derivation::Sum,
        }
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Binary)
    }

    pub fn ordinal(name: impl Into<String>, levels: &[&str]) -> Self {
        Self::new(
            name,
            VariableKind::Ordinal {
                levels: levels.iter().map(|l| l.to_string()).collect(),
            },
        )
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Count)
    }

    pub fn list(name: impl Into<String>, vocabulary: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableKind::List {
                vocabulary: vocabulary.into(),
                delimiter: DEFAULT_LIST_DELIMITER.to_string(),
            },
        )
    }

    pub fn free_text(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::FreeText)
    }

    /// Turn this definition into a sum over `components`.
    pub fn derived_from<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derived_from = components.into_iter().map(Into::into).collect();
        self
    }

    /// Count distinct tokens across the (list) components instead of summing.
    pub fn distinct_tokens(mut self) -> Self {
        self.derivation = Derivation::DistinctTokens;
        self
    }

    pub fn is_derived(&self) -> bool {
        !self.derived_from.is_empty()
    }

    /// Participates in agreement and consensus merge.
    pub fn is_measured(&self) -> bool {
        !self.is_derived() && self.kind != VariableKind::FreeText
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Variables in declaration order, with name lookup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    variables: Vec<VariableDefinition>,
    index: HashMap<String, usize>,
    sealed: bool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, variable: VariableDefinition) -> Result<(), ReconError> {
        if self.sealed {
            return Err(ReconError::RegistrySealed(variable.name));
        }
        if self.index.contains_key(&variable.name) {
            return Err(ReconError::DuplicateVariable(variable.name));
        }
        self.index.insert(variable.name.clone(), self.variables.len());
        self.variables.push(variable);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&VariableDefinition, ReconError> {
        self.get(name)
            .ok_or_else(|| ReconError::UnknownVariable(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&VariableDefinition> {
        self.index.get(name).map(|&i| &self.variables[i])
    }

    /// Components of a derived variable in declared order; empty otherwise.
    pub fn derived_components(&self, name: &str) -> Result<Vec<&VariableDefinition>, ReconError> {
        let variable = self.lookup(name)?;
        variable
            .derived_from
            .iter()
            .map(|component| self.lookup(component))
            .collect()
    }

    /// Validate derivation rules and freeze the registry.
    pub fn seal(&mut self) -> Result<(), ReconError> {
        for variable in self.variables.iter().filter(|v| v.is_derived()) {
            if variable.kind != VariableKind::Count {
                return Err(ReconError::ConfigValidation(format!(
                    "derived variable '{}' must be of kind count, got {}",
                    variable.name,
                    variable.kind.label()
                )));
            }
            for component in &variable.derived_from {
                let def = self.get(component).ok_or_else(|| {
                    ReconError::ConfigValidation(format!(
                        "derived variable '{}': unknown component '{component}'",
                        variable.name
                    ))
                })?;
                if def.is_derived() {
                    return Err(ReconError::ConfigValidation(format!(
                        "derived variable '{}': component '{component}' is itself derived",
                        variable.name
                    )));
                }
                let admissible = match variable.derivation {
                    Derivation::Sum => {
                        matches!(def.kind, VariableKind::Binary | VariableKind::Count)
                    }
                    Derivation::DistinctTokens => matches!(def.kind, VariableKind::List { .. }),
                };
                if !admissible {
                    let expected = match variable.derivation {
                        Derivation::Sum => "binary or count",
                        Derivation::DistinctTokens => "a list",
                    };
                    return Err(ReconError::ConfigValidation(format!(
                        "derived variable '{}' ({}): component '{component}' must be {expected}",
                        variable.name,
                        variable.derivation.as_str()
                    )));
                }
            }
        }
        self.sealed = true;
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// All variables in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
