use thiserror::Error;

/// Fatal engine errors.
///
/// Per-record data problems are not errors; they travel as
/// [`DataIssue`](crate::model::DataIssue) values in the run result.
#[derive(Debug, Error)]
pub enum ReconError {
    /// A variable with this name is already defined.
    #[error("duplicate variable: {0}")]
    DuplicateVariable(String),
    /// Lookup of a variable the registry does not know.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    /// `define` called after `seal`.
    #[error("schema registry is sealed; cannot define '{0}'")]
    RegistrySealed(String),
    /// A run was started against a registry that was never sealed.
    #[error("schema registry must be sealed before a run")]
    RegistryNotSealed,
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad derivation, missing vocabulary, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    #[error("unknown vocabulary: {0}")]
    UnknownVocabulary(String),
    /// A raw record that cannot be attributed to an entity.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// A resolution value that does not satisfy the variable's kind.
    #[error("variable '{variable}': invalid value '{value}' (expected {expected})")]
    InvalidValue {
        variable: String,
        value: String,
        expected: String,
    },
    /// Derived variables are recomputed from their components and cannot be
    /// resolved directly.
    #[error("variable '{0}' is derived; resolve its components instead")]
    DerivedOverride(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
