//! Controlled vocabularies and list canonicalization.
//!
//! A raw list value such as `"日本語; english ;Deutsch"` is split on the
//! variable's delimiter, trimmed, and each segment is mapped to a canonical
//! token. Segments with no mapping are kept verbatim and reported as unmapped.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::LIST_RENDER_SEPARATOR;

/// Case- and whitespace-insensitive key.
fn fold(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    id: String,
    canonical: BTreeSet<String>,
    aliases: HashMap<String, String>,
    folded_canonical: HashMap<String, String>,
    folded_aliases: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct VocabularyRow {
    raw_label: String,
    canonical_token: String,
}

impl Vocabulary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_canonical(&mut self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            return;
        }
        self.folded_canonical
            .entry(fold(token))
            .or_insert_with(|| token.to_string());
        self.canonical.insert(token.to_string());
    }

    /// Map `raw` to `canonical`, declaring `canonical` as a token if needed.
    pub fn add_alias(&mut self, raw: &str, canonical: &str) {
        let raw = raw.trim();
        let canonical = canonical.trim();
        if raw.is_empty() || canonical.is_empty() {
            return;
        }
        self.add_canonical(canonical);
        if raw == canonical {
            return;
        }
        self.folded_aliases
            .entry(fold(raw))
            .or_insert_with(|| canonical.to_string());
        self.aliases.insert(raw.to_string(), canonical.to_string());
    }

    /// Parse a `raw_label,canonical_token` table. A row whose label equals its
    /// token declares a canonical token.
    pub fn from_csv(id: impl Into<String>, csv_data: &str) -> Result<Self, ReconError> {
        let mut vocabulary = Self::new(id);
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(csv_data.as_bytes());
        for row in reader.deserialize::<VocabularyRow>() {
            let row = row?;
            vocabulary.add_alias(&row.raw_label, &row.canonical_token);
        }
        Ok(vocabulary)
    }

    /// Canonical token for one trimmed segment, if the vocabulary knows it.
    pub fn lookup(&self, segment: &str) -> Option<&str> {
        if let Some(token) = self.canonical.get(segment) {
            return Some(token);
        }
        if let Some(token) = self.aliases.get(segment) {
            return Some(token);
        }
        let key = fold(segment);
        self.folded_canonical
            .get(&key)
            .or_else(|| self.folded_aliases.get(&key))
            .map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.canonical.contains(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.canonical.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalSet {
    /// Canonical tokens, including unmapped segments kept verbatim.
    pub tokens: BTreeSet<String>,
    /// Segments the vocabulary could not map.
    pub unmapped: BTreeSet<String>,
}

impl CanonicalSet {
    pub fn render(&self) -> String {
        self.tokens
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(LIST_RENDER_SEPARATOR)
    }
}

pub fn canonicalize(raw: &str, delimiter: &str, vocabulary: &Vocabulary) -> CanonicalSet {
    let mut set = CanonicalSet::default();
    for segment in raw.split(delimiter).map(str::trim).filter(|s| !s.is_empty()) {
        match vocabulary.lookup(segment) {
            Some(token) => {
                set.tokens.insert(token.to_string());
            }
            None => {
                set.tokens.insert(segment.to_string());
                set.unmapped.insert(segment.to_string());
            }
        }
    }
    set
}

/// All vocabularies of a project, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Vocabularies {
    tables: HashMap<String, Vocabulary>,
}

impl Vocabularies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vocabulary: Vocabulary) {
        self.tables.insert(vocabulary.id.clone(), vocabulary);
    }

    pub fn get(&self, id: &str) -> Result<&Vocabulary, ReconError> {
        self.tables
            .get(id)
            .ok_or_else(|| ReconError::UnknownVocabulary(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tables.contains_key(id)
    }

    pub fn canonicalize(
        &self,
        raw: &str,
        vocabulary_id: &str,
        delimiter: &str,
    ) -> Result<CanonicalSet, ReconError> {
        Ok(canonicalize(raw, delimiter, self.get(vocabulary_id)?))
    }
}
