//! `concord-recon`: inter-rater reliability and consensus merge engine.
//!
//! Pure engine crate: receives raw rater records as strings, returns
//! agreement statistics, consensus records and the adjudication queue.
//! No CLI or filesystem dependencies.

pub mod adjudication;
pub mod agreement;
pub mod canonical;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod loader;
pub mod merge;
pub mod model;
pub mod schema;
pub mod stats;

pub use adjudication::{AdjudicationItem, AdjudicationQueue, WorksheetImport, WorksheetRow};
pub use agreement::{AgreementReport, AgreementResult, Metric, Scope, Statistic};
pub use canonical::{Vocabularies, Vocabulary};
pub use config::ReconConfig;
pub use engine::{ingest, run};
pub use error::ReconError;
pub use loader::{RawRecord, RecordStore};
pub use model::{ConsensusRecord, DataIssue, Provenance, ReconResult, Value};
pub use schema::{SchemaRegistry, VariableDefinition, VariableKind};
