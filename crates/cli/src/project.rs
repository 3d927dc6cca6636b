//! Project loading: config, vocabulary files, rater records and the
//! adjudication ledger, all resolved relative to the config's directory.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use concord_recon::adjudication::ledger_lines;
use concord_recon::config::RaterConfig;
use concord_recon::loader::{load_csv_records, parse_json_record};
use concord_recon::{
    ingest, AdjudicationQueue, ConsensusRecord, RawRecord, ReconConfig, RecordStore,
    SchemaRegistry, Vocabularies,
};
use tracing::{debug, info, warn};

use crate::exit_codes::EXIT_INVALID_CONFIG;
use crate::CliError;

pub struct Project {
    pub root: PathBuf,
    pub config: ReconConfig,
    pub registry: SchemaRegistry,
    pub vocabularies: Vocabularies,
}

fn read(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|e| CliError::io(format!("cannot read {}: {e}", path.display())))
}

impl Project {
    pub fn open(config_path: &Path) -> Result<Self, CliError> {
        let config_str = read(config_path)?;
        let config = ReconConfig::from_toml(&config_str)?;
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut files = HashMap::new();
        for (id, vocab) in &config.vocabularies {
            if let Some(file) = &vocab.file {
                let contents = read(&root.join(file)).map_err(|e| {
                    CliError::new(EXIT_INVALID_CONFIG, e.message)
                        .with_hint(format!("vocabulary '{id}' names a file that does not exist"))
                })?;
                files.insert(id.clone(), contents);
            }
        }

        let registry = config.build_registry()?;
        let vocabularies = config.build_vocabularies(&files)?;
        Ok(Self {
            root,
            config,
            registry,
            vocabularies,
        })
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(Path::new(&self.config.adjudication.ledger))
    }

    /// Load every rater's records into a fresh store. Records that cannot be
    /// attributed to an entity are skipped with a warning.
    pub fn load_records(&self) -> Result<RecordStore, CliError> {
        let mut store = RecordStore::new();
        for rater in &self.config.raters {
            let raws = self.read_rater(rater)?;
            let count = raws.len();
            let replaced = ingest(&mut store, raws, &rater.id, &self.registry, &self.config.loader)?;
            if replaced > 0 {
                warn!(rater = %rater.id, replaced, "rater supplied more than one record per entity; kept the last");
            }
            info!(rater = %rater.id, records = count, "loaded");
        }
        Ok(store)
    }

    fn read_rater(&self, rater: &RaterConfig) -> Result<Vec<RawRecord>, CliError> {
        let path = self.resolve(Path::new(&rater.path));
        if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(&path)
                .map_err(|e| CliError::io(format!("cannot list {}: {e}", path.display())))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| matches!(extension(p).as_deref(), Some("json" | "jsonl" | "csv")))
                .collect();
            files.sort();
            let mut raws = Vec::new();
            for file in files {
                raws.extend(self.read_file(rater, &file)?);
            }
            return Ok(raws);
        }
        self.read_file(rater, &path)
    }

    fn read_file(&self, rater: &RaterConfig, path: &Path) -> Result<Vec<RawRecord>, CliError> {
        let contents = read(path)?;
        debug!(rater = %rater.id, file = %path.display(), "reading records");
        match extension(path).as_deref() {
            Some("csv") => Ok(load_csv_records(&contents, &rater.id_column)
                .map_err(|e| CliError::io(format!("{}: {e}", path.display())))?),
            Some("jsonl") => Ok(contents
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .filter_map(|(i, line)| self.parse_json(path, Some(i + 1), line))
                .collect()),
            _ => Ok(self.parse_json(path, None, &contents).into_iter().collect()),
        }
    }

    fn parse_json(&self, path: &Path, line: Option<usize>, json: &str) -> Option<RawRecord> {
        match parse_json_record(json, self.config.loader.flatten_sections) {
            Ok(raw) => Some(raw),
            Err(e) => {
                match line {
                    Some(line) => warn!(file = %path.display(), line, "record skipped: {e}"),
                    None => warn!(file = %path.display(), "record skipped: {e}"),
                }
                None
            }
        }
    }

    /// Resolution history from the ledger; empty when it does not exist yet.
    pub fn load_ledger(&self) -> Result<AdjudicationQueue, CliError> {
        let path = self.ledger_path();
        if !path.exists() {
            return Ok(AdjudicationQueue::new());
        }
        AdjudicationQueue::from_ledger(&read(&path)?).map_err(|e| {
            CliError::io(format!("{}: {e}", path.display()))
                .with_hint("the ledger is append-only JSON lines; restore it from version control")
        })
    }

    pub fn append_ledger(&self, records: &[ConsensusRecord]) -> Result<(), CliError> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.ledger_path();
        let lines = ledger_lines(records)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CliError::io(format!("cannot open {}: {e}", path.display())))?;
        file.write_all(lines.as_bytes())
            .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}
