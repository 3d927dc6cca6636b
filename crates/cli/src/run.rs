//! `concord validate | run | resolve`.

use std::fs;
use std::path::{Path, PathBuf};

use concord_recon::export::{agreement_csv, consensus_csv, issues_csv, read_worksheet, worksheet_csv};
use concord_recon::{AdjudicationQueue, ReconResult, RecordStore};
use tracing::warn;

use crate::exit_codes::{EXIT_PENDING, EXIT_RUNTIME, EXIT_USAGE};
use crate::project::Project;
use crate::report;
use crate::CliError;

pub const AGREEMENT_FILE: &str = "agreement.csv";
pub const CONSENSUS_FILE: &str = "consensus.csv";
pub const WORKSHEET_FILE: &str = "worksheet.csv";
pub const ISSUES_FILE: &str = "issues.csv";
pub const REPORT_FILE: &str = "irr_report.txt";

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let project = Project::open(&config_path)?;
    let config = &project.config;
    let derived = project.registry.variables().filter(|v| v.is_derived()).count();
    eprintln!(
        "valid: '{}' with {} rater(s), {} variable(s) ({} derived), {} vocabular{}",
        config.name,
        config.raters.len(),
        project.registry.len(),
        derived,
        config.vocabularies.len(),
        if config.vocabularies.len() == 1 { "y" } else { "ies" },
    );
    Ok(())
}

pub fn cmd_run(
    config_path: PathBuf,
    out_dir: Option<PathBuf>,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let project = Project::open(&config_path)?;
    let store = project.load_records()?;
    let mut queue = project.load_ledger()?;

    let result = execute(&project, &store, &mut queue)?;
    let out_dir = out_dir.unwrap_or_else(|| project.root.clone());
    write_outputs(&project, &result, &out_dir)?;
    emit_json(&result, json_output, output_file.as_deref())?;
    finish(&result)
}

pub fn cmd_resolve(
    config_path: PathBuf,
    worksheet_path: PathBuf,
    adjudicator: String,
    out_dir: Option<PathBuf>,
    json_output: bool,
) -> Result<(), CliError> {
    if adjudicator.trim().is_empty() {
        return Err(CliError::new(EXIT_USAGE, "--adjudicator must not be empty"));
    }
    let project = Project::open(&config_path)?;
    let store = project.load_records()?;
    let mut queue = project.load_ledger()?;

    // Rebuild the outstanding items so worksheet fingerprints can be checked.
    execute(&project, &store, &mut queue)?;

    let sheet = fs::read_to_string(&worksheet_path).map_err(|e| {
        CliError::io(format!("cannot read {}: {e}", worksheet_path.display()))
    })?;
    let rows = read_worksheet(&sheet)?;
    let import = queue.apply_worksheet(
        &rows,
        &project.registry,
        &project.vocabularies,
        project.config.loader.binary_coercion,
        &adjudicator,
    );
    for rejected in &import.rejected {
        warn!(
            entity = %rejected.entity_id,
            variable = %rejected.variable,
            "worksheet row rejected: {}",
            rejected.reason
        );
    }
    project.append_ledger(&import.applied)?;
    eprintln!(
        "worksheet: {} applied, {} rejected, {} left blank",
        import.applied.len(),
        import.rejected.len(),
        import.skipped
    );

    let result = execute(&project, &store, &mut queue)?;
    let out_dir = out_dir.unwrap_or_else(|| project.root.clone());
    write_outputs(&project, &result, &out_dir)?;
    emit_json(&result, json_output, None)?;
    finish(&result)
}

fn execute(
    project: &Project,
    store: &RecordStore,
    queue: &mut AdjudicationQueue,
) -> Result<ReconResult, CliError> {
    Ok(concord_recon::run(
        &project.config,
        &project.registry,
        &project.vocabularies,
        store,
        queue,
    )?)
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<(), CliError> {
    let path = dir.join(name);
    fs::write(&path, contents)
        .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))
}

fn write_outputs(project: &Project, result: &ReconResult, dir: &Path) -> Result<(), CliError> {
    fs::create_dir_all(dir)
        .map_err(|e| CliError::io(format!("cannot create {}: {e}", dir.display())))?;
    write_file(dir, AGREEMENT_FILE, &agreement_csv(&result.agreement.results)?)?;
    write_file(
        dir,
        CONSENSUS_FILE,
        &consensus_csv(&project.registry, &result.entities, &result.consensus)?,
    )?;
    write_file(dir, WORKSHEET_FILE, &worksheet_csv(&result.pending, &result.meta.raters)?)?;
    write_file(dir, ISSUES_FILE, &issues_csv(&result.issues)?)?;
    write_file(dir, REPORT_FILE, &report::render(result))?;
    Ok(())
}

fn emit_json(result: &ReconResult, stdout: bool, file: Option<&Path>) -> Result<(), CliError> {
    if !stdout && file.is_none() {
        return Ok(());
    }
    let json = serde_json::to_string_pretty(result)
        .map_err(|e| CliError::new(EXIT_RUNTIME, format!("JSON serialization error: {e}")))?;
    if let Some(path) = file {
        fs::write(path, &json)
            .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
        eprintln!("wrote {}", path.display());
    }
    if stdout {
        println!("{json}");
    }
    Ok(())
}

/// One-line summary on stderr, then the exit status.
fn finish(result: &ReconResult) -> Result<(), CliError> {
    let s = &result.summary;
    let count = |provenance: &str| s.by_provenance.get(provenance).copied().unwrap_or(0);
    eprintln!(
        "'{}': {} entities, {} consensus values ({} unanimous, {} majority, {} single-rater, {} union, {} adjudicated), {} pending, {} issue(s)",
        result.meta.config_name,
        result.meta.entities,
        s.total_records,
        count("unanimous"),
        count("majority"),
        count("single-rater"),
        count("union"),
        count("adjudicated"),
        s.pending,
        result.issues.len(),
    );

    if result.has_pending() {
        return Err(CliError::new(
            EXIT_PENDING,
            format!("{} item(s) pending adjudication", result.pending.len()),
        )
        .with_hint(format!(
            "fill in final_value in {WORKSHEET_FILE}, then run `concord resolve <config> --worksheet {WORKSHEET_FILE} --adjudicator <id>`"
        )));
    }
    Ok(())
}
