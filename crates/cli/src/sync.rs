//! Commands that work on one job file directly: columns, preview, run, validate.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sheetsync_io::{Table, TabularSource};
use sheetsync_recon::{
    Engine, ImportCounters, ImportError, ImportFailure, ImportJob, Record, RepositoryError,
    SyncConfig,
};

use crate::exit_codes::EXIT_IMPORT_VALIDATION;
use crate::job_file::JobFile;
use crate::setup::Setup;
use crate::{CliError, GlobalOpts};

/// Run `job` against the record repository of its context's target.
pub fn execute(setup: &Setup, engine: &Engine, job: &ImportJob) -> Result<ImportCounters, ImportFailure> {
    let not_started = |error: ImportError| ImportFailure {
        error,
        committed: ImportCounters::default(),
    };

    let target = engine
        .contexts()
        .get(&job.context)
        .map_err(not_started)?
        .target
        .clone();
    let source = Table::open(&job.file).map_err(|e| not_started(e.into()))?;
    let mut repo = setup
        .repository(&target)
        .map_err(|e| not_started(ImportError::Persistence(RepositoryError::Backend(e.message))))?;

    let mut session = engine.initialize::<Record>(job, &source).map_err(not_started)?;
    session.run(&mut repo)
}

// ============================================================================
// columns
// ============================================================================

pub fn cmd_columns(file: &Path, json: bool) -> Result<(), CliError> {
    let table = Table::open(file).map_err(CliError::source)?;
    let columns = table.columns();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let entries: Vec<serde_json::Value> = columns
            .iter()
            .map(|(id, heading)| serde_json::json!({ "column": id.as_str(), "heading": heading }))
            .collect();
        writeln!(out, "{}", serde_json::Value::Array(entries))
            .map_err(|e| CliError::io(e.to_string()))?;
    } else {
        for (id, heading) in &columns {
            writeln!(out, "{id}\t{heading}").map_err(|e| CliError::io(e.to_string()))?;
        }
    }
    eprintln!("{} columns, {} data rows", columns.len(), table.row_count());
    Ok(())
}

// ============================================================================
// preview
// ============================================================================

pub fn cmd_preview(setup: &Setup, job_path: &Path, row: usize, json: bool) -> Result<(), CliError> {
    let config = setup.sync_config()?;
    let engine = setup.engine(&config)?;
    let job = JobFile::load_job(job_path, &engine)?;
    let source = Table::open(&job.file).map_err(CliError::source)?;
    let session = engine
        .initialize::<Record>(&job, &source)
        .map_err(CliError::import)?;

    let rows = session.count_data_rows();
    if row == 0 || row > rows {
        return Err(CliError::args(format!("row {row} is out of range"))
            .with_hint(format!("{} has {rows} data rows", job.file.display())));
    }

    let preview = session.materialize_preview(row).map_err(CliError::import)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let fields: serde_json::Map<String, serde_json::Value> = preview
            .fields
            .iter()
            .map(|(property, value)| (property.clone(), serde_json::Value::String(value.to_string())))
            .collect();
        writeln!(out, "{}", serde_json::Value::Object(fields))
            .map_err(|e| CliError::io(e.to_string()))?;
    } else {
        for (property, value) in &preview.fields {
            writeln!(out, "{property}\t{value}").map_err(|e| CliError::io(e.to_string()))?;
        }
    }

    match preview.errors {
        None => Ok(()),
        Some(errors) => Err(CliError::new(
            EXIT_IMPORT_VALIDATION,
            format!("row {row} would be skipped: {errors}"),
        )),
    }
}

// ============================================================================
// run
// ============================================================================

pub fn cmd_run(setup: &Setup, job_path: &Path, json: bool) -> Result<(), CliError> {
    let config = setup.sync_config()?;
    let engine = setup.engine(&config)?;
    let job = JobFile::load_job(job_path, &engine)?;

    match execute(setup, &engine, &job) {
        Ok(counters) => {
            if json {
                let text = serde_json::to_string(&counters).map_err(|e| CliError::io(e.to_string()))?;
                println!("{text}");
            }
            eprintln!("Spreadsheet has been imported. {counters}");
            Ok(())
        }
        Err(failure) => {
            let committed = failure.committed;
            Err(CliError::import(failure.error)
                .with_hint(format!("committed before the failure: {committed}")))
        }
    }
}

// ============================================================================
// validate
// ============================================================================

pub fn cmd_validate(global: &GlobalOpts, contexts: Option<PathBuf>) -> Result<(), CliError> {
    let path = match contexts.or_else(|| global.contexts.clone()) {
        Some(path) => path,
        None => Setup::load(global)?.contexts,
    };

    let config = SyncConfig::from_file(&path).map_err(CliError::contexts)?;
    config.mapping_registry().map_err(CliError::contexts)?;

    for (name, context) in &config.contexts {
        let arguments: Vec<&str> = context.arguments.iter().map(|a| a.name.as_str()).collect();
        println!("{name}\t{}\t{}", context.target, arguments.join(","));
    }
    eprintln!(
        "{} is valid: {} contexts, {} targets",
        path.display(),
        config.contexts.len(),
        config.targets.len()
    );
    Ok(())
}
