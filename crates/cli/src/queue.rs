//! Queue commands: enqueue, import, cleanup, history.

use std::path::Path;

use chrono::{Duration, Utc};
use sheetsync_recon::{ImportJob, ImportStatus};

use crate::exit_codes::EXIT_QUEUE_BUSY;
use crate::job_file::JobFile;
use crate::setup::Setup;
use crate::sync::execute;
use crate::CliError;

fn print_json(job: &ImportJob) -> Result<(), CliError> {
    let text = serde_json::to_string(job).map_err(|e| CliError::io(e.to_string()))?;
    println!("{text}");
    Ok(())
}

// ============================================================================
// enqueue
// ============================================================================

pub fn cmd_enqueue(setup: &Setup, job_path: &Path, json: bool) -> Result<(), CliError> {
    let config = setup.sync_config()?;
    let engine = setup.engine(&config)?;
    let mut job = JobFile::load_job(job_path, &engine)?;

    if !job.file.is_file() {
        return Err(CliError::args(format!("spreadsheet {} not found", job.file.display()))
            .with_hint("`file` is resolved relative to the job file"));
    }
    if job.mapping.iter().all(|m| !m.is_assigned()) {
        log::warn!("job for '{}' assigns no columns; every row will be skipped", job.context);
    }

    job.status = ImportStatus::Queued;
    let jobs = setup.jobs()?;
    let id = jobs.insert(&mut job)?;

    let earlier = jobs
        .find_by_context_and_arguments(&job.context, &job.arguments)?
        .len()
        .saturating_sub(1);

    if json {
        print_json(&job)?;
    } else {
        println!("{id}");
    }
    eprintln!(
        "Queued job {id} for '{}' at {} ({earlier} earlier imports with these arguments)",
        job.context,
        job.schedule_date.to_rfc3339()
    );
    Ok(())
}

// ============================================================================
// import
// ============================================================================

/// Run the next due job. Refuses to start while another job is in progress.
pub fn cmd_import(setup: &Setup, json: bool) -> Result<(), CliError> {
    let jobs = setup.jobs()?;
    if jobs.count_by_status(ImportStatus::InProgress)? > 0 {
        return Err(CliError::new(EXIT_QUEUE_BUSY, "previous spreadsheet import is still in progress")
            .with_hint("run `sheetsync import` again once it has finished"));
    }

    let Some(mut job) = jobs.find_next_in_queue(Utc::now())? else {
        eprintln!("No spreadsheet import in queue.");
        return Ok(());
    };

    // Contexts are loaded before the job is claimed so a broken config
    // leaves it queued.
    let config = setup.sync_config()?;
    let engine = setup.engine(&config)?;

    job.status = ImportStatus::InProgress;
    jobs.update(&job)?;
    let id = job.id.unwrap_or_default();
    log::info!("job {id}: importing {} for '{}'", job.file.display(), job.context);

    let outcome = execute(setup, &engine, &job);
    match outcome {
        Ok(counters) => {
            job.status = ImportStatus::Completed;
            job.counters = counters;
            jobs.update(&job)?;
            if json {
                print_json(&job)?;
            }
            eprintln!("Spreadsheet has been imported. {counters}");
            Ok(())
        }
        Err(failure) => {
            job.status = ImportStatus::Failed;
            job.counters = failure.committed;
            jobs.update(&job)?;
            if json {
                print_json(&job)?;
            }
            eprintln!("Spreadsheet import failed.");
            Err(CliError::import(failure.error)
                .with_hint(format!("job {id} marked failed; committed: {}", failure.committed)))
        }
    }
}

// ============================================================================
// cleanup
// ============================================================================

pub fn cmd_cleanup(setup: &Setup, days: Option<u32>) -> Result<(), CliError> {
    let days = days.unwrap_or(setup.settings.cleanup_threshold_days);
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    let removed = setup.jobs()?.remove_scheduled_before(cutoff)?;
    if removed > 0 {
        eprintln!("{removed} spreadsheet imports were removed.");
    } else {
        eprintln!("There is no spreadsheet import older than {days} days to remove.");
    }
    Ok(())
}

// ============================================================================
// history
// ============================================================================

pub fn cmd_history(setup: &Setup, job_path: &Path, json: bool) -> Result<(), CliError> {
    let config = setup.sync_config()?;
    let engine = setup.engine(&config)?;
    let job = JobFile::load_job(job_path, &engine)?;
    let previous = setup
        .jobs()?
        .find_by_context_and_arguments(&job.context, &job.arguments)?;

    if json {
        let text = serde_json::to_string(&previous).map_err(|e| CliError::io(e.to_string()))?;
        println!("{text}");
    } else {
        for p in &previous {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                p.id.unwrap_or_default(),
                p.schedule_date.to_rfc3339(),
                p.status,
                p.file.display(),
                p.counters
            );
        }
    }
    eprintln!("{} imports for '{}'", previous.len(), job.context);
    Ok(())
}
