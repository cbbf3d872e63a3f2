// Integration tests for the `sheetsync` binary.
// Run with: cargo test -p sheetsync-cli --test cli_tests -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use sheetsync_recon::{ImportJob, ImportStatus};
use sheetsync_store::JobStore;

const CONTEXTS: &str = r#"
[contexts.persons]
target = "person"

[[contexts.persons.arguments]]
name = "team"
identifier = true

[targets.person.fields.id]
identifier = true
query_property = "id"
transform = "pad:5"

[targets.person.fields.firstname]
transform = "trim"

[targets.person.fields.lastname]
required = true
"#;

const PERSONS: &str = "firstname,lastname,id\nHans,Muster,1\nLisa,Muller,2\nOtto,,3\n";

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("contexts.toml"), CONTEXTS).unwrap();
        std::fs::write(dir.path().join("settings.toml"), "records_per_flush = 1\n").unwrap();
        std::fs::write(dir.path().join("persons.csv"), PERSONS).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write_job(&self, name: &str, extra: &str) -> PathBuf {
        let body = format!(
            "context = \"persons\"\nfile = \"persons.csv\"\n{extra}\n\
             [columns]\nfirstname = \"A\"\nlastname = \"B\"\nid = \"C\"\n\n\
             [arguments]\nteam = \"blue\"\n"
        );
        let path = self.path(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn sheetsync(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_sheetsync"));
        cmd.current_dir(self.dir.path())
            .env_remove("RUST_LOG")
            .env_remove("SHEETSYNC_CONTEXTS")
            .env_remove("SHEETSYNC_DATABASE")
            .arg("--settings")
            .arg(self.path("settings.toml"))
            .arg("--contexts")
            .arg(self.path("contexts.toml"))
            .arg("--database")
            .arg(self.path("db/sheetsync.db"));
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.sheetsync().args(args).output().expect("run sheetsync")
    }

    fn jobs(&self) -> JobStore {
        JobStore::open(&self.path("db/sheetsync.db")).unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ---------------------------------------------------------------------------
// validate / columns
// ---------------------------------------------------------------------------

#[test]
fn validate_lists_contexts() {
    let ws = Workspace::new();
    let output = ws.run(&["validate"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "persons\tperson\tteam\n");
    assert!(stderr(&output).contains("1 contexts, 1 targets"));
}

#[test]
fn validate_rejects_unknown_target() {
    let ws = Workspace::new();
    let bad = ws.path("bad.toml");
    std::fs::write(&bad, "[contexts.orders]\ntarget = \"order\"\n").unwrap();

    let output = ws.run(&["validate", path_arg(&bad)]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("order"));
}

#[test]
fn columns_lists_headings() {
    let ws = Workspace::new();
    let output = ws.run(&["columns", "persons.csv"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "A\tfirstname\nB\tlastname\nC\tid\n");
    assert!(stderr(&output).contains("3 columns, 3 data rows"));

    let missing = ws.run(&["columns", "nope.csv"]);
    assert_eq!(missing.status.code(), Some(11));
}

// ---------------------------------------------------------------------------
// preview / run
// ---------------------------------------------------------------------------

#[test]
fn preview_shows_padded_identifier() {
    let ws = Workspace::new();
    let job = ws.write_job("persons.job.toml", "");

    let output = ws.run(&["preview", path_arg(&job), "--row", "1", "--json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let fields: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(fields["id"], "00001");
    assert_eq!(fields["lastname"], "Muster");

    let invalid = ws.run(&["preview", path_arg(&job), "--row", "3"]);
    assert_eq!(invalid.status.code(), Some(14));
    assert!(stderr(&invalid).contains("row 3 would be skipped"));

    let out_of_range = ws.run(&["preview", path_arg(&job), "--row", "9"]);
    assert_eq!(out_of_range.status.code(), Some(2));
}

#[test]
fn run_twice_inserts_then_updates() {
    let ws = Workspace::new();
    let job = ws.write_job("persons.job.toml", "");

    let first = ws.run(&["run", path_arg(&job), "--json"]);
    assert!(first.status.success(), "{}", stderr(&first));
    let counters: serde_json::Value = serde_json::from_str(&stdout(&first)).unwrap();
    assert_eq!(counters["inserted"], 2);
    assert_eq!(counters["skipped"], 1);

    let second = ws.run(&["run", path_arg(&job)]);
    assert!(second.status.success(), "{}", stderr(&second));
    assert!(stderr(&second).contains("0 inserted, 2 updated, 0 deleted, 1 skipped"));
}

#[test]
fn unknown_property_in_job_file_is_a_job_error() {
    let ws = Workspace::new();
    let job = ws.path("broken.job.toml");
    std::fs::write(
        &job,
        "context = \"persons\"\nfile = \"persons.csv\"\n[columns]\nemail = \"D\"\n",
    )
    .unwrap();

    let output = ws.run(&["run", path_arg(&job)]);
    assert_eq!(output.status.code(), Some(5));
    assert!(stderr(&output).contains("email"));
}

// ---------------------------------------------------------------------------
// queue
// ---------------------------------------------------------------------------

#[test]
fn enqueue_then_import_completes_job() {
    let ws = Workspace::new();
    let job = ws.write_job("persons.job.toml", "");

    let queued = ws.run(&["enqueue", path_arg(&job)]);
    assert!(queued.status.success(), "{}", stderr(&queued));
    let id: i64 = stdout(&queued).trim().parse().unwrap();

    let imported = ws.run(&["import", "--json"]);
    assert!(imported.status.success(), "{}", stderr(&imported));
    let finished: ImportJob = serde_json::from_str(&stdout(&imported)).unwrap();
    assert_eq!(finished.id, Some(id));
    assert_eq!(finished.status, ImportStatus::Completed);
    assert_eq!(finished.counters.inserted, 2);

    let stored = ws.jobs().get(id).unwrap().unwrap();
    assert_eq!(stored.status, ImportStatus::Completed);
    assert_eq!(stored.counters, finished.counters);

    let idle = ws.run(&["import"]);
    assert!(idle.status.success());
    assert!(stderr(&idle).contains("No spreadsheet import in queue."));

    let history = ws.run(&["history", path_arg(&job)]);
    assert!(history.status.success(), "{}", stderr(&history));
    assert_eq!(stdout(&history).lines().count(), 1);
    assert!(stdout(&history).contains("2 inserted"));
}

#[test]
fn future_jobs_wait_in_queue() {
    let ws = Workspace::new();
    let job = ws.write_job("later.job.toml", "schedule = \"2999-01-01T00:00:00Z\"");

    assert!(ws.run(&["enqueue", path_arg(&job)]).status.success());
    let output = ws.run(&["import"]);
    assert!(output.status.success());
    assert!(stderr(&output).contains("No spreadsheet import in queue."));
    assert_eq!(ws.jobs().count_by_status(ImportStatus::Queued).unwrap(), 1);
}

#[test]
fn import_refuses_while_another_is_in_progress() {
    let ws = Workspace::new();
    let job = ws.write_job("persons.job.toml", "");
    assert!(ws.run(&["enqueue", path_arg(&job)]).status.success());

    let jobs = ws.jobs();
    let mut running = jobs.find_next_in_queue(chrono::Utc::now()).unwrap().unwrap();
    running.status = ImportStatus::InProgress;
    jobs.update(&running).unwrap();
    assert!(ws.run(&["enqueue", path_arg(&job)]).status.success());

    let output = ws.run(&["import"]);
    assert_eq!(output.status.code(), Some(21));
    assert_eq!(jobs.count_by_status(ImportStatus::Queued).unwrap(), 1);
}

#[test]
fn missing_spreadsheet_marks_job_failed() {
    let ws = Workspace::new();
    let job = ws.write_job("persons.job.toml", "");
    assert!(ws.run(&["enqueue", path_arg(&job)]).status.success());
    std::fs::remove_file(ws.path("persons.csv")).unwrap();

    let output = ws.run(&["import"]);
    assert_eq!(output.status.code(), Some(11));
    assert!(stderr(&output).contains("Spreadsheet import failed."));
    assert_eq!(ws.jobs().count_by_status(ImportStatus::Failed).unwrap(), 1);
}

#[test]
fn cleanup_removes_old_jobs() {
    let ws = Workspace::new();
    let old = ws.write_job("old.job.toml", "schedule = \"2020-01-01T00:00:00Z\"");
    let fresh = ws.write_job("fresh.job.toml", "");
    assert!(ws.run(&["enqueue", path_arg(&old)]).status.success());
    assert!(ws.run(&["enqueue", path_arg(&fresh)]).status.success());

    let output = ws.run(&["cleanup", "--days", "30"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stderr(&output).contains("1 spreadsheet imports were removed."));
    assert_eq!(ws.jobs().count_by_status(ImportStatus::Queued).unwrap(), 1);
}
