use std::collections::HashMap;
use std::path::Path;

use sheetsync_io::Table;
use sheetsync_recon::{
    Engine, ImportFlags, ImportJob, ImportStatus, MappedProperty, Query, Record, Repository,
    SyncConfig, Value,
};
use sheetsync_store::{JobStore, RecordLookup, SqliteRecordRepository};

const CONTEXTS: &str = r#"
[contexts.persons]
target = "person"

[[contexts.persons.arguments]]
name = "team"
identifier = true
domain = "team"

[targets.person.fields.id]
identifier = true
query_property = "id"
transform = "pad:5"

[targets.person.fields.firstname]

[targets.person.fields.lastname]

[targets.team.fields.code]
identifier = true
"#;

fn write_csv(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn persons_job(engine: &Engine, file: &Path, team: &str) -> ImportJob {
    let table = engine.registry().mapping_metadata("person").unwrap();
    let columns = HashMap::from([
        ("firstname".to_string(), "A".to_string()),
        ("lastname".to_string(), "B".to_string()),
        ("id".to_string(), "C".to_string()),
    ]);
    let mut job = ImportJob::new("persons", file);
    job.mapping = MappedProperty::from_columns(table, &columns);
    job.flags = ImportFlags::all();
    let params = HashMap::from([("team".to_string(), team.to_string())]);
    job.arguments = engine
        .contexts()
        .get("persons")
        .unwrap()
        .arguments_for_request(&params, engine.resolver())
        .unwrap();
    job
}

#[test]
fn queued_job_runs_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sheetsync.db");

    // A team to reference
    let mut teams = SqliteRecordRepository::open(&db, "team").unwrap();
    teams
        .add(Record::new().with("code", "blue"))
        .unwrap();
    teams.flush().unwrap();

    let config = SyncConfig::from_toml(CONTEXTS).unwrap();
    let engine = Engine::new(config.context_registry(), config.mapping_registry().unwrap())
        .with_resolver(RecordLookup::open(&db).unwrap().with_key("team", "code"));

    let file = write_csv(
        dir.path(),
        "persons.csv",
        "firstname,lastname,id\nHans,Muster,1\nLisa,Muller,2\n",
    );

    let jobs = JobStore::open(&db).unwrap();
    let mut job = persons_job(&engine, &file, "blue");
    job.status = ImportStatus::Queued;
    jobs.insert(&mut job).unwrap();

    let mut next = jobs
        .find_next_in_queue(chrono::Utc::now())
        .unwrap()
        .unwrap();
    assert_eq!(next.id, job.id);

    let source = Table::open(&next.file).unwrap();
    let mut repo = SqliteRecordRepository::open(&db, "person").unwrap();
    let counters = {
        let mut session = engine.initialize::<Record>(&next, &source).unwrap();
        session.run(&mut repo).unwrap()
    };
    assert_eq!(counters.inserted, 2);

    next.status = ImportStatus::Completed;
    next.counters = counters;
    jobs.update(&next).unwrap();
    assert_eq!(jobs.count_by_status(ImportStatus::Completed).unwrap(), 1);

    // Fresh connection sees the committed rows
    let reopened = SqliteRecordRepository::open(&db, "person").unwrap();
    let hans = reopened
        .find_first(&Query::new().equals("id", "00001".into()))
        .unwrap()
        .unwrap()
        .1;
    assert_eq!(hans.get("firstname"), &Value::from("Hans"));
    assert!(hans.get("team").as_reference().is_some());
}

#[test]
fn rerun_updates_and_deletes_missing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sheetsync.db");

    let mut teams = SqliteRecordRepository::open(&db, "team").unwrap();
    teams.add(Record::new().with("code", "blue")).unwrap();
    teams.flush().unwrap();

    let config = SyncConfig::from_toml(CONTEXTS).unwrap();
    let engine = Engine::new(config.context_registry(), config.mapping_registry().unwrap())
        .with_resolver(RecordLookup::open(&db).unwrap().with_key("team", "code"));

    let full = write_csv(
        dir.path(),
        "full.csv",
        "firstname,lastname,id\nHans,Muster,1\nLisa,Muller,2\n",
    );
    let short = write_csv(dir.path(), "short.csv", "firstname,lastname,id\nHans,Meier,1\n");

    let mut repo = SqliteRecordRepository::open(&db, "person").unwrap();
    for (file, expected_deleted) in [(&full, 0), (&short, 1)] {
        let job = persons_job(&engine, file, "blue");
        let source = Table::open(file).unwrap();
        let mut session = engine.initialize::<Record>(&job, &source).unwrap();
        let counters = session.run(&mut repo).unwrap();
        assert_eq!(counters.deleted, expected_deleted);
    }

    let all = repo.find_all(&Query::new()).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.get("lastname"), &Value::from("Meier"));
}

#[test]
fn unknown_reference_is_rejected_when_building_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sheetsync.db");

    let config = SyncConfig::from_toml(CONTEXTS).unwrap();
    let engine = Engine::new(config.context_registry(), config.mapping_registry().unwrap())
        .with_resolver(RecordLookup::open(&db).unwrap());

    let params = HashMap::from([("team".to_string(), "red".to_string())]);
    let err = engine
        .contexts()
        .get("persons")
        .unwrap()
        .arguments_for_request(&params, engine.resolver())
        .unwrap_err();
    assert!(err.to_string().contains("red"));
}
