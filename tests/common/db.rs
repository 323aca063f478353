//! Temp-file SQLite pair, migrated, for integration tests — replaces the
//! teacher's ephemeral-Postgres-container harness with something that
//! starts in milliseconds.

use inkwell::{Database, TaskDatabase};

pub struct TestDbs {
    pub main: Database,
    pub tasks: TaskDatabase,
    // Held only to keep the temp directory alive for the test's duration.
    _dir: tempfile::TempDir,
}

pub async fn setup() -> TestDbs {
    let dir = tempfile::tempdir().expect("create temp dir");
    let main_path = dir.path().join("main.db");
    let tasks_path = dir.path().join("tasks.db");

    let main = Database::connect(&format!("sqlite://{}", main_path.display())).await.expect("connect main db");
    main.run_migrations().await.expect("run main migrations");

    let tasks = TaskDatabase::connect(&format!("sqlite://{}", tasks_path.display())).await.expect("connect tasks db");
    tasks.run_migrations().await.expect("run tasks migrations");

    TestDbs { main, tasks, _dir: dir }
}
