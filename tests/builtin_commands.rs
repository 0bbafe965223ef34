// tests/builtin_commands.rs

mod common;
use crate::common::{init_tracing, path, with_timeout};

use std::fs;
use std::path::Path;

use rundag::config::{load_and_validate, ConfigFile};
use rundag::events::{CollectingSubscriber, EventLog};
use rundag::{run_pipeline, RunOptions};
use tempfile::tempdir;

fn write_config(dir: &Path, toml: &str) -> ConfigFile {
    let config_path = dir.join("rundag.toml");
    fs::write(&config_path, toml).unwrap();
    load_and_validate(&config_path).unwrap()
}

async fn run_collecting(cfg: &ConfigFile) -> (bool, EventLog) {
    let (collector, events) = CollectingSubscriber::new();
    let options = RunOptions {
        subscribers: vec![Box::new(collector)],
        ..RunOptions::default()
    };
    let report = with_timeout(run_pipeline(cfg, options)).await.unwrap();
    (report.succeeded, events)
}

#[tokio::test]
async fn sql_text_is_piped_into_the_database_client() {
    init_tracing();
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("query.sql"), "delete from STAGE").unwrap();
    let cfg = write_config(
        dir.path(),
        r#"
[databases.dwh]
client = "cat > captured.sql"

[databases.other]
client = "cat > other.sql"

[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "inline"
commands = [
  { type = "sql", sql_statement = "select * from TABLE", replace = { TABLE = "orders" } },
]

[[pipeline.nodes]]
kind = "task"
id = "from_file"

[[pipeline.nodes.commands]]
type = "sql"
sql_file_name = "query.sql"
db_alias = "other"
echo_queries = false
replace = { STAGE = "stage_orders" }
"#,
    );

    let (succeeded, events) = run_collecting(&cfg).await;

    assert!(succeeded);
    assert_eq!(
        fs::read_to_string(dir.path().join("captured.sql")).unwrap(),
        "select * from orders"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("other.sql")).unwrap(),
        "delete from stage_orders"
    );
    assert!(events.outputs(&path("inline")).iter().any(|m| m == "select * from orders"));
    assert!(
        !events.outputs(&path("from_file")).iter().any(|m| m == "delete from stage_orders"),
        "echo_queries = false keeps the statement out of the output"
    );
}

#[tokio::test]
async fn write_file_output_can_be_read_back_by_a_consumer() {
    init_tracing();
    let dir = tempdir().unwrap();
    let cfg = write_config(
        dir.path(),
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "produce"
commands = [{ type = "write_file", command = 'printf "a\nb\n"', file_name = "data.txt" }]

[[pipeline.nodes]]
kind = "task"
id = "consume"
upstreams = ["produce"]
commands = [{ type = "read_file", file_name = "data.txt", consumer = "wc -l | tr -d ' '" }]
"#,
    );

    let (succeeded, events) = run_collecting(&cfg).await;

    assert!(succeeded);
    assert_eq!(fs::read_to_string(dir.path().join("data.txt")).unwrap(), "a\nb\n");
    assert!(events.outputs(&path("consume")).iter().any(|m| m == "2"));
}

#[tokio::test]
async fn incremental_load_uses_the_stored_comparison_value() {
    init_tracing();
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("max.txt"), "5\n").unwrap();
    let cfg = write_config(
        dir.path(),
        r#"
[config]
state_storage_mode = "file"
state_dir = "state"

[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "orders"

[[pipeline.nodes.commands]]
type = "incremental"
key = "updated_at"
max_value_command = "cat max.txt"
full_command = "echo full >> load.log"
incremental_command = "echo since {last_value} >> load.log"
"#,
    );
    let load_log = || fs::read_to_string(dir.path().join("load.log")).unwrap();

    let (succeeded, events) = run_collecting(&cfg).await;
    assert!(succeeded);
    assert!(events
        .outputs(&path("orders"))
        .iter()
        .any(|m| m == "no comparison value stored; full load"));
    assert_eq!(load_log(), "full\n");

    let (succeeded, events) = run_collecting(&cfg).await;
    assert!(succeeded);
    assert!(events.outputs(&path("orders")).iter().any(|m| m == "no changes since 5"));
    assert_eq!(load_log(), "full\n");

    fs::write(dir.path().join("max.txt"), "9\n").unwrap();
    let (succeeded, events) = run_collecting(&cfg).await;
    assert!(succeeded);
    assert!(events.outputs(&path("orders")).iter().any(|m| m == "loading changes since 5"));
    assert_eq!(load_log(), "full\nsince 5\n");
}

#[tokio::test]
async fn incremental_load_of_an_empty_source_does_nothing() {
    init_tracing();
    let dir = tempdir().unwrap();
    let cfg = write_config(
        dir.path(),
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "orders"

[[pipeline.nodes.commands]]
type = "incremental"
key = "id"
max_value_command = "true"
full_command = "touch loaded"
incremental_command = "touch loaded"
"#,
    );

    let (succeeded, events) = run_collecting(&cfg).await;

    assert!(succeeded);
    assert!(events
        .outputs(&path("orders"))
        .iter()
        .any(|m| m == "source is empty; nothing to load"));
    assert!(!dir.path().join("loaded").exists());
}

#[tokio::test]
async fn gzip_compressed_file_is_decompressed_for_the_consumer() {
    init_tracing();
    let dir = tempdir().unwrap();
    let cfg = write_config(
        dir.path(),
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "produce"

[[pipeline.nodes.commands]]
type = "write_file"
command = 'printf "x\ny\nz\n" | gzip -c'
file_name = "data.csv.gz"

[[pipeline.nodes]]
kind = "task"
id = "consume"
upstreams = ["produce"]
commands = [
  { type = "read_file", file_name = "data.csv.gz", compression = "gzip", consumer = "tail -n 1" },
]
"#,
    );

    let (succeeded, events) = run_collecting(&cfg).await;

    assert!(succeeded);
    let compressed = fs::read(dir.path().join("data.csv.gz")).unwrap();
    assert_eq!(&compressed[..2], &[0x1f, 0x8b], "file is gzip encoded");
    assert!(events.outputs(&path("consume")).iter().any(|m| m == "z"));
}
