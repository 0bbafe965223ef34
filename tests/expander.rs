// tests/expander.rs

mod common;
use crate::common::{init_tracing, path};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};

use rundag::command::{Command, ExecutionEnv, FunctionRegistry, ShellCommand};
use rundag::config::commands::{
    GeneratorSpec, ParallelDatesSpec, ParallelFilesSpec, ParallelValuesSpec, ShellSpec,
};
use rundag::config::CommandSpec;
use rundag::events::EventBus;
use rundag::expand::ids::{sanitize_id, IdAllocator};
use rundag::expand::sources::{date_range, parse_file_date};
use rundag::expand::{Expander, Expansion, ExpansionRequest, GeneratedTask};
use rundag::fs::mock::MockFileSystem;
use rundag::types::ReadMode;
use rundag_test_utils::{memory_env, memory_env_with_fs};

fn shell(cmd: &str) -> CommandSpec {
    CommandSpec::Shell(ShellSpec {
        cmd: cmd.to_string(),
        file_dependencies: Vec::new(),
    })
}

fn values(items: &[&str]) -> ParallelValuesSpec {
    ParallelValuesSpec {
        values: items.iter().map(|v| v.to_string()).collect(),
        values_command: None,
        commands: vec![shell("echo {value}")],
        commands_after: Vec::new(),
        max_parallel_tasks: None,
    }
}

fn files(pattern: &str, read_mode: ReadMode) -> ParallelFilesSpec {
    ParallelFilesSpec {
        file_pattern: pattern.to_string(),
        read_mode,
        date_regex: None,
        file_dependencies: Vec::new(),
        commands: vec![shell("wc -l {file}")],
        commands_after: Vec::new(),
        max_parallel_tasks: None,
    }
}

fn request(generator: GeneratorSpec, base_path: &str) -> ExpansionRequest {
    ExpansionRequest {
        path: path("gen"),
        generator,
        before: Vec::new(),
        base_path: PathBuf::from(base_path),
        max_retries: 2,
    }
}

fn ids(expansion: &Expansion) -> Vec<&str> {
    expansion.tasks.iter().map(|t| t.id.as_str()).collect()
}

fn task<'a>(expansion: &'a Expansion, id: &str) -> &'a GeneratedTask {
    expansion
        .tasks
        .iter()
        .find(|t| t.id == id)
        .unwrap_or_else(|| panic!("no generated task '{id}'"))
}

fn described(task: &GeneratedTask) -> Vec<String> {
    task.commands.iter().map(|c| c.describe()).collect()
}

fn mock_env(bus: &EventBus, fs: &MockFileSystem) -> Arc<ExecutionEnv> {
    memory_env_with_fs(bus.publisher(), Arc::new(fs.clone()))
}

#[tokio::test]
async fn values_generator_creates_one_task_per_value() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let expander = Expander::new(FunctionRegistry::new(), memory_env(bus.publisher()));

    let mut spec = values(&["x", "y", "z"]);
    spec.max_parallel_tasks = Some(2);
    let expansion = expander.expand(&request(GeneratorSpec::Values(spec), ".")).await.unwrap();

    assert_eq!(ids(&expansion), vec!["x", "y", "z"]);
    assert_eq!(expansion.max_parallel_tasks, Some(2));
    let y = task(&expansion, "y");
    assert_eq!(described(y), vec!["echo y"]);
    assert!(y.upstreams.is_empty());
    assert_eq!(y.max_retries, 2);
}

#[tokio::test]
async fn before_and_after_tasks_frame_the_generated_tasks() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let expander = Expander::new(FunctionRegistry::new(), memory_env(bus.publisher()));

    let mut spec = values(&["x", "y"]);
    spec.commands_after = vec![shell("echo cleanup")];
    let mut req = request(GeneratorSpec::Values(spec), ".");
    req.before = vec![Arc::new(ShellCommand::new("echo prepare")) as Arc<dyn Command>];

    let expansion = expander.expand(&req).await.unwrap();

    assert_eq!(ids(&expansion), vec!["before", "x", "y", "after"]);
    assert_eq!(described(task(&expansion, "before")), vec!["echo prepare"]);
    assert_eq!(task(&expansion, "x").upstreams, vec!["before"]);
    assert_eq!(task(&expansion, "after").upstreams, vec!["x", "y"]);
    assert_eq!(described(task(&expansion, "after")), vec!["echo cleanup"]);
}

#[tokio::test]
async fn after_task_follows_before_when_nothing_was_enumerated() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let expander = Expander::new(FunctionRegistry::new(), memory_env(bus.publisher()));

    let mut spec = values(&[]);
    spec.commands_after = vec![shell("echo cleanup")];
    let mut req = request(GeneratorSpec::Values(spec), ".");
    req.before = vec![Arc::new(ShellCommand::new("echo prepare")) as Arc<dyn Command>];

    let expansion = expander.expand(&req).await.unwrap();
    assert_eq!(ids(&expansion), vec!["before", "after"]);
    assert_eq!(task(&expansion, "after").upstreams, vec!["before"]);
}

#[tokio::test]
async fn generated_ids_are_sanitized_and_unique() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let expander = Expander::new(FunctionRegistry::new(), memory_env(bus.publisher()));

    let spec = values(&["Foo Bar", "foo-bar", "before", ""]);
    let expansion = expander.expand(&request(GeneratorSpec::Values(spec), ".")).await.unwrap();

    assert_eq!(ids(&expansion), vec!["foo_bar", "foo_bar_2", "before_2", "item"]);
    assert_eq!(task(&expansion, "foo_bar").description, "Foo Bar");
    assert_eq!(described(task(&expansion, "foo_bar_2")), vec!["echo foo-bar"]);
}

#[tokio::test]
async fn values_command_lines_are_appended_to_values() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let expander = Expander::new(FunctionRegistry::new(), memory_env(bus.publisher()));

    let mut spec = values(&["o"]);
    spec.values_command = Some("printf 'p\\n\\n  q  \\n'".to_string());
    let expansion = expander.expand(&request(GeneratorSpec::Values(spec), ".")).await.unwrap();
    assert_eq!(ids(&expansion), vec!["o", "p", "q"]);

    let mut failing = values(&[]);
    failing.values_command = Some("exit 4".to_string());
    let err = expander
        .expand(&request(GeneratorSpec::Values(failing), "."))
        .await
        .unwrap_err();
    assert!(err.message.contains("values_command failed"), "got: {err}");
}

#[tokio::test]
async fn dates_generator_enumerates_inclusive_range() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let expander = Expander::new(FunctionRegistry::new(), memory_env(bus.publisher()));

    let spec = ParallelDatesSpec {
        start: NaiveDate::from_ymd_opt(2024, 2, 27),
        end: NaiveDate::from_ymd_opt(2024, 3, 1),
        commands: vec![shell("load --day {date}")],
        commands_after: Vec::new(),
        max_parallel_tasks: None,
    };
    let expansion = expander.expand(&request(GeneratorSpec::Dates(spec), ".")).await.unwrap();

    assert_eq!(
        ids(&expansion),
        vec!["2024_02_27", "2024_02_28", "2024_02_29", "2024_03_01"]
    );
    assert_eq!(described(task(&expansion, "2024_02_29")), vec!["load --day 2024-02-29"]);
}

#[test]
fn date_range_is_clamped_to_configured_window() {
    let first = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
    let last = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
    let days = date_range(
        NaiveDate::from_ymd_opt(2024, 1, 1),
        NaiveDate::from_ymd_opt(2024, 1, 31),
        first,
        last,
    );
    assert_eq!(days, vec![first, first.succ_opt().unwrap(), last]);

    let empty = date_range(NaiveDate::from_ymd_opt(2024, 2, 1), None, first, last);
    assert!(empty.is_empty());
}

#[test]
fn file_dates_come_from_three_capture_groups() {
    let regex = regex::Regex::new(r"(\d{4})(\d{2})(\d{2})").unwrap();
    assert_eq!(
        parse_file_date(&regex, "sales_20240305.csv"),
        NaiveDate::from_ymd_opt(2024, 3, 5)
    );
    assert_eq!(parse_file_date(&regex, "sales_20241305.csv"), None);
    assert_eq!(parse_file_date(&regex, "sales.csv"), None);
}

#[test]
fn id_allocator_skips_reserved_ids() {
    assert_eq!(sanitize_id("Data/2024-01.CSV"), "data_2024_01_csv");
    let mut allocator = IdAllocator::new(["after"]);
    assert_eq!(allocator.allocate("after"), "after_2");
    assert_eq!(allocator.allocate("after"), "after_3");
    assert_eq!(allocator.allocate("x"), "x");
}

fn csv_fs() -> MockFileSystem {
    let fs = MockFileSystem::new();
    let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    fs.add_file_with_mtime("data/a.csv", "1\n", t);
    fs.add_file_with_mtime("data/b.csv", "2\n", t);
    fs.add_file_with_mtime("data/notes.txt", "skip", t);
    fs
}

#[tokio::test]
async fn files_generator_reads_all_matching_files() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let fs = csv_fs();
    let expander = Expander::new(FunctionRegistry::new(), mock_env(&bus, &fs));

    let expansion = expander
        .expand(&request(GeneratorSpec::Files(files("*.csv", ReadMode::All)), "data"))
        .await
        .unwrap();

    assert_eq!(ids(&expansion), vec!["b_csv", "a_csv"]);
    assert_eq!(described(task(&expansion, "a_csv")), vec!["wc -l a.csv"]);
}

#[tokio::test]
async fn only_new_skips_processed_files_and_tracks_the_rest() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let fs = csv_fs();
    let env = mock_env(&bus, &fs);
    env.tracker
        .track_processed_file(&path("gen"), "a.csv", Utc::now())
        .unwrap();
    let expander = Expander::new(FunctionRegistry::new(), Arc::clone(&env));

    let expansion = expander
        .expand(&request(GeneratorSpec::Files(files("*.csv", ReadMode::OnlyNew)), "data"))
        .await
        .unwrap();

    assert_eq!(ids(&expansion), vec!["b_csv"]);
    assert_eq!(
        described(task(&expansion, "b_csv")),
        vec!["wc -l b.csv", "track b.csv as processed"]
    );
}

#[tokio::test]
async fn only_changed_picks_files_modified_after_processing() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let fs = csv_fs();
    let env = mock_env(&bus, &fs);
    let before = Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap();
    let after = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    env.tracker.track_processed_file(&path("gen"), "a.csv", before).unwrap();
    env.tracker.track_processed_file(&path("gen"), "b.csv", after).unwrap();
    let expander = Expander::new(FunctionRegistry::new(), Arc::clone(&env));

    let expansion = expander
        .expand(&request(GeneratorSpec::Files(files("*.csv", ReadMode::OnlyChanged)), "data"))
        .await
        .unwrap();

    assert_eq!(ids(&expansion), vec!["a_csv"]);

    fs.touch("data/b.csv", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    let expansion = expander
        .expand(&request(GeneratorSpec::Files(files("*.csv", ReadMode::OnlyChanged)), "data"))
        .await
        .unwrap();
    assert_eq!(ids(&expansion), vec!["b_csv", "a_csv"]);
}

#[tokio::test]
async fn only_latest_uses_file_dates() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let fs = MockFileSystem::new();
    fs.add_file("data/sales_20240305.csv", "");
    fs.add_file("data/sales_20240101.csv", "");
    fs.add_file("data/sales_19990101.csv", "");
    let expander = Expander::new(FunctionRegistry::new(), mock_env(&bus, &fs));

    let mut spec = files("sales_*.csv", ReadMode::OnlyLatest);
    spec.date_regex = Some(r"(\d{4})(\d{2})(\d{2})".to_string());
    let expansion = expander
        .expand(&request(GeneratorSpec::Files(spec.clone()), "data"))
        .await
        .unwrap();
    assert_eq!(ids(&expansion), vec!["sales_20240305_csv"]);

    spec.read_mode = ReadMode::OnlyNewExceptLatest;
    let expansion = expander
        .expand(&request(GeneratorSpec::Files(spec), "data"))
        .await
        .unwrap();
    assert_eq!(ids(&expansion), vec!["sales_20240101_csv"], "files before first_date are ignored");
}

#[tokio::test]
async fn changed_file_dependencies_reread_everything_and_are_stored_after() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let fs = csv_fs();
    fs.add_file("data/schema.sql", "create table t ()");
    let env = mock_env(&bus, &fs);
    env.tracker.track_processed_file(&path("gen"), "a.csv", Utc::now()).unwrap();
    let expander = Expander::new(FunctionRegistry::new(), Arc::clone(&env));

    let mut spec = files("*.csv", ReadMode::OnlyNew);
    spec.file_dependencies = vec!["schema.sql".to_string()];
    let expansion = expander
        .expand(&request(GeneratorSpec::Files(spec), "data"))
        .await
        .unwrap();

    assert_eq!(ids(&expansion), vec!["b_csv", "a_csv", "after"]);
    assert_eq!(task(&expansion, "after").upstreams, vec!["b_csv", "a_csv"]);
    assert_eq!(
        described(task(&expansion, "after")),
        vec!["update file dependencies of gen"]
    );
}

#[tokio::test]
async fn missing_base_path_is_a_launch_error() {
    init_tracing();
    let bus = EventBus::start(Vec::new());
    let fs = MockFileSystem::new();
    let expander = Expander::new(FunctionRegistry::new(), mock_env(&bus, &fs));

    let err = expander
        .expand(&request(GeneratorSpec::Files(files("*.csv", ReadMode::All)), "nowhere"))
        .await
        .unwrap_err();
    assert!(err.message.contains("not a directory"));

    let bad_glob = files("[", ReadMode::All);
    fs.add_file("data/a.csv", "");
    let err = expander
        .expand(&request(GeneratorSpec::Files(bad_glob), "data"))
        .await
        .unwrap_err();
    assert!(err.message.contains("invalid file_pattern"));
}
