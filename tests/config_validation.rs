// tests/config_validation.rs

use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use rundag::command::FunctionRegistry;
use rundag::config::{load_and_validate, parse_str, CommandSpec, ConfigFile, NodeSpec};
use rundag::dag::{BuildOptions, Graph};
use rundag::errors::RundagError;
use rundag::cli::LogLevel;
use rundag::logging::resolve_level;
use rundag::{exit_code, render_tree};
use tracing::Level;
use rundag::types::{NodePath, ReadMode, StateStorageMode};

fn config_file(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{toml}").unwrap();
    file
}

fn load(toml: &str) -> Result<ConfigFile, RundagError> {
    let file = config_file(toml);
    load_and_validate(file.path())
}

#[test]
fn valid_config_parses_with_defaults() {
    let cfg = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "extract"
commands = [{ type = "shell", cmd = "echo extract" }]

[[pipeline.nodes]]
kind = "pipeline"
id = "load"
upstreams = ["extract"]
ignore_errors = true

[[pipeline.nodes.nodes]]
kind = "task"
id = "customers"
max_retries = 2
commands = [{ type = "shell", cmd = "echo customers", file_dependencies = ["schema.sql"] }]
"#,
    )
    .unwrap();

    assert_eq!(cfg.config.default_task_max_retries, 0);
    assert_eq!(cfg.config.state_storage_mode, StateStorageMode::File);
    assert_eq!(cfg.config.bash_command, "/usr/bin/env bash -o pipefail");
    assert!(cfg.config.max_parallel_tasks >= 1);
    assert!(cfg.pipeline.base_path.is_some(), "root base_path defaults to the config dir");
    assert!(cfg.config.state_dir.ends_with(".rundag"));

    assert_eq!(cfg.pipeline.nodes.len(), 2);
    match &cfg.pipeline.nodes[1] {
        NodeSpec::Pipeline(load) => {
            assert!(load.continue_on_error, "ignore_errors is an alias");
            assert_eq!(load.upstreams, vec!["extract".to_string()]);
            match &load.nodes[0] {
                NodeSpec::Task(t) => {
                    assert_eq!(t.max_retries, Some(2));
                    assert!(matches!(
                        &t.commands[0],
                        CommandSpec::Shell(s) if s.file_dependencies == ["schema.sql"]
                    ));
                }
                other => panic!("expected task, got {other:?}"),
            }
        }
        other => panic!("expected pipeline, got {other:?}"),
    }
}

#[test]
fn relative_base_path_is_resolved_against_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("Rundag.toml");
    std::fs::write(
        &config_path,
        r#"
[config]
state_storage_mode = "memory"

[pipeline]
id = "root"
base_path = "data"
"#,
    )
    .unwrap();

    let cfg = load_and_validate(&config_path).unwrap();
    assert_eq!(cfg.pipeline.base_path, Some(dir.path().join("data")));
    assert_eq!(cfg.config.state_dir, dir.path().join(".rundag"));
    assert_eq!(cfg.config.state_storage_mode, StateStorageMode::Memory);
}

#[test]
fn generator_specs_deserialize() {
    let raw = parse_str(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "files"

[[pipeline.nodes.commands]]
type = "parallel_files"
file_pattern = "*.csv"
read_mode = "only_new"
commands = [{ type = "read_file", file_name = "{file}", compression = "gzip", consumer = "wc -l" }]
"#,
    )
    .unwrap();

    let NodeSpec::Task(task) = &raw.pipeline.nodes[0] else {
        panic!("expected task");
    };
    let generator = task.commands[0].as_generator().expect("generator");
    assert_eq!(generator.placeholder(), "{file}");
    match &task.commands[0] {
        CommandSpec::ParallelFiles(spec) => assert_eq!(spec.read_mode, ReadMode::OnlyNew),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn dependency_cycle_is_rejected() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "a"
upstreams = ["b"]

[[pipeline.nodes]]
kind = "task"
id = "b"
upstreams = ["a"]
"#,
    );

    match result {
        Err(RundagError::DagCycle(msg)) => {
            assert!(msg.contains('a') || msg.contains('b'));
        }
        Err(e) => panic!("Expected DagCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_dependency_is_rejected() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "a"
upstreams = ["missing"]
"#,
    );
    assert!(matches!(result, Err(RundagError::UnknownDependency(_))));
}

#[test]
fn dependency_on_non_sibling_is_rejected() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "pipeline"
id = "p"

[[pipeline.nodes.nodes]]
kind = "task"
id = "inner"

[[pipeline.nodes]]
kind = "task"
id = "outer"
upstreams = ["inner"]
"#,
    );
    assert!(matches!(result, Err(RundagError::UnknownDependency(_))));
}

#[test]
fn self_dependency_is_rejected() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "a"
upstreams = ["a"]
"#,
    );
    assert!(matches!(result, Err(RundagError::UnknownDependency(_))));
}

#[test]
fn invalid_id_is_rejected() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "Load-Customers"
"#,
    );
    assert!(matches!(result, Err(RundagError::InvalidId(_))));
}

#[test]
fn duplicate_sibling_ids_are_rejected() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "a"

[[pipeline.nodes]]
kind = "pipeline"
id = "a"
"#,
    );
    assert!(matches!(result, Err(RundagError::DuplicateNode(_))));
}

#[test]
fn generator_must_be_last_command() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "gen"

[[pipeline.nodes.commands]]
type = "parallel_values"
values = ["x"]
commands = [{ type = "shell", cmd = "echo {value}" }]

[[pipeline.nodes.commands]]
type = "shell"
cmd = "echo after"
"#,
    );
    assert!(matches!(result, Err(RundagError::GeneratorPlacement(_))));
}

fn framed_pipeline(extra: &str) -> String {
    format!(
        r#"
[pipeline]
id = "root"
initial_node = "init"
final_node = "fin"

[[pipeline.nodes]]
kind = "task"
id = "init"
{extra}

[[pipeline.nodes]]
kind = "task"
id = "load"

[[pipeline.nodes]]
kind = "task"
id = "fin"
"#
    )
}

#[test]
fn initial_and_final_nodes_become_sibling_edges() {
    let cfg = load(&framed_pipeline("")).unwrap();
    let graph = Graph::build(&cfg.pipeline, &BuildOptions::default()).unwrap();
    let lines: Vec<String> = render_tree(&graph).lines().map(str::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "root (pipeline)",
            "  init (task, 0 commands)",
            "  load (task, 0 commands) after [init]",
            "  fin (task, 0 commands) after [load]",
        ]
    );
}

#[test]
fn initial_node_with_upstreams_is_rejected() {
    let result = load(&framed_pipeline(r#"upstreams = ["load"]"#));
    assert!(matches!(result, Err(RundagError::ConfigError(_))), "{result:?}");
}

#[test]
fn depending_on_the_final_node_is_rejected() {
    let toml = framed_pipeline("").replace(
        "id = \"load\"",
        "id = \"load\"\nupstreams = [\"fin\"]",
    );
    let result = load(&toml);
    assert!(matches!(result, Err(RundagError::ConfigError(_))), "{result:?}");
}

#[test]
fn unknown_final_node_is_rejected() {
    let toml = framed_pipeline("").replace("final_node = \"fin\"", "final_node = \"nope\"");
    let result = load(&toml);
    assert!(matches!(result, Err(RundagError::UnknownDependency(_))), "{result:?}");
}

#[test]
fn unknown_database_alias_is_rejected() {
    let result = load(
        r#"
[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "q"
commands = [{ type = "sql", sql_statement = "select 1", db_alias = "nowhere" }]
"#,
    );
    assert!(matches!(result, Err(RundagError::ConfigError(_))));
}

#[test]
fn zero_parallel_tasks_is_rejected() {
    let result = load(
        r#"
[config]
max_parallel_tasks = 0

[pipeline]
id = "root"
"#,
    );
    assert!(matches!(result, Err(RundagError::ConfigError(_))));
}

#[test]
fn malformed_toml_is_a_validation_error() {
    let err = load("[pipeline\nid = ").unwrap_err();
    assert!(matches!(err, RundagError::TomlError(_)));
    assert!(err.is_validation());
    assert_eq!(exit_code(&Err(err)), 2);
}

#[test]
fn unknown_function_is_rejected_at_build_time() {
    let cfg = load(
        r#"
[config]
state_storage_mode = "memory"

[pipeline]
id = "root"

[[pipeline.nodes]]
kind = "task"
id = "f"
commands = [{ type = "function", function = "refresh_cache" }]
"#,
    )
    .unwrap();

    let options = BuildOptions {
        base_path: PathBuf::from("."),
        ..BuildOptions::default()
    };
    let err = Graph::build(&cfg.pipeline, &options).unwrap_err();
    assert!(matches!(err, RundagError::UnknownFunction(_)));

    let mut registry = FunctionRegistry::new();
    registry.register("refresh_cache", |_| Ok(true));
    let options = BuildOptions {
        registry,
        ..BuildOptions::default()
    };
    let graph = Graph::build(&cfg.pipeline, &options).unwrap();
    assert!(graph.contains(&"f".parse::<NodePath>().unwrap()));
}

#[test]
fn exit_codes_follow_run_outcome() {
    assert_eq!(exit_code(&Ok(true)), 0);
    assert_eq!(exit_code(&Ok(false)), 1);
    assert_eq!(exit_code(&Err(RundagError::EventBusClosed)), 1);
    assert_eq!(exit_code(&Err(RundagError::DagCycle("a -> b -> a".into()))), 2);
}

#[test]
fn render_tree_outlines_nodes_in_declaration_order() {
    let raw = parse_str(
        r#"
[pipeline]
id = "etl"

[[pipeline.nodes]]
kind = "task"
id = "ping"
description = "Check the database"
commands = [{ type = "shell", cmd = "true" }]

[[pipeline.nodes]]
kind = "pipeline"
id = "load"
upstreams = ["ping"]

[[pipeline.nodes.nodes]]
kind = "task"
id = "days"

[[pipeline.nodes.nodes.commands]]
type = "parallel_dates"
commands = [{ type = "shell", cmd = "echo {date}" }]
"#,
    )
    .unwrap();

    let graph = Graph::build(&raw.pipeline, &BuildOptions::default()).unwrap();
    let tree = render_tree(&graph);
    let lines: Vec<&str> = tree.lines().collect();
    assert_eq!(
        lines,
        vec![
            "etl (pipeline)",
            "  ping (task, 1 commands): Check the database",
            "  load (pipeline) after [ping]",
            "    days (task, 0 commands + {date})",
        ]
    );
}

#[test]
fn cli_log_level_wins_over_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Debug), Some("error")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some("warning")), Level::WARN);
    assert_eq!(resolve_level(None, Some(" TRACE ")), Level::TRACE);
    assert_eq!(resolve_level(None, Some("loud")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}
