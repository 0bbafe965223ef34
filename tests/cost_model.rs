// tests/cost_model.rs

use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::tempdir;

use rundag::dag::{format_duration, CostModel};
use rundag::history::{
    FileRunHistory, MemoryRunHistory, NodeRunRecord, RunHistory, HISTORY_FILE_NAME,
};
use rundag::types::NodePath;

fn path(s: &str) -> NodePath {
    s.parse().unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn record(node: &str, run_id: u64, secs: i64, succeeded: bool, is_pipeline: bool) -> NodeRunRecord {
    NodeRunRecord {
        node_path: path(node),
        run_id,
        start_time: t0(),
        end_time: t0() + Duration::seconds(secs),
        succeeded,
        is_pipeline,
    }
}

#[test]
fn durations_are_formatted_by_magnitude() {
    assert_eq!(format_duration(5.6), "5.6s");
    assert_eq!(format_duration(0.0), "0.0s");
    assert_eq!(format_duration(-2.0), "0.0s");
    assert_eq!(format_duration(70.0), "1:10m");
    assert_eq!(format_duration(3599.0), "59:59m");
    assert_eq!(format_duration(3960.0), "1:06h");
}

#[test]
fn averages_only_succeeded_leaf_runs() {
    let records = vec![
        record("load/a", 1, 10, true, false),
        record("load/a", 2, 20, true, false),
        record("load/a", 3, 500, false, false),
        record("load", 1, 900, true, true),
        record("load/b", 1, 4, true, false),
    ];
    let cost = CostModel::from_records(&records);

    assert_eq!(cost.own_cost(&path("load/a")), 15.0);
    assert_eq!(cost.own_cost(&path("load/b")), 4.0);
    assert_eq!(cost.own_cost(&path("load")), 19.0, "pipelines sum their leaves");
    assert_eq!(cost.own_cost(&NodePath::root()), 19.0);
    assert_eq!(cost.own_cost(&path("report")), 0.0);
    assert!(cost.has_history(&path("load")));
    assert!(!cost.has_history(&path("report")));
}

#[test]
fn prefix_sums_respect_id_boundaries() {
    let cost = CostModel::with_costs([
        (path("load/a"), 1.0),
        (path("loader/x"), 100.0),
        (path("load"), 0.5),
    ]);
    assert_eq!(cost.own_cost(&path("load")), 1.5);
    assert_eq!(cost.own_cost(&path("loader")), 100.0);
}

#[test]
fn cost_model_loads_from_history_below_root() {
    let history = MemoryRunHistory::with_records(vec![
        record("load/a", 1, 8, true, false),
        record("report/x", 1, 30, true, false),
    ]);
    let cost = CostModel::load(&history, &path("load")).unwrap();
    assert_eq!(cost.own_cost(&path("load/a")), 8.0);
    assert_eq!(cost.own_cost(&path("report/x")), 0.0);
}

#[test]
fn file_history_appends_and_filters_records() {
    let dir = tempdir().unwrap();
    let history = FileRunHistory::new(dir.path().join("state"));
    assert!(history.records_under(&NodePath::root()).unwrap().is_empty());

    history.append(record("load/a", 1, 3, true, false)).unwrap();
    history.append(record("load", 1, 3, true, true)).unwrap();
    history.append(record("report", 1, 3, false, false)).unwrap();

    let file = dir.path().join("state").join(HISTORY_FILE_NAME);
    let mut contents = fs::read_to_string(&file).unwrap();
    contents.push_str("not json\n\n");
    fs::write(&file, contents).unwrap();

    let reopened = FileRunHistory::new(dir.path().join("state"));
    let under_load = reopened.records_under(&path("load")).unwrap();
    assert_eq!(under_load.len(), 2);
    assert_eq!(under_load[0], record("load/a", 1, 3, true, false));
    assert_eq!(reopened.records_under(&NodePath::root()).unwrap().len(), 3);
}

#[test]
fn expected_duration_is_the_nodes_own_average() {
    // A generator whose generated ids differ on every run.
    let mut records = Vec::new();
    for run_id in 1..=30 {
        records.push(record(&format!("load/file_{run_id}"), run_id, 10, true, false));
        records.push(record("load", run_id, 12, true, true));
    }
    records.push(record("load", 31, 600, false, true));
    let cost = CostModel::from_records(&records);

    assert_eq!(cost.own_cost(&path("load")), 300.0, "priority keeps summing leaves");
    assert_eq!(cost.expected_duration(&path("load")), Some(12.0));
    assert_eq!(cost.expected_duration(&path("load/file_3")), Some(10.0));
    assert_eq!(cost.expected_duration(&path("report")), None);
}
