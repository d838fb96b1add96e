use calratio_core::{
    data::{test_event, write_parquet},
    read_slim, EventRecord, Region,
};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_calratio"))
}

fn tmp_dir() -> PathBuf {
    let dir = std::env::temp_dir()
        .join(format!("calratio_cli_{}_{}", std::process::id(), fastrand::u64(..)));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Seven events covering every region plus the usual failure modes.
fn fixture_events() -> Vec<EventRecord> {
    let base = |n: i64| {
        let mut event = test_event();
        event.event_number = n;
        event
    };
    let mut events = vec![base(0)];
    let mut e = base(1);
    e.jets[0].pt = 150.0;
    events.push(e);
    let mut e = base(2);
    e.event_bdt = 0.07;
    events.push(e);
    let mut e = base(3);
    e.pass_trigger = false;
    events.push(e);
    let mut e = base(4);
    e.signal_indices = vec![0];
    events.push(e);
    let mut e = base(5);
    e.sum_min_dr = 1.0;
    events.push(e);
    let mut e = base(6);
    e.event_bdt = 0.07;
    e.sum_min_dr = 1.0;
    events.push(e);
    events
}

fn write_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("mH600_mS150_lt5m.parquet");
    write_parquet(&fixture_events(), s(&path), 3).unwrap();
    path
}

#[test]
fn slim_prints_cutflow_and_writes_regions() {
    let dir = tmp_dir();
    let input = write_fixture(&dir);
    let output = dir.join("slim.parquet");
    let cutflow = dir.join("cutflow.json");

    let out = run(&[
        "slim",
        "-s",
        s(&input),
        "-o",
        s(&output),
        "-m",
        "1",
        "--cutflow-json",
        s(&cutflow),
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.starts_with("Cutflow results for sample mH600_mS150_lt5m.parquet"));
    assert!(stdout.contains("                Preselection : 5\n"));
    assert!(stdout.contains("       Selection 1  pT > 100 : 5\n"));
    assert!(stdout.contains("       Selection 2  pT > 160 : 4\n"));

    let records = read_slim(s(&output), None).unwrap();
    let regions: Vec<Region> = records.iter().map(|r| r.regions.active()).collect();
    assert_eq!(
        regions,
        vec![
            Region::A,
            Region::A,
            Region::C,
            Region::None,
            Region::None,
            Region::B,
            Region::D
        ]
    );
    assert_eq!(
        records.iter().map(|r| r.event_number).collect::<Vec<_>>(),
        (0..7).collect::<Vec<_>>()
    );
    assert!(!records[3].passed);
    assert!((records[0].weight - 1.0).abs() < 1e-12);

    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&cutflow).unwrap()).unwrap();
    assert_eq!(v["n_events"].as_u64(), Some(7));
    assert_eq!(v["n_selected"].as_u64(), Some(5));
    let stages = v["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 11);
    assert_eq!(stages[8]["label"].as_str(), Some("Region A"));
    assert_eq!(stages[8]["count"].as_u64(), Some(2));
    assert_eq!(stages[10]["count"].as_u64(), Some(1));

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn slim_selection_two_and_event_limit() {
    let dir = tmp_dir();
    let input = write_fixture(&dir);
    let output = dir.join("slim_sel2.parquet");

    let out = run(&["slim", "-s", s(&input), "-o", s(&output), "-m", "2", "-n", "2"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let records = read_slim(s(&output), None).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].regions.active(), Region::A);
    // 150 GeV does not pass selection 2.
    assert_eq!(records[1].regions.active(), Region::None);

    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("                Preselection : 2\n"));

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn slim_accepts_negative_one_for_all_events() {
    let dir = tmp_dir();
    let input = write_fixture(&dir);
    let output = dir.join("slim_all.parquet");
    let out = run(&["slim", "-s", s(&input), "-o", s(&output), "-n", "-1"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(read_slim(s(&output), None).unwrap().len(), 7);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn slim_respects_config_file() {
    let dir = tmp_dir();
    let input = write_fixture(&dir);
    let output = dir.join("slim_cfg.parquet");
    let config = dir.join("cuts.yaml");
    std::fs::write(&config, "selection:\n  leading_pt_low: 160.0\nabcd:\n  bdt_cut: 0.05\n")
        .unwrap();

    let out = run(&["slim", "-c", s(&config), "-s", s(&input), "-o", s(&output)]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("       Selection 1  pT > 160 : 4\n"));

    let records = read_slim(s(&output), None).unwrap();
    // With the BDT cut at 0.05 the former region C event moves to A.
    assert_eq!(records[2].regions.active(), Region::A);
    assert_eq!(records[1].regions.active(), Region::None);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn slim_rejects_unknown_selection() {
    let dir = tmp_dir();
    let input = write_fixture(&dir);
    let output = dir.join("never.parquet");
    let out = run(&["slim", "-s", s(&input), "-o", s(&output), "-m", "3"]);
    assert!(!out.status.success());
    assert!(!output.exists());
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn slim_fails_on_missing_input() {
    let dir = tmp_dir();
    let out = run(&[
        "slim",
        "-s",
        s(&dir.join("missing.parquet")),
        "-o",
        s(&dir.join("out.parquet")),
    ]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed to read sample"), "stderr: {stderr}");
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn slim_output_of_empty_sample_is_readable() {
    let dir = tmp_dir();
    let input = dir.join("empty.parquet");
    write_parquet(&[], s(&input), 10).unwrap();
    let output = dir.join("slim_empty.parquet");

    let out = run(&["slim", "-s", s(&input), "-o", s(&output), "-n", "0"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(read_slim(s(&output), None).unwrap().is_empty());

    let out = run(&["abcd", "-i", s(&output)]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("undefined, region D is empty"));
    std::fs::remove_dir_all(dir).unwrap();
}
