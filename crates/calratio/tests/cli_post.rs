use calratio_core::{
    data::{test_event, LlpCandidate},
    regions::RegionFlags,
    write_slim, Region, SlimRecord, SlimWriteOptions,
};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_calratio"))
}

fn tmp_dir() -> PathBuf {
    let dir = std::env::temp_dir()
        .join(format!("calratio_cli_post_{}_{}", std::process::id(), fastrand::u64(..)));
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

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn record(region: Region, weight: f64, lxy_mm: [f64; 2]) -> SlimRecord {
    let llp = |lxy| LlpCandidate { lxy, ..test_event().llps[0] };
    SlimRecord {
        event_number: 0,
        passed: true,
        llps: [llp(lxy_mm[0]), llp(lxy_mm[1])],
        weight,
        regions: RegionFlags::new(region, true, true),
    }
}

fn write_slim_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("slim.parquet");
    let records = vec![
        record(Region::A, 1.0, [100.0, 200.0]),
        record(Region::B, 2.0, [100.0, 200.0]),
        record(Region::B, 2.0, [1100.0, 200.0]),
        record(Region::C, 3.0, [100.0, 4200.0]),
        record(Region::D, 6.0, [100.0, 200.0]),
        record(Region::None, 1.0, [100.0, 200.0]),
    ];
    write_slim(&records, s(&path), &SlimWriteOptions::new()).unwrap();
    path
}

#[test]
fn abcd_reports_yields_and_prediction() {
    let dir = tmp_dir();
    let input = write_slim_fixture(&dir);
    let output = dir.join("abcd.json");

    let out = run(&["abcd", "-i", s(&input), "-o", s(&output)]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let v = read_json(&output);
    assert_eq!(v["n_records"].as_u64(), Some(6));
    let sum_w = v["yields"]["sum_w"].as_array().unwrap();
    assert_eq!(sum_w[1].as_f64(), Some(4.0));
    let prediction = v["prediction"]["value"].as_f64().unwrap();
    assert!((prediction - 2.0).abs() < 1e-12);

    let out = run(&["abcd", "-i", s(&input)]);
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("Region D"));
    assert!(stdout.contains("ABCD prediction for A (B*C/D): 2.0000"));

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn efficiency_exports_plot_points() {
    let dir = tmp_dir();
    let input = write_slim_fixture(&dir);
    let output = dir.join("points.json");
    let map = dir.join("map.json");

    let out = run(&[
        "efficiency",
        "-i",
        s(&input),
        "-o",
        s(&output),
        "--bins",
        "5",
        "--map-2d",
        s(&map),
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let v = read_json(&output);
    let points = v.as_array().unwrap();
    assert_eq!(points.len(), 20);
    assert_eq!(points[0]["label"].as_str(), Some("Region A"));
    assert_eq!(points[0]["x"].as_f64(), Some(0.5));
    for point in points {
        for key in ["x", "y", "yErrUp", "yErrDown"] {
            assert!(point[key].as_f64().is_some(), "missing {key}");
        }
        let y = point["y"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&y));
    }
    // Region B, first metre.
    assert!(points[5]["y"].as_f64().unwrap() > 0.0);

    let cells = read_json(&map);
    let cells = cells.as_array().unwrap();
    assert_eq!(cells.len(), 100);
    assert_eq!(cells[0]["label"].as_str(), Some("Region A"));
    assert_eq!(cells[1]["lxy2"].as_f64(), Some(1.5));
    assert!(cells.iter().all(|cell| cell["efficiency"].as_f64().is_some()));

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn systematics_reads_mass_point_from_file_name() {
    let dir = tmp_dir();
    let output = dir.join("sys.json");
    let out = run(&[
        "systematics",
        "-e",
        "/data/mH600_mS150_lt5m.root",
        "--mc-error-scale",
        "2",
        "-o",
        s(&output),
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let v = read_json(&output);
    assert_eq!(v["mass_point"].as_u64(), Some(600));
    let errors = &v["errors"];
    assert_eq!(errors["abcd"].as_f64(), Some(0.36));
    let expected = 2.0
        * (0.006_f64.powi(2)
            + 0.01_f64.powi(2)
            + 0.011_f64.powi(2)
            + 0.011_f64.powi(2)
            + 0.019_f64.powi(2))
        .sqrt();
    assert!((errors["mc_eff"].as_f64().unwrap() - expected).abs() < 1e-12);

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn systematics_needs_unofficial_for_unknown_masses() {
    let out = run(&["systematics", "-e", "mH100_mS8_lt5m.root"]);
    assert!(!out.status.success());

    let out = run(&["systematics", "-e", "mH100_mS8_lt5m.root", "--unofficial"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("* mc_jer -> 0.0016"));
}

#[test]
fn config_prints_defaults() {
    let out = run(&["config"]);
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("selection:"));
    assert!(stdout.contains("leading_pt_high: 160.0"));
    assert!(stdout.contains("bdt_cut: 0.1"));
}
