//! Runs the binaries against generated sheets in a scratch directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn generate_sheets() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("generate-sample")
        .unwrap()
        .arg("--out-dir")
        .arg(dir.path().join("data"))
        .assert()
        .success()
        .stdout(predicate::str::contains("960 trial rows"));
    dir
}

#[test]
fn writes_all_tables_as_csv() {
    let dir = generate_sheets();
    let out = dir.path().join("out");

    Command::cargo_bin("predation-trials")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--out-dir")
        .arg(&out)
        .arg("--strict")
        .assert()
        .success()
        .stdout(predicate::str::contains("890 rows (540 experimental + 350 control)"));

    for name in ["all_data.csv", "exp_data.csv", "r2_data.csv", "summary.csv", "run_report.json", "theme.json"] {
        assert!(out.join(name).exists(), "{name} missing");
    }
    let all = std::fs::read_to_string(out.join("all_data.csv")).unwrap();
    assert_eq!(all.lines().count(), 891);
    assert!(!all.contains("start_time"));
}

#[test]
fn writes_parquet_tables() {
    let dir = generate_sheets();
    let out = dir.path().join("out");

    Command::cargo_bin("predation-trials")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--out-dir")
        .arg(&out)
        .args(["--format", "parquet"])
        .assert()
        .success();

    assert!(out.join("all_data.parquet").exists());
    assert!(out.join("summary.parquet").exists());
}

#[test]
fn missing_sheet_fails_with_the_path() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("predation-trials")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("--out-dir")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("all_trials_crayfish_digital.csv"));
}

#[test]
fn strict_mode_rejects_unexpected_counts() {
    let dir = generate_sheets();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[expected]\nraw_total = 961\n").unwrap();

    Command::cargo_bin("predation-trials")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--out-dir")
        .arg(dir.path().join("out"))
        .arg("--config")
        .arg(&config)
        .arg("--strict")
        .assert()
        .failure()
        .stderr(predicate::str::contains("raw total: expected 961, found 960"));
}
