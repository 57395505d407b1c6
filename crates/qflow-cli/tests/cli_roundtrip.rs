//! Round-trips two timestamp CSVs through the `qflow run` binary.

use std::process::Command;
use tempfile::tempdir;

#[test]
fn run_subcommand_writes_a_queue_csv() {
    let dir = tempdir().unwrap();
    let in_csv = dir.path().join("in_timestamps.csv");
    let out_csv = dir.path().join("out_timestamps.csv");
    let output = dir.path().join("reconciled.csv");

    std::fs::write(&in_csv, "timestamp\n2026-01-20T06:00:05Z\n2026-01-20T06:01:12Z\n").unwrap();
    std::fs::write(&out_csv, "timestamp\n2026-01-20T06:03:59Z\n").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_qflow"))
        .args([
            "run",
            "--in-csv",
            in_csv.to_str().unwrap(),
            "--out-csv",
            out_csv.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--no-episode-splitting",
        ])
        .status()
        .expect("qflow binary runs");

    assert!(status.success());
    let contents = std::fs::read_to_string(&output).unwrap();
    let mut lines = contents.lines();
    let header = lines.next().unwrap();
    assert!(header.contains("Pax i k"));
    assert_eq!(lines.count(), 4);
}
