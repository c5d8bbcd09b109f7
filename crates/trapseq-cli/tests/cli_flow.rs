//! End-to-end tests driving the `trapseq` binary.
//!
//! Tests the full pipeline: import → seasons/sequences → runs → prune

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn trapseq_binary() -> String {
    env!("CARGO_BIN_EXE_trapseq").to_string()
}

/// Runs `trapseq` with an isolated home and an optional stdin payload.
fn trapseq(home: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let mut child = Command::new(trapseq_binary())
        .env("HOME", home)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("XDG_DATA_HOME")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run trapseq");
    {
        let mut pipe = child.stdin.take().unwrap();
        if let Some(input) = stdin {
            pipe.write_all(input.as_bytes()).unwrap();
        }
    }
    child.wait_with_output().unwrap()
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn photo_line(id: &str, camera: &str, minute: u32) -> String {
    format!(
        r#"{{"type":"photo","id":"{id}","site_name":"North","camera_id":"{camera}","taken_at":"2024-05-01 {:02}:{:02}:00"}}"#,
        6 + minute / 60,
        minute % 60
    )
}

fn detection_line(id: &str, photo_id: &str) -> String {
    format!(r#"{{"type":"detection","id":"{id}","photo_id":"{photo_id}","subject":"fox","count":1}}"#)
}

fn import(home: &Path, lines: &[String]) {
    let mut input = lines.join("\n");
    input.push('\n');
    let output = trapseq(home, &["import"], Some(&input));
    assert_success(&output, "import");
}

fn sequence_runs(home: &Path) -> serde_json::Value {
    let output = trapseq(home, &["runs", "--kind", "sequence", "--json"], None);
    assert_success(&output, "runs");
    serde_json::from_slice(&output.stdout).expect("runs --json should print JSON")
}

#[test]
fn test_incremental_sequences_keep_ids() {
    let temp = TempDir::new().unwrap();
    let home = temp.path();

    import(
        home,
        &[
            photo_line("p0", "C1", 0),
            photo_line("p10", "C1", 10),
            photo_line("p200", "C1", 200),
            detection_line("d0", "p0"),
            detection_line("d10", "p10"),
            detection_line("d200", "p200"),
        ],
    );
    assert!(home.join(".local/share/trapseq/trapseq.db").exists());

    let output = trapseq(home, &["sequences"], None);
    assert_success(&output, "sequences");
    let first = sequence_runs(home);
    let runs = first["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["run_index"], 1);
    assert_eq!(runs[0]["member_count"], 2);
    assert_eq!(runs[1]["member_count"], 1);

    // a late detection within the gap of the first sequence extends it
    import(home, &[photo_line("p25", "C1", 25), detection_line("d25", "p25")]);
    let output = trapseq(home, &["sequences"], None);
    assert_success(&output, "second sequences");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Runs extended: 1"), "unexpected report: {stdout}");

    let second = sequence_runs(home);
    let runs = second["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["run_id"], first["runs"][0]["run_id"]);
    assert_eq!(runs[0]["member_count"], 3);
    assert_eq!(runs[1]["run_id"], first["runs"][1]["run_id"]);

    // nothing new: the pass is a no-op
    let output = trapseq(home, &["sequences"], None);
    assert_success(&output, "third sequences");
    assert_eq!(sequence_runs(home), second);

    // every sequence still has its members, so prune leaves them alone
    let output = trapseq(home, &["prune"], None);
    assert_success(&output, "prune");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Deleted 0 empty sequences"), "{stdout}");
    assert!(stdout.contains("Refreshed 0 sequence summaries"), "{stdout}");
    assert_eq!(sequence_runs(home), second);
}

#[test]
fn test_seasons_and_status() {
    let temp = TempDir::new().unwrap();
    let home = temp.path();

    import(
        home,
        &[
            photo_line("p0", "C1", 0),
            photo_line("p1", "C1", 90),
            photo_line("p2", "C2", 0),
        ],
    );
    let output = trapseq(home, &["seasons"], None);
    assert_success(&output, "seasons");

    let output = trapseq(home, &["status"], None);
    assert_success(&output, "status");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Photos: 3 (3 in a season, 0 unassigned)"), "{stdout}");
    assert!(stdout.contains("Seasons: 2"), "{stdout}");
}

#[test]
fn test_config_file_changes_threshold() {
    let temp = TempDir::new().unwrap();
    let home = temp.path();
    let db_file = temp.path().join("custom.db");
    let config_file = temp.path().join("config.toml");
    std::fs::write(
        &config_file,
        format!(
            "database_path = \"{}\"\nsequence_gap_minutes = 5\n",
            db_file.display()
        ),
    )
    .unwrap();
    let config = config_file.to_str().unwrap();

    let mut input = [
        photo_line("p0", "C1", 0),
        photo_line("p10", "C1", 10),
        detection_line("d0", "p0"),
        detection_line("d10", "p10"),
    ]
    .join("\n");
    input.push('\n');
    let output = trapseq(home, &["--config", config, "import"], Some(&input));
    assert_success(&output, "import");
    assert!(db_file.exists());

    let output = trapseq(home, &["--config", config, "sequences"], None);
    assert_success(&output, "sequences");
    let output = trapseq(home, &["--config", config, "runs", "--json"], None);
    assert_success(&output, "runs");
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["runs"].as_array().unwrap().len(), 2);
}

#[test]
fn test_invalid_threshold_fails() {
    let temp = TempDir::new().unwrap();
    let output = Command::new(trapseq_binary())
        .env("HOME", temp.path())
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("XDG_DATA_HOME")
        .env("TRAPSEQ_SEASON_GAP_DAYS", "0")
        .arg("seasons")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("season pass failed"), "{stderr}");
}

#[test]
fn test_import_rejects_malformed_line() {
    let temp = TempDir::new().unwrap();
    let output = trapseq(temp.path(), &["import"], Some("{\"type\":\"photo\"\n"));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid JSON on line 1"), "{stderr}");
}
