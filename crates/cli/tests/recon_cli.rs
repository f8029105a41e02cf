// Integration tests for `custodia recon`: exit codes and the --json contract.
//
// Run with: cargo test -p custodia-cli --test recon_cli -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn custodia() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_custodia"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    cmd.env_remove("CUSTODIA_CONFIG");
    cmd.env_remove("CUSTODIA_DATA_DIR");
    cmd.env("CUSTODIA_LOG", "warn");
    cmd
}

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../recon/tests/fixtures")
}

fn run(firm: &str, client: &str, date: &str, extra: &[&str]) -> Output {
    let fx = fixtures();
    let mut cmd = custodia();
    cmd.args(["recon", "run", "--config"])
        .arg(fx.join("firms.toml"))
        .arg("--data-dir")
        .arg(fx.join("data"))
        .args(["--firm", firm, "--client", client, "--date", date])
        .args(extra);
    cmd.output().expect("custodia recon run")
}

fn code(output: &Output) -> i32 {
    output.status.code().expect("process exited with a code")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Assert stdout is a single, parseable JSON value with no extra lines.
fn assert_single_json(stdout: &[u8]) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(stdout);
    let trimmed = stdout.trim();
    assert!(!trimmed.is_empty(), "stdout should not be empty");
    serde_json::from_str(trimmed)
        .unwrap_or_else(|e| panic!("stdout must be valid JSON.\nParse error: {e}\nstdout:\n{trimmed}"))
}

/// A firm whose d1g1t and custodian positions agree exactly.
fn clean_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(
        root.join("firms.toml"),
        r#"
[custodians.nbin]
feed = "positions"

[[custodians.nbin.metrics]]
name = "units"
tolerance = 0

[firms.solo]
custodians = ["nbin"]
"#,
    )
    .unwrap();

    std::fs::create_dir_all(root.join("data/d1g1t/solo")).unwrap();
    std::fs::write(
        root.join("data/d1g1t/solo/2024-03-28.csv"),
        "client_id,instrument_id,instrument_type,as_of_date,d1g1t_units\nC1,AAPL,equity,2024-03-28,10\n",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("data/nbin/positions")).unwrap();
    std::fs::write(
        root.join("data/nbin/positions/2024-03-28.csv"),
        "client_id,instrument_id,instrument_type,as_of_date,custodian_units\nC1,AAPL,equity,2024-03-28,10.00\n",
    )
    .unwrap();
    dir
}

// ===========================================================================
// custodia recon run
// ===========================================================================

#[test]
fn clean_run_exits_zero() {
    let ws = clean_workspace();
    let output = custodia()
        .args(["recon", "run", "--config"])
        .arg(ws.path().join("firms.toml"))
        .arg("--data-dir")
        .arg(ws.path().join("data"))
        .args(["--firm", "solo", "--client", "C1", "--date", "2024-03-28", "--json"])
        .output()
        .unwrap();

    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    let val = assert_single_json(&output.stdout);
    assert_eq!(val["summary"]["matched"], 1);
    assert_eq!(val["meta"]["custodians"], serde_json::json!(["nbin"]));
}

#[test]
fn breaks_exit_one_with_json_on_stdout() {
    let output = run("pcr", "C100", "2024-03-28", &["--json"]);

    assert_eq!(code(&output), 1, "stderr: {}", stderr(&output));
    let val = assert_single_json(&output.stdout);
    assert_eq!(val["meta"]["firm_id"], "pcr");
    assert_eq!(val["meta"]["adapter"], "pcr");
    assert_eq!(val["summary"]["mismatched"], 2);
    assert_eq!(val["summary"]["unmatched_d1g1t"], 1);
    assert_eq!(val["summary"]["unmatched_custodian"], 1);
    assert!(stderr(&output).contains("positions did not reconcile"));
}

#[test]
fn custodians_default_to_firm_config() {
    let output = run("pcr", "C100", "2024-03-28", &["--json"]);
    let val = assert_single_json(&output.stdout);
    assert_eq!(val["meta"]["custodians"], serde_json::json!(["nbin", "td"]));

    let output = run("pcr", "C100", "2024-03-28", &["--json", "--custodian", "nbin"]);
    let val = assert_single_json(&output.stdout);
    assert_eq!(val["meta"]["custodians"], serde_json::json!(["nbin"]));
}

#[test]
fn human_summary_keeps_stdout_empty() {
    let output = run("claret", "C100", "2024-03-28", &[]);
    assert_eq!(code(&output), 1);
    assert!(output.stdout.is_empty());
    assert!(stderr(&output).contains("claret / C100 as of 2024-03-28"));
}

#[test]
fn output_file_and_csv_dir() {
    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("result.json");
    let csv_dir = dir.path().join("csv");
    let output = run(
        "pcr",
        "C100",
        "2024-03-28",
        &[
            "--output",
            json_path.to_str().unwrap(),
            "--csv-dir",
            csv_dir.to_str().unwrap(),
        ],
    );
    assert_eq!(code(&output), 1, "stderr: {}", stderr(&output));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["meta"]["client_id"], "C100");

    for name in [
        "matched.csv",
        "mismatched.csv",
        "unmatched_d1g1t.csv",
        "unmatched_custodian.csv",
        "summary.csv",
    ] {
        assert!(csv_dir.join(name).exists(), "missing {name}");
    }
    let summary = std::fs::read_to_string(csv_dir.join("summary.csv")).unwrap();
    assert!(summary.lines().any(|l| l.starts_with("Total,units,")));
}

// ===========================================================================
// Failure classes
// ===========================================================================

#[test]
fn malformed_date_is_input_error() {
    let output = run("pcr", "C100", "28/03/2024", &[]);
    assert_eq!(code(&output), 2, "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("hint:"));
}

#[test]
fn unknown_firm_is_config_error() {
    let output = run("nobody", "C100", "2024-03-28", &["--custodian", "nbin"]);
    assert_eq!(code(&output), 3, "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("nobody"));
    assert!(output.stdout.is_empty());
}

#[test]
fn unknown_client_is_data_error() {
    let output = run("pcr", "C999", "2024-03-28", &["--json"]);
    assert_eq!(code(&output), 4, "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("[firm=pcr client=C999 date=2024-03-28]"));
    assert!(output.stdout.is_empty());
}

#[test]
fn missing_data_dir_is_usage_error() {
    let output = custodia()
        .args(["recon", "run", "--config"])
        .arg(fixtures().join("firms.toml"))
        .args(["--data-dir", "/nonexistent/custodia-data"])
        .args(["--firm", "pcr", "--client", "C100", "--date", "2024-03-28"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 2);
}

// ===========================================================================
// custodia recon validate
// ===========================================================================

#[test]
fn validate_fixture_config() {
    let output = custodia()
        .args(["recon", "validate", "--config"])
        .arg(fixtures().join("firms.toml"))
        .output()
        .unwrap();
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    let err = stderr(&output);
    assert!(err.contains("config ok: 3 firm(s), 2 custodian(s)"));
    assert!(err.contains("cash_threshold"));
}

#[test]
fn validate_rejects_unknown_custodian() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firms.toml");
    std::fs::write(&path, "[firms.x]\ncustodians = [\"ghost\"]\n").unwrap();

    let output = custodia()
        .args(["recon", "validate", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(code(&output), 3, "stderr: {}", stderr(&output));
}
