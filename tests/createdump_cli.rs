#![cfg(any(target_os = "linux", target_os = "android"))]

use {common::*, std::process::Command};

mod common;

fn createdump() -> Command {
    Command::new(env!("CARGO_BIN_EXE_createdump"))
}

#[test]
fn dumps_and_reports() {
    let child = start_child_and_wait_for_threads(2);
    let pid = child.id();
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("dump.%p.%e");

    let output = createdump()
        .arg(pid.to_string())
        .args(["--format", "minidump", "--triage", "--crashreport", "-f"])
        .arg(&template)
        .output()
        .expect("failed to run createdump");
    kill_child(child);

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let dump_path = dir.path().join(format!("dump.{pid}.test"));
    assert!(minidump::Minidump::read_path(&dump_path).is_ok());

    let report = std::fs::read(dir.path().join(format!("dump.{pid}.test.crashreport.json")))
        .expect("no crash report");
    let report: serde_json::Value = serde_json::from_slice(&report).unwrap();
    assert_eq!(report["pid"], pid);
    assert_eq!(report["threads"].as_array().unwrap().len(), 2);
    assert_eq!(report["environment"]["dump_type"], "Triage");
    assert_eq!(report["collection"]["outcome"], "Complete");
}

#[test]
fn report_survives_failed_dump() {
    let child = KillOnDrop(start_child_and_wait_for_threads(1));
    let dir = tempfile::tempdir().unwrap();
    // A directory can't be opened as the dump file
    let dump_path = dir.path().join("taken");
    std::fs::create_dir(&dump_path).unwrap();

    let output = createdump()
        .arg(child.id().to_string())
        .args(["--triage", "--crashreport", "-f"])
        .arg(&dump_path)
        .output()
        .expect("failed to run createdump");
    drop(child);

    assert_eq!(output.status.code(), Some(1), "{output:?}");
    let report = std::fs::read(dir.path().join("taken.crashreport.json"))
        .expect("no crash report after a failed dump");
    let report: serde_json::Value = serde_json::from_slice(&report).unwrap();
    let dump_error = report["collection"]["dump_error"].as_str().unwrap();
    assert!(dump_error.contains("Failed to create"), "{dump_error}");
    assert_eq!(report["threads"].as_array().unwrap().len(), 1);
}

#[test]
fn missing_process_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = createdump()
        .arg(i32::MAX.to_string())
        .arg("-f")
        .arg(dir.path().join("never"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("never").exists());
}

#[test]
fn usage_errors() {
    let status = createdump().arg("--no-such-flag").status().unwrap();
    assert_eq!(status.code(), Some(3));

    let status = createdump().status().unwrap();
    assert_eq!(status.code(), Some(3), "a pid or a name is required");

    let status = createdump()
        .args(["1", "--triage", "--full"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3), "dump levels are exclusive");

    let status = createdump().args(["1", "--format", "pdf"]).status().unwrap();
    assert_eq!(status.code(), Some(3));

    let status = createdump().arg("--help").status().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn bad_template_is_a_usage_error() {
    let child = start_child_and_wait_for_threads(1);
    let status = createdump()
        .arg(child.id().to_string())
        .args(["-f", "/tmp/dump.%q"])
        .status()
        .unwrap();
    kill_child(child);
    assert_eq!(status.code(), Some(3));
}
