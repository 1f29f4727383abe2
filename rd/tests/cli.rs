//! Binary-level tests for the `rd` command

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new(tasks_yml: &str) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(temp.path().join("spec")).unwrap();
        fs::write(temp.path().join("spec/tasks.yml"), tasks_yml).unwrap();
        fs::write(temp.path().join("ralphd.yml"), "log-level: INFO\n").unwrap();
        Self { temp }
    }

    fn spec_dir(&self) -> std::path::PathBuf {
        self.temp.path().join("spec")
    }

    fn rd(&self) -> Command {
        let mut cmd = Command::cargo_bin("rd").unwrap();
        cmd.env("XDG_DATA_HOME", self.temp.path().join("data"))
            .env("NO_COLOR", "1")
            .arg("--config")
            .arg(self.temp.path().join("ralphd.yml"));
        cmd
    }

    fn state_json(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.spec_dir().join(".ralphd/state.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

fn task_status<'a>(state: &'a serde_json::Value, id: &str) -> &'a str {
    state["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["id"] == id)
        .and_then(|t| t["status"].as_str())
        .unwrap()
}

fn run(ws: &Workspace, spec_dir: &Path) -> assert_cmd::assert::Assert {
    ws.rd()
        .arg("run")
        .arg(spec_dir)
        .args(["--no-gateway", "--max-attempts", "2"])
        .assert()
}

// =============================================================================
// rd run
// =============================================================================

#[test]
fn test_run_all_tasks_complete_exit_zero() {
    let ws = Workspace::new(
        r#"
tasks:
  - id: setup
    description: create the marker
    command: touch marker
  - id: check
    description: marker exists
    deps: [setup]
    command: test -f marker
"#,
    );

    run(&ws, &ws.spec_dir())
        .success()
        .stdout(predicate::str::contains("2 completed, 0 pending, 0 blocked"));

    let state = ws.state_json();
    assert_eq!(state["completedTaskIds"], serde_json::json!(["setup", "check"]));
    assert!(state["currentTaskId"].is_null());
    assert_eq!(task_status(&state, "check"), "completed");
}

#[test]
fn test_run_blocked_task_exits_one() {
    let ws = Workspace::new(
        r#"
tasks:
  - id: broken
    description: always fails
    command: "echo nope >&2; exit 1"
  - id: after
    description: depends on broken
    deps: [broken]
"#,
    );

    run(&ws, &ws.spec_dir())
        .code(1)
        .stdout(predicate::str::contains("broken after 2 attempt(s)"))
        .stdout(predicate::str::contains("pending"));

    let state = ws.state_json();
    assert_eq!(task_status(&state, "broken"), "blocked");
    assert_eq!(task_status(&state, "after"), "not_started");
    assert_eq!(state["history"]["broken"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_optional_block_exits_zero() {
    let ws = Workspace::new(
        r#"
tasks:
  - id: lint
    description: nice to have
    required: false
    command: "exit 1"
  - id: build
    description: must pass
    command: "true"
"#,
    );

    run(&ws, &ws.spec_dir())
        .success()
        .stdout(predicate::str::contains("skipped"))
        .stdout(predicate::str::contains("1 completed, 0 pending, 0 blocked"));

    let state = ws.state_json();
    assert_eq!(task_status(&state, "lint"), "blocked");
    assert_eq!(task_status(&state, "build"), "completed");
}

#[test]
fn test_run_rejects_cyclic_spec() {
    let ws = Workspace::new(
        r#"
tasks:
  - id: a
    deps: [b]
  - id: b
    deps: [a]
"#,
    );

    run(&ws, &ws.spec_dir())
        .failure()
        .stderr(predicate::str::contains("Cyclic dependency"));
    assert!(!ws.spec_dir().join(".ralphd/state.json").exists());
}

#[test]
fn test_run_missing_spec_dir_fails() {
    let ws = Workspace::new("tasks: []\n");
    run(&ws, &ws.temp.path().join("nope")).failure();
}

// =============================================================================
// rd status
// =============================================================================

#[test]
fn test_status_json_after_run() {
    let ws = Workspace::new(
        r#"
tasks:
  - id: only
    command: "true"
"#,
    );
    run(&ws, &ws.spec_dir()).success();

    let output = ws
        .rd()
        .arg("status")
        .arg(ws.spec_dir())
        .args(["--format", "json", "--history"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["state"]["completedTaskIds"], serde_json::json!(["only"]));
    assert!(json["activity"].as_array().unwrap().is_empty());
}

#[test]
fn test_status_without_state() {
    let ws = Workspace::new("tasks: []\n");
    ws.rd()
        .arg("status")
        .arg(ws.spec_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("No execution state"));
}
