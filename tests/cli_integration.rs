//! CLI integration tests.
//!
//! These tests run the `refcoord` binary against a directory-backed
//! coordination service in a temp dir. Each invocation is a separate
//! process, so state only survives through the shared directory.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const C: &str = "cccccccccccccccccccccccccccccccccccccccc";

/// Test environment: an isolated home plus a config pointing at a store dir.
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("home")).unwrap();
        let config = format!(
            "[coordinator]\nconnect = \"fs:{}\"\ntransaction_lock_timeout_ms = 200\n",
            dir.path().join("store").display()
        );
        std::fs::write(dir.path().join("config.toml"), config).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A command using this environment's config file.
    fn cmd(&self) -> Command {
        let mut cmd = self.bare();
        cmd.arg("--config").arg(self.path().join("config.toml"));
        cmd
    }

    /// A command with no config file anywhere in its search path.
    fn bare(&self) -> Command {
        let mut cmd = Command::cargo_bin("refcoord").unwrap();
        cmd.current_dir(self.path())
            .env_remove("REFCOORD_CONFIG")
            .env_remove("RUST_LOG")
            .env("HOME", self.path().join("home"))
            .env("XDG_CONFIG_HOME", self.path().join("home/.config"));
        cmd
    }
}

// =========================================================================
// Refs
// =========================================================================

#[test]
fn create_update_and_reject_stale() {
    let env = TestEnv::new();

    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--new", A])
        .assert()
        .success()
        .stdout(predicate::str::contains("refs/heads/main updated to"));

    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--expected", A, "--new", B])
        .assert()
        .success();

    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--expected", A, "--new", C])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("was not updated"));

    env.cmd()
        .args(["get", "proj1", "refs/heads/main", "--type", "oid"])
        .assert()
        .success()
        .stdout(predicate::str::contains(B));
}

#[test]
fn check_reports_staleness_through_exit_code() {
    let env = TestEnv::new();

    // Never written: up to date
    env.cmd()
        .args(["check", "proj1", "refs/heads/main", A])
        .assert()
        .success()
        .stdout(predicate::str::contains("is up to date"));

    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--new", A])
        .assert()
        .success();

    env.cmd()
        .args(["check", "proj1", "refs/heads/main", A])
        .assert()
        .success();
    env.cmd()
        .args(["check", "proj1", "refs/heads/main", B])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("is out of date"));
}

#[test]
fn exists_and_delete() {
    let env = TestEnv::new();

    env.cmd()
        .args(["exists", "proj1", "refs/heads/main"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("does not exist"));

    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--new", A])
        .assert()
        .success();
    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--expected", A, "--delete"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tombstone"));

    // Deleted refs keep their path
    env.cmd()
        .args(["exists", "proj1", "refs/heads/main"])
        .assert()
        .success();
    env.cmd()
        .args(["check", "proj1", "refs/heads/main"])
        .assert()
        .success();
}

#[test]
fn remove_project() {
    let env = TestEnv::new();
    for name in ["refs/heads/main", "refs/heads/dev"] {
        env.cmd()
            .args(["cas", "proj1", name, "--new", A])
            .assert()
            .success();
    }

    env.cmd()
        .args(["remove", "proj1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed shared refs of proj1"));

    for name in ["refs/heads/main", "refs/heads/dev"] {
        env.cmd().args(["exists", "proj1", name]).assert().code(1);
    }
}

#[test]
fn invalid_object_id_is_an_error() {
    let env = TestEnv::new();
    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--new", "not-hex"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid object id 'not-hex'"));
}

#[test]
fn invalid_ref_name_is_an_error() {
    let env = TestEnv::new();
    env.cmd()
        .args(["exists", "proj1", "refs/heads/main.lock"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid ref name"));
}

#[test]
fn cas_requires_new_or_delete() {
    let env = TestEnv::new();
    env.cmd()
        .args(["cas", "proj1", "refs/heads/main"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--new"));
}

// =========================================================================
// Typed values
// =========================================================================

#[test]
fn counter_put_and_get() {
    let env = TestEnv::new();

    env.cmd()
        .args(["put", "proj1", "counter", "1", "--type", "int"])
        .assert()
        .success();
    env.cmd()
        .args(["put", "proj1", "counter", "2", "--expected", "1", "--type", "int"])
        .assert()
        .success();
    env.cmd()
        .args(["put", "proj1", "counter", "3", "--expected", "1", "--type", "int"])
        .assert()
        .code(1);

    env.cmd()
        .args(["get", "proj1", "counter", "--type", "int"])
        .assert()
        .success()
        .stdout(predicate::str::diff("2\n"));
}

#[test]
fn get_missing_key() {
    let env = TestEnv::new();
    env.cmd()
        .args(["get", "proj1", "nothing"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("is not set"));
}

#[test]
fn put_rejects_value_of_wrong_type() {
    let env = TestEnv::new();
    env.cmd()
        .args(["put", "proj1", "counter", "twelve", "--type", "long"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid value"));
}

#[test]
fn get_reports_undecodable_value() {
    let env = TestEnv::new();
    env.cmd()
        .args(["put", "proj1", "label", "hello"])
        .assert()
        .success();
    env.cmd()
        .args(["get", "proj1", "label", "--type", "long"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot decode"));
}

#[test]
fn json_output() {
    let env = TestEnv::new();
    let output = env
        .cmd()
        .args(["--json", "put", "proj1", "counter", "5", "--type", "long"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["details"]["kind"], "int64");
    assert_eq!(report["details"]["value"], 5);
    assert_eq!(report["details"]["updated"], true);
}

#[test]
fn quiet_suppresses_message_but_keeps_exit_code() {
    let env = TestEnv::new();
    env.cmd()
        .args(["-q", "exists", "proj1", "refs/heads/main"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());
}

// =========================================================================
// Locks
// =========================================================================

#[test]
fn lock_probe_reports_free() {
    let env = TestEnv::new();
    env.cmd()
        .args(["lock", "proj1", "refs/heads/main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Lock on refs/heads/main is free"));
}

#[cfg(unix)]
#[test]
fn lock_runs_command_and_reports_status() {
    let env = TestEnv::new();
    env.cmd()
        .args(["lock", "proj1", "refs/heads/main", "--", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Released lock on refs/heads/main"));

    env.cmd()
        .args(["lock", "proj1", "refs/heads/main", "--", "false"])
        .assert()
        .code(1);
}

#[cfg(unix)]
#[test]
fn lock_held_by_other_process_times_out() {
    let env = TestEnv::new();
    let config = env.path().join("config.toml");
    let exe = assert_cmd::cargo::cargo_bin("refcoord");

    // Outer process holds the lock while the inner one probes it.
    env.cmd()
        .args(["lock", "proj1", "refs/heads/main", "--"])
        .arg(&exe)
        .arg("--config")
        .arg(&config)
        .args(["lock", "proj1", "refs/heads/main", "--timeout-ms", "50"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unable to verify or lock refs/heads/main"));
}

// =========================================================================
// Config and completion
// =========================================================================

#[test]
fn config_show_fills_defaults() {
    let env = TestEnv::new();
    env.cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("transaction_lock_timeout_ms = 200"))
        .stdout(predicate::str::contains("root_node = \"refcoord/multi-site\""))
        .stdout(predicate::str::contains("max_retries = 3"));
}

#[test]
fn config_path_without_file() {
    let env = TestEnv::new();
    env.bare()
        .args(["config", "path"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("No configuration file found"));
}

#[test]
fn config_init_writes_and_refuses_overwrite() {
    let env = TestEnv::new();
    let target = env.path().join("written.toml");

    env.bare()
        .args(["--connect", "memory:", "config", "init", "--path"])
        .arg(&target)
        .assert()
        .success();
    let written = std::fs::read_to_string(&target).unwrap();
    assert!(written.contains("connect = \"memory:\""));

    env.bare()
        .args(["config", "init", "--path"])
        .arg(&target)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn config_from_environment_variable() {
    let env = TestEnv::new();
    env.bare()
        .env("REFCOORD_CONFIG", env.path().join("config.toml"))
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn invalid_config_is_rejected() {
    let env = TestEnv::new();
    let bad = env.path().join("bad.toml");
    std::fs::write(&bad, "[coordinator]\nconnect = \"zookeeper:host\"\n").unwrap();
    env.bare()
        .arg("--config")
        .arg(&bad)
        .args(["exists", "proj1", "refs/heads/main"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported endpoint"));
}

#[test]
fn connect_override_wins_over_config() {
    let env = TestEnv::new();
    env.cmd()
        .args(["cas", "proj1", "refs/heads/main", "--new", A])
        .assert()
        .success();

    // A fresh in-process service has never seen the ref.
    env.cmd()
        .args(["--connect", "memory:", "exists", "proj1", "refs/heads/main"])
        .assert()
        .code(1);
}

#[test]
fn completion_bash() {
    let env = TestEnv::new();
    env.bare()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("refcoord"));
}

#[test]
fn version_flag_works() {
    Command::cargo_bin("refcoord")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("refcoord"));
}
