//! Integration tests for the sl CLI

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// main.js imports a.js and b.js, both of which import lib/shared.js.
fn project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write(
        root,
        "main.js",
        "// @import ./a.js\n// @import ./b.js\n// @import environments=background ./worker.js\n\
         // @namespace app\n// @code constants=SL_DIRECTORY\nmain {{SL_DIRECTORY}}\n// @end\n",
    );
    write(root, "a.js", "// @import ./lib/shared.js\n// @code\na\n// @end\n");
    write(root, "b.js", "// @import ./lib/shared.js\n// @code\nb\n// @end\n");
    write(root, "lib/shared.js", "// @code\nshared\n// @end\n");
    write(root, "worker.js", "// @code\nworker\n// @end\n");
    temp_dir
}

fn sl(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sl").unwrap();
    cmd.arg("-q").arg("-C").arg(dir);
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("sl").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("dependency tree"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("sl").unwrap();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_verbose_logs_go_to_stderr() {
    let temp_dir = project();
    let mut cmd = Command::cargo_bin("sl").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("-vv")
        .arg("-C")
        .arg(temp_dir.path())
        .args(["run", "main.js"]);
    cmd.assert()
        .success()
        .stdout("shared\na\nb\nmain /\n")
        .stderr(predicate::str::contains("main.js"));
}

#[test]
fn test_quiet_suppresses_progress() {
    let temp_dir = project();
    sl(temp_dir.path())
        .env_remove("RUST_LOG")
        .args(["run", "main.js"])
        .assert()
        .success()
        .stderr("");
}

#[test]
fn test_run_foreground() {
    let temp_dir = project();
    sl(temp_dir.path())
        .args(["run", "main.js"])
        .assert()
        .success()
        .stdout("shared\na\nb\nmain /\n");
}

#[test]
fn test_run_background() {
    let temp_dir = project();
    sl(temp_dir.path())
        .args(["run", "main.js", "--env", "worker"])
        .assert()
        .success()
        .stdout("shared\na\nb\nworker\nmain /\n");
}

#[test]
fn test_config_file_sets_environment() {
    let temp_dir = project();
    write(temp_dir.path(), "sl.toml", "[loader]\nenvironment = \"worker\"\n");
    sl(temp_dir.path())
        .args(["run", "main.js"])
        .assert()
        .success()
        .stdout(predicate::str::contains("worker"));
}

#[test]
fn test_root_option() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "app/entry.js", "// @import ./dep.js\n// @code\nentry\n// @end\n");
    write(temp_dir.path(), "app/dep.js", "// @code\ndep\n// @end\n");
    sl(temp_dir.path())
        .args(["run", "entry.js", "--root", "app", "--no-cache-bust"])
        .assert()
        .success()
        .stdout("dep\nentry\n");
}

#[test]
fn test_export_to_file() {
    let temp_dir = project();
    sl(temp_dir.path())
        .args(["export", "main.js", "-o", "dist/bundle.js"])
        .assert()
        .success();

    let bundle = fs::read_to_string(temp_dir.path().join("dist/bundle.js")).unwrap();
    assert!(bundle.starts_with("SL={};SL.ENVIRONMENT=\"foreground\";SL.GLOBAL=window;\n"));
    assert!(bundle.contains("var app={};"));
    assert_eq!(bundle.matches("/* /lib/shared.js */").count(), 1);
    assert!(bundle.find("shared").unwrap() < bundle.find("/* /main.js */").unwrap());
}

#[test]
fn test_tree_text_and_json() {
    let temp_dir = project();
    sl(temp_dir.path())
        .args(["tree", "main.js"])
        .assert()
        .success()
        .stdout("/main.js\n  /a.js\n    /lib/shared.js\n  /b.js\n");

    let output = sl(temp_dir.path())
        .args(["tree", "main.js", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let tree: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(tree["key"], "/main.js");
    assert_eq!(tree["children"][0]["children"][0]["key"], "/lib/shared.js");
}

#[test]
fn test_missing_import_fails() {
    let temp_dir = project();
    write(temp_dir.path(), "b.js", "// @import ./missing.js\n// @code\nb\n// @end\n");
    sl(temp_dir.path())
        .args(["run", "main.js"])
        .assert()
        .failure()
        .stdout("")
        .stderr(predicate::str::contains("failed to load unit /missing.js"));
}

#[test]
fn test_missing_entry_is_invalid_input() {
    let temp_dir = project();
    sl(temp_dir.path())
        .args(["run", "nope.js"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input path does not exist"));
}
