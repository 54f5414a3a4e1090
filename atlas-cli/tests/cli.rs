use assert_cmd::Command;
use predicates::prelude::*;

fn atlas() -> Command {
    Command::cargo_bin("atlas").unwrap()
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/lib.rs"),
        "pub struct User { id: u64 }\n\npub fn load_user(id: u64) -> User {\n    make(id)\n}\n\nfn make(id: u64) -> User {\n    User { id }\n}\n",
    )
    .unwrap();
    dir
}

#[test]
fn help_lists_commands() {
    atlas()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ingest"))
        .stdout(predicate::str::contains("context"));
}

#[test]
fn ingest_then_query() {
    let dir = project();
    let path = dir.path().to_str().unwrap();

    let output = atlas()
        .args(["ingest", "--no-progress", "--path", path])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["entities_created"], 3);
    assert_eq!(report["files_with_errors"], 0);

    atlas()
        .args(["query", "--path", path, "--pattern", "load_user"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"strategy\": \"metadata\""))
        .stdout(predicate::str::contains("load_user"));

    atlas()
        .args([
            "query",
            "--path",
            path,
            "--predicate",
            r#"{"cmp":{"field":"signature","op":"contains","value":"-> User"}}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"strategy\": \"signature\""));

    atlas()
        .args(["status", "--path", path])
        .assert()
        .success()
        .stdout(predicate::str::contains("generations"));
}

#[test]
fn rejected_field_exits_with_query_code() {
    let dir = project();
    let path = dir.path().to_str().unwrap();
    atlas()
        .args(["ingest", "--no-progress", "--path", path])
        .assert()
        .success();
    atlas()
        .args([
            "query",
            "--path",
            path,
            "--strategy",
            "metadata",
            "--predicate",
            r#"{"cmp":{"field":"body","op":"contains","value":"make"}}"#,
        ])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("body"));
}

#[test]
fn status_without_index_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    atlas()
        .args(["status", "--path", dir.path().to_str().unwrap()])
        .assert()
        .code(3);
}
