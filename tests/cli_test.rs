//! CLI integration tests for the json-magic binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("json-magic"))
}

fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn write_api(dir: &TempDir) -> std::path::PathBuf {
    write_temp_file(
        dir,
        "pet.json",
        r#"{
            "Pet": { "type": "object", "properties": { "name": { "type": "string" } } },
            "Unused": { "type": "integer" }
        }"#,
    );
    write_temp_file(
        dir,
        "openapi.json",
        r#"{
            "openapi": "3.1.0",
            "paths": {
                "/pets": { "get": { "schema": { "$ref": "./pet.json#/Pet" } } }
            }
        }"#,
    )
}

mod bundle_command {
    use super::*;

    #[test]
    fn hoists_local_files() {
        let dir = TempDir::new().unwrap();
        let api = write_api(&dir);

        cmd()
            .args(["bundle", api.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r##""$ref":"#/x-ext/"##))
            .stdout(predicate::str::contains(r#""Unused""#))
            .stdout(predicate::str::contains("./pet.json").not());
    }

    #[test]
    fn url_map_lists_sources() {
        let dir = TempDir::new().unwrap();
        let api = write_api(&dir);

        cmd()
            .args(["bundle", api.to_str().unwrap(), "--url-map"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""x-ext-urls""#))
            .stdout(predicate::str::contains("pet.json"));
    }

    #[test]
    fn tree_shake_drops_unreferenced_definitions() {
        let dir = TempDir::new().unwrap();
        let api = write_api(&dir);

        cmd()
            .args(["bundle", api.to_str().unwrap(), "--tree-shake"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""Pet""#))
            .stdout(predicate::str::contains(r#""Unused""#).not());
    }

    #[test]
    fn inline_removes_refs() {
        let dir = TempDir::new().unwrap();
        let api = write_api(&dir);

        cmd()
            .args(["bundle", api.to_str().unwrap(), "--inline"])
            .assert()
            .success()
            .stdout(predicate::str::contains("$ref").not())
            .stdout(predicate::str::contains(
                r#""schema":{"type":"object","properties":{"name":{"type":"string"}}}"#,
            ));
    }

    #[test]
    fn yaml_sources_bundle_to_json() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "user.yaml", "User:\n  type: object\n");
        let api = write_temp_file(
            &dir,
            "openapi.yaml",
            "openapi: 3.1.0\nschema:\n  $ref: ./user.yaml#/User\n",
        );

        cmd()
            .args(["bundle", api.to_str().unwrap(), "--inline"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""schema":{"type":"object"}"#));
    }

    #[test]
    fn unresolved_reference_fails_after_output() {
        let dir = TempDir::new().unwrap();
        let api = write_temp_file(
            &dir,
            "openapi.json",
            r#"{ "schema": { "$ref": "./missing.json#/User" } }"#,
        );

        cmd()
            .args(["bundle", api.to_str().unwrap()])
            .assert()
            .failure()
            .code(2)
            .stdout(predicate::str::contains("./missing.json#/User"))
            .stderr(predicate::str::contains("failed to resolve"));
    }

    #[test]
    fn missing_source_exits_3() {
        cmd()
            .args(["bundle", "/nonexistent/openapi.json"])
            .assert()
            .failure()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn writes_output_file() {
        let dir = TempDir::new().unwrap();
        let api = write_api(&dir);
        let out = dir.path().join("bundled.json");

        cmd()
            .args([
                "bundle",
                api.to_str().unwrap(),
                "--output",
                out.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert!(written["x-ext"].is_object());
    }
}

mod diff_command {
    use super::*;

    #[test]
    fn prints_differences() {
        let dir = TempDir::new().unwrap();
        let base = write_temp_file(&dir, "base.json", r#"{"a":1,"b":2}"#);
        let updated = write_temp_file(&dir, "updated.json", r#"{"a":2}"#);

        cmd()
            .args(["diff", base.to_str().unwrap(), updated.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#"[{"path":["a"],"type":"update","changes":2},{"path":["b"],"type":"delete","changes":2}]"#,
            ));
    }

    #[test]
    fn identical_documents_have_no_differences() {
        let dir = TempDir::new().unwrap();
        let base = write_temp_file(&dir, "base.json", r#"{"a":1}"#);
        let updated = write_temp_file(&dir, "updated.yaml", "a: 1\n");

        cmd()
            .args(["diff", base.to_str().unwrap(), updated.to_str().unwrap()])
            .assert()
            .success()
            .stdout("[]\n");
    }

    #[test]
    fn pretty_output() {
        let dir = TempDir::new().unwrap();
        let base = write_temp_file(&dir, "base.json", r#"{"a":1}"#);
        let updated = write_temp_file(&dir, "updated.json", r#"{"a":1,"b":true}"#);

        cmd()
            .args([
                "diff",
                base.to_str().unwrap(),
                updated.to_str().unwrap(),
                "--pretty",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("[\n  {\n"));
    }

    #[test]
    fn unparsable_input_exits_2() {
        let dir = TempDir::new().unwrap();
        let base = write_temp_file(&dir, "base.json", "just a string");
        let updated = write_temp_file(&dir, "updated.json", "{}");

        cmd()
            .args(["diff", base.to_str().unwrap(), updated.to_str().unwrap()])
            .assert()
            .failure()
            .code(2);
    }
}

mod apply_command {
    use super::*;

    #[test]
    fn applies_differences() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{"a":1,"items":[1,2,3]}"#);
        let diffs = write_temp_file(
            &dir,
            "diffs.json",
            r#"[
                {"path":["a"],"type":"update","changes":5},
                {"path":["items","1"],"type":"delete"}
            ]"#,
        );

        cmd()
            .args(["apply", doc.to_str().unwrap(), diffs.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"a":5,"items":[1,3]}"#));
    }

    #[test]
    fn invalid_changes_exit_1() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{"a":1}"#);
        let diffs = write_temp_file(
            &dir,
            "diffs.json",
            r#"[{"path":["missing","b"],"type":"add","changes":1}]"#,
        );

        cmd()
            .args(["apply", doc.to_str().unwrap(), diffs.to_str().unwrap()])
            .assert()
            .failure()
            .code(1)
            .stderr(predicate::str::contains("invalid changes detected"));
    }

    #[test]
    fn diffs_must_be_an_array() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{"a":1}"#);
        let diffs = write_temp_file(&dir, "diffs.json", r#"{"path":["a"]}"#);

        cmd()
            .args(["apply", doc.to_str().unwrap(), diffs.to_str().unwrap()])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("must be an array, got object"));
    }

    #[test]
    fn malformed_difference_exits_2() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{"a":1}"#);
        let diffs = write_temp_file(&dir, "diffs.json", r#"[{"path":["a"],"type":"rename"}]"#);

        cmd()
            .args(["apply", doc.to_str().unwrap(), diffs.to_str().unwrap()])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn round_trips_with_diff() {
        let dir = TempDir::new().unwrap();
        let base = write_temp_file(&dir, "base.json", r#"{"info":{"title":"v1"},"tags":["a"]}"#);
        let updated = write_temp_file(
            &dir,
            "updated.json",
            r#"{"info":{"title":"v2","version":"2"},"tags":["a","b"]}"#,
        );

        let output = cmd()
            .args(["diff", base.to_str().unwrap(), updated.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(output.status.success());
        let diffs = dir.path().join("diffs.json");
        fs::write(&diffs, &output.stdout).unwrap();

        cmd()
            .args(["apply", base.to_str().unwrap(), diffs.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#"{"info":{"title":"v2","version":"2"},"tags":["a","b"]}"#,
            ));
    }
}

#[test]
fn help_lists_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bundle"))
        .stdout(predicate::str::contains("diff"))
        .stdout(predicate::str::contains("apply"));
}
