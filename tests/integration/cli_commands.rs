#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use sendero::{NewNode, NodeStore, PathConfig, SqliteStore, TreeEngine};
use serde_json::Value;
use tempfile::TempDir;

const CONFIG: &str = r#"
order_by = ["name"]

[encoding]
kind = "label"
width = 2
"#;

fn setup_db(name: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join(format!("{name}.db"));
    let config_path = dir.path().join("sendero.toml");
    fs::write(&config_path, CONFIG).expect("write config");
    seed_places(&db_path).expect("seed places");
    (dir, db_path, config_path)
}

fn open(db_path: &Path) -> sendero::Result<TreeEngine<SqliteStore>> {
    let config = PathConfig::from_toml_str(CONFIG)?;
    let store = SqliteStore::open(db_path, config.encoding.clone())?;
    TreeEngine::new(store, config)
}

fn seed_places(db_path: &Path) -> sendero::Result<()> {
    let mut engine = open(db_path)?;
    let france = engine.insert(NewNode::root().with("name", "France"))?;
    let normandie = engine.insert(NewNode::child_of(france.id).with("name", "Normandie"))?;
    engine.insert(NewNode::child_of(normandie.id).with("name", "Seine-Maritime"))?;
    engine.insert(NewNode::child_of(normandie.id).with("name", "Eure"))?;
    engine.insert(NewNode::root().with("name", "Autriche"))?;
    Ok(())
}

#[test]
fn tree_prints_nodes_in_path_order() {
    let (_dir, db_path, config_path) = setup_db("tree");
    let output = cargo_bin_cmd!("sendero")
        .arg("--database")
        .arg(&db_path)
        .arg("--config")
        .arg(&config_path)
        .arg("tree")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("Autriche [00]"));
    assert!(lines[1].starts_with("France [01]"));
    assert!(lines[2].starts_with("  Normandie [01.00]"));
    assert!(lines[3].starts_with("    Eure [01.00.00]"));
    assert!(lines[4].starts_with("    Seine-Maritime [01.00.01]"));
}

#[test]
fn tree_emits_json_for_a_subtree() {
    let (_dir, db_path, config_path) = setup_db("subtree");
    let output = cargo_bin_cmd!("sendero")
        .args(["--format", "json", "--database"])
        .arg(&db_path)
        .arg("--config")
        .arg(&config_path)
        .args(["tree", "--root", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let rows = json.as_array().expect("array");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["label"], "Normandie");
    assert_eq!(rows[0]["depth"], 2);
    assert_eq!(rows[2]["path"], "01.00.01");
}

#[test]
fn verify_reports_success_as_json() {
    let (_dir, db_path, config_path) = setup_db("verify");
    let output = cargo_bin_cmd!("sendero")
        .args(["--format", "json", "--database"])
        .arg(&db_path)
        .arg("--config")
        .arg(&config_path)
        .arg("verify")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert!(json["success"].as_bool().unwrap_or(false));
    assert_eq!(json["counts"]["nodes"], 5);
    assert_eq!(json["counts"]["max_depth"], 3);
}

#[test]
fn damaged_paths_fail_verify_until_rebuilt() {
    let (_dir, db_path, config_path) = setup_db("repair");
    {
        let mut engine = open(&db_path).expect("open");
        let eure = engine.get(4).expect("eure");
        let france = engine.get(1).expect("france");
        engine
            .store_mut()
            .set_paths(&[(eure.id, None), (3, france.path)])
            .expect("damage");
    }

    cargo_bin_cmd!("sendero")
        .arg("--database")
        .arg(&db_path)
        .arg("--config")
        .arg(&config_path)
        .arg("verify")
        .assert()
        .code(2);

    let output = cargo_bin_cmd!("sendero")
        .args(["--format", "json", "--database"])
        .arg(&db_path)
        .arg("--config")
        .arg(&config_path)
        .arg("rebuild")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["nodes"], 5);
    assert_eq!(json["set_based"], true);

    cargo_bin_cmd!("sendero")
        .arg("--database")
        .arg(&db_path)
        .arg("--config")
        .arg(&config_path)
        .arg("verify")
        .assert()
        .success();
}

#[test]
fn config_prints_the_effective_toml() {
    let (_dir, _db_path, config_path) = setup_db("config");
    let output = cargo_bin_cmd!("sendero")
        .arg("--config")
        .arg(&config_path)
        .arg("config")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let parsed = PathConfig::from_toml_str(&text).expect("round trip");
    assert_eq!(parsed, PathConfig::from_toml_str(CONFIG).expect("config"));
}

#[test]
fn missing_database_is_an_error() {
    cargo_bin_cmd!("sendero")
        .env_remove("SENDERO_DATABASE")
        .arg("verify")
        .assert()
        .failure()
        .code(1);
}
