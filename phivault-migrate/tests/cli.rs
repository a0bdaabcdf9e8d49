//! End-to-end runs of the command-line tools against a JSON record store.

use std::path::Path;
use std::process::{Command, Output};

use phivault_migrate::{Dataset, JsonFileRecordStore, RecordStore};

const DATA: &str = r#"{
  "models": {
    "Contact": {
      "columns": ["email", "phone", "email_encrypted", "email_hash", "phone_encrypted"],
      "records": [
        {"pk": "1", "email": "jane@example.com", "phone": "555-0100"},
        {"pk": "2", "email": "john@example.com", "phone": null},
        {"pk": "3", "email": null, "phone": "555-0199"}
      ]
    },
    "Trip": {
      "columns": ["notes", "notes_encrypted"],
      "records": [{"pk": "t1", "notes": "ICU bed"}]
    }
  }
}"#;

fn tool(name: &str) -> Command {
    let exe = match name {
        "encrypt-existing-data" => env!("CARGO_BIN_EXE_encrypt-existing-data"),
        _ => env!("CARGO_BIN_EXE_keyvault"),
    };
    let mut cmd = Command::new(exe);
    cmd.env_clear()
        .env("PHIVAULT_ENV", "development")
        .env("PHIVAULT_KEY_VAULT", "development")
        .env("PHIVAULT_SEARCH_SALT", "cli-test-salt")
        .env("RUST_LOG", "off");
    cmd
}

fn migrate(data: &Path, args: &[&str]) -> Output {
    tool("encrypt-existing-data")
        .arg("--data")
        .arg(data)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn dataset(path: &Path) -> Dataset {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn seed(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("records.json");
    std::fs::write(&path, DATA).unwrap();
    path
}

#[test]
fn scope_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let data = seed(dir.path());
    let out = migrate(&data, &[]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn unknown_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let data = seed(dir.path());
    let out = migrate(&data, &["--model", "Invoice"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Invoice"));
}

#[test]
fn migrate_all_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    let data = seed(dir.path());

    let out = migrate(&data, &["--all-models", "--batch-size", "2"]);
    assert!(out.status.success(), "{}", stdout(&out));
    let text = stdout(&out);
    assert!(text.contains("Successfully encrypted: 4"));
    assert!(text.contains("Errors: 0"));

    let store = JsonFileRecordStore::open(&data).unwrap();
    let sealed = store.get_field("Contact", "1", "email_encrypted").unwrap().unwrap();
    assert!(!sealed.contains("jane"));
    assert_eq!(store.get_field("Contact", "1", "email_hash").unwrap().unwrap().len(), 64);

    let out = migrate(&data, &["--verify-only"]);
    assert!(out.status.success(), "{}", stdout(&out));
    assert!(stdout(&out).contains("Total fields verified: 5"));

    // Second run: everything is already encrypted.
    let out = migrate(&data, &["--all-models"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Successfully encrypted: 0"));
}

#[test]
fn dry_run_leaves_file_identical() {
    let dir = tempfile::tempdir().unwrap();
    let data = seed(dir.path());
    let before = std::fs::read(&data).unwrap();

    let out = migrate(&data, &["--model", "Contact", "--dry-run"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Would encrypt: Contact 1.email"));
    assert_eq!(std::fs::read(&data).unwrap(), before);
}

#[test]
fn verify_reports_one_corrupted_value() {
    let dir = tempfile::tempdir().unwrap();
    let data = seed(dir.path());
    assert!(migrate(&data, &["--all-models"]).status.success());

    let mut ds = dataset(&data);
    let record = &mut ds.models.get_mut("Contact").unwrap().records[0];
    let sealed = record.fields["phone_encrypted"].clone().unwrap();
    record
        .fields
        .insert("phone_encrypted".into(), Some(format!("x{}", &sealed[1..])));
    std::fs::write(&data, serde_json::to_string(&ds).unwrap()).unwrap();

    let out = migrate(&data, &["--verify-only"]);
    assert_eq!(out.status.code(), Some(1));
    let text = stdout(&out);
    assert!(text.contains("Total errors: 1"));
    assert_eq!(text.matches("decryption failed for").count(), 1);
    assert!(!text.contains("555-0100"));
}

#[test]
fn backup_before_migration() {
    let dir = tempfile::tempdir().unwrap();
    let data = seed(dir.path());
    let backup = dir.path().join("backup.json");

    let out = migrate(
        &data,
        &["--model", "Trip", "--backup-path", backup.to_str().unwrap()],
    );
    assert!(out.status.success());
    assert!(stdout(&out).contains("Backup created: 4 records"));

    let raw = std::fs::read_to_string(&backup).unwrap();
    assert!(!raw.contains("ICU bed"));
    assert!(raw.contains("\"Contact\""));
}

#[test]
fn keyvault_self_test_and_hash() {
    let out = tool("keyvault").arg("self-test").output().unwrap();
    assert!(out.status.success(), "{}", stdout(&out));
    assert!(!stdout(&out).contains("FAIL"));

    let a = tool("keyvault").args(["hash", "Jane@Example.com"]).output().unwrap();
    let b = tool("keyvault").args(["hash", "jane@example.com"]).output().unwrap();
    assert!(a.status.success());
    assert_eq!(stdout(&a), stdout(&b));
    assert_eq!(stdout(&a).trim().len(), 64);
}

#[test]
fn keyvault_health_and_list() {
    let out = tool("keyvault").arg("health").output().unwrap();
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["vault_type"], "development");

    let out = tool("keyvault").arg("list").output().unwrap();
    assert!(out.status.success());
    let keys: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(keys.get("default").is_some());
}
