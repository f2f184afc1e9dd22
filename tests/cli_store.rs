use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use serde_json::Value;
use serial_test::serial;
use tempfile::TempDir;

struct CommandOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

fn run_easyoffice(data_dir: &Path, args: &[&str]) -> Result<CommandOutput> {
    let output = Command::new(env!("CARGO_BIN_EXE_easyoffice"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .output()?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

fn slot(data_dir: &Path, key: &str) -> Option<String> {
    fs::read_to_string(data_dir.join(format!("{key}.json"))).ok()
}

fn slot_records(data_dir: &Path, key: &str) -> Vec<Value> {
    let data = slot(data_dir, key).expect("slot file missing");
    serde_json::from_str(&data).expect("slot is not a json sequence")
}

fn add_user(data_dir: &Path, name: &str, email: &str) -> Result<CommandOutput> {
    run_easyoffice(
        data_dir,
        &[
            "users", "add", "--name", name, "--email", email, "--password", "abc123",
        ],
    )
}

#[test]
#[serial]
fn adding_the_first_user_seeds_the_administrator() -> Result<()> {
    let dir = TempDir::new()?;

    let output = add_user(dir.path(), "Ana", "ana@x.com")?;
    assert_eq!(output.exit_code, 0, "add failed: {}", output.stderr);

    let records = slot_records(dir.path(), "users");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["id"], "USR-001");
    assert_eq!(records[1]["id"], "USR-002");
    assert_eq!(records[1]["nome"], "Ana");

    // nothing existed before the first save, so no backup generation yet
    assert!(slot(dir.path(), "users_backup").is_none());

    let count = run_easyoffice(dir.path(), &["users", "count"])?;
    assert_eq!(count.exit_code, 0);
    assert!(count.stdout.contains('2'));
    Ok(())
}

#[test]
#[serial]
fn duplicate_email_is_rejected_with_a_failing_exit_code() -> Result<()> {
    let dir = TempDir::new()?;

    assert_eq!(add_user(dir.path(), "Ana", "ana@x.com")?.exit_code, 0);
    let second = add_user(dir.path(), "Other Ana", "ana@x.com")?;
    assert_eq!(second.exit_code, 1);

    assert_eq!(slot_records(dir.path(), "users").len(), 2);
    Ok(())
}

#[test]
#[serial]
fn corrupting_the_slot_recovers_the_previous_generation() -> Result<()> {
    let dir = TempDir::new()?;

    assert_eq!(add_user(dir.path(), "Ana", "ana@x.com")?.exit_code, 0);
    assert_eq!(add_user(dir.path(), "Bob", "bob@x.com")?.exit_code, 0);

    fs::write(dir.path().join("users.json"), "{not json at all")?;

    let output = run_easyoffice(dir.path(), &["users", "list"])?;
    assert_eq!(output.exit_code, 0, "list failed: {}", output.stderr);

    // the backup held the generation before Bob was added
    let records = slot_records(dir.path(), "users");
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r["email"] == "ana@x.com"));
    assert!(!records.iter().any(|r| r["email"] == "bob@x.com"));
    Ok(())
}

#[test]
#[serial]
fn the_builtin_administrator_cannot_be_removed() -> Result<()> {
    let dir = TempDir::new()?;

    assert_eq!(add_user(dir.path(), "Ana", "ana@x.com")?.exit_code, 0);
    let output = run_easyoffice(dir.path(), &["users", "remove", "USR-001", "--yes"])?;
    assert_eq!(output.exit_code, 1);
    assert_eq!(slot_records(dir.path(), "users").len(), 2);
    Ok(())
}

#[test]
#[serial]
fn doctor_fix_removes_a_duplicated_email() -> Result<()> {
    let dir = TempDir::new()?;
    assert_eq!(add_user(dir.path(), "Ana", "ana@x.com")?.exit_code, 0);

    // inject a second record with Ana's email behind the manager's back
    let mut records = slot_records(dir.path(), "users");
    let mut copy = records[1].clone();
    copy["id"] = Value::String("USR-010".to_string());
    records.push(copy);
    fs::write(
        dir.path().join("users.json"),
        serde_json::to_string(&records)?,
    )?;

    let plain = run_easyoffice(dir.path(), &["doctor"])?;
    assert_eq!(plain.exit_code, 1);

    let fixed = run_easyoffice(dir.path(), &["doctor", "--fix"])?;
    assert_eq!(fixed.exit_code, 0, "doctor --fix failed: {}", fixed.stderr);

    let records = slot_records(dir.path(), "users");
    assert_eq!(
        records.iter().filter(|r| r["email"] == "ana@x.com").count(),
        1
    );
    Ok(())
}

#[test]
#[serial]
fn json_export_has_no_password_field() -> Result<()> {
    let dir = TempDir::new()?;
    assert_eq!(add_user(dir.path(), "Ana", "ana@x.com")?.exit_code, 0);

    let output = run_easyoffice(dir.path(), &["--json", "users", "export"])?;
    assert_eq!(output.exit_code, 0, "export failed: {}", output.stderr);

    let exported: Value = serde_json::from_str(&output.stdout)?;
    let exported = exported.as_array().expect("export is a sequence");
    assert_eq!(exported.len(), 2);
    for record in exported {
        assert!(record.get("senha").is_none());
    }
    Ok(())
}

#[test]
#[serial]
fn recover_apply_adopts_records_from_a_legacy_slot() -> Result<()> {
    let dir = TempDir::new()?;
    assert_eq!(add_user(dir.path(), "Ana", "ana@x.com")?.exit_code, 0);

    fs::write(
        dir.path().join("usuarios.json"),
        r#"[{"id":"USR-050","nome":"Legacy","email":"legacy@x.com","senha":"legacy1","ativo":true,"created_at":1,"updated_at":1}]"#,
    )?;

    let scan = run_easyoffice(dir.path(), &["recover"])?;
    assert_eq!(scan.exit_code, 0);
    assert_eq!(slot_records(dir.path(), "users").len(), 2);

    let apply = run_easyoffice(dir.path(), &["recover", "--apply"])?;
    assert_eq!(apply.exit_code, 0, "recover failed: {}", apply.stderr);

    let records = slot_records(dir.path(), "users");
    assert_eq!(records.len(), 3);
    assert!(records.iter().any(|r| r["email"] == "legacy@x.com"));
    Ok(())
}
