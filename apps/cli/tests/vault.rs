use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn add_switch_and_list_vaults() -> Result<(), Box<dyn Error>> {
    let home = tempdir()?;
    let vault_dir = home.path().join("notes");

    cli(home.path())?
        .args(["vault", "add", "Notes"])
        .arg(&vault_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Added vault 'Notes'"));
    assert!(vault_dir.is_dir());
    assert!(home.path().join(".infinitenotes").join("vaults.json").exists());

    cli(home.path())?
        .args(["vault", "switch", "Notes"])
        .assert()
        .success();

    cli(home.path())?
        .args(["vault", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* Notes"));
    Ok(())
}

#[test]
fn file_commands_round_trip_through_the_vault() -> Result<(), Box<dyn Error>> {
    let home = tempdir()?;
    let vault_dir = home.path().join("notes");
    cli(home.path())?
        .args(["vault", "add", "Notes", "--switch"])
        .arg(&vault_dir)
        .assert()
        .success();

    cli(home.path())?
        .args(["new-folder", "projects"])
        .assert()
        .success();
    cli(home.path())?
        .args(["new-file", "Plan", "--parent", "projects"])
        .assert()
        .success()
        .stdout(predicate::str::contains("projects/Plan.md"));
    assert_eq!(
        fs::read_to_string(vault_dir.join("projects").join("Plan.md"))?,
        "# Plan\n\n"
    );

    cli(home.path())?
        .args(["write", "projects/Plan.md", "--content", "ship it"])
        .assert()
        .success();
    cli(home.path())?
        .args(["copy", "projects/Plan.md", "Plan backup"])
        .assert()
        .success();
    cli(home.path())?
        .args(["rename", "projects", "archive"])
        .assert()
        .success();

    let archived = vault_dir.join("archive");
    assert_eq!(fs::read_to_string(archived.join("Plan.md"))?, "ship it");
    assert_eq!(fs::read_to_string(archived.join("Plan backup.md"))?, "ship it");

    cli(home.path())?
        .arg("tree")
        .assert()
        .success()
        .stdout(predicate::str::contains("archive/"))
        .stdout(predicate::str::contains("Plan.md [note]"));

    cli(home.path())?
        .args(["delete", "archive/Plan backup.md"])
        .assert()
        .success();
    assert!(!archived.join("Plan backup.md").exists());
    Ok(())
}

#[test]
fn collisions_and_folder_copies_are_reported() -> Result<(), Box<dyn Error>> {
    let home = tempdir()?;
    let vault_dir = home.path().join("notes");
    fs::create_dir_all(vault_dir.join("docs"))?;
    fs::write(vault_dir.join("a.md"), "alpha")?;
    fs::write(vault_dir.join("b.md"), "bravo")?;
    cli(home.path())?
        .args(["vault", "add", "Notes", "--switch"])
        .arg(&vault_dir)
        .assert()
        .success();

    cli(home.path())?
        .args(["rename", "a.md", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    cli(home.path())?
        .args(["copy", "docs", "docs2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not supported"));
    assert_eq!(fs::read_to_string(vault_dir.join("a.md"))?, "alpha");
    Ok(())
}

#[test]
fn commands_need_an_open_vault() -> Result<(), Box<dyn Error>> {
    let home = tempdir()?;
    cli(home.path())?
        .arg("tree")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no vault is open"));
    Ok(())
}

fn cli(home: &Path) -> Result<Command, Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("infinitenotes-cli")?;
    cmd.current_dir(home).arg("--home").arg(home);
    Ok(cmd)
}
