use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const PROJECT: &str = r#"<?xml version="1.0" encoding="iso-8859-1"?>

<project>
    <fileVersion>3</fileVersion>
    <configuration>
        <name>Debug</name>
    </configuration>
    <configuration>
        <name>Release</name>
    </configuration>
    <file>
        <name>$PROJ_DIR$\main.c</name>
    </file>
    <file>
        <name>$PROJ_DIR$\test\unit.c</name>
        <excluded>
            <configuration>Release</configuration>
        </excluded>
    </file>
</project>
"#;

fn write_project(dir: &Path) -> std::io::Result<std::path::PathBuf> {
    let path = dir.join("app.ewp");
    fs::write(&path, PROJECT)?;
    Ok(path)
}

#[test]
fn list_prints_paths_and_exclusions() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let project = write_project(dir.path())?;

    Command::cargo_bin("ewptool-cli")?
        .args(["list", project.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("$PROJ_DIR$\\main.c\n"))
        .stdout(predicate::str::contains(
            "$PROJ_DIR$\\test\\unit.c (excluded: Release)",
        ));

    Ok(())
}

#[test]
fn add_inserts_sorted_and_preserves_configurations() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let project = write_project(dir.path())?;

    Command::cargo_bin("ewptool-cli")?
        .args([
            "add",
            project.to_str().unwrap(),
            "drivers/uart.c",
            "--exclude",
            "Debug",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added $PROJ_DIR$\\drivers\\uart.c"));

    let saved = fs::read_to_string(&project)?;
    let uart = saved.find("drivers\\uart.c").unwrap();
    let main = saved.find("main.c").unwrap();
    assert!(uart < main);
    assert!(saved.contains("<configuration>\n        <name>Debug</name>\n    </configuration>"));
    assert!(saved.starts_with("<?xml version=\"1.0\" encoding=\"iso-8859-1\"?>"));

    Ok(())
}

#[test]
fn add_skips_files_already_present() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let project = write_project(dir.path())?;
    let before = fs::read(&project)?;

    Command::cargo_bin("ewptool-cli")?
        .args(["add", project.to_str().unwrap(), "main.c"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already part of"));

    assert_eq!(fs::read(&project)?, before);
    Ok(())
}

#[test]
fn contains_reports_through_exit_code() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let project = write_project(dir.path())?;

    Command::cargo_bin("ewptool-cli")?
        .args(["contains", project.to_str().unwrap(), "test/unit.c"])
        .assert()
        .success()
        .stdout("yes\n");

    Command::cargo_bin("ewptool-cli")?
        .args(["contains", project.to_str().unwrap(), "missing.c"])
        .assert()
        .code(1)
        .stdout("no\n");

    Ok(())
}

#[test]
fn format_writes_tab_indented_copy() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let project = write_project(dir.path())?;
    let output = dir.path().join("formatted.ewp");

    Command::cargo_bin("ewptool-cli")?
        .args([
            "format",
            project.to_str().unwrap(),
            "--tabs",
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let formatted = fs::read_to_string(&output)?;
    assert!(formatted.contains("\n\t<fileVersion>3</fileVersion>"));
    assert_eq!(fs::read_to_string(&project)?, PROJECT);
    Ok(())
}

#[test]
fn invalid_project_fails_with_context() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let project = dir.path().join("broken.ewp");
    fs::write(&project, "<workspace></workspace>")?;

    Command::cargo_bin("ewptool-cli")?
        .args(["list", project.to_str().unwrap()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to load"))
        .stderr(predicate::str::contains("expected <project> root element"));

    Ok(())
}
