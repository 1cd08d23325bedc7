//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn isolated_command(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("KILN_CONFIG_PATH")
        .env_remove("ONLINELABS_API_TOKEN")
        .env_remove("ONLINELABS_IMAGE_ID")
        .env_remove("ONLINELABS_ORGANIZATION_ID");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("destroy-image"));
}

#[test]
fn build_without_credentials_fails_with_guidance() {
    let home = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    isolated_command(&home)
        .arg("build")
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("ONLINELABS_API_TOKEN"))
        .stderr(predicate::str::contains("kiln.toml"));
}

#[test]
fn destroy_image_requires_an_id() {
    let home = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    isolated_command(&home)
        .arg("destroy-image")
        .assert()
        .failure()
        .code(2);
}
