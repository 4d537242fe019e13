use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

fn tartboot(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("tartboot").into();
    // keep work dirs out of the real home
    cmd.env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let config_path = dir.path().join("tartboot.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(f, "{contents}").unwrap();
    config_path
}

const BOOT_CONFIG: &str = r#"
[vm]
name = "sonoma-base"

[vnc]
boot_command = ["<wait5>root", "<enter>"]

[network]
interface = "tartboot-none0"
http_port = 8080
"#;

#[test]
fn help_works() {
    let dir = tempfile::tempdir().unwrap();
    tartboot(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Unattended Tart VM installs"))
        .stdout(predicate::str::contains("render"));
}

#[test]
fn missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    tartboot(&dir)
        .args(["--config", missing.to_str().unwrap(), "render"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn validation_rejects_bad_vm_name() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, "[vm]\nname = \"-bad name\"\n");

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "render"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vm.name"));
}

#[test]
fn render_prints_command_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, BOOT_CONFIG);

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "render"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<wait5>root<enter>"))
        .stdout(predicate::str::contains("wait 5s"))
        .stdout(predicate::str::contains("type \"root\""))
        .stdout(predicate::str::contains("press enter"))
        .stdout(predicate::str::contains("3 events"));
}

#[test]
fn render_json_lists_events() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, BOOT_CONFIG);

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "-o", "json", "render"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""wait_ms":5000"#))
        .stdout(predicate::str::contains("press enter"));
}

#[test]
fn render_without_host_address_fails_when_referenced() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        r#"
[vm]
name = "sonoma-base"

[vnc]
boot_command = ["http://{{ .HTTPIP }}:{{ .HTTPPort }}/ks.cfg<enter>"]

[network]
interface = "tartboot-none0"
http_port = 8080
"#,
    );

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "render"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to render the boot command"));
}

#[test]
fn render_rejects_unknown_directive() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        "[vm]\nname = \"sonoma-base\"\n\n[vnc]\nboot_command = [\"<bogus>\"]\n",
    );

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "render"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("offset 0"));
}

#[test]
fn render_without_boot_command() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, "[vm]\nname = \"sonoma-base\"\n");

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "render"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No boot command configured"));
}

#[test]
fn log_without_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, "[vm]\nname = \"sonoma-base\"\n");

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "log"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No VM logs found"));

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "log", "--failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No failed VM logs found"));
}

#[test]
fn up_fails_cleanly_without_tart() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        "[vm]\nname = \"sonoma-base\"\ntart_path = \"/nonexistent/tart\"\n",
    );

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "-o", "plain", "up"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to start the VM"));
}

#[test]
fn render_of_blank_boot_command_reports_no_events() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        "[vm]\nname = \"sonoma-base\"\n\n[vnc]\nboot_command = [\"\"]\n",
    );

    tartboot(&dir)
        .args(["--config", config_path.to_str().unwrap(), "render"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Boot command renders to no input events"));
}
