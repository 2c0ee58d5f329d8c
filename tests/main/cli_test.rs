//! CLI contract tests.

use std::fs;

use assert_cmd::Command;

fn overseer() -> Command {
    let mut cmd = Command::cargo_bin("overseer").expect("binary is built");
    cmd.env_remove("OVERSEER_CONFIG")
        .env_remove("OVERSEER_RCON_PASSWORD")
        .env_remove("OVERSEER_TELEGRAM_TOKEN");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let output = overseer().arg("--help").output().expect("runs");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["run", "start", "stop", "restart", "status", "rcon"] {
        assert!(stdout.contains(sub), "missing {sub} in help:\n{stdout}");
    }
}

#[test]
fn status_reports_state_and_schedule() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = tmp.path().join("overseer.toml");
    fs::write(
        &config,
        format!(
            "[server]\nprocess_names = [\"overseer-test-no-such-server\"]\n\
             [logs]\nenabled = false\n\
             [schedule]\nenabled = true\ninterval_minutes = 180\n\
             [paths]\ndata_dir = {:?}\n",
            tmp.path().join("data")
        ),
    )
    .expect("write config");

    let output = overseer()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .output()
        .expect("runs");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("state: OFFLINE"), "{stdout}");
    assert!(stdout.contains("next restart:"), "{stdout}");
}

#[test]
fn invalid_config_fails_with_context() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = tmp.path().join("overseer.toml");
    fs::write(&config, "[daily]\nstartup_at = \"7pm\"\n").expect("write config");

    let output = overseer()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .output()
        .expect("runs");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("daily.startup_at"));
}

#[test]
fn rcon_requires_a_command() {
    let output = overseer().arg("rcon").output().expect("runs");
    assert!(!output.status.success());
}
