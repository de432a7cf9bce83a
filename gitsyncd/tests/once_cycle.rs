//! End-to-end reconciliation through the compiled daemon: a real git
//! origin, stub release/wait executables on PATH, one `--once` cycle.

mod common;

use common::{daemon_bin, init_origin, stubbed_path, write_config, write_stub};
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn once_cycle_installs_the_declared_application() {
    let root = TempDir::new().unwrap();
    let origin = root.path().join("origin");
    std::fs::create_dir(&origin).unwrap();
    init_origin(&origin);

    let stubs = root.path().join("stubs");
    std::fs::create_dir(&stubs).unwrap();
    let helm_log = root.path().join("helm.log");
    write_stub(
        &stubs,
        "helm",
        &format!(
            "echo \"$@\" >> {log}\ncase \"$1\" in status) exit 1 ;; *) exit 0 ;; esac",
            log = helm_log.display()
        ),
    );
    write_stub(&stubs, "kubectl", "exit 0");

    let config = write_config(root.path(), &origin);
    let workspace = root.path().join("workspace");

    let output = Command::new(daemon_bin())
        .env("PATH", stubbed_path(&stubs))
        .arg("--config")
        .arg(&config)
        .arg("--workspace")
        .arg(&workspace)
        .arg("--once")
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stdout: {stdout}\nstderr: {stderr}");

    let calls = std::fs::read_to_string(&helm_log).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines[0], "status web -n default");
    assert!(lines[1].starts_with("install web"));
    assert!(lines[1].contains("-n default"));
    assert!(lines[1].ends_with("--create-namespace --wait"));

    assert!(
        stdout.contains("Sync completed: 1/1 succeeded, 0 failed, 0 skipped"),
        "missing summary line in: {stdout}"
    );
}

#[test]
fn unreachable_repository_is_a_fatal_init_error() {
    let root = TempDir::new().unwrap();
    let config = write_config(root.path(), &root.path().join("no-such-origin"));

    let output = Command::new(daemon_bin())
        .arg("--config")
        .arg(&config)
        .arg("--workspace")
        .arg(root.path().join("workspace"))
        .arg("--once")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("git workspace"));
}

#[test]
fn sigterm_shuts_the_daemon_down_cleanly() {
    let root = TempDir::new().unwrap();
    let origin = root.path().join("origin");
    std::fs::create_dir(&origin).unwrap();
    init_origin(&origin);

    let stubs = root.path().join("stubs");
    std::fs::create_dir(&stubs).unwrap();
    write_stub(&stubs, "helm", "case \"$1\" in status) exit 1 ;; *) exit 0 ;; esac");
    write_stub(&stubs, "kubectl", "exit 0");

    let config = write_config(root.path(), &origin);
    let mut child = Command::new(daemon_bin())
        .env("PATH", stubbed_path(&stubs))
        .arg("--config")
        .arg(&config)
        .arg("--workspace")
        .arg(root.path().join("workspace"))
        .spawn()
        .unwrap();

    // Give the first cycle time to finish, then ask for shutdown.
    std::thread::sleep(Duration::from_secs(2));
    let killed = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(killed.success());

    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            assert_eq!(status.code(), Some(0), "graceful shutdown must exit 0");
            break;
        }
        assert!(Instant::now() < deadline, "daemon did not exit after SIGTERM");
        std::thread::sleep(Duration::from_millis(100));
    }
}
