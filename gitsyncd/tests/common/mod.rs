//! Shared fixtures for daemon integration tests: throwaway git origins,
//! stub release/wait executables, and config files on disk.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Path to the compiled daemon under test.
pub fn daemon_bin() -> &'static str {
    env!("CARGO_BIN_EXE_gitsyncd")
}

pub fn git_raw(args: &[&str]) {
    let status = Command::new("git").args(args).status().unwrap();
    assert!(status.success(), "git {args:?} failed");
}

pub fn git_in(dir: &Path, args: &[&str]) {
    let mut full = vec!["-C", dir.to_str().unwrap()];
    full.extend_from_slice(args);
    git_raw(&full);
}

pub fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
    let target = dir.join(name);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(target, content).unwrap();
    git_in(dir, &["add", "."]);
    git_in(
        dir,
        &[
            "-c",
            "user.name=test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-m",
            message,
        ],
    );
}

/// A fresh origin repository on branch `main` with one chart directory.
pub fn init_origin(dir: &Path) {
    git_raw(&["init", dir.to_str().unwrap()]);
    git_in(dir, &["checkout", "-b", "main"]);
    commit_file(dir, "charts/web/values.yaml", "replicas: 1\n", "initial");
}

/// Install an executable stub into `dir` under `name`.
pub fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write a config file pointing at `origin` with one enabled application.
pub fn write_config(dir: &Path, origin: &Path) -> PathBuf {
    let raw = format!(
        r#"sync:
  interval: 60s
git:
  repository: {origin}
  branch: main
applications:
  - name: web
    namespace: default
    path: charts/web
"#,
        origin = origin.display()
    );
    let path = dir.join("gitsync.yaml");
    std::fs::write(&path, raw).unwrap();
    path
}

/// PATH value that resolves stubs from `stub_dir` first.
pub fn stubbed_path(stub_dir: &Path) -> String {
    let original = std::env::var("PATH").unwrap_or_default();
    format!("{}:{}", stub_dir.display(), original)
}
