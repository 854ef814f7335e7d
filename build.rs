// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=MOTION_VISUALIZER_VERSION");

    // Packagers can pin the version string
    let version = match std::env::var("MOTION_VISUALIZER_VERSION") {
        Ok(v) => v,
        Err(_) => get_git_version(),
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Crate version, suffixed with the short commit hash when built from git
///
/// "0.1.0" at a clean checkout of commit abcdef1 becomes "0.1.0-abcdef1".
fn get_git_version() -> String {
    let base = env!("CARGO_PKG_VERSION");
    match get_commit_hash() {
        Some(hash) if is_dirty() => format!("{}-dirty-{}", base, hash),
        Some(hash) => format!("{}-{}", base, hash),
        None => base.to_string(),
    }
}

fn get_commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

fn is_dirty() -> bool {
    Command::new("git")
        .args(["status", "--porcelain", "--untracked-files=no"])
        .output()
        .map(|o| o.status.success() && !o.stdout.is_empty())
        .unwrap_or(false)
}
