//! Host/runtime metadata recorded under the clone manifest's `environment`
//! key: OS, architecture, the tool's own version, and whether the optional
//! external tools (`wget2`, `docker`) were available at capture time. This
//! is reproducibility context, not a CI-detection layer — a clone run
//! behaves identically whether it's invoked from a laptop or a CI runner,
//! so there is nothing here to branch on.

use std::env;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the environment a clone run executed in, written verbatim
/// into the manifest so a later run (or a human) can tell what produced
/// a given output folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub tool_version: String,
    pub wget2_available: bool,
    pub docker_available: bool,
    pub collected_at: DateTime<Utc>,
}

impl EnvironmentInfo {
    /// Collect the current environment, probing for `wget2` and `docker`
    /// on `PATH`. Probing never fails the collection itself — an absent
    /// tool is recorded as `false`, not an error.
    pub fn collect(tool_version: impl Into<String>) -> Result<Self> {
        Ok(Self {
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            tool_version: tool_version.into(),
            wget2_available: command_on_path("wget2"),
            docker_available: command_on_path("docker"),
            collected_at: Utc::now(),
        })
    }

    /// A short, human-readable fingerprint, e.g. `linux|x86_64|0.1.0`.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}|{}", self.os, self.arch, self.tool_version)
    }
}

/// Whether a command is resolvable on `PATH`, probed with `--version`.
/// A non-zero exit still counts as "present" — some tools (notably older
/// `wget2` builds) return nonzero for `--version` under certain locales.
fn command_on_path(name: &str) -> bool {
    std::process::Command::new(name)
        .arg("--version")
        .output()
        .is_ok()
}
