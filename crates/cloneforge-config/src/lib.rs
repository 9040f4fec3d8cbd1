//! Layered configuration loading for cloneforge.
//!
//! Precedence, highest first: explicit CLI flags, then a `--config` file
//! (JSON, YAML, or TOML — detected by extension, defaulting to TOML for
//! extensionless files, matching the layout this tool's own config used),
//! then the hardcoded defaults in
//! [`cloneforge_types::CloneConfig::new`]. Each layer is a sparse
//! [`ConfigOverlay`] — only the fields actually set — so a layer can
//! override exactly one setting without restating everything below it.
//!
//! ```
//! use cloneforge_config::ConfigOverlay;
//!
//! let file_layer = ConfigOverlay {
//!     docker_name: Some("mysite".to_string()),
//!     ..Default::default()
//! };
//! let cli_layer = ConfigOverlay {
//!     url: Some("https://example.com".to_string()),
//!     dest: Some("/tmp/out".into()),
//!     ..Default::default()
//! };
//! let merged = file_layer.merge(cli_layer);
//! let cfg = merged.into_config().expect("url and dest present");
//! assert_eq!(cfg.docker_name, "mysite");
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cloneforge_types::{
    CloneConfig, ConfigError, IntegrityOptions, MirrorOptions, PrerenderOptions, ProgressStyle,
    ReportFormat, RouterOptions,
};

/// A sparse, mergeable view over [`CloneConfig`]'s fields. Every field is
/// optional so a `--config` file or a CLI arg set can specify only what it
/// cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverlay {
    pub url: Option<String>,
    pub dest: Option<PathBuf>,
    pub docker_name: Option<String>,
    pub bind_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: Option<u16>,

    pub mirror: Option<MirrorOptions>,
    pub prerender: Option<PrerenderOptions>,
    pub router: Option<RouterOptions>,
    pub integrity: Option<IntegrityOptions>,

    pub plugins_dir: Option<PathBuf>,
    pub json_logs: Option<bool>,
    pub events_file: Option<PathBuf>,
    pub progress_style: Option<ProgressStyle>,
    pub profile: Option<bool>,
    pub build: Option<bool>,
    pub run_after_build: Option<bool>,
    pub serve_folder: Option<bool>,
    pub open_browser: Option<bool>,
    pub estimate_first: Option<bool>,
    pub cleanup: Option<bool>,
    pub disable_js: Option<bool>,
    pub dry_run: Option<bool>,
    pub print_repro: Option<bool>,
    pub report: Option<ReportFormat>,
}

impl ConfigOverlay {
    /// Merge `other` on top of `self`: each field `other` sets wins,
    /// otherwise `self`'s value (if any) is kept. Whole option-groups
    /// (`mirror`, `prerender`, ...) replace rather than deep-merge — a
    /// `--config` file that sets `[mirror]` partially still gets every
    /// unset field in that group from the struct's own `Default`, which
    /// matches `CloneConfig`'s own defaults.
    pub fn merge(self, other: ConfigOverlay) -> ConfigOverlay {
        ConfigOverlay {
            url: other.url.or(self.url),
            dest: other.dest.or(self.dest),
            docker_name: other.docker_name.or(self.docker_name),
            bind_ip: other.bind_ip.or(self.bind_ip),
            host_port: other.host_port.or(self.host_port),
            container_port: other.container_port.or(self.container_port),
            mirror: other.mirror.or(self.mirror),
            prerender: other.prerender.or(self.prerender),
            router: other.router.or(self.router),
            integrity: other.integrity.or(self.integrity),
            plugins_dir: other.plugins_dir.or(self.plugins_dir),
            json_logs: other.json_logs.or(self.json_logs),
            events_file: other.events_file.or(self.events_file),
            progress_style: other.progress_style.or(self.progress_style),
            profile: other.profile.or(self.profile),
            build: other.build.or(self.build),
            run_after_build: other.run_after_build.or(self.run_after_build),
            serve_folder: other.serve_folder.or(self.serve_folder),
            open_browser: other.open_browser.or(self.open_browser),
            estimate_first: other.estimate_first.or(self.estimate_first),
            cleanup: other.cleanup.or(self.cleanup),
            disable_js: other.disable_js.or(self.disable_js),
            dry_run: other.dry_run.or(self.dry_run),
            print_repro: other.print_repro.or(self.print_repro),
            report: other.report.or(self.report),
        }
    }

    /// Resolve this overlay into a full [`CloneConfig`], starting from
    /// [`CloneConfig::new`]'s defaults and applying every field this
    /// overlay sets. Fails if `url` or `dest` were never set by any layer.
    pub fn into_config(self) -> Result<CloneConfig, ConfigError> {
        let url = self.url.ok_or(ConfigError::MissingUrl)?;
        let dest = self.dest.ok_or(ConfigError::MissingDest)?;
        let mut cfg = CloneConfig::new(url, dest);

        if let Some(v) = self.docker_name {
            cfg.docker_name = v;
        }
        if let Some(v) = self.bind_ip {
            cfg.bind_ip = v;
        }
        if let Some(v) = self.host_port {
            cfg.host_port = v;
        }
        if let Some(v) = self.container_port {
            cfg.container_port = v;
        }
        if let Some(v) = self.mirror {
            cfg.mirror = v;
        }
        if let Some(v) = self.prerender {
            cfg.prerender = v;
        }
        if let Some(v) = self.router {
            cfg.router = v;
        }
        if let Some(v) = self.integrity {
            cfg.integrity = v;
        }
        if let Some(v) = self.plugins_dir {
            cfg.plugins_dir = Some(v);
        }
        if let Some(v) = self.json_logs {
            cfg.json_logs = v;
        }
        if let Some(v) = self.events_file {
            cfg.events_file = Some(v);
        }
        if let Some(v) = self.progress_style {
            cfg.progress_style = v;
        }
        if let Some(v) = self.profile {
            cfg.profile = v;
        }
        if let Some(v) = self.build {
            cfg.build = v;
        }
        if let Some(v) = self.run_after_build {
            cfg.run_after_build = v;
        }
        if let Some(v) = self.serve_folder {
            cfg.serve_folder = v;
        }
        if let Some(v) = self.open_browser {
            cfg.open_browser = v;
        }
        if let Some(v) = self.estimate_first {
            cfg.estimate_first = v;
        }
        if let Some(v) = self.cleanup {
            cfg.cleanup = v;
        }
        if let Some(v) = self.disable_js {
            cfg.disable_js = v;
        }
        if let Some(v) = self.dry_run {
            cfg.dry_run = v;
        }
        if let Some(v) = self.print_repro {
            cfg.print_repro = v;
        }
        if let Some(v) = self.report {
            cfg.report = Some(v);
        }

        cloneforge_types::validate(&cfg)?;
        Ok(cfg)
    }
}

/// Load a [`ConfigOverlay`] from a `--config` file. Format is chosen by
/// extension: `.json` -> JSON, `.yaml`/`.yml` -> YAML, `.toml` or anything
/// else -> TOML (the original tool's own config format).
pub fn load_overlay_file(path: &Path) -> Result<ConfigOverlay> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file: {}", path.display()))?;

    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match format.as_deref() {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("parsing JSON config file: {}", path.display())),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("parsing YAML config file: {}", path.display())),
        _ => toml::from_str(&content)
            .with_context(|| format!("parsing TOML config file: {}", path.display())),
    }
}

/// Build a final [`CloneConfig`] from an optional `--config` file layer
/// and a CLI-derived layer, in that precedence order (CLI wins).
pub fn build_config(
    config_file: Option<&Path>,
    cli_overlay: ConfigOverlay,
) -> Result<CloneConfig> {
    let file_overlay = match config_file {
        Some(path) => load_overlay_file(path)?,
        None => ConfigOverlay::default(),
    };
    let merged = file_overlay.merge(cli_overlay);
    merged
        .into_config()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloneforge_types::MirrorOptions;
    use tempfile::tempdir;

    #[test]
    fn merge_cli_overrides_file_layer() {
        let file_layer = ConfigOverlay {
            docker_name: Some("from-file".to_string()),
            build: Some(true),
            ..Default::default()
        };
        let cli_layer = ConfigOverlay {
            docker_name: Some("from-cli".to_string()),
            url: Some("https://example.com".to_string()),
            dest: Some("/tmp/out".into()),
            ..Default::default()
        };
        let merged = file_layer.merge(cli_layer);
        assert_eq!(merged.docker_name, Some("from-cli".to_string()));
        assert_eq!(merged.build, Some(true));
    }

    #[test]
    fn into_config_requires_url_and_dest() {
        let overlay = ConfigOverlay::default();
        assert!(matches!(overlay.into_config(), Err(ConfigError::MissingUrl)));
    }

    #[test]
    fn into_config_applies_mirror_group_wholesale() {
        let overlay = ConfigOverlay {
            url: Some("https://example.com".to_string()),
            dest: Some("/tmp/out".into()),
            mirror: Some(MirrorOptions {
                jobs: 8,
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = overlay.into_config().unwrap();
        assert_eq!(cfg.mirror.jobs, 8);
    }

    #[test]
    fn load_overlay_file_detects_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clone.json");
        std::fs::write(&path, r#"{"docker_name": "from-json"}"#).unwrap();
        let overlay = load_overlay_file(&path).unwrap();
        assert_eq!(overlay.docker_name, Some("from-json".to_string()));
    }

    #[test]
    fn load_overlay_file_detects_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clone.yaml");
        std::fs::write(&path, "docker_name: from-yaml\nbuild: true\n").unwrap();
        let overlay = load_overlay_file(&path).unwrap();
        assert_eq!(overlay.docker_name, Some("from-yaml".to_string()));
        assert_eq!(overlay.build, Some(true));
    }

    #[test]
    fn load_overlay_file_detects_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clone.toml");
        std::fs::write(&path, "docker_name = \"from-toml\"\n").unwrap();
        let overlay = load_overlay_file(&path).unwrap();
        assert_eq!(overlay.docker_name, Some("from-toml".to_string()));
    }

    #[test]
    fn build_config_layers_file_then_cli() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clone.json");
        std::fs::write(
            &path,
            r#"{"url": "https://file.example.com", "dest": "/tmp/file-out", "docker_name": "file-site"}"#,
        )
        .unwrap();

        let cli = ConfigOverlay {
            docker_name: Some("cli-site".to_string()),
            ..Default::default()
        };
        let cfg = build_config(Some(&path), cli).unwrap();
        assert_eq!(cfg.url, "https://file.example.com");
        assert_eq!(cfg.docker_name, "cli-site");
    }

    #[test]
    fn build_config_without_file_uses_cli_only() {
        let cli = ConfigOverlay {
            url: Some("https://example.com".to_string()),
            dest: Some("/tmp/out".into()),
            ..Default::default()
        };
        let cfg = build_config(None, cli).unwrap();
        assert_eq!(cfg.url, "https://example.com");
    }

    #[test]
    fn build_config_rejects_invalid_bind_ip() {
        let cli = ConfigOverlay {
            url: Some("https://example.com".to_string()),
            dest: Some("/tmp/out".into()),
            bind_ip: Some("not-an-ip".to_string()),
            ..Default::default()
        };
        assert!(build_config(None, cli).is_err());
    }
}
