//! Sidecar plugin host (§4.6).
//!
//! Plugins are external processes discovered under a plugins directory as
//! `<plugins-dir>/<name>/hook` (or `hook.exe` on Windows), loaded in
//! name-sorted order for determinism, and spoken to over a JSON-per-line
//! protocol on stdin/stdout: one request object in, one response object
//! out, per line. A plugin that fails to load or errors mid-run never
//! aborts the overall clone — failures are contained and surfaced as
//! `plugin_load_failed` / `plugin_finalize_error` events instead.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cloneforge_progress::CancelToken;

/// File extensions the post-asset hook bothers notifying plugins about.
pub const INTERESTING_EXTENSIONS: [&str; 5] = ["html", "htm", "json", "css", "js"];

#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub hook_path: PathBuf,
}

/// Discover every plugin under `plugins_dir`, sorted by directory name.
/// A directory with no `hook`/`hook.exe` executable is skipped, not an
/// error — the host tolerates stray non-plugin directories.
pub fn discover_plugins(plugins_dir: &Path) -> Result<Vec<Plugin>> {
    let mut plugins = Vec::new();
    if !plugins_dir.is_dir() {
        return Ok(plugins);
    }
    for entry in std::fs::read_dir(plugins_dir)
        .with_context(|| format!("reading plugins dir: {}", plugins_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let dir = entry.path();
        let candidate = dir.join("hook");
        let candidate_exe = dir.join("hook.exe");
        let hook_path = if candidate.is_file() {
            candidate
        } else if candidate_exe.is_file() {
            candidate_exe
        } else {
            continue;
        };
        plugins.push(Plugin { name, hook_path });
    }
    plugins.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(plugins)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginRequest {
    PreDownload {
        context: Value,
    },
    PostAsset {
        rel_path: String,
        data_base64: String,
        context: Value,
    },
    Finalize {
        output_folder: PathBuf,
        manifest: Value,
        context: Value,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PreDownloadResponse {
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostAssetResponse {
    /// `null` means "unchanged"; `Some(base64)` replaces the asset's bytes.
    #[serde(default)]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FinalizeResponse {
    #[serde(default)]
    pub manifest: Option<Value>,
}

/// Spawns the plugin's hook process, writes one JSON request line, reads
/// one JSON response line back, then lets the process exit. A fresh
/// process per call keeps each plugin invocation isolated and keeps the
/// protocol stateless, at the cost of a process spawn per asset — an
/// acceptable tradeoff since `post_asset` calls are already gated to
/// "interesting" extensions only.
fn call(hook_path: &Path, request: &PluginRequest, timeout: Duration) -> Result<Value> {
    let mut child = Command::new(hook_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning plugin hook: {}", hook_path.display()))?;

    let line = serde_json::to_string(request).context("serializing plugin request")?;
    if let Some(stdin) = child.stdin.as_mut() {
        writeln!(stdin, "{line}").context("writing plugin request")?;
    }

    let start = std::time::Instant::now();
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("plugin stdout unavailable"))?;
    let mut reader = BufReader::new(stdout);
    let mut response_line = String::new();

    loop {
        if start.elapsed() > timeout {
            let _ = child.kill();
            return Err(anyhow!("plugin hook timed out after {:?}", timeout));
        }
        let n = reader
            .read_line(&mut response_line)
            .context("reading plugin response")?;
        if n == 0 || response_line.ends_with('\n') {
            break;
        }
    }
    let _ = child.wait();

    if response_line.trim().is_empty() {
        return Err(anyhow!("plugin produced no response line"));
    }
    serde_json::from_str(response_line.trim()).context("parsing plugin response JSON")
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of loading the plugin set: which loaded, which failed and why.
#[derive(Debug, Default)]
pub struct PluginHost {
    pub loaded: Vec<Plugin>,
    pub load_failures: Vec<(String, String)>,
    /// Per-plugin count of `post_asset`/`finalize` calls that actually
    /// changed something, for `manifest.plugin_modifications`.
    pub modification_counts: BTreeMap<String, u64>,
}

impl PluginHost {
    /// Discover and "load" every plugin under `plugins_dir`. Loading here
    /// just means confirming the hook executable is present; each plugin
    /// proves itself live on its first real call.
    pub fn load(plugins_dir: &Path) -> Self {
        let mut host = PluginHost::default();
        match discover_plugins(plugins_dir) {
            Ok(plugins) => host.loaded = plugins,
            Err(err) => host.load_failures.push(("<discovery>".to_string(), err.to_string())),
        }
        host
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Call `pre_download` on every loaded plugin. Errors are recorded as
    /// load failures and that plugin is dropped from further calls this
    /// run.
    pub fn pre_download(&mut self, context: Value) {
        let mut still_good = Vec::new();
        for plugin in self.loaded.drain(..) {
            let request = PluginRequest::PreDownload { context: context.clone() };
            match call(&plugin.hook_path, &request, DEFAULT_TIMEOUT) {
                Ok(_) => still_good.push(plugin),
                Err(err) => self.load_failures.push((plugin.name.clone(), err.to_string())),
            }
        }
        self.loaded = still_good;
    }

    /// Run `post_asset` for every interesting file against every
    /// surviving plugin, applying any `modified` replacement in plugin
    /// order. Returns the possibly-rewritten bytes. Checks `cancel`
    /// before each plugin call and stops early, returning whatever has
    /// been produced so far.
    pub fn post_asset(&mut self, rel_path: &str, data: Vec<u8>, context: Value, cancel: &CancelToken) -> Vec<u8> {
        let ext = rel_path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        if !INTERESTING_EXTENSIONS.contains(&ext.as_str()) {
            return data;
        }
        let mut current = data;
        let plugins = self.loaded.clone();
        for plugin in &plugins {
            if cancel.is_canceled() {
                break;
            }
            let encoded = base64::engine::general_purpose::STANDARD.encode(&current);
            let request = PluginRequest::PostAsset {
                rel_path: rel_path.to_string(),
                data_base64: encoded,
                context: context.clone(),
            };
            match call(&plugin.hook_path, &request, DEFAULT_TIMEOUT) {
                Ok(value) => {
                    if let Ok(resp) = serde_json::from_value::<PostAssetResponse>(value) {
                        if let Some(modified_b64) = resp.modified {
                            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(modified_b64) {
                                current = bytes;
                                *self.modification_counts.entry(plugin.name.clone()).or_insert(0) += 1;
                            }
                        }
                    }
                }
                Err(_) => {
                    // A single post_asset failure is swallowed; the asset
                    // passes through to the next plugin unmodified.
                }
            }
        }
        current
    }

    /// Run `finalize` on every surviving plugin, letting each one return
    /// an updated manifest object that folds into the next plugin's view.
    /// Returns the final manifest value (or the input unchanged if no
    /// plugin returned one, or all calls failed). Checks `cancel` before
    /// each plugin call and stops early.
    pub fn finalize(&mut self, output_folder: &Path, manifest: Value, context: Value, cancel: &CancelToken) -> (Value, Vec<String>) {
        let mut current = manifest;
        let mut errors = Vec::new();
        let plugins = self.loaded.clone();
        for plugin in &plugins {
            if cancel.is_canceled() {
                break;
            }
            let request = PluginRequest::Finalize {
                output_folder: output_folder.to_path_buf(),
                manifest: current.clone(),
                context: context.clone(),
            };
            match call(&plugin.hook_path, &request, DEFAULT_TIMEOUT) {
                Ok(value) => {
                    if let Ok(resp) = serde_json::from_value::<FinalizeResponse>(value) {
                        if let Some(updated) = resp.manifest {
                            current = updated;
                        }
                    }
                }
                Err(err) => errors.push(format!("{}: {}", plugin.name, err)),
            }
        }
        (current, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discover_plugins_finds_hook_executables_sorted() {
        let dir = tempdir().unwrap();
        for name in ["zeta", "alpha", "beta"] {
            let plugin_dir = dir.path().join(name);
            fs::create_dir_all(&plugin_dir).unwrap();
            fs::write(plugin_dir.join("hook"), "#!/bin/sh\n").unwrap();
        }
        fs::create_dir_all(dir.path().join("not-a-plugin")).unwrap();

        let plugins = discover_plugins(dir.path()).unwrap();
        let names: Vec<_> = plugins.iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn discover_plugins_on_missing_dir_is_empty() {
        let plugins = discover_plugins(Path::new("/definitely/not/here")).unwrap();
        assert!(plugins.is_empty());
    }

    #[test]
    fn discover_plugins_accepts_hook_exe_variant() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("winplugin");
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("hook.exe"), b"stub").unwrap();
        let plugins = discover_plugins(dir.path()).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "winplugin");
    }

    #[test]
    fn post_asset_skips_uninteresting_extensions() {
        let mut host = PluginHost::default();
        let data = b"binary-blob".to_vec();
        let cancel = CancelToken::new();
        let out = host.post_asset("image.png", data.clone(), Value::Null, &cancel);
        assert_eq!(out, data);
    }

    #[test]
    fn post_asset_returns_data_unchanged_when_already_canceled() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("noisy");
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("hook"), "#!/bin/sh\n").unwrap();
        let mut host = PluginHost::load(dir.path());
        let data = b"<html></html>".to_vec();
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = host.post_asset("index.html", data.clone(), Value::Null, &cancel);
        assert_eq!(out, data);
    }

    #[test]
    fn interesting_extensions_cover_contract_list() {
        for ext in ["html", "htm", "json", "css", "js"] {
            assert!(INTERESTING_EXTENSIONS.contains(&ext));
        }
    }

    #[test]
    fn load_on_empty_host_has_no_loaded_plugins() {
        let dir = tempdir().unwrap();
        let host = PluginHost::load(dir.path());
        assert!(host.is_empty());
        assert!(host.load_failures.is_empty());
    }

    #[test]
    fn finalize_with_no_plugins_returns_manifest_unchanged() {
        let mut host = PluginHost::default();
        let manifest = serde_json::json!({"url": "https://example.com"});
        let cancel = CancelToken::new();
        let (out, errors) = host.finalize(Path::new("/tmp/out"), manifest.clone(), Value::Null, &cancel);
        assert_eq!(out, manifest);
        assert!(errors.is_empty());
    }

    #[test]
    fn finalize_skips_every_plugin_when_already_canceled() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("noisy");
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("hook"), "#!/bin/sh\n").unwrap();
        let mut host = PluginHost::load(dir.path());
        let manifest = serde_json::json!({"url": "https://example.com"});
        let cancel = CancelToken::new();
        cancel.cancel();
        let (out, errors) = host.finalize(Path::new("/tmp/out"), manifest.clone(), Value::Null, &cancel);
        assert_eq!(out, manifest);
        assert!(errors.is_empty());
    }
}
