//! Core domain types for cloneforge: [`CloneConfig`], [`CloneResult`],
//! [`Manifest`], and the supporting enums every other crate in the
//! workspace builds on.
//!
//! # Serialization
//!
//! `CloneConfig` and `Manifest` are serde-derived for persistence
//! (`--config` files, `clone_manifest.json`) and for building fixtures in
//! tests. Field names match the manifest contract exactly — renaming a
//! field here is a `schema_version` bump, not a refactor.
//!
//! # Stability
//!
//! [`ExitCode`] is the one truly load-bearing public contract: automation
//! depends on these numbers staying fixed. Treat changes to its values as
//! breaking even across otherwise-compatible releases.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cloneforge_duration::MillisDuration;
use cloneforge_retry::RetryStrategyConfig;

/// Deterministic exit codes, stable across releases for CI/automation use.
///
/// ```
/// use cloneforge_types::ExitCode;
/// assert_eq!(ExitCode::Success as i32, 0);
/// assert_eq!(ExitCode::VerifyFailed as i32, 14);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GenericFailure = 1,
    WgetMissing = 12,
    DockerUnavailable = 13,
    VerifyFailed = 14,
    Canceled = 15,
    ConfigError = 16,
    SelftestFailed = 17,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// `plain` (line-oriented, CI-safe) or `rich` (`indicatif` bars) progress
/// rendering, selected by `--progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStyle {
    #[default]
    Plain,
    Rich,
}

/// `--report` output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Md,
}

/// Mirroring options (`CloneConfig`'s mirroring group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorOptions {
    /// Parallel connection count passed to the mirror tool's `-j`-equivalent
    /// flag. Must be `>= 1`; validated at config-build time.
    pub jobs: u32,
    /// Optional total download quota in bytes.
    pub size_cap_bytes: Option<u64>,
    /// Optional throughput limit in bytes/sec.
    pub throttle_bytes_per_sec: Option<u64>,
    pub auth_user: Option<String>,
    pub auth_pass: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub import_browser_cookies: bool,
    /// "Only if newer" resume semantics.
    pub incremental: bool,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            size_cap_bytes: None,
            throttle_bytes_per_sec: None,
            auth_user: None,
            auth_pass: None,
            cookies_file: None,
            import_browser_cookies: false,
            incremental: false,
        }
    }
}

/// Dynamic-capture options (`CloneConfig`'s dynamic-capture group, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrerenderOptions {
    pub enabled: bool,
    pub max_pages: u32,
    pub scroll_passes: u32,
    /// DOM-stability quiet window; `0` disables the wait entirely.
    pub dom_stable_ms: MillisDuration,
    pub dom_stable_timeout_ms: MillisDuration,
    pub capture_api: bool,
    /// Allowed content-type prefixes for API capture (e.g. `application/json`).
    pub capture_api_types: Vec<String>,
    pub capture_api_binary: bool,
    pub capture_storage: bool,
    pub capture_graphql: bool,
    pub hook_script: Option<PathBuf>,
    /// Rewrite absolute-origin URLs in captured HTML to relative ones.
    pub rewrite_urls: bool,
}

impl Default for PrerenderOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_pages: 40,
            scroll_passes: 0,
            dom_stable_ms: MillisDuration::from_millis(0),
            dom_stable_timeout_ms: MillisDuration::from_millis(4000),
            capture_api: false,
            capture_api_types: vec!["application/json".to_string()],
            capture_api_binary: false,
            capture_storage: false,
            capture_graphql: false,
            hook_script: None,
            rewrite_urls: true,
        }
    }
}

/// SPA route-interception options (`CloneConfig`'s router group, §4.4 step 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterOptions {
    pub intercept: bool,
    pub include_hash: bool,
    pub max_routes: u32,
    pub settle_ms: MillisDuration,
    pub wait_selector: Option<String>,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub quiet: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            intercept: false,
            include_hash: false,
            max_routes: 200,
            settle_ms: MillisDuration::from_millis(350),
            wait_selector: None,
            allow: Vec::new(),
            deny: Vec::new(),
            quiet: false,
        }
    }
}

/// Integrity options (`CloneConfig`'s integrity group, §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityOptions {
    pub emit_manifest: bool,
    pub checksums: bool,
    pub extra_extensions: Vec<String>,
    pub verify_after: bool,
    pub verify_deep: bool,
    pub diff_latest: bool,
}

impl Default for IntegrityOptions {
    fn default() -> Self {
        Self {
            emit_manifest: true,
            checksums: false,
            extra_extensions: Vec::new(),
            verify_after: false,
            verify_deep: false,
            diff_latest: false,
        }
    }
}

/// The full, immutable configuration for one capture run. Owned by the
/// caller; the engine never mutates it.
///
/// Not `PartialEq` — `retry` embeds [`RetryStrategyConfig`], which carries
/// a `Duration` pair without an equality impl of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    // Identity & output
    pub url: String,
    pub dest: PathBuf,
    #[serde(default = "default_docker_name")]
    pub docker_name: String,
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    #[serde(default = "default_host_port")]
    pub host_port: u16,
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    #[serde(default)]
    pub mirror: MirrorOptions,
    #[serde(default)]
    pub prerender: PrerenderOptions,
    #[serde(default)]
    pub router: RouterOptions,
    #[serde(default)]
    pub integrity: IntegrityOptions,

    // Extensibility & I/O
    pub plugins_dir: Option<PathBuf>,
    #[serde(default)]
    pub json_logs: bool,
    pub events_file: Option<PathBuf>,
    #[serde(default)]
    pub progress_style: ProgressStyle,
    #[serde(default)]
    pub profile: bool,
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub run_after_build: bool,
    #[serde(default)]
    pub serve_folder: bool,
    #[serde(default)]
    pub open_browser: bool,
    #[serde(default)]
    pub estimate_first: bool,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub disable_js: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub print_repro: bool,
    pub report: Option<ReportFormat>,
    #[serde(default)]
    pub retry: RetryStrategyConfig,
}

fn default_docker_name() -> String {
    "site".to_string()
}
fn default_bind_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_host_port() -> u16 {
    8080
}
fn default_container_port() -> u16 {
    80
}

impl CloneConfig {
    /// A minimal config with only the two required fields set, everything
    /// else at its documented default. Used by tests and as the base a CLI
    /// or config-file layer overlays onto.
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            docker_name: default_docker_name(),
            bind_ip: default_bind_ip(),
            host_port: default_host_port(),
            container_port: default_container_port(),
            mirror: MirrorOptions::default(),
            prerender: PrerenderOptions::default(),
            router: RouterOptions::default(),
            integrity: IntegrityOptions::default(),
            plugins_dir: None,
            json_logs: false,
            events_file: None,
            progress_style: ProgressStyle::default(),
            profile: false,
            build: false,
            run_after_build: false,
            serve_folder: false,
            open_browser: false,
            estimate_first: false,
            cleanup: false,
            disable_js: false,
            dry_run: false,
            print_repro: false,
            report: None,
            retry: RetryStrategyConfig::default(),
        }
    }

    /// The project root every output artifact lives under: `<dest>/<docker_name>`.
    pub fn output_folder(&self) -> PathBuf {
        self.dest.join(&self.docker_name)
    }
}

/// Errors raised validating a [`CloneConfig`] before a run starts. Each
/// variant maps to [`ExitCode::ConfigError`] at the CLI boundary.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("website URL is required")]
    MissingUrl,
    #[error("destination folder is required")]
    MissingDest,
    #[error("bind IP {0:?} is not a valid IPv4 address")]
    InvalidBindIp(String),
    #[error("--docker-name is required when --build is set")]
    MissingDockerNameForBuild,
    #[error("mirror jobs must be at least 1")]
    InvalidJobs,
}

/// `validate_required_fields` + `normalize_ip`, ported from the original
/// implementation: checks URL/dest/bind-ip/docker-name-for-build, and
/// normalizes the bind IP (`""`/`"localhost"` -> `127.0.0.1`, `0.0.0.0`
/// passes through, anything else must parse as IPv4).
pub fn validate(cfg: &CloneConfig) -> Result<String, ConfigError> {
    if cfg.url.trim().is_empty() {
        return Err(ConfigError::MissingUrl);
    }
    if cfg.dest.as_os_str().is_empty() {
        return Err(ConfigError::MissingDest);
    }
    if cfg.build && cfg.docker_name.trim().is_empty() {
        return Err(ConfigError::MissingDockerNameForBuild);
    }
    if cfg.mirror.jobs < 1 {
        return Err(ConfigError::InvalidJobs);
    }
    normalize_ip(&cfg.bind_ip).ok_or_else(|| ConfigError::InvalidBindIp(cfg.bind_ip.clone()))
}

/// Normalize a bind-IP string: blank or `localhost` becomes `127.0.0.1`,
/// `0.0.0.0` passes through unchanged, anything else must parse as a
/// valid IPv4 address or `None` is returned.
pub fn normalize_ip(ip_text: &str) -> Option<String> {
    let trimmed = ip_text.trim();
    if trimmed.is_empty() {
        return Some("127.0.0.1".to_string());
    }
    if trimmed.eq_ignore_ascii_case("localhost") {
        return Some("127.0.0.1".to_string());
    }
    if trimmed == "0.0.0.0" {
        return Some(trimmed.to_string());
    }
    trimmed
        .parse::<std::net::Ipv4Addr>()
        .ok()
        .map(|_| trimmed.to_string())
}

/// Result of one capture run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneResult {
    pub success: bool,
    pub container_built: bool,
    pub output_folder: PathBuf,
    pub site_root: PathBuf,
    pub manifest_path: Option<PathBuf>,
    pub diff_summary: Option<DiffSummary>,
    pub timings: BTreeMap<String, f64>,
    pub run_id: String,
    pub canceled: bool,
    pub exit_code: i32,
}

/// `resume` block of the manifest: file/partial counts observed before and
/// after the mirror run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResumeStats {
    pub pre_files: u64,
    pub pre_partials: u64,
    pub post_files: u64,
    pub post_partials: u64,
    pub new_files: u64,
}

impl ResumeStats {
    /// `new_files = max(0, post_total - pre_total)`, matching the original's
    /// saturating semantics exactly.
    pub fn finish(pre_files: u64, pre_partials: u64, post_files: u64, post_partials: u64) -> Self {
        Self {
            pre_files,
            pre_partials,
            post_files,
            post_partials,
            new_files: post_files.saturating_sub(pre_files),
        }
    }
}

/// `js_stripping` block of the manifest, present only when JS stripping ran.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JsStrippingStats {
    pub html_files: u64,
    pub modified: u64,
    pub scripts_removed: u64,
    pub inline_scripts_removed: u64,
}

/// `verification` block, present only if verification ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub ok: Option<u64>,
    pub missing: Option<u64>,
    pub mismatched: Option<u64>,
    pub total: Option<u64>,
    pub fast_missing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Passed,
    Failed,
}

/// One entry in a [`DiffSummary::modified`] list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedEntry {
    pub path: String,
    pub old_hash: String,
    pub new_hash: String,
    pub old_size: u64,
    pub new_size: u64,
    pub delta_bytes: i64,
}

/// Incremental diff between a previous and current file-hash snapshot
/// (Fingerprinter output).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<ModifiedEntry>,
    /// Always equal to `modified.iter().map(|m| m.path.clone())`.
    pub changed: Vec<String>,
    pub unchanged_count: u64,
    pub total_current: u64,
}

/// The engine's primary machine-readable artifact: `clone_manifest.json`.
///
/// Built up in strict mutation order: baseline fields at start, then
/// `checksums_sha256`/`verification` (integrity), then
/// `plugin_modifications` (post_asset), then whatever `finalize` hooks
/// mutate via `extensions`, then final enrichment (timings,
/// `reproduce_command`, `canceled`, `docker_built`, `clone_success`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub tool_version: String,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: Option<DateTime<Utc>>,
    pub url: String,
    pub docker_name: String,
    pub output_folder: PathBuf,
    pub clone_success: bool,
    pub docker_built: bool,

    pub prerender: bool,
    pub prerender_pages_processed: u64,
    pub routes_discovered: u64,
    pub storage_captured_count: u64,
    pub graphql_captured_count: u64,
    pub scroll_passes: u32,
    pub dom_stable_pages: u64,
    pub dom_stable_total_wait_ms: u64,
    pub dom_stable_ms: u64,
    pub dom_stable_timeout_ms: u64,

    pub capture_api: bool,
    pub api_capture: bool,
    pub api_captured_count: u64,
    pub api_capture_note: Option<String>,

    pub checksums_included: bool,
    pub checksums: bool,
    pub checksums_sha256: Option<BTreeMap<String, String>>,

    pub resume: ResumeStats,
    pub environment: Value,

    pub timings: BTreeMap<String, f64>,
    pub phase_durations_seconds: BTreeMap<String, f64>,

    pub reproduce_command: Vec<String>,
    pub warnings: Vec<String>,

    pub js_stripping: Option<JsStrippingStats>,
    pub plugin_modifications: BTreeMap<String, u64>,
    pub verification: Option<VerificationResult>,
    pub verification_meta: Option<VerificationMeta>,

    pub canceled: bool,

    pub size_cap_bytes: Option<u64>,
    pub throttle_bytes_per_sec: Option<u64>,

    pub router_intercept: bool,
    pub router_max_routes: u32,

    pub wget2_missing: bool,

    /// Plugin- or forward-compatible keys not named above: a typed record
    /// plus an escape hatch, rather than an untyped whole-document dict.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerificationMeta {
    pub elapsed_ms: u64,
}

impl Manifest {
    /// A freshly-started manifest with every count/flag at its off state.
    /// The orchestrator enriches this as each phase completes.
    pub fn new(cfg: &CloneConfig, tool_version: impl Into<String>, started_utc: DateTime<Utc>) -> Self {
        Self {
            schema_version: 1,
            tool_version: tool_version.into(),
            started_utc,
            completed_utc: None,
            url: cfg.url.clone(),
            docker_name: cfg.docker_name.clone(),
            output_folder: cfg.output_folder(),
            clone_success: false,
            docker_built: false,
            prerender: cfg.prerender.enabled,
            prerender_pages_processed: 0,
            routes_discovered: 0,
            storage_captured_count: 0,
            graphql_captured_count: 0,
            scroll_passes: cfg.prerender.scroll_passes,
            dom_stable_pages: 0,
            dom_stable_total_wait_ms: 0,
            dom_stable_ms: cfg.prerender.dom_stable_ms.as_millis(),
            dom_stable_timeout_ms: cfg.prerender.dom_stable_timeout_ms.as_millis(),
            capture_api: cfg.prerender.capture_api,
            api_capture: cfg.prerender.capture_api,
            api_captured_count: 0,
            api_capture_note: None,
            checksums_included: cfg.integrity.checksums,
            checksums: cfg.integrity.checksums,
            checksums_sha256: None,
            resume: ResumeStats::default(),
            environment: Value::Null,
            timings: BTreeMap::new(),
            phase_durations_seconds: BTreeMap::new(),
            reproduce_command: Vec::new(),
            warnings: Vec::new(),
            js_stripping: None,
            plugin_modifications: BTreeMap::new(),
            verification: None,
            verification_meta: None,
            canceled: false,
            size_cap_bytes: cfg.mirror.size_cap_bytes,
            throttle_bytes_per_sec: cfg.mirror.throttle_bytes_per_sec,
            router_intercept: cfg.router.intercept,
            router_max_routes: cfg.router.max_routes,
            wget2_missing: false,
            extensions: BTreeMap::new(),
        }
    }

    /// Assert the two alias pairs the manifest contract requires to stay
    /// equal.
    pub fn aliases_consistent(&self) -> bool {
        self.capture_api == self.api_capture && self.checksums == self.checksums_included
    }

    /// `phase_durations_seconds`: every `timings` entry except keys ending
    /// in `_seconds` (those are already-suffixed leaf timers) and `total`.
    pub fn derive_phase_durations(&mut self) {
        self.phase_durations_seconds = self
            .timings
            .iter()
            .filter(|(k, _)| *k != "total" && !k.ends_with("_seconds"))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::GenericFailure.as_i32(), 1);
        assert_eq!(ExitCode::WgetMissing.as_i32(), 12);
        assert_eq!(ExitCode::DockerUnavailable.as_i32(), 13);
        assert_eq!(ExitCode::VerifyFailed.as_i32(), 14);
        assert_eq!(ExitCode::Canceled.as_i32(), 15);
        assert_eq!(ExitCode::ConfigError.as_i32(), 16);
        assert_eq!(ExitCode::SelftestFailed.as_i32(), 17);
    }

    #[test]
    fn output_folder_joins_dest_and_docker_name() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        assert_eq!(cfg.output_folder(), PathBuf::from("/tmp/out/site"));
    }

    #[test]
    fn validate_requires_url() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.url = "".to_string();
        assert!(matches!(validate(&cfg), Err(ConfigError::MissingUrl)));
    }

    #[test]
    fn validate_requires_docker_name_when_build_set() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.build = true;
        cfg.docker_name = "  ".to_string();
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::MissingDockerNameForBuild)
        ));
    }

    #[test]
    fn validate_rejects_invalid_bind_ip() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.bind_ip = "not-an-ip".to_string();
        assert!(matches!(validate(&cfg), Err(ConfigError::InvalidBindIp(_))));
    }

    #[test]
    fn validate_passes_for_minimal_config() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn normalize_ip_blank_and_localhost_become_loopback() {
        assert_eq!(normalize_ip(""), Some("127.0.0.1".to_string()));
        assert_eq!(normalize_ip("localhost"), Some("127.0.0.1".to_string()));
        assert_eq!(normalize_ip("LOCALHOST"), Some("127.0.0.1".to_string()));
    }

    #[test]
    fn normalize_ip_passes_through_any_bind() {
        assert_eq!(normalize_ip("0.0.0.0"), Some("0.0.0.0".to_string()));
    }

    #[test]
    fn normalize_ip_rejects_non_ipv4() {
        assert_eq!(normalize_ip("not-an-ip"), None);
        assert_eq!(normalize_ip("::1"), None);
    }

    #[test]
    fn normalize_ip_accepts_valid_ipv4() {
        assert_eq!(normalize_ip("10.0.0.5"), Some("10.0.0.5".to_string()));
    }

    #[test]
    fn resume_stats_new_files_saturates_at_zero() {
        let stats = ResumeStats::finish(10, 0, 5, 0);
        assert_eq!(stats.new_files, 0);
    }

    #[test]
    fn resume_stats_new_files_computes_delta() {
        let stats = ResumeStats::finish(10, 2, 15, 2);
        assert_eq!(stats.new_files, 5);
    }

    #[test]
    fn manifest_aliases_start_consistent() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let manifest = Manifest::new(&cfg, "0.1.0", Utc::now());
        assert!(manifest.aliases_consistent());
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let manifest = Manifest::new(&cfg, "0.1.0", Utc::now());
        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, manifest.url);
        assert!(back.aliases_consistent());
    }

    #[test]
    fn manifest_extensions_survive_round_trip() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let mut manifest = Manifest::new(&cfg, "0.1.0", Utc::now());
        manifest
            .extensions
            .insert("plugin_note".to_string(), Value::String("hi".to_string()));
        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.extensions.get("plugin_note"),
            Some(&Value::String("hi".to_string()))
        );
    }

    #[test]
    fn derive_phase_durations_excludes_total_and_seconds_suffixed() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let mut manifest = Manifest::new(&cfg, "0.1.0", Utc::now());
        manifest.timings.insert("total".to_string(), 10.0);
        manifest.timings.insert("mirror".to_string(), 4.0);
        manifest.timings.insert("checksum_seconds".to_string(), 1.0);
        manifest.derive_phase_durations();
        assert_eq!(manifest.phase_durations_seconds.len(), 1);
        assert_eq!(manifest.phase_durations_seconds.get("mirror"), Some(&4.0));
    }

    #[test]
    fn diff_summary_changed_matches_modified_paths() {
        let summary = DiffSummary {
            added: vec![],
            removed: vec![],
            modified: vec![ModifiedEntry {
                path: "a.html".to_string(),
                old_hash: "aaa".to_string(),
                new_hash: "bbb".to_string(),
                old_size: 10,
                new_size: 12,
                delta_bytes: 2,
            }],
            changed: vec!["a.html".to_string()],
            unchanged_count: 3,
            total_current: 4,
        };
        assert_eq!(summary.changed, vec!["a.html".to_string()]);
    }
}
