//! Reproduction-command generation (§4.8) and pre-flight estimation.
//!
//! `reproduce_command` must be deterministic: identical [`CloneConfig`] ->
//! identical token list, order included. The field order below is fixed
//! and must never be reordered — that ordering *is* the contract S6 tests
//! against.

use std::path::Path;

use regex::Regex;

use cloneforge_process::{stream_lines, StreamSource};
use cloneforge_progress::{CancelToken, ProgressObserver};
use cloneforge_types::CloneConfig;

const DEFAULT_DOCKER_NAME: &str = "site";
const DEFAULT_BIND_IP: &str = "127.0.0.1";
const DEFAULT_HOST_PORT: u16 = 8080;
const DEFAULT_CONTAINER_PORT: u16 = 80;
const DEFAULT_JOBS: u32 = 1;
const DEFAULT_PRERENDER_MAX_PAGES: u32 = 40;
const DEFAULT_ROUTER_MAX_ROUTES: u32 = 200;
const DEFAULT_ROUTER_SETTLE_MS: u64 = 350;
const DEFAULT_DOM_STABLE_TIMEOUT_MS: u64 = 4000;

/// Build the deterministic `reproduce_command` token list for `cfg`.
///
/// Boolean flags appear only when true; integer/string fields only when
/// they differ from their documented default; list fields join with
/// commas. `--docker-name`/`--bind-ip`/`--host-port`/`--container-port`
/// come first (identity), then mirroring, then dynamic capture, then
/// router, then integrity, matching the field-group order of §3.
pub fn reproduce_command(cfg: &CloneConfig) -> Vec<String> {
    let mut tokens = vec!["--url".to_string(), cfg.url.clone()];

    if cfg.docker_name != DEFAULT_DOCKER_NAME {
        tokens.push(format!("--docker-name={}", cfg.docker_name));
    }
    if cfg.bind_ip != DEFAULT_BIND_IP {
        tokens.push(format!("--bind-ip={}", cfg.bind_ip));
    }
    if cfg.host_port != DEFAULT_HOST_PORT {
        tokens.push(format!("--host-port={}", cfg.host_port));
    }
    if cfg.container_port != DEFAULT_CONTAINER_PORT {
        tokens.push(format!("--container-port={}", cfg.container_port));
    }
    if cfg.build {
        tokens.push("--build".to_string());
    }
    if cfg.disable_js {
        tokens.push("--disable-js".to_string());
    }

    if cfg.mirror.jobs != DEFAULT_JOBS {
        tokens.push(format!("--jobs={}", cfg.mirror.jobs));
    }
    if let Some(cap) = cfg.mirror.size_cap_bytes {
        tokens.push(format!("--size-cap={}", cloneforge_duration::human_quota_suffix(cap)));
    }
    if let Some(rate) = cfg.mirror.throttle_bytes_per_sec {
        tokens.push(format!("--throttle={}", cloneforge_duration::human_rate_suffix(rate)));
    }
    if cfg.mirror.import_browser_cookies {
        tokens.push("--import-browser-cookies".to_string());
    }
    if cfg.mirror.incremental {
        tokens.push("--incremental".to_string());
    }

    if cfg.prerender.enabled {
        tokens.push("--prerender".to_string());
    }
    if cfg.prerender.max_pages != DEFAULT_PRERENDER_MAX_PAGES {
        tokens.push(format!("--prerender-max-pages={}", cfg.prerender.max_pages));
    }
    if cfg.prerender.scroll_passes > 0 {
        tokens.push(format!("--prerender-scroll={}", cfg.prerender.scroll_passes));
    }
    if cfg.prerender.dom_stable_ms.as_millis() > 0 {
        tokens.push(format!("--dom-stable-ms={}", cfg.prerender.dom_stable_ms.as_millis()));
    }
    if cfg.prerender.dom_stable_timeout_ms.as_millis() != DEFAULT_DOM_STABLE_TIMEOUT_MS {
        tokens.push(format!(
            "--dom-stable-timeout-ms={}",
            cfg.prerender.dom_stable_timeout_ms.as_millis()
        ));
    }
    if cfg.prerender.capture_api {
        tokens.push("--capture-api".to_string());
    }
    if cfg.prerender.capture_api_binary {
        tokens.push("--capture-api-binary".to_string());
    }
    if cfg.prerender.capture_storage {
        tokens.push("--capture-storage".to_string());
    }
    if cfg.prerender.capture_graphql {
        tokens.push("--capture-graphql".to_string());
    }
    if !cfg.prerender.rewrite_urls {
        tokens.push("--no-url-rewrite".to_string());
    }

    if cfg.router.intercept {
        tokens.push("--router-intercept".to_string());
    }
    if cfg.router.include_hash {
        tokens.push("--router-include-hash".to_string());
    }
    if cfg.router.max_routes != DEFAULT_ROUTER_MAX_ROUTES {
        tokens.push(format!("--router-max-routes={}", cfg.router.max_routes));
    }
    if cfg.router.settle_ms.as_millis() != DEFAULT_ROUTER_SETTLE_MS {
        tokens.push(format!("--router-settle-ms={}", cfg.router.settle_ms.as_millis()));
    }
    if !cfg.router.allow.is_empty() {
        tokens.push(format!("--router-allow={}", cfg.router.allow.join(",")));
    }
    if !cfg.router.deny.is_empty() {
        tokens.push(format!("--router-deny={}", cfg.router.deny.join(",")));
    }
    if cfg.router.quiet {
        tokens.push("--router-quiet".to_string());
    }

    if !cfg.integrity.emit_manifest {
        tokens.push("--no-manifest".to_string());
    }
    if cfg.integrity.checksums {
        tokens.push("--checksums".to_string());
    }
    if !cfg.integrity.extra_extensions.is_empty() {
        tokens.push(format!("--checksum-ext={}", cfg.integrity.extra_extensions.join(",")));
    }
    if cfg.integrity.verify_after {
        tokens.push("--verify-after".to_string());
    }
    if cfg.integrity.verify_deep {
        tokens.push("--verify-deep".to_string());
    }
    if cfg.integrity.diff_latest {
        tokens.push("--diff-latest".to_string());
    }

    tokens
}

/// Run the mirror tool in spider mode to enumerate URLs without
/// downloading anything, de-duplicating absolute URLs seen on stdout.
/// Never blocks indefinitely or fails the run — any error just yields an
/// empty estimate.
pub fn estimate_url_count(
    cfg: &CloneConfig,
    progress: &dyn ProgressObserver,
    cancel: &CancelToken,
) -> u64 {
    if !cloneforge_process::command_exists("wget2") {
        return 0;
    }
    let url_re = match Regex::new(r"https?://[^\s'""<>]+") {
        Ok(re) => re,
        Err(_) => return 0,
    };

    let output_folder = cfg.output_folder();
    let _ = std::fs::create_dir_all(&output_folder);

    let args = [
        "--spider",
        "--recursive",
        "--no-parent",
        "-e",
        "robots=off",
        cfg.url.as_str(),
    ];

    let mut seen: Vec<String> = Vec::new();
    let result = stream_lines("wget2", &args, &output_folder, |_source, line| {
        if cancel.is_canceled() {
            return false;
        }
        for m in url_re.find_iter(line) {
            let found = m.as_str().to_string();
            if !seen.contains(&found) {
                seen.push(found);
            }
        }
        true
    });

    match result {
        Ok(_) => {
            let count = seen.len() as u64;
            progress.log(&format!("estimate: {count} URL(s) discovered"));
            count
        }
        Err(_) => 0,
    }
}

/// Find a `README_<docker_name>.md` if one exists, for the estimator and
/// verifier's README-append step.
pub fn readme_path(output_folder: &Path, docker_name: &str) -> std::path::PathBuf {
    output_folder.join(format!("README_{docker_name}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduce_command_starts_with_url() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let tokens = reproduce_command(&cfg);
        assert_eq!(tokens[0], "--url");
        assert_eq!(tokens[1], "https://example.com");
    }

    #[test]
    fn reproduce_command_omits_defaults() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let tokens = reproduce_command(&cfg);
        assert!(!tokens.iter().any(|t| t.starts_with("--docker-name")));
        assert!(!tokens.iter().any(|t| t.starts_with("--bind-ip")));
        assert!(!tokens.iter().any(|t| t.starts_with("--jobs")));
    }

    #[test]
    fn reproduce_command_is_deterministic() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        assert_eq!(reproduce_command(&cfg), reproduce_command(&cfg));
    }

    #[test]
    fn reproduce_command_scenario_s6_token_order() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.prerender.enabled = true;
        cfg.prerender.capture_api = true;
        cfg.integrity.checksums = true;
        cfg.integrity.verify_after = true;
        cfg.mirror.incremental = true;
        cfg.integrity.diff_latest = true;
        cfg.disable_js = true;
        cfg.router.allow = vec!["/api".to_string(), "/x".to_string()];
        cfg.router.deny = vec!["/ignore".to_string()];

        let tokens = reproduce_command(&cfg);
        let expected = [
            "--prerender",
            "--capture-api",
            "--checksums",
            "--verify-after",
            "--incremental",
            "--diff-latest",
            "--disable-js",
            "--router-allow=/api,/x",
            "--router-deny=/ignore",
        ];
        let positions: Vec<usize> = expected
            .iter()
            .map(|tok| tokens.iter().position(|t| t == tok).expect("token present"))
            .collect();
        let sorted = {
            let mut p = positions.clone();
            p.sort();
            p
        };
        assert_eq!(positions, sorted, "tokens must appear in the expected order");
    }

    #[test]
    fn reproduce_command_lists_join_with_commas() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.integrity.extra_extensions = vec!["txt".to_string(), "xml".to_string()];
        let tokens = reproduce_command(&cfg);
        assert!(tokens.contains(&"--checksum-ext=txt,xml".to_string()));
    }

    #[test]
    fn readme_path_uses_docker_name() {
        let path = readme_path(Path::new("/out/site"), "site");
        assert_eq!(path, std::path::PathBuf::from("/out/site/README_site.md"));
    }
}
