//! Static mirroring via `wget2`: command construction, live progress
//! parsing, resume accounting, and exit-code classification.
//!
//! `wget2` itself does almost all the work here; this module's job is to
//! build the exact flag set the original tool used, stream its output
//! line by line so progress percentages reach the caller as they happen,
//! and turn its exit status into something the orchestrator can act on
//! (retry vs. hard failure vs. "missing entirely").

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use regex::Regex;

use cloneforge_output_sanitizer::sanitize_command;
use cloneforge_process::{stream_lines, CommandResult, StreamSource};
use cloneforge_progress::{CancelToken, ProgressObserver};
use cloneforge_state::count_files_and_partials;
use cloneforge_types::{CloneConfig, ResumeStats};

/// Why a mirror run failed, used by the orchestrator to pick an exit code
/// and decide whether a retry is worth attempting.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("wget2 is not installed or not on PATH")]
    ToolMissing,
    #[error("mirror run was canceled")]
    Canceled,
    #[error("wget2 exited with code {code} ({hint}): {sanitized_command}\n...{tail}")]
    NonZeroExit {
        code: i32,
        hint: &'static str,
        sanitized_command: String,
        tail: String,
    },
}

/// How many trailing diagnostic lines are kept for a failure report.
const TAIL_LINES: usize = 25;

/// Exit-code -> short hint, per §4.2's fixed table grounded in the
/// wget/wget2 convention. Unknown non-zero codes map to "generic".
pub fn exit_code_hint(code: i32) -> &'static str {
    match code {
        1 => "generic",
        2 => "parse error",
        3 => "file I/O error",
        4 => "network failure",
        5 => "TLS/SSL verification failure",
        6 => "authentication failure",
        7 => "protocol error",
        8 => "server issued an error response",
        _ => "generic",
    }
}

/// Outcome of one mirror invocation.
#[derive(Debug)]
pub struct MirrorOutcome {
    pub resume: ResumeStats,
    pub command: Vec<String>,
}

/// A bounded ring buffer of the most recent diagnostic lines, used to
/// build a failure-tail report without holding the whole run's output in
/// memory.
struct TailBuffer {
    lines: VecDeque<String>,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, line: &str) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn join(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Build the exact `wget2` argument vector for `cfg`, in the order the
/// original tool assembled it: mirror flags first, then `-j`, quota,
/// rate limit, and auth, each only when configured.
pub fn build_wget2_args(cfg: &CloneConfig, output_folder: &Path) -> Vec<String> {
    let mut args = vec![
        "-e".to_string(),
        "robots=off".to_string(),
        "--mirror".to_string(),
        "--convert-links".to_string(),
        "--adjust-extension".to_string(),
        "--page-requisites".to_string(),
        "--no-parent".to_string(),
        "--continue".to_string(),
        "--progress=dot:mega".to_string(),
        cfg.url.clone(),
        "-P".to_string(),
        output_folder.to_string_lossy().to_string(),
    ];

    if cfg.mirror.incremental {
        args.push("--timestamping".to_string());
    }
    if cfg.mirror.jobs > 1 {
        args.push("-j".to_string());
        args.push(cfg.mirror.jobs.to_string());
    }
    if let Some(cap) = cfg.mirror.size_cap_bytes {
        args.push("--quota".to_string());
        args.push(cloneforge_duration::human_quota_suffix(cap));
    }
    if let Some(rate) = cfg.mirror.throttle_bytes_per_sec {
        args.push("--limit-rate".to_string());
        args.push(cloneforge_duration::human_rate_suffix(rate));
    }
    if let Some(user) = &cfg.mirror.auth_user {
        args.push("--http-user".to_string());
        args.push(user.clone());
        if let Some(pass) = &cfg.mirror.auth_pass {
            args.push("--http-password".to_string());
            args.push(pass.clone());
        }
    }
    if let Some(cookies) = &cfg.mirror.cookies_file {
        args.push("--load-cookies".to_string());
        args.push(cookies.to_string_lossy().to_string());
    }
    args
}

/// Percentage parsed from a `wget2` dot-progress line (e.g. `"...50% "`).
fn parse_percent(line: &str, re: &Regex) -> Option<u8> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
}

/// A transfer-rate token, e.g. `"1.2M"`/`"340K"`/`"980"`, followed by
/// `B/s` (wget2's rate suffix). Returns bytes/sec.
fn parse_rate(line: &str, re: &Regex) -> Option<u64> {
    let caps = re.captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let multiplier: f64 = match unit {
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    Some((value * multiplier) as u64)
}

/// Classify a mirror failure for [`cloneforge_retry`]'s retry decision:
/// network/protocol/server-error exit codes are worth another attempt,
/// auth/parse/I-O errors are not, and anything else is left ambiguous
/// (retried, since a spurious hard failure costs one attempt but a
/// wrongly-abandoned transient one costs the whole run).
fn classify_error(err: &MirrorError) -> cloneforge_retry::ErrorClass {
    match err {
        MirrorError::ToolMissing | MirrorError::Canceled => cloneforge_retry::ErrorClass::Permanent,
        MirrorError::NonZeroExit { code, .. } => match code {
            4 | 7 | 8 => cloneforge_retry::ErrorClass::Retryable,
            2 | 3 | 6 => cloneforge_retry::ErrorClass::Permanent,
            _ => cloneforge_retry::ErrorClass::Ambiguous,
        },
    }
}

/// Run `wget2` against `cfg.url`, retrying on transient failures per
/// `cfg.retry` (exponential backoff by default, capped at
/// `cfg.retry.max_attempts`). A canceled run or a permanent failure class
/// (auth, parse, tool-missing) returns immediately without consuming a
/// retry attempt.
pub fn run_mirror(cfg: &CloneConfig, progress: &dyn ProgressObserver, cancel: &CancelToken) -> Result<MirrorOutcome> {
    let mut attempt = 1u32;
    loop {
        match run_mirror_once(cfg, progress, cancel) {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                let class = err
                    .downcast_ref::<MirrorError>()
                    .map(classify_error)
                    .unwrap_or(cloneforge_retry::ErrorClass::Permanent);
                if cancel.is_canceled() || class == cloneforge_retry::ErrorClass::Permanent || attempt >= cfg.retry.max_attempts.max(1)
                {
                    return Err(err);
                }
                let delay = cloneforge_retry::calculate_delay(&cfg.retry, attempt);
                progress.log(&format!("mirror attempt {attempt} failed ({err}); retrying in {delay:?}"));
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// One attempt at running `wget2` against `cfg.url`, streaming its
/// stdout/stderr lines to `progress`, honoring cooperative cancellation
/// via `cancel`, and returning [`ResumeStats`] computed from file counts
/// before/after.
fn run_mirror_once(
    cfg: &CloneConfig,
    progress: &dyn ProgressObserver,
    cancel: &CancelToken,
) -> Result<MirrorOutcome> {
    if std::env::var("CLONEFORGE_FORCE_NO_MIRROR").is_ok() || !cloneforge_process::command_exists("wget2") {
        return Err(MirrorError::ToolMissing.into());
    }

    let output_folder = cfg.output_folder();
    std::fs::create_dir_all(&output_folder)
        .with_context(|| format!("creating output folder: {}", output_folder.display()))?;

    let (pre_files, pre_partials) = count_files_and_partials(&output_folder);

    let args = build_wget2_args(cfg, &output_folder);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    let percent_re = Regex::new(r"(\d{1,3})%").expect("valid regex");
    let rate_re = Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*([KMG]?)B/s").expect("valid regex");

    let mut tail = TailBuffer::new(TAIL_LINES);
    let mut last_bandwidth_emit = Instant::now() - Duration::from_millis(250);
    let mut last_bandwidth_value: Option<u64> = None;

    let result: CommandResult = stream_lines("wget2", &arg_refs, &output_folder, |source, line| {
        if cancel.is_canceled() {
            return false;
        }
        if source == StreamSource::Stderr {
            progress.log(line);
            tail.push(line);
            if let Some(pct) = parse_percent(line, &percent_re) {
                progress.phase("mirror", Some(pct));
            }
            if let Some(bps) = parse_rate(line, &rate_re) {
                let changed = last_bandwidth_value != Some(bps);
                let elapsed = last_bandwidth_emit.elapsed() >= Duration::from_millis(250);
                if changed && elapsed {
                    progress.bandwidth(bps);
                    last_bandwidth_value = Some(bps);
                    last_bandwidth_emit = Instant::now();
                }
            }
        }
        true
    })?;

    let (post_files, post_partials) = count_files_and_partials(&output_folder);
    let resume = ResumeStats::finish(pre_files, pre_partials, post_files, post_partials);

    if cancel.is_canceled() {
        return Err(MirrorError::Canceled.into());
    }
    if !result.success {
        let code = result.exit_code.unwrap_or(-1);
        return Err(MirrorError::NonZeroExit {
            code,
            hint: exit_code_hint(code),
            sanitized_command: sanitize_command("wget2", &args),
            tail: tail.join(),
        }
        .into());
    }

    Ok(MirrorOutcome {
        resume,
        command: std::iter::once("wget2".to_string()).chain(args).collect(),
    })
}

/// Locate the site root: the shallowest directory under `base_path`
/// containing an `index.html`/`index.htm`/`index.php`, or `base_path`
/// itself if none is found.
pub fn find_site_root(base_path: &Path) -> std::path::PathBuf {
    let mut stack = vec![base_path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                subdirs.push(path);
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let lower = name.to_ascii_lowercase();
                if lower == "index.html" || lower == "index.htm" || lower == "index.php" {
                    return dir;
                }
            }
        }
        stack.extend(subdirs);
    }
    base_path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloneforge_progress::NullProgress;
    use tempfile::tempdir;

    #[test]
    fn build_wget2_args_includes_mandatory_flags() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let args = build_wget2_args(&cfg, Path::new("/tmp/out/site"));
        assert!(args.contains(&"--mirror".to_string()));
        assert!(args.contains(&"--convert-links".to_string()));
        assert!(args.contains(&"https://example.com".to_string()));
    }

    #[test]
    fn build_wget2_args_adds_timestamping_when_incremental() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.mirror.incremental = true;
        let args = build_wget2_args(&cfg, Path::new("/tmp/out/site"));
        assert!(args.contains(&"--timestamping".to_string()));
    }

    #[test]
    fn build_wget2_args_omits_timestamping_by_default() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let args = build_wget2_args(&cfg, Path::new("/tmp/out/site"));
        assert!(!args.contains(&"--timestamping".to_string()));
    }

    #[test]
    fn build_wget2_args_omits_jobs_flag_when_single_threaded() {
        let cfg = CloneConfig::new("https://example.com", "/tmp/out");
        let args = build_wget2_args(&cfg, Path::new("/tmp/out/site"));
        assert!(!args.contains(&"-j".to_string()));
    }

    #[test]
    fn build_wget2_args_adds_jobs_quota_and_throttle() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.mirror.jobs = 8;
        cfg.mirror.size_cap_bytes = Some(500 * 1024 * 1024);
        cfg.mirror.throttle_bytes_per_sec = Some(2 * 1024 * 1024);
        let args = build_wget2_args(&cfg, Path::new("/tmp/out/site"));
        assert!(args.contains(&"-j".to_string()));
        assert!(args.contains(&"8".to_string()));
        assert!(args.contains(&"--quota".to_string()));
        assert!(args.contains(&"500M".to_string()));
        assert!(args.contains(&"--limit-rate".to_string()));
        assert!(args.contains(&"2M".to_string()));
    }

    #[test]
    fn build_wget2_args_adds_auth_only_when_configured() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/out");
        cfg.mirror.auth_user = Some("admin".to_string());
        cfg.mirror.auth_pass = Some("secret".to_string());
        let args = build_wget2_args(&cfg, Path::new("/tmp/out/site"));
        assert!(args.contains(&"--http-user".to_string()));
        assert!(args.contains(&"admin".to_string()));
        assert!(args.contains(&"--http-password".to_string()));
        assert!(args.contains(&"secret".to_string()));
    }

    #[test]
    fn parse_percent_extracts_leading_number() {
        let re = Regex::new(r"(\d{1,3})%").unwrap();
        assert_eq!(parse_percent(" 42% [===>   ]", &re), Some(42));
        assert_eq!(parse_percent("no percent here", &re), None);
    }

    #[test]
    fn find_site_root_locates_nested_index() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("example.com")).unwrap();
        std::fs::write(dir.path().join("example.com/index.html"), "<html></html>").unwrap();
        let root = find_site_root(dir.path());
        assert_eq!(root, dir.path().join("example.com"));
    }

    #[test]
    fn find_site_root_falls_back_to_base_when_no_index() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), "hi").unwrap();
        assert_eq!(find_site_root(dir.path()), dir.path());
    }

    #[test]
    fn run_mirror_fails_fast_when_tool_missing() {
        if cloneforge_process::command_exists("wget2") {
            return;
        }
        let cfg = CloneConfig::new("https://example.com", "/tmp/cloneforge-test-out");
        let err = run_mirror(&cfg, &NullProgress::new(), &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("wget2"));
    }

    #[test]
    fn exit_code_hint_maps_known_codes() {
        assert_eq!(exit_code_hint(4), "network failure");
        assert_eq!(exit_code_hint(6), "authentication failure");
        assert_eq!(exit_code_hint(99), "generic");
    }

    #[test]
    fn classify_error_treats_network_as_retryable_and_auth_as_permanent() {
        let network = MirrorError::NonZeroExit {
            code: 4,
            hint: exit_code_hint(4),
            sanitized_command: String::new(),
            tail: String::new(),
        };
        let auth = MirrorError::NonZeroExit {
            code: 6,
            hint: exit_code_hint(6),
            sanitized_command: String::new(),
            tail: String::new(),
        };
        assert_eq!(classify_error(&network), cloneforge_retry::ErrorClass::Retryable);
        assert_eq!(classify_error(&auth), cloneforge_retry::ErrorClass::Permanent);
        assert_eq!(classify_error(&MirrorError::ToolMissing), cloneforge_retry::ErrorClass::Permanent);
    }

    #[test]
    fn run_mirror_does_not_retry_permanent_tool_missing_failure() {
        if cloneforge_process::command_exists("wget2") {
            return;
        }
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/cloneforge-test-out3");
        cfg.retry.max_attempts = 5;
        let started = Instant::now();
        let err = run_mirror(&cfg, &NullProgress::new(), &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("wget2"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn parse_rate_handles_suffixes() {
        let re = Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*([KMG]?)B/s").unwrap();
        assert_eq!(parse_rate("1.2MB/s", &re), Some((1.2 * 1024.0 * 1024.0) as u64));
        assert_eq!(parse_rate("500KB/s", &re), Some(500 * 1024));
        assert_eq!(parse_rate("no rate here", &re), None);
    }

    #[test]
    fn nonzero_exit_error_sanitizes_credentials() {
        let mut cfg = CloneConfig::new("https://example.com", "/tmp/cloneforge-test-out2");
        cfg.mirror.auth_user = Some("admin".to_string());
        cfg.mirror.auth_pass = Some("hunter2".to_string());
        let args = build_wget2_args(&cfg, Path::new("/tmp/cloneforge-test-out2/site"));
        let err = MirrorError::NonZeroExit {
            code: 6,
            hint: exit_code_hint(6),
            sanitized_command: sanitize_command("wget2", &args),
            tail: String::new(),
        };
        let rendered = err.to_string();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
