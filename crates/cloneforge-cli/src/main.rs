//! Headless CLI surface for cloneforge (§6). Parses flags into a
//! [`cloneforge_types::CloneConfig`] layered over an optional `--config`
//! file, drives [`cloneforge::run`], and maps the resulting
//! [`cloneforge_types::CloneResult`] onto one of the fixed exit codes in
//! §4.1. Everything that is genuinely CLI-only — `--dry-run`,
//! `--print-repro`, `--report`, `--open-browser`, shell completions — lives
//! here rather than in the engine, which only ever returns a `CloneResult`
//! and never calls `std::process::exit`.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use clap_complete::{generate, Shell};

use cloneforge_config::{build_config, ConfigOverlay};
use cloneforge_progress::{CancelToken, PlainProgress, ProgressObserver, RichProgress};
use cloneforge_types::{
    ExitCode, IntegrityOptions, MirrorOptions, PrerenderOptions, ProgressStyle, ReportFormat, RouterOptions,
};

#[derive(Parser, Debug)]
#[command(name = "cloneforge", version, about = "Capture a live website into a container-ready clone")]
struct Cli {
    /// Website URL to clone.
    #[arg(long)]
    url: Option<String>,

    /// Destination base directory; the project lands at `<dest>/<docker-name>`.
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Project name: output subdirectory and container image tag.
    #[arg(long = "docker-name")]
    docker_name: Option<String>,

    /// Build the container image after capture.
    #[arg(long, action = ArgAction::SetTrue)]
    build: bool,

    #[arg(long = "bind-ip")]
    bind_ip: Option<String>,
    #[arg(long = "host-port")]
    host_port: Option<u16>,
    #[arg(long = "container-port")]
    container_port: Option<u16>,

    /// Total download quota, e.g. `500M`, `2G`.
    #[arg(long = "size-cap")]
    size_cap: Option<String>,
    /// Throughput limit, e.g. `200K`, `1M`.
    #[arg(long)]
    throttle: Option<String>,
    #[arg(long = "auth-user")]
    auth_user: Option<String>,
    #[arg(long = "auth-pass")]
    auth_pass: Option<String>,
    #[arg(long = "cookies-file")]
    cookies_file: Option<PathBuf>,
    #[arg(long = "import-browser-cookies", action = ArgAction::SetTrue)]
    import_browser_cookies: bool,

    /// Pre-flight URL-count estimate via a spider-mode mirror pass.
    #[arg(long, action = ArgAction::SetTrue)]
    estimate: bool,

    #[arg(long, default_value_t = 1)]
    jobs: u32,

    #[arg(long = "disable-js", action = ArgAction::SetTrue)]
    disable_js: bool,

    #[arg(long = "run-built", action = ArgAction::SetTrue)]
    run_built: bool,
    #[arg(long = "serve-folder", action = ArgAction::SetTrue)]
    serve_folder: bool,
    #[arg(long = "open-browser", action = ArgAction::SetTrue)]
    open_browser: bool,

    #[arg(long, action = ArgAction::SetTrue)]
    prerender: bool,
    #[arg(long = "prerender-max-pages")]
    prerender_max_pages: Option<u32>,
    #[arg(long = "prerender-scroll")]
    prerender_scroll: Option<u32>,
    #[arg(long = "dom-stable-ms")]
    dom_stable_ms: Option<u64>,
    #[arg(long = "dom-stable-timeout-ms")]
    dom_stable_timeout_ms: Option<u64>,

    #[arg(long = "capture-api", action = ArgAction::SetTrue)]
    capture_api: bool,
    /// Allowed content-type prefixes, comma- or slash-delimited.
    #[arg(long = "capture-api-types")]
    capture_api_types: Option<String>,
    #[arg(long = "capture-api-binary", action = ArgAction::SetTrue)]
    capture_api_binary: bool,
    #[arg(long = "capture-storage", action = ArgAction::SetTrue)]
    capture_storage: bool,
    #[arg(long = "capture-graphql", action = ArgAction::SetTrue)]
    capture_graphql: bool,
    #[arg(long = "hook-script")]
    hook_script: Option<PathBuf>,
    #[arg(long = "no-url-rewrite", action = ArgAction::SetTrue)]
    no_url_rewrite: bool,

    #[arg(long = "router-intercept", action = ArgAction::SetTrue)]
    router_intercept: bool,
    #[arg(long = "router-include-hash", action = ArgAction::SetTrue)]
    router_include_hash: bool,
    #[arg(long = "router-max-routes")]
    router_max_routes: Option<u32>,
    #[arg(long = "router-settle-ms")]
    router_settle_ms: Option<u64>,
    #[arg(long = "router-wait-selector")]
    router_wait_selector: Option<String>,
    #[arg(long = "router-allow")]
    router_allow: Option<String>,
    #[arg(long = "router-deny")]
    router_deny: Option<String>,
    #[arg(long = "router-quiet", action = ArgAction::SetTrue)]
    router_quiet: bool,

    #[arg(long = "no-manifest", action = ArgAction::SetTrue)]
    no_manifest: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    checksums: bool,
    #[arg(long = "checksum-ext")]
    checksum_ext: Option<String>,
    #[arg(long = "verify-after", action = ArgAction::SetTrue)]
    verify_after: bool,
    #[arg(long = "verify-deep", action = ArgAction::SetTrue)]
    verify_deep: bool,
    /// Alias of `--verify-after`.
    #[arg(long = "verify-fast", action = ArgAction::SetTrue)]
    verify_fast: bool,

    /// `--config <json|yaml|toml>` overlay, lowest precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, action = ArgAction::SetTrue)]
    incremental: bool,
    #[arg(long = "diff-latest", action = ArgAction::SetTrue)]
    diff_latest: bool,

    #[arg(long = "json-logs", action = ArgAction::SetTrue)]
    json_logs: bool,
    #[arg(long = "plugins-dir")]
    plugins_dir: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
    #[arg(long, value_enum)]
    report: Option<CliReportFormat>,
    #[arg(long = "events-file")]
    events_file: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "plain")]
    progress: CliProgressStyle,
    #[arg(long = "print-repro", action = ArgAction::SetTrue)]
    print_repro: bool,
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    cleanup: bool,
    #[arg(long = "selftest-verification", action = ArgAction::SetTrue)]
    selftest_verification: bool,

    /// Hidden diagnostic: print a shell-completion script and exit.
    #[arg(long = "print-completions", value_enum, hide = true)]
    print_completions: Option<Shell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliProgressStyle {
    Plain,
    Rich,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliReportFormat {
    Json,
    Md,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c| c == ',' || c == '/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn parsed CLI flags into a [`ConfigOverlay`] — only the fields the
/// user actually set are `Some`, so an unset flag never clobbers a
/// `--config` file's value.
fn cli_overlay(cli: &Cli) -> Result<ConfigOverlay> {
    let size_cap_bytes = match &cli.size_cap {
        Some(raw) => Some(cloneforge_duration::parse_size_to_bytes(raw).with_context(|| format!("invalid --size-cap: {raw:?}"))?),
        None => None,
    };
    let throttle_bytes_per_sec = match &cli.throttle {
        Some(raw) => Some(cloneforge_duration::parse_rate_to_bps(raw).with_context(|| format!("invalid --throttle: {raw:?}"))?),
        None => None,
    };

    let auth = cloneforge_auth::resolve_basic_auth(cli.auth_user.as_deref(), cli.auth_pass.as_deref());
    let (auth_user, auth_pass) = match auth {
        Some(a) => (Some(a.username), Some(a.password)),
        None => (None, None),
    };

    let cookies_file = resolve_cookies_file(cli)?;

    let mirror = MirrorOptions {
        jobs: cli.jobs.max(1),
        size_cap_bytes,
        throttle_bytes_per_sec,
        auth_user,
        auth_pass,
        cookies_file,
        import_browser_cookies: cli.import_browser_cookies,
        incremental: cli.incremental,
    };

    let prerender = PrerenderOptions {
        enabled: cli.prerender,
        max_pages: cli.prerender_max_pages.unwrap_or(40),
        scroll_passes: cli.prerender_scroll.unwrap_or(0),
        dom_stable_ms: cloneforge_duration::MillisDuration::from_millis(cli.dom_stable_ms.unwrap_or(0)),
        dom_stable_timeout_ms: cloneforge_duration::MillisDuration::from_millis(cli.dom_stable_timeout_ms.unwrap_or(4000)),
        capture_api: cli.capture_api,
        capture_api_types: cli
            .capture_api_types
            .as_deref()
            .map(split_list)
            .unwrap_or_else(|| vec!["application/json".to_string()]),
        capture_api_binary: cli.capture_api_binary,
        capture_storage: cli.capture_storage,
        capture_graphql: cli.capture_graphql,
        hook_script: cli.hook_script.clone(),
        rewrite_urls: !cli.no_url_rewrite,
    };

    let router = RouterOptions {
        intercept: cli.router_intercept,
        include_hash: cli.router_include_hash,
        max_routes: cli.router_max_routes.unwrap_or(200),
        settle_ms: cloneforge_duration::MillisDuration::from_millis(cli.router_settle_ms.unwrap_or(350)),
        wait_selector: cli.router_wait_selector.clone(),
        allow: cli.router_allow.as_deref().map(split_list).unwrap_or_default(),
        deny: cli.router_deny.as_deref().map(split_list).unwrap_or_default(),
        quiet: cli.router_quiet,
    };

    let integrity = IntegrityOptions {
        emit_manifest: !cli.no_manifest,
        checksums: cli.checksums,
        extra_extensions: cli.checksum_ext.as_deref().map(split_list).unwrap_or_default(),
        verify_after: cli.verify_after || cli.verify_fast,
        verify_deep: cli.verify_deep,
        diff_latest: cli.diff_latest,
    };

    Ok(ConfigOverlay {
        url: cli.url.clone(),
        dest: cli.dest.clone(),
        docker_name: cli.docker_name.clone(),
        bind_ip: cli.bind_ip.clone(),
        host_port: cli.host_port,
        container_port: cli.container_port,
        mirror: Some(mirror),
        prerender: Some(prerender),
        router: Some(router),
        integrity: Some(integrity),
        plugins_dir: cli.plugins_dir.clone(),
        json_logs: Some(cli.json_logs),
        events_file: cli.events_file.clone(),
        progress_style: Some(match cli.progress {
            CliProgressStyle::Plain => ProgressStyle::Plain,
            CliProgressStyle::Rich => ProgressStyle::Rich,
        }),
        profile: Some(cli.profile),
        build: Some(cli.build),
        run_after_build: Some(cli.run_built),
        serve_folder: Some(cli.serve_folder),
        open_browser: Some(cli.open_browser),
        estimate_first: Some(cli.estimate),
        cleanup: Some(cli.cleanup),
        disable_js: Some(cli.disable_js),
        dry_run: Some(cli.dry_run),
        print_repro: Some(cli.print_repro),
        report: cli.report.map(|r| match r {
            CliReportFormat::Json => ReportFormat::Json,
            CliReportFormat::Md => ReportFormat::Md,
        }),
    })
}

/// Resolve a cookies file for the mirror driver: an explicit
/// `--cookies-file` wins outright. `--import-browser-cookies` asks us to
/// pull cookies out of an installed browser's profile store, which (on
/// every desktop OS) means parsing a vendor-proprietary, often
/// OS-keychain-encrypted SQLite database — there is no crate in this
/// workspace's dependency stack for that, and inventing one would mean
/// faking a dependency. So this degrades the same way a missing `wget2`
/// does: log a warning and continue without cookies rather than pretend
/// to support it.
fn resolve_cookies_file(cli: &Cli) -> Result<Option<PathBuf>> {
    if let Some(path) = &cli.cookies_file {
        return Ok(Some(path.clone()));
    }
    if cli.import_browser_cookies {
        eprintln!("[warn] --import-browser-cookies requested but no browser cookie store reader is available; continuing without cookies");
    }
    Ok(None)
}

fn make_progress(style: ProgressStyle, cancel: CancelToken) -> Box<dyn ProgressObserver> {
    match style {
        ProgressStyle::Plain => Box::new(PlainProgress::new(cancel)),
        ProgressStyle::Rich => Box::new(RichProgress::new(cancel)),
    }
}

fn install_cancel_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}

fn write_report(result: &cloneforge_types::CloneResult, format: ReportFormat) -> Result<()> {
    let path = match format {
        ReportFormat::Json => result.output_folder.join("clone_report.json"),
        ReportFormat::Md => result.output_folder.join("clone_report.md"),
    };
    let content = match format {
        ReportFormat::Json => serde_json::to_string_pretty(result)?,
        ReportFormat::Md => render_markdown_report(result),
    };
    std::fs::write(&path, content).with_context(|| format!("writing report: {}", path.display()))?;
    Ok(())
}

fn render_markdown_report(result: &cloneforge_types::CloneResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Clone report: {}\n\n", result.run_id));
    out.push_str(&format!("- success: {}\n", result.success));
    out.push_str(&format!("- container_built: {}\n", result.container_built));
    out.push_str(&format!("- output_folder: {}\n", result.output_folder.display()));
    out.push_str(&format!("- exit_code: {}\n", result.exit_code));
    out.push_str("\n## Timings\n\n");
    for (phase, seconds) in &result.timings {
        out.push_str(&format!("- {phase}: {seconds:.3}s\n"));
    }
    if let Some(diff) = &result.diff_summary {
        out.push_str("\n## Diff\n\n");
        out.push_str(&format!(
            "- added: {}, removed: {}, modified: {}, unchanged: {}\n",
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len(),
            diff.unchanged_count,
        ));
    }
    out
}

fn open_browser_url(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "cmd"
    } else {
        "xdg-open"
    };
    let result = if cfg!(target_os = "windows") {
        std::process::Command::new(opener).args(["/C", "start", url]).spawn()
    } else {
        std::process::Command::new(opener).arg(url).spawn()
    };
    if let Err(err) = result {
        eprintln!("[warn] could not open browser: {err}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = cli.print_completions {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    if cli.selftest_verification {
        let passed = cloneforge::integrity::selftest_verification();
        println!("selftest_verification: {}", if passed { "passed" } else { "failed" });
        std::process::exit(if passed { ExitCode::Success.as_i32() } else { ExitCode::SelftestFailed.as_i32() });
    }

    let overlay = match cli_overlay(&cli) {
        Ok(overlay) => overlay,
        Err(err) => {
            eprintln!("[error] {err:#}");
            std::process::exit(ExitCode::ConfigError.as_i32());
        }
    };

    let cfg = match build_config(cli.config.as_deref(), overlay) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("[error] {err:#}");
            std::process::exit(ExitCode::ConfigError.as_i32());
        }
    };

    if cli.print_repro || cli.dry_run {
        let tokens = cloneforge::repro::reproduce_command(&cfg);
        println!("cloneforge {}", tokens.join(" "));
        if cli.dry_run {
            return Ok(());
        }
    }

    let cancel = CancelToken::new();
    install_cancel_handler(cancel.clone());
    let progress = make_progress(cfg.progress_style, cancel.clone());

    let result = cloneforge::run(&cfg, progress.as_ref(), &cancel).await?;

    if let Some(format) = cfg.report {
        if let Err(err) = write_report(&result, format) {
            eprintln!("[warn] failed to write report: {err:#}");
        }
    }

    if cfg.open_browser && result.success {
        open_browser_url(&format!("http://{}:{}", cfg.bind_ip, cfg.host_port));
    }

    std::process::exit(result.exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_minimal_required_flags() {
        let cli = Cli::parse_from(["cloneforge", "--url", "https://example.com", "--dest", "/tmp/out"]);
        assert_eq!(cli.url.as_deref(), Some("https://example.com"));
        assert_eq!(cli.dest, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn cli_command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_overlay_builds_prerender_group_from_flags() {
        let cli = Cli::parse_from([
            "cloneforge",
            "--url",
            "https://example.com",
            "--dest",
            "/tmp/out",
            "--prerender",
            "--prerender-max-pages",
            "10",
            "--capture-api",
            "--capture-api-types",
            "application/json,text/plain",
        ]);
        let overlay = cli_overlay(&cli).unwrap();
        let prerender = overlay.prerender.unwrap();
        assert!(prerender.enabled);
        assert_eq!(prerender.max_pages, 10);
        assert!(prerender.capture_api);
        assert_eq!(prerender.capture_api_types, vec!["application/json", "text/plain"]);
    }

    #[test]
    fn cli_overlay_parses_size_cap_and_throttle() {
        let cli = Cli::parse_from([
            "cloneforge",
            "--url",
            "https://example.com",
            "--dest",
            "/tmp/out",
            "--size-cap",
            "500M",
            "--throttle",
            "200K",
        ]);
        let overlay = cli_overlay(&cli).unwrap();
        let mirror = overlay.mirror.unwrap();
        assert_eq!(mirror.size_cap_bytes, Some(500 * 1024 * 1024));
        assert_eq!(mirror.throttle_bytes_per_sec, Some(200 * 1024));
    }

    #[test]
    fn cli_overlay_rejects_invalid_size_cap() {
        let cli = Cli::parse_from([
            "cloneforge",
            "--url",
            "https://example.com",
            "--dest",
            "/tmp/out",
            "--size-cap",
            "not-a-size",
        ]);
        assert!(cli_overlay(&cli).is_err());
    }

    #[test]
    fn verify_fast_is_an_alias_for_verify_after() {
        let cli = Cli::parse_from(["cloneforge", "--url", "https://example.com", "--dest", "/tmp/out", "--verify-fast"]);
        let overlay = cli_overlay(&cli).unwrap();
        assert!(overlay.integrity.unwrap().verify_after);
    }

    #[test]
    fn router_allow_deny_split_on_commas() {
        let cli = Cli::parse_from([
            "cloneforge",
            "--url",
            "https://example.com",
            "--dest",
            "/tmp/out",
            "--router-allow",
            "/api,/x",
            "--router-deny",
            "/ignore",
        ]);
        let overlay = cli_overlay(&cli).unwrap();
        let router = overlay.router.unwrap();
        assert_eq!(router.allow, vec!["/api".to_string(), "/x".to_string()]);
        assert_eq!(router.deny, vec!["/ignore".to_string()]);
    }

    #[test]
    fn markdown_report_includes_timings_and_diff() {
        let mut result = cloneforge_types::CloneResult {
            success: true,
            container_built: false,
            output_folder: PathBuf::from("/tmp/out/site"),
            site_root: PathBuf::from("/tmp/out/site/site-root"),
            manifest_path: None,
            diff_summary: Some(cloneforge_types::DiffSummary {
                added: vec!["a.html".to_string()],
                removed: vec![],
                modified: vec![],
                changed: vec![],
                unchanged_count: 3,
                total_current: 4,
            }),
            timings: Default::default(),
            run_id: "run-1".to_string(),
            canceled: false,
            exit_code: 0,
        };
        result.timings.insert("clone".to_string(), 1.5);
        let report = render_markdown_report(&result);
        assert!(report.contains("clone: 1.500s"));
        assert!(report.contains("added: 1"));
    }

    #[test]
    fn resolve_cookies_file_prefers_explicit_path() {
        let mut cli = Cli::parse_from(["cloneforge", "--url", "https://example.com", "--dest", "/tmp/out"]);
        cli.cookies_file = Some(PathBuf::from("/tmp/cookies.txt"));
        cli.import_browser_cookies = true;
        let resolved = resolve_cookies_file(&cli).unwrap();
        assert_eq!(resolved, Some(PathBuf::from("/tmp/cookies.txt")));
    }
}
