//! Phase sequencing: the engine's single public entry point.
//!
//! `run` drives every phase in a fixed order — start, estimate, clone,
//! prerender, js_strip, scaffold, build, run/serve, readme, diff,
//! manifest, verify, post_asset, finalize, cleanup, summary — emitting a
//! `phase_start`/`phase_end` event pair around each one, polling
//! cancellation at every phase boundary, and mapping whatever went wrong
//! onto a single, stable [`ExitCode`].

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use cloneforge_events::{EventEmitter, EventKind};
use cloneforge_progress::{CancelToken, ProgressObserver};
use cloneforge_types::{CloneConfig, CloneResult, ExitCode, Manifest};

use crate::build;
use crate::integrity;
use crate::mirror::{self, MirrorError};
use crate::plugin::PluginHost;
use crate::postproc;
use crate::regex_warn;
use crate::renderer;
use crate::repro;

/// A single phase's wall-clock weight, summing to 1.0 across the whole
/// run. `clone` dominates since mirroring is almost always the slowest
/// step; everything else draws from a small shared remainder. Used only
/// to scale the overall percentage reported to `progress.phase`, never
/// persisted.
struct PhaseWeights;
impl PhaseWeights {
    const CLONE: f64 = 0.55;
    const PRERENDER: f64 = 0.15;
    const BUILD: f64 = 0.10;
    const CHECKSUMS: f64 = 0.08;
    const VERIFY: f64 = 0.05;
    const OTHER: f64 = 0.07;
}

fn tool_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

struct PhaseTimer {
    started: Instant,
}

impl PhaseTimer {
    fn start() -> Self {
        Self { started: Instant::now() }
    }

    fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Run one full clone per `cfg`. Never panics on a user-reachable error
/// path — every failure folds into [`CloneResult::exit_code`] instead.
pub async fn run(cfg: &CloneConfig, progress: &dyn ProgressObserver, cancel: &CancelToken) -> Result<CloneResult> {
    if std::env::var("CLONEFORGE_FORCE_CANCEL").is_ok() {
        cancel.cancel();
    }

    let run_id = format!("run-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let events = match &cfg.events_file {
        Some(path) => EventEmitter::to_file(&run_id, tool_version(), path)?,
        None => EventEmitter::buffered(&run_id, tool_version()),
    };

    let output_folder = cfg.output_folder();
    std::fs::create_dir_all(&output_folder).ok();
    let site_root = output_folder.join("site-root");

    let mut manifest = Manifest::new(cfg, tool_version(), Utc::now());
    manifest.reproduce_command = repro::reproduce_command(cfg);
    if let Ok(env_info) = cloneforge_environment::EnvironmentInfo::collect(tool_version()) {
        manifest.environment = serde_json::to_value(&env_info).unwrap_or(serde_json::Value::Null);
    }

    let mut timings = std::collections::BTreeMap::new();
    let total_timer = PhaseTimer::start();

    events.emit(EventKind::Start, json!({"url": cfg.url, "output_folder": output_folder}))?;
    progress.log(&format!("starting clone: {}", cfg.url));

    let risky = regex_warn::scan_router_patterns(&cfg.router.allow, &cfg.router.deny);
    for (pattern, shape) in &risky {
        events.emit(EventKind::RegexWarning, json!({"pattern": pattern, "shape": shape.as_str()}))?;
        manifest
            .warnings
            .push(format!("risky regex in router pattern {pattern:?}: {}", shape.as_str()));
    }

    if cfg.estimate_first {
        let estimated = run_phase(&events, "estimate", || {
            Ok(repro::estimate_url_count(cfg, progress, cancel))
        })?;
        events.emit(EventKind::Estimate, json!({"url_count": estimated}))?;
    }

    if cancel.is_canceled() {
        return Ok(finish_canceled(cfg, manifest, &output_folder, &site_root, &run_id, &events, &mut timings, &total_timer));
    }

    // --- clone -----------------------------------------------------------
    let clone_timer = PhaseTimer::start();
    events.emit(EventKind::PhaseStart, json!({"phase": "clone"}))?;
    progress.phase("clone", Some(0));
    let mirror_result = mirror::run_mirror(cfg, progress, cancel);
    let clone_elapsed = clone_timer.elapsed_seconds();
    timings.insert("clone".to_string(), clone_elapsed);

    match mirror_result {
        Ok(outcome) => {
            manifest.resume = outcome.resume;
            manifest.clone_success = true;
            events.emit(EventKind::PhaseEnd, json!({"phase": "clone", "elapsed_seconds": clone_elapsed}))?;
        }
        Err(err) => {
            let is_missing = err.downcast_ref::<MirrorError>().map(|e| matches!(e, MirrorError::ToolMissing)).unwrap_or(false);
            let is_canceled = err.downcast_ref::<MirrorError>().map(|e| matches!(e, MirrorError::Canceled)).unwrap_or(false);
            events.emit(EventKind::PhaseError, json!({"phase": "clone", "error": err.to_string()}))?;

            if is_canceled || cancel.is_canceled() {
                return Ok(finish_canceled(cfg, manifest, &output_folder, &site_root, &run_id, &events, &mut timings, &total_timer));
            }
            if is_missing {
                manifest.wget2_missing = true;
                manifest.warnings.push("wget2 not found; produced a degraded manifest with no mirrored content".to_string());
                return Ok(finalize_result(
                    cfg,
                    manifest,
                    &output_folder,
                    &site_root,
                    &run_id,
                    &events,
                    &mut timings,
                    &total_timer,
                    false,
                    ExitCode::WgetMissing,
                    None,
                ));
            }
            manifest.warnings.push(format!("clone failed: {err}"));
            return Ok(finalize_result(
                cfg,
                manifest,
                &output_folder,
                &site_root,
                &run_id,
                &events,
                &mut timings,
                &total_timer,
                false,
                ExitCode::GenericFailure,
                None,
            ));
        }
    }
    let _ = copy_to_site_root(&output_folder, &site_root);

    // --- prerender ---------------------------------------------------------
    if cfg.prerender.enabled {
        if cancel.is_canceled() {
            return Ok(finish_canceled(cfg, manifest, &output_folder, &site_root, &run_id, &events, &mut timings, &total_timer));
        }
        let prerender_timer = PhaseTimer::start();
        events.emit(EventKind::PhaseStart, json!({"phase": "prerender"}))?;
        match renderer::render_site(&cfg.url, &site_root, &cfg.prerender, &cfg.router, progress, cancel).await {
            Ok(stats) => {
                manifest.prerender_pages_processed = stats.pages_processed;
                manifest.routes_discovered = stats.routes_discovered;
                manifest.storage_captured_count = stats.storage_captured;
                manifest.graphql_captured_count = stats.graphql_captured;
                manifest.dom_stable_pages = stats.dom_stable_pages;
                manifest.dom_stable_total_wait_ms = stats.dom_stable_total_wait_ms;
                manifest.api_captured_count = stats.api_captured;
                if !stats.browser_available {
                    manifest.warnings.push("prerender requested but no browser binary was found".to_string());
                    manifest.api_capture_note = Some("browser unavailable; prerender skipped".to_string());
                }
            }
            Err(err) => {
                events.emit(EventKind::PhaseError, json!({"phase": "prerender", "error": err.to_string()}))?;
                manifest.warnings.push(format!("prerender failed: {err}"));
            }
        }
        let elapsed = prerender_timer.elapsed_seconds();
        timings.insert("prerender".to_string(), elapsed);
        events.emit(EventKind::PhaseEnd, json!({"phase": "prerender", "elapsed_seconds": elapsed}))?;
    } else if cfg.router.intercept {
        manifest.warnings.push("router interception requested without --prerender; ignored".to_string());
    }

    // --- js_strip -----------------------------------------------------------
    if cfg.disable_js {
        let timer = PhaseTimer::start();
        events.emit(EventKind::PhaseStart, json!({"phase": "js_strip"}))?;
        match postproc::strip_site(&site_root, true) {
            Ok(stats) => manifest.js_stripping = Some(stats),
            Err(err) => manifest.warnings.push(format!("js stripping failed: {err}")),
        }
        let elapsed = timer.elapsed_seconds();
        timings.insert("js_strip".to_string(), elapsed);
        events.emit(EventKind::PhaseEnd, json!({"phase": "js_strip", "elapsed_seconds": elapsed}))?;
    }

    // --- scaffold + build ---------------------------------------------------
    let mut container_built = false;
    if cfg.build {
        let timer = PhaseTimer::start();
        events.emit(EventKind::PhaseStart, json!({"phase": "scaffold"}))?;
        let dockerfile = postproc::render_dockerfile(cfg.container_port);
        let nginx_conf = postproc::render_nginx_conf(cfg.container_port, cfg.disable_js);
        let _ = std::fs::write(build::dockerfile_path(&output_folder), dockerfile);
        let _ = std::fs::write(output_folder.join("nginx.conf"), nginx_conf);
        events.emit(EventKind::PhaseEnd, json!({"phase": "scaffold"}))?;

        if !cloneforge_process::command_exists("docker") {
            manifest.warnings.push("build requested but docker was not found".to_string());
        } else {
            events.emit(EventKind::PhaseStart, json!({"phase": "build"}))?;
            match build::build_image(&output_folder, &cfg.docker_name, progress, cancel) {
                Ok(()) => {
                    container_built = true;
                    manifest.docker_built = true;
                }
                Err(err) => {
                    events.emit(EventKind::PhaseError, json!({"phase": "build", "error": err.to_string()}))?;
                    manifest.warnings.push(format!("build failed: {err}"));
                }
            }
            events.emit(EventKind::PhaseEnd, json!({"phase": "build"}))?;
        }
        timings.insert("build".to_string(), timer.elapsed_seconds());
    }

    // --- run / serve ---------------------------------------------------------
    if container_built && cfg.run_after_build {
        match build::run_container(&cfg.docker_name, &cfg.bind_ip, cfg.host_port, cfg.container_port) {
            Ok(container_id) => {
                events.emit(EventKind::RunContainer, json!({"container_id": container_id, "host_port": cfg.host_port}))?;
            }
            Err(err) => manifest.warnings.push(format!("run-after-build failed: {err}")),
        }
    } else if cfg.serve_folder {
        let nginx_conf_path = output_folder.join("nginx.conf");
        let _ = std::fs::write(&nginx_conf_path, postproc::render_nginx_conf(cfg.container_port, cfg.disable_js));
        match build::serve_folder(&site_root, &nginx_conf_path, &cfg.docker_name, &cfg.bind_ip, cfg.host_port, cfg.container_port) {
            Ok(container_id) => {
                events.emit(EventKind::ServeFolder, json!({"container_id": container_id, "host_port": cfg.host_port}))?;
            }
            Err(err) => manifest.warnings.push(format!("serve-folder failed: {err}")),
        }
    }

    // --- readme ----------------------------------------------------------
    let readme_path = repro::readme_path(&output_folder, &cfg.docker_name);
    let _ = std::fs::write(&readme_path, render_readme(cfg, &manifest));

    // --- diff --------------------------------------------------------------
    let mut diff_summary = None;
    if cfg.integrity.diff_latest || cfg.mirror.incremental {
        let timer = PhaseTimer::start();
        events.emit(EventKind::PhaseStart, json!({"phase": "diff"}))?;
        if let Ok(diff) = run_diff(&site_root) {
            events.emit(
                EventKind::DiffSummary,
                json!({"added": diff.added.len(), "removed": diff.removed.len(), "changed": diff.changed.len()}),
            )?;
            diff_summary = Some(diff);
        }
        timings.insert("diff".to_string(), timer.elapsed_seconds());
        events.emit(EventKind::PhaseEnd, json!({"phase": "diff"}))?;
    }

    // --- manifest (checksums) -----------------------------------------------
    if cfg.integrity.checksums {
        let timer = PhaseTimer::start();
        events.emit(EventKind::PhaseStart, json!({"phase": "checksums"}))?;
        if cancel.is_canceled() {
            events.emit(EventKind::ChecksumsCanceled, json!({}))?;
        } else {
            match integrity::compute_checksums(&site_root, &cfg.integrity.extra_extensions, progress, cancel) {
                Ok(map) => manifest.checksums_sha256 = Some(map),
                Err(err) => manifest.warnings.push(format!("checksum computation failed: {err}")),
            }
            let _ = std::fs::write(output_folder.join("verify_checksums.py"), integrity::render_verify_script());
        }
        timings.insert("checksums".to_string(), timer.elapsed_seconds());
        events.emit(EventKind::PhaseEnd, json!({"phase": "checksums"}))?;
    }

    // --- verify --------------------------------------------------------------
    let mut verification_failed = false;
    if cfg.integrity.verify_after {
        if let Some(checksums) = manifest.checksums_sha256.clone() {
            let timer = PhaseTimer::start();
            events.emit(EventKind::PhaseStart, json!({"phase": "verify"}))?;
            let (outcome, fast_missing) = integrity::verify(&site_root, &checksums, cfg.integrity.verify_deep);
            verification_failed = !outcome.passed();
            events.emit(EventKind::Verify, json!({"summary": outcome.summary_line()}))?;
            let elapsed = timer.elapsed_seconds();
            integrity::merge_into_manifest(&mut manifest, &outcome, fast_missing, Duration::from_secs_f64(elapsed));
            if let Ok(existing) = std::fs::read_to_string(&readme_path) {
                let _ = std::fs::write(&readme_path, integrity::append_readme_section(&existing, &outcome));
            }
            timings.insert("verify".to_string(), elapsed);
            events.emit(EventKind::PhaseEnd, json!({"phase": "verify", "elapsed_seconds": elapsed}))?;
        } else {
            manifest.warnings.push("--verify-after requested but no checksums were computed".to_string());
        }
    }

    // --- post_asset --------------------------------------------------------
    if let Some(plugins_dir) = &cfg.plugins_dir {
        let timer = PhaseTimer::start();
        let mut host = PluginHost::load(plugins_dir);
        for plugin in &host.loaded {
            events.emit(EventKind::PluginLoaded, json!({"plugin": plugin.name}))?;
        }
        for (name, error) in &host.load_failures {
            events.emit(EventKind::PluginLoadFailed, json!({"plugin": name, "error": error}))?;
        }

        if !host.is_empty() {
            events.emit(EventKind::PostAssetStart, json!({"plugin_count": host.loaded.len()}))?;
            host.pre_download(json!({"url": cfg.url}));
            if let Err(err) = run_post_asset(&mut host, &site_root, cancel) {
                events.emit(EventKind::PostAssetError, json!({"error": err.to_string()}))?;
            }
            manifest.plugin_modifications = host.modification_counts.clone();
            events.emit(EventKind::PostAssetEnd, json!({}))?;

            events.emit(EventKind::PluginFinalizeStart, json!({}))?;
            let manifest_value = serde_json::to_value(&manifest).unwrap_or(serde_json::Value::Null);
            let (merged, errors) = host.finalize(&output_folder, manifest_value, json!({"url": cfg.url}), cancel);
            for error in &errors {
                events.emit(EventKind::PluginFinalizeError, json!({"error": error}))?;
            }
            if let Ok(updated) = serde_json::from_value::<Manifest>(merged) {
                manifest = updated;
            }
            events.emit(EventKind::PluginFinalizeEnd, json!({}))?;
        }
        timings.insert("post_asset".to_string(), timer.elapsed_seconds());
    }

    // --- cleanup -------------------------------------------------------------
    if cfg.cleanup {
        let timer = PhaseTimer::start();
        let removed = cleanup_partials(&site_root);
        build::cleanup_scaffold(&output_folder, !container_built);
        events.emit(EventKind::CleanupRemoved, json!({"count": removed}))?;
        timings.insert("cleanup".to_string(), timer.elapsed_seconds());
    }

    let exit_code = if verification_failed {
        ExitCode::VerifyFailed
    } else {
        ExitCode::Success
    };

    Ok(finalize_result(
        cfg,
        manifest,
        &output_folder,
        &site_root,
        &run_id,
        &events,
        &mut timings,
        &total_timer,
        true,
        exit_code,
        diff_summary,
    ))
}

fn run_phase<T>(events: &EventEmitter, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    events.emit(EventKind::PhaseStart, json!({"phase": name}))?;
    let result = f();
    match &result {
        Ok(_) => {
            let _ = events.emit(EventKind::PhaseEnd, json!({"phase": name}));
        }
        Err(err) => {
            let _ = events.emit(EventKind::PhaseError, json!({"phase": name, "error": err.to_string()}));
        }
    }
    result
}

fn copy_to_site_root(output_folder: &std::path::Path, site_root: &std::path::Path) -> Result<()> {
    if site_root.exists() {
        return Ok(());
    }
    let mirrored_root = mirror::find_site_root(output_folder);
    if mirrored_root == *site_root {
        return Ok(());
    }
    std::fs::create_dir_all(site_root)?;
    copy_tree(&mirrored_root, site_root)
}

fn copy_tree(src: &std::path::Path, dst: &std::path::Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

fn run_diff(site_root: &std::path::Path) -> Result<cloneforge_types::DiffSummary> {
    let state_path = cloneforge_state::state_path(site_root);
    let current = cloneforge_state::Snapshot::capture(site_root)?;
    let diff = if state_path.exists() {
        let previous = cloneforge_state::Snapshot::load(&state_path)?;
        current.diff(&previous)
    } else {
        current.diff(&cloneforge_state::Snapshot::default())
    };
    current.save(&state_path)?;
    Ok(diff)
}

fn run_post_asset(host: &mut PluginHost, site_root: &std::path::Path, cancel: &CancelToken) -> Result<()> {
    if !site_root.exists() {
        return Ok(());
    }
    walk_post_asset(host, site_root, site_root, cancel)
}

fn walk_post_asset(host: &mut PluginHost, root: &std::path::Path, dir: &std::path::Path, cancel: &CancelToken) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        if cancel.is_canceled() {
            return Ok(());
        }
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_post_asset(host, root, &path, cancel)?;
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
        if let Ok(data) = std::fs::read(&path) {
            let updated = host.post_asset(&relative, data, serde_json::Value::Null, cancel);
            let _ = std::fs::write(&path, updated);
        }
    }
    Ok(())
}

fn cleanup_partials(site_root: &std::path::Path) -> u64 {
    let mut removed = 0u64;
    remove_partials(site_root, &mut removed);
    removed
}

fn remove_partials(dir: &std::path::Path, removed: &mut u64) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            remove_partials(&path, removed);
            continue;
        }
        let lower = path.to_string_lossy().to_ascii_lowercase();
        if cloneforge_state::PARTIAL_SUFFIXES.iter().any(|suf| lower.ends_with(suf)) && std::fs::remove_file(&path).is_ok() {
            *removed += 1;
        }
    }
}

fn render_readme(cfg: &CloneConfig, manifest: &Manifest) -> String {
    let repro = manifest.reproduce_command.join(" ");
    format!(
        "# {docker_name}\n\nCloned from {url}.\n\n## Reproduce\n\n```\ncloneforge {repro}\n```\n\n## Docker quick-start\n\n```\ndocker build -t {docker_name} .\ndocker run -d --rm --name {docker_name} -p {bind_ip}:{host_port}:{container_port} {docker_name}\n```\n",
        docker_name = cfg.docker_name,
        url = cfg.url,
        bind_ip = cfg.bind_ip,
        host_port = cfg.host_port,
        container_port = cfg.container_port,
    )
}

#[allow(clippy::too_many_arguments)]
fn finish_canceled(
    cfg: &CloneConfig,
    mut manifest: Manifest,
    output_folder: &std::path::Path,
    site_root: &std::path::Path,
    run_id: &str,
    events: &EventEmitter,
    timings: &mut std::collections::BTreeMap<String, f64>,
    total_timer: &PhaseTimer,
) -> CloneResult {
    manifest.canceled = true;
    let _ = events.emit(EventKind::Canceled, json!({}));
    finalize_result(cfg, manifest, output_folder, site_root, run_id, events, timings, total_timer, false, ExitCode::Canceled, None)
}

#[allow(clippy::too_many_arguments)]
fn finalize_result(
    cfg: &CloneConfig,
    mut manifest: Manifest,
    output_folder: &std::path::Path,
    site_root: &std::path::Path,
    run_id: &str,
    events: &EventEmitter,
    timings: &mut std::collections::BTreeMap<String, f64>,
    total_timer: &PhaseTimer,
    success: bool,
    exit_code: ExitCode,
    diff_summary: Option<cloneforge_types::DiffSummary>,
) -> CloneResult {
    timings.insert("total".to_string(), total_timer.elapsed_seconds());
    manifest.timings = timings.clone();
    manifest.derive_phase_durations();
    manifest.completed_utc = Some(Utc::now());
    manifest.clone_success = success && manifest.clone_success;

    let manifest_path = if cfg.integrity.emit_manifest {
        let path = output_folder.join("clone_manifest.json");
        serde_json::to_string_pretty(&manifest)
            .ok()
            .and_then(|content| std::fs::write(&path, content).ok())
            .map(|_| path)
    } else {
        None
    };

    let _ = events.emit(
        EventKind::Summary,
        json!({"success": success, "exit_code": exit_code.as_i32(), "clone_success": manifest.clone_success}),
    );
    let _ = events.emit(EventKind::Timings, json!(manifest.timings));
    let _ = events.emit(EventKind::SummaryFinal, json!({"exit_code": exit_code.as_i32()}));

    CloneResult {
        success,
        container_built: manifest.docker_built,
        output_folder: output_folder.to_path_buf(),
        site_root: site_root.to_path_buf(),
        manifest_path,
        diff_summary,
        timings: manifest.timings.clone(),
        run_id: run_id.to_string(),
        canceled: manifest.canceled,
        exit_code: exit_code.as_i32(),
    }
}

#[allow(dead_code)]
fn weighted_total() -> f64 {
    PhaseWeights::CLONE + PhaseWeights::PRERENDER + PhaseWeights::BUILD + PhaseWeights::CHECKSUMS + PhaseWeights::VERIFY + PhaseWeights::OTHER
}
