//! Dynamic (headless-browser) renderer: SPA route discovery, DOM-stability
//! waiting, and API/GraphQL/storage capture (§4.4).
//!
//! Unlike a crawler driving many pages concurrently, this renderer walks
//! its route queue on a single browser tab, one page at a time — §5 calls
//! for a sequential driver here, not a worker pool, since prerendered
//! output must be deterministic page-by-page for the integrity manifest
//! that follows it.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, GetResponseBodyParams};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use cloneforge_progress::{CancelToken, ProgressObserver};
use cloneforge_types::{PrerenderOptions, RouterOptions};

/// Content-Type prefix -> file extension, per §4.4's capture map. Checked
/// in order; first match wins.
const CONTENT_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    ("application/graphql+json", "graphql.json"),
    ("application/graphql", "graphql"),
    ("application/json", "json"),
    ("text/plain", "txt"),
    ("text/csv", "csv"),
    ("application/xml", "xml"),
    ("text/xml", "xml"),
];

/// Content-Type prefixes allowed through when binary API capture is on.
const BINARY_ALLOWLIST: &[&str] = &["application/octet-stream", "application/pdf", "image/", "video/", "audio/"];

/// Resolve a captured response's content type to the extension it should
/// be saved under. Falls back to `.bin` when binary capture is enabled
/// and the type is on the allowlist, else `.txt`.
pub fn extension_for_content_type(content_type: &str, capture_api_binary: bool) -> &'static str {
    let base = content_type.split(';').next().unwrap_or(content_type).trim();
    for (prefix, ext) in CONTENT_TYPE_EXTENSIONS {
        if base.eq_ignore_ascii_case(prefix) {
            return ext;
        }
    }
    if capture_api_binary && BINARY_ALLOWLIST.iter().any(|p| base.starts_with(p)) {
        return "bin";
    }
    if capture_api_binary {
        return "bin";
    }
    "txt"
}

/// Poll interval for DOM-stability checks: a third of the configured
/// settle window, clamped to `[50, 200]` ms.
pub fn dom_stability_poll_interval_ms(dom_stable_ms: u64) -> u64 {
    (dom_stable_ms / 3).clamp(50, 200)
}

/// Normalize a discovered route: strip the origin, optionally strip the
/// fragment, collapse `//`, and drop it if it fails an allow/deny filter.
pub fn normalize_route(href: &str, base_origin: &str, include_hash: bool) -> Option<String> {
    let without_origin = href.strip_prefix(base_origin).unwrap_or(href);
    if !without_origin.starts_with('/') {
        return None;
    }
    let mut route = without_origin.to_string();
    if !include_hash {
        if let Some(pos) = route.find('#') {
            route.truncate(pos);
        }
    }
    while route.contains("//") {
        route = route.replace("//", "/");
    }
    if route.is_empty() {
        route = "/".to_string();
    }
    Some(route)
}

/// Whether `route` passes the allow/deny regex lists. An empty allow list
/// admits everything; deny always wins over allow when both match.
pub fn route_allowed(route: &str, allow: &[String], deny: &[String]) -> bool {
    let compiled_deny: Vec<Regex> = deny.iter().filter_map(|p| Regex::new(p).ok()).collect();
    if compiled_deny.iter().any(|re| re.is_match(route)) {
        return false;
    }
    if allow.is_empty() {
        return true;
    }
    let compiled_allow: Vec<Regex> = allow.iter().filter_map(|p| Regex::new(p).ok()).collect();
    compiled_allow.iter().any(|re| re.is_match(route))
}

/// Init script injected into every page before navigation: wraps
/// `history.pushState`/`replaceState` and listens for `popstate`/
/// `hashchange`, forwarding every observed path to an exposed binding so
/// the host can enqueue newly discovered routes without re-crawling
/// anchors that never actually get clicked.
pub const ROUTER_INIT_SCRIPT: &str = r#"
(() => {
  const notify = (path) => { if (window.__cloneforgeRouteSeen) { window.__cloneforgeRouteSeen(path); } };
  const wrap = (fn) => function (...args) {
    const result = fn.apply(this, args);
    notify(location.pathname + location.search + location.hash);
    return result;
  };
  history.pushState = wrap(history.pushState);
  history.replaceState = wrap(history.replaceState);
  window.addEventListener('popstate', () => notify(location.pathname + location.search + location.hash));
  window.addEventListener('hashchange', () => notify(location.pathname + location.search + location.hash));
  document.addEventListener('click', (event) => {
    const anchor = event.target && event.target.closest ? event.target.closest('a[href]') : null;
    if (anchor) { notify(anchor.getAttribute('href')); }
  }, true);
})();
"#;

/// Installs a `MutationObserver` over the whole document and stamps
/// `window.__cloneforgeLastMutation` on every observed change, so
/// `wait_for_dom_stability` can poll a quiet-window timestamp instead of
/// diffing page content. Idempotent: a page that already has the observer
/// attached (e.g. re-evaluated after a scroll pass) keeps the existing one.
const DOM_STABILITY_INIT_SCRIPT: &str = r#"
(() => {
  try {
    window.__cloneforgeLastMutation = Date.now();
    if (!window.__cloneforgeMutationObserver) {
      const observer = new MutationObserver(() => { window.__cloneforgeLastMutation = Date.now(); });
      observer.observe(document.documentElement, { subtree: true, childList: true, attributes: true, characterData: true });
      window.__cloneforgeMutationObserver = observer;
    }
  } catch (e) {}
})();
"#;

/// Aggregate stats produced by one renderer run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RendererStats {
    pub pages_processed: u64,
    pub routes_discovered: u64,
    pub api_captured: u64,
    pub storage_captured: u64,
    pub graphql_captured: u64,
    pub scroll_passes: u64,
    pub dom_stable_pages: u64,
    pub dom_stable_total_wait_ms: u64,
    pub browser_available: bool,
}

/// Whether the renderer should even attempt to launch a browser this run.
/// `CLONEFORGE_FORCE_NO_BROWSER` is the engine's diagnostic override,
/// checked before touching the system chromium/chrome binary at all.
pub fn browser_available() -> bool {
    if std::env::var("CLONEFORGE_FORCE_NO_BROWSER").is_ok() {
        return false;
    }
    ["chromium", "chromium-browser", "google-chrome", "chrome"]
        .iter()
        .any(|bin| cloneforge_process::command_exists(bin))
}

/// Drive the browser over the configured route queue, snapshotting HTML
/// (and optionally API/storage responses) for every page visited.
///
/// `hook_script`, when set, is invoked once per page (and once with a
/// `None` page/context when the browser is unavailable) so callers get a
/// consistent extension point regardless of whether prerendering actually
/// ran.
pub async fn render_site(
    start_url: &str,
    site_root: &Path,
    prerender: &PrerenderOptions,
    router: &RouterOptions,
    progress: &dyn ProgressObserver,
    cancel: &CancelToken,
) -> Result<RendererStats> {
    let mut stats = RendererStats::default();

    if !browser_available() {
        progress.log("prerender requested but no browser binary found; skipping");
        if let Some(hook_script) = &prerender.hook_script {
            invoke_hook_script(hook_script, start_url, false, json!({}), progress);
        }
        return Ok(stats);
    }
    stats.browser_available = true;

    let config = BrowserConfig::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("building browser config: {e}"))?;
    let (mut browser, mut handler) = Browser::launch(config).await.context("launching browser")?;
    let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

    let result = drive_pages(&mut browser, start_url, site_root, prerender, router, progress, cancel, &mut stats).await;

    let _ = browser.close().await;
    handler_task.abort();
    result?;
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
async fn drive_pages(
    browser: &mut Browser,
    start_url: &str,
    site_root: &Path,
    prerender: &PrerenderOptions,
    router: &RouterOptions,
    progress: &dyn ProgressObserver,
    cancel: &CancelToken,
    stats: &mut RendererStats,
) -> Result<()> {
    let base_origin = base_origin_of(start_url);
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    queue.push_back("/".to_string());

    while let Some(route) = queue.pop_front() {
        if cancel.is_canceled() {
            break;
        }
        if visited.contains(&route) || stats.pages_processed >= prerender.max_pages as u64 {
            continue;
        }
        visited.insert(route.clone());

        let url = format!("{base_origin}{route}");
        let page = browser
            .new_page("about:blank")
            .await
            .with_context(|| format!("opening page for: {url}"))?;
        if router.intercept {
            let _ = page.evaluate(ROUTER_INIT_SCRIPT).await;
        }

        let capture_handle = prerender.capture_api.then(|| {
            spawn_api_capture(
                page.clone(),
                site_root.join("_api"),
                route.clone(),
                prerender.capture_api_types.clone(),
                prerender.capture_api_binary,
                prerender.capture_graphql,
            )
        });

        page.goto(&url).await.with_context(|| format!("navigating to: {url}"))?;
        if let Err(err) = page.wait_for_navigation().await {
            progress.log(&format!("navigation wait failed for {url}: {err}"));
        }

        for _ in 0..prerender.scroll_passes {
            if cancel.is_canceled() {
                break;
            }
            let _ = page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            stats.scroll_passes += 1;
        }

        let settle_ms = prerender.dom_stable_ms.as_millis();
        if settle_ms > 0 {
            let (waited, stable_reached) =
                wait_for_dom_stability(&page, settle_ms, prerender.dom_stable_timeout_ms.as_millis()).await;
            stats.dom_stable_total_wait_ms += waited;
            if stable_reached {
                stats.dom_stable_pages += 1;
            }
        }

        if prerender.capture_storage {
            if let Ok(storage) = capture_storage(&page).await {
                let safe_name = route.trim_start_matches('/').replace('/', "_");
                let name = if safe_name.is_empty() { "index".to_string() } else { safe_name };
                let path = site_root.join("_storage").join(format!("{name}.storage.json"));
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let _ = std::fs::write(path, storage);
                stats.storage_captured += 1;
            }
        }

        if let Ok(html) = page.content().await {
            let out_path = route_output_path(site_root, &route);
            if let Some(parent) = out_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let rendered = if prerender.rewrite_urls {
                rewrite_absolute_urls(&html, &base_origin)
            } else {
                html
            };
            let _ = std::fs::write(out_path, rendered);
        }

        if router.intercept {
            if let Ok(hrefs) = collect_anchor_hrefs(&page).await {
                for href in hrefs {
                    if let Some(normalized) = normalize_route(&href, &base_origin, router.include_hash) {
                        if !visited.contains(&normalized)
                            && route_allowed(&normalized, &router.allow, &router.deny)
                            && (stats.routes_discovered as u32) < router.max_routes
                        {
                            stats.routes_discovered += 1;
                            progress.router_count(stats.routes_discovered);
                            queue.push_back(normalized);
                        }
                    }
                }
            }
        }

        if let Some(hook_script) = &prerender.hook_script {
            invoke_hook_script(hook_script, &url, true, json!({"route": route}), progress);
        }

        let _ = page.close().await;
        if let Some(handle) = capture_handle {
            if let Ok((api_count, graphql_count)) = handle.await {
                stats.api_captured += api_count;
                stats.graphql_captured += graphql_count;
            }
        }
        stats.pages_processed += 1;
        progress.phase("prerender", Some(((stats.pages_processed * 100) / prerender.max_pages.max(1) as u64).min(100) as u8));
    }

    Ok(())
}

fn base_origin_of(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        let path_start = after_scheme.find('/').unwrap_or(after_scheme.len());
        return url[..scheme_end + 3 + path_start].to_string();
    }
    url.to_string()
}

fn route_output_path(site_root: &Path, route: &str) -> std::path::PathBuf {
    let trimmed = route.trim_start_matches('/');
    if trimmed.is_empty() {
        site_root.join("index.html")
    } else if trimmed.ends_with('/') || !trimmed.contains('.') {
        site_root.join(trimmed).join("index.html")
    } else {
        site_root.join(trimmed)
    }
}

/// Waits for the page's DOM to go quiet for `settle_ms` by polling the
/// last-mutation timestamp `DOM_STABILITY_INIT_SCRIPT` maintains, bailing
/// out once `max(timeout_ms, settle_ms)` has elapsed either way. Returns
/// `(waited_ms, stable_reached)`: `stable_reached` is false when the
/// budget ran out before a quiet window was ever observed.
async fn wait_for_dom_stability(page: &Page, settle_ms: u64, timeout_ms: u64) -> (u64, bool) {
    let poll_ms = dom_stability_poll_interval_ms(settle_ms);
    let budget_ms = timeout_ms.max(settle_ms);
    let _ = page.evaluate(DOM_STABILITY_INIT_SCRIPT).await;

    let started = Instant::now();
    let mut stable_reached = false;
    loop {
        let last_delta = page
            .evaluate("Date.now() - (window.__cloneforgeLastMutation || Date.now())")
            .await
            .ok()
            .and_then(|value| value.into_value::<f64>().ok())
            .unwrap_or(0.0);
        if last_delta >= settle_ms as f64 {
            stable_reached = true;
            break;
        }
        if started.elapsed().as_millis() as u64 >= budget_ms {
            break;
        }
        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
    (started.elapsed().as_millis() as u64, stable_reached)
}

async fn capture_storage(page: &Page) -> Result<String> {
    let script = r#"
      JSON.stringify({
        localStorage: Object.assign({}, window.localStorage),
        sessionStorage: Object.assign({}, window.sessionStorage),
      })
    "#;
    let value = page.evaluate(script).await.context("capturing storage")?;
    Ok(value.into_value::<String>().unwrap_or_else(|_| "{}".to_string()))
}

async fn collect_anchor_hrefs(page: &Page) -> Result<Vec<String>> {
    let script = "Array.from(document.querySelectorAll('a[href]')).map(a => a.getAttribute('href'))";
    let value = page.evaluate(script).await.context("collecting anchors")?;
    Ok(value.into_value::<Vec<String>>().unwrap_or_default())
}

/// Rewrite absolute same-origin URLs in `html` to root-relative form so
/// the mirrored tree is portable regardless of where it's served from.
fn rewrite_absolute_urls(html: &str, base_origin: &str) -> String {
    html.replace(base_origin, "")
}

/// One `on_page` notification sent to a user hook script: the sidecar
/// rendering of §9's "dynamic hook scripts" redesign note, same
/// process-plus-JSON-line shape as the plugin host. `page_available` is
/// false exactly once per run, when the browser itself never launched, so
/// a hook can still observe that prerender was attempted.
#[derive(Debug, Clone, Serialize)]
struct HookNotification<'a> {
    url: &'a str,
    page_available: bool,
    context: Value,
}

/// Fire-and-forget: spawn `hook_script`, write one JSON line, and move on.
/// Per §4.4 hook errors are logged, never fatal — a hook that fails to
/// spawn, hangs, or exits nonzero never aborts the render.
fn invoke_hook_script(hook_script: &Path, url: &str, page_available: bool, context: Value, progress: &dyn ProgressObserver) {
    let notification = HookNotification { url, page_available, context };
    let line = match serde_json::to_string(&notification) {
        Ok(line) => line,
        Err(err) => {
            progress.log(&format!("hook script: failed to encode notification: {err}"));
            return;
        }
    };
    let child = Command::new(hook_script)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(err) => {
            progress.log(&format!("hook script {}: failed to launch: {err}", hook_script.display()));
            return;
        }
    };
    if let Some(stdin) = child.stdin.as_mut() {
        let _ = writeln!(stdin, "{line}");
    }
    let _ = child.wait();
}

/// Turn a captured response's URL into a relative path under `_api/`: drop
/// the scheme and host, keep the path and query, and replace every
/// character a filesystem would choke on with `_`.
fn sanitize_api_path(url: &str) -> String {
    let without_scheme = url.splitn(2, "://").nth(1).unwrap_or(url);
    let without_host = without_scheme.find('/').map(|i| &without_scheme[i + 1..]).unwrap_or("");
    let cleaned: String = without_host
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "index".to_string()
    } else {
        cleaned
    }
}

/// Subscribe to network response events for the lifetime of `page`,
/// fetching and writing to disk under `api_dir` every response whose
/// content type qualifies, per §4.4's API capture contract. Runs as a
/// background task so it observes responses received while the page
/// navigates and settles; the stream ends naturally once the caller closes
/// `page`. Returns `(api_captured, graphql_captured)`.
fn spawn_api_capture(
    page: Page,
    api_dir: std::path::PathBuf,
    route: String,
    capture_api_types: Vec<String>,
    capture_api_binary: bool,
    capture_graphql: bool,
) -> tokio::task::JoinHandle<(u64, u64)> {
    tokio::spawn(async move {
        let mut api_count = 0u64;
        let mut graphql_count = 0u64;
        let mut events = match page.event_listener::<EventResponseReceived>().await {
            Ok(events) => events,
            Err(_) => return (0, 0),
        };

        while let Some(event) = events.next().await {
            let response = &event.response;
            let content_type = response.mime_type.clone();
            let is_graphql = content_type.contains("graphql") || response.url.contains("graphql");
            let qualifies = capture_api_types.iter().any(|t| content_type.eq_ignore_ascii_case(t))
                || (capture_graphql && is_graphql)
                || (capture_api_binary && BINARY_ALLOWLIST.iter().any(|p| content_type.starts_with(p)));
            if !qualifies {
                continue;
            }

            let body = match page.execute(GetResponseBodyParams::new(event.request_id.clone())).await {
                Ok(resp) => {
                    if resp.base64_encoded {
                        base64::engine::general_purpose::STANDARD.decode(&resp.body).unwrap_or_default()
                    } else {
                        resp.body.clone().into_bytes()
                    }
                }
                Err(_) => continue,
            };

            let ext = extension_for_content_type(&content_type, capture_api_binary);
            let rel = sanitize_api_path(&response.url);
            let route_prefix = route.trim_start_matches('/').replace('/', "_");
            let file_name = if route_prefix.is_empty() {
                format!("{rel}.{ext}")
            } else {
                format!("{route_prefix}__{rel}.{ext}")
            };
            let path = api_dir.join(file_name);
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if std::fs::write(&path, &body).is_ok() {
                if is_graphql {
                    graphql_count += 1;
                } else {
                    api_count += 1;
                }
            }
        }

        (api_count, graphql_count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_for_content_type_maps_known_types() {
        assert_eq!(extension_for_content_type("application/json", false), "json");
        assert_eq!(extension_for_content_type("application/json; charset=utf-8", false), "json");
        assert_eq!(extension_for_content_type("text/csv", false), "csv");
        assert_eq!(extension_for_content_type("application/graphql+json", false), "graphql.json");
        assert_eq!(extension_for_content_type("text/xml", false), "xml");
    }

    #[test]
    fn extension_for_content_type_falls_back_to_bin_when_binary_allowed() {
        assert_eq!(extension_for_content_type("application/pdf", true), "bin");
        assert_eq!(extension_for_content_type("unknown/type", true), "bin");
    }

    #[test]
    fn extension_for_content_type_falls_back_to_txt_without_binary() {
        assert_eq!(extension_for_content_type("unknown/type", false), "txt");
    }

    #[test]
    fn dom_stability_poll_interval_clamps_bounds() {
        assert_eq!(dom_stability_poll_interval_ms(30), 50);
        assert_eq!(dom_stability_poll_interval_ms(600), 200);
        assert_eq!(dom_stability_poll_interval_ms(300), 100);
    }

    #[test]
    fn normalize_route_strips_origin_and_hash() {
        let route = normalize_route("https://example.com/a/b#section", "https://example.com", false).unwrap();
        assert_eq!(route, "/a/b");
    }

    #[test]
    fn normalize_route_keeps_hash_when_requested() {
        let route = normalize_route("https://example.com/a#section", "https://example.com", true).unwrap();
        assert_eq!(route, "/a#section");
    }

    #[test]
    fn normalize_route_rejects_offsite_links() {
        assert!(normalize_route("https://other.com/a", "https://example.com", false).is_none());
    }

    #[test]
    fn normalize_route_collapses_double_slashes() {
        let route = normalize_route("https://example.com//a//b", "https://example.com", false).unwrap();
        assert_eq!(route, "/a/b");
    }

    #[test]
    fn route_allowed_deny_overrides_allow() {
        let allow = vec!["^/api".to_string()];
        let deny = vec!["^/api/secret".to_string()];
        assert!(route_allowed("/api/public", &allow, &deny));
        assert!(!route_allowed("/api/secret/x", &allow, &deny));
    }

    #[test]
    fn route_allowed_empty_allow_admits_everything_not_denied() {
        assert!(route_allowed("/anything", &[], &[]));
    }

    #[test]
    fn base_origin_of_strips_path() {
        assert_eq!(base_origin_of("https://example.com/a/b?x=1"), "https://example.com");
        assert_eq!(base_origin_of("https://example.com"), "https://example.com");
    }

    #[test]
    fn route_output_path_uses_index_html_for_directory_routes() {
        let root = Path::new("/out/site");
        assert_eq!(route_output_path(root, "/"), root.join("index.html"));
        assert_eq!(route_output_path(root, "/about"), root.join("about/index.html"));
        assert_eq!(route_output_path(root, "/assets/app.json"), root.join("assets/app.json"));
    }

    #[test]
    fn browser_available_respects_force_env_override() {
        std::env::set_var("CLONEFORGE_FORCE_NO_BROWSER", "1");
        assert!(!browser_available());
        std::env::remove_var("CLONEFORGE_FORCE_NO_BROWSER");
    }

    #[test]
    fn invoke_hook_script_runs_with_page_unavailable_marker() {
        use cloneforge_progress::NullProgress;
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker.json");
        let script = dir.path().join("hook.sh");
        fs::write(&script, format!("#!/bin/sh\ncat > {}\n", marker.display())).unwrap();
        let mut perms = fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        fs::set_permissions(&script, perms).unwrap();

        let progress = NullProgress::new();
        invoke_hook_script(&script, "https://example.com", false, json!({}), &progress);

        let written = fs::read_to_string(&marker).unwrap();
        assert!(written.contains("\"page_available\":false"));
        assert!(written.contains("example.com"));
    }

    #[test]
    fn sanitize_api_path_strips_scheme_and_host() {
        assert_eq!(sanitize_api_path("https://example.com/api/v1/users?page=2"), "api_v1_users_page_2");
    }

    #[test]
    fn sanitize_api_path_on_bare_origin_is_index() {
        assert_eq!(sanitize_api_path("https://example.com"), "index");
    }
}
