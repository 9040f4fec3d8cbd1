//! JS stripping and container scaffold templates (§4.9).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

use cloneforge_types::JsStrippingStats;

/// Strip `<script>...</script>` blocks (case-insensitive, dot-matches-newline)
/// from `html`, counting total scripts removed and the inline-only subset
/// separately (`scripts_removed` includes both external and inline).
/// Returns the rewritten HTML alongside a flag telling the caller whether
/// anything actually changed, so untouched files aren't rewritten to disk.
pub fn strip_scripts(html: &str) -> (String, JsStrippingStats, bool) {
    let re = Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("static regex");
    let src_re = Regex::new(r#"(?is)<script\b[^>]*\bsrc\s*=\s*['"]?[^'">]+"#).expect("static regex");

    let mut total = 0u64;
    let mut inline = 0u64;
    let rewritten = re.replace_all(html, |caps: &regex::Captures| {
        let whole = &caps[0];
        total += 1;
        if !src_re.is_match(whole) {
            inline += 1;
        }
        ""
    });

    let changed = total > 0;
    let stats = JsStrippingStats {
        html_files: 1,
        modified: if changed { 1 } else { 0 },
        scripts_removed: total,
        inline_scripts_removed: inline,
    };
    (rewritten.into_owned(), stats, changed)
}

/// When JS has been stripped from a page, a strict CSP header communicates
/// the page no longer needs (or permits) script execution. Inserted right
/// after `<head>` if present, else prepended.
pub fn inject_strict_csp(html: &str) -> String {
    const META: &str = "<meta http-equiv=\"Content-Security-Policy\" content=\"script-src 'none'; frame-src 'none'\">";
    if let Some(pos) = html.to_ascii_lowercase().find("<head>") {
        let insert_at = pos + "<head>".len();
        let mut out = String::with_capacity(html.len() + META.len());
        out.push_str(&html[..insert_at]);
        out.push_str(META);
        out.push_str(&html[insert_at..]);
        out
    } else {
        format!("{META}{html}")
    }
}

/// Walk `site_root` and strip scripts from every `.html`/`.htm` file,
/// rewriting in place only when something changed. Returns aggregate
/// stats across the whole tree.
pub fn strip_site(site_root: &Path, inject_csp: bool) -> Result<JsStrippingStats> {
    let mut totals = JsStrippingStats::default();
    strip_dir(site_root, site_root, inject_csp, &mut totals)?;
    Ok(totals)
}

fn strip_dir(root: &Path, dir: &Path, inject_csp: bool, totals: &mut JsStrippingStats) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading dir: {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            strip_dir(root, &path, inject_csp, totals)?;
            continue;
        }
        let lower = path.to_string_lossy().to_ascii_lowercase();
        if !(lower.ends_with(".html") || lower.ends_with(".htm")) {
            continue;
        }
        let content = fs::read_to_string(&path).with_context(|| format!("reading: {}", path.display()))?;
        let (mut rewritten, stats, changed) = strip_scripts(&content);
        totals.html_files += 1;
        if !changed {
            continue;
        }
        if inject_csp {
            rewritten = inject_strict_csp(&rewritten);
        }
        fs::write(&path, rewritten).with_context(|| format!("writing: {}", path.display()))?;
        totals.modified += stats.modified;
        totals.scripts_removed += stats.scripts_removed;
        totals.inline_scripts_removed += stats.inline_scripts_removed;
    }
    Ok(())
}

/// `FROM nginx:alpine` scaffold serving the site root as a static bundle.
pub fn render_dockerfile(container_port: u16) -> String {
    format!(
        "FROM nginx:alpine\n\
         COPY site-root/ /usr/share/nginx/html/\n\
         COPY nginx.conf /etc/nginx/conf.d/default.conf\n\
         EXPOSE {container_port}\n\
         CMD [\"nginx\", \"-g\", \"daemon off;\"]\n"
    )
}

/// nginx vhost config serving the mirrored tree as-is: `try_files $uri
/// $uri/ =404`, no SPA fallback to `index.html` (the clone is a mirrored
/// tree of static pages, not a single-page app). When `strict_csp` is set
/// (JS was stripped), adds the same `script-src 'none'; frame-src 'none'`
/// policy as a response header, on top of the per-page `<meta>` tag
/// `inject_strict_csp` writes.
pub fn render_nginx_conf(container_port: u16, strict_csp: bool) -> String {
    let csp_header = if strict_csp {
        "\n        add_header Content-Security-Policy \"script-src 'none'; frame-src 'none'\";"
    } else {
        ""
    };
    format!(
        "server {{\n\
         \x20   listen {container_port};\n\
         \x20   root /usr/share/nginx/html;\n\
         \x20   index index.html;\n\n\
         \x20   location / {{\n\
         \x20       try_files $uri $uri/ =404;{csp_header}\n\
         \x20   }}\n\
         }}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn strip_scripts_removes_inline_and_external() {
        let html = r#"<html><head><script src="a.js"></script><script>alert(1)</script></head></html>"#;
        let (out, stats, changed) = strip_scripts(html);
        assert!(changed);
        assert_eq!(stats.scripts_removed, 2);
        assert_eq!(stats.inline_scripts_removed, 1);
        assert!(!out.contains("<script"));
    }

    #[test]
    fn strip_scripts_is_case_insensitive_and_multiline() {
        let html = "<SCRIPT>\nfoo();\nbar();\n</SCRIPT>";
        let (out, stats, changed) = strip_scripts(html);
        assert!(changed);
        assert_eq!(stats.inline_scripts_removed, 1);
        assert!(!out.to_ascii_lowercase().contains("<script"));
    }

    #[test]
    fn strip_scripts_reports_unchanged_when_no_scripts() {
        let html = "<html><body>hello</body></html>";
        let (out, _stats, changed) = strip_scripts(html);
        assert!(!changed);
        assert_eq!(out, html);
    }

    #[test]
    fn inject_strict_csp_inserts_after_head_tag() {
        let html = "<html><head><title>x</title></head></html>";
        let out = inject_strict_csp(html);
        assert!(out.contains("Content-Security-Policy"));
        assert!(out.contains("script-src 'none'; frame-src 'none'"));
        assert!(out.find("Content-Security-Policy").unwrap() < out.find("<title>").unwrap());
    }

    #[test]
    fn inject_strict_csp_prepends_when_no_head_tag() {
        let html = "<div>no head here</div>";
        let out = inject_strict_csp(html);
        assert!(out.starts_with("<meta"));
    }

    #[test]
    fn strip_site_rewrites_only_changed_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "<script>x()</script><p>a</p>").unwrap();
        fs::write(dir.path().join("b.html"), "<p>no scripts</p>").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.htm"), "<script src=\"x.js\"></script>").unwrap();

        let totals = strip_site(dir.path(), false).unwrap();
        assert_eq!(totals.html_files, 3);
        assert_eq!(totals.modified, 2);
        assert_eq!(totals.scripts_removed, 2);
        assert_eq!(totals.inline_scripts_removed, 1);

        let b = fs::read_to_string(dir.path().join("b.html")).unwrap();
        assert_eq!(b, "<p>no scripts</p>");
    }

    #[test]
    fn render_dockerfile_exposes_container_port() {
        let out = render_dockerfile(8080);
        assert!(out.contains("EXPOSE 8080"));
        assert!(out.contains("FROM nginx:alpine"));
    }

    #[test]
    fn render_nginx_conf_uses_literal_try_files_with_no_spa_fallback() {
        let out = render_nginx_conf(80, false);
        assert!(out.contains("listen 80"));
        assert!(out.contains("try_files $uri $uri/ =404;"));
        assert!(!out.contains("/index.html =404"));
        assert!(!out.contains("Content-Security-Policy"));
    }

    #[test]
    fn render_nginx_conf_adds_csp_header_when_js_stripped() {
        let out = render_nginx_conf(80, true);
        assert!(out.contains("add_header Content-Security-Policy \"script-src 'none'; frame-src 'none'\""));
    }
}
