//! Content-hash manifest, verifier, and self-test (§4.5).
//!
//! Checksum scope is intentionally narrower than the Fingerprinter's
//! whole-tree snapshot (§3.1 of `SPEC_FULL.md`): every `.html`/`.htm`
//! under the site root, every `.json` whose path contains a normalized
//! `/_api/` segment, and anything whose lowercase extension is in the
//! configured extra set.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use cloneforge_progress::{CancelToken, ProgressObserver};
use cloneforge_types::{Manifest, VerificationMeta, VerificationResult, VerificationStatus};

/// Maximum number of example paths printed per missing/mismatched
/// category before collapsing into a "+N more" tail.
const MAX_EXAMPLES: usize = 25;

/// Walk `site_root`, returning every relative path (forward-slash,
/// portable) whose file qualifies for the checksum manifest under
/// `extra_extensions`.
pub fn collect_checksum_paths(site_root: &Path, extra_extensions: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if site_root.exists() {
        walk(site_root, site_root, extra_extensions, &mut out)?;
    }
    out.sort();
    Ok(out)
}

fn walk(root: &Path, dir: &Path, extra: &[String], out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading dir: {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, extra, out)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        if qualifies(&relative, extra) {
            out.push(relative);
        }
    }
    Ok(())
}

fn qualifies(relative: &str, extra_extensions: &[String]) -> bool {
    let lower = relative.to_ascii_lowercase();
    if lower.ends_with(".html") || lower.ends_with(".htm") {
        return true;
    }
    if lower.contains("/_api/") && lower.ends_with(".json") {
        return true;
    }
    if let Some(ext) = lower.rsplit('.').next() {
        if extra_extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext)) {
            return true;
        }
    }
    false
}

/// Compute SHA-256 over `path` in 64 KiB chunks.
fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("opening: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the `checksums_sha256` map for every qualifying file under
/// `site_root`. Progress fires at the first item, the last item, every
/// 50 items, or when 0.6s has elapsed since the last emission.
/// Cancellation is polled each iteration; I/O errors on an individual
/// file are skipped silently (omitted from the map) rather than failing
/// the whole run.
pub fn compute_checksums(
    site_root: &Path,
    extra_extensions: &[String],
    progress: &dyn ProgressObserver,
    cancel: &CancelToken,
) -> Result<BTreeMap<String, String>> {
    let paths = collect_checksum_paths(site_root, extra_extensions)?;
    let total = paths.len();
    let mut out = BTreeMap::new();
    let mut last_emit = Instant::now() - Duration::from_millis(600);

    for (i, relative) in paths.iter().enumerate() {
        if cancel.is_canceled() {
            break;
        }
        let full = site_root.join(relative);
        if let Ok(hash) = hash_file(&full) {
            out.insert(relative.clone(), hash);
        }

        let is_first = i == 0;
        let is_last = i + 1 == total;
        let every_50 = (i + 1) % 50 == 0;
        let elapsed = last_emit.elapsed() >= Duration::from_millis(600);
        if is_first || is_last || every_50 || elapsed {
            let pct = if total == 0 { 100 } else { (((i + 1) * 100) / total) as u8 };
            progress.checksum(pct.min(100));
            last_emit = Instant::now();
        }
    }
    Ok(out)
}

/// Outcome of verifying a manifest's checksums against what's on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub ok: u64,
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
    pub total: u64,
}

impl VerifyOutcome {
    pub fn passed(&self) -> bool {
        self.ok == self.total && self.missing.is_empty() && self.mismatched.is_empty()
    }

    /// `[verify] OK={ok} Missing={missing} Mismatched={mismatched} Total={total}`
    /// plus up to [`MAX_EXAMPLES`] example paths per missing/mismatched
    /// category with a `+N more` tail, matching the original
    /// `verify_checksums.py` summary format.
    pub fn summary_line(&self) -> String {
        format!(
            "[verify] OK={} Missing={} Mismatched={} Total={}",
            self.ok,
            self.missing.len(),
            self.mismatched.len(),
            self.total
        )
    }

    pub fn detail_report(&self) -> String {
        let mut out = self.summary_line();
        out.push('\n');
        append_examples(&mut out, "Missing", &self.missing);
        append_examples(&mut out, "Mismatched", &self.mismatched);
        out
    }
}

fn append_examples(out: &mut String, label: &str, paths: &[String]) {
    if paths.is_empty() {
        return;
    }
    out.push_str(&format!("{label}:\n"));
    for path in paths.iter().take(MAX_EXAMPLES) {
        out.push_str(&format!("  {path}\n"));
    }
    if paths.len() > MAX_EXAMPLES {
        out.push_str(&format!("  +{} more\n", paths.len() - MAX_EXAMPLES));
    }
}

/// Resolve the root checksum paths are relative to: `manifest.output_folder`
/// if present, else the manifest file's own parent directory.
pub fn resolve_root(manifest: &Manifest, manifest_path: &Path) -> PathBuf {
    if manifest.output_folder.as_os_str().is_empty() {
        manifest_path.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        manifest.output_folder.clone()
    }
}

/// Run verification against `manifest`'s `checksums_sha256` map, resolved
/// against `root`. `fast_missing` skips attempting to hash files already
/// known absent via a stat check rather than treating a failed hash as
/// "missing" after the fact — same observable `missing` count, fewer
/// syscalls on large missing sets. `deep` disables that skip.
pub fn verify(root: &Path, checksums: &BTreeMap<String, String>, deep: bool) -> (VerifyOutcome, bool) {
    let mut ok = 0u64;
    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    let mut used_fast_missing = false;

    for (relative, expected_hash) in checksums {
        let full = root.join(relative);
        if !deep && !full.exists() {
            missing.push(relative.clone());
            used_fast_missing = true;
            continue;
        }
        match hash_file(&full) {
            Ok(actual) if &actual == expected_hash => ok += 1,
            Ok(_) => mismatched.push(relative.clone()),
            Err(_) => missing.push(relative.clone()),
        }
    }

    let outcome = VerifyOutcome {
        ok,
        missing,
        mismatched,
        total: checksums.len() as u64,
    };
    (outcome, used_fast_missing)
}

/// Merge a [`VerifyOutcome`] into the manifest's `verification` +
/// `verification_meta` fields.
pub fn merge_into_manifest(manifest: &mut Manifest, outcome: &VerifyOutcome, fast_missing: bool, elapsed: Duration) {
    manifest.verification = Some(VerificationResult {
        status: if outcome.passed() {
            VerificationStatus::Passed
        } else {
            VerificationStatus::Failed
        },
        ok: Some(outcome.ok),
        missing: Some(outcome.missing.len() as u64),
        mismatched: Some(outcome.mismatched.len() as u64),
        total: Some(outcome.total),
        fast_missing,
    });
    manifest.verification_meta = Some(VerificationMeta {
        elapsed_ms: elapsed.as_millis() as u64,
    });
}

/// Append a `### Verification Result` section to an existing README's
/// content, restored per `SPEC_FULL.md` §4.5.
pub fn append_readme_section(existing: &str, outcome: &VerifyOutcome) -> String {
    let mut out = existing.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("\n### Verification Result\n\n");
    if outcome.passed() {
        out.push_str(&format!("Passed ({}/{} files)\n", outcome.ok, outcome.total));
    } else {
        out.push_str(&format!(
            "Failed (ok={} missing={} mismatched={} total={})\n",
            outcome.ok,
            outcome.missing.len(),
            outcome.mismatched.len(),
            outcome.total
        ));
    }
    out
}

/// A portable, dependency-free copy of the verifier, written alongside the
/// manifest per §6 so a clone can be checked for integrity without the
/// `cloneforge` binary on hand — just a Python 3 interpreter. Semantics
/// match [`verify`]/[`VerifyOutcome::summary_line`] exactly: walks
/// `checksums_sha256`, hashes each relative path under the manifest's own
/// directory, and prints the same `OK=N Missing=N Mismatched=N Total=N`
/// line this module's own parser accepts, exiting 0 only when every file
/// is present and matches.
pub fn render_verify_script() -> &'static str {
    r#"#!/usr/bin/env python3
"""Standalone checksum verifier for a cloneforge clone_manifest.json."""
import hashlib
import json
import sys
from pathlib import Path


def main() -> int:
    manifest_path = Path(sys.argv[1] if len(sys.argv) > 1 else "clone_manifest.json")
    manifest = json.loads(manifest_path.read_text())
    checksums = manifest.get("checksums_sha256") or {}
    root = manifest_path.parent

    ok = 0
    missing = []
    mismatched = []
    for rel_path, expected in checksums.items():
        full = root / rel_path
        if not full.is_file():
            missing.append(rel_path)
            continue
        digest = hashlib.sha256()
        with full.open("rb") as handle:
            for chunk in iter(lambda: handle.read(65536), b""):
                digest.update(chunk)
        if digest.hexdigest() == expected:
            ok += 1
        else:
            mismatched.append(rel_path)

    total = len(checksums)
    print(f"[verify] OK={ok} Missing={len(missing)} Mismatched={len(mismatched)} Total={total}")
    return 0 if ok == total and not missing and not mismatched else 1


if __name__ == "__main__":
    sys.exit(main())
"#
}

/// The known-good summary line the self-test feeds the parser, and the
/// expected parsed result. Grounded in §4.5's self-test requirement: feed
/// a known-good summary line and assert exact parse equality.
pub fn selftest_verification() -> bool {
    let line = "[verify] OK=10 Missing=2 Mismatched=1 Total=13";
    parse_summary_line(line) == Some((10, 2, 1, 13))
}

/// Parse the first `OK=N Missing=N Mismatched=N Total=N` match in
/// `text`. Only the first match counts, per property 9.
pub fn parse_summary_line(text: &str) -> Option<(u64, u64, u64, u64)> {
    let re = regex::Regex::new(r"OK=(\d+)\s+Missing=(\d+)\s+Mismatched=(\d+)\s+Total=(\d+)").ok()?;
    let caps = re.captures(text)?;
    Some((
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
        caps.get(4)?.as_str().parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloneforge_progress::NullProgress;
    use tempfile::tempdir;

    #[test]
    fn collect_checksum_paths_includes_html_and_api_json() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html/>").unwrap();
        fs::create_dir_all(dir.path().join("_api")).unwrap();
        fs::write(dir.path().join("_api/data.json"), "{}").unwrap();
        fs::write(dir.path().join("style.css"), "body{}").unwrap();

        let paths = collect_checksum_paths(dir.path(), &[]).unwrap();
        assert!(paths.contains(&"index.html".to_string()));
        assert!(paths.contains(&"_api/data.json".to_string()));
        assert!(!paths.contains(&"style.css".to_string()));
    }

    #[test]
    fn collect_checksum_paths_honors_extra_extensions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data.xml"), "<x/>").unwrap();
        let paths = collect_checksum_paths(dir.path(), &["xml".to_string()]).unwrap();
        assert_eq!(paths, vec!["data.xml".to_string()]);
    }

    #[test]
    fn compute_checksums_hashes_every_qualifying_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "hello").unwrap();
        let map = compute_checksums(dir.path(), &[], &NullProgress::new(), &CancelToken::new()).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("a.html"));
    }

    #[test]
    fn verify_detects_missing_and_mismatched() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "hello").unwrap();
        fs::write(dir.path().join("b.html"), "tampered").unwrap();

        let mut checksums = BTreeMap::new();
        checksums.insert("a.html".to_string(), hash_file(&dir.path().join("a.html")).unwrap());
        checksums.insert("b.html".to_string(), "0".repeat(64));
        checksums.insert("missing.html".to_string(), "1".repeat(64));

        let (outcome, fast) = verify(dir.path(), &checksums, false);
        assert_eq!(outcome.ok, 1);
        assert_eq!(outcome.mismatched, vec!["b.html".to_string()]);
        assert_eq!(outcome.missing, vec!["missing.html".to_string()]);
        assert!(fast);
        assert!(!outcome.passed());
    }

    #[test]
    fn verify_deep_still_detects_missing_via_hash_failure() {
        let dir = tempdir().unwrap();
        let mut checksums = BTreeMap::new();
        checksums.insert("missing.html".to_string(), "1".repeat(64));
        let (outcome, fast) = verify(dir.path(), &checksums, true);
        assert_eq!(outcome.missing, vec!["missing.html".to_string()]);
        assert!(!fast);
    }

    #[test]
    fn verify_all_pass_when_hashes_match() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "hello").unwrap();
        let mut checksums = BTreeMap::new();
        checksums.insert("a.html".to_string(), hash_file(&dir.path().join("a.html")).unwrap());
        let (outcome, _) = verify(dir.path(), &checksums, false);
        assert!(outcome.passed());
    }

    #[test]
    fn summary_line_format_matches_contract() {
        let outcome = VerifyOutcome {
            ok: 10,
            missing: vec!["a".to_string(); 2],
            mismatched: vec!["b".to_string()],
            total: 13,
        };
        assert_eq!(outcome.summary_line(), "[verify] OK=10 Missing=2 Mismatched=1 Total=13");
    }

    #[test]
    fn detail_report_collapses_beyond_max_examples() {
        let missing: Vec<String> = (0..30).map(|i| format!("m{i}.html")).collect();
        let outcome = VerifyOutcome {
            ok: 0,
            missing,
            mismatched: vec![],
            total: 30,
        };
        let report = outcome.detail_report();
        assert!(report.contains("+5 more"));
    }

    #[test]
    fn parse_summary_line_extracts_all_four_counts() {
        assert_eq!(
            parse_summary_line("[verify] OK=10 Missing=2 Mismatched=1 Total=13"),
            Some((10, 2, 1, 13))
        );
    }

    #[test]
    fn parse_summary_line_only_first_match_counts() {
        let text = "OK=1 Missing=0 Mismatched=0 Total=1\nOK=99 Missing=99 Mismatched=99 Total=99";
        assert_eq!(parse_summary_line(text), Some((1, 0, 0, 1)));
    }

    #[test]
    fn render_verify_script_prints_matching_summary_line_format() {
        let script = render_verify_script();
        assert!(script.contains("OK={ok} Missing={len(missing)} Mismatched={len(mismatched)} Total={total}"));
        assert!(script.starts_with("#!/usr/bin/env python3"));
    }

    #[test]
    fn selftest_verification_passes() {
        assert!(selftest_verification());
    }

    #[test]
    fn append_readme_section_reports_pass() {
        let outcome = VerifyOutcome {
            ok: 5,
            missing: vec![],
            mismatched: vec![],
            total: 5,
        };
        let out = append_readme_section("# My Site\n", &outcome);
        assert!(out.contains("### Verification Result"));
        assert!(out.contains("Passed (5/5 files)"));
    }

    #[test]
    fn append_readme_section_reports_failure() {
        let outcome = VerifyOutcome {
            ok: 3,
            missing: vec!["x".to_string()],
            mismatched: vec![],
            total: 4,
        };
        let out = append_readme_section("# My Site", &outcome);
        assert!(out.contains("Failed (ok=3 missing=1 mismatched=0 total=4)"));
    }
}
