//! Whole-tree file fingerprinting and incremental diffing.
//!
//! Every clone run that asks for `--incremental` or `--diff-latest`
//! snapshots every file under the output folder (path, sha256, size,
//! mtime) before and after the mirror step, persists the snapshot to
//! `<output_folder>/.cloneforge/state.json`, and on a later run diffs the
//! new snapshot against the saved one to produce a [`cloneforge_types::DiffSummary`].
//!
//! This is distinct from the Integrity module's checksum manifest: the
//! fingerprinter hashes every file for diffing and resume accounting,
//! while the Integrity module only hashes the narrower set of files named
//! in its checksum contract.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use cloneforge_types::{DiffSummary, ModifiedEntry};

/// Directory, relative to the output folder, that holds fingerprinter
/// state across runs.
pub const STATE_DIR: &str = ".cloneforge";
/// File name of the persisted snapshot within [`STATE_DIR`].
pub const STATE_FILE: &str = "state.json";

/// `<output_folder>/.cloneforge`
pub fn state_dir(output_folder: &Path) -> PathBuf {
    output_folder.join(STATE_DIR)
}

/// `<output_folder>/.cloneforge/state.json`
pub fn state_path(output_folder: &Path) -> PathBuf {
    state_dir(output_folder).join(STATE_FILE)
}

/// One file's recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub sha256: String,
    pub size: u64,
    /// Unix seconds, truncated — only used as a cheap unchanged-file skip
    /// hint in callers that want one; the diff itself compares hashes.
    pub mtime: u64,
}

/// A full-tree snapshot: relative path -> fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: BTreeMap<String, FileFingerprint>,
}

impl Snapshot {
    /// Walk every regular file under `root` and hash it, recording paths
    /// relative to `root` with forward-slash separators regardless of
    /// platform so a snapshot is portable across OSes.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        if root.exists() {
            walk(root, root, &mut files)?;
        }
        Ok(Self { files })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading state snapshot: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing state snapshot: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("serializing state snapshot")?;
        fs::write(path, content)
            .with_context(|| format!("writing state snapshot: {}", path.display()))
    }

    /// Number of files with no counterpart missing/added relative to
    /// `previous` and with an identical hash.
    pub fn diff(&self, previous: &Snapshot) -> DiffSummary {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut modified = Vec::new();
        let mut unchanged_count: u64 = 0;

        for (path, current_fp) in &self.files {
            match previous.files.get(path) {
                None => added.push(path.clone()),
                Some(prev_fp) => {
                    if prev_fp.sha256 == current_fp.sha256 {
                        unchanged_count += 1;
                    } else {
                        modified.push(ModifiedEntry {
                            path: path.clone(),
                            old_hash: prev_fp.sha256.clone(),
                            new_hash: current_fp.sha256.clone(),
                            old_size: prev_fp.size,
                            new_size: current_fp.size,
                            delta_bytes: current_fp.size as i64 - prev_fp.size as i64,
                        });
                    }
                }
            }
        }
        for path in previous.files.keys() {
            if !self.files.contains_key(path) {
                removed.push(path.clone());
            }
        }

        added.sort();
        removed.sort();
        modified.sort_by(|a, b| a.path.cmp(&b.path));
        let changed: Vec<String> = modified.iter().map(|m| m.path.clone()).collect();

        DiffSummary {
            added,
            removed,
            modified,
            changed,
            unchanged_count,
            total_current: self.files.len() as u64,
        }
    }
}

fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, FileFingerprint>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading dir: {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some(STATE_DIR) {
                continue;
            }
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let fingerprint = fingerprint_file(&path)?;
            out.insert(relative, fingerprint);
        }
    }
    Ok(())
}

/// Hash one file in 64 KiB chunks so large assets don't need to be read
/// into memory whole.
fn fingerprint_file(path: &Path) -> Result<FileFingerprint> {
    let metadata = fs::metadata(path).with_context(|| format!("stat: {}", path.display()))?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

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
    Ok(FileFingerprint {
        sha256: hex::encode(hasher.finalize()),
        size: metadata.len(),
        mtime,
    })
}

/// Suffixes wget2 (and its predecessors) leave on an interrupted download.
pub const PARTIAL_SUFFIXES: [&str; 4] = [".tmp", ".part", ".partial", ".download"];

/// Count files (and partial downloads) under a folder, used before and
/// after the mirror step to populate [`cloneforge_types::ResumeStats`].
pub fn count_files_and_partials(root: &Path) -> (u64, u64) {
    let mut files = 0u64;
    let mut partials = 0u64;
    count_recursive(root, &mut files, &mut partials);
    (files, partials)
}

fn count_recursive(dir: &Path, files: &mut u64, partials: &mut u64) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some(STATE_DIR) {
                continue;
            }
            count_recursive(&path, files, partials);
        } else if file_type.is_file() {
            *files += 1;
            let name = path.to_string_lossy().to_ascii_lowercase();
            if PARTIAL_SUFFIXES.iter().any(|suf| name.ends_with(suf)) {
                *partials += 1;
            }
        }
    }
}
