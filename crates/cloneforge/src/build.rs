//! Docker image build and run/serve driver (§4.9).
//!
//! Builds the scaffolded site into a container image via `docker buildx
//! build`, streaming its `Step X/Y` progress lines, then optionally runs
//! the built image (or serves the site root directly against a stock
//! image) with the configured port mapping and bind address.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use cloneforge_process::{run_command_in_dir, stream_lines, CommandResult, StreamSource};
use cloneforge_progress::{CancelToken, ProgressObserver};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("docker is not installed or not on PATH")]
    ToolMissing,
    #[error("docker build was canceled")]
    Canceled,
    #[error("docker build failed (exit {code:?}):\n{tail}")]
    BuildFailed { code: Option<i32>, tail: String },
}

/// Parsed `Step X/Y` progress from a `docker buildx build` line.
fn parse_step(line: &str, re: &Regex) -> Option<(u32, u32)> {
    let caps = re.captures(line)?;
    let current: u32 = caps.get(1)?.as_str().parse().ok()?;
    let total: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some((current, total))
}

/// Build `<build_context>/Dockerfile` into an image tagged `docker_name`,
/// streaming step progress to `progress` and honoring cancellation.
pub fn build_image(
    build_context: &Path,
    docker_name: &str,
    progress: &dyn ProgressObserver,
    cancel: &CancelToken,
) -> Result<()> {
    if !cloneforge_process::command_exists("docker") {
        return Err(BuildError::ToolMissing.into());
    }

    let step_re = Regex::new(r"Step\s+(\d+)/(\d+)").expect("valid regex");
    let mut tail: Vec<String> = Vec::new();

    let args = ["buildx", "build", "--progress=plain", "-t", docker_name, "."];
    let result: CommandResult = stream_lines("docker", &args, build_context, |_source, line| {
        if cancel.is_canceled() {
            return false;
        }
        progress.log(line);
        if tail.len() >= 25 {
            tail.remove(0);
        }
        tail.push(line.to_string());
        if let Some((current, total)) = parse_step(line, &step_re) {
            let pct = if total == 0 { 0 } else { ((current * 100) / total) as u8 };
            progress.phase("build", Some(pct.min(100)));
        }
        true
    })
    .with_context(|| format!("running docker build in {}", build_context.display()))?;

    if cancel.is_canceled() {
        return Err(BuildError::Canceled.into());
    }
    if !result.success {
        return Err(BuildError::BuildFailed {
            code: result.exit_code,
            tail: tail.join("\n"),
        }
        .into());
    }
    Ok(())
}

/// Run a previously-built image, mapping `host_port` on `bind_ip` to
/// `container_port`, detached, named after `docker_name`.
pub fn run_container(
    docker_name: &str,
    bind_ip: &str,
    host_port: u16,
    container_port: u16,
) -> Result<String> {
    let port_mapping = format!("{bind_ip}:{host_port}:{container_port}");
    let output = run_command_in_dir(
        "docker",
        &["run", "-d", "--rm", "--name", docker_name, "-p", &port_mapping, docker_name],
        Path::new("."),
    )
    .context("running docker run")?;
    if !output.success {
        anyhow::bail!("docker run failed: {}", output.stderr);
    }
    Ok(output.stdout.trim().to_string())
}

/// Serve the site root directly (no custom image) by bind-mounting it and
/// the scaffolded nginx config into a stock `nginx:alpine` container.
pub fn serve_folder(
    site_root: &Path,
    nginx_conf: &Path,
    container_name: &str,
    bind_ip: &str,
    host_port: u16,
    container_port: u16,
) -> Result<String> {
    let port_mapping = format!("{bind_ip}:{host_port}:{container_port}");
    let site_mount = format!("{}:/usr/share/nginx/html:ro", site_root.display());
    let conf_mount = format!("{}:/etc/nginx/conf.d/default.conf:ro", nginx_conf.display());

    let output = run_command_in_dir(
        "docker",
        &[
            "run",
            "-d",
            "--rm",
            "--name",
            container_name,
            "-p",
            &port_mapping,
            "-v",
            &site_mount,
            "-v",
            &conf_mount,
            "nginx:alpine",
        ],
        Path::new("."),
    )
    .context("running docker serve")?;
    if !output.success {
        anyhow::bail!("docker serve failed: {}", output.stderr);
    }
    Ok(output.stdout.trim().to_string())
}

/// Remove the generated Dockerfile and nginx.conf from the build context.
/// `keep_dockerfile` is set when the build failed, so the user has the
/// scaffold available to debug or retry manually; nginx.conf is always
/// transient since it's only needed at container-start time.
pub fn cleanup_scaffold(build_context: &Path, keep_dockerfile: bool) {
    let nginx_conf = build_context.join("nginx.conf");
    let _ = std::fs::remove_file(&nginx_conf);
    if !keep_dockerfile {
        let _ = std::fs::remove_file(build_context.join("Dockerfile"));
    }
}

pub fn dockerfile_path(build_context: &Path) -> PathBuf {
    build_context.join("Dockerfile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_step_extracts_current_and_total() {
        let re = Regex::new(r"Step\s+(\d+)/(\d+)").unwrap();
        assert_eq!(parse_step("Step 3/10 : COPY . .", &re), Some((3, 10)));
        assert_eq!(parse_step("no step here", &re), None);
    }

    #[test]
    fn build_image_fails_fast_when_docker_missing() {
        if cloneforge_process::command_exists("docker") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let progress = cloneforge_progress::NullProgress::new();
        let err = build_image(dir.path(), "site", &progress, &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("docker"));
    }

    #[test]
    fn cleanup_scaffold_always_removes_nginx_conf() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nginx.conf"), "server {}").unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM nginx:alpine").unwrap();
        cleanup_scaffold(dir.path(), true);
        assert!(!dir.path().join("nginx.conf").exists());
        assert!(dir.path().join("Dockerfile").exists());
    }

    #[test]
    fn cleanup_scaffold_removes_dockerfile_when_not_keeping() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM nginx:alpine").unwrap();
        cleanup_scaffold(dir.path(), false);
        assert!(!dir.path().join("Dockerfile").exists());
    }

    #[test]
    fn dockerfile_path_joins_build_context() {
        let path = dockerfile_path(Path::new("/out/site"));
        assert_eq!(path, PathBuf::from("/out/site/Dockerfile"));
    }
}
