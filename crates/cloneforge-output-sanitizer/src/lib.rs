//! Sanitize mirror-driver and build-driver command lines before they are
//! logged or placed into an event, per the engine's error-handling design:
//! a failing mirror invocation is reported with its command line so
//! operators can reproduce it, but passwords and tokens must never leak
//! into logs, NDJSON event sinks, or the manifest.
//!
//! Masked shapes: `--http-password=...`, `--http-user=...`,
//! `--ftp-password=...`, an `Authorization:` header value, and
//! `token=`/`auth=` query-string parameters. Everything else passes
//! through untouched.

const MASK: &str = "***";

/// Sanitize a full argv (as would be passed to `Command::args`), returning
/// a display-safe joined command string.
pub fn sanitize_command<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parts = vec![program.to_string()];
    parts.extend(args.into_iter().map(|a| sanitize_arg(a.as_ref())));
    parts.join(" ")
}

/// Sanitize a single argument string.
pub fn sanitize_arg(arg: &str) -> String {
    for prefix in [
        "--http-password=",
        "--http-user=",
        "--ftp-password=",
        "--ftp-user=",
        "--auth-pass=",
        "--password=",
    ] {
        if let Some(rest) = arg.strip_prefix(prefix) {
            if !rest.is_empty() {
                return format!("{prefix}{MASK}");
            }
        }
    }
    if let Some(rest) = strip_ci_prefix(arg, "Authorization:") {
        let _ = rest;
        return format!("Authorization: {MASK}");
    }
    sanitize_query_params(arg)
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Mask `token=` and `auth=` query-string parameters embedded in a URL or
/// bare query-string argument, preserving everything else verbatim.
fn sanitize_query_params(arg: &str) -> String {
    if !arg.contains('?') && !arg.contains('&') && !arg.contains('=') {
        return arg.to_string();
    }
    let Some(q_idx) = arg.find('?') else {
        return arg.to_string();
    };
    let (head, query) = arg.split_at(q_idx);
    let query = &query[1..]; // drop '?'
    let rebuilt: Vec<String> = query
        .split('&')
        .map(|kv| {
            if let Some((k, v)) = kv.split_once('=') {
                let lk = k.to_ascii_lowercase();
                if (lk == "token" || lk == "auth") && !v.is_empty() {
                    format!("{k}={MASK}")
                } else {
                    kv.to_string()
                }
            } else {
                kv.to_string()
            }
        })
        .collect();
    format!("{head}?{}", rebuilt.join("&"))
}
