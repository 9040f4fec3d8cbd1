//! Credential resolution for sites behind basic auth, and Netscape
//! cookie-jar handling for the mirror driver's `--load-cookies` support.
//!
//! Basic-auth resolution follows the same layered precedence shape as a
//! registry token lookup: an explicit value beats an environment
//! variable beats nothing. Nothing here ever touches a config *file* —
//! that's `cloneforge-config`'s job; this crate only knows how to turn
//! "a username and password from somewhere" into the form the mirror
//! driver wants, and how to mask it back out of logs.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};

/// Environment variable carrying the basic-auth username.
pub const HTTP_USER_ENV: &str = "CLONEFORGE_HTTP_USER";
/// Environment variable carrying the basic-auth password.
pub const HTTP_PASSWORD_ENV: &str = "CLONEFORGE_HTTP_PASSWORD";

/// Resolved basic-auth credentials for the site being cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Resolve basic-auth credentials, preferring explicit CLI-supplied
/// values over the environment. Returns `None` if neither a username nor
/// a password is available from either source.
pub fn resolve_basic_auth(
    cli_user: Option<&str>,
    cli_password: Option<&str>,
) -> Option<BasicAuth> {
    let username = cli_user
        .map(str::to_string)
        .or_else(|| env::var(HTTP_USER_ENV).ok());
    let password = cli_password
        .map(str::to_string)
        .or_else(|| env::var(HTTP_PASSWORD_ENV).ok());

    match (username, password) {
        (Some(username), Some(password)) => Some(BasicAuth { username, password }),
        _ => None,
    }
}

/// Mask a secret for safe display (show first 2 and last 2 chars; fully
/// mask anything too short for that to be meaningful).
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        return "*".repeat(secret.len());
    }
    format!("{}***{}", &secret[..2], &secret[secret.len() - 2..])
}

/// One entry from a Netscape-format cookie jar
/// (`domain\tinclude_subdomains\tpath\tsecure\texpiry\tname\tvalue`).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub expiry: i64,
    pub name: String,
    pub value: String,
}

/// Parse a Netscape-format cookies file, skipping blank lines and `#`
/// comments (the `#HttpOnly_` prefix variant is treated as a comment —
/// HttpOnly cookies are still sent by the mirror driver, just not
/// specially flagged here).
pub fn parse_netscape_cookies(path: &Path) -> Result<Vec<Cookie>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading cookies file: {}", path.display()))?;
    Ok(parse_netscape_cookies_str(&content))
}

fn parse_netscape_cookies_str(content: &str) -> Vec<Cookie> {
    let mut cookies = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            continue;
        }
        let Ok(expiry) = fields[4].parse::<i64>() else {
            continue;
        };
        cookies.push(Cookie {
            domain: fields[0].to_string(),
            include_subdomains: fields[1].eq_ignore_ascii_case("true"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("true"),
            expiry,
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        });
    }
    cookies
}

/// Serialize cookies back to Netscape format, for re-exporting an
/// imported jar or writing one captured during dynamic rendering.
pub fn write_netscape_cookies(cookies: &[Cookie]) -> String {
    let mut out = String::from("# Netscape HTTP Cookie File\n");
    for c in cookies {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            c.domain,
            if c.include_subdomains { "TRUE" } else { "FALSE" },
            c.path,
            if c.secure { "TRUE" } else { "FALSE" },
            c.expiry,
            c.name,
            c.value,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_basic_auth_prefers_cli_over_env() {
        temp_env::with_vars(
            [
                (HTTP_USER_ENV, Some("env-user")),
                (HTTP_PASSWORD_ENV, Some("env-pass")),
            ],
            || {
                let auth = resolve_basic_auth(Some("cli-user"), Some("cli-pass")).unwrap();
                assert_eq!(auth.username, "cli-user");
                assert_eq!(auth.password, "cli-pass");
            },
        );
    }

    #[test]
    fn resolve_basic_auth_falls_back_to_env() {
        temp_env::with_vars(
            [
                (HTTP_USER_ENV, Some("env-user")),
                (HTTP_PASSWORD_ENV, Some("env-pass")),
            ],
            || {
                let auth = resolve_basic_auth(None, None).unwrap();
                assert_eq!(auth.username, "env-user");
                assert_eq!(auth.password, "env-pass");
            },
        );
    }

    #[test]
    fn resolve_basic_auth_none_when_only_username_present() {
        temp_env::with_vars(
            [(HTTP_USER_ENV, Some("env-user")), (HTTP_PASSWORD_ENV, None::<String>)],
            || {
                assert!(resolve_basic_auth(None, None).is_none());
            },
        );
    }

    #[test]
    fn mask_secret_short_is_fully_masked() {
        assert_eq!(mask_secret("ab"), "**");
    }

    #[test]
    fn mask_secret_long_shows_edges() {
        assert_eq!(mask_secret("supersecret"), "su***et");
    }

    #[test]
    fn parse_netscape_cookies_skips_comments_and_blanks() {
        let content = "# Netscape HTTP Cookie File\n\n\
                        example.com\tTRUE\t/\tFALSE\t1893456000\tsession\tabc123\n";
        let cookies = parse_netscape_cookies_str(content);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].domain, "example.com");
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].value, "abc123");
        assert!(!cookies[0].secure);
        assert!(cookies[0].include_subdomains);
    }

    #[test]
    fn parse_netscape_cookies_ignores_malformed_lines() {
        let content = "not\tenough\tfields\n";
        assert!(parse_netscape_cookies_str(content).is_empty());
    }

    #[test]
    fn round_trip_write_then_parse() {
        let cookies = vec![Cookie {
            domain: "example.com".to_string(),
            include_subdomains: false,
            path: "/".to_string(),
            secure: true,
            expiry: 1893456000,
            name: "token".to_string(),
            value: "xyz".to_string(),
        }];
        let written = write_netscape_cookies(&cookies);
        let parsed = parse_netscape_cookies_str(&written);
        assert_eq!(parsed, cookies);
    }
}
