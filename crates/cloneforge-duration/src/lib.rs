//! Duration, byte-size, and rate parsing for cloneforge.
//!
//! The mirror driver accepts human-friendly size/rate strings on the CLI
//! (`--size-cap 500MB`, `--throttle 2M`) and needs to format them back for
//! `reproduce_command` generation. This crate centralizes both directions
//! plus a `humantime`-backed `serde` wrapper for the handful of `Duration`
//! fields in `CloneConfig` (settle windows, DOM-stability timeouts).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Parse a byte-size string like `"500MB"`, `"2G"`, or a bare integer
/// (bytes) into a byte count.
///
/// Accepts a case-insensitive `K`/`M`/`G`/`T` or `KB`/`MB`/`GB`/`TB` suffix
/// over a decimal number; an absent suffix means raw bytes. Returns `None`
/// on malformed input rather than erroring, matching the original tool's
/// best-effort parsing (an unparsable size-cap/throttle value is treated
/// as "not set").
pub fn parse_size_to_bytes(text: &str) -> Option<u64> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    let upper = t.to_uppercase();

    let (digits, multiplier): (&str, u64) = if let Some(rest) = upper.strip_suffix("TB") {
        (rest, 1024u64.pow(4))
    } else if let Some(rest) = upper.strip_suffix("GB") {
        (rest, 1024u64.pow(3))
    } else if let Some(rest) = upper.strip_suffix("MB") {
        (rest, 1024u64.pow(2))
    } else if let Some(rest) = upper.strip_suffix("KB") {
        (rest, 1024)
    } else if let Some(rest) = upper.strip_suffix('T') {
        (rest, 1024u64.pow(4))
    } else if let Some(rest) = upper.strip_suffix('G') {
        (rest, 1024u64.pow(3))
    } else if let Some(rest) = upper.strip_suffix('M') {
        (rest, 1024u64.pow(2))
    } else if let Some(rest) = upper.strip_suffix('K') {
        (rest, 1024)
    } else {
        (upper.as_str(), 1)
    };

    let value: f64 = digits.trim().parse().ok()?;
    if value.is_sign_negative() {
        return None;
    }
    Some((value * multiplier as f64) as u64)
}

/// Parse a throughput string (e.g. `"2M"` meaning 2 MiB/s) the same way as
/// [`parse_size_to_bytes`]. The original tool shares one parser for both.
pub fn parse_rate_to_bps(text: &str) -> Option<u64> {
    parse_size_to_bytes(text)
}

/// Render a byte count back into the `K`/`M`/`G` suffix form used by
/// `reproduce_command` (truncating, not rounding, to match the original's
/// integer-division formatting).
pub fn human_quota_suffix(bytes: u64) -> String {
    if bytes >= 1024u64.pow(3) {
        format!("{}G", bytes / 1024u64.pow(3))
    } else if bytes >= 1024u64.pow(2) {
        format!("{}M", bytes / 1024u64.pow(2))
    } else if bytes >= 1024 {
        format!("{}K", bytes / 1024)
    } else {
        bytes.to_string()
    }
}

/// Render a byte-per-second rate the same way as [`human_quota_suffix`].
pub fn human_rate_suffix(bytes_per_sec: u64) -> String {
    if bytes_per_sec >= 1024u64.pow(2) {
        format!("{}M", bytes_per_sec / 1024u64.pow(2))
    } else if bytes_per_sec >= 1024 {
        format!("{}K", bytes_per_sec / 1024)
    } else {
        bytes_per_sec.to_string()
    }
}

/// A millisecond duration with a `serde` codec that accepts both a bare
/// integer (milliseconds) and a `humantime` string (`"4s"`, `"350ms"`).
/// Used for settle windows and DOM-stability timeouts in `CloneConfig`,
/// which a `--config` file may set either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MillisDuration(pub u64);

impl MillisDuration {
    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }
}

impl std::fmt::Display for MillisDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl Serialize for MillisDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MillisDurationRepr {
    Millis(u64),
    Human(String),
}

impl<'de> Deserialize<'de> for MillisDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match MillisDurationRepr::deserialize(deserializer)? {
            MillisDurationRepr::Millis(ms) => Ok(MillisDuration(ms)),
            MillisDurationRepr::Human(text) => {
                let parsed = humantime::parse_duration(&text).map_err(serde::de::Error::custom)?;
                Ok(MillisDuration(parsed.as_millis() as u64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_size_to_bytes("1024"), Some(1024));
    }

    #[test]
    fn parses_k_m_g_t_suffixes() {
        assert_eq!(parse_size_to_bytes("1K"), Some(1024));
        assert_eq!(parse_size_to_bytes("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size_to_bytes("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size_to_bytes("1T"), Some(1024u64.pow(4)));
    }

    #[test]
    fn parses_kb_mb_gb_tb_suffixes_case_insensitively() {
        assert_eq!(parse_size_to_bytes("500mb"), Some(500 * 1024 * 1024));
        assert_eq!(parse_size_to_bytes("2gb"), Some(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_size_to_bytes(""), None);
        assert_eq!(parse_size_to_bytes("abc"), None);
        assert_eq!(parse_size_to_bytes("-5M"), None);
    }

    #[test]
    fn rate_parser_delegates_to_size_parser() {
        assert_eq!(parse_rate_to_bps("2M"), parse_size_to_bytes("2M"));
    }

    #[test]
    fn human_quota_suffix_round_trips_common_sizes() {
        assert_eq!(human_quota_suffix(2 * 1024 * 1024 * 1024), "2G");
        assert_eq!(human_quota_suffix(500 * 1024 * 1024), "500M");
        assert_eq!(human_quota_suffix(512), "512");
    }

    #[test]
    fn millis_duration_serializes_as_bare_integer() {
        let d = MillisDuration::from_millis(350);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "350");
        let back: MillisDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn millis_duration_deserializes_humantime_strings() {
        let from_seconds: MillisDuration = serde_json::from_str("\"4s\"").unwrap();
        assert_eq!(from_seconds, MillisDuration::from_millis(4000));
        let from_millis: MillisDuration = serde_json::from_str("\"350ms\"").unwrap();
        assert_eq!(from_millis, MillisDuration::from_millis(350));
    }

    #[test]
    fn millis_duration_rejects_unparsable_humantime_string() {
        let result: Result<MillisDuration, _> = serde_json::from_str("\"not-a-duration\"");
        assert!(result.is_err());
    }
}
