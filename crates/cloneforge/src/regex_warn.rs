//! Risky-regex detection for `--router-allow`/`--router-deny` patterns.
//!
//! Grounded in the original's `detect_risky_regex`: the heuristic is
//! deliberately narrow, exactly two named shapes, per §9's Open Question
//! resolution. No further heuristics are added even though real-world
//! catastrophic-backtracking patterns come in more shapes than these two
//! — broadening the heuristic risks false positives the original authors
//! evidently chose not to take on.

use serde::Serialize;

/// Which of the two named risky shapes a pattern matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskyShape {
    /// Two or more consecutive unbounded wildcards, e.g. `(.*.*foo)`.
    ConsecutiveAnyWildcards,
    /// A repeating group whose body itself ends in a repeat operator,
    /// e.g. `(a+b+)+` or any group ending in `+)+`.
    NestedRepeatingGroup,
}

impl RiskyShape {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskyShape::ConsecutiveAnyWildcards => "consecutive_any_wildcards",
            RiskyShape::NestedRepeatingGroup => "nested_repeating_group",
        }
    }
}

/// Check one pattern string for either risky shape. Returns every shape it
/// matches (a pattern can in principle trip both).
pub fn detect_risky_regex(pattern: &str) -> Vec<RiskyShape> {
    let mut hits = Vec::new();
    if pattern.contains(".*.*") {
        hits.push(RiskyShape::ConsecutiveAnyWildcards);
    }
    if has_nested_repeating_group(pattern) {
        hits.push(RiskyShape::NestedRepeatingGroup);
    }
    hits
}

/// A repeat operator (`+` or `*`) immediately followed by a closing paren
/// that is itself immediately followed by another repeat operator, e.g.
/// `(a+b+)+`: the body contains its own repeat and the group repeats too.
fn has_nested_repeating_group(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b')' {
            continue;
        }
        let followed_by_repeat = matches!(bytes.get(i + 1), Some(b'+') | Some(b'*'));
        if !followed_by_repeat {
            continue;
        }
        // Find the matching '(' by scanning backward with depth counting.
        let mut depth = 0i32;
        let mut j = i as isize;
        let mut open = None;
        while j >= 0 {
            match bytes[j as usize] {
                b')' => depth += 1,
                b'(' => {
                    depth -= 1;
                    if depth == 0 {
                        open = Some(j as usize);
                        break;
                    }
                }
                _ => {}
            }
            j -= 1;
        }
        if let Some(open) = open {
            let body = &pattern[open + 1..i];
            if body.ends_with('+') || body.ends_with('*') {
                return true;
            }
        }
    }
    false
}

/// Scan every allow/deny pattern in a [`cloneforge_types::RouterOptions`],
/// returning `(pattern, shape)` pairs in scan order (allow list first,
/// then deny), for both `regex_warning` events and manifest warnings.
pub fn scan_router_patterns(allow: &[String], deny: &[String]) -> Vec<(String, RiskyShape)> {
    let mut hits = Vec::new();
    for pattern in allow.iter().chain(deny.iter()) {
        for shape in detect_risky_regex(pattern) {
            hits.push((pattern.clone(), shape));
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_consecutive_any_wildcards() {
        let hits = detect_risky_regex("(.*.*foo)");
        assert_eq!(hits, vec![RiskyShape::ConsecutiveAnyWildcards]);
    }

    #[test]
    fn detects_nested_repeating_group() {
        let hits = detect_risky_regex("(a+b+)+");
        assert!(hits.contains(&RiskyShape::NestedRepeatingGroup));
    }

    #[test]
    fn trailing_plus_close_paren_plus_is_risky() {
        let hits = detect_risky_regex("(x+)+");
        assert!(hits.contains(&RiskyShape::NestedRepeatingGroup));
    }

    #[test]
    fn benign_pattern_has_no_hits() {
        assert!(detect_risky_regex("^/api/.*$").is_empty());
        assert!(detect_risky_regex("/users/[0-9]+").is_empty());
    }

    #[test]
    fn scan_router_patterns_covers_allow_then_deny() {
        let allow = vec!["(.*.*x)".to_string()];
        let deny = vec!["(a+b+)+".to_string()];
        let hits = scan_router_patterns(&allow, &deny);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "(.*.*x)");
        assert_eq!(hits[1].0, "(a+b+)+");
    }
}
