//! Version range resolution. npm range grammar is canonicalised into `semver::VersionReq`
//! alternatives; ordering follows semantic version precedence, never string order.

use std::cmp::Ordering;

use semver::{Version, VersionReq};

/// Picks the maximal version satisfying a range.
pub trait VersionResolver {
    /// Returns the original string of the highest version in `versions` matching `range`.
    fn max_satisfying(&self, versions: &[String], range: &str) -> Option<String>;
}

/// Default resolver backed by the `semver` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SemverResolver;

impl VersionResolver for SemverResolver {
    fn max_satisfying(&self, versions: &[String], range: &str) -> Option<String> {
        let reqs = parse_range(range)?;
        versions
            .iter()
            .filter_map(|s| parse_version(s).map(|v| (v, s)))
            .filter(|(v, _)| reqs.iter().any(|r| r.matches(v)))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, s)| s.clone())
    }
}

pub fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    Version::parse(s.strip_prefix('v').unwrap_or(s)).ok()
}

/// `a <= b` by semver precedence. Unparseable inputs compare as not-less-or-equal.
pub fn lte(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b) != Ordering::Greater,
        _ => false,
    }
}

/// Check if a concrete version satisfies a range.
pub fn version_satisfies(range: &str, version: &str) -> bool {
    let Some(v) = parse_version(version) else {
        return false;
    };
    parse_range(range)
        .map(|reqs| reqs.iter().any(|r| r.matches(&v)))
        .unwrap_or(false)
}

/// Parse an npm range into `||` alternatives. None when no alternative is understood.
pub fn parse_range(range: &str) -> Option<Vec<VersionReq>> {
    let reqs: Vec<VersionReq> = range
        .split("||")
        .filter_map(|alt| VersionReq::parse(&canonicalize(alt)).ok())
        .collect();
    (!reqs.is_empty()).then_some(reqs)
}

/// Rewrite one npm comparator set (`>=1.2 <2`, `1.2.3 - 2`, `1.x`) into semver-crate syntax.
pub fn canonicalize(alternative: &str) -> String {
    let alt = alternative.trim();
    if let Some((lo, hi)) = alt.split_once(" - ") {
        let lo = comparator(&format!(">={}", lo.trim()));
        let hi = comparator(&format!("<={}", hi.trim()));
        return format!("{}, {}", lo, hi);
    }

    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for tok in alt.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
        if is_operator(tok) {
            pending_op = Some(tok);
            continue;
        }
        let joined = match pending_op.take() {
            Some(op) => format!("{}{}", op, tok),
            None => tok.to_string(),
        };
        tokens.push(comparator(&joined));
    }

    let tokens: Vec<String> = tokens.into_iter().filter(|t| t != "*").collect();
    if tokens.is_empty() {
        "*".to_string()
    } else {
        tokens.join(", ")
    }
}

fn is_operator(tok: &str) -> bool {
    matches!(tok, ">=" | "<=" | ">" | "<" | "=" | "^" | "~" | "~>")
}

fn comparator(tok: &str) -> String {
    let split = tok
        .find(|c: char| !matches!(c, '>' | '<' | '=' | '^' | '~'))
        .unwrap_or(tok.len());
    let (op, version) = tok.split_at(split);
    let op = if op == "~>" { "~" } else { op };
    let version = version.trim_start_matches(['v', 'V']);

    // Keep segments up to the first wildcard; "1.x.x" -> "1".
    let (core, pre) = match version.find(['-', '+']) {
        Some(i) => version.split_at(i),
        None => (version, ""),
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in core.split('.') {
        if seg.is_empty() || matches!(seg, "x" | "X" | "*") {
            break;
        }
        parts.push(seg);
    }
    let complete = parts.len() == 3;

    if parts.is_empty() {
        return "*".to_string();
    }
    let version = if complete {
        format!("{}{}", parts.join("."), pre)
    } else {
        parts.join(".")
    };
    match op {
        "" if complete => format!("={}", version),
        "" => format!("~{}", version),
        op => format!("{}{}", op, version),
    }
}
