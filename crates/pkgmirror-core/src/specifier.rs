//! Package specifier parsing: `name`, `name@range`, `@scope/name`, `@scope/name@range`.

use std::fmt;

use crate::error::{MirrorError, Result};
use crate::layout::is_safe_component;

const SCOPE_MARKER: char = '@';
const VERSION_SEPARATOR: char = '@';
const PATH_SEPARATOR: char = '/';

/// A parsed package specifier. `name` keeps the scope prefix (`@scope/pkg`), which is
/// the key the registry knows the package by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackageSpecifier {
    pub raw: String,
    pub scope: Option<String>,
    pub name: String,
    pub version_range: Option<String>,
}

impl PackageSpecifier {
    /// Parse `spec`. A scope with no package name (`@onlyscope`) is rejected, as is any
    /// name segment that could not live as a single file name under the mirror root.
    pub fn parse(spec: &str) -> Result<Self> {
        let raw = spec.trim();
        if raw.is_empty() {
            return Err(MirrorError::malformed(spec, "empty specifier"));
        }

        let scoped = raw.starts_with(SCOPE_MARKER);
        let body = if scoped { &raw[1..] } else { raw };
        let separators = body.matches(VERSION_SEPARATOR).count();
        if separators > 1 {
            return Err(MirrorError::malformed(spec, "more than one version separator"));
        }

        let (name, version_range) = match body.rfind(VERSION_SEPARATOR) {
            Some(idx) => {
                let offset = if scoped { 1 } else { 0 };
                let range = body[idx + 1..].trim();
                (
                    &raw[..idx + offset],
                    (!range.is_empty()).then(|| range.to_string()),
                )
            }
            None => (raw, None),
        };

        if name.is_empty() {
            return Err(MirrorError::malformed(spec, "missing package name"));
        }

        let scope = if scoped {
            let Some((scope, bare)) = name[1..].split_once(PATH_SEPARATOR) else {
                return Err(MirrorError::malformed(spec, "scoped name has no '/' separator"));
            };
            if scope.is_empty() || bare.is_empty() || bare.contains(PATH_SEPARATOR) {
                return Err(MirrorError::malformed(spec, "scoped name must be @scope/name"));
            }
            if !is_safe_component(scope) || !is_safe_component(bare) {
                return Err(MirrorError::malformed(spec, "scope or name is not a valid path segment"));
            }
            Some(scope.to_string())
        } else {
            if !is_safe_component(name) {
                return Err(MirrorError::malformed(spec, "name is not a valid path segment"));
            }
            None
        };

        Ok(Self {
            raw: raw.to_string(),
            scope,
            name: name.to_string(),
            version_range,
        })
    }

    /// Name without the `@scope/` prefix.
    pub fn bare_name(&self) -> &str {
        match &self.scope {
            Some(_) => self
                .name
                .split_once(PATH_SEPARATOR)
                .map(|(_, bare)| bare)
                .unwrap_or(&self.name),
            None => &self.name,
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }
}

impl fmt::Display for PackageSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_range {
            Some(range) => write!(f, "{}@{}", self.name, range),
            None => f.write_str(&self.name),
        }
    }
}

/// Split a registry package name into (scope, bare name). `@babel/core` -> (Some("babel"), "core").
pub fn split_scope(name: &str) -> (Option<&str>, &str) {
    if let Some(rest) = name.strip_prefix(SCOPE_MARKER) {
        if let Some((scope, bare)) = rest.split_once(PATH_SEPARATOR) {
            return (Some(scope), bare);
        }
    }
    (None, name)
}
