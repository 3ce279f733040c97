//! Root specifiers from a package.json, plus the packages the npm client itself pulls in.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::{MirrorError, Result};

/// Dependency sections flattened into roots, in this order.
pub const MANIFEST_SECTIONS: [&str; 3] = ["devDependencies", "dependencies", "optionalDependencies"];

/// Packages npm installs on its own behalf. Opt-in roots so an offline npm can bootstrap.
pub const NPM_EXTRAS: &[&str] = &[
    "number-is-nan",
    "babel-runtime",
    "babel-register",
    "trim-right",
    "babel-traverse",
    "private",
    "json5",
    "globals",
    "to-fast-properties",
    "babel-generator",
    "babel-helpers",
    "source-map-support",
    "regenerator-runtime",
    "home-or-tmp",
    "slash",
    "invariant",
    "babel-core",
    "babylon",
    "detect-indent",
    "convert-source-map",
    "esutils",
    "core-js",
    "jsesc",
    "js-tokens",
    "babel-code-frame",
    "loose-envify",
    "babel-messages",
    "ms",
    "debug",
    "is-finite",
    "repeating",
    "babel-types",
    "babel-template",
    "npm",
];

/// Flatten a manifest document into `name@range` specifiers.
pub fn roots_from_value(manifest: &Value) -> Vec<String> {
    let mut roots = Vec::new();
    for section in MANIFEST_SECTIONS {
        let Some(deps) = manifest.get(section).and_then(Value::as_object) else {
            continue;
        };
        for (name, range) in deps {
            match range.as_str() {
                Some(range) => roots.push(format!("{}@{}", name, range)),
                None => roots.push(name.clone()),
            }
        }
    }
    roots
}

pub fn roots_from_package_json(path: &Path) -> Result<Vec<String>> {
    let body = fs::read_to_string(path).map_err(|e| MirrorError::Config {
        field: Some("package.json".to_string()),
        source: format!("{}: {}", path.display(), e),
    })?;
    let manifest: Value =
        serde_json::from_str(&body).map_err(|e| MirrorError::parse(&path.display().to_string(), e))?;
    Ok(roots_from_value(&manifest))
}

/// Prepend the npm extras to `roots`.
pub fn with_npm_extras(roots: Vec<String>) -> Vec<String> {
    NPM_EXTRAS
        .iter()
        .map(|s| s.to_string())
        .chain(roots)
        .collect()
}
