//! Typed view over a registry packument. The raw document is kept verbatim so the
//! mirror writes back exactly what the registry served.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{MirrorError, Result};
use crate::version;

/// Everything the crawler needs to know about one published version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionRecord {
    pub tarball_url: String,
    /// Hex sha1 from `dist.shasum`.
    pub shasum: Option<String>,
    /// SRI string from `dist.integrity`.
    pub integrity: Option<String>,
    pub dependencies: IndexMap<String, String>,
    pub optional_dependencies: IndexMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct RegistryMetadata {
    pub name: String,
    pub latest_tag: String,
    pub next_tag: Option<String>,
    pub dist_tags: IndexMap<String, String>,
    /// Published versions in document order.
    pub versions: IndexMap<String, VersionRecord>,
    pub document: Value,
}

impl RegistryMetadata {
    /// Build the typed view. A document without `dist-tags.latest` or `versions` is not a usable
    /// packument and is reported as `MetadataUnavailable`.
    pub fn from_document(name: &str, document: Value) -> Result<Self> {
        let unavailable = |source: &str| MirrorError::MetadataUnavailable {
            package: name.to_string(),
            status: None,
            source: source.to_string(),
        };

        let dist_tags: IndexMap<String, String> = document
            .get("dist-tags")
            .and_then(Value::as_object)
            .map(|tags| {
                tags.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let latest_tag = dist_tags
            .get("latest")
            .cloned()
            .ok_or_else(|| unavailable("document has no dist-tags.latest"))?;
        let next_tag = dist_tags.get("next").cloned();

        let raw_versions = document
            .get("versions")
            .and_then(Value::as_object)
            .ok_or_else(|| unavailable("document has no versions object"))?;

        let mut versions = IndexMap::with_capacity(raw_versions.len());
        for (version, body) in raw_versions {
            versions.insert(version.clone(), VersionRecord::from_value(body));
        }

        Ok(Self {
            name: name.to_string(),
            latest_tag,
            next_tag,
            dist_tags,
            versions,
            document,
        })
    }

    pub fn version_strings(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    /// Versions with precedence at or below `latest`. Excludes the "next" channel.
    pub fn versions_up_to_latest(&self) -> Vec<String> {
        self.versions
            .keys()
            .filter(|v| version::lte(v, &self.latest_tag))
            .cloned()
            .collect()
    }

    /// Resolve a dist-tag name (`latest`, `next`, `beta`) to its version.
    pub fn tag(&self, tag: &str) -> Option<&str> {
        self.dist_tags.get(tag).map(String::as_str)
    }

    pub fn record(&self, version: &str) -> Option<&VersionRecord> {
        self.versions.get(version)
    }
}

impl VersionRecord {
    fn from_value(body: &Value) -> Self {
        let dist = body.get("dist");
        let dist_str = |key: &str| {
            dist.and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            tarball_url: dist_str("tarball").unwrap_or_default(),
            shasum: dist_str("shasum"),
            integrity: dist_str("integrity"),
            dependencies: string_map(body.get("dependencies")),
            optional_dependencies: string_map(body.get("optionalDependencies")),
        }
    }
}

fn string_map(value: Option<&Value>) -> IndexMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or("*").to_string()))
                .collect()
        })
        .unwrap_or_default()
}
