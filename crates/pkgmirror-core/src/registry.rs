//! Registry client: fetch packuments and artifacts over HTTP.
//! The crawler talks to a `RegistrySource` so tests can substitute an in-memory registry.

use std::path::Path;

use crate::error::{MirrorError, Result};
use crate::http_client::{HttpClient, HttpSettings};
use crate::metadata::RegistryMetadata;

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

pub trait RegistrySource {
    /// Fetch the full metadata document for `name`. One call per distinct name per run;
    /// memoization belongs to the caller.
    fn fetch_metadata(&self, name: &str) -> Result<RegistryMetadata>;

    /// Download the artifact at `url` into `dest`, replacing any existing file.
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Scoped names keep the `@` and escape the slash: `@scope/pkg` -> `@scope%2Fpkg`.
pub fn encoded_package_path(package: &str) -> String {
    if package.starts_with('@') {
        package.replace('/', "%2F")
    } else {
        package.to_string()
    }
}

pub fn metadata_url(base: &str, package: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        encoded_package_path(package).trim_start_matches('/')
    )
}

pub struct HttpRegistry {
    base_url: String,
    client: HttpClient,
}

impl HttpRegistry {
    pub fn new(base_url: &str, settings: HttpSettings) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: HttpClient::new(settings),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

impl RegistrySource for HttpRegistry {
    fn fetch_metadata(&self, name: &str) -> Result<RegistryMetadata> {
        let url = metadata_url(&self.base_url, name);
        let body = self
            .client
            .get_bytes(&url)
            .map_err(|f| MirrorError::MetadataUnavailable {
                package: name.to_string(),
                status: f.status,
                source: f.message,
            })?;
        let document: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| MirrorError::MetadataUnavailable {
                package: name.to_string(),
                status: None,
                source: format!("invalid JSON: {}", e),
            })?;
        RegistryMetadata::from_document(name, document)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.client.get_to_file(url, dest)
    }
}

/// In-memory registry used by unit tests. Counts metadata fetches and downloads per key.
#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::Path;

    use serde_json::{json, Value};

    use super::RegistrySource;
    use crate::error::{MirrorError, Result};
    use crate::metadata::RegistryMetadata;

    #[derive(Default)]
    pub struct MemoryRegistry {
        pub documents: HashMap<String, Value>,
        pub tarballs: HashMap<String, Vec<u8>>,
        pub metadata_calls: RefCell<HashMap<String, usize>>,
        pub downloads: RefCell<HashMap<String, usize>>,
    }

    impl MemoryRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a package. `versions` is (version, dependencies, tarball bytes).
        pub fn publish(
            &mut self,
            name: &str,
            latest: &str,
            versions: &[(&str, &[(&str, &str)], &[u8])],
        ) {
            let mut doc_versions = serde_json::Map::new();
            for (version, deps, bytes) in versions {
                let bare = name.rsplit('/').next().unwrap_or(name);
                let url = format!("https://registry.npmjs.org/{}/-/{}-{}.tgz", name, bare, version);
                let shasum = crate::integrity::sha1_hex(bytes);
                let deps: serde_json::Map<String, Value> = deps
                    .iter()
                    .map(|(n, r)| (n.to_string(), Value::String(r.to_string())))
                    .collect();
                doc_versions.insert(
                    version.to_string(),
                    json!({
                        "name": name,
                        "version": version,
                        "dist": { "tarball": url, "shasum": shasum },
                        "dependencies": deps,
                    }),
                );
                self.tarballs.insert(url, bytes.to_vec());
            }
            self.documents.insert(
                name.to_string(),
                json!({
                    "name": name,
                    "dist-tags": { "latest": latest },
                    "versions": doc_versions,
                }),
            );
        }

        pub fn metadata_calls(&self, name: &str) -> usize {
            self.metadata_calls.borrow().get(name).copied().unwrap_or(0)
        }

        pub fn download_count(&self, url: &str) -> usize {
            self.downloads.borrow().get(url).copied().unwrap_or(0)
        }

        pub fn total_downloads(&self) -> usize {
            self.downloads.borrow().values().sum()
        }
    }

    impl RegistrySource for MemoryRegistry {
        fn fetch_metadata(&self, name: &str) -> Result<RegistryMetadata> {
            *self
                .metadata_calls
                .borrow_mut()
                .entry(name.to_string())
                .or_default() += 1;
            match self.documents.get(name) {
                Some(doc) => RegistryMetadata::from_document(name, doc.clone()),
                None => Err(MirrorError::MetadataUnavailable {
                    package: name.to_string(),
                    status: Some(404),
                    source: "HTTP 404".to_string(),
                }),
            }
        }

        fn download(&self, url: &str, dest: &Path) -> Result<()> {
            *self.downloads.borrow_mut().entry(url.to_string()).or_default() += 1;
            let bytes = self
                .tarballs
                .get(url)
                .ok_or_else(|| MirrorError::network("download", url, Some(404), "HTTP 404"))?;
            std::fs::write(dest, bytes).map_err(|e| MirrorError::io("write tarball", Some(dest), e))
        }
    }
}
