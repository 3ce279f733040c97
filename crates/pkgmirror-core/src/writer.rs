//! Persists packuments and tarballs into the mirror layout.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};
use crate::integrity::ExpectedDigest;
use crate::layout;
use crate::metadata::{RegistryMetadata, VersionRecord};
use crate::registry::RegistrySource;
use crate::specifier::split_scope;
use crate::store::{self, ContentStore, StoreResult};

pub struct MirrorWriter {
    root: PathBuf,
    store: ContentStore,
}

impl MirrorWriter {
    pub fn new(root: impl Into<PathBuf>, store: ContentStore) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the packument verbatim, pretty-printed. Always overwrites.
    pub fn write_metadata(&self, metadata: &RegistryMetadata) -> Result<PathBuf> {
        let (scope, bare) = checked_split(&metadata.name)?;
        store::ensure_dir(&layout::package_dir(&self.root, scope));
        let path = layout::metadata_path(&self.root, scope, bare);
        let body = serde_json::to_string_pretty(&metadata.document)
            .map_err(|e| MirrorError::parse("metadata document", e))?;
        fs::write(&path, body).map_err(|e| MirrorError::io("write metadata", Some(&path), e))?;
        Ok(path)
    }

    /// Store one version's tarball under the package's `tgz/` directory, subject to the
    /// store's cache policy.
    pub fn write_tarball<S: RegistrySource + ?Sized>(
        &self,
        source: &S,
        package: &str,
        record: &VersionRecord,
    ) -> Result<StoreResult> {
        if record.tarball_url.is_empty() {
            return Err(MirrorError::parse(
                "version record",
                format!("{} has no dist.tarball", package),
            ));
        }
        let (scope, _) = checked_split(package)?;
        let expected = ExpectedDigest::from_record(record);
        self.store.ensure(
            source,
            &record.tarball_url,
            expected.as_ref(),
            &layout::tarball_dir(&self.root, scope),
        )
    }
}

/// (scope, bare name), refusing anything that would not stay one directory level under
/// the mirror root. The error is non-fatal: the package is skipped, the crawl goes on.
fn checked_split(name: &str) -> Result<(Option<&str>, &str)> {
    let (scope, bare) = split_scope(name);
    if scope.is_some_and(|s| !layout::is_safe_component(s)) || !layout::is_safe_component(bare) {
        return Err(MirrorError::malformed(name, "name is not a valid path segment"));
    }
    Ok((scope, bare))
}
