//! Content store for tarballs: deterministic destination path, cache-hit skip,
//! atomic download, digest check.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};
use crate::integrity::{self, ExpectedDigest};
use crate::layout;
use crate::logging;
use crate::registry::RegistrySource;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreResult {
    pub path: PathBuf,
    /// False when an existing file was reused.
    pub downloaded: bool,
    /// None when nothing was checked: no declared digest, or an unverified cache hit.
    pub digest_matched: Option<bool>,
    pub actual_digest: Option<String>,
}

impl StoreResult {
    pub fn is_mismatch(&self) -> bool {
        self.digest_matched == Some(false)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ContentStore {
    /// Re-download even when the destination file exists.
    pub force: bool,
    /// Hash existing files on a cache hit and re-download once on mismatch.
    pub verify_cached: bool,
}

impl ContentStore {
    pub fn new(force: bool, verify_cached: bool) -> Self {
        Self { force, verify_cached }
    }

    /// Make sure the artifact at `url` is present in `dest_dir`.
    pub fn ensure<S: RegistrySource + ?Sized>(
        &self,
        source: &S,
        url: &str,
        expected: Option<&ExpectedDigest>,
        dest_dir: &Path,
    ) -> Result<StoreResult> {
        ensure_dir(dest_dir);

        let filename = layout::filename_from_url(url);
        if !layout::is_safe_component(filename) {
            return Err(MirrorError::parse("tarball url", format!("no usable file name in {}", url)));
        }
        let path = dest_dir.join(filename);

        if path.is_file() && !self.force {
            match (self.verify_cached, expected) {
                (true, Some(expected)) => {
                    let check = integrity::verify_file(&path, expected)?;
                    if check.matched {
                        return Ok(StoreResult {
                            path,
                            downloaded: false,
                            digest_matched: Some(true),
                            actual_digest: Some(check.actual),
                        });
                    }
                    logging::warn(&format!(
                        "Cached file {} has digest {}, expected {}; downloading again",
                        path.display(),
                        check.actual,
                        expected
                    ));
                }
                _ => {
                    return Ok(StoreResult {
                        path,
                        downloaded: false,
                        digest_matched: None,
                        actual_digest: None,
                    })
                }
            }
        }

        download_atomic(source, url, &path)?;

        let (digest_matched, actual_digest) = match expected {
            Some(expected) => {
                let check = integrity::verify_file(&path, expected)?;
                (Some(check.matched), Some(check.actual))
            }
            None => (None, None),
        };
        Ok(StoreResult {
            path,
            downloaded: true,
            digest_matched,
            actual_digest,
        })
    }
}

/// Idempotent and best-effort: a failure is logged, and any write that needed the
/// directory reports its own I/O error.
pub fn ensure_dir(dir: &Path) {
    if dir.is_dir() {
        return;
    }
    if let Err(e) = fs::create_dir_all(dir) {
        let err = MirrorError::DirectoryCreation {
            path: dir.display().to_string(),
            source: e.to_string(),
        };
        logging::warn(&err.to_string());
    }
}

/// Download to a sibling `.part` file, then rename over the destination.
fn download_atomic<S: RegistrySource + ?Sized>(source: &S, url: &str, dest: &Path) -> Result<()> {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = dest.with_file_name(format!(".{}.part", name));

    if let Err(e) = source.download(url, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, dest).map_err(|e| {
        let _ = fs::remove_file(&partial);
        MirrorError::io("rename downloaded file", Some(dest), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::sha1_hex;
    use crate::registry::fake::MemoryRegistry;

    const URL: &str = "https://registry.npmjs.org/foo/-/foo-1.0.0.tgz";

    fn registry(bytes: &[u8]) -> MemoryRegistry {
        let mut reg = MemoryRegistry::new();
        reg.tarballs.insert(URL.to_string(), bytes.to_vec());
        reg
    }

    #[test]
    fn test_download_and_verify() {
        let reg = registry(b"payload");
        let dir = tempfile::tempdir().unwrap();
        let expected = ExpectedDigest::Sha1Hex(sha1_hex(b"payload"));

        let res = ContentStore::default()
            .ensure(&reg, URL, Some(&expected), &dir.path().join("tgz"))
            .unwrap();
        assert!(res.downloaded);
        assert_eq!(res.digest_matched, Some(true));
        assert_eq!(res.path, dir.path().join("tgz").join("foo-1.0.0.tgz"));
        assert_eq!(fs::read(&res.path).unwrap(), b"payload");
        assert!(!dir.path().join("tgz").join(".foo-1.0.0.tgz.part").exists());
    }

    #[test]
    fn test_existing_file_is_cache_hit_without_download() {
        let reg = registry(b"payload");
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo-1.0.0.tgz"), b"old").unwrap();

        let res = ContentStore::default().ensure(&reg, URL, None, dir.path()).unwrap();
        assert!(!res.downloaded);
        assert_eq!(res.digest_matched, None);
        assert_eq!(reg.download_count(URL), 0);
        assert_eq!(fs::read(&res.path).unwrap(), b"old");
    }

    #[test]
    fn test_force_redownloads() {
        let reg = registry(b"payload");
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo-1.0.0.tgz"), b"old").unwrap();

        let res = ContentStore::new(true, false).ensure(&reg, URL, None, dir.path()).unwrap();
        assert!(res.downloaded);
        assert_eq!(fs::read(&res.path).unwrap(), b"payload");
    }

    #[test]
    fn test_verify_cached_replaces_corrupt_file() {
        let reg = registry(b"payload");
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo-1.0.0.tgz"), b"corrupt").unwrap();
        let expected = ExpectedDigest::Sha1Hex(sha1_hex(b"payload"));

        let res = ContentStore::new(false, true)
            .ensure(&reg, URL, Some(&expected), dir.path())
            .unwrap();
        assert!(res.downloaded);
        assert_eq!(res.digest_matched, Some(true));

        let again = ContentStore::new(false, true)
            .ensure(&reg, URL, Some(&expected), dir.path())
            .unwrap();
        assert!(!again.downloaded);
        assert_eq!(again.digest_matched, Some(true));
        assert_eq!(reg.download_count(URL), 1);
    }

    #[test]
    fn test_mismatch_keeps_file() {
        let reg = registry(b"tampered");
        let dir = tempfile::tempdir().unwrap();
        let expected = ExpectedDigest::Sha1Hex(sha1_hex(b"payload"));

        let res = ContentStore::default()
            .ensure(&reg, URL, Some(&expected), dir.path())
            .unwrap();
        assert!(res.is_mismatch());
        assert_eq!(res.actual_digest, Some(sha1_hex(b"tampered")));
        assert!(res.path.exists());
    }

    #[test]
    fn test_failed_download_leaves_nothing() {
        let reg = MemoryRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let err = ContentStore::default().ensure(&reg, URL, None, dir.path()).unwrap_err();
        assert!(matches!(err, MirrorError::Network { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested);
        ensure_dir(&nested);
        assert!(nested.is_dir());
    }
}
