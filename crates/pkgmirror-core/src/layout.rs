//! On-disk mirror layout. Pure functions of (scope, name, tarball URL):
//!
//! ```text
//! <root>/<name>.json
//! <root>/tgz/<tarball-filename>
//! <root>/scoped/<scope>/<name>.json
//! <root>/scoped/<scope>/tgz/<tarball-filename>
//! <root>/_tools/<tool>/...
//! ```

use std::path::{Path, PathBuf};

pub const SCOPED_DIR: &str = "scoped";
pub const TARBALL_DIR: &str = "tgz";
pub const TOOLS_DIR: &str = "_tools";

/// Directory holding a package's metadata file.
pub fn package_dir(root: &Path, scope: Option<&str>) -> PathBuf {
    match scope {
        Some(scope) => root.join(SCOPED_DIR).join(scope),
        None => root.to_path_buf(),
    }
}

pub fn metadata_path(root: &Path, scope: Option<&str>, bare_name: &str) -> PathBuf {
    package_dir(root, scope).join(format!("{}.json", bare_name))
}

pub fn tarball_dir(root: &Path, scope: Option<&str>) -> PathBuf {
    package_dir(root, scope).join(TARBALL_DIR)
}

pub fn tarball_path(root: &Path, scope: Option<&str>, tarball_url: &str) -> PathBuf {
    tarball_dir(root, scope).join(filename_from_url(tarball_url))
}

pub fn tools_dir(root: &Path, tool: &str) -> PathBuf {
    root.join(TOOLS_DIR).join(tool)
}

/// Final path segment of a URL, ignoring query and fragment.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// True when a single path component is safe to join under the mirror root.
pub fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscoped_paths() {
        let root = Path::new("/m");
        assert_eq!(metadata_path(root, None, "foo"), PathBuf::from("/m/foo.json"));
        assert_eq!(
            tarball_path(root, None, "https://registry.npmjs.org/foo/-/foo-1.2.3.tgz"),
            PathBuf::from("/m/tgz/foo-1.2.3.tgz")
        );
    }

    #[test]
    fn test_scoped_paths_are_nested() {
        let root = Path::new("/m");
        assert_eq!(
            metadata_path(root, Some("scope"), "foo"),
            PathBuf::from("/m/scoped/scope/foo.json")
        );
        assert_eq!(
            tarball_path(root, Some("scope"), "https://registry.npmjs.org/@scope/foo/-/foo-1.2.3.tgz"),
            PathBuf::from("/m/scoped/scope/tgz/foo-1.2.3.tgz")
        );
    }

    #[test]
    fn test_filename_from_url_strips_query() {
        assert_eq!(filename_from_url("http://x/a/b-1.0.0.tgz?token=1"), "b-1.0.0.tgz");
        assert_eq!(filename_from_url("b.tgz"), "b.tgz");
    }

    #[test]
    fn test_safe_component() {
        assert!(is_safe_component("foo-1.0.0.tgz"));
        assert!(!is_safe_component(".."));
        assert!(!is_safe_component("a/b"));
        assert!(!is_safe_component(""));
    }

    #[test]
    fn test_tools_dir() {
        assert_eq!(
            tools_dir(Path::new("/m"), "chromedriver"),
            PathBuf::from("/m/_tools/chromedriver")
        );
    }
}
