//! Error taxonomy for pkgmirror.
//! Every variant except `Io` is scoped to a single branch of a crawl; `Io` means the
//! mirror directory itself cannot be written and the run stops.

use std::fmt;

use serde::Serialize;

/// Main error type for mirror operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MirrorError {
    /// Specifier string could not be split into scope/name/range
    MalformedSpecifier { spec: String, reason: String },
    /// Registry did not return a usable metadata document for a name
    MetadataUnavailable {
        package: String,
        status: Option<u16>,
        source: String,
    },
    /// No published version satisfies the requested range
    NoMatchingVersion { package: String, range: String },
    /// Downloaded artifact does not hash to the declared digest
    DigestMismatch {
        package: String,
        url: String,
        expected: String,
        actual: String,
    },
    /// Creating a mirror directory failed
    DirectoryCreation { path: String, source: String },
    /// Network/HTTP errors outside metadata fetches (tarballs, tool index)
    Network {
        operation: String,
        url: String,
        status: Option<u16>,
        source: String,
    },
    /// Local storage errors
    Io {
        operation: String,
        path: Option<String>,
        source: String,
    },
    /// Configuration errors
    Config { field: Option<String>, source: String },
    /// Malformed documents (manifest, tool index, served metadata)
    Parse { what: String, source: String },
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Only local storage failures abort a run; everything else abandons one branch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MirrorError::Io { .. })
    }

    pub fn io(operation: &str, path: Option<&std::path::Path>, source: std::io::Error) -> Self {
        MirrorError::Io {
            operation: operation.to_string(),
            path: path.map(|p| p.display().to_string()),
            source: source.to_string(),
        }
    }

    pub fn network(operation: &str, url: &str, status: Option<u16>, source: impl Into<String>) -> Self {
        MirrorError::Network {
            operation: operation.to_string(),
            url: url.to_string(),
            status,
            source: source.into(),
        }
    }

    pub fn malformed(spec: &str, reason: &str) -> Self {
        MirrorError::MalformedSpecifier {
            spec: spec.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(what: &str, source: impl fmt::Display) -> Self {
        MirrorError::Parse {
            what: what.to_string(),
            source: source.to_string(),
        }
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::MalformedSpecifier { spec, reason } => {
                write!(f, "Malformed package specifier {:?}: {}", spec, reason)
            }
            MirrorError::MetadataUnavailable { package, status, source } => {
                write!(f, "Metadata unavailable for {}: {}", package, source)?;
                if let Some(status) = status {
                    write!(f, " (status: {})", status)?;
                }
                Ok(())
            }
            MirrorError::NoMatchingVersion { package, range } => {
                write!(f, "No version of {} satisfies {:?}", package, range)
            }
            MirrorError::DigestMismatch { package, url, expected, actual } => write!(
                f,
                "Package {} from {} downloaded by hash: {} doesn't match expected hash: {}",
                package, url, actual, expected
            ),
            MirrorError::DirectoryCreation { path, source } => {
                write!(f, "Could not create directory {}: {}", path, source)
            }
            MirrorError::Network { operation, url, status, source } => {
                write!(f, "Network error in {}: {} (url: {})", operation, source, url)?;
                if let Some(status) = status {
                    write!(f, " (status: {})", status)?;
                }
                Ok(())
            }
            MirrorError::Io { operation, path, source } => {
                write!(f, "I/O error in {}: {}", operation, source)?;
                if let Some(path) = path {
                    write!(f, " (path: {})", path)?;
                }
                Ok(())
            }
            MirrorError::Config { field, source } => {
                write!(f, "Configuration error: {}", source)?;
                if let Some(field) = field {
                    write!(f, " (field: {})", field)?;
                }
                Ok(())
            }
            MirrorError::Parse { what, source } => write!(f, "Could not parse {}: {}", what, source),
        }
    }
}

impl std::error::Error for MirrorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MirrorError::Io {
            operation: "write_metadata".to_string(),
            path: Some("/mirror/foo.json".to_string()),
            source: "Permission denied".to_string(),
        };

        let display = format!("{}", error);
        assert!(display.contains("write_metadata"));
        assert!(display.contains("Permission denied"));
        assert!(display.contains("/mirror/foo.json"));
    }

    #[test]
    fn test_only_io_is_fatal() {
        assert!(MirrorError::io("write", None, std::io::Error::other("disk full")).is_fatal());
        assert!(!MirrorError::malformed("@x", "no name").is_fatal());
        assert!(!MirrorError::MetadataUnavailable {
            package: "left-pad".into(),
            status: Some(404),
            source: "HTTP 404".into(),
        }
        .is_fatal());
        assert!(!MirrorError::DigestMismatch {
            package: "a".into(),
            url: "u".into(),
            expected: "x".into(),
            actual: "y".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let err = MirrorError::NoMatchingVersion {
            package: "foo".into(),
            range: "^9".into(),
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["kind"], "noMatchingVersion");
        assert_eq!(v["package"], "foo");
    }
}
