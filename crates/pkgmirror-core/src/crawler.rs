//! Dependency-closure crawler.
//!
//! Walks the dependency graph depth-first from a set of root specifiers, resolving every
//! (name, version) pair at most once per run. The memo table lives in a `ResolutionState`
//! owned by the caller, so independent crawls never share state. Traversal uses an
//! explicit work stack; deep graphs do not grow the call stack.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::error::{MirrorError, Result};
use crate::integrity::ExpectedDigest;
use crate::logging;
use crate::metadata::RegistryMetadata;
use crate::registry::RegistrySource;
use crate::specifier::PackageSpecifier;
use crate::store::StoreResult;
use crate::version::{SemverResolver, VersionResolver};
use crate::writer::MirrorWriter;

/// Politeness delay between finished nodes.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct CrawlOptions {
    pub delay: Duration,
    /// Stop taking new work after this instant. Already persisted files stay.
    pub deadline: Option<Instant>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            deadline: None,
        }
    }
}

pub struct PackageResolution {
    pub metadata: RegistryMetadata,
    pub resolved_versions: IndexSet<String>,
}

/// Memo table for one crawl run.
#[derive(Default)]
pub struct ResolutionState {
    packages: IndexMap<String, PackageResolution>,
    failed_metadata: HashMap<String, MirrorError>,
}

impl ResolutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PackageResolution> {
        self.packages.get(name)
    }

    pub fn is_resolved(&self, name: &str, version: &str) -> bool {
        self.packages
            .get(name)
            .is_some_and(|p| p.resolved_versions.contains(version))
    }

    /// Distinct (name, version) pairs processed so far.
    pub fn resolved_count(&self) -> usize {
        self.packages.values().map(|p| p.resolved_versions.len()).sum()
    }

    pub fn packages(&self) -> impl Iterator<Item = (&String, &PackageResolution)> {
        self.packages.iter()
    }
}

#[derive(Debug)]
pub struct FetchedNode {
    pub name: String,
    pub version: String,
    pub tarball_url: String,
    pub expected_digest: Option<String>,
    /// Tarball outcome. A failed download does not stop recursion into dependencies.
    pub artifact: std::result::Result<StoreResult, MirrorError>,
    /// Child specifiers: dependencies first, then optional dependencies.
    pub children: Vec<String>,
}

/// Result of one resolution step.
#[derive(Debug)]
pub enum ResolveOutcome {
    Fetched(FetchedNode),
    AlreadySatisfied { name: String, version: String },
    Failed(MirrorError),
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub path: Option<String>,
    pub downloaded: bool,
    pub digest_matched: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FailedSpec {
    pub spec: String,
    pub error: MirrorError,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub resolved: Vec<ResolvedPackage>,
    pub downloaded: usize,
    pub cache_hits: usize,
    pub already_satisfied: usize,
    pub digest_mismatches: Vec<MirrorError>,
    /// `name@version` entries whose registry record declared no digest.
    pub unverified: Vec<String>,
    pub failures: Vec<FailedSpec>,
    /// Specifiers left on the work stack when the deadline passed.
    pub abandoned: Vec<String>,
}

impl CrawlReport {
    pub fn total(&self) -> usize {
        self.resolved.len()
    }

    pub fn merge(&mut self, other: CrawlReport) {
        self.resolved.extend(other.resolved);
        self.downloaded += other.downloaded;
        self.cache_hits += other.cache_hits;
        self.already_satisfied += other.already_satisfied;
        self.digest_mismatches.extend(other.digest_mismatches);
        self.unverified.extend(other.unverified);
        self.failures.extend(other.failures);
        self.abandoned.extend(other.abandoned);
    }
}

pub struct Crawler<'a, S: RegistrySource + ?Sized, R: VersionResolver = SemverResolver> {
    source: &'a S,
    writer: &'a MirrorWriter,
    resolver: R,
    options: CrawlOptions,
}

impl<'a, S: RegistrySource + ?Sized> Crawler<'a, S, SemverResolver> {
    pub fn new(source: &'a S, writer: &'a MirrorWriter, options: CrawlOptions) -> Self {
        Self::with_resolver(source, writer, SemverResolver, options)
    }
}

impl<'a, S: RegistrySource + ?Sized, R: VersionResolver> Crawler<'a, S, R> {
    pub fn with_resolver(source: &'a S, writer: &'a MirrorWriter, resolver: R, options: CrawlOptions) -> Self {
        Self {
            source,
            writer,
            resolver,
            options,
        }
    }

    /// Mirror the closure of `roots`. Only local storage failures return `Err`; everything
    /// else is logged and recorded in the report.
    pub fn crawl(&self, roots: &[String], state: &mut ResolutionState) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let mut stack: Vec<String> = roots.iter().rev().cloned().collect();

        while let Some(spec) = stack.pop() {
            if self.options.deadline.is_some_and(|d| Instant::now() >= d) {
                stack.push(spec);
                stack.reverse();
                logging::warn(&format!(
                    "Deadline reached, abandoning {} unvisited specifiers",
                    stack.len()
                ));
                report.abandoned = stack;
                break;
            }

            logging::info(&format!("Processing {}", spec));
            match self.resolve(&spec, state)? {
                ResolveOutcome::Fetched(node) => {
                    self.record(&mut report, &node);
                    logging::debug(&format!("Processing dependencies: {}", node.name));
                    stack.extend(node.children.into_iter().rev());
                    std::thread::sleep(self.options.delay);
                }
                ResolveOutcome::AlreadySatisfied { name, version } => {
                    logging::debug(&format!(
                        "Package version already required - package: {}, version {}",
                        name, version
                    ));
                    report.already_satisfied += 1;
                }
                ResolveOutcome::Failed(error) => {
                    logging::warn(&format!("Skipping {}: {}", spec, error));
                    report.failures.push(FailedSpec { spec, error });
                }
            }
        }

        logging::info(&format!("Downloaded {} packages total.", state.resolved_count()));
        Ok(report)
    }

    /// One resolution step for `spec`: metadata, version choice, memo check, artifact.
    pub fn resolve(&self, spec: &str, state: &mut ResolutionState) -> Result<ResolveOutcome> {
        let parsed = match PackageSpecifier::parse(spec) {
            Ok(p) => p,
            Err(e) => return Ok(ResolveOutcome::Failed(e)),
        };
        let name = parsed.name.clone();

        if let Some(err) = state.failed_metadata.get(&name) {
            return Ok(ResolveOutcome::Failed(err.clone()));
        }
        if !state.packages.contains_key(&name) {
            match self.source.fetch_metadata(&name) {
                Ok(metadata) => {
                    state.packages.insert(
                        name.clone(),
                        PackageResolution {
                            metadata,
                            resolved_versions: IndexSet::new(),
                        },
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    logging::error(&format!("Failed to download package info for: {}", name));
                    state.failed_metadata.insert(name, e.clone());
                    return Ok(ResolveOutcome::Failed(e));
                }
            }
        }
        let Some(package) = state.packages.get_mut(&name) else {
            return Ok(ResolveOutcome::Failed(MirrorError::MetadataUnavailable {
                package: name,
                status: None,
                source: "metadata missing from resolution state".to_string(),
            }));
        };

        let Some(version) = self.choose_version(&package.metadata, parsed.version_range.as_deref()) else {
            return Ok(ResolveOutcome::Failed(MirrorError::NoMatchingVersion {
                package: name,
                range: parsed
                    .version_range
                    .unwrap_or_else(|| package.metadata.latest_tag.clone()),
            }));
        };

        if package.resolved_versions.contains(&version) {
            return Ok(ResolveOutcome::AlreadySatisfied { name, version });
        }
        package.resolved_versions.insert(version.clone());
        let first_version = package.resolved_versions.len() == 1;
        let metadata = &package.metadata;

        if first_version {
            match self.writer.write_metadata(metadata) {
                Ok(path) => logging::debug(&format!("Wrote {}", path.display())),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => logging::warn(&e.to_string()),
            }
        }

        let Some(record) = metadata.record(&version) else {
            return Ok(ResolveOutcome::Failed(MirrorError::NoMatchingVersion {
                package: name,
                range: version,
            }));
        };

        let artifact = match self.writer.write_tarball(self.source, &name, record) {
            Err(e) if e.is_fatal() => return Err(e),
            other => other,
        };
        match &artifact {
            Ok(stored) if stored.downloaded => logging::info(&format!(
                "Getting package: {} version: {} (latest: {}) at: {}",
                name, version, metadata.latest_tag, record.tarball_url
            )),
            Ok(_) => logging::info(&format!(
                "Locally cached package: {} version: {} (latest: {}) at: {}",
                name, version, metadata.latest_tag, record.tarball_url
            )),
            Err(e) => logging::warn(&format!("Could not store {}@{}: {}", name, version, e)),
        }

        let children = record
            .dependencies
            .iter()
            .chain(record.optional_dependencies.iter())
            .map(|(dep, range)| child_spec(dep, range))
            .collect();

        Ok(ResolveOutcome::Fetched(FetchedNode {
            name,
            version,
            tarball_url: record.tarball_url.clone(),
            expected_digest: ExpectedDigest::from_record(record).map(|d| d.to_string()),
            artifact,
            children,
        }))
    }

    /// Pick the version for `range` (None means latest). Versions up to `latest` are tried
    /// first; the full set only when nothing there matches.
    fn choose_version(&self, metadata: &RegistryMetadata, range: Option<&str>) -> Option<String> {
        let range = match range {
            None => {
                logging::debug(&format!("Version not specified, using latest ({})", metadata.latest_tag));
                metadata.latest_tag.as_str()
            }
            Some(r) => metadata.tag(r.trim()).unwrap_or(r),
        };

        logging::debug(&format!(
            "Finding version ({}) up to latest({})",
            range, metadata.latest_tag
        ));
        self.resolver
            .max_satisfying(&metadata.versions_up_to_latest(), range)
            .or_else(|| {
                logging::debug(&format!(
                    "Version ({}) not found up to latest({}), trying all.",
                    range, metadata.latest_tag
                ));
                self.resolver.max_satisfying(&metadata.version_strings(), range)
            })
            .filter(|v| metadata.versions.contains_key(v))
    }

    fn record(&self, report: &mut CrawlReport, node: &FetchedNode) {
        let mut entry = ResolvedPackage {
            name: node.name.clone(),
            version: node.version.clone(),
            path: None,
            downloaded: false,
            digest_matched: None,
        };
        match &node.artifact {
            Ok(stored) => {
                entry.path = Some(stored.path.display().to_string());
                entry.downloaded = stored.downloaded;
                entry.digest_matched = stored.digest_matched;
                if stored.downloaded {
                    report.downloaded += 1;
                } else {
                    report.cache_hits += 1;
                }
                if stored.is_mismatch() {
                    let mismatch = MirrorError::DigestMismatch {
                        package: node.name.clone(),
                        url: node.tarball_url.clone(),
                        expected: node.expected_digest.clone().unwrap_or_default(),
                        actual: stored.actual_digest.clone().unwrap_or_default(),
                    };
                    logging::warn(&mismatch.to_string());
                    report.digest_mismatches.push(mismatch);
                } else if stored.downloaded && stored.digest_matched.is_none() {
                    report.unverified.push(format!("{}@{}", node.name, node.version));
                }
            }
            Err(e) => report.failures.push(FailedSpec {
                spec: format!("{}@{}", node.name, node.version),
                error: e.clone(),
            }),
        }
        report.resolved.push(entry);
    }
}

/// `dep@range`, following npm aliases (`npm:real-name@^1`) to the real package.
fn child_spec(dependency: &str, range: &str) -> String {
    let range = range.trim();
    match range.strip_prefix("npm:") {
        Some(target) => target.to_string(),
        None => format!("{}@{}", dependency, range),
    }
}
