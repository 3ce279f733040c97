//! Core library for pkgmirror: dependency-closure crawler, content store, mirror layout,
//! and the re-serving layer. Used by the CLI binary.

pub mod config;
pub mod crawler;
pub mod error;
pub mod http_client;
pub mod integrity;
pub mod layout;
pub mod logging;
pub mod manifest;
pub mod metadata;
pub mod registry;
pub mod serve;
pub mod specifier;
pub mod store;
pub mod tools;
pub mod version;
pub mod writer;


// Re-export main API for CLI
pub use config::{effective_registry_url, load_config, Config};
pub use crawler::{CrawlOptions, CrawlReport, Crawler, ResolutionState, ResolveOutcome};
pub use error::{MirrorError, Result};
pub use http_client::{HttpClient, HttpSettings};
pub use manifest::{roots_from_package_json, with_npm_extras, NPM_EXTRAS};
pub use metadata::{RegistryMetadata, VersionRecord};
pub use registry::{HttpRegistry, RegistrySource, DEFAULT_REGISTRY};
pub use serve::{MirrorServer, ServeOptions};
pub use specifier::PackageSpecifier;
pub use store::{ContentStore, StoreResult};
pub use tools::{mirror_tool, ToolMirrorReport};
pub use version::{SemverResolver, VersionResolver};
pub use writer::MirrorWriter;
