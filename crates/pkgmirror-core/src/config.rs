//! Optional config from .pkgmirrorrc or ~/.pkgmirrorrc (JSON). Merged with env and CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::http_client::HttpSettings;
use crate::registry::DEFAULT_REGISTRY;

pub const RC_FILE: &str = ".pkgmirrorrc";

/// Optional config from file. CLI and env override these.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub registry: Option<String>,
    pub delay_ms: Option<u64>,
    pub verify_cached: Option<bool>,
    pub tool_index_url: Option<String>,
    pub log_file: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
}

impl Config {
    fn from_value(v: &Value) -> Self {
        let string = |key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            registry: string("registry").map(|r| r.trim_end_matches('/').to_string()),
            delay_ms: v.get("delayMs").and_then(Value::as_u64),
            verify_cached: v.get("verifyCached").and_then(Value::as_bool),
            tool_index_url: string("toolIndexUrl"),
            log_file: string("logFile").map(PathBuf::from),
            timeout_ms: v.get("timeoutMs").and_then(Value::as_u64),
            retries: v
                .get("retries")
                .and_then(Value::as_u64)
                .map(|n| n as usize),
        }
    }

    /// File values on top of defaults, then env knobs on top of those.
    pub fn http_settings(&self) -> HttpSettings {
        let mut settings = HttpSettings::default();
        if let Some(ms) = self.timeout_ms {
            settings.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.retries {
            settings.retries = n;
        }
        settings.with_env_overrides()
    }
}

/// Load config from .pkgmirrorrc in dir, then ~/.pkgmirrorrc. First file found wins;
/// a missing or invalid file yields defaults.
pub fn load_config(dir: &Path) -> Config {
    let mut candidates = vec![dir.join(RC_FILE)];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(RC_FILE));
    }
    for path in &candidates {
        if path.is_file() {
            return std::fs::read_to_string(path)
                .ok()
                .and_then(|s| serde_json::from_str::<Value>(&s).ok())
                .map(|v| Config::from_value(&v))
                .unwrap_or_default();
        }
    }
    Config::default()
}

/// `registry=` from an .npmrc, if present. `${VAR}` values are expanded from the environment.
pub fn npmrc_registry(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        if k.trim() != "registry" {
            continue;
        }
        let mut value = v.trim().to_string();
        if value.starts_with("${") && value.ends_with('}') && value.len() > 3 {
            if let Ok(env_val) = std::env::var(&value[2..value.len() - 1]) {
                value = env_val;
            }
        }
        if !value.is_empty() {
            return Some(value.trim_end_matches('/').to_string());
        }
    }
    None
}

fn env_registry() -> Option<String> {
    ["PKGMIRROR_REGISTRY", "NPM_CONFIG_REGISTRY"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .find(|v| !v.is_empty())
}

/// Registry URL precedence: env, CLI flag, .pkgmirrorrc, .npmrc (project, then home), default.
pub fn effective_registry_url(dir: &Path, cli: Option<&str>, config: &Config) -> String {
    if let Some(url) = env_registry() {
        return url;
    }
    if let Some(url) = cli.map(str::trim).filter(|s| !s.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    if let Some(url) = &config.registry {
        return url.clone();
    }
    let mut npmrcs = vec![dir.join(".npmrc")];
    if let Some(home) = dirs::home_dir() {
        npmrcs.push(home.join(".npmrc"));
    }
    npmrcs
        .iter()
        .find_map(|p| npmrc_registry(p))
        .unwrap_or_else(|| DEFAULT_REGISTRY.to_string())
}
