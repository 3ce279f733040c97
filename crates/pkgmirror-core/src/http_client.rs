//! Blocking HTTP client: one ureq Agent for connection reuse, per-request timeout,
//! retry with exponential backoff on 5xx/429 and transport errors.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::{MirrorError, Result};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_COUNT: usize = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 5_000;
const MAX_IDLE_CONNECTIONS: usize = 16;
const COPY_BUFFER_BYTES: usize = 64 * 1024;
const USER_AGENT: &str = concat!("pkgmirror/", env!("CARGO_PKG_VERSION"));

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub retries: usize,
    pub backoff: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRY_COUNT,
            backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl HttpSettings {
    /// Defaults overridden by `PKGMIRROR_HTTP_TIMEOUT_MS`, `PKGMIRROR_HTTP_RETRIES`,
    /// `PKGMIRROR_HTTP_RETRY_BACKOFF_MS`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply whichever of the env knobs are set on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        Self {
            timeout: Duration::from_millis(env_or(
                "PKGMIRROR_HTTP_TIMEOUT_MS",
                self.timeout.as_millis() as u64,
            )),
            retries: env_or("PKGMIRROR_HTTP_RETRIES", self.retries),
            backoff: Duration::from_millis(env_or(
                "PKGMIRROR_HTTP_RETRY_BACKOFF_MS",
                self.backoff.as_millis() as u64,
            )),
        }
    }
}

/// Failure of a single GET after retries.
#[derive(Debug)]
pub struct HttpFailure {
    pub status: Option<u16>,
    pub message: String,
}

pub struct HttpClient {
    agent: ureq::Agent,
    settings: HttpSettings,
}

impl HttpClient {
    pub fn new(settings: HttpSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .max_idle_connections(MAX_IDLE_CONNECTIONS)
            .user_agent(USER_AGENT)
            .build();
        Self { agent, settings }
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// GET url and return the body bytes.
    pub fn get_bytes(&self, url: &str) -> std::result::Result<Vec<u8>, HttpFailure> {
        let resp = self.send_with_retry(|| self.agent.get(url).call())?;
        let mut buf = Vec::new();
        resp.into_reader()
            .read_to_end(&mut buf)
            .map_err(|e| HttpFailure {
                status: None,
                message: e.to_string(),
            })?;
        Ok(buf)
    }

    /// GET url and stream the body into `dest`.
    pub fn get_to_file(&self, url: &str, dest: &Path) -> Result<()> {
        let resp = self
            .send_with_retry(|| self.agent.get(url).call())
            .map_err(|f| MirrorError::network("download", url, f.status, f.message))?;
        let mut out = File::create(dest).map_err(|e| MirrorError::io("create file", Some(dest), e))?;
        copy_body(&mut resp.into_reader(), &mut out, url, dest)?;
        out.flush()
            .map_err(|e| MirrorError::io("flush file", Some(dest), e))?;
        Ok(())
    }

    fn send_with_retry<F>(&self, mut send: F) -> std::result::Result<ureq::Response, HttpFailure>
    where
        F: FnMut() -> std::result::Result<ureq::Response, ureq::Error>,
    {
        let retries = self.settings.retries;
        let mut attempt = 0usize;
        let mut backoff = self.settings.backoff.as_millis() as u64;
        loop {
            attempt += 1;
            let (status, message) = match send() {
                Ok(resp) if (200..300).contains(&resp.status()) => return Ok(resp),
                Ok(resp) => (Some(resp.status()), format!("HTTP {}", resp.status())),
                Err(ureq::Error::Status(code, _)) => (Some(code), format!("HTTP {}", code)),
                Err(e) => (None, e.to_string()),
            };
            let retryable = match status {
                Some(code) => code >= 500 || code == 429,
                None => true,
            };
            if attempt <= retries && retryable {
                std::thread::sleep(Duration::from_millis(backoff));
                backoff = backoff.saturating_mul(2).min(MAX_BACKOFF_MS);
                continue;
            }
            return Err(HttpFailure { status, message });
        }
    }
}

/// Stream `reader` into `out`. A failed read is a network error for `url`; a failed write
/// is a local storage error for `dest`, which stops the run.
fn copy_body<R: Read, W: Write>(reader: &mut R, out: &mut W, url: &str, dest: &Path) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_BYTES];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(MirrorError::network("download", url, None, e.to_string())),
        };
        out.write_all(&buf[..n])
            .map_err(|e| MirrorError::io("write download", Some(dest), e))?;
        total += n as u64;
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(HttpSettings::from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = HttpSettings::default();
        assert_eq!(s.timeout, Duration::from_secs(30));
        assert_eq!(s.retries, 2);
        assert_eq!(s.backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or("PKGMIRROR_TEST_UNSET_KNOB", 7usize), 7);
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("No space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct DroppedConnection;

    impl Read for DroppedConnection {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::ConnectionReset, "connection reset"))
        }
    }

    #[test]
    fn test_copy_body_write_failure_is_fatal_io() {
        let dest = Path::new("/m/tgz/.foo-1.0.0.tgz.part");
        let err = copy_body(&mut &b"tarball bytes"[..], &mut FullDisk, "http://r/foo.tgz", dest).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, MirrorError::Io { ref operation, .. } if operation == "write download"));
    }

    #[test]
    fn test_copy_body_read_failure_is_network() {
        let mut out = Vec::new();
        let err = copy_body(&mut DroppedConnection, &mut out, "http://r/foo.tgz", Path::new("x")).unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, MirrorError::Network { .. }));
    }

    #[test]
    fn test_copy_body_copies_everything() {
        let body = vec![7u8; COPY_BUFFER_BYTES * 2 + 5];
        let mut out = Vec::new();
        let n = copy_body(&mut body.as_slice(), &mut out, "http://r/foo.tgz", Path::new("x")).unwrap();
        assert_eq!(n, body.len() as u64);
        assert_eq!(out, body);
    }
}
