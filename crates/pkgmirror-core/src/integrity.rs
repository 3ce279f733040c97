//! Artifact digests: SRI strings (`sha512-<base64>`) and legacy hex sha1 shasums.
//! Files are hashed in fixed-size chunks, never read whole into memory.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{MirrorError, Result};
use crate::metadata::VersionRecord;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha384" => Some(HashAlgorithm::Sha384),
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Raw digest of everything `reader` yields.
    pub fn digest_reader<R: Read>(&self, reader: R) -> std::io::Result<Vec<u8>> {
        match self {
            HashAlgorithm::Sha1 => chunked::<Sha1, R>(reader),
            HashAlgorithm::Sha256 => chunked::<Sha256, R>(reader),
            HashAlgorithm::Sha384 => chunked::<Sha384, R>(reader),
            HashAlgorithm::Sha512 => chunked::<Sha512, R>(reader),
        }
    }
}

fn chunked<D: Digest, R: Read>(reader: R) -> std::io::Result<Vec<u8>> {
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, reader);
    let mut hasher = D::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

/// The digest a registry declares for one artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpectedDigest {
    /// Subresource Integrity: algorithm plus base64 digest.
    Sri { algorithm: HashAlgorithm, hash: String },
    /// `dist.shasum`: lowercase hex sha1.
    Sha1Hex(String),
}

impl ExpectedDigest {
    /// Parse an SRI string. Multiple space-separated hashes: the strongest supported one wins.
    pub fn parse_sri(sri: &str) -> Option<Self> {
        sri.split_whitespace()
            .filter_map(|entry| {
                let (alg, hash) = entry.split_once('-')?;
                let algorithm = HashAlgorithm::from_name(alg)?;
                // Drop `?opts` suffixes.
                let hash = hash.split('?').next().unwrap_or(hash);
                (!hash.is_empty()).then(|| (algorithm, hash.to_string()))
            })
            .max_by_key(|(alg, _)| strength(*alg))
            .map(|(algorithm, hash)| ExpectedDigest::Sri { algorithm, hash })
    }

    /// Prefer `dist.integrity`, fall back to `dist.shasum`. None when the record declares neither.
    pub fn from_record(record: &VersionRecord) -> Option<Self> {
        record
            .integrity
            .as_deref()
            .and_then(Self::parse_sri)
            .or_else(|| {
                record
                    .shasum
                    .as_ref()
                    .map(|s| ExpectedDigest::Sha1Hex(s.trim().to_ascii_lowercase()))
            })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            ExpectedDigest::Sri { algorithm, .. } => *algorithm,
            ExpectedDigest::Sha1Hex(_) => HashAlgorithm::Sha1,
        }
    }

    /// Encode a raw digest the way this expectation is written.
    pub fn render(&self, raw: &[u8]) -> String {
        match self {
            ExpectedDigest::Sri { algorithm, .. } => format!("{}-{}", algorithm.name(), BASE64.encode(raw)),
            ExpectedDigest::Sha1Hex(_) => hex(raw),
        }
    }

    pub fn matches(&self, raw: &[u8]) -> bool {
        match self {
            ExpectedDigest::Sri { hash, .. } => BASE64.encode(raw) == *hash,
            ExpectedDigest::Sha1Hex(expected) => hex(raw) == *expected,
        }
    }
}

impl fmt::Display for ExpectedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedDigest::Sri { algorithm, hash } => write!(f, "{}-{}", algorithm.name(), hash),
            ExpectedDigest::Sha1Hex(hex) => f.write_str(hex),
        }
    }
}

fn strength(alg: HashAlgorithm) -> u8 {
    match alg {
        HashAlgorithm::Sha1 => 0,
        HashAlgorithm::Sha256 => 1,
        HashAlgorithm::Sha384 => 2,
        HashAlgorithm::Sha512 => 3,
    }
}

/// Outcome of checking a file against an expected digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub matched: bool,
    /// Digest of the file, rendered in the expectation's encoding.
    pub actual: String,
}

pub fn verify_file(path: &Path, expected: &ExpectedDigest) -> Result<Verification> {
    let file = File::open(path).map_err(|e| MirrorError::io("open for hashing", Some(path), e))?;
    let raw = expected
        .algorithm()
        .digest_reader(file)
        .map_err(|e| MirrorError::io("hash file", Some(path), e))?;
    Ok(Verification {
        matched: expected.matches(&raw),
        actual: expected.render(&raw),
    })
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn sha1_hex(content: &[u8]) -> String {
    hex(&Sha1::digest(content))
}

pub fn sri_sha512(content: &[u8]) -> String {
    format!("sha512-{}", BASE64.encode(Sha512::digest(content)))
}
