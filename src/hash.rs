//! Segment fingerprinting
//!
//! A segment is identified by its digest. Several hash families are
//! supported, plus an identity mode where the digest is the segment itself
//! (only sensible for small segment sizes).

use crate::error::Error;
use md5::{Digest as _, Md5};
use ring::digest as ring_digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hash family used to fingerprint segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Identity: the digest is the segment's own bytes
    None,
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    /// All supported families
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::None,
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
        HashAlgorithm::Blake3,
    ];

    /// Compute the digest of a segment
    pub fn digest(&self, bytes: &[u8]) -> Digest {
        let raw = match self {
            HashAlgorithm::None => bytes.to_vec(),
            HashAlgorithm::Md5 => Md5::digest(bytes).to_vec(),
            HashAlgorithm::Sha1 => {
                ring_digest::digest(&ring_digest::SHA1_FOR_LEGACY_USE_ONLY, bytes)
                    .as_ref()
                    .to_vec()
            }
            HashAlgorithm::Sha256 => ring_digest::digest(&ring_digest::SHA256, bytes)
                .as_ref()
                .to_vec(),
            HashAlgorithm::Sha512 => ring_digest::digest(&ring_digest::SHA512, bytes)
                .as_ref()
                .to_vec(),
            HashAlgorithm::Blake3 => blake3::hash(bytes).as_bytes().to_vec(),
        };
        Digest(raw)
    }

    /// Digest width in bytes, or `None` when it depends on the input
    pub fn width(&self) -> Option<usize> {
        match self {
            HashAlgorithm::None => None,
            HashAlgorithm::Md5 => Some(16),
            HashAlgorithm::Sha1 => Some(20),
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => Some(32),
            HashAlgorithm::Sha512 => Some(64),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::None => "none",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Md5
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "identity" => Ok(HashAlgorithm::None),
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(Error::InvalidConfig(format!(
                "Unknown hash family '{}'",
                other
            ))),
        }
    }
}

/// Fingerprint of a segment's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(Vec<u8>);

impl Digest {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Digest(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
