//! Content digests, manifest references and repository names

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

use crate::error::{RegistryError, RegistryResult};

const SHA256_HEX_LEN: usize = 64;

/// A SHA-256 content digest.
///
/// Displayed in canonical `sha256:<hex>` form. Parsing also accepts a bare
/// 64 character hex string, which is taken to be SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// The only supported algorithm.
    pub const ALGORITHM: &'static str = "sha256";

    /// Digest of a byte sequence.
    pub fn of(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    /// Finish an incremental hash.
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self {
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Parse `sha256:<hex>` or bare hex.
    pub fn parse(value: &str) -> RegistryResult<Self> {
        let hex = match value.split_once(':') {
            Some((Self::ALGORITHM, hex)) => hex,
            Some(_) => return Err(RegistryError::InvalidDigest(value.to_string())),
            None => value,
        };

        let valid = hex.len() == SHA256_HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(RegistryError::InvalidDigest(value.to_string()));
        }

        Ok(Self {
            hex: hex.to_string(),
        })
    }

    /// The lowercase hex encoding, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Self::ALGORITHM, self.hex)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

/// How a manifest is addressed: by a human tag or by its content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// A tag such as `1.0.0` or `latest`
    Tag(String),
    /// The digest of the manifest bytes
    Digest(Digest),
}

impl Reference {
    /// Parse a reference. Anything containing `:` must be a digest.
    pub fn parse(value: &str) -> RegistryResult<Self> {
        if value.contains(':') {
            return Digest::parse(value).map(Reference::Digest);
        }

        if is_valid_tag(value) {
            Ok(Reference::Tag(value.to_string()))
        } else {
            Err(RegistryError::InvalidReference(value.to_string()))
        }
    }

    /// The tag, if this reference is one.
    pub fn as_tag(&self) -> Option<&str> {
        match self {
            Reference::Tag(tag) => Some(tag.as_str()),
            Reference::Digest(_) => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => f.write_str(tag),
            Reference::Digest(digest) => write!(f, "{digest}"),
        }
    }
}

/// Tags follow `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
pub(crate) fn is_valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };

    tag.len() <= 128
        && (first.is_ascii_alphanumeric() || first == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Repository names are a single path segment of `[A-Za-z0-9._-]`, starting
/// with an alphanumeric character.
pub(crate) fn validate_repository(name: &str) -> RegistryResult<()> {
    let starts_alnum = name
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric());
    let allowed = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if !starts_alnum || !allowed || name.contains("..") || name.len() > 255 {
        return Err(RegistryError::InvalidRepository(name.to_string()));
    }
    Ok(())
}
