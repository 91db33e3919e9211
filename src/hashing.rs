//! Tools for naming everything we care about with a unique [`ObjectId`]

use std::fmt;

use anyhow::{Context, Result, ensure};
use data_encoding::HEXLOWER;
use sha1::{Digest, Sha1, digest::Output};

type Sha1Digest = Output<Sha1>;

/// The hash (a SHA1) used to identify all objects in our system.
///
/// Twenty bytes on the wire; hex is only for logs and for parsing
/// textual references.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId {
    digest: Sha1Digest,
}

impl ObjectId {
    /// Calculates an ID from the given bytes
    pub fn hash(bytes: &[u8]) -> Self {
        Self {
            digest: Sha1::digest(bytes),
        }
    }

    fn from_digest(digest: Sha1Digest) -> Self {
        Self { digest }
    }

    /// The raw bytes, as they appear after the NUL in a tree entry.
    pub fn as_bytes(&self) -> &[u8] {
        self.digest.as_slice()
    }

    /// Reassembles an ID from its raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == <Sha1 as Digest>::output_size(),
            "Expected 20 hash bytes, got {}",
            bytes.len()
        );
        Ok(Self::from_digest(*Sha1Digest::from_slice(bytes)))
    }

    /// Gets a git-like shortened version of the hash that's unique enough
    /// for most UI uses.
    pub fn short_name(&self) -> String {
        let mut full = format!("{}", self);
        let _rest = full.split_off(8);
        full
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ digest: {} }}", HEXLOWER.encode(&self.digest))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.digest))
    }
}

impl std::str::FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER
            .decode(s.as_bytes())
            .with_context(|| format!("Couldn't decode {s} as hex"))?;

        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ABC: &[u8] = b"abc";

    // The FIPS-180 test vector; handy because everyone agrees on it.
    const EXPECTED: &[u8] = &hex_literal::hex!("a9993e364706816aba3e25717850c26c9cd0d89d");

    #[test]
    fn smoke() {
        let id = ObjectId::hash(ABC);
        assert_eq!(id.as_bytes(), EXPECTED);
    }

    #[test]
    fn hex_round_trip() -> Result<()> {
        let id = ObjectId::hash(ABC);
        let parsed: ObjectId = format!("{id}").parse()?;
        assert_eq!(id, parsed);
        assert_eq!(format!("{id}"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        Ok(())
    }

    #[test]
    fn short_names_are_short() {
        assert_eq!(ObjectId::hash(ABC).short_name(), "a9993e36");
    }

    #[test]
    fn rejects_wrong_lengths() {
        assert!(ObjectId::from_bytes(&[0u8; 19]).is_err());
        assert!("a9993e36".parse::<ObjectId>().is_err());
    }
}
