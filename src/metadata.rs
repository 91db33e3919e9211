//! Per-node metadata, read back from the `.bupm` stream each saved
//! directory embeds.
//!
//! The stream is a sequence of length-prefixed CBOR records. The first
//! record describes the directory itself; the rest describe its
//! non-directory children (plain subdirectories carry their metadata in
//! their own trees). Readers skip fields they don't recognize, so newer
//! writers can add fields without breaking older readers.

use std::io::{self, Read, Write};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

use crate::counters;

// man inode
const IFMT: u32 = 0o170000;

pub fn is_dir(mode: u32) -> bool {
    mode & IFMT == 0o040000
}

pub fn is_symlink(mode: u32) -> bool {
    mode & IFMT == 0o120000
}

pub fn is_file(mode: u32) -> bool {
    mode & IFMT == 0o100000
}

/// Backup-relevant metadata for one node, as recorded at save time.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub mode: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "epoch", with = "chrono::serde::ts_nanoseconds")]
    pub atime: DateTime<Utc>,
    #[serde(default = "epoch", with = "chrono::serde::ts_nanoseconds")]
    pub mtime: DateTime<Utc>,
    #[serde(default = "epoch", with = "chrono::serde::ts_nanoseconds")]
    pub ctime: DateTime<Utc>,
    #[serde(default)]
    pub symlink_target: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl Metadata {
    /// A record carrying only a mode - what callers synthesize when a
    /// tree has no metadata stream.
    pub fn from_mode(mode: u32) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            user: None,
            group: None,
            atime: epoch(),
            mtime: epoch(),
            ctime: epoch(),
            symlink_target: None,
            size: None,
        }
    }

    /// Read the next record from the stream, or `None` at a clean end.
    pub fn read_from(r: &mut impl Read) -> Result<Option<Self>> {
        let Some(len) = read_record_len(r)? else {
            return Ok(None);
        };
        let mut record = r.take(u64::from(len));
        let meta =
            ciborium::from_reader(&mut record).context("CBOR decoding of metadata record failed")?;
        // A newer writer may have appended fields we don't know;
        // stay aligned with the next length prefix.
        io::copy(&mut record, &mut io::sink())?;
        counters::META_RECORDS_READ.bump();
        Ok(Some(meta))
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        let mut record = Vec::new();
        ciborium::into_writer(self, &mut record)?;
        w.write_all(&u32::try_from(record.len())?.to_le_bytes())?;
        w.write_all(&record)?;
        Ok(())
    }
}

fn read_record_len(r: &mut impl Read) -> Result<Option<u32>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let count = r.read(&mut len_bytes[filled..])?;
        if count == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!("Truncated metadata record length");
        }
        filled += count;
    }
    Ok(Some(u32::from_le_bytes(len_bytes)))
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::TimeZone;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn sample() -> Metadata {
        Metadata {
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            user: Some("ahab".to_owned()),
            group: Some("crew".to_owned()),
            atime: Utc.timestamp_opt(100_000, 0).unwrap(),
            mtime: Utc.timestamp_opt(100_000, 0).unwrap(),
            ctime: Utc.timestamp_opt(100_000, 0).unwrap(),
            symlink_target: None,
            size: Some(7),
        }
    }

    #[test]
    fn round_trip() -> Result<()> {
        init();

        let mut stream = Vec::new();
        sample().write_to(&mut stream)?;
        Metadata::from_mode(0o120755).write_to(&mut stream)?;

        let mut r = stream.as_slice();
        assert_eq!(Metadata::read_from(&mut r)?, Some(sample()));
        assert_eq!(Metadata::read_from(&mut r)?, Some(Metadata::from_mode(0o120755)));
        assert_eq!(Metadata::read_from(&mut r)?, None);
        Ok(())
    }

    #[test]
    fn tolerates_unknown_fields() -> Result<()> {
        init();

        // A "newer" record with a field we don't know about.
        #[derive(Serialize)]
        struct FutureMetadata {
            mode: u32,
            size: Option<u64>,
            birth_time: i64,
        }

        let future = FutureMetadata {
            mode: 0o100644,
            size: Some(42),
            birth_time: 12345,
        };
        let mut record = Vec::new();
        ciborium::into_writer(&future, &mut record)?;
        let mut stream = Vec::new();
        stream.extend_from_slice(&(record.len() as u32).to_le_bytes());
        stream.extend_from_slice(&record);

        let read = Metadata::read_from(&mut stream.as_slice())?.unwrap();
        assert_eq!(read.mode, 0o100644);
        assert_eq!(read.size, Some(42));
        assert_eq!(read.uid, 0);
        Ok(())
    }

    #[test]
    fn truncated_length_is_an_error() {
        init();

        let mut r: &[u8] = &[1, 2];
        assert!(Metadata::read_from(&mut r).is_err());
    }

    #[test]
    fn mode_classification() {
        assert!(is_dir(0o040755));
        assert!(is_symlink(0o120777));
        assert!(is_file(0o100644));
        assert!(is_file(0o100755));
        assert!(!is_dir(0o100644));
        assert!(!is_symlink(0o040755));
    }
}
