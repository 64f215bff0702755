//! Digest index backed by an open-addressed hash table file.
//!
//! The file is a flat array of fixed-width slots:
//!
//! ```text
//! ┌─────────┬──────┬──────────────────────────────────┐
//! │ Offset  │ Size │ Content                          │
//! ├─────────┼──────┼──────────────────────────────────┤
//! │ 0       │ 32   │ Record key: SHA-256 of the       │
//! │         │      │ digest's structural identity     │
//! │ 32      │ 8    │ Blob offset in cursor space (LE) │
//! │ 40      │ 8    │ Blob length (LE)                 │
//! │ 48      │ 4    │ CRC32 of bytes 0..48             │
//! │ 52      │ 12   │ Zero padding                     │
//! └─────────┴──────┴──────────────────────────────────┘
//! ```
//!
//! A slot whose CRC does not match reads as empty, so a torn write can lose
//! an entry but can never resolve a digest to bytes that were stored for a
//! different one. Entries are never eagerly evicted: lookups are filtered
//! through the cursor liveness predicate, and retired slots are reused by
//! later inserts.

use crate::BlobError;
use common::Digest;
use sha2::{Digest as _, Sha256};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::{Cursors, OffsetStore};

const KEY_SIZE: usize = 32;
const RECORD_SIZE: usize = 64;
const CRC_RANGE: usize = 48;
const SLOT_COUNT: u64 = 1 << 16;
/// Linear probe window. A digest lives in one of these slots or not at all.
const MAX_PROBES: u64 = 8;

struct Record {
    key: [u8; KEY_SIZE],
    offset: u64,
    length: u64,
}

impl Record {
    fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[..KEY_SIZE].copy_from_slice(&self.key);
        buf[32..40].copy_from_slice(&self.offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.length.to_le_bytes());
        let crc = crc32fast::hash(&buf[..CRC_RANGE]);
        buf[48..52].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Option<Record> {
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&buf[48..52]);
        if u32::from_le_bytes(crc_bytes) != crc32fast::hash(&buf[..CRC_RANGE]) {
            return None;
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&buf[..KEY_SIZE]);
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[32..40]);
        let offset = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[40..48]);
        let length = u64::from_le_bytes(word);
        Some(Record {
            key,
            offset,
            length,
        })
    }
}

/// Persistent digest index over the table file described in the module
/// docs. Restart keeps the table; a caller that cannot trust the table any
/// more (cold start) opens it with `reset`.
#[derive(Debug)]
pub struct FileOffsetStore {
    file: File,
}

impl FileOffsetStore {
    pub fn open(path: &Path, reset: bool) -> Result<Self, BlobError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if reset {
            file.set_len(0)?;
        }
        file.set_len(SLOT_COUNT * RECORD_SIZE as u64)?;
        Ok(FileOffsetStore { file })
    }

    fn record_key(digest: &Digest) -> [u8; KEY_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(digest.instance().as_bytes());
        hasher.update([0]);
        hasher.update(digest.hash().as_bytes());
        hasher.update([0]);
        hasher.update(digest.size_bytes().to_le_bytes());
        hasher.finalize().into()
    }

    fn slot_of(key: &[u8; KEY_SIZE], attempt: u64) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&key[..8]);
        u64::from_le_bytes(word).wrapping_add(attempt) % SLOT_COUNT
    }

    fn read_slot(&self, slot: u64) -> io::Result<Option<Record>> {
        let mut buf = [0u8; RECORD_SIZE];
        self.file
            .read_exact_at(&mut buf, slot * RECORD_SIZE as u64)?;
        Ok(Record::from_bytes(&buf))
    }

    fn write_slot(&self, slot: u64, record: &Record) -> io::Result<()> {
        self.file
            .write_all_at(&record.to_bytes(), slot * RECORD_SIZE as u64)
    }
}

impl OffsetStore for FileOffsetStore {
    fn get(
        &self,
        digest: &Digest,
        cursors: Cursors,
    ) -> Result<Option<(u64, u64)>, BlobError> {
        let key = Self::record_key(digest);
        for attempt in 0..MAX_PROBES {
            if let Some(record) = self.read_slot(Self::slot_of(&key, attempt))? {
                if record.key == key {
                    return Ok(cursors
                        .contains(record.offset, record.length)
                        .then_some((record.offset, record.length)));
                }
            }
        }
        Ok(None)
    }

    fn put(
        &mut self,
        digest: &Digest,
        offset: u64,
        length: u64,
        cursors: Cursors,
    ) -> Result<(), BlobError> {
        let key = Self::record_key(digest);
        let record = Record {
            key,
            offset,
            length,
        };
        // Prefer a slot holding the same digest, then an empty or retired
        // one. With the window full of live entries, the oldest loses; the
        // index is allowed to be lossy, never to lie.
        let mut victim_slot = Self::slot_of(&key, 0);
        let mut victim_offset = u64::MAX;
        for attempt in 0..MAX_PROBES {
            let slot = Self::slot_of(&key, attempt);
            match self.read_slot(slot)? {
                None => {
                    self.write_slot(slot, &record)?;
                    return Ok(());
                }
                Some(existing)
                    if existing.key == key
                        || !cursors.contains(existing.offset, existing.length) =>
                {
                    self.write_slot(slot, &record)?;
                    return Ok(());
                }
                Some(existing) => {
                    if existing.offset < victim_offset {
                        victim_offset = existing.offset;
                        victim_slot = slot;
                    }
                }
            }
        }
        self.write_slot(victim_slot, &record)?;
        Ok(())
    }
}
