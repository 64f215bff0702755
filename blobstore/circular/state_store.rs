//! Cursor state persisted through a pair of checksummed slots.
//!
//! ```text
//! ┌─────────┬──────┬───────────────────────────┐
//! │ Offset  │ Size │ Content                   │
//! ├─────────┼──────┼───────────────────────────┤
//! │ 0       │ 8    │ Magic: "RINGSTAT"         │
//! │ 8       │ 4    │ Format version (LE)       │
//! │ 12      │ 8    │ Epoch (LE)                │
//! │ 20      │ 8    │ Data capacity (LE)        │
//! │ 28      │ 8    │ Read cursor (LE)          │
//! │ 36      │ 8    │ Write cursor (LE)         │
//! │ 44      │ 4    │ CRC32 of bytes 0..44      │
//! │ 48      │ 16   │ Zero padding              │
//! └─────────┴──────┴───────────────────────────┘
//! ```
//!
//! Updates alternate between the two slots with an increasing epoch;
//! recovery takes the valid slot with the highest epoch. A crash between
//! the two therefore lands on a complete earlier pair, which can only
//! shrink the live region, never widen it.

use crate::BlobError;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::{Cursors, StateStore};

const STATE_MAGIC: [u8; 8] = *b"RINGSTAT";
const STATE_VERSION: u32 = 1;
const SLOT_SIZE: usize = 64;
const SLOT_COUNT: usize = 2;
const CRC_RANGE: usize = 44;

struct StateRecord {
    epoch: u64,
    capacity: u64,
    cursors: Cursors,
}

impl StateRecord {
    fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        buf[..8].copy_from_slice(&STATE_MAGIC);
        buf[8..12].copy_from_slice(&STATE_VERSION.to_le_bytes());
        buf[12..20].copy_from_slice(&self.epoch.to_le_bytes());
        buf[20..28].copy_from_slice(&self.capacity.to_le_bytes());
        buf[28..36].copy_from_slice(&self.cursors.read.to_le_bytes());
        buf[36..44].copy_from_slice(&self.cursors.write.to_le_bytes());
        let crc = crc32fast::hash(&buf[..CRC_RANGE]);
        buf[44..48].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; SLOT_SIZE]) -> Option<StateRecord> {
        if buf[..8] != STATE_MAGIC {
            return None;
        }
        let mut word4 = [0u8; 4];
        word4.copy_from_slice(&buf[8..12]);
        if u32::from_le_bytes(word4) != STATE_VERSION {
            return None;
        }
        word4.copy_from_slice(&buf[44..48]);
        if u32::from_le_bytes(word4) != crc32fast::hash(&buf[..CRC_RANGE]) {
            return None;
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[12..20]);
        let epoch = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[20..28]);
        let capacity = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[28..36]);
        let read = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[36..44]);
        let write = u64::from_le_bytes(word);
        Some(StateRecord {
            epoch,
            capacity,
            cursors: Cursors { read, write },
        })
    }
}

/// Owner of the ring's cursors and allocation policy, persisted in the
/// state file.
#[derive(Debug)]
pub struct FileStateStore {
    file: File,
    capacity: u64,
    cursors: Cursors,
    epoch: u64,
    next_slot: usize,
}

impl FileStateStore {
    /// Opens or creates the state file. The second value is false when no
    /// usable state survived (fresh file, corruption, or a capacity
    /// change); the caller must then treat the cache as cold, because the
    /// modular disk mapping of every recorded offset depends on the
    /// capacity the cursors were written for.
    pub fn open(path: &Path, capacity: u64) -> Result<(Self, bool), BlobError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len((SLOT_COUNT * SLOT_SIZE) as u64)?;

        let mut best: Option<(StateRecord, usize)> = None;
        for slot in 0..SLOT_COUNT {
            let mut buf = [0u8; SLOT_SIZE];
            file.read_exact_at(&mut buf, (slot * SLOT_SIZE) as u64)?;
            if let Some(record) = StateRecord::from_bytes(&buf) {
                match &best {
                    Some((current, _)) if current.epoch >= record.epoch => {}
                    _ => best = Some((record, slot)),
                }
            }
        }

        match best {
            Some((record, slot)) if record.capacity == capacity => {
                log::debug!(
                    "recovered cursors read={} write={}",
                    record.cursors.read,
                    record.cursors.write
                );
                Ok((
                    FileStateStore {
                        file,
                        capacity,
                        cursors: record.cursors,
                        epoch: record.epoch,
                        next_slot: (slot + 1) % SLOT_COUNT,
                    },
                    true,
                ))
            }
            best => {
                if best.is_some() {
                    log::warn!("data capacity changed, starting cold");
                } else {
                    log::debug!("no valid cursor state, starting cold");
                }
                let record = StateRecord {
                    epoch: 1,
                    capacity,
                    cursors: Cursors::default(),
                };
                let bytes = record.to_bytes();
                for slot in 0..SLOT_COUNT {
                    file.write_all_at(&bytes, (slot * SLOT_SIZE) as u64)?;
                }
                file.sync_data()?;
                Ok((
                    FileStateStore {
                        file,
                        capacity,
                        cursors: Cursors::default(),
                        epoch: 1,
                        next_slot: 0,
                    },
                    false,
                ))
            }
        }
    }

    fn persist(&mut self, cursors: Cursors, sync: bool) -> io::Result<()> {
        let record = StateRecord {
            epoch: self.epoch + 1,
            capacity: self.capacity,
            cursors,
        };
        self.file
            .write_all_at(&record.to_bytes(), (self.next_slot * SLOT_SIZE) as u64)?;
        if sync {
            self.file.sync_data()?;
        }
        self.epoch += 1;
        self.cursors = cursors;
        self.next_slot = (self.next_slot + 1) % SLOT_COUNT;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn cursors(&self) -> Cursors {
        self.cursors
    }

    fn allocate(&mut self, size_bytes: u64) -> Result<u64, BlobError> {
        if size_bytes > self.capacity {
            return Err(BlobError::InvalidArgument(format!(
                "blob of {} bytes cannot fit in a {} byte ring",
                size_bytes, self.capacity
            )));
        }
        let offset = self.cursors.write;
        let mut next = self.cursors;
        next.write = next.write.checked_add(size_bytes).ok_or_else(|| {
            BlobError::InvalidArgument("cursor space exhausted".to_string())
        })?;
        if next.write - next.read > self.capacity {
            next.read = next.write - self.capacity;
        }
        // Losing a write advance only shrinks the recovered ring, but a
        // lost read advance could resurrect entries whose disk positions
        // the write that evicted them is about to reuse. Sync before any
        // such write can start.
        let evicting = next.read > self.cursors.read;
        self.persist(next, evicting)?;
        Ok(offset)
    }

    fn invalidate(&mut self, offset: u64, size_bytes: u64) -> Result<(), BlobError> {
        let end = offset.saturating_add(size_bytes);
        if end <= self.cursors.read {
            return Ok(());
        }
        let mut next = self.cursors;
        next.read = end.min(next.write);
        self.persist(next, true)?;
        Ok(())
    }
}
