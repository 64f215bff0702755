//! Circular storage backend: a fixed-capacity content-addressed cache over
//! three files.
//!
//! Blob bytes live in a ring-addressed data file, the digest index in an
//! offset file, and the ring's read/write cursors in a small state file.
//! Offsets are absolute and only ever grow; the disk position of a byte is
//! its offset modulo the capacity, so new writes overwrite the oldest bytes
//! once the ring is full. An index entry is served only while its whole
//! range sits inside `[read, write)`; entries whose bytes rolled off the
//! ring retire by failing that check, with no reclamation pass.
//!
//! Index and cursor updates are serialised behind one lock. Data file I/O
//! deliberately runs outside it: a put streams its bytes into a range
//! reserved up front, then commits the index entry only if the reservation
//! is still live. When slower writers get overrun they report [`BlobError::Stale`]
//! and leave nothing behind but unreferenced ring garbage.

mod cursors;
mod data_store;
mod offset_store;
mod state_store;

pub use cursors::Cursors;
pub use data_store::FileDataStore;
pub use offset_store::FileOffsetStore;
pub use state_store::FileStateStore;

use crate::{BlobAccess, BlobError, BlobReader, CircularConfig};
use async_trait::async_trait;
use common::Digest;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

/// Index from digest to the cursor-space range holding its bytes.
pub trait OffsetStore: Send + Sync + 'static {
    /// Resolves a digest against `cursors`. Entries outside the live region
    /// read as absent.
    fn get(&self, digest: &Digest, cursors: Cursors)
        -> Result<Option<(u64, u64)>, BlobError>;

    /// Records the mapping. The caller has already verified the range is
    /// live under `cursors`.
    fn put(
        &mut self,
        digest: &Digest,
        offset: u64,
        length: u64,
        cursors: Cursors,
    ) -> Result<(), BlobError>;
}

/// Where blob bytes are stored. A dumb byte array addressed by absolute
/// cursor-space offsets.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Copies the reader into the ring at `offset`, returning the number of
    /// bytes copied.
    async fn put(
        &self,
        r: &mut (dyn AsyncRead + Send + Unpin),
        offset: u64,
    ) -> Result<u64, BlobError>;

    /// Returns a lazy reader over `[offset, offset + size)`.
    fn get(&self, offset: u64, size: u64) -> BlobReader;
}

/// Owner of the ring's cursors: allocation of new ranges and invalidation
/// of stored ones.
pub trait StateStore: Send + Sync + 'static {
    fn cursors(&self) -> Cursors;

    /// Reserves a contiguous cursor-space range, advancing the read cursor
    /// as needed to keep the ring within capacity. Returns the range's
    /// starting offset.
    fn allocate(&mut self, size_bytes: u64) -> Result<u64, BlobError>;

    /// Takes the range out of the live region.
    fn invalidate(&mut self, offset: u64, size_bytes: u64) -> Result<(), BlobError>;
}

struct Inner<O, S> {
    offset_store: O,
    state_store: S,
}

/// Fixed-capacity content-addressed cache over a ring of bytes.
///
/// Cheap to clone; all clones share the same backing stores.
pub struct CircularBlobAccess<O, D, S> {
    // Lockless: the data store does its own positioned I/O.
    data_store: Arc<D>,
    // Index and cursors live behind the one lock.
    inner: Arc<Mutex<Inner<O, S>>>,
    max_blob_size: u64,
}

impl<O, D, S> Clone for CircularBlobAccess<O, D, S> {
    fn clone(&self) -> Self {
        CircularBlobAccess {
            data_store: Arc::clone(&self.data_store),
            inner: Arc::clone(&self.inner),
            max_blob_size: self.max_blob_size,
        }
    }
}

impl<O, D, S> CircularBlobAccess<O, D, S>
where
    O: OffsetStore,
    D: DataStore,
    S: StateStore,
{
    /// Creates a circular storage backend over injected stores. Puts larger
    /// than `max_blob_size` are rejected up front.
    pub fn new(offset_store: O, data_store: D, state_store: S, max_blob_size: u64) -> Self {
        CircularBlobAccess {
            data_store: Arc::new(data_store),
            inner: Arc::new(Mutex::new(Inner {
                offset_store,
                state_store,
            })),
            max_blob_size,
        }
    }
}

impl CircularBlobAccess<FileOffsetStore, FileDataStore, FileStateStore> {
    /// Opens the three backing files described by `config`. When the state
    /// file cannot be trusted (fresh, corrupt, or written for a different
    /// capacity) the cache starts cold: cursors reset and the offset file
    /// is wiped, so no stale entry can alias a re-used disk position.
    pub fn open(config: &CircularConfig) -> Result<Self, BlobError> {
        config.validate()?;
        let (state_store, recovered) =
            FileStateStore::open(&config.state_file_path, config.data_capacity)?;
        let offset_store = FileOffsetStore::open(&config.offset_file_path, !recovered)?;
        let data_store = FileDataStore::open(&config.data_file_path, config.data_capacity)?;
        Ok(Self::new(
            offset_store,
            data_store,
            state_store,
            config.max_blob_size(),
        ))
    }
}

#[async_trait]
impl<O, D, S> BlobAccess for CircularBlobAccess<O, D, S>
where
    O: OffsetStore,
    D: DataStore,
    S: StateStore,
{
    async fn get(&self, digest: &Digest) -> Result<(i64, BlobReader), BlobError> {
        let (offset, length) = {
            let inner = self.inner.lock().await;
            let cursors = inner.state_store.cursors();
            inner.offset_store.get(digest, cursors)?
        }
        .ok_or_else(|| BlobError::NotFound(digest.clone()))?;
        Ok((length as i64, self.data_store.get(offset, length)))
    }

    async fn get_and_read_at(
        &self,
        digest: &Digest,
        buf: &mut [u8],
        off: i64,
    ) -> Result<usize, BlobError> {
        if off < 0 {
            return Err(BlobError::InvalidArgument(
                "cannot read at negative offset".to_string(),
            ));
        }
        let off = off as u64;
        let (offset, length) = {
            let inner = self.inner.lock().await;
            let cursors = inner.state_store.cursors();
            inner.offset_store.get(digest, cursors)?
        }
        .ok_or_else(|| BlobError::NotFound(digest.clone()))?;

        // Trim off the first part of the blob; reading at or past its end
        // is a clean zero-byte read.
        if off >= length {
            return Ok(0);
        }
        let want = ((length - off).min(buf.len() as u64)) as usize;
        let mut r = self.data_store.get(offset + off, want as u64);
        r.read_exact(&mut buf[..want]).await?;
        Ok(want)
    }

    async fn put(
        &self,
        digest: &Digest,
        size_bytes: i64,
        r: BlobReader,
    ) -> Result<(), BlobError> {
        if size_bytes < 0 {
            return Err(BlobError::InvalidArgument(
                "negative blob size".to_string(),
            ));
        }
        let size = size_bytes as u64;
        if size > self.max_blob_size {
            return Err(BlobError::InvalidArgument(format!(
                "blob of {} bytes exceeds the {} byte limit",
                size, self.max_blob_size
            )));
        }

        // Phase 1: reserve a cursor-space range.
        let offset = {
            let mut inner = self.inner.lock().await;
            inner.state_store.allocate(size)?
        };

        // Phase 2: stream the bytes, lock-free. Anything past the declared
        // size is not ours to write.
        let mut limited = r.take(size);
        let copied = self.data_store.put(&mut limited, offset).await?;
        if copied < size {
            return Err(BlobError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "blob stream ended before its declared size",
            )));
        }

        // Phase 3: commit the index entry, unless later allocations overran
        // the reservation while we were writing.
        let mut inner = self.inner.lock().await;
        let cursors = inner.state_store.cursors();
        if cursors.contains(offset, size) {
            inner.offset_store.put(digest, offset, size, cursors)
        } else {
            Err(BlobError::Stale)
        }
    }

    async fn delete(&self, digest: &Digest) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().await;
        let cursors = inner.state_store.cursors();
        if let Some((offset, length)) = inner.offset_store.get(digest, cursors)? {
            inner.state_store.invalidate(offset, length)?;
        }
        Ok(())
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, BlobError> {
        let inner = self.inner.lock().await;
        let cursors = inner.state_store.cursors();
        let mut missing = Vec::new();
        for digest in digests {
            if inner.offset_store.get(digest, cursors)?.is_none() {
                missing.push(digest.clone());
            }
        }
        Ok(missing)
    }
}
