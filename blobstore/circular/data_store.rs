use crate::{BlobError, BlobReader};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use super::DataStore;

/// Copy buffer size when streaming a blob into the ring.
const PUT_CHUNK_SIZE: usize = 64 * 1024;

/// Ring-addressed byte file of fixed capacity.
///
/// Offsets are absolute cursor-space positions; the on-disk position is
/// `offset % capacity`, so a write or read whose range crosses the end of
/// the file continues at the start. The store performs no allocation and no
/// liveness checks.
#[derive(Debug)]
pub struct FileDataStore {
    file: Arc<File>,
    capacity: u64,
}

impl FileDataStore {
    pub fn open(path: &Path, capacity: u64) -> Result<Self, BlobError> {
        if capacity == 0 {
            return Err(BlobError::InvalidArgument(
                "data file capacity must be positive".to_string(),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(capacity)?;
        Ok(FileDataStore {
            file: Arc::new(file),
            capacity,
        })
    }

    fn write_wrapping(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            let pos = offset % self.capacity;
            let contiguous = ((self.capacity - pos).min(buf.len() as u64)) as usize;
            self.file.write_all_at(&buf[..contiguous], pos)?;
            buf = &buf[contiguous..];
            offset += contiguous as u64;
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for FileDataStore {
    async fn put(
        &self,
        r: &mut (dyn AsyncRead + Send + Unpin),
        offset: u64,
    ) -> Result<u64, BlobError> {
        let mut chunk = vec![0u8; PUT_CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = r.read(&mut chunk).await?;
            if n == 0 {
                return Ok(copied);
            }
            self.write_wrapping(&chunk[..n], offset + copied)?;
            copied += n as u64;
        }
    }

    fn get(&self, offset: u64, size: u64) -> BlobReader {
        Box::new(RingReader {
            file: Arc::clone(&self.file),
            capacity: self.capacity,
            offset,
            remaining: size,
        })
    }
}

/// Lazy reader over a cursor-space interval of the ring.
///
/// Captures the offset, not the bytes: a blob overwritten while the reader
/// is open yields torn content.
struct RingReader {
    file: Arc<File>,
    capacity: u64,
    offset: u64,
    remaining: u64,
}

impl AsyncRead for RingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let pos = this.offset % this.capacity;
        let contiguous = (this.capacity - pos).min(this.remaining);
        let dst = buf.initialize_unfilled();
        let want = (dst.len() as u64).min(contiguous) as usize;
        let n = this.file.read_at(&mut dst[..want], pos)?;
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "data file shorter than ring capacity",
            )));
        }
        buf.advance(n);
        this.offset += n as u64;
        this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn read_all(mut r: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn put_and_get_without_wrap() {
        let dir = tempdir().unwrap();
        let store = FileDataStore::open(&dir.path().join("data"), 16).unwrap();

        let mut r: BlobReader = Box::new(io::Cursor::new(b"abcd".to_vec()));
        let copied = store.put(&mut r, 0).await.unwrap();
        assert_eq!(copied, 4);
        assert_eq!(read_all(store.get(0, 4)).await, b"abcd");
    }

    #[tokio::test]
    async fn write_and_read_split_at_the_wrap() {
        let dir = tempdir().unwrap();
        let store = FileDataStore::open(&dir.path().join("data"), 8).unwrap();

        // Cursor-space [6, 12) lands on disk as [6, 8) then [0, 4).
        let mut r: BlobReader = Box::new(io::Cursor::new(b"abcdef".to_vec()));
        store.put(&mut r, 6).await.unwrap();
        assert_eq!(read_all(store.get(6, 6)).await, b"abcdef");

        let mut raw = [0u8; 8];
        store.file.read_exact_at(&mut raw, 0).unwrap();
        assert_eq!(&raw, b"cdef\0\0ab");
    }

    #[tokio::test]
    async fn reader_sees_later_overwrites() {
        let dir = tempdir().unwrap();
        let store = FileDataStore::open(&dir.path().join("data"), 8).unwrap();

        let mut r: BlobReader = Box::new(io::Cursor::new(b"old!".to_vec()));
        store.put(&mut r, 0).await.unwrap();
        let lazy = store.get(0, 4);

        let mut r: BlobReader = Box::new(io::Cursor::new(b"new!".to_vec()));
        store.put(&mut r, 8).await.unwrap();
        assert_eq!(read_all(lazy).await, b"new!");
    }

    #[tokio::test]
    async fn empty_range_reads_nothing() {
        let dir = tempdir().unwrap();
        let store = FileDataStore::open(&dir.path().join("data"), 8).unwrap();
        assert_eq!(read_all(store.get(3, 0)).await, b"");
    }
}
