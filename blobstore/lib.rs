use async_trait::async_trait;
use common::Digest;
use tokio::io::AsyncRead;

pub mod circular;
mod config;
mod error;
mod memory;

pub use circular::CircularBlobAccess;
pub use config::CircularConfig;
pub use error::BlobError;
pub use memory::InMemory;

/// Byte stream handed across the storage boundary.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Blob storage contract exposed to the CAS and ByteStream servers.
///
/// Implementations are cheap to clone and shared across request handlers.
/// Readers returned by `get` are snapshots of the index only, not of the
/// bytes: a backend that recycles storage may let a concurrent `put`
/// overwrite the region while the reader is still open, in which case the
/// reader observes torn content. Content-addressed callers detect that by
/// rehashing what they read.
#[async_trait]
pub trait BlobAccess: Clone + Send + Sync + 'static {
    /// Returns the blob's declared length and a reader over its bytes.
    async fn get(&self, digest: &Digest) -> Result<(i64, BlobReader), BlobError>;

    /// Reads up to `buf.len()` bytes of the blob starting at byte `off`.
    ///
    /// Returns the number of bytes read. A count below `buf.len()` means the
    /// blob ended; `off` at or past the end reads zero bytes. Negative `off`
    /// is an `InvalidArgument` error.
    async fn get_and_read_at(
        &self,
        digest: &Digest,
        buf: &mut [u8],
        off: i64,
    ) -> Result<usize, BlobError>;

    /// Stores `size_bytes` bytes from `r` under `digest`. Always consumes
    /// the reader. A reader that ends before `size_bytes` is an I/O error.
    async fn put(&self, digest: &Digest, size_bytes: i64, r: BlobReader)
        -> Result<(), BlobError>;

    /// Removes the blob if present. Absence is not an error.
    async fn delete(&self, digest: &Digest) -> Result<(), BlobError>;

    /// Returns the digests with no stored blob, preserving input order and
    /// duplicates.
    async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, BlobError>;
}
