use crate::{BlobAccess, BlobError, BlobReader};
use async_trait::async_trait;
use common::Digest;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

/// Storage backend keeping every blob in process memory. Used by tests and
/// small single-node deployments.
#[derive(Default, Debug, Clone)]
pub struct InMemory {
    cas: Arc<Mutex<HashMap<Digest, Vec<u8>>>>,
}

#[async_trait]
impl BlobAccess for InMemory {
    async fn get(&self, digest: &Digest) -> Result<(i64, BlobReader), BlobError> {
        let cas = self.cas.lock().await;
        log::info!("read: {}", digest);
        let data = cas
            .get(digest)
            .ok_or_else(|| BlobError::NotFound(digest.clone()))?;
        let reader: BlobReader = Box::new(io::Cursor::new(data.clone()));
        Ok((data.len() as i64, reader))
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
        let cas = self.cas.lock().await;
        let data = cas
            .get(digest)
            .ok_or_else(|| BlobError::NotFound(digest.clone()))?;
        let off = off as usize;
        if off >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - off);
        buf[..n].copy_from_slice(&data[off..off + n]);
        Ok(n)
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
        let mut data = Vec::new();
        r.take(size_bytes as u64).read_to_end(&mut data).await?;
        if (data.len() as i64) < size_bytes {
            return Err(BlobError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "blob stream ended before its declared size",
            )));
        }
        let mut cas = self.cas.lock().await;
        log::info!("write: {}", digest);
        cas.insert(digest.clone(), data);
        Ok(())
    }

    async fn delete(&self, digest: &Digest) -> Result<(), BlobError> {
        let mut cas = self.cas.lock().await;
        log::info!("delete: {}", digest);
        cas.remove(digest);
        Ok(())
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, BlobError> {
        let cas = self.cas.lock().await;
        let mut missing = Vec::new();
        for digest in digests {
            let present = cas.contains_key(digest);
            log::info!("check: {} / {}", digest, present);
            if !present {
                missing.push(digest.clone());
            }
        }
        Ok(missing)
    }
}
