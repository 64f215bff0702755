use blobstore::{BlobAccess, BlobReader, CircularBlobAccess, CircularConfig};
use common::Digest;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

const BLOB_SIZE: usize = 4096;

fn put_get_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime initialization");

    let dir = TempDir::new().unwrap();
    let config = CircularConfig {
        data_capacity: 64 << 20,
        data_file_path: dir.path().join("data"),
        offset_file_path: dir.path().join("offset"),
        state_file_path: dir.path().join("state"),
        max_blob_size: None,
    };
    let store = CircularBlobAccess::open(&config).unwrap();
    let digest = Digest::new("", "ab".repeat(32), BLOB_SIZE as i64);
    let payload = vec![0x5au8; BLOB_SIZE];

    c.bench_function("circular_put_get_4k", |b| {
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            let digest = digest.clone();
            let payload = payload.clone();
            async move {
                let r: BlobReader = Box::new(io::Cursor::new(payload));
                store.put(&digest, BLOB_SIZE as i64, r).await.unwrap();

                let (_, mut r) = store.get(&digest).await.unwrap();
                let mut out = Vec::new();
                r.read_to_end(&mut out).await.unwrap();
                black_box(out);
            }
        })
    });
}

criterion_group!(benches, put_get_benchmark);
criterion_main!(benches);
