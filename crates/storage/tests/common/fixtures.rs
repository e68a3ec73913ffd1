use bagcache_storage::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use std::path::Path;
use tempfile::TempDir;

/// Deterministic pseudo-random bytes; the same seed gives the same output.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    Bytes::from(data)
}

/// Drain a byte stream into memory.
pub async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

/// A temporary bag directory.
pub struct TestBagDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestBagDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file into the directory.
    pub fn put(&self, name: &str, data: &[u8]) -> &Self {
        std::fs::write(self.dir.path().join(name), data).unwrap();
        self
    }
}
