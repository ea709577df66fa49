//! Content-addressed chunk store. Files are split into fixed-size chunks,
//! each named by the hex of its BLAKE3 hash; a file's fingerprint is the
//! BLAKE3 hash of the concatenation of the chunks' raw bytes in order (i.e.
//! `fingerprint == blake3(whole file)`), not a hash of the per-chunk hashes.
//! Layout on disk, matching the on-disk conventions:
//!
//!   <store>/<first two hex chars of fp>/<fp>/chunks/<index>.bin
//!   <store>/<first two hex chars of fp>/<fp>/full       (present once finalized)

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ChiralError, ChiralResult};

pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Hash of a single chunk, hex-encoded BLAKE3.
pub fn hash_chunk(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Whole-file fingerprint of raw bytes, hex-encoded BLAKE3. Equivalent to
/// hashing the concatenation of a file's chunks in index order.
pub fn fingerprint_of(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

fn entry_dir(store_root: &Path, fingerprint: &str) -> PathBuf {
    let prefix = &fingerprint[..fingerprint.len().min(2)];
    store_root.join(prefix).join(fingerprint)
}

fn chunk_path(store_root: &Path, fingerprint: &str, index: u64) -> PathBuf {
    entry_dir(store_root, fingerprint)
        .join("chunks")
        .join(format!("{index}.bin"))
}

fn full_path(store_root: &Path, fingerprint: &str) -> PathBuf {
    entry_dir(store_root, fingerprint).join("full")
}

pub struct ContentStore {
    root: PathBuf,
    chunk_size: usize,
}

impl ContentStore {
    pub fn new(root: PathBuf, chunk_size: usize) -> Self {
        ContentStore { root, chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write a chunk, verifying it against the claimed hash before touching
    /// disk. Returns an `IntegrityFailure` if the data doesn't match.
    pub async fn put_chunk(
        &self,
        fingerprint: &str,
        index: u64,
        claimed_hash: &str,
        data: &[u8],
    ) -> ChiralResult<()> {
        let actual = hash_chunk(data);
        if actual != claimed_hash {
            return Err(ChiralError::IntegrityFailure(format!(
                "chunk {index} of {fingerprint}: expected hash {claimed_hash}, got {actual}"
            )));
        }

        let path = chunk_path(&self.root, fingerprint, index);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("bin.tmp");
        {
            let mut f = fs::File::create(&tmp).await?;
            f.write_all(data).await?;
            f.flush().await?;
        }
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn has_chunk(&self, fingerprint: &str, index: u64) -> bool {
        fs::metadata(chunk_path(&self.root, fingerprint, index))
            .await
            .is_ok()
    }

    pub async fn read_chunk(&self, fingerprint: &str, index: u64) -> ChiralResult<Vec<u8>> {
        let path = chunk_path(&self.root, fingerprint, index);
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChiralError::NotFound(format!("chunk {index} of {fingerprint} not present"))
            } else {
                ChiralError::from(e)
            }
        })
    }

    /// Assemble all present chunks into the finalized `full` file, verifying
    /// the whole-file fingerprint — BLAKE3 over the concatenation of chunk
    /// bytes in order — before committing. `chunk_hashes` gives the expected
    /// per-chunk hashes in order; all must be present on disk.
    pub async fn finalize(&self, fingerprint: &str, chunk_hashes: &[String]) -> ChiralResult<()> {
        let dest = full_path(&self.root, fingerprint);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = dest.with_extension("tmp");
        let mut hasher = blake3::Hasher::new();
        {
            let mut out = fs::File::create(&tmp).await?;
            for (index, _hash) in chunk_hashes.iter().enumerate() {
                let chunk = self.read_chunk(fingerprint, index as u64).await?;
                hasher.update(&chunk);
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
        }

        let computed_fp = hasher.finalize().to_hex().to_string();
        if computed_fp != fingerprint {
            let _ = fs::remove_file(&tmp).await;
            return Err(ChiralError::IntegrityFailure(format!(
                "fingerprint mismatch: store key {fingerprint}, chunk bytes hash to {computed_fp}"
            )));
        }

        fs::rename(&tmp, &dest).await?;
        Ok(())
    }

    pub async fn is_finalized(&self, fingerprint: &str) -> bool {
        fs::metadata(full_path(&self.root, fingerprint))
            .await
            .is_ok()
    }

    /// Open the finalized file for sequential reading.
    pub async fn open_read(&self, fingerprint: &str) -> ChiralResult<fs::File> {
        let path = full_path(&self.root, fingerprint);
        fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChiralError::NotFound(format!("{fingerprint} is not finalized in this store"))
            } else {
                ChiralError::from(e)
            }
        })
    }

    /// Split raw bytes into chunk hashes and persist each chunk, returning
    /// the ordered list of chunk hashes and the resulting fingerprint
    /// (BLAKE3 over `data` itself, which is by construction the hash of the
    /// concatenation of the chunks produced here).
    pub async fn ingest(&self, data: &[u8]) -> ChiralResult<(String, Vec<String>)> {
        let fingerprint = fingerprint_of(data);
        let mut chunk_hashes = Vec::new();
        for (index, chunk) in data.chunks(self.chunk_size).enumerate() {
            let hash = hash_chunk(chunk);
            self.put_chunk("staging", index as u64, &hash, chunk)
                .await
                .ok();
            chunk_hashes.push(hash);
        }

        // Re-home staged chunks under the real fingerprint directory.
        for (index, hash) in chunk_hashes.iter().enumerate() {
            let staged = chunk_path(&self.root, "staging", index as u64);
            if fs::metadata(&staged).await.is_ok() {
                let data = fs::read(&staged).await?;
                self.put_chunk(&fingerprint, index as u64, hash, &data)
                    .await?;
                let _ = fs::remove_file(&staged).await;
            }
        }
        let _ = fs::remove_dir_all(entry_dir(&self.root, "staging")).await;

        self.finalize(&fingerprint, &chunk_hashes).await?;
        Ok((fingerprint, chunk_hashes))
    }

    /// Read back the full reassembled file into memory.
    pub async fn read_full(&self, fingerprint: &str) -> ChiralResult<Vec<u8>> {
        let mut f = self.open_read(fingerprint).await?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn ingest_and_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf(), 8);
        let data = b"hello world this is a test payload".to_vec();

        let (fingerprint, chunk_hashes) = store.ingest(&data).await.unwrap();
        assert!(chunk_hashes.len() > 1);
        assert!(store.is_finalized(&fingerprint).await);

        let read_back = store.read_full(&fingerprint).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn put_chunk_rejects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf(), 64);
        let result = store.put_chunk("fp123", 0, "deadbeef", b"payload").await;
        assert!(matches!(result, Err(ChiralError::IntegrityFailure(_))));
    }

    #[tokio::test]
    async fn finalize_rejects_fingerprint_not_matching_chunk_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf(), 64);
        let hash = hash_chunk(b"chunk-one");
        store.put_chunk("wrong-fp", 0, &hash, b"chunk-one").await.unwrap();
        let result = store.finalize("wrong-fp", &[hash]).await;
        assert!(matches!(result, Err(ChiralError::IntegrityFailure(_))));
    }

    #[tokio::test]
    async fn read_chunk_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf(), 64);
        let result = store.read_chunk("nope", 0).await;
        assert!(matches!(result, Err(ChiralError::NotFound(_))));
    }

    #[tokio::test]
    async fn fingerprint_is_blake3_of_whole_file_not_of_chunk_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf(), 10);
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();

        let (fingerprint, _chunk_hashes) = store.ingest(&data).await.unwrap();
        assert_eq!(fingerprint, blake3::hash(&data).to_hex().to_string());
    }

    proptest! {
        #[test]
        fn ingest_read_full_round_trips_for_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            tokio_test::block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = ContentStore::new(dir.path().to_path_buf(), 256);
                let (fingerprint, _chunk_hashes) = store.ingest(&data).await.unwrap();
                prop_assert_eq!(fingerprint, blake3::hash(&data).to_hex().to_string());
                let read_back = store.read_full(&fingerprint).await.unwrap();
                prop_assert_eq!(read_back, data);
            });
        }
    }
}
