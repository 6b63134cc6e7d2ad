//! BlobStore capability (§6.1): put/get large binary objects by key.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Store pre-serialized newline-delimited JSON records at `key`.
    async fn put_jsonl_lines(&self, bucket: &str, key: &str, lines: Vec<String>) -> Result<()> {
        let mut buf = Vec::new();
        for line in lines {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        self.put(bucket, key, buf).await
    }
}

/// Serialize `records` as newline-delimited JSON lines for [`BlobStore::put_jsonl_lines`].
pub fn to_jsonl_lines<T: Serialize>(records: &[T]) -> Result<Vec<String>> {
    records
        .iter()
        .map(|r| serde_json::to_string(r).map_err(Into::into))
        .collect()
}

/// Local-filesystem-backed reference implementation of BlobStore.
pub struct LocalBlobStore {
    root: std::path::PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> std::path::PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(skip(self, bytes), fields(bucket, key, len = bytes.len()))]
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket, key))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(bucket, key);
        let bytes = tokio::fs::read(path).await?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        value: u32,
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store
            .put("session=run1", "segments.jsonl", b"hello".to_vec())
            .await
            .unwrap();
        let bytes = store.get("session=run1", "segments.jsonl").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn put_jsonl_writes_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let rows = vec![Row { value: 1 }, Row { value: 2 }];
        let lines = to_jsonl_lines(&rows).unwrap();
        store.put_jsonl_lines("session=run1", "rows.jsonl", lines).await.unwrap();
        let bytes = store.get("session=run1", "rows.jsonl").await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
