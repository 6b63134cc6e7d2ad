//! FileShare capability (§6.2): logical folder+name file storage.

use crate::error::Result;
use async_trait::async_trait;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime: String,
}

#[derive(Debug, Clone)]
pub struct UploadRef {
    pub id: String,
    pub link: String,
}

#[async_trait]
pub trait FileShare: Send + Sync {
    async fn list_folder(&self, folder_name: &str) -> Result<Vec<FileEntry>>;
    async fn download(&self, id: &str, local_path: &std::path::Path) -> Result<()>;
    async fn upload(
        &self,
        local_path: &std::path::Path,
        folder_name: &str,
        file_name: &str,
    ) -> Result<UploadRef>;
}

/// Local-filesystem-backed reference implementation of FileShare.
///
/// Folders are directories under `root`; the file's relative path
/// (`folder/file_name`) doubles as its id.
pub struct LocalFileShare {
    root: std::path::PathBuf,
}

impl LocalFileShare {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn folder_path(&self, folder_name: &str) -> std::path::PathBuf {
        self.root.join(folder_name)
    }
}

#[async_trait]
impl FileShare for LocalFileShare {
    #[instrument(skip(self), fields(folder_name))]
    async fn list_folder(&self, folder_name: &str) -> Result<Vec<FileEntry>> {
        let dir = self.folder_path(folder_name);
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let mime = mime_guess_from_ext(&name);
            entries.push(FileEntry {
                id: format!("{}/{}", folder_name, name),
                name,
                size: metadata.len(),
                mime,
            });
        }
        Ok(entries)
    }

    #[instrument(skip(self), fields(id))]
    async fn download(&self, id: &str, local_path: &std::path::Path) -> Result<()> {
        let src = self.root.join(id);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, local_path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(folder_name, file_name))]
    async fn upload(
        &self,
        local_path: &std::path::Path,
        folder_name: &str,
        file_name: &str,
    ) -> Result<UploadRef> {
        let dest_dir = self.folder_path(folder_name);
        tokio::fs::create_dir_all(&dest_dir).await?;
        let dest = dest_dir.join(file_name);
        tokio::fs::copy(local_path, &dest).await?;
        let id = format!("{}/{}", folder_name, file_name);
        Ok(UploadRef {
            link: dest.to_string_lossy().to_string(),
            id,
        })
    }
}

fn mime_guess_from_ext(name: &str) -> String {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()) {
        Some(ext) if ext == "wav" => "audio/wav".to_string(),
        Some(ext) if ext == "mp3" => "audio/mpeg".to_string(),
        Some(ext) if ext == "m4a" => "audio/mp4".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_list_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let share = LocalFileShare::new(dir.path());

        let src_file = dir.path().join("source.wav");
        tokio::fs::write(&src_file, b"fake wav").await.unwrap();

        let uploaded = share
            .upload(&src_file, "Clips_01-15", "tx_abc.wav")
            .await
            .unwrap();
        assert_eq!(uploaded.id, "Clips_01-15/tx_abc.wav");

        let entries = share.list_folder("Clips_01-15").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "tx_abc.wav");

        let dest = dir.path().join("downloaded.wav");
        share.download(&uploaded.id, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"fake wav");
    }

    #[tokio::test]
    async fn missing_folder_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let share = LocalFileShare::new(dir.path());
        let entries = share.list_folder("nonexistent").await.unwrap();
        assert!(entries.is_empty());
    }
}
