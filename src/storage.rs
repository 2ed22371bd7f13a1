use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

/// URL prefix under which the upload directory is served.
pub const PUBLIC_PREFIX: &str = "/uploads";

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    /// Server-relative path clients use to fetch `key`.
    fn public_path(&self, key: &str) -> String {
        format!("{PUBLIC_PREFIX}/{key}")
    }
}

/// Files on local disk, served back by `ServeDir`.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("avatars"))
            .await
            .with_context(|| format!("create upload dir {}", root.display()))?;
        Ok(Self { root })
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.root.join(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

/// Lowercased extension of an accepted avatar image, if any.
pub fn avatar_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" => Some("jpg"),
        "jpeg" => Some("jpeg"),
        "png" => Some("png"),
        "gif" => Some("gif"),
        _ => None,
    }
}

/// Fresh storage key for an avatar with the given extension.
pub fn avatar_key(ext: &str) -> String {
    format!("avatars/{}.{}", Uuid::new_v4(), ext)
}

/// Storage key behind a public avatar path, if it is one of ours.
pub fn key_from_public_path(path: &str) -> Option<&str> {
    path.strip_prefix(PUBLIC_PREFIX)?
        .strip_prefix('/')
        .filter(|key| key.starts_with("avatars/") && !key.contains(".."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_extension() {
        assert_eq!(avatar_extension("me.jpg"), Some("jpg"));
        assert_eq!(avatar_extension("me.JPEG"), Some("jpeg"));
        assert_eq!(avatar_extension("a.b.png"), Some("png"));
        assert_eq!(avatar_extension("anim.gif"), Some("gif"));
        assert_eq!(avatar_extension("shell.php"), None);
        assert_eq!(avatar_extension("photo.webp"), None);
        assert_eq!(avatar_extension("noext"), None);
        assert_eq!(avatar_extension("jpg"), None);
    }

    #[test]
    fn avatar_keys_are_unique_and_public_paths_prefixed() {
        let a = avatar_key("png");
        let b = avatar_key("png");
        assert_ne!(a, b);
        assert!(a.starts_with("avatars/") && a.ends_with(".png"));
    }

    #[test]
    fn public_paths_map_back_to_keys() {
        assert_eq!(key_from_public_path("/uploads/avatars/a.png"), Some("avatars/a.png"));
        assert_eq!(key_from_public_path(""), None);
        assert_eq!(key_from_public_path("https://cdn.example.com/a.png"), None);
        assert_eq!(key_from_public_path("/uploads/avatars/../../etc/passwd"), None);
        assert_eq!(key_from_public_path("/uploads/other/a.png"), None);
    }

    #[tokio::test]
    async fn local_storage_put_and_delete() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path()).await?;
        assert!(dir.path().join("avatars").is_dir());
        let key = avatar_key("gif");

        storage.put_object(&key, Bytes::from_static(b"GIF89a")).await?;
        let written = tokio::fs::read(dir.path().join(&key)).await?;
        assert_eq!(written, b"GIF89a");
        assert_eq!(storage.public_path(&key), format!("/uploads/{key}"));

        storage.delete_object(&key).await?;
        assert!(!dir.path().join(&key).exists());
        // deleting twice is fine
        storage.delete_object(&key).await?;
        Ok(())
    }
}
