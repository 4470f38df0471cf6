use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// Where exported documents and panel images end up.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        Ok(())
    }
}

/// Turns a comic title into something safe to use as a file or folder name.
pub fn file_stem(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "my_comic".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_native_storage_creates_parent_dirs() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("nested").join("deeper").join("file.bin");
        let path_str = path.to_str().unwrap();

        let storage = NativeStorage::new();
        storage.write(path_str, b"panel").await?;
        assert_eq!(std::fs::read(&path)?, b"panel");
        Ok(())
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("The Last Signal"), "The_Last_Signal");
        assert_eq!(file_stem("  Who?/Why!  "), "Who__Why");
        assert_eq!(file_stem("???"), "my_comic");
        assert_eq!(file_stem(""), "my_comic");
    }
}
