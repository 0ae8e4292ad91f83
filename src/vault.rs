use std::path::{Path, PathBuf};

use crate::error::VaultError;
use crate::model::Article;

/// Host file-storage abstraction. The orchestrator only depends on this
/// contract; production uses [`FsVault`], tests use an in-memory impl.
#[allow(async_fn_in_trait)]
pub trait Vault {
    async fn exists(&self, path: &Path) -> bool;
    async fn create_folder(&self, path: &Path) -> Result<(), VaultError>;
    async fn create_file(&self, path: &Path, content: &str) -> Result<(), VaultError>;
    async fn read_file(&self, path: &Path) -> Result<String, VaultError>;
    async fn append_to_file(&self, path: &Path, content: &str) -> Result<(), VaultError>;
    async fn modify_file(&self, path: &Path, content: &str) -> Result<(), VaultError>;
}

/// Characters that cannot appear in note filenames on common filesystems.
const HOSTILE: &[char] = &['\\', '/', ':', '<', '>', '?', '|', '*', '"'];

const MAX_FILENAME_CHARS: usize = 250;

/// Derives the stable on-disk name for an article's note: hostile characters
/// stripped, trimmed, truncated, with a fallback name when nothing survives.
pub fn note_filename(article: &Article) -> String {
    let cleaned: String = article
        .title
        .chars()
        .filter(|c| !HOSTILE.contains(c))
        .collect();
    let cleaned: String = cleaned.trim().chars().take(MAX_FILENAME_CHARS).collect();

    if cleaned.is_empty() {
        format!("Untitled-{}", article.id)
    } else {
        cleaned
    }
}

pub fn note_path(folder: &Path, article: &Article) -> PathBuf {
    folder.join(format!("{}.md", note_filename(article)))
}

/// Maps an article to its note file. An existing file is returned untouched;
/// otherwise an empty one is created when permitted. `None` means creation
/// was suppressed and the caller should skip the article without error.
pub async fn resolve_note<V: Vault>(
    vault: &V,
    folder: &Path,
    article: &Article,
    create_if_missing: bool,
) -> Result<Option<PathBuf>, VaultError> {
    let path = note_path(folder, article);
    if vault.exists(&path).await {
        return Ok(Some(path));
    }
    if !create_if_missing {
        return Ok(None);
    }
    vault.create_file(&path, "").await?;
    Ok(Some(path))
}

/// Vault backed by the real filesystem through tokio.
pub struct FsVault;

impl Vault for FsVault {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_folder(&self, path: &Path) -> Result<(), VaultError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| VaultError::io(path.display().to_string(), e))
    }

    async fn create_file(&self, path: &Path, content: &str) -> Result<(), VaultError> {
        tokio::fs::write(path, content)
            .await
            .map_err(|e| VaultError::io(path.display().to_string(), e))
    }

    async fn read_file(&self, path: &Path) -> Result<String, VaultError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| VaultError::io(path.display().to_string(), e))
    }

    async fn append_to_file(&self, path: &Path, content: &str) -> Result<(), VaultError> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| VaultError::io(path.display().to_string(), e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| VaultError::io(path.display().to_string(), e))
    }

    async fn modify_file(&self, path: &Path, content: &str) -> Result<(), VaultError> {
        tokio::fs::write(path, content)
            .await
            .map_err(|e| VaultError::io(path.display().to_string(), e))
    }
}

/// In-memory vault for orchestrator and resolution tests.
#[cfg(test)]
pub struct MemoryVault {
    files: std::sync::Mutex<std::collections::BTreeMap<PathBuf, String>>,
    folders: std::sync::Mutex<std::collections::BTreeSet<PathBuf>>,
    /// Paths whose creation should fail, for per-item failure tests.
    pub poisoned: std::sync::Mutex<std::collections::BTreeSet<PathBuf>>,
}

#[cfg(test)]
impl MemoryVault {
    pub fn new() -> Self {
        MemoryVault {
            files: std::sync::Mutex::new(Default::default()),
            folders: std::sync::Mutex::new(Default::default()),
            poisoned: std::sync::Mutex::new(Default::default()),
        }
    }

    pub fn with_folder(folder: &Path) -> Self {
        let v = Self::new();
        v.folders.lock().unwrap().insert(folder.to_path_buf());
        v
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn put(&self, path: &Path, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn has_folder(&self, path: &Path) -> bool {
        self.folders.lock().unwrap().contains(path)
    }
}

#[cfg(test)]
impl Vault for MemoryVault {
    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path) || self.has_folder(path)
    }

    async fn create_folder(&self, path: &Path) -> Result<(), VaultError> {
        self.folders.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn create_file(&self, path: &Path, content: &str) -> Result<(), VaultError> {
        if self.poisoned.lock().unwrap().contains(path) {
            return Err(VaultError::InvalidPath(path.display().to_string()));
        }
        self.put(path, content);
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<String, VaultError> {
        self.get(path)
            .ok_or_else(|| VaultError::InvalidPath(path.display().to_string()))
    }

    async fn append_to_file(&self, path: &Path, content: &str) -> Result<(), VaultError> {
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(path.to_path_buf()).or_default();
        entry.push_str(content);
        Ok(())
    }

    async fn modify_file(&self, path: &Path, content: &str) -> Result<(), VaultError> {
        self.put(path, content);
        Ok(())
    }
}
