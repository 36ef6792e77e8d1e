use super::{KvBytes, Store, StoreError, validate_key};
use async_trait::async_trait;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// One file per key below a base directory. Key segments become
/// directories. Cannot push change notifications.
pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FilesystemStore {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.base_dir.clone(), |path, segment| {
            path.join(segment)
        }))
    }
}

/// Replaces `path` with `bytes` via a temp file in the same directory, so
/// readers only ever see the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn collect(dir: &Path, key: &str, prefix: &str, out: &mut Vec<KvBytes>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        // temp files from in-flight writes
        if name.starts_with('.') {
            continue;
        }

        let child_key = if key.is_empty() {
            name
        } else {
            format!("{key}/{name}")
        };

        if entry.file_type()?.is_dir() {
            // Only descend where a matching key can still appear
            let dir_prefix = format!("{child_key}/");
            if dir_prefix.starts_with(prefix) || prefix.starts_with(&dir_prefix) {
                collect(&entry.path(), &child_key, prefix, out)?;
            }
        } else if child_key.starts_with(prefix) {
            out.push(KvBytes {
                key: child_key,
                bytes: fs::read(entry.path())?,
            });
        }
    }

    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
        .map_err(StoreError::from)
}

#[async_trait]
impl Store for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<KvBytes>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(KvBytes {
                key: key.to_string(),
                bytes,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvBytes>, StoreError> {
        let base_dir = self.base_dir.clone();
        let prefix = prefix.to_string();

        let mut entries = blocking(move || {
            let mut out = Vec::new();
            collect(&base_dir, "", &prefix, &mut out)?;
            Ok(out)
        })
        .await?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn set(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        blocking(move || write_atomic(&path, &bytes)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
