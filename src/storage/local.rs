use super::{EntryKind, FileStat, FileSystem};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// 本地目录
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(SyncError::Config("本地目录不能为空".to_string()));
        }
        let base_path = PathBuf::from(path);
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches(|c| c == '/' || c == std::path::MAIN_SEPARATOR);
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl FileSystem for LocalStorage {
    async fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let mut reader = fs::read_dir(self.resolve_path(path)).await?;
        let mut names = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().into_string().map_err(|raw| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("文件名不是有效的 UTF-8: {:?}", raw),
                )
            })?;
            names.push(name);
        }

        // read_dir 的顺序不固定
        names.sort();
        Ok(names)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let metadata = fs::symlink_metadata(self.resolve_path(path)).await?;
        let file_type = metadata.file_type();

        let kind = if file_type.is_symlink() {
            None
        } else if file_type.is_dir() {
            Some(EntryKind::Directory)
        } else if file_type.is_file() {
            Some(EntryKind::File)
        } else {
            None
        };

        let modified: DateTime<Utc> = metadata.modified()?.into();

        Ok(FileStat {
            kind,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified,
            mode: platform_mode(&metadata),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(unix)]
fn platform_mode(metadata: &std::fs::Metadata) -> Option<u32> {
    Some(metadata.mode())
}

#[cfg(not(unix))]
fn platform_mode(_metadata: &std::fs::Metadata) -> Option<u32> {
    None
}
