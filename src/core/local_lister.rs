//! 本地目录递归列表

use crate::core::scanner::EntryFilter;
use crate::error::{Result, SyncError};
use crate::storage::{join_relative, normalize_path, Entry, EntryKind, FileSystem, MARKER_NAME};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 本地目录列表器
///
/// 产出与远程列表相同形状的条目；不跟随符号链接。
#[derive(Default)]
pub struct LocalLister {
    filter: EntryFilter,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl LocalLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// 排除的条目不返回，排除的目录不进入
    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// 设置取消标志
    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 深度优先（先序）列出整个本地树
    pub async fn list(&self, fs: &dyn FileSystem) -> Result<Vec<Entry>> {
        info!("开始扫描本地目录: {}", fs.name());

        let mut entries = Vec::new();
        let mut stack = vec![self.fetch(fs, "").await?.into_iter()];

        while let Some(children) = stack.last_mut() {
            match children.next() {
                Some(entry) => {
                    let subdir = entry.is_dir().then(|| entry.path.clone());
                    entries.push(entry);
                    if let Some(dir) = subdir {
                        stack.push(self.fetch(fs, &dir).await?.into_iter());
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }

        info!("本地扫描完成: {} 个条目", entries.len());
        Ok(entries)
    }

    async fn fetch(&self, fs: &dyn FileSystem, dir: &str) -> Result<Vec<Entry>> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.read_children(fs, dir).await.map_err(|e| {
            let path = if dir.is_empty() {
                fs.name().to_string()
            } else {
                format!("{}/{}", fs.name(), dir)
            };
            SyncError::listing(path, e)
        })
    }

    async fn read_children(&self, fs: &dyn FileSystem, dir: &str) -> Result<Vec<Entry>> {
        let names = fs.read_dir(dir).await?;
        let mut entries = Vec::with_capacity(names.len());

        for name in names {
            if dir.is_empty() && name == MARKER_NAME {
                continue;
            }

            // 用原始名称访问磁盘，条目路径再统一分隔符
            let raw_path = join_relative(dir, &name);
            let path = normalize_path(&raw_path);
            if self.filter.is_excluded(&path) {
                continue;
            }
            let stat = fs.stat(&raw_path).await?;

            let kind = match stat.kind {
                Some(kind) => kind,
                None => {
                    debug!("跳过特殊文件或符号链接: {}", path);
                    continue;
                }
            };

            entries.push(Entry {
                path,
                kind,
                modify_time: stat.modified,
                size: (kind == EntryKind::File).then_some(stat.size),
                mode: stat.mode,
            });
        }

        Ok(entries)
    }
}
