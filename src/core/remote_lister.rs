//! 远程目录递归列表

use crate::core::capability::CapabilitySet;
use crate::core::facts::{self, FactLine};
use crate::core::scanner::EntryFilter;
use crate::error::{Result, SyncError};
use crate::storage::{join_relative, join_remote, Entry, EntryKind, RemoteConnection, MARKER_NAME};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 列表策略，每个会话根据能力选择一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStrategy {
    /// 每个目录一次 MLSD
    Structured,
    /// NLST 取名称后逐个 MLST（每个条目一次往返）
    SingleEntry {
        /// 事实缺少 size 时用 SIZE 补齐
        size_query: bool,
        /// 事实缺少 modify 时用 MDTM 补齐
        modify_time_query: bool,
    },
}

impl ListingStrategy {
    /// 不会退回到解析 LIST 输出
    pub fn select(caps: &CapabilitySet) -> Result<Self> {
        if caps.structured_listing {
            Ok(ListingStrategy::Structured)
        } else if caps.single_entry_stat {
            Ok(ListingStrategy::SingleEntry {
                size_query: caps.size_query,
                modify_time_query: caps.modify_time_query,
            })
        } else {
            Err(SyncError::Capability(
                "服务器既不支持 MLSD 也不支持 MLST".to_string(),
            ))
        }
    }
}

/// 远程目录列表器
pub struct RemoteLister {
    strategy: ListingStrategy,
    root: String,
    filter: EntryFilter,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl RemoteLister {
    pub fn new(strategy: ListingStrategy, root: &str) -> Self {
        Self {
            strategy,
            root: root.to_string(),
            filter: EntryFilter::default(),
            cancel_flag: None,
        }
    }

    /// 根据能力选择策略后创建
    pub fn from_capabilities(caps: &CapabilitySet, root: &str) -> Result<Self> {
        Ok(Self::new(ListingStrategy::select(caps)?, root))
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

    /// 深度优先（先序）列出整个远程树
    ///
    /// 任一目录失败都会放弃整个列表，不返回部分结果。
    pub async fn list(&self, conn: &mut dyn RemoteConnection) -> Result<Vec<Entry>> {
        info!("开始扫描远程目录: {} ({:?})", self.root, self.strategy);

        let mut entries = Vec::new();
        let mut stack = vec![self.fetch(conn, "").await?.into_iter()];

        while let Some(children) = stack.last_mut() {
            match children.next() {
                Some(entry) => {
                    let subdir = entry.is_dir().then(|| entry.path.clone());
                    entries.push(entry);
                    if let Some(dir) = subdir {
                        stack.push(self.fetch(conn, &dir).await?.into_iter());
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }

        info!("远程扫描完成: {} 个条目", entries.len());
        Ok(entries)
    }

    /// 读取一个目录的直接子项
    async fn fetch(&self, conn: &mut dyn RemoteConnection, dir: &str) -> Result<Vec<Entry>> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let remote_dir = join_remote(&self.root, dir);
        debug!("读取远程目录: {}", remote_dir);

        let result = match self.strategy {
            ListingStrategy::Structured => self.fetch_structured(conn, &remote_dir, dir).await,
            ListingStrategy::SingleEntry {
                size_query,
                modify_time_query,
            } => {
                self.fetch_single_entry(conn, &remote_dir, dir, size_query, modify_time_query)
                    .await
            }
        };

        result.map_err(|e| SyncError::listing(remote_dir, e))
    }

    async fn fetch_structured(
        &self,
        conn: &mut dyn RemoteConnection,
        remote_dir: &str,
        dir: &str,
    ) -> Result<Vec<Entry>> {
        conn.cwd(remote_dir).await?;
        let lines = conn.retrieve_lines("MLSD").await?;

        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            let facts = facts::parse_fact_line(&line)?;
            if let Some(entry) = self.accept(&facts, dir)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn fetch_single_entry(
        &self,
        conn: &mut dyn RemoteConnection,
        remote_dir: &str,
        dir: &str,
        size_query: bool,
        modify_time_query: bool,
    ) -> Result<Vec<Entry>> {
        conn.cwd(remote_dir).await?;
        let names = conn.retrieve_lines("NLST").await?;

        let mut entries = Vec::with_capacity(names.len());
        for raw in names {
            // 部分服务器返回带目录前缀的名称
            let name = raw.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string();
            if name.is_empty() || name == "." || name == ".." {
                continue;
            }
            // 排除的条目不再发 MLST
            if self.filter.is_excluded(&join_relative(dir, &name)) {
                continue;
            }

            let mut facts = stat_entry(conn, &name).await?;
            facts.name = name.clone();

            let is_file = facts
                .get("type")
                .map(|t| t.eq_ignore_ascii_case("file"))
                .unwrap_or(false);
            if is_file && facts.get("size").is_none() && size_query {
                let size = query_size(conn, &name).await?;
                facts.facts.insert("size".to_string(), size.to_string());
            }
            if facts.get("modify").is_none() && modify_time_query {
                let time = query_modify_time(conn, &name).await?;
                facts
                    .facts
                    .insert("modify".to_string(), time.format("%Y%m%d%H%M%S").to_string());
            }

            if let Some(entry) = self.accept(&facts, dir)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// 转换为条目，过滤时钟标记文件和排除的条目
    fn accept(&self, facts: &FactLine, dir: &str) -> Result<Option<Entry>> {
        if dir.is_empty() && facts.name == MARKER_NAME {
            return Ok(None);
        }
        if self.filter.is_excluded(&join_relative(dir, &facts.name)) {
            return Ok(None);
        }
        facts::to_entry(facts, dir)
    }
}

/// MLST：事实行在控制连接的多行回复中
///
/// ```text
/// 250-Listing a.txt
///  type=file;size=12;modify=20240101000000; /srv/a.txt
/// 250 End
/// ```
async fn stat_entry(conn: &mut dyn RemoteConnection, name: &str) -> Result<FactLine> {
    let cmd = format!("MLST {}", name);
    let reply = conn.command(&cmd).await?;
    if !reply.is_success() {
        return Err(SyncError::rejected(cmd, reply.code, reply.text()));
    }

    let line = reply
        .lines
        .iter()
        .filter(|l| !l.as_bytes().get(..3).map_or(false, |c| c.iter().all(u8::is_ascii_digit)))
        .find(|l| l.contains('='))
        .ok_or_else(|| SyncError::protocol(cmd.as_str(), "回复中没有事实行"))?;

    facts::parse_fact_line(line.trim_start())
}

/// SIZE
async fn query_size(conn: &mut dyn RemoteConnection, name: &str) -> Result<u64> {
    let cmd = format!("SIZE {}", name);
    let reply = conn.command(&cmd).await?;
    if !reply.is_success() {
        return Err(SyncError::rejected(cmd, reply.code, reply.text()));
    }
    reply
        .text()
        .trim()
        .parse::<u64>()
        .map_err(|_| SyncError::protocol(cmd, format!("无法解析大小: {}", reply.text())))
}

/// MDTM
pub(crate) async fn query_modify_time(
    conn: &mut dyn RemoteConnection,
    name: &str,
) -> Result<DateTime<Utc>> {
    let cmd = format!("MDTM {}", name);
    let reply = conn.command(&cmd).await?;
    if !reply.is_success() {
        return Err(SyncError::rejected(cmd, reply.code, reply.text()));
    }
    facts::parse_timestamp(&reply.text())
}

/// 按类型统计
pub fn count_kinds(entries: &[Entry]) -> (usize, usize) {
    let dirs = entries.iter().filter(|e| e.kind == EntryKind::Directory).count();
    (entries.len() - dirs, dirs)
}
