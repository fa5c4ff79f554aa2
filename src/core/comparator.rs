use crate::core::clock::{ClockOffset, Confidence};
use crate::storage::{normalize_path, Entry, EntryKind};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 同步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncAction {
    /// 上传文件到远程
    Upload,
    /// 下载文件到本地
    Download,
    /// 在远程创建目录
    CreateRemoteDir,
    /// 在本地创建目录
    CreateLocalDir,
    /// 跳过（两边一致）
    Skip,
    /// 冲突（一边是文件一边是目录，需要用户决定）
    Conflict,
}

impl SyncAction {
    pub fn direction(&self) -> Direction {
        match self {
            SyncAction::Upload | SyncAction::CreateRemoteDir => Direction::LocalToRemote,
            SyncAction::Download | SyncAction::CreateLocalDir => Direction::RemoteToLocal,
            SyncAction::Skip | SyncAction::Conflict => Direction::None,
        }
    }

    /// 是否需要执行器做事
    pub fn is_actionable(&self) -> bool {
        !matches!(self, SyncAction::Skip)
    }
}

/// 数据流向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
    None,
}

/// 计划中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub path: String,
    pub action: SyncAction,
    pub direction: Direction,
    /// 需要传输的字节数（目录为 None）
    pub size: Option<u64>,
    /// 文件时间比较所依据的时钟偏移可信度
    pub confidence: Confidence,
}

/// 同步计划，执行器必须按顺序应用
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationPlan {
    pub items: Vec<PlanItem>,
    /// 计算时使用的时钟偏移（远程 − 本地）
    pub clock_offset_secs: i64,
    /// 偏移量无法测量时为 true
    pub low_confidence: bool,
}

impl ReconciliationPlan {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 去掉 Skip 后的动作
    pub fn actionable(&self) -> impl Iterator<Item = &PlanItem> {
        self.items.iter().filter(|i| i.action.is_actionable())
    }

    pub fn summary(&self) -> ActionSummary {
        summarize_actions(&self.items)
    }
}

/// 文件比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    /// 在容差内视为相同
    Equal,
    /// 本地文件更新
    LocalNewer,
    /// 远程文件更新
    RemoteNewer,
}

/// 比较配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareConfig {
    /// 时间容差（秒，含边界）
    #[serde(default = "default_time_tolerance")]
    pub time_tolerance_seconds: i64,
}

fn default_time_tolerance() -> i64 {
    2
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: default_time_tolerance(),
        }
    }
}

/// 目录树比较器（纯函数，不做任何 I/O）
#[derive(Default)]
pub struct TreeDiffer {
    config: CompareConfig,
}

impl TreeDiffer {
    pub fn new(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 比较两个文件，远程时间先换算到本地时钟
    pub fn compare_files(&self, local: &Entry, remote: &Entry, offset: &ClockOffset) -> FileRelation {
        let remote_time = remote.modify_time - offset.offset;
        let diff = local.modify_time - remote_time;

        // 超出 Duration 范围的容差视为无限大
        let tolerance = Duration::try_seconds(self.config.time_tolerance_seconds)
            .unwrap_or_else(Duration::max_value);
        if diff.abs() <= tolerance {
            return FileRelation::Equal;
        }

        tracing::debug!(
            "文件时间不同: {} (local={}, remote={}, diff={}s)",
            local.path,
            local.modify_time,
            remote_time,
            diff.num_seconds()
        );

        if diff > Duration::zero() {
            FileRelation::LocalNewer
        } else {
            FileRelation::RemoteNewer
        }
    }

    /// 合并两边的列表，生成同步计划
    ///
    /// 按路径字符串的字典序输出，父目录总是排在其子项之前。
    pub fn diff(&self, local: &[Entry], remote: &[Entry], offset: ClockOffset) -> ReconciliationPlan {
        let local_map: BTreeMap<String, &Entry> =
            local.iter().map(|e| (normalize_path(&e.path), e)).collect();
        let remote_map: BTreeMap<String, &Entry> =
            remote.iter().map(|e| (normalize_path(&e.path), e)).collect();

        let all_paths: BTreeSet<&String> = local_map.keys().chain(remote_map.keys()).collect();

        let mut items = Vec::with_capacity(all_paths.len());
        // 类型冲突的路径，其下所有条目同样是冲突
        let mut conflicts: BTreeSet<&str> = BTreeSet::new();
        for path in all_paths {
            if has_conflicting_ancestor(path, &conflicts) {
                items.push(PlanItem {
                    path: path.clone(),
                    action: SyncAction::Conflict,
                    direction: Direction::None,
                    size: None,
                    confidence: offset.confidence,
                });
                continue;
            }

            let (action, size) = match (local_map.get(path), remote_map.get(path)) {
                // 只有本地有
                (Some(l), None) => match l.kind {
                    EntryKind::File => (SyncAction::Upload, l.size),
                    EntryKind::Directory => (SyncAction::CreateRemoteDir, None),
                },

                // 只有远程有
                (None, Some(r)) => match r.kind {
                    EntryKind::File => (SyncAction::Download, r.size),
                    EntryKind::Directory => (SyncAction::CreateLocalDir, None),
                },

                // 两边都有
                (Some(l), Some(r)) => match (l.kind, r.kind) {
                    (EntryKind::Directory, EntryKind::Directory) => (SyncAction::Skip, None),
                    (EntryKind::File, EntryKind::File) => match self.compare_files(l, r, &offset) {
                        FileRelation::Equal => (SyncAction::Skip, l.size),
                        FileRelation::LocalNewer => (SyncAction::Upload, l.size),
                        FileRelation::RemoteNewer => (SyncAction::Download, r.size),
                    },
                    _ => {
                        tracing::warn!("类型冲突: {} (local={:?}, remote={:?})", path, l.kind, r.kind);
                        (SyncAction::Conflict, None)
                    }
                },

                (None, None) => continue,
            };
            if action == SyncAction::Conflict {
                conflicts.insert(path.as_str());
            }

            items.push(PlanItem {
                path: path.clone(),
                action,
                direction: action.direction(),
                size,
                confidence: offset.confidence,
            });
        }

        ReconciliationPlan {
            items,
            clock_offset_secs: offset.offset.num_seconds(),
            low_confidence: offset.is_low_confidence(),
        }
    }
}

fn has_conflicting_ancestor(path: &str, conflicts: &BTreeSet<&str>) -> bool {
    if conflicts.is_empty() {
        return false;
    }
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        if conflicts.contains(current) {
            return true;
        }
    }
    false
}

/// 使用默认配置比较
pub fn diff(local: &[Entry], remote: &[Entry], offset: ClockOffset) -> ReconciliationPlan {
    TreeDiffer::default().diff(local, remote, offset)
}

/// 统计同步动作
pub fn summarize_actions(items: &[PlanItem]) -> ActionSummary {
    let mut summary = ActionSummary::default();

    for item in items {
        let size = item.size.unwrap_or(0);
        match item.action {
            SyncAction::Upload => {
                summary.upload_count += 1;
                summary.upload_bytes += size;
            }
            SyncAction::Download => {
                summary.download_count += 1;
                summary.download_bytes += size;
            }
            SyncAction::CreateRemoteDir => summary.create_remote_dir_count += 1,
            SyncAction::CreateLocalDir => summary.create_local_dir_count += 1,
            SyncAction::Skip => summary.skip_count += 1,
            SyncAction::Conflict => summary.conflict_count += 1,
        }
    }

    summary
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub upload_count: usize,
    pub upload_bytes: u64,
    pub download_count: usize,
    pub download_bytes: u64,
    pub create_remote_dir_count: usize,
    pub create_local_dir_count: usize,
    pub skip_count: usize,
    pub conflict_count: usize,
}

impl ActionSummary {
    pub fn total_items(&self) -> usize {
        self.upload_count
            + self.download_count
            + self.create_remote_dir_count
            + self.create_local_dir_count
            + self.skip_count
            + self.conflict_count
    }

    pub fn total_transfer_bytes(&self) -> u64 {
        self.upload_bytes + self.download_bytes
    }
}
