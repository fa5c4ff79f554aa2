//! 远程时钟偏移测量
//!
//! 在远程根目录写入一个空标记文件，读回它的修改时间，与本地当前时间比较。

use crate::core::capability::CapabilitySet;
use crate::core::remote_lister::query_modify_time;
use crate::error::{Result, SyncError};
use crate::storage::{RemoteConnection, MARKER_NAME};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// 偏移量的可信度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Confidence {
    Measured,
    /// 无法测量，按零偏移处理
    Low,
}

/// 远程时钟 − 本地时钟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockOffset {
    pub offset: Duration,
    pub confidence: Confidence,
}

impl ClockOffset {
    pub fn measured(offset: Duration) -> Self {
        Self {
            offset,
            confidence: Confidence::Measured,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            offset: Duration::zero(),
            confidence: Confidence::Low,
        }
    }

    pub fn is_low_confidence(&self) -> bool {
        self.confidence == Confidence::Low
    }
}

/// 时钟偏移测量器
pub struct ClockReconciler {
    root: String,
    now: fn() -> DateTime<Utc>,
}

impl ClockReconciler {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            now: Utc::now,
        }
    }

    /// 替换本地时钟
    pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// 测量偏移，失败时退回零偏移（低可信度），不会让会话失败
    pub async fn reconcile(
        &self,
        conn: &mut dyn RemoteConnection,
        caps: &CapabilitySet,
    ) -> ClockOffset {
        match self.measure(conn, caps).await {
            Ok(offset) => {
                info!("远程时钟偏移: {} 秒", offset.num_seconds());
                ClockOffset::measured(offset)
            }
            Err(e) => {
                let e = match e {
                    e @ SyncError::ClockSkewUnavailable(_) => e,
                    other => SyncError::ClockSkewUnavailable(other.to_string()),
                };
                warn!("{}，按零偏移比较（低可信度）", e);
                ClockOffset::unavailable()
            }
        }
    }

    async fn measure(
        &self,
        conn: &mut dyn RemoteConnection,
        caps: &CapabilitySet,
    ) -> Result<Duration> {
        if !caps.modify_time_query {
            return Err(SyncError::ClockSkewUnavailable(
                "服务器不支持 MDTM".to_string(),
            ));
        }

        conn.cwd(&self.root).await?;
        conn.store(MARKER_NAME, &[]).await?;

        // MDTM 只精确到秒
        let local_now = (self.now)();
        let local_now = local_now.with_nanosecond(0).unwrap_or(local_now);

        let remote = query_modify_time(conn, MARKER_NAME).await;

        // 即使 MDTM 失败也要尝试删除标记文件
        if let Err(e) = conn.delete(MARKER_NAME).await {
            warn!("删除时钟标记文件失败: {}", e);
        }

        let remote = remote?;
        debug!("本地时间 {}, 远程标记时间 {}", local_now, remote);
        Ok(remote - local_now)
    }
}
