use crate::config::SyncConfig;
use crate::core::capability;
use crate::core::clock::ClockReconciler;
use crate::core::comparator::{ReconciliationPlan, TreeDiffer};
use crate::core::local_lister::LocalLister;
use crate::core::remote_lister::{count_kinds, ListingStrategy, RemoteLister};
use crate::core::scanner::EntryFilter;
use crate::error::{Result, SyncError};
use crate::storage::{Connector, FileSystem, LocalStorage, RemoteConnection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// 同步会话
///
/// 每次 `run` 打开一条连接，依次完成能力探测、时钟校准、两侧列表和比较，
/// 返回同步计划。会话本身不做任何文件传输。
pub struct SyncSession {
    connector: Arc<dyn Connector>,
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl SyncSession {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            cancelled: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 取消同步
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 取消标志（供信号处理等外部代码使用）
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            info!("同步已取消");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// 执行一次比较，生成同步计划
    ///
    /// 同一会话不能并发运行（标记文件名是固定的）。
    pub async fn run(&self, config: &SyncConfig) -> Result<ReconciliationPlan> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::SessionBusy);
        }

        // 结束时重置运行状态和取消标志
        let running = self.running.clone();
        let cancelled = self.cancelled.clone();
        scopeguard::defer! {
            cancelled.store(false, Ordering::SeqCst);
            running.store(false, Ordering::SeqCst);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("sync", session = %session_id);
        self.run_inner(config).instrument(span).await
    }

    async fn run_inner(&self, config: &SyncConfig) -> Result<ReconciliationPlan> {
        let start = Instant::now();
        info!(
            "开始同步比较: {}:{}{} <-> {}",
            config.remote.host, config.remote.port, config.remote.dir, config.local.dir
        );

        config.validate()?;
        let filter = EntryFilter::new(&config.scan)?;
        let local = LocalStorage::new(&config.local.dir)?;

        self.check_cancelled()?;

        let mut conn = self.connector.connect(&config.remote).await?;
        info!("已连接: {}", conn.name());

        let result = self
            .run_with_connection(conn.as_mut(), &local, &filter, config)
            .await;

        // 无论成功与否都释放连接
        if let Err(e) = conn.close().await {
            warn!("关闭连接失败: {}", e);
        }

        match &result {
            Ok(plan) => {
                let summary = plan.summary();
                info!(
                    "比较完成: 上传 {} ({} 字节), 下载 {} ({} 字节), 新建远程目录 {}, 新建本地目录 {}, 跳过 {}, 冲突 {}, 耗时 {:?}",
                    summary.upload_count,
                    summary.upload_bytes,
                    summary.download_count,
                    summary.download_bytes,
                    summary.create_remote_dir_count,
                    summary.create_local_dir_count,
                    summary.skip_count,
                    summary.conflict_count,
                    start.elapsed()
                );
                if plan.low_confidence {
                    warn!("时钟偏移未能测量，文件时间比较结果可能不准确");
                }
            }
            Err(SyncError::Cancelled) => {}
            Err(e) => warn!("同步比较失败: {}", e),
        }

        result
    }

    async fn run_with_connection(
        &self,
        conn: &mut dyn RemoteConnection,
        local: &dyn FileSystem,
        filter: &EntryFilter,
        config: &SyncConfig,
    ) -> Result<ReconciliationPlan> {
        let caps = capability::probe(conn).await?;
        self.check_cancelled()?;

        // 先确定列表方式，缺少能力时不必在服务器上写标记文件
        let strategy = ListingStrategy::select(&caps)?;

        let offset = ClockReconciler::new(&config.remote.dir)
            .reconcile(conn, &caps)
            .await;
        self.check_cancelled()?;

        // 排除规则在遍历时生效，排除的目录不会被读取
        let remote_lister = RemoteLister::new(strategy, &config.remote.dir)
            .with_filter(filter.clone())
            .with_cancel(self.cancelled.clone());
        let local_lister = LocalLister::new()
            .with_filter(filter.clone())
            .with_cancel(self.cancelled.clone());

        let (remote_entries, local_entries) =
            tokio::join!(remote_lister.list(conn), local_lister.list(local));
        let remote_entries = remote_entries?;
        let local_entries = local_entries?;
        self.check_cancelled()?;

        let (files, dirs) = count_kinds(&remote_entries);
        info!("远程: {} 个文件, {} 个目录", files, dirs);
        let (files, dirs) = count_kinds(&local_entries);
        info!("本地: {} 个文件, {} 个目录", files, dirs);

        let differ = TreeDiffer::new(config.compare.clone());
        Ok(differ.diff(&local_entries, &remote_entries, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalConfig, RemoteConfig};
    use crate::core::comparator::SyncAction;
    use crate::core::testing::{MockConnection, MockConnector};
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    // 2024-01-01 00:00:00 UTC
    const T0: i64 = 1_704_067_200;

    fn config_for(dir: &TempDir) -> SyncConfig {
        SyncConfig {
            remote: RemoteConfig::new("ftp.example.com"),
            local: LocalConfig {
                dir: dir.path().to_str().unwrap().to_string(),
            },
            compare: Default::default(),
            scan: Default::default(),
            log: Default::default(),
        }
    }

    fn session(conn: MockConnection) -> SyncSession {
        SyncSession::new(Arc::new(MockConnector::new(conn)))
    }

    fn actions(plan: &ReconciliationPlan) -> Vec<(&str, SyncAction)> {
        plan.items.iter().map(|i| (i.path.as_str(), i.action)).collect()
    }

    #[tokio::test]
    async fn test_full_pass_produces_plan_and_closes() {
        let tmp = TempDir::new().unwrap();
        let same = tmp.path().join("a.txt");
        std::fs::write(&same, b"abc").unwrap();
        set_file_mtime(&same, FileTime::from_unix_time(T0, 0)).unwrap();
        std::fs::write(tmp.path().join("c.txt"), b"new").unwrap();

        let conn = MockConnection::new()
            .with_features(&["MLSD", "SIZE"])
            .with_mlsd(
                "/",
                &[
                    "type=file;size=3;modify=20240101000000; a.txt",
                    "type=dir;modify=20240101000000; b",
                ],
            )
            .with_mlsd("/b", &[]);
        let closed = conn.closed_handle();
        let sent = conn.sent_handle();

        let plan = session(conn).run(&config_for(&tmp)).await.unwrap();

        assert_eq!(
            actions(&plan),
            vec![
                ("a.txt", SyncAction::Skip),
                ("b", SyncAction::CreateLocalDir),
                ("c.txt", SyncAction::Upload),
            ]
        );
        // 没有 MDTM，无法测量偏移
        assert!(plan.low_confidence);
        assert!(closed.load(Ordering::SeqCst));
        assert!(!sent.lock().unwrap().iter().any(|c| c.starts_with("STOR")));
    }

    #[tokio::test]
    async fn test_clock_offset_is_measured_at_remote_root() {
        let tmp = TempDir::new().unwrap();
        let mut config = config_for(&tmp);
        config.remote.dir = "/site".to_string();

        let conn = MockConnection::new()
            .with_features(&["MLSD", "MDTM"])
            .with_mlsd("/site", &["type=file;size=0;modify=20240101000000; .ftpsync.timefile"])
            .with_reply("/site", "MDTM .ftpsync.timefile", 213, &["213 20240101000000"]);
        let sent = conn.sent_handle();

        let plan = session(conn).run(&config).await.unwrap();

        // 标记文件不会出现在计划中
        assert!(plan.is_empty());
        assert!(!plan.low_confidence);
        let sent = sent.lock().unwrap().clone();
        assert_eq!(
            &sent[..5],
            &["FEAT", "CWD /site", "STOR .ftpsync.timefile", "MDTM .ftpsync.timefile", "DELE .ftpsync.timefile"]
        );
        assert_eq!(sent.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn test_capability_failure_closes_without_listing() {
        let tmp = TempDir::new().unwrap();
        let conn = MockConnection::new().with_features(&["MDTM", "SIZE"]);
        let sent = conn.sent_handle();
        let closed = conn.closed_handle();

        let err = session(conn).run(&config_for(&tmp)).await.unwrap_err();

        assert!(matches!(err, SyncError::Capability(_)));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(*sent.lock().unwrap(), vec!["FEAT", "QUIT"]);
    }

    #[tokio::test]
    async fn test_listing_failure_returns_no_plan() {
        let tmp = TempDir::new().unwrap();
        let conn = MockConnection::new()
            .with_features(&["MLSD"])
            .with_mlsd("/", &["type=dir;modify=20240101000000; locked"])
            .with_dir("/locked");
        let closed = conn.closed_handle();

        let err = session(conn).run(&config_for(&tmp)).await.unwrap_err();

        assert!(matches!(err, SyncError::Listing { ref path, .. } if path == "/locked"));
        assert!(err.is_retryable());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_exclude_patterns_apply_to_both_sides() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("debug.log"), b"x").unwrap();
        let mut config = config_for(&tmp);
        config.scan.exclude_patterns = vec!["*.log".to_string(), "cache".to_string()];

        let conn = MockConnection::new()
            .with_features(&["MLSD"])
            .with_mlsd(
                "/",
                &[
                    "type=dir;modify=20240101000000; cache",
                    "type=file;size=1;modify=20240101000000; keep.txt",
                ],
            )
            .with_mlsd("/cache", &["type=file;size=1;modify=20240101000000; x.bin"]);

        let plan = session(conn).run(&config).await.unwrap();
        assert_eq!(actions(&plan), vec![("keep.txt", SyncAction::Download)]);
    }

    #[tokio::test]
    async fn test_excluded_unreadable_directory_does_not_fail() {
        let tmp = TempDir::new().unwrap();
        let mut config = config_for(&tmp);
        config.scan.exclude_patterns = vec!["private".to_string()];

        let conn = MockConnection::new()
            .with_features(&["MLSD"])
            .with_mlsd(
                "/",
                &[
                    "type=dir;modify=20240101000000; private",
                    "type=file;size=1;modify=20240101000000; z.txt",
                ],
            )
            .with_dir("/private");
        let sent = conn.sent_handle();

        let plan = session(conn).run(&config).await.unwrap();

        assert_eq!(actions(&plan), vec![("z.txt", SyncAction::Download)]);
        assert!(!sent.lock().unwrap().iter().any(|c| c == "CWD /private"));
    }

    /// 会话的取消标志在连接收到 `trigger` 后被置位
    fn session_cancelled_after(conn: MockConnection, trigger: &str) -> SyncSession {
        let cancelled = Arc::new(AtomicBool::new(false));
        let conn = conn.cancel_after(trigger, cancelled.clone());
        SyncSession {
            connector: Arc::new(MockConnector::new(conn)),
            cancelled,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_cancel_after_connect_still_closes() {
        let tmp = TempDir::new().unwrap();
        let conn = MockConnection::new().with_features(&["MLSD"]).with_mlsd("/", &[]);
        let sent = conn.sent_handle();
        let closed = conn.closed_handle();

        let session = session_cancelled_after(conn, "FEAT");
        let err = session.run(&config_for(&tmp)).await.unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(*sent.lock().unwrap(), vec!["FEAT", "QUIT"]);
        assert!(!session.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_during_listing_still_closes() {
        let tmp = TempDir::new().unwrap();
        let conn = MockConnection::new()
            .with_features(&["MLSD"])
            .with_mlsd("/", &["type=dir;modify=20240101000000; b"])
            .with_mlsd("/b", &[]);
        let sent = conn.sent_handle();
        let closed = conn.closed_handle();

        let session = session_cancelled_after(conn, "MLSD");
        let err = session.run(&config_for(&tmp)).await.unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(closed.load(Ordering::SeqCst));
        let sent = sent.lock().unwrap().clone();
        // 子目录 b 没有被读取
        assert!(!sent.iter().any(|c| c == "CWD /b"));
        assert_eq!(sent.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let tmp = TempDir::new().unwrap();
        let conn = MockConnection::new().with_features(&["MLSD"]);
        let sent = conn.sent_handle();

        let session = session(conn);
        session.cancel();
        let err = session.run(&config_for(&tmp)).await.unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(sent.lock().unwrap().is_empty());
        // 运行结束后取消标志被重置
        assert!(!session.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let session = session(MockConnection::new());
        session.running.store(true, Ordering::SeqCst);

        let err = session.run(&config_for(&tmp)).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionBusy));
        // 被拒绝的调用不会清除正在运行的状态
        assert!(session.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_connect() {
        let tmp = TempDir::new().unwrap();
        let mut config = config_for(&tmp);
        config.remote.host = String::new();

        let conn = MockConnection::new();
        let sent = conn.sent_handle();
        let err = session(conn).run(&config).await.unwrap_err();

        assert!(matches!(err, SyncError::Config(_)));
        assert!(sent.lock().unwrap().is_empty());
    }
}
