//! 测试用的脚本化远程连接

use crate::config::RemoteConfig;
use crate::error::{Result, SyncError};
use crate::storage::{Connector, RemoteConnection, Reply};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 内存中的 FTP 服务器
///
/// 回复按 (当前目录, 命令) 查找，目录为 `*` 的回复在任何目录下都生效。
#[derive(Default)]
pub struct MockConnection {
    current: String,
    dirs: HashSet<String>,
    listings: HashMap<(String, String), Vec<String>>,
    replies: HashMap<(String, String), Reply>,
    store_error: Option<u16>,
    /// 在这些 (目录, 命令) 上 retrieve_lines 超时
    stalled: HashSet<(String, String)>,
    /// 记录到该命令时置位的取消标志
    cancel_on: Option<(String, Arc<AtomicBool>)>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn new() -> Self {
        let mut conn = Self {
            current: "/".to_string(),
            ..Default::default()
        };
        conn.dirs.insert("/".to_string());
        conn
    }

    /// FEAT 回复
    pub fn with_features(self, features: &[&str]) -> Self {
        let mut lines = vec!["211-Features:".to_string()];
        lines.extend(features.iter().map(|f| format!(" {}", f)));
        lines.push("211 End".to_string());
        self.with_reply_lines("*", "FEAT", 211, lines)
    }

    /// 目录及其 MLSD 内容
    pub fn with_mlsd(mut self, dir: &str, lines: &[&str]) -> Self {
        self.dirs.insert(dir.to_string());
        self.listings.insert(
            (dir.to_string(), "MLSD".to_string()),
            lines.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// 目录及其 NLST 内容
    pub fn with_nlst(mut self, dir: &str, names: &[&str]) -> Self {
        self.dirs.insert(dir.to_string());
        self.listings.insert(
            (dir.to_string(), "NLST".to_string()),
            names.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// 可以进入但不能列出的目录
    pub fn with_dir(mut self, dir: &str) -> Self {
        self.dirs.insert(dir.to_string());
        self
    }

    pub fn with_reply(self, dir: &str, cmd: &str, code: u16, lines: &[&str]) -> Self {
        let lines = lines.iter().map(|s| s.to_string()).collect();
        self.with_reply_lines(dir, cmd, code, lines)
    }

    fn with_reply_lines(mut self, dir: &str, cmd: &str, code: u16, lines: Vec<String>) -> Self {
        self.replies
            .insert((dir.to_string(), cmd.to_string()), Reply::new(code, lines));
        self
    }

    /// STOR 返回指定错误码
    pub fn with_store_error(mut self, code: u16) -> Self {
        self.store_error = Some(code);
        self
    }

    /// 在目录下执行列表命令时超时
    pub fn with_listing_timeout(mut self, dir: &str, cmd: &str) -> Self {
        self.dirs.insert(dir.to_string());
        self.stalled.insert((dir.to_string(), cmd.to_string()));
        self
    }

    /// 收到 `cmd` 后置位取消标志，模拟会话中途被取消
    pub fn cancel_after(mut self, cmd: &str, flag: Arc<AtomicBool>) -> Self {
        self.cancel_on = Some((cmd.to_string(), flag));
        self
    }

    /// 已发送的命令
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }

    pub fn closed_handle(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    fn record(&self, cmd: &str) {
        self.sent.lock().unwrap().push(cmd.to_string());
        if let Some((trigger, flag)) = &self.cancel_on {
            if trigger == cmd {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn cwd(&mut self, path: &str) -> Result<()> {
        let cmd = format!("CWD {}", path);
        self.record(&cmd);
        if self.dirs.contains(path) {
            self.current = path.to_string();
            Ok(())
        } else {
            Err(SyncError::rejected(cmd, 550, "No such directory"))
        }
    }

    async fn store(&mut self, name: &str, _data: &[u8]) -> Result<()> {
        let cmd = format!("STOR {}", name);
        self.record(&cmd);
        match self.store_error {
            Some(code) => Err(SyncError::rejected(cmd, code, "Permission denied")),
            None => Ok(()),
        }
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        self.record(&format!("DELE {}", name));
        Ok(())
    }

    async fn command(&mut self, cmd: &str) -> Result<Reply> {
        self.record(cmd);
        let reply = self
            .replies
            .get(&(self.current.clone(), cmd.to_string()))
            .or_else(|| self.replies.get(&("*".to_string(), cmd.to_string())))
            .cloned()
            .unwrap_or_else(|| Reply::new(502, vec!["502 Command not implemented".to_string()]));
        Ok(reply)
    }

    async fn retrieve_lines(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.record(cmd);
        if self.stalled.contains(&(self.current.clone(), cmd.to_string())) {
            return Err(SyncError::Timeout {
                command: cmd.to_string(),
            });
        }
        self.listings
            .get(&(self.current.clone(), cmd.to_string()))
            .cloned()
            .ok_or_else(|| SyncError::rejected(cmd, 550, "Permission denied"))
    }

    async fn close(&mut self) -> Result<()> {
        self.record("QUIT");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 交出预先构造好的连接，只能连接一次
pub struct MockConnector {
    conn: Mutex<Option<MockConnection>>,
}

impl MockConnector {
    pub fn new(conn: MockConnection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &RemoteConfig) -> Result<Box<dyn RemoteConnection>> {
        let conn = self
            .conn
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SyncError::protocol("connect", "MockConnector 只能连接一次"))?;
        Ok(Box::new(conn))
    }
}
