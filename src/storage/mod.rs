pub mod ftp;
pub mod local;

use crate::config::RemoteConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use ftp::{FtpConnection, FtpConnector};
pub use local::LocalStorage;

// ============ 公共常量 ============

/// 时钟探测用的保留文件名，不会出现在任何列表中
pub const MARKER_NAME: &str = ".ftpsync.timefile";

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// 文件系统对象（本地或远程）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// 相对同步根目录的路径（使用 / 分隔，无前导 /）
    pub path: String,
    pub kind: EntryKind,
    /// 最后修改时间（UTC）
    pub modify_time: DateTime<Utc>,
    /// 文件大小，目录为 None
    pub size: Option<u64>,
    /// 原始权限位，不做跨平台转换
    pub mode: Option<u32>,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// 控制连接上的一次回复
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// 1xx
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 最后一行（去掉状态码前缀）
    pub fn text(&self) -> String {
        let last = self.lines.last().map(String::as_str).unwrap_or("");
        let has_code = last
            .as_bytes()
            .get(..3)
            .map_or(false, |code| code.iter().all(u8::is_ascii_digit));
        match last.get(4..) {
            Some(rest) if has_code && !rest.is_empty() => rest.to_string(),
            _ => last.to_string(),
        }
    }
}

/// 远程连接抽象（有状态：命令相对当前目录执行，不能并发使用）
#[async_trait]
pub trait RemoteConnection: Send {
    /// 切换当前目录
    async fn cwd(&mut self, path: &str) -> Result<()>;

    /// 在当前目录写入一个文件
    async fn store(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// 删除当前目录下的文件
    async fn delete(&mut self, name: &str) -> Result<()>;

    /// 发送原始命令并返回回复（FEAT / MLST / MDTM / SIZE 等）
    async fn command(&mut self, cmd: &str) -> Result<Reply>;

    /// 通过数据通道执行命令并按行返回内容（MLSD / NLST）
    async fn retrieve_lines(&mut self, cmd: &str) -> Result<Vec<String>>;

    /// 释放连接
    async fn close(&mut self) -> Result<()>;

    /// 获取连接名称（用于日志）
    fn name(&self) -> &str;
}

/// 打开远程连接
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn RemoteConnection>>;
}

/// 本地文件元数据
#[derive(Debug, Clone)]
pub struct FileStat {
    /// 符号链接及其它特殊文件为 None
    pub kind: Option<EntryKind>,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub mode: Option<u32>,
}

/// 本地文件系统抽象
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// 列出目录下的名称（相对根目录的路径，"" 表示根目录）
    async fn read_dir(&self, path: &str) -> Result<Vec<String>>;

    /// 获取元数据（不跟随符号链接）
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// 是否为目录
    async fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.kind == Some(EntryKind::Directory))
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 拼接相对路径
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 拼接远程绝对路径
pub fn join_remote(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    if relative.is_empty() {
        if root.is_empty() {
            "/".to_string()
        } else {
            root.to_string()
        }
    } else {
        format!("{}/{}", root, relative)
    }
}

/// 规范化路径（去掉首尾的 /）
///
/// 只有本地分隔符是 `\` 的平台才把 `\` 视为分隔符；
/// 其他平台上它是文件名里的普通字符。
pub fn normalize_path(path: &str) -> String {
    let path = if std::path::MAIN_SEPARATOR == '\\' {
        path.replace('\\', "/")
    } else {
        path.to_string()
    };
    path.trim_matches('/').to_string()
}
