//! 同步配置模块

use crate::core::comparator::CompareConfig;
use crate::core::scanner::ScanConfig;
use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 时间容差上限（1 天）
pub const MAX_TIME_TOLERANCE_SECS: i64 = 86_400;

/// 数据通道模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassiveMode {
    /// PASV（IPv4）
    Passive,
    /// EPSV（RFC 2428）
    ExtendedPassive,
}

/// 远程服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// 远程同步根目录
    #[serde(default = "default_remote_dir")]
    pub dir: String,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// 单条命令超时（秒）
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_passive_mode")]
    pub passive_mode: PassiveMode,
}

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

fn default_remote_dir() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    60
}

fn default_passive_mode() -> PassiveMode {
    PassiveMode::Passive
}

impl RemoteConfig {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            dir: default_remote_dir(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            passive_mode: default_passive_mode(),
        }
    }
}

/// 本地目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    pub dir: String,
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    #[serde(default)]
    pub compare: CompareConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl SyncConfig {
    /// 从 JSON 配置文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("无法读取配置文件 {:?}: {}", path, e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("配置文件格式错误: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(SyncError::Config("远程主机不能为空".to_string()));
        }
        if self.local.dir.trim().is_empty() {
            return Err(SyncError::Config("本地目录不能为空".to_string()));
        }
        if self.remote.command_timeout_secs == 0 || self.remote.connect_timeout_secs == 0 {
            return Err(SyncError::Config("超时时间必须大于 0".to_string()));
        }
        if self.compare.time_tolerance_seconds < 0 {
            return Err(SyncError::Config("时间容差不能为负数".to_string()));
        }
        if self.compare.time_tolerance_seconds > MAX_TIME_TOLERANCE_SECS {
            return Err(SyncError::Config(format!(
                "时间容差不能超过 {} 秒",
                MAX_TIME_TOLERANCE_SECS
            )));
        }
        Ok(())
    }
}
