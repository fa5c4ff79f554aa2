//! 同步错误类型

use thiserror::Error;

/// 同步引擎错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 服务器缺少必要的列表能力（不会退回到解析 LIST 文本）
    #[error("服务器不支持结构化列表: {0}")]
    Capability(String),

    /// 命令被服务器拒绝或控制连接异常
    #[error("协议错误 [{command}]{}: {message}", code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    Protocol {
        command: String,
        code: Option<u16>,
        message: String,
    },

    /// 命令超时
    #[error("命令超时: {command}")]
    Timeout { command: String },

    /// 某个目录无法列出，整个列表被放弃
    #[error("列出目录失败: {path}: {source}")]
    Listing {
        path: String,
        #[source]
        source: Box<SyncError>,
    },

    /// 无法测量时钟偏移（非致命）
    #[error("无法获取远程时钟: {0}")]
    ClockSkewUnavailable(String),

    #[error("操作已取消")]
    Cancelled,

    #[error("同步会话正在运行")]
    SessionBusy,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn protocol(command: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Protocol {
            command: command.into(),
            code: None,
            message: message.into(),
        }
    }

    /// 服务器回复了非成功状态码
    pub fn rejected(command: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        SyncError::Protocol {
            command: command.into(),
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn listing(path: impl Into<String>, source: SyncError) -> Self {
        SyncError::Listing {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// 调用方可以重试整个会话
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Listing { .. } | SyncError::Timeout { .. })
    }
}
