pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{LocalConfig, PassiveMode, RemoteConfig, SyncConfig};
pub use core::{
    ActionSummary, CapabilitySet, ClockOffset, Confidence, Direction, PlanItem,
    ReconciliationPlan, SyncAction, SyncSession,
};
pub use error::{Result, SyncError};
pub use storage::{Entry, EntryKind, FtpConnector};

// 用户目录（不引入 dirs 依赖）
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
