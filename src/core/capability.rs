//! 服务器能力探测（RFC 2389 FEAT）

use crate::error::{Result, SyncError};
use crate::storage::RemoteConnection;
use serde::Serialize;
use tracing::{debug, info};

/// 会话内固定不变的服务器能力
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    /// MLSD
    pub structured_listing: bool,
    /// MLST
    pub single_entry_stat: bool,
    /// MDTM
    pub modify_time_query: bool,
    /// SIZE
    pub size_query: bool,
    /// 原始特性行（用于诊断）
    pub raw_features: Vec<String>,
}

/// 发送 FEAT 并解析能力
///
/// 命令被拒绝或连接出错都是致命的；无法识别的特性行直接忽略。
pub async fn probe(conn: &mut dyn RemoteConnection) -> Result<CapabilitySet> {
    let reply = match conn.command("FEAT").await {
        Ok(r) => r,
        Err(e @ SyncError::Protocol { .. }) => return Err(e),
        Err(e) => return Err(SyncError::protocol("FEAT", e.to_string())),
    };

    if !reply.is_success() {
        return Err(SyncError::rejected("FEAT", reply.code, reply.text()));
    }

    let caps = parse_features(&reply.lines);
    info!(
        "服务器能力: MLSD={}, MLST={}, MDTM={}, SIZE={}",
        caps.structured_listing, caps.single_entry_stat, caps.modify_time_query, caps.size_query
    );
    Ok(caps)
}

/// 解析 FEAT 回复
///
/// ```text
/// 211-Features:
///  MLST type*;size*;modify*;
///  MDTM
/// 211 End
/// ```
pub fn parse_features(lines: &[String]) -> CapabilitySet {
    let mut caps = CapabilitySet::default();

    for line in lines {
        // 带状态码的首尾行不是特性
        if line.len() >= 3 && line.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
            continue;
        }

        let feature = line.trim();
        let token = match feature.split_whitespace().next() {
            Some(t) => t.to_ascii_uppercase(),
            None => continue,
        };

        match token.as_str() {
            "MLSD" => caps.structured_listing = true,
            "MLST" => caps.single_entry_stat = true,
            "MDTM" => caps.modify_time_query = true,
            "SIZE" => caps.size_query = true,
            _ => debug!("忽略特性: {}", feature),
        }
        caps.raw_features.push(feature.to_string());
    }

    caps
}
