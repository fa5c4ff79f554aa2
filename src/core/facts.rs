//! MLSD / MLST 事实行解析（RFC 3659）
//!
//! `type=file;size=1024;modify=20260101120000;unix.mode=0644; name.txt`

use crate::error::{Result, SyncError};
use crate::storage::{join_relative, Entry, EntryKind};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use tracing::debug;

/// 解析后的事实行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactLine {
    pub name: String,
    /// 键统一为小写
    pub facts: HashMap<String, String>,
}

impl FactLine {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }
}

/// 拆分事实段和文件名段
pub fn parse_fact_line(line: &str) -> Result<FactLine> {
    // 事实段不含空格，第一个空格之后全部是文件名
    let (facts_str, name) = line
        .split_once(' ')
        .ok_or_else(|| SyncError::protocol("parse facts", format!("缺少文件名: '{}'", line)))?;

    if name.is_empty() {
        return Err(SyncError::protocol("parse facts", format!("文件名为空: '{}'", line)));
    }

    let mut facts = HashMap::new();
    for segment in facts_str.split(';').filter(|s| !s.is_empty()) {
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            SyncError::protocol("parse facts", format!("无效的事实 '{}': '{}'", segment, line))
        })?;
        facts.insert(key.to_ascii_lowercase(), value.to_string());
    }

    Ok(FactLine {
        name: name.to_string(),
        facts,
    })
}

/// 解析 `YYYYMMDDHHMMSS[.sss]`（UTC）
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let invalid = || SyncError::protocol("parse time", format!("无效的时间: '{}'", value));

    let value = value.trim();
    if value.len() < 14 || !value.as_bytes()[..14].iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    let naive = NaiveDateTime::parse_from_str(&value[..14], "%Y%m%d%H%M%S").map_err(|_| invalid())?;
    let mut time = Utc.from_utc_datetime(&naive);

    let rest = &value[14..];
    if let Some(fraction) = rest.strip_prefix('.') {
        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // 只保留到纳秒
        let digits: String = fraction.chars().take(9).collect();
        let nanos = digits.parse::<i64>().map_err(|_| invalid())? * 10_i64.pow(9 - digits.len() as u32);
        time += Duration::nanoseconds(nanos);
    } else if !rest.is_empty() {
        return Err(invalid());
    }

    Ok(time)
}

/// 把事实行转换为条目
///
/// 当前目录、父目录和非文件/目录类型返回 `None`。
pub fn to_entry(line: &FactLine, dir: &str) -> Result<Option<Entry>> {
    if line.name == "." || line.name == ".." {
        return Ok(None);
    }

    let typ = line
        .get("type")
        .ok_or_else(|| SyncError::protocol("parse facts", format!("缺少 type: {}", line.name)))?
        .to_ascii_lowercase();

    let kind = match typ.as_str() {
        "file" => EntryKind::File,
        "dir" => EntryKind::Directory,
        "cdir" | "pdir" => return Ok(None),
        other => {
            debug!("跳过条目 {} (type={})", line.name, other);
            return Ok(None);
        }
    };

    let modify = line
        .get("modify")
        .ok_or_else(|| SyncError::protocol("parse facts", format!("缺少 modify: {}", line.name)))?;

    let size = match kind {
        EntryKind::File => line.get("size").and_then(|v| v.parse::<u64>().ok()),
        EntryKind::Directory => None,
    };

    Ok(Some(Entry {
        path: join_relative(dir, &line.name),
        kind,
        modify_time: parse_timestamp(modify)?,
        size,
        mode: line
            .get("unix.mode")
            .and_then(|v| u32::from_str_radix(v, 8).ok()),
    }))
}
