use crate::error::{Result, SyncError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 扫描过滤配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// 排除规则（glob patterns），两侧列表都会应用
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// 编译后的排除规则
#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
    /// 不含 `/` 的规则只匹配文件名
    basename_only: bool,
}

/// 条目过滤器
///
/// 列表器在遍历时使用：被排除的目录不会被读取，其下条目自然不会出现。
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    patterns: Vec<Pattern>,
}

impl EntryFilter {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let patterns = config
            .exclude_patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| compile_pattern(p.trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 路径本身或任一上级目录命中即排除
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        let mut end = path.len();
        loop {
            let candidate = &path[..end];
            if self.matches(candidate) {
                return true;
            }
            match candidate.rfind('/') {
                Some(idx) => end = idx,
                None => return false,
            }
        }
    }

    fn matches(&self, path: &str) -> bool {
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.patterns.iter().any(|p| {
            let hit = if p.basename_only {
                p.regex.is_match(basename)
            } else {
                p.regex.is_match(path)
            };
            if hit {
                debug!("排除 {} (规则 {})", path, p.source);
            }
            hit
        })
    }

}

/// glob 转正则：`**` 跨目录，`*` 和 `?` 不跨目录，大小写不敏感
fn compile_pattern(pattern: &str) -> Result<Pattern> {
    let trimmed = pattern.trim_matches('/');
    let mut re = String::from("(?i)^");
    let mut chars = trimmed.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // "dir/**" 也匹配 "dir" 本身之下的所有层级
                if chars.peek() == Some(&'/') {
                    chars.next();
                    re.push_str("(?:.*/)?");
                } else {
                    re.push_str(".*");
                }
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');

    let regex = Regex::new(&re)
        .map_err(|e| SyncError::Config(format!("无效的排除规则 '{}': {}", pattern, e)))?;

    Ok(Pattern {
        source: pattern.to_string(),
        regex,
        basename_only: !trimmed.contains('/'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(patterns: &[&str]) -> EntryFilter {
        EntryFilter::new(&ScanConfig {
            exclude_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let f = filter(&[]);
        assert!(f.is_empty());
        assert!(!f.is_excluded("a/b/c.txt"));
    }

    #[test]
    fn test_basename_patterns() {
        let f = filter(&["*.tmp", "Thumbs.db", "~*"]);
        assert!(f.is_excluded("work.tmp"));
        assert!(f.is_excluded("deep/dir/WORK.TMP"));
        assert!(f.is_excluded("photos/thumbs.db"));
        assert!(f.is_excluded("~lock"));
        assert!(!f.is_excluded("notes.txt"));
        assert!(!f.is_excluded("tmp"));
    }

    #[test]
    fn test_directory_excludes_subtree() {
        let f = filter(&["node_modules"]);
        assert!(f.is_excluded("node_modules"));
        assert!(f.is_excluded("web/node_modules/pkg/index.js"));
        assert!(!f.is_excluded("web/src/index.js"));
    }

    #[test]
    fn test_path_patterns() {
        let f = filter(&[".git/**", "build/*.o"]);
        assert!(f.is_excluded(".git/config"));
        assert!(f.is_excluded(".git/objects/ab/cdef"));
        assert!(f.is_excluded("build/main.o"));
        assert!(!f.is_excluded("src/build/main.o"));
        assert!(!f.is_excluded("build/sub/main.o"));
    }

    #[test]
    fn test_question_mark_does_not_cross_directories() {
        let f = filter(&["a?b"]);
        assert!(f.is_excluded("axb"));
        assert!(!f.is_excluded("a/b"));
    }
}
