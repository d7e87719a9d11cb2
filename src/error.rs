use thiserror::Error;

/// Failure kinds surfaced by the resolution engine.
///
/// Skipped files are not errors; they come back as a `Suggestion` with
/// `skipped` set.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Title was empty or malformed after parsing; the caller should ask for manual input.
    #[error("无法从文件名中提取有效标题: {0}")]
    Validation(String),

    #[error(
        "未找到匹配 '{query}'{} 的条目，可能原因：\n1. 标题提取不准确\n2. 数据库未收录该条目\n3. 需要使用原始语言名称搜索",
        season.map(|s| format!(" (第 {s} 季)")).unwrap_or_default()
    )]
    NotFound { query: String, season: Option<u32> },

    #[error("第 {episode} 集超出第 {season} 季范围 (共 {episode_count} 集)")]
    OutOfRange {
        episode: u32,
        season: u32,
        episode_count: usize,
    },

    #[error("上游服务错误: {0}")]
    Upstream(String),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("操作已取消")]
    Cancelled,
}

impl ResolveError {
    pub fn not_found(query: impl Into<String>, season: Option<u32>) -> Self {
        Self::NotFound {
            query: query.into(),
            season,
        }
    }

    /// Copy for recording the same failure against several files.
    /// Transport errors are not `Clone` and collapse into `Upstream`.
    pub fn replicate(&self) -> Self {
        match self {
            Self::Validation(msg) => Self::Validation(msg.clone()),
            Self::NotFound { query, season } => Self::not_found(query.clone(), *season),
            Self::OutOfRange {
                episode,
                season,
                episode_count,
            } => Self::OutOfRange {
                episode: *episode,
                season: *season,
                episode_count: *episode_count,
            },
            Self::Upstream(msg) => Self::Upstream(msg.clone()),
            Self::Http(e) => Self::Upstream(e.to_string()),
            Self::Json(e) => Self::Upstream(e.to_string()),
            Self::Cancelled => Self::Cancelled,
        }
    }

    /// Whether resubmitting the same file later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Http(_) | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
