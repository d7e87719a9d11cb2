use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use crate::config::ModelBatchConfig;
use crate::model::MediaInfo;
use crate::ratelimit::permits_for_rate;

/// Expected output tokens per file.
pub const TOKENS_PER_FILE: usize = 250;
/// Output tokens reserved for the response envelope.
pub const BASE_TOKEN_OVERHEAD: usize = 1000;
pub const MIN_RESPONSE_TOKENS: usize = 2000;
pub const MAX_RESPONSE_TOKENS: usize = 20000;

/// One file submitted to the model.
#[derive(Debug, Clone)]
pub struct FileRequest {
    pub info: Arc<MediaInfo>,
}

impl FileRequest {
    pub fn new(info: Arc<MediaInfo>) -> Self {
        Self { info }
    }

    pub fn original_name(&self) -> &str {
        &self.info.original_name
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn season(&self) -> u32 {
        self.info.season.unwrap_or(1)
    }

    /// Prompt cost of this file: Han characters weigh more than Latin ones.
    pub fn estimated_tokens(&self) -> usize {
        let chars = self.original_name().chars().count() + self.path().chars().count();
        let han = count_han(self.original_name());
        let weighted = (chars - han) as f64 * 1.3 + han as f64 * 2.5;
        weighted as usize + TOKENS_PER_FILE
    }
}

fn count_han(s: &str) -> usize {
    s.chars().filter(|c| ('\u{4E00}'..='\u{9FFF}').contains(c)).count()
}

/// Response budget for a batch of `files` files.
pub fn max_tokens_for(files: usize) -> u32 {
    let budget = (files * TOKENS_PER_FILE + BASE_TOKEN_OVERHEAD).clamp(MIN_RESPONSE_TOKENS, MAX_RESPONSE_TOKENS);
    u32::try_from(budget).unwrap_or(u32::MAX)
}

/// Splits files into requests that fit the prompt token budget.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    token_limit: usize,
    base_tokens: usize,
    max_concurrent: usize,
}

impl BatchPlanner {
    pub fn new(config: &ModelBatchConfig) -> Self {
        Self {
            token_limit: config.token_limit,
            base_tokens: config.base_tokens,
            max_concurrent: config.max_concurrent_batches.max(1),
        }
    }

    /// Group by season, merge small seasons while the budget allows, split
    /// seasons that exceed it on their own.
    pub fn plan(&self, files: Vec<FileRequest>) -> Vec<Vec<FileRequest>> {
        let mut seasons: BTreeMap<u32, Vec<FileRequest>> = BTreeMap::new();
        for file in files {
            seasons.entry(file.season()).or_default().push(file);
        }

        let mut batches = Vec::new();
        let mut current: Vec<FileRequest> = Vec::new();
        let mut current_tokens = self.base_tokens;

        for (season, group) in seasons {
            let tokens = self.base_tokens + group.iter().map(FileRequest::estimated_tokens).sum::<usize>();

            if current.is_empty() && tokens <= self.token_limit {
                current = group;
                current_tokens = tokens;
            } else if !current.is_empty() && current_tokens + tokens - self.base_tokens <= self.token_limit {
                debug!(season, added = group.len(), total = current.len() + group.len(), "cross-season merge");
                current.extend(group);
                current_tokens += tokens - self.base_tokens;
            } else {
                if !current.is_empty() {
                    batches.push(std::mem::take(&mut current));
                }
                current_tokens = self.base_tokens;
                if tokens > self.token_limit {
                    batches.extend(self.split(group));
                } else {
                    current = group;
                    current_tokens = tokens;
                }
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    fn split(&self, files: Vec<FileRequest>) -> Vec<Vec<FileRequest>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut tokens = self.base_tokens;
        for file in files {
            let cost = file.estimated_tokens();
            if tokens + cost > self.token_limit && !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                tokens = self.base_tokens;
            }
            tokens += cost;
            current.push(file);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Workers for `batches` requests, never more than the model's rate allows.
    pub fn concurrency(&self, batches: usize, qps: u32) -> usize {
        let wanted = match batches {
            0 | 1 => 1,
            2 | 3 => batches,
            _ => self.max_concurrent,
        };
        wanted.min(permits_for_rate(qps)).max(1)
    }
}

/// Prompt for a whole batch; the model answers `{"results": [...]}`.
pub fn batch_prompt(batch: &[FileRequest]) -> String {
    let mut p = String::new();
    p.push_str("你是一个专业的媒体文件命名专家。请分析以下**批量文件**，为每个文件提取媒体信息并生成标准的Emby/Plex目录结构路径。\n\n");

    p.push_str("### 待分析文件列表\n");
    for (i, file) in batch.iter().enumerate() {
        let _ = writeln!(p, "{}. {} (路径: {})", i + 1, file.original_name(), file.path());
    }
    p.push('\n');

    p.push_str("### 任务要求\n");
    p.push_str("请为每个文件输出一个独立的JSON对象，提取并生成以下字段：\n");
    p.push_str("- **original_name**: 原始文件名（必须与列表中的文件名完全一致）\n");
    p.push_str("- **media_type**: 识别媒体类型（movie=电影，tv=剧集）\n");
    p.push_str("- **title**: 英文标题（如无则自动转写拼音）\n");
    p.push_str("- **title_cn**: 中文标题\n");
    p.push_str("- **year**: 文件年份（从文件名中提取或推断）\n");
    p.push_str("- **season**: 季数，文件名或目录中有季度标识（如\"S02\"\"第二季\"）时直接使用\n");
    p.push_str("- **episode**: 集数编号，识别\"第01期\"、\"E01\"、\"第1集\"等常见格式\n");
    p.push_str("  - 对于\"上/中/下\"结构，应分配连续的编号（如第11期(上)=11, 第11期(下)=12）\n");
    p.push_str("- **episode_title**: 保留完整的集数标题\n");
    p.push_str("- **特殊版本识别**（episode=0）：特辑、番外、精华版、幕后特辑、未播片段、先导片、花絮、收官篇等\n");
    p.push_str("- **new_file_name**: 剧集 \"{title_cn} - S{season:02d}E{episode:02d} - {episode_title}.{ext}\"，电影 \"{title_cn} ({year}).{ext}\"\n");
    p.push_str("- **confidence**: 结果置信度 (0.0~1.0)\n\n");

    p.push_str("### 智能规则\n");
    p.push_str("1. 不同目录的文件在计算episode编号时必须分开处理\n");
    p.push_str("2. 文件名中若包含日期，按日期顺序推断播出顺序并编号（仅限同一目录内）\n");
    p.push_str("3. 对于上/中/下集，必须使用连续编号，不能共用同一episode编号\n\n");

    p.push_str("### 输出格式\n");
    p.push_str("只输出**纯JSON**结果，形如 {\"results\": [ ... ]}，不得包含额外说明或文字。\n");
    p
}
