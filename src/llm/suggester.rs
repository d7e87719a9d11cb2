use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::{BatchPlanner, FileRequest, batch_prompt, max_tokens_for};
use super::{GenerateOptions, GenerativeModel};
use crate::config::ModelConfig;
use crate::error::{ResolveError, Result};
use crate::model::{BatchResolution, MediaInfo, MediaType, Source, Suggestion};
use crate::parser::{ParseCache, PathAnalyzer};
use crate::pathgen::CanonicalPathBuilder;
use crate::pipeline::SuggestionResolver;

/// What the model claims about one file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelOutput {
    pub original_name: Option<String>,
    pub media_type: Option<String>,
    pub title: Option<String>,
    pub title_cn: Option<String>,
    pub year: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub episode_title: Option<String>,
    pub new_file_name: Option<String>,
    pub directory_path: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct BatchOutput {
    #[serde(default)]
    results: Vec<ModelOutput>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ModelOutput {
    pub fn media_type(&self) -> MediaType {
        match self.media_type.as_deref().map(str::trim) {
            Some(t) if t.eq_ignore_ascii_case("movie") => MediaType::Movie,
            Some(t) if t.eq_ignore_ascii_case("tv") => MediaType::Tv,
            _ => MediaType::Unknown,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ResolveError::Upstream(format!("模型输出无效: {msg}")));
        if self.media_type() == MediaType::Unknown {
            return invalid(format!("无效的媒体类型: {}", self.media_type.as_deref().unwrap_or("")));
        }
        if non_empty(&self.title).is_none() && non_empty(&self.title_cn).is_none() {
            return invalid("标题不能为空".to_string());
        }
        if let Some(year) = self.year
            && !(0..=2200).contains(&year)
        {
            return invalid(format!("年份无效: {year}"));
        }
        if self.season.is_some_and(|s| s < 0) {
            return invalid("季数不能为负".to_string());
        }
        if self.episode.is_some_and(|e| e < 0) {
            return invalid("集数不能为负".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return invalid(format!("置信度超出范围: {}", self.confidence));
        }
        Ok(())
    }

    /// Turn validated output into a suggestion. Destinations are rebuilt
    /// locally; the model's own directory is only logged.
    pub fn into_suggestion(self, info: &MediaInfo, paths: &CanonicalPathBuilder) -> Suggestion {
        let media_type = self.media_type();
        let english = non_empty(&self.title).map(str::to_string);
        let localized = non_empty(&self.title_cn).map(str::to_string);
        let display = localized.clone().or_else(|| english.clone()).unwrap_or_default();
        let year = self
            .year
            .and_then(|y| u32::try_from(y).ok())
            .filter(|y| *y > 0)
            .or(info.year);
        let episode_title = non_empty(&self.episode_title).map(str::to_string);

        debug!(
            path = %info.path,
            model_dir = ?self.directory_path,
            model_name = ?self.new_file_name,
            "model suggestion"
        );

        let (new_name, new_path, season, episode) = if media_type == MediaType::Tv {
            let season = self
                .season
                .and_then(|s| u32::try_from(s).ok())
                .or(info.season)
                .unwrap_or(1);
            let episode = self
                .episode
                .and_then(|e| u32::try_from(e).ok())
                .or(info.episode)
                .unwrap_or(0);
            let name = paths.tv_file_name(&display, season, episode, episode_title.as_deref(), &info.extension);
            let path = paths.tv_path(&info.path, &display, season, &name);
            (name, path, Some(season), Some(episode))
        } else {
            let name = paths.movie_file_name(&display, year, &info.extension);
            let path = paths.movie_path(&info.path, &name);
            (name, path, None, None)
        };

        Suggestion {
            original_path: info.path.clone(),
            new_name,
            new_path,
            media_type,
            title: english.unwrap_or_else(|| display.clone()),
            localized_title: localized,
            year,
            season,
            episode,
            episode_title,
            catalog_id: None,
            confidence: self.confidence,
            source: Source::Model,
            skipped: false,
            skip_reason: None,
        }
    }
}

/// Prompt for a single file.
pub fn single_prompt(info: &MediaInfo, hint: Option<&str>) -> String {
    let mut p = String::new();
    p.push_str("你是一个专业的媒体文件命名专家。请分析以下文件名，提取媒体信息并生成标准的Emby/Plex目录结构路径。\n\n");
    p.push_str("**要求**：\n");
    p.push_str("1. 识别媒体类型（movie=电影，tv=剧集）\n");
    p.push_str("2. 提取英文标题和中文标题（如果有）\n");
    p.push_str("3. 提取年份\n");
    p.push_str("4. 如果是剧集，提取季数(season)和集数(episode)\n");
    p.push_str("5. 如果文件名包含集数标题（如 \"S01E02 - 集数标题\"），提取episode_title字段\n");
    p.push_str("6. **特殊版本识别**：以下类型为特殊版本（episode设为0）而非常规剧集：\n");
    p.push_str("   - 特辑、番外、精华版、幕后特辑、制作特辑\n");
    p.push_str("   - 演唱会、见面会、发布会、粉丝见面会\n");
    p.push_str("   - 花絮、删减片段、未播片段、片场花絮\n");
    p.push_str("   - SP特别篇、OVA、剧场版、总集篇\n");
    p.push_str("   - 导演剪辑版、未删减版、加长版\n");
    p.push_str("   - 加更版、首映篇、特别企划、收官篇、先导片\n");
    p.push_str("7. 生成标准的新文件名和目录路径\n");
    p.push_str("8. 评估置信度（0.0-1.0）\n\n");

    p.push_str("**命名规则**：\n");
    p.push_str("- 剧集文件名: \"剧名 - S01E01.ext\" 或 \"剧名 - S01E01 - 集标题.ext\"\n");
    p.push_str("- 特殊版本文件名: \"剧名 - S01E00 - 特辑名称.ext\"\n");
    p.push_str("- 剧集目录: \"/TVs/剧名/Season 01\"\n");
    p.push_str("- 电影文件名: \"片名 (年份).ext\"\n\n");

    p.push_str("**输出字段**：media_type, title, title_cn, year, season, episode, episode_title, new_file_name, directory_path, confidence\n\n");

    let _ = writeln!(p, "**文件名**: {}", info.original_name);
    let _ = writeln!(p, "**文件路径**: {}", info.path);
    if let Some(hint) = hint.filter(|h| !h.trim().is_empty()) {
        let _ = writeln!(p, "**用户提示**: {hint}");
    }
    p.push_str("\n请分析并以JSON格式输出结果。只输出JSON，不要有任何额外的说明。");
    p
}

fn output_schema() -> serde_json::Value {
    serde_json::json!({
        "media_type": "tv",
        "title": "Show Title",
        "title_cn": "节目名称",
        "year": 2025,
        "season": 1,
        "episode": 1,
        "episode_title": "",
        "new_file_name": "节目名称 - S01E01.mkv",
        "directory_path": "/TVs/节目名称/Season 01",
        "confidence": 0.9
    })
}

fn batch_schema() -> serde_json::Value {
    let mut item = output_schema();
    item["original_name"] = serde_json::Value::from("原始文件名.mkv");
    serde_json::json!({ "results": [item] })
}

/// Everything a batch worker needs, cheap to clone into a task.
#[derive(Clone)]
struct Worker {
    model: Arc<dyn GenerativeModel>,
    paths: Arc<CanonicalPathBuilder>,
    temperature: f32,
}

impl Worker {
    async fn run(&self, batch: Vec<FileRequest>, cancel: &CancellationToken) -> BatchResolution {
        let mut out = BatchResolution::default();
        let names: Vec<&str> = batch.iter().map(FileRequest::original_name).collect();
        info!(files = batch.len(), ?names, "model batch request");

        let options = GenerateOptions {
            temperature: self.temperature,
            max_tokens: max_tokens_for(batch.len()),
        };
        let reply = self
            .model
            .generate_structured(&batch_prompt(&batch), &batch_schema(), &options, cancel)
            .await
            .and_then(|value| serde_json::from_value::<BatchOutput>(value).map_err(ResolveError::from));

        let output = match reply {
            Ok(output) => output,
            Err(e) => {
                error!(files = batch.len(), error = %e, "model batch failed");
                for file in &batch {
                    out.fail(file.path(), e.replicate());
                }
                return out;
            }
        };

        if output.results.len() < batch.len() {
            warn!(requested = batch.len(), returned = output.results.len(), "model returned fewer results");
        }

        let mut pending: HashMap<&str, VecDeque<&FileRequest>> = HashMap::new();
        for file in &batch {
            pending.entry(file.original_name()).or_default().push_back(file);
        }

        for result in output.results {
            let name = result.original_name.clone().unwrap_or_default();
            let Some(file) = pending.get_mut(name.as_str()).and_then(VecDeque::pop_front) else {
                warn!(original_name = %name, "model result matches no request");
                continue;
            };
            match result.validate() {
                Ok(()) => {
                    let suggestion = result.into_suggestion(&file.info, &self.paths);
                    out.push(file.path(), suggestion);
                }
                Err(e) => {
                    warn!(path = %file.path(), error = %e, "model result rejected");
                    out.fail(file.path(), e);
                }
            }
        }

        for file in pending.into_values().flatten() {
            warn!(path = %file.path(), "model returned nothing for file");
            out.fail(file.path(), ResolveError::Upstream("模型未返回此文件的结果".to_string()));
        }
        out
    }
}

/// Resolver backed by a generative model instead of the catalog.
pub struct ModelSuggester {
    worker: Worker,
    analyzer: Arc<PathAnalyzer>,
    planner: BatchPlanner,
    max_tokens: u32,
    qps: u32,
}

impl ModelSuggester {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        analyzer: Arc<PathAnalyzer>,
        paths: Arc<CanonicalPathBuilder>,
        config: &ModelConfig,
    ) -> Self {
        Self {
            worker: Worker {
                model,
                paths,
                temperature: config.temperature,
            },
            analyzer,
            planner: BatchPlanner::new(&config.batch),
            max_tokens: config.max_tokens,
            qps: config.qps,
        }
    }

    /// Ask about one file, with an optional free-text hint from the user.
    pub async fn suggest_one(&self, info: &MediaInfo, hint: Option<&str>, cancel: &CancellationToken) -> Result<Suggestion> {
        let options = GenerateOptions {
            temperature: self.worker.temperature,
            max_tokens: self.max_tokens,
        };
        let value = self
            .worker
            .model
            .generate_structured(&single_prompt(info, hint), &output_schema(), &options, cancel)
            .await?;
        let output: ModelOutput = serde_json::from_value(value)?;
        output.validate()?;

        let suggestion = output.into_suggestion(info, &self.worker.paths);
        info!(
            path = %info.path,
            media_type = %suggestion.media_type,
            title = %suggestion.display_title(),
            confidence = suggestion.confidence,
            "model suggestion accepted"
        );
        Ok(suggestion)
    }

    async fn run_batches(&self, files: Vec<FileRequest>, cancel: &CancellationToken) -> BatchResolution {
        let batches = self.planner.plan(files);
        let workers = self.planner.concurrency(batches.len(), self.qps);
        info!(batches = batches.len(), concurrency = workers, "model batching planned");

        let semaphore = Arc::new(Semaphore::new(workers));
        let results = Arc::new(Mutex::new(BatchResolution::default()));
        let mut tasks = JoinSet::new();

        for (index, batch) in batches.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let worker = self.worker.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let resolution = match permit {
                    Some(_permit) => {
                        debug!(batch = index, files = batch.len(), "processing batch");
                        worker.run(batch, &cancel).await
                    }
                    None => {
                        let mut cancelled = BatchResolution::default();
                        for file in &batch {
                            cancelled.fail(file.path(), ResolveError::Cancelled);
                        }
                        cancelled
                    }
                };
                results.lock().await.merge(resolution);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "model batch task panicked");
            }
        }

        let mut results = results.lock().await;
        std::mem::take(&mut *results)
    }
}

#[async_trait]
impl SuggestionResolver for ModelSuggester {
    async fn resolve_batch(&self, paths: &[String], cancel: &CancellationToken) -> Result<BatchResolution> {
        info!(files = paths.len(), "model batch started");
        let cache = ParseCache::new(Arc::clone(&self.analyzer));
        let mut out = BatchResolution::default();
        let mut files = Vec::new();
        for path in paths {
            if let Some(skipped) = self.worker.paths.prefilter(path) {
                out.push(path, skipped);
                continue;
            }
            files.push(FileRequest::new(cache.get(path)));
        }

        if let [single] = files.as_slice() {
            match self.suggest_one(&single.info, None, cancel).await {
                Ok(suggestion) => out.push(single.path(), suggestion),
                Err(e) => {
                    warn!(path = %single.path(), error = %e, "model suggestion failed");
                    out.fail(single.path(), e);
                }
            }
        } else if !files.is_empty() {
            out.merge(self.run_batches(files, cancel).await);
        }

        info!(resolved = out.len(), failed = out.failures.len(), "model batch finished");
        Ok(out)
    }

    fn source(&self) -> Source {
        Source::Model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::llm::tests::MockModel;
    use serde_json::json;

    fn suggester(model: Arc<MockModel>) -> ModelSuggester {
        let library = LibraryConfig::default();
        ModelSuggester::new(
            model,
            Arc::new(PathAnalyzer::new(&library)),
            Arc::new(CanonicalPathBuilder::new(&library.tv_roots)),
            &ModelConfig::default(),
        )
    }

    fn tv_result(name: &str, episode: i64) -> serde_json::Value {
        json!({
            "original_name": name,
            "media_type": "tv",
            "title": "Go Ahead",
            "title_cn": "乘风破浪",
            "year": 2025,
            "season": 1,
            "episode": episode,
            "episode_title": "",
            "new_file_name": "whatever.mp4",
            "directory_path": "/TVs/somewhere/else",
            "confidence": 0.85
        })
    }

    fn owned(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_validation_rules() {
        let ok = ModelOutput {
            media_type: Some("tv".into()),
            title_cn: Some("庆余年".into()),
            confidence: 0.9,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad_type = ModelOutput {
            media_type: Some("anime".into()),
            ..ok.clone()
        };
        assert!(bad_type.validate().unwrap_err().to_string().contains("无效的媒体类型"));

        let no_title = ModelOutput {
            title_cn: Some("  ".into()),
            ..ok.clone()
        };
        assert!(no_title.validate().unwrap_err().to_string().contains("标题不能为空"));

        assert!(ModelOutput { year: Some(2201), ..ok.clone() }.validate().is_err());
        assert!(ModelOutput { episode: Some(-1), ..ok.clone() }.validate().is_err());
        assert!(ModelOutput { confidence: 1.5, ..ok.clone() }.validate().is_err());
    }

    #[test]
    fn test_destination_stays_under_library_root() {
        let library = LibraryConfig::default();
        let paths = CanonicalPathBuilder::new(&library.tv_roots);
        let info = PathAnalyzer::new(&library).analyze("/media/tvs/乘风破浪/第3期.mp4");
        let output: ModelOutput = serde_json::from_value(tv_result("第3期.mp4", 3)).unwrap();
        let s = output.into_suggestion(&info, &paths);
        assert_eq!(s.new_path, "/media/tvs/乘风破浪/Season 01/乘风破浪 - S01E03.mp4");
        assert_eq!(s.source, Source::Model);
        assert_eq!(s.title, "Go Ahead");
        assert_eq!(s.display_title(), "乘风破浪");
    }

    #[tokio::test]
    async fn test_single_file_uses_single_prompt() {
        let model = Arc::new(MockModel::default().with_reply(json!({
            "media_type": "movie",
            "title": "Parasite",
            "title_cn": "寄生虫",
            "year": 2019,
            "confidence": 0.92
        })));
        let s = suggester(Arc::clone(&model));
        let result = s
            .resolve_batch(&owned(&["/movies/jishengchong.mkv"]), &CancellationToken::new())
            .await
            .unwrap();

        let movie = &result.suggestions["/movies/jishengchong.mkv"][0];
        assert_eq!(movie.new_path, "/movies/寄生虫 (2019).mkv");
        assert_eq!(model.calls(), 1);
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("**文件名**: jishengchong.mkv"));
    }

    #[tokio::test]
    async fn test_batch_matches_results_by_name() {
        let model = Arc::new(MockModel::default().with_reply(json!({
            "results": [tv_result("第2期.mp4", 2), tv_result("第1期.mp4", 1), tv_result("不存在.mp4", 9)]
        })));
        let s = suggester(Arc::clone(&model));
        let paths = owned(&["/tvs/乘风破浪/第1期.mp4", "/tvs/乘风破浪/第2期.mp4", "/tvs/乘风破浪/第3期.mp4"]);
        let result = s.resolve_batch(&paths, &CancellationToken::new()).await.unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(result.suggestions["/tvs/乘风破浪/第1期.mp4"][0].episode, Some(1));
        assert_eq!(result.suggestions["/tvs/乘风破浪/第2期.mp4"][0].episode, Some(2));
        let missing = result.failures.get("/tvs/乘风破浪/第3期.mp4").unwrap();
        assert!(missing.to_string().contains("未返回此文件的结果"));
    }

    #[tokio::test]
    async fn test_invalid_result_fails_only_that_file() {
        let mut bad = tv_result("第2期.mp4", 2);
        bad["confidence"] = json!(3.0);
        let model = Arc::new(MockModel::default().with_reply(json!({ "results": [tv_result("第1期.mp4", 1), bad] })));
        let s = suggester(model);
        let paths = owned(&["/tvs/乘风破浪/第1期.mp4", "/tvs/乘风破浪/第2期.mp4"]);
        let result = s.resolve_batch(&paths, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.failures.contains_key("/tvs/乘风破浪/第2期.mp4"));
    }

    #[tokio::test]
    async fn test_model_error_fails_whole_batch() {
        let model = Arc::new(MockModel::default().with_error(ResolveError::Upstream("503".into())));
        let s = suggester(model);
        let paths = owned(&["/tvs/乘风破浪/第1期.mp4", "/tvs/乘风破浪/第2期.mp4"]);
        let result = s.resolve_batch(&paths, &CancellationToken::new()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.values().all(ResolveError::is_retryable));
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_remaining_files() {
        let model = Arc::new(MockModel::default());
        let s = suggester(Arc::clone(&model));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let paths = owned(&["/tvs/乘风破浪/第1期.mp4", "/tvs/乘风破浪/第2期.mp4"]);
        let result = s.resolve_batch(&paths, &cancel).await.unwrap();
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.values().all(|e| matches!(e, ResolveError::Cancelled)));
    }
}
