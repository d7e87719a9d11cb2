use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::hybrid::HybridStrategy;

const APP_NAME: &str = "media-renamer";
const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub library: LibraryConfig,
    pub model: ModelConfig,
    pub hybrid: HybridConfig,
    pub rename: RenameConfig,
}

/// TMDB-compatible catalog
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub api_key: String,
    pub base_url: String,
    pub language: String,
    /// Requests per second across every concurrent resolution
    pub qps: u32,
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.themoviedb.org/3".to_string(),
            language: "zh-CN".to_string(),
            qps: 40,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory names marking the top of a TV library (matched case-insensitively)
    pub tv_roots: Vec<String>,

    /// Directory names matching any of these are release/quality folders, never show names
    pub quality_dir_patterns: Vec<String>,

    /// Path segments ignored while looking for a show name
    pub skip_segments: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            tv_roots: ["tvs", "tv", "series", "剧集", "电视剧", "综艺"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            quality_dir_patterns: [
                r"\d{3,4}[pP]",
                r"(?i)\d+K\b",
                r"(?i)\d+FPS",
                r"(?i)BluRay|Blu-ray",
                r"(?i)WEB-?DL",
                r"(?i)WEBRip",
                r"(?i)HDRip",
                r"(?i)BDRip",
                r"(?i)x26[45]",
                r"(?i)H\.?26[45]",
                r"(?i)HEVC",
                r"HDR",
                r"(?i)DoVi",
                r"DTS",
                r"AAC",
                r"AC3",
                r"(?i)IMAX",
                r"(?i)Atmos",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_segments: vec!["data".to_string(), "来自：分享".to_string()],
        }
    }
}

/// OpenAI-compatible generative model
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub qps: u32,
    pub batch: ModelBatchConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 500,
            timeout_secs: 60,
            qps: 10,
            batch: ModelBatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelBatchConfig {
    /// Estimated prompt tokens allowed per request
    pub token_limit: usize,
    /// Fixed prompt overhead counted once per request
    pub base_tokens: usize,
    pub max_concurrent_batches: usize,
}

impl Default for ModelBatchConfig {
    fn default() -> Self {
        Self {
            token_limit: 4000,
            base_tokens: 300,
            max_concurrent_batches: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub strategy: HybridStrategy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenameConfig {
    /// Rate the rename collaborator tolerates; executor permits are derived from it
    pub qps: u32,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self { qps: 40 }
    }
}

impl Config {
    /// Load `.env`, the TOML file, environment overrides and finally the
    /// command-line strategy, then validate the result.
    pub fn load(explicit: Option<&Path>, strategy: Option<HybridStrategy>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
                info!(path = %path.display(), "loaded config file");
                Self::from_toml(&content)
                    .with_context(|| format!("解析配置文件失败: {}", path.display()))?
            }
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env();
        if let Some(strategy) = strategy {
            config.hybrid.strategy = strategy;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("TMDB_API_KEY") {
            self.catalog.api_key = key;
        }
        if let Ok(lang) = std::env::var("TMDB_LANGUAGE") {
            self.catalog.language = lang;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.model.api_key = key;
            self.model.enabled = true;
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.model.base_url = url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            self.model.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.qps == 0 {
            bail!("catalog.qps 必须大于 0");
        }
        if self.model.qps == 0 {
            bail!("model.qps 必须大于 0");
        }
        if self.rename.qps == 0 {
            bail!("rename.qps 必须大于 0");
        }
        if self.model.batch.token_limit == 0 {
            bail!("model.batch.token_limit 必须大于 0");
        }
        if self.model.batch.max_concurrent_batches == 0 {
            bail!("model.batch.max_concurrent_batches 必须大于 0");
        }
        if self.hybrid.strategy.needs_model() && !self.model.enabled {
            bail!("策略 {} 需要生成模型，请设置 OPENAI_API_KEY 或开启 model.enabled", self.hybrid.strategy);
        }
        for pattern in &self.library.quality_dir_patterns {
            Regex::new(pattern).with_context(|| format!("无效的质量目录正则: {pattern}"))?;
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILENAME))
}
