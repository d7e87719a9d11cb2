use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
    Unknown,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 上/中/下 marker splitting one nominal episode into sequential pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Part {
    First,
    Middle,
    Last,
}

impl Part {
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "上" => Some(Self::First),
            "中" => Some(Self::Middle),
            "下" => Some(Self::Last),
            _ => None,
        }
    }

    /// Offset under the fixed three-way split.
    pub fn offset(self) -> u32 {
        match self {
            Self::First => 0,
            Self::Middle => 1,
            Self::Last => 2,
        }
    }
}

/// Facts parsed out of a single path. Built once by the analyzer and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub path: String,
    pub original_name: String,
    pub media_type: MediaType,
    pub title: String,
    /// Secondary spelling accepted during exact-name matching (e.g. the romanized title).
    pub alt_title: Option<String>,
    pub year: Option<u32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub part: Option<Part>,
    pub air_date: Option<NaiveDate>,
    pub version: Option<String>,
    pub extension: String,
}

impl MediaInfo {
    /// Directory containing the file, without trailing slash.
    pub fn parent_dir(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogCandidate {
    pub id: u64,
    pub name: String,
    pub original_name: String,
    pub year: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEpisode {
    pub number: u32,
    pub name: String,
    pub air_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonDetails {
    pub season_number: u32,
    pub episodes: Vec<CatalogEpisode>,
}

impl SeasonDetails {
    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn episode(&self, number: u32) -> Option<&CatalogEpisode> {
        self.episodes.iter().find(|e| e.number == number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Catalog,
    Model,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog => f.write_str("catalog"),
            Self::Model => f.write_str("generative-model"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyCanonical,
    SpecialContent,
    EpisodeNotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyCanonical => "already canonical",
            Self::SpecialContent => "special content",
            Self::EpisodeNotFound => "episode not found",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub original_path: String,
    pub new_name: String,
    pub new_path: String,
    pub media_type: MediaType,
    pub title: String,
    pub localized_title: Option<String>,
    pub year: Option<u32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub episode_title: Option<String>,
    pub catalog_id: Option<u64>,
    pub confidence: f64,
    pub source: Source,
    pub skipped: bool,
    pub skip_reason: Option<SkipReason>,
}

impl Suggestion {
    /// The title a media server would display.
    pub fn display_title(&self) -> &str {
        self.localized_title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.title)
    }
}

/// Outcome of a batch call: suggestions per path plus the per-file failures
/// the caller may retry.
#[derive(Debug, Default)]
pub struct BatchResolution {
    pub suggestions: BTreeMap<String, Vec<Suggestion>>,
    pub failures: BTreeMap<String, ResolveError>,
}

impl BatchResolution {
    pub fn push(&mut self, path: &str, suggestion: Suggestion) {
        self.failures.remove(path);
        self.suggestions
            .entry(path.to_string())
            .or_default()
            .push(suggestion);
    }

    pub fn fail(&mut self, path: &str, err: ResolveError) {
        if !self.suggestions.contains_key(path) {
            self.failures.insert(path.to_string(), err);
        }
    }

    pub fn merge(&mut self, other: BatchResolution) {
        for (path, list) in other.suggestions {
            self.failures.remove(&path);
            self.suggestions.entry(path).or_default().extend(list);
        }
        for (path, err) in other.failures {
            self.fail(&path, err);
        }
    }

    pub fn failed_paths(&self) -> Vec<String> {
        self.failures.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.suggestions.len()
    }
}

#[derive(Debug, Default)]
pub struct HybridResolution {
    pub resolution: BatchResolution,
    pub used_model: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(path: &str, confidence: f64) -> Suggestion {
        Suggestion {
            original_path: path.into(),
            new_name: "x.mkv".into(),
            new_path: format!("/x/{path}"),
            media_type: MediaType::Movie,
            title: "x".into(),
            localized_title: None,
            year: None,
            season: None,
            episode: None,
            episode_title: None,
            catalog_id: Some(1),
            confidence,
            source: Source::Catalog,
            skipped: false,
            skip_reason: None,
        }
    }

    #[test]
    fn test_part_offsets() {
        assert_eq!(Part::from_marker("上").map(Part::offset), Some(0));
        assert_eq!(Part::from_marker("中").map(Part::offset), Some(1));
        assert_eq!(Part::from_marker("下").map(Part::offset), Some(2));
        assert_eq!(Part::from_marker("左"), None);
    }

    #[test]
    fn test_success_clears_earlier_failure() {
        let mut batch = BatchResolution::default();
        batch.fail("/a.mkv", ResolveError::Upstream("timeout".into()));
        batch.push("/a.mkv", suggestion("/a.mkv", 0.9));
        assert!(batch.failures.is_empty());

        batch.fail("/a.mkv", ResolveError::Cancelled);
        assert!(batch.failures.is_empty());
    }

    #[test]
    fn test_parent_dir() {
        let info = MediaInfo {
            path: "/tvs/show/ep.mkv".into(),
            original_name: "ep.mkv".into(),
            media_type: MediaType::Tv,
            title: "show".into(),
            alt_title: None,
            year: None,
            season: None,
            episode: None,
            part: None,
            air_date: None,
            version: None,
            extension: "mkv".into(),
        };
        assert_eq!(info.parent_dir(), "/tvs/show");
    }
}
