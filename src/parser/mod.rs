pub mod cleaner;
pub mod matchers;
pub mod path_rules;
pub mod special;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use tracing::debug;

use crate::config::LibraryConfig;
use crate::model::{MediaInfo, MediaType, Part};
use cleaner::{clean_movie_title, clean_show_name, last_year};
use matchers::MatcherChain;
use path_rules::{PathRules, SeasonRange};

static RESOLUTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\d{3,4}p").unwrap());

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})(?:[^0-9]|$)").unwrap());

static AIR_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})[-.]?(\d{2})[-.]?(\d{2})(?:[^0-9]|$)").unwrap()
});

static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Ss](\d{1,3})[Ee](\d{1,4})").unwrap());

static PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.\-_\s(（]([上中下])(?:[.\-_\s)）]|$)").unwrap());

/// Masked before episode matching so codec/bit-depth digits are never read as episodes.
static TECH_DIGITS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d{3,4}p|[xh]\.?26[45]|\d+bit|\d+fps|\d+k\b|ddp?\d\.\d|\d\.\d\b|\d+audio").unwrap()
});

const VERSIONS: &[&str] = &[
    "沉浸版",
    "加长版",
    "未删减版",
    "导演剪辑版",
    "特别版",
    "完整版",
    "修复版",
    "重制版",
    "精华版",
    "会员版",
];

static ENGLISH_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(extended(?:[ .]cut)?|director'?s[ .]cut|uncut|remastered)\b").unwrap()
});

/// Turns a full path into a [`MediaInfo`]. Never fails; unknown fields stay `None`.
pub struct PathAnalyzer {
    rules: PathRules,
    episodes: MatcherChain,
}

impl PathAnalyzer {
    pub fn new(library: &LibraryConfig) -> Self {
        let quality = library
            .quality_dir_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            rules: PathRules::new(&library.tv_roots, &library.skip_segments, quality),
            episodes: MatcherChain::episodes(),
        }
    }

    pub fn season_range(&self, path: &str) -> Option<SeasonRange> {
        self.rules.season_range(path)
    }

    pub fn analyze(&self, path: &str) -> MediaInfo {
        let original_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let (stem, extension) = split_extension(&original_name);

        let masked = RESOLUTION.replace_all(stem, |caps: &regex::Captures| " ".repeat(caps[0].len()));
        let air_date = extract_air_date(stem).or_else(|| parent_name(path).and_then(extract_air_date));
        let year_match = last_year(&masked);
        let year = year_match
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .or_else(|| air_date.and_then(|d| u32::try_from(d.year()).ok()));
        let version = extract_version(stem).or_else(|| parent_name(path).and_then(extract_version));

        let sxe = SEASON_EPISODE.captures(stem);
        let is_tv = sxe.is_some() || self.rules.has_tv_root(path);

        let mut info = MediaInfo {
            path: path.to_string(),
            original_name: original_name.clone(),
            media_type: MediaType::Unknown,
            title: String::new(),
            alt_title: None,
            year,
            season: None,
            episode: None,
            part: None,
            air_date,
            version,
            extension: extension.to_string(),
        };

        if is_tv {
            info.media_type = MediaType::Tv;
            let from_path = self.rules.extract(path);

            let (file_title, file_season, file_episode) = match &sxe {
                Some(caps) => {
                    let prefix = &stem[..caps.get(0).map_or(0, |m| m.start())];
                    (
                        prefix.to_string(),
                        caps.get(1).and_then(|m| m.as_str().parse().ok()),
                        caps.get(2).and_then(|m| m.as_str().parse().ok()),
                    )
                }
                None => (stem.to_string(), None, None),
            };

            info.season = file_season.or(from_path.season).or(Some(1));

            let (episode, part) = match file_episode {
                Some(ep) => (Some(ep), None),
                None => self.extract_episode(stem, year_match.map(|m| (m.start(), m.end()))),
            };
            info.episode = episode;
            info.part = part.or_else(|| extract_part(stem));

            let latin_alt = latin_title(&file_title);
            match from_path.show {
                Some(show) => {
                    info.alt_title = latin_alt.filter(|alt| !alt.eq_ignore_ascii_case(&show));
                    info.title = show;
                }
                None => {
                    let cleaned = clean_show_name(&file_title);
                    let (title, alt) = clean_movie_title(&cleaned);
                    info.title = title;
                    info.alt_title = alt.or(latin_alt).filter(|a| *a != info.title);
                }
            }
        } else {
            let (title, alt) = clean_movie_title(stem);
            info.media_type = if title.is_empty() {
                MediaType::Unknown
            } else {
                MediaType::Movie
            };
            info.title = title;
            info.alt_title = alt;
        }

        debug!(
            path,
            media_type = %info.media_type,
            title = %info.title,
            year = ?info.year,
            season = ?info.season,
            episode = ?info.episode,
            "analyzed path"
        );
        info
    }

    fn extract_episode(&self, stem: &str, year_span: Option<(usize, usize)>) -> (Option<u32>, Option<Part>) {
        let masked = mask(stem, &TECH_DIGITS);
        let mut exclude: Vec<(usize, usize)> = year_span.into_iter().collect();
        if let Some(m) = AIR_DATE.captures(stem).and_then(|c| c.get(0)) {
            exclude.push((m.start(), m.end()));
        }
        match self.episodes.execute(&masked, &exclude) {
            Some(result) => (Some(result.value), result.part),
            None => (None, None),
        }
    }
}

/// Call-scoped memo of analyzed paths; dropped with the resolution call that owns it.
#[derive(Clone)]
pub struct ParseCache {
    analyzer: Arc<PathAnalyzer>,
    entries: Arc<Mutex<HashMap<String, Arc<MediaInfo>>>>,
}

impl ParseCache {
    pub fn new(analyzer: Arc<PathAnalyzer>) -> Self {
        Self {
            analyzer,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, path: &str) -> Arc<MediaInfo> {
        if let Ok(entries) = self.entries.lock()
            && let Some(info) = entries.get(path)
        {
            return Arc::clone(info);
        }
        let info = Arc::new(self.analyzer.analyze(path));
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.to_string(), Arc::clone(&info));
        }
        info
    }

    pub fn analyzer(&self) -> &PathAnalyzer {
        &self.analyzer
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, ext)
        }
        _ => (name, ""),
    }
}

fn parent_name(path: &str) -> Option<&str> {
    let mut parts = path.rsplit('/');
    parts.next();
    parts.next().filter(|p| !p.is_empty())
}

/// Replace every match with spaces of equal byte length, keeping positions stable.
fn mask(text: &str, re: &Regex) -> String {
    re.replace_all(text, |caps: &regex::Captures| " ".repeat(caps[0].len()))
        .into_owned()
}

fn extract_air_date(text: &str) -> Option<NaiveDate> {
    AIR_DATE.captures_iter(text).find_map(|caps| {
        let year = caps.get(1)?.as_str().parse().ok()?;
        let month = caps.get(2)?.as_str().parse().ok()?;
        let day = caps.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

fn extract_version(text: &str) -> Option<String> {
    VERSIONS
        .iter()
        .find(|v| text.contains(*v))
        .map(|v| v.to_string())
        .or_else(|| {
            ENGLISH_VERSION
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().replace('.', " ").to_lowercase())
        })
}

fn extract_part(text: &str) -> Option<Part> {
    PART.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| Part::from_marker(m.as_str()))
}

/// Romanized title preceding an `SxxEyy` token, dots as spaces.
fn latin_title(prefix: &str) -> Option<String> {
    let words: Vec<&str> = prefix
        .split(|c: char| c == '.' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .take_while(|w| !YEAR.is_match(w) || w.len() != 4)
        .collect();
    if words.is_empty() || !words.iter().all(|w| w.chars().all(|c| c.is_ascii_alphanumeric() || c == '\'' || c == '-')) {
        return None;
    }
    let title = words.join(" ");
    (title.chars().filter(|c| c.is_ascii_alphabetic()).count() >= 2).then_some(title)
}
