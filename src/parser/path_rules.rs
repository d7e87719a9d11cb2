use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::cleaner::{chinese_to_number, clean_show_name};
use super::matchers::{MatcherChain, SeasonNumberMatcher, SeasonWordMatcher};

static SEASON_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:s\d{1,2}|season[\s_\-]*\d{1,2}|第[零一二三四五六七八九十\d]+季|s\d{1,2}\s*-\s*s\d{1,2}|season\s*\d+\s*-\s*\d+|第\d+[-~至]\d+季)$",
    )
    .unwrap()
});

static SEASON_RANGES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"第\s*([一二三四五六七八九十\d]+)\s*[-~至]\s*([一二三四五六七八九十\d]+)\s*季").unwrap(),
        Regex::new(r"(?i)season\s*(\d+)\s*-\s*(\d+)").unwrap(),
        Regex::new(r"(?i)s(\d{1,2})\s*-\s*s(\d{1,2})").unwrap(),
    ]
});

static CHINESE_SEASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*第([零一二三四五六七八九十\d]+)[季部]").unwrap());

static COLLECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?)\s*全\d+").unwrap());

const MAX_RANGE_SEASON: u32 = 20;

/// Show name and season recovered from the directory chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathInfo {
    pub show: Option<String>,
    pub season: Option<u32>,
}

/// A directory whose name spans several seasons, e.g. `庆余年 第1-3季`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonRange {
    pub show: String,
    pub start: u32,
    pub end: u32,
    /// Full path of the spanning directory
    pub dir: String,
}

impl SeasonRange {
    pub fn seasons(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RuleMatch {
    show: String,
    season: Option<u32>,
}

type Extract = fn(&PathRules, &[&str], usize) -> Option<RuleMatch>;

struct DirRule {
    name: &'static str,
    extract: Extract,
}

/// Evaluated right-to-left over directory segments; first hit wins.
const DIR_RULES: &[DirRule] = &[
    DirRule {
        name: "season-range",
        extract: PathRules::from_season_range,
    },
    DirRule {
        name: "show+season",
        extract: PathRules::from_combined_dir,
    },
    DirRule {
        name: "第N季",
        extract: PathRules::from_chinese_season,
    },
    DirRule {
        name: "全N季",
        extract: PathRules::from_collection,
    },
    DirRule {
        name: "season-dir",
        extract: PathRules::from_season_dir,
    },
];

pub struct PathRules {
    tv_roots: Vec<String>,
    skip_segments: Vec<String>,
    quality_dirs: Vec<Regex>,
    seasons: MatcherChain,
    latin_seasons: MatcherChain,
}

impl PathRules {
    pub fn new(tv_roots: &[String], skip_segments: &[String], quality_dirs: Vec<Regex>) -> Self {
        Self {
            tv_roots: tv_roots.iter().map(|r| r.to_lowercase()).collect(),
            skip_segments: skip_segments.to_vec(),
            quality_dirs,
            seasons: MatcherChain::seasons(),
            latin_seasons: MatcherChain::new()
                .add_matcher(Box::new(SeasonWordMatcher::new()))
                .add_matcher(Box::new(SeasonNumberMatcher::new())),
        }
    }

    pub fn is_tv_root(&self, segment: &str) -> bool {
        let lower = segment.to_lowercase();
        self.tv_roots.iter().any(|r| *r == lower)
    }

    /// Whether any directory of `path` is a configured TV root.
    pub fn has_tv_root(&self, path: &str) -> bool {
        directories(path).iter().any(|s| self.is_tv_root(s))
    }

    pub fn is_quality_dir(&self, segment: &str) -> bool {
        self.quality_dirs.iter().any(|re| re.is_match(segment))
    }

    pub fn is_season_dir(segment: &str) -> bool {
        SEASON_DIR.is_match(segment.trim())
    }

    fn is_skippable(&self, segment: &str) -> bool {
        segment.is_empty()
            || segment == "."
            || segment == ".."
            || self.skip_segments.iter().any(|s| s == segment)
            || self.is_tv_root(segment)
    }

    pub fn dir_season(&self, segment: &str) -> Option<u32> {
        self.seasons.execute(segment, &[]).map(|m| m.value)
    }

    /// Show name usable from a single directory, if it cleans to something meaningful.
    fn show_name_from(&self, segment: &str) -> Option<String> {
        if self.is_skippable(segment) || Self::is_season_dir(segment) {
            return None;
        }
        let cleaned = clean_show_name(segment);
        if cleaned.chars().count() < 2 || Self::is_season_dir(&cleaned) {
            return None;
        }
        Some(cleaned)
    }

    pub fn extract(&self, path: &str) -> PathInfo {
        let dirs = directories(path);

        let season_hint = dirs
            .iter()
            .rev()
            .filter(|s| !self.is_skippable(s))
            .find_map(|s| parse_range(s).map(|(start, ..)| start).or_else(|| self.dir_season(s)));

        if let Some(show) = self.show_after_tv_root(&dirs) {
            debug!(path, show = %show, season = ?season_hint, "show name from TV root");
            return PathInfo {
                show: Some(show),
                season: season_hint,
            };
        }

        for idx in (0..dirs.len()).rev() {
            if self.is_skippable(dirs[idx]) {
                continue;
            }
            for rule in DIR_RULES {
                if let Some(m) = (rule.extract)(self, &dirs, idx) {
                    debug!(path, rule = rule.name, dir = dirs[idx], show = %m.show, season = ?m.season, "path rule matched");
                    return PathInfo {
                        show: Some(m.show),
                        season: m.season.or(season_hint),
                    };
                }
            }
        }

        PathInfo {
            show: None,
            season: season_hint,
        }
    }

    fn show_after_tv_root(&self, dirs: &[&str]) -> Option<String> {
        let root = dirs.iter().position(|s| self.is_tv_root(s))?;
        let candidate = dirs.get(root + 1)?;
        if self.is_quality_dir(candidate) {
            return None;
        }
        self.show_name_from(candidate)
    }

    fn from_season_range(&self, dirs: &[&str], idx: usize) -> Option<RuleMatch> {
        let (start, _, rest) = parse_range(dirs[idx])?;
        let show = self
            .show_name_from(&rest)
            .or_else(|| idx.checked_sub(1).and_then(|p| self.show_name_from(dirs[p])))?;
        Some(RuleMatch {
            show,
            season: Some(start),
        })
    }

    fn from_combined_dir(&self, dirs: &[&str], idx: usize) -> Option<RuleMatch> {
        let segment = dirs[idx];
        if Self::is_season_dir(segment) {
            return None;
        }
        let season = self.latin_seasons.execute(segment, &[])?.value;
        let show = self.show_name_from(segment)?;
        Some(RuleMatch {
            show,
            season: Some(season),
        })
    }

    fn from_chinese_season(&self, dirs: &[&str], idx: usize) -> Option<RuleMatch> {
        let caps = CHINESE_SEASON.captures(dirs[idx])?;
        let season = chinese_to_number(caps.get(2)?.as_str())?;
        let prefix = caps.get(1)?.as_str().trim();
        if prefix.is_empty() {
            return None;
        }
        let show = self.show_name_from(prefix)?;
        Some(RuleMatch {
            show,
            season: Some(season),
        })
    }

    fn from_collection(&self, dirs: &[&str], idx: usize) -> Option<RuleMatch> {
        let segment = dirs[idx];
        if !segment.contains('季') {
            return None;
        }
        let prefix = COLLECTION.captures(segment)?.get(1)?.as_str().trim();
        let show = self.show_name_from(prefix)?;
        Some(RuleMatch { show, season: None })
    }

    fn from_season_dir(&self, dirs: &[&str], idx: usize) -> Option<RuleMatch> {
        let segment = dirs[idx];
        if !Self::is_season_dir(segment) || idx == 0 {
            return None;
        }
        let parent = dirs[idx - 1];
        if self.is_quality_dir(parent) {
            return None;
        }
        let show = self.show_name_from(parent)?;
        Some(RuleMatch {
            show,
            season: self.dir_season(segment),
        })
    }

    /// Nearest directory (right-to-left) naming a season span.
    pub fn season_range(&self, path: &str) -> Option<SeasonRange> {
        let dirs = directories(path);
        for idx in (0..dirs.len()).rev() {
            let Some((start, end, rest)) = parse_range(dirs[idx]) else {
                continue;
            };
            let show = self
                .show_name_from(&rest)
                .or_else(|| idx.checked_sub(1).and_then(|p| self.show_name_from(dirs[p])))
                .unwrap_or_default();
            let dir = dirs[..=idx].join("/");
            debug!(dir = %dir, show = %show, start, end, "season range detected");
            return Some(SeasonRange {
                show,
                start,
                end,
                dir,
            });
        }
        None
    }
}

/// Directory segments of `path`, without the file name.
fn directories(path: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = path.split('/').collect();
    parts.pop();
    parts
}

/// `(start, end, text with the range removed)` when the segment spans seasons.
fn parse_range(segment: &str) -> Option<(u32, u32, String)> {
    for re in SEASON_RANGES.iter() {
        let Some(caps) = re.captures(segment) else {
            continue;
        };
        let start = chinese_to_number(caps.get(1)?.as_str())?;
        let end = chinese_to_number(caps.get(2)?.as_str())?;
        if start > 0 && end >= start && end <= MAX_RANGE_SEASON {
            let rest = re.replace(segment, "").trim().to_string();
            return Some((start, end, rest));
        }
    }
    None
}
