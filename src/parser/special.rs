use regex::Regex;
use std::sync::LazyLock;

/// Bonus / promotional content that never maps onto a regular episode.
const SPECIAL_KEYWORDS: &[&str] = &[
    "加更", "花絮", "预告", "片花", "彩蛋", "幕后", "特辑", "番外", "访谈", "采访", "回顾", "精彩", "集锦", "合集",
    "首映", "特别企划", "收官", "先导", "超前vlog", "超前营业", "陪看记", "母带放送", "惊喜母带", "独家记忆",
    "全员花絮", "制作特辑",
];

static SPECIAL_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z])(?:vlog|behind|making|trailers?|preview|bonus|extras?|specials?)(?:[^a-z]|$)")
        .unwrap()
});

static CANONICAL_TV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+ - S\d{2,}E\d{2,}(?: - .+)?\.[A-Za-z0-9]+$").unwrap());

static CANONICAL_MOVIE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+ \((?:19|20)\d{2}\)\.[A-Za-z0-9]+$").unwrap());

pub fn is_special_content(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    SPECIAL_KEYWORDS.iter().any(|k| lower.contains(k)) || SPECIAL_WORDS.is_match(file_name)
}

/// `Show - S01E02[ - Title].ext`
pub fn is_canonical_tv(file_name: &str) -> bool {
    CANONICAL_TV.is_match(file_name)
}

/// `Title (2019).ext`
pub fn is_canonical_movie(file_name: &str) -> bool {
    CANONICAL_MOVIE.is_match(file_name)
}

pub fn is_canonical(file_name: &str) -> bool {
    is_canonical_tv(file_name) || is_canonical_movie(file_name)
}
