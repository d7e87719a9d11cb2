use regex::Regex;
use std::sync::LazyLock;

static BRACKET_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【[^】]*】|\[[^\]]*\]").unwrap());

static QUALITY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\d{3,4}p|WEB-?DL|WEB-?RIP|Blu-?ray|BDRip|HDTV|DVDRip|H\.?26[45]|x26[45]|HEVC|AVC|HDR10\+?|HDR|SDR|DoVi|DTS(?:-HD)?|DD5\.1|DDP\d\.\d|AAC|AC3|TrueHD|Atmos|\d+bit|\d+fps",
    )
    .unwrap()
});

static RELEASE_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-[A-Z][a-zA-Z0-9@]+$").unwrap());

static LEADING_LATIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.\s\-]+(.*)$").unwrap());

static SEASON_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z])(第[零一二三四五六七八九十百\d]+(?:[-~至][零一二三四五六七八九十百\d]+)?[季部]|season[\s_\-]?\d+|s\d{1,2})(?:[^0-9]|$)")
        .unwrap()
});

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})(?:[^0-9]|$)").unwrap());

static RESOLUTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\d{3,4}p").unwrap());

static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bs\d{1,3}(?:e\d{1,4})?\b|\bep?\d{1,4}\b").unwrap());

/// Whole-token technical vocabulary stripped from movie titles.
static TECHNICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:\d{3,4}[pi]|\d+k|uhd|4k|\d+fps|blu-?ray|bd|bdrip|brrip|remux|web-?dl|web-?rip|webrip|hdtv|hdrip|dvdrip|x26[45]|h\.?26[45]|hevc|avc|aac|ac3|e-?ac-?3|dts(?:-hd)?|ddp?\d?(?:\.\d)?|atmos|truehd|flac|\d+bit|hdr(?:10\+?)?|sdr|dovi|dv|\d+audios?|multi-?audio|dual-?audio|mandarin|cantonese|chs|cht|eng|国语|粤语|中字|国英双语|双语|中英字幕)$",
    )
    .unwrap()
});

const NAME_SUFFIXES: &[&str] = &[
    "（",
    "(",
    "[",
    "【",
    "全",
    "期全",
    "完结",
    "更新",
    "集全",
    "全集",
    "合集",
    "完整版",
    "系列",
    "国语配音",
    "中文字幕",
    "英文字幕",
    "双语字幕",
];

pub fn is_han(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

pub fn contains_han(s: &str) -> bool {
    s.chars().any(is_han)
}

fn is_all_latin(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}

/// 一..九十九 (or plain digits) to a number.
pub fn chinese_to_number(s: &str) -> Option<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return Some(n);
    }

    fn digit(c: char) -> Option<u32> {
        "零一二三四五六七八九"
            .chars()
            .position(|d| d == c)
            .map(|p| p as u32)
    }

    let chars: Vec<char> = s.chars().collect();
    match chars.iter().position(|&c| c == '十') {
        None if chars.len() == 1 => digit(chars[0]),
        None => None,
        Some(pos) => {
            let tens = match pos {
                0 => 1,
                1 => digit(chars[0])?,
                _ => return None,
            };
            let ones = match chars.len() - pos - 1 {
                0 => 0,
                1 => digit(chars[pos + 1])?,
                _ => return None,
            };
            Some(tens * 10 + ones)
        }
    }
}

/// Clean a directory or file fragment into a show name.
///
/// Removes site watermarks, quality tokens, release groups, season suffixes
/// and trailing marketing text. Mixed Chinese/English names keep the Chinese
/// part. Returns the input unchanged when fewer than two characters survive.
/// Idempotent: `clean_show_name(&clean_show_name(x)) == clean_show_name(x)`.
pub fn clean_show_name(name: &str) -> String {
    if name.trim().is_empty() {
        return String::new();
    }

    let mut cleaned = name.to_string();
    // Each step only shortens or normalizes, so this settles quickly.
    for _ in 0..=name.len() {
        let next = clean_step(&cleaned);
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    if cleaned.chars().count() < 2 {
        return name.to_string();
    }
    cleaned
}

fn clean_step(input: &str) -> String {
    let mut s = BRACKET_TAG.replace_all(input, "").to_string();
    s = QUALITY_TOKEN.replace_all(&s, "").to_string();
    s = RELEASE_GROUP.replace(&s, "").to_string();

    if contains_han(&s) {
        if let Some(rest) = LEADING_LATIN.captures(&s).and_then(|c| c.get(1))
            && contains_han(rest.as_str())
        {
            s = rest.as_str().to_string();
        }

        let kept: Vec<&str> = s
            .split('.')
            .filter(|part| {
                contains_han(part)
                    || part.starts_with(|c: char| c.is_ascii_digit())
                    || (!part.is_empty() && !is_all_latin(part))
            })
            .collect();
        if !kept.is_empty() {
            s = kept.join(".");
        }
    }

    if let Some(cut) = group_start(&SEASON_SUFFIX, &s)
        && cut > 0
    {
        s.truncate(cut);
    }

    if let Some(cut) = group_start(&YEAR, &s)
        && cut > 0
    {
        s.truncate(cut);
    }

    for suffix in NAME_SUFFIXES {
        if let Some(idx) = s.find(suffix)
            && idx > 0
        {
            s.truncate(idx);
        }
    }

    let han = contains_han(&s);
    let s: String = s
        .chars()
        .filter_map(|c| match c {
            '.' | '_' if han => None,
            '.' | '_' => Some(' '),
            ':' | '：' | '·' => None,
            c => Some(c),
        })
        .collect();

    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '–' || c.is_whitespace())
        .to_string()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Script {
    Han,
    Latin,
}

/// Derive a movie title from a file stem.
///
/// Returns the preferred title and, for mixed-script names, the best run of
/// the other script as an alternative.
pub fn clean_movie_title(stem: &str) -> (String, Option<String>) {
    let mut s = BRACKET_TAG.replace_all(stem, " ").to_string();

    let has_technical = s.split(is_separator).any(is_technical);
    if has_technical && let Some(cut) = RELEASE_GROUP.find(&s).map(|m| m.start()) {
        let token_start = s[..cut].rfind(is_separator).map_or(0, |i| i + 1);
        // `WEB-DL` looks like a group suffix but is itself technical
        if !TECHNICAL.is_match(&s[token_start..]) {
            s.truncate(cut);
        }
    }

    let s: String = s
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();

    let masked = RESOLUTION.replace_all(&s, |caps: &regex::Captures| " ".repeat(caps[0].len()));
    let year_cut = last_year(&masked).map(|m| m.start());
    let mut s = s.clone();
    if let Some(cut) = year_cut
        && cut > 0
    {
        s.truncate(cut);
    }

    let s = SEASON_EPISODE.replace_all(&s, " ");
    let tokens: Vec<&str> = s.split_whitespace().filter(|token| !is_technical(token)).collect();
    let joined = tokens.join(" ");

    let mut runs: Vec<(Script, String)> = Vec::new();
    for c in joined.chars() {
        let script = if is_han(c) {
            Some(Script::Han)
        } else if c.is_ascii_alphabetic() {
            Some(Script::Latin)
        } else {
            None
        };
        match (script, runs.last_mut()) {
            (Some(sc), Some((last, text))) if *last == sc => text.push(c),
            (Some(sc), _) => runs.push((sc, c.to_string())),
            (None, Some((_, text))) => text.push(c),
            (None, None) => runs.push((Script::Latin, c.to_string())),
        }
    }

    let mut runs: Vec<(Script, String)> = runs
        .into_iter()
        .map(|(sc, text)| (sc, trim_punct(&text)))
        .filter(|(_, text)| !text.is_empty())
        .collect();

    if runs.is_empty() {
        return (String::new(), None);
    }
    if runs.len() == 1 {
        return (runs.remove(0).1, None);
    }

    let len = |text: &str| text.chars().filter(|c| !c.is_whitespace()).count();
    let best = |script: Script, runs: &[(Script, String)]| {
        runs.iter()
            .filter(|(sc, _)| *sc == script)
            .max_by_key(|(_, text)| len(text))
            .map(|(_, text)| text.clone())
    };
    let han = best(Script::Han, &runs);
    let latin = best(Script::Latin, &runs);

    match (han, latin) {
        (Some(h), Some(l)) if len(&l) > len(&h) => (l, Some(h)),
        (Some(h), Some(l)) => (h, Some(l)),
        (Some(h), None) => (h, None),
        (None, Some(l)) => (l, None),
        (None, None) => (String::new(), None),
    }
}

/// The last year-like token. A title may itself look like a year (`1917`),
/// the release year follows it.
pub(crate) fn last_year(text: &str) -> Option<regex::Match<'_>> {
    let mut found = None;
    let mut pos = 0;
    while let Some(m) = YEAR.captures_at(text, pos).and_then(|c| c.get(1)) {
        pos = m.end();
        found = Some(m);
    }
    found
}

fn group_start(re: &Regex, text: &str) -> Option<usize> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.start())
}

fn is_separator(c: char) -> bool {
    c == '.' || c == '_' || c.is_whitespace()
}

/// A token is technical when it, or any hyphen-joined piece of it, is (`x265-beAst`).
fn is_technical(token: &str) -> bool {
    TECHNICAL.is_match(token) || token.split('-').any(|piece| TECHNICAL.is_match(piece))
}

fn trim_punct(text: &str) -> String {
    let trimmed = text.trim_matches(|c: char| {
        c.is_whitespace() || "-_.,:;!?·()（）[]【】「」《》'\"+&".contains(c)
    });
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chinese_to_number() {
        assert_eq!(chinese_to_number("一"), Some(1));
        assert_eq!(chinese_to_number("十"), Some(10));
        assert_eq!(chinese_to_number("十二"), Some(12));
        assert_eq!(chinese_to_number("二十"), Some(20));
        assert_eq!(chinese_to_number("三十五"), Some(35));
        assert_eq!(chinese_to_number("08"), Some(8));
        assert_eq!(chinese_to_number("百"), None);
        assert_eq!(chinese_to_number(""), None);
    }

    #[test]
    fn test_clean_show_name_combined_dir() {
        assert_eq!(clean_show_name("新闻女王 S2"), "新闻女王");
        assert_eq!(clean_show_name("新闻女王S2"), "新闻女王");
        assert_eq!(clean_show_name("庆余年 S03"), "庆余年");
        assert_eq!(clean_show_name("Breaking Bad S01"), "Breaking Bad");
        assert_eq!(clean_show_name("The Office S05"), "The Office");
    }

    #[test]
    fn test_clean_show_name_watermark_and_quality() {
        assert_eq!(
            clean_show_name("【高清影视之家发布 www.hdbthd.com】庆余年.第二季.2024.全36集.2160p.WEB-DL.H265-QuickIO"),
            "庆余年"
        );
        assert_eq!(clean_show_name("[电影天堂]繁花.2023"), "繁花");
    }

    #[test]
    fn test_clean_show_name_mixed_script_keeps_chinese() {
        assert_eq!(clean_show_name("The.Knockout.狂飙.2023"), "狂飙");
        assert_eq!(clean_show_name("三体.Three-Body"), "三体");
    }

    #[test]
    fn test_clean_show_name_latin_dots() {
        assert_eq!(clean_show_name("Game.of.Thrones.S08.2019"), "Game of Thrones");
    }

    #[test]
    fn test_clean_show_name_short_returns_original() {
        assert_eq!(clean_show_name("S1"), "S1");
        assert_eq!(clean_show_name(""), "");
    }

    #[test]
    fn test_clean_show_name_idempotent() {
        let inputs = [
            "新闻女王 S2",
            "Game.of.Thrones.S08.2019.UHD.Blu-ray.2160p",
            "【高清影视之家发布 www.hdbthd.com】庆余年.第二季.2024.全36集",
            "Show S12全",
            "小猪佩奇第八季",
            "[字幕组] 鬼灭之刃",
            "S1",
            "2012",
            "The.Knockout.狂飙.2023",
        ];
        for input in inputs {
            let once = clean_show_name(input);
            assert_eq!(clean_show_name(&once), once, "input: {input}");
        }
    }

    #[test]
    fn test_clean_movie_title_watermark_and_group() {
        let (title, alt) =
            clean_movie_title("[电影天堂www.dytt89.com]寄生虫.2019.1080p.BluRay.x264.DTS-CMCT");
        assert_eq!(title, "寄生虫");
        assert_eq!(alt, None);
    }

    #[test]
    fn test_clean_movie_title_latin() {
        let (title, _) = clean_movie_title("Inception.2010.2160p.UHD.BluRay.x265.10bit.HDR.TrueHD.7.1.Atmos-DON");
        assert_eq!(title, "Inception");
    }

    #[test]
    fn test_clean_movie_title_year_shaped_title() {
        let (title, _) = clean_movie_title("1917.2019.1080p.BluRay");
        assert_eq!(title, "1917");
        let (title, _) = clean_movie_title("Blade.Runner.2049.2017.2160p");
        assert_eq!(title, "Blade Runner 2049");
    }

    #[test]
    fn test_clean_movie_title_resolution_not_year() {
        let (title, _) = clean_movie_title("流浪地球.2160p.WEB-DL.HEVC");
        assert_eq!(title, "流浪地球");
    }

    #[test]
    fn test_clean_movie_title_mixed_scripts() {
        let (title, alt) = clean_movie_title("让子弹飞.Let.the.Bullets.Fly.2010.1080p");
        assert_eq!(title, "Let the Bullets Fly");
        assert_eq!(alt.as_deref(), Some("让子弹飞"));
    }

    #[test]
    fn test_clean_movie_title_keeps_hyphenated_name_without_tech() {
        let (title, _) = clean_movie_title("Spider-Man");
        assert_eq!(title, "Spider-Man");
    }
}
