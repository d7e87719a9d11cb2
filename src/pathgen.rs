use tracing::debug;

use crate::model::{MediaType, SkipReason, Source, Suggestion};
use crate::parser::special::{is_canonical, is_canonical_movie, is_canonical_tv, is_special_content};

/// Characters that are illegal in file/directory names on Windows and Unix
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Renders canonical file names and destination paths for media-server libraries.
pub struct CanonicalPathBuilder {
    tv_roots: Vec<String>,
}

impl CanonicalPathBuilder {
    pub fn new(tv_roots: &[String]) -> Self {
        Self {
            tv_roots: tv_roots.iter().map(|r| r.to_lowercase()).collect(),
        }
    }

    /// `Show - S02E06[ - Title].ext`
    pub fn tv_file_name(
        &self,
        show: &str,
        season: u32,
        episode: u32,
        episode_title: Option<&str>,
        extension: &str,
    ) -> String {
        let mut name = format!("{} - S{:02}E{:02}", sanitize(show), season, episode);
        if let Some(title) = episode_title.map(sanitize).filter(|t| !t.is_empty() && t != "Unknown") {
            name.push_str(" - ");
            name.push_str(&title);
        }
        with_extension(name, extension)
    }

    /// `Title (2019).ext`, or `Title.ext` when the year is unknown
    pub fn movie_file_name(&self, title: &str, year: Option<u32>, extension: &str) -> String {
        let name = match year {
            Some(year) => format!("{} ({})", sanitize(title), year),
            None => sanitize(title),
        };
        with_extension(name, extension)
    }

    /// `root/Show/Season NN/file` under the first TV root of the original path.
    /// Without a TV root only the file name changes.
    pub fn tv_path(&self, original_path: &str, show: &str, season: u32, file_name: &str) -> String {
        match self.find_tv_root(original_path) {
            Some(root) => format!("{}/{}/Season {:02}/{}", root, sanitize(show), season, file_name),
            None => sibling_path(original_path, file_name),
        }
    }

    /// Movies stay in their directory; only the file name changes.
    pub fn movie_path(&self, original_path: &str, file_name: &str) -> String {
        sibling_path(original_path, file_name)
    }

    /// Path prefix ending at the first directory named after a TV root.
    pub fn find_tv_root(&self, path: &str) -> Option<String> {
        let mut parts: Vec<&str> = path.split('/').collect();
        parts.pop();
        let idx = parts
            .iter()
            .position(|p| self.tv_roots.iter().any(|r| *r == p.to_lowercase()))?;
        Some(parts[..=idx].join("/"))
    }

    /// Why a file must not be renamed at all, if it must not.
    pub fn skip_reason(&self, path: &str) -> Option<SkipReason> {
        let file_name = file_name(path);
        if is_canonical(file_name) {
            return Some(SkipReason::AlreadyCanonical);
        }
        let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
        is_special_content(stem).then_some(SkipReason::SpecialContent)
    }

    /// Skipped suggestion for `path` when it is already canonical or bonus content.
    pub fn prefilter(&self, path: &str) -> Option<Suggestion> {
        let reason = self.skip_reason(path)?;
        debug!(path, reason = %reason, "skipping file");
        Some(skipped_suggestion(path, reason))
    }
}

/// A suggestion that keeps the file where and as it is.
pub fn skipped_suggestion(path: &str, reason: SkipReason) -> Suggestion {
    let name = file_name(path);
    let media_type = if is_canonical_tv(name) {
        MediaType::Tv
    } else if is_canonical_movie(name) {
        MediaType::Movie
    } else {
        MediaType::Unknown
    };
    Suggestion {
        original_path: path.to_string(),
        new_name: name.to_string(),
        new_path: path.to_string(),
        media_type,
        title: name.rsplit_once('.').map_or(name, |(stem, _)| stem).to_string(),
        localized_title: None,
        year: None,
        season: None,
        episode: None,
        episode_title: None,
        catalog_id: None,
        confidence: 0.0,
        source: Source::Catalog,
        skipped: true,
        skip_reason: Some(reason),
    }
}

/// Replace filesystem-illegal characters and tidy whitespace. Never returns an empty string.
pub fn sanitize(component: &str) -> String {
    let replaced: String = component
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn with_extension(name: String, extension: &str) -> String {
    if extension.is_empty() {
        name
    } else {
        format!("{name}.{extension}")
    }
}

fn sibling_path(original_path: &str, file_name: &str) -> String {
    match original_path.rfind('/') {
        Some(idx) => format!("{}/{}", &original_path[..idx], file_name),
        None => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;

    fn builder() -> CanonicalPathBuilder {
        CanonicalPathBuilder::new(&LibraryConfig::default().tv_roots)
    }

    #[test]
    fn test_tv_path_under_root() {
        let b = builder();
        let name = b.tv_file_name("新闻女王", 2, 6, Some("第六集"), "mp4");
        assert_eq!(name, "新闻女王 - S02E06 - 第六集.mp4");

        let cases = [
            (
                "/data/来自：分享/tvs/新闻女王 S2/X.W.N.W.2.2025.S02E06.mp4",
                "新闻女王",
                2,
                "/data/来自：分享/tvs/新闻女王/Season 02/新闻女王 - S02E06 - 第六集.mp4",
            ),
            (
                "/media/剧集/庆余年/Season 03/episode.mkv",
                "庆余年",
                3,
                "/media/剧集/庆余年/Season 03/新闻女王 - S02E06 - 第六集.mp4",
            ),
            (
                "/data/电视剧/权力的游戏/S08/episode.mkv",
                "权力的游戏",
                8,
                "/data/电视剧/权力的游戏/Season 08/新闻女王 - S02E06 - 第六集.mp4",
            ),
        ];
        for (path, show, season, expected) in cases {
            assert_eq!(b.tv_path(path, show, season, &name), expected);
        }
    }

    #[test]
    fn test_tv_path_without_root_keeps_directory() {
        let b = builder();
        let name = b.tv_file_name("Some Show", 1, 1, None, "mkv");
        assert_eq!(
            b.tv_path("/random/path/show/episode.mkv", "Some Show", 1, &name),
            "/random/path/show/Some Show - S01E01.mkv"
        );
    }

    #[test]
    fn test_movie_name_and_path() {
        let b = builder();
        let name = b.movie_file_name("寄生虫", Some(2019), "mkv");
        assert_eq!(name, "寄生虫 (2019).mkv");
        assert_eq!(
            b.movie_path("/movies/[电影天堂]寄生虫.2019.1080p.mkv", &name),
            "/movies/寄生虫 (2019).mkv"
        );
        assert_eq!(b.movie_file_name("Untitled", None, "mp4"), "Untitled.mp4");
    }

    #[test]
    fn test_sanitize_components() {
        assert_eq!(sanitize("Title: Subtitle"), "Title Subtitle");
        assert_eq!(sanitize("Movie?<>Name"), "Movie Name");
        assert_eq!(sanitize("Filename..."), "Filename");
        assert_eq!(sanitize(":::"), "Unknown");
        assert_eq!(
            builder().tv_file_name("A/B", 1, 2, Some("Part 1/2"), "mkv"),
            "A B - S01E02 - Part 1 2.mkv"
        );
    }

    #[test]
    fn test_canonical_name_is_skipped() {
        let b = builder();
        let s = b.prefilter("/tvs/新闻女王/Season 02/新闻女王 - S02E06 - 第六集.mp4").unwrap();
        assert!(s.skipped);
        assert_eq!(s.skip_reason, Some(SkipReason::AlreadyCanonical));
        assert_eq!(s.catalog_id, None);
        assert_eq!(s.new_path, s.original_path);
        assert!(!s.new_name.is_empty());
        assert_eq!(s.media_type, MediaType::Tv);
    }

    #[test]
    fn test_special_content_is_skipped() {
        let b = builder();
        let s = b.prefilter("/综艺/奔跑吧/第11期 花絮.mp4").unwrap();
        assert_eq!(s.skip_reason, Some(SkipReason::SpecialContent));
        assert!(b.prefilter("/tvs/奔跑吧/第11期.mp4").is_none());
    }

    #[test]
    fn test_find_tv_root() {
        let b = builder();
        assert_eq!(b.find_tv_root("/data/TVS/show/x.mkv").as_deref(), Some("/data/TVS"));
        assert_eq!(b.find_tv_root("/movies/x.mkv"), None);
        // the file name itself is never a root
        assert_eq!(b.find_tv_root("/downloads/tv"), None);
    }
}
