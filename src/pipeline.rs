use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{group_tv, resolve_groups};
use crate::catalog::Catalog;
use crate::error::{ResolveError, Result};
use crate::matching::CatalogMatcher;
use crate::model::{BatchResolution, MediaInfo, MediaType, Source, Suggestion};
use crate::parser::{ParseCache, PathAnalyzer};
use crate::pathgen::CanonicalPathBuilder;

/// Anything that turns a set of paths into suggestions.
#[async_trait]
pub trait SuggestionResolver: Send + Sync {
    async fn resolve_batch(&self, paths: &[String], cancel: &CancellationToken) -> Result<BatchResolution>;

    fn source(&self) -> Source;
}

/// Analyzer, batch grouper and catalog matcher chained together.
pub struct CatalogPipeline {
    catalog: Arc<dyn Catalog>,
    analyzer: Arc<PathAnalyzer>,
    paths: Arc<CanonicalPathBuilder>,
}

impl CatalogPipeline {
    pub fn new(catalog: Arc<dyn Catalog>, analyzer: Arc<PathAnalyzer>, paths: Arc<CanonicalPathBuilder>) -> Self {
        Self {
            catalog,
            analyzer,
            paths,
        }
    }

    /// Best suggestion for a single file.
    pub async fn resolve_one(&self, path: &str, cancel: &CancellationToken) -> Result<Suggestion> {
        if let Some(skipped) = self.paths.prefilter(path) {
            return Ok(skipped);
        }
        let info = self.analyzer.analyze(path);
        let matcher = CatalogMatcher::new(Arc::clone(&self.catalog), Arc::clone(&self.paths));
        let mut list = match info.media_type {
            MediaType::Tv => matcher.resolve_tv(&info, cancel).await?,
            MediaType::Movie => matcher.resolve_movie(&info, cancel).await?,
            MediaType::Unknown => return Err(ResolveError::Validation(info.original_name)),
        };
        if list.is_empty() {
            return Err(ResolveError::not_found(info.title, info.season));
        }
        Ok(list.swap_remove(0))
    }
}

fn unusable_title(info: &MediaInfo) -> bool {
    info.media_type == MediaType::Unknown || info.title.trim().is_empty()
}

#[async_trait]
impl SuggestionResolver for CatalogPipeline {
    async fn resolve_batch(&self, paths: &[String], cancel: &CancellationToken) -> Result<BatchResolution> {
        info!(files = paths.len(), "catalog batch started");
        let cache = ParseCache::new(Arc::clone(&self.analyzer));
        let matcher = CatalogMatcher::new(Arc::clone(&self.catalog), Arc::clone(&self.paths));

        let mut out = BatchResolution::default();
        let mut shows = Vec::new();
        let mut movies = Vec::new();
        for path in paths {
            if let Some(skipped) = self.paths.prefilter(path) {
                out.push(path, skipped);
                continue;
            }
            let info = cache.get(path);
            if unusable_title(&info) {
                debug!(path = %path, "no usable title");
                out.fail(path, ResolveError::Validation(info.original_name.clone()));
                continue;
            }
            match info.media_type {
                MediaType::Tv => shows.push(info),
                _ => movies.push(info),
            }
        }

        let groups = group_tv(&shows, cache.analyzer());
        out.merge(resolve_groups(&matcher, &groups, cancel).await);

        for info in &movies {
            if cancel.is_cancelled() {
                out.fail(&info.path, ResolveError::Cancelled);
                continue;
            }
            match matcher.resolve_movie(info, cancel).await {
                Ok(list) => {
                    for suggestion in list {
                        out.push(&info.path, suggestion);
                    }
                }
                Err(e) => {
                    warn!(path = %info.path, error = %e, "movie not resolved");
                    out.fail(&info.path, e);
                }
            }
        }

        info!(
            resolved = out.len(),
            failed = out.failures.len(),
            parsed = cache.len(),
            "catalog batch finished"
        );
        Ok(out)
    }

    fn source(&self) -> Source {
        Source::Catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::matching::catalog::tests::{MockCatalog, candidate};
    use crate::model::SkipReason;

    fn pipeline(catalog: MockCatalog) -> CatalogPipeline {
        let library = LibraryConfig::default();
        CatalogPipeline::new(
            Arc::new(catalog),
            Arc::new(PathAnalyzer::new(&library)),
            Arc::new(CanonicalPathBuilder::new(&library.tv_roots)),
        )
    }

    fn catalog() -> MockCatalog {
        MockCatalog::default()
            .with_show("新闻女王", vec![candidate(7, "新闻女王", "新聞女王", Some(2023))])
            .with_season(7, 2, 20)
            .with_movie("寄生虫", vec![candidate(9, "寄生虫", "기생충", Some(2019))])
    }

    #[tokio::test]
    async fn test_resolve_one_tv() {
        let p = pipeline(catalog());
        let s = p
            .resolve_one("/tvs/新闻女王 S2/X.W.N.W.2.2025.S02E06.2160p.HDR.mp4", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(s.new_path, "/tvs/新闻女王/Season 02/新闻女王 - S02E06 - 第6集.mp4");
        assert_eq!(s.source, Source::Catalog);
    }

    #[tokio::test]
    async fn test_resolve_one_canonical_is_skipped() {
        let p = pipeline(MockCatalog::default());
        let s = p
            .resolve_one("/tvs/新闻女王/Season 02/新闻女王 - S02E06 - 第6集.mp4", &CancellationToken::new())
            .await
            .unwrap();
        assert!(s.skipped);
        assert_eq!(s.skip_reason, Some(SkipReason::AlreadyCanonical));
    }

    #[tokio::test]
    async fn test_batch_mixes_shows_movies_and_skips() {
        let p = pipeline(catalog());
        let paths: Vec<String> = [
            "/tvs/新闻女王 S2/新闻女王.S02E01.mp4",
            "/tvs/新闻女王 S2/新闻女王.S02E02.mp4",
            "/tvs/新闻女王 S2/新闻女王 花絮.mp4",
            "/movies/寄生虫.2019.1080p.mkv",
            "/movies/无人知晓的电影.mkv",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let result = p.resolve_batch(&paths, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.suggestions["/tvs/新闻女王 S2/新闻女王.S02E02.mp4"][0].episode, Some(2));
        let bonus = &result.suggestions["/tvs/新闻女王 S2/新闻女王 花絮.mp4"][0];
        assert_eq!(bonus.skip_reason, Some(SkipReason::SpecialContent));
        let movie = &result.suggestions["/movies/寄生虫.2019.1080p.mkv"][0];
        assert_eq!(movie.new_path, "/movies/寄生虫 (2019).mkv");
        assert!(matches!(
            result.failures.get("/movies/无人知晓的电影.mkv"),
            Some(ResolveError::NotFound { .. })
        ));
        assert_eq!(result.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_every_file() {
        let p = pipeline(catalog());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let paths = vec!["/movies/寄生虫.2019.mkv".to_string(), "/tvs/新闻女王 S2/新闻女王.S02E01.mp4".to_string()];
        let result = p.resolve_batch(&paths, &cancel).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.values().all(|e| matches!(e, ResolveError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_finished_files() {
        let p = pipeline(
            MockCatalog::default()
                .with_show("新闻女王", vec![candidate(7, "新闻女王", "新聞女王", Some(2023))])
                .with_season(7, 1, 10)
                .with_movie("寄生虫", vec![candidate(9, "寄生虫", "기생충", Some(2019))])
                .cancelling_at_season(2),
        );
        let cancel = CancellationToken::new();
        let paths: Vec<String> = [
            "/tvs/新闻女王/新闻女王.S01E03.mp4",
            "/tvs/新闻女王/新闻女王.S02E01.mp4",
            "/movies/寄生虫.2019.1080p.mkv",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let result = p.resolve_batch(&paths, &cancel).await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(result.suggestions["/tvs/新闻女王/新闻女王.S01E03.mp4"][0].episode, Some(3));
        assert_eq!(result.len(), 1);
        for path in ["/tvs/新闻女王/新闻女王.S02E01.mp4", "/movies/寄生虫.2019.1080p.mkv"] {
            assert!(matches!(result.failures.get(path), Some(ResolveError::Cancelled)));
        }
    }
}
