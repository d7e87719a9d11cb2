use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::episode::{EpisodeMatch, match_episode};
use crate::catalog::Catalog;
use crate::error::{ResolveError, Result};
use crate::model::{CatalogCandidate, MediaInfo, MediaType, SeasonDetails, Source, Suggestion};
use crate::pathgen::CanonicalPathBuilder;

static TRAILING_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\d{4}$").unwrap());

type SearchKey = (MediaType, String, Option<u32>);

/// A search result that survived exact-name filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: CatalogCandidate,
    /// Position in the catalog's result list
    pub rank: usize,
    pub confidence: f64,
}

/// `1.0 - 0.1 * rank`, plus 0.2 when the years agree, clamped to `[0, 1]`.
pub fn confidence(rank: usize, parsed_year: Option<u32>, candidate_year: Option<u32>) -> f64 {
    let mut score = 1.0 - 0.1 * rank as f64;
    if parsed_year.is_some() && parsed_year == candidate_year {
        score += 0.2;
    }
    score.clamp(0.0, 1.0)
}

fn names_match(query: &str, name: &str) -> bool {
    let query = query.trim();
    !query.is_empty() && query.to_lowercase() == name.trim().to_lowercase()
}

/// Keep results whose localized or original name equals `query` (or `alt`), ignoring case.
pub fn exact_matches(
    results: &[CatalogCandidate],
    query: &str,
    alt: Option<&str>,
    parsed_year: Option<u32>,
) -> Vec<ScoredCandidate> {
    results
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            let accepts = |q: &str| names_match(q, &c.name) || names_match(q, &c.original_name);
            accepts(query) || alt.is_some_and(accepts)
        })
        .map(|(rank, c)| ScoredCandidate {
            candidate: c.clone(),
            rank,
            confidence: confidence(rank, parsed_year, c.year),
        })
        .collect()
}

/// Title used for catalog queries: the parsed title plus any version tag.
pub fn search_query(info: &MediaInfo) -> Result<String> {
    let title = info.title.trim();
    if title.is_empty() {
        return Err(ResolveError::Validation(info.original_name.clone()));
    }
    Ok(match (&info.media_type, &info.version) {
        (MediaType::Tv, Some(version)) => format!("{title} {version}"),
        _ => title.to_string(),
    })
}

/// Resolves parsed files against the catalog.
///
/// Searches and season listings are cached for the lifetime of the matcher,
/// which is one resolution call.
pub struct CatalogMatcher {
    catalog: Arc<dyn Catalog>,
    paths: Arc<CanonicalPathBuilder>,
    searches: Mutex<HashMap<SearchKey, Arc<Vec<CatalogCandidate>>>>,
    seasons: Mutex<HashMap<(u64, u32), Arc<SeasonDetails>>>,
}

impl CatalogMatcher {
    pub fn new(catalog: Arc<dyn Catalog>, paths: Arc<CanonicalPathBuilder>) -> Self {
        Self {
            catalog,
            paths,
            searches: Mutex::new(HashMap::new()),
            seasons: Mutex::new(HashMap::new()),
        }
    }

    pub fn paths(&self) -> &CanonicalPathBuilder {
        &self.paths
    }

    async fn search(
        &self,
        kind: MediaType,
        query: &str,
        year: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<CatalogCandidate>>> {
        let key = (kind, query.to_string(), year);
        if let Some(hit) = self.searches.lock().await.get(&key) {
            return Ok(Arc::clone(hit));
        }

        let results = match kind {
            MediaType::Movie => self.catalog.search_movie(query, year, cancel).await?,
            _ => self.catalog.search_tv(query, year, cancel).await?,
        };
        info!(query, ?year, kind = %kind, count = results.len(), "catalog search");

        let results = Arc::new(results);
        self.searches.lock().await.insert(key, Arc::clone(&results));
        Ok(results)
    }

    pub async fn season(
        &self,
        show_id: u64,
        season: u32,
        cancel: &CancellationToken,
    ) -> Result<Arc<SeasonDetails>> {
        if let Some(hit) = self.seasons.lock().await.get(&(show_id, season)) {
            return Ok(Arc::clone(hit));
        }
        let details = Arc::new(self.catalog.season_details(show_id, season, cancel).await?);
        debug!(show_id, season, episodes = details.episode_count(), "fetched season");
        self.seasons
            .lock()
            .await
            .insert((show_id, season), Arc::clone(&details));
        Ok(details)
    }

    /// Exact-name candidates for `query`, retrying once without the year.
    pub async fn candidates(
        &self,
        kind: MediaType,
        query: &str,
        alt: Option<&str>,
        year_filter: Option<u32>,
        parsed_year: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredCandidate>> {
        let results = self.search(kind, query, year_filter, cancel).await?;
        let found = exact_matches(&results, query, alt, parsed_year);
        if !found.is_empty() {
            return Ok(found);
        }

        let stripped = TRAILING_YEAR.replace(query, "");
        if stripped == query && year_filter.is_none() {
            return Ok(found);
        }
        info!(query, retry = %stripped, "no exact match, retrying without year");
        let results = self.search(kind, &stripped, None, cancel).await?;
        Ok(exact_matches(&results, &stripped, alt, parsed_year))
    }

    pub async fn resolve_movie(&self, info: &MediaInfo, cancel: &CancellationToken) -> Result<Vec<Suggestion>> {
        let query = search_query(info)?;
        let candidates = self
            .candidates(MediaType::Movie, &query, info.alt_title.as_deref(), info.year, info.year, cancel)
            .await?;
        if candidates.is_empty() {
            return Err(ResolveError::not_found(query, None));
        }
        Ok(candidates.iter().map(|c| self.movie_suggestion(info, c)).collect())
    }

    pub async fn resolve_tv(&self, info: &MediaInfo, cancel: &CancellationToken) -> Result<Vec<Suggestion>> {
        let query = search_query(info)?;
        let season_number = info.season.unwrap_or(1);
        let candidates = self
            .candidates(MediaType::Tv, &query, info.alt_title.as_deref(), None, info.year, cancel)
            .await?;
        if candidates.is_empty() {
            return Err(ResolveError::not_found(query, Some(season_number)));
        }

        let mut suggestions = Vec::new();
        let mut last_error = None;
        for scored in &candidates {
            let season = match self.season(scored.candidate.id, season_number, cancel).await {
                Ok(season) => season,
                Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(e) => {
                    warn!(show_id = scored.candidate.id, season = season_number, error = %e, "season lookup failed");
                    last_error = Some(e);
                    continue;
                }
            };
            match match_episode(info, &season) {
                Ok(episode) => suggestions.push(self.tv_suggestion(info, scored, season_number, &episode)),
                Err(e) => {
                    debug!(show_id = scored.candidate.id, error = %e, "candidate discarded");
                    last_error = Some(e);
                }
            }
        }

        if suggestions.is_empty() {
            return Err(match last_error {
                Some(e) if e.is_retryable() || matches!(e, ResolveError::Validation(_)) => e,
                _ => ResolveError::not_found(query, Some(season_number)),
            });
        }
        Ok(suggestions)
    }

    pub fn tv_suggestion(
        &self,
        info: &MediaInfo,
        scored: &ScoredCandidate,
        season: u32,
        episode: &EpisodeMatch,
    ) -> Suggestion {
        let candidate = &scored.candidate;
        let show = display_name(candidate);
        let new_name = self
            .paths
            .tv_file_name(show, season, episode.number, episode.title.as_deref(), &info.extension);
        let new_path = self.paths.tv_path(&info.path, show, season, &new_name);
        debug!(path = %info.path, new_path = %new_path, show_id = candidate.id, "tv suggestion");

        Suggestion {
            original_path: info.path.clone(),
            new_name,
            new_path,
            media_type: MediaType::Tv,
            title: original_or_name(candidate).to_string(),
            localized_title: Some(show.to_string()),
            year: candidate.year.or(info.year),
            season: Some(season),
            episode: Some(episode.number),
            episode_title: episode.title.clone(),
            catalog_id: Some(candidate.id),
            confidence: scored.confidence,
            source: Source::Catalog,
            skipped: false,
            skip_reason: None,
        }
    }

    fn movie_suggestion(&self, info: &MediaInfo, scored: &ScoredCandidate) -> Suggestion {
        let candidate = &scored.candidate;
        let title = display_name(candidate);
        let year = candidate.year.or(info.year);
        let new_name = self.paths.movie_file_name(title, year, &info.extension);
        let new_path = self.paths.movie_path(&info.path, &new_name);

        Suggestion {
            original_path: info.path.clone(),
            new_name,
            new_path,
            media_type: MediaType::Movie,
            title: original_or_name(candidate).to_string(),
            localized_title: Some(title.to_string()),
            year,
            season: None,
            episode: None,
            episode_title: None,
            catalog_id: Some(candidate.id),
            confidence: scored.confidence,
            source: Source::Catalog,
            skipped: false,
            skip_reason: None,
        }
    }
}

fn display_name(candidate: &CatalogCandidate) -> &str {
    if candidate.name.trim().is_empty() {
        &candidate.original_name
    } else {
        &candidate.name
    }
}

fn original_or_name(candidate: &CatalogCandidate) -> &str {
    if candidate.original_name.trim().is_empty() {
        &candidate.name
    } else {
        &candidate.original_name
    }
}
