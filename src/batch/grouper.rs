use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::season_range::assign_by_windows;
use crate::error::{ResolveError, Result};
use crate::matching::{CatalogMatcher, ScoredCandidate, match_episode};
use crate::model::{BatchResolution, MediaInfo, MediaType, SkipReason};
use crate::parser::PathAnalyzer;
use crate::parser::path_rules::SeasonRange;
use crate::pathgen::skipped_suggestion;

/// How the files of one group are laid over seasons.
#[derive(Debug)]
pub enum GroupPlan {
    /// Files keyed by their parsed season
    Seasons(BTreeMap<u32, Vec<Arc<MediaInfo>>>),
    /// A directory spanning several seasons; files are spread by episode count
    Range {
        range: SeasonRange,
        files: Vec<Arc<MediaInfo>>,
    },
}

/// Files answered by a single catalog query.
#[derive(Debug)]
pub struct TvGroup {
    pub query: String,
    pub alt_title: Option<String>,
    pub year: Option<u32>,
    pub parent_dir: String,
    pub plan: GroupPlan,
}

impl TvGroup {
    pub fn files(&self) -> Box<dyn Iterator<Item = &Arc<MediaInfo>> + '_> {
        match &self.plan {
            GroupPlan::Seasons(map) => Box::new(map.values().flatten()),
            GroupPlan::Range { files, .. } => Box::new(files.iter()),
        }
    }

    pub fn len(&self) -> usize {
        self.files().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition TV files by version tag, then parent directory (and show title
/// within it), then season or season range.
pub fn group_tv(infos: &[Arc<MediaInfo>], analyzer: &PathAnalyzer) -> Vec<TvGroup> {
    type DirKey = (String, String);
    let mut by_version: BTreeMap<Option<String>, BTreeMap<DirKey, Vec<Arc<MediaInfo>>>> = BTreeMap::new();
    for info in infos.iter().filter(|i| i.media_type == MediaType::Tv) {
        by_version
            .entry(info.version.clone())
            .or_default()
            .entry((info.parent_dir().to_string(), info.title.clone()))
            .or_default()
            .push(Arc::clone(info));
    }

    let mut groups = Vec::new();
    for (version, dirs) in by_version {
        for ((parent_dir, title), files) in dirs {
            let Some(first) = files.first() else {
                continue;
            };
            let range = analyzer.season_range(&first.path);
            let base = match &range {
                Some(r) if !r.show.is_empty() => r.show.clone(),
                _ => title,
            };
            let query = match &version {
                Some(v) => format!("{base} {v}"),
                None => base,
            };
            let alt_title = files.iter().find_map(|f| f.alt_title.clone());
            let year = files.iter().find_map(|f| f.year);

            let plan = match range {
                Some(range) => GroupPlan::Range { range, files },
                None => {
                    let mut seasons: BTreeMap<u32, Vec<Arc<MediaInfo>>> = BTreeMap::new();
                    for info in files {
                        seasons.entry(info.season.unwrap_or(1)).or_default().push(info);
                    }
                    GroupPlan::Seasons(seasons)
                }
            };

            debug!(query = %query, dir = %parent_dir, "built group");
            groups.push(TvGroup {
                query,
                alt_title,
                year,
                parent_dir,
                plan,
            });
        }
    }
    groups
}

#[derive(Default)]
struct Attempt {
    resolution: BatchResolution,
    placed: usize,
    cancelled: bool,
}

impl Attempt {
    /// Mark `files` cancelled, keeping whatever was placed before.
    fn cancel<'a>(&mut self, files: impl IntoIterator<Item = &'a Arc<MediaInfo>>) {
        self.cancelled = true;
        for info in files {
            self.resolution.fail(&info.path, ResolveError::Cancelled);
        }
    }
}

/// Resolve every group. Per-file failures are recorded, never raised; once
/// cancelled, the remaining files fail with `Cancelled`.
pub async fn resolve_groups(
    matcher: &CatalogMatcher,
    groups: &[TvGroup],
    cancel: &CancellationToken,
) -> BatchResolution {
    let mut out = BatchResolution::default();
    for group in groups {
        if cancel.is_cancelled() {
            fail_all(&mut out, group, &ResolveError::Cancelled);
            continue;
        }
        match resolve_group(matcher, group, cancel).await {
            Ok(resolution) => out.merge(resolution),
            Err(e) => {
                warn!(query = %group.query, dir = %group.parent_dir, error = %e, "group failed");
                fail_all(&mut out, group, &e);
            }
        }
    }
    out
}

fn fail_all(out: &mut BatchResolution, group: &TvGroup, err: &ResolveError) {
    for info in group.files() {
        out.fail(&info.path, err.replicate());
    }
}

async fn resolve_group(
    matcher: &CatalogMatcher,
    group: &TvGroup,
    cancel: &CancellationToken,
) -> Result<BatchResolution> {
    info!(query = %group.query, dir = %group.parent_dir, files = group.len(), "resolving group");
    let candidates = matcher
        .candidates(
            MediaType::Tv,
            &group.query,
            group.alt_title.as_deref(),
            None,
            group.year,
            cancel,
        )
        .await?;

    for scored in &candidates {
        let attempt = match &group.plan {
            GroupPlan::Seasons(seasons) => resolve_seasons(matcher, scored, seasons, cancel).await?,
            GroupPlan::Range { range, files } => resolve_range(matcher, scored, range, files, cancel).await?,
        };
        if attempt.cancelled {
            info!(query = %group.query, placed = attempt.placed, "group cancelled");
            return Ok(attempt.resolution);
        }
        if attempt.placed > 0 {
            info!(
                query = %group.query,
                show_id = scored.candidate.id,
                placed = attempt.placed,
                "group resolved"
            );
            return Ok(attempt.resolution);
        }
        debug!(show_id = scored.candidate.id, "candidate placed no file");
    }

    let mut out = BatchResolution::default();
    for info in group.files() {
        out.fail(
            &info.path,
            ResolveError::not_found(group.query.clone(), Some(info.season.unwrap_or(1))),
        );
    }
    Ok(out)
}

async fn resolve_seasons(
    matcher: &CatalogMatcher,
    scored: &ScoredCandidate,
    seasons: &BTreeMap<u32, Vec<Arc<MediaInfo>>>,
    cancel: &CancellationToken,
) -> Result<Attempt> {
    let mut attempt = Attempt::default();
    for (&season, files) in seasons {
        let details = match matcher.season(scored.candidate.id, season, cancel).await {
            Ok(details) => details,
            Err(ResolveError::Cancelled) => {
                attempt.cancel(seasons.range(season..).flat_map(|(_, later)| later));
                return Ok(attempt);
            }
            Err(e) => {
                warn!(show_id = scored.candidate.id, season, error = %e, "season lookup failed");
                for info in files {
                    attempt.resolution.fail(&info.path, e.replicate());
                }
                continue;
            }
        };

        for info in files {
            match match_episode(info, &details) {
                Ok(episode) => {
                    let suggestion = matcher.tv_suggestion(info, scored, season, &episode);
                    attempt.resolution.push(&info.path, suggestion);
                    attempt.placed += 1;
                }
                Err(e) => {
                    debug!(path = %info.path, error = %e, "file not placed");
                    attempt.resolution.fail(&info.path, e);
                }
            }
        }
    }
    Ok(attempt)
}

async fn resolve_range(
    matcher: &CatalogMatcher,
    scored: &ScoredCandidate,
    range: &SeasonRange,
    files: &[Arc<MediaInfo>],
    cancel: &CancellationToken,
) -> Result<Attempt> {
    let mut attempt = Attempt::default();
    let mut seasons = Vec::new();
    for season in range.seasons() {
        match matcher.season(scored.candidate.id, season, cancel).await {
            Ok(details) => seasons.push(details),
            Err(ResolveError::Cancelled) => {
                // windows need every season, so nothing in the range can be placed
                attempt.cancel(files);
                return Ok(attempt);
            }
            Err(e) => warn!(show_id = scored.candidate.id, season, error = %e, "season lookup failed, continuing"),
        }
    }

    if seasons.is_empty() {
        return Ok(attempt);
    }

    let assignment = assign_by_windows(files, &seasons);
    info!(
        dir = %range.dir,
        start = range.start,
        end = range.end,
        placed = assignment.placed.len(),
        unplaced = assignment.unplaced.len(),
        "season range assigned"
    );
    for (info, placement) in &assignment.placed {
        let suggestion = matcher.tv_suggestion(info, scored, placement.season, &placement.episode);
        attempt.resolution.push(&info.path, suggestion);
        attempt.placed += 1;
    }
    for info in &assignment.unplaced {
        attempt
            .resolution
            .push(&info.path, skipped_suggestion(&info.path, SkipReason::EpisodeNotFound));
    }
    Ok(attempt)
}
