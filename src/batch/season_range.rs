use std::sync::Arc;

use tracing::debug;

use crate::matching::EpisodeMatch;
use crate::model::{MediaInfo, SeasonDetails};

/// Where a file lands inside a multi-season directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub season: u32,
    pub episode: EpisodeMatch,
}

#[derive(Debug, Default)]
pub struct RangeAssignment {
    pub placed: Vec<(Arc<MediaInfo>, Placement)>,
    pub unplaced: Vec<Arc<MediaInfo>>,
}

/// Spread files over consecutive seasons by cumulative episode counts.
///
/// Files are ordered by parsed episode number. A file numbered `n` belongs to
/// the season whose window `(offset, offset + count]` contains `n`, as
/// episode `n - offset`. Files without a number, or past the last window,
/// stay unplaced.
pub fn assign_by_windows(files: &[Arc<MediaInfo>], seasons: &[Arc<SeasonDetails>]) -> RangeAssignment {
    let mut sorted: Vec<&Arc<MediaInfo>> = files.iter().collect();
    sorted.sort_by_key(|info| (info.episode.is_none(), info.episode));

    let mut windows = Vec::with_capacity(seasons.len());
    let mut offset = 0u32;
    for season in seasons {
        let count = u32::try_from(season.episode_count()).unwrap_or(u32::MAX);
        windows.push((offset, count, season));
        offset = offset.saturating_add(count);
    }

    let mut result = RangeAssignment::default();
    for info in sorted {
        let window = info.episode.and_then(|n| {
            windows
                .iter()
                .find(|(start, count, _)| n > *start && n - *start <= *count)
                .map(|(start, _, season)| (n - *start, season))
        });

        match window {
            Some((local, season)) => {
                debug!(path = %info.path, global = ?info.episode, season = season.season_number, episode = local, "range assignment");
                let title = season
                    .episode(local)
                    .map(|e| e.name.clone())
                    .filter(|n| !n.is_empty());
                result.placed.push((
                    Arc::clone(info),
                    Placement {
                        season: season.season_number,
                        episode: EpisodeMatch { number: local, title },
                    },
                ));
            }
            None => result.unplaced.push(Arc::clone(info)),
        }
    }
    result
}
