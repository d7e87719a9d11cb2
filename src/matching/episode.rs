use tracing::{debug, warn};

use crate::error::{ResolveError, Result};
use crate::model::{CatalogEpisode, MediaInfo, Part, SeasonDetails};

/// Episode picked from a season listing.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeMatch {
    pub number: u32,
    pub title: Option<String>,
}

/// Resolve the file's episode against one season.
///
/// Air date first; several episodes on the same day are told apart by the
/// part marker. Falls back to the parsed episode number.
pub fn match_episode(info: &MediaInfo, season: &SeasonDetails) -> Result<EpisodeMatch> {
    if let Some(found) = match_by_air_date(info, season) {
        return Ok(found);
    }

    let number = info
        .episode
        .ok_or_else(|| ResolveError::Validation(format!("未能识别集数: {}", info.original_name)))?;
    check_range(number, season)?;

    Ok(EpisodeMatch {
        number,
        title: season
            .episode(number)
            .map(|e| e.name.clone())
            .filter(|n| !n.is_empty()),
    })
}

/// `OutOfRange` when `number` lies past the last episode of the season.
pub fn check_range(number: u32, season: &SeasonDetails) -> Result<()> {
    let count = season.episode_count();
    if number == 0 || number as usize > count {
        return Err(ResolveError::OutOfRange {
            episode: number,
            season: season.season_number,
            episode_count: count,
        });
    }
    Ok(())
}

fn match_by_air_date(info: &MediaInfo, season: &SeasonDetails) -> Option<EpisodeMatch> {
    let date = info.air_date?;
    let same_day: Vec<&CatalogEpisode> = season
        .episodes
        .iter()
        .filter(|e| e.air_date == Some(date))
        .collect();

    let selected = match same_day.len() {
        0 => return None,
        1 => same_day[0],
        n => {
            if info.part.is_none() {
                warn!(%date, count = n, "several episodes share the air date without a part marker, taking the first");
            }
            same_day.get(part_index(info.part, n)).copied().unwrap_or(same_day[0])
        }
    };

    debug!(%date, part = ?info.part, episode = selected.number, "matched episode by air date");
    Some(EpisodeMatch {
        number: selected.number,
        title: Some(selected.name.clone()).filter(|n| !n.is_empty()),
    })
}

/// Position of a part among `total` same-day episodes.
pub fn part_index(part: Option<Part>, total: usize) -> usize {
    match (total, part) {
        (2, Some(Part::Last)) => 1,
        (2, _) => 0,
        (3, Some(p)) => p.offset() as usize,
        (3, None) => 0,
        (_, Some(Part::First)) | (_, None) => 0,
        (n, Some(Part::Middle)) => usize::from(n > 2),
        (n, Some(Part::Last)) => n.saturating_sub(1),
    }
}
