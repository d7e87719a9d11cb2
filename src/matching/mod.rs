pub mod catalog;
pub mod episode;

pub use catalog::{CatalogMatcher, ScoredCandidate, confidence, exact_matches, search_query};
pub use episode::{EpisodeMatch, check_range, match_episode, part_index};
