pub mod grouper;
pub mod season_range;

pub use grouper::{GroupPlan, TvGroup, group_tv, resolve_groups};
pub use season_range::{Placement, RangeAssignment, assign_by_windows};
