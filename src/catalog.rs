use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{CatalogCandidate, SeasonDetails};

/// Movie/TV metadata catalog. Results come back in the catalog's own ranking order.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search_movie(
        &self,
        query: &str,
        year: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogCandidate>>;

    async fn search_tv(
        &self,
        query: &str,
        year: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogCandidate>>;

    async fn season_details(
        &self,
        show_id: u64,
        season: u32,
        cancel: &CancellationToken,
    ) -> Result<SeasonDetails>;
}
