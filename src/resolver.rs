use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::hybrid::{HybridResolver, HybridStrategy};
use crate::llm::{GenerativeModel, ModelSuggester, OpenAiModel};
use crate::model::{BatchResolution, HybridResolution, Suggestion};
use crate::parser::PathAnalyzer;
use crate::pathgen::CanonicalPathBuilder;
use crate::pipeline::{CatalogPipeline, SuggestionResolver};
use crate::ratelimit::RateLimiter;
use crate::tmdb::TmdbClient;

/// Entry point of the engine: single-file, batch and hybrid resolution.
///
/// Holds no state between calls apart from the shared rate limiters inside
/// its clients.
pub struct Resolver {
    pipeline: Arc<CatalogPipeline>,
    hybrid: HybridResolver,
}

impl Resolver {
    /// TMDB catalog plus, when enabled, an OpenAI-compatible model.
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = TmdbClient::new(&config.catalog, RateLimiter::new(config.catalog.qps))?;
        let model: Option<Arc<dyn GenerativeModel>> = if config.model.enabled {
            let model = OpenAiModel::new(&config.model, RateLimiter::new(config.model.qps))?;
            Some(Arc::new(model))
        } else {
            None
        };
        info!(
            language = %config.catalog.language,
            model = config.model.enabled,
            strategy = %config.hybrid.strategy,
            "resolver ready"
        );
        Ok(Self::new(Arc::new(catalog), model, config))
    }

    pub fn new(catalog: Arc<dyn Catalog>, model: Option<Arc<dyn GenerativeModel>>, config: &Config) -> Self {
        let analyzer = Arc::new(PathAnalyzer::new(&config.library));
        let paths = Arc::new(CanonicalPathBuilder::new(&config.library.tv_roots));
        let pipeline = Arc::new(CatalogPipeline::new(catalog, Arc::clone(&analyzer), Arc::clone(&paths)));

        let suggester = model.map(|model| {
            Arc::new(ModelSuggester::new(model, analyzer, paths, &config.model)) as Arc<dyn SuggestionResolver>
        });
        let hybrid = HybridResolver::new(Arc::clone(&pipeline) as Arc<dyn SuggestionResolver>, suggester);

        Self { pipeline, hybrid }
    }

    pub fn has_model(&self) -> bool {
        self.hybrid.has_model()
    }

    pub async fn resolve(&self, path: &str, cancel: &CancellationToken) -> Result<Suggestion> {
        self.pipeline.resolve_one(path, cancel).await
    }

    pub async fn resolve_batch(&self, paths: &[String], cancel: &CancellationToken) -> Result<BatchResolution> {
        self.pipeline.resolve_batch(paths, cancel).await
    }

    pub async fn resolve_hybrid(
        &self,
        paths: &[String],
        strategy: HybridStrategy,
        cancel: &CancellationToken,
    ) -> Result<HybridResolution> {
        self.hybrid.resolve(paths, strategy, cancel).await
    }
}
