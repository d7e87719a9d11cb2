use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ResolveError, Result};
use crate::model::{BatchResolution, HybridResolution, Source};
use crate::pipeline::SuggestionResolver;

/// A primary result must beat this to skip the secondary resolver.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HybridStrategy {
    #[default]
    CatalogFirst,
    ModelFirst,
    CatalogOnly,
    ModelOnly,
    CompareBoth,
}

impl HybridStrategy {
    pub fn needs_model(self) -> bool {
        matches!(self, Self::ModelFirst | Self::ModelOnly)
    }
}

impl fmt::Display for HybridStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CatalogFirst => "catalog-first",
            Self::ModelFirst => "model-first",
            Self::CatalogOnly => "catalog-only",
            Self::ModelOnly => "model-only",
            Self::CompareBoth => "compare-both",
        };
        f.write_str(s)
    }
}

/// Dispatches a batch over the catalog and generative-model resolvers.
pub struct HybridResolver {
    catalog: Arc<dyn SuggestionResolver>,
    model: Option<Arc<dyn SuggestionResolver>>,
}

impl HybridResolver {
    pub fn new(catalog: Arc<dyn SuggestionResolver>, model: Option<Arc<dyn SuggestionResolver>>) -> Self {
        Self { catalog, model }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub async fn resolve(
        &self,
        paths: &[String],
        strategy: HybridStrategy,
        cancel: &CancellationToken,
    ) -> Result<HybridResolution> {
        info!(%strategy, files = paths.len(), "hybrid resolution started");
        match strategy {
            HybridStrategy::CatalogOnly => Ok(HybridResolution {
                resolution: self.catalog.resolve_batch(paths, cancel).await?,
                used_model: false,
            }),
            HybridStrategy::ModelOnly => Ok(HybridResolution {
                resolution: self.require_model()?.resolve_batch(paths, cancel).await?,
                used_model: true,
            }),
            HybridStrategy::CatalogFirst => {
                with_fallback(self.catalog.as_ref(), self.model.as_deref(), paths, cancel).await
            }
            HybridStrategy::ModelFirst => {
                with_fallback(self.require_model()?.as_ref(), Some(self.catalog.as_ref()), paths, cancel).await
            }
            HybridStrategy::CompareBoth => self.compare(paths, cancel).await,
        }
    }

    fn require_model(&self) -> Result<&Arc<dyn SuggestionResolver>> {
        self.model
            .as_ref()
            .ok_or_else(|| ResolveError::Upstream("生成模型未启用 (model.enabled = false)".to_string()))
    }

    /// Both resolvers on every file; every suggestion is kept for the caller to pick.
    async fn compare(&self, paths: &[String], cancel: &CancellationToken) -> Result<HybridResolution> {
        let Some(model) = &self.model else {
            warn!("compare requested without a model, using catalog only");
            return Ok(HybridResolution {
                resolution: self.catalog.resolve_batch(paths, cancel).await?,
                used_model: false,
            });
        };

        let (catalog, generated) = tokio::join!(
            self.catalog.resolve_batch(paths, cancel),
            model.resolve_batch(paths, cancel)
        );

        let mut out = match catalog {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "catalog side of compare failed");
                fail_all(paths, &e)
            }
        };
        match generated {
            Ok(mut r) => {
                // both sides report the same skipped files
                for (path, list) in r.suggestions.iter_mut() {
                    if out.suggestions.contains_key(path) {
                        list.retain(|s| !s.skipped);
                    }
                }
                r.suggestions.retain(|_, list| !list.is_empty());
                out.merge(r);
            }
            Err(e) => warn!(error = %e, "model side of compare failed"),
        }

        Ok(HybridResolution {
            resolution: out,
            used_model: true,
        })
    }
}

fn fail_all(paths: &[String], err: &ResolveError) -> BatchResolution {
    let mut out = BatchResolution::default();
    for path in paths {
        out.fail(path, err.replicate());
    }
    out
}

fn confident(out: &BatchResolution, path: &str) -> bool {
    out.suggestions
        .get(path)
        .is_some_and(|list| list.iter().any(|s| s.skipped || s.confidence > CONFIDENCE_THRESHOLD))
}

/// Primary first; files it failed or answered with low confidence go to the
/// secondary. When the secondary has nothing either, the primary's
/// low-confidence answer stands.
async fn with_fallback(
    primary: &dyn SuggestionResolver,
    secondary: Option<&dyn SuggestionResolver>,
    paths: &[String],
    cancel: &CancellationToken,
) -> Result<HybridResolution> {
    let mut out = match primary.resolve_batch(paths, cancel).await {
        Ok(r) => r,
        Err(e) => {
            warn!(source = %primary.source(), error = %e, "primary resolver failed");
            fail_all(paths, &e)
        }
    };
    let mut used_model = primary.source() == Source::Model && !paths.is_empty();

    let retry: Vec<String> = paths.iter().filter(|p| !confident(&out, p)).cloned().collect();
    if retry.is_empty() {
        info!(source = %primary.source(), "primary confident for every file");
        return Ok(HybridResolution { resolution: out, used_model });
    }
    let Some(secondary) = secondary else {
        return Ok(HybridResolution { resolution: out, used_model });
    };
    if cancel.is_cancelled() {
        return Ok(HybridResolution { resolution: out, used_model });
    }

    info!(
        files = retry.len(),
        from = %primary.source(),
        to = %secondary.source(),
        "low confidence or failed, falling back"
    );
    used_model |= secondary.source() == Source::Model;

    let mut fallback = match secondary.resolve_batch(&retry, cancel).await {
        Ok(r) => r,
        Err(e) => {
            warn!(source = %secondary.source(), error = %e, "secondary resolver failed, keeping primary results");
            return Ok(HybridResolution { resolution: out, used_model });
        }
    };

    for path in &retry {
        match fallback.suggestions.remove(path) {
            Some(list) => {
                out.failures.remove(path);
                out.suggestions.insert(path.clone(), list);
            }
            None if out.suggestions.contains_key(path) => {
                warn!(path = %path, "secondary failed, using low-confidence primary result");
            }
            None => {
                if let Some(e) = fallback.failures.remove(path) {
                    warn!(path = %path, error = %e, "both resolvers failed");
                }
            }
        }
    }

    Ok(HybridResolution { resolution: out, used_model })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaType, Suggestion};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every path with a fixed confidence, or fails paths listed in `missing`.
    struct MockResolver {
        source: Source,
        confidence: HashMap<String, f64>,
        default: Option<f64>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl MockResolver {
        fn new(source: Source, default: Option<f64>) -> Self {
            Self {
                source,
                confidence: HashMap::new(),
                default,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, path: &str, confidence: f64) -> Self {
            self.confidence.insert(path.to_string(), confidence);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SuggestionResolver for MockResolver {
        async fn resolve_batch(&self, paths: &[String], _cancel: &CancellationToken) -> Result<BatchResolution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().extend(paths.iter().cloned());
            let mut out = BatchResolution::default();
            for path in paths {
                match self.confidence.get(path).copied().or(self.default) {
                    Some(c) => out.push(path, suggestion(path, c, self.source)),
                    None => out.fail(path, ResolveError::not_found("x", None)),
                }
            }
            Ok(out)
        }

        fn source(&self) -> Source {
            self.source
        }
    }

    fn suggestion(path: &str, confidence: f64, source: Source) -> Suggestion {
        Suggestion {
            original_path: path.to_string(),
            new_name: "n.mkv".into(),
            new_path: format!("{path}.new"),
            media_type: MediaType::Movie,
            title: "t".into(),
            localized_title: None,
            year: None,
            season: None,
            episode: None,
            episode_title: None,
            catalog_id: None,
            confidence,
            source,
            skipped: false,
            skip_reason: None,
        }
    }

    fn paths() -> Vec<String> {
        vec!["/a.mkv".to_string(), "/b.mkv".to_string()]
    }

    fn hybrid(catalog: &Arc<MockResolver>, model: &Arc<MockResolver>) -> HybridResolver {
        let catalog: Arc<dyn SuggestionResolver> = catalog.clone();
        let model: Arc<dyn SuggestionResolver> = model.clone();
        HybridResolver::new(catalog, Some(model))
    }

    #[tokio::test]
    async fn test_confident_catalog_never_calls_model() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, Some(0.95)));
        let model = Arc::new(MockResolver::new(Source::Model, Some(0.9)));
        let result = hybrid(&catalog, &model)
            .resolve(&paths(), HybridStrategy::CatalogFirst, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(model.calls(), 0);
        assert!(!result.used_model);
        assert_eq!(result.resolution.len(), 2);
    }

    #[tokio::test]
    async fn test_only_weak_files_fall_back() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, None).with("/a.mkv", 0.95).with("/b.mkv", 0.5));
        let model = Arc::new(MockResolver::new(Source::Model, Some(0.8)));
        let result = hybrid(&catalog, &model)
            .resolve(&paths(), HybridStrategy::CatalogFirst, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.used_model);
        assert_eq!(*model.seen.lock().unwrap(), vec!["/b.mkv".to_string()]);
        let r = &result.resolution;
        assert_eq!(r.suggestions["/a.mkv"][0].source, Source::Catalog);
        assert_eq!(r.suggestions["/b.mkv"][0].source, Source::Model);
    }

    #[tokio::test]
    async fn test_secondary_failure_keeps_low_confidence_primary() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, Some(0.4)));
        let model = Arc::new(MockResolver::new(Source::Model, None));
        let result = hybrid(&catalog, &model)
            .resolve(&paths(), HybridStrategy::CatalogFirst, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(model.calls(), 1);
        assert!(result.resolution.failures.is_empty());
        assert!(
            result
                .resolution
                .suggestions
                .values()
                .all(|l| l[0].source == Source::Catalog && l[0].confidence < CONFIDENCE_THRESHOLD)
        );
    }

    #[tokio::test]
    async fn test_both_failing_reports_failure() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, None));
        let model = Arc::new(MockResolver::new(Source::Model, None));
        let result = hybrid(&catalog, &model)
            .resolve(&paths(), HybridStrategy::CatalogFirst, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.resolution.is_empty());
        assert_eq!(result.resolution.failed_paths(), paths());
    }

    #[tokio::test]
    async fn test_model_first_confident() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, Some(0.95)));
        let model = Arc::new(MockResolver::new(Source::Model, Some(0.75)));
        let result = hybrid(&catalog, &model)
            .resolve(&paths(), HybridStrategy::ModelFirst, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(catalog.calls(), 0);
        assert!(result.used_model);
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, Some(0.7)));
        let model = Arc::new(MockResolver::new(Source::Model, Some(0.9)));
        hybrid(&catalog, &model)
            .resolve(&paths(), HybridStrategy::CatalogFirst, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_source_strategies() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, Some(0.1)));
        let model = Arc::new(MockResolver::new(Source::Model, Some(0.1)));
        let h = hybrid(&catalog, &model);
        let cancel = CancellationToken::new();

        let r = h.resolve(&paths(), HybridStrategy::CatalogOnly, &cancel).await.unwrap();
        assert!(!r.used_model);
        assert_eq!(model.calls(), 0);

        let r = h.resolve(&paths(), HybridStrategy::ModelOnly, &cancel).await.unwrap();
        assert!(r.used_model);
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test]
    async fn test_compare_keeps_both() {
        let catalog = Arc::new(MockResolver::new(Source::Catalog, Some(0.9)));
        let model = Arc::new(MockResolver::new(Source::Model, Some(0.6)));
        let result = hybrid(&catalog, &model)
            .resolve(&paths(), HybridStrategy::CompareBoth, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.used_model);
        for list in result.resolution.suggestions.values() {
            let sources: Vec<Source> = list.iter().map(|s| s.source).collect();
            assert_eq!(sources, vec![Source::Catalog, Source::Model]);
        }
    }

    #[tokio::test]
    async fn test_model_strategies_need_a_model() {
        let catalog: Arc<dyn SuggestionResolver> = Arc::new(MockResolver::new(Source::Catalog, Some(0.9)));
        let h = HybridResolver::new(catalog, None);
        let err = h
            .resolve(&paths(), HybridStrategy::ModelOnly, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("未启用"));
        assert!(HybridStrategy::ModelFirst.needs_model());
        assert!(!HybridStrategy::CompareBoth.needs_model());
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(HybridStrategy::default(), HybridStrategy::CatalogFirst);
        assert_eq!(HybridStrategy::CompareBoth.to_string(), "compare-both");
        assert_eq!(
            HybridStrategy::from_str("model-only", true).unwrap(),
            HybridStrategy::ModelOnly
        );
    }
}
