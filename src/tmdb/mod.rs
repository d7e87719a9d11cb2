use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::CatalogConfig;
use crate::error::{ResolveError, Result};
use crate::model::{CatalogCandidate, CatalogEpisode, SeasonDetails};
use crate::ratelimit::RateLimiter;

#[derive(Debug, Deserialize)]
struct SearchResult<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Movie {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    original_title: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvShow {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    original_name: String,
    first_air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Season {
    season_number: u32,
    #[serde(default)]
    episodes: Vec<Episode>,
}

#[derive(Debug, Deserialize)]
struct Episode {
    episode_number: u32,
    #[serde(default)]
    name: String,
    air_date: Option<String>,
}

pub struct TmdbClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    language: String,
    limiter: RateLimiter,
}

impl TmdbClient {
    pub fn new(config: &CatalogConfig, limiter: RateLimiter) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            limiter,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.limiter.acquire(cancel).await?;

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "tmdb request");

        let request = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", self.language.as_str())])
            .query(params)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, %status, "tmdb request failed");
            return Err(ResolveError::Upstream(format!("TMDB {path} 返回 {status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Catalog for TmdbClient {
    async fn search_movie(
        &self,
        query: &str,
        year: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogCandidate>> {
        let mut params = vec![("query", query.to_string())];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }
        let result: SearchResult<Movie> = self.get("/search/movie", &params, cancel).await?;
        Ok(result
            .results
            .into_iter()
            .map(|m| CatalogCandidate {
                id: m.id,
                name: m.title,
                original_name: m.original_title,
                year: date_year(m.release_date.as_deref()),
            })
            .collect())
    }

    async fn search_tv(
        &self,
        query: &str,
        year: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogCandidate>> {
        let mut params = vec![("query", query.to_string())];
        if let Some(year) = year {
            params.push(("first_air_date_year", year.to_string()));
        }
        let result: SearchResult<TvShow> = self.get("/search/tv", &params, cancel).await?;
        Ok(result
            .results
            .into_iter()
            .map(|s| CatalogCandidate {
                id: s.id,
                name: s.name,
                original_name: s.original_name,
                year: date_year(s.first_air_date.as_deref()),
            })
            .collect())
    }

    async fn season_details(
        &self,
        show_id: u64,
        season: u32,
        cancel: &CancellationToken,
    ) -> Result<SeasonDetails> {
        let path = format!("/tv/{show_id}/season/{season}");
        let details: Season = self.get(&path, &[], cancel).await?;
        Ok(SeasonDetails {
            season_number: details.season_number,
            episodes: details
                .episodes
                .into_iter()
                .map(|e| CatalogEpisode {
                    number: e.episode_number,
                    name: e.name,
                    air_date: parse_date(e.air_date.as_deref()),
                })
                .collect(),
        })
    }
}

fn parse_date(date: Option<&str>) -> Option<NaiveDate> {
    date.filter(|d| !d.is_empty())
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn date_year(date: Option<&str>) -> Option<u32> {
    parse_date(date).and_then(|d| u32::try_from(d.year()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_payload() {
        let json = r#"{
            "page": 1,
            "results": [
                {"id": 1399, "name": "权力的游戏", "original_name": "Game of Thrones", "first_air_date": "2011-04-17"},
                {"id": 2, "name": "未播出", "original_name": "Unaired", "first_air_date": ""}
            ]
        }"#;
        let parsed: SearchResult<TvShow> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(date_year(parsed.results[0].first_air_date.as_deref()), Some(2011));
        assert_eq!(date_year(parsed.results[1].first_air_date.as_deref()), None);
    }

    #[test]
    fn test_parse_season_payload() {
        let json = r#"{
            "season_number": 12,
            "episodes": [
                {"episode_number": 11, "name": "第11期上", "air_date": "2024-05-01"},
                {"episode_number": 12, "name": "第11期下", "air_date": "2024-05-01"},
                {"episode_number": 13, "name": "第12期", "air_date": null}
            ]
        }"#;
        let season: Season = serde_json::from_str(json).unwrap();
        assert_eq!(season.episodes.len(), 3);
        assert_eq!(
            parse_date(season.episodes[0].air_date.as_deref()),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
        assert_eq!(parse_date(season.episodes[2].air_date.as_deref()), None);
    }

    #[test]
    fn test_missing_results_defaults_empty() {
        let parsed: SearchResult<Movie> = serde_json::from_str(r#"{"page": 1}"#).unwrap();
        assert!(parsed.results.is_empty());
    }
}
