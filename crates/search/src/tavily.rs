//! Tavily search client.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use pipeline::{ProviderError, SearchHit, SearchProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

/// Tavily rejects requests for more than this many results.
const MAX_RESULTS_PER_QUERY: usize = 10;

/// Snippets are cut to this many characters.
const MAX_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct TavilyConfig {
    pub base_url: String,
    pub api_key: String,
    /// `"basic"` or `"advanced"`.
    pub search_depth: String,
    pub timeout: Duration,
    /// Distinct queries kept in the result cache; the oldest is evicted first.
    pub cache_capacity: usize,
}

impl TavilyConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            search_depth: "advanced".to_string(),
            timeout: Duration::from_secs(30),
            cache_capacity: 128,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchSetupError {
    #[error("search API key is empty")]
    MissingApiKey,

    #[error("search base URL '{0}' is not an http(s) URL")]
    InvalidBaseUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_answer: bool,
    include_raw_content: bool,
    include_images: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl From<TavilyResult> for SearchHit {
    fn from(result: TavilyResult) -> Self {
        Self {
            title: result
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "No title".to_string()),
            snippet: result.content.chars().take(MAX_SNIPPET_CHARS).collect(),
            relevance_score: result.score.clamp(0.0, 1.0),
            url: result.url,
        }
    }
}

type CacheKey = (String, usize);

/// Insertion-ordered cache with a fixed number of entries.
#[derive(Debug, Default)]
struct ResultCache {
    capacity: usize,
    entries: HashMap<CacheKey, Vec<SearchHit>>,
    order: VecDeque<CacheKey>,
}

impl ResultCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Vec<SearchHit>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, hits: Vec<SearchHit>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), hits).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// [`SearchProvider`] backed by Tavily, with a bounded per-process result
/// cache keyed on `(query, max_results)`.
#[derive(Debug)]
pub struct TavilySearch {
    config: TavilyConfig,
    endpoint: String,
    http: reqwest::Client,
    cache: Mutex<ResultCache>,
}

impl TavilySearch {
    /// # Errors
    ///
    /// [`SearchSetupError`] if the key is empty, the URL is not http(s), or
    /// the HTTP client cannot be built.
    pub fn new(config: TavilyConfig) -> Result<Self, SearchSetupError> {
        if config.api_key.trim().is_empty() {
            return Err(SearchSetupError::MissingApiKey);
        }
        let base = config.base_url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(SearchSetupError::InvalidBaseUrl(config.base_url.clone()));
        }
        let endpoint = format!("{base}/search");
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            cache: Mutex::new(ResultCache::new(config.cache_capacity)),
            config,
            endpoint,
            http,
        })
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let body = SearchRequest {
            api_key: &self.config.api_key,
            query,
            max_results,
            search_depth: &self.config.search_depth,
            include_answer: false,
            include_raw_content: false,
            include_images: false,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), retry_after, &text));
        }

        let parsed: SearchResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                transport_error(err)
            } else {
                ProviderError::MalformedResponse {
                    message: err.to_string(),
                }
            }
        })?;
        Ok(parsed
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(max_results)
            .map(SearchHit::from)
            .collect())
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let max_results = max_results.clamp(1, MAX_RESULTS_PER_QUERY);
        let key = (query.to_string(), max_results);
        let cached = self.cache.lock().get(&key);
        if let Some(hits) = cached {
            debug!("Using cached search results");
            return Ok(hits);
        }

        let hits = self.fetch(query, max_results).await?;
        info!(results = hits.len(), "Search completed");
        self.cache.lock().insert(key, hits.clone());
        Ok(hits)
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            message: err.to_string(),
        }
    } else {
        ProviderError::Transport {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> TavilySearch {
        let mut config = TavilyConfig::new("tvly-test");
        config.base_url = server.uri();
        TavilySearch::new(config).unwrap()
    }

    fn results() -> serde_json::Value {
        json!({
            "query": "transformers",
            "results": [
                {"title": "Attention Is All You Need", "url": "https://arxiv.org/abs/1706.03762",
                 "content": "x".repeat(800), "score": 0.98},
                {"title": "", "url": "https://example.com/post", "content": "A post", "score": 0.4},
                {"title": "No link", "url": "", "content": "dropped", "score": 0.9}
            ]
        })
    }

    #[tokio::test]
    async fn maps_results_to_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({
                "api_key": "tvly-test",
                "query": "transformers",
                "max_results": 5,
                "search_depth": "advanced"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(results()))
            .expect(1)
            .mount(&server)
            .await;

        let hits = client(&server).search("transformers", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Attention Is All You Need");
        assert_eq!(hits[0].snippet.chars().count(), 500);
        assert_eq!(hits[1].title, "No title");
        assert!((hits[0].relevance_score - 0.98).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeated_queries_are_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results()))
            .expect(1)
            .mount(&server)
            .await;

        let search = client(&server);
        let first = search.search("transformers", 5).await.unwrap();
        let second = search.search("transformers", 5).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cache_evicts_oldest_query_at_capacity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results()))
            .expect(3)
            .mount(&server)
            .await;

        let mut config = TavilyConfig::new("tvly-test");
        config.base_url = server.uri();
        config.cache_capacity = 1;
        let search = TavilySearch::new(config).unwrap();

        search.search("first", 5).await.unwrap();
        search.search("second", 5).await.unwrap();
        search.search("second", 5).await.unwrap();
        search.search("first", 5).await.unwrap();
        assert_eq!(search.cache.lock().entries.len(), 1);
    }

    #[tokio::test]
    async fn max_results_is_capped_at_ten() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"max_results": 10})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&server)
            .await;

        let hits = client(&server).search("anything", 50).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn bad_key_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client(&server).search("transformers", 5).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized { .. }));
        assert_eq!(err.retry_policy(), pipeline::RetryPolicy::NonRetryable);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results()))
            .mount(&server)
            .await;

        let search = client(&server);
        assert!(search.search("transformers", 5).await.is_err());
        assert_eq!(search.search("transformers", 5).await.unwrap().len(), 2);
    }
}
