//! HTTP client for an external vector-search service.
//!
//! Protocol: `POST /index` with a document, `DELETE /index/{doc_id}`,
//! `POST /search` with `{query, k, filter_metadata}` returning
//! `{results: [{doc_id, text, score, metadata}]}`, `GET /stats` returning
//! `{total_documents}` and `DELETE /index/clear`.

use crate::search::document::{IndexedDocument, ScoredDocument, SearchFilter};
use crate::search::error::{SearchError, SearchResult};
use crate::search::index::SemanticIndex;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Clone)]
pub struct RemoteVectorIndex {
    client: Client,
    base_url: String,
    min_similarity: f32,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ScoredDocument>,
}

#[derive(Deserialize)]
struct StatsResponse {
    total_documents: usize,
}

impl RemoteVectorIndex {
    pub fn new(base_url: impl Into<String>, timeout: Duration, min_similarity: f32) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Backend(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            min_similarity,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: Response) -> SearchResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(SearchError::Unavailable(format!("HTTP {}: {}", status, body)))
        } else {
            Err(SearchError::InvalidRequest(format!("HTTP {}: {}", status, body)))
        }
    }
}

#[async_trait]
impl SemanticIndex for RemoteVectorIndex {
    async fn index(&self, doc: IndexedDocument) -> SearchResult<()> {
        let response = self.client.post(self.url("/index")).json(&doc).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> SearchResult<bool> {
        let response = self
            .client
            .delete(self.url(&format!("/index/{}", id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> SearchResult<Vec<ScoredDocument>> {
        let body = json!({
            "query": query,
            "k": k,
            "filter_metadata": if filter.is_empty() { None } else { Some(&filter.0) },
        });

        let response = self.client.post(self.url("/search")).json(&body).send().await?;
        let parsed: SearchResponse = Self::check(response).await?.json().await?;

        let mut hits: Vec<ScoredDocument> = parsed
            .results
            .into_iter()
            .filter(|hit| filter.matches(&hit.metadata))
            .map(|mut hit| {
                hit.score = hit.score.clamp(0.0, 1.0);
                hit
            })
            .filter(|hit| hit.score >= self.min_similarity)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn len(&self) -> SearchResult<usize> {
        let response = self.client.get(self.url("/stats")).send().await?;
        let stats: StatsResponse = Self::check(response).await?.json().await?;
        Ok(stats.total_documents)
    }

    async fn clear(&self) -> SearchResult<()> {
        let response = self.client.delete(self.url("/index/clear")).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
