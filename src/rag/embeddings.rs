use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Output size of the embedding model; the vector collection is created with
/// this dimensionality.
pub const EMBEDDING_DIM: usize = 1536;

/// Text in, fixed-length vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "embedding",
                format!("{} - {}", status, error_text),
            ));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::upstream("embedding", "response contained no embedding"))?;

        if vector.len() != EMBEDDING_DIM {
            return Err(Error::upstream(
                "embedding",
                format!(
                    "expected {} dimensions, got {}",
                    EMBEDDING_DIM,
                    vector.len()
                ),
            ));
        }

        Ok(vector)
    }
}
