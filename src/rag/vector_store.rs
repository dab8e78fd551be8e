use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::rag::embeddings::EMBEDDING_DIM;

const READY_POLL_ATTEMPTS: u32 = 20;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Payload stored with each chunk in the vector index.
///
/// `user_id` must always equal the owning document's user; search filters on
/// it so one tenant's chunks can never reach another tenant's queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: i64,
    pub document_name: String,
    pub user_id: i64,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub text: String,
}

impl ChunkPayload {
    /// Stable chunk identity: `documentId-chunkIndex`.
    pub fn chunk_key(&self) -> String {
        format!("{}-{}", self.document_id, self.chunk_index)
    }
}

/// A vector plus its payload, ready for upsert.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

impl ChunkRecord {
    /// Qdrant only accepts UUID or integer point ids, so the chunk key is
    /// mapped to a deterministic UUIDv5. Re-processing a document overwrites
    /// its points instead of accumulating duplicates.
    pub fn point_id(&self) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.payload.chunk_key().as_bytes()).to_string()
    }
}

/// A search hit with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Hosted vector index operations used by the pipeline and the retriever.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upsert all records as a single batch.
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// Top-`limit` nearest neighbors restricted to `user_id`.
    async fn search(&self, vector: Vec<f32>, user_id: i64, limit: u64) -> Result<Vec<ScoredChunk>>;

    /// Remove every chunk of a document via a metadata filter.
    async fn delete_document(&self, document_id: i64) -> Result<()>;
}

pub struct QdrantIndex {
    client: Qdrant,
    collection_name: String,
    ready: OnceCell<()>,
}

impl QdrantIndex {
    pub fn new(url: &str, collection_name: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| Error::Qdrant(format!("client build failed: {}", e)))?;

        Ok(Self {
            client,
            collection_name: collection_name.to_string(),
            ready: OnceCell::new(),
        })
    }

    /// Create the collection on first use and block until it reports ready.
    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection_name).await? {
            return Ok(());
        }

        tracing::info!(
            "Creating collection {} with dimension {}",
            self.collection_name,
            EMBEDDING_DIM
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                    VectorParamsBuilder::new(EMBEDDING_DIM as u64, Distance::Cosine),
                ),
            )
            .await?;

        self.wait_until_ready().await
    }

    async fn wait_until_ready(&self) -> Result<()> {
        use qdrant_client::qdrant::CollectionStatus;

        for _ in 0..READY_POLL_ATTEMPTS {
            let info = self.client.collection_info(&self.collection_name).await?;
            if let Some(result) = info.result {
                if result.status() == CollectionStatus::Green {
                    return Ok(());
                }
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Err(Error::upstream(
            "qdrant",
            format!(
                "collection {} did not become ready",
                self.collection_name
            ),
        ))
    }

    fn user_filter(user_id: i64) -> Filter {
        Filter {
            must: vec![Condition::matches("user_id", user_id)],
            ..Default::default()
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.ready
            .get_or_try_init(|| self.ensure_collection())
            .await?;

        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| {
                let id = record.point_id();
                let payload = match serde_json::to_value(&record.payload) {
                    Ok(JsonValue::Object(map)) => map,
                    _ => JsonMap::new(),
                };
                PointStruct::new(id, record.vector, payload)
            })
            .collect();

        tracing::debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection_name
        );
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points))
            .await?;

        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, user_id: i64, limit: u64) -> Result<Vec<ScoredChunk>> {
        if !self.client.collection_exists(&self.collection_name).await? {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection_name, vector, limit)
                    .filter(Self::user_filter(user_id))
                    .with_payload(true),
            )
            .await?;

        let mut results = Vec::new();
        for point in response.result {
            let map: JsonMap<String, JsonValue> = point
                .payload
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect();
            match serde_json::from_value::<ChunkPayload>(JsonValue::Object(map)) {
                Ok(payload) => results.push(ScoredChunk {
                    score: point.score,
                    payload,
                }),
                Err(e) => {
                    tracing::warn!("Skipping point with malformed payload: {}", e);
                }
            }
        }

        Ok(results)
    }

    async fn delete_document(&self, document_id: i64) -> Result<()> {
        if !self.client.collection_exists(&self.collection_name).await? {
            return Ok(());
        }

        let filter = Filter {
            must: vec![Condition::matches("document_id", document_id)],
            ..Default::default()
        };
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection_name).points(filter))
            .await?;

        Ok(())
    }
}

/// Convert a Qdrant payload value to serde_json for payload deserialization.
fn json_from_qdrant_value(v: qdrant_client::qdrant::Value) -> JsonValue {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::IntegerValue(i)) => JsonValue::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::ListValue(list)) => JsonValue::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => JsonValue::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(document_id: i64, chunk_index: usize) -> ChunkPayload {
        ChunkPayload {
            document_id,
            document_name: "notes.txt".to_string(),
            user_id: 1,
            chunk_index,
            page: None,
            text: "chunk text".to_string(),
        }
    }

    #[test]
    fn chunk_key_is_document_and_index() {
        assert_eq!(payload(7, 3).chunk_key(), "7-3");
    }

    #[test]
    fn point_ids_are_deterministic_and_distinct() {
        let a = ChunkRecord {
            vector: vec![0.0],
            payload: payload(7, 0),
        };
        let b = ChunkRecord {
            vector: vec![0.0],
            payload: payload(7, 0),
        };
        let c = ChunkRecord {
            vector: vec![0.0],
            payload: payload(7, 1),
        };
        assert_eq!(a.point_id(), b.point_id());
        assert_ne!(a.point_id(), c.point_id());
        // Must parse as a UUID for the index to accept it.
        assert!(Uuid::parse_str(&a.point_id()).is_ok());
    }

    #[test]
    fn payload_round_trips_through_json() {
        let original = ChunkPayload {
            page: Some(4),
            ..payload(9, 2)
        };
        let value = serde_json::to_value(&original).unwrap();
        let back: ChunkPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.document_id, 9);
        assert_eq!(back.chunk_index, 2);
        assert_eq!(back.page, Some(4));
        assert_eq!(back.user_id, original.user_id);
    }

    #[test]
    fn payload_without_page_omits_the_field() {
        let value = serde_json::to_value(payload(1, 0)).unwrap();
        assert!(value.get("page").is_none());
        let back: ChunkPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.page, None);
    }
}
