use std::path::Path;
use std::sync::Arc;

use futures::future;
use tokio::sync::Semaphore;

use crate::chunker::chunk_text;
use crate::error::{Error, Result};
use crate::extractor::extract_text;
use crate::rag::embeddings::Embedder;
use crate::rag::vector_store::{ChunkPayload, ChunkRecord, VectorIndex};

const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub chunk_count: usize,
    pub page_count: Option<u32>,
}

/// Turns a stored upload into indexed chunks: extract, chunk, embed, upsert.
///
/// Status persistence stays with the caller; this component reports success
/// or failure and the upload handler's background task records the terminal
/// document status.
pub struct DocumentPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    embed_concurrency: usize,
}

impl DocumentPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        embed_concurrency: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            embed_concurrency: embed_concurrency.max(1),
        }
    }

    pub async fn process(
        &self,
        file_path: &Path,
        document_id: i64,
        document_name: &str,
        user_id: i64,
        content_type: &str,
    ) -> Result<ProcessOutcome> {
        let text = extract_text(file_path, content_type)?;
        if text.trim().is_empty() {
            return Err(Error::EmptyDocument);
        }

        let chunks = chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        tracing::info!(
            "Document {} ({}): {} chunks to embed",
            document_id,
            document_name,
            chunks.len()
        );

        // One embedding call per chunk, dispatched concurrently but capped by
        // the semaphore so a large document cannot flood the embedding API.
        let semaphore = Arc::new(Semaphore::new(self.embed_concurrency));
        let embed_tasks = chunks.iter().map(|chunk| {
            let semaphore = semaphore.clone();
            let embedder = self.embedder.clone();
            let text = chunk.text.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::upstream("embedding", e))?;
                embedder.embed(&text).await
            }
        });
        let vectors = future::try_join_all(embed_tasks).await?;

        let records: Vec<ChunkRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord {
                vector,
                payload: ChunkPayload {
                    document_id,
                    document_name: document_name.to_string(),
                    user_id,
                    chunk_index: chunk.index,
                    page: None,
                    text: chunk.text.clone(),
                },
            })
            .collect();

        let chunk_count = records.len();
        self.index.upsert(records).await?;

        Ok(ProcessOutcome {
            chunk_count,
            page_count: None,
        })
    }
}
