use std::sync::Arc;

use anyhow::Result;

use docchat::chat::{ChatResponder, CompletionClient};
use docchat::pipeline::DocumentPipeline;
use docchat::rag::embeddings::EmbeddingClient;
use docchat::rag::vector_store::QdrantIndex;
use docchat::rag::ContextRetriever;
use docchat::server::{self, AppState};
use docchat::store::MemoryStore;
use docchat::ws::ChatGateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let qdrant_url =
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string());
    let collection =
        std::env::var("QDRANT_COLLECTION").unwrap_or_else(|_| "documents".to_string());
    let llm_api_url =
        std::env::var("LLM_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let llm_api_key = std::env::var("LLM_API_KEY").ok();
    let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let embedding_model = std::env::var("EMBEDDING_MODEL")
        .unwrap_or_else(|_| "text-embedding-ada-002".to_string());
    let upload_dir = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string());
    let embed_concurrency: usize = std::env::var("EMBED_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8);

    tracing::info!("Connecting to Qdrant: {}", qdrant_url);
    tracing::info!("Using LLM API: {}", llm_api_url);

    let upload_dir = std::path::PathBuf::from(upload_dir);
    tokio::fs::create_dir_all(&upload_dir).await?;

    let embedder = Arc::new(EmbeddingClient::new(
        llm_api_url.clone(),
        llm_api_key.clone(),
        embedding_model,
    ));
    let index = Arc::new(QdrantIndex::new(&qdrant_url, &collection)?);
    let completion = Arc::new(CompletionClient::new(llm_api_url, llm_api_key, chat_model));

    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(DocumentPipeline::new(
        embedder.clone(),
        index.clone(),
        embed_concurrency,
    ));
    let retriever = ContextRetriever::new(embedder, index.clone());
    let responder = ChatResponder::new(completion);
    let gateway = Arc::new(ChatGateway::new(store.clone(), retriever, responder));

    let state = Arc::new(AppState {
        store,
        pipeline,
        index,
        gateway,
        upload_dir,
    });

    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
