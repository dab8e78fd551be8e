use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::extractor;
use crate::models::{
    ChatSession, CreateSessionRequest, Document, DocumentStatus, Message, UploadResponse,
    UserQuery,
};
use crate::pipeline::DocumentPipeline;
use crate::rag::vector_store::VectorIndex;
use crate::store::Store;
use crate::ws::{self, ChatGateway};

/// Upload size ceiling: 10 MiB.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<DocumentPipeline>,
    pub index: Arc<dyn VectorIndex>,
    pub gateway: Arc<ChatGateway>,
    pub upload_dir: PathBuf,
}

type HandlerError = (StatusCode, String);

fn http_error(e: Error) -> HandlerError {
    let status = match e {
        Error::Validation(_) | Error::EmptyDocument => StatusCode::BAD_REQUEST,
        Error::Authorization(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Upstream { .. } | Error::CompletionFailure(_) | Error::Qdrant(_) | Error::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/documents", post(upload_document).get(list_documents))
        .route("/api/documents/:id", delete(delete_document))
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/api/sessions/:id/messages", get(list_messages))
        .route("/ws", get(ws::ws_handler))
        .route("/api/health", get(health_check))
        // A little above the document ceiling so the multipart framing fits.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, HandlerError> {
    let mut user_id: Option<i64> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid multipart body: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        if field_name == "user_id" {
            let text = field
                .text()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            user_id = Some(text.trim().parse().map_err(|_| {
                (StatusCode::BAD_REQUEST, "user_id must be an integer".to_string())
            })?);
        } else if field_name == "file" {
            let name = field
                .file_name()
                .map(sanitize_file_name)
                .unwrap_or_else(|| "upload".to_string());
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            file = Some((name, content_type, bytes.to_vec()));
        }
    }

    let user_id =
        user_id.ok_or((StatusCode::BAD_REQUEST, "missing user_id field".to_string()))?;
    let (name, content_type, bytes) =
        file.ok_or((StatusCode::BAD_REQUEST, "missing file field".to_string()))?;

    // Rejected uploads must leave no document record behind, so both checks
    // run before anything is persisted.
    if !extractor::is_supported(&content_type) {
        return Err(http_error(Error::Validation(format!(
            "unsupported content type: {}",
            content_type
        ))));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(http_error(Error::Validation(format!(
            "file exceeds {} byte limit",
            MAX_UPLOAD_BYTES
        ))));
    }

    let storage_path = state
        .upload_dir
        .join(format!("{}_{}", uuid::Uuid::new_v4(), name));

    // The bytes go to disk before the record exists: a storage failure must
    // not leave a document stuck at `processing` with no task to finish it.
    tokio::fs::write(&storage_path, &bytes).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to store upload: {}", e),
        )
    })?;

    let document = match state
        .store
        .create_document(
            user_id,
            &name,
            bytes.len() as u64,
            &content_type,
            &storage_path.to_string_lossy(),
        )
        .await
    {
        Ok(document) => document,
        Err(e) => {
            let _ = tokio::fs::remove_file(&storage_path).await;
            return Err(http_error(e));
        }
    };

    // The upload response returns immediately with status `processing`; the
    // detached task records the terminal status, observable by re-polling.
    spawn_processing(state.clone(), document.clone(), storage_path);

    Ok(Json(UploadResponse { document }))
}

fn spawn_processing(state: Arc<AppState>, document: Document, path: PathBuf) {
    tokio::spawn(async move {
        let result = state
            .pipeline
            .process(
                &path,
                document.id,
                &document.name,
                document.user_id,
                &document.content_type,
            )
            .await;

        let (status, page_count) = match result {
            Ok(outcome) => {
                tracing::info!(
                    "Document {} processed: {} chunks",
                    document.id,
                    outcome.chunk_count
                );
                (DocumentStatus::Processed, outcome.page_count)
            }
            Err(e) => {
                tracing::error!("Document {} processing failed: {}", document.id, e);
                (DocumentStatus::Failed, None)
            }
        };

        if let Err(e) = state
            .store
            .set_document_status(document.id, status, page_count)
            .await
        {
            tracing::error!("Failed to record status for document {}: {}", document.id, e);
        }
    });
}

fn sanitize_file_name(name: &str) -> String {
    FsPath::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string())
}

async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Document>>, HandlerError> {
    let documents = state
        .store
        .list_documents(query.user_id)
        .await
        .map_err(http_error)?;
    Ok(Json(documents))
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<StatusCode, HandlerError> {
    let document = state
        .store
        .get_document(id)
        .await
        .map_err(http_error)?
        .ok_or_else(|| http_error(Error::NotFound(format!("document {}", id))))?;
    if document.user_id != query.user_id {
        return Err(http_error(Error::Authorization(format!(
            "document {} does not belong to user {}",
            id, query.user_id
        ))));
    }

    state.index.delete_document(id).await.map_err(http_error)?;
    if !document.storage_path.is_empty() {
        if let Err(e) = tokio::fs::remove_file(&document.storage_path).await {
            tracing::warn!("Failed to remove stored file for document {}: {}", id, e);
        }
    }
    state.store.delete_document(id).await.map_err(http_error)?;

    Ok(StatusCode::NO_CONTENT)
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, HandlerError> {
    let session = state
        .store
        .create_session(request.user_id, &request.title)
        .await
        .map_err(http_error)?;
    Ok(Json(session))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<ChatSession>>, HandlerError> {
    let sessions = state
        .store
        .list_sessions(query.user_id)
        .await
        .map_err(http_error)?;
    Ok(Json(sessions))
}

async fn session_owned_by(
    state: &AppState,
    session_id: i64,
    user_id: i64,
) -> Result<ChatSession, HandlerError> {
    let session = state
        .store
        .get_session(session_id)
        .await
        .map_err(http_error)?
        .ok_or_else(|| http_error(Error::NotFound(format!("session {}", session_id))))?;
    if session.user_id != user_id {
        return Err(http_error(Error::Authorization(format!(
            "session {} does not belong to user {}",
            session_id, user_id
        ))));
    }
    Ok(session)
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Message>>, HandlerError> {
    session_owned_by(&state, id, query.user_id).await?;
    let messages = state.store.list_messages(id).await.map_err(http_error)?;
    Ok(Json(messages))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<StatusCode, HandlerError> {
    session_owned_by(&state, id, query.user_id).await?;
    state.store.delete_session(id).await.map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
