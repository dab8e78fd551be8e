pub mod chat;
pub mod chunker;
pub mod error;
pub mod extractor;
pub mod models;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod store;
pub mod ws;
