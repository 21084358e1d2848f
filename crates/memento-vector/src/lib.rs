//! Memento Vector crate - embeddings, the vector store and its lifecycle,
//! and budgeted retrieval.
//!
//! The vector store only serves requests while running. The
//! [`LifecycleController`] starts it on demand and stops it after a period of
//! inactivity; [`RetrievalService`] answers similarity queries within a time
//! budget and reports an explicit unavailable outcome instead of failing.

pub mod embedding;
pub mod index;
pub mod lifecycle;
pub mod retrieval;
pub mod store;

pub use embedding::{
    embed_checked, DynEmbeddingService, EmbeddingService, HashEmbedding, OnnxEmbeddingService,
};
pub use index::{cosine_similarity, VectorIndex};
pub use lifecycle::{LifecycleConfig, LifecycleController};
pub use retrieval::{
    ContextProvider, MemoryContext, RetrievalOutcome, RetrievalQuery, RetrievalService,
    RetrievalSettings, UnavailableReason,
};
pub use store::{local_store, LocalVectorStore, UpsertOutcome, VectorStore};
