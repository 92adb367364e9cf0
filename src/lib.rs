//! # Volley RAG
//!
//! Retrieval-augmented question answering over volleyball match results,
//! fixtures, and league standings.
//!
//! Match rows and standings tables are turned into short text records,
//! embedded, and stored in SQLite. A question is classified (which team,
//! past or future), routed to a date-aware team lookup or plain semantic
//! search, and the retrieved records are assembled into a bounded context
//! for an answer generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │ CSV / JSON  │──▶│   Indexer    │──▶│  SQLite   │
//! │ sources     │   │ Text+Embed  │   │ BLOB vecs │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!       question ──▶ Classifier ──▶ Retriever ──▶ Context ──▶ Generator
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │  (vrag)  │       │  (axum)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, metadata, result sets |
//! | [`error`] | Retrieval and ask error types |
//! | [`classifier`] | Entity and temporal intent detection |
//! | [`retriever`] | Semantic and date-aware team retrieval |
//! | [`context`] | Context block assembly |
//! | [`pipeline`] | Request orchestration |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Answer generator abstraction |
//! | [`store`] | Vector index (SQLite and in-memory) |
//! | [`indexer`] | Record construction and incremental indexing |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod classifier;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod indexer;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
