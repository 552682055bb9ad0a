//! # lakebridge
//!
//! Ingests a source repository's documents into a content lake's vector
//! index under the source repository's own access-control lists, and
//! answers questions over the indexed content scoped to the asking user's
//! permissions.
//!
//! ## Architecture
//!
//! ```text
//! Source repository ──▶ Metadata Ingester ──▶ Content Lake
//!                              │                    │
//!                              ▼                    │
//!                      Transformation Queue          │
//!                              │                    │
//!                              ▼                    │
//!                      Worker Pool (extract →        │
//!                      chunk → embed) ───────────────┘
//!
//! Caller ──▶ Retrieval (permission filter + vector search) ──▶ RAG answer
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`error`] — The `LakebridgeError` taxonomy shared across every module
//! - [`models`] — Core data types: `SourceDocument`, `LakeDocument`, `Chunk`, `Embedding`
//! - [`source_client`] — Source repository REST client (listing, content, ACLs, groups)
//! - [`lake_client`] — Content lake REST client (CRUD, JSON-Patch, HXQL, vector search)
//! - [`extraction_client`] — Text-extraction service client
//! - [`embedding_client`] — Embedding model client, with oversized-input recovery
//! - [`chat_client`] — Chat model client used by RAG
//! - [`chunk`] — Noise reduction and adaptive chunking
//! - [`discovery`] — Lazy document discovery across configured source roots
//! - [`metadata_ingester`] — Phase 1: ACL resolution, upsert, transformation enqueue
//! - [`queue`] — Bounded transformation task queue
//! - [`worker_pool`] — Phase 2: extract → chunk → embed → atomic replace
//! - [`jobs`] — In-memory ingestion job registry
//! - [`retrieval`] — Permission-aware semantic search
//! - [`rag`] — Retrieval-augmented answer generation
//! - [`auth`] — Inbound ticket/Basic authentication
//! - [`server`] — HTTP API (Axum) with CORS
//!
//! ## Configuration
//!
//! `lakebridge` is configured via a TOML file (default: `config/lakebridge.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod auth;
pub mod chat_client;
pub mod chunk;
pub mod config;
pub mod discovery;
pub mod embedding_client;
pub mod error;
pub mod extraction_client;
pub mod jobs;
pub mod lake_client;
pub mod metadata_ingester;
pub mod models;
pub mod queue;
pub mod rag;
pub mod retrieval;
pub mod server;
pub mod source_client;
pub mod worker_pool;
