//! Core data types shared across the ingestion and retrieval pipeline.
//!
//! These mirror the wire shapes of the source repository and the content
//! lake rather than owning any storage of their own — see `SPEC_FULL.md` §0:
//! this system keeps no local persisted state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Projection of a node in the source repository. Read-only input to
/// ingestion; never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub name: String,
    pub path: String,
    pub node_type: String,
    pub mime_type: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub is_folder: bool,
    #[serde(default)]
    pub aspect_names: Vec<String>,
}

/// `PrimaryType` of a `LakeDocument` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PrimaryType {
    File,
    Folder,
}

/// Lake-side mixin markers.
pub const MIXIN_REMOTE_INGEST: &str = "RemoteIngest";
pub const MIXIN_EMBED: &str = "Embed";

/// Sync lifecycle state of a `LakeDocument` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

/// A user or group principal, identified per the external-identity syntax in
/// the GLOSSARY (`<authorityId>_#_<sourceRepositoryId>`, with `__Everyone__`
/// never suffixed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Principal {
    User { id: String },
    Group { id: String },
}

/// A single access-control entry (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ace {
    pub granted: bool,
    pub permission: String,
    pub principal: Principal,
}

impl Ace {
    pub fn read_grant(principal: Principal) -> Self {
        Self {
            granted: true,
            permission: "Read".to_string(),
            principal,
        }
    }
}

/// A location hint attached to an embedding, per the source format it was
/// extracted from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spreadsheet: Option<String>,
}

/// One chunk's embedding, as stored in `LakeDocument.embeddings` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    /// Model identifier (`type` in the spec; `r#type` would be noisier here).
    pub model_type: String,
    pub text: String,
    pub vector: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// One document stored in the content lake, one per source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LakeDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lake_id: Option<String>,
    pub primary_type: PrimaryType,
    #[serde(default)]
    pub mixins: Vec<String>,
    pub source_id: String,
    pub source_repository_id: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub ingest_properties: HashMap<String, Value>,
    #[serde(default)]
    pub ingest_property_names: Vec<String>,
    #[serde(default)]
    pub acl: Vec<Ace>,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub embeddings: Vec<Embedding>,
    pub sync_status: SyncStatus,
}

impl LakeDocument {
    /// `embeddings` non-empty ⇒ `Embed` mixin present (spec §3 invariant b,
    /// §8 testable property).
    pub fn has_embed_mixin(&self) -> bool {
        self.mixins.iter().any(|m| m == MIXIN_EMBED)
    }

    /// Sets `ingestPropertyNames` from the current key set of
    /// `ingestProperties` (spec §3 invariant c).
    pub fn sync_ingest_property_names(&mut self) {
        self.ingest_property_names = self.ingest_properties.keys().cloned().collect();
        self.ingest_property_names.sort();
    }
}

/// An offset-tagged substring of a document's extracted text, fed to the
/// embedding model (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub node_id: String,
    pub text: String,
    pub index: u32,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    pub fn id(&self) -> String {
        format!("{}_chunk_{}", self.node_id, self.index)
    }
}

/// A unit of work enqueued by the Metadata Ingester for a worker to process.
#[derive(Debug, Clone)]
pub struct TransformationTask {
    pub source_id: String,
    pub lake_id: String,
    pub mime_type: Option<String>,
    pub document_name: Option<String>,
    pub document_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Status of an `IngestionJob` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// Tracks per-job discovered/ingested/failed counts (spec §3, §4.10/jobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: uuid::Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub discovered: u64,
    pub ingested: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_embed_mixin_reflects_mixin_set() {
        let mut doc = sample_doc();
        assert!(!doc.has_embed_mixin());
        doc.mixins.push(MIXIN_EMBED.to_string());
        assert!(doc.has_embed_mixin());
    }

    #[test]
    fn sync_ingest_property_names_mirrors_keys() {
        let mut doc = sample_doc();
        doc.ingest_properties
            .insert("name".to_string(), Value::String("a.pdf".to_string()));
        doc.ingest_properties.insert(
            "mimeType".to_string(),
            Value::String("application/pdf".to_string()),
        );
        doc.sync_ingest_property_names();
        let mut names = doc.ingest_property_names.clone();
        names.sort();
        let mut keys: Vec<String> = doc.ingest_properties.keys().cloned().collect();
        keys.sort();
        assert_eq!(names, keys);
    }

    #[test]
    fn chunk_id_follows_node_chunk_index_format() {
        let chunk = Chunk {
            node_id: "abc123".to_string(),
            text: "hello".to_string(),
            index: 3,
            start_offset: 0,
            end_offset: 5,
        };
        assert_eq!(chunk.id(), "abc123_chunk_3");
    }

    fn sample_doc() -> LakeDocument {
        LakeDocument {
            lake_id: None,
            primary_type: PrimaryType::File,
            mixins: vec![MIXIN_REMOTE_INGEST.to_string()],
            source_id: "src-1".to_string(),
            source_repository_id: "repo-1".to_string(),
            paths: vec!["/a".to_string()],
            ingest_properties: HashMap::new(),
            ingest_property_names: Vec::new(),
            acl: Vec::new(),
            full_text: String::new(),
            embeddings: Vec::new(),
            sync_status: SyncStatus::Pending,
        }
    }
}
