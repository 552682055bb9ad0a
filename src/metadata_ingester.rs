//! Metadata ingester — Phase 1 of ingestion (spec §4.5).
//!
//! For each discovered `SourceDocument`: build its ACL from the source
//! repository's read authorities, upsert (create-or-update) the
//! corresponding `LakeDocument`, and enqueue a `TransformationTask` so
//! Phase 2 can extract/chunk/embed its content. Runs on a dedicated
//! executor per the teacher's `run_sync` orchestration shape — effectively
//! serial against the lake, same as the teacher serializes against SQLite.

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{LakebridgeError, Result};
use crate::jobs::JobRegistry;
use crate::lake_client::LakeClient;
use crate::models::{
    Ace, LakeDocument, Principal, PrimaryType, SourceDocument, SyncStatus, TransformationTask,
    MIXIN_REMOTE_INGEST,
};
use crate::queue::TransformationQueue;
use crate::source_client::SourceClient;

const GROUP_EVERYONE_AUTHORITY: &str = "GROUP_EVERYONE";
const EVERYONE_PRINCIPAL: &str = "__Everyone__";

pub struct IngestionSummary {
    pub discovered: u64,
    pub ingested: u64,
    pub failed: u64,
}

/// Ingests a single source document's metadata: builds its ACL, upserts the
/// lake document, and enqueues its transformation task.
///
/// A `PermissionDenied` failure is terminal for this document (it is
/// skipped, counted as failed, and processing continues with the next
/// document). Any other failure is also counted but does not abort the
/// batch — matching spec §7's "other failure increments counter and
/// continues" policy.
pub async fn ingest_document(
    source: &SourceClient,
    lake: &LakeClient,
    queue: &TransformationQueue,
    source_repository_id: &str,
    doc: &SourceDocument,
) -> Result<()> {
    let acl = match build_acl(source, source_repository_id, &doc.id).await {
        Ok(acl) => acl,
        Err(e @ LakebridgeError::PermissionDenied(_)) => return Err(e),
        Err(e) => {
            warn!(source_id = %doc.id, error = %e, "failed to resolve ACL, ingesting with empty ACL");
            Vec::new()
        }
    };

    let mut ingest_properties = std::collections::HashMap::new();
    ingest_properties.insert("sourceNodeId".to_string(), Value::String(doc.id.clone()));
    ingest_properties.insert(
        "sourceRepositoryId".to_string(),
        Value::String(source_repository_id.to_string()),
    );
    ingest_properties.insert("name".to_string(), Value::String(doc.name.clone()));
    ingest_properties.insert("path".to_string(), Value::String(doc.path.clone()));
    ingest_properties.insert(
        "mimeType".to_string(),
        doc.mime_type
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    ingest_properties.insert(
        "modifiedAt".to_string(),
        Value::String(doc.modified_at.to_rfc3339()),
    );

    let existing = lake.find_by_source_id(&doc.id).await?;

    let mut lake_document = LakeDocument {
        lake_id: existing.as_ref().and_then(|d| d.lake_id.clone()),
        primary_type: PrimaryType::File,
        mixins: vec![MIXIN_REMOTE_INGEST.to_string()],
        source_id: doc.id.clone(),
        source_repository_id: source_repository_id.to_string(),
        paths: vec![doc.path.clone()],
        ingest_properties,
        ingest_property_names: Vec::new(),
        acl,
        full_text: existing.as_ref().map(|d| d.full_text.clone()).unwrap_or_default(),
        embeddings: existing.map(|d| d.embeddings).unwrap_or_default(),
        sync_status: SyncStatus::Pending,
    };
    lake_document.sync_ingest_property_names();

    let lake_id = match &lake_document.lake_id {
        Some(id) => {
            let patch = serde_json::json!([
                { "op": "replace", "path": "/ingestProperties", "value": lake_document.ingest_properties },
                { "op": "replace", "path": "/ingestPropertyNames", "value": lake_document.ingest_property_names },
                { "op": "replace", "path": "/acl", "value": lake_document.acl },
                { "op": "replace", "path": "/paths", "value": lake_document.paths },
                { "op": "replace", "path": "/syncStatus", "value": "Pending" },
            ]);
            lake.patch(id, &patch).await?;
            id.clone()
        }
        None => {
            let qualified_parent = qualified_parent_path(lake.target_path(), source_repository_id, &doc.path);
            let qualified_doc_path = qualified_document_path(lake.target_path(), source_repository_id, &doc.path);
            lake.ensure_folder(&qualified_parent).await?;
            let created = lake.create_at_path(&qualified_doc_path, &lake_document).await?;
            created
                .lake_id
                .ok_or_else(|| LakebridgeError::InvariantViolation("lake did not assign an id on create".to_string()))?
        }
    };

    info!(source_id = %doc.id, lake_id = %lake_id, "ingested document metadata");

    let task = TransformationTask {
        source_id: doc.id.clone(),
        lake_id,
        mime_type: doc.mime_type.clone(),
        document_name: Some(doc.name.clone()),
        document_path: Some(doc.path.clone()),
        created_at: Utc::now(),
        retry_count: 0,
    };

    queue
        .enqueue(task)
        .await
        .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

    Ok(())
}

/// Builds the ACL for a document from the source repository's read
/// authorities. `GROUP_EVERYONE` collapses to a single `__Everyone__`
/// principal (per the GLOSSARY's external-identity syntax, which never
/// suffixes that one principal); every other `GROUP_`-prefixed authority
/// becomes a `Group` principal, anything else a `User` principal.
async fn build_acl(source: &SourceClient, source_repository_id: &str, node_id: &str) -> Result<Vec<Ace>> {
    let authorities = source.extract_read_authorities(node_id).await?;
    let mut acl = Vec::with_capacity(authorities.len());

    for authority in authorities {
        if authority == GROUP_EVERYONE_AUTHORITY {
            acl.push(Ace::read_grant(Principal::User {
                id: EVERYONE_PRINCIPAL.to_string(),
            }));
            continue;
        }

        let principal = if let Some(group_name) = authority.strip_prefix("GROUP_") {
            Principal::Group {
                id: format!("{group_name}_#_{source_repository_id}"),
            }
        } else {
            Principal::User {
                id: format!("{authority}_#_{source_repository_id}"),
            }
        };
        acl.push(Ace::read_grant(principal));
    }

    Ok(acl)
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

/// Builds the fully-qualified lake path for a document: the configured
/// target path, then the repository id, then the document's own path
/// beneath it (spec §4.5 step 4).
fn qualified_document_path(target_path: &str, repository_id: &str, doc_path: &str) -> String {
    format!("{}/{repository_id}{doc_path}", target_path.trim_end_matches('/'))
}

/// Builds the fully-qualified parent folder path for a document. When the
/// document's own parent is the source root (`"/"`), this is just
/// `<targetPath>/<repositoryId>` with no extra separator, rather than a
/// redundant trailing segment.
fn qualified_parent_path(target_path: &str, repository_id: &str, doc_path: &str) -> String {
    let target = target_path.trim_end_matches('/');
    match parent_path(doc_path) {
        "/" => format!("{target}/{repository_id}"),
        parent => format!("{target}/{repository_id}{parent}"),
    }
}

/// Runs metadata ingestion over every document yielded by `stream`, tracking
/// per-job counters in `registry`. Returns the final summary once the
/// stream is exhausted.
pub async fn run_ingestion<S>(
    source: &SourceClient,
    lake: &LakeClient,
    queue: &TransformationQueue,
    registry: &JobRegistry,
    job_id: Uuid,
    source_repository_id: &str,
    mut stream: S,
) -> IngestionSummary
where
    S: futures_util::Stream<Item = Result<SourceDocument>> + Unpin,
{
    use futures_util::StreamExt;

    let mut discovered = 0u64;
    let mut ingested = 0u64;
    let mut failed = 0u64;

    while let Some(item) = stream.next().await {
        discovered += 1;
        registry.record_discovered(job_id, 1);

        match item {
            Ok(doc) => match ingest_document(source, lake, queue, source_repository_id, &doc).await {
                Ok(()) => {
                    ingested += 1;
                    registry.record_ingested(job_id);
                }
                Err(e) => {
                    failed += 1;
                    registry.record_failed(job_id);
                    error!(source_id = %doc.id, error = %e, "failed to ingest document metadata");
                }
            },
            Err(e) => {
                failed += 1;
                registry.record_failed(job_id);
                error!(error = %e, "failed to discover a document");
            }
        }
    }

    IngestionSummary { discovered, ingested, failed }
}
