//! Permission-aware retrieval (spec §4.10).
//!
//! Embeds the query, resolves the caller's group memberships into the same
//! principal set used by ingestion's ACL builder, builds an HXQL
//! permission-filter disjunction, runs a k-NN vector search scoped to that
//! filter, and enriches hits with their parent document's metadata.
//!
//! Keeps the teacher's `search.rs` "core function + response struct shared
//! by CLI and HTTP" split; drops its min-max-normalize-then-merge hybrid
//! scoring, since the lake does vector search server-side here.

use std::time::Instant;

use serde::Serialize;

use crate::config::SemanticSearchConfig;
use crate::embedding_client::{embed_query, HttpEmbeddingModel};
use crate::error::{LakebridgeError, Result};
use crate::lake_client::LakeClient;
use crate::source_client::SourceClient;

const GROUP_EVERYONE_AUTHORITY: &str = "GROUP_EVERYONE";
const EVERYONE_PRINCIPAL: &str = "__Everyone__";

/// Vector-search `topK` is clamped into this range regardless of what the
/// caller asks for.
const TOP_K_RANGE: std::ops::RangeInclusive<usize> = 1..=50;

/// A single ranked search result, shared by the CLI-facing wrapper and the
/// HTTP server handler. Everything beyond `document_id`/`score`/`snippet`
/// comes from enriching the hit against its parent `LakeDocument` and is
/// `None` if that document couldn't be resolved.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub rank: usize,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub score: f64,
    pub snippet: String,
}

/// Full result of a semantic search, including the query metadata spec
/// §4.10 step 7 requires alongside the ranked hits.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticSearchResult {
    pub items: Vec<SearchResultItem>,
    pub model_name: String,
    pub vector_dimension: usize,
    pub total_count: usize,
    pub elapsed_ms: u64,
}

/// Runs a permission-scoped semantic search for `username` and returns
/// results with score >= `min_score`, most relevant first.
pub async fn semantic_search(
    source: &SourceClient,
    lake: &LakeClient,
    embedding_model: &HttpEmbeddingModel,
    config: &SemanticSearchConfig,
    username: &str,
    query: &str,
    top_k: usize,
    min_score: Option<f64>,
) -> Result<SemanticSearchResult> {
    if query.trim().is_empty() {
        return Ok(SemanticSearchResult {
            items: Vec::new(),
            model_name: embedding_model.model_name().to_string(),
            vector_dimension: 0,
            total_count: 0,
            elapsed_ms: 0,
        });
    }

    let started = Instant::now();

    let top_k = top_k.clamp(*TOP_K_RANGE.start(), *TOP_K_RANGE.end());
    let min_score = min_score
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| s.clamp(0.0, 1.0))
        .unwrap_or(config.default_min_score);

    let vector = embed_query(embedding_model, query).await?;
    let filter = build_permission_filter(source, username).await?;

    let hits = lake.vector_search(&vector, "*", &filter, top_k).await?;
    let total_count = hits.len();

    let mut items = Vec::with_capacity(hits.len());
    for (i, hit) in hits.into_iter().filter(|h| h.score >= min_score).enumerate() {
        let mut item = SearchResultItem {
            rank: i + 1,
            document_id: hit.document_id.clone(),
            source_id: None,
            name: None,
            path: None,
            mime_type: None,
            score: hit.score,
            snippet: hit.chunk_text,
        };

        if let Ok(doc) = enrich(lake, &hit.document_id).await {
            item.source_id = Some(doc.source_id);
            item.name = doc.ingest_properties.get("name").and_then(|v| v.as_str()).map(str::to_string);
            item.path = doc.paths.first().cloned();
            item.mime_type = doc
                .ingest_properties
                .get("mimeType")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }

        items.push(item);
    }

    Ok(SemanticSearchResult {
        items,
        model_name: embedding_model.model_name().to_string(),
        vector_dimension: vector.len(),
        total_count,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Builds the HXQL permission-filter disjunction for `username`: any
/// document whose ACL grants `__Everyone__`, the caller directly, or one of
/// the caller's groups (spec §4.10 step 3, §8 scenario 3). Falls back to
/// `username` plus `__Everyone__` only if group resolution fails, rather
/// than failing the whole search — a caller who can't be placed in any
/// group should still see what's broadly shared.
///
/// Unlike the ACL-storage convention in `metadata_ingester.rs` (which drops
/// the `GROUP_` prefix from the stored principal id), the retrieval clause
/// keeps the authority's `GROUP_` prefix inside its `g:` form — the two
/// conventions are separately specified and are not reconciled here.
async fn build_permission_filter(source: &SourceClient, username: &str) -> Result<String> {
    let repository_id = source.repository_id().await?;

    let mut authorities = vec![username.to_string(), GROUP_EVERYONE_AUTHORITY.to_string()];
    match source.list_groups(username).await {
        Ok(groups) => authorities.extend(groups),
        Err(e) => {
            tracing::warn!(username, error = %e, "could not resolve group memberships, falling back to direct grants");
        }
    }

    let mut clauses = vec![format!("acl.principal = '{EVERYONE_PRINCIPAL}'")];
    for authority in authorities {
        if authority == GROUP_EVERYONE_AUTHORITY {
            continue;
        }
        if authority.starts_with("GROUP_") {
            clauses.push(format!("acl.principal = 'g:{authority}_#_{repository_id}'"));
        } else {
            clauses.push(format!("acl.principal = '{authority}_#_{repository_id}'"));
        }
    }

    Ok(clauses.join(" OR "))
}

/// Looks up the full lake document for a search hit, used to enrich hits
/// with parent-document metadata and by the RAG orchestrator to assemble
/// context beyond the matched snippet.
pub async fn enrich(lake: &LakeClient, document_id: &str) -> Result<crate::models::LakeDocument> {
    lake.get(document_id)
        .await
        .map_err(|e| match e {
            LakebridgeError::NotFound(_) => {
                LakebridgeError::NotFound(format!("document {document_id} not found during enrichment"))
            }
            other => other,
        })
}
