//! Transformation worker pool — Phase 2 of ingestion (spec §4.7).
//!
//! A fixed-size pool of long-lived `tokio::spawn`ed consumers, each pulling
//! `TransformationTask`s off the queue and running them through
//! extract → chunk → embed → atomic replace. Generalizes the teacher's
//! `embed_cmd.rs` batch-with-retry-and-counters loop into a long-lived
//! consumer rather than a one-shot CLI batch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::chunk::{chunk_text, ChunkingOptions};
use crate::config::Config;
use crate::error::LakebridgeError;
use crate::extraction_client::ExtractionClient;
use crate::lake_client::LakeClient;
use crate::models::Embedding;
use crate::queue::TransformationQueue;
use crate::source_client::SourceClient;
use crate::embedding_client::{embed_chunks, HttpEmbeddingModel};

/// How long `shutdown` waits for in-flight tasks to finish before the pool
/// returns anyway (spec §5 grace period).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_threads` consumers pulling from `queue`.
    pub fn spawn(
        worker_threads: usize,
        source: Arc<SourceClient>,
        lake: Arc<LakeClient>,
        extraction: Arc<ExtractionClient>,
        embedding_model: Arc<HttpEmbeddingModel>,
        queue: Arc<TransformationQueue>,
        config: Arc<Config>,
    ) -> Self {
        let mut handles = Vec::with_capacity(worker_threads);
        for worker_id in 0..worker_threads {
            let source = source.clone();
            let lake = lake.clone();
            let extraction = extraction.clone();
            let embedding_model = embedding_model.clone();
            let queue = queue.clone();
            let config = config.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let task = match queue.dequeue().await {
                        Some(task) => task,
                        None => break,
                    };

                    let source_id = task.source_id.clone();
                    let mime_type = task.mime_type.clone().unwrap_or_default();

                    match process_task(&source, &lake, &extraction, &embedding_model, &config, task).await {
                        Ok(()) => {
                            queue.mark_completed();
                            info!(worker_id, source_id = %source_id, "transformation completed");
                        }
                        Err(e) => {
                            queue.mark_failed();
                            error!(worker_id, source_id = %source_id, %mime_type, error = %e, "transformation failed");
                        }
                    }
                }
            }));
        }

        Self { handles }
    }

    /// Waits up to the shutdown grace period for workers to drain, then
    /// aborts any still running.
    pub async fn shutdown(self) {
        let abort_handles: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(deadline);

        tokio::select! {
            _ = futures_util::future::join_all(self.handles) => {}
            _ = &mut deadline => {
                warn!("transformation workers did not drain within the shutdown grace period, aborting");
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }
    }
}

/// Mime types streamed as raw bytes and decoded as UTF-8 directly,
/// skipping the extraction service entirely (spec §4.7 step 2).
const INLINE_TEXT_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/html",
    "text/xml",
    "text/csv",
    "text/markdown",
    "application/json",
    "application/xml",
    "application/javascript",
];

fn is_inline_text_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || mime_type.ends_with("+xml")
        || mime_type.ends_with("+json")
        || INLINE_TEXT_MIME_TYPES.contains(&mime_type)
}

async fn process_task(
    source: &SourceClient,
    lake: &LakeClient,
    extraction: &ExtractionClient,
    embedding_model: &HttpEmbeddingModel,
    config: &Config,
    task: crate::models::TransformationTask,
) -> crate::error::Result<()> {
    let file_name = task.document_name.clone().unwrap_or_else(|| task.source_id.clone());
    let mime_type = task.mime_type.clone().unwrap_or_else(|| "application/octet-stream".to_string());

    let text = extract_text(source, extraction, &task.source_id, &file_name, &mime_type).await?;

    if text.trim().is_empty() {
        info!(source_id = %task.source_id, "extracted text is empty, marking completed without indexing");
        return Ok(());
    }

    let options = ChunkingOptions {
        max_chunk_size: config.embedding.chunk_size,
        min_chunk_size: config.embedding.chunk_size / 4,
        overlap: config.embedding.chunk_overlap,
    };
    let chunks = chunk_text(&task.lake_id, &text, &options);

    let vectors = embed_chunks(embedding_model, &chunks).await?;
    if vectors.len() != chunks.len() {
        return Err(LakebridgeError::InvariantViolation(
            "embedding count did not match chunk count".to_string(),
        ));
    }

    let embeddings: Vec<Embedding> = chunks
        .iter()
        .zip(vectors.into_iter())
        .map(|(chunk, vector)| Embedding {
            model_type: embedding_model.model_name().to_string(),
            text: chunk.text.clone(),
            vector,
            location: None,
        })
        .collect();

    if let Err(e) = lake.delete_embeddings(&task.lake_id).await {
        warn!(lake_id = %task.lake_id, error = %e, "best-effort clear of existing embeddings failed, continuing");
    }
    lake.update_embeddings(&task.lake_id, embeddings).await?;
    lake.update_full_text(&task.lake_id, &text).await?;
    Ok(())
}

/// Streams raw bytes and decodes UTF-8 directly for already-textual mime
/// types, skipping the extraction service entirely; otherwise downloads to
/// a temp file and routes through it targeting plain text.
async fn extract_text(
    source: &SourceClient,
    extraction: &ExtractionClient,
    source_id: &str,
    file_name: &str,
    mime_type: &str,
) -> crate::error::Result<String> {
    let temp_path = source.download_to_temp(source_id, file_name).await?;
    let bytes = tokio::fs::read(&temp_path)
        .await
        .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

    if is_inline_text_mime(mime_type) {
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }

    extraction.transform_to_text(file_name, mime_type, bytes).await
}
