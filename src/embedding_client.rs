//! Embedding model client (spec §4.9).
//!
//! Same shape as the teacher's `embedding.rs`: a thin metadata trait plus a
//! free async function doing the actual HTTP call (async fn in traits still
//! isn't the idiom reached for here), exponential backoff on 429/5xx.
//!
//! Adds what the teacher's OpenAI provider didn't need: a safety cap on
//! input length, sanitization before sending, a document-vs-query
//! instruction prefix, and recovery when the model rejects a text as too
//! large — by trimming the weakest-looking parts for short texts or
//! recursively splitting at a semantic boundary and averaging the two
//! halves' vectors for long ones.

use std::time::Duration;

use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::error::{LakebridgeError, Result};
use crate::models::Chunk;

/// Safety cap applied before anything is sent to the model, independent of
/// whatever limit the model itself reports.
const MAX_INPUT_CHARS: usize = 3000;

/// Prefix applied to query text only — documents are embedded bare so the
/// document/query asymmetry lives entirely on the query side.
const QUERY_INSTRUCTION_PREFIX: &str = "Represent this sentence for searching relevant passages: ";

pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;
}

pub struct HttpEmbeddingModel {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
    max_retries: u32,
}

impl HttpEmbeddingModel {
    pub fn new(endpoint: String, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model_name: config.model_name.clone(),
            max_retries: 5,
        })
    }
}

impl EmbeddingModel for HttpEmbeddingModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Removes control characters and collapses excess whitespace before a text
/// is sent to the model.
pub fn sanitize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == ' ')
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap(text: &str) -> String {
    if text.chars().count() <= MAX_INPUT_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_INPUT_CHARS).collect()
    }
}

/// Embeds a batch of already-chunked document text. No instruction prefix is
/// applied — only query-side embedding gets one (spec §4.9).
pub async fn embed_chunks(
    model: &HttpEmbeddingModel,
    chunks: &[Chunk],
) -> Result<Vec<Vec<f64>>> {
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let prepared = cap(&sanitize(&chunk.text));
        out.push(embed_one(model, &prepared).await?);
    }
    Ok(out)
}

/// Embeds a single query string, with the retrieval instruction prefix
/// applied (spec §4.9, §4.10).
pub async fn embed_query(model: &HttpEmbeddingModel, query: &str) -> Result<Vec<f64>> {
    let prepared = cap(&sanitize(query));
    let prefixed = format!("{QUERY_INSTRUCTION_PREFIX}{prepared}");
    embed_one(model, &prefixed).await
}

async fn embed_one(model: &HttpEmbeddingModel, text: &str) -> Result<Vec<f64>> {
    match call_model(model, text).await {
        Ok(vector) => Ok(vector),
        Err(LakebridgeError::EmbeddingInputTooLarge(_)) => recover_oversized(model, text).await,
        Err(e) => Err(e),
    }
}

/// Recovery path for "input too large": short texts have their worst
/// (overly long) tokens dropped and are retried once; if that didn't
/// shorten anything, the text is truncated to half its length and retried
/// once more. Texts long enough to still exceed the cap after trimming are
/// split at the nearest sentence boundary to the midpoint and each half is
/// embedded independently, with the two vectors averaged component-wise.
async fn recover_oversized(model: &HttpEmbeddingModel, text: &str) -> Result<Vec<f64>> {
    if text.chars().count() < 200 {
        let trimmed = trim_worst_parts(text);
        if trimmed.chars().count() < text.chars().count() {
            return Box::pin(call_model(model, &trimmed)).await;
        }

        let half_len = (text.chars().count() / 2).max(1);
        let truncated: String = text.chars().take(half_len).collect();
        return Box::pin(call_model(model, &truncated)).await;
    }

    let (left, right) = split_at_semantic_boundary(text);
    if left.is_empty() || right.is_empty() {
        return Err(LakebridgeError::EmbeddingInputTooLarge(
            "text could not be split for recovery".to_string(),
        ));
    }

    let left_vec = Box::pin(embed_one(model, &left)).await?;
    let right_vec = Box::pin(embed_one(model, &right)).await?;

    if left_vec.len() != right_vec.len() {
        return Err(LakebridgeError::InvariantViolation(
            "split halves produced embeddings of different dimensionality".to_string(),
        ));
    }

    Ok(left_vec
        .iter()
        .zip(right_vec.iter())
        .map(|(l, r)| (l + r) / 2.0)
        .collect())
}

/// Drops whitespace-separated tokens longer than 80 characters — typically
/// degenerate runs (URLs, base64 blobs, repeated punctuation) rather than
/// meaningful content — and rejoins what's left.
fn trim_worst_parts(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| token.chars().count() <= 80)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits `text` near its midpoint at the nearest sentence boundary
/// (`. `, `! `, `? `, or a newline), falling back to the midpoint itself if
/// no boundary is found.
fn split_at_semantic_boundary(text: &str) -> (String, String) {
    let mid = text.len() / 2;
    let boundary = text[..mid.min(text.len())]
        .rfind(['.', '!', '?', '\n'])
        .map(|i| i + 1)
        .unwrap_or(mid);
    let boundary = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= boundary)
        .unwrap_or(text.len());
    let (left, right) = text.split_at(boundary);
    (left.trim().to_string(), right.trim().to_string())
}

async fn call_model(model: &HttpEmbeddingModel, text: &str) -> Result<Vec<f64>> {
    let body = json!({ "model": model.model_name, "input": text });

    let mut last_err = None;

    for attempt in 0..=model.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = model
            .client
            .post(&model.endpoint)
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
                    return parse_embedding_response(&json);
                }

                if status.as_u16() == 413 {
                    return Err(LakebridgeError::EmbeddingInputTooLarge(format!(
                        "model rejected input ({status})"
                    )));
                }

                let body_text = response.text().await.unwrap_or_default();
                if is_input_too_large_message(&body_text) {
                    return Err(LakebridgeError::EmbeddingInputTooLarge(body_text));
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(LakebridgeError::TransientBackend(format!(
                        "embedding model error {status}: {body_text}"
                    )));
                    continue;
                }

                return Err(LakebridgeError::TransientBackend(format!(
                    "embedding model error {status}: {body_text}"
                )));
            }
            Err(e) => {
                last_err = Some(LakebridgeError::TransientBackend(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| LakebridgeError::TransientBackend("embedding request failed".to_string())))
}

/// Some models signal an oversized input via message text on a non-413
/// status rather than the 413 code itself.
fn is_input_too_large_message(text: &str) -> bool {
    text.contains("is too large") || text.contains("physical batch size")
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f64>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| {
            LakebridgeError::InvariantViolation("embedding response missing data[0]".to_string())
        })?;

    let embedding = data
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            LakebridgeError::InvariantViolation("embedding response missing embedding".to_string())
        })?;

    Ok(embedding.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect())
}

/// Cosine similarity between two embedding vectors, `0.0` for empty or
/// mismatched-length inputs.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize("a   b\n\nc"), "a b c");
    }

    #[test]
    fn cap_truncates_long_text() {
        let long = "a".repeat(5000);
        assert_eq!(cap(&long).chars().count(), MAX_INPUT_CHARS);
    }

    #[test]
    fn cap_leaves_short_text_untouched() {
        assert_eq!(cap("short"), "short");
    }

    #[test]
    fn split_at_semantic_boundary_prefers_sentence_end() {
        let text = "First sentence here. Second sentence follows after it.";
        let (left, right) = split_at_semantic_boundary(text);
        assert!(left.ends_with('.'));
        assert!(!right.is_empty());
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_empty_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
