//! RAG orchestration (spec §4.11).
//!
//! Retrieval → size-capped context assembly → chat model call → answer with
//! source attribution. Grounded on the teacher's `search.rs::run_search`
//! try-then-fall-back-to-a-message shape, generalized to a full prompt
//! round trip instead of a formatted print.

use std::time::Instant;

use serde::Serialize;

use crate::chat_client::complete;
use crate::chat_client::HttpChatModel;
use crate::config::RagConfig;
use crate::embedding_client::HttpEmbeddingModel;
use crate::error::Result;
use crate::lake_client::LakeClient;
use crate::retrieval::{semantic_search, SearchResultItem};
use crate::source_client::SourceClient;

const NO_RESULTS_ANSWER: &str = "I could not find any relevant documents to answer this question.";

#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub answer: String,
    pub question: String,
    pub model: String,
    pub search_time_ms: u64,
    pub generation_time_ms: u64,
    pub total_time_ms: u64,
    pub sources_used: usize,
    pub sources: Vec<SearchResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
}

/// Answers `question` on behalf of `username`, grounding the chat model's
/// response in permission-scoped retrieved context.
///
/// Zero retrieval hits short-circuits to a canned answer without calling
/// the chat model (spec §4.11 step 5). A chat-model failure is caught and
/// turned into a graceful fallback answer (`model: "error"`) rather than
/// propagated, so a flaky chat backend surfaces as a degraded answer
/// instead of a 500 at the HTTP layer.
pub async fn answer(
    source: &SourceClient,
    lake: &LakeClient,
    embedding_model: &HttpEmbeddingModel,
    chat_model: &HttpChatModel,
    config: &RagConfig,
    username: &str,
    question: &str,
    include_context: bool,
) -> Result<RagResponse> {
    let started = Instant::now();
    let semantic_config = crate::config::SemanticSearchConfig { default_min_score: config.default_min_score };

    let search_started = Instant::now();
    let search_result = semantic_search(
        source,
        lake,
        embedding_model,
        &semantic_config,
        username,
        question,
        config.default_top_k,
        Some(config.default_min_score),
    )
    .await?;
    let search_time_ms = search_started.elapsed().as_millis() as u64;

    let sources = search_result.items;

    if sources.is_empty() {
        return Ok(RagResponse {
            answer: NO_RESULTS_ANSWER.to_string(),
            question: question.to_string(),
            model: "none".to_string(),
            search_time_ms,
            generation_time_ms: 0,
            total_time_ms: started.elapsed().as_millis() as u64,
            sources_used: 0,
            sources,
            context: include_context.then(Vec::new),
        });
    }

    let (context_entries, context) = assemble_context(&sources, config.max_context_length);

    let user_prompt = format!(
        "Based on the following document context, answer the question.\n\n--- DOCUMENT CONTEXT ---\n{context}\n--- END CONTEXT ---\n\nQuestion: {question}\n\nAnswer:"
    );

    let generation_started = Instant::now();
    let (answer_text, model) = match complete(chat_model, &config.default_system_prompt, &user_prompt).await {
        Ok(response) => (response.answer, response.model),
        Err(e) => (format!("Unable to generate an answer: {e}"), "error".to_string()),
    };
    let generation_time_ms = generation_started.elapsed().as_millis() as u64;

    Ok(RagResponse {
        answer: answer_text,
        question: question.to_string(),
        model,
        search_time_ms,
        generation_time_ms,
        total_time_ms: started.elapsed().as_millis() as u64,
        sources_used: sources.len(),
        sources,
        context: include_context.then_some(context_entries),
    })
}

/// Assembles the labeled document context fed to the chat model, along with
/// the list of per-source entries actually included (for the optional
/// `context` field in the response). Appends entries while within `max_len`;
/// on overflow, appends a truncated prefix of the entry that would have
/// overflowed iff at least 100 characters of room remain, then stops.
fn assemble_context(sources: &[SearchResultItem], max_len: usize) -> (Vec<String>, String) {
    let mut context = String::new();
    let mut entries = Vec::with_capacity(sources.len());

    for (i, source) in sources.iter().enumerate() {
        let source_name = source.name.as_deref().unwrap_or(&source.document_id);
        let entry = format!(
            "[Source {}: {} (score: {:.2})]\n{}\n\n",
            i + 1,
            source_name,
            source.score,
            source.snippet
        );

        if context.len() + entry.len() > max_len {
            let remaining = max_len.saturating_sub(context.len());
            if remaining >= 100 {
                let prefix: String = entry.chars().take(remaining).collect();
                context.push_str(&prefix);
            }
            context.push_str("\n... (context truncated)");
            break;
        }

        context.push_str(&entry);
        entries.push(entry);
    }

    (entries, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(snippet: &str) -> SearchResultItem {
        SearchResultItem {
            rank: 1,
            document_id: "d1".to_string(),
            source_id: None,
            name: None,
            path: None,
            mime_type: None,
            score: 0.9,
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn assemble_context_includes_all_sources_under_limit() {
        let sources = vec![sample("first"), sample("second")];
        let (entries, context) = assemble_context(&sources, 1000);
        assert_eq!(entries.len(), 2);
        assert!(context.contains("first"));
        assert!(context.contains("second"));
        assert!(context.contains("Source 1"));
        assert!(!context.contains("truncated"));
    }

    #[test]
    fn assemble_context_truncates_when_over_limit() {
        let sources = vec![sample(&"x".repeat(50)), sample(&"y".repeat(50))];
        let (_, context) = assemble_context(&sources, 60);
        assert!(context.contains("truncated"));
    }
}
