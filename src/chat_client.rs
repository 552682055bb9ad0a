//! Chat model client, used by the RAG orchestrator (spec §4.11).
//!
//! Same trait-plus-free-function-plus-`reqwest`-POST shape as
//! `embedding_client.rs`: the model call contract here is system/user
//! prompt in, answer text + model id out.

use std::time::Duration;

use serde_json::json;

use crate::error::{LakebridgeError, Result};

pub struct ChatResponse {
    pub answer: String,
    pub model: String,
}

pub struct HttpChatModel {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
}

impl HttpChatModel {
    pub fn new(endpoint: String, model_name: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model_name,
        })
    }
}

/// Sends a system/user prompt pair to the chat model and returns its answer.
pub async fn complete(model: &HttpChatModel, system_prompt: &str, user_prompt: &str) -> Result<ChatResponse> {
    let body = json!({
        "model": model.model_name,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": user_prompt },
        ],
    });

    let response = model
        .client
        .post(&model.endpoint)
        .json(&body)
        .send()
        .await
        .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(LakebridgeError::TransientBackend(format!(
            "chat model error {status}: {text}"
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

    let answer = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            LakebridgeError::InvariantViolation("chat response missing choices[0].message.content".to_string())
        })?
        .to_string();

    Ok(ChatResponse {
        answer,
        model: model.model_name.clone(),
    })
}
