//! Text-extraction service client (spec §4.3).
//!
//! This system never parses a document format itself — it hands the raw
//! bytes to an external extraction service and gets text back. The
//! service's supported-format matrix is cached for five minutes so that
//! `isSupported` doesn't round-trip for every discovered document;
//! if refreshing the cache fails, the cache fails open (treats the
//! format as supported) so a transient outage doesn't silently skip work
//! that would otherwise just 415 and get logged.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::config::TransformServiceConfig;
use crate::error::{LakebridgeError, Result};

const CACHE_TTL: Duration = Duration::from_secs(300);

struct EngineCache {
    mime_types: HashSet<String>,
    fetched_at: Instant,
}

pub struct ExtractionClient {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
    enabled: bool,
    cache: Mutex<Option<EngineCache>>,
}

impl ExtractionClient {
    pub fn new(config: &TransformServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
            enabled: config.enabled,
            cache: Mutex::new(None),
        })
    }

    /// Whether the service reports support for `mime_type`. Fails open on
    /// lookup error.
    pub async fn is_supported(&self, mime_type: &str) -> bool {
        if !self.enabled {
            return false;
        }

        {
            let cache = self.cache.lock().unwrap();
            if let Some(c) = cache.as_ref() {
                if c.fetched_at.elapsed() < CACHE_TTL {
                    return c.mime_types.contains(mime_type);
                }
            }
        }

        match self.refresh_engines().await {
            Ok(types) => {
                let supported = types.contains(mime_type);
                let mut cache = self.cache.lock().unwrap();
                *cache = Some(EngineCache { mime_types: types, fetched_at: Instant::now() });
                supported
            }
            Err(_) => true,
        }
    }

    async fn refresh_engines(&self) -> Result<HashSet<String>> {
        let resp = self
            .client
            .get(format!("{}/api/engines", self.base_url))
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LakebridgeError::TransientBackend(format!(
                "extraction service engines lookup failed: {}",
                resp.status()
            )));
        }

        let body: EnginesResponse = resp
            .json()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        Ok(body
            .engines
            .into_iter()
            .flat_map(|e| e.supported_mime_types)
            .collect())
    }

    /// Submits file bytes for extraction and returns the extracted text.
    pub async fn transform_to_text(&self, file_name: &str, mime_type: &str, bytes: Vec<u8>) -> Result<String> {
        if !self.enabled {
            return Err(LakebridgeError::TransientBackend(
                "extraction service is disabled".to_string(),
            ));
        }

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| LakebridgeError::InvariantViolation(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("sourceMimetype", mime_type.to_string())
            .text("targetMimetype", "text/plain")
            .text("targetExtension", "txt");

        let resp = self
            .client
            .post(format!("{}/api/transform", self.base_url))
            .query(&[("timeoutMs", self.timeout_ms.to_string())])
            .multipart(form)
            .send()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 415 {
            return Err(LakebridgeError::TransientBackend(format!(
                "extraction service does not support {mime_type}"
            )));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LakebridgeError::TransientBackend(format!(
                "extraction service error {status}: {text}"
            )));
        }

        let body: TransformResponse = resp
            .json()
            .await
            .map_err(|e| LakebridgeError::TransientBackend(e.to_string()))?;
        Ok(body.text)
    }
}

#[derive(Debug, Deserialize)]
struct EnginesResponse {
    engines: Vec<EngineInfo>,
}

#[derive(Debug, Deserialize)]
struct EngineInfo {
    #[serde(rename = "supportedMimeTypes")]
    supported_mime_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransformResponse {
    text: String,
}
