//! End-to-end Phase 2 transformation: source download → extraction →
//! chunking → embedding → atomic lake update (spec §4.3/§4.7/§4.8/§4.9).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lakebridge::config::{
    BasicAuthConfig, Config, EmbeddingConfig, ExcludeConfig, IdpConfig, LakeConfig,
    LakeModelConfig, RagConfig, SemanticSearchConfig, ServerConfig, SourceConnectionConfig,
    SourceSecurityConfig, TransformConfig, TransformServiceConfig,
};
use lakebridge::config::ChatConfig;
use lakebridge::embedding_client::HttpEmbeddingModel;
use lakebridge::extraction_client::ExtractionClient;
use lakebridge::lake_client::LakeClient;
use lakebridge::models::TransformationTask;
use lakebridge::queue::TransformationQueue;
use lakebridge::source_client::SourceClient;
use lakebridge::worker_pool::WorkerPool;

fn full_config(
    source_url: &str,
    lake_url: &str,
    idp_url: &str,
    transform_url: &str,
    embedding_url: &str,
) -> Config {
    Config {
        sources: vec![],
        exclude: ExcludeConfig::default(),
        transform: TransformConfig { worker_threads: 2, queue_capacity: 10 },
        embedding: EmbeddingConfig {
            endpoint: embedding_url.to_string(),
            model_name: "text-embed-3".to_string(),
            chunk_size: 1000,
            chunk_overlap: 100,
            timeout_secs: 10,
        },
        chat: ChatConfig { endpoint: String::new(), model_name: String::new(), timeout_secs: 10 },
        batch: Default::default(),
        lake: LakeConfig {
            url: lake_url.to_string(),
            repository_id: "repo-1".to_string(),
            target_path: "/ingested".to_string(),
            idp: IdpConfig {
                token_url: format!("{idp_url}/oauth/token"),
                client_id: "client".to_string(),
                client_secret: "cs".to_string(),
                username: "lakeuser".to_string(),
                password: "lakepass".to_string(),
            },
            timeout_secs: 10,
            model: LakeModelConfig::default(),
        },
        transform_service: TransformServiceConfig {
            url: transform_url.to_string(),
            timeout_ms: 5000,
            enabled: true,
        },
        source: SourceConnectionConfig {
            url: source_url.to_string(),
            security: SourceSecurityConfig {
                basic_auth: BasicAuthConfig { username: "svc".to_string(), password: "secret".to_string() },
            },
            timeout_secs: 10,
        },
        rag: RagConfig::default(),
        semantic_search: SemanticSearchConfig::default(),
        server: ServerConfig { bind: "127.0.0.1:0".to_string() },
    }
}

/// A queued transformation task runs through the whole worker-pool pipeline:
/// downloading content, extracting text, chunking, embedding each chunk, and
/// writing the result back to the lake as a single atomic update that also
/// adds the `Embed` mixin.
#[tokio::test]
async fn worker_pool_processes_task_end_to_end() {
    let source_server = MockServer::start().await;
    let lake_server = MockServer::start().await;
    let idp_server = MockServer::start().await;
    let transform_server = MockServer::start().await;
    let embedding_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-abc",
            "expires_in": 3600,
        })))
        .mount(&idp_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/nodes/node-1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF fake bytes".to_vec()))
        .mount(&source_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/transform"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "This is the extracted body text of the document. It has two sentences."
        })))
        .mount(&transform_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3] }]
        })))
        .mount(&embedding_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/documents/lake-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lakeId": "lake-1",
            "primaryType": "File",
            "mixins": ["RemoteIngest"],
            "sourceId": "node-1",
            "sourceRepositoryId": "repo-1",
            "paths": ["/a.pdf"],
            "ingestProperties": {},
            "ingestPropertyNames": [],
            "acl": [],
            "fullText": "",
            "embeddings": [],
            "syncStatus": "Pending",
        })))
        .mount(&lake_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/api/documents/lake-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lakeId": "lake-1",
            "primaryType": "File",
            "mixins": ["RemoteIngest", "Embed"],
            "sourceId": "node-1",
            "sourceRepositoryId": "repo-1",
            "paths": ["/a.pdf"],
            "ingestProperties": {},
            "ingestPropertyNames": [],
            "acl": [],
            "fullText": "This is the extracted body text of the document. It has two sentences.",
            "embeddings": [{
                "modelType": "text-embed-3",
                "text": "This is the extracted body text of the document. It has two sentences.",
                "vector": [0.1, 0.2, 0.3],
            }],
            "syncStatus": "Indexed",
        })))
        .mount(&lake_server)
        .await;

    let cfg = Arc::new(full_config(
        &source_server.uri(),
        &lake_server.uri(),
        &idp_server.uri(),
        &transform_server.uri(),
        &embedding_server.uri(),
    ));

    let source = Arc::new(SourceClient::new(&cfg.source).unwrap());
    let lake = Arc::new(LakeClient::new(&cfg.lake).unwrap());
    let extraction = Arc::new(ExtractionClient::new(&cfg.transform_service).unwrap());
    let embedding_model = Arc::new(HttpEmbeddingModel::new(cfg.embedding.endpoint.clone(), &cfg.embedding).unwrap());
    let queue = TransformationQueue::new(cfg.transform.queue_capacity);

    let pool = WorkerPool::spawn(
        cfg.transform.worker_threads,
        source,
        lake.clone(),
        extraction,
        embedding_model,
        queue.clone(),
        cfg.clone(),
    );

    queue
        .enqueue(TransformationTask {
            source_id: "node-1".to_string(),
            lake_id: "lake-1".to_string(),
            mime_type: Some("application/pdf".to_string()),
            document_name: Some("a.pdf".to_string()),
            document_path: Some("/a.pdf".to_string()),
            created_at: chrono::Utc::now(),
            retry_count: 0,
        })
        .await
        .unwrap();

    for _ in 0..50 {
        if queue.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    pool.shutdown().await;

    assert_eq!(queue.completed(), 1);
    assert_eq!(queue.failed(), 0);

    let updated = lake.get("lake-1").await.unwrap();
    assert!(updated.has_embed_mixin());
    assert_eq!(updated.embeddings.len(), 1);
}

/// A task whose extraction fails (unsupported/transform error) is counted as
/// failed rather than panicking the worker, and the worker keeps consuming
/// subsequent tasks.
#[tokio::test]
async fn worker_pool_marks_task_failed_on_extraction_error() {
    let source_server = MockServer::start().await;
    let lake_server = MockServer::start().await;
    let idp_server = MockServer::start().await;
    let transform_server = MockServer::start().await;
    let embedding_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-abc",
            "expires_in": 3600,
        })))
        .mount(&idp_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/nodes/node-2/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes".to_vec()))
        .mount(&source_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/transform"))
        .respond_with(ResponseTemplate::new(415))
        .mount(&transform_server)
        .await;

    let cfg = Arc::new(full_config(
        &source_server.uri(),
        &lake_server.uri(),
        &idp_server.uri(),
        &transform_server.uri(),
        &embedding_server.uri(),
    ));

    let source = Arc::new(SourceClient::new(&cfg.source).unwrap());
    let lake = Arc::new(LakeClient::new(&cfg.lake).unwrap());
    let extraction = Arc::new(ExtractionClient::new(&cfg.transform_service).unwrap());
    let embedding_model = Arc::new(HttpEmbeddingModel::new(cfg.embedding.endpoint.clone(), &cfg.embedding).unwrap());
    let queue = TransformationQueue::new(cfg.transform.queue_capacity);

    let pool = WorkerPool::spawn(
        cfg.transform.worker_threads,
        source,
        lake,
        extraction,
        embedding_model,
        queue.clone(),
        cfg.clone(),
    );

    queue
        .enqueue(TransformationTask {
            source_id: "node-2".to_string(),
            lake_id: "lake-2".to_string(),
            mime_type: Some("application/x-weird".to_string()),
            document_name: Some("b.bin".to_string()),
            document_path: Some("/b.bin".to_string()),
            created_at: chrono::Utc::now(),
            retry_count: 0,
        })
        .await
        .unwrap();

    for _ in 0..50 {
        if queue.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    pool.shutdown().await;

    assert_eq!(queue.failed(), 1);
    assert_eq!(queue.completed(), 0);
}
