//! End-to-end permission-aware retrieval and RAG answer generation against
//! stubbed source, lake, embedding, and chat endpoints (spec §4.9-§4.11).

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lakebridge::chat_client::HttpChatModel;
use lakebridge::config::{
    BasicAuthConfig, EmbeddingConfig, IdpConfig, LakeConfig, LakeModelConfig, RagConfig,
    SemanticSearchConfig, SourceConnectionConfig, SourceSecurityConfig,
};
use lakebridge::embedding_client::HttpEmbeddingModel;
use lakebridge::lake_client::LakeClient;
use lakebridge::rag;
use lakebridge::retrieval::semantic_search;
use lakebridge::source_client::SourceClient;

fn source_config(url: &str) -> SourceConnectionConfig {
    SourceConnectionConfig {
        url: url.to_string(),
        security: SourceSecurityConfig {
            basic_auth: BasicAuthConfig { username: "svc".to_string(), password: "secret".to_string() },
        },
        timeout_secs: 10,
    }
}

fn lake_config(lake_url: &str, idp_url: &str) -> LakeConfig {
    LakeConfig {
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
    }
}

fn embedding_config() -> EmbeddingConfig {
    EmbeddingConfig {
        endpoint: String::new(),
        model_name: "text-embed-3".to_string(),
        chunk_size: 1000,
        chunk_overlap: 100,
        timeout_secs: 10,
    }
}

async fn mount_idp_token(idp: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-abc",
            "expires_in": 3600,
        })))
        .mount(idp)
        .await;
}

fn sample_vector() -> Vec<f64> {
    vec![0.1, 0.2, 0.3]
}

async fn mount_embedding_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": sample_vector() }]
        })))
        .mount(server)
        .await;
}

async fn mount_repository_id(source: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/repository"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "repo-1" })))
        .mount(source)
        .await;
}

/// A semantic search for a user with no group-membership failures returns
/// results above the score threshold, sorted as the lake returned them, and
/// excludes anything below it.
#[tokio::test]
async fn semantic_search_filters_by_min_score_and_resolves_groups() {
    let source_server = MockServer::start().await;
    let lake_server = MockServer::start().await;
    let idp_server = MockServer::start().await;
    let embedding_server = MockServer::start().await;

    mount_idp_token(&idp_server).await;
    mount_embedding_endpoint(&embedding_server).await;
    mount_repository_id(&source_server).await;

    Mock::given(method("GET"))
        .and(path("/api/people/alice/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "list": {
                "entries": [{ "entry": { "id": "GROUP_eng" } }],
                "pagination": { "hasMoreItems": false }
            }
        })))
        .mount(&source_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/search/vector"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [
                { "document_id": "doc-1", "score": 0.9, "chunk_text": "strong match" },
                { "document_id": "doc-2", "score": 0.05, "chunk_text": "weak match" },
            ]
        })))
        .mount(&lake_server)
        .await;

    let source = SourceClient::new(&source_config(&source_server.uri())).unwrap();
    let lake = LakeClient::new(&lake_config(&lake_server.uri(), &idp_server.uri())).unwrap();
    let embedding_model =
        HttpEmbeddingModel::new(embedding_server.uri(), &embedding_config()).unwrap();
    let search_config = SemanticSearchConfig { default_min_score: 0.2 };

    let results = semantic_search(
        &source,
        &lake,
        &embedding_model,
        &search_config,
        "alice",
        "what is the refund policy?",
        8,
        None,
    )
    .await
    .unwrap();

    assert_eq!(results.items.len(), 1);
    assert_eq!(results.items[0].document_id, "doc-1");
}

/// An empty query short-circuits before touching any collaborator.
#[tokio::test]
async fn semantic_search_empty_query_returns_no_results() {
    let source_server = MockServer::start().await;
    let lake_server = MockServer::start().await;
    let idp_server = MockServer::start().await;
    let embedding_server = MockServer::start().await;

    let source = SourceClient::new(&source_config(&source_server.uri())).unwrap();
    let lake = LakeClient::new(&lake_config(&lake_server.uri(), &idp_server.uri())).unwrap();
    let embedding_model =
        HttpEmbeddingModel::new(embedding_server.uri(), &embedding_config()).unwrap();
    let search_config = SemanticSearchConfig::default();

    let results = semantic_search(
        &source,
        &lake,
        &embedding_model,
        &search_config,
        "alice",
        "   ",
        8,
        None,
    )
    .await
    .unwrap();

    assert!(results.items.is_empty());
}

/// When group resolution fails, search still runs scoped to the caller's
/// direct grants and `__Everyone__` rather than erroring out entirely.
#[tokio::test]
async fn semantic_search_falls_back_when_group_lookup_fails() {
    let source_server = MockServer::start().await;
    let lake_server = MockServer::start().await;
    let idp_server = MockServer::start().await;
    let embedding_server = MockServer::start().await;

    mount_idp_token(&idp_server).await;
    mount_embedding_endpoint(&embedding_server).await;
    mount_repository_id(&source_server).await;

    Mock::given(method("GET"))
        .and(path("/api/people/bob/groups"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&source_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/search/vector"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{ "document_id": "doc-1", "score": 0.8, "chunk_text": "match" }]
        })))
        .mount(&lake_server)
        .await;

    let source = SourceClient::new(&source_config(&source_server.uri())).unwrap();
    let lake = LakeClient::new(&lake_config(&lake_server.uri(), &idp_server.uri())).unwrap();
    let embedding_model =
        HttpEmbeddingModel::new(embedding_server.uri(), &embedding_config()).unwrap();
    let search_config = SemanticSearchConfig::default();

    let results = semantic_search(
        &source,
        &lake,
        &embedding_model,
        &search_config,
        "bob",
        "anything",
        8,
        Some(0.0),
    )
    .await
    .unwrap();

    assert_eq!(results.items.len(), 1);
}

/// `rag::answer` stitches retrieval and chat completion end-to-end and
/// attaches source attribution.
#[tokio::test]
async fn rag_answer_returns_attributed_sources() {
    let source_server = MockServer::start().await;
    let lake_server = MockServer::start().await;
    let idp_server = MockServer::start().await;
    let embedding_server = MockServer::start().await;
    let chat_server = MockServer::start().await;

    mount_idp_token(&idp_server).await;
    mount_embedding_endpoint(&embedding_server).await;
    mount_repository_id(&source_server).await;

    Mock::given(method("GET"))
        .and(path("/api/people/carol/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "list": { "entries": [], "pagination": { "hasMoreItems": false } }
        })))
        .mount(&source_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/search/vector"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{ "document_id": "doc-7", "score": 0.95, "chunk_text": "refunds are processed within 30 days" }]
        })))
        .mount(&lake_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "Refunds take 30 days [1]." } }]
        })))
        .mount(&chat_server)
        .await;

    let source = SourceClient::new(&source_config(&source_server.uri())).unwrap();
    let lake = LakeClient::new(&lake_config(&lake_server.uri(), &idp_server.uri())).unwrap();
    let embedding_model =
        HttpEmbeddingModel::new(embedding_server.uri(), &embedding_config()).unwrap();
    let chat_model =
        HttpChatModel::new(chat_server.uri(), "gpt-test".to_string(), 10).unwrap();
    let rag_config = RagConfig::default();

    let response = rag::answer(
        &source,
        &lake,
        &embedding_model,
        &chat_model,
        &rag_config,
        "carol",
        "how long do refunds take?",
        false,
    )
    .await
    .unwrap();

    assert!(response.answer.contains("30 days"));
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].document_id, "doc-7");
}
