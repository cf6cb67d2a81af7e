//! End-to-end exercise of discovery → fetch → parse → embed → persist
//! against stubbed upstream HTTP endpoints, matching scenario 1 of the
//! testable-properties set: one discovered URL becomes exactly one
//! Case/Document/DocumentVersion with lifecycle events published in order.

use court_registry_pipeline::blob_store::FilesystemBlobStore;
use court_registry_pipeline::change_monitor::DiscoveryTuple;
use court_registry_pipeline::config::Config;
use court_registry_pipeline::coordinator::PipelineCoordinator;
use court_registry_pipeline::embedding::build_embedding_provider;
use court_registry_pipeline::event_bus::NullEventBus;
use court_registry_pipeline::fetcher::FetcherPool;
use court_registry_pipeline::metadata_store::{MetadataStore, SqliteMetadataStore};
use court_registry_pipeline::metrics::Metrics;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str, embedding_base: &str) -> Arc<Config> {
    Arc::new(Config {
        database_url: "sqlite::memory:".into(),
        storage_type: "local".into(),
        storage_path: "./does-not-matter".into(),
        minio_endpoint: None,
        minio_access_key: None,
        minio_secret_key: None,
        minio_bucket_name: None,
        minio_use_ssl: false,
        court_registry_base_url: base_url.to_string(),
        court_registry_rss_endpoint: "/RSS".into(),
        court_registry_search_endpoint: "/Search".into(),
        fetcher_workers: 2,
        fetcher_max_retries: 3,
        fetcher_timeout_secs: 5,
        embedding_api_base: embedding_base.to_string(),
        embedding_api_key: None,
        embedding_model: "text-embedding-3-small".into(),
        embedding_batch_size: 8,
        embedding_chunk_size: 64,
        embedding_dimension: 3,
        discovery_interval_minutes: 15,
        reconciliation_interval_hours: 6,
        reconciliation_batch_size: 100,
        parser_confidence_threshold: 0.5,
        parser_version: "1.0.0-test".into(),
        kafka_enabled: false,
        kafka_bootstrap_servers: None,
        log_level: "info".into(),
        log_format: "pretty".into(),
        health_port: 0,
    })
}

#[tokio::test]
async fn discovered_document_produces_one_case_one_document_one_version() {
    let registry = MockServer::start().await;
    let embedding_server = MockServer::start().await;

    let decision_html = "<html><body>Справа № 123/456/2024. Господарський суд. \
        Суддя: Іванов І.І. Дата прийняття 01.01.2024. ст. 15 ЦК.</body></html>";

    Mock::given(method("GET"))
        .and(path("/Document/42"))
        .respond_with(ResponseTemplate::new(200).set_body_string(decision_html).insert_header("content-type", "text/html"))
        .mount(&registry)
        .await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"embedding": [0.1, 0.2, 0.3]}]
        })))
        .mount(&embedding_server)
        .await;

    let config = test_config(&registry.uri(), &embedding_server.uri());
    let http = reqwest::Client::new();

    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::connect(&config.database_url).await.unwrap());
    let metrics = Arc::new(Metrics::new().unwrap());
    let bus = Arc::new(NullEventBus::new(metrics.clone()));
    let blob_dir = tempfile::tempdir().unwrap();
    let blob_store = Arc::new(FilesystemBlobStore::new(blob_dir.path()));
    let fetcher = Arc::new(FetcherPool::new(http.clone(), config.fetcher_workers, config.fetcher_max_retries, blob_store));
    let embeddings = build_embedding_provider(
        http,
        config.embedding_api_base.clone(),
        None,
        config.embedding_model.clone(),
        config.embedding_dimension,
        config.embedding_batch_size,
    );

    let coordinator = PipelineCoordinator::new(config.clone(), fetcher, store.clone(), bus, embeddings, metrics);

    let doc_id = Uuid::new_v4();
    let tuple = DiscoveryTuple { doc_id, url: format!("{}/Document/42", registry.uri()), hash_hint: None };

    let version_id = coordinator.process(tuple).await.unwrap();
    assert!(version_id.is_some());

    let case = store.upsert_case_by_registry_number("123/456/2024", None).await.unwrap();
    let document = store.find_or_create_document(doc_id, case.id, court_registry_pipeline::models::DocumentType::Decision).await.unwrap();
    assert_eq!(document.current_version_id, version_id);
}

#[tokio::test]
async fn not_found_document_writes_no_version() {
    let registry = MockServer::start().await;
    Mock::given(method("GET")).and(path("/Document/404")).respond_with(ResponseTemplate::new(404)).mount(&registry).await;

    let config = test_config(&registry.uri(), "http://localhost:0");
    let http = reqwest::Client::new();

    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::connect(&config.database_url).await.unwrap());
    let metrics = Arc::new(Metrics::new().unwrap());
    let bus = Arc::new(NullEventBus::new(metrics.clone()));
    let blob_dir = tempfile::tempdir().unwrap();
    let blob_store = Arc::new(FilesystemBlobStore::new(blob_dir.path()));
    let fetcher = Arc::new(FetcherPool::new(http.clone(), config.fetcher_workers, config.fetcher_max_retries, blob_store));
    let embeddings = build_embedding_provider(
        http,
        config.embedding_api_base.clone(),
        None,
        config.embedding_model.clone(),
        config.embedding_dimension,
        config.embedding_batch_size,
    );

    let coordinator = PipelineCoordinator::new(config.clone(), fetcher, store, bus, embeddings, metrics);
    let tuple = DiscoveryTuple { doc_id: Uuid::new_v4(), url: format!("{}/Document/404", registry.uri()), hash_hint: None };

    let result = coordinator.process(tuple).await.unwrap();
    assert!(result.is_none());
}
