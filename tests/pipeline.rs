//! End-to-end pipeline tests over SQLite and the in-memory vector store

mod common;

use common::{
    hash_vector, invoice, lunch, message, standup, DownEmbedder, Harness, HashEmbedder,
    ScriptedGenerator,
};
use mailrag::commands::{
    cmd_ask, cmd_clear, cmd_clear_ingestion, cmd_ingest, cmd_list_ingestions, cmd_reconcile,
    cmd_reindex, cmd_search, cmd_status, cmd_sync, search_timed, AskRequest, IngestRequest,
    ReconcileOptions, ReindexOptions, SyncRequest, MODE_FULL, MODE_INCREMENTAL, NO_MATCHES_ANSWER,
};
use mailrag::config::GraphConfig;
use mailrag::graph::GraphClient;
use mailrag::store::{
    DeletionOutcome, EmailVector, MemoryVectorStore, VectorStore, VectorStoreCapabilities,
};
use mailrag::Error;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn reingesting_the_same_batch_is_idempotent() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();

    let first = h.ingest(&store, "run1", vec![invoice(), lunch()]).await;
    let second = h.ingest(&store, "run1", vec![invoice(), lunch()]).await;

    assert_eq!(first.ingested_count, 2);
    assert_eq!(second.ingested_count, 2);
    assert_eq!(h.db.count_emails().await.unwrap(), 2);
    assert_eq!(store.count().await.unwrap(), 2);

    let runs = cmd_list_ingestions(&h.db, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].email_count, 2);
}

#[tokio::test]
async fn records_without_id_are_dropped() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();

    let outcome = h
        .ingest(
            &store,
            "run1",
            vec![invoice(), json!({"subject": "no id"}), json!({"id": "   "}), json!("text")],
        )
        .await;

    assert_eq!(outcome.ingested_count, 1);
    assert_eq!(outcome.dropped_count, 3);
}

#[tokio::test]
async fn embedding_failure_surfaces_but_rows_stay_committed() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();

    let result = cmd_ingest(
        &h.db,
        &store,
        &DownEmbedder,
        IngestRequest {
            messages: vec![invoice()],
            ingestion_id: Some("run1".to_string()),
            ..Default::default()
        },
    )
    .await;

    match result {
        Err(Error::Embedding(msg)) => assert_eq!(msg, "down"),
        other => panic!("expected embedding error, got {other:?}"),
    }
    assert_eq!(h.db.count_emails().await.unwrap(), 1);
    assert_eq!(store.count().await.unwrap(), 0);

    let hits = cmd_search(&h.db, &store, &HashEmbedder, "invoice payment", 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn vector_store_failure_surfaces_but_rows_stay_committed() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    store.set_unavailable(true);

    let result = cmd_ingest(
        &h.db,
        &store,
        &HashEmbedder,
        IngestRequest {
            messages: vec![invoice(), lunch()],
            ingestion_id: Some("run1".to_string()),
            ..Default::default()
        },
    )
    .await;

    assert!(matches!(result, Err(Error::Qdrant(_))));
    assert_eq!(h.db.count_emails().await.unwrap(), 2);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn invoice_question_retrieves_and_cites_the_invoice() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice(), lunch(), standup()]).await;

    let hits = cmd_search(&h.db, &store, &HashEmbedder, "invoice payment", 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].message_id, "m1");
    assert_eq!(hits[0].sender, "billing@example.com");
    assert_eq!(hits[0].ingestion_id.as_deref(), Some("run1"));

    let generator = ScriptedGenerator::new(&["The invoice ", "is due Friday ", "[1]."]);
    let mut streamed = String::new();
    let mut sink = |fragment: &str| streamed.push_str(fragment);

    let outcome = cmd_ask(
        &h.db,
        &store,
        &HashEmbedder,
        &generator,
        AskRequest::new("When is the invoice payment due?", 1, 64),
        &mut sink,
    )
    .await
    .unwrap();

    assert!(!outcome.no_matches);
    assert_eq!(outcome.answer, "The invoice is due Friday [1].");
    assert_eq!(outcome.sources.len(), 1);
    assert_eq!(outcome.sources[0].message_id, "m1");
    assert_eq!(outcome.model.as_deref(), Some("scripted"));
    assert!(outcome.total_ms >= outcome.retrieval.retrieval_ms);
    assert_eq!(streamed, "The invoice is due Friday [1].");

    let prompt = generator.last_prompt().unwrap();
    assert!(prompt.contains("[1] Subject: Invoice 1042"));
    assert!(!prompt.contains("[2]"));
    assert!(prompt.ends_with("QUESTION:\nWhen is the invoice payment due?\n\nANSWER:\n"));
}

#[tokio::test]
async fn ask_on_empty_index_skips_generation() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    let generator = ScriptedGenerator::new(&["unused"]);
    let mut sink = |_: &str| {};

    let outcome = cmd_ask(
        &h.db,
        &store,
        &HashEmbedder,
        &generator,
        AskRequest::new("anything new?", 5, 64),
        &mut sink,
    )
    .await
    .unwrap();

    assert!(outcome.no_matches);
    assert_eq!(outcome.answer, NO_MATCHES_ANSWER);
    assert!(outcome.generation.is_none());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn search_input_validation() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice()]).await;

    let blank = cmd_search(&h.db, &store, &HashEmbedder, "   ", 5).await;
    assert!(matches!(blank, Err(Error::InvalidInput(_))));

    let none = cmd_search(&h.db, &store, &HashEmbedder, "invoice", 0)
        .await
        .unwrap();
    assert!(none.is_empty());

    let empty_store = MemoryVectorStore::new();
    let hits = cmd_search(&h.db, &empty_store, &HashEmbedder, "invoice", 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn hits_without_rows_are_filtered() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice(), lunch()]).await;

    store
        .upsert(vec![EmailVector::new(
            "ghost".to_string(),
            hash_vector("invoice payment"),
            None,
        )])
        .await
        .unwrap();

    let outcome = search_timed(&h.db, &store, &HashEmbedder, "invoice payment", 5, 40)
        .await
        .unwrap();

    let ids: Vec<&str> = outcome.results.iter().map(|r| r.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert!(outcome.results.iter().all(|r| r.snippet.chars().count() <= 40));
    assert!(outcome.results[0].score <= outcome.results[1].score);
}

#[tokio::test]
async fn clear_resets_counts_and_stamps_last_updated() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice(), lunch()]).await;

    let outcome = cmd_clear(&h.db, &store).await.unwrap();
    assert_eq!(outcome.emails_deleted, 2);
    assert_eq!(outcome.ingestions_deleted, 1);
    assert_eq!(outcome.vectors, DeletionOutcome::Deleted);

    let status = cmd_status(&h.config, &h.db, &store).await.unwrap();
    assert_eq!(status.indexed_count, 0);
    assert_eq!(status.ingestion_count, 0);
    assert_eq!(status.vector_count, 0);
    assert_eq!(status.last_updated.as_deref(), Some(outcome.timestamp.as_str()));
}

#[tokio::test]
async fn clear_succeeds_when_vector_removal_fails() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice(), lunch()]).await;
    store.set_unavailable(true);

    let outcome = cmd_clear(&h.db, &store).await.unwrap();
    assert_eq!(outcome.emails_deleted, 2);
    assert_eq!(outcome.ingestions_deleted, 1);
    assert!(matches!(outcome.vectors, DeletionOutcome::Failed { .. }));

    // Relational side is cleared; the stale vectors are left for reconcile
    assert_eq!(h.db.count_emails().await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 2);
    let hits = cmd_search(&h.db, &store, &HashEmbedder, "invoice payment", 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn clear_ingestion_removes_only_that_run() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice(), lunch()]).await;
    h.ingest(&store, "run2", vec![standup()]).await;

    let outcome = cmd_clear_ingestion(&h.db, &store, "run1").await.unwrap();
    assert_eq!(outcome.emails_deleted, 2);
    assert!(outcome.vectors.is_deleted());

    assert_eq!(h.db.list_all_message_ids().await.unwrap(), vec!["m3"]);
    assert_eq!(store.list_ids().await.unwrap(), vec!["m3"]);

    let runs = cmd_list_ingestions(&h.db, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].ingestion_id, "run2");

    let missing = cmd_clear_ingestion(&h.db, &store, "run1").await;
    assert!(matches!(missing, Err(Error::IngestionNotFound(_))));
}

#[tokio::test]
async fn clear_ingestion_reports_unsupported_vector_delete() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::with_capabilities(VectorStoreCapabilities {
        upsert: true,
        delete_by_id: false,
    });
    h.ingest(&store, "run1", vec![invoice()]).await;

    let outcome = cmd_clear_ingestion(&h.db, &store, "run1").await.unwrap();

    // Rows go regardless; the stale vector is left for reconcile
    assert_eq!(outcome.vectors, DeletionOutcome::Unsupported);
    assert_eq!(h.db.count_emails().await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn store_without_upsert_rebuilds_and_keeps_other_vectors() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::with_capabilities(VectorStoreCapabilities {
        upsert: false,
        delete_by_id: true,
    });

    let first = h.ingest(&store, "run1", vec![invoice(), lunch()]).await;
    assert!(first.degraded_vector_rebuild);

    let mut changed = lunch();
    changed["bodyPreview"] = json!("Lunch moved to Wednesday");
    let second = h.ingest(&store, "run2", vec![changed, standup()]).await;
    assert!(second.degraded_vector_rebuild);

    let mut ids = store.list_ids().await.unwrap();
    ids.sort();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert_eq!(store.ingestion_of("m1").await.as_deref(), Some("run1"));
    assert_eq!(store.ingestion_of("m2").await.as_deref(), Some("run2"));

    let hits = cmd_search(&h.db, &store, &HashEmbedder, "invoice payment", 1)
        .await
        .unwrap();
    assert_eq!(hits[0].message_id, "m1");
}

#[tokio::test]
async fn reconcile_removes_orphans_and_reembeds_missing() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice(), lunch(), standup()]).await;

    store
        .upsert(vec![EmailVector::new("ghost".to_string(), hash_vector("ghost"), None)])
        .await
        .unwrap();
    store.delete_ids(&["m2".to_string()]).await;

    let report = cmd_reconcile(
        &h.db,
        &store,
        &HashEmbedder,
        ReconcileOptions {
            dry_run: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(report.orphan_vectors, vec!["ghost"]);
    assert_eq!(report.missing_vectors, vec!["m2"]);
    assert_eq!(report.reembedded, 0);
    assert_eq!(store.count().await.unwrap(), 3);

    let stats = cmd_reconcile(&h.db, &store, &HashEmbedder, ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.orphan_deletion, Some(DeletionOutcome::Deleted));
    assert_eq!(stats.reembedded, 1);

    let mut ids = store.list_ids().await.unwrap();
    ids.sort();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn reindex_restores_a_wiped_collection() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "run1", vec![invoice(), lunch(), standup()]).await;
    store.recreate().await.unwrap();

    let stats = cmd_reindex(
        &h.db,
        &store,
        &HashEmbedder,
        ReindexOptions {
            batch_size: 2,
            show_progress: false,
        },
    )
    .await
    .unwrap();

    assert_eq!(stats.emails_reindexed, 3);
    assert_eq!(stats.batches, 2);
    assert_eq!(store.count().await.unwrap(), 3);
}

fn graph_client(server: &MockServer) -> GraphClient {
    GraphClient::new(&GraphConfig {
        base_url: format!("{}/v1.0", server.uri()),
        token_env: "UNUSED".to_string(),
        page_size: 10,
        timeout_secs: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn sync_rejects_empty_id_list_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(0)
        .mount(&server)
        .await;

    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    let result = cmd_sync(
        &h.db,
        &store,
        &HashEmbedder,
        &graph_client(&server),
        "token",
        SyncRequest {
            message_ids: Some(Vec::new()),
            ..Default::default()
        },
    )
    .await;

    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(h.db.count_ingestions().await.unwrap(), 0);
}

#[tokio::test]
async fn sync_pulls_folder_and_tags_provenance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me/mailFolders/inbox/messages"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"value": [invoice(), lunch()]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    let outcome = cmd_sync(
        &h.db,
        &store,
        &HashEmbedder,
        &graph_client(&server),
        "token",
        SyncRequest {
            ingestion_id: Some("sync1".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.fetched, 2);
    assert!(!outcome.cleared);
    assert_eq!(outcome.ingest.ingested_count, 2);

    let run = h.db.get_ingestion("sync1").await.unwrap().unwrap();
    assert_eq!(run.mode, MODE_INCREMENTAL);
    let email = h.db.get_email("m1").await.unwrap().unwrap();
    assert_eq!(email.folder_id.as_deref(), Some("inbox"));
}

#[tokio::test]
async fn full_sync_replaces_index_but_provider_failure_keeps_it() {
    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    h.ingest(&store, "old", vec![message("m9", "Old", "stale mail", "carol")]).await;

    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&failing)
        .await;

    let full = SyncRequest {
        full: true,
        ingestion_id: Some("full1".to_string()),
        ..Default::default()
    };

    let err = cmd_sync(
        &h.db,
        &store,
        &HashEmbedder,
        &graph_client(&failing),
        "token",
        full.clone(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Graph(_)));
    assert!(h.db.get_email("m9").await.unwrap().is_some());

    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me/mailFolders/inbox/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [standup()]})))
        .mount(&healthy)
        .await;

    let outcome = cmd_sync(
        &h.db,
        &store,
        &HashEmbedder,
        &graph_client(&healthy),
        "token",
        full,
    )
    .await
    .unwrap();

    assert!(outcome.cleared);
    assert_eq!(h.db.list_all_message_ids().await.unwrap(), vec!["m3"]);
    assert_eq!(store.list_ids().await.unwrap(), vec!["m3"]);
    let run = h.db.get_ingestion("full1").await.unwrap().unwrap();
    assert_eq!(run.mode, MODE_FULL);
}

#[tokio::test]
async fn sync_by_ids_fetches_each_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me/messages/m2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lunch()))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new().await;
    let store = MemoryVectorStore::new();
    let outcome = cmd_sync(
        &h.db,
        &store,
        &HashEmbedder,
        &graph_client(&server),
        "token",
        SyncRequest {
            message_ids: Some(vec!["m2".to_string()]),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.ingest.ingested_count, 1);
    // Without a listed folder the message's own parent folder is kept
    let email = h.db.get_email("m2").await.unwrap().unwrap();
    assert_eq!(email.folder_id.as_deref(), Some("inbox"));
}
