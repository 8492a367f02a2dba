//! End-to-end properties of the ingestion pipeline
//!
//! Each test feeds a newline-delimited input through a full pipeline and
//! checks what the backing store can observe afterwards.

mod common;

use common::{
    checkpoint_line, input_of, record_line, registry, CountingBackend, OrgsTransform,
    ReposTransform,
};
use graphline::revision::{MemoryBackend, RevisionStatus, SqliteBackend};
use graphline::{
    ErrorPolicy, IngestPipeline, PipelineError, RevisionSink, RunConfig, TransformRegistry,
};
use serde_json::json;
use std::sync::Arc;

fn orgs_then_repos() -> String {
    input_of(&[
        record_line("github__orgs", json!({"id": 1, "login": "Acme"})),
        record_line("github__orgs", json!({"id": 2, "login": "Globex"})),
        record_line("github__orgs", json!({"id": 3, "login": "Initech"})),
        checkpoint_line(3),
        record_line("github__repos", json!({"id": 10, "name": "rocket", "org_id": 1})),
        record_line("github__repos", json!({"id": 11, "name": "probe", "org_id": 99})),
        checkpoint_line(5),
    ])
}

// === Scenario: Dependent stream resolves earlier records and degrades on misses ===
#[tokio::test]
async fn repos_reference_earlier_orgs() {
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = IngestPipeline::new(registry(), RevisionSink::new(backend.clone()));

    let report = pipeline.run(orgs_then_repos().as_bytes()).await.unwrap();
    assert_eq!(report.stats.records_read, 5);
    assert_eq!(report.stats.records_processed, 5);
    assert_eq!(report.stats.records_errored, 0);
    assert_eq!(report.stats.entry_types["vcs_Organization"], 3);
    assert_eq!(report.stats.entry_types["vcs_Repository"], 2);
    assert_eq!(report.checkpoints.len(), 2);

    let committed = backend.committed_entries().unwrap();
    let repos: Vec<_> = committed
        .iter()
        .filter(|e| e.entry_type == "vcs_Repository")
        .collect();
    assert_eq!(repos[0].payload.get("organization"), Some(&json!({"uid": "acme"})));
    // org 99 was never seen: the entry is still emitted, without the reference
    assert_eq!(repos[1].payload.get("name"), Some(&json!("probe")));
    assert!(repos[1].payload.get("organization").is_none());
}

// === Scenario: Processed plus errored equals records read under skip ===
#[tokio::test]
async fn skip_accounts_for_every_record() {
    let backend = Arc::new(MemoryBackend::new());
    let mut lines = Vec::new();
    for n in 0..20 {
        let data = if n % 4 == 0 {
            json!({"id": n})
        } else {
            json!({"id": n, "login": format!("org{}", n)})
        };
        lines.push(record_line("github__orgs", data));
    }
    lines.push(record_line("gitlab__groups", json!({"id": 1})));

    let report = IngestPipeline::new(registry(), RevisionSink::new(backend.clone()))
        .with_policy(ErrorPolicy::Skip)
        .run(input_of(&lines).as_bytes())
        .await
        .unwrap();

    let n = lines.len() as u64;
    assert_eq!(report.stats.records_processed + report.stats.records_errored, n);
    assert_eq!(report.stats.records_errored, 6);
    assert_eq!(
        backend.committed_entries().unwrap().len() as u64,
        report.stats.records_processed
    );
}

// === Scenario: Later record with the same key overwrites the earlier one ===
#[tokio::test]
async fn last_write_wins_for_lookups() {
    let backend = Arc::new(MemoryBackend::new());
    let input = input_of(&[
        record_line("github__orgs", json!({"id": 1, "login": "OldName"})),
        record_line("github__orgs", json!({"id": 1, "login": "NewName"})),
        record_line("github__repos", json!({"id": 10, "name": "rocket", "org_id": 1})),
    ]);

    IngestPipeline::new(registry(), RevisionSink::new(backend.clone()))
        .run(input.as_bytes())
        .await
        .unwrap();

    let committed = backend.committed_entries().unwrap();
    let repo = committed
        .iter()
        .find(|e| e.entry_type == "vcs_Repository")
        .unwrap();
    assert_eq!(repo.payload.get("organization"), Some(&json!({"uid": "newname"})));
}

// === Scenario: Fail policy halts and commits nothing ===
#[tokio::test]
async fn fail_policy_commits_nothing() {
    for bad_line in [
        "{\"type\": \"RECORD\"".to_string(),
        record_line("github__unknown", json!({"id": 1})),
        record_line("github__orgs", json!({"id": 1})),
    ] {
        let backend = Arc::new(MemoryBackend::new());
        let input = input_of(&[
            record_line("github__orgs", json!({"id": 1, "login": "Acme"})),
            checkpoint_line(1),
            bad_line,
            record_line("github__orgs", json!({"id": 2, "login": "Globex"})),
        ]);

        let failure = IngestPipeline::new(registry(), RevisionSink::new(backend.clone()))
            .with_policy(ErrorPolicy::Fail)
            .run(input.as_bytes())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, PipelineError::Aborted { line: 3, .. }));
        assert_eq!(failure.stats.lines_read, 3);
        assert!(failure.stats.records_processed < failure.stats.lines_read);
        assert!(backend.committed_entries().unwrap().is_empty());
    }
}

// === Scenario: Dry run matches a live run without store calls ===
#[tokio::test]
async fn dry_run_matches_live_counts() {
    let live_backend = Arc::new(CountingBackend::wrap(Arc::new(MemoryBackend::new())));
    let live = IngestPipeline::new(registry(), RevisionSink::new(live_backend.clone()))
        .run(orgs_then_repos().as_bytes())
        .await
        .unwrap();

    let dry_backend = Arc::new(CountingBackend::wrap(Arc::new(MemoryBackend::new())));
    let dry = IngestPipeline::new(
        registry(),
        RevisionSink::new(dry_backend.clone()).with_dry_run(true),
    )
    .run(orgs_then_repos().as_bytes())
    .await
    .unwrap();

    assert!(dry.dry_run);
    assert_eq!(dry.stats.records_written, live.stats.records_written);
    assert_eq!(dry.stats.records_errored, live.stats.records_errored);
    assert_eq!(dry.checkpoints, live.checkpoints);
    assert_eq!(dry_backend.calls(), 0);
    assert!(live_backend.calls() >= 3);
}

// === Scenario: Dependency stream arriving late leaves lookups missing ===
#[tokio::test]
async fn out_of_order_dependency_is_not_reordered() {
    let backend = Arc::new(MemoryBackend::new());
    let input = input_of(&[
        record_line("github__repos", json!({"id": 10, "name": "rocket", "org_id": 1})),
        record_line("github__orgs", json!({"id": 1, "login": "Acme"})),
    ]);

    let report = IngestPipeline::new(registry(), RevisionSink::new(backend.clone()))
        .run(input.as_bytes())
        .await
        .unwrap();
    assert_eq!(report.stats.records_errored, 0);

    let committed = backend.committed_entries().unwrap();
    assert_eq!(committed[0].entry_type, "vcs_Repository");
    assert!(committed[0].payload.get("organization").is_none());
}

// === Scenario: Explicit registration overrides a configured mapping ===
#[tokio::test]
async fn explicit_registration_beats_config() {
    let config = RunConfig::from_yaml(
        r#"
transforms:
  - stream: github__orgs
    emit:
      - kind: entry
        type: cfg_Org
        fields:
          uid: "{input.login}"
"#,
    )
    .unwrap();

    let mut registry: TransformRegistry = config.build_registry().unwrap();
    registry.register(common::orgs_stream(), Arc::new(OrgsTransform::new()));
    registry.register(common::repos_stream(), Arc::new(ReposTransform::new()));

    let backend = Arc::new(MemoryBackend::new());
    let report = IngestPipeline::new(registry, RevisionSink::new(backend.clone()))
        .run(orgs_then_repos().as_bytes())
        .await
        .unwrap();
    assert!(report.stats.entry_types.contains_key("vcs_Organization"));
    assert!(!report.stats.entry_types.contains_key("cfg_Org"));
}

// === Scenario: Declarative mappings from config run end to end on SQLite ===
#[tokio::test]
async fn configured_run_commits_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.db");
    let yaml = format!(
        r#"
stream_prefix: "conn1_"
batch_size: 2
backend:
  kind: sqlite
  path: {}
transforms:
  - stream: github__orgs
    emit:
      - kind: entry
        type: vcs_Organization
        fields:
          uid: "{{input.login | lowercase}}"
  - stream: github__repos
    emit:
      - kind: lookup
        stream: github__orgs
        key: "{{input.org_id}}"
        as: org
      - kind: entry
        type: vcs_Repository
        fields:
          name: "{{input.name}}"
          organization:
            template: "{{org.login | lowercase}}"
            optional: true
"#,
        db.display()
    );
    let config = RunConfig::from_yaml(&yaml).unwrap();

    let input = orgs_then_repos().replace("github__", "conn1_github__");
    let report = config
        .build_pipeline()
        .unwrap()
        .run(input.as_bytes())
        .await
        .unwrap();
    assert_eq!(report.stats.records_written, 5);
    assert_eq!(
        report.stats.streams["github__repos"].written,
        2
    );

    let store = SqliteBackend::open(&db).unwrap();
    assert_eq!(
        store.revision_status(&report.revision).unwrap(),
        Some(RevisionStatus::Active)
    );
    let repos = store.active_entries(Some("vcs_Repository")).unwrap();
    assert_eq!(repos.len(), 2);
    assert_eq!(repos[0].payload.get("organization"), Some(&json!("acme")));
    assert!(repos[1].payload.get("organization").is_none());
}
