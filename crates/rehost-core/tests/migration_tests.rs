//! End-to-end migration runs against a seeded SQLite datastore, an
//! in-process asset host and the in-memory object store.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use rehost::datastore::{AttachmentRow, ContentRow, MetadataRow, RecordFilter};
use rehost::taxonomy::TaxonomyRow;
use rehost::types::{BatchUpdate, RecordSummary, TaxonomyId};
use rehost::{
    Datastore, HttpClient, MemoryObjectStore, MigrationDriver, MigratorConfig, RecordId,
    RehostError, RunOptions, SqliteDatastore,
};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const CDN: &str = "https://cdn.example.com";

#[derive(Clone, Default)]
struct HostState {
    hits: Arc<Mutex<Vec<String>>>,
    flaked: Arc<Mutex<HashSet<String>>>,
}

/// `/missing/*` answers 404, `/broken/*` 500, `/flaky/*` 503 on the first
/// request of each path, everything else 200.
async fn serve_asset(State(state): State<HostState>, uri: Uri) -> (StatusCode, Vec<u8>) {
    let path = uri.path().to_string();
    state.hits.lock().unwrap().push(path.clone());

    if path.starts_with("/missing/") {
        return (StatusCode::NOT_FOUND, Vec::new());
    }
    if path.starts_with("/broken/") {
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
    }
    if path.starts_with("/flaky/") && state.flaked.lock().unwrap().insert(path.clone()) {
        return (StatusCode::SERVICE_UNAVAILABLE, Vec::new());
    }
    (StatusCode::OK, format!("asset:{}", path).into_bytes())
}

struct AssetHost {
    base: String,
    state: HostState,
}

impl AssetHost {
    async fn start() -> Self {
        let state = HostState::default();
        let app = Router::new()
            .fallback(serve_asset)
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base: format!("http://{}", addr),
            state,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn was_requested(&self, path: &str) -> bool {
        self.state.hits.lock().unwrap().iter().any(|hit| hit == path)
    }
}

fn serialized(urls: &[String]) -> String {
    let mut out = format!("a:{}:{{", urls.len());
    for (i, url) in urls.iter().enumerate() {
        out.push_str(&format!("i:{};s:{}:\"{}\";", i, url.len(), url));
    }
    out.push('}');
    out
}

struct Fixture {
    dir: TempDir,
    store: Arc<MemoryObjectStore>,
    config: MigratorConfig,
}

impl Fixture {
    /// Record 42 `widget` in category `category-a` with attachments, inline
    /// images and a metadata gallery, then records 43..=47 with one
    /// attachment each. Chunk size 2 gives three chunks.
    fn new(host: &AssetHost) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("content.db");

        let config: MigratorConfig = serde_json::from_value(serde_json::json!({
            "datastore": { "path": db_path },
            "storage": { "bucket": "assets", "cdn_base_url": CDN },
            "run": {
                "chunk_size": 2,
                "workers": 4,
                "state_dir": dir.path().join("state"),
                "cooldown_min_ms": 0,
                "cooldown_max_ms": 0
            },
            "retry": { "max_attempts": 3, "backoff_factor_secs": 0.001, "max_delay_secs": 1 }
        }))
        .unwrap();

        SqliteDatastore::open(&config.datastore)
            .unwrap()
            .init_schema()
            .unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let body = format!(
            r#"<p>Intro</p><img class="a" src="{}"><img src='{}'>"#,
            host.url("/ok/inline.gif"),
            host.url("/missing/gone.png")
        );
        conn.execute(
            "INSERT INTO wp_posts (ID, post_name, post_type, post_status, post_content)
             VALUES (42, 'widget', 'product', 'publish', ?1)",
            [&body],
        )
        .unwrap();
        for (id, path) in [
            (100, "/ok/widget.png"),
            (101, "/missing/old.png"),
            (102, "/ok/model.stl"),
        ] {
            conn.execute(
                "INSERT INTO wp_posts (ID, post_type, post_parent, post_mime_type, guid)
                 VALUES (?1, 'attachment', 42, 'image/png', ?2)",
                rusqlite::params![id, host.url(path)],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO wp_postmeta (meta_id, post_id, meta_key, meta_value)
             VALUES (900, 42, '_gallery_images', ?1)",
            [serialized(&[host.url("/ok/g1.jpg"), host.url("/flaky/g2.jpg")])],
        )
        .unwrap();
        conn.execute_batch(
            "INSERT INTO wp_terms (term_id, name, slug) VALUES (5, 'Category A', 'category-a');
             INSERT INTO wp_term_taxonomy (term_taxonomy_id, term_id, taxonomy, parent)
                 VALUES (50, 5, 'category', 0);
             INSERT INTO wp_term_relationships (object_id, term_taxonomy_id) VALUES (42, 50);",
        )
        .unwrap();

        for n in 43..=47 {
            conn.execute(
                "INSERT INTO wp_posts (ID, post_name, post_type, post_status)
                 VALUES (?1, ?2, 'post', 'publish')",
                rusqlite::params![n, format!("item-{}", n)],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO wp_posts (ID, post_type, post_parent, post_mime_type, guid)
                 VALUES (?1, 'attachment', ?2, 'image/jpeg', ?3)",
                rusqlite::params![200 + n, n, host.url(&format!("/ok/item-{}.jpg", n))],
            )
            .unwrap();
        }

        Self {
            dir,
            store: Arc::new(MemoryObjectStore::new()),
            config,
        }
    }

    fn driver(&self) -> MigrationDriver {
        self.driver_with(self.config.clone())
    }

    fn driver_with(&self, config: MigratorConfig) -> MigrationDriver {
        let datastore = SqliteDatastore::open(&config.datastore).unwrap();
        let http = HttpClient::with_limits(Duration::from_secs(5), 8).unwrap();
        MigrationDriver::new(config, Box::new(datastore), Arc::new(http), self.store.clone())
            .unwrap()
    }

    fn db(&self) -> Connection {
        Connection::open(&self.config.datastore.path).unwrap()
    }

    fn guid(&self, id: i64) -> String {
        self.db()
            .query_row("SELECT guid FROM wp_posts WHERE ID = ?1", [id], |row| {
                row.get(0)
            })
            .unwrap()
    }

    fn body(&self, id: i64) -> String {
        self.db()
            .query_row(
                "SELECT post_content FROM wp_posts WHERE ID = ?1",
                [id],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn meta(&self, meta_id: i64) -> String {
        self.db()
            .query_row(
                "SELECT meta_value FROM wp_postmeta WHERE meta_id = ?1",
                [meta_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    /// Every mutable value in the datastore, for whole-state comparisons.
    fn snapshot(&self) -> Vec<String> {
        let conn = self.db();
        let mut stmt = conn
            .prepare("SELECT ID || ':' || guid || ':' || post_content FROM wp_posts ORDER BY ID")
            .unwrap();
        let mut values: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        values.push(self.meta(900));
        values
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn state_file(&self, name: &str) -> PathBuf {
        self.state_dir().join(name)
    }

    fn audit(&self, name: &str) -> String {
        std::fs::read_to_string(self.state_file(name)).unwrap_or_default()
    }

    fn state_files_starting_with(&self, prefix: &str) -> Vec<String> {
        list_dir(&self.state_dir())
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect()
    }
}

/// SQLite datastore whose connection check fails from the `fail_from`-th
/// call on, as if the server went away and refused reconnects.
struct DroppingDatastore {
    inner: SqliteDatastore,
    checks: usize,
    fail_from: usize,
}

impl Datastore for DroppingDatastore {
    fn ensure_connected(&mut self) -> rehost::Result<()> {
        self.checks += 1;
        if self.checks >= self.fail_from {
            return Err(RehostError::DatastoreUnavailable {
                message: "connection refused".into(),
            });
        }
        self.inner.ensure_connected()
    }

    fn list_record_ids(&mut self, filter: &RecordFilter) -> rehost::Result<Vec<RecordId>> {
        self.inner.list_record_ids(filter)
    }

    fn list_records(&mut self, ids: &[RecordId]) -> rehost::Result<Vec<RecordSummary>> {
        self.inner.list_records(ids)
    }

    fn list_taxonomy_nodes(&mut self) -> rehost::Result<Vec<TaxonomyRow>> {
        self.inner.list_taxonomy_nodes()
    }

    fn list_record_terms(
        &mut self,
        ids: &[RecordId],
    ) -> rehost::Result<Vec<(RecordId, TaxonomyId)>> {
        self.inner.list_record_terms(ids)
    }

    fn list_attachments(&mut self, ids: &[RecordId]) -> rehost::Result<Vec<AttachmentRow>> {
        self.inner.list_attachments(ids)
    }

    fn list_content_bodies(&mut self, ids: &[RecordId]) -> rehost::Result<Vec<ContentRow>> {
        self.inner.list_content_bodies(ids)
    }

    fn list_metadata(&mut self, ids: &[RecordId]) -> rehost::Result<Vec<MetadataRow>> {
        self.inner.list_metadata(ids)
    }

    fn apply_batches(&mut self, batches: &[BatchUpdate]) -> rehost::Result<()> {
        self.inner.apply_batches(batches)
    }
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_full_run_rehosts_every_role() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);

    let summary = fixture.driver().run(&RunOptions::default()).await.unwrap();

    assert!(summary.completed);
    assert_eq!(summary.total_ids, 6);
    assert_eq!(summary.chunk_count, 3);
    assert_eq!(summary.chunks_processed, 3);

    assert_eq!(
        fixture.guid(100),
        format!("{}/3d-model/category-a/widget-001.png", CDN)
    );
    assert_eq!(
        fixture.store.get("assets", "3d-model/category-a/widget-001.png").unwrap(),
        b"asset:/ok/widget.png"
    );
    assert_eq!(fixture.guid(245), format!("{}/3d-model/item-45-001.jpg", CDN));

    let body = fixture.body(42);
    assert!(body.contains(&format!(
        r#"<img class="a" src="{}/3d-model/category-a/widget-content-001.gif">"#,
        CDN
    )));
    assert!(body.contains(&format!("src='{}'", host.url("/missing/gone.png"))));

    assert_eq!(
        fixture.meta(900),
        serialized(&[
            format!("{}/3d-model/category-a/widget-meta-001.jpg", CDN),
            format!("{}/3d-model/category-a/widget-meta-002.jpg", CDN),
        ])
    );

    // Completion removes the checkpoint and rotates the id list.
    assert!(!fixture.state_file("checkpoint.txt").exists());
    assert!(!fixture.state_file("ids.txt").exists());
    assert_eq!(fixture.state_files_starting_with("ids-backup-").len(), 1);
}

#[tokio::test]
async fn test_missing_asset_keeps_reference_with_unchanged_audit_row() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);

    fixture.driver().run(&RunOptions::default()).await.unwrap();

    let old = host.url("/missing/old.png");
    assert_eq!(fixture.guid(101), old);
    assert!(fixture
        .audit("audit-attachment.csv")
        .lines()
        .any(|line| line == format!("101,{},{}", old, old)));
    assert!(fixture
        .store
        .get("assets", "3d-model/category-a/widget-002.png")
        .is_none());
}

#[tokio::test]
async fn test_disallowed_extension_is_neither_fetched_nor_audited() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);

    fixture.driver().run(&RunOptions::default()).await.unwrap();

    assert!(!host.was_requested("/ok/model.stl"));
    assert_eq!(fixture.guid(102), host.url("/ok/model.stl"));
    assert!(!fixture.audit("audit-attachment.csv").contains("model.stl"));
    assert!(!fixture
        .store
        .keys("assets")
        .iter()
        .any(|key| key.ends_with(".stl")));
}

#[tokio::test]
async fn test_audit_logs_have_header_and_discovery_order() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);

    fixture.driver().run(&RunOptions::default()).await.unwrap();

    let attachments: Vec<String> = fixture
        .audit("audit-attachment.csv")
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(attachments[0], "id,old,new");
    let ids: Vec<&str> = attachments[1..]
        .iter()
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(ids, vec!["100", "101", "243", "244", "245", "246", "247"]);

    let content = fixture.audit("audit-content.csv");
    assert_eq!(content.lines().count(), 3);
    assert!(content.contains(&format!(
        "42,{},{}/3d-model/category-a/widget-content-001.gif",
        host.url("/ok/inline.gif"),
        CDN
    )));

    let metadata = fixture.audit("audit-metadata.csv");
    assert!(metadata.contains(&format!(
        "900,{},{}/3d-model/category-a/widget-meta-002.jpg",
        host.url("/flaky/g2.jpg"),
        CDN
    )));
}

#[tokio::test]
async fn test_dry_run_matches_real_audit_and_leaves_datastore() {
    let host = AssetHost::start().await;
    let dry = Fixture::new(&host);
    let real = Fixture::new(&host);
    let before = dry.snapshot();

    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let summary = dry.driver().run(&options).await.unwrap();
    real.driver().run(&RunOptions::default()).await.unwrap();

    assert!(summary.completed);
    assert!(summary.stats.rows_updated > 0);
    assert_eq!(dry.snapshot(), before);
    for name in ["audit-attachment.csv", "audit-content.csv", "audit-metadata.csv"] {
        assert_eq!(dry.audit(name), real.audit(name), "{} differs", name);
    }
    assert_eq!(dry.store.keys("assets"), real.store.keys("assets"));
}

#[tokio::test]
async fn test_resume_after_interruption_matches_uninterrupted_run() {
    let host = AssetHost::start().await;
    let resumed = Fixture::new(&host);
    let straight = Fixture::new(&host);

    let first = resumed
        .driver()
        .run(&RunOptions {
            max_chunks: Some(1),
            ..RunOptions::default()
        })
        .await
        .unwrap();
    assert!(!first.completed);
    assert_eq!(first.chunks_processed, 1);
    assert_eq!(
        std::fs::read_to_string(resumed.state_file("checkpoint.txt")).unwrap(),
        "0"
    );
    assert!(resumed.state_file("ids.txt").exists());
    assert_eq!(resumed.guid(244), host.url("/ok/item-44.jpg"));

    let second = resumed.driver().run(&RunOptions::default()).await.unwrap();
    assert_eq!(second.first_chunk, 1);
    assert_eq!(second.chunks_processed, 2);
    assert!(second.completed);

    straight.driver().run(&RunOptions::default()).await.unwrap();

    assert_eq!(resumed.snapshot(), straight.snapshot());
    for name in ["audit-attachment.csv", "audit-content.csv", "audit-metadata.csv"] {
        assert_eq!(resumed.audit(name), straight.audit(name), "{} differs", name);
    }
}

#[tokio::test]
async fn test_object_store_failure_aborts_without_checkpoint() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);
    let interrupted = RunOptions {
        max_chunks: Some(1),
        ..RunOptions::default()
    };

    fixture.driver().run(&interrupted).await.unwrap();
    let before = fixture.snapshot();

    fixture.store.fail_with_status(503);
    let err = fixture.driver().run(&RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, RehostError::ObjectStoreStatus { status: 503, .. }));
    assert_eq!(
        std::fs::read_to_string(fixture.state_file("checkpoint.txt")).unwrap(),
        "0"
    );
    assert_eq!(fixture.snapshot(), before);

    fixture.store.clear_failure();
    let summary = fixture.driver().run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.first_chunk, 1);
    assert!(summary.completed);
}

#[tokio::test]
async fn test_exhausted_retries_are_fatal() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);
    fixture
        .db()
        .execute(
            "UPDATE wp_posts SET guid = ?1 WHERE ID = 243",
            [host.url("/broken/item-43.jpg")],
        )
        .unwrap();

    let err = fixture.driver().run(&RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, RehostError::HttpStatus { status: 500, .. }));
    assert!(!fixture.state_file("checkpoint.txt").exists());
    assert_eq!(
        host.state
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|hit| hit.as_str() == "/broken/item-43.jpg")
            .count(),
        3
    );
}

#[tokio::test]
async fn test_fresh_snapshot_backs_up_existing_state() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);
    let one_chunk = RunOptions {
        dry_run: true,
        max_chunks: Some(1),
        ..RunOptions::default()
    };

    fixture.driver().run(&one_chunk).await.unwrap();
    let summary = fixture
        .driver()
        .run(&RunOptions {
            fresh_snapshot: true,
            ..one_chunk.clone()
        })
        .await
        .unwrap();

    assert_eq!(summary.first_chunk, 0);
    assert_eq!(fixture.state_files_starting_with("ids-backup-").len(), 1);
    assert_eq!(fixture.state_files_starting_with("checkpoint-backup-").len(), 1);
    assert_eq!(
        fixture
            .state_files_starting_with("audit-attachment-backup-")
            .len(),
        1
    );
    // The new audit log only holds this run's first chunk.
    assert_eq!(
        fixture.audit("audit-attachment.csv").lines().next(),
        Some("id,old,new")
    );
}

#[tokio::test]
async fn test_disabled_role_contributes_nothing() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);
    let original_body = fixture.body(42);

    let mut config = fixture.config.clone();
    config.roles.content = false;
    fixture
        .driver_with(config)
        .run(&RunOptions::default())
        .await
        .unwrap();

    assert_eq!(fixture.body(42), original_body);
    assert!(!fixture.state_file("audit-content.csv").exists());
    assert!(!host.was_requested("/ok/inline.gif"));
    assert!(fixture.state_file("audit-attachment.csv").exists());
}

#[tokio::test]
async fn test_corrupt_checkpoint_restarts_from_first_chunk() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);
    fixture
        .driver()
        .run(&RunOptions {
            dry_run: true,
            max_chunks: Some(1),
            ..RunOptions::default()
        })
        .await
        .unwrap();
    std::fs::write(fixture.state_file("checkpoint.txt"), "not-a-number").unwrap();

    let summary = fixture.driver().run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.first_chunk, 0);
    assert_eq!(summary.chunks_processed, 3);
}

#[tokio::test]
async fn test_lost_datastore_before_commit_leaves_no_state() {
    let host = AssetHost::start().await;
    let fixture = Fixture::new(&host);
    let before = fixture.snapshot();

    // Checks: snapshot, chunk start, then the one before the first commit.
    let datastore = DroppingDatastore {
        inner: SqliteDatastore::open(&fixture.config.datastore).unwrap(),
        checks: 0,
        fail_from: 3,
    };
    let http = HttpClient::with_limits(Duration::from_secs(5), 8).unwrap();
    let mut driver = MigrationDriver::new(
        fixture.config.clone(),
        Box::new(datastore),
        Arc::new(http),
        fixture.store.clone(),
    )
    .unwrap();

    let err = driver.run(&RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, RehostError::DatastoreUnavailable { .. }));
    assert!(fixture.state_file("ids.txt").exists());
    assert!(!fixture.state_file("checkpoint.txt").exists());
    for name in ["audit-attachment.csv", "audit-content.csv", "audit-metadata.csv"] {
        assert!(!fixture.state_file(name).exists(), "{} was written", name);
    }
    assert_eq!(fixture.snapshot(), before);
}
