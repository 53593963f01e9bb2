//! Integration tests for the sync engine against real providers.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vfsync_backend_server::{BackendHandler, BackendServer, ServerConfig};
use vfsync_core::{Origin, SnapshotManager, UndoRedoManager, VersionedDocumentStore};
use vfsync_protocol::{FileContent, WatchEventKind};
use vfsync_sync_engine::{
    FileWatcher, OrchestratorConfig, ProviderAdapter, RemoteAdapter, RemoteConfig, RequestHandlerFn,
    SyncOrchestrator, SyncResult, VirtualAdapter,
};
use vfsync_testkit::{empty_store, seeded_store};

fn fast() -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_retry_delay(Duration::ZERO)
        .with_poll_interval(Duration::ZERO)
}

fn backend() -> (TempDir, Arc<BackendHandler>) {
    let dir = TempDir::new().unwrap();
    let handler = BackendHandler::new(ServerConfig::new(dir.path())).unwrap();
    (dir, Arc::new(handler))
}

fn handler_fn(handler: &Arc<BackendHandler>) -> RequestHandlerFn {
    Arc::new(Arc::clone(handler).into_fn())
}

fn remote_orchestrator(
    store: Arc<VersionedDocumentStore>,
    handler: &Arc<BackendHandler>,
) -> SyncOrchestrator {
    let handler = handler_fn(handler);
    let factory = move || -> SyncResult<Arc<dyn ProviderAdapter>> {
        Ok(Arc::new(RemoteAdapter::worker(
            Arc::clone(&handler),
            RemoteConfig::new(),
        )))
    };
    SyncOrchestrator::new(store, factory, fast())
}

#[test]
fn virtual_provider_follows_undo_and_restore() {
    let store = seeded_store(&[("/index.js", "v1")]);
    let provider = VirtualAdapter::new().with_poll_interval(Duration::ZERO);
    let shared = provider.clone();
    let factory = move || -> SyncResult<Arc<dyn ProviderAdapter>> { Ok(Arc::new(shared.clone())) };
    let orchestrator = SyncOrchestrator::new(Arc::clone(&store), factory, fast());
    orchestrator.start("undo").unwrap();
    assert_eq!(provider.file("/index.js").as_deref(), Some("v1"));

    let snapshots = SnapshotManager::new(Arc::clone(&store));
    let checkpoint = snapshots.create_snapshot("first release").unwrap();
    let mut undo = UndoRedoManager::new(Arc::clone(&store));

    store
        .change(Origin::Local, |tx| tx.put_text("/index.js", "v2"))
        .unwrap();
    orchestrator.sync_once().unwrap();
    assert_eq!(provider.file("/index.js").as_deref(), Some("v2"));

    assert!(undo.undo().unwrap().is_applied());
    orchestrator.sync_once().unwrap();
    assert_eq!(provider.file("/index.js").as_deref(), Some("v1"));

    assert!(undo.redo().unwrap().is_applied());
    orchestrator.sync_once().unwrap();
    assert_eq!(provider.file("/index.js").as_deref(), Some("v2"));

    snapshots.restore_snapshot(&checkpoint).unwrap();
    orchestrator.sync_once().unwrap();
    assert_eq!(provider.file("/index.js").as_deref(), Some("v1"));
}

#[test]
fn remote_seed_writes_to_disk_and_imports_disk_files() {
    let (dir, handler) = backend();
    std::fs::create_dir_all(dir.path().join("assets")).unwrap();
    std::fs::write(dir.path().join("assets/existing.css"), "body {}").unwrap();

    let store = seeded_store(&[("/src/main.rs", "fn main() {}"), ("/README.md", "# demo")]);
    let orchestrator = remote_orchestrator(Arc::clone(&store), &handler);
    assert!(orchestrator.start("seed").unwrap());

    assert_eq!(
        std::fs::read_to_string(dir.path().join("src/main.rs")).unwrap(),
        "fn main() {}"
    );
    assert_eq!(store.get_text("/assets/existing.css").as_deref(), Some("body {}"));
    assert!(orchestrator.ping().healthy);
    assert_eq!(handler.sessions(), vec!["seed".to_string()]);
}

#[cfg(unix)]
#[test]
fn remote_command_output_flows_back_into_the_document() {
    let (dir, handler) = backend();
    let store = empty_store(1);
    let orchestrator = remote_orchestrator(Arc::clone(&store), &handler);
    orchestrator.start("cmd").unwrap();

    store
        .change(Origin::Local, |tx| tx.put_text("/input.txt", "hello"))
        .unwrap();
    let report = orchestrator.sync_once().unwrap();
    assert_eq!(report.pushed, 1);

    let adapter = orchestrator.adapter().unwrap();
    let output = adapter
        .run_command("tr a-z A-Z < input.txt > output.txt")
        .unwrap();
    assert!(output.success());
    assert!(dir.path().join("output.txt").exists());

    let report = orchestrator.sync_once().unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(store.get_text("/output.txt").as_deref(), Some("HELLO"));
}

#[test]
fn remote_deletions_remove_document_files() {
    let (dir, handler) = backend();
    let store = seeded_store(&[("/a.txt", "a"), ("/b.txt", "b")]);
    let orchestrator = remote_orchestrator(Arc::clone(&store), &handler);
    orchestrator.start("rm").unwrap();

    std::fs::remove_file(dir.path().join("b.txt")).unwrap();
    let report = orchestrator.sync_once().unwrap();
    assert_eq!(report.pulled, 1);
    assert!(store.get("/b.txt").is_none());
    assert_eq!(store.get_text("/a.txt").as_deref(), Some("a"));
}

#[test]
fn restart_after_a_local_delete_keeps_the_file_gone() {
    let (dir, handler) = backend();
    let store = seeded_store(&[("/a.txt", "a"), ("/b.txt", "b")]);
    let orchestrator = remote_orchestrator(Arc::clone(&store), &handler);
    orchestrator.start("restart").unwrap();
    assert!(dir.path().join("b.txt").exists());

    store.change(Origin::Local, |tx| Ok(tx.delete("/b.txt"))).unwrap();
    let report = orchestrator.restart_provider().unwrap().unwrap();
    assert_eq!(report.pulled, 0);
    assert!(!dir.path().join("b.txt").exists());
    assert!(store.get("/b.txt").is_none());

    let report = orchestrator.sync_once().unwrap();
    assert_eq!(report.pulled, 0);
    assert!(store.get("/b.txt").is_none());
    assert_eq!(store.get_text("/a.txt").as_deref(), Some("a"));
}

#[test]
fn event_log_overflow_falls_back_to_a_rescan() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig::new(dir.path()).with_event_log_capacity(1);
    let handler = Arc::new(BackendHandler::new(config).unwrap());
    let store = seeded_store(&[("/a.txt", "a"), ("/b.txt", "b")]);
    let orchestrator = remote_orchestrator(Arc::clone(&store), &handler);
    orchestrator.start("overflow").unwrap();

    // One add, one change and one removal: three events for a log of one.
    std::fs::write(dir.path().join("c.txt"), "c").unwrap();
    std::fs::write(dir.path().join("a.txt"), "a2").unwrap();
    std::fs::remove_file(dir.path().join("b.txt")).unwrap();

    let report = orchestrator.sync_once().unwrap();
    assert_eq!(report.pulled, 3);
    assert_eq!(store.get_text("/a.txt").as_deref(), Some("a2"));
    assert_eq!(store.get_text("/c.txt").as_deref(), Some("c"));
    assert!(store.get("/b.txt").is_none());
    assert_eq!(orchestrator.sync_once().unwrap().pulled, 0);
}

#[test]
fn manifest_writes_through_the_adapter_reach_both_tables() {
    let store = empty_store(3);
    let provider = VirtualAdapter::new().with_poll_interval(Duration::ZERO);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    provider.on_dependencies_changed(move |table| sink.lock().push(table.clone()));
    let shared = provider.clone();
    let factory = move || -> SyncResult<Arc<dyn ProviderAdapter>> { Ok(Arc::new(shared.clone())) };
    let orchestrator = SyncOrchestrator::new(Arc::clone(&store), factory, fast());
    orchestrator.start("manifest").unwrap();

    store
        .change(Origin::Local, |tx| {
            tx.put_text("/package.json", r#"{"dependencies":{"react":"18.2.0"}}"#)
        })
        .unwrap();
    orchestrator.sync_once().unwrap();
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].get("react").map(String::as_str), Some("18.2.0"));
    assert_eq!(
        orchestrator.manifest().dependencies().get("react").map(String::as_str),
        Some("18.2.0")
    );

    provider
        .write_file(
            "/package.json",
            FileContent::from(r#"{"dependencies":{"react":"18.3.1"}}"#),
        )
        .unwrap();
    let report = orchestrator.sync_once().unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(seen.lock().len(), 2);
    assert_eq!(
        orchestrator.manifest().dependencies().get("react").map(String::as_str),
        Some("18.3.1")
    );
}

#[test]
fn push_watcher_reports_only_new_events() {
    let (_dir, handler) = backend();
    let adapter = RemoteAdapter::loopback(handler_fn(&handler));
    adapter.connect("watch").unwrap();
    adapter
        .write_file("/before.txt", FileContent::from("x"))
        .unwrap();

    let mut watcher = adapter.watch_files(&["/".to_string()]).unwrap();
    assert!(watcher.poll_events().unwrap().is_empty());

    adapter.write_file("/after.txt", FileContent::from("y")).unwrap();
    let events = watcher.poll_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, WatchEventKind::Add);
    assert_eq!(events[0].paths, vec!["/after.txt".to_string()]);
}

#[test]
fn binary_files_survive_the_round_trip() {
    let (dir, handler) = backend();
    let store = empty_store(2);
    store
        .change(Origin::Local, |tx| tx.put_binary("/logo.png", vec![0x89, 0x50, 0x4e, 0x47, 0xff]))
        .unwrap();
    let orchestrator = remote_orchestrator(Arc::clone(&store), &handler);
    orchestrator.start("bin").unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("logo.png")).unwrap(),
        vec![0x89, 0x50, 0x4e, 0x47, 0xff]
    );
}

#[test]
fn remote_adapter_over_tcp() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig::new(dir.path()).with_bind_addr(([127, 0, 0, 1], 0).into());
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server_thread = std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let server = BackendServer::bind(config).await.unwrap();
            addr_tx.send(server.local_addr().unwrap()).unwrap();
            server
                .serve_until(async move {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
        });
    });
    let addr = addr_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let store = seeded_store(&[("/package.json", "{\"name\":\"demo\"}")]);
    let remote_addr = addr.to_string();
    let factory = move || -> SyncResult<Arc<dyn ProviderAdapter>> {
        Ok(Arc::new(RemoteAdapter::tcp(
            remote_addr.clone(),
            RemoteConfig::new().with_request_timeout(Duration::from_secs(10)),
        )))
    };
    let orchestrator = SyncOrchestrator::new(Arc::clone(&store), factory, fast());
    assert!(orchestrator.start("tcp").unwrap());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("package.json")).unwrap(),
        "{\"name\":\"demo\"}"
    );

    std::fs::write(dir.path().join("notes.md"), "remote note").unwrap();
    orchestrator.sync_once().unwrap();
    assert_eq!(store.get_text("/notes.md").as_deref(), Some("remote note"));

    orchestrator.stop();
    let _ = stop_tx.send(());
    server_thread.join().unwrap();
}
