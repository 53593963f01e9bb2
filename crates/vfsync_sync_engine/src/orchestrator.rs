//! Reconciliation between a document and a provider.
//!
//! The orchestrator owns the adapter session. It seeds the provider from
//! the document (and the document from the provider), mirrors committed
//! local changes outward, folds watch events back in, and keeps the
//! dependency manifest projection current.

use crate::adapter::{AdapterSession, FileWatcher, ProviderAdapter, ProviderFactory, SessionState};
use crate::config::OrchestratorConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use vfsync_core::{
    DependencyManifestManager, DocumentEvent, MergeReport, Origin, VersionedDocumentStore,
};
use vfsync_protocol::{is_under, Change, FileContent, Heads, Operation, Value, WriteOutcome};

/// Liveness of the provider as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// Whether the provider answered.
    pub healthy: bool,
    /// Command output or the failure description.
    pub message: String,
}

/// Counts from an initial (or re-) seed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Local files written to the provider.
    pub pushed: usize,
    /// Provider files imported into the document.
    pub pulled: usize,
    /// Local files the provider declined.
    pub skipped: usize,
    /// Local files under an excluded prefix.
    pub excluded: usize,
}

/// Counts from one [`SyncOrchestrator::sync_once`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Paths mirrored to the provider.
    pub pushed: usize,
    /// Paths folded into the document.
    pub pulled: usize,
    /// Mirrors the provider declined.
    pub skipped: usize,
}

/// How [`SyncOrchestrator::reconnect`] recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectKind {
    /// The existing session was re-established.
    Soft,
    /// The provider was recreated and re-seeded.
    Restarted,
    /// Another connection attempt was already running.
    InProgress,
}

fn to_content(value: &Value) -> Option<FileContent> {
    match value {
        Value::Text(text) => Some(FileContent::Text(text.clone())),
        Value::Binary(bytes) => Some(FileContent::Binary(bytes.clone())),
        Value::Counter(_) => None,
    }
}

struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Keeps one document and one provider in step.
pub struct SyncOrchestrator {
    store: Arc<VersionedDocumentStore>,
    factory: Box<dyn ProviderFactory>,
    config: OrchestratorConfig,
    manifest: Arc<DependencyManifestManager>,
    adapter: RwLock<Option<Arc<dyn ProviderAdapter>>>,
    watcher: Mutex<Option<Box<dyn FileWatcher>>>,
    events: Mutex<Receiver<DocumentEvent>>,
    session: RwLock<AdapterSession>,
    connecting: AtomicBool,
}

impl SyncOrchestrator {
    /// Creates an orchestrator; nothing connects until [`start`](Self::start).
    pub fn new(
        store: Arc<VersionedDocumentStore>,
        factory: impl ProviderFactory + 'static,
        config: OrchestratorConfig,
    ) -> Self {
        let manifest = Arc::new(DependencyManifestManager::with_path(
            config.manifest_path.clone(),
        ));
        manifest.refresh(&store);
        let events = store.subscribe();
        Self {
            store,
            factory: Box::new(factory),
            config,
            manifest,
            adapter: RwLock::new(None),
            watcher: Mutex::new(None),
            events: Mutex::new(events),
            session: RwLock::new(AdapterSession::default()),
            connecting: AtomicBool::new(false),
        }
    }

    /// The document being synchronized.
    pub fn store(&self) -> &Arc<VersionedDocumentStore> {
        &self.store
    }

    /// Configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Live dependency table derived from the manifest file.
    pub fn manifest(&self) -> &Arc<DependencyManifestManager> {
        &self.manifest
    }

    /// Session bookkeeping.
    pub fn session(&self) -> AdapterSession {
        self.session.read().clone()
    }

    /// The active adapter, if connected.
    pub fn adapter(&self) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapter.read().clone()
    }

    fn active(&self) -> SyncResult<Arc<dyn ProviderAdapter>> {
        self.adapter().ok_or(SyncError::NotConnected)
    }

    /// Connects, seeds and starts watching.
    ///
    /// Returns `Ok(false)` without doing anything if a connection attempt is
    /// already running.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connection`] once every attempt has failed; the
    /// adapter is left unset.
    pub fn start(&self, session_id: &str) -> SyncResult<bool> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(session = session_id, "start ignored: connection in flight");
            return Ok(false);
        }
        let _guard = FlagGuard(&self.connecting);
        let adapter = self.connect_with_retry(session_id)?;
        self.install(adapter)?;
        Ok(true)
    }

    fn connect_with_retry(&self, session_id: &str) -> SyncResult<Arc<dyn ProviderAdapter>> {
        {
            let mut session = self.session.write();
            session.state = SessionState::Connecting;
            session.session_id = Some(session_id.to_string());
        }
        let attempts = self.config.max_retries.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            let result = self
                .factory
                .create()
                .and_then(|adapter| adapter.connect(session_id).map(|()| adapter));
            match result {
                Ok(adapter) => {
                    let mut session = self.session.write();
                    session.state = SessionState::Connected;
                    session.retry_count = 0;
                    tracing::info!(adapter = adapter.name(), attempt, "provider connected");
                    return Ok(adapter);
                }
                Err(err) => {
                    tracing::warn!(attempt, attempts, error = %err, "provider connection failed");
                    last = err.to_string();
                    self.session.write().retry_count = attempt;
                    if attempt < attempts {
                        std::thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }
        self.session.write().state = SessionState::Disconnected;
        *self.adapter.write() = None;
        Err(SyncError::Connection {
            attempts,
            message: last,
        })
    }

    fn install(&self, adapter: Arc<dyn ProviderAdapter>) -> SyncResult<SeedReport> {
        *self.adapter.write() = Some(Arc::clone(&adapter));
        let report = self.seed()?;
        let watcher = adapter.watch_files(&self.config.watch_selector)?;
        *self.watcher.lock() = Some(watcher);
        Ok(report)
    }

    /// Reconciles document and provider.
    ///
    /// Local files missing or different on the provider are written out
    /// (the local copy wins); provider files missing locally are imported
    /// as one remote change. Excluded prefixes are never touched and
    /// content the provider declines is counted, not failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or the import cannot be
    /// committed.
    pub fn seed(&self) -> SyncResult<SeedReport> {
        let adapter = self.active()?;
        // Pending writes are covered by the comparison below. Pending
        // removals are not: the provider still holds those files.
        let pending = self.take_events();
        self.handle_events(&pending, None)?;
        let removed: BTreeSet<String> = pending
            .iter()
            .flat_map(DocumentEvent::changed_files)
            .filter(|path| self.store.get(path).is_none())
            .map(str::to_string)
            .collect();

        let skip = |path: &str| self.config.is_excluded(path);
        let remote = adapter.collect_files("/", &skip)?;
        let local = self.store.view();
        let mut report = SeedReport::default();

        for path in removed.iter().filter(|p| remote.contains_key(*p)) {
            match adapter.delete_files(path)? {
                WriteOutcome::Applied => report.pushed += 1,
                WriteOutcome::Ignored { reason } => {
                    tracing::debug!(path = %path, reason = %reason, "seed kept removed file");
                    report.skipped += 1;
                }
            }
        }

        for (path, value) in local.files() {
            if self.config.is_excluded(path) {
                report.excluded += 1;
                continue;
            }
            let Some(content) = to_content(value) else {
                continue;
            };
            if remote.get(path) == Some(&content) {
                continue;
            }
            match adapter.write_file(path, content)? {
                WriteOutcome::Applied => report.pushed += 1,
                WriteOutcome::Ignored { reason } => {
                    tracing::debug!(path = %path, reason = %reason, "seed skipped file");
                    report.skipped += 1;
                }
            }
        }

        let imports: Vec<(String, FileContent)> = remote
            .into_iter()
            .filter(|(path, _)| local.file(path).is_none() && !removed.contains(path))
            .collect();
        if !imports.is_empty() {
            self.store.change(Origin::Remote, |tx| {
                for (path, content) in &imports {
                    tx.put_file(path, content.clone())?;
                }
                tx.set_message("Import provider files");
                Ok(())
            })?;
        }
        report.pulled = imports.len();
        self.drain_events(None)?;

        tracing::info!(
            pushed = report.pushed,
            pulled = report.pulled,
            skipped = report.skipped,
            excluded = report.excluded,
            "seed complete"
        );
        Ok(report)
    }

    /// Full reconciliation after a causal gap.
    ///
    /// # Errors
    ///
    /// Same as [`seed`](Self::seed).
    pub fn resync(&self) -> SyncResult<SeedReport> {
        tracing::info!("resynchronizing with provider");
        self.seed()
    }

    /// Handles queued document events. Outbound ones are mirrored through
    /// `adapter` when one is given; every event refreshes the manifest.
    fn drain_events(&self, adapter: Option<&dyn ProviderAdapter>) -> SyncResult<SyncReport> {
        let events = self.take_events();
        self.handle_events(&events, adapter)
    }

    fn take_events(&self) -> Vec<DocumentEvent> {
        self.events.lock().try_iter().collect()
    }

    fn handle_events(
        &self,
        events: &[DocumentEvent],
        adapter: Option<&dyn ProviderAdapter>,
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        for event in events {
            self.manifest.handle_event(&self.store, event);
            let Some(adapter) = adapter else { continue };
            if !event.origin.is_outbound() {
                continue;
            }
            for path in event.changed_files() {
                if self.config.is_excluded(path) {
                    continue;
                }
                let outcome = match self.store.get(path) {
                    Some(value) => match to_content(&value) {
                        Some(content) => adapter.write_file(path, content)?,
                        None => continue,
                    },
                    None => adapter.delete_files(path)?,
                };
                match outcome {
                    WriteOutcome::Applied => report.pushed += 1,
                    WriteOutcome::Ignored { reason } => {
                        tracing::debug!(path, reason = %reason, "mirror skipped");
                        report.skipped += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Folds the watcher's pending events into the document. Returns the
    /// number of paths whose content changed.
    fn pull_remote(&self, adapter: &dyn ProviderAdapter) -> SyncResult<usize> {
        let polled = match self.watcher.lock().as_mut() {
            Some(watcher) => watcher.poll_events(),
            None => return Ok(0),
        };
        let paths: BTreeSet<String> = match polled {
            Ok(events) => events.into_iter().flat_map(|e| e.paths).collect(),
            Err(SyncError::WatchOverflow { cursor }) => {
                tracing::warn!(cursor, "watcher overflowed, rescanning provider");
                self.rescan_paths(adapter)?
            }
            Err(err) => return Err(err),
        };

        let mut updates = Vec::new();
        for path in paths {
            if self.config.is_excluded(&path) {
                continue;
            }
            let incoming = adapter.read_file(&path)?;
            let current = self.store.get(&path).as_ref().and_then(to_content);
            if current != incoming {
                updates.push((path, incoming));
            }
        }
        if updates.is_empty() {
            return Ok(0);
        }

        self.store.change(Origin::Remote, |tx| {
            for (path, content) in &updates {
                match content {
                    Some(content) => tx.put_file(path, content.clone())?,
                    None => {
                        tx.delete(path);
                    }
                }
            }
            Ok(())
        })?;
        tracing::debug!(paths = updates.len(), "folded provider changes");
        Ok(updates.len())
    }

    /// Every watched path known on either side, for when the watcher
    /// lost track of what changed.
    fn rescan_paths(&self, adapter: &dyn ProviderAdapter) -> SyncResult<BTreeSet<String>> {
        let skip = |path: &str| self.config.is_excluded(path);
        let mut paths: BTreeSet<String> = adapter.collect_files("/", &skip)?.into_keys().collect();
        paths.extend(self.store.view().files().keys().cloned());
        let selector = &self.config.watch_selector;
        if !selector.is_empty() {
            paths.retain(|path| selector.iter().any(|prefix| is_under(path, prefix)));
        }
        Ok(paths)
    }

    /// One pass of live sync: mirror local changes, fold in provider
    /// changes, then handle the events that produced.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] without an adapter, or the
    /// provider's failure. Events already drained when a mirror fails are
    /// not retried; the next seed reconciles them.
    pub fn sync_once(&self) -> SyncResult<SyncReport> {
        let adapter = self.active()?;
        let mut report = self.drain_events(Some(adapter.as_ref()))?;
        report.pulled = self.pull_remote(adapter.as_ref())?;
        let tail = self.drain_events(Some(adapter.as_ref()))?;
        report.pushed += tail.pushed;
        report.skipped += tail.skipped;
        Ok(report)
    }

    /// Merges changes received from a peer; a causal gap triggers a resync.
    ///
    /// # Errors
    ///
    /// Returns a document error, or the resync's failure.
    pub fn merge_remote_changes(&self, changes: Vec<Change>) -> SyncResult<MergeReport> {
        let report = self.store.merge_all(changes)?;
        if report.has_gap() {
            tracing::warn!(missing = report.missing.len(), "merge left a causal gap");
            if self.adapter().is_some() {
                self.resync()?;
            }
        }
        Ok(report)
    }

    /// Appends operations produced remotely on top of `parents`.
    ///
    /// Returns `None` when a parent was unknown and a resync ran instead.
    ///
    /// # Errors
    ///
    /// Returns a document error other than a rejected append, or the
    /// resync's failure.
    pub fn apply_remote_operations(
        &self,
        operations: Vec<Operation>,
        parents: &Heads,
    ) -> SyncResult<Option<Heads>> {
        match self.store.append(operations, parents, Origin::Remote) {
            Ok(heads) => Ok(Some(heads)),
            Err(err) if err.requires_resync() => {
                tracing::warn!(error = %err, "remote append rejected");
                if self.adapter().is_some() {
                    self.resync()?;
                }
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Runs the side-effect-free ping command.
    pub fn ping(&self) -> HealthStatus {
        let Some(adapter) = self.adapter() else {
            return HealthStatus {
                healthy: false,
                message: SyncError::NotConnected.to_string(),
            };
        };
        match adapter.run_command(&self.config.ping_command) {
            Ok(output) => HealthStatus {
                healthy: output.success(),
                message: output.output,
            },
            Err(err) => {
                tracing::debug!(error = %err, "ping failed");
                HealthStatus {
                    healthy: false,
                    message: err.to_string(),
                }
            }
        }
    }

    /// Tries a soft reconnect, then a full provider restart.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if [`start`](Self::start) never
    /// ran, or the restart's failure.
    pub fn reconnect(&self) -> SyncResult<ReconnectKind> {
        let session_id = self
            .session
            .read()
            .session_id
            .clone()
            .ok_or(SyncError::NotConnected)?;
        if let Some(adapter) = self.adapter() {
            match adapter.reconnect() {
                Ok(()) => {
                    self.session.write().state = SessionState::Connected;
                    tracing::info!(session = %session_id, "provider session resumed");
                    return Ok(ReconnectKind::Soft);
                }
                Err(err) => {
                    tracing::info!(error = %err, "soft reconnect failed, restarting provider");
                }
            }
        }
        match self.restart_provider()? {
            Some(_) => Ok(ReconnectKind::Restarted),
            None => Ok(ReconnectKind::InProgress),
        }
    }

    /// Tears the provider down, creates a new one and re-seeds it.
    ///
    /// Returns `None` if another connection attempt is running.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connection`] once every attempt has failed.
    pub fn restart_provider(&self) -> SyncResult<Option<SeedReport>> {
        let session_id = self
            .session
            .read()
            .session_id
            .clone()
            .ok_or(SyncError::NotConnected)?;
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }
        let _guard = FlagGuard(&self.connecting);
        self.teardown();
        let adapter = self.connect_with_retry(&session_id)?;
        self.install(adapter).map(Some)
    }

    fn teardown(&self) {
        self.watcher.lock().take();
        if let Some(adapter) = self.adapter.write().take() {
            if let Err(err) = adapter.disconnect() {
                tracing::debug!(error = %err, "disconnect failed");
            }
        }
    }

    /// Disconnects and forgets the provider.
    pub fn stop(&self) {
        self.teardown();
        let mut session = self.session.write();
        session.state = SessionState::Disconnected;
        session.retry_count = 0;
        tracing::info!("sync stopped");
    }

    /// Syncs every `poll_interval` until `stop` is set. Lost connections
    /// are recovered with [`reconnect`](Self::reconnect).
    pub fn run(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            if let Err(err) = self.sync_once() {
                tracing::warn!(error = %err, "sync pass failed");
                if err.is_connection_loss() && self.session.read().session_id.is_some() {
                    self.session.write().state = SessionState::Disconnected;
                    if let Err(err) = self.reconnect() {
                        tracing::warn!(error = %err, "reconnect failed");
                    }
                }
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("session", &*self.session.read())
            .field("adapter", &self.adapter().map(|a| a.name()))
            .finish()
    }
}
