//! In-memory provider emulating a small shell over a text-only file map.

use crate::adapter::{FileWatcher, ProviderAdapter};
use crate::config::DEFAULT_POLL_INTERVAL;
use crate::error::{SyncError, SyncResult};
use crate::watcher::PollWatcher;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vfsync_core::{parse_dependencies, upsert_dependencies, DependencyTable, MANIFEST_PATH};
use vfsync_protocol::{
    file_name, is_under, normalize_path, rebase, ArtifactLocator, CommandOutput, DirEntry,
    EntryKind, FileContent, FileStat, WriteOutcome,
};

/// Working directory reported by `pwd`.
pub const VIRTUAL_CWD: &str = "/home/project";

/// Extensions whose files the virtual backend refuses to hold.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "ico", "bmp", "pdf", "zip", "gz", "tar", "tgz", "woff",
    "woff2", "ttf", "otf", "eot", "mp3", "mp4", "wav", "ogg", "webm", "wasm", "exe", "dll", "so",
    "dylib", "bin",
];

/// Whether `path` ends in one of [`BINARY_EXTENSIONS`] (case-insensitive).
pub fn has_binary_extension(path: &str) -> bool {
    file_name(path)
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

type DependencyCallback = Box<dyn Fn(&DependencyTable) + Send + Sync>;

/// A provider backed by an in-memory `path -> text` map.
///
/// Directories are implicit: a directory exists while some file path lies
/// below it. Clones share the same map.
#[derive(Clone)]
pub struct VirtualAdapter {
    files: Arc<RwLock<BTreeMap<String, String>>>,
    callbacks: Arc<Mutex<Vec<DependencyCallback>>>,
    manifest_path: String,
    poll_interval: Duration,
    connected: Arc<AtomicBool>,
}

impl VirtualAdapter {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(BTreeMap::new())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            manifest_path: MANIFEST_PATH.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a backend holding `files`. Paths are canonicalized.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let adapter = Self::new();
        {
            let mut map = adapter.files.write();
            for (path, content) in files {
                map.insert(normalize_path(path.as_ref()), content.into());
            }
        }
        adapter
    }

    /// Sets where install commands record dependencies.
    pub fn with_manifest_path(mut self, path: &str) -> Self {
        self.manifest_path = normalize_path(path);
        self
    }

    /// Sets the interval of watchers created by `watch_files`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Registers a callback fired with the full table whenever the manifest
    /// changes, whether through an install or a direct file operation.
    pub fn on_dependencies_changed(&self, callback: impl Fn(&DependencyTable) + Send + Sync + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// A copy of the file map.
    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.read().clone()
    }

    /// Content of one file.
    pub fn file(&self, path: &str) -> Option<String> {
        self.files.read().get(&normalize_path(path)).cloned()
    }

    fn has_dir(files: &BTreeMap<String, String>, dir: &str) -> bool {
        dir == "/" || files.keys().any(|p| p != dir && is_under(p, dir))
    }

    fn children(files: &BTreeMap<String, String>, dir: &str) -> Vec<DirEntry> {
        let mut seen = BTreeSet::new();
        for path in files.keys() {
            if path == dir || !is_under(path, dir) {
                continue;
            }
            let rest = if dir == "/" { &path[1..] } else { &path[dir.len() + 1..] };
            let entry = match rest.split_once('/') {
                Some((head, _)) => DirEntry::directory(head),
                None => DirEntry::file(rest),
            };
            seen.insert(entry);
        }
        seen.into_iter().collect()
    }

    /// Runs `f` on the file map, then re-parses the manifest and notifies
    /// callbacks if `f` changed it.
    fn mutate<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> T {
        let (result, manifest) = {
            let mut files = self.files.write();
            let before = files.get(&self.manifest_path).cloned();
            let result = f(&mut files);
            let after = files.get(&self.manifest_path);
            let changed = (after != before.as_ref()).then(|| after.cloned());
            (result, changed)
        };
        if let Some(content) = manifest {
            let table = content.as_deref().map(parse_dependencies).unwrap_or_default();
            tracing::debug!(count = table.len(), "virtual manifest changed");
            for callback in self.callbacks.lock().iter() {
                callback(&table);
            }
        }
        result
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    fn echo(rest: &str) -> String {
        let text = rest.trim();
        for quote in ['"', '\''] {
            if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
                return text[1..text.len() - 1].to_string();
            }
        }
        text.to_string()
    }

    fn ls(&self, target: Option<&str>) -> CommandOutput {
        let dir = normalize_path(target.unwrap_or("/"));
        let files = self.files.read();
        let names: Vec<String> = Self::children(&files, &dir)
            .into_iter()
            .map(|e| e.name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        CommandOutput::ok(names.join("\n"))
    }

    fn cat(&self, target: Option<&str>) -> CommandOutput {
        let Some(target) = target else {
            return CommandOutput {
                output: "cat: missing operand".to_string(),
                exit_code: 1,
            };
        };
        match self.file(target) {
            Some(content) => CommandOutput::ok(content),
            None => CommandOutput {
                output: format!("cat: {target}: No such file or directory"),
                exit_code: 1,
            },
        }
    }

    fn install(&self, tokens: &[&str]) -> SyncResult<CommandOutput> {
        let specs: Vec<(String, String)> = tokens
            .iter()
            .filter(|t| !t.starts_with('-'))
            .map(|t| parse_package_spec(t))
            .collect();
        if specs.is_empty() {
            return Ok(CommandOutput::ok("up to date"));
        }

        self.mutate(|files| -> SyncResult<()> {
            let current = files.get(&self.manifest_path).map(String::as_str);
            let updated = upsert_dependencies(current, &specs)?;
            files.insert(self.manifest_path.clone(), updated);
            Ok(())
        })?;
        tracing::info!(packages = specs.len(), "virtual install updated manifest");

        let added: Vec<String> = specs.iter().map(|(n, v)| format!("+ {n}@{v}")).collect();
        Ok(CommandOutput::ok(format!(
            "{}\nadded {} package(s)",
            added.join("\n"),
            specs.len()
        )))
    }
}

/// Splits `name[@version]`; scoped names keep their leading `@`.
pub fn parse_package_spec(token: &str) -> (String, String) {
    match token.rfind('@') {
        Some(idx) if idx > 0 => {
            let version = &token[idx + 1..];
            let version = if version.is_empty() { "latest" } else { version };
            (token[..idx].to_string(), version.to_string())
        }
        _ => (token.to_string(), "latest".to_string()),
    }
}

impl Default for VirtualAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualAdapter")
            .field("files", &self.files.read().len())
            .field("manifest_path", &self.manifest_path)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl ProviderAdapter for VirtualAdapter {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn connect(&self, session_id: &str) -> SyncResult<()> {
        tracing::debug!(session = session_id, "virtual session opened");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn reconnect(&self) -> SyncResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn read_file(&self, path: &str) -> SyncResult<Option<FileContent>> {
        self.ensure_connected()?;
        Ok(self.file(path).map(FileContent::Text))
    }

    fn write_file(&self, path: &str, content: FileContent) -> SyncResult<WriteOutcome> {
        self.ensure_connected()?;
        let path = normalize_path(path);
        let text = match content {
            FileContent::Text(text) => text,
            FileContent::Binary(bytes) => {
                tracing::warn!(path = %path, size = bytes.len(), "virtual backend ignored binary write");
                return Ok(WriteOutcome::Ignored {
                    reason: "binary content is not supported".to_string(),
                });
            }
        };
        if has_binary_extension(&path) {
            tracing::warn!(path = %path, "virtual backend ignored write to binary file type");
            return Ok(WriteOutcome::Ignored {
                reason: "binary file type is not supported".to_string(),
            });
        }
        if path == "/" {
            return Ok(WriteOutcome::Ignored {
                reason: "cannot write to the root".to_string(),
            });
        }
        self.mutate(|files| files.insert(path, text));
        Ok(WriteOutcome::Applied)
    }

    fn run_command(&self, command: &str) -> SyncResult<CommandOutput> {
        self.ensure_connected()?;
        let command = command.trim();
        let (program, rest) = command
            .split_once(char::is_whitespace)
            .unwrap_or((command, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();
        tracing::debug!(program, "virtual command");

        match program {
            "pwd" => Ok(CommandOutput::ok(VIRTUAL_CWD)),
            "echo" => Ok(CommandOutput::ok(Self::echo(rest))),
            "ls" => Ok(self.ls(args.first().copied())),
            "cat" => Ok(self.cat(args.first().copied())),
            "npm" if matches!(args.first(), Some(&("install" | "i" | "add"))) => {
                self.install(&args[1..])
            }
            _ => Ok(CommandOutput::ok(format!(
                "{command}: executed (browser polyfill)"
            ))),
        }
    }

    fn list_files(&self, dir: &str) -> SyncResult<Vec<DirEntry>> {
        self.ensure_connected()?;
        let files = self.files.read();
        Ok(Self::children(&files, &normalize_path(dir)))
    }

    fn stat_file(&self, path: &str) -> SyncResult<Option<FileStat>> {
        self.ensure_connected()?;
        let path = normalize_path(path);
        let files = self.files.read();
        if let Some(content) = files.get(&path) {
            return Ok(Some(FileStat {
                kind: EntryKind::File,
                size: Some(content.len() as u64),
            }));
        }
        Ok(Self::has_dir(&files, &path).then_some(FileStat {
            kind: EntryKind::Directory,
            size: None,
        }))
    }

    fn rename_file(&self, from: &str, to: &str) -> SyncResult<WriteOutcome> {
        self.ensure_connected()?;
        let from = normalize_path(from);
        let to = normalize_path(to);
        Ok(self.mutate(|files| {
            if let Some(content) = files.remove(&from) {
                files.insert(to, content);
                return WriteOutcome::Applied;
            }
            if to != from && is_under(&to, &from) {
                return WriteOutcome::Ignored {
                    reason: "cannot move a directory into itself".to_string(),
                };
            }
            let moved: Vec<String> = files
                .keys()
                .filter(|p| is_under(p, &from))
                .cloned()
                .collect();
            if moved.is_empty() {
                return WriteOutcome::Ignored {
                    reason: format!("{from}: no such file or directory"),
                };
            }
            for old in moved {
                if let (Some(new), Some(content)) = (rebase(&old, &from, &to), files.remove(&old)) {
                    files.insert(new, content);
                }
            }
            WriteOutcome::Applied
        }))
    }

    fn delete_files(&self, path: &str) -> SyncResult<WriteOutcome> {
        self.ensure_connected()?;
        let path = normalize_path(path);
        Ok(self.mutate(|files| {
            if files.remove(&path).is_some() {
                return WriteOutcome::Applied;
            }
            let before = files.len();
            files.retain(|p, _| !is_under(p, &path));
            if files.len() == before {
                return WriteOutcome::Ignored {
                    reason: format!("{path}: no such file or directory"),
                };
            }
            WriteOutcome::Applied
        }))
    }

    fn download_files(&self, path: &str) -> SyncResult<ArtifactLocator> {
        self.ensure_connected()?;
        let root = normalize_path(path);
        let files = self.files.read();
        let bundle = files
            .iter()
            .filter(|(p, _)| is_under(p, &root))
            .map(|(p, content)| {
                let relative = if *p == root {
                    file_name(p).to_string()
                } else {
                    rebase(p, &root, "/")
                        .map(|r| r.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| p.clone())
                };
                (relative, FileContent::Text(content.clone()))
            })
            .collect();
        Ok(ArtifactLocator::Bundle {
            root,
            files: bundle,
        })
    }

    fn create_directory(&self, path: &str) -> SyncResult<()> {
        self.ensure_connected()?;
        tracing::trace!(path, "directories are implicit in the virtual backend");
        Ok(())
    }

    fn watch_files(&self, selector: &[String]) -> SyncResult<Box<dyn FileWatcher>> {
        let files = Arc::clone(&self.files);
        let selector: Vec<String> = selector.iter().map(|s| normalize_path(s)).collect();
        Ok(Box::new(PollWatcher::new(
            move || files.read().clone(),
            &selector,
            self.poll_interval,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn connected(files: &[(&str, &str)]) -> VirtualAdapter {
        let adapter = VirtualAdapter::with_files(files.iter().copied());
        adapter.connect("test").unwrap();
        adapter
    }

    #[test]
    fn binary_writes_are_ignored() {
        let adapter = connected(&[]);
        let outcome = adapter
            .write_file("/x.png", FileContent::Binary(vec![0x89, 0x50]))
            .unwrap();
        assert!(!outcome.is_applied());
        let outcome = adapter.write_file("/x.png", FileContent::from("text")).unwrap();
        assert!(!outcome.is_applied());
        assert!(adapter.files().is_empty());

        let outcome = adapter.write_file("notes.txt", FileContent::from("hi")).unwrap();
        assert!(outcome.is_applied());
        assert_eq!(adapter.file("/notes.txt").as_deref(), Some("hi"));
    }

    #[test]
    fn install_records_version_and_notifies_once() {
        let adapter = connected(&[("/package.json", "{\"dependencies\":{}}")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            adapter.on_dependencies_changed(move |table| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = table.get("lodash").cloned();
            });
        }

        let output = adapter.run_command("npm install lodash@4.17.21").unwrap();
        assert!(output.success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().as_deref(), Some("4.17.21"));
        let manifest = adapter.file("/package.json").unwrap();
        assert_eq!(parse_dependencies(&manifest).get("lodash").map(String::as_str), Some("4.17.21"));
    }

    #[test]
    fn direct_manifest_edits_notify() {
        let adapter = connected(&[("/src/a.js", "a")]);
        let tables = Arc::new(Mutex::new(Vec::new()));
        {
            let tables = Arc::clone(&tables);
            adapter.on_dependencies_changed(move |table| tables.lock().push(table.clone()));
        }

        let manifest = FileContent::from(r#"{"dependencies":{"vite":"5.0.0"}}"#);
        adapter.write_file("/package.json", manifest.clone()).unwrap();
        adapter.write_file("/package.json", manifest).unwrap();
        adapter.write_file("/src/b.js", FileContent::from("b")).unwrap();
        assert_eq!(tables.lock().len(), 1);
        assert_eq!(tables.lock()[0].get("vite").map(String::as_str), Some("5.0.0"));

        adapter.rename_file("/package.json", "/package.old.json").unwrap();
        assert!(tables.lock().last().unwrap().is_empty());

        adapter.rename_file("/package.old.json", "/package.json").unwrap();
        adapter.delete_files("/package.json").unwrap();
        let seen = tables.lock();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2].get("vite").map(String::as_str), Some("5.0.0"));
        assert!(seen[3].is_empty());
    }

    #[test]
    fn install_creates_missing_manifest() {
        let adapter = connected(&[]);
        adapter.run_command("npm install react").unwrap();
        let manifest = adapter.file("/package.json").unwrap();
        assert_eq!(parse_dependencies(&manifest).get("react").map(String::as_str), Some("latest"));
    }

    #[test]
    fn install_parses_scoped_and_flagged_specs() {
        let adapter = connected(&[]);
        adapter
            .run_command("npm i --save-dev @types/node@20.1.0 @scope/pkg left-pad@")
            .unwrap();
        let table = parse_dependencies(&adapter.file("/package.json").unwrap());
        assert_eq!(table.get("@types/node").map(String::as_str), Some("20.1.0"));
        assert_eq!(table.get("@scope/pkg").map(String::as_str), Some("latest"));
        assert_eq!(table.get("left-pad").map(String::as_str), Some("latest"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn rename_rewrites_a_directory_prefix() {
        let adapter = connected(&[("/src/a.js", "a"), ("/src/b.js", "b")]);
        assert!(adapter.rename_file("/src", "/lib").unwrap().is_applied());
        let files = adapter.files();
        assert_eq!(files.get("/lib/a.js").map(String::as_str), Some("a"));
        assert_eq!(files.get("/lib/b.js").map(String::as_str), Some("b"));
        assert!(files.keys().all(|p| !p.starts_with("/src")));
    }

    #[test]
    fn rename_and_delete_single_files() {
        let adapter = connected(&[("/a.txt", "1"), ("/ab/c.txt", "2")]);
        assert!(adapter.rename_file("/a.txt", "/b.txt").unwrap().is_applied());
        assert!(adapter.delete_files("/a").unwrap() != WriteOutcome::Applied);
        assert!(adapter.delete_files("/ab").unwrap().is_applied());
        assert_eq!(adapter.files().keys().collect::<Vec<_>>(), vec!["/b.txt"]);
    }

    #[test]
    fn shell_builtins() {
        let adapter = connected(&[("/src/a.js", "A"), ("/src/lib/b.js", "B"), ("/README.md", "")]);
        assert_eq!(adapter.run_command("pwd").unwrap().output, VIRTUAL_CWD);
        assert_eq!(adapter.run_command("echo \"hello world\"").unwrap().output, "hello world");
        assert_eq!(adapter.run_command("echo 'x'").unwrap().output, "x");
        assert_eq!(adapter.run_command("ls").unwrap().output, "README.md\nsrc");
        assert_eq!(adapter.run_command("ls /src").unwrap().output, "a.js\nlib");
        assert_eq!(adapter.run_command("cat /src/a.js").unwrap().output, "A");

        let missing = adapter.run_command("cat /nope").unwrap();
        assert!(missing.output.contains("No such file"));
        let other = adapter.run_command("node index.js").unwrap();
        assert!(other.success());
        assert!(other.output.contains("executed (browser polyfill)"));
    }

    #[test]
    fn directories_are_implicit() {
        let adapter = connected(&[("/src/lib/b.js", "B")]);
        let stat = adapter.stat_file("/src").unwrap().unwrap();
        assert_eq!(stat.kind, EntryKind::Directory);
        assert!(adapter.stat_file("/nope").unwrap().is_none());
        adapter.create_directory("/empty").unwrap();
        assert!(adapter.stat_file("/empty").unwrap().is_none());
        assert_eq!(adapter.list_files("/src").unwrap(), vec![DirEntry::directory("lib")]);
    }

    #[test]
    fn download_bundles_relative_paths() {
        let adapter = connected(&[("/src/a.js", "A"), ("/src/lib/b.js", "B"), ("/x", "")]);
        match adapter.download_files("/src").unwrap() {
            ArtifactLocator::Bundle { root, files } => {
                assert_eq!(root, "/src");
                assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a.js", "lib/b.js"]);
            }
            other => panic!("unexpected locator {other:?}"),
        }
    }

    #[test]
    fn calls_fail_before_connect() {
        let adapter = VirtualAdapter::new();
        assert!(matches!(adapter.read_file("/a"), Err(SyncError::NotConnected)));
        adapter.connect("s").unwrap();
        assert!(adapter.read_file("/a").unwrap().is_none());
        adapter.disconnect().unwrap();
        assert!(!adapter.is_connected());
    }

    #[test]
    fn package_specs() {
        assert_eq!(parse_package_spec("react"), ("react".into(), "latest".into()));
        assert_eq!(parse_package_spec("@a/b@1"), ("@a/b".into(), "1".into()));
        assert_eq!(parse_package_spec("@a/b"), ("@a/b".into(), "latest".into()));
        assert!(has_binary_extension("/img/Logo.PNG"));
        assert!(!has_binary_extension("/src/png.js"));
    }
}
