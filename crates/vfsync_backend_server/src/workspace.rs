//! A project directory on disk addressed by canonical paths.

use crate::error::{ServerError, ServerResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use vfsync_protocol::{
    is_under, normalize_path, rebase, ArtifactLocator, CommandOutput, DirEntry, EntryKind,
    FileContent, FileStat, WriteOutcome,
};

/// Exit code reported for commands killed by the timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Content fingerprint used for change detection.
pub type Fingerprint = [u8; 32];

/// Files below a root directory.
///
/// Canonical paths never contain `..`, so every resolved path stays inside
/// the root.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

fn ignored(reason: impl Into<String>) -> WriteOutcome {
    WriteOutcome::Ignored {
        reason: reason.into(),
    }
}

impl Workspace {
    /// Opens `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> ServerResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Disk location of a canonical path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let canonical = normalize_path(path);
        let mut resolved = self.root.clone();
        for segment in canonical.split('/').filter(|s| !s.is_empty()) {
            resolved.push(segment);
        }
        resolved
    }

    /// Reads a file; directories and missing paths give `None`.
    pub fn read(&self, path: &str) -> ServerResult<Option<FileContent>> {
        match fs::read(self.resolve(path)) {
            Ok(bytes) => Ok(Some(FileContent::from_bytes(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) if self.resolve(path).is_dir() => {
                tracing::trace!(error = %err, "read of a directory");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes a file, creating parent directories.
    pub fn write(&self, path: &str, content: &FileContent) -> ServerResult<WriteOutcome> {
        let canonical = normalize_path(path);
        if canonical == "/" {
            return Ok(ignored("cannot write to the workspace root"));
        }
        let target = self.resolve(&canonical);
        if target.is_dir() {
            return Ok(ignored(format!("{canonical} is a directory")));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content.as_bytes())?;
        Ok(WriteOutcome::Applied)
    }

    /// Direct children of a directory, sorted. Missing directories are empty.
    pub fn list(&self, dir: &str) -> ServerResult<Vec<DirEntry>> {
        let target = self.resolve(dir);
        if target.is_file() {
            return Ok(Vec::new());
        }
        let entries = match fs::read_dir(target) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut listed = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                listed.push(DirEntry::directory(name));
            } else {
                listed.push(DirEntry::file(name));
            }
        }
        listed.sort();
        Ok(listed)
    }

    /// Stats a path.
    pub fn stat(&self, path: &str) -> ServerResult<Option<FileStat>> {
        match fs::metadata(self.resolve(path)) {
            Ok(meta) if meta.is_dir() => Ok(Some(FileStat {
                kind: EntryKind::Directory,
                size: None,
            })),
            Ok(meta) => Ok(Some(FileStat {
                kind: EntryKind::File,
                size: Some(meta.len()),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Moves a file or directory.
    pub fn rename(&self, from: &str, to: &str) -> ServerResult<WriteOutcome> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        if from == "/" || to == "/" {
            return Ok(ignored("cannot move the workspace root"));
        }
        if from != to && is_under(&to, &from) {
            return Ok(ignored("cannot move a directory into itself"));
        }
        let source = self.resolve(&from);
        if !source.exists() {
            return Ok(ignored(format!("{from}: no such file or directory")));
        }
        let target = self.resolve(&to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(source, target)?;
        Ok(WriteOutcome::Applied)
    }

    /// Deletes a file or a whole directory.
    pub fn delete(&self, path: &str) -> ServerResult<WriteOutcome> {
        let canonical = normalize_path(path);
        if canonical == "/" {
            return Ok(ignored("refusing to delete the workspace root"));
        }
        let target = self.resolve(&canonical);
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target)?,
            Ok(_) => fs::remove_file(&target)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ignored(format!("{canonical}: no such file or directory")))
            }
            Err(err) => return Err(err.into()),
        }
        Ok(WriteOutcome::Applied)
    }

    /// Creates a directory and its parents.
    pub fn create_dir(&self, path: &str) -> ServerResult<()> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    /// Every file below `dir` keyed by canonical path, skipping `excluded`
    /// subtrees.
    pub fn walk(&self, dir: &str, excluded: &[String]) -> ServerResult<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![normalize_path(dir)];
        while let Some(dir) = pending.pop() {
            for entry in self.list(&dir)? {
                let path = normalize_path(&format!("{dir}/{}", entry.name));
                if excluded.iter().any(|p| is_under(&path, p)) {
                    continue;
                }
                match entry.kind {
                    EntryKind::Directory => pending.push(path),
                    EntryKind::File => files.push(path),
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Content fingerprints of every file, for change detection.
    pub fn scan(&self, excluded: &[String]) -> ServerResult<BTreeMap<String, Fingerprint>> {
        let mut fingerprints = BTreeMap::new();
        for path in self.walk("/", excluded)? {
            match fs::read(self.resolve(&path)) {
                Ok(bytes) => {
                    fingerprints.insert(path, Sha256::digest(&bytes).into());
                }
                // Removed between listing and reading.
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(fingerprints)
    }

    /// Files below `path`, keyed relative to it.
    pub fn bundle(&self, path: &str) -> ServerResult<ArtifactLocator> {
        let root = normalize_path(path);
        let mut files = BTreeMap::new();
        if let Some(content) = self.read(&root)? {
            let name = vfsync_protocol::file_name(&root).to_string();
            files.insert(name, content);
        } else {
            for file in self.walk(&root, &[])? {
                let Some(content) = self.read(&file)? else {
                    continue;
                };
                let relative = rebase(&file, &root, "/")
                    .map(|r| r.trim_start_matches('/').to_string())
                    .ok_or_else(|| ServerError::Internal(format!("{file} escaped {root}")))?;
                files.insert(relative, content);
            }
        }
        Ok(ArtifactLocator::Bundle { root, files })
    }

    /// Runs `command` with `sh -c` in the root directory.
    ///
    /// Output is stdout followed by stderr. A command still running after
    /// `timeout` is killed along with everything it spawned and reported
    /// with [`TIMEOUT_EXIT_CODE`]. Background processes that outlive a
    /// finished command keep running, but output is only collected for
    /// [`OUTPUT_GRACE`] after the shell exits.
    pub fn run(&self, command: &str, timeout: Duration) -> ServerResult<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn()?;

        let (tx, rx) = mpsc::channel();
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, Stream::Stdout, tx.clone());
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, Stream::Stderr, tx);
        }

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                tracing::warn!(command, "command timed out");
                kill_tree(&mut child);
                break None;
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let collect_until = match status {
            Some(_) => deadline.min(Instant::now() + OUTPUT_GRACE),
            None => Instant::now() + OUTPUT_GRACE,
        };
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        loop {
            let wait = collect_until.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok((Stream::Stdout, chunk)) => stdout.extend_from_slice(&chunk),
                Ok((Stream::Stderr, chunk)) => stderr.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(command, "output still open after exit, detaching readers");
                    break;
                }
            }
        }

        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr));
        let exit_code = match status {
            Some(status) => status.code().unwrap_or(-1),
            None => {
                output.push_str("command timed out\n");
                TIMEOUT_EXIT_CODE
            }
        };
        Ok(CommandOutput { output, exit_code })
    }
}

/// How long output is still collected once the shell is done.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

/// Kills the shell and, on unix, its whole process group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(err) = killed {
            tracing::warn!(error = %err, "could not kill process group");
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
