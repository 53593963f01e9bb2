//! Inspect command implementation.

use super::{describe_value, open_project, CommandResult, Format};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use vfsync_core::{parse_dependencies, VersionedDocumentStore, MANIFEST_PATH};
use vfsync_protocol::Value;

/// Project inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Project id.
    pub project: String,
    /// Current heads, hex encoded.
    pub heads: Vec<String>,
    /// Number of changes in the history.
    pub change_count: usize,
    /// Number of files.
    pub file_count: usize,
    /// Total bytes of file content.
    pub total_bytes: u64,
    /// Dependencies declared by the manifest.
    pub dependencies: BTreeMap<String, String>,
    /// Per-file details, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, String>>,
}

/// Collects the inspection result for `store`.
pub fn inspect(project: &str, store: &VersionedDocumentStore, show_files: bool) -> InspectResult {
    let (heads, view) = store.current();
    let total_bytes = view
        .files()
        .values()
        .map(|value| match value {
            Value::Text(text) => text.len() as u64,
            Value::Binary(bytes) => bytes.len() as u64,
            Value::Counter(_) => 0,
        })
        .sum();
    let dependencies = store
        .get_text(MANIFEST_PATH)
        .map(|content| parse_dependencies(&content))
        .unwrap_or_default();
    let files = show_files.then(|| {
        view.files()
            .iter()
            .map(|(path, value)| (path.clone(), describe_value(value)))
            .collect()
    });
    InspectResult {
        project: project.to_string(),
        heads: heads.iter().map(|id| id.to_hex()).collect(),
        change_count: store.change_count(),
        file_count: view.len(),
        total_bytes,
        dependencies,
        files,
    }
}

/// Runs the inspect command.
pub fn run(root: &Path, project: &str, show_files: bool, format: Format) -> CommandResult<()> {
    let (_repo, store) = open_project(root, project, false)?;
    let result = inspect(project, &store, show_files);
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("vfsync project {}", result.project);
    println!("==============={}", "=".repeat(result.project.len()));
    println!();
    println!("History:");
    println!("  Changes: {}", result.change_count);
    if result.heads.is_empty() {
        println!("  Heads:   (empty)");
    }
    for head in &result.heads {
        println!("  Head:    {head}");
    }
    println!();
    println!("Files:");
    println!("  Count: {}", result.file_count);
    println!("  Size:  {}", super::format_size(result.total_bytes));
    if let Some(files) = &result.files {
        for (path, description) in files {
            println!("  {path} ({description})");
        }
    }
    if !result.dependencies.is_empty() {
        println!();
        println!("Dependencies:");
        for (name, version) in &result.dependencies {
            println!("  {name} {version}");
        }
    }
}
