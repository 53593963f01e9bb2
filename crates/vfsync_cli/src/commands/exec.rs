//! Exec command implementation.
//!
//! Seeds a provider from the project, runs one command on it and folds the
//! files it changed back into the history.

use super::{open_project, CommandResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vfsync_protocol::CommandOutput;
use vfsync_sync_engine::{
    OrchestratorConfig, ProviderAdapter, RemoteAdapter, RemoteConfig, SyncOrchestrator,
    SyncResult, VirtualAdapter,
};

/// Where the command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// In-memory emulation.
    Virtual,
    /// A backend server at this address.
    Remote(String),
}

/// What an exec did.
#[derive(Debug)]
pub struct ExecOutcome {
    /// Output of the command.
    pub output: CommandOutput,
    /// Files folded back into the project.
    pub pulled: usize,
}

/// Runs `command` against `target` with the project's files.
pub fn exec(root: &Path, project: &str, command: &str, target: &Target) -> CommandResult<ExecOutcome> {
    let (repo, store) = open_project(root, project, false)?;
    let config = OrchestratorConfig::new()
        .with_max_retries(1)
        .with_poll_interval(Duration::ZERO);

    let orchestrator = match target {
        Target::Virtual => {
            let provider = VirtualAdapter::new().with_poll_interval(Duration::ZERO);
            let factory = move || -> SyncResult<Arc<dyn ProviderAdapter>> {
                Ok(Arc::new(provider.clone()))
            };
            SyncOrchestrator::new(Arc::clone(&store), factory, config)
        }
        Target::Remote(addr) => {
            let addr = addr.clone();
            let factory = move || -> SyncResult<Arc<dyn ProviderAdapter>> {
                Ok(Arc::new(RemoteAdapter::tcp(addr.clone(), RemoteConfig::new())))
            };
            SyncOrchestrator::new(Arc::clone(&store), factory, config)
        }
    };

    orchestrator.start(&format!("cli-{project}"))?;
    let adapter = orchestrator.adapter().ok_or("provider did not connect")?;
    let output = adapter.run_command(command)?;
    let report = orchestrator.sync_once()?;
    orchestrator.stop();
    repo.close(&store)?;
    tracing::debug!(pulled = report.pulled, "exec folded provider changes");

    Ok(ExecOutcome {
        output,
        pulled: report.pulled,
    })
}

/// Runs the exec command, printing the command's output.
pub fn run(root: &Path, project: &str, command: &str, target: &Target) -> CommandResult<()> {
    let outcome = exec(root, project, command, target)?;
    print!("{}", outcome.output.output);
    if !outcome.output.output.is_empty() && !outcome.output.output.ends_with('\n') {
        println!();
    }
    if outcome.pulled > 0 {
        eprintln!("{} file(s) updated in project", outcome.pulled);
    }
    if !outcome.output.success() {
        return Err(format!("command exited with status {}", outcome.output.exit_code).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::project;
    use vfsync_core::parse_dependencies;

    #[test]
    fn install_updates_the_project_manifest() {
        let dir = project(&[("/package.json", r#"{"name":"demo"}"#)]);
        let outcome = exec(dir.path(), "demo", "npm install left-pad@1.3.0", &Target::Virtual).unwrap();
        assert!(outcome.output.success());
        assert_eq!(outcome.pulled, 1);

        let (_repo, store) = open_project(dir.path(), "demo", false).unwrap();
        let manifest = store.get_text("/package.json").unwrap();
        assert_eq!(
            parse_dependencies(&manifest).get("left-pad").map(String::as_str),
            Some("1.3.0")
        );
    }

    #[test]
    fn read_only_commands_change_nothing() {
        let dir = project(&[("/a.txt", "hello")]);
        let outcome = exec(dir.path(), "demo", "cat /a.txt", &Target::Virtual).unwrap();
        assert_eq!(outcome.output.output.trim(), "hello");
        assert_eq!(outcome.pulled, 0);
    }
}
