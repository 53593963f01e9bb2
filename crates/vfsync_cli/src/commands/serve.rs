//! Serve command implementation.

use super::CommandResult;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use vfsync_backend_server::{BackendServer, ServerConfig};

/// Runs a backend server for `workspace` until interrupted.
pub fn run(
    workspace: &Path,
    bind: SocketAddr,
    max_connections: usize,
    command_timeout: Duration,
) -> CommandResult<()> {
    let config = ServerConfig::new(workspace)
        .with_bind_addr(bind)
        .with_max_connections(max_connections)
        .with_command_timeout(command_timeout);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let server = BackendServer::bind(config).await?;
        println!("serving {} on {}", workspace.display(), server.local_addr()?);
        server
            .serve_until(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %err, "cannot listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            })
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
