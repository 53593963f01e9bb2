//! # vfsync sync engine
//!
//! Mirrors a versioned document against an execution backend.
//!
//! This crate provides:
//! - The [`ProviderAdapter`] contract
//! - [`VirtualAdapter`], an in-memory text-only backend with shell emulation
//! - [`RemoteAdapter`], forwarding calls over a [`SessionChannel`]
//! - Poll-based ([`PollWatcher`]) and push-based ([`PushWatcher`]) watching
//! - The [`SyncOrchestrator`] tying a document to a provider
//!
//! ## Model
//!
//! The document is the source of truth for local edits. On start the
//! orchestrator seeds in both directions (local content wins on conflict),
//! then mirrors each committed local change outward and folds provider
//! changes back in as remote-origin changes. Connection attempts are
//! bounded and spaced by a fixed delay.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod adapter;
mod channel;
mod config;
mod error;
mod orchestrator;
mod remote;
mod virtual_adapter;
mod watcher;

pub use adapter::{AdapterSession, FileWatcher, ProviderAdapter, ProviderFactory, SessionState};
pub use channel::{LoopbackChannel, RequestHandlerFn, SessionChannel, TcpChannel, ThreadChannel};
pub use config::{OrchestratorConfig, RemoteConfig, DEFAULT_EXCLUDED_PREFIXES, DEFAULT_POLL_INTERVAL};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{HealthStatus, ReconnectKind, SeedReport, SyncOrchestrator, SyncReport};
pub use remote::{PushWatcher, RemoteAdapter};
pub use virtual_adapter::{
    has_binary_extension, parse_package_spec, VirtualAdapter, BINARY_EXTENSIONS, VIRTUAL_CWD,
};
pub use watcher::PollWatcher;
