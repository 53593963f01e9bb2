//! # vfsync backend server
//!
//! Reference remote backend for vfsync providers.
//!
//! This crate provides:
//! - A [`Workspace`] serving one project directory by canonical path
//! - A [`BackendHandler`] answering every `BackendRequest`
//! - An [`EventLog`] feeding push-based file watchers
//! - A [`BackendServer`] speaking length-prefixed CBOR frames over TCP
//!
//! # Change detection
//!
//! The handler fingerprints every file (SHA-256) outside the configured
//! exclusions. Mutating requests, commands and watch polls rescan the
//! directory and record the differences as add/change/remove events, so
//! edits made by build tools or editors reach clients the same way as
//! their own writes.
//!
//! # In-process use
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vfsync_backend_server::{BackendHandler, ServerConfig};
//!
//! let handler = Arc::new(BackendHandler::new(ServerConfig::new("/srv/project"))?);
//! let adapter = RemoteAdapter::loopback(Arc::new(handler.into_fn()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod event_log;
mod handler;
mod server;
mod workspace;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use event_log::{EventBatch, EventLog};
pub use handler::BackendHandler;
pub use server::BackendServer;
pub use workspace::{Fingerprint, Workspace, OUTPUT_GRACE, TIMEOUT_EXIT_CODE};
