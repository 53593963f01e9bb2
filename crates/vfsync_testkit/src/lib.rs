//! # vfsync testkit
//!
//! Test utilities shared by the vfsync crates:
//! - fixtures for seeded documents and temporary project repositories
//! - proptest strategies for edit sequences
//! - property suites for undo/redo, diff/apply and merge convergence
//!
//! ```rust
//! use vfsync_testkit::prelude::*;
//!
//! let store = seeded_store(&[("/src/a.js", "a")]);
//! assert_eq!(text_files(&store.view()).len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

#[cfg(test)]
mod properties;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
