//! Content sources and the channel used to read from them.
//!
//! A [`ContentSource`] answers bounded-depth subgraph reads synchronously. The
//! engine never calls it directly while crawling: each crawl starts its own
//! [`ContentChannel`], which runs reads on a dedicated worker so the crawl can
//! wait with a bound, observe cancellation, and abandon a hung read.
//!
//! Two sources ship with the crate:
//!
//! - [`MemorySource`] - workspaces of node trees held in memory, loadable from JSON
//! - [`FsSource`] - a directory tree exposed as a single workspace

use std::collections::BTreeSet;

use crate::error::SourceError;
use crate::models::{Location, Subgraph};

pub mod channel;
pub mod fs;
pub mod memory;

pub use channel::ContentChannel;
pub use fs::FsSource;
pub use memory::{MemorySource, TreeNode, TreeSnapshot};

/// A tree-shaped repository exposing named workspaces.
pub trait ContentSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// Names of the workspaces that currently exist.
    fn workspace_names(&self) -> Result<BTreeSet<String>, SourceError>;

    /// Read the node at `location` plus its descendants, `max_depth` levels in total
    /// (1 reads just the node). Every included node lists all of its children, and
    /// parents always precede their descendants.
    ///
    /// Returns [`SourceError::PathNotFound`] if no node exists at the location.
    fn read_subgraph(
        &self,
        workspace: &str,
        location: &Location,
        max_depth: usize,
    ) -> Result<Subgraph, SourceError>;
}
