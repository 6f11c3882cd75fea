//! Content Indexer - keep a search index in step with a tree-shaped content repository
//!
//! The repository is reached through a [`ContentSource`] that exposes named
//! workspaces of nodes. The crate provides:
//!
//! - Full and partial reindexing of a workspace by crawling it in bounded-depth reads
//! - A thread-safe registry of per-workspace index state, created on first use
//! - Transactional index sessions that commit or roll back as a unit
//! - Mirroring of individual change requests into the index, in order
//! - In-memory and file-system reference sources and an in-memory index backend
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use content_indexer::{EngineConfig, IndexEngine, MemoryIndex, MemorySource};
//!
//! let source = Arc::new(MemorySource::load("cms", Path::new("tree.json"))?);
//! let engine = IndexEngine::new(EngineConfig::default(), source, MemoryIndex::new())?;
//! let stats = engine.index_workspace("main", 10)?;
//! println!("Indexed {} nodes", stats.nodes_indexed);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod models;
pub mod source;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{CrawlOutcome, CrawlStats, IndexEngine, PlanReport, WorkspaceRegistry};
pub use error::{IndexError, Result, SourceError};
pub use index::{IndexBackend, IndexProcessor, IndexSession, MemoryIndex, Notification, Observer};
pub use models::{Location, NodePath, Properties, PropertyValue, Request, RequestKind, RequestStatus};
pub use source::{ContentSource, FsSource, MemorySource};
