//! Shared test utilities for integration tests
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use content_indexer::engine::WorkspaceRegistry;
use content_indexer::index::{MemoryWorkspace, Notification, Observer};
use content_indexer::{
    ContentSource, EngineConfig, IndexBackend, IndexEngine, IndexProcessor, Location, MemoryIndex,
    MemorySource, NodePath, Properties, PropertyValue,
};
use serde_json::{Value, json};
use tempfile::TempDir;

pub fn title(text: &str) -> Properties {
    Properties::from([("title".to_string(), PropertyValue::from(text))])
}

pub fn path(text: &str) -> NodePath {
    text.parse().expect("valid node path")
}

pub fn loc(text: &str) -> Location {
    Location::new(path(text))
}

/// Builder for in-memory content sources
pub struct SourceBuilder {
    source: MemorySource,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self { source: MemorySource::new("test-source") }
    }

    /// Add a node titled after its last path segment
    pub fn node(self, workspace: &str, node_path: &str) -> Self {
        let name = node_path.rsplit('/').next().unwrap_or_default();
        self.source.put(workspace, node_path, title(name)).expect("Failed to add node");
        self
    }

    /// Add a complete tree below the root: `fanout` children per node, `levels` deep
    pub fn tree(self, workspace: &str, fanout: usize, levels: usize) -> Self {
        self.source.create_workspace(workspace);
        let mut frontier = vec![String::new()];
        for _ in 0..levels {
            let mut next = Vec::new();
            for parent in &frontier {
                for i in 0..fanout {
                    let child = format!("{}/n{}", parent, i);
                    self.source.put(workspace, &child, title(&child)).expect("Failed to add node");
                    next.push(child);
                }
            }
            frontier = next;
        }
        self
    }

    pub fn build(self) -> Arc<MemorySource> {
        Arc::new(self.source)
    }
}

impl Default for SourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn engine(source: &Arc<MemorySource>) -> IndexEngine<MemoryIndex> {
    engine_with(EngineConfig::default(), source)
}

pub fn engine_with(config: EngineConfig, source: &Arc<MemorySource>) -> IndexEngine<MemoryIndex> {
    let source: Arc<dyn ContentSource> = source.clone();
    IndexEngine::new(config, source, MemoryIndex::new()).expect("Failed to create engine")
}

/// Every indexed path with its properties, for comparing index states
pub fn snapshot(engine: &IndexEngine<MemoryIndex>, workspace: &str) -> Vec<(NodePath, Properties)> {
    let Some(ws) = engine.workspaces().get(workspace) else {
        return Vec::new();
    };
    ws.paths()
        .into_iter()
        .filter_map(|p| ws.document(&p).map(|doc| (p, doc.properties)))
        .collect()
}

/// Observer that keeps every notification it receives
#[derive(Default)]
pub struct RecordingObserver {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    /// Applied requests of the most recent session, rendered as strings
    pub fn last_changes(&self) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .last()
            .map(|n| n.changes.iter().map(|r| r.to_string()).collect())
            .unwrap_or_default()
    }
}

impl Observer for RecordingObserver {
    fn notify(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }
}

/// In-memory backend that counts workspace state creations
#[derive(Default)]
pub struct CountingIndex {
    inner: MemoryIndex,
    created: AtomicUsize,
}

impl CountingIndex {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl IndexBackend for CountingIndex {
    type Workspace = MemoryWorkspace;

    fn create_workspace(&self, name: &str) -> content_indexer::Result<MemoryWorkspace> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.inner.create_workspace(name)
    }

    fn create_processor(
        &self,
        workspaces: Arc<WorkspaceRegistry<MemoryWorkspace>>,
        read_only: bool,
    ) -> Box<dyn IndexProcessor> {
        self.inner.create_processor(workspaces, read_only)
    }
}

/// Builder for JSON content tree files used by the CLI
pub struct TreeFileBuilder {
    temp_dir: TempDir,
    workspaces: serde_json::Map<String, Value>,
}

impl TreeFileBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self { temp_dir, workspaces: serde_json::Map::new() }
    }

    /// Add a workspace whose root has the given children (`{"name": {"properties": .., "children": ..}}`)
    pub fn workspace(mut self, name: &str, children: Value) -> Self {
        self.workspaces.insert(name.to_string(), json!({ "children": children }));
        self
    }

    /// Write `tree.json` and return the directory holding it with the file path
    pub fn build(self) -> (TempDir, PathBuf) {
        let file = self.temp_dir.path().join("tree.json");
        let content = json!({ "workspaces": self.workspaces });
        std::fs::write(&file, content.to_string()).expect("Failed to write tree.json");
        (self.temp_dir, file)
    }
}

impl Default for TreeFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
