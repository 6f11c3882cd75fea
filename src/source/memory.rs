//! In-memory content source.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ContentSource;
use crate::error::SourceError;
use crate::models::{Location, NodePath, Properties, Segment, Subgraph};

/// JSON form of a source: workspace name -> root node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub workspaces: BTreeMap<String, TreeNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default)]
    pub properties: Properties,
    /// Keyed by segment, e.g. `"chapter"` or `"chapter[2]"`.
    #[serde(default)]
    pub children: BTreeMap<String, TreeNode>,
}

#[derive(Debug, Clone)]
struct StoredNode {
    id: Uuid,
    properties: Properties,
    children: Vec<Segment>,
}

impl StoredNode {
    fn new(properties: Properties) -> Self {
        Self { id: Uuid::new_v4(), properties, children: Vec::new() }
    }
}

type Workspace = HashMap<NodePath, StoredNode>;

/// Thread-safe in-memory source. Read latency and outages can be injected.
pub struct MemorySource {
    name: String,
    workspaces: RwLock<BTreeMap<String, Workspace>>,
    read_delay: Mutex<Option<Duration>>,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspaces: RwLock::new(BTreeMap::new()),
            read_delay: Mutex::new(None),
            unavailable: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn from_snapshot(name: impl Into<String>, snapshot: &TreeSnapshot) -> Result<Self> {
        let source = Self::new(name);
        for (workspace, root) in &snapshot.workspaces {
            source.create_workspace(workspace);
            source.load_node(workspace, NodePath::root(), root)?;
        }
        Ok(source)
    }

    /// Load a JSON [`TreeSnapshot`] file.
    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read content tree: {}", path.display()))?;
        let snapshot: TreeSnapshot =
            serde_json::from_str(&text).context("Failed to parse content tree JSON")?;
        Self::from_snapshot(name, &snapshot)
    }

    fn load_node(&self, workspace: &str, path: NodePath, node: &TreeNode) -> Result<()> {
        self.put(workspace, &path.to_string(), node.properties.clone())?;
        for (key, child) in &node.children {
            let segment: Segment =
                key.parse().with_context(|| format!("Invalid child name '{}' under {}", key, path))?;
            self.load_node(workspace, path.child(segment), child)?;
        }
        Ok(())
    }

    /// Create an empty workspace (just a root node). No-op if it exists.
    pub fn create_workspace(&self, workspace: &str) {
        let mut workspaces = self.write();
        workspaces.entry(workspace.to_string()).or_insert_with(|| {
            let mut nodes = Workspace::new();
            nodes.insert(NodePath::root(), StoredNode::new(Properties::new()));
            nodes
        });
    }

    pub fn remove_workspace(&self, workspace: &str) -> bool {
        self.write().remove(workspace).is_some()
    }

    /// Create or replace the properties of the node at `path`, creating the workspace
    /// and any missing ancestors.
    pub fn put(&self, workspace: &str, path: &str, properties: Properties) -> Result<()> {
        let path: NodePath = path.parse()?;
        self.create_workspace(workspace);
        let mut workspaces = self.write();
        let nodes = workspaces.get_mut(workspace).context("workspace vanished during put")?;

        let mut current = NodePath::root();
        for segment in path.segments() {
            let child = current.child(segment.clone());
            if !nodes.contains_key(&child) {
                nodes.insert(child.clone(), StoredNode::new(Properties::new()));
                if let Some(parent) = nodes.get_mut(&current) {
                    parent.children.push(segment.clone());
                }
            }
            current = child;
        }
        if let Some(node) = nodes.get_mut(&path) {
            node.properties = properties;
        }
        Ok(())
    }

    pub fn set_property(
        &self,
        workspace: &str,
        path: &str,
        name: &str,
        value: crate::models::PropertyValue,
    ) -> Result<()> {
        let path: NodePath = path.parse()?;
        let mut workspaces = self.write();
        let node = workspaces
            .get_mut(workspace)
            .and_then(|nodes| nodes.get_mut(&path))
            .with_context(|| format!("No node at {} in '{}'", path, workspace))?;
        node.properties.insert(name.to_string(), value);
        Ok(())
    }

    /// Remove the node at `path` and everything below it. Returns whether it existed.
    pub fn remove(&self, workspace: &str, path: &str) -> Result<bool> {
        let path: NodePath = path.parse()?;
        let mut workspaces = self.write();
        let Some(nodes) = workspaces.get_mut(workspace) else {
            return Ok(false);
        };
        if path.is_root() || !nodes.contains_key(&path) {
            return Ok(false);
        }
        nodes.retain(|p, _| !p.is_at_or_below(&path));
        if let (Some(parent), Some(segment)) = (path.parent(), path.last_segment()) {
            if let Some(parent) = nodes.get_mut(&parent) {
                parent.children.retain(|s| s != segment);
            }
        }
        Ok(true)
    }

    /// Number of nodes in a workspace, root included.
    pub fn node_count(&self, workspace: &str) -> usize {
        self.read().get(workspace).map_or(0, |nodes| nodes.len())
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Make every call fail with [`SourceError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of subgraph reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Workspace>> {
        self.workspaces.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Workspace>> {
        self.workspaces.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(format!("source '{}' is offline", self.name)));
        }
        Ok(())
    }
}

impl ContentSource for MemorySource {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn workspace_names(&self) -> Result<BTreeSet<String>, SourceError> {
        self.check_available()?;
        Ok(self.read().keys().cloned().collect())
    }

    fn read_subgraph(
        &self,
        workspace: &str,
        location: &Location,
        max_depth: usize,
    ) -> Result<Subgraph, SourceError> {
        let delay = *self.read_delay.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);

        let workspaces = self.read();
        let nodes = workspaces
            .get(workspace)
            .ok_or_else(|| SourceError::NoSuchWorkspace(workspace.to_string()))?;
        if !nodes.contains_key(&location.path) {
            return Err(SourceError::PathNotFound {
                workspace: workspace.to_string(),
                path: location.path.clone(),
            });
        }

        let mut graph = Subgraph::new();
        let mut queue = VecDeque::from([(location.path.clone(), 1usize)]);
        while let Some((path, depth)) = queue.pop_front() {
            let Some(node) = nodes.get(&path) else { continue };
            let children: Vec<Location> = node
                .children
                .iter()
                .map(|segment| {
                    let child_path = path.child(segment.clone());
                    match nodes.get(&child_path) {
                        Some(child) => Location::with_id(child_path, child.id),
                        None => Location::new(child_path),
                    }
                })
                .collect();
            if depth < max_depth {
                queue.extend(children.iter().map(|c| (c.path.clone(), depth + 1)));
            }
            graph.push(Location::with_id(path, node.id), node.properties.clone(), children);
        }
        Ok(graph)
    }
}
