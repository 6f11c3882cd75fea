//! In-memory reference index backend.
//!
//! Each workspace holds one document per indexed node. A processor stages its
//! writes on a private copy of every workspace it touches; commit swaps the copies
//! in, rollback drops them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{IndexBackend, IndexProcessor, ProcessError};
use crate::engine::WorkspaceRegistry;
use crate::error::Result;
use crate::models::{Location, NodePath, Properties, Request, RequestKind, Segment};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub location: Location,
    pub properties: Properties,
}

type Documents = BTreeMap<NodePath, Document>;

pub struct MemoryWorkspace {
    name: String,
    documents: RwLock<Documents>,
    dirty: AtomicBool,
    commits: AtomicUsize,
    optimizations: AtomicUsize,
}

impl MemoryWorkspace {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: RwLock::new(Documents::new()),
            dirty: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            optimizations: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.read().contains_key(path)
    }

    pub fn document(&self, path: &NodePath) -> Option<Document> {
        self.read().get(path).cloned()
    }

    /// Indexed paths in path order.
    pub fn paths(&self) -> Vec<NodePath> {
        self.read().keys().cloned().collect()
    }

    /// Documents with a property whose text contains `needle`, case-insensitively.
    pub fn find_containing(&self, needle: &str) -> Vec<NodePath> {
        let needle = needle.to_lowercase();
        self.read()
            .values()
            .filter(|doc| doc.properties.values().any(|v| v.as_text().to_lowercase().contains(&needle)))
            .map(|doc| doc.location.path.clone())
            .collect()
    }

    /// Number of sessions that committed changes to this workspace.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of optimization passes that did work on this workspace.
    pub fn optimize_count(&self) -> usize {
        self.optimizations.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Documents {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Documents> {
        self.documents.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Documents> {
        self.documents.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Paths whose requests the backend rejects, for exercising failure handling.
#[derive(Default)]
struct Faults {
    fail: RwLock<HashSet<NodePath>>,
    fail_updates: RwLock<HashSet<NodePath>>,
    cancel: RwLock<HashSet<NodePath>>,
}

#[derive(Default)]
pub struct MemoryIndex {
    faults: Arc<Faults>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later request that changes `path`.
    pub fn fail_requests_at(&self, path: NodePath) {
        self.faults.fail.write().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(path);
    }

    /// Reject later property updates of the node at `path`, leaving other
    /// requests on it alone.
    pub fn fail_updates_at(&self, path: NodePath) {
        self.faults.fail_updates.write().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(path);
    }

    /// Report every later request that changes `path` as cancelled.
    pub fn cancel_requests_at(&self, path: NodePath) {
        self.faults.cancel.write().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(path);
    }

    pub fn clear_faults(&self) {
        self.faults.fail.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        self.faults.fail_updates.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        self.faults.cancel.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl IndexBackend for MemoryIndex {
    type Workspace = MemoryWorkspace;

    fn create_workspace(&self, name: &str) -> Result<MemoryWorkspace> {
        Ok(MemoryWorkspace::new(name))
    }

    fn create_processor(
        &self,
        workspaces: Arc<WorkspaceRegistry<MemoryWorkspace>>,
        read_only: bool,
    ) -> Box<dyn IndexProcessor> {
        Box::new(MemoryProcessor {
            workspaces,
            read_only,
            faults: Arc::clone(&self.faults),
            staged: HashMap::new(),
            optimized: HashSet::new(),
        })
    }

    fn destroy_workspace(&self, _name: &str, state: Arc<MemoryWorkspace>) -> Result<()> {
        state.write().clear();
        Ok(())
    }
}

struct Staged {
    workspace: Arc<MemoryWorkspace>,
    documents: Documents,
    changed: bool,
}

struct MemoryProcessor {
    workspaces: Arc<WorkspaceRegistry<MemoryWorkspace>>,
    read_only: bool,
    faults: Arc<Faults>,
    staged: HashMap<String, Staged>,
    /// Workspaces whose staged writes were already optimized in this session.
    optimized: HashSet<String>,
}

fn failed(message: impl Into<String>) -> ProcessError {
    ProcessError::Failed(message.into())
}

impl MemoryProcessor {
    fn staged(&mut self, workspace: &str) -> std::result::Result<&mut Staged, ProcessError> {
        if !self.staged.contains_key(workspace) {
            let state =
                self.workspaces.get_or_create(workspace, true).map_err(|e| failed(e.to_string()))?;
            let documents = state.snapshot();
            self.staged.insert(
                workspace.to_string(),
                Staged { workspace: state, documents, changed: false },
            );
        }
        self.staged.get_mut(workspace).ok_or_else(|| failed("staging lost"))
    }

    fn check_faults(&self, request: &Request) -> std::result::Result<(), ProcessError> {
        let Some(path) = request.changed_path() else { return Ok(()) };
        if self.faults.cancel.read().unwrap_or_else(|p| p.into_inner()).contains(&path) {
            return Err(ProcessError::Cancelled);
        }
        if self.faults.fail.read().unwrap_or_else(|p| p.into_inner()).contains(&path) {
            return Err(failed(format!("index rejected change at {}", path)));
        }
        if matches!(request.kind, RequestKind::UpdateProperties { .. })
            && self.faults.fail_updates.read().unwrap_or_else(|p| p.into_inner()).contains(&path)
        {
            return Err(failed(format!("index rejected properties of {}", path)));
        }
        Ok(())
    }

    /// Optimize committed content and any writes staged in this session.
    fn optimize_state(&mut self, name: &str, workspace: &MemoryWorkspace) -> bool {
        let dirty = workspace.dirty.swap(false, Ordering::SeqCst);
        let staged = self.staged.get(name).is_some_and(|s| s.changed);
        if staged {
            self.optimized.insert(name.to_string());
        }
        let ran = dirty || staged;
        if ran {
            workspace.optimizations.fetch_add(1, Ordering::SeqCst);
        }
        ran
    }

    fn clone_workspace(&mut self, from: &str, into: &str) -> std::result::Result<(), ProcessError> {
        let source_docs = match self.staged.get(from) {
            Some(staged) => staged.documents.clone(),
            None => self.workspaces.get(from).map(|w| w.snapshot()).unwrap_or_default(),
        };
        let staged = self.staged(into)?;
        staged.documents = source_docs;
        staged.changed = true;
        Ok(())
    }
}

fn require_parent(docs: &Documents, path: &NodePath) -> std::result::Result<(), ProcessError> {
    match path.parent() {
        None => Ok(()),
        Some(parent) if parent.is_root() || docs.contains_key(&parent) => Ok(()),
        Some(parent) => Err(failed(format!("parent {} is not indexed", parent))),
    }
}

/// Move every document at or below `from` so it sits at or below `to`.
fn rekey(docs: &mut Documents, from: &NodePath, to: &NodePath) {
    let moved: Vec<NodePath> = docs.keys().filter(|p| p.is_at_or_below(from)).cloned().collect();
    for old in moved {
        if let Some(mut doc) = docs.remove(&old) {
            let mut new_path = to.clone();
            for segment in &old.segments()[from.depth()..] {
                new_path = new_path.child(segment.clone());
            }
            doc.location = Location { path: new_path.clone(), id: doc.location.id };
            docs.insert(new_path, doc);
        }
    }
}

/// Next free same-name-sibling slot for `name` under `parent`.
fn next_sibling(docs: &Documents, parent: &NodePath, name: &str) -> NodePath {
    let mut index = 1;
    loop {
        let candidate = parent.child(Segment::with_index(name, index));
        if !docs.contains_key(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

fn apply(docs: &mut Documents, kind: &RequestKind) -> std::result::Result<(), ProcessError> {
    match kind {
        RequestKind::CreateNode { parent, name, properties, actual_location, .. } => {
            let location = match actual_location {
                Some(location) => location.clone(),
                None => Location::new(next_sibling(docs, &parent.path, name)),
            };
            require_parent(docs, &location.path)?;
            docs.insert(
                location.path.clone(),
                Document { location, properties: properties.clone() },
            );
        }
        RequestKind::UpdateProperties { location, properties, remove_others, .. } => {
            require_parent(docs, &location.path)?;
            let doc = docs.entry(location.path.clone()).or_insert_with(|| Document {
                location: location.clone(),
                properties: Properties::new(),
            });
            if *remove_others {
                doc.properties = properties.clone();
            } else {
                doc.properties.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            if location.id.is_some() {
                doc.location.id = location.id;
            }
        }
        RequestKind::SetProperty { location, name, value, .. } => {
            let doc = docs
                .get_mut(&location.path)
                .ok_or_else(|| failed(format!("{} is not indexed", location.path)))?;
            doc.properties.insert(name.clone(), value.clone());
        }
        RequestKind::RemoveProperty { location, name, .. } => {
            let doc = docs
                .get_mut(&location.path)
                .ok_or_else(|| failed(format!("{} is not indexed", location.path)))?;
            doc.properties.remove(name);
        }
        RequestKind::DeleteBranch { location, .. } => {
            docs.retain(|path, _| !path.is_at_or_below(&location.path));
        }
        RequestKind::DeleteChildren { location, .. } => {
            docs.retain(|path, _| !path.is_descendant_of(&location.path));
        }
        RequestKind::MoveBranch { from, into, .. } => {
            let segment =
                from.path.last_segment().ok_or_else(|| failed("cannot move the root"))?.clone();
            if into.path.is_at_or_below(&from.path) {
                return Err(failed(format!("cannot move {} below itself", from.path)));
            }
            let target = next_sibling(docs, &into.path, &segment.name);
            require_parent(docs, &target)?;
            rekey(docs, &from.path, &target);
        }
        RequestKind::RenameNode { location, new_name, .. } => {
            let parent = location.path.parent().ok_or_else(|| failed("cannot rename the root"))?;
            let target = next_sibling(docs, &parent, new_name);
            rekey(docs, &location.path, &target);
        }
        RequestKind::DestroyWorkspace { .. } => docs.clear(),
        RequestKind::CreateWorkspace { .. } | RequestKind::CloneWorkspace { .. } => {}
    }
    Ok(())
}

impl IndexProcessor for MemoryProcessor {
    fn process(&mut self, request: &Request) -> std::result::Result<(), ProcessError> {
        if self.read_only {
            return Err(failed("session is read-only"));
        }
        self.check_faults(request)?;
        if let RequestKind::CloneWorkspace { from, workspace } = &request.kind {
            return self.clone_workspace(from, workspace);
        }
        let staged = self.staged(request.workspace())?;
        apply(&mut staged.documents, &request.kind)?;
        staged.changed = true;
        Ok(())
    }

    fn optimize(&mut self) -> std::result::Result<bool, ProcessError> {
        let mut ran = false;
        for (name, workspace) in self.workspaces.all() {
            ran |= self.optimize_state(&name, &workspace);
        }
        Ok(ran)
    }

    fn optimize_workspace(&mut self, workspace: &str) -> std::result::Result<bool, ProcessError> {
        let Some(state) = self.workspaces.get(workspace) else {
            return Ok(false);
        };
        Ok(self.optimize_state(workspace, &state))
    }

    fn commit(&mut self) -> std::result::Result<(), ProcessError> {
        for (name, staged) in self.staged.drain() {
            if !staged.changed {
                continue;
            }
            *staged.workspace.write() = staged.documents;
            staged.workspace.dirty.store(!self.optimized.contains(&name), Ordering::SeqCst);
            staged.workspace.commits.fetch_add(1, Ordering::SeqCst);
        }
        self.optimized.clear();
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), ProcessError> {
        self.staged.clear();
        self.optimized.clear();
        Ok(())
    }
}
