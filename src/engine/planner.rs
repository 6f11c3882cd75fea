//! Reduces a list of reported changes to the least index work that mirrors them.

use std::collections::BTreeMap;

use crate::models::{Location, NodePath, Properties, Request, RequestKind, Segment};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// Recrawl the subtree at `location`, reading `depth` levels at a time.
    Crawl { location: Location, depth: usize },
    /// Hand the request to the index as is.
    Forward(Request),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspacePlan {
    pub workspace: String,
    /// Rebuild the whole workspace; `items` is empty.
    pub reindex_all: bool,
    /// Drop the workspace's index content and state; `items` is empty.
    pub destroy: bool,
    items: BTreeMap<NodePath, WorkItem>,
}

impl WorkspacePlan {
    fn new(workspace: &str) -> Self {
        Self { workspace: workspace.to_string(), reindex_all: false, destroy: false, items: BTreeMap::new() }
    }

    /// Pending work in path order, so ancestors come before descendants.
    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values()
    }

    fn is_settled(&self) -> bool {
        self.reindex_all || self.destroy
    }

    fn reindex_everything(&mut self) {
        self.items.clear();
        self.reindex_all = true;
    }

    fn add(&mut self, change: &Request) {
        match &change.kind {
            RequestKind::CreateWorkspace { .. } | RequestKind::CloneWorkspace { .. } => {
                self.reindex_everything();
                return;
            }
            RequestKind::DestroyWorkspace { .. } => {
                self.items.clear();
                self.destroy = true;
                return;
            }
            _ => {}
        }

        let Some(path) = change.changed_path() else {
            self.reindex_everything();
            return;
        };
        if self.is_covered_by_crawl(&path) {
            return;
        }

        match &change.kind {
            RequestKind::CreateNode { actual_location: None, .. } => {
                let slot = self.free_slot(path);
                self.forward(slot, change.clone_for_index());
            }
            RequestKind::CreateNode { .. } => self.forward(path, change.clone_for_index()),
            RequestKind::UpdateProperties { location, remove_others, .. } => {
                if self.merge(&path, change) {
                    return;
                }
                if *remove_others {
                    self.forward(path, change.clone_for_index());
                } else {
                    // Values of the untouched properties are unknown here.
                    self.crawl(location.clone(), 1);
                }
            }
            RequestKind::SetProperty { location, .. } | RequestKind::RemoveProperty { location, .. } => {
                if !self.merge(&path, change) {
                    // Documents cannot be amended in place.
                    self.crawl(location.clone(), 1);
                }
            }
            _ => self.reindex_everything(),
        }
    }

    fn forward(&mut self, path: NodePath, request: Request) {
        self.items.insert(path, WorkItem::Forward(request));
    }

    /// First same-name sibling slot at or after `path` that holds no work yet.
    /// Creates without a known location would otherwise replace each other.
    fn free_slot(&self, path: NodePath) -> NodePath {
        let (Some(parent), Some(last)) = (path.parent(), path.last_segment().cloned()) else {
            return path;
        };
        let mut candidate = path;
        let mut index = last.index;
        while self.items.contains_key(&candidate) {
            index += 1;
            candidate = parent.child(Segment::with_index(last.name.clone(), index));
        }
        candidate
    }

    fn crawl(&mut self, location: Location, depth: usize) {
        let path = location.path.clone();
        self.items.retain(|existing, _| !existing.is_descendant_of(&path));
        self.items.insert(path, WorkItem::Crawl { location, depth });
    }

    /// Whether an ancestor of `path` is already scheduled for a crawl. A crawl
    /// rebuilds its whole subtree whatever its read depth.
    fn is_covered_by_crawl(&self, path: &NodePath) -> bool {
        let mut current = path.parent();
        while let Some(ancestor) = current {
            if matches!(self.items.get(&ancestor), Some(WorkItem::Crawl { .. })) {
                return true;
            }
            current = ancestor.parent();
        }
        false
    }

    /// Fold `change` into existing work at `path`. Returns whether it was absorbed.
    fn merge(&mut self, path: &NodePath, change: &Request) -> bool {
        match self.items.get(path) {
            Some(WorkItem::Crawl { .. }) => true,
            Some(WorkItem::Forward(existing)) => match merge_requests(existing, change) {
                Some(merged) => {
                    self.forward(path.clone(), merged);
                    true
                }
                None => false,
            },
            None => false,
        }
    }
}

/// Combine two requests for the same node into one, if their kinds allow it.
pub fn merge_requests(original: &Request, change: &Request) -> Option<Request> {
    if original.has_error() || change.has_error() {
        return None;
    }
    let mut merged = original.clone_for_index();
    let properties: &mut Properties = match &mut merged.kind {
        RequestKind::CreateNode { properties, .. } => properties,
        RequestKind::UpdateProperties { properties, .. } => {
            if matches!(change.kind, RequestKind::UpdateProperties { .. }) {
                return None;
            }
            properties
        }
        _ => return None,
    };
    match &change.kind {
        RequestKind::UpdateProperties { properties: updates, .. } => {
            properties.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        RequestKind::SetProperty { name, value, .. } => {
            properties.insert(name.clone(), value.clone());
        }
        RequestKind::RemoveProperty { name, .. } => {
            properties.remove(name);
        }
        _ => return None,
    }
    Some(merged)
}

/// Work for every workspace mentioned in a change list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkPlan {
    workspaces: BTreeMap<String, WorkspacePlan>,
}

impl WorkPlan {
    /// Failed and cancelled changes are skipped.
    ///
    /// Once a workspace is marked for a full reindex or destruction, its later
    /// changes are ignored but other workspaces keep planning. A scheduled crawl
    /// absorbs every later change below it whatever its read depth, because the
    /// crawler follows the whole subtree and only uses the depth to size reads.
    pub fn from_changes(changes: &[Request]) -> Self {
        let mut plan = WorkPlan::default();
        for change in changes {
            if change.has_error() || change.is_cancelled() {
                continue;
            }
            let workspace = plan
                .workspaces
                .entry(change.workspace().to_string())
                .or_insert_with(|| WorkspacePlan::new(change.workspace()));
            if !workspace.is_settled() {
                workspace.add(change);
            }
        }
        plan
    }

    pub fn workspaces(&self) -> impl Iterator<Item = &WorkspacePlan> {
        self.workspaces.values()
    }

    pub fn get(&self, workspace: &str) -> Option<&WorkspacePlan> {
        self.workspaces.get(workspace)
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}
