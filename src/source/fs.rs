//! Directory tree exposed as a single-workspace content source.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::ContentSource;
use crate::error::SourceError;
use crate::models::{Location, NodePath, Properties, PropertyValue, Segment, Subgraph};

pub struct FsSource {
    name: String,
    workspace: String,
    root: PathBuf,
}

impl FsSource {
    pub fn new(name: impl Into<String>, workspace: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), workspace: workspace.into(), root: root.into() }
    }

    fn resolve(&self, path: &NodePath) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        for segment in path.segments() {
            // The file system has no same-name siblings.
            if segment.index != 1 {
                return None;
            }
            resolved.push(&segment.name);
        }
        Some(resolved)
    }

    fn node_path(&self, fs_path: &Path) -> Option<NodePath> {
        let relative = fs_path.strip_prefix(&self.root).ok()?;
        let mut path = NodePath::root();
        for component in relative.components() {
            path = path.child(Segment::new(component.as_os_str().to_string_lossy()));
        }
        Some(path)
    }

    fn unavailable(&self, err: impl std::fmt::Display) -> SourceError {
        SourceError::Unavailable(format!("{}: {}", self.root.display(), err))
    }
}

fn file_properties(metadata: &fs::Metadata) -> Properties {
    let mut properties = Properties::new();
    properties.insert("is_directory".to_string(), PropertyValue::Boolean(metadata.is_dir()));
    if metadata.is_file() {
        properties.insert("size".to_string(), PropertyValue::Long(metadata.len() as i64));
    }
    if let Ok(modified) = metadata.modified() {
        properties.insert("modified".to_string(), PropertyValue::Date(DateTime::<Utc>::from(modified)));
    }
    properties
}

fn sorted_children(dir: &Path) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

impl ContentSource for FsSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn workspace_names(&self) -> Result<BTreeSet<String>, SourceError> {
        if !self.root.is_dir() {
            return Err(self.unavailable("not a directory"));
        }
        Ok(BTreeSet::from([self.workspace.clone()]))
    }

    fn read_subgraph(
        &self,
        workspace: &str,
        location: &Location,
        max_depth: usize,
    ) -> Result<Subgraph, SourceError> {
        if workspace != self.workspace {
            return Err(SourceError::NoSuchWorkspace(workspace.to_string()));
        }
        let not_found =
            || SourceError::PathNotFound { workspace: workspace.to_string(), path: location.path.clone() };
        let start = self.resolve(&location.path).ok_or_else(not_found)?;
        if fs::symlink_metadata(&start).is_err() {
            return Err(not_found());
        }

        let mut graph = Subgraph::new();
        // Pre-order walk: every directory is yielded before its contents.
        let walker = WalkDir::new(&start)
            .max_depth(max_depth.saturating_sub(1))
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| self.unavailable(e))?;
            let Some(path) = self.node_path(entry.path()) else { continue };
            let metadata = entry.metadata().map_err(|e| self.unavailable(e))?;
            let children = if metadata.is_dir() {
                sorted_children(entry.path())
                    .map_err(|e| self.unavailable(e))?
                    .into_iter()
                    .map(|name| Location::new(path.child(Segment::new(name))))
                    .collect()
            } else {
                Vec::new()
            };
            graph.push(Location::new(path), file_properties(&metadata), children);
        }
        Ok(graph)
    }
}
