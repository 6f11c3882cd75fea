use std::fmt;

use serde::{Deserialize, Serialize};

use super::location::{Location, NodePath, Segment};
use super::property::{Properties, PropertyValue};

/// A content mutation, either reported by a source or generated while crawling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    CreateNode {
        parent: Location,
        workspace: String,
        name: String,
        #[serde(default)]
        properties: Properties,
        /// Final location of the new node when already known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actual_location: Option<Location>,
    },
    UpdateProperties {
        location: Location,
        workspace: String,
        properties: Properties,
        /// Remove every property not named in `properties`.
        #[serde(default)]
        remove_others: bool,
    },
    SetProperty {
        location: Location,
        workspace: String,
        name: String,
        value: PropertyValue,
    },
    RemoveProperty {
        location: Location,
        workspace: String,
        name: String,
    },
    DeleteBranch {
        location: Location,
        workspace: String,
    },
    DeleteChildren {
        location: Location,
        workspace: String,
    },
    MoveBranch {
        from: Location,
        workspace: String,
        into: Location,
    },
    RenameNode {
        location: Location,
        workspace: String,
        new_name: String,
    },
    CreateWorkspace {
        workspace: String,
    },
    CloneWorkspace {
        from: String,
        workspace: String,
    },
    DestroyWorkspace {
        workspace: String,
    },
}

/// Outcome of a request once it has been handed to an index processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    Applied,
    Failed(String),
    Cancelled,
    /// Recorded but never handed to the processor.
    NotSubmitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(flatten)]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "RequestStatus::is_pending")]
    pub status: RequestStatus,
}

impl RequestStatus {
    fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::Pending)
    }
}

impl Request {
    pub fn new(kind: RequestKind) -> Self {
        Self { kind, status: RequestStatus::Pending }
    }

    pub fn create_node(
        parent: Location,
        workspace: impl Into<String>,
        name: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self::new(RequestKind::CreateNode {
            parent,
            workspace: workspace.into(),
            name: name.into(),
            properties,
            actual_location: None,
        })
    }

    pub fn update_properties(
        location: Location,
        workspace: impl Into<String>,
        properties: Properties,
        remove_others: bool,
    ) -> Self {
        Self::new(RequestKind::UpdateProperties {
            location,
            workspace: workspace.into(),
            properties,
            remove_others,
        })
    }

    pub fn set_property(
        location: Location,
        workspace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self::new(RequestKind::SetProperty {
            location,
            workspace: workspace.into(),
            name: name.into(),
            value: value.into(),
        })
    }

    pub fn remove_property(
        location: Location,
        workspace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(RequestKind::RemoveProperty {
            location,
            workspace: workspace.into(),
            name: name.into(),
        })
    }

    pub fn delete_branch(location: Location, workspace: impl Into<String>) -> Self {
        Self::new(RequestKind::DeleteBranch { location, workspace: workspace.into() })
    }

    pub fn delete_children(location: Location, workspace: impl Into<String>) -> Self {
        Self::new(RequestKind::DeleteChildren { location, workspace: workspace.into() })
    }

    pub fn workspace(&self) -> &str {
        match &self.kind {
            RequestKind::CreateNode { workspace, .. }
            | RequestKind::UpdateProperties { workspace, .. }
            | RequestKind::SetProperty { workspace, .. }
            | RequestKind::RemoveProperty { workspace, .. }
            | RequestKind::DeleteBranch { workspace, .. }
            | RequestKind::DeleteChildren { workspace, .. }
            | RequestKind::MoveBranch { workspace, .. }
            | RequestKind::RenameNode { workspace, .. }
            | RequestKind::CreateWorkspace { workspace }
            | RequestKind::CloneWorkspace { workspace, .. }
            | RequestKind::DestroyWorkspace { workspace } => workspace,
        }
    }

    /// Path of the node this request changes; `None` for workspace-level requests.
    pub fn changed_path(&self) -> Option<NodePath> {
        match &self.kind {
            RequestKind::CreateNode { parent, name, actual_location, .. } => Some(
                actual_location
                    .as_ref()
                    .map(|loc| loc.path.clone())
                    .unwrap_or_else(|| parent.path.child(Segment::new(name.as_str()))),
            ),
            RequestKind::UpdateProperties { location, .. }
            | RequestKind::SetProperty { location, .. }
            | RequestKind::RemoveProperty { location, .. }
            | RequestKind::DeleteBranch { location, .. }
            | RequestKind::DeleteChildren { location, .. }
            | RequestKind::RenameNode { location, .. } => Some(location.path.clone()),
            RequestKind::MoveBranch { from, .. } => Some(from.path.clone()),
            RequestKind::CreateWorkspace { .. }
            | RequestKind::CloneWorkspace { .. }
            | RequestKind::DestroyWorkspace { .. } => None,
        }
    }

    pub fn has_error(&self) -> bool {
        matches!(self.status, RequestStatus::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, RequestStatus::Cancelled)
    }

    /// Copy suitable for handing to an index processor: same change, fresh status.
    pub fn clone_for_index(&self) -> Self {
        Self::new(self.kind.clone())
    }

    pub(crate) fn label(&self) -> &'static str {
        match &self.kind {
            RequestKind::CreateNode { .. } => "create-node",
            RequestKind::UpdateProperties { .. } => "update-properties",
            RequestKind::SetProperty { .. } => "set-property",
            RequestKind::RemoveProperty { .. } => "remove-property",
            RequestKind::DeleteBranch { .. } => "delete-branch",
            RequestKind::DeleteChildren { .. } => "delete-children",
            RequestKind::MoveBranch { .. } => "move-branch",
            RequestKind::RenameNode { .. } => "rename-node",
            RequestKind::CreateWorkspace { .. } => "create-workspace",
            RequestKind::CloneWorkspace { .. } => "clone-workspace",
            RequestKind::DestroyWorkspace { .. } => "destroy-workspace",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.changed_path() {
            Some(path) => write!(f, "{} {} in '{}'", self.label(), path, self.workspace()),
            None => write!(f, "{} '{}'", self.label(), self.workspace()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_path_prefers_actual_location() {
        let parent = Location::new("/a".parse().unwrap());
        let mut request = Request::create_node(parent, "ws", "b", Properties::new());
        assert_eq!(request.changed_path(), Some("/a/b".parse().unwrap()));

        if let RequestKind::CreateNode { actual_location, .. } = &mut request.kind {
            *actual_location = Some(Location::new("/a/b[2]".parse().unwrap()));
        }
        assert_eq!(request.changed_path(), Some("/a/b[2]".parse().unwrap()));
    }

    #[test]
    fn test_clone_for_index_resets_status() {
        let mut request = Request::delete_branch(Location::root(), "ws");
        request.status = RequestStatus::Failed("boom".into());
        assert!(request.has_error());

        let copy = request.clone_for_index();
        assert_eq!(copy.status, RequestStatus::Pending);
        assert_eq!(copy.kind, request.kind);
    }

    #[test]
    fn test_requests_deserialize_from_tagged_json() {
        let json = r#"{"type":"set_property","location":{"path":"/a"},
                       "workspace":"main","name":"title","value":"x"}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request.workspace(), "main");
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.to_string(), "set-property /a in 'main'");
    }
}
