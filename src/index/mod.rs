//! Index-side collaborators: backends, processors, sessions and observers.
//!
//! An [`IndexBackend`] owns the concrete index format. It creates one state object
//! per workspace and hands out [`IndexProcessor`]s, each of which is wrapped in an
//! [`IndexSession`] that decides between commit and rollback when it closes.

use std::sync::Arc;

use thiserror::Error;

use crate::engine::WorkspaceRegistry;
use crate::error::Result;
use crate::models::Request;

pub mod memory;
pub mod session;

pub use memory::{Document, MemoryIndex, MemoryWorkspace};
pub use session::{IndexSession, SessionOutcome};

/// Why a processor did not apply a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("request was cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Applies requests to index state. Used by exactly one session.
pub trait IndexProcessor: Send {
    fn process(&mut self, request: &Request) -> std::result::Result<(), ProcessError>;

    /// Optimize every workspace. Returns whether any physical work was done.
    fn optimize(&mut self) -> std::result::Result<bool, ProcessError> {
        Ok(false)
    }

    fn optimize_workspace(&mut self, workspace: &str) -> std::result::Result<bool, ProcessError> {
        let _ = workspace;
        Ok(false)
    }

    fn commit(&mut self) -> std::result::Result<(), ProcessError>;

    fn rollback(&mut self) -> std::result::Result<(), ProcessError>;
}

/// A concrete index implementation.
pub trait IndexBackend: Send + Sync + 'static {
    type Workspace: Send + Sync + 'static;

    fn create_workspace(&self, name: &str) -> Result<Self::Workspace>;

    fn create_processor(
        &self,
        workspaces: Arc<WorkspaceRegistry<Self::Workspace>>,
        read_only: bool,
    ) -> Box<dyn IndexProcessor>;

    /// Release state that was removed from the registry.
    fn destroy_workspace(&self, name: &str, state: Arc<Self::Workspace>) -> Result<()> {
        let _ = (name, state);
        Ok(())
    }
}

/// What a session published when it closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub source_name: String,
    pub outcome: SessionOutcome,
    /// Requests the processor accepted, in submission order.
    pub changes: Vec<Request>,
}

/// Receives a notification from every closed session, committed or not.
pub trait Observer: Send + Sync {
    fn notify(&self, notification: &Notification);
}
