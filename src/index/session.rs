//! Transactional boundary around one index processor.

use std::sync::Arc;

use super::{IndexProcessor, Notification, Observer, ProcessError};
use crate::error::{IndexError, Result};
use crate::models::{Request, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Committed,
    RolledBack,
}

/// Open from construction until [`IndexSession::close`], which consumes it. A session
/// dropped without closing rolls back.
pub struct IndexSession {
    source_name: String,
    /// Workspace name for error reporting, or `"*"` for multi-workspace sessions.
    scope: String,
    processor: Option<Box<dyn IndexProcessor>>,
    observer: Option<Arc<dyn Observer>>,
    rollback: bool,
    changes: Vec<Request>,
    submitted: usize,
}

impl IndexSession {
    pub fn open(
        source_name: impl Into<String>,
        scope: impl Into<String>,
        processor: Box<dyn IndexProcessor>,
        observer: Option<Arc<dyn Observer>>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            scope: scope.into(),
            processor: Some(processor),
            observer,
            rollback: false,
            changes: Vec::new(),
            submitted: 0,
        }
    }

    /// Hand `request` to the processor and record the outcome on its status.
    /// Returns whether it was applied. Does not mark the session failed.
    pub fn submit(&mut self, request: &mut Request) -> bool {
        let Some(processor) = self.processor.as_mut() else {
            request.status = RequestStatus::NotSubmitted;
            return false;
        };
        self.submitted += 1;
        request.status = match processor.process(request) {
            Ok(()) => RequestStatus::Applied,
            Err(ProcessError::Cancelled) => RequestStatus::Cancelled,
            Err(ProcessError::Failed(message)) => RequestStatus::Failed(message),
        };
        let applied = request.status == RequestStatus::Applied;
        if applied {
            self.changes.push(request.clone());
        } else {
            tracing::debug!(scope = %self.scope, request = %request, status = ?request.status, "request not applied");
        }
        applied
    }

    /// Roll back instead of committing when the session closes.
    pub fn mark_failed(&mut self) {
        self.rollback = true;
    }

    pub fn is_failed(&self) -> bool {
        self.rollback
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn optimize(&mut self) -> Result<bool> {
        let scope = self.scope.clone();
        let processor = self.processor_mut()?;
        processor.optimize().map_err(|e| IndexError::indexing(scope, e.to_string()))
    }

    pub fn optimize_workspace(&mut self, workspace: &str) -> Result<bool> {
        let processor = self.processor_mut()?;
        processor.optimize_workspace(workspace).map_err(|e| IndexError::indexing(workspace, e.to_string()))
    }

    /// Commit, or roll back if marked failed, then publish the session's changes.
    pub fn close(mut self) -> Result<SessionOutcome> {
        self.finish()
    }

    fn processor_mut(&mut self) -> Result<&mut Box<dyn IndexProcessor>> {
        let scope = &self.scope;
        self.processor.as_mut().ok_or_else(|| IndexError::indexing(scope.clone(), "session is closed"))
    }

    fn finish(&mut self) -> Result<SessionOutcome> {
        let Some(mut processor) = self.processor.take() else {
            return Err(IndexError::indexing(self.scope.clone(), "session is closed"));
        };

        let (outcome, result) = if self.rollback {
            (SessionOutcome::RolledBack, processor.rollback())
        } else {
            match processor.commit() {
                Ok(()) => (SessionOutcome::Committed, Ok(())),
                Err(commit_err) => {
                    // Leave the index as it was before the session.
                    if let Err(e) = processor.rollback() {
                        tracing::warn!(scope = %self.scope, error = %e, "rollback after failed commit failed");
                    }
                    (SessionOutcome::RolledBack, Err(commit_err))
                }
            }
        };

        match outcome {
            SessionOutcome::Committed => tracing::debug!(
                source = %self.source_name,
                scope = %self.scope,
                changes = self.changes.len(),
                "index session committed"
            ),
            SessionOutcome::RolledBack => tracing::warn!(
                source = %self.source_name,
                scope = %self.scope,
                submitted = self.submitted,
                "index session rolled back"
            ),
        }

        if let Some(observer) = &self.observer {
            observer.notify(&Notification {
                source_name: self.source_name.clone(),
                outcome,
                changes: std::mem::take(&mut self.changes),
            });
        }

        result.map_err(|e| IndexError::indexing(self.scope.clone(), e.to_string()))?;
        Ok(outcome)
    }
}

impl Drop for IndexSession {
    fn drop(&mut self) {
        if self.processor.is_some() {
            self.rollback = true;
            if let Err(e) = self.finish() {
                tracing::warn!(scope = %self.scope, error = %e, "dropped index session failed to roll back");
            }
        }
    }
}
