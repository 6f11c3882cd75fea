//! The index engine: keeps per-workspace index state in step with a content source.
//!
//! # Error Handling Strategy
//!
//! - **Read failures** abort the current crawl after cancelling its channel and surface
//!   as [`IndexError::SourceAccess`]. They never touch the workspace registry or
//!   other crawls.
//! - **Processor failures** roll back only the current session. A crawl reports them
//!   as [`IndexError::Indexing`]; change application records them on the returned
//!   requests instead.
//! - **Interrupts** (the engine's cancel flag) end a crawl cleanly with partial
//!   stats. The flag is cleared once a crawl has observed it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{IndexError, Result, SourceError};
use crate::index::{IndexBackend, IndexSession, Observer};
use crate::models::{Location, Request, RequestStatus};
use crate::source::{ContentChannel, ContentSource};

pub mod crawler;
pub mod planner;
pub mod registry;

pub use crawler::{CrawlOutcome, CrawlStats, Crawler};
pub use planner::{WorkItem, WorkPlan, WorkspacePlan};
pub use registry::WorkspaceRegistry;

/// What [`IndexEngine::index_planned`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanReport {
    /// One entry per crawl run, keyed by workspace.
    pub crawls: Vec<(String, CrawlStats)>,
    /// Forwarded requests as returned by [`IndexEngine::index_changes`].
    pub forwarded: Vec<Request>,
    pub destroyed: Vec<String>,
}

pub struct IndexEngine<B: IndexBackend> {
    config: EngineConfig,
    source: Arc<dyn ContentSource>,
    backend: Arc<B>,
    workspaces: Arc<WorkspaceRegistry<B::Workspace>>,
    observer: Option<Arc<dyn Observer>>,
    interrupt: Arc<AtomicBool>,
    changes_since_optimize: AtomicUsize,
}

impl<B: IndexBackend> IndexEngine<B> {
    pub fn new(config: EngineConfig, source: Arc<dyn ContentSource>, backend: B) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(backend);
        let factory = Arc::clone(&backend);
        let verifier = config.verify_workspaces.then(|| Arc::clone(&source));
        let workspaces = Arc::new(WorkspaceRegistry::new(
            source.source_name(),
            verifier,
            move |name: &str| factory.create_workspace(name),
        ));
        Ok(Self {
            config,
            source,
            backend,
            workspaces,
            observer: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            changes_since_optimize: AtomicUsize::new(0),
        })
    }

    /// Publish every session's outcome to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.source_name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceRegistry<B::Workspace>> {
        &self.workspaces
    }

    /// Flag that, once raised, makes in-flight crawls stop at their next wait.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Rebuild the index content of the subtree at `start`, reading `max_depth`
    /// levels per request. Crawling the root rebuilds the whole workspace.
    ///
    /// # Errors
    ///
    /// - [`IndexError::UnknownWorkspace`] if verification rejects the workspace
    /// - [`IndexError::SourceAccess`] if a read fails or times out
    /// - [`IndexError::Indexing`] if the index rejected a request or failed to commit;
    ///   the session is rolled back. A rejected request leaves the crawl's partial
    ///   counts in [`IndexError::partial_stats`].
    pub fn index_at(&self, workspace: &str, start: &Location, max_depth: usize) -> Result<CrawlStats> {
        if max_depth == 0 {
            return Err(IndexError::InvalidArgument("max_depth must be at least 1".to_string()));
        }
        self.workspaces.get_or_create(workspace, true)?;

        let mut session = self.open_session(workspace, false);
        let mut channel =
            ContentChannel::start(Arc::clone(&self.source), &self.config, Arc::clone(&self.interrupt))
                .map_err(|reason| self.source_error(reason))?;
        let result = Crawler::new(&channel, workspace, max_depth).crawl(&mut session, start);
        channel.close();

        let stats = match result {
            Ok(stats) => stats,
            Err(reason) => {
                if let Err(close_err) = session.close() {
                    tracing::warn!(workspace, error = %close_err, "rollback after read failure failed");
                }
                return Err(self.source_error(reason));
            }
        };
        if stats.outcome == CrawlOutcome::Interrupted {
            self.interrupt.store(false, Ordering::SeqCst);
        }
        self.optimize_if_due(&mut session, Some(workspace), stats.nodes_indexed);
        session.close()?;

        if let CrawlOutcome::Aborted { request, reason } = &stats.outcome {
            return Err(IndexError::Indexing {
                workspace: workspace.to_string(),
                message: format!(
                    "{} not applied ({}) after {} nodes; session rolled back",
                    request, reason, stats.nodes_indexed
                ),
                stats: Some(stats.clone()),
            });
        }
        Ok(stats)
    }

    /// Rebuild a whole workspace.
    pub fn index_workspace(&self, workspace: &str, max_depth: usize) -> Result<CrawlStats> {
        self.index_at(workspace, &Location::root(), max_depth)
    }

    /// Rebuild every workspace the source reports, one after another.
    pub fn index_all(&self, max_depth: usize) -> Result<Vec<(String, CrawlStats)>> {
        let names = self.source.workspace_names().map_err(|reason| self.source_error(reason))?;
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let stats = self.index_workspace(&name, max_depth)?;
            results.push((name, stats));
        }
        Ok(results)
    }

    /// Mirror `changes` into the index, in order, within one session.
    ///
    /// Every change comes back as a copy whose status says what happened. After the
    /// first change the index rejects, later ones are returned as
    /// [`RequestStatus::NotSubmitted`] and the session rolls back. Changes that had
    /// already failed in the source are returned unchanged and never submitted.
    ///
    /// Only a failure to finish the session is an error.
    pub fn index_changes(&self, changes: &[Request]) -> Result<Vec<Request>> {
        let mut session = self.open_session("*", false);
        let mut processed = Vec::with_capacity(changes.len());
        let mut submitting = true;

        for change in changes {
            if change.has_error() || change.is_cancelled() {
                processed.push(change.clone());
                continue;
            }
            let mut copy = change.clone_for_index();
            if !submitting {
                copy.status = RequestStatus::NotSubmitted;
                processed.push(copy);
                continue;
            }
            if !session.submit(&mut copy) {
                tracing::warn!(request = %copy, status = ?copy.status, "change not applied; holding back the rest");
                session.mark_failed();
                submitting = false;
            }
            processed.push(copy);
        }

        let applied = processed.iter().filter(|r| r.status == RequestStatus::Applied).count();
        self.optimize_if_due(&mut session, None, applied);
        session.close()?;
        Ok(processed)
    }

    /// Reduce `changes` to a [`WorkPlan`] and carry it out: forwarded requests go
    /// through [`Self::index_changes`], shallow recrawls and full reindexes through
    /// [`Self::index_at`], destroyed workspaces are removed.
    pub fn index_planned(&self, changes: &[Request]) -> Result<PlanReport> {
        let plan = WorkPlan::from_changes(changes);
        let mut report = PlanReport::default();

        for workspace in plan.workspaces() {
            let name = workspace.workspace.as_str();
            if workspace.destroy {
                self.remove_workspace(name)?;
                report.destroyed.push(name.to_string());
                continue;
            }
            if workspace.reindex_all {
                let stats = self.index_workspace(name, self.config.max_depth_per_read)?;
                report.crawls.push((name.to_string(), stats));
                continue;
            }

            let mut batch = Vec::new();
            for item in workspace.items() {
                match item {
                    WorkItem::Forward(request) => batch.push(request.clone()),
                    WorkItem::Crawl { location, depth } => {
                        if !batch.is_empty() {
                            report.forwarded.extend(self.index_changes(&batch)?);
                            batch.clear();
                        }
                        let stats = self.index_at(name, location, *depth)?;
                        report.crawls.push((name.to_string(), stats));
                    }
                }
            }
            if !batch.is_empty() {
                report.forwarded.extend(self.index_changes(&batch)?);
            }
        }
        Ok(report)
    }

    /// Optimize every workspace. Returns whether any physical optimization ran.
    pub fn optimize(&self) -> Result<bool> {
        let mut session = self.open_session("*", true);
        let ran = session.optimize();
        session.close()?;
        if ran.is_ok() {
            self.changes_since_optimize.store(0, Ordering::SeqCst);
        }
        ran
    }

    /// Optimize one workspace. A workspace with no index state has nothing to do.
    pub fn optimize_workspace(&self, workspace: &str) -> Result<bool> {
        if self.workspaces.get(workspace).is_none() {
            return Ok(false);
        }
        let mut session = self.open_session(workspace, true);
        let ran = session.optimize_workspace(workspace);
        session.close()?;
        ran
    }

    /// Drop a workspace's index state. Returns whether it was registered.
    pub fn remove_workspace(&self, workspace: &str) -> Result<bool> {
        match self.workspaces.remove(workspace) {
            Some(state) => {
                self.backend.destroy_workspace(workspace, state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unregister every workspace and hand the state back to the caller.
    pub fn shutdown(&self) -> HashMap<String, Arc<B::Workspace>> {
        let states = self.workspaces.remove_all();
        tracing::info!(source = self.source_name(), workspaces = states.len(), "index engine shut down");
        states
    }

    /// Count `changes` toward the automatic optimization threshold and, once it is
    /// reached, optimize within `session` so the pass covers its own writes too.
    /// Failed sessions neither count nor optimize.
    fn optimize_if_due(&self, session: &mut IndexSession, workspace: Option<&str>, changes: usize) {
        let threshold = self.config.max_changes_before_optimize;
        if threshold == 0 || changes == 0 || session.is_failed() {
            return;
        }
        let total = self.changes_since_optimize.fetch_add(changes, Ordering::SeqCst) + changes;
        if total < threshold {
            return;
        }
        self.changes_since_optimize.store(0, Ordering::SeqCst);
        let result = match workspace {
            Some(workspace) => session.optimize_workspace(workspace),
            None => session.optimize(),
        };
        match result {
            Ok(ran) => tracing::debug!(workspace = ?workspace, changes = total, ran, "automatic optimization"),
            Err(e) => tracing::warn!(workspace = ?workspace, error = %e, "automatic optimization failed"),
        }
    }

    fn open_session(&self, scope: &str, read_only: bool) -> IndexSession {
        let processor = self.backend.create_processor(Arc::clone(&self.workspaces), read_only);
        IndexSession::open(self.source_name(), scope, processor, self.observer.clone())
    }

    fn source_error(&self, reason: SourceError) -> IndexError {
        match reason {
            SourceError::NoSuchWorkspace(workspace) => {
                IndexError::UnknownWorkspace { workspace, source_name: self.source_name().to_string() }
            }
            reason => IndexError::SourceAccess { source_name: self.source_name().to_string(), reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::models::{NodePath, Properties, PropertyValue};
    use crate::source::MemorySource;

    fn title(t: &str) -> Properties {
        Properties::from([("title".to_string(), PropertyValue::from(t))])
    }

    fn path(s: &str) -> NodePath {
        s.parse().unwrap()
    }

    fn engine(source: &Arc<MemorySource>) -> IndexEngine<MemoryIndex> {
        let source: Arc<dyn ContentSource> = source.clone();
        IndexEngine::new(EngineConfig::default(), source, MemoryIndex::new()).unwrap()
    }

    fn seeded() -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new("src"));
        source.put("ws", "/a", title("A")).unwrap();
        source.put("ws", "/a/b", title("B")).unwrap();
        source
    }

    #[test]
    fn test_index_workspace_mirrors_source() {
        let source = seeded();
        let engine = engine(&source);
        let stats = engine.index_workspace("ws", 10).unwrap();
        assert_eq!(stats.outcome, CrawlOutcome::Completed);

        let ws = engine.workspaces().get("ws").unwrap();
        assert!(ws.contains(&path("/a/b")));
        assert_eq!(ws.document(&path("/a")).unwrap().properties, title("A"));
    }

    #[test]
    fn test_zero_depth_is_rejected() {
        let engine = engine(&seeded());
        let err = engine.index_workspace("ws", 0).unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument(_)));
    }

    #[test]
    fn test_rejected_crawl_reports_partial_stats() {
        let source = seeded();
        let engine = engine(&source);
        engine.backend().fail_requests_at(path("/a/b"));

        let err = engine.index_workspace("ws", 10).unwrap_err();
        let stats = err.partial_stats().expect("crawl progress");
        assert_eq!(stats.nodes_indexed, 2);
        assert!(matches!(stats.outcome, CrawlOutcome::Aborted { .. }));
        assert!(engine.workspaces().get("ws").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_workspace_is_rejected_without_state() {
        let engine = engine(&seeded());
        let err = engine.index_workspace("nope", 3).unwrap_err();
        assert!(matches!(err, IndexError::UnknownWorkspace { .. }));
        assert!(engine.workspaces().is_empty());
    }

    #[test]
    fn test_unavailable_source_is_reported_as_source_access() {
        let source = seeded();
        let engine = engine(&source);
        engine.index_workspace("ws", 3).unwrap();
        source.set_unavailable(true);

        let err = engine.index_workspace("ws", 3).unwrap_err();
        assert!(matches!(err, IndexError::SourceAccess { .. }));
        assert!(err.is_retryable());
        // The failed crawl rolled back; the earlier content is intact.
        assert_eq!(engine.workspaces().get("ws").unwrap().len(), 3);
    }

    #[test]
    fn test_raised_interrupt_stops_crawl_and_is_cleared() {
        let source = seeded();
        let engine = engine(&source);
        engine.interrupt();
        let stats = engine.index_workspace("ws", 3).unwrap();
        assert_eq!(stats.outcome, CrawlOutcome::Interrupted);
        assert!(!engine.cancel_flag().load(Ordering::SeqCst));
        assert!(engine.workspaces().get("ws").unwrap().is_empty());

        let stats = engine.index_workspace("ws", 3).unwrap();
        assert_eq!(stats.outcome, CrawlOutcome::Completed);
    }

    #[test]
    fn test_optimize_only_runs_after_writes() {
        let engine = engine(&seeded());
        assert!(!engine.optimize().unwrap());
        assert!(!engine.optimize_workspace("ws").unwrap());

        engine.index_workspace("ws", 3).unwrap();
        assert!(engine.optimize_workspace("ws").unwrap());
        assert!(!engine.optimize().unwrap());
    }

    #[test]
    fn test_automatic_optimization_after_threshold() {
        let source = seeded();
        let config = EngineConfig { max_changes_before_optimize: 4, ..EngineConfig::default() };
        let engine = IndexEngine::new(config, source.clone(), MemoryIndex::new()).unwrap();

        // Three nodes stay below the threshold.
        engine.index_workspace("ws", 3).unwrap();
        let ws = engine.workspaces().get("ws").unwrap();
        assert_eq!(ws.optimize_count(), 0);

        engine.index_workspace("ws", 3).unwrap();
        assert_eq!(ws.optimize_count(), 1);
        assert!(!engine.optimize_workspace("ws").unwrap(), "already optimized in the crawl session");
    }

    #[test]
    fn test_automatic_optimization_disabled_by_default() {
        let engine = engine(&seeded());
        for _ in 0..3 {
            engine.index_workspace("ws", 3).unwrap();
        }
        assert_eq!(engine.workspaces().get("ws").unwrap().optimize_count(), 0);
        assert!(engine.optimize_workspace("ws").unwrap());
    }

    #[test]
    fn test_remove_and_shutdown() {
        let source = seeded();
        source.put("other", "/x", title("X")).unwrap();
        let engine = engine(&source);
        let results = engine.index_all(5).unwrap();
        assert_eq!(results.len(), 2);

        assert!(engine.remove_workspace("other").unwrap());
        assert!(!engine.remove_workspace("other").unwrap());
        let remaining = engine.shutdown();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("ws"));
        assert!(engine.workspaces().is_empty());
    }

    #[test]
    fn test_index_changes_stops_submitting_after_a_failure() {
        let source = seeded();
        let engine = engine(&source);
        engine.index_workspace("ws", 3).unwrap();
        engine.backend().fail_requests_at(path("/a/c"));

        let root = Location::root();
        let a = Location::new(path("/a"));
        let processed = engine
            .index_changes(&[
                Request::set_property(a.clone(), "ws", "title", "A2"),
                Request::create_node(a.clone(), "ws", "c", title("C")),
                Request::create_node(root, "ws", "d", title("D")),
            ])
            .unwrap();
        assert_eq!(processed[0].status, RequestStatus::Applied);
        assert!(processed[1].has_error());
        assert_eq!(processed[2].status, RequestStatus::NotSubmitted);

        let doc = engine.workspaces().get("ws").unwrap().document(&path("/a")).unwrap();
        assert_eq!(doc.properties, title("A"), "session rolled back");
    }
}
