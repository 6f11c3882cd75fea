//! Rebuilds the index content of a subtree by walking the source in bounded reads.
//!
//! # Algorithm
//!
//! 1. Read a subgraph rooted at the start location. If the start node no longer
//!    exists, it was deleted after the crawl was requested: delete its branch from
//!    the index and stop.
//! 2. Clear the old content. Starting at the root deletes the whole branch; any
//!    other start deletes only its children, so the node's own identity (and any
//!    same-name-sibling numbering tied to it) stays put.
//! 3. Replace the start node's properties wholesale.
//! 4. Create a document for every other node in the read, in read order, so parents
//!    are always created before their children. Children the read listed but did
//!    not include are queued.
//! 5. Read the next queued location and repeat step 4 for the whole result, until
//!    the queue is empty.
//!
//! A rejected or cancelled request marks the session failed and ends the crawl with
//! the count so far.

use std::collections::{HashSet, VecDeque};

use crate::error::SourceError;
use crate::index::IndexSession;
use crate::models::{Location, NodePath, Request, RequestKind, Subgraph};
use crate::source::ContentChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Completed,
    /// The start node was gone; its branch was deleted instead.
    StaleStart,
    /// The index rejected `request`; the session is marked failed.
    Aborted { request: String, reason: String },
    /// The caller's cancellation flag was raised mid-crawl.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub nodes_indexed: usize,
    pub reads: usize,
    pub outcome: CrawlOutcome,
}

impl CrawlStats {
    fn new() -> Self {
        Self { nodes_indexed: 0, reads: 0, outcome: CrawlOutcome::Completed }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, CrawlOutcome::Completed | CrawlOutcome::StaleStart)
    }
}

pub struct Crawler<'a> {
    channel: &'a ContentChannel,
    workspace: &'a str,
    max_depth: usize,
}

impl<'a> Crawler<'a> {
    pub fn new(channel: &'a ContentChannel, workspace: &'a str, max_depth: usize) -> Self {
        Self { channel, workspace, max_depth: max_depth.max(1) }
    }

    /// Crawl the subtree at `start`, submitting requests through `session`.
    ///
    /// # Errors
    ///
    /// Returns the source error if a read fails for any reason other than a missing
    /// node or an interrupt. The channel is cancelled first.
    pub fn crawl(&self, session: &mut IndexSession, start: &Location) -> Result<CrawlStats, SourceError> {
        let mut stats = CrawlStats::new();

        let first = match self.read(start, &mut stats) {
            Ok(graph) => graph,
            Err(SourceError::PathNotFound { .. }) => {
                tracing::warn!(
                    workspace = self.workspace,
                    path = %start.path,
                    "start node no longer exists; deleting its branch"
                );
                let mut delete = Request::delete_branch(start.clone(), self.workspace);
                if self.submit(session, &mut delete, &mut stats) {
                    stats.outcome = CrawlOutcome::StaleStart;
                }
                return Ok(stats);
            }
            Err(err) => return self.stop(session, stats, err),
        };
        let Some(top) = first.root() else {
            return self.stop(session, stats, SourceError::Unavailable("empty subgraph read".into()));
        };

        let mut reset = if start.is_root() {
            Request::delete_branch(start.clone(), self.workspace)
        } else {
            Request::delete_children(start.clone(), self.workspace)
        };
        if !self.submit(session, &mut reset, &mut stats) {
            return Ok(stats);
        }

        let mut update =
            Request::update_properties(top.location.clone(), self.workspace, top.properties.clone(), true);
        if !self.submit(session, &mut update, &mut stats) {
            return Ok(stats);
        }
        stats.nodes_indexed += 1;

        let mut pending = VecDeque::new();
        let mut queued = HashSet::new();
        if !self.index_nodes(session, &first, true, &mut pending, &mut queued, &mut stats) {
            return Ok(stats);
        }

        while let Some(next) = pending.pop_front() {
            let graph = match self.read(&next, &mut stats) {
                Ok(graph) => graph,
                Err(SourceError::PathNotFound { .. }) => {
                    // Removed from the source since its parent was read.
                    tracing::debug!(workspace = self.workspace, path = %next.path, "queued node vanished");
                    continue;
                }
                Err(err) => return self.stop(session, stats, err),
            };
            if !self.index_nodes(session, &graph, false, &mut pending, &mut queued, &mut stats) {
                return Ok(stats);
            }
        }

        tracing::info!(
            workspace = self.workspace,
            start = %start.path,
            nodes = stats.nodes_indexed,
            reads = stats.reads,
            "crawl finished"
        );
        Ok(stats)
    }

    fn read(&self, location: &Location, stats: &mut CrawlStats) -> Result<Subgraph, SourceError> {
        let graph = self.channel.read_subgraph(location, self.workspace, self.max_depth)?;
        stats.reads += 1;
        Ok(graph)
    }

    /// Create documents for the nodes of one read and queue the children it left out.
    /// Returns false if the index rejected a request.
    fn index_nodes(
        &self,
        session: &mut IndexSession,
        graph: &Subgraph,
        skip_top: bool,
        pending: &mut VecDeque<Location>,
        queued: &mut HashSet<NodePath>,
        stats: &mut CrawlStats,
    ) -> bool {
        for (position, node) in graph.iter().enumerate() {
            if !(skip_top && position == 0) {
                let (Some(parent), Some(name)) = (node.location.parent_path(), node.location.name())
                else {
                    continue;
                };
                let mut create = Request::new(RequestKind::CreateNode {
                    parent: Location::new(parent),
                    workspace: self.workspace.to_string(),
                    name: name.name.clone(),
                    properties: node.properties.clone(),
                    actual_location: Some(node.location.clone()),
                });
                if !self.submit(session, &mut create, stats) {
                    return false;
                }
                stats.nodes_indexed += 1;
            }
            for child in &node.children {
                if !graph.contains(&child.path) && queued.insert(child.path.clone()) {
                    pending.push_back(child.clone());
                }
            }
        }
        true
    }

    fn submit(&self, session: &mut IndexSession, request: &mut Request, stats: &mut CrawlStats) -> bool {
        if session.submit(request) {
            return true;
        }
        session.mark_failed();
        stats.outcome = CrawlOutcome::Aborted {
            request: request.to_string(),
            reason: format!("{:?}", request.status),
        };
        false
    }

    /// End the crawl on a read failure. Interrupts end it cleanly; anything else
    /// cancels the channel and propagates.
    fn stop(
        &self,
        session: &mut IndexSession,
        mut stats: CrawlStats,
        err: SourceError,
    ) -> Result<CrawlStats, SourceError> {
        session.mark_failed();
        if err == SourceError::Interrupted {
            tracing::debug!(workspace = self.workspace, nodes = stats.nodes_indexed, "crawl interrupted");
            stats.outcome = CrawlOutcome::Interrupted;
            return Ok(stats);
        }
        self.channel.cancel(true);
        Err(err)
    }
}
