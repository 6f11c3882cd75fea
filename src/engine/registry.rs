//! Thread-safe map from workspace name to index state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{IndexError, Result};
use crate::source::ContentSource;

type WorkspaceFactory<W> = Box<dyn Fn(&str) -> Result<W> + Send + Sync>;

/// Lazily creates at most one state object per workspace name.
///
/// Lookups take the read lock. A miss optionally verifies the name against the
/// source with no lock held (the call may be remote), then re-checks under the
/// write lock before creating. Under contention the source may be asked more than
/// once, but only one state object is ever retained.
pub struct WorkspaceRegistry<W> {
    source_name: String,
    verifier: Option<Arc<dyn ContentSource>>,
    factory: WorkspaceFactory<W>,
    workspaces: RwLock<HashMap<String, Arc<W>>>,
}

impl<W> WorkspaceRegistry<W> {
    /// `verifier` is the source to check workspace names against; `None` trusts callers.
    pub fn new(
        source_name: impl Into<String>,
        verifier: Option<Arc<dyn ContentSource>>,
        factory: impl Fn(&str) -> Result<W> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            verifier,
            factory: Box::new(factory),
            workspaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn verifies_workspaces(&self) -> bool {
        self.verifier.is_some()
    }

    /// Existing state for `name`, or newly created state if `create_if_missing`.
    ///
    /// # Errors
    ///
    /// - [`IndexError::UnknownWorkspace`] if there is no state and `create_if_missing`
    ///   is false, or verification is enabled and the source does not list the name
    /// - [`IndexError::SourceAccess`] if the source could not be asked
    /// - whatever the factory returns
    pub fn get_or_create(&self, name: &str, create_if_missing: bool) -> Result<Arc<W>> {
        if let Some(existing) = self.read().get(name) {
            return Ok(Arc::clone(existing));
        }
        if !create_if_missing {
            return Err(self.unknown(name));
        }

        if let Some(source) = &self.verifier {
            let names = source.workspace_names().map_err(|reason| IndexError::SourceAccess {
                source_name: self.source_name.clone(),
                reason,
            })?;
            if !names.contains(name) {
                return Err(self.unknown(name));
            }
        }

        let mut workspaces = self.write();
        // Another caller may have created it while we were verifying.
        if let Some(existing) = workspaces.get(name) {
            return Ok(Arc::clone(existing));
        }
        let created = Arc::new((self.factory)(name)?);
        workspaces.insert(name.to_string(), Arc::clone(&created));
        tracing::debug!(source = %self.source_name, workspace = name, "created workspace index state");
        Ok(created)
    }

    pub fn get(&self, name: &str) -> Option<Arc<W>> {
        self.read().get(name).cloned()
    }

    /// Snapshot of every registered workspace.
    pub fn all(&self) -> Vec<(String, Arc<W>)> {
        let mut all: Vec<(String, Arc<W>)> =
            self.read().iter().map(|(name, state)| (name.clone(), Arc::clone(state))).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn names(&self) -> Vec<String> {
        self.all().into_iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Unregister `name`, handing its state back for cleanup.
    pub fn remove(&self, name: &str) -> Option<Arc<W>> {
        self.write().remove(name)
    }

    /// Unregister everything, handing all state back. Used at shutdown.
    pub fn remove_all(&self) -> HashMap<String, Arc<W>> {
        std::mem::take(&mut *self.write())
    }

    fn unknown(&self, name: &str) -> IndexError {
        IndexError::UnknownWorkspace { workspace: name.to_string(), source_name: self.source_name.clone() }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<W>>> {
        self.workspaces.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<W>>> {
        self.workspaces.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::source::MemorySource;

    fn counting_registry(
        verifier: Option<Arc<dyn ContentSource>>,
    ) -> (WorkspaceRegistry<String>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let registry = WorkspaceRegistry::new("src", verifier, move |name: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("state-{}", name))
        });
        (registry, created)
    }

    #[test]
    fn test_concurrent_creation_yields_one_state() {
        let (registry, created) = counting_registry(None);
        let registry = Arc::new(registry);
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create("w", true).unwrap()
                })
            })
            .collect();
        let states: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_without_create_is_unknown() {
        let (registry, created) = counting_registry(None);
        let err = registry.get_or_create("w", false).unwrap_err();
        assert!(matches!(err, IndexError::UnknownWorkspace { .. }));
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_verification_rejects_names_absent_from_source() {
        let source = Arc::new(MemorySource::new("src"));
        source.create_workspace("main");
        let (registry, _) = counting_registry(Some(source));

        assert!(registry.get_or_create("main", true).is_ok());
        let err = registry.get_or_create("other", true).unwrap_err();
        assert!(matches!(err, IndexError::UnknownWorkspace { ref workspace, .. } if workspace == "other"));
    }

    #[test]
    fn test_verification_failure_is_source_access() {
        let source = Arc::new(MemorySource::new("src"));
        source.set_unavailable(true);
        let (registry, _) = counting_registry(Some(source));
        let err = registry.get_or_create("main", true).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_remove_and_remove_all_hand_back_state() {
        let (registry, _) = counting_registry(None);
        registry.get_or_create("a", true).unwrap();
        registry.get_or_create("b", true).unwrap();

        assert_eq!(registry.remove("a").as_deref().map(String::as_str), Some("state-a"));
        assert!(registry.remove("a").is_none());

        let drained = registry.remove_all();
        assert_eq!(drained.len(), 1);
        assert!(drained.contains_key("b"));
        assert!(registry.is_empty());
    }
}
