/// Concurrent use of one engine: workspace state creation and crawls.
mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{CountingIndex, SourceBuilder, path};
use content_indexer::{ContentSource, CrawlOutcome, EngineConfig, IndexEngine, IndexError};

fn counting_engine(source: Arc<content_indexer::MemorySource>) -> IndexEngine<CountingIndex> {
    let source: Arc<dyn ContentSource> = source;
    IndexEngine::new(EngineConfig::default(), source, CountingIndex::default()).unwrap()
}

#[test]
fn test_concurrent_first_use_creates_state_once() {
    let source = SourceBuilder::new().node("main", "/a").build();
    let engine = counting_engine(source);
    let barrier = Barrier::new(16);

    let states: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    engine.workspaces().get_or_create("main", true).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(engine.backend().created(), 1);
    assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
}

#[test]
fn test_concurrent_crawls_of_one_workspace() {
    let source = SourceBuilder::new().tree("main", 4, 3).build();
    let engine = counting_engine(source);
    let barrier = Barrier::new(8);

    thread::scope(|scope| {
        for depth in 1..=8 {
            let engine = &engine;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                let stats = engine.index_workspace("main", depth).unwrap();
                assert_eq!(stats.outcome, CrawlOutcome::Completed);
            });
        }
    });

    assert_eq!(engine.backend().created(), 1);
    // Root plus 4 + 16 + 64 nodes
    assert_eq!(engine.workspaces().get("main").unwrap().len(), 85);
}

#[test]
fn test_crawls_of_different_workspaces_are_independent() {
    let source = SourceBuilder::new().tree("one", 3, 2).tree("two", 3, 2).build();
    source.set_read_delay(Some(Duration::from_millis(5)));
    let engine = counting_engine(source);

    thread::scope(|scope| {
        scope.spawn(|| engine.index_workspace("one", 1).unwrap());
        scope.spawn(|| engine.index_workspace("two", 1).unwrap());
    });

    assert_eq!(engine.backend().created(), 2);
    assert_eq!(engine.workspaces().names(), vec!["one".to_string(), "two".to_string()]);
    assert!(engine.workspaces().get("two").unwrap().contains(&path("/n2/n2")));
}

#[test]
fn test_interrupt_from_another_thread_stops_the_crawl() {
    let source = SourceBuilder::new().tree("main", 3, 3).build();
    source.set_read_delay(Some(Duration::from_millis(20)));
    let engine = counting_engine(Arc::clone(&source));
    let flag = engine.cancel_flag();

    let stats = thread::scope(|scope| {
        let crawl = scope.spawn(|| engine.index_workspace("main", 1));
        thread::sleep(Duration::from_millis(70));
        flag.store(true, Ordering::SeqCst);
        crawl.join().unwrap()
    })
    .unwrap();

    assert_eq!(stats.outcome, CrawlOutcome::Interrupted);
    assert!(stats.reads < 40);
    assert!(!flag.load(Ordering::SeqCst), "flag cleared after the crawl observed it");
    assert!(engine.workspaces().get("main").unwrap().is_empty(), "partial crawl rolled back");
}

#[test]
fn test_unknown_workspace_is_never_registered() {
    let source = SourceBuilder::new().node("main", "/a").build();
    let engine = counting_engine(source);

    let err = engine.index_workspace("ghost", 3).unwrap_err();
    assert!(matches!(err, IndexError::UnknownWorkspace { ref workspace, .. } if workspace == "ghost"));
    assert_eq!(engine.backend().created(), 0);
}
