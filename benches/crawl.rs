use std::hint::black_box;
use std::sync::Arc;

use content_indexer::{
    ContentSource, EngineConfig, IndexEngine, Location, MemoryIndex, MemorySource, Properties,
    PropertyValue, Request,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

/// Generate a complete tree with `fanout` children per node, `levels` deep
fn generate_source(fanout: usize, levels: usize) -> (Arc<MemorySource>, usize) {
    let source = MemorySource::new("bench");
    source.create_workspace("main");
    let mut frontier = vec![String::new()];
    let mut nodes = 1;
    for _ in 0..levels {
        let mut next = Vec::new();
        for parent in &frontier {
            for i in 0..fanout {
                let path = format!("{}/node{}", parent, i);
                let properties = Properties::from([
                    ("title".to_string(), PropertyValue::from(format!("Node {}", path))),
                    ("rank".to_string(), PropertyValue::Long(i as i64)),
                ]);
                source.put("main", &path, properties).expect("valid path");
                next.push(path);
                nodes += 1;
            }
        }
        frontier = next;
    }
    (Arc::new(source), nodes)
}

fn engine(source: &Arc<MemorySource>) -> IndexEngine<MemoryIndex> {
    let source: Arc<dyn ContentSource> = source.clone();
    IndexEngine::new(EngineConfig::default(), source, MemoryIndex::new()).expect("valid config")
}

fn bench_full_crawl(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_crawl");
    let (source, nodes) = generate_source(8, 3);
    group.throughput(Throughput::Elements(nodes as u64));

    // Depth per read trades read count against read size
    for depth in [1, 2, 4, 10].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            let engine = engine(&source);
            b.iter(|| engine.index_workspace(black_box("main"), depth).expect("crawl succeeds"));
        });
    }

    group.finish();
}

fn bench_index_changes(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_changes");
    let (source, _) = generate_source(8, 2);

    for size in [10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let engine = engine(&source);
            engine.index_workspace("main", 10).expect("crawl succeeds");
            let changes: Vec<Request> = (0..size)
                .map(|i| {
                    let location = Location::new(format!("/node{}", i % 8).parse().expect("valid path"));
                    Request::set_property(location, "main", "rank", PropertyValue::Long(i as i64))
                })
                .collect();

            b.iter(|| engine.index_changes(black_box(&changes)).expect("session closes"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_full_crawl, bench_index_changes);
criterion_main!(benches);
