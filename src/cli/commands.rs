use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::engine::{CrawlStats, IndexEngine};
use crate::index::MemoryIndex;
use crate::models::{Location, NodePath};
use crate::source::{ContentSource, FsSource, MemorySource};

/// Workspace name the file-system source exposes its directory as.
const DIR_WORKSPACE: &str = "default";

#[derive(Parser)]
#[command(name = "content-indexer")]
#[command(version = "0.1.0")]
#[command(about = "Mirror a tree-shaped content repository into a search index", long_about = None)]
pub struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a JSON content tree into an in-memory index
    Index {
        /// JSON file holding the content tree
        #[arg(long)]
        tree: PathBuf,
        #[arg(long, default_value = "default")]
        workspace: String,
        /// Reindex only the subtree at this path
        #[arg(long, default_value = "/")]
        path: String,
        /// Levels per subgraph read (defaults to the configured value)
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Crawl a directory through the file-system source
    IndexDir {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Index every workspace of a JSON content tree and show document counts
    Stats {
        #[arg(long)]
        tree: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::resolve(cli.config.as_deref())?;

    match &cli.command {
        Some(Commands::Index { tree, workspace, path, depth }) => {
            index_tree(config, tree, workspace, path, *depth)?;
        }
        Some(Commands::IndexDir { dir, depth }) => {
            index_dir(config, dir, *depth)?;
        }
        Some(Commands::Stats { tree }) => {
            show_stats(config, tree)?;
        }
        None => {
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn tree_engine(config: EngineConfig, tree: &Path) -> Result<IndexEngine<MemoryIndex>> {
    let source: Arc<dyn ContentSource> = Arc::new(MemorySource::load(config.source_name.clone(), tree)?);
    Ok(IndexEngine::new(config, source, MemoryIndex::new())?)
}

fn index_tree(
    config: EngineConfig,
    tree: &Path,
    workspace: &str,
    path: &str,
    depth: Option<usize>,
) -> Result<()> {
    let start: NodePath = path.parse().with_context(|| format!("Invalid node path: {}", path))?;
    let depth = depth.unwrap_or(config.max_depth_per_read);
    let engine = tree_engine(config, tree)?;

    if !start.is_root() {
        // A subtree can only be rebuilt under already indexed ancestors.
        let stats = engine.index_workspace(workspace, depth)?;
        print_crawl(workspace, &NodePath::root(), &stats);
    }
    let stats = engine.index_at(workspace, &Location::new(start.clone()), depth)?;
    print_crawl(workspace, &start, &stats);

    let documents = engine.workspaces().get(workspace).map_or(0, |ws| ws.len());
    println!("Documents in '{}': {}", workspace, documents);
    Ok(())
}

fn index_dir(config: EngineConfig, dir: &Path, depth: Option<usize>) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }
    let depth = depth.unwrap_or(config.max_depth_per_read);
    let source: Arc<dyn ContentSource> =
        Arc::new(FsSource::new(config.source_name.clone(), DIR_WORKSPACE, dir));
    let engine = IndexEngine::new(config, source, MemoryIndex::new())?;

    let stats = engine.index_workspace(DIR_WORKSPACE, depth)?;
    print_crawl(DIR_WORKSPACE, &NodePath::root(), &stats);
    println!("Directory: {}", dir.display());
    Ok(())
}

fn show_stats(config: EngineConfig, tree: &Path) -> Result<()> {
    let depth = config.max_depth_per_read;
    let engine = tree_engine(config, tree)?;
    let results = engine.index_all(depth)?;

    println!("Content Index Statistics");
    println!("========================");
    println!("Source: {}", engine.source_name());
    println!("Workspaces: {}", results.len());

    let mut total = 0;
    for (workspace, stats) in &results {
        let documents = engine.workspaces().get(workspace).map_or(0, |ws| ws.len());
        total += documents;
        println!("  {}: {} documents ({} reads)", workspace, documents, stats.reads);
    }
    println!("Total documents: {}", total);

    Ok(())
}

fn print_crawl(workspace: &str, start: &NodePath, stats: &CrawlStats) {
    println!(
        "Indexed {} nodes from {} in '{}' ({} reads, {:?})",
        stats.nodes_indexed, start, workspace, stats.reads, stats.outcome
    );
}
