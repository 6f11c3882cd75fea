use std::collections::HashMap;

use super::location::{Location, NodePath};
use super::property::Properties;

/// One node included in a subgraph read.
#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphNode {
    pub location: Location,
    pub properties: Properties,
    /// Every immediate child, whether or not the read included it.
    pub children: Vec<Location>,
}

/// Result of one bounded-depth read: the top node first, each parent before its descendants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subgraph {
    order: Vec<NodePath>,
    nodes: HashMap<NodePath, SubgraphNode>,
}

impl Subgraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. Callers add parents before children.
    pub fn push(&mut self, location: Location, properties: Properties, children: Vec<Location>) {
        let path = location.path.clone();
        if self.nodes.insert(path.clone(), SubgraphNode { location, properties, children }).is_none()
        {
            self.order.push(path);
        }
    }

    pub fn root(&self) -> Option<&SubgraphNode> {
        self.order.first().and_then(|path| self.nodes.get(path))
    }

    pub fn get(&self, path: &NodePath) -> Option<&SubgraphNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }

    /// Nodes in read order.
    pub fn iter(&self) -> impl Iterator<Item = &SubgraphNode> {
        self.order.iter().filter_map(|path| self.nodes.get(path))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
