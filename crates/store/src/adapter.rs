//! Graph store adapter - the persistence-agnostic contract the engine uses

use crate::Result;
use lineage_core::{Edge, EdgeId, EdgeRecord, Node, NodeId, NodeRecord, Observation, Relationship};
use std::collections::BTreeSet;

/// Which way to follow edges from a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Follow edges from source to target (towards consumers)
    Downstream,
    /// Follow edges from target to source (towards origins)
    Upstream,
}

/// Restricts which relationship kinds a neighbor query follows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RelationshipFilter(Option<BTreeSet<Relationship>>);

impl RelationshipFilter {
    /// Follow every relationship kind
    pub fn all() -> Self {
        Self(None)
    }

    /// Follow only the given relationship kinds
    pub fn only(kinds: impl IntoIterator<Item = Relationship>) -> Self {
        Self(Some(kinds.into_iter().collect()))
    }

    pub fn matches(&self, relationship: Relationship) -> bool {
        match &self.0 {
            None => true,
            Some(kinds) => kinds.contains(&relationship),
        }
    }
}

/// One hop out of a node: the edge taken and the node on the far side
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub edge: &'a Edge,
    pub node: &'a Node,
}

/// Lazy neighbor sequence, most recently observed edge first
pub type Neighbors<'a> = Box<dyn Iterator<Item = Neighbor<'a>> + 'a>;

/// Directed-graph persistence backend.
///
/// Every call is atomic on its own; atomicity across calls is the
/// ingestion merger's job.
pub trait GraphStore {
    /// Insert or update the node a record maps onto. Idempotent: the same
    /// record observed twice leaves the node unchanged.
    fn upsert_node(&mut self, record: &NodeRecord, observation: &Observation) -> Result<NodeId>;

    /// Insert or update an edge. Fails with `DanglingReference` if either
    /// endpoint is not already a node.
    fn upsert_edge(&mut self, record: &EdgeRecord, observation: &Observation) -> Result<EdgeId>;

    fn get_node(&self, id: &NodeId) -> Option<&Node>;

    fn get_edge(&self, id: &EdgeId) -> Option<&Edge>;

    fn contains_node(&self, id: &NodeId) -> bool {
        self.get_node(id).is_some()
    }

    /// Edges leaving `id` in `direction`, ordered by edge last-seen
    /// descending, ties broken by edge id ascending.
    fn neighbors<'a>(
        &'a self,
        id: &NodeId,
        direction: Direction,
        filter: &RelationshipFilter,
    ) -> Result<Neighbors<'a>>;

    /// Store a node as-is, replacing any existing node with the same id
    fn put_node(&mut self, node: Node) -> Result<()>;

    /// Store an edge as-is; endpoints must exist
    fn put_edge(&mut self, edge: Edge) -> Result<()>;

    fn delete_edge(&mut self, id: &EdgeId) -> Result<Edge>;

    /// Remove a node together with every incident edge
    fn delete_node(&mut self, id: &NodeId) -> Result<(Node, Vec<Edge>)>;

    /// All node ids in ascending order
    fn node_ids(&self) -> Vec<NodeId>;

    fn nodes<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Node> + 'a>;

    fn edges<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Edge> + 'a>;

    fn node_count(&self) -> usize;

    fn edge_count(&self) -> usize;

    /// Nodes whose display name matches, case-insensitively
    fn find_by_name(&self, name: &str) -> Vec<&Node> {
        let wanted = lineage_core::node::canonicalize(name);
        let mut found: Vec<&Node> = self
            .nodes()
            .filter(|n| lineage_core::node::canonicalize(&n.name) == wanted)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Nodes whose source-system path matches after canonicalization
    fn find_by_path(&self, path: &str) -> Vec<&Node> {
        let wanted = lineage_core::node::canonicalize(path);
        let mut found: Vec<&Node> = self
            .nodes()
            .filter(|n| lineage_core::node::canonicalize(&n.path) == wanted)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}
