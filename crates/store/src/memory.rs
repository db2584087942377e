//! In-memory graph store
//!
//! Arena-style tables addressed by stable identifiers: nodes and edges live
//! in maps keyed by their ids, and adjacency is kept as id sets per node.
//! Cycles are ordinary data here.

use crate::adapter::{Direction, GraphStore, Neighbor, Neighbors, RelationshipFilter};
use crate::{Result, StoreError};
use lineage_core::{Edge, EdgeId, EdgeRecord, Node, NodeId, NodeRecord, Observation};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,
    outgoing: HashMap<NodeId, BTreeSet<EdgeId>>,
    incoming: HashMap<NodeId, BTreeSet<EdgeId>>,
    node_limit: Option<usize>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: refuse to grow past `limit` nodes
    pub fn with_capacity_limit(mut self, limit: usize) -> Self {
        self.node_limit = Some(limit);
        self
    }

    fn ensure_room(&self) -> Result<()> {
        match self.node_limit {
            Some(limit) if self.nodes.len() >= limit => Err(StoreError::CapacityExceeded { limit }),
            _ => Ok(()),
        }
    }

    fn check_endpoints(&self, id: &EdgeId, source: &NodeId, target: &NodeId) -> Result<()> {
        for endpoint in [source, target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(StoreError::DanglingReference {
                    edge: id.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    fn link(&mut self, edge: &Edge) {
        self.outgoing
            .entry(edge.source_id.clone())
            .or_default()
            .insert(edge.id.clone());
        self.incoming
            .entry(edge.target_id.clone())
            .or_default()
            .insert(edge.id.clone());
    }

    fn unlink(&mut self, edge: &Edge) {
        if let Some(ids) = self.outgoing.get_mut(&edge.source_id) {
            ids.remove(&edge.id);
            if ids.is_empty() {
                self.outgoing.remove(&edge.source_id);
            }
        }
        if let Some(ids) = self.incoming.get_mut(&edge.target_id) {
            ids.remove(&edge.id);
            if ids.is_empty() {
                self.incoming.remove(&edge.target_id);
            }
        }
    }
}

impl GraphStore for MemoryGraphStore {
    fn upsert_node(&mut self, record: &NodeRecord, observation: &Observation) -> Result<NodeId> {
        let id = record.node_id();
        match self.nodes.get_mut(&id) {
            Some(existing) => {
                existing.absorb(record, observation);
                trace!(node = %id, "updated node");
            }
            None => {
                self.ensure_room()?;
                self.nodes.insert(id.clone(), Node::from_record(record, observation));
                trace!(node = %id, "created node");
            }
        }
        Ok(id)
    }

    fn upsert_edge(&mut self, record: &EdgeRecord, observation: &Observation) -> Result<EdgeId> {
        let id = record.edge_id();
        self.check_endpoints(&id, &record.source_id, &record.target_id)?;

        match self.edges.get_mut(&id) {
            Some(existing) => existing.absorb(record, observation),
            None => {
                let edge = Edge::from_record(record, observation);
                self.link(&edge);
                self.edges.insert(id.clone(), edge);
            }
        }
        Ok(id)
    }

    fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn get_edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    fn neighbors<'a>(
        &'a self,
        id: &NodeId,
        direction: Direction,
        filter: &RelationshipFilter,
    ) -> Result<Neighbors<'a>> {
        if !self.nodes.contains_key(id) {
            return Err(StoreError::NodeNotFound(id.clone()));
        }

        let adjacency = match direction {
            Direction::Downstream => &self.outgoing,
            Direction::Upstream => &self.incoming,
        };

        let mut edges: Vec<&'a Edge> = adjacency
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .filter(|edge| filter.matches(edge.relationship))
            .collect();
        edges.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));

        let nodes = &self.nodes;
        Ok(Box::new(edges.into_iter().filter_map(move |edge| {
            let far = match direction {
                Direction::Downstream => &edge.target_id,
                Direction::Upstream => &edge.source_id,
            };
            nodes.get(far).map(|node| Neighbor { edge, node })
        })))
    }

    fn put_node(&mut self, node: Node) -> Result<()> {
        if !self.nodes.contains_key(&node.id) {
            self.ensure_room()?;
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn put_edge(&mut self, edge: Edge) -> Result<()> {
        self.check_endpoints(&edge.id, &edge.source_id, &edge.target_id)?;
        if let Some(previous) = self.edges.remove(&edge.id) {
            self.unlink(&previous);
        }
        self.link(&edge);
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    fn delete_edge(&mut self, id: &EdgeId) -> Result<Edge> {
        let edge = self
            .edges
            .remove(id)
            .ok_or_else(|| StoreError::EdgeNotFound(id.clone()))?;
        self.unlink(&edge);
        Ok(edge)
    }

    fn delete_node(&mut self, id: &NodeId) -> Result<(Node, Vec<Edge>)> {
        if !self.nodes.contains_key(id) {
            return Err(StoreError::NodeNotFound(id.clone()));
        }

        let incident: BTreeSet<EdgeId> = self
            .outgoing
            .get(id)
            .into_iter()
            .chain(self.incoming.get(id))
            .flatten()
            .cloned()
            .collect();

        let mut removed = Vec::with_capacity(incident.len());
        for edge_id in incident {
            removed.push(self.delete_edge(&edge_id)?);
        }

        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.clone()))?;
        Ok((node, removed))
    }

    fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn nodes<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Node> + 'a> {
        Box::new(self.nodes.values())
    }

    fn edges<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Edge> + 'a> {
        Box::new(self.edges.values())
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
