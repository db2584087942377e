//! Lineage Calculator - traversals over a read-consistent graph view
//!
//! Every traversal keeps a visited set, so cycles terminate, and checks its
//! [`TraversalBudget`] each time it visits a node.

use crate::error::LimitReason;
use crate::{EngineConfig, EngineError, Result};
use lineage_core::{Edge, EdgeId, Node, NodeId};
use lineage_store::{Direction, GraphStore, RelationshipFilter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Cooperative cancellation flag shared between a caller and a traversal
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Limits a single traversal runs under
#[derive(Debug, Clone)]
pub struct TraversalBudget {
    pub max_visits: usize,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl TraversalBudget {
    pub fn new(max_visits: usize) -> Self {
        Self {
            max_visits,
            deadline: None,
            cancel: None,
        }
    }

    /// Builder: abort once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Builder: abort `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Builder: abort when `token` is cancelled
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_interrupt(&self, visited: usize) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(EngineError::Cancelled { visited });
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(EngineError::TraversalLimitExceeded {
                visited,
                reason: LimitReason::Deadline,
            });
        }
        Ok(())
    }

    fn check(&self, visited: usize) -> Result<()> {
        self.check_interrupt(visited)?;
        if visited > self.max_visits {
            return Err(EngineError::TraversalLimitExceeded {
                visited,
                reason: LimitReason::Visits,
            });
        }
        Ok(())
    }
}

/// One node reached by a traversal
#[derive(Debug, Clone, Copy)]
pub struct TraversalStep<'a> {
    pub node: &'a Node,
    /// Hops from the start node
    pub depth: usize,
    /// Edge the node was first reached through
    pub via_edge: &'a Edge,
}

/// Lazy breadth-first walk, nearest nodes first
pub struct Traversal<'a, S: ?Sized> {
    store: &'a S,
    direction: Direction,
    filter: RelationshipFilter,
    max_depth: Option<usize>,
    budget: TraversalBudget,
    queue: VecDeque<TraversalStep<'a>>,
    seen: HashSet<&'a NodeId>,
    visited: usize,
    finished: bool,
}

impl<'a, S: GraphStore + ?Sized> Traversal<'a, S> {
    fn start(
        store: &'a S,
        root: &'a Node,
        direction: Direction,
        filter: RelationshipFilter,
        max_depth: Option<usize>,
        budget: TraversalBudget,
    ) -> Result<Self> {
        let mut traversal = Self {
            store,
            direction,
            filter,
            max_depth,
            budget,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            visited: 0,
            finished: false,
        };
        traversal.seen.insert(&root.id);
        traversal.expand(&root.id, 0)?;
        Ok(traversal)
    }

    fn expand(&mut self, id: &NodeId, depth: usize) -> Result<()> {
        if self.max_depth.is_some_and(|max| depth >= max) {
            return Ok(());
        }
        let store = self.store;
        for neighbor in store.neighbors(id, self.direction, &self.filter)? {
            if self.seen.insert(&neighbor.node.id) {
                self.queue.push_back(TraversalStep {
                    node: neighbor.node,
                    depth: depth + 1,
                    via_edge: neighbor.edge,
                });
            }
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<TraversalStep<'a>>> {
        let Some(step) = self.queue.pop_front() else {
            return Ok(None);
        };
        self.visited += 1;
        self.budget.check(self.visited)?;
        self.expand(&step.node.id, step.depth)?;
        Ok(Some(step))
    }
}

impl<'a, S: GraphStore + ?Sized> Iterator for Traversal<'a, S> {
    type Item = Result<TraversalStep<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(step)) => Some(Ok(step)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}

/// A node affected by a change to the impact root
#[derive(Debug, Clone)]
pub struct ImpactEntry<'a> {
    pub node: &'a Node,
    /// Shortest hop distance from the root
    pub distance: usize,
    /// `1 / (1 + distance)`
    pub score: f64,
    /// Number of distinct shortest paths from the root (saturating)
    pub shortest_paths: u64,
}

#[derive(Debug, Clone)]
pub struct ImpactReport<'a> {
    pub root: &'a Node,
    /// Highest score first
    pub entries: Vec<ImpactEntry<'a>>,
}

/// A directed cycle, rotated to start at its smallest node id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleFinding {
    pub nodes: Vec<NodeId>,
}

impl CycleFinding {
    fn normalized(mut nodes: Vec<NodeId>) -> Self {
        if let Some(start) = nodes
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(index, _)| index)
        {
            nodes.rotate_left(start);
        }
        Self { nodes }
    }
}

/// Hop-by-hop route along the data flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineagePath {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
}

impl LineagePath {
    /// Number of hops
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Read-only lineage computations over one store view
pub struct LineageCalculator<'g, S: ?Sized> {
    store: &'g S,
    budget: TraversalBudget,
    max_path_visits: usize,
    filter: RelationshipFilter,
}

impl<'g, S: GraphStore + ?Sized> LineageCalculator<'g, S> {
    pub fn new(store: &'g S, config: &EngineConfig) -> Self {
        let mut budget = TraversalBudget::new(config.max_visited_nodes);
        if let Some(timeout) = config.query_deadline {
            budget = budget.with_timeout(timeout);
        }
        Self {
            store,
            budget,
            max_path_visits: config.max_path_visits,
            filter: RelationshipFilter::all(),
        }
    }

    /// Builder: replace the traversal budget
    pub fn with_budget(mut self, budget: TraversalBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Builder: follow only some relationship kinds
    pub fn with_filter(mut self, filter: RelationshipFilter) -> Self {
        self.filter = filter;
        self
    }

    fn node(&self, id: &NodeId) -> Result<&'g Node> {
        self.store
            .get_node(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.clone()))
    }

    fn walk(&self, id: &NodeId, direction: Direction, max_depth: Option<usize>) -> Result<Traversal<'g, S>> {
        let root = self.node(id)?;
        Traversal::start(
            self.store,
            root,
            direction,
            self.filter.clone(),
            max_depth,
            self.budget.clone(),
        )
    }

    /// Everything `id` is derived from, nearest first
    pub fn upstream(&self, id: &NodeId, max_depth: Option<usize>) -> Result<Traversal<'g, S>> {
        self.walk(id, Direction::Upstream, max_depth)
    }

    /// Everything derived from `id`, nearest first
    pub fn downstream(&self, id: &NodeId, max_depth: Option<usize>) -> Result<Traversal<'g, S>> {
        self.walk(id, Direction::Downstream, max_depth)
    }

    /// Score every node downstream of `id` by proximity
    #[instrument(skip(self), fields(root = %id))]
    pub fn impact_of(&self, id: &NodeId) -> Result<ImpactReport<'g>> {
        let root = self.node(id)?;

        let mut distance: HashMap<&'g NodeId, usize> = HashMap::new();
        let mut paths: HashMap<&'g NodeId, u64> = HashMap::new();
        let mut order: Vec<&'g Node> = Vec::new();
        let mut queue: VecDeque<&'g Node> = VecDeque::new();

        distance.insert(&root.id, 0);
        paths.insert(&root.id, 1);
        queue.push_back(root);
        let mut visited = 0;

        while let Some(current) = queue.pop_front() {
            visited += 1;
            self.budget.check(visited)?;

            let here = distance.get(&current.id).copied().unwrap_or_default();
            let via = paths.get(&current.id).copied().unwrap_or_default();

            for neighbor in self.store.neighbors(&current.id, Direction::Downstream, &self.filter)? {
                let next = &neighbor.node.id;
                match distance.get(next) {
                    None => {
                        distance.insert(next, here + 1);
                        paths.insert(next, via);
                        order.push(neighbor.node);
                        queue.push_back(neighbor.node);
                    }
                    Some(&d) if d == here + 1 => {
                        let count = paths.entry(next).or_default();
                        *count = count.saturating_add(via);
                    }
                    Some(_) => {}
                }
            }
        }

        let mut entries: Vec<ImpactEntry<'g>> = order
            .into_iter()
            .map(|node| {
                let hops = distance.get(&node.id).copied().unwrap_or_default();
                ImpactEntry {
                    node,
                    distance: hops,
                    score: 1.0 / (1.0 + hops as f64),
                    shortest_paths: paths.get(&node.id).copied().unwrap_or_default(),
                }
            })
            .collect();
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(affected = entries.len(), "Impact computed");
        Ok(ImpactReport { root, entries })
    }

    /// Every distinct directed cycle reachable by depth-first search
    #[instrument(skip(self))]
    pub fn detect_cycles(&self) -> Result<Vec<CycleFinding>> {
        enum Mark {
            OnStack(usize),
            Done,
        }

        struct Frame<'a> {
            node: &'a NodeId,
            successors: Vec<&'a NodeId>,
            next: usize,
        }

        let mut marks: HashMap<&'g NodeId, Mark> = HashMap::new();
        let mut path: Vec<&'g NodeId> = Vec::new();
        let mut stack: Vec<Frame<'g>> = Vec::new();
        let mut findings: BTreeSet<CycleFinding> = BTreeSet::new();
        let mut visited = 0;

        for start in self.store.node_ids() {
            let Some(start) = self.store.get_node(&start) else {
                continue;
            };
            if marks.contains_key(&start.id) {
                continue;
            }

            let mut enter = |id: &'g NodeId,
                             marks: &mut HashMap<&'g NodeId, Mark>,
                             path: &mut Vec<&'g NodeId>,
                             stack: &mut Vec<Frame<'g>>|
             -> Result<()> {
                visited += 1;
                self.budget.check(visited)?;
                let successors = self
                    .store
                    .neighbors(id, Direction::Downstream, &self.filter)?
                    .map(|neighbor| &neighbor.node.id)
                    .collect();
                marks.insert(id, Mark::OnStack(path.len()));
                path.push(id);
                stack.push(Frame {
                    node: id,
                    successors,
                    next: 0,
                });
                Ok(())
            };

            enter(&start.id, &mut marks, &mut path, &mut stack)?;

            while let Some(frame) = stack.last_mut() {
                if let Some(&next) = frame.successors.get(frame.next) {
                    frame.next += 1;
                    match marks.get(next) {
                        Some(Mark::OnStack(position)) => {
                            let cycle = path[*position..].iter().map(|id| (*id).clone()).collect();
                            findings.insert(CycleFinding::normalized(cycle));
                        }
                        Some(Mark::Done) => {}
                        None => enter(next, &mut marks, &mut path, &mut stack)?,
                    }
                } else {
                    let node = frame.node;
                    stack.pop();
                    path.pop();
                    marks.insert(node, Mark::Done);
                }
            }
        }

        debug!(cycles = findings.len(), "Cycle detection complete");
        Ok(findings.into_iter().collect())
    }

    /// Fewest-hop route from `from` to `to` along the data flow.
    ///
    /// `None` when `to` is not reachable within the path visit limit.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub fn shortest_path(&self, from: &NodeId, to: &NodeId) -> Result<Option<LineagePath>> {
        let source = self.node(from)?;
        let target = self.node(to)?;
        if source.id == target.id {
            return Ok(Some(LineagePath {
                nodes: vec![source.id.clone()],
                edges: Vec::new(),
            }));
        }

        let mut parents: HashMap<&'g NodeId, (&'g NodeId, &'g EdgeId)> = HashMap::new();
        let mut queue: VecDeque<&'g NodeId> = VecDeque::from([&source.id]);
        let mut seen: HashSet<&'g NodeId> = HashSet::from([&source.id]);
        let mut visited = 0;

        while let Some(current) = queue.pop_front() {
            visited += 1;
            if visited > self.max_path_visits {
                debug!(visited, "Path search gave up");
                return Ok(None);
            }
            self.budget.check_interrupt(visited)?;

            for neighbor in self.store.neighbors(current, Direction::Downstream, &self.filter)? {
                let next = &neighbor.node.id;
                if !seen.insert(next) {
                    continue;
                }
                parents.insert(next, (current, &neighbor.edge.id));
                if next == &target.id {
                    return Ok(Some(Self::unwind(&parents, &source.id, next)));
                }
                queue.push_back(next);
            }
        }

        Ok(None)
    }

    fn unwind(
        parents: &HashMap<&'g NodeId, (&'g NodeId, &'g EdgeId)>,
        from: &NodeId,
        to: &'g NodeId,
    ) -> LineagePath {
        let mut nodes = vec![to.clone()];
        let mut edges = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let Some(&(parent, edge)) = parents.get(cursor) else {
                break;
            };
            edges.push(edge.clone());
            nodes.push(parent.clone());
            cursor = parent;
        }
        nodes.reverse();
        edges.reverse();
        LineagePath { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lineage_core::{BatchId, EdgeRecord, NodeKind, NodeRecord, Observation, Relationship};
    use lineage_store::MemoryGraphStore;

    fn id(name: &str) -> NodeId {
        NodeId::derive("test", name, NodeKind::Dataset)
    }

    /// Build a store from `(from, to)` edge pairs
    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> MemoryGraphStore {
        let obs = Observation {
            batch_id: BatchId::new("test:1"),
            observed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let mut store = MemoryGraphStore::new();
        for name in nodes {
            let record = NodeRecord::new(NodeKind::Dataset, "test", *name, *name).unwrap();
            store.upsert_node(&record, &obs).unwrap();
        }
        for (from, to) in edges {
            let record = EdgeRecord::new(id(from), id(to), Relationship::DerivesFrom, "test").unwrap();
            store.upsert_edge(&record, &obs).unwrap();
        }
        store
    }

    fn names(steps: Traversal<'_, MemoryGraphStore>) -> Vec<(String, usize)> {
        steps
            .map(|step| step.map(|s| (s.node.name.clone(), s.depth)))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_downstream_is_breadth_first() {
        let store = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("a", "d"), ("d", "c")]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default());

        let steps = names(calc.downstream(&id("a"), None).unwrap());
        assert_eq!(
            steps,
            vec![("b".into(), 1), ("d".into(), 1), ("c".into(), 2)]
        );
    }

    #[test]
    fn test_depth_limit_and_upstream() {
        let store = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default());

        assert_eq!(names(calc.downstream(&id("a"), Some(1)).unwrap()), vec![("b".into(), 1)]);
        assert_eq!(
            names(calc.upstream(&id("c"), None).unwrap()),
            vec![("b".into(), 1), ("a".into(), 2)]
        );
        assert!(names(calc.downstream(&id("a"), Some(0)).unwrap()).is_empty());
    }

    #[test]
    fn test_traversal_terminates_on_cycle() {
        let store = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default());
        assert_eq!(names(calc.downstream(&id("a"), None).unwrap()), vec![("b".into(), 1)]);
    }

    #[test]
    fn test_unknown_node() {
        let store = graph(&["a"], &[]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default());
        assert!(matches!(calc.upstream(&id("zzz"), None), Err(EngineError::NodeNotFound(_))));
        assert!(matches!(calc.impact_of(&id("zzz")), Err(EngineError::NodeNotFound(_))));
    }

    #[test]
    fn test_visit_budget() {
        let store = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let config = EngineConfig::default().with_max_visited_nodes(2);
        let calc = LineageCalculator::new(&store, &config);

        let result: Result<Vec<_>> = calc.downstream(&id("a"), None).unwrap().collect();
        assert!(matches!(
            result,
            Err(EngineError::TraversalLimitExceeded { visited: 3, reason: LimitReason::Visits })
        ));
    }

    #[test]
    fn test_cancelled_traversal() {
        let store = graph(&["a", "b"], &[("a", "b")]);
        let token = CancellationToken::new();
        token.cancel();
        let calc = LineageCalculator::new(&store, &EngineConfig::default())
            .with_budget(TraversalBudget::new(100).with_cancel(token));

        let result: Result<Vec<_>> = calc.downstream(&id("a"), None).unwrap().collect();
        assert!(matches!(result, Err(EngineError::Cancelled { .. })));
    }

    #[test]
    fn test_elapsed_deadline() {
        let store = graph(&["a", "b"], &[("a", "b")]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default())
            .with_budget(TraversalBudget::new(100).with_deadline(Instant::now()));

        assert!(matches!(
            calc.impact_of(&id("a")),
            Err(EngineError::TraversalLimitExceeded { reason: LimitReason::Deadline, .. })
        ));
    }

    #[test]
    fn test_impact_scores_and_path_counts() {
        let store = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("d", "a")],
        );
        let calc = LineageCalculator::new(&store, &EngineConfig::default());
        let report = calc.impact_of(&id("a")).unwrap();

        let summary: Vec<(&str, usize, u64)> = report
            .entries
            .iter()
            .map(|e| (e.node.name.as_str(), e.distance, e.shortest_paths))
            .collect();
        assert_eq!(summary, vec![("b", 1, 1), ("c", 1, 1), ("d", 2, 2)]);
        assert_eq!(report.entries[0].score, 0.5);
        assert!((report.entries[2].score - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cycle_detection_normalizes() {
        let store = graph(&["a", "b", "c", "d"], &[("c", "a"), ("a", "b"), ("b", "c"), ("d", "d")]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default());
        let cycles = calc.detect_cycles().unwrap();

        assert_eq!(
            cycles,
            vec![
                CycleFinding { nodes: vec![id("a"), id("b"), id("c")] },
                CycleFinding { nodes: vec![id("d")] },
            ]
        );
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let store = graph(&["a", "b", "c"], &[("a", "b"), ("a", "c"), ("b", "c")]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default());
        assert!(calc.detect_cycles().unwrap().is_empty());
    }

    #[test]
    fn test_shortest_path() {
        let store = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("a", "d"), ("d", "c")]);
        let calc = LineageCalculator::new(&store, &EngineConfig::default());

        let path = calc.shortest_path(&id("a"), &id("c")).unwrap().unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.nodes.first(), Some(&id("a")));
        assert_eq!(path.nodes.last(), Some(&id("c")));

        let same = calc.shortest_path(&id("b"), &id("b")).unwrap().unwrap();
        assert!(same.is_empty());
        assert_eq!(same.nodes, vec![id("b")]);

        assert_eq!(calc.shortest_path(&id("c"), &id("a")).unwrap(), None);
    }

    #[test]
    fn test_shortest_path_visit_limit() {
        let store = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let config = EngineConfig::default().with_max_path_visits(2);
        let calc = LineageCalculator::new(&store, &config);
        assert_eq!(calc.shortest_path(&id("a"), &id("d")).unwrap(), None);
        assert!(calc.shortest_path(&id("a"), &id("c")).unwrap().is_some());
    }
}
