// SPDX-License-Identifier: GPL-3.0-only

//! Stream-to-stream transform registry and path resolution

use super::lazy::LazyExtrinsics;
use crate::calibration::Extrinsics;
use crate::stream::{StreamId, StreamProfile, StreamRef};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, trace};

/// Graph-local node index
///
/// Assigned from a monotonic counter and never reused, so a pruned stream's
/// index cannot be confused with a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// One direction of an edge. An empty slot marks that the opposite
/// direction was registered.
#[derive(Debug, Clone, Default)]
struct EdgeSlot(Option<Weak<LazyExtrinsics>>);

impl EdgeSlot {
    fn live(lazy: &Arc<LazyExtrinsics>) -> Self {
        Self(Some(Arc::downgrade(lazy)))
    }

    fn upgrade(&self) -> Option<Arc<LazyExtrinsics>> {
        self.0.as_ref().and_then(Weak::upgrade)
    }

    fn is_live(&self) -> bool {
        self.0.as_ref().is_some_and(|w| w.strong_count() > 0)
    }
}

#[derive(Debug)]
struct Node {
    stream_id: StreamId,
    stream: Weak<dyn StreamProfile>,
    edges: BTreeMap<NodeId, EdgeSlot>,
}

/// Edge holder owned by the graph itself (constant and override edges)
#[derive(Debug)]
struct OwnedEdge {
    from: NodeId,
    to: NodeId,
    holder: Arc<LazyExtrinsics>,
}

/// Resolved step of a search, holding its edge alive for the duration
enum Step {
    Forward(Arc<LazyExtrinsics>),
    Inverse(Arc<LazyExtrinsics>),
}

impl Step {
    fn evaluate(&self) -> Extrinsics {
        match self {
            Step::Forward(lazy) => *lazy.get(),
            Step::Inverse(lazy) => lazy.get().inverse(),
        }
    }
}

type Adjacency = BTreeMap<NodeId, Vec<(NodeId, Step)>>;

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, Node>,
    by_stream: HashMap<StreamId, NodeId>,
    next_node: u32,
    owned: Vec<OwnedEdge>,
}

impl GraphState {
    fn find(&self, stream: &dyn StreamProfile) -> Option<NodeId> {
        self.by_stream.get(&stream.unique_id()).copied()
    }

    fn find_or_insert(&mut self, stream: &StreamRef) -> NodeId {
        if let Some(id) = self.find(stream.as_ref()) {
            return id;
        }
        let id = NodeId(self.next_node);
        self.next_node += 1;
        let stream_id = stream.unique_id();
        self.nodes.insert(
            id,
            Node {
                stream_id,
                stream: Arc::downgrade(stream),
                edges: BTreeMap::new(),
            },
        );
        self.by_stream.insert(stream_id, id);
        debug!(stream = %stream_id, node = id.0, "Registered stream node");
        id
    }

    /// Store `lazy` weakly on `from -> to` and make sure the reverse slot exists
    fn link(&mut self, from: NodeId, to: NodeId, lazy: &Arc<LazyExtrinsics>) {
        if let Some(node) = self.nodes.get_mut(&from) {
            node.edges.insert(to, EdgeSlot::live(lazy));
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.edges.entry(from).or_default();
        }
    }

    /// Drop expired streams, their edges, and edge slots whose transforms
    /// are gone in both directions. Returns the number of nodes removed.
    fn prune(&mut self) -> usize {
        let dead: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stream.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            if let Some(node) = self.nodes.remove(id) {
                trace!(stream = %node.stream_id, node = id.0, "Pruned expired stream");
            }
        }

        let nodes = &self.nodes;
        self.by_stream.retain(|_, id| nodes.contains_key(id));
        self.owned
            .retain(|e| nodes.contains_key(&e.from) && nodes.contains_key(&e.to));

        let live: HashSet<(NodeId, NodeId)> = self
            .nodes
            .iter()
            .flat_map(|(from, node)| {
                node.edges
                    .iter()
                    .filter(|(_, slot)| slot.is_live())
                    .map(move |(to, _)| (*from, *to))
            })
            .filter(|(_, to)| self.nodes.contains_key(to))
            .collect();
        for (from, node) in self.nodes.iter_mut() {
            node.edges
                .retain(|to, _| live.contains(&(*from, *to)) || live.contains(&(*to, *from)));
        }

        dead.len()
    }

    /// Strong copy of every usable step, neighbors in ascending node order
    fn snapshot(&self) -> Adjacency {
        let mut adjacency = Adjacency::new();
        for (id, node) in &self.nodes {
            let mut steps = Vec::with_capacity(node.edges.len());
            for (to, slot) in &node.edges {
                let Some(target) = self.nodes.get(to) else {
                    continue;
                };
                if let Some(forward) = slot.upgrade() {
                    steps.push((*to, Step::Forward(forward)));
                } else if let Some(reverse) = target.edges.get(id).and_then(EdgeSlot::upgrade) {
                    steps.push((*to, Step::Inverse(reverse)));
                }
            }
            adjacency.insert(*id, steps);
        }
        adjacency
    }
}

/// Depth-first search over a snapshot, composing transforms on the way
///
/// Neighbors are tried in ascending node order and the first path found wins.
/// Edges are only evaluated when the search actually steps across them.
fn search(adjacency: &Adjacency, from: NodeId, to: NodeId) -> Option<Extrinsics> {
    let mut visited = BTreeSet::new();
    // (node, transform from the origin to the parent, step from the parent)
    let mut stack: Vec<(NodeId, Extrinsics, Option<&Step>)> =
        vec![(from, Extrinsics::IDENTITY, None)];

    while let Some((node, parent, step)) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        let acc = match step {
            Some(step) => parent.then(&step.evaluate()),
            None => parent,
        };
        let Some(steps) = adjacency.get(&node) else {
            continue;
        };
        if let Some((_, direct)) = steps.iter().find(|(next, _)| *next == to) {
            return Some(acc.then(&direct.evaluate()));
        }
        for (next, step) in steps.iter().rev() {
            if !visited.contains(next) {
                stack.push((*next, acc, Some(step)));
            }
        }
    }
    None
}

/// Token that defers pruning while any is outstanding
///
/// Tokens nest: pruning resumes once the last one is dropped.
#[derive(Debug)]
pub struct GraphLock {
    count: Arc<AtomicUsize>,
}

impl Drop for GraphLock {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Registry of rigid transforms between streams
///
/// Safe to share between threads. Edge producers may call back into the
/// graph: resolution evaluates edges without holding the internal mutex.
pub struct TransformGraph {
    state: Mutex<GraphState>,
    locks: Arc<AtomicUsize>,
    identity: Arc<LazyExtrinsics>,
}

impl Default for TransformGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransformGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("locks", &self.locks.load(Ordering::Acquire))
            .finish()
    }
}

impl TransformGraph {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            locks: Arc::new(AtomicUsize::new(0)),
            identity: Arc::new(LazyExtrinsics::from_value(Extrinsics::IDENTITY)),
        }
    }

    fn state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// State with expired entries pruned, unless a [`GraphLock`] is held
    fn pruned_state(&self) -> MutexGuard<'_, GraphState> {
        let mut state = self.state();
        if self.locks.load(Ordering::Acquire) == 0 {
            state.prune();
        }
        state
    }

    /// Defer pruning until the returned token (and every other) is dropped
    pub fn lock(&self) -> GraphLock {
        self.locks.fetch_add(1, Ordering::AcqRel);
        GraphLock {
            count: Arc::clone(&self.locks),
        }
    }

    /// Add `stream` as a node without any edges
    pub fn register_stream(&self, stream: &StreamRef) -> NodeId {
        self.pruned_state().find_or_insert(stream)
    }

    /// Declare that `from` and `to` share a coordinate frame
    pub fn register_same_transform(&self, from: &StreamRef, to: &StreamRef) {
        let identity = Arc::clone(&self.identity);
        self.register_transform(from, to, &identity);
    }

    /// Store a caller-owned lazy transform on `from -> to`
    ///
    /// The graph keeps only a weak handle: once the caller drops every strong
    /// reference the edge disappears.
    pub fn register_transform(&self, from: &StreamRef, to: &StreamRef, lazy: &Arc<LazyExtrinsics>) {
        if from.unique_id() == to.unique_id() {
            debug!(stream = %from.unique_id(), "Ignoring self edge");
            return;
        }
        let mut state = self.pruned_state();
        let a = state.find_or_insert(from);
        let b = state.find_or_insert(to);
        state.link(a, b, lazy);
        debug!(from = a.0, to = b.0, "Registered transform");
    }

    /// Store a fixed transform on `from -> to`, owned by the graph
    pub fn register_constant_transform(&self, from: &StreamRef, to: &StreamRef, extrinsics: Extrinsics) {
        if from.unique_id() == to.unique_id() {
            debug!(stream = %from.unique_id(), "Ignoring self edge");
            return;
        }
        let holder = Arc::new(LazyExtrinsics::from_value(extrinsics));
        let mut state = self.pruned_state();
        let a = state.find_or_insert(from);
        let b = state.find_or_insert(to);
        state.link(a, b, &holder);
        // A re-registered pair supersedes its previous holder
        state.owned.retain(|e| !(e.from == a && e.to == b));
        state.owned.push(OwnedEdge { from: a, to: b, holder });
        debug!(from = a.0, to = b.0, "Registered constant transform");
    }

    /// Replace whatever is known between `from` and `to` with `extrinsics`
    ///
    /// Both directions are cleared first, so a stale reverse edge cannot win
    /// against the override.
    pub fn override_transform(&self, from: &StreamRef, to: &StreamRef, extrinsics: Extrinsics) {
        if from.unique_id() == to.unique_id() {
            return;
        }
        {
            let mut state = self.pruned_state();
            let a = state.find_or_insert(from);
            let b = state.find_or_insert(to);
            for (x, y) in [(a, b), (b, a)] {
                if let Some(node) = state.nodes.get_mut(&x) {
                    node.edges.remove(&y);
                }
            }
            state
                .owned
                .retain(|e| !((e.from == a && e.to == b) || (e.from == b && e.to == a)));
            debug!(from = a.0, to = b.0, "Overriding transform");
        }
        self.register_constant_transform(from, to, extrinsics);
    }

    /// Transform mapping points in `from`'s frame to `to`'s frame
    ///
    /// `None` when no path connects the two streams. A stream always resolves
    /// to identity against itself.
    pub fn resolve(&self, from: &StreamRef, to: &StreamRef) -> Option<Extrinsics> {
        if from.unique_id() == to.unique_id() {
            return Some(Extrinsics::IDENTITY);
        }

        let (a, b, adjacency) = {
            let state = self.pruned_state();
            let a = state.find(from.as_ref())?;
            let b = state.find(to.as_ref())?;
            (a, b, state.snapshot())
        };

        // Edges may re-enter the graph while being evaluated
        let _guard = self.lock();
        let result = search(&adjacency, a, b);
        trace!(from = a.0, to = b.0, found = result.is_some(), "Resolved transform");
        result
    }

    /// Prune expired streams and edges now. Returns the number of nodes
    /// removed, zero while a [`GraphLock`] is held.
    pub fn prune(&self) -> usize {
        let mut state = self.state();
        if self.locks.load(Ordering::Acquire) > 0 {
            return 0;
        }
        state.prune()
    }

    /// Number of stream nodes currently stored, expired ones included
    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    /// Number of directed edges with a live transform
    pub fn edge_count(&self) -> usize {
        self.state()
            .nodes
            .values()
            .flat_map(|n| n.edges.values())
            .filter(|slot| slot.is_live())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Intrinsics;
    use crate::graph::Lazy;
    use crate::stream::{Context, StreamKind};
    use std::sync::atomic::AtomicBool;

    const EPS: f32 = 1e-5;

    fn stream(ctx: &Context) -> StreamRef {
        ctx.create_video_stream(
            StreamKind::Depth,
            Intrinsics::pinhole(4, 4, 2.0, 2.0, 2.0, 2.0),
        )
    }

    #[test]
    fn test_same_stream_is_identity() {
        let ctx = Context::new();
        let a = stream(&ctx);
        let graph = ctx.transform_graph();
        assert_eq!(graph.resolve(&a, &a), Some(Extrinsics::IDENTITY));
    }

    #[test]
    fn test_reregistered_constant_replaces_holder() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b) = (stream(&ctx), stream(&ctx));
        for i in 1..=5 {
            let t = Extrinsics::from_translation([i as f32 * 0.01, 0.0, 0.0]);
            graph.register_constant_transform(&a, &b, t);
        }
        assert_eq!(graph.state().owned.len(), 1);
        let latest = Extrinsics::from_translation([0.05, 0.0, 0.0]);
        assert!(graph.resolve(&a, &b).unwrap().approx_eq(&latest, EPS));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_reverse_edge_is_inverted() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b) = (stream(&ctx), stream(&ctx));
        let t = Extrinsics::from_axis_angle([0.0, 1.0, 0.0], 0.1, [0.05, 0.0, 0.0]);
        let edge = Arc::new(LazyExtrinsics::from_value(t));
        graph.register_transform(&a, &b, &edge);

        let forward = graph.resolve(&a, &b).unwrap();
        let back = graph.resolve(&b, &a).unwrap();
        assert!(forward.approx_eq(&t, EPS));
        assert!(back.approx_eq(&t.inverse(), EPS));
    }

    #[test]
    fn test_transitive_in_both_directions() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b, c) = (stream(&ctx), stream(&ctx), stream(&ctx));
        let ab = Arc::new(LazyExtrinsics::from_value(Extrinsics::from_translation([
            0.1, 0.0, 0.0,
        ])));
        let bc = Arc::new(LazyExtrinsics::from_value(Extrinsics::from_axis_angle(
            [0.0, 0.0, 1.0],
            0.5,
            [0.0, 0.2, 0.0],
        )));
        graph.register_transform(&a, &b, &ab);
        graph.register_transform(&b, &c, &bc);

        let expected = ab.get().then(bc.get());
        assert!(graph.resolve(&a, &c).unwrap().approx_eq(&expected, EPS));
        assert!(
            graph
                .resolve(&c, &a)
                .unwrap()
                .approx_eq(&expected.inverse(), EPS)
        );
    }

    #[test]
    fn test_unconnected_streams_do_not_resolve() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b) = (stream(&ctx), stream(&ctx));
        assert_eq!(graph.resolve(&a, &b), None);
    }

    #[test]
    fn test_dropped_edge_expires() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b) = (stream(&ctx), stream(&ctx));
        let edge = Arc::new(LazyExtrinsics::from_value(Extrinsics::IDENTITY));
        graph.register_transform(&a, &b, &edge);
        assert!(graph.resolve(&a, &b).is_some());

        drop(edge);
        assert_eq!(graph.resolve(&a, &b), None);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_constant_edge_is_owned_by_graph() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b) = (stream(&ctx), stream(&ctx));
        graph.register_constant_transform(&a, &b, Extrinsics::from_translation([0.0, 0.0, 1.0]));
        graph.register_same_transform(&b, &a);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.resolve(&a, &b).is_some());
    }

    #[test]
    fn test_dropped_stream_is_pruned() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let a = stream(&ctx);
        {
            let b = stream(&ctx);
            graph.register_constant_transform(&a, &b, Extrinsics::IDENTITY);
            assert_eq!(graph.node_count(), 2);
        }
        assert_eq!(graph.prune(), 1);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_lock_defers_pruning() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let a = stream(&ctx);
        let b = stream(&ctx);
        let outer = graph.lock();
        let inner = graph.lock();
        drop(b);

        assert_eq!(graph.prune(), 0);
        assert_eq!(graph.node_count(), 2);
        // Registration does not prune either
        let _c = stream(&ctx);
        assert_eq!(graph.node_count(), 3);

        drop(inner);
        assert_eq!(graph.prune(), 0);
        drop(outer);
        assert_eq!(graph.prune(), 1);
        let _ = a;
    }

    #[test]
    fn test_override_replaces_reverse_edge() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b) = (stream(&ctx), stream(&ctx));
        graph.register_constant_transform(&b, &a, Extrinsics::from_translation([1.0, 0.0, 0.0]));
        let replacement = Extrinsics::from_translation([0.0, 2.0, 0.0]);
        graph.override_transform(&a, &b, replacement);

        assert!(graph.resolve(&a, &b).unwrap().approx_eq(&replacement, EPS));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_first_path_in_node_order_wins() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b, c, d) = (stream(&ctx), stream(&ctx), stream(&ctx), stream(&ctx));
        // a -> b -> d and a -> c -> d; b was registered before c
        graph.register_constant_transform(&a, &b, Extrinsics::from_translation([1.0, 0.0, 0.0]));
        graph.register_constant_transform(&a, &c, Extrinsics::from_translation([0.0, 1.0, 0.0]));
        graph.register_constant_transform(&b, &d, Extrinsics::IDENTITY);
        graph.register_constant_transform(&c, &d, Extrinsics::IDENTITY);

        let resolved = graph.resolve(&a, &d).unwrap();
        assert!(resolved.approx_eq(&Extrinsics::from_translation([1.0, 0.0, 0.0]), EPS));
    }

    #[test]
    fn test_unused_edges_are_not_evaluated() {
        let ctx = Context::new();
        let graph = ctx.transform_graph();
        let (a, b, c) = (stream(&ctx), stream(&ctx), stream(&ctx));
        let touched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&touched);
        let unused = Arc::new(Lazy::new(move || {
            flag.store(true, Ordering::SeqCst);
            Extrinsics::IDENTITY
        }));
        graph.register_same_transform(&a, &b);
        graph.register_transform(&a, &c, &unused);

        assert!(graph.resolve(&a, &b).is_some());
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[test]
    fn test_edge_may_reenter_graph() {
        let ctx = Context::new();
        let (a, b, c) = (stream(&ctx), stream(&ctx), stream(&ctx));
        ctx.transform_graph()
            .register_constant_transform(&a, &b, Extrinsics::from_translation([0.3, 0.0, 0.0]));

        // b -> c is defined as the inverse of a -> b, looked up on demand
        let inner_ctx = ctx.clone();
        let (ia, ib) = (Arc::clone(&a), Arc::clone(&b));
        let derived = Arc::new(Lazy::new(move || {
            inner_ctx
                .transform_graph()
                .resolve(&ib, &ia)
                .unwrap_or_default()
        }));
        ctx.transform_graph().register_transform(&b, &c, &derived);

        let resolved = ctx.transform_graph().resolve(&a, &c).unwrap();
        assert!(resolved.is_identity(EPS));
    }
}
