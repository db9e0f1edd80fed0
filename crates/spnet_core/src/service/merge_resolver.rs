//! Per-viewer merge consensus resolver.
//!
//! # Responsibility
//! - Resolve a topic to its effective canonical topic for one viewer.
//! - Optionally memoize results per viewer behind the merge graph
//!   generation counter.
//!
//! # Invariants
//! - Resolution is deterministic and terminates on any graph shape: every
//!   hop visits a topic not yet on the path, or stops.
//! - `canonicalize(canonicalize(t, v), v) == canonicalize(t, v)`.
//! - A cached entry is used only while the stored generation equals the
//!   current merge graph generation.
//! - Cached entries are keyed by threshold as well as viewer, so resolvers
//!   with different thresholds can share one cache.
//!
//! # Edge choice per hop
//! 1. The viewer's own non-blocking proposals, smallest target first.
//! 2. Otherwise proposals whose supporters among the engaged members of
//!    the source topic meet the threshold, unless the viewer blocked that
//!    exact pair; smallest target first.

use crate::model::merge::{MergeEdge, MergeThreshold};
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::repo::merge_repo::MergeRepository;
use crate::repo::RepoError;
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

/// Errors from canonicalization.
#[derive(Debug)]
pub enum ResolveError {
    /// Requested topic does not exist.
    TopicNotFound(TopicId),
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TopicNotFound(id) => write!(f, "topic not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::TopicNotFound(_) => None,
        }
    }
}

impl From<RepoError> for ResolveError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Full outcome of one resolution walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Effective topic for the viewer.
    pub canonical: TopicId,
    /// Topics visited in order, starting with the requested topic.
    pub path: Vec<TopicId>,
    /// The walk reached a topic already on the path; `canonical` is then
    /// the smallest id among the cycle's topics.
    pub cycle_detected: bool,
}

#[derive(Debug, Default)]
struct ViewerEntry {
    generation: i64,
    /// Keyed by `(threshold bits, topic)`.
    canonical: HashMap<(u64, TopicId), TopicId>,
}

/// Shared per-viewer memo of canonicalization results.
///
/// Share one instance (via `Arc`) between resolvers that read the same
/// database. Results computed under different thresholds never mix.
#[derive(Debug, Default)]
pub struct CanonicalCache {
    viewers: Mutex<HashMap<UserId, ViewerEntry>>,
}

impl CanonicalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached viewer.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of viewers with a cached entry.
    pub fn cached_viewers(&self) -> usize {
        self.lock().len()
    }

    fn get(
        &self,
        viewer: UserId,
        threshold: MergeThreshold,
        generation: i64,
        topic: TopicId,
    ) -> Option<TopicId> {
        let mut viewers = self.lock();
        let entry = viewers.get(&viewer)?;
        if entry.generation != generation {
            viewers.remove(&viewer);
            return None;
        }
        entry
            .canonical
            .get(&(threshold.value().to_bits(), topic))
            .copied()
    }

    fn store(
        &self,
        viewer: UserId,
        threshold: MergeThreshold,
        generation: i64,
        path: &[TopicId],
        canonical: TopicId,
    ) {
        let mut viewers = self.lock();
        let entry = viewers.entry(viewer).or_default();
        if entry.generation != generation {
            entry.generation = generation;
            entry.canonical.clear();
        }
        let bits = threshold.value().to_bits();
        for topic in path {
            entry.canonical.insert((bits, *topic), canonical);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, ViewerEntry>> {
        match self.viewers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // The memo may be half-written; start over empty.
                warn!("event=canonical_cache_reset module=merge status=recovered reason=poisoned");
                let mut guard = poisoned.into_inner();
                guard.clear();
                self.viewers.clear_poison();
                guard
            }
        }
    }
}

/// Merge consensus resolver over a merge graph repository.
pub struct MergeResolver<R: MergeRepository> {
    repo: R,
    threshold: MergeThreshold,
    cache: Option<Arc<CanonicalCache>>,
}

impl<R: MergeRepository> MergeResolver<R> {
    /// Creates an uncached resolver.
    pub fn new(repo: R, threshold: MergeThreshold) -> Self {
        Self {
            repo,
            threshold,
            cache: None,
        }
    }

    /// Attaches a shared per-viewer cache.
    pub fn with_cache(mut self, cache: Arc<CanonicalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn threshold(&self) -> MergeThreshold {
        self.threshold
    }

    /// Effective canonical topic of `topic` as seen by `viewer`.
    pub fn canonicalize(&self, topic: TopicId, viewer: UserId) -> Result<TopicId, ResolveError> {
        let Some(cache) = self.cache.as_ref() else {
            return Ok(self.resolve(topic, viewer)?.canonical);
        };

        let generation = self.repo.graph_generation()?;
        if let Some(canonical) = cache.get(viewer, self.threshold, generation, topic) {
            return Ok(canonical);
        }
        let resolution = self.resolve(topic, viewer)?;
        cache.store(
            viewer,
            self.threshold,
            generation,
            &resolution.path,
            resolution.canonical,
        );
        Ok(resolution.canonical)
    }

    /// Canonicalizes every topic in `topics` for `viewer`.
    pub fn canonicalize_all<'a>(
        &self,
        topics: impl IntoIterator<Item = &'a TopicId>,
        viewer: UserId,
    ) -> Result<BTreeSet<TopicId>, ResolveError> {
        topics
            .into_iter()
            .map(|topic| self.canonicalize(*topic, viewer))
            .collect()
    }

    /// Walks the active-edge chain from `topic` and reports the path.
    pub fn resolve(&self, topic: TopicId, viewer: UserId) -> Result<Resolution, ResolveError> {
        if !self.repo.topic_exists(topic)? {
            return Err(ResolveError::TopicNotFound(topic));
        }

        let mut path = vec![topic];
        let mut position: HashMap<TopicId, usize> = HashMap::from([(topic, 0)]);
        let mut current = topic;
        while let Some(next) = self.next_hop(current, viewer)? {
            if let Some(&start) = position.get(&next) {
                let canonical = path[start..].iter().copied().min().unwrap_or(next);
                warn!(
                    "event=merge_cycle module=merge status=recovered topic_id={topic} canonical={canonical} cycle_len={}",
                    path.len() - start
                );
                return Ok(Resolution {
                    canonical,
                    path,
                    cycle_detected: true,
                });
            }
            position.insert(next, path.len());
            path.push(next);
            current = next;
        }

        debug!(
            "event=merge_resolve module=merge status=ok topic_id={topic} canonical={current} hops={}",
            path.len() - 1
        );
        Ok(Resolution {
            canonical: current,
            path,
            cycle_detected: false,
        })
    }

    fn next_hop(&self, topic: TopicId, viewer: UserId) -> Result<Option<TopicId>, ResolveError> {
        let edges = self.repo.list_outgoing_edges(topic)?;
        if edges.is_empty() {
            return Ok(None);
        }
        if let Some(target) = own_hop(&edges, viewer) {
            return Ok(Some(target));
        }
        let members: BTreeSet<UserId> = self
            .repo
            .list_engaged_members(topic)?
            .into_iter()
            .collect();
        Ok(consensus_hop(&edges, viewer, &members, self.threshold))
    }
}

/// Smallest target among the viewer's own non-blocking proposals.
fn own_hop(edges: &[MergeEdge], viewer: UserId) -> Option<TopicId> {
    edges
        .iter()
        .filter(|edge| edge.proposer == viewer && edge.supports_merge())
        .map(|edge| edge.to_topic)
        .min()
}

/// Smallest target whose member support meets `threshold` and that the
/// viewer has not blocked.
fn consensus_hop(
    edges: &[MergeEdge],
    viewer: UserId,
    members: &BTreeSet<UserId>,
    threshold: MergeThreshold,
) -> Option<TopicId> {
    let mut supporters: BTreeMap<TopicId, BTreeSet<UserId>> = BTreeMap::new();
    let mut blocked_by_viewer = BTreeSet::new();
    for edge in edges {
        if edge.proposer == viewer && edge.block_merger {
            blocked_by_viewer.insert(edge.to_topic);
        }
        if edge.supports_merge() && members.contains(&edge.proposer) {
            supporters
                .entry(edge.to_topic)
                .or_default()
                .insert(edge.proposer);
        }
    }

    supporters
        .into_iter()
        .filter(|(target, _)| !blocked_by_viewer.contains(target))
        .find(|(_, backers)| threshold.is_met(backers.len(), members.len()))
        .map(|(target, _)| target)
}

#[cfg(test)]
mod tests {
    use super::{consensus_hop, own_hop, CanonicalCache, MergeResolver};
    use crate::model::merge::{MergeEdge, MergeEdgeId, MergeThreshold};
    use crate::model::topic::TopicId;
    use crate::model::user::UserId;
    use crate::model::Version;
    use crate::repo::merge_repo::MergeRepository;
    use crate::repo::RepoResult;
    use std::cell::{Cell, RefCell};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeGraph {
        topics: BTreeSet<TopicId>,
        edges: RefCell<Vec<MergeEdge>>,
        members: BTreeMap<TopicId, Vec<UserId>>,
        generation: Cell<i64>,
        outgoing_reads: Cell<usize>,
    }

    impl FakeGraph {
        fn with_topics(count: usize) -> (Self, Vec<TopicId>) {
            let mut ids: Vec<TopicId> = (0..count).map(|_| Uuid::new_v4()).collect();
            ids.sort();
            let graph = Self {
                topics: ids.iter().copied().collect(),
                ..Self::default()
            };
            (graph, ids)
        }

        fn propose(&self, proposer: UserId, from: TopicId, to: TopicId, block: bool) {
            self.edges.borrow_mut().push(edge(proposer, from, to, block));
            self.generation.set(self.generation.get() + 1);
        }
    }

    impl MergeRepository for &FakeGraph {
        fn upsert_edge(
            &self,
            _: UserId,
            _: TopicId,
            _: TopicId,
            _: bool,
        ) -> RepoResult<MergeEdge> {
            unimplemented!("resolver never writes")
        }

        fn get_edge(&self, _: MergeEdgeId) -> RepoResult<Option<MergeEdge>> {
            Ok(None)
        }

        fn set_block(&self, _: MergeEdgeId, _: bool, _: Version) -> RepoResult<MergeEdge> {
            unimplemented!("resolver never writes")
        }

        fn delete_edge(&self, _: MergeEdgeId, _: Version) -> RepoResult<()> {
            unimplemented!("resolver never writes")
        }

        fn list_edges_between(&self, from: TopicId, to: TopicId) -> RepoResult<Vec<MergeEdge>> {
            Ok(self
                .edges
                .borrow()
                .iter()
                .filter(|edge| edge.from_topic == from && edge.to_topic == to)
                .cloned()
                .collect())
        }

        fn list_outgoing_edges(&self, from: TopicId) -> RepoResult<Vec<MergeEdge>> {
            self.outgoing_reads.set(self.outgoing_reads.get() + 1);
            let mut edges: Vec<MergeEdge> = self
                .edges
                .borrow()
                .iter()
                .filter(|edge| edge.from_topic == from)
                .cloned()
                .collect();
            edges.sort_by_key(|edge| (edge.to_topic, edge.proposer));
            Ok(edges)
        }

        fn topic_exists(&self, id: TopicId) -> RepoResult<bool> {
            Ok(self.topics.contains(&id))
        }

        fn list_engaged_members(&self, topic: TopicId) -> RepoResult<Vec<UserId>> {
            Ok(self.members.get(&topic).cloned().unwrap_or_default())
        }

        fn graph_generation(&self) -> RepoResult<i64> {
            Ok(self.generation.get())
        }
    }

    fn edge(proposer: UserId, from: TopicId, to: TopicId, block: bool) -> MergeEdge {
        MergeEdge {
            id: Uuid::new_v4(),
            proposer,
            from_topic: from,
            to_topic: to,
            block_merger: block,
            created_at: 0,
            updated_at: 0,
            version: 1,
        }
    }

    #[test]
    fn own_hop_prefers_smallest_non_blocking_target() {
        let viewer = Uuid::new_v4();
        let mut targets = [Uuid::new_v4(), Uuid::new_v4()];
        targets.sort();
        let from = Uuid::new_v4();
        let edges = vec![
            edge(viewer, from, targets[1], false),
            edge(viewer, from, targets[0], true),
        ];
        assert_eq!(own_hop(&edges, viewer), Some(targets[1]));

        let edges = vec![
            edge(viewer, from, targets[1], false),
            edge(viewer, from, targets[0], false),
        ];
        assert_eq!(own_hop(&edges, viewer), Some(targets[0]));
    }

    #[test]
    fn consensus_hop_counts_only_members_and_honors_viewer_block() {
        let (a, b, c, viewer) = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let members: BTreeSet<UserId> = [a, b, c].into_iter().collect();
        let majority = MergeThreshold::default();

        let outsider = Uuid::new_v4();
        let edges = vec![edge(a, from, to, false), edge(outsider, from, to, false)];
        assert_eq!(consensus_hop(&edges, viewer, &members, majority), None);

        let edges = vec![edge(a, from, to, false), edge(b, from, to, false)];
        assert_eq!(consensus_hop(&edges, viewer, &members, majority), Some(to));

        let mut blocked = edges.clone();
        blocked.push(edge(viewer, from, to, true));
        assert_eq!(consensus_hop(&blocked, viewer, &members, majority), None);

        assert_eq!(
            consensus_hop(&edges, viewer, &BTreeSet::new(), majority),
            None
        );
    }

    #[test]
    fn two_cycle_resolves_to_smallest_id_for_every_entry_point() {
        let (graph, topics) = FakeGraph::with_topics(2);
        let viewer = Uuid::new_v4();
        graph.propose(viewer, topics[0], topics[1], false);
        graph.propose(viewer, topics[1], topics[0], false);
        let resolver = MergeResolver::new(&graph, MergeThreshold::default());

        for start in &topics {
            let resolution = resolver.resolve(*start, viewer).unwrap();
            assert!(resolution.cycle_detected);
            assert_eq!(resolution.canonical, topics[0]);
        }
    }

    #[test]
    fn long_chain_ending_in_cycle_terminates() {
        let (graph, topics) = FakeGraph::with_topics(6);
        let viewer = Uuid::new_v4();
        for pair in topics.windows(2) {
            graph.propose(viewer, pair[1], pair[0], false);
        }
        // topics[5] -> ... -> topics[0] -> topics[3] closes a 4-cycle.
        graph.propose(viewer, topics[0], topics[3], false);
        let resolver = MergeResolver::new(&graph, MergeThreshold::default());

        let resolution = resolver.resolve(topics[5], viewer).unwrap();
        assert!(resolution.cycle_detected);
        assert_eq!(resolution.canonical, topics[0]);
        assert_eq!(resolution.path.len(), 6);
        assert_eq!(
            resolver.canonicalize(resolution.canonical, viewer).unwrap(),
            resolution.canonical
        );
    }

    #[test]
    fn cache_serves_repeat_reads_until_generation_changes() {
        let (graph, topics) = FakeGraph::with_topics(3);
        let viewer = Uuid::new_v4();
        graph.propose(viewer, topics[2], topics[1], false);
        let cache = Arc::new(CanonicalCache::new());
        let resolver =
            MergeResolver::new(&graph, MergeThreshold::default()).with_cache(cache.clone());

        assert_eq!(resolver.canonicalize(topics[2], viewer).unwrap(), topics[1]);
        let reads = graph.outgoing_reads.get();
        assert_eq!(resolver.canonicalize(topics[2], viewer).unwrap(), topics[1]);
        assert_eq!(graph.outgoing_reads.get(), reads);
        assert_eq!(cache.cached_viewers(), 1);

        graph.propose(viewer, topics[1], topics[0], false);
        assert_eq!(resolver.canonicalize(topics[2], viewer).unwrap(), topics[0]);
        assert!(graph.outgoing_reads.get() > reads);
    }

    #[test]
    fn shared_cache_keeps_thresholds_apart() {
        let (mut graph, topics) = FakeGraph::with_topics(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        graph.members.insert(topics[1], vec![a, b, c]);
        graph.propose(a, topics[1], topics[0], false);
        graph.propose(b, topics[1], topics[0], false);
        let viewer = Uuid::new_v4();
        let cache = Arc::new(CanonicalCache::new());
        let majority =
            MergeResolver::new(&graph, MergeThreshold::default()).with_cache(cache.clone());
        let unanimity = MergeResolver::new(&graph, MergeThreshold::new(1.0).unwrap())
            .with_cache(cache.clone());

        assert_eq!(majority.canonicalize(topics[1], viewer).unwrap(), topics[0]);
        assert_eq!(unanimity.canonicalize(topics[1], viewer).unwrap(), topics[1]);
        assert_eq!(majority.canonicalize(topics[1], viewer).unwrap(), topics[0]);
        assert_eq!(unanimity.canonicalize(topics[1], viewer).unwrap(), topics[1]);
        assert_eq!(cache.cached_viewers(), 1);
    }

    #[test]
    fn poisoned_cache_starts_over_empty() {
        let (graph, topics) = FakeGraph::with_topics(2);
        let viewer = Uuid::new_v4();
        graph.propose(viewer, topics[1], topics[0], false);
        let cache = Arc::new(CanonicalCache::new());
        let resolver =
            MergeResolver::new(&graph, MergeThreshold::default()).with_cache(cache.clone());
        assert_eq!(resolver.canonicalize(topics[1], viewer).unwrap(), topics[0]);
        assert_eq!(cache.cached_viewers(), 1);

        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.viewers.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();

        assert_eq!(cache.cached_viewers(), 0);
        assert!(!cache.viewers.is_poisoned());
        assert_eq!(resolver.canonicalize(topics[1], viewer).unwrap(), topics[0]);
    }
}
