//! Discriminator-keyed container tree
//!
//! Every sample is routed through one branch per [`Level`] down to a leaf
//! that maps identifiers to [`Series`].
//!
//! # Design
//!
//! - Each node's children live in their own `DashMap`, so growth at one node
//!   never blocks routing through an unrelated node.
//! - Resolution is get-then-`entry().or_insert_with()`: two threads resolving
//!   the same new discriminator end up sharing one subtree.
//! - Inserts hold the structure gate for reading. Reaping, removal and
//!   clearing take it for writing before pruning nodes, so a series is never
//!   detached while a sample is being appended to it.
//! - Queries take no gate. They work on `Arc` handles, which stay valid if a
//!   node is pruned mid-query.

use dashmap::DashMap;
use lad_core::{
    Completeness, ComponentKey, Discriminator, DiscriminatorFilter, IdentifierPattern, LadQuery,
    LadResult, Level, QueryRecord, QueryResult, QueryType, Record, Sample,
};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use serde::Serialize;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::policy::{PolicyTable, RetentionPolicy};
use crate::series::Series;

/// DashMap with the Fx hasher
pub type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<FxHasher>>;

enum Children {
    Branches {
        level: Level,
        map: FxDashMap<ComponentKey, Arc<BranchNode>>,
    },
    Leaves(FxDashMap<ComponentKey, Arc<LeafNode>>),
}

/// Interior node keyed by one discriminator component
struct BranchNode {
    /// Level whose component keys this node's children
    level: Level,
    children: Children,
}

impl BranchNode {
    fn new(level: Level) -> Self {
        let children = match level.next() {
            Some(next) => Children::Branches {
                level: next,
                map: FxDashMap::default(),
            },
            None => Children::Leaves(FxDashMap::default()),
        };
        BranchNode { level, children }
    }

    fn is_empty(&self) -> bool {
        match &self.children {
            Children::Branches { map, .. } => map.is_empty(),
            Children::Leaves(map) => map.is_empty(),
        }
    }

    /// Remove empty descendants. Returns whether this node is now empty.
    fn prune(&self) -> bool {
        match &self.children {
            Children::Branches { map, .. } => map.retain(|_, child| !child.prune()),
            Children::Leaves(map) => map.retain(|_, leaf| !leaf.series.is_empty()),
        }
        self.is_empty()
    }
}

/// Leaf node: identifier → series for one discriminator
pub struct LeafNode {
    discriminator: Arc<Discriminator>,
    series: FxDashMap<String, Arc<Series>>,
}

impl LeafNode {
    fn new(discriminator: Discriminator) -> Self {
        LeafNode {
            discriminator: Arc::new(discriminator),
            series: FxDashMap::default(),
        }
    }

    /// Discriminator this leaf holds
    pub fn discriminator(&self) -> &Arc<Discriminator> {
        &self.discriminator
    }

    /// Series for `identifier`, created with `policy` if absent
    pub fn series_or_create(&self, identifier: &str, policy: RetentionPolicy) -> Arc<Series> {
        if let Some(existing) = self.series.get(identifier) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .series
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Series::new(identifier, policy)));
        Arc::clone(entry.value())
    }

    /// Series selected by `patterns` (all series when empty)
    fn select(&self, patterns: &[IdentifierPattern]) -> Vec<Arc<Series>> {
        if !patterns.is_empty() && patterns.iter().all(|p| p.as_exact().is_some()) {
            let mut seen = FxHashSet::default();
            return patterns
                .iter()
                .filter_map(|p| p.as_exact())
                .filter(|id| seen.insert(*id))
                .filter_map(|id| self.series.get(id).map(|s| Arc::clone(s.value())))
                .collect();
        }
        self.series
            .iter()
            .filter(|e| patterns.is_empty() || patterns.iter().any(|p| p.matches(e.key())))
            .map(|e| Arc::clone(e.value()))
            .collect()
    }
}

fn child_or_create<T>(
    map: &FxDashMap<ComponentKey, Arc<T>>,
    key: ComponentKey,
    make: impl FnOnce() -> T,
) -> Arc<T> {
    if let Some(existing) = map.get(&key) {
        return Arc::clone(existing.value());
    }
    let entry = map.entry(key).or_insert_with(|| Arc::new(make()));
    Arc::clone(entry.value())
}

/// Occupancy of one series, without sample bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthEntry {
    /// Stream key
    pub discriminator: Arc<Discriminator>,
    /// Identifier
    pub identifier: String,
    /// Samples held
    pub len: usize,
    /// Configured bound
    pub max_count: usize,
}

/// Population of the tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeCounts {
    /// Branch and leaf nodes below the root
    pub containers: usize,
    /// Series
    pub series: usize,
    /// Samples across all series
    pub samples: usize,
}

/// Outcome of a bulk load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkLoad {
    /// Samples inserted
    pub loaded: usize,
    /// Samples rejected (no ERT)
    pub rejected: usize,
    /// Samples evicted while loading
    pub evicted: usize,
}

/// The container hierarchy owned by one store instance
pub struct ContainerTree {
    root: Arc<BranchNode>,
    policies: RwLock<PolicyTable>,
    structure: RwLock<()>,
}

impl ContainerTree {
    /// Create an empty tree
    pub fn new(policies: PolicyTable) -> Self {
        ContainerTree {
            root: Arc::new(BranchNode::new(Level::ORDER[0])),
            policies: RwLock::new(policies),
            structure: RwLock::new(()),
        }
    }

    /// Current policy table
    pub fn policies(&self) -> PolicyTable {
        self.policies.read().clone()
    }

    /// Walk to the leaf for `discriminator`, creating missing nodes
    pub fn resolve(&self, discriminator: &Discriminator) -> Arc<LeafNode> {
        let mut node = Arc::clone(&self.root);
        loop {
            let key = discriminator.component(node.level);
            let next = match &node.children {
                Children::Branches { level, map } => {
                    let level = *level;
                    child_or_create(map, key, || BranchNode::new(level))
                }
                Children::Leaves(map) => {
                    return child_or_create(map, key, || LeafNode::new(discriminator.clone()));
                }
            };
            node = next;
        }
    }

    /// Append a record to its series, creating the path as needed.
    ///
    /// Returns the number of samples evicted from the target series.
    pub fn route(&self, record: Record) -> LadResult<usize> {
        let Record {
            discriminator,
            sample,
        } = record;
        sample.require_ert()?;

        let _gate = self.structure.read();
        let policy = self.policies.read().get(discriminator.query_type);
        let leaf = self.resolve(&discriminator);
        let series = leaf.series_or_create(&sample.identifier, policy);
        series.append(Arc::new(sample))
    }

    /// Load many records, grouping them per series so each series evicts
    /// once. Samples without ERT are counted and skipped.
    pub fn route_batch(&self, records: impl IntoIterator<Item = Record>) -> BulkLoad {
        let mut groups: FxHashMap<(Discriminator, String), Vec<Arc<Sample>>> =
            FxHashMap::default();
        let mut outcome = BulkLoad::default();

        for record in records {
            if record.sample.ert.is_none() {
                outcome.rejected += 1;
                continue;
            }
            let key = (record.discriminator, record.sample.identifier.clone());
            groups.entry(key).or_default().push(Arc::new(record.sample));
        }

        let _gate = self.structure.read();
        let policies = self.policies();
        for ((discriminator, identifier), samples) in groups {
            let count = samples.len();
            let leaf = self.resolve(&discriminator);
            let series =
                leaf.series_or_create(&identifier, policies.get(discriminator.query_type));
            match series.extend(samples) {
                Ok(evicted) => {
                    outcome.loaded += count;
                    outcome.evicted += evicted;
                }
                Err(_) => outcome.rejected += count,
            }
        }
        outcome
    }

    fn leaves(&self, filter: &DiscriminatorFilter) -> Vec<Arc<LeafNode>> {
        let mut out = Vec::new();
        let mut stack = vec![Arc::clone(&self.root)];

        while let Some(node) = stack.pop() {
            let wanted = filter.component(node.level);
            match &node.children {
                Children::Branches { map, .. } => match wanted {
                    Some(key) => {
                        if let Some(child) = map.get(&key) {
                            stack.push(Arc::clone(child.value()));
                        }
                    }
                    None => stack.extend(map.iter().map(|e| Arc::clone(e.value()))),
                },
                Children::Leaves(map) => match wanted {
                    Some(key) => {
                        if let Some(leaf) = map.get(&key) {
                            out.push(Arc::clone(leaf.value()));
                        }
                    }
                    None => out.extend(map.iter().map(|e| Arc::clone(e.value()))),
                },
            }
        }
        out
    }

    /// Every series matching `filter` and `patterns`, with its discriminator
    pub fn series_matching(
        &self,
        filter: &DiscriminatorFilter,
        patterns: &[IdentifierPattern],
    ) -> Vec<(Arc<Discriminator>, Arc<Series>)> {
        let mut out: Vec<(Arc<Discriminator>, Arc<Series>)> = self
            .leaves(filter)
            .into_iter()
            .flat_map(|leaf| {
                let d = Arc::clone(&leaf.discriminator);
                leaf.select(patterns)
                    .into_iter()
                    .map(move |s| (Arc::clone(&d), s))
            })
            .collect();
        out.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.identifier().cmp(b.1.identifier()))
        });
        out
    }

    /// Visit every series in the tree
    pub fn for_each_series(&self, mut f: impl FnMut(&Arc<Discriminator>, &Arc<Series>)) {
        for (d, series) in self.series_matching(&DiscriminatorFilter::all(), &[]) {
            f(&d, &series);
        }
    }

    /// Run a query and merge the per-series results by the query's time type
    pub fn query(&self, query: &LadQuery) -> LadResult<QueryResult> {
        query.validate()?;

        let mut records = Vec::new();
        let mut completeness: Option<Completeness> = None;

        for (discriminator, series) in self.series_matching(&query.filter, &query.identifiers) {
            let samples = series.window(
                query.time_type,
                query.lower_bound,
                query.upper_bound,
                query.max_results,
            );
            let verdict = series.completeness(query.time_type, query.lower_bound);
            completeness = Some(completeness.map_or(verdict, |c| c.merge(verdict)));
            records.extend(samples.into_iter().map(|sample| QueryRecord {
                discriminator: Arc::clone(&discriminator),
                sample,
            }));
        }

        let time_type = query.time_type;
        records.sort_by_key(|r| {
            (
                r.sample.time(time_type),
                r.sample.ert,
                r.sample.provenance.sequence,
            )
        });

        Ok(QueryResult {
            records,
            completeness: completeness.unwrap_or(Completeness::Unknown),
        })
    }

    /// Occupancy of every series matching `filter`
    pub fn depth(&self, filter: &DiscriminatorFilter) -> Vec<DepthEntry> {
        self.series_matching(filter, &[])
            .into_iter()
            .map(|(discriminator, series)| DepthEntry {
                identifier: series.identifier().to_string(),
                len: series.len(),
                max_count: series.policy().max_count,
                discriminator,
            })
            .collect()
    }

    /// Delete every series matching `filter` and `patterns`. Returns the
    /// number of series removed.
    pub fn remove(&self, filter: &DiscriminatorFilter, patterns: &[IdentifierPattern]) -> usize {
        let _gate = self.structure.write();
        let mut removed = 0;
        for leaf in self.leaves(filter) {
            let before = leaf.series.len();
            leaf.series
                .retain(|id, _| !(patterns.is_empty() || patterns.iter().any(|p| p.matches(id))));
            removed += before - leaf.series.len();
        }
        self.root.prune();
        debug!(target: "lad::container", removed, "Removed series");
        removed
    }

    /// Drop everything. Returns the number of series removed.
    pub fn clear(&self) -> usize {
        let _gate = self.structure.write();
        let removed = self.count_series();
        match &self.root.children {
            Children::Branches { map, .. } => map.clear(),
            Children::Leaves(map) => map.clear(),
        }
        debug!(target: "lad::container", removed, "Cleared container tree");
        removed
    }

    /// Drop series with no insert for longer than `idle_ttl` and prune the
    /// nodes left empty. Returns the number of series reaped.
    pub fn reap(&self, idle_ttl: Duration) -> usize {
        let _gate = self.structure.write();
        let now = lad_core::Timestamp::now();
        let mut reaped = 0;
        for leaf in self.leaves(&DiscriminatorFilter::all()) {
            let before = leaf.series.len();
            leaf.series.retain(|_, series| series.idle_for(now) <= idle_ttl);
            reaped += before - leaf.series.len();
        }
        self.root.prune();
        if reaped > 0 {
            debug!(target: "lad::container", reaped, "Reaped idle series");
        }
        reaped
    }

    /// Replace the policy for a query type. Existing series are re-bounded
    /// immediately. Returns the samples evicted by the change.
    ///
    /// Holds the structure gate for writing, so a series created by a
    /// concurrent insert either exists before the change and is re-bounded,
    /// or is created afterwards with the new policy.
    pub fn set_policy(&self, query_type: QueryType, policy: RetentionPolicy) -> usize {
        let _gate = self.structure.write();
        self.policies.write().set(query_type, policy);
        let filter = DiscriminatorFilter::new(Some(query_type), None, None);
        self.series_matching(&filter, &[])
            .iter()
            .map(|(_, series)| series.set_policy(policy))
            .sum()
    }

    fn count_series(&self) -> usize {
        self.leaves(&DiscriminatorFilter::all())
            .iter()
            .map(|leaf| leaf.series.len())
            .sum()
    }

    /// Node, series and sample population
    pub fn counts(&self) -> TreeCounts {
        let mut counts = TreeCounts::default();
        let mut stack = vec![Arc::clone(&self.root)];
        while let Some(node) = stack.pop() {
            match &node.children {
                Children::Branches { map, .. } => {
                    counts.containers += map.len();
                    stack.extend(map.iter().map(|e| Arc::clone(e.value())));
                }
                Children::Leaves(map) => {
                    counts.containers += map.len();
                    for leaf in map.iter() {
                        counts.series += leaf.series.len();
                        counts.samples += leaf.series.iter().map(|s| s.len()).sum::<usize>();
                    }
                }
            }
        }
        counts
    }

    /// Whether the tree holds no series
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

impl Default for ContainerTree {
    fn default() -> Self {
        ContainerTree::new(PolicyTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lad_core::{RecordedState, SampleValue, TimeType, Timestamp, ValueSource};
    use std::thread;

    fn disc(vcid: u32) -> Discriminator {
        Discriminator::new(
            QueryType::ChannelValue,
            ValueSource::Flight,
            RecordedState::Realtime,
        )
        .with_session("gds", 1)
        .with_link(76, vcid, 14)
    }

    fn record(d: &Discriminator, id: &str, ms: u64) -> Record {
        Record::new(
            d.clone(),
            Sample::new(id, Timestamp::from_millis(ms), SampleValue::Unsigned(ms)),
        )
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let tree = ContainerTree::default();
        let a = tree.resolve(&disc(0));
        let b = tree.resolve(&disc(0));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &tree.resolve(&disc(1))));
    }

    #[test]
    fn test_concurrent_resolve_yields_one_subtree() {
        let tree = Arc::new(ContainerTree::default());
        let d = disc(3);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let tree = Arc::clone(&tree);
                let d = d.clone();
                thread::spawn(move || tree.resolve(&d))
            })
            .collect();
        let leaves: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(Arc::ptr_eq(&leaves[0], &leaves[1]));
        // one node per level
        assert_eq!(tree.counts().containers, Level::ORDER.len());
    }

    #[test]
    fn test_route_creates_series_with_query_type_policy() {
        let mut policies = PolicyTable::default();
        policies.set(QueryType::ChannelValue, RetentionPolicy::keep_last(4));
        let tree = ContainerTree::new(policies);
        for ms in 0..10 {
            tree.route(record(&disc(0), "A-1", ms)).unwrap();
        }
        let depth = tree.depth(&DiscriminatorFilter::all());
        assert_eq!(depth.len(), 1);
        assert_eq!(depth[0].max_count, 4);
        assert!(depth[0].len <= 4);
    }

    #[test]
    fn test_route_rejects_missing_ert_without_creating_nodes() {
        let tree = ContainerTree::default();
        let mut r = record(&disc(0), "A-1", 0);
        r.sample.ert = None;
        assert!(tree.route(r).is_err());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_query_wildcards_and_merge_order() {
        let tree = ContainerTree::default();
        tree.route(record(&disc(0), "A-1", 30)).unwrap();
        tree.route(record(&disc(1), "A-1", 10)).unwrap();
        tree.route(record(&disc(2), "B-1", 20)).unwrap();

        let all = tree.query(&LadQuery::new(DiscriminatorFilter::all())).unwrap();
        let times: Vec<u64> = all
            .records
            .iter()
            .map(|r| r.sample.ert.unwrap().as_millis())
            .collect();
        assert_eq!(times, vec![10, 20, 30]);

        let mut filter = DiscriminatorFilter::all();
        filter.virtual_channel_id = Some(1);
        let one = tree.query(&LadQuery::new(filter)).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one.records[0].discriminator.virtual_channel_id, 1);

        let pattern = LadQuery::new(DiscriminatorFilter::all())
            .with_identifiers(vec![IdentifierPattern::parse("A-*").unwrap()]);
        assert_eq!(tree.query(&pattern).unwrap().len(), 2);
    }

    #[test]
    fn test_query_max_results_per_series() {
        let tree = ContainerTree::default();
        for ms in 0..10 {
            tree.route(record(&disc(0), "A-1", ms)).unwrap();
            tree.route(record(&disc(0), "A-2", ms)).unwrap();
        }
        let result = tree
            .query(&LadQuery::new(DiscriminatorFilter::all()).with_max_results(3))
            .unwrap();
        assert_eq!(result.len(), 6);
        assert!(result
            .records
            .iter()
            .all(|r| r.sample.ert.unwrap().as_millis() >= 7));
    }

    #[test]
    fn test_query_repeated_identifier_selects_series_once() {
        let tree = ContainerTree::default();
        for ms in 0..4 {
            tree.route(record(&disc(0), "A-1", ms)).unwrap();
        }
        let patterns = vec![
            IdentifierPattern::parse("A-1").unwrap(),
            IdentifierPattern::parse("A-1").unwrap(),
        ];
        let query = LadQuery::new(DiscriminatorFilter::all())
            .with_identifiers(patterns.clone())
            .with_max_results(10);
        assert_eq!(tree.query(&query).unwrap().len(), 4);
        assert_eq!(tree.series_matching(&DiscriminatorFilter::all(), &patterns).len(), 1);
    }

    #[test]
    fn test_query_bounds_and_completeness() {
        let mut policies = PolicyTable::default();
        policies.set(QueryType::ChannelValue, RetentionPolicy::keep_last(4));
        let tree = ContainerTree::new(policies);
        for ms in 0..5 {
            tree.route(record(&disc(0), "A-1", ms)).unwrap();
        }
        // 0 and 1 evicted
        let q = LadQuery::new(DiscriminatorFilter::all())
            .with_max_results(10)
            .with_bounds(TimeType::Ert, Some(Timestamp::from_millis(1)), None);
        let result = tree.query(&q).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.completeness, Completeness::Incomplete);

        let q = q.with_bounds(TimeType::Ert, Some(Timestamp::from_millis(2)), None);
        assert_eq!(tree.query(&q).unwrap().completeness, Completeness::Complete);
    }

    #[test]
    fn test_query_rejects_inverted_bounds() {
        let tree = ContainerTree::default();
        let q = LadQuery::new(DiscriminatorFilter::all()).with_bounds(
            TimeType::Ert,
            Some(Timestamp::from_millis(5)),
            Some(Timestamp::from_millis(1)),
        );
        assert!(tree.query(&q).unwrap_err().is_client_error());
    }

    #[test]
    fn test_remove_prunes_empty_nodes() {
        let tree = ContainerTree::default();
        tree.route(record(&disc(0), "A-1", 1)).unwrap();
        tree.route(record(&disc(0), "A-2", 1)).unwrap();
        tree.route(record(&disc(1), "A-1", 1)).unwrap();

        let mut filter = DiscriminatorFilter::all();
        filter.virtual_channel_id = Some(0);
        let removed = tree.remove(&filter, &[IdentifierPattern::parse("A-1").unwrap()]);
        assert_eq!(removed, 1);
        assert_eq!(tree.counts().series, 2);

        let removed = tree.remove(&filter, &[]);
        assert_eq!(removed, 1);
        let counts = tree.counts();
        assert_eq!(counts.series, 1);
        // vcid 0 branch and its leaf are gone
        assert_eq!(counts.containers, Level::ORDER.len());
    }

    #[test]
    fn test_clear() {
        let tree = ContainerTree::default();
        tree.route(record(&disc(0), "A-1", 1)).unwrap();
        tree.route(record(&disc(1), "A-1", 1)).unwrap();
        assert_eq!(tree.clear(), 2);
        assert!(tree.is_empty());
        assert_eq!(tree.counts(), TreeCounts::default());
    }

    #[test]
    fn test_reap_idle_series() {
        let tree = ContainerTree::default();
        tree.route(record(&disc(0), "A-1", 1)).unwrap();
        assert_eq!(tree.reap(Duration::from_secs(3600)), 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(tree.reap(Duration::from_millis(5)), 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_set_policy_applies_to_existing_and_new_series() {
        let tree = ContainerTree::default();
        for ms in 0..50 {
            tree.route(record(&disc(0), "A-1", ms)).unwrap();
        }
        let evicted = tree.set_policy(QueryType::ChannelValue, RetentionPolicy::keep_last(8));
        assert_eq!(evicted, 50 - 6);
        tree.route(record(&disc(1), "A-1", 0)).unwrap();
        assert!(tree
            .depth(&DiscriminatorFilter::all())
            .iter()
            .all(|d| d.max_count == 8));
    }

    #[test]
    fn test_route_batch_groups_per_series() {
        let mut policies = PolicyTable::default();
        policies.set(QueryType::ChannelValue, RetentionPolicy::keep_last(100));
        let tree = ContainerTree::new(policies);
        let mut records: Vec<Record> = (0..130).map(|ms| record(&disc(0), "A-1", ms)).collect();
        let mut bad = record(&disc(0), "A-1", 0);
        bad.sample.ert = None;
        records.push(bad);

        let outcome = tree.route_batch(records);
        assert_eq!(outcome.loaded, 130);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.evicted, 55);
        assert_eq!(tree.counts().samples, 75);
    }
}
