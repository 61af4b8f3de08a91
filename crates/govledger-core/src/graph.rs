//! Typed reference graph derived from event refs.
//!
//! Only `depends_on` refs become edges. An event whose subject declares
//! `depends_on X` yields the edge `subject -> X`; traversal walks those edges
//! in reverse to find everything downstream of a root.

use crate::error::{LedgerError, LedgerResult};
use crate::store::EventStore;
use crate::types::{EntityRef, EventEnvelope};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A node reached by traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependent {
    pub entity: EntityRef,
    /// Hops from the root along reverse `depends_on` edges.
    pub depth: u32,
    /// The upstream node through which this dependent was first reached.
    pub via: EntityRef,
}

#[derive(Debug, Default, Clone)]
pub struct ReferenceGraph {
    /// root -> dependents, in edge discovery order.
    dependents: HashMap<EntityRef, Vec<EntityRef>>,
    /// dependent -> roots it depends on.
    dependencies: HashMap<EntityRef, Vec<EntityRef>>,
    edges: HashSet<(EntityRef, EntityRef)>,
    applied_through: u64,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a EventEnvelope>) -> Self {
        let mut graph = Self::new();
        for event in events {
            graph.apply(event);
        }
        graph
    }

    /// Highest `global_seq` folded into the graph.
    pub fn applied_through(&self) -> u64 {
        self.applied_through
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Fold one event's `depends_on` refs into the graph. Replays are ignored.
    pub fn apply(&mut self, event: &EventEnvelope) {
        if event.global_seq <= self.applied_through {
            return;
        }
        let subject = event.subject();
        for typed_ref in event.refs.iter().filter(|r| r.is_propagating()) {
            self.add_edge(subject.clone(), typed_ref.entity());
        }
        self.applied_through = event.global_seq;
    }

    /// Record that `dependent` depends on `root`. Returns false if the edge exists.
    pub fn add_edge(&mut self, dependent: EntityRef, root: EntityRef) -> bool {
        if !self.edges.insert((dependent.clone(), root.clone())) {
            return false;
        }
        self.dependents
            .entry(root.clone())
            .or_default()
            .push(dependent.clone());
        self.dependencies.entry(dependent).or_default().push(root);
        true
    }

    pub fn direct_dependents(&self, root: &EntityRef) -> &[EntityRef] {
        self.dependents.get(root).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependencies_of(&self, entity: &EntityRef) -> &[EntityRef] {
        self.dependencies
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Breadth-first walk of reverse `depends_on` edges from `root`.
    ///
    /// Each entity appears at most once, at its shallowest depth, and the root
    /// itself is never returned even when a cycle leads back to it.
    pub fn dependents_of(&self, root: &EntityRef, max_depth: u32) -> Vec<Dependent> {
        let mut visited: HashSet<&EntityRef> = HashSet::new();
        let mut queue: VecDeque<(&EntityRef, u32)> = VecDeque::new();
        let mut reached = Vec::new();

        visited.insert(root);
        queue.push_back((root, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for dependent in self.direct_dependents(node) {
                if visited.insert(dependent) {
                    reached.push(Dependent {
                        entity: dependent.clone(),
                        depth: depth + 1,
                        via: node.clone(),
                    });
                    queue.push_back((dependent, depth + 1));
                }
            }
        }

        debug!(root = %root, max_depth, reached = reached.len(), "dependency traversal");
        reached
    }
}

/// Lazily maintained graph over an event store.
///
/// Each read first folds in any events appended since the last read.
pub struct GraphProjection {
    store: Arc<dyn EventStore>,
    graph: RwLock<ReferenceGraph>,
}

impl GraphProjection {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            graph: RwLock::new(ReferenceGraph::new()),
        }
    }

    pub async fn refresh(&self) -> LedgerResult<()> {
        let mut graph = self.graph.write().await;
        let pending = self.store.events_since(graph.applied_through()).await?;
        for event in &pending {
            graph.apply(event);
        }
        Ok(())
    }

    pub async fn dependents_of(
        &self,
        root: &EntityRef,
        max_depth: u32,
    ) -> LedgerResult<Vec<Dependent>> {
        root.validate("root_ref")?;
        self.refresh().await?;
        Ok(self.graph.read().await.dependents_of(root, max_depth))
    }

    pub async fn dependencies_of(&self, entity: &EntityRef) -> LedgerResult<Vec<EntityRef>> {
        self.refresh().await?;
        Ok(self.graph.read().await.dependencies_of(entity).to_vec())
    }

    pub async fn snapshot(&self) -> LedgerResult<ReferenceGraph> {
        self.refresh().await?;
        Ok(self.graph.read().await.clone())
    }
}

impl std::fmt::Debug for GraphProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphProjection").finish_non_exhaustive()
    }
}

/// Reject traversal bounds outside `1..=limit`.
pub fn validate_depth(max_depth: u32, limit: u32) -> Result<(), LedgerError> {
    if max_depth == 0 || max_depth > limit {
        return Err(LedgerError::Validation(format!(
            "max_depth must be between 1 and {}, got {}",
            limit, max_depth
        )));
    }
    Ok(())
}
