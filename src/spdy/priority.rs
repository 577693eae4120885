//! HTTP/2 stream priorities.
//!
//! Two pieces:
//! - [`PriorityTree`]: the RFC 7540 section 5.3 dependency tree rooted at
//!   stream 0, with reprioritization and weighted selection.
//! - [`PriorityDependencies`]: maps `RequestPriority` onto tree positions the
//!   way Chromium's `Http2PriorityDependencies` does. Every new stream depends
//!   exclusively on the most recent stream of equal or higher priority, which
//!   keeps the tree a single chain ordered by urgency and then creation.

use crate::base::requestpriority::RequestPriority;
use crate::spdy::frame::PrioritySpec;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Default weight for streams whose dependency is unknown (RFC 7540 5.3.5).
pub const DEFAULT_WEIGHT: u16 = 16;

/// Pass increment numerator; each selection advances a stream by `STRIDE / weight`.
const STRIDE: u64 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PriorityError {
    #[error("stream {0} cannot depend on itself")]
    SelfDependency(u32),
    #[error("stream {0} is not in the priority tree")]
    UnknownStream(u32),
}

#[derive(Debug, Clone)]
struct Node {
    parent: u32,
    weight: u16,
    children: Vec<u32>,
    pass: u64,
}

/// Weighted dependency tree keyed by wire stream id.
#[derive(Debug, Clone)]
pub struct PriorityTree {
    nodes: HashMap<u32, Node>,
}

impl Default for PriorityTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(0, Node { parent: 0, weight: 256, children: Vec::new(), pass: 0 });
        Self { nodes }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of streams in the tree (the root excluded).
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self, id: u32) -> Option<u32> {
        if id == 0 {
            return None;
        }
        self.nodes.get(&id).map(|n| n.parent)
    }

    pub fn weight(&self, id: u32) -> Option<u16> {
        self.nodes.get(&id).map(|n| n.weight)
    }

    pub fn children(&self, id: u32) -> &[u32] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// True if `ancestor` lies on the path from `id` to the root.
    pub fn is_ancestor(&self, ancestor: u32, id: u32) -> bool {
        let mut cur = id;
        while cur != 0 {
            let Some(node) = self.nodes.get(&cur) else {
                return false;
            };
            cur = node.parent;
            if cur == ancestor {
                return true;
            }
        }
        false
    }

    /// Add a stream. An unknown dependency falls back to the root with the
    /// default weight.
    pub fn insert(&mut self, id: u32, spec: PrioritySpec) -> Result<(), PriorityError> {
        if id == 0 || spec.dependency == id {
            return Err(PriorityError::SelfDependency(id));
        }
        let (parent, weight) = self.resolve_parent(spec);
        let pass = self.min_child_pass(parent);
        self.nodes.insert(id, Node { parent, weight, children: Vec::new(), pass });
        self.attach(id, parent, spec.exclusive && parent == spec.dependency);
        Ok(())
    }

    /// Move a stream (with its whole subtree) under a new parent.
    ///
    /// If the new parent is currently a descendant of `id`, it is first moved
    /// up to `id`'s former parent so no cycle can form (RFC 7540 5.3.3).
    pub fn reprioritize(&mut self, id: u32, spec: PrioritySpec) -> Result<(), PriorityError> {
        if spec.dependency == id {
            return Err(PriorityError::SelfDependency(id));
        }
        let old_parent = self.parent(id).ok_or(PriorityError::UnknownStream(id))?;
        let (parent, weight) = self.resolve_parent(spec);

        if self.is_ancestor(id, parent) {
            self.detach(parent);
            self.attach(parent, old_parent, false);
        }

        self.detach(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.weight = weight;
        }
        self.attach(id, parent, spec.exclusive && parent == spec.dependency);
        Ok(())
    }

    /// Remove a stream; its children move up to its parent.
    pub fn remove(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        let Some(parent) = self.parent(id) else {
            return;
        };
        self.detach(id);
        let children = self.nodes.remove(&id).map(|n| n.children).unwrap_or_default();
        for child in children {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = parent;
            }
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.push(child);
            }
        }
    }

    /// Choose the next stream to serve among `ready`.
    ///
    /// Walks from the root. A ready stream is served before its dependents;
    /// among siblings whose subtrees hold ready streams the one with the
    /// smallest pass wins (stride scheduling), ties going to the sibling that
    /// was attached first. The chosen branch advances by `STRIDE / weight`.
    pub fn pick(&mut self, ready: &HashSet<u32>) -> Option<u32> {
        let mut live: HashSet<u32> = HashSet::new();
        for &id in ready {
            if !self.contains(id) || id == 0 {
                continue;
            }
            let mut cur = id;
            while live.insert(cur) && cur != 0 {
                cur = self.nodes.get(&cur).map(|n| n.parent).unwrap_or(0);
            }
            live.insert(0);
        }
        if live.is_empty() {
            return None;
        }

        let mut cur = 0;
        loop {
            if cur != 0 && ready.contains(&cur) {
                return Some(cur);
            }
            let next = self
                .children(cur)
                .iter()
                .copied()
                .filter(|c| live.contains(c))
                .min_by_key(|c| self.nodes.get(c).map(|n| n.pass).unwrap_or(u64::MAX))?;
            if let Some(node) = self.nodes.get_mut(&next) {
                node.pass += STRIDE / node.weight.max(1) as u64;
            }
            cur = next;
        }
    }

    fn resolve_parent(&self, spec: PrioritySpec) -> (u32, u16) {
        if self.contains(spec.dependency) {
            (spec.dependency, spec.weight.clamp(1, 256))
        } else {
            (0, DEFAULT_WEIGHT)
        }
    }

    fn min_child_pass(&self, parent: u32) -> u64 {
        self.children(parent)
            .iter()
            .filter_map(|c| self.nodes.get(c).map(|n| n.pass))
            .min()
            .unwrap_or(0)
    }

    fn detach(&mut self, id: u32) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != id);
        }
    }

    fn attach(&mut self, id: u32, parent: u32, exclusive: bool) {
        let adopted = if exclusive {
            self.nodes.get_mut(&parent).map(|p| std::mem::take(&mut p.children)).unwrap_or_default()
        } else {
            Vec::new()
        };
        for child in &adopted {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = id;
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = parent;
            node.children.extend(adopted);
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
    }
}

/// A dependency change the session must apply to its tree and announce
/// with a PRIORITY frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyUpdate {
    pub id: u32,
    pub spec: PrioritySpec,
}

/// Chromium-style mapping from request priorities to dependencies.
#[derive(Debug, Default, Clone)]
pub struct PriorityDependencies {
    /// Streams per lane, in creation order. Lane 0 is the most urgent.
    lanes: [Vec<u32>; RequestPriority::COUNT],
    priority_of: HashMap<u32, RequestPriority>,
}

impl PriorityDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dependency for a newly created stream.
    pub fn on_stream_creation(&mut self, id: u32, priority: RequestPriority) -> PrioritySpec {
        let parent = self.last_at_or_above(priority.lane());
        self.lanes[priority.lane()].push(id);
        self.priority_of.insert(id, priority);
        PrioritySpec { dependency: parent, weight: priority.to_http2_weight(), exclusive: true }
    }

    /// Dependency changes caused by moving `id` to `new_priority`.
    ///
    /// The stream that depended on `id` is re-parented to `id`'s old parent,
    /// then `id` is appended to its new lane.
    pub fn on_stream_update(
        &mut self,
        id: u32,
        new_priority: RequestPriority,
    ) -> Vec<DependencyUpdate> {
        let Some(&old_priority) = self.priority_of.get(&id) else {
            return Vec::new();
        };
        if old_priority == new_priority {
            return Vec::new();
        }

        let mut updates = Vec::with_capacity(2);
        let chain = self.chain();
        let pos = chain.iter().position(|s| *s == id);
        if let Some(pos) = pos {
            if let Some(&successor) = chain.get(pos + 1) {
                let predecessor = if pos == 0 { 0 } else { chain[pos - 1] };
                let weight =
                    self.priority_of.get(&successor).copied().unwrap_or_default().to_http2_weight();
                updates.push(DependencyUpdate {
                    id: successor,
                    spec: PrioritySpec { dependency: predecessor, weight, exclusive: false },
                });
            }
        }

        self.lanes[old_priority.lane()].retain(|s| *s != id);
        let parent = self.last_at_or_above(new_priority.lane());
        self.lanes[new_priority.lane()].push(id);
        self.priority_of.insert(id, new_priority);
        updates.push(DependencyUpdate {
            id,
            spec: PrioritySpec {
                dependency: parent,
                weight: new_priority.to_http2_weight(),
                exclusive: true,
            },
        });
        updates
    }

    pub fn on_stream_destruction(&mut self, id: u32) {
        if let Some(priority) = self.priority_of.remove(&id) {
            self.lanes[priority.lane()].retain(|s| *s != id);
        }
    }

    fn last_at_or_above(&self, lane: usize) -> u32 {
        self.lanes[..=lane]
            .iter()
            .rev()
            .find_map(|l| l.last().copied())
            .unwrap_or(0)
    }

    fn chain(&self) -> Vec<u32> {
        self.lanes.iter().flatten().copied().collect()
    }
}
