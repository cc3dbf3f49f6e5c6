//! Hierarchical topic registry
//!
//! Topics form a tree keyed by `/`-separated path segments. Nodes live in a
//! slab arena and refer to each other by `NodeId`; the parent link is only
//! used to walk upward when pruning. A subscriber is registered at exactly
//! one node, the leaf matching its full path, and the reverse index makes
//! detaching O(1) in the number of subscribers.
//!
//! Invariant: every node other than the root has at least one subscriber or
//! at least one child. Detaching prunes the emptied chain of ancestors.

use std::collections::{HashMap, HashSet};

use slab::Slab;

pub type SubscriberId = String;
pub type NodeId = usize;

pub const SEPARATOR: char = '/';

/// One segment of the topic namespace.
#[derive(Debug, Default)]
pub struct TopicNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: HashMap<String, NodeId>,
    pub subscribers: HashSet<SubscriberId>,
}

impl TopicNode {
    fn new(name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: HashMap::new(),
            subscribers: HashSet::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.children.is_empty()
    }
}

#[derive(Debug)]
pub struct TopicTree {
    nodes: Slab<TopicNode>,
    root: NodeId,
    index: HashMap<SubscriberId, NodeId>,
}

impl Default for TopicTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicTree {
    pub fn new() -> Self {
        let mut nodes = Slab::new();
        let root = nodes.insert(TopicNode::new("", None));
        Self {
            nodes,
            root,
            index: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&TopicNode> {
        self.nodes.get(id)
    }

    /// Walks `path` from the root, creating missing nodes, and returns the
    /// leaf. Empty segments are skipped, so `""` and `"/"` are the root.
    pub fn resolve(&mut self, path: &str) -> NodeId {
        let mut current = self.root;
        for segment in segments(path) {
            let existing = self.nodes[current].children.get(segment).copied();
            current = match existing {
                Some(child) => child,
                None => {
                    let child = self.nodes.insert(TopicNode::new(segment, Some(current)));
                    self.nodes[current]
                        .children
                        .insert(segment.to_string(), child);
                    child
                }
            };
        }
        current
    }

    /// Like [`resolve`](Self::resolve) but never creates nodes.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in segments(path) {
            current = *self.nodes[current].children.get(segment)?;
        }
        Some(current)
    }

    /// Registers `subscriber` at the node for `path`.
    ///
    /// # Panics
    ///
    /// If `subscriber` is already attached somewhere in the tree.
    pub fn attach(&mut self, subscriber: SubscriberId, path: &str) {
        assert!(
            !self.index.contains_key(&subscriber),
            "subscriber {subscriber} is already attached"
        );
        let node = self.resolve(path);
        self.nodes[node].subscribers.insert(subscriber.clone());
        self.index.insert(subscriber, node);
    }

    /// Removes `subscriber` and prunes any ancestors left empty.
    ///
    /// Returns `false` when the subscriber was not attached.
    pub fn detach(&mut self, subscriber: &SubscriberId) -> bool {
        let Some(node) = self.index.remove(subscriber) else {
            return false;
        };
        self.nodes[node].subscribers.remove(subscriber);
        self.collect_garbage(node);
        true
    }

    fn collect_garbage(&mut self, start: NodeId) {
        let mut current = start;
        while current != self.root && self.nodes[current].is_empty() {
            let node = self.nodes.remove(current);
            let Some(parent) = node.parent else {
                break;
            };
            self.nodes[parent].children.remove(&node.name);
            current = parent;
        }
    }

    /// Subscribers registered at exactly `path`, followed depth-first by those
    /// of every descendant when `subchannels` is set.
    ///
    /// Unknown paths yield nothing and allocate no nodes.
    pub fn deliver(&self, path: &str, subchannels: bool) -> Vec<SubscriberId> {
        let mut found = Vec::new();
        if let Some(node) = self.lookup(path) {
            self.collect_subscribers(node, subchannels, &mut found);
        }
        found
    }

    fn collect_subscribers(&self, start: NodeId, subchannels: bool, out: &mut Vec<SubscriberId>) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            out.extend(node.subscribers.iter().cloned());
            if subchannels {
                stack.extend(node.children.values().copied());
            }
        }
    }

    /// Full path of the node `subscriber` is attached at.
    pub fn path_of(&self, subscriber: &SubscriberId) -> Option<String> {
        let mut id = *self.index.get(subscriber)?;
        let mut parts = Vec::new();
        while let Some(parent) = self.nodes[id].parent {
            parts.push(self.nodes[id].name.as_str());
            id = parent;
        }
        parts.reverse();
        Some(parts.join("/"))
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn is_attached(&self, subscriber: &SubscriberId) -> bool {
        self.index.contains_key(subscriber)
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.index.len()
    }

    /// True when no node other than the root is empty.
    pub fn is_pruned(&self) -> bool {
        self.nodes
            .iter()
            .all(|(id, node)| id == self.root || !node.is_empty())
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty())
}
