//! In-memory output medium.
//!
//! A minimal node tree with anchors, elements and text. Used by headless
//! hosts, tests and benches. Every content handle is a [`Fragment`]: a run of
//! sibling nodes that moves as a unit.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::eval::Evaluator;
use super::medium::{OutputMedium, RenderCx};
use crate::error::{Result, StructuralError};
use crate::reactive::ObserverId;

/// A node in a [`MemoryMedium`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

#[derive(Debug, Clone)]
enum NodeKind {
    Root,
    Anchor(String),
    Element(String),
    Text(String),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A run of sibling nodes handled as one piece of content.
#[derive(Debug, Clone)]
pub struct Fragment {
    id: u64,
    nodes: Arc<[NodeId]>,
}

impl Fragment {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Fragment {}

/// Counters for structural operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    pub synthesized: usize,
    pub inserted: usize,
    pub removed: usize,
}

struct Tree {
    nodes: HashMap<NodeId, Node>,
    next_node: u64,
    stats: MediumStats,
}

impl Tree {
    const ROOT: NodeId = NodeId(0);

    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            Self::ROOT,
            Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            nodes,
            next_node: 1,
            stats: MediumStats::default(),
        }
    }

    fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get_mut(&id).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|c| *c != id);
        }
    }

    /// Detach `id` and drop it together with its descendants.
    fn free(&mut self, id: NodeId) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
    }

    fn connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == Self::ROOT {
                return true;
            }
            match self.nodes.get(&current).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn render_into(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.kind {
            NodeKind::Root => self.render_children(node, out),
            NodeKind::Anchor(label) => {
                let _ = write!(out, "<!--{label}-->");
            }
            NodeKind::Element(tag) => {
                let _ = write!(out, "<{tag}>");
                self.render_children(node, out);
                let _ = write!(out, "</{tag}>");
            }
            NodeKind::Text(text) => out.push_str(text),
        }
    }

    fn render_children(&self, node: &Node, out: &mut String) {
        for child in &node.children {
            self.render_into(*child, out);
        }
    }
}

/// Template type for [`MemoryMedium`]: builds detached nodes and registers
/// their bindings through the render context.
pub type MemoryTemplate = Arc<dyn Fn(&MemoryMedium, &RenderCx) -> Result<Fragment> + Send + Sync>;

/// An in-memory node tree. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryMedium {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    pub fn root(&self) -> NodeId {
        Tree::ROOT
    }

    /// Create an anchor placeholder appended to `parent`.
    pub fn anchor(&self, parent: NodeId, label: &str) -> Fragment {
        let id = {
            let mut tree = self.tree.lock();
            let id = tree.create(NodeKind::Anchor(label.to_owned()));
            attach(&mut tree, parent, id);
            id
        };
        self.fragment(vec![id])
    }

    pub fn element(&self, tag: &str) -> NodeId {
        self.tree.lock().create(NodeKind::Element(tag.to_owned()))
    }

    pub fn text_node(&self, text: &str) -> NodeId {
        self.tree.lock().create(NodeKind::Text(text.to_owned()))
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        attach(&mut self.tree.lock(), parent, child);
    }

    /// Wrap detached top-level nodes as one piece of content.
    pub fn fragment(&self, nodes: Vec<NodeId>) -> Fragment {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Fragment {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            nodes: nodes.into(),
        }
    }

    pub fn set_text(&self, node: NodeId, text: &str) {
        if let Some(Node {
            kind: NodeKind::Text(current),
            ..
        }) = self.tree.lock().nodes.get_mut(&node)
        {
            text.clone_into(current);
        }
    }

    /// Concatenated text of a subtree.
    pub fn text(&self, node: NodeId) -> String {
        fn collect(tree: &Tree, id: NodeId, out: &mut String) {
            let Some(n) = tree.nodes.get(&id) else {
                return;
            };
            if let NodeKind::Text(text) = &n.kind {
                out.push_str(text);
            }
            for child in &n.children {
                collect(tree, *child, out);
            }
        }
        let mut out = String::new();
        collect(&self.tree.lock(), node, &mut out);
        out
    }

    /// Markup rendering of a subtree. Anchors render as comments.
    pub fn render(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.lock().render_into(node, &mut out);
        out
    }

    pub fn stats(&self) -> MediumStats {
        self.tree.lock().stats
    }

    /// Live nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    /// Create a text node inside `parent` bound to `expr`.
    pub fn bind_text<E: Evaluator>(
        &self,
        cx: &RenderCx,
        evaluator: &Arc<E>,
        expr: E::Expr,
        parent: NodeId,
    ) -> Result<ObserverId> {
        let node = self.text_node("");
        self.append_child(parent, node);
        let medium = self.clone();
        cx.bind(evaluator, expr, move |value, _, _| {
            medium.set_text(node, &value.display());
            Ok(())
        })
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

fn attach(tree: &mut Tree, parent: NodeId, child: NodeId) {
    tree.detach(child);
    let Some(p) = tree.nodes.get_mut(&parent) else {
        return;
    };
    p.children.push(child);
    if let Some(c) = tree.nodes.get_mut(&child) {
        c.parent = Some(parent);
    }
}

impl OutputMedium for MemoryMedium {
    type Template = MemoryTemplate;
    type Handle = Fragment;

    fn synthesize(&self, template: &MemoryTemplate, cx: &RenderCx) -> Result<Fragment> {
        let fragment = template(self, cx)?;
        self.tree.lock().stats.synthesized += 1;
        Ok(fragment)
    }

    fn insert_after(&self, anchor: &Fragment, content: &Fragment) -> std::result::Result<(), StructuralError> {
        let mut tree = self.tree.lock();
        let after = anchor.last().ok_or(StructuralError::Detached)?;
        let parent = tree
            .nodes
            .get(&after)
            .and_then(|n| n.parent)
            .ok_or(StructuralError::Detached)?;
        if content.nodes.contains(&after) {
            return Err(StructuralError::UnknownContent);
        }
        for node in content.nodes.iter() {
            if !tree.nodes.contains_key(node) {
                return Err(StructuralError::UnknownContent);
            }
            tree.detach(*node);
        }

        let position = tree.nodes[&parent]
            .children
            .iter()
            .position(|c| *c == after)
            .map_or(0, |i| i + 1);
        if let Some(p) = tree.nodes.get_mut(&parent) {
            for (offset, node) in content.nodes.iter().enumerate() {
                p.children.insert(position + offset, *node);
            }
        }
        for node in content.nodes.iter() {
            if let Some(n) = tree.nodes.get_mut(node) {
                n.parent = Some(parent);
            }
        }
        tree.stats.inserted += 1;
        Ok(())
    }

    fn remove(&self, content: &Fragment) -> std::result::Result<(), StructuralError> {
        let mut tree = self.tree.lock();
        let attached = content
            .nodes
            .iter()
            .any(|node| tree.nodes.get(node).is_some_and(|n| n.parent.is_some()));
        if !attached {
            return Err(StructuralError::UnknownContent);
        }
        for node in content.nodes.iter() {
            tree.free(*node);
        }
        tree.stats.removed += 1;
        Ok(())
    }

    fn is_connected(&self, content: &Fragment) -> bool {
        let tree = self.tree.lock();
        !content.nodes.is_empty() && content.nodes.iter().all(|node| tree.connected(*node))
    }
}
