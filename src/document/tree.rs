use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{
    observer::{subscription, MutationBatch, MutationStream},
    selector::Selector,
};

/// Node identity. Ids are handed out monotonically and never reused within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn class(self, classes: impl Into<String>) -> Self {
        self.attr("class", classes)
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedTree {
    pub root: NodeId,
    pub keyed: Vec<(String, NodeId)>,
}

impl AppendedTree {
    pub fn node(&self, key: &str) -> Option<NodeId> {
        self.keyed
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, id)| *id)
    }
}

#[derive(Debug)]
pub(crate) struct NodeData {
    pub(crate) tag: String,
    pub(crate) attrs: BTreeMap<String, String>,
    pub(crate) text: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Tree {
    nodes: HashMap<NodeId, NodeData>,
    root: NodeId,
    next_id: u64,
    observers: Vec<mpsc::UnboundedSender<MutationBatch>>,
}

impl Tree {
    fn allocate(
        &mut self,
        spec: &ElementSpec,
        parent: NodeId,
        keyed: &mut Vec<(String, NodeId)>,
    ) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        if let Some(key) = &spec.key {
            keyed.push((key.clone(), id));
        }
        let children = spec
            .children
            .iter()
            .map(|child| self.allocate(child, id, keyed))
            .collect();
        self.nodes.insert(
            id,
            NodeData {
                tag: spec.tag.to_ascii_lowercase(),
                attrs: spec.attrs.clone(),
                text: spec.text.clone(),
                parent: Some(parent),
                children,
            },
        );
        id
    }

    fn detach(&mut self, node: NodeId) {
        let parent = self.nodes.get(&node).and_then(|data| data.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|child| *child != node);
        }
    }

    fn drop_subtree(&mut self, node: NodeId) {
        if let Some(data) = self.nodes.remove(&node) {
            for child in data.children {
                self.drop_subtree(child);
            }
        }
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.nodes.get(&node).and_then(|data| data.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn preorder(&self, scope: NodeId, out: &mut Vec<NodeId>) {
        if let Some(data) = self.nodes.get(&scope) {
            out.push(scope);
            for child in &data.children {
                self.preorder(*child, out);
            }
        }
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        if let Some(data) = self.nodes.get(&node) {
            if let Some(text) = &data.text {
                out.push_str(text);
            }
            for child in &data.children {
                self.collect_text(*child, out);
            }
        }
    }

    fn publish(&mut self, batch: MutationBatch) {
        self.observers.retain(|observer| observer.send(batch.clone()).is_ok());
    }
}

#[derive(Clone)]
pub struct Document {
    inner: Arc<Mutex<Tree>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            NodeData {
                tag: "body".to_string(),
                attrs: BTreeMap::new(),
                text: None,
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            inner: Arc::new(Mutex::new(Tree {
                nodes,
                root,
                next_id: 1,
                observers: Vec::new(),
            })),
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.lock().root
    }

    pub fn observe(&self) -> MutationStream {
        let (tx, stream) = subscription();
        self.inner.lock().observers.push(tx);
        stream
    }

    pub fn append(&self, parent: NodeId, spec: &ElementSpec) -> Option<AppendedTree> {
        let mut tree = self.inner.lock();
        if !tree.nodes.contains_key(&parent) {
            return None;
        }
        let mut keyed = Vec::new();
        let root = tree.allocate(spec, parent, &mut keyed);
        if let Some(parent) = tree.nodes.get_mut(&parent) {
            parent.children.push(root);
        }
        tree.publish(MutationBatch {
            added: vec![root],
            removed: Vec::new(),
        });
        Some(AppendedTree { root, keyed })
    }

    /// Re-parents an attached node. Observers see it as removed and added in one batch.
    pub fn move_to(&self, node: NodeId, new_parent: NodeId) -> bool {
        let mut tree = self.inner.lock();
        if node == tree.root
            || !tree.nodes.contains_key(&node)
            || !tree.nodes.contains_key(&new_parent)
            || tree.is_ancestor_or_self(node, new_parent)
        {
            return false;
        }
        tree.detach(node);
        if let Some(data) = tree.nodes.get_mut(&node) {
            data.parent = Some(new_parent);
        }
        if let Some(parent) = tree.nodes.get_mut(&new_parent) {
            parent.children.push(node);
        }
        tree.publish(MutationBatch {
            added: vec![node],
            removed: vec![node],
        });
        true
    }

    pub fn remove(&self, node: NodeId) -> bool {
        let mut tree = self.inner.lock();
        if node == tree.root || !tree.nodes.contains_key(&node) {
            return false;
        }
        tree.detach(node);
        tree.drop_subtree(node);
        tree.publish(MutationBatch {
            added: Vec::new(),
            removed: vec![node],
        });
        true
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.inner.lock().nodes.contains_key(&node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.lock().nodes.get(&node).and_then(|data| data.parent)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .and_then(|data| data.attrs.get(name).cloned())
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .is_some_and(|data| selector.matches(data))
    }

    /// Replaces the node's own text. Character data changes are not structural and are not
    /// published to observers.
    pub fn set_text(&self, node: NodeId, text: impl Into<String>) -> bool {
        match self.inner.lock().nodes.get_mut(&node) {
            Some(data) => {
                data.text = Some(text.into());
                true
            }
            None => false,
        }
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.inner.lock().collect_text(node, &mut out);
        out
    }

    pub fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let tree = self.inner.lock();
        let mut order = Vec::new();
        tree.preorder(scope, &mut order);
        order
            .into_iter()
            .filter(|id| tree.nodes.get(id).is_some_and(|data| selector.matches(data)))
            .collect()
    }

    pub fn query_descendant(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        let tree = self.inner.lock();
        let mut order = Vec::new();
        tree.preorder(scope, &mut order);
        order
            .into_iter()
            .skip(1)
            .find(|id| tree.nodes.get(id).is_some_and(|data| selector.matches(data)))
    }

    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let tree = self.inner.lock();
        let mut current = Some(node);
        while let Some(id) = current {
            let data = tree.nodes.get(&id)?;
            if selector.matches(data) {
                return Some(id);
            }
            current = data.parent;
        }
        None
    }
}
