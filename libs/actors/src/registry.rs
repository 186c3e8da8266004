//! Actor Registry
//!
//! Identity type and the parent/child arena that is the single source of
//! truth for the actor hierarchy. Relations are stored as `ActorId`
//! values looked up in the arena, never as owning pointers.

use crate::mailbox::Mailbox;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique actor identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActorId {
    /// Generated identity
    Generated(Uuid),
    /// Caller-chosen identity, unique while registered
    Named(Arc<str>),
}

impl ActorId {
    /// Create new generated actor ID
    pub fn new() -> Self {
        ActorId::Generated(Uuid::new_v4())
    }

    /// Create a named actor ID
    pub fn named(name: impl AsRef<str>) -> Self {
        ActorId::Named(Arc::from(name.as_ref()))
    }

    /// Create from UUID
    pub fn from_uuid(id: Uuid) -> Self {
        ActorId::Generated(id)
    }

    /// Name for named ids
    pub fn name(&self) -> Option<&str> {
        match self {
            ActorId::Named(name) => Some(name),
            ActorId::Generated(_) => None,
        }
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorId::Generated(id) => write!(f, "actor-{}", id.simple()),
            ActorId::Named(name) => f.write_str(name),
        }
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ActorId {
    fn from(name: &str) -> Self {
        ActorId::named(name)
    }
}

impl From<String> for ActorId {
    fn from(name: String) -> Self {
        ActorId::Named(Arc::from(name))
    }
}

impl From<Uuid> for ActorId {
    fn from(id: Uuid) -> Self {
        ActorId::Generated(id)
    }
}

/// One node of the actor tree
pub(crate) struct TreeEntry {
    pub mailbox: Arc<Mailbox>,
    pub parent: Option<ActorId>,
    pub children: BTreeSet<ActorId>,
    pub dispatcher: String,
}

/// Read-only view of a tree entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorInfo {
    pub id: ActorId,
    pub parent: Option<ActorId>,
    pub children: Vec<ActorId>,
    pub dispatcher: String,
}

/// Arena of live actors keyed by identity.
///
/// Not synchronized itself; the system wraps it in a single lock so every
/// structural change is applied atomically.
#[derive(Default)]
pub(crate) struct ActorTree {
    entries: HashMap<ActorId, TreeEntry>,
}

impl ActorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &ActorId) -> Option<&TreeEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ids(&self) -> Vec<ActorId> {
        self.entries.keys().cloned().collect()
    }

    pub fn roots(&self) -> Vec<ActorId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.parent.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn info(&self, id: &ActorId) -> Option<ActorInfo> {
        self.entries.get(id).map(|entry| ActorInfo {
            id: id.clone(),
            parent: entry.parent.clone(),
            children: entry.children.iter().cloned().collect(),
            dispatcher: entry.dispatcher.clone(),
        })
    }

    /// Insert a new entry and link it under its parent.
    ///
    /// Callers have already checked that `id` is free and that the parent
    /// is live.
    pub fn insert(&mut self, id: ActorId, entry: TreeEntry) {
        if let Some(parent_id) = &entry.parent {
            if let Some(parent) = self.entries.get_mut(parent_id) {
                parent.children.insert(id.clone());
            }
        }
        self.entries.insert(id, entry);
    }

    /// Direct children of `parent` passing `filter`
    pub fn children_matching(
        &self,
        parent: &ActorId,
        filter: &dyn Fn(&ActorId) -> bool,
    ) -> Option<Vec<(ActorId, Arc<Mailbox>)>> {
        let entry = self.entries.get(parent)?;
        Some(
            entry
                .children
                .iter()
                .filter(|child| filter(child))
                .filter_map(|child| {
                    self.entries
                        .get(child)
                        .map(|e| (child.clone(), Arc::clone(&e.mailbox)))
                })
                .collect(),
        )
    }

    /// Remove the subtree rooted at `id` in post-order and detach it from
    /// its parent. Returns the removed entries, descendants first.
    pub fn remove_subtree(&mut self, id: &ActorId) -> Vec<(ActorId, TreeEntry)> {
        let mut removed = Vec::new();
        let parent = match self.entries.get(id) {
            Some(entry) => entry.parent.clone(),
            None => return removed,
        };
        self.remove_recursive(id, &mut removed);
        if let Some(parent_id) = parent {
            if let Some(parent) = self.entries.get_mut(&parent_id) {
                parent.children.remove(id);
            }
        }
        removed
    }

    fn remove_recursive(&mut self, id: &ActorId, removed: &mut Vec<(ActorId, TreeEntry)>) {
        let children: Vec<ActorId> = match self.entries.get(id) {
            Some(entry) => entry.children.iter().cloned().collect(),
            None => return,
        };
        for child in &children {
            self.remove_recursive(child, removed);
        }
        if let Some(entry) = self.entries.remove(id) {
            removed.push((id.clone(), entry));
        }
    }

    /// Check the parent/child invariants of the whole arena
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        self.entries.iter().all(|(id, entry)| {
            let parent_ok = match &entry.parent {
                Some(parent) => self
                    .entries
                    .get(parent)
                    .map_or(false, |p| p.children.contains(id)),
                None => true,
            };
            let children_ok = entry.children.iter().all(|child| {
                self.entries
                    .get(child)
                    .map_or(false, |c| c.parent.as_ref() == Some(id))
            });
            parent_ok && children_ok
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;

    fn entry(id: &ActorId, parent: Option<&ActorId>) -> TreeEntry {
        TreeEntry {
            mailbox: Mailbox::detached(id.clone()),
            parent: parent.cloned(),
            children: BTreeSet::new(),
            dispatcher: "default".to_string(),
        }
    }

    #[test]
    fn test_actor_id_creation() {
        let id1 = ActorId::new();
        let id2 = ActorId::new();

        assert_ne!(id1, id2);
        assert!(id1.name().is_none());
        assert_eq!(ActorId::named("x"), ActorId::from("x"));
    }

    #[test]
    fn test_actor_id_display() {
        let id = ActorId::new();
        assert!(format!("{}", id).starts_with("actor-"));
        assert_eq!(ActorId::named("device-7").to_string(), "device-7");
    }

    #[test]
    fn test_insert_links_parent() {
        let mut tree = ActorTree::new();
        let root = ActorId::named("root");
        let child = ActorId::named("child");

        tree.insert(root.clone(), entry(&root, None));
        tree.insert(child.clone(), entry(&child, Some(&root)));

        let info = tree.info(&root).unwrap();
        assert_eq!(info.children, vec![child.clone()]);
        assert_eq!(tree.info(&child).unwrap().parent, Some(root));
        assert_eq!(tree.roots().len(), 1);
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_remove_subtree_post_order() {
        let mut tree = ActorTree::new();
        let root = ActorId::named("r");
        let c1 = ActorId::named("c1");
        let c2 = ActorId::named("c2");
        let g1 = ActorId::named("g1");

        tree.insert(root.clone(), entry(&root, None));
        tree.insert(c1.clone(), entry(&c1, Some(&root)));
        tree.insert(c2.clone(), entry(&c2, Some(&root)));
        tree.insert(g1.clone(), entry(&g1, Some(&c1)));

        let removed: Vec<ActorId> = tree.remove_subtree(&c1).into_iter().map(|(id, _)| id).collect();
        assert_eq!(removed, vec![g1.clone(), c1.clone()]);
        assert!(!tree.contains(&g1));
        assert_eq!(tree.info(&root).unwrap().children, vec![c2.clone()]);
        assert!(tree.is_consistent());

        let removed = tree.remove_subtree(&root);
        assert_eq!(removed.last().map(|(id, _)| id.clone()), Some(root));
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut tree = ActorTree::new();
        assert!(tree.remove_subtree(&ActorId::named("ghost")).is_empty());
    }

    #[test]
    fn test_children_matching() {
        let mut tree = ActorTree::new();
        let root = ActorId::named("r");
        tree.insert(root.clone(), entry(&root, None));
        for name in ["a1", "b2", "a3"] {
            let id = ActorId::named(name);
            tree.insert(id.clone(), entry(&id, Some(&root)));
        }

        let matching = tree
            .children_matching(&root, &|id| id.to_string().starts_with('a'))
            .unwrap();
        let ids: Vec<String> = matching.into_iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["a1", "a3"]);
        assert!(tree.children_matching(&ActorId::named("missing"), &|_| true).is_none());
    }
}
