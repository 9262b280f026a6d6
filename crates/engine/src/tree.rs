//! Client-side mirror of the report tree.
//!
//! Nodes live in an arena keyed by their [`NodePath`]; each node keeps the
//! ordered uids of its children once they have been fetched. Every change
//! produces a new [`ReportTree`] that shares untouched nodes with the previous
//! one through `Arc`, so readers holding a snapshot never observe a partial
//! merge and unchanged nodes keep their identity across merges.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use iview_types::{NodeKind, NodePath, ReportNode, Status};
use serde_json::Value;

use crate::error::TreeError;

/// One node of the mirrored tree.
///
/// `record.entries` is only kept for testcases, where it holds the raw
/// assertion records. Group children are tracked by uid in `children`.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    record: ReportNode,
    children: Option<Vec<String>>,
}

impl TreeNode {
    pub fn record(&self) -> &ReportNode {
        &self.record
    }

    pub fn uid(&self) -> &str {
        &self.record.uid
    }

    pub fn path(&self) -> NodePath {
        self.record.path()
    }

    pub fn is_testcase(&self) -> bool {
        self.record.kind == NodeKind::TestCase
    }

    /// Ordered child uids, or `None` while the children are unfetched.
    pub fn child_uids(&self) -> Option<&[String]> {
        self.children.as_deref()
    }

    /// Whether the content below this node has been fetched: children for
    /// groups, assertion entries for testcases.
    pub fn is_fetched(&self) -> bool {
        if self.is_testcase() {
            self.record.entries.is_some()
        } else {
            self.children.is_some()
        }
    }

    /// Whether expanding this node could reveal child nodes.
    pub fn may_have_children(&self) -> bool {
        if self.is_testcase() {
            return false;
        }
        match &self.children {
            Some(children) => !children.is_empty(),
            None => self.record.entry_uids.as_ref().is_none_or(|uids| !uids.is_empty()),
        }
    }

    /// Raw assertion records of a fetched testcase.
    pub fn assertions(&self) -> Option<&[Value]> {
        if self.is_testcase() { self.record.entries.as_deref() } else { None }
    }
}

/// Immutable snapshot of the mirrored tree.
#[derive(Debug, Clone, Default)]
pub struct ReportTree {
    root: Option<NodePath>,
    nodes: HashMap<NodePath, Arc<TreeNode>>,
}

impl ReportTree {
    /// Build a tree from the plan record. Entries present on the record are
    /// absorbed as already-fetched children.
    pub fn from_root(record: ReportNode) -> Result<Self, TreeError> {
        let path = NodePath::root(record.uid.clone());
        let mut tree = ReportTree {
            root: Some(path.clone()),
            nodes: HashMap::new(),
        };
        tree.absorb(&path, record)?;
        Ok(tree)
    }

    pub fn root(&self) -> Option<&Arc<TreeNode>> {
        self.root.as_ref().and_then(|path| self.nodes.get(path))
    }

    pub fn root_path(&self) -> Option<&NodePath> {
        self.root.as_ref()
    }

    pub fn get(&self, path: &NodePath) -> Option<&Arc<TreeNode>> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fetched children of `path` in server order; `None` when unknown or unfetched.
    pub fn children(&self, path: &NodePath) -> Option<Vec<&Arc<TreeNode>>> {
        let uids = self.nodes.get(path)?.children.as_ref()?;
        Some(
            uids.iter()
                .filter_map(|uid| self.nodes.get(&path.child(uid.clone())))
                .collect(),
        )
    }

    /// All known nodes in depth-first pre-order, starting at the root.
    pub fn depth_first(&self) -> Vec<(NodePath, &Arc<TreeNode>)> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let Some(root) = self.root.clone() else {
            return ordered;
        };
        let mut pending = vec![root];
        while let Some(path) = pending.pop() {
            let Some(node) = self.nodes.get(&path) else {
                continue;
            };
            if let Some(children) = &node.children {
                pending.extend(children.iter().rev().map(|uid| path.child(uid.clone())));
            }
            ordered.push((path, node));
        }
        ordered
    }

    /// Merge `fresh` at `at`.
    ///
    /// At the root the plan's scalar fields are replaced as well; a root with
    /// a different uid describes a new plan and replaces the whole tree.
    /// Elsewhere only the node's entries are replaced. Absent entries leave
    /// the known children untouched.
    pub fn merge(&self, at: &NodePath, fresh: ReportNode) -> Result<Self, TreeError> {
        let existing = self.require(at)?;
        if at.is_root() {
            if fresh.uid != at.uid() {
                return Self::from_root(fresh);
            }
            return self.update_record(at, fresh);
        }
        let mut record = existing.record.clone();
        record.entries = fresh.entries;
        let mut next = self.clone();
        next.absorb(at, record)?;
        Ok(next)
    }

    /// Replace the scalar fields of the node at `at` with `fresh`, keeping
    /// known children unless `fresh` carries its own entries.
    pub fn update_record(&self, at: &NodePath, fresh: ReportNode) -> Result<Self, TreeError> {
        self.require(at)?;
        let mut next = self.clone();
        next.absorb(at, fresh)?;
        Ok(next)
    }

    /// Replace the children of `at` with a freshly listed set.
    ///
    /// Children missing from the listing are dropped with their descendants.
    /// Shallow child records keep whatever was already fetched below them.
    pub fn merge_children(&self, at: &NodePath, children: Vec<ReportNode>) -> Result<Self, TreeError> {
        let parent = self.require(at)?;
        if parent.is_testcase() {
            return Err(TreeError::inconsistent(at, "testcases have no child nodes"));
        }
        let mut next = self.clone();
        next.replace_children(at, children)?;
        Ok(next)
    }

    /// Set the status of a single node.
    pub fn with_status(&self, at: &NodePath, status: Status) -> Result<Self, TreeError> {
        self.require(at)?;
        let mut next = self.clone();
        if let Some(node) = next.nodes.get_mut(at) {
            Arc::make_mut(node).record.status = status;
        }
        Ok(next)
    }

    fn require(&self, path: &NodePath) -> Result<&Arc<TreeNode>, TreeError> {
        self.nodes
            .get(path)
            .ok_or_else(|| TreeError::UnknownNode { path: path.clone() })
    }

    fn absorb(&mut self, path: &NodePath, mut fresh: ReportNode) -> Result<(), TreeError> {
        align_ancestry(path, &mut fresh)?;
        let entries = fresh.entries.take();
        let previous = self.nodes.get(path).cloned();

        if fresh.kind == NodeKind::TestCase {
            fresh.entries = entries.or_else(|| previous.and_then(|node| node.record.entries.clone()));
            self.nodes.insert(
                path.clone(),
                Arc::new(TreeNode {
                    record: fresh,
                    children: None,
                }),
            );
            return Ok(());
        }

        let known_children = previous.and_then(|node| node.children.clone());
        self.nodes.insert(
            path.clone(),
            Arc::new(TreeNode {
                record: fresh,
                children: known_children,
            }),
        );

        if let Some(entries) = entries {
            let children = entries
                .into_iter()
                .map(|entry| {
                    serde_json::from_value::<ReportNode>(entry)
                        .map_err(|error| TreeError::inconsistent(path, format!("invalid child record: {error}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.replace_children(path, children)?;
        }
        Ok(())
    }

    fn replace_children(&mut self, path: &NodePath, children: Vec<ReportNode>) -> Result<(), TreeError> {
        let order: Vec<String> = children.iter().map(|child| child.uid.clone()).collect();
        let mut listed = HashSet::with_capacity(order.len());
        for uid in &order {
            if !listed.insert(uid.as_str()) {
                return Err(TreeError::inconsistent(path, format!("duplicate child uid '{uid}'")));
            }
        }

        let previous = self
            .nodes
            .get(path)
            .and_then(|node| node.children.clone())
            .unwrap_or_default();
        for vanished in previous.iter().filter(|uid| !listed.contains(uid.as_str())) {
            self.remove_subtree(&path.child(vanished.clone()));
        }

        for child in children {
            let child_path = path.child(child.uid.clone());
            self.absorb(&child_path, child)?;
        }
        if let Some(node) = self.nodes.get_mut(path) {
            Arc::make_mut(node).children = Some(order);
        }
        Ok(())
    }

    fn remove_subtree(&mut self, path: &NodePath) {
        let mut pending = vec![path.clone()];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.remove(&current)
                && let Some(children) = &node.children
            {
                pending.extend(children.iter().map(|uid| current.child(uid.clone())));
            }
        }
    }
}

/// Check that a record belongs at `path`, filling in omitted ancestry.
fn align_ancestry(path: &NodePath, record: &mut ReportNode) -> Result<(), TreeError> {
    if record.uid != path.uid() {
        return Err(TreeError::inconsistent(
            path,
            format!("record uid '{}' does not match '{}'", record.uid, path.uid()),
        ));
    }
    if record.parent_uids.is_empty() {
        record.parent_uids = path.ancestors().to_vec();
    } else if record.parent_uids != path.ancestors() {
        return Err(TreeError::inconsistent(
            path,
            format!("parent uids {:?} do not match the tree position", record.parent_uids),
        ));
    }
    Ok(())
}

/// Shared handle to the current tree snapshot.
///
/// Writers build the next tree from the latest snapshot while holding the
/// write lock, so concurrent merges never overwrite each other.
#[derive(Debug, Clone, Default)]
pub struct TreeStore {
    current: Arc<RwLock<Arc<ReportTree>>>,
}

impl TreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<ReportTree> {
        self.current.read().expect("tree lock").clone()
    }

    pub fn replace(&self, tree: ReportTree) -> Arc<ReportTree> {
        let next = Arc::new(tree);
        *self.current.write().expect("tree lock") = next.clone();
        next
    }

    /// Derive and install the next snapshot. On error the current snapshot is kept.
    pub fn update<F>(&self, change: F) -> Result<Arc<ReportTree>, TreeError>
    where
        F: FnOnce(&ReportTree) -> Result<ReportTree, TreeError>,
    {
        let mut current = self.current.write().expect("tree lock");
        let next = Arc::new(change(&current)?);
        *current = next.clone();
        Ok(next)
    }

    /// Like [`TreeStore::update`], but `change` may decline by returning `None`.
    pub fn update_if<F>(&self, change: F) -> Result<Option<Arc<ReportTree>>, TreeError>
    where
        F: FnOnce(&ReportTree) -> Result<Option<ReportTree>, TreeError>,
    {
        let mut current = self.current.write().expect("tree lock");
        let Some(next) = change(&current)? else {
            return Ok(None);
        };
        let next = Arc::new(next);
        *current = next.clone();
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{group, plan, testcase};

    fn path(segments: &[&str]) -> NodePath {
        NodePath::from_segments(segments.iter().map(|segment| segment.to_string()).collect()).expect("non-empty path")
    }

    fn loaded_tree() -> ReportTree {
        let tree = ReportTree::from_root(plan("P", &["T1", "T2"])).unwrap();
        let tree = tree
            .merge_children(
                &path(&["P"]),
                vec![group("T1", &["P"], &["S1"]), group("T2", &["P"], &["S2"])],
            )
            .unwrap();
        tree.merge_children(&path(&["P", "T1"]), vec![group("S1", &["P", "T1"], &["C1"])])
            .unwrap()
    }

    #[test]
    fn children_keep_server_order() {
        let tree = loaded_tree();
        let uids: Vec<&str> = tree
            .children(&path(&["P"]))
            .unwrap()
            .into_iter()
            .map(|node| node.uid())
            .collect();
        assert_eq!(uids, vec!["T1", "T2"]);
        assert!(tree.children(&path(&["P", "T2"])).is_none());
    }

    #[test]
    fn merging_children_leaves_other_nodes_shared() {
        let tree = loaded_tree();
        let merged = tree
            .merge_children(&path(&["P", "T2"]), vec![group("S2", &["P", "T2"], &[])])
            .unwrap();

        for unchanged in [path(&["P"]), path(&["P", "T1"]), path(&["P", "T1", "S1"])] {
            assert!(Arc::ptr_eq(tree.get(&unchanged).unwrap(), merged.get(&unchanged).unwrap()));
        }
        assert!(merged.contains(&path(&["P", "T2", "S2"])));
        assert!(!tree.contains(&path(&["P", "T2", "S2"])));
    }

    #[test]
    fn shallow_relisting_keeps_fetched_grandchildren() {
        let tree = loaded_tree();
        let relisted = tree
            .merge_children(
                &path(&["P"]),
                vec![group("T1", &["P"], &["S1"]), group("T2", &["P"], &["S2"])],
            )
            .unwrap();
        assert!(relisted.contains(&path(&["P", "T1", "S1"])));
        assert!(relisted.get(&path(&["P", "T1"])).unwrap().is_fetched());
    }

    #[test]
    fn vanished_children_are_removed_with_descendants() {
        let tree = loaded_tree();
        let pruned = tree
            .merge_children(&path(&["P"]), vec![group("T2", &["P"], &["S2"])])
            .unwrap();
        assert!(!pruned.contains(&path(&["P", "T1"])));
        assert!(!pruned.contains(&path(&["P", "T1", "S1"])));
        assert_eq!(pruned.len(), 2);
    }

    #[test]
    fn inconsistent_listings_are_rejected() {
        let tree = loaded_tree();
        let duplicate = tree.merge_children(
            &path(&["P"]),
            vec![group("T1", &["P"], &[]), group("T1", &["P"], &[])],
        );
        assert!(matches!(duplicate, Err(TreeError::Inconsistent { .. })));

        let misplaced = tree.merge_children(&path(&["P"]), vec![group("T3", &["Other"], &[])]);
        assert!(matches!(misplaced, Err(TreeError::Inconsistent { .. })));

        let unknown = tree.merge_children(&path(&["P", "Nope"]), Vec::new());
        assert!(matches!(unknown, Err(TreeError::UnknownNode { .. })));
    }

    #[test]
    fn omitted_ancestry_is_filled_in() {
        let tree = loaded_tree();
        let merged = tree
            .merge_children(&path(&["P", "T2"]), vec![group("S2", &[], &[])])
            .unwrap();
        let node = merged.get(&path(&["P", "T2", "S2"])).unwrap();
        assert_eq!(node.record().parent_uids, vec!["P".to_string(), "T2".to_string()]);
    }

    #[test]
    fn root_merge_replaces_scalars_but_keeps_children() {
        let tree = loaded_tree();
        let mut fresh = plan("P", &["T1", "T2"]);
        fresh.status = Status::Running;
        let merged = tree.merge(&path(&["P"]), fresh).unwrap();
        assert_eq!(merged.root().unwrap().record().status, Status::Running);
        assert_eq!(merged.len(), tree.len());
    }

    #[test]
    fn root_merge_with_new_plan_rebuilds() {
        let tree = loaded_tree();
        let merged = tree.merge(&path(&["P"]), plan("Q", &[])).unwrap();
        assert_eq!(merged.root_path(), Some(&path(&["Q"])));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn nested_entries_are_absorbed_as_children() {
        let tree = loaded_tree();
        let mut fresh = group("S1", &["P", "T1"], &["C1"]);
        fresh.entries = Some(vec![serde_json::to_value(testcase("C1", &["P", "T1", "S1"], Vec::new())).unwrap()]);
        let merged = tree.merge(&path(&["P", "T1", "S1"]), fresh).unwrap();
        let case = merged.get(&path(&["P", "T1", "S1", "C1"])).unwrap();
        assert!(case.is_fetched());
        assert_eq!(case.assertions(), Some(&[][..]));
    }

    #[test]
    fn status_changes_touch_one_node() {
        let tree = loaded_tree();
        let updated = tree.with_status(&path(&["P", "T1"]), Status::Running).unwrap();
        assert_eq!(updated.get(&path(&["P", "T1"])).unwrap().record().status, Status::Running);
        assert_eq!(tree.get(&path(&["P", "T1"])).unwrap().record().status, Status::Ready);
        assert!(Arc::ptr_eq(tree.get(&path(&["P", "T2"])).unwrap(), updated.get(&path(&["P", "T2"])).unwrap()));
    }

    #[test]
    fn depth_first_visits_parents_before_children() {
        let order: Vec<String> = loaded_tree()
            .depth_first()
            .into_iter()
            .map(|(path, _)| path.to_string())
            .collect();
        assert_eq!(order, vec!["P", "P/T1", "P/T1/S1", "P/T2"]);
    }

    #[test]
    fn store_keeps_snapshot_on_failed_update() {
        let store = TreeStore::new();
        store.replace(loaded_tree());
        let before = store.snapshot();
        let result = store.update(|tree| tree.merge_children(&path(&["P", "Missing"]), Vec::new()));
        assert!(result.is_err());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn declined_update_keeps_snapshot() {
        let store = TreeStore::new();
        store.replace(loaded_tree());
        let before = store.snapshot();
        assert!(store.update_if(|_| Ok(None)).unwrap().is_none());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));

        let next = store
            .update_if(|tree| tree.with_status(&path(&["P"]), Status::Running).map(Some))
            .unwrap();
        assert!(next.is_some());
        assert_eq!(store.snapshot().root().unwrap().record().status, Status::Running);
    }
}
