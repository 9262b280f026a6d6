//! Navigation selection over the report tree.
//!
//! The selection is the chain of nodes from the plan down to the node whose
//! content is shown. It is rebuilt, never patched in place: every operation
//! returns a new [`SelectionPath`].

use iview_types::{Category, NodePath, ReportNode};
use serde::Serialize;

use crate::error::NavigationError;
use crate::tree::ReportTree;

/// One step of the selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionEntry {
    pub uid: String,
    #[serde(rename = "type")]
    pub category: Category,
}

impl SelectionEntry {
    pub fn new(uid: impl Into<String>, category: Category) -> Self {
        Self {
            uid: uid.into(),
            category,
        }
    }
}

/// Ordered root-to-leaf selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectionPath(Vec<SelectionEntry>);

impl SelectionPath {
    pub fn new(entries: Vec<SelectionEntry>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[SelectionEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&SelectionEntry> {
        self.0.last()
    }

    /// Tree address of the selected node, `None` for an empty selection.
    pub fn node_path(&self) -> Option<NodePath> {
        NodePath::from_segments(self.0.iter().map(|entry| entry.uid.clone()).collect())
    }

    /// Tree address of the entry at `depth`.
    pub fn node_path_at(&self, depth: usize) -> Option<NodePath> {
        let prefix = self.0.get(..=depth)?;
        NodePath::from_segments(prefix.iter().map(|entry| entry.uid.clone()).collect())
    }

    fn push(&mut self, entry: SelectionEntry) {
        self.0.push(entry);
    }
}

/// Select the plan and descend while the current node has exactly one
/// fetched child.
pub fn auto_select(tree: &ReportTree) -> SelectionPath {
    let Some(root) = tree.root() else {
        return SelectionPath::default();
    };
    let selection = SelectionPath::new(vec![SelectionEntry::new(root.uid(), Category::Testplan)]);
    extend_single_children(tree, selection)
}

/// Continue a selection downwards while there is a single child to follow.
pub fn extend_single_children(tree: &ReportTree, mut selection: SelectionPath) -> SelectionPath {
    let Some(mut current) = selection.node_path() else {
        return selection;
    };
    while let Some(children) = tree.children(&current) {
        let [only] = children.as_slice() else {
            break;
        };
        selection.push(SelectionEntry::new(only.uid(), only.record().category()));
        current = current.child(only.uid().to_string());
    }
    selection
}

/// Apply a click on `clicked` made at `depth` of `selection`.
///
/// The selection is truncated to its first `depth` entries and the clicked
/// node appended. Depth 0 only accepts the plan root; deeper clicks must name
/// a direct child of the entry at `depth - 1`.
pub fn handle_nav_click(
    selection: &SelectionPath,
    clicked: &ReportNode,
    depth: usize,
) -> Result<SelectionPath, NavigationError> {
    if depth > selection.len() {
        return Err(NavigationError::DepthOutOfRange {
            depth,
            length: selection.len(),
        });
    }

    let category = if depth == 0 {
        if !clicked.parent_uids.is_empty() {
            return Err(NavigationError::NotRoot {
                uid: clicked.uid.clone(),
            });
        }
        Category::Testplan
    } else {
        let expected_ancestry = selection.entries()[..depth].iter().map(|entry| entry.uid.as_str());
        if !clicked.parent_uids.iter().map(String::as_str).eq(expected_ancestry) {
            return Err(NavigationError::NotAChild {
                uid: clicked.uid.clone(),
                depth,
            });
        }
        clicked.category()
    };

    let mut entries = selection.entries()[..depth].to_vec();
    entries.push(SelectionEntry::new(clicked.uid.clone(), category));
    Ok(SelectionPath::new(entries))
}

/// Re-check a selection against a new tree.
///
/// Entries are kept up to the first one that no longer resolves. A selection
/// that lost entries is extended again through single children; one that
/// lost its root is rebuilt from scratch.
pub fn revalidate(selection: &SelectionPath, tree: &ReportTree) -> SelectionPath {
    let surviving = (0..selection.len())
        .take_while(|&depth| {
            selection
                .node_path_at(depth)
                .is_some_and(|path| tree.contains(&path))
        })
        .count();

    if surviving == selection.len() && surviving > 0 {
        return selection.clone();
    }
    if surviving == 0 {
        return auto_select(tree);
    }
    let kept = SelectionPath::new(selection.entries()[..surviving].to_vec());
    extend_single_children(tree, kept)
}
