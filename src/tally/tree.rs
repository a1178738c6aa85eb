//! Path-tree tally: a trie of directories and files, each node carrying
//! per-author accumulation, later ranked so every node knows its
//! attributed author.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::MAIN_SEPARATOR;

use crate::error::{GwhoError, Result};
use crate::git::Commit;
use crate::tally::{compare_entries, FinalTally, Tallier, TallyBuilder, TallyMode, TallyOpts};

/// One directory or file in the authorship tree. Child keys are single
/// path components until [`elide`] joins collapsed chains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeNode {
    pub tally: FinalTally,
    pub children: BTreeMap<String, TreeNode>,
    pub in_work_tree: bool,
    pub(crate) tallies: HashMap<String, TallyBuilder>,
}

impl TreeNode {
    /// True when no commit was ever ingested into this tree.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.tallies.is_empty()
    }

    /// Picks each node's winning author by the mode metric (ties broken
    /// by author key) and snapshots it into `tally`. Post-order.
    pub fn rank(mut self, mode: TallyMode) -> TreeNode {
        let children = std::mem::take(&mut self.children);
        self.children = children
            .into_iter()
            .map(|(key, child)| (key, child.rank(mode)))
            .collect();

        if let Some((_, builder)) = self
            .tallies
            .iter()
            .min_by(|(ka, a), (kb, b)| compare_entries((ka, a), (kb, b), mode))
        {
            self.tally = builder.finalize();
        }
        self.tallies.clear();
        self
    }
}

fn merge_nodes(a: &mut TreeNode, b: TreeNode) {
    a.in_work_tree |= b.in_work_tree;
    for (key, builder) in b.tallies {
        a.tallies.entry(key).or_default().merge(builder);
    }
    for (key, child) in b.children {
        match a.children.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => {
                merge_nodes(entry.into_mut(), child);
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(child);
            }
        }
    }
}

/// The tree axis. Zero-diff commits that are counted (merges under
/// `--merges`) accumulate on the root's builder map directly; they have
/// no path to hang a child node on and never render.
pub struct TreeTallier<'a> {
    pub opts: TallyOpts,
    pub wtree: &'a HashSet<String>,
}

impl Tallier for TreeTallier<'_> {
    type Partial = TreeNode;

    fn start(&self) -> TreeNode {
        TreeNode::default()
    }

    fn add(&self, root: &mut TreeNode, commit: &Commit) {
        if !self.opts.is_counted(commit) {
            return;
        }
        let key = self.opts.key.of(commit);

        if commit.file_diffs.is_empty() {
            root.tallies
                .entry(key.to_string())
                .or_default()
                .observe_commit(commit);
            return;
        }

        for diff in &commit.file_diffs {
            let path = diff.dest_path();
            let present = self.wtree.contains(path);

            let mut node: &mut TreeNode = root;
            update_node(node, key, commit, diff, present);
            for component in path.split('/').filter(|c| !c.is_empty()) {
                node = node.children.entry(component.to_string()).or_default();
                update_node(node, key, commit, diff, present);
            }
        }
    }

    fn merge(&self, mut a: TreeNode, b: TreeNode) -> TreeNode {
        merge_nodes(&mut a, b);
        a
    }
}

fn update_node(
    node: &mut TreeNode,
    key: &str,
    commit: &Commit,
    diff: &crate::git::FileDiff,
    present: bool,
) {
    let builder = node.tallies.entry(key.to_string()).or_default();
    builder.observe_commit(commit);
    builder.observe_diff(diff);
    node.in_work_tree |= present;
}

/// Sequential tree tally over a commit stream. Signals
/// [`GwhoError::EmptyResult`] when nothing was ingested so the caller
/// can exit cleanly without rendering.
pub fn tally_commits_tree<I>(
    commits: I,
    opts: TallyOpts,
    wtree: &HashSet<String>,
) -> Result<TreeNode>
where
    I: Iterator<Item = Result<Commit>>,
{
    let tallier = TreeTallier { opts, wtree };
    let mut root = tallier.start();
    for item in commits {
        tallier.add(&mut root, &item?);
    }
    if root.is_empty() {
        return Err(GwhoError::EmptyResult);
    }
    Ok(root)
}

/// Collapses chains of single-child internal nodes with equal tallies
/// into one node whose key joins the components with the path
/// separator. Display-shaping only; call after [`TreeNode::rank`].
pub fn elide(mut root: TreeNode) -> TreeNode {
    let children = std::mem::take(&mut root.children);
    root.children = children
        .into_iter()
        .map(|(key, child)| collapse(key, child))
        .collect();
    root
}

fn collapse(mut key: String, mut node: TreeNode) -> (String, TreeNode) {
    loop {
        if node.children.len() != 1 {
            break;
        }
        let (child_key, child) = node.children.pop_first().expect("checked length");
        if node.tally != child.tally {
            node.children.insert(child_key, child);
            break;
        }
        key = format!("{key}{MAIN_SEPARATOR}{child_key}");
        node = child;
    }

    let children = std::mem::take(&mut node.children);
    node.children = children
        .into_iter()
        .map(|(k, child)| collapse(k, child))
        .collect();
    (key, node)
}
