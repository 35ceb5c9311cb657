//! Level metadata tree: `{file_name, level, range_min, range_max}`
//! records, keyed by level, with the per-level ordering rules compaction
//! and the range iterators depend on.

use crate::driver::format_file_name;
use std::collections::BTreeMap;
use std::sync::Arc;

/// File metadata shared between the level tree and any iterator currently
/// traversing it: reference-counted, no back-pointer to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub file_name: String,
    pub level: u8,
    pub range_min: Vec<u8>,
    pub range_max: Vec<u8>,
}

impl TreeNode {
    pub fn new(file_name: String, level: u8, range_min: Vec<u8>, range_max: Vec<u8>) -> Self {
        Self { file_name, level, range_min, range_max }
    }

    pub fn overlaps(&self, lower: &[u8], upper: &[u8]) -> bool {
        self.range_min.as_slice() <= upper && lower <= self.range_max.as_slice()
    }
}

/// `level -> ordered files`. Level 0 entries are ordered by age (insertion
/// order, oldest first) and may overlap in range; levels >= 1 are kept
/// disjoint and sorted by `range_min`.
#[derive(Default)]
pub struct LevelTree {
    levels: BTreeMap<u8, Vec<Arc<TreeNode>>>,
}

impl LevelTree {
    pub fn new() -> Self {
        Self { levels: BTreeMap::new() }
    }

    pub fn insert(&mut self, node: TreeNode) {
        let level = node.level;
        let node = Arc::new(node);
        let files = self.levels.entry(level).or_default();
        if level == 0 {
            files.push(node);
        } else {
            let pos = files.partition_point(|f| f.range_min < node.range_min);
            files.insert(pos, node);
        }
    }

    pub fn remove(&mut self, level: u8, file_name: &str) -> Option<Arc<TreeNode>> {
        let files = self.levels.get_mut(&level)?;
        let idx = files.iter().position(|f| f.file_name == file_name)?;
        Some(files.remove(idx))
    }

    pub fn files_at(&self, level: u8) -> &[Arc<TreeNode>] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn file_count(&self, level: u8) -> usize {
        self.files_at(level).len()
    }

    pub fn max_level(&self) -> u8 {
        self.levels.keys().copied().max().unwrap_or(0)
    }

    pub fn levels_with_files(&self) -> impl Iterator<Item = u8> + '_ {
        self.levels.iter().filter(|(_, files)| !files.is_empty()).map(|(&l, _)| l)
    }

    /// Level 0's oldest file (the age-first ordering), used to pick the
    /// L0->L1 compaction seed.
    pub fn oldest_l0(&self) -> Option<Arc<TreeNode>> {
        self.files_at(0).first().cloned()
    }

    /// Every file at `level` whose range overlaps the closed interval
    /// `[lower, upper]`. For L0 this may be several files; for `level >= 1`
    /// the disjoint invariant means at most one, but the caller doesn't
    /// need to special-case it.
    pub fn overlapping(&self, level: u8, lower: &[u8], upper: &[u8]) -> Vec<Arc<TreeNode>> {
        self.files_at(level).iter().filter(|f| f.overlaps(lower, upper)).cloned().collect()
    }

    /// The unique candidate at a disjoint level (`level >= 1`) for
    /// `user_key`, found by `lower_bound` on `range_min`.
    pub fn candidate_at(&self, level: u8, user_key: &[u8]) -> Option<Arc<TreeNode>> {
        let files = self.files_at(level);
        let pos = files.partition_point(|f| f.range_min.as_slice() <= user_key);
        if pos == 0 {
            return None;
        }
        let candidate = &files[pos - 1];
        if user_key <= candidate.range_max.as_slice() {
            Some(candidate.clone())
        } else {
            None
        }
    }

    /// The first disjoint-level file past `cursor` (exclusive), in
    /// `range_min` order — used by the `Lk -> Lk+1` compaction cursor.
    pub fn next_after(&self, level: u8, cursor: &[u8]) -> Option<Arc<TreeNode>> {
        self.files_at(level).iter().find(|f| f.range_min.as_slice() > cursor).cloned()
            .or_else(|| self.files_at(level).first().cloned())
    }

    pub fn serialize(&self) -> Vec<(String, u8, Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        for (level, files) in &self.levels {
            for f in files {
                out.push((f.file_name.clone(), *level, f.range_min.clone(), f.range_max.clone()));
            }
        }
        out
    }

    pub fn restore(entries: Vec<(String, u8, Vec<u8>, Vec<u8>)>) -> Self {
        let mut tree = Self::new();
        for (file_name, level, range_min, range_max) in entries {
            tree.insert(TreeNode::new(file_name, level, range_min, range_max));
        }
        tree
    }
}

/// Next file name in the monotonic sstable sequence, fixed-width.
pub fn next_file_name(sstable_seq: u64) -> String {
    format_file_name(sstable_seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, level: u8, min: &str, max: &str) -> TreeNode {
        TreeNode::new(name.to_string(), level, min.as_bytes().to_vec(), max.as_bytes().to_vec())
    }

    #[test]
    fn l1_stays_sorted_by_range_min() {
        let mut tree = LevelTree::new();
        tree.insert(node("b", 1, "m", "p"));
        tree.insert(node("a", 1, "a", "f"));
        let files = tree.files_at(1);
        assert_eq!(files[0].file_name, "a");
        assert_eq!(files[1].file_name, "b");
    }

    #[test]
    fn l0_preserves_age_order() {
        let mut tree = LevelTree::new();
        tree.insert(node("first", 0, "a", "z"));
        tree.insert(node("second", 0, "a", "z"));
        assert_eq!(tree.oldest_l0().unwrap().file_name, "first");
    }

    #[test]
    fn candidate_lookup_finds_disjoint_owner() {
        let mut tree = LevelTree::new();
        tree.insert(node("a", 1, "a", "f"));
        tree.insert(node("b", 1, "g", "m"));
        assert_eq!(tree.candidate_at(1, b"k").unwrap().file_name, "b");
        assert!(tree.candidate_at(1, b"z").is_none());
    }

    #[test]
    fn overlaps_includes_a_single_key_file_against_itself() {
        let f = node("a", 0, "k", "k");
        assert!(f.overlaps(b"k", b"k"));
    }

    #[test]
    fn overlapping_includes_dst_file_starting_at_union_max() {
        let mut tree = LevelTree::new();
        tree.insert(node("a", 1, "m", "m"));
        let found = tree.overlapping(1, b"a", b"m");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name, "a");
    }

    #[test]
    fn remove_drops_exactly_the_named_file() {
        let mut tree = LevelTree::new();
        tree.insert(node("a", 1, "a", "f"));
        tree.insert(node("b", 1, "g", "m"));
        tree.remove(1, "a");
        assert_eq!(tree.file_count(1), 1);
        assert_eq!(tree.files_at(1)[0].file_name, "b");
    }
}
