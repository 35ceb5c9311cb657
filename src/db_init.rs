//! `DB_INIT`: the single blob round-tripped through the driver's
//! `open_db`/`close_db` out-of-band channel. Carries everything `open`
//! needs to resume exactly where the previous session's `close` left
//! off: log position, the two monotonic counters, and the level tree.
//! Reuses [`LogState`]'s own codec for the log-position prefix instead
//! of duplicating it.

use crate::config::FILE_NAME_WIDTH;
use crate::log::LogState;
use crate::status::{Result, Status};
use crate::tree::LevelTree;
use byteorder::{ByteOrder, LittleEndian};

/// One level-tree entry as it appears inside `DB_INIT`: a fixed 35-byte
/// file name, the level, and the user-key range.
type TreeEntry = (String, u8, Vec<u8>, Vec<u8>);

/// Everything persisted across `open`/`close`: the log manager's resume
/// position, the global sequence counter, the sstable sequence counter,
/// and the serialized level tree.
#[derive(Debug, Clone)]
pub struct DbInit {
    pub log_state: LogState,
    pub global_seq: u64,
    pub sstable_seq: u64,
    pub tree_entries: Vec<TreeEntry>,
}

impl DbInit {
    pub fn fresh() -> Self {
        Self {
            log_state: LogState {
                next_lbn: 0,
                current_lbn: 0,
                page_offset: 0,
                byte_offset: 0,
                first_block_offset: 0,
                block_list: Vec::new(),
            },
            global_seq: 0,
            sstable_seq: 0,
            tree_entries: Vec::new(),
        }
    }

    pub fn from_tree(log_state: LogState, global_seq: u64, sstable_seq: u64, tree: &LevelTree) -> Self {
        Self { log_state, global_seq, sstable_seq, tree_entries: tree.serialize() }
    }

    pub fn into_tree(self) -> LevelTree {
        LevelTree::restore(self.tree_entries)
    }

    /// `log_state (LogState::encode) | global_seq(8) | sstable_seq(8) |
    /// tree_count(4) | [file_name(35) | level(1) | range_min_len(2) |
    /// range_min | range_max_len(2) | range_max]` — all little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.log_state.encode();
        let mut seqs = [0u8; 16];
        LittleEndian::write_u64(&mut seqs[0..8], self.global_seq);
        LittleEndian::write_u64(&mut seqs[8..16], self.sstable_seq);
        out.extend_from_slice(&seqs);

        let mut count = [0u8; 4];
        LittleEndian::write_u32(&mut count, self.tree_entries.len() as u32);
        out.extend_from_slice(&count);

        for (file_name, level, range_min, range_max) in &self.tree_entries {
            let name_bytes = file_name.as_bytes();
            assert_eq!(name_bytes.len(), FILE_NAME_WIDTH, "tree entry file name must be {FILE_NAME_WIDTH} bytes");
            out.extend_from_slice(name_bytes);
            out.push(*level);
            let mut min_len = [0u8; 2];
            LittleEndian::write_u16(&mut min_len, range_min.len() as u16);
            out.extend_from_slice(&min_len);
            out.extend_from_slice(range_min);
            let mut max_len = [0u8; 2];
            LittleEndian::write_u16(&mut max_len, range_max.len() as u16);
            out.extend_from_slice(&max_len);
            out.extend_from_slice(range_max);
        }
        out
    }

    /// Empty input decodes to [`DbInit::fresh`] (a brand-new device reports
    /// an empty `DB_INIT` blob, per [`crate::driver::FileBlockDevice`]).
    /// Anything else that fails to parse is `Corruption`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Ok(Self::fresh());
        }
        let (log_state, mut pos) = LogState::decode(buf)?;

        if buf.len() < pos + 16 {
            return Err(Status::corruption("truncated DB_INIT: missing sequence counters"));
        }
        let global_seq = LittleEndian::read_u64(&buf[pos..pos + 8]);
        let sstable_seq = LittleEndian::read_u64(&buf[pos + 8..pos + 16]);
        pos += 16;

        if buf.len() < pos + 4 {
            return Err(Status::corruption("truncated DB_INIT: missing tree entry count"));
        }
        let count = LittleEndian::read_u32(&buf[pos..pos + 4]) as usize;
        pos += 4;

        let mut tree_entries = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.len() < pos + FILE_NAME_WIDTH + 1 + 2 {
                return Err(Status::corruption("truncated DB_INIT: tree entry header"));
            }
            // `format_file_name` zero-pads with the ASCII digit '0', so the
            // full 35-byte field is always valid decimal text — no trimming.
            let file_name = String::from_utf8_lossy(&buf[pos..pos + FILE_NAME_WIDTH]).into_owned();
            pos += FILE_NAME_WIDTH;
            let level = buf[pos];
            pos += 1;
            let min_len = LittleEndian::read_u16(&buf[pos..pos + 2]) as usize;
            pos += 2;
            if buf.len() < pos + min_len + 2 {
                return Err(Status::corruption("truncated DB_INIT: range_min"));
            }
            let range_min = buf[pos..pos + min_len].to_vec();
            pos += min_len;
            let max_len = LittleEndian::read_u16(&buf[pos..pos + 2]) as usize;
            pos += 2;
            if buf.len() < pos + max_len {
                return Err(Status::corruption("truncated DB_INIT: range_max"));
            }
            let range_max = buf[pos..pos + max_len].to_vec();
            pos += max_len;
            tree_entries.push((file_name, level, range_min, range_max));
        }

        Ok(Self { log_state, global_seq, sstable_seq, tree_entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::format_file_name;
    use crate::tree::{LevelTree, TreeNode};

    #[test]
    fn empty_buffer_decodes_to_fresh() {
        let decoded = DbInit::decode(&[]).unwrap();
        assert_eq!(decoded.global_seq, 0);
        assert!(decoded.tree_entries.is_empty());
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let mut tree = LevelTree::new();
        tree.insert(TreeNode::new(format_file_name(1), 0, b"a".to_vec(), b"m".to_vec()));
        tree.insert(TreeNode::new(format_file_name(2), 1, b"n".to_vec(), b"z".to_vec()));

        let log_state = LogState {
            next_lbn: 3,
            current_lbn: 2,
            page_offset: 7,
            byte_offset: 100,
            first_block_offset: 0,
            block_list: vec![1, 2],
        };
        let init = DbInit::from_tree(log_state, 42, 3, &tree);
        let decoded = DbInit::decode(&init.encode()).unwrap();

        assert_eq!(decoded.global_seq, 42);
        assert_eq!(decoded.sstable_seq, 3);
        assert_eq!(decoded.log_state.current_lbn, 2);
        assert_eq!(decoded.log_state.byte_offset, 100);
        assert_eq!(decoded.tree_entries.len(), 2);
        let restored = decoded.into_tree();
        assert_eq!(restored.file_count(0), 1);
        assert_eq!(restored.file_count(1), 1);
    }

    #[test]
    fn truncated_buffer_is_corruption() {
        assert!(DbInit::decode(&[1, 2, 3]).is_err());
    }
}
