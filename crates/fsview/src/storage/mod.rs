//! Low-level storage primitives: the slot arena, shared path keys, and
//! the tree entity records.

mod arena;
mod node;
mod pathkey;

pub use arena::{Arena, ArenaKey, DirIndex, FileIndex};
pub use node::{now_secs, ClockStamp, DirNode, FileNode, FileStat, NodeFileType};
pub use pathkey::PathKey;
