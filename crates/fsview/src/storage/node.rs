//! Tree entity records: file nodes, directory nodes, stat data.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::arena::{DirIndex, FileIndex};
use super::pathkey::PathKey;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum NodeFileType {
    /// Regular file
    File = 0,
    /// Directory
    Dir = 1,
    /// Symbolic link
    Symlink = 2,
    /// Unknown or other file type
    Unknown = 3,
}

impl NodeFileType {
    /// Single-character rendering used in query results (`f`, `d`, `l`, `?`).
    pub fn as_char(self) -> char {
        match self {
            Self::File => 'f',
            Self::Dir => 'd',
            Self::Symlink => 'l',
            Self::Unknown => '?',
        }
    }
}

impl From<std::fs::FileType> for NodeFileType {
    fn from(file_type: std::fs::FileType) -> Self {
        if file_type.is_file() {
            NodeFileType::File
        } else if file_type.is_dir() {
            NodeFileType::Dir
        } else if file_type.is_symlink() {
            NodeFileType::Symlink
        } else {
            NodeFileType::Unknown
        }
    }
}

/// Stat fields carried on every file node, lowered from `std::fs::Metadata`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FileStat {
    pub mode: u32,
    pub size: u64,
    /// Modification time as Unix seconds.
    pub mtime: i64,
    /// Inode change time as Unix seconds.
    pub ctime: i64,
    pub ino: u64,
    pub dev: u64,
    pub file_type: NodeFileType,
}

impl Default for FileStat {
    fn default() -> Self {
        Self {
            mode: 0,
            size: 0,
            mtime: 0,
            ctime: 0,
            ino: 0,
            dev: 0,
            file_type: NodeFileType::Unknown,
        }
    }
}

impl FileStat {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            mode: metadata.mode(),
            size: metadata.len(),
            mtime: metadata.mtime(),
            ctime: metadata.ctime(),
            ino: metadata.ino(),
            dev: metadata.dev(),
            file_type: NodeFileType::from(metadata.file_type()),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            mode: if metadata.permissions().readonly() {
                0o444
            } else {
                0o644
            },
            size: metadata.len(),
            mtime,
            ctime: mtime,
            ino: 0,
            dev: 0,
            file_type: NodeFileType::from(metadata.file_type()),
        }
    }

    /// True when a fresh stat describes different content than this one.
    pub fn content_changed(&self, other: &FileStat) -> bool {
        self.size != other.size || self.mtime != other.mtime || self.ino != other.ino
    }
}

/// A (tick, wall clock) pair recorded when a file is observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClockStamp {
    pub tick: u32,
    /// Unix seconds.
    pub timestamp: i64,
}

impl ClockStamp {
    pub fn new(tick: u32, timestamp: i64) -> Self {
        Self { tick, timestamp }
    }
}

/// Current wall clock as Unix seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One observed path within the root.
///
/// Directory entries get a `FileNode` in their parent as well as their
/// own `DirNode`; that is how type and deletion queries can report
/// directories.
#[derive(Debug)]
pub struct FileNode {
    /// Leaf name within the parent directory.
    pub name: PathKey,
    /// Containing directory.
    pub parent: DirIndex,
    /// Present on disk at last stat.
    pub exists: bool,
    /// A notification implied possible removal; cleared on re-observation.
    pub maybe_deleted: bool,
    pub stat: FileStat,
    /// Last observed change.
    pub otime: ClockStamp,
    /// First observation.
    pub cclock: ClockStamp,

    // Recency list links across all files of the root.
    // `next` points toward older entries, `prev` toward newer.
    pub(crate) recency_prev: Option<FileIndex>,
    pub(crate) recency_next: Option<FileIndex>,

    // Suffix bucket membership. `suffix_key` is Some iff linked.
    pub(crate) suffix_key: Option<PathKey>,
    pub(crate) suffix_prev: Option<FileIndex>,
    pub(crate) suffix_next: Option<FileIndex>,
}

impl FileNode {
    pub fn new(name: PathKey, parent: DirIndex, stamp: ClockStamp) -> Self {
        Self {
            name,
            parent,
            exists: false,
            maybe_deleted: false,
            stat: FileStat::default(),
            otime: stamp,
            cclock: stamp,
            recency_prev: None,
            recency_next: None,
            suffix_key: None,
            suffix_prev: None,
            suffix_next: None,
        }
    }
}

/// One directory within the root.
#[derive(Debug)]
pub struct DirNode {
    /// Leaf name; empty for the root directory.
    pub name: PathKey,
    /// `None` only for the root directory.
    pub parent: Option<DirIndex>,
    pub files: HashMap<PathKey, FileIndex>,
    pub subdirs: HashMap<PathKey, DirIndex>,
    /// Whether the directory was present at its most recent stat.
    pub last_check_existed: bool,
}

impl DirNode {
    pub fn new(name: PathKey, parent: Option<DirIndex>) -> Self {
        Self {
            name,
            parent,
            files: HashMap::new(),
            subdirs: HashMap::new(),
            last_check_existed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_chars() {
        assert_eq!(NodeFileType::File.as_char(), 'f');
        assert_eq!(NodeFileType::Dir.as_char(), 'd');
        assert_eq!(NodeFileType::Symlink.as_char(), 'l');
    }

    #[test]
    fn content_changed_tracks_size_mtime_ino() {
        let a = FileStat {
            size: 10,
            mtime: 100,
            ino: 7,
            ..FileStat::default()
        };
        let same = a;
        assert!(!a.content_changed(&same));

        let grown = FileStat { size: 11, ..a };
        assert!(a.content_changed(&grown));

        let replaced = FileStat { ino: 8, ..a };
        assert!(a.content_changed(&replaced));
    }
}
