/*!
 * Two-way sync database
 *
 * One snapshot file per folder pair at `<base>/sync.ffs_db`, holding the
 * post-sync state of the tree under that pair. The automatic direction
 * policy compares both current sides against it to tell which side
 * changed. A missing, unreadable or schema-mismatched file is simply "no
 * database": the resolver falls back to a one-time mirror and the file is
 * rebuilt at the end of the run.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, SyncError};
use crate::hierarchy::{CompareResult, DirMapping};
use crate::pathutil::staging_path;

/// Well-known database file name inside a sync root
pub const DB_FILE_NAME: &str = "sync.ffs_db";

/// Current database schema
pub const DB_SCHEMA_VERSION: u8 = 1;

/// Previous state of one item, keyed by its relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbNode {
    File {
        size: u64,
        mtime: i64,
        file_id: Option<u64>,
    },
    Symlink {
        mtime: i64,
        target: String,
    },
    Dir,
}

/// Snapshot of one folder pair's last in-sync state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncDatabase {
    entries: BTreeMap<String, DbNode>,
}

impl SyncDatabase {
    /// Load the snapshot for a base directory. `None` covers every "no
    /// usable database" case: absent file, short file, foreign schema,
    /// undecodable body.
    pub fn load(base: &Path) -> Option<Self> {
        let path = base.join(DB_FILE_NAME);
        let bytes = std::fs::read(&path).ok()?;
        let (&schema, body) = bytes.split_first()?;
        if schema != DB_SCHEMA_VERSION {
            tracing::info!(
                "sync database {} has schema {}, expected {}; rebuilding",
                path.display(),
                schema,
                DB_SCHEMA_VERSION
            );
            return None;
        }
        match bincode::deserialize::<BTreeMap<String, DbNode>>(body) {
            Ok(entries) => Some(Self { entries }),
            Err(err) => {
                tracing::warn!("sync database {} unreadable: {}", path.display(), err);
                None
            }
        }
    }

    /// Write the snapshot under a base directory, staged and committed by
    /// rename so a crash never leaves a half-written database.
    pub fn save(&self, base: &Path) -> Result<()> {
        let path = base.join(DB_FILE_NAME);
        let body = bincode::serialize(&self.entries)
            .map_err(|err| SyncError::database(&path, err.to_string()))?;

        let staging = staging_path(&path);
        let guard = crate::fs::RemoveGuard::file(&staging);
        let mut file = std::fs::File::create(&staging)
            .map_err(|err| SyncError::database(&staging, err.to_string()))?;
        file.write_all(&[DB_SCHEMA_VERSION])
            .and_then(|_| file.write_all(&body))
            .and_then(|_| file.sync_all())
            .map_err(|err| SyncError::database(&staging, err.to_string()))?;
        drop(file);

        std::fs::rename(&staging, &path)
            .map_err(|err| SyncError::database(&path, err.to_string()))?;
        guard.dismiss();
        Ok(())
    }

    pub fn lookup(&self, rel_path: &str) -> Option<&DbNode> {
        self.entries.get(rel_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot the in-sync portion of a tree: nodes present on both sides
    /// whose categorization is `Equal`. Conflicting or failed items stay
    /// out, so the next run sees them as still-divergent.
    pub fn from_tree(root: &DirMapping) -> Self {
        let mut db = Self::default();
        collect(root, &mut db.entries);
        db
    }
}

/// Database key of a node: relative path with forward slashes.
pub fn db_key(rel_path: &Path) -> String {
    rel_path.to_string_lossy().replace('\\', "/")
}

fn collect(node: &DirMapping, entries: &mut BTreeMap<String, DbNode>) {
    for file in &node.subfiles {
        if file.state.left_present
            && file.state.right_present
            && file.state.compare_result == CompareResult::Equal
        {
            entries.insert(
                db_key(&file.state.rel_path()),
                DbNode::File {
                    size: file.left.size,
                    mtime: file.left.mtime,
                    file_id: file.left.file_id,
                },
            );
        }
    }
    for link in &node.sublinks {
        if link.state.left_present
            && link.state.right_present
            && link.state.compare_result == CompareResult::Equal
        {
            entries.insert(
                db_key(&link.state.rel_path()),
                DbNode::Symlink {
                    mtime: link.left.mtime,
                    target: link.left.target.clone(),
                },
            );
        }
    }
    for dir in &node.subdirs {
        if dir.state.left_present && dir.state.right_present {
            entries.insert(db_key(&dir.state.rel_path()), DbNode::Dir);
        }
        collect(dir, entries);
    }
}
