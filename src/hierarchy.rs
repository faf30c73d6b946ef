/*!
 * Paired hierarchy model
 *
 * One tree per configured folder pair, holding both sides of every item.
 * The comparer builds it, the direction resolver annotates it, the executor
 * mutates it. All operations here are in-memory and infallible; structural
 * invariants hold by construction.
 *
 * Children carry their base paths and relative prefix by value: the tree
 * has a single writer at any time, so copies are cheap and no back-pointers
 * are needed.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::FilterConfig;
use crate::lock::LockGuard;

/// Metadata snapshot of one file on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub mtime: i64,
    /// Volume-stable identifier (inode / NTFS file index), when available
    pub file_id: Option<u64>,
}

impl FileDescriptor {
    pub fn new(size: u64, mtime: i64) -> Self {
        Self {
            size,
            mtime,
            file_id: None,
        }
    }

    /// Placeholder for the absent side of a one-sided pair
    pub fn sentinel() -> Self {
        Self::default()
    }
}

/// What a symlink points at, needed to re-create links on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    FileLink,
    DirLink,
}

/// Metadata snapshot of one symlink on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkDescriptor {
    pub mtime: i64,
    /// Raw link text; empty when retrieval failed
    pub target: String,
    pub kind: LinkKind,
}

impl SymlinkDescriptor {
    pub fn new(mtime: i64, target: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            mtime,
            target: target.into(),
            kind,
        }
    }

    pub fn sentinel() -> Self {
        Self {
            mtime: 0,
            target: String::new(),
            kind: LinkKind::FileLink,
        }
    }
}

impl Default for SymlinkDescriptor {
    fn default() -> Self {
        Self::sentinel()
    }
}

/// Raw in-memory mirror of one on-disk directory subtree, used during the
/// scan only. Children are keyed by short name; pairing folds case on
/// Windows at merge time. Symlinks listed here are the non-dereferenced
/// ones; followed links appear as ordinary dirs or files.
#[derive(Debug, Clone, Default)]
pub struct DirContainer {
    /// Mtime of the directory itself (0 for the scan root)
    pub mtime: i64,
    pub subdirs: HashMap<String, DirContainer>,
    pub subfiles: HashMap<String, FileDescriptor>,
    pub sublinks: HashMap<String, SymlinkDescriptor>,
}

impl DirContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.subdirs.is_empty() && self.subfiles.is_empty() && self.sublinks.is_empty()
    }

    /// Total number of entries in this subtree
    pub fn item_count(&self) -> u64 {
        let own = (self.subfiles.len() + self.sublinks.len() + self.subdirs.len()) as u64;
        own + self.subdirs.values().map(|d| d.item_count()).sum::<u64>()
    }
}

/// Categorization of one pair.
///
/// Directories only use `LeftOnly`, `RightOnly`, `Equal` and
/// `DifferentMetadataOnly`; files and symlinks use the full set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareResult {
    LeftOnly,
    RightOnly,
    LeftNewer,
    RightNewer,
    DifferentContent,
    Equal,
    DifferentMetadataOnly,
    Conflict,
}

impl CompareResult {
    /// The category after the sides are exchanged
    pub fn swapped(self) -> Self {
        match self {
            CompareResult::LeftOnly => CompareResult::RightOnly,
            CompareResult::RightOnly => CompareResult::LeftOnly,
            CompareResult::LeftNewer => CompareResult::RightNewer,
            CompareResult::RightNewer => CompareResult::LeftNewer,
            other => other,
        }
    }
}

/// Side of a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Resolved per-item direction. `Left`/`Right` name the target side the
/// data flows towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Left,
    Right,
    None,
    Conflict,
}

impl SyncDirection {
    pub fn swapped(self) -> Self {
        match self {
            SyncDirection::Left => SyncDirection::Right,
            SyncDirection::Right => SyncDirection::Left,
            other => other,
        }
    }
}

/// Concrete action the executor performs for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    CreateLeft,
    CreateRight,
    DeleteLeft,
    DeleteRight,
    OverwriteLeft,
    OverwriteRight,
    CopyMetadataToLeft,
    CopyMetadataToRight,
    DoNothing,
    Equal,
    UnresolvedConflict,
}

impl SyncOperation {
    /// Which side gets mutated, if any
    pub fn target_side(self) -> Option<Side> {
        match self {
            SyncOperation::CreateLeft
            | SyncOperation::DeleteLeft
            | SyncOperation::OverwriteLeft
            | SyncOperation::CopyMetadataToLeft => Some(Side::Left),
            SyncOperation::CreateRight
            | SyncOperation::DeleteRight
            | SyncOperation::OverwriteRight
            | SyncOperation::CopyMetadataToRight => Some(Side::Right),
            _ => None,
        }
    }
}

/// Identifier unique within one process run; stays valid for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// State shared by every node kind.
#[derive(Debug, Clone)]
pub struct PairState {
    pub id: ObjectId,
    /// Short name of the item (empty for the pair root)
    pub name: String,
    pub left_present: bool,
    pub right_present: bool,
    pub compare_result: CompareResult,
    /// User-selected inclusion; inactive nodes map to `DoNothing`
    pub active: bool,
    pub direction: SyncDirection,
    /// Required non-empty whenever `direction == Conflict`
    pub conflict_description: Option<String>,
    /// Base directory of the left side, stored with trailing separator
    pub base_left: PathBuf,
    /// Base directory of the right side, stored with trailing separator
    pub base_right: PathBuf,
    /// Relative path of the parent directory within the pair
    pub rel_prefix: PathBuf,
}

impl PairState {
    fn new(
        name: impl Into<String>,
        left_present: bool,
        right_present: bool,
        base_left: PathBuf,
        base_right: PathBuf,
        rel_prefix: PathBuf,
    ) -> Self {
        let compare_result = initial_category(left_present, right_present);
        Self {
            id: ObjectId::next(),
            name: name.into(),
            left_present,
            right_present,
            compare_result,
            active: true,
            direction: SyncDirection::None,
            conflict_description: None,
            base_left,
            base_right,
            rel_prefix,
        }
    }

    /// Path of this item relative to the pair bases
    pub fn rel_path(&self) -> PathBuf {
        if self.name.is_empty() {
            self.rel_prefix.clone()
        } else {
            self.rel_prefix.join(&self.name)
        }
    }

    pub fn left_path(&self) -> PathBuf {
        self.base_left.join(self.rel_path())
    }

    pub fn right_path(&self) -> PathBuf {
        self.base_right.join(self.rel_path())
    }

    pub fn path_on(&self, side: Side) -> PathBuf {
        match side {
            Side::Left => self.left_path(),
            Side::Right => self.right_path(),
        }
    }

    pub fn is_present_on(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_present,
            Side::Right => self.right_present,
        }
    }

    /// Both sides absent: transient state after a manual delete
    pub fn is_fully_empty(&self) -> bool {
        !self.left_present && !self.right_present
    }

    pub fn set_conflict(&mut self, description: impl Into<String>) {
        self.compare_result = CompareResult::Conflict;
        self.direction = SyncDirection::Conflict;
        self.conflict_description = Some(description.into());
    }

    fn swap_sides(&mut self) {
        std::mem::swap(&mut self.left_present, &mut self.right_present);
        std::mem::swap(&mut self.base_left, &mut self.base_right);
        self.compare_result = self.compare_result.swapped();
        self.direction = self.direction.swapped();
    }
}

/// One-sided presence determines the category outright; a both-sided pair
/// starts as an `Equal` placeholder for the comparer to refine.
fn initial_category(left_present: bool, right_present: bool) -> CompareResult {
    match (left_present, right_present) {
        (true, false) => CompareResult::LeftOnly,
        (false, true) => CompareResult::RightOnly,
        _ => CompareResult::Equal,
    }
}

/// A paired file.
#[derive(Debug, Clone)]
pub struct FileMapping {
    pub state: PairState,
    pub left: FileDescriptor,
    pub right: FileDescriptor,
}

impl FileMapping {
    pub fn descriptor_on(&self, side: Side) -> &FileDescriptor {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Record that the target side now mirrors the source side. The stable
    /// file id is a hardware property and is never copied.
    pub fn synchronize_sides(&mut self) {
        match self.state.direction {
            SyncDirection::Right => {
                let id = self.right.file_id;
                self.right = FileDescriptor {
                    file_id: id,
                    ..self.left
                };
                self.state.right_present = self.state.left_present;
            }
            SyncDirection::Left => {
                let id = self.left.file_id;
                self.left = FileDescriptor {
                    file_id: id,
                    ..self.right
                };
                self.state.left_present = self.state.right_present;
            }
            _ => return,
        }
        self.state.compare_result = initial_category(self.state.left_present, self.state.right_present);
        self.state.direction = SyncDirection::None;
        self.state.conflict_description = None;
    }

    fn swap_sides(&mut self) {
        self.state.swap_sides();
        std::mem::swap(&mut self.left, &mut self.right);
    }

    fn remove_on_side(&mut self, side: Side) {
        match side {
            Side::Left => {
                self.state.left_present = false;
                self.left = FileDescriptor::sentinel();
            }
            Side::Right => {
                self.state.right_present = false;
                self.right = FileDescriptor::sentinel();
            }
        }
    }
}

/// A paired symlink.
#[derive(Debug, Clone)]
pub struct SymlinkMapping {
    pub state: PairState,
    pub left: SymlinkDescriptor,
    pub right: SymlinkDescriptor,
}

impl SymlinkMapping {
    pub fn descriptor_on(&self, side: Side) -> &SymlinkDescriptor {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn synchronize_sides(&mut self) {
        match self.state.direction {
            SyncDirection::Right => {
                self.right = self.left.clone();
                self.state.right_present = self.state.left_present;
            }
            SyncDirection::Left => {
                self.left = self.right.clone();
                self.state.left_present = self.state.right_present;
            }
            _ => return,
        }
        self.state.compare_result = initial_category(self.state.left_present, self.state.right_present);
        self.state.direction = SyncDirection::None;
        self.state.conflict_description = None;
    }

    fn swap_sides(&mut self) {
        self.state.swap_sides();
        std::mem::swap(&mut self.left, &mut self.right);
    }

    fn remove_on_side(&mut self, side: Side) {
        match side {
            Side::Left => {
                self.state.left_present = false;
                self.left = SymlinkDescriptor::sentinel();
            }
            Side::Right => {
                self.state.right_present = false;
                self.right = SymlinkDescriptor::sentinel();
            }
        }
    }
}

/// A paired directory: a hierarchy node that itself contains children.
#[derive(Debug, Clone)]
pub struct DirMapping {
    pub state: PairState,
    pub subdirs: Vec<DirMapping>,
    pub subfiles: Vec<FileMapping>,
    pub sublinks: Vec<SymlinkMapping>,
}

impl DirMapping {
    fn new(state: PairState) -> Self {
        Self {
            state,
            subdirs: Vec::new(),
            subfiles: Vec::new(),
            sublinks: Vec::new(),
        }
    }

    /// Absolute paths a child of this directory has on both sides
    pub fn child_paths(&self, name: &str) -> (PathBuf, PathBuf) {
        let rel = self.state.rel_path().join(name);
        (
            self.state.base_left.join(&rel),
            self.state.base_right.join(&rel),
        )
    }

    fn child_state(&self, name: impl Into<String>, left: bool, right: bool) -> PairState {
        PairState::new(
            name,
            left,
            right,
            self.state.base_left.clone(),
            self.state.base_right.clone(),
            self.state.rel_path(),
        )
    }

    /// Append a directory child; category follows from presence
    pub fn add_subdir(
        &mut self,
        left_present: bool,
        name: impl Into<String>,
        right_present: bool,
    ) -> &mut DirMapping {
        let state = self.child_state(name, left_present, right_present);
        self.subdirs.push(DirMapping::new(state));
        self.subdirs.last_mut().unwrap()
    }

    /// Append a file child present on both sides
    pub fn add_subfile(
        &mut self,
        left: FileDescriptor,
        name: impl Into<String>,
        right: FileDescriptor,
        category: CompareResult,
    ) -> &mut FileMapping {
        let mut state = self.child_state(name, true, true);
        state.compare_result = category;
        self.subfiles.push(FileMapping { state, left, right });
        self.subfiles.last_mut().unwrap()
    }

    /// Append a file child present on one side only
    pub fn add_subfile_one_sided(
        &mut self,
        side: Side,
        desc: FileDescriptor,
        name: impl Into<String>,
    ) -> &mut FileMapping {
        let (left_present, right_present) = match side {
            Side::Left => (true, false),
            Side::Right => (false, true),
        };
        let state = self.child_state(name, left_present, right_present);
        let (left, right) = match side {
            Side::Left => (desc, FileDescriptor::sentinel()),
            Side::Right => (FileDescriptor::sentinel(), desc),
        };
        self.subfiles.push(FileMapping { state, left, right });
        self.subfiles.last_mut().unwrap()
    }

    /// Append a symlink child present on both sides
    pub fn add_sublink(
        &mut self,
        left: SymlinkDescriptor,
        name: impl Into<String>,
        right: SymlinkDescriptor,
        category: CompareResult,
    ) -> &mut SymlinkMapping {
        let mut state = self.child_state(name, true, true);
        state.compare_result = category;
        self.sublinks.push(SymlinkMapping { state, left, right });
        self.sublinks.last_mut().unwrap()
    }

    /// Append a symlink child present on one side only
    pub fn add_sublink_one_sided(
        &mut self,
        side: Side,
        desc: SymlinkDescriptor,
        name: impl Into<String>,
    ) -> &mut SymlinkMapping {
        let (left_present, right_present) = match side {
            Side::Left => (true, false),
            Side::Right => (false, true),
        };
        let state = self.child_state(name, left_present, right_present);
        let (left, right) = match side {
            Side::Left => (desc, SymlinkDescriptor::sentinel()),
            Side::Right => (SymlinkDescriptor::sentinel(), desc),
        };
        self.sublinks.push(SymlinkMapping { state, left, right });
        self.sublinks.last_mut().unwrap()
    }

    /// Mark this node empty on one side; cascades to all descendants
    pub fn remove_on_side(&mut self, side: Side) {
        match side {
            Side::Left => self.state.left_present = false,
            Side::Right => self.state.right_present = false,
        }
        for file in &mut self.subfiles {
            file.remove_on_side(side);
        }
        for link in &mut self.sublinks {
            link.remove_on_side(side);
        }
        for dir in &mut self.subdirs {
            dir.remove_on_side(side);
        }
    }

    pub fn synchronize_sides(&mut self) {
        match self.state.direction {
            SyncDirection::Right => self.state.right_present = self.state.left_present,
            SyncDirection::Left => self.state.left_present = self.state.right_present,
            _ => return,
        }
        self.state.compare_result = initial_category(self.state.left_present, self.state.right_present);
        self.state.direction = SyncDirection::None;
        self.state.conflict_description = None;
    }

    /// Recursively drop children that became fully empty
    pub fn prune_empty(&mut self) {
        self.subfiles.retain(|f| !f.state.is_fully_empty());
        self.sublinks.retain(|l| !l.state.is_fully_empty());
        for dir in &mut self.subdirs {
            dir.prune_empty();
        }
        self.subdirs
            .retain(|d| !(d.state.is_fully_empty() && d.is_leaf()));
    }

    fn is_leaf(&self) -> bool {
        self.subdirs.is_empty() && self.subfiles.is_empty() && self.sublinks.is_empty()
    }

    fn swap_sides(&mut self) {
        self.state.swap_sides();
        for file in &mut self.subfiles {
            file.swap_sides();
        }
        for link in &mut self.sublinks {
            link.swap_sides();
        }
        for dir in &mut self.subdirs {
            dir.swap_sides();
        }
    }

    /// Pre-order traversal: files and symlinks of this level first, then
    /// each subdirectory, recursing only where the visitor asks to.
    pub fn traverse(&self, visitor: &mut impl HierarchyVisitor) {
        for file in &self.subfiles {
            visitor.visit_file(file);
        }
        for link in &self.sublinks {
            visitor.visit_link(link);
        }
        for dir in &self.subdirs {
            if visitor.visit_dir(dir) {
                dir.traverse(visitor);
            }
        }
    }
}

/// Three-callback visitor over the paired tree.
pub trait HierarchyVisitor {
    fn visit_file(&mut self, _file: &FileMapping) {}
    fn visit_link(&mut self, _link: &SymlinkMapping) {}
    /// Return `true` to recurse into this directory
    fn visit_dir(&mut self, _dir: &DirMapping) -> bool {
        true
    }
}

/// Root of one configured folder pairing. Owns its whole subtree by value,
/// the effective filter, and the directory locks whose lifetime it extends.
#[derive(Debug)]
pub struct BaseDirMapping {
    pub root: DirMapping,
    pub filter: FilterConfig,
    pub lock_left: Option<LockGuard>,
    pub lock_right: Option<LockGuard>,
}

impl BaseDirMapping {
    /// Bases are normalized to carry a trailing separator.
    pub fn new(base_left: &Path, base_right: &Path, filter: FilterConfig) -> Self {
        let base_left = crate::pathutil::with_trailing_separator(base_left);
        let base_right = crate::pathutil::with_trailing_separator(base_right);
        let state = PairState::new("", true, true, base_left, base_right, PathBuf::new());
        Self {
            root: DirMapping::new(state),
            filter,
            lock_left: None,
            lock_right: None,
        }
    }

    pub fn base_left(&self) -> &Path {
        &self.root.state.base_left
    }

    pub fn base_right(&self) -> &Path {
        &self.root.state.base_right
    }

    /// Exchange left and right everywhere, including categories, directions
    /// and the held locks.
    pub fn swap_sides(&mut self) {
        self.root.swap_sides();
        std::mem::swap(&mut self.lock_left, &mut self.lock_right);
    }

    pub fn prune_empty(&mut self) {
        self.root.prune_empty();
    }

    pub fn traverse(&self, visitor: &mut impl HierarchyVisitor) {
        self.root.traverse(visitor);
    }
}

/// Fold a child name for pairing lookups: exact on POSIX, case-insensitive
/// on Windows.
pub fn name_key(name: &str) -> String {
    #[cfg(windows)]
    {
        name.to_uppercase()
    }
    #[cfg(not(windows))]
    {
        name.to_string()
    }
}
