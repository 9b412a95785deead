use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use image::Rgba;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{Canvas, PixelDelta, PixelEdit};

// ============================================================================
// UNDOABLE ACTION — before/after snapshot of every cell one stroke touched
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct UndoableAction {
    /// Document the stroke belongs to.
    pub target_id: Uuid,
    pub before: PixelDelta,
    pub after: PixelDelta,
}

impl UndoableAction {
    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.before.memory_size() + self.after.memory_size()
    }
}

// ============================================================================
// HISTORY MANAGER - Manages undo/redo stacks with memory limits
// ============================================================================

/// Undo/redo history for one document.
pub struct HistoryManager {
    undo_stack: VecDeque<UndoableAction>,
    redo_stack: VecDeque<UndoableAction>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
    /// Set while an undo/redo delta is being applied.
    replaying: bool,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
            replaying: false,
        }
    }

    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.max_memory_bytes = bytes;
        self.prune();
        self
    }

    /// Record a finished stroke.  Ignored while replaying and when both
    /// snapshots are empty.  Clears the redo stack.
    pub fn push_action(&mut self, target_id: Uuid, before: PixelDelta, after: PixelDelta) {
        if self.replaying {
            log::warn!("HistoryManager: push during undo/redo replay ignored");
            return;
        }
        if before.is_empty() && after.is_empty() {
            return;
        }
        self.push(UndoableAction { target_id, before, after });
    }

    pub fn push(&mut self, action: UndoableAction) {
        for old in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(old.memory_size());
        }

        self.total_memory += action.memory_size();
        self.undo_stack.push_back(action);

        self.prune();
    }

    /// Apply the newest action's `before` snapshot.  Returns the target id, or
    /// `None` (and does nothing) when there is nothing to undo.
    pub fn undo(&mut self, canvas: &mut Canvas) -> Option<Uuid> {
        let action = self.undo_stack.pop_back()?;
        self.replaying = true;
        canvas.apply_pixels(&action.before);
        self.replaying = false;
        let id = action.target_id;
        self.redo_stack.push_back(action);
        Some(id)
    }

    pub fn redo(&mut self, canvas: &mut Canvas) -> Option<Uuid> {
        let action = self.redo_stack.pop_back()?;
        self.replaying = true;
        canvas.apply_pixels(&action.after);
        self.replaying = false;
        let id = action.target_id;
        self.undo_stack.push_back(action);
        Some(id)
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// O(1) via the cached total.
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    fn to_stored(&self) -> StoredHistory {
        StoredHistory {
            max_history_size: self.max_history_size,
            undo: self.undo_stack.iter().map(StoredAction::from).collect(),
            redo: self.redo_stack.iter().map(StoredAction::from).collect(),
        }
    }

    fn from_stored(stored: StoredHistory, max_memory_bytes: Option<usize>) -> Self {
        let mut mgr = Self::new(stored.max_history_size).with_memory_limit(max_memory_bytes);
        for a in stored.undo {
            let action = a.into_action();
            mgr.total_memory += action.memory_size();
            mgr.undo_stack.push_back(action);
        }
        for a in stored.redo {
            let action = a.into_action();
            mgr.total_memory += action.memory_size();
            mgr.redo_stack.push_back(action);
        }
        mgr.prune();
        mgr
    }
}

// ============================================================================
// HISTORY STORE — per-document managers, persisted for this session only
// ============================================================================

#[derive(Debug)]
pub enum HistoryStoreError {
    Io(std::io::Error),
    Encode(bincode::Error),
}

impl std::fmt::Display for HistoryStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStoreError::Io(e) => write!(f, "history store I/O error: {}", e),
            HistoryStoreError::Encode(e) => write!(f, "history store encoding error: {}", e),
        }
    }
}

impl std::error::Error for HistoryStoreError {}

impl From<std::io::Error> for HistoryStoreError {
    fn from(e: std::io::Error) -> Self {
        HistoryStoreError::Io(e)
    }
}

impl From<bincode::Error> for HistoryStoreError {
    fn from(e: bincode::Error) -> Self {
        HistoryStoreError::Encode(e)
    }
}

/// Serialized form of one cell edit: `None` = erase.
type StoredEdit = (i32, i32, Option<[u8; 4]>);

#[derive(Serialize, Deserialize)]
struct StoredAction {
    target_id: Uuid,
    before: Vec<StoredEdit>,
    after: Vec<StoredEdit>,
}

#[derive(Serialize, Deserialize)]
struct StoredHistory {
    max_history_size: usize,
    undo: Vec<StoredAction>,
    redo: Vec<StoredAction>,
}

fn store_delta(delta: &PixelDelta) -> Vec<StoredEdit> {
    delta
        .iter()
        .map(|((x, y), edit)| match edit {
            PixelEdit::Paint(c) => (x, y, Some(c.0)),
            PixelEdit::Erase => (x, y, None),
        })
        .collect()
}

fn load_delta(edits: Vec<StoredEdit>) -> PixelDelta {
    edits
        .into_iter()
        .map(|(x, y, c)| ((x, y), PixelEdit::from_color(c.map(Rgba))))
        .collect()
}

impl From<&UndoableAction> for StoredAction {
    fn from(a: &UndoableAction) -> Self {
        Self {
            target_id: a.target_id,
            before: store_delta(&a.before),
            after: store_delta(&a.after),
        }
    }
}

impl StoredAction {
    fn into_action(self) -> UndoableAction {
        UndoableAction {
            target_id: self.target_id,
            before: load_delta(self.before),
            after: load_delta(self.after),
        }
    }
}

/// Maps document ids to their `HistoryManager`s.  `save`/`load` spill a
/// document's stacks to `dir`; the default directory is scoped to this
/// process and is not the durable document store.
pub struct HistoryStore {
    dir: PathBuf,
    managers: HashMap<Uuid, HistoryManager>,
    max_history_size: usize,
    max_memory_bytes: Option<usize>,
}

impl HistoryStore {
    /// Store under `<tmp>/pixlet-history-<pid>`.
    pub fn for_session(max_history_size: usize, max_memory_bytes: Option<usize>) -> Self {
        let dir = std::env::temp_dir().join(format!("pixlet-history-{}", std::process::id()));
        Self::in_dir(dir, max_history_size, max_memory_bytes)
    }

    pub fn in_dir(dir: impl Into<PathBuf>, max_history_size: usize, max_memory_bytes: Option<usize>) -> Self {
        Self {
            dir: dir.into(),
            managers: HashMap::new(),
            max_history_size,
            max_memory_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.bin", id))
    }

    /// The manager for `id`, created empty on first use.
    pub fn manager(&mut self, id: Uuid) -> &mut HistoryManager {
        let (size, mem) = (self.max_history_size, self.max_memory_bytes);
        self.managers
            .entry(id)
            .or_insert_with(|| HistoryManager::new(size).with_memory_limit(mem))
    }

    pub fn get(&self, id: Uuid) -> Option<&HistoryManager> {
        self.managers.get(&id)
    }

    /// Detach a manager (e.g. to hand it to a `Project`).
    pub fn take(&mut self, id: Uuid) -> HistoryManager {
        self.managers
            .remove(&id)
            .unwrap_or_else(|| HistoryManager::new(self.max_history_size).with_memory_limit(self.max_memory_bytes))
    }

    pub fn insert(&mut self, id: Uuid, manager: HistoryManager) {
        self.managers.insert(id, manager);
    }

    /// Write the manager for `id` to disk.  No-op when there is none.
    pub fn save(&self, id: Uuid) -> Result<(), HistoryStoreError> {
        let Some(mgr) = self.managers.get(&id) else {
            return Ok(());
        };
        std::fs::create_dir_all(&self.dir)?;
        let bytes = bincode::serialize(&mgr.to_stored())?;
        std::fs::write(self.path_for(id), bytes)?;
        log::debug!(
            "HistoryStore: saved {} undo / {} redo for {}",
            mgr.undo_count(),
            mgr.redo_count(),
            id
        );
        Ok(())
    }

    /// Load `id` from disk, replacing any in-memory manager.  Returns `false`
    /// when nothing was stored.
    pub fn load(&mut self, id: Uuid) -> Result<bool, HistoryStoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        let bytes = std::fs::read(&path)?;
        let stored: StoredHistory = bincode::deserialize(&bytes)?;
        self.managers
            .insert(id, HistoryManager::from_stored(stored, self.max_memory_bytes));
        Ok(true)
    }

    /// Forget a document entirely (memory and disk).
    pub fn remove(&mut self, id: Uuid) -> Result<(), HistoryStoreError> {
        self.managers.remove(&id);
        match std::fs::remove_file(self.path_for(id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Delete the whole session directory.
    pub fn purge(&mut self) -> Result<(), HistoryStoreError> {
        self.managers.clear();
        match std::fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MirrorBackend;
    use crate::scheduler::FrameQueue;
    use crate::view::ViewTransform;
    use std::rc::Rc;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn canvas() -> Canvas {
        let view = ViewTransform::new(16, 64.0, 64.0, 100.0);
        Canvas::new(16, view, Box::new(MirrorBackend::new()), Rc::new(FrameQueue::new()), Rgba([255; 4]))
    }

    fn single(x: i32, y: i32, edit: PixelEdit) -> PixelDelta {
        let mut d = PixelDelta::new();
        d.insert(x, y, edit);
        d
    }

    #[test]
    fn undo_and_redo_round_trip() {
        let mut c = canvas();
        let mut h = HistoryManager::default();
        let id = Uuid::new_v4();

        let after = single(1, 1, PixelEdit::Paint(RED));
        c.apply_pixels(&after);
        h.push_action(id, single(1, 1, PixelEdit::Erase), after);

        assert_eq!(h.undo(&mut c), Some(id));
        assert_eq!(c.get_pixel(1, 1), None);
        assert_eq!(h.redo(&mut c), Some(id));
        assert_eq!(c.get_pixel(1, 1), Some(RED));
        assert!(!h.is_replaying());
    }

    #[test]
    fn empty_stacks_are_noops() {
        let mut c = canvas();
        let mut h = HistoryManager::default();
        assert_eq!(h.undo(&mut c), None);
        assert_eq!(h.redo(&mut c), None);
    }

    #[test]
    fn push_clears_redo_and_count_limit_drops_oldest() {
        let mut c = canvas();
        let mut h = HistoryManager::new(2);
        let id = Uuid::new_v4();
        for x in 0..3 {
            h.push_action(id, single(x, 0, PixelEdit::Erase), single(x, 0, PixelEdit::Paint(BLUE)));
        }
        assert_eq!(h.undo_count(), 2);
        h.undo(&mut c);
        assert!(h.can_redo());
        h.push_action(id, PixelDelta::new(), single(5, 5, PixelEdit::Paint(RED)));
        assert!(!h.can_redo());
    }

    #[test]
    fn memory_limit_keeps_at_least_one_action() {
        let mut h = HistoryManager::new(50).with_memory_limit(Some(1));
        let id = Uuid::new_v4();
        h.push_action(id, single(0, 0, PixelEdit::Erase), single(0, 0, PixelEdit::Paint(RED)));
        h.push_action(id, single(1, 0, PixelEdit::Erase), single(1, 0, PixelEdit::Paint(RED)));
        assert_eq!(h.undo_count(), 1);
        let one = UndoableAction {
            target_id: id,
            before: single(1, 0, PixelEdit::Erase),
            after: single(1, 0, PixelEdit::Paint(RED)),
        };
        assert_eq!(h.memory_usage(), one.memory_size());

        h.clear();
        assert_eq!(h.memory_usage(), 0);
    }

    #[test]
    fn store_persists_and_restores_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let mut c = canvas();

        let mut store = HistoryStore::in_dir(dir.path(), 50, None);
        store
            .manager(id)
            .push_action(id, single(2, 2, PixelEdit::Erase), single(2, 2, PixelEdit::Paint(RED)));
        store
            .manager(id)
            .push_action(id, single(3, 3, PixelEdit::Paint(BLUE)), single(3, 3, PixelEdit::Erase));
        store.manager(id).undo(&mut c);
        store.save(id).unwrap();

        let mut fresh = HistoryStore::in_dir(dir.path(), 50, None);
        assert!(fresh.load(id).unwrap());
        let mgr = fresh.manager(id);
        assert_eq!(mgr.undo_count(), 1);
        assert_eq!(mgr.redo_count(), 1);
        mgr.redo(&mut c);
        assert_eq!(c.get_pixel(3, 3), None);
        mgr.undo(&mut c);
        assert_eq!(c.get_pixel(3, 3), Some(BLUE));

        assert!(!fresh.load(Uuid::new_v4()).unwrap());
        fresh.remove(id).unwrap();
        assert!(!fresh.load(id).unwrap());
    }

    #[test]
    fn purge_removes_the_session_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session");
        let id = Uuid::new_v4();
        let mut store = HistoryStore::in_dir(&dir, 50, None);
        store
            .manager(id)
            .push_action(id, single(0, 0, PixelEdit::Erase), single(0, 0, PixelEdit::Paint(RED)));
        store.save(id).unwrap();
        assert!(dir.exists());

        store.purge().unwrap();
        assert!(!dir.exists());
        assert!(store.get(id).is_none());
        // Purging twice is harmless.
        store.purge().unwrap();
    }
}
