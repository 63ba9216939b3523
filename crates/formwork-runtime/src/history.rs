#![forbid(unsafe_code)]

//! Undo/redo history with labelled checkpoints.
//!
//! [`History<T>`] is the pure data structure: a `past` stack (oldest first),
//! one `current` entry, and a `future` stack (nearest first). It never
//! touches a clock other than stamping entries, and never spawns.
//!
//! [`HistoryManager<T>`] is a shared handle over a `History<T>` that adds
//! debounced coalescing: with a debounce configured, a burst of pushes
//! becomes one push of the latest state once the burst has been quiet for
//! the debounce period.
//!
//! # Invariants
//!
//! 1. `current` is always the authoritative live state.
//! 2. `push` clears `future`.
//! 3. `past.len() <= max_size`; the oldest entries are dropped first.
//! 4. Jumps (`undo`, `redo`, `go_to_checkpoint`) keep every retained entry
//!    exactly once, in chronological order.
//! 5. Every stored state is an independent [`Snapshot`], and every state
//!    handed out is a fresh snapshot of the stored one.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use formwork_core::Snapshot;
use futures::future::{AbortHandle, Abortable};
use tracing::{debug, trace};
use web_time::Instant;

/// Default number of undo steps retained.
pub const DEFAULT_MAX_SIZE: usize = 50;

/// One recorded state.
#[derive(Debug, Clone)]
pub struct HistoryEntry<T> {
    pub state: T,
    pub timestamp: Instant,
    pub label: Option<String>,
}

impl<T: Snapshot> HistoryEntry<T> {
    fn new(state: &T, label: Option<String>) -> Self {
        Self {
            state: state.snapshot(),
            timestamp: Instant::now(),
            label,
        }
    }
}

/// Linear undo/redo stacks around a current entry.
#[derive(Debug, Clone)]
pub struct History<T> {
    past: VecDeque<HistoryEntry<T>>,
    current: HistoryEntry<T>,
    future: VecDeque<HistoryEntry<T>>,
    max_size: usize,
}

impl<T: Snapshot> History<T> {
    #[must_use]
    pub fn new(initial: &T, max_size: usize) -> Self {
        Self {
            past: VecDeque::new(),
            current: HistoryEntry::new(initial, None),
            future: VecDeque::new(),
            max_size,
        }
    }

    fn trim_past(&mut self) {
        while self.past.len() > self.max_size {
            self.past.pop_front();
        }
    }

    /// Record `state` as the new current entry.
    pub fn push(&mut self, state: &T, label: Option<String>) {
        let previous = std::mem::replace(&mut self.current, HistoryEntry::new(state, label));
        self.past.push_back(previous);
        self.trim_past();
        self.future.clear();
    }

    /// Step back one entry. `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<T> {
        let previous = self.past.pop_back()?;
        let current = std::mem::replace(&mut self.current, previous);
        self.future.push_front(current);
        Some(self.current.state.snapshot())
    }

    /// Step forward one entry. `None` when there is nothing to redo.
    pub fn redo(&mut self) -> Option<T> {
        let next = self.future.pop_front()?;
        let current = std::mem::replace(&mut self.current, next);
        self.past.push_back(current);
        self.trim_past();
        Some(self.current.state.snapshot())
    }

    /// Label the current entry. Replaces any previous label.
    pub fn checkpoint(&mut self, label: impl Into<String>) {
        self.current.label = Some(label.into());
    }

    /// Jump to the entry labelled `label`.
    ///
    /// Searches `past` (nearest first), then `current`, then `future`
    /// (nearest first). Entries between the old and new position move to
    /// the other stack in order; `past` is trimmed to `max_size` afterwards.
    pub fn go_to_checkpoint(&mut self, label: &str) -> Option<T> {
        let matches = |e: &HistoryEntry<T>| e.label.as_deref() == Some(label);

        if let Some(idx) = self.past.iter().rposition(matches) {
            let mut moved = self.past.split_off(idx);
            let target = moved.pop_front()?;
            let old_current = std::mem::replace(&mut self.current, target);
            moved.push_back(old_current);
            while let Some(entry) = moved.pop_back() {
                self.future.push_front(entry);
            }
        } else if matches(&self.current) {
            // Already there.
        } else if let Some(idx) = self.future.iter().position(matches) {
            let rest = self.future.split_off(idx + 1);
            let mut moved = std::mem::replace(&mut self.future, rest);
            let target = moved.pop_back()?;
            let old_current = std::mem::replace(&mut self.current, target);
            self.past.push_back(old_current);
            self.past.extend(moved);
            self.trim_past();
        } else {
            return None;
        }
        Some(self.current.state.snapshot())
    }

    /// Drop both stacks, keeping the current entry.
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    #[must_use]
    pub fn past_len(&self) -> usize {
        self.past.len()
    }

    #[must_use]
    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn current(&self) -> T {
        self.current.state.snapshot()
    }

    #[must_use]
    pub fn current_entry(&self) -> &HistoryEntry<T> {
        &self.current
    }

    /// Checkpoint labels, oldest first.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<String> {
        self.entries()
            .filter_map(|e| e.label.clone())
            .collect()
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.past
            .iter()
            .chain(std::iter::once(&self.current))
            .chain(self.future.iter())
    }
}

struct Pending<T> {
    state: T,
    label: Option<String>,
    abort: AbortHandle,
}

struct ManagerInner<T> {
    history: RefCell<History<T>>,
    debounce: Option<Duration>,
    pending: RefCell<Option<Pending<T>>>,
}

impl<T: Snapshot> ManagerInner<T> {
    fn flush(&self) -> bool {
        let Some(pending) = self.pending.borrow_mut().take() else {
            return false;
        };
        pending.abort.abort();
        self.history
            .borrow_mut()
            .push(&pending.state, pending.label);
        trace!("debounced history push committed");
        true
    }
}

impl<T> Drop for ManagerInner<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.get_mut().take() {
            pending.abort.abort();
        }
    }
}

/// Shared handle over a [`History`] with optional push debouncing.
///
/// Cloning yields another handle to the same history.
pub struct HistoryManager<T> {
    inner: Rc<ManagerInner<T>>,
}

impl<T> Clone for HistoryManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for HistoryManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = self.inner.history.borrow();
        f.debug_struct("HistoryManager")
            .field("past", &history.past.len())
            .field("future", &history.future.len())
            .field("max_size", &history.max_size)
            .field("debounce", &self.inner.debounce)
            .field("pending", &self.inner.pending.borrow().is_some())
            .finish()
    }
}

impl<T: Snapshot + 'static> HistoryManager<T> {
    /// A zero debounce disables coalescing.
    #[must_use]
    pub fn new(initial: &T, max_size: usize, debounce: Option<Duration>) -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                history: RefCell::new(History::new(initial, max_size)),
                debounce: debounce.filter(|d| !d.is_zero()),
                pending: RefCell::new(None),
            }),
        }
    }

    /// Record `state`, immediately or after the debounce period.
    ///
    /// # Panics
    ///
    /// With a debounce configured, panics outside a tokio `LocalSet`.
    pub fn push(&self, state: &T, label: Option<String>) {
        let Some(debounce) = self.inner.debounce else {
            self.inner.history.borrow_mut().push(state, label);
            return;
        };

        let (abort, registration) = AbortHandle::new_pair();
        let previous = self.inner.pending.borrow_mut().replace(Pending {
            state: state.snapshot(),
            label: None,
            abort,
        });
        let carried = previous.and_then(|p| {
            p.abort.abort();
            p.label
        });
        if let Some(pending) = self.inner.pending.borrow_mut().as_mut() {
            pending.label = label.or(carried);
        }

        let weak = Rc::downgrade(&self.inner);
        let timer = async move {
            tokio::time::sleep(debounce).await;
            if let Some(inner) = weak.upgrade() {
                inner.flush();
            }
        };
        drop(tokio::task::spawn_local(Abortable::new(timer, registration)));
    }

    /// Commit a pending debounced push now. Returns whether one existed.
    pub fn flush(&self) -> bool {
        self.inner.flush()
    }

    /// Drop a pending debounced push. Returns whether one existed.
    pub fn cancel_pending(&self) -> bool {
        match self.inner.pending.borrow_mut().take() {
            Some(pending) => {
                pending.abort.abort();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.pending.borrow().is_some()
    }

    pub fn undo(&self) -> Option<T> {
        self.flush();
        let state = self.inner.history.borrow_mut().undo();
        debug!(applied = state.is_some(), "history undo");
        state
    }

    pub fn redo(&self) -> Option<T> {
        self.flush();
        let state = self.inner.history.borrow_mut().redo();
        debug!(applied = state.is_some(), "history redo");
        state
    }

    pub fn checkpoint(&self, label: impl Into<String>) {
        self.flush();
        let label = label.into();
        debug!(%label, "history checkpoint");
        self.inner.history.borrow_mut().checkpoint(label);
    }

    pub fn go_to_checkpoint(&self, label: &str) -> Option<T> {
        self.flush();
        let state = self.inner.history.borrow_mut().go_to_checkpoint(label);
        debug!(%label, found = state.is_some(), "history jump");
        state
    }

    /// Commit any pending push, then drop both stacks.
    pub fn clear(&self) {
        self.flush();
        self.inner.history.borrow_mut().clear();
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.has_pending() || self.inner.history.borrow().can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.has_pending() && self.inner.history.borrow().can_redo()
    }

    /// Snapshot of the committed current state.
    #[must_use]
    pub fn current(&self) -> T {
        self.inner.history.borrow().current()
    }

    /// Snapshot of the pending state if any, else of the current state.
    #[must_use]
    pub fn latest(&self) -> T {
        match self.inner.pending.borrow().as_ref() {
            Some(pending) => pending.state.snapshot(),
            None => self.current(),
        }
    }

    #[must_use]
    pub fn checkpoints(&self) -> Vec<String> {
        self.inner.history.borrow().checkpoints()
    }

    #[must_use]
    pub fn past_len(&self) -> usize {
        self.inner.history.borrow().past_len()
    }

    #[must_use]
    pub fn future_len(&self) -> usize {
        self.inner.history.borrow().future_len()
    }

    /// Read the underlying stacks.
    pub fn with_history<R>(&self, f: impl FnOnce(&History<T>) -> R) -> R {
        f(&self.inner.history.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwork_core::{Value, ValueMap, value_map};
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    fn labels<T: Snapshot>(history: &History<T>) -> Vec<Option<String>> {
        history.entries().map(|e| e.label.clone()).collect()
    }

    #[test]
    fn push_undo_redo() {
        let mut h = History::new(&0i64, 10);
        h.push(&1, None);
        h.push(&2, None);
        assert_eq!(h.undo(), Some(1));
        assert_eq!(h.undo(), Some(0));
        assert_eq!(h.undo(), None);
        assert_eq!(h.redo(), Some(1));
        assert_eq!(h.redo(), Some(2));
        assert_eq!(h.redo(), None);
        assert_eq!(h.current(), 2);
    }

    #[test]
    fn push_clears_future() {
        let mut h = History::new(&0i64, 10);
        h.push(&1, None);
        h.push(&2, None);
        h.undo();
        h.push(&3, None);
        assert!(!h.can_redo());
        assert_eq!(h.undo(), Some(1));
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut h = History::new(&0i64, 3);
        for n in 1..=5 {
            h.push(&n, None);
        }
        assert_eq!(h.past_len(), 3);
        assert_eq!(h.undo(), Some(4));
        assert_eq!(h.undo(), Some(3));
        assert_eq!(h.undo(), Some(2));
        assert_eq!(h.undo(), None);
    }

    #[test]
    fn entries_are_independent_snapshots() {
        let node = Value::shared(Value::Int(1));
        let mut h = History::new(&value_map([("x", node.clone())]), 10);
        if let Value::Shared(cell) = &node {
            *cell.borrow_mut() = Value::Int(99);
        }
        assert_eq!(h.current(), value_map([("x", Value::Int(1))]));

        let mut returned = h.current();
        returned.insert("x".into(), Value::Int(7));
        assert_eq!(h.current(), value_map([("x", Value::Int(1))]));
        assert_eq!(h.undo(), None::<ValueMap>);
    }

    #[test]
    fn checkpoint_labels_current_without_new_entry() {
        let mut h = History::new(&0i64, 10);
        h.push(&1, None);
        h.checkpoint("saved");
        assert_eq!(h.past_len(), 1);
        assert_eq!(h.checkpoints(), vec!["saved".to_string()]);
    }

    #[test]
    fn jump_back_moves_tail_to_future() {
        let mut h = History::new(&0i64, 10);
        h.checkpoint("start");
        for n in 1..=3 {
            h.push(&n, None);
        }
        assert_eq!(h.go_to_checkpoint("start"), Some(0));
        assert_eq!(h.past_len(), 0);
        assert_eq!(h.future_len(), 3);
        assert_eq!(h.redo(), Some(1));
        assert_eq!(h.redo(), Some(2));
        assert_eq!(h.redo(), Some(3));
    }

    #[test]
    fn jump_forward_moves_head_to_past() {
        let mut h = History::new(&0i64, 10);
        h.push(&1, None);
        h.push(&2, None);
        h.checkpoint("two");
        h.push(&3, None);
        h.undo();
        h.undo();
        h.undo();
        assert_eq!(h.current(), 0);
        assert_eq!(h.go_to_checkpoint("two"), Some(2));
        assert_eq!(h.past_len(), 2);
        assert_eq!(h.future_len(), 1);
        assert_eq!(h.undo(), Some(1));
        assert_eq!(h.undo(), Some(0));
    }

    #[test]
    fn jump_preserves_every_entry_once() {
        let mut h = History::new(&0i64, 10);
        for n in 1..=4 {
            h.push(&n, None);
            h.checkpoint(format!("c{n}"));
        }
        let before: Vec<i64> = h.entries().map(|e| e.state).collect();
        h.go_to_checkpoint("c1");
        let after: Vec<i64> = h.entries().map(|e| e.state).collect();
        assert_eq!(before, after);
        h.go_to_checkpoint("c4");
        assert_eq!(h.entries().map(|e| e.state).collect::<Vec<_>>(), before);
        assert_eq!(labels(&h).iter().flatten().count(), 4);
    }

    #[test]
    fn jump_forward_trims_past() {
        let mut h = History::new(&0i64, 2);
        h.push(&1, None);
        h.push(&2, None);
        h.push(&3, None);
        h.checkpoint("end");
        h.undo();
        h.undo();
        assert_eq!(h.go_to_checkpoint("end"), Some(3));
        assert_eq!(h.past_len(), 2);
        assert_eq!(h.undo(), Some(2));
        assert_eq!(h.undo(), Some(1));
        assert_eq!(h.undo(), None);
    }

    #[test]
    fn unknown_checkpoint_is_none() {
        let mut h = History::new(&0i64, 10);
        h.push(&1, None);
        assert_eq!(h.go_to_checkpoint("nope"), None);
        assert_eq!(h.current(), 1);
    }

    #[test]
    fn clear_keeps_current() {
        let mut h = History::new(&0i64, 10);
        h.push(&1, None);
        h.push(&2, None);
        h.undo();
        h.clear();
        assert!(!h.can_undo());
        assert!(!h.can_redo());
        assert_eq!(h.current(), 1);
    }

    #[test]
    fn manager_without_debounce_pushes_immediately() {
        let m = HistoryManager::new(&0i64, 10, None);
        m.push(&1, Some("one".into()));
        assert_eq!(m.current(), 1);
        assert_eq!(m.checkpoints(), vec!["one".to_string()]);
        assert!(!m.flush());
        assert_eq!(m.undo(), Some(0));
        assert!(m.can_redo());
    }

    #[test]
    fn zero_debounce_means_none() {
        let m = HistoryManager::new(&0i64, 10, Some(Duration::ZERO));
        m.push(&1, None);
        assert_eq!(m.current(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_pushes_coalesce() {
        LocalSet::new()
            .run_until(async {
                let m = HistoryManager::new(&0i64, 10, Some(Duration::from_millis(200)));
                m.push(&1, None);
                sleep(Duration::from_millis(50)).await;
                m.push(&2, None);
                sleep(Duration::from_millis(50)).await;
                m.push(&3, None);
                assert!(m.has_pending());
                assert_eq!(m.current(), 0);
                assert_eq!(m.latest(), 3);

                sleep(Duration::from_millis(300)).await;
                assert!(!m.has_pending());
                assert_eq!(m.current(), 3);
                assert_eq!(m.past_len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn undo_flushes_pending_first() {
        LocalSet::new()
            .run_until(async {
                let m = HistoryManager::new(&0i64, 10, Some(Duration::from_millis(200)));
                m.push(&5, None);
                assert!(m.can_undo());
                assert_eq!(m.undo(), Some(0));
                assert_eq!(m.redo(), Some(5));
                sleep(Duration::from_millis(500)).await;
                assert_eq!(m.past_len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_drops_push() {
        LocalSet::new()
            .run_until(async {
                let m = HistoryManager::new(&0i64, 10, Some(Duration::from_millis(200)));
                m.push(&9, None);
                assert!(m.cancel_pending());
                sleep(Duration::from_millis(500)).await;
                assert_eq!(m.current(), 0);
                assert!(!m.can_undo());
            })
            .await;
    }
}
