//! Working Memory
//!
//! A bounded buffer of recent thoughts with a single designated focus item.
//! Insertion order is preserved; overflow evicts the least-important entry
//! (oldest on ties). Focus selection is fully deterministic: importance
//! descending, then insertion time descending, then id lexicographic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Thought, ThoughtId};

/// Working-memory errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkingMemoryError {
    #[error("thought not found in working memory: {id}")]
    NotFound { id: ThoughtId },

    #[error("duplicate thought id in working memory: {id}")]
    DuplicateId { id: ThoughtId },
}

/// One buffered entry, tagged with its insertion sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    thought: Thought,
    seq: u64,
}

/// Bounded importance-ranked buffer of recent thoughts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemory {
    buffer: Vec<Slot>,
    capacity: usize,
    focus: Option<ThoughtId>,
    next_seq: u64,
}

/// Read-only copy handed to engines inside step messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemoryView {
    /// Buffer contents in insertion order
    pub thoughts: Vec<Thought>,

    /// Current focus item
    pub focus: Option<ThoughtId>,
}

impl WorkingMemory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity + 1),
            capacity,
            focus: None,
            next_seq: 0,
        }
    }

    /// Number of buffered thoughts
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current focus item
    #[must_use]
    pub fn focus(&self) -> Option<ThoughtId> {
        self.focus
    }

    /// Whether a thought id is currently buffered
    #[must_use]
    pub fn contains(&self, id: ThoughtId) -> bool {
        self.buffer.iter().any(|slot| slot.thought.id == id)
    }

    /// Insert a thought, evicting the least-important entry on overflow
    ///
    /// Returns the evicted thought, if any. The focus is recomputed unless
    /// the evicted entry was not the focus and the newcomer does not win the
    /// deterministic ordering - recomputation is cheap either way, so it
    /// always runs.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if the id is already buffered; the caller's
    /// validation gate is expected to have caught this earlier, so a
    /// duplicate here signals a broken invariant upstream.
    pub fn add(&mut self, thought: Thought) -> Result<Option<Thought>, WorkingMemoryError> {
        if self.contains(thought.id) {
            return Err(WorkingMemoryError::DuplicateId { id: thought.id });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.buffer.push(Slot { thought, seq });

        let evicted = if self.buffer.len() > self.capacity {
            // Least importance first; oldest wins the tie
            let victim = self
                .buffer
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.thought
                        .importance
                        .total_cmp(&b.thought.importance)
                        .then_with(|| a.seq.cmp(&b.seq))
                })
                .map(|(i, _)| i);
            victim.map(|i| self.buffer.remove(i).thought)
        } else {
            None
        };

        self.refresh_focus();
        Ok(evicted)
    }

    /// Point the focus at a specific buffered thought
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the id is not buffered; the focus is left
    /// unchanged in that case.
    pub fn refocus(&mut self, id: ThoughtId) -> Result<(), WorkingMemoryError> {
        if !self.contains(id) {
            return Err(WorkingMemoryError::NotFound { id });
        }
        self.focus = Some(id);
        Ok(())
    }

    /// Up to `n` most recent thoughts, in insertion order
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<Thought> {
        let start = self.buffer.len().saturating_sub(n);
        self.buffer[start..]
            .iter()
            .map(|slot| slot.thought.clone())
            .collect()
    }

    /// Read-only view for step messages and snapshots
    #[must_use]
    pub fn view(&self) -> WorkingMemoryView {
        WorkingMemoryView {
            thoughts: self.buffer.iter().map(|s| s.thought.clone()).collect(),
            focus: self.focus,
        }
    }

    /// Rebuild from a view (checkpoint restore); insertion order is the
    /// view's order
    #[must_use]
    pub fn restore(view: WorkingMemoryView, capacity: usize) -> Self {
        let mut wm = Self::new(capacity);
        for thought in view.thoughts {
            // Restoring at most `capacity` entries cannot evict or collide
            let _ = wm.add(thought);
        }
        if let Some(focus) = view.focus {
            let _ = wm.refocus(focus);
        }
        wm
    }

    /// Recompute focus: importance desc, insertion desc, id lexicographic
    fn refresh_focus(&mut self) {
        self.focus = self
            .buffer
            .iter()
            .max_by(|a, b| {
                a.thought
                    .importance
                    .total_cmp(&b.thought.importance)
                    .then_with(|| a.seq.cmp(&b.seq))
                    .then_with(|| b.thought.id.cmp(&a.thought.id))
            })
            .map(|slot| slot.thought.id);
    }
}
