//! Two-tier batch execution: one call per chunk, item-by-item on failure.
//!
//! ```text
//! items ── chunks(size) ──→ batch_op(chunk) ── Ok ──→ succeeded
//!                                   │
//!                                  Err
//!                                   ↓
//!                       item_op(item) for each item ── Ok ──→ succeeded
//!                                   │
//!                           Err ── is_absent? ── yes ──→ absent
//!                                   │
//!                                   no ──→ failed
//! ```
//!
//! Used by cleanup for both storage and table deletes, so a single bad key
//! never blocks the rest of its chunk. "Absent" outcomes are the desired end
//! state already holding; callers treat them like successes.

use std::fmt::Display;
use tracing::{debug, warn};

/// Where every input item ended up.
#[derive(Debug)]
pub struct BatchOutcome<T, E> {
    pub succeeded: Vec<T>,
    pub absent: Vec<T>,
    pub failed: Vec<(T, E)>,
    /// Not attempted because `keep_going` returned false.
    pub skipped: Vec<T>,
    /// Chunks that had to be retried item by item.
    pub fallbacks: usize,
}

impl<T, E> Default for BatchOutcome<T, E> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            absent: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            fallbacks: 0,
        }
    }
}

impl<T, E> BatchOutcome<T, E> {
    /// Items whose target is gone, whether we removed it or it already was.
    pub fn satisfied(&self) -> impl Iterator<Item = &T> {
        self.succeeded.iter().chain(self.absent.iter())
    }
}

/// Run `batch_op` over chunks of `items`, falling back to `item_op` per item
/// for any chunk whose batch call fails.
///
/// `keep_going` is polled before every chunk and every fallback item; once it
/// returns false the remaining items land in [`BatchOutcome::skipped`].
pub fn run_batched<T, E, B, I, A, K>(
    items: &[T],
    batch_size: usize,
    mut batch_op: B,
    mut item_op: I,
    is_absent: A,
    keep_going: K,
) -> BatchOutcome<T, E>
where
    T: Clone,
    E: Display,
    B: FnMut(&[T]) -> Result<(), E>,
    I: FnMut(&T) -> Result<(), E>,
    A: Fn(&E) -> bool,
    K: Fn() -> bool,
{
    let mut outcome = BatchOutcome::default();
    let mut chunks = items.chunks(batch_size.max(1));

    while let Some(chunk) = chunks.next() {
        if !keep_going() {
            outcome.skipped.extend_from_slice(chunk);
            chunks.by_ref().for_each(|rest| outcome.skipped.extend_from_slice(rest));
            break;
        }

        match batch_op(chunk) {
            Ok(()) => {
                debug!(size = chunk.len(), "batch succeeded");
                outcome.succeeded.extend_from_slice(chunk);
                continue;
            }
            Err(e) if chunk.len() == 1 && is_absent(&e) => {
                outcome.absent.extend_from_slice(chunk);
                continue;
            }
            Err(e) if chunk.len() == 1 => {
                outcome.failed.push((chunk[0].clone(), e));
                continue;
            }
            Err(e) => {
                warn!(size = chunk.len(), error = %e, "batch failed; retrying items one at a time");
                outcome.fallbacks += 1;
            }
        }

        for (i, item) in chunk.iter().enumerate() {
            if !keep_going() {
                outcome.skipped.extend_from_slice(&chunk[i..]);
                break;
            }
            match item_op(item) {
                Ok(()) => outcome.succeeded.push(item.clone()),
                Err(e) if is_absent(&e) => outcome.absent.push(item.clone()),
                Err(e) => outcome.failed.push((item.clone(), e)),
            }
        }
    }

    outcome
}
