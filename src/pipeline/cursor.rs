use std::collections::HashMap;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;
use crate::core::error::{Error, ErrorKind, Result};
use crate::pipeline::Pipeline;

/// A paused aggregation: the built chain plus its read size.
pub struct Cursor {
    pub id: u64,
    pub index: String,
    pub pipeline: Pipeline,
    /// Rows per READ unless the read names its own count.
    pub count: usize,
    pub max_idle: Duration,
}

struct Slot {
    index: String,
    /// `None` while a reader holds the cursor.
    cursor: Option<Cursor>,
    last_access: Instant,
    max_idle: Duration,
}

impl Slot {
    fn is_idle(&self, now: Instant) -> bool {
        self.cursor.is_some() && now.duration_since(self.last_access) > self.max_idle
    }
}

/// Cursors of every index, bounded per index.
pub struct CursorPool {
    slots: Mutex<HashMap<u64, Slot>>,
    per_index: usize,
}

impl CursorPool {
    pub fn new(per_index: usize) -> Self {
        CursorPool { slots: Mutex::new(HashMap::new()), per_index }
    }

    /// Registers a new cursor and returns its id. A full index fails with a
    /// retryable error after sweeping its idle cursors once.
    pub fn open(&self, index: &str, pipeline: Pipeline, count: usize, max_idle: Duration) -> Result<u64> {
        let mut slots = self.slots.lock();
        if count_for(&slots, index) >= self.per_index {
            let now = Instant::now();
            slots.retain(|_, s| s.index != index || !s.is_idle(now));
            if count_for(&slots, index) >= self.per_index {
                return Err(Error::new(
                    ErrorKind::CursorCapacityExceeded,
                    format!("Too many cursors allocated for index {}", index),
                ));
            }
        }
        // Ids travel back to clients as signed integers
        let mut rng = rand::thread_rng();
        let id = loop {
            let id = rng.gen_range(1..=i64::MAX as u64);
            if !slots.contains_key(&id) {
                break id;
            }
        };
        let cursor = Cursor { id, index: index.to_string(), pipeline, count: count.max(1), max_idle };
        slots.insert(
            id,
            Slot { index: index.to_string(), cursor: Some(cursor), last_access: Instant::now(), max_idle },
        );
        debug!(index, cursor = id, "cursor opened");
        Ok(id)
    }

    /// Checks a cursor out for reading. It stays counted against its index
    /// until `release` or `finish`.
    pub fn take(&self, index: &str, id: u64) -> Result<Cursor> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        let idle = match slots.get(&id) {
            Some(slot) if slot.index == index => slot.is_idle(now),
            _ => return Err(not_found(id)),
        };
        if idle {
            slots.remove(&id);
            return Err(not_found(id));
        }
        slots
            .get_mut(&id)
            .and_then(|slot| slot.cursor.take())
            .ok_or_else(|| Error::new(ErrorKind::CursorNotFound, format!("Cursor {} is in use", id)))
    }

    /// Returns a checked-out cursor and restarts its idle clock.
    pub fn release(&self, cursor: Cursor) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&cursor.id) {
            slot.last_access = Instant::now();
            slot.cursor = Some(cursor);
        }
    }

    /// Forgets a checked-out cursor whose chain is exhausted.
    pub fn finish(&self, id: u64) {
        self.slots.lock().remove(&id);
    }

    pub fn delete(&self, index: &str, id: u64) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.get(&id).is_some_and(|s| s.index == index) {
            slots.remove(&id);
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    /// Removes cursors idle past their MAXIDLE. Returns how many went.
    pub fn gc_idle(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, s| !s.is_idle(now));
        let swept = before - slots.len();
        if swept > 0 {
            debug!(swept, "idle cursors collected");
        }
        swept
    }

    /// Drops every cursor of a dropped index.
    pub fn purge_index(&self, index: &str) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, s| s.index != index);
        before - slots.len()
    }

    pub fn count_for(&self, index: &str) -> usize {
        count_for(&self.slots.lock(), index)
    }
}

fn count_for(slots: &HashMap<u64, Slot>, index: &str) -> usize {
    slots.values().filter(|s| s.index == index).count()
}

fn not_found(id: u64) -> Error {
    Error::new(ErrorKind::CursorNotFound, format!("Cursor not found, id: {}", id))
}
