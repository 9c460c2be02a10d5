//! Per-file read-ahead.
//!
//! After a sequential-looking READ the server extends a prefetch window
//! forward by the configured size with a single background fill; subsequent
//! READs inside the window are answered from memory without touching the
//! backend. At most one fill is in flight per file — a reader that needs a
//! window currently being filled awaits the fill instead of duplicating it.
//!
//! A slot dies when the file is written or truncated through this server,
//! when its handle is released, or after more than two non-sequential reads
//! in a row.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use crate::vfs::FileSystem;

/// Non-sequential reads tolerated before the slot is discarded.
const MAX_MISSTEPS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillState {
    Empty,
    Filling,
    Ready,
    Error,
}

#[derive(Debug)]
struct SlotState {
    /// File offset of the first buffered byte.
    start: u64,
    data: Vec<u8>,
    fill: FillState,
    /// True when the fill hit end of file.
    eof: bool,
    /// Offset one past the last byte the client read.
    expected_next: u64,
    missteps: u8,
    last_used: Instant,
}

struct Slot {
    state: Mutex<SlotState>,
    filled: Notify,
}

impl Slot {
    fn new(expected_next: u64) -> Slot {
        Slot {
            state: Mutex::new(SlotState {
                start: 0,
                data: Vec::new(),
                fill: FillState::Empty,
                eof: false,
                expected_next,
                missteps: 0,
                last_used: Instant::now(),
            }),
            filled: Notify::new(),
        }
    }
}

/// Read-ahead slots keyed by file-handle id.
pub struct ReadAhead {
    slots: DashMap<u64, Arc<Slot>>,
    window: AtomicU32,
    enabled: AtomicBool,
}

impl ReadAhead {
    pub fn new(window: u32, enabled: bool) -> ReadAhead {
        ReadAhead {
            slots: DashMap::new(),
            window: AtomicU32::new(window.max(4096)),
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Serves a READ entirely from the buffer when possible. Returns the
    /// data and the EOF flag for the reply. If the window is mid-fill the
    /// caller is suspended until the fill settles.
    pub async fn try_read(&self, id: u64, offset: u64, count: u32) -> Option<(Vec<u8>, bool)> {
        if !self.enabled.load(Ordering::Relaxed) {
            return None;
        }
        let slot = self.slots.get(&id)?.clone();
        loop {
            let mut state = slot.state.lock().await;
            match state.fill {
                FillState::Filling => {
                    // A second reader on a filling slot awaits the result
                    // rather than issuing a duplicate backend read.
                    let notified = slot.filled.notified();
                    drop(state);
                    notified.await;
                }
                FillState::Ready => {
                    let end = state.start + state.data.len() as u64;
                    if offset < state.start || offset > end {
                        return None;
                    }
                    let from = (offset - state.start) as usize;
                    let to = (from + count as usize).min(state.data.len());
                    // Reads past the buffered range only count as buffered
                    // when the buffer ends at EOF.
                    if offset + u64::from(count) > end && !state.eof {
                        return None;
                    }
                    let data = state.data[from..to].to_vec();
                    let eof = state.eof && offset + data.len() as u64 >= end;
                    state.expected_next = offset + data.len() as u64;
                    state.last_used = Instant::now();
                    trace!(id, offset, len = data.len(), "read served from read-ahead");
                    return Some((data, eof));
                }
                FillState::Empty | FillState::Error => return None,
            }
        }
    }

    /// Records a READ answered by the backend and, when the access pattern
    /// looks sequential, starts one background fill of the next window.
    pub async fn observe_read(
        &self,
        id: u64,
        path: &str,
        offset: u64,
        returned: usize,
        eof: bool,
        backend: Arc<dyn FileSystem>,
    ) {
        if !self.enabled.load(Ordering::Relaxed) || eof {
            return;
        }
        let window = self.window.load(Ordering::Relaxed);
        let read_end = offset + returned as u64;

        let slot = match self.slots.get(&id) {
            Some(slot) => slot.clone(),
            None => {
                let slot = Arc::new(Slot::new(read_end));
                self.slots.insert(id, slot.clone());
                slot
            }
        };

        let mut state = slot.state.lock().await;
        if state.fill == FillState::Filling {
            return;
        }
        // Sequential means the read started within one window of where the
        // previous read ended.
        let sequential = state.expected_next.abs_diff(offset) <= u64::from(window);
        if !sequential {
            state.missteps += 1;
            if state.missteps > MAX_MISSTEPS {
                drop(state);
                self.invalidate(id);
                debug!(id, "read-ahead slot dropped after non-sequential reads");
            }
            return;
        }
        state.missteps = 0;
        state.expected_next = read_end;
        state.fill = FillState::Filling;
        drop(state);

        let slot_for_fill = slot.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            let result = backend.read_file(&path, read_end, window).await;
            let mut state = slot_for_fill.state.lock().await;
            match result {
                Ok((data, fill_eof)) => {
                    trace!(id, start = read_end, len = data.len(), "read-ahead fill complete");
                    state.start = read_end;
                    state.data = data;
                    state.eof = fill_eof;
                    state.fill = FillState::Ready;
                }
                Err(err) => {
                    debug!(id, %err, "read-ahead fill failed");
                    state.data = Vec::new();
                    state.fill = FillState::Error;
                }
            }
            drop(state);
            slot_for_fill.filled.notify_waiters();
        });
    }

    /// Discards the slot of a file that was written, truncated or released.
    pub fn invalidate(&self, id: u64) {
        self.slots.remove(&id);
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    pub fn set_window(&self, window: u32) {
        self.window.store(window.max(4096), Ordering::Relaxed);
    }
}
