//! Retransmission detection for at-most-once RPC semantics.
//!
//! NFS clients retransmit calls they believe lost. Replaying a WRITE or
//! REMOVE would corrupt state, so calls are tracked by `(xid, client)` and
//! duplicates within the retention period are dropped without a reply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

enum TransactionState {
    InProgress,
    Completed(Instant),
}

/// Tracks seen transactions per client address.
pub struct TransactionTracker {
    retention_period: Duration,
    transactions: Mutex<HashMap<(u32, SocketAddr), TransactionState>>,
}

impl TransactionTracker {
    pub fn new(retention_period: Duration) -> TransactionTracker {
        TransactionTracker { retention_period, transactions: Mutex::new(HashMap::new()) }
    }

    /// True when `(xid, client)` was already seen. New transactions are
    /// recorded as in-progress.
    pub fn is_retransmission(&self, xid: u32, client: SocketAddr) -> bool {
        let mut transactions = self.transactions.lock().unwrap();
        housekeeping(&mut transactions, self.retention_period);
        if let std::collections::hash_map::Entry::Vacant(e) = transactions.entry((xid, client)) {
            e.insert(TransactionState::InProgress);
            false
        } else {
            true
        }
    }

    /// Moves a transaction to completed, starting its retention clock.
    pub fn mark_processed(&self, xid: u32, client: SocketAddr) {
        let mut transactions = self.transactions.lock().unwrap();
        if let Some(tx) = transactions.get_mut(&(xid, client)) {
            *tx = TransactionState::Completed(Instant::now());
        }
    }
}

/// Drops completed transactions older than the retention period. Entries
/// still in progress are kept regardless of age.
fn housekeeping(
    transactions: &mut HashMap<(u32, SocketAddr), TransactionState>,
    max_age: Duration,
) {
    transactions.retain(|_, state| match state {
        TransactionState::InProgress => true,
        TransactionState::Completed(at) => at.elapsed() < max_age,
    });
}
