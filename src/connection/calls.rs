//! RPC ledger
//!
//! Transaction-id allocation, the pending-call map and the deferred
//! result set. Every outbound Invoke that expects a reply is parked here
//! under its transaction id; the reply (or connection close) takes it
//! out again, exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::service::{CallStatus, DeferredResult, PendingCall, ServiceCall};

/// Per-connection RPC bookkeeping
#[derive(Debug, Default)]
pub struct CallLedger {
    transaction_id: AtomicU32,
    pending: Mutex<HashMap<u32, PendingCall>>,
    deferred: Mutex<HashMap<u32, DeferredResult>>,
}

impl CallLedger {
    /// Create an empty ledger; the first transaction id issued is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next transaction id. Strictly monotone per
    /// connection; wraps only on `u32` overflow.
    pub fn next_transaction_id(&self) -> u32 {
        self.transaction_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    /// Park a pending call under its transaction id.
    ///
    /// Callers register before writing the Invoke so a fast reply can
    /// never race past the record.
    pub fn register_pending(&self, transaction_id: u32, call: PendingCall) {
        self.pending.lock().insert(transaction_id, call);
    }

    /// Non-destructive read of a pending call
    pub fn pending_call(&self, transaction_id: u32) -> Option<ServiceCall> {
        self.pending
            .lock()
            .get(&transaction_id)
            .map(|p| p.call().clone())
    }

    /// Destructive take of a pending call
    pub fn retrieve_pending_call(&self, transaction_id: u32) -> Option<PendingCall> {
        self.pending.lock().remove(&transaction_id)
    }

    /// Number of calls still awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Track a deferred result for eventual write-out
    pub fn register_deferred_result(&self, result: DeferredResult) {
        self.deferred.lock().insert(result.transaction_id, result);
    }

    /// Remove a deferred result, typically right before answering it
    pub fn unregister_deferred_result(&self, transaction_id: u32) -> Option<DeferredResult> {
        self.deferred.lock().remove(&transaction_id)
    }

    /// Fail every surviving pending call with `status`, firing each
    /// call's callbacks exactly once, and drop the deferred set.
    pub fn fail_pending_calls(&self, status: CallStatus) {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            call.complete_with_status(status);
        }
        if count > 0 {
            tracing::debug!(count = count, status = ?status, "Failed pending calls");
        }
        self.deferred.lock().clear();
    }

    /// Drop all state without firing callbacks
    pub fn clear(&self) {
        self.pending.lock().clear();
        self.deferred.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32 as TestCounter;
    use std::sync::Arc;

    #[test]
    fn test_transaction_ids_monotone_and_unique() {
        let ledger = CallLedger::new();
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..1000 {
            let id = ledger.next_transaction_id();
            assert!(id > last);
            assert!(seen.insert(id));
            last = id;
        }
        assert_eq!(last, 1000);
    }

    #[test]
    fn test_transaction_ids_unique_across_threads() {
        let ledger = Arc::new(CallLedger::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| ledger.next_transaction_id()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate transaction id {}", id);
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_pending_read_is_non_destructive() {
        let ledger = CallLedger::new();
        ledger.register_pending(7, PendingCall::new("createStream", vec![]));

        assert!(ledger.pending_call(7).is_some());
        assert!(ledger.pending_call(7).is_some());
        assert_eq!(ledger.pending_count(), 1);

        let taken = ledger.retrieve_pending_call(7);
        assert!(taken.is_some());
        assert!(ledger.pending_call(7).is_none());
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn test_fail_pending_fires_each_callback_once() {
        let ledger = CallLedger::new();
        let fired = Arc::new(TestCounter::new(0));

        for txid in [7, 8, 9] {
            let mut call = PendingCall::new("publish", vec![]);
            let fired = Arc::clone(&fired);
            call.register_callback(Arc::new(move |call| {
                assert_eq!(call.status, CallStatus::NotConnected);
                fired.fetch_add(1, Ordering::SeqCst);
            }));
            ledger.register_pending(txid, call);
        }

        ledger.fail_pending_calls(CallStatus::NotConnected);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.pending_count(), 0);

        // Second pass finds nothing to fail.
        ledger.fail_pending_calls(CallStatus::NotConnected);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_deferred_results() {
        let ledger = CallLedger::new();
        ledger.register_deferred_result(DeferredResult {
            transaction_id: 3,
            channel_id: 3,
            call: ServiceCall::new("getLiveStreams", vec![]),
        });

        let taken = ledger.unregister_deferred_result(3).expect("deferred");
        assert_eq!(taken.transaction_id, 3);
        assert!(ledger.unregister_deferred_result(3).is_none());
    }
}
