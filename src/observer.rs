//! Condition-keyed observer lists and their mailboxes.
//!
//! Two layered abstractions, mirroring the split between
//! `original_source/include/observed.h`'s `Conditionally_Data_Observed` and
//! `Concurrent_Observed`:
//!
//! - [`Observer`] is anything that can receive an item along with the
//!   condition it was delivered under (an endpoint registers under both its
//!   own port and the internal-broadcast port, and tells the two apart from
//!   the condition it's handed).
//! - [`ConcurrentObserved`] is a mutex-guarded list of `(condition, observer)`
//!   registrations that fans a notification out to every entry whose
//!   condition matches, cloning the item for every recipient after the
//!   first so no buffer is aliased.
//!
//! `observed.h`'s `Concurrent_Observed` also has a `notifyBroadcast` that
//! skips the observer registered under the source's own condition, for
//! self-feedback suppression. This crate suppresses self-feedback one layer
//! down instead: [`Interface`](crate::interface::Interface)'s event loop
//! drops any externally-arriving frame whose source link address is this
//! host's own, before the frame ever reaches an observer — a link-address
//! check is unambiguous, where a condition-based one would have to assume
//! every broadcaster's own port equals its `source_condition`.
//!
//! A mailbox here is a [`crossbeam::channel`] of `Option<T>`: sending `Some`
//! enqueues and wakes a blocked receiver; sending `None` is the null
//! sentinel used to unblock a receiver on `close()` without handing it data.
//! The channel itself supplies both the FIFO ordering and the blocking-wait
//! the original's `sem_t`-guarded list provided by hand.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;

/// One end of an observer's mailbox; held by whoever notifies it.
pub struct Mailbox<T> {
    tx: Sender<Option<T>>,
    rx: Receiver<Option<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        Mailbox { tx, rx }
    }

    /// Enqueues an item and wakes a blocked receiver.
    pub fn post(&self, item: T) {
        let _ = self.tx.send(Some(item));
    }

    /// Wakes a blocked receiver with no item; used by `close()`.
    pub fn wake_empty(&self) {
        let _ = self.tx.send(None);
    }

    /// Blocks until an item or a close sentinel arrives. `None` means the
    /// mailbox was closed; the caller should stop waiting on it.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok().flatten()
    }

    pub fn sender(&self) -> Sender<Option<T>> {
        self.tx.clone()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can receive a condition-tagged item.
pub trait Observer<T, C: Copy + Eq>: Send + Sync {
    /// Delivers (or wakes with) an item under the condition it was posted
    /// under. `None` is the close sentinel.
    fn notify(&self, condition: C, item: Option<T>);
}

/// A mutex-guarded list of `(condition, observer)` registrations, fanned out
/// to by condition.
///
/// Grounded on `original_source/include/observed.h`'s `Concurrent_Observed`.
/// A single observer may be registered more than once under different
/// conditions, matching `Communicator`'s constructor attaching itself at
/// both its own port and `INTERNAL_BROADCAST_PORT`.
pub struct ConcurrentObserved<T, C: Copy + Eq> {
    entries: Mutex<Vec<(C, Arc<dyn Observer<T, C>>)>>,
}

impl<T: Clone, C: Copy + Eq> ConcurrentObserved<T, C> {
    pub fn new() -> Self {
        ConcurrentObserved {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn attach(&self, condition: C, observer: Arc<dyn Observer<T, C>>) {
        self.entries.lock().push((condition, observer));
    }

    /// Removes every registration under `condition` for the observer whose
    /// pointer matches `observer` — keeps other registrations of the same
    /// observer under different conditions intact.
    pub fn detach(&self, condition: C, observer: &Arc<dyn Observer<T, C>>) {
        self.entries
            .lock()
            .retain(|(c, o)| !(*c == condition && Arc::ptr_eq(o, observer)));
    }

    /// Delivers `item` to every observer registered under `condition`.
    /// Returns the number of observers notified.
    pub fn notify(&self, condition: C, item: T) -> usize {
        let entries = self.entries.lock();
        let mut delivered = 0;
        for (c, obs) in entries.iter().filter(|(c, _)| *c == condition) {
            obs.notify(*c, Some(item.clone()));
            delivered += 1;
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: Clone, C: Copy + Eq> Default for ConcurrentObserved<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        received: Arc<AtomicUsize>,
    }

    impl Observer<u8, u32> for Counter {
        fn notify(&self, _condition: u32, item: Option<u8>) {
            if item.is_some() {
                self.received.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn notify_only_reaches_matching_condition() {
        let observed: ConcurrentObserved<u8, u32> = ConcurrentObserved::new();
        let a: Arc<dyn Observer<u8, u32>> = Arc::new(Counter { received: Arc::new(AtomicUsize::new(0)) });
        let b: Arc<dyn Observer<u8, u32>> = Arc::new(Counter { received: Arc::new(AtomicUsize::new(0)) });
        observed.attach(1, a.clone());
        observed.attach(2, b.clone());

        let delivered = observed.notify(1, 7u8);
        assert_eq!(delivered, 1);
    }

    #[test]
    fn mailbox_close_wakes_with_none() {
        let mailbox: Mailbox<u8> = Mailbox::new();
        mailbox.post(1);
        mailbox.wake_empty();
        assert_eq!(mailbox.recv(), Some(1));
        assert_eq!(mailbox.recv(), None);
    }
}
