/*
 * SPDX-FileCopyrightText: 2024 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The neighbour-exchange mailbox: one single-slot, mutex-guarded handoff
//! point between two adjacent workers.

use std::sync::Mutex;

/// State of one mailbox, as seen by both the worker that owns it and the
/// neighbour on the other side of the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MailboxState {
    /// The owning worker hasn't finished its local sort yet.
    Unknown,
    /// Local sort is running; neither side may touch this mailbox.
    QuicksortInProgress,
    /// The owner published a bound and is ready for a neighbour to
    /// deposit a record, or for the owner itself to deposit into the
    /// neighbour's mailbox.
    ReadyForExchange,
    /// A record is sitting in `scratch`, waiting to be taken by the owner.
    PleaseTakeRecord,
    /// This side of the edge has no more useful migration to perform and
    /// will never transition away from this state again.
    NoFreeSpace,
    /// The owning worker failed; the edge is to be treated as closed.
    Failed,
}

struct Inner {
    state: MailboxState,
    /// The owner's current extremal live key on this side (its minimum on
    /// a left mailbox, its maximum on a right mailbox). `None` means the
    /// owner's live window is empty: it has nothing to send, but will
    /// accept any record offered to it.
    bound: Option<u64>,
    scratch: Vec<u8>,
}

/// Outcome of attempting to deposit a record into a neighbour's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepositOutcome {
    /// The record was copied in and the mailbox is now `PLEASE_TAKE_RECORD`.
    Deposited,
    /// The mailbox was ready, but the migration would not be useful (the
    /// bound comparison failed): the sending side should close instead.
    NotUseful,
    /// The neighbour has already closed this side of the edge.
    NoSpace,
    /// The neighbour failed.
    Failed,
    /// The mailbox is mid-transition (sorting, or already holding an
    /// undelivered record); try again later.
    Busy,
}

/// One half of an edge between two adjacent workers: a single record slot
/// guarded by one mutex, published bound, and state.
pub(crate) struct Mailbox {
    inner: Mutex<Inner>,
}

impl Mailbox {
    pub fn new(record_size: usize) -> Self {
        Mailbox {
            inner: Mutex::new(Inner {
                state: MailboxState::Unknown,
                bound: None,
                scratch: vec![0u8; record_size],
            }),
        }
    }

    /// Marks the owner as busy sorting; neither neighbour may deposit or
    /// expect a take while this holds.
    pub fn begin_sort(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = MailboxState::QuicksortInProgress;
    }

    /// Advertises readiness with a fresh boundary key, or `None` if the
    /// owner's live window is currently empty.
    pub fn publish(&self, bound: Option<u64>) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = MailboxState::ReadyForExchange;
        inner.bound = bound;
    }

    /// Closes this side for good (idempotent; never reopens, and never
    /// overwrites `FAILED`).
    ///
    /// If a record was deposited here (by a neighbour racing this call
    /// with its own send) and never taken, it is drained and handed back
    /// to the caller instead of being silently dropped when the state
    /// latches to `NO_FREE_SPACE` — the two sides of an edge are
    /// independently mutexed, so a neighbour can still be mid-deposit right
    /// up to the moment this worker decides to close its end.
    pub fn close(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let drained = (inner.state == MailboxState::PleaseTakeRecord).then(|| inner.scratch.clone());
        if inner.state != MailboxState::Failed {
            inner.state = MailboxState::NoFreeSpace;
        }
        drained
    }

    /// Marks this side as permanently failed.
    pub fn fail(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = MailboxState::Failed;
    }

    /// Current state and published bound, read under the mutex.
    pub fn snapshot(&self) -> (MailboxState, Option<u64>) {
        let inner = self.inner.lock().unwrap();
        (inner.state, inner.bound)
    }

    /// Atomically checks readiness, evaluates `worth_sending` against the
    /// published bound, and if both hold copies `record` in and flips the
    /// state to `PLEASE_TAKE_RECORD` — all under one lock acquisition, so
    /// no other thread can observe or act on a half-applied transition.
    pub fn deposit_if_ready(&self, record: &[u8], worth_sending: impl FnOnce(Option<u64>) -> bool) -> DepositOutcome {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            MailboxState::ReadyForExchange if worth_sending(inner.bound) => {
                inner.scratch.copy_from_slice(record);
                inner.state = MailboxState::PleaseTakeRecord;
                DepositOutcome::Deposited
            }
            MailboxState::ReadyForExchange => DepositOutcome::NotUseful,
            MailboxState::NoFreeSpace => DepositOutcome::NoSpace,
            MailboxState::Failed => DepositOutcome::Failed,
            MailboxState::QuicksortInProgress | MailboxState::PleaseTakeRecord | MailboxState::Unknown => DepositOutcome::Busy,
        }
    }

    /// If a record is waiting, copies it out and leaves the mailbox
    /// `READY_FOR_EXCHANGE` (the caller is expected to call [`Self::publish`]
    /// immediately afterwards with a freshly computed bound).
    pub fn take_if_pending(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == MailboxState::PleaseTakeRecord {
            let record = inner.scratch.clone();
            inner.state = MailboxState::ReadyForExchange;
            Some(record)
        } else {
            None
        }
    }
}

/// One edge between two adjacent workers: two independently mutex-guarded
/// mailboxes, `left_pub` owned by the worker to the right of the edge and
/// `right_pub` owned by the worker to the left of it.
pub(crate) struct Edge {
    pub left_pub: Mailbox,
    pub right_pub: Mailbox,
}

impl Edge {
    pub fn new(record_size: usize) -> Self {
        Edge {
            left_pub: Mailbox::new(record_size),
            right_pub: Mailbox::new(record_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_respects_bound_predicate() {
        let mailbox = Mailbox::new(4);
        mailbox.publish(Some(10));
        assert_eq!(mailbox.deposit_if_ready(&[1, 2, 3, 4], |bound| bound.is_some_and(|b| b < 5)), DepositOutcome::NotUseful);
        assert_eq!(mailbox.snapshot().0, MailboxState::ReadyForExchange);
        assert_eq!(mailbox.deposit_if_ready(&[1, 2, 3, 4], |bound| bound.is_some_and(|b| b < 20)), DepositOutcome::Deposited);
        assert_eq!(mailbox.snapshot().0, MailboxState::PleaseTakeRecord);
    }

    #[test]
    fn take_leaves_mailbox_ready_for_republish() {
        let mailbox = Mailbox::new(4);
        mailbox.publish(Some(10));
        mailbox.deposit_if_ready(&[9, 9, 9, 9], |_| true);
        let taken = mailbox.take_if_pending().unwrap();
        assert_eq!(taken, vec![9, 9, 9, 9]);
        assert_eq!(mailbox.snapshot().0, MailboxState::ReadyForExchange);
        assert!(mailbox.take_if_pending().is_none());
    }

    #[test]
    fn close_does_not_override_failed() {
        let mailbox = Mailbox::new(4);
        mailbox.fail();
        assert_eq!(mailbox.close(), None);
        assert_eq!(mailbox.snapshot().0, MailboxState::Failed);
    }

    #[test]
    fn close_drains_a_record_deposited_just_before_it_closes() {
        let mailbox = Mailbox::new(4);
        mailbox.publish(Some(10));
        // A neighbour's deposit racing this worker's decision to close.
        mailbox.deposit_if_ready(&[7, 7, 7, 7], |_| true);
        assert_eq!(mailbox.close(), Some(vec![7, 7, 7, 7]));
        assert_eq!(mailbox.snapshot().0, MailboxState::NoFreeSpace);
    }

    #[test]
    fn busy_states_reject_deposit() {
        let mailbox = Mailbox::new(4);
        mailbox.begin_sort();
        assert_eq!(mailbox.deposit_if_ready(&[0; 4], |_| true), DepositOutcome::Busy);
    }
}
