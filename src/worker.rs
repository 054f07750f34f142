/*
 * SPDX-FileCopyrightText: 2024 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The worker pool: spawns one thread per portion inside a
//! [`std::thread::scope`], hands each worker its disjoint slice of the
//! input and output buffers, dispatches to the algorithm in
//! [`crate::algorithms`], and — for SORT — drives the neighbour-exchange
//! protocol described in the mailbox state machine of [`crate::mailbox`].

use crate::algorithms;
use crate::config::{Algorithm, Config};
use crate::error::Error;
use crate::mailbox::{DepositOutcome, Edge, Mailbox, MailboxState};
use crate::record::{derive_key, Layout};
use log::{debug, error, trace};
use std::thread;

/// The outcome of a single worker: `Ok(())` on success, or the error that
/// terminated it. Workers never panic on data-dependent conditions; this
/// is the only channel through which a worker reports failure.
pub type WorkerOutcome = Result<(), Error>;

/// Aggregate result of one [`run`] call: one outcome per worker, in
/// portion order.
#[derive(Debug, Clone)]
pub struct RunReport {
    outcomes: Vec<WorkerOutcome>,
}

impl RunReport {
    /// `true` iff every worker completed without error.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    /// One outcome per worker, indexed by portion number.
    pub fn outcomes(&self) -> &[WorkerOutcome] {
        &self.outcomes
    }

    /// The `(worker index, error)` pairs for every worker that failed.
    pub fn errors(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.outcomes.iter().enumerate().filter_map(|(i, outcome)| outcome.as_ref().err().map(|e| (i, e)))
    }
}

/// Runs `config.algorithm` over `input`, writing into `output`, spawning
/// `config.threads.count` workers bound to equal portions of both buffers.
///
/// Returns `Err` only for configuration-time rejection, before any worker
/// is spawned (§7's propagation policy). Once workers are running, every
/// per-worker failure is captured in the returned [`RunReport`] instead.
pub fn run(config: &Config, input: &[u8], output: &mut [u8]) -> Result<RunReport, Error> {
    config.validate()?;

    let portion_size = config.portion_size();
    let expected_len = config.threads.count * portion_size;
    if input.len() != expected_len {
        return Err(Error::out_of_range(format!("input buffer is {} bytes, expected {expected_len}", input.len())));
    }
    if output.len() != expected_len {
        return Err(Error::out_of_range(format!("output buffer is {} bytes, expected {expected_len}", output.len())));
    }

    let layout = Layout {
        granularity: config.item.granularity,
        record_capacity: config.record.capacity,
        portion_capacity: config.portion.capacity,
    };
    let count = config.threads.count;

    debug!("starting run: {count} workers, algorithm={:?}, portion_size={portion_size}", config.algorithm);

    // One edge per pair of adjacent workers; only ever touched when
    // config.algorithm is Sort, but cheap enough to always allocate.
    let edges: Vec<Edge> = (0..count.saturating_sub(1)).map(|_| Edge::new(layout.record_size())).collect();

    let input_portions: Vec<&[u8]> = input.chunks(portion_size).collect();
    let mut output_portions: Vec<&mut [u8]> = output.chunks_mut(portion_size).collect();

    let outcomes: Vec<WorkerOutcome> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(count);
        for (idx, output_portion) in output_portions.drain(..).enumerate() {
            let input_portion = input_portions[idx];
            let edges_ref = &edges;
            let config_ref = config;
            let layout = layout;
            handles.push(scope.spawn(move || worker_main(idx, count, &layout, config_ref, input_portion, output_portion, edges_ref)));
        }
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::out_of_range("worker thread panicked")),
            })
            .collect()
    });

    let report = RunReport { outcomes };
    if report.is_success() {
        debug!("run finished: all {count} workers succeeded");
    } else {
        error!("run finished with {} failing worker(s)", report.errors().count());
    }
    Ok(report)
}

/// Body of one worker thread: dispatches to the configured algorithm, and
/// for SORT runs the local quicksort followed by the neighbour exchange.
fn worker_main(idx: usize, count: usize, layout: &Layout, config: &Config, input_portion: &[u8], output_portion: &mut [u8], edges: &[Edge]) -> WorkerOutcome {
    trace!("worker {idx} starting, algorithm={:?}", config.algorithm);
    let result = match config.algorithm {
        Algorithm::KeyValue => algorithms::key_value(layout, config.key.mask, config.value.mask, input_portion, output_portion, config.portion.count, config.show_debug),
        Algorithm::Select => algorithms::select(
            layout,
            config.key.mask,
            config.value.mask,
            config.condition,
            input_portion,
            output_portion,
            config.portion.count,
            config.show_debug,
        ),
        Algorithm::Total => algorithms::total(layout, config.value.mask, input_portion, output_portion, config.portion.count),
        Algorithm::Sort => run_sort_worker(idx, count, layout, config.key.mask, input_portion, output_portion, config.portion.count, edges),
    };
    match &result {
        Ok(()) => trace!("worker {idx} finished"),
        Err(e) => error!("worker {idx} failed: {e}"),
    }
    result
}

/// The live window a SORT worker is migrating records through: kept
/// sorted ascending by key at all times. Records move across edges one
/// at a time, so a plain sorted `Vec` (binary-search insert, remove from
/// either end) is simpler to reason about than in-place index juggling
/// inside the fixed-capacity portion slice, while producing the exact
/// same final contents.
struct Window {
    records: Vec<(u64, Vec<u8>)>,
    capacity: usize,
}

impl Window {
    fn from_portion(layout: &Layout, portion: &[u8], key_mask: u64, count: usize) -> Self {
        let records = (0..count)
            .map(|i| {
                let record = layout.record(portion, i);
                (derive_key(record, layout.granularity, layout.record_capacity, key_mask), record.to_vec())
            })
            .collect();
        Window { records, capacity: layout.portion_capacity }
    }

    fn min_key(&self) -> Option<u64> {
        self.records.first().map(|(k, _)| *k)
    }

    fn max_key(&self) -> Option<u64> {
        self.records.last().map(|(k, _)| *k)
    }

    fn pop_min(&mut self) -> Option<(u64, Vec<u8>)> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.records.remove(0))
        }
    }

    fn pop_max(&mut self) -> Option<(u64, Vec<u8>)> {
        self.records.pop()
    }

    fn insert_sorted(&mut self, key: u64, record: Vec<u8>) -> Result<(), Error> {
        if self.records.len() >= self.capacity {
            return Err(Error::out_of_range("sort exchange received a record beyond portion capacity"));
        }
        let pos = self.records.partition_point(|(k, _)| *k < key);
        self.records.insert(pos, (key, record));
        Ok(())
    }

    /// Writes the live window back into `portion` as its sorted prefix;
    /// the tail beyond `records.len()` (already holding whatever the
    /// local quicksort left there) is untouched.
    fn write_back(&self, layout: &Layout, portion: &mut [u8]) {
        for (i, (_, record)) in self.records.iter().enumerate() {
            layout.record_mut(portion, i).copy_from_slice(record);
        }
    }
}

/// Runs the local quicksort and, if this worker has any neighbours, the
/// full neighbour-exchange loop of §4.4.
fn run_sort_worker(idx: usize, count: usize, layout: &Layout, key_mask: u64, input_portion: &[u8], output_portion: &mut [u8], live_count: usize, edges: &[Edge]) -> WorkerOutcome {
    let self_left = (idx > 0).then(|| &edges[idx - 1].left_pub);
    let self_right = (idx + 1 < count).then(|| &edges[idx].right_pub);
    let peer_left_right = (idx > 0).then(|| &edges[idx - 1].right_pub);
    let peer_right_left = (idx + 1 < count).then(|| &edges[idx].left_pub);

    if let Some(m) = self_left {
        m.begin_sort();
    }
    if let Some(m) = self_right {
        m.begin_sort();
    }

    algorithms::sort_local(layout, key_mask, input_portion, output_portion, live_count);

    if self_left.is_none() && self_right.is_none() {
        // Single-worker run: no edges to exchange over.
        return Ok(());
    }

    let mut window = Window::from_portion(layout, output_portion, key_mask, live_count);

    if let Some(m) = self_left {
        m.publish(window.min_key());
    }
    if let Some(m) = self_right {
        m.publish(window.max_key());
    }

    let mut left_closed = self_left.is_none();
    let mut right_closed = self_right.is_none();

    while !(left_closed && right_closed) {
        if !left_closed {
            left_closed = try_send_left(idx, layout, key_mask, &mut window, self_left.unwrap(), peer_left_right.unwrap())?;
        }
        if !right_closed {
            right_closed = try_send_right(idx, layout, key_mask, &mut window, self_right.unwrap(), peer_right_left.unwrap())?;
        }
        if let Some(m) = self_left {
            if let Some(record) = m.take_if_pending() {
                let key = derive_key(&record, layout.granularity, layout.record_capacity, key_mask);
                window.insert_sorted(key, record).map_err(|e| fail_both(self_left, self_right, e))?;
                m.publish(window.min_key());
                trace!("worker {idx} took a record from its left neighbour");
            }
        }
        if let Some(m) = self_right {
            if let Some(record) = m.take_if_pending() {
                let key = derive_key(&record, layout.granularity, layout.record_capacity, key_mask);
                window.insert_sorted(key, record).map_err(|e| fail_both(self_left, self_right, e))?;
                m.publish(window.max_key());
                trace!("worker {idx} took a record from its right neighbour");
            }
        }
        if !(left_closed && right_closed) {
            thread::yield_now();
        }
    }

    window.write_back(layout, output_portion);
    debug!("worker {idx} finished sort exchange with {} live records", window.records.len());
    Ok(())
}

fn fail_both(self_left: Option<&Mailbox>, self_right: Option<&Mailbox>, err: Error) -> Error {
    if let Some(m) = self_left {
        m.fail();
    }
    if let Some(m) = self_right {
        m.fail();
    }
    err
}

/// Closes `mailbox` and, if a neighbour's deposit raced the closing (landed
/// between this worker's last `take_if_pending` and now), reclaims the
/// record into `window` instead of letting `close` discard it.
fn close_and_reclaim(mailbox: &Mailbox, layout: &Layout, key_mask: u64, window: &mut Window) -> Result<(), Error> {
    if let Some(record) = mailbox.close() {
        let key = derive_key(&record, layout.granularity, layout.record_capacity, key_mask);
        window.insert_sorted(key, record)?;
    }
    Ok(())
}

/// Attempts to push the window's current minimum to the left neighbour.
/// Returns `Ok(true)` once this side has latched to `NO_FREE_SPACE`
/// (nothing left to usefully send there, ever again), `Ok(false)` if it
/// should keep being retried.
fn try_send_left(idx: usize, layout: &Layout, key_mask: u64, window: &mut Window, self_left: &Mailbox, peer_right_mailbox: &Mailbox) -> Result<bool, Error> {
    let (peer_state, peer_bound) = peer_right_mailbox.snapshot();
    match peer_state {
        MailboxState::ReadyForExchange => {
            let Some(candidate_key) = window.min_key() else {
                // Nothing of our own to offer. If the neighbour is just as
                // empty it will never have anything to deposit here either,
                // so the edge is permanently done; otherwise stay open until
                // the neighbour closes it from its end.
                return if peer_bound.is_none() {
                    close_and_reclaim(self_left, layout, key_mask, window)?;
                    Ok(true)
                } else {
                    Ok(false)
                };
            };
            let (_, record) = window.pop_min().expect("min_key returned Some");
            // Worth sending when the neighbour's current maximum is still
            // above our candidate (or the neighbour has nothing at all);
            // re-checked atomically under the neighbour's own lock.
            match peer_right_mailbox.deposit_if_ready(&record, |max| max.map_or(true, |max| candidate_key < max)) {
                DepositOutcome::Deposited => {
                    trace!("worker {idx} sent a record left");
                    Ok(false)
                }
                DepositOutcome::NotUseful | DepositOutcome::NoSpace => {
                    window.insert_sorted(candidate_key, record)?;
                    close_and_reclaim(self_left, layout, key_mask, window)?;
                    Ok(true)
                }
                DepositOutcome::Failed => {
                    window.insert_sorted(candidate_key, record)?;
                    Err(Error::mailbox_protocol("left neighbour failed during send"))
                }
                DepositOutcome::Busy => {
                    window.insert_sorted(candidate_key, record)?;
                    Ok(false)
                }
            }
        }
        MailboxState::NoFreeSpace => {
            close_and_reclaim(self_left, layout, key_mask, window)?;
            Ok(true)
        }
        MailboxState::Failed => Err(Error::mailbox_protocol("left neighbour failed")),
        MailboxState::QuicksortInProgress | MailboxState::PleaseTakeRecord | MailboxState::Unknown => Ok(false),
    }
}

/// Symmetric to [`try_send_left`]: pushes the window's current maximum to
/// the right neighbour.
fn try_send_right(idx: usize, layout: &Layout, key_mask: u64, window: &mut Window, self_right: &Mailbox, peer_left_mailbox: &Mailbox) -> Result<bool, Error> {
    let (peer_state, peer_bound) = peer_left_mailbox.snapshot();
    match peer_state {
        MailboxState::ReadyForExchange => {
            let Some(candidate_key) = window.max_key() else {
                // Symmetric to try_send_left: only safe to close when the
                // neighbour is equally empty and will never deposit either.
                return if peer_bound.is_none() {
                    close_and_reclaim(self_right, layout, key_mask, window)?;
                    Ok(true)
                } else {
                    Ok(false)
                };
            };
            let (_, record) = window.pop_max().expect("max_key returned Some");
            match peer_left_mailbox.deposit_if_ready(&record, |min| min.map_or(true, |min| candidate_key > min)) {
                DepositOutcome::Deposited => {
                    trace!("worker {idx} sent a record right");
                    Ok(false)
                }
                DepositOutcome::NotUseful | DepositOutcome::NoSpace => {
                    window.insert_sorted(candidate_key, record)?;
                    close_and_reclaim(self_right, layout, key_mask, window)?;
                    Ok(true)
                }
                DepositOutcome::Failed => {
                    window.insert_sorted(candidate_key, record)?;
                    Err(Error::mailbox_protocol("right neighbour failed during send"))
                }
                DepositOutcome::Busy => {
                    window.insert_sorted(candidate_key, record)?;
                    Ok(false)
                }
            }
        }
        MailboxState::NoFreeSpace => {
            close_and_reclaim(self_right, layout, key_mask, window)?;
            Ok(true)
        }
        MailboxState::Failed => Err(Error::mailbox_protocol("right neighbour failed")),
        MailboxState::QuicksortInProgress | MailboxState::PleaseTakeRecord | MailboxState::Unknown => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConditionDescriptor, ItemDescriptor, KeyDescriptor, PortionDescriptor, RecordDescriptor, ThreadsDescriptor, ValueDescriptor};

    fn sort_config(threads: usize, portion_capacity: usize, portion_count: usize) -> Config {
        Config {
            threads: ThreadsDescriptor { count: threads, portion_size: portion_capacity * 2 },
            item: ItemDescriptor { granularity: 1 },
            record: RecordDescriptor { capacity: 2 },
            portion: PortionDescriptor { capacity: portion_capacity, count: portion_count },
            key: KeyDescriptor { mask: 0b10 },
            value: ValueDescriptor { mask: 0 },
            condition: ConditionDescriptor::default(),
            algorithm: Algorithm::Sort,
            show_debug: false,
        }
    }

    #[test]
    fn single_portion_sort_is_local_only() {
        let config = sort_config(1, 5, 5);
        let input: Vec<u8> = vec![3, 0, 1, 0, 4, 0, 1, 0, 5, 0];
        let mut output = vec![0u8; input.len()];
        let report = run(&config, &input, &mut output).unwrap();
        assert!(report.is_success());
        let keys: Vec<u8> = (0..5).map(|i| output[i * 2]).collect();
        assert_eq!(keys, vec![1, 1, 3, 4, 5]);
    }

    #[test]
    fn two_portion_sort_exchanges_across_the_edge() {
        let config = sort_config(2, 3, 3);
        // portion 0: (9,_),(7,_),(8,_); portion 1: (2,_),(4,_),(3,_)
        let input: Vec<u8> = vec![9, 0, 7, 0, 8, 0, 2, 0, 4, 0, 3, 0];
        let mut output = vec![0u8; input.len()];
        let report = run(&config, &input, &mut output).unwrap();
        assert!(report.is_success(), "errors: {:?}", report.errors().collect::<Vec<_>>());
        let keys: Vec<u8> = (0..6).map(|i| output[i * 2]).collect();
        assert_eq!(keys, vec![2, 3, 4, 7, 8, 9]);
        assert!(keys[..3].iter().max() <= keys[3..].iter().min());
    }

    #[test]
    fn sort_with_every_portion_empty_terminates_instead_of_hanging() {
        // portion.count == 0 everywhere: no worker ever has anything to
        // send, and no neighbour ever has anything to deposit either, so
        // every edge must close immediately rather than spin forever.
        let config = sort_config(3, 4, 0);
        let input = vec![0u8; config.threads.portion_size * 3];
        let mut output = vec![0u8; input.len()];
        let report = run(&config, &input, &mut output).unwrap();
        assert!(report.is_success(), "errors: {:?}", report.errors().collect::<Vec<_>>());
    }

    #[test]
    fn rejects_mismatched_buffer_length() {
        let config = sort_config(1, 2, 2);
        let input = vec![0u8; 3];
        let mut output = vec![0u8; 4];
        assert!(matches!(run(&config, &input, &mut output), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn key_value_dispatch_through_pool() {
        let mut config = sort_config(1, 2, 2);
        config.algorithm = Algorithm::KeyValue;
        config.key.mask = 0b10;
        config.value.mask = 0b01;
        let input: Vec<u8> = vec![1, 2, 3, 4];
        let mut output = vec![0u8; 4];
        let report = run(&config, &input, &mut output).unwrap();
        assert!(report.is_success());
        assert_eq!(output, vec![1, 2, 3, 4]);
    }
}
