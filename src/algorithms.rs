/*
 * SPDX-FileCopyrightText: 2024 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Per-portion dispatch for the four batch algorithms. Each function here
//! is handed one worker's input and output portion slices and the live
//! record count; SORT's cross-worker exchange phase lives in
//! [`crate::worker`], since it needs the neighbour mailboxes, not just the
//! local portion.

use crate::config::ConditionDescriptor;
use crate::error::Error;
use crate::record::{derive_key, project, sort_portion, Layout};
use log::trace;

/// KEY-VALUE: for every live record, project the key items then the value
/// items into the output portion, back to back, advancing a single cursor.
/// The output portion is zeroed first so the unused tail reads as zero.
///
/// `show_debug` gates an extra `trace!` per record; it exists so a caller
/// that wants per-record tracing doesn't pay for formatting that string on
/// every record of a large portion when it hasn't asked for it, on top of
/// whatever the `log` crate's own level filter already does.
pub(crate) fn key_value(layout: &Layout, key_mask: u64, value_mask: u64, input: &[u8], output: &mut [u8], count: usize, show_debug: bool) -> Result<(), Error> {
    output.fill(0);
    let mut written = 0usize;
    for i in 0..count {
        let record = layout.record(input, i);
        project(record, layout.granularity, layout.record_capacity, key_mask, output, &mut written)?;
        project(record, layout.granularity, layout.record_capacity, value_mask, output, &mut written)?;
        if show_debug {
            trace!("key_value: projected record {i}, {written} bytes written so far");
        }
    }
    Ok(())
}

/// SELECT: like KEY-VALUE, but only for records whose derived key falls in
/// the half-open `[min, max)` range; records outside it are skipped
/// entirely, and the output is the zero-padded prefix of survivors in
/// input order.
pub(crate) fn select(
    layout: &Layout,
    key_mask: u64,
    value_mask: u64,
    condition: ConditionDescriptor,
    input: &[u8],
    output: &mut [u8],
    count: usize,
    show_debug: bool,
) -> Result<(), Error> {
    output.fill(0);
    let mut written = 0usize;
    for i in 0..count {
        let record = layout.record(input, i);
        let key = derive_key(record, layout.granularity, layout.record_capacity, key_mask);
        let kept = key >= condition.min && key < condition.max;
        if kept {
            project(record, layout.granularity, layout.record_capacity, key_mask, output, &mut written)?;
            project(record, layout.granularity, layout.record_capacity, value_mask, output, &mut written)?;
        }
        if show_debug {
            trace!("select: record {i} key={key:#x} kept={kept}");
        }
    }
    Ok(())
}

/// TOTAL: zero the output, then for every live record and every item
/// position selected by `value_mask`, add its little-endian integer value
/// into the accumulator record at output position 0. Every other output
/// position stays zero.
pub(crate) fn total(layout: &Layout, value_mask: u64, input: &[u8], output: &mut [u8], count: usize) -> Result<(), Error> {
    output.fill(0);
    let granularity = layout.granularity;
    for p in 0..layout.record_capacity {
        if !crate::record::is_bit_set(value_mask, p, layout.record_capacity) {
            continue;
        }
        let acc = &mut output[p * granularity..(p + 1) * granularity];
        for i in 0..count {
            let record = layout.record(input, i);
            let item = &record[p * granularity..(p + 1) * granularity];
            add_le_bytes(acc, item);
        }
    }
    Ok(())
}

/// SORT's local phase: copy the input portion verbatim into the output
/// portion (sort happens on output storage in place, per the algorithm
/// dispatcher's contract), then run the in-portion quicksort. The
/// cross-worker neighbour exchange that follows is driven by
/// [`crate::worker`].
pub(crate) fn sort_local(layout: &Layout, key_mask: u64, input: &[u8], output: &mut [u8], count: usize) {
    output.copy_from_slice(input);
    sort_portion(layout, output, key_mask, count);
}

/// Adds `addend` into `acc` in place, both read as little-endian unsigned
/// integers of the same width (one item, up to 1024 bytes). A per-byte
/// ripple carry keeps this exact at any granularity, unlike widening into a
/// fixed machine integer; the carry out of the top byte is dropped, giving
/// wrapping arithmetic modulo 2^(granularity×8) as P5 requires.
fn add_le_bytes(acc: &mut [u8], addend: &[u8]) {
    debug_assert_eq!(acc.len(), addend.len());
    let mut carry = 0u16;
    for (a, b) in acc.iter_mut().zip(addend) {
        let sum = *a as u16 + *b as u16 + carry;
        *a = sum as u8;
        carry = sum >> 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Layout;

    fn layout4() -> Layout {
        Layout { granularity: 1, record_capacity: 4, portion_capacity: 4 }
    }

    #[test]
    fn key_value_projects_key_then_value() {
        let layout = layout4();
        let input = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut output = [0u8; 16];
        key_value(&layout, 0b1100, 0b0011, &input, &mut output, 2, false).unwrap();
        assert_eq!(&output[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&output[8..], &[0u8; 8]);
    }

    #[test]
    fn select_keeps_only_records_in_range() {
        let layout = layout4();
        let input = [0u8, 0, 0, 1, 0, 0, 0, 5, 0, 0, 0, 9];
        let mut output = [0u8; 16];
        let condition = ConditionDescriptor { min: 3, max: 8 };
        select(&layout, 0b0001, 0b1110, condition, &input, &mut output, 3, false).unwrap();
        assert_eq!(&output[..4], &[5, 0, 0, 0]);
        assert_eq!(&output[4..], &[0u8; 12]);
    }

    #[test]
    fn total_sums_selected_items_into_record_zero() {
        let layout = layout4();
        let input = [1u8, 2, 3, 4, 10, 20, 30, 40, 100, 100, 100, 100];
        let mut output = [0u8; 16];
        total(&layout, 0b1111, &input, &mut output, 3).unwrap();
        assert_eq!(&output[..4], &[111, 122, 133, 144]);
        assert_eq!(&output[4..], &[0u8; 12]);
    }

    #[test]
    fn total_with_empty_value_mask_mutates_nothing() {
        let layout = layout4();
        let input = [9u8; 16];
        let mut output = [1u8; 16];
        total(&layout, 0, &input, &mut output, 4).unwrap();
        assert_eq!(output, [0u8; 16]);
    }

    #[test]
    fn total_propagates_carry_across_a_wide_item() {
        // One 4-byte little-endian item per record: 0x0000FFFF, 0x0000FFFF,
        // 0x00000003. Their sum, 0x00020001, needs a carry out of byte 0
        // into byte 1 and another out of byte 1 into byte 2.
        let layout = Layout { granularity: 4, record_capacity: 1, portion_capacity: 3 };
        let input = [0xFFu8, 0xFF, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut output = [0u8; 4];
        total(&layout, 0b1, &input, &mut output, 3).unwrap();
        assert_eq!(output, [0x01, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn total_wraps_modulo_the_full_item_width_instead_of_truncating() {
        // granularity=32 is well beyond any fixed machine integer; the top
        // byte's carry-out must be dropped (wrapping), not lost partway
        // through the accumulator the way a 16-byte-wide accumulator would.
        let layout = Layout { granularity: 32, record_capacity: 1, portion_capacity: 2 };
        let mut record_a = [0u8; 32];
        record_a[31] = 0xFF; // highest-order byte
        let mut record_b = [0u8; 32];
        record_b[31] = 0x02;
        let input = [record_a, record_b].concat();
        let mut output = vec![0u8; 32];
        total(&layout, 0b1, &input, &mut output, 2).unwrap();
        // 0xFF + 0x02 = 0x101 in the top byte: wraps to 0x01, carry dropped.
        let mut expected = vec![0u8; 32];
        expected[31] = 0x01;
        assert_eq!(output, expected);
    }

    #[test]
    fn sort_local_copies_then_sorts_output_in_place() {
        let layout = Layout { granularity: 1, record_capacity: 2, portion_capacity: 3 };
        let input = [3u8, 0, 1, 0, 2, 0];
        let mut output = [9u8; 6];
        sort_local(&layout, 0b01, &input, &mut output, 3);
        let keys: Vec<u8> = (0..3).map(|i| output[i * 2]).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
