/*
 * SPDX-FileCopyrightText: 2024 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::error::Error;

/// Granularities the hardware this protocol was modelled on accepts: a
/// power of two from one byte up to one kibibyte.
const VALID_GRANULARITIES: [usize; 11] = [1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024];

/// Size, in bytes, of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemDescriptor {
    pub granularity: usize,
}

/// Number of items packed into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub capacity: usize,
}

/// Layout of one portion of the input/output buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortionDescriptor {
    /// Maximum number of records a portion can physically hold.
    pub capacity: usize,
    /// Number of live records actually present in every portion.
    pub count: usize,
}

/// Number of worker threads and the byte size handed to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadsDescriptor {
    pub count: usize,
    pub portion_size: usize,
}

/// Bitmask selecting which items of a record make up its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub mask: u64,
}

/// Bitmask selecting which items of a record make up its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueDescriptor {
    pub mask: u64,
}

/// Half-open `[min, max)` key range accepted by the SELECT algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionDescriptor {
    pub min: u64,
    pub max: u64,
}

impl Default for ConditionDescriptor {
    fn default() -> Self {
        ConditionDescriptor { min: 0, max: u64::MAX }
    }
}

/// Which of the four batch operations to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    KeyValue,
    Sort,
    Select,
    Total,
}

/// Everything needed to interpret the input/output buffers and pick an
/// algorithm. Mirrors the parameters a caller would otherwise have had
/// to pass on a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub threads: ThreadsDescriptor,
    pub item: ItemDescriptor,
    pub record: RecordDescriptor,
    pub portion: PortionDescriptor,
    pub key: KeyDescriptor,
    pub value: ValueDescriptor,
    pub condition: ConditionDescriptor,
    pub algorithm: Algorithm,
    pub show_debug: bool,
}

impl Config {
    /// Runs every consistency check that the original tool performed as
    /// `-ERANGE`-returning preflight checks in `main()`, in the same
    /// order, before a single byte of the buffers is touched.
    pub fn validate(&self) -> Result<(), Error> {
        if !VALID_GRANULARITIES.contains(&self.item.granularity) {
            return Err(Error::config_invalid(format!(
                "item.granularity must be one of {VALID_GRANULARITIES:?}, got {}",
                self.item.granularity
            )));
        }

        if self.record.capacity == 0 || self.record.capacity > 64 {
            return Err(Error::config_invalid(format!(
                "record.capacity must be in 1..=64, got {}",
                self.record.capacity
            )));
        }

        if self.portion.capacity == 0 {
            return Err(Error::config_invalid("portion.capacity must be nonzero"));
        }

        if self.portion.count > self.portion.capacity {
            return Err(Error::config_invalid(format!(
                "portion.count ({}) exceeds portion.capacity ({})",
                self.portion.count, self.portion.capacity
            )));
        }

        if self.threads.count == 0 {
            return Err(Error::config_invalid("threads.count must be nonzero"));
        }

        // All three operands multiplied as u64 so a portion.capacity large
        // enough to overflow usize on a 32-bit target is caught as a clean
        // ConfigInvalid rather than wrapping silently or panicking on the
        // multiplication.
        let record_size = self.item.granularity as u64 * self.record.capacity as u64;
        let expected_portion_size = record_size * self.portion.capacity as u64;
        if self.threads.portion_size as u64 != expected_portion_size {
            return Err(Error::config_invalid(format!(
                "threads.portion_size ({}) does not equal item.granularity * record.capacity * portion.capacity ({})",
                self.threads.portion_size, expected_portion_size
            )));
        }

        match self.algorithm {
            Algorithm::Select => {
                if self.condition.min > self.condition.max {
                    return Err(Error::config_invalid(format!(
                        "condition.min ({}) must not exceed condition.max ({})",
                        self.condition.min, self.condition.max
                    )));
                }
            }
            Algorithm::Total | Algorithm::Sort => {}
        }

        Ok(())
    }

    /// Number of bytes in a single record: `item.granularity * record.capacity`.
    pub fn record_size(&self) -> usize {
        self.item.granularity * self.record.capacity
    }

    /// Number of bytes in a single portion: `record_size() * portion.capacity`.
    pub fn portion_size(&self) -> usize {
        self.record_size() * self.portion.capacity
    }
}
