/*
 * SPDX-FileCopyrightText: 2024 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! A parallel engine over fixed-layout record batches.
//!
//! A caller hands us two equally sized byte buffers, an input and an
//! output, together with a [`Config`] describing how they are carved
//! into records and records into items. The buffers are split into
//! `config.threads.count` equal portions and one worker thread is
//! spawned per portion; depending on `config.algorithm` each worker
//! independently projects, filters, aggregates or locally sorts its
//! portion, and in the SORT case workers additionally migrate records
//! across portion boundaries until the whole output is globally sorted.
//!
//! Opening, mapping or truncating the files that back these buffers is
//! the caller's job: this crate only ever sees `&[u8]` and `&mut [u8]`.
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(trivial_casts)]

mod algorithms;
mod config;
mod error;
mod mailbox;
mod record;
mod worker;

pub use config::{Algorithm, Config, ConditionDescriptor, ItemDescriptor, KeyDescriptor, PortionDescriptor, RecordDescriptor, ThreadsDescriptor, ValueDescriptor};
pub use error::Error;
pub use worker::{run, RunReport, WorkerOutcome};

/// Re-exports the pieces needed to build a [`Config`] and call [`run`].
pub mod prelude {
    pub use crate::{
        run, Algorithm, ConditionDescriptor, Config, Error, ItemDescriptor, KeyDescriptor, PortionDescriptor, RecordDescriptor, RunReport, ThreadsDescriptor, ValueDescriptor, WorkerOutcome,
    };
}
