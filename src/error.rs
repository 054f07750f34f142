/*
 * SPDX-FileCopyrightText: 2024 Inria
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use thiserror::Error as ThisError;

/// Everything that can go wrong running the engine.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A [`Config`](crate::Config) field, or the combination of several, is
    /// not acceptable.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid {
        /// Human-readable explanation of which check failed.
        reason: String,
    },

    /// A destination buffer (a projection, an aggregation slot, a portion)
    /// is too small for what was about to be written to it.
    #[error("out of space: {reason}")]
    OutOfSpace {
        /// Human-readable explanation of what didn't fit.
        reason: String,
    },

    /// An index or descriptor that should have been validated earlier in
    /// the pipeline turned out to be out of range. Reaching this variant
    /// means a caller bypassed [`Config::validate`](crate::Config::validate)
    /// or a module has a bug.
    #[error("out of range: {reason}")]
    OutOfRange {
        /// Human-readable explanation of the violated bound.
        reason: String,
    },

    /// A mailbox observed a state transition that the neighbour-exchange
    /// protocol does not allow (see the mailbox state machine).
    #[error("mailbox protocol violation: {reason}")]
    MailboxProtocol {
        /// Human-readable explanation of the unexpected transition.
        reason: String,
    },

    /// The requested algorithm, or a combination of algorithm and config,
    /// is not implemented.
    #[error("unsupported: {reason}")]
    Unsupported {
        /// Human-readable explanation of what isn't supported.
        reason: String,
    },
}

impl Error {
    pub(crate) fn config_invalid(reason: impl Into<String>) -> Self {
        Error::ConfigInvalid { reason: reason.into() }
    }

    pub(crate) fn out_of_space(reason: impl Into<String>) -> Self {
        Error::OutOfSpace { reason: reason.into() }
    }

    pub(crate) fn out_of_range(reason: impl Into<String>) -> Self {
        Error::OutOfRange { reason: reason.into() }
    }

    pub(crate) fn mailbox_protocol(reason: impl Into<String>) -> Self {
        Error::MailboxProtocol { reason: reason.into() }
    }
}
