//! Error types for the weatherboi store.

use thiserror::Error;

use crate::codec::{EncodingError, ScalarKind, Timestamp};
use crate::metadata::DeviceId;
use crate::series::Metric;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The main error type for all store operations.
///
/// Any of these aborts the enclosing write transaction; nothing is retried
/// inside the store.
#[derive(Debug, Error)]
pub enum Error {
    /// An append whose timestamp is not after the newest entry of the series.
    ///
    /// The reading should be discarded or logged; retrying with the same
    /// timestamp fails the same way.
    #[error("{metric}: timestamp {timestamp} is not after the latest stored timestamp {latest}")]
    OutOfOrderWrite {
        /// Series the append targeted.
        metric: Metric,
        /// Rejected timestamp.
        timestamp: Timestamp,
        /// Current maximum key of the series.
        latest: Timestamp,
    },

    /// A reading claimed a device other than the one the store is pinned to.
    ///
    /// Raised before any series is touched.
    #[error("device identity mismatch: store is pinned to '{pinned}', reading claims '{candidate}'")]
    IdentityMismatch {
        /// The identity pinned on first contact.
        pinned: DeviceId,
        /// The identity the rejected reading presented.
        candidate: DeviceId,
    },

    /// A value of the wrong scalar kind was offered to a series.
    #[error("{metric} stores {expected} values, got {actual}")]
    KindMismatch {
        /// Series the value was meant for.
        metric: Metric,
        /// Kind the series stores.
        expected: ScalarKind,
        /// Kind that was offered.
        actual: ScalarKind,
    },

    /// Stored bytes could not be decoded, or a value could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The storage engine failed; the transaction did not commit.
    #[error("transaction failure: {0}")]
    Transaction(#[from] redb::Error),

    /// The store directory could not be prepared.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this is an ordering rejection.
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, Self::OutOfOrderWrite { .. })
    }

    /// Returns `true` if this is an authorization rejection.
    pub fn is_identity_mismatch(&self) -> bool {
        matches!(self, Self::IdentityMismatch { .. })
    }
}

macro_rules! engine_error {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Self::Transaction(err.into())
                }
            }
        )+
    };
}

engine_error!(
    redb::DatabaseError,
    redb::StorageError,
    redb::TableError,
    redb::TransactionError,
    redb::CommitError,
);
