//! Cumulative-to-incremental rain exchange.
//!
//! The station reports a lifetime rain counter that grows monotonically and
//! occasionally resets to zero. The store keeps only the increments between
//! consecutive readings. [`exchange_policy`] decides the increment from the
//! previous and new counter values; [`exchange`] runs that decision as a
//! read-modify-write inside a write transaction.

use log::{debug, trace, warn};
use redb::WriteTransaction;
use serde::Serialize;

use crate::codec::FixedPoint4;
use crate::error::Result;
use crate::metadata::{DeviceId, MetadataStore};

/// How a new counter value relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExchangeOutcome {
    /// The counter grew; the delta is the difference.
    Accumulated,
    /// The counter went down but not to zero: treated as a reset followed by
    /// fresh accumulation, so the delta is the whole new value.
    Reset,
    /// No rain fell: the counter is unchanged or dropped to zero.
    Unchanged,
}

/// Result of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Exchange {
    /// Counter value stored before the exchange.
    pub previous: FixedPoint4,
    /// Counter value stored after the exchange.
    pub next: FixedPoint4,
    /// Rain fallen since the previous reading.
    pub delta: FixedPoint4,
    /// Which policy branch produced `delta`.
    pub outcome: ExchangeOutcome,
}

impl Exchange {
    /// Returns `true` if there is an increment to record.
    pub fn has_delta(&self) -> bool {
        !self.delta.is_zero()
    }
}

/// Pure exchange policy: `(old, new) -> (next state, delta)`.
///
/// The next state is always `new`. A decrease to a non-zero value is read
/// as a counter reset; this cannot be told apart from a late, out-of-order
/// reading.
pub fn exchange_policy(previous: FixedPoint4, new: FixedPoint4) -> Exchange {
    let (delta, outcome) = match new.checked_sub(previous) {
        Some(delta) if !delta.is_zero() => (delta, ExchangeOutcome::Accumulated),
        Some(_) => (FixedPoint4::ZERO, ExchangeOutcome::Unchanged),
        None if new.is_zero() => (FixedPoint4::ZERO, ExchangeOutcome::Unchanged),
        None => (new, ExchangeOutcome::Reset),
    };
    Exchange {
        previous,
        next: new,
        delta,
        outcome,
    }
}

/// Exchanges a newly observed cumulative counter for an increment.
///
/// Reads the stored counter for `device` (zero if absent), applies
/// [`exchange_policy`], stores the new counter and, if the delta is
/// non-zero, hands it to `apply_delta` within the same transaction.
///
/// If `apply_delta` fails the stored counter is put back to what it was
/// before this call and the error is returned. The caller must then drop
/// the transaction without committing; the next reading is compared against
/// the unswapped value either way. A failure to put the counter back is
/// logged, and the `apply_delta` error is still the one returned.
pub fn exchange<F>(
    txn: &WriteTransaction,
    device: &DeviceId,
    new: FixedPoint4,
    apply_delta: F,
) -> Result<Exchange>
where
    F: FnOnce(FixedPoint4) -> Result<()>,
{
    let metadata = MetadataStore::new(txn);
    let stored = metadata.last_cumulative(device)?;
    let exchange = exchange_policy(stored.unwrap_or(FixedPoint4::ZERO), new);
    trace!(
        "exchanging cumulative rain for '{device}': {} -> {} (delta {})",
        exchange.previous, exchange.next, exchange.delta
    );
    if exchange.outcome == ExchangeOutcome::Reset {
        debug!(
            "rain counter for '{device}' went from {} to {}; treating as a reset",
            exchange.previous, exchange.next
        );
    }

    metadata.set_last_cumulative(device, exchange.next)?;

    if exchange.has_delta()
        && let Err(err) = apply_delta(exchange.delta)
    {
        warn!("rain increment for '{device}' was not recorded: {err}");
        let restored = match stored {
            Some(previous) => metadata.set_last_cumulative(device, previous),
            None => metadata.clear_last_cumulative(device).map(|_| ()),
        };
        if let Err(restore_err) = restored {
            warn!("could not restore rain counter for '{device}': {restore_err}");
        }
        return Err(err);
    }
    Ok(exchange)
}
