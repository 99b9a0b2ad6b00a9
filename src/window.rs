//! Trailing-window sums over the rain increment series.

use serde::Serialize;

use crate::codec::{EncodingError, FixedPoint4, ScalarKind, ScalarValue, Timestamp};
use crate::error::{Error, Result};
use crate::series::{Metric, SeriesRead, SkipMalformed};

/// One hour, the conventional rain-rate window.
pub const HOUR_SECS: u64 = 3_600;

/// Sum of the increments with timestamps in `[as_of - window_secs, as_of]`.
///
/// Seeks to the window start and scans forward, stopping at the first key
/// past `as_of`, so the cost is proportional to the entries inside the
/// window. An empty window sums to exactly zero.
///
/// An increment whose stored bytes fail to decode is logged and left out of
/// the sum; the other increments in the window still count. A sum above
/// [`FixedPoint4::MAX`] fails with [`EncodingError::OutOfRange`].
pub fn rain_per_window(
    rain: &SeriesRead,
    as_of: Timestamp,
    window_secs: u64,
) -> Result<FixedPoint4> {
    let start = as_of.saturating_sub(window_secs);
    let mut total = FixedPoint4::ZERO;
    for entry in rain.range_from(start)?.skip_malformed() {
        let (timestamp, value) = entry?;
        if timestamp > as_of {
            break;
        }
        total = checked_sum(total, increment(rain.metric(), value)?)?;
    }
    Ok(total)
}

/// Rain total over a trailing window, with its hourly normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RainRate {
    /// End of the window (inclusive).
    pub as_of: Timestamp,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Rain fallen inside the window.
    pub total: FixedPoint4,
    /// `total` scaled to inches per hour.
    pub per_hour: f64,
}

/// Computes a [`RainRate`] over `[as_of - window_secs, as_of]`.
#[allow(clippy::cast_precision_loss)]
pub fn rain_rate(rain: &SeriesRead, as_of: Timestamp, window_secs: u64) -> Result<RainRate> {
    let total = rain_per_window(rain, as_of, window_secs)?;
    let per_hour = if window_secs == 0 {
        0.0
    } else {
        total.to_f64() * (HOUR_SECS as f64) / (window_secs as f64)
    };
    Ok(RainRate {
        as_of,
        window_secs,
        total,
        per_hour,
    })
}

/// One stored increment together with the sum of all increments up to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RainEntry {
    /// When the increment was recorded.
    pub timestamp: Timestamp,
    /// Rain fallen since the previous reading.
    pub increment: FixedPoint4,
    /// Sum of this and every earlier increment.
    pub running_total: FixedPoint4,
}

/// Walks the whole rain series, yielding each increment with a running total.
///
/// Malformed increments are logged and skipped. A running total above
/// [`FixedPoint4::MAX`] yields an [`EncodingError::OutOfRange`] item.
pub fn running_totals(rain: &SeriesRead) -> Result<RunningTotals<'_>> {
    Ok(RunningTotals {
        inner: rain.list_all()?.skip_malformed(),
        total: FixedPoint4::ZERO,
    })
}

/// Iterator returned by [`running_totals`].
pub struct RunningTotals<'a> {
    inner: SkipMalformed<'a>,
    total: FixedPoint4,
}

impl Iterator for RunningTotals<'_> {
    type Item = Result<RainEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        let metric = self.inner.metric();
        Some(entry.and_then(|(timestamp, value)| {
            let increment = increment(metric, value)?;
            self.total = checked_sum(self.total, increment)?;
            Ok(RainEntry {
                timestamp,
                increment,
                running_total: self.total,
            })
        }))
    }
}

fn checked_sum(total: FixedPoint4, increment: FixedPoint4) -> Result<FixedPoint4> {
    total.checked_add(increment).ok_or_else(|| {
        Error::Encoding(EncodingError::OutOfRange {
            kind: "FixedPoint4",
            value: format!("{total} + {increment}"),
        })
    })
}

fn increment(metric: Metric, value: ScalarValue) -> Result<FixedPoint4> {
    value.as_fixed_point().ok_or(Error::KindMismatch {
        metric,
        expected: ScalarKind::FixedPoint4,
        actual: value.kind(),
    })
}
