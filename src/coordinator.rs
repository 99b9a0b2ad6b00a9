//! Ingestion of one reading as a single unit of work.
//!
//! Order inside the transaction: identity gate, rain exchange, one append
//! per present metric, battery state. Any failure returns early and the
//! caller drops the transaction, so either all of a reading persists or none
//! of it does.

use log::trace;
use redb::WriteTransaction;
use serde::Serialize;

use crate::codec::{ScalarValue, Timestamp};
use crate::error::Result;
use crate::metadata::{IdentityCheck, MetadataStore};
use crate::rain::{self, Exchange};
use crate::reading::WeatherReading;
use crate::series::{Metric, Series};

/// What one ingested reading changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Key used for every append.
    pub timestamp: Timestamp,
    /// Outcome of the identity gate.
    pub identity: IdentityCheck,
    /// Rain exchange, if the reading carried a counter.
    pub rain: Option<Exchange>,
    /// Series that received a sample, in append order.
    pub appended: Vec<Metric>,
    /// Whether the battery state was replaced.
    pub battery_updated: bool,
}

/// Applies `reading` inside `txn`. Does not commit.
///
/// [`crate::Error::IdentityMismatch`] is raised before any series is
/// touched.
pub fn ingest(txn: &WriteTransaction, reading: &WeatherReading) -> Result<IngestReport> {
    let metadata = MetadataStore::new(txn);
    let identity = metadata.pin_or_verify_identity(&reading.device)?;
    let timestamp = reading.timestamp;
    let mut appended = Vec::new();

    let rain = match reading.rain_cumulative {
        Some(cumulative) => {
            let exchange = rain::exchange(txn, &reading.device, cumulative, |delta| {
                Series::open(txn, Metric::RainIncrement)?
                    .append(timestamp, ScalarValue::FixedPoint4(delta))
            })?;
            if exchange.has_delta() {
                appended.push(Metric::RainIncrement);
            }
            Some(exchange)
        }
        None => None,
    };

    for (metric, value) in reading.metrics() {
        Series::open(txn, metric)?.append(timestamp, value)?;
        appended.push(metric);
    }

    let battery_updated = !reading.battery.is_empty();
    if battery_updated {
        metadata.set_battery_blob(&reading.device, &reading.battery)?;
    }

    trace!(
        "staged reading from '{}' at {timestamp}: {} series",
        reading.device,
        appended.len()
    );
    Ok(IngestReport {
        timestamp,
        identity,
        rain,
        appended,
        battery_updated,
    })
}
