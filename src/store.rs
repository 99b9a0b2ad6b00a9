//! The store handle: an explicitly opened database that every operation is
//! passed through.

use std::path::{Path, PathBuf};

use log::{debug, info};
use redb::{Database, ReadTransaction, WriteTransaction};
use serde::Serialize;

use crate::codec::{FixedPoint4, ScalarValue, Timestamp};
use crate::config::StoreBuilder;
use crate::coordinator::{self, IngestReport};
use crate::error::Result;
use crate::metadata::{
    BATTERY_TABLE, BatteryState, CUMULATIVE_TABLE, DeviceId, IDENTITY_TABLE, MetadataRead,
    MetadataStore,
};
use crate::rain::{self, Exchange};
use crate::reading::WeatherReading;
use crate::series::{Metric, Series, SeriesRead};
use crate::window::{self, RainEntry, RainRate};

/// What an administrative rain clear removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RainClear {
    /// Number of increments deleted from the rain series.
    pub increments_removed: u64,
    /// Whether a cumulative counter was stored for the device.
    pub counter_cleared: bool,
}

/// An open weather store.
///
/// All mutation goes through write transactions, of which the engine allows
/// one at a time; a second writer blocks until the first commits or aborts.
/// Readers see a snapshot as of their own start and never block the writer.
/// The handle is `Send + Sync` and meant to be shared by reference (or in an
/// `Arc`) between producers.
pub struct WeatherStore {
    db: Database,
    path: PathBuf,
}

impl WeatherStore {
    /// Opens or creates a store in `dir` with default settings.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        StoreBuilder::new().open(dir)
    }

    /// Returns a builder for custom settings.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub(crate) fn initialize(db: Database, path: PathBuf) -> Result<Self> {
        let txn = db.begin_write()?;
        for metric in Metric::ALL {
            txn.open_table(metric.definition())?;
        }
        txn.open_table(IDENTITY_TABLE)?;
        txn.open_table(CUMULATIVE_TABLE)?;
        txn.open_table(BATTERY_TABLE)?;
        txn.commit()?;
        debug!("weather store ready at {}", path.display());
        Ok(Self { db, path })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the store. Dropping the handle has the same effect.
    pub fn close(self) {
        debug!("closing weather store at {}", self.path.display());
        drop(self.db);
    }

    /// Begins a write transaction, blocking while another one is active.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Begins a snapshot read transaction.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Stores one reading atomically and commits.
    ///
    /// On any error nothing from the reading is persisted.
    pub fn ingest(&self, reading: &WeatherReading) -> Result<IngestReport> {
        let txn = self.begin_write()?;
        let report = coordinator::ingest(&txn, reading)?;
        txn.commit()?;
        debug!(
            "committed reading from '{}' at {} ({} series)",
            reading.device,
            report.timestamp,
            report.appended.len()
        );
        Ok(report)
    }

    /// Runs a rain exchange for `device` in its own write transaction.
    ///
    /// `apply_delta` receives the transaction and the non-zero increment.
    /// If it fails, the transaction is aborted and the stored counter is
    /// left as it was.
    pub fn exchange<F>(
        &self,
        device: &DeviceId,
        cumulative: FixedPoint4,
        apply_delta: F,
    ) -> Result<Exchange>
    where
        F: FnOnce(&WriteTransaction, FixedPoint4) -> Result<()>,
    {
        let txn = self.begin_write()?;
        let exchange =
            rain::exchange(&txn, device, cumulative, |delta| apply_delta(&txn, delta))?;
        txn.commit()?;
        Ok(exchange)
    }

    /// Records a manually entered cumulative rain reading.
    ///
    /// Goes through the same identity gate as ingested readings.
    pub fn record_rain(
        &self,
        device: &DeviceId,
        timestamp: Timestamp,
        cumulative: FixedPoint4,
    ) -> Result<Exchange> {
        let txn = self.begin_write()?;
        MetadataStore::new(&txn).pin_or_verify_identity(device)?;
        let exchange = rain::exchange(&txn, device, cumulative, |delta| {
            Series::open(&txn, Metric::RainIncrement)?
                .append(timestamp, ScalarValue::FixedPoint4(delta))
        })?;
        txn.commit()?;
        info!(
            "recorded cumulative rain {cumulative} for '{device}' at {timestamp} (increment {})",
            exchange.delta
        );
        Ok(exchange)
    }

    /// Appends a single sample in its own write transaction.
    pub fn append(&self, metric: Metric, timestamp: Timestamp, value: ScalarValue) -> Result<()> {
        let txn = self.begin_write()?;
        Series::open(&txn, metric)?.append(timestamp, value)?;
        txn.commit()?;
        Ok(())
    }

    /// Every sample of `metric` in ascending order.
    ///
    /// Samples whose stored bytes fail to decode are logged and skipped; the
    /// rest are returned.
    pub fn list_all(&self, metric: Metric) -> Result<Vec<(Timestamp, ScalarValue)>> {
        let txn = self.begin_read()?;
        let series = SeriesRead::open(&txn, metric)?;
        let samples = series
            .list_all()?
            .skip_malformed()
            .collect::<Result<Vec<_>>>()?;
        Ok(samples)
    }

    /// Samples of `metric` from the first key `>= from` onwards.
    ///
    /// Malformed samples are skipped as in [`WeatherStore::list_all`].
    pub fn range_from(
        &self,
        metric: Metric,
        from: Timestamp,
    ) -> Result<Vec<(Timestamp, ScalarValue)>> {
        let txn = self.begin_read()?;
        let series = SeriesRead::open(&txn, metric)?;
        let samples = series
            .range_from(from)?
            .skip_malformed()
            .collect::<Result<Vec<_>>>()?;
        Ok(samples)
    }

    /// Newest key of `metric`, if any.
    pub fn latest(&self, metric: Metric) -> Result<Option<Timestamp>> {
        let txn = self.begin_read()?;
        SeriesRead::open(&txn, metric)?.latest()
    }

    /// Number of samples stored for `metric`.
    pub fn series_len(&self, metric: Metric) -> Result<u64> {
        let txn = self.begin_read()?;
        SeriesRead::open(&txn, metric)?.len()
    }

    /// Every rain increment with its running total.
    ///
    /// Malformed increments are skipped and do not count towards the total.
    pub fn rain_increments(&self) -> Result<Vec<RainEntry>> {
        let txn = self.begin_read()?;
        let rain = SeriesRead::open(&txn, Metric::RainIncrement)?;
        let entries = window::running_totals(&rain)?.collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Rain fallen in `[as_of - window_secs, as_of]`.
    ///
    /// See [`window::rain_per_window`] for how malformed increments are
    /// handled.
    pub fn rain_per_window(&self, as_of: Timestamp, window_secs: u64) -> Result<FixedPoint4> {
        let txn = self.begin_read()?;
        let rain = SeriesRead::open(&txn, Metric::RainIncrement)?;
        window::rain_per_window(&rain, as_of, window_secs)
    }

    /// Rain total and hourly rate over `[as_of - window_secs, as_of]`.
    pub fn rain_rate(&self, as_of: Timestamp, window_secs: u64) -> Result<RainRate> {
        let txn = self.begin_read()?;
        let rain = SeriesRead::open(&txn, Metric::RainIncrement)?;
        window::rain_rate(&rain, as_of, window_secs)
    }

    /// Administrative clear of the rain series and `device`'s cumulative
    /// counter, in one transaction.
    pub fn clear_rain(&self, device: &DeviceId) -> Result<RainClear> {
        let txn = self.begin_write()?;
        let increments_removed = Series::open(&txn, Metric::RainIncrement)?.clear()?;
        let counter_cleared = MetadataStore::new(&txn).clear_last_cumulative(device)?;
        txn.commit()?;
        info!(
            "cleared {increments_removed} rain increments and the cumulative counter for '{device}'"
        );
        Ok(RainClear {
            increments_removed,
            counter_cleared,
        })
    }

    /// Administrative clear of one series. Returns how many samples were removed.
    pub fn clear_series(&self, metric: Metric) -> Result<u64> {
        let txn = self.begin_write()?;
        let removed = Series::open(&txn, metric)?.clear()?;
        txn.commit()?;
        info!("cleared {removed} samples from {metric}");
        Ok(removed)
    }

    /// The pinned device identity, if any reading has been accepted yet.
    pub fn pinned_identity(&self) -> Result<Option<DeviceId>> {
        let txn = self.begin_read()?;
        MetadataRead::new(&txn).pinned_identity()
    }

    /// Last cumulative rain value stored for `device`, `0` if none.
    pub fn last_cumulative(&self, device: &DeviceId) -> Result<FixedPoint4> {
        let txn = self.begin_read()?;
        MetadataRead::new(&txn).get_last_cumulative(device)
    }

    /// Battery state last reported by `device`.
    pub fn battery_state(&self, device: &DeviceId) -> Result<Option<BatteryState>> {
        let txn = self.begin_read()?;
        MetadataRead::new(&txn).battery_blob(device)
    }
}
