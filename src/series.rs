//! Append-only series, one per physical metric.
//!
//! Each metric owns one table keyed by [`Timestamp`] whose values are the
//! codec's raw bytes. Appends must carry a timestamp strictly greater than
//! the newest key already stored; there is no update path.

use std::fmt;
use std::str::FromStr;

use log::{trace, warn};
use redb::{
    ReadOnlyTable, ReadTransaction, ReadableTable, ReadableTableMetadata, Table, TableDefinition,
    TableError, WriteTransaction,
};
use serde::{Deserialize, Serialize};

use crate::codec::{EncodingError, ScalarKind, ScalarValue, Timestamp};
use crate::error::{Error, Result};

/// Table layout shared by every series.
pub type SeriesDefinition = TableDefinition<'static, Timestamp, &'static [u8]>;

/// The logical store a table belongs to. All three live in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalStore {
    /// Device identity, cumulative counters and battery state.
    Metadata,
    /// Rain increments.
    Rain,
    /// Everything else the station reports.
    Weather,
}

impl LogicalStore {
    /// Table-name prefix of this store.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Metadata => "meta",
            Self::Rain => "rain",
            Self::Weather => "wx",
        }
    }
}

/// Every metric the store keeps a series for.
///
/// This is the declarative mapping from metric to table: name, scalar kind
/// and logical store are all derived from the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Metric {
    /// Wind direction in degrees, 0 = north, 90 = east.
    WindDirection,
    /// Wind speed in miles per hour.
    WindSpeed,
    /// Wind gust in miles per hour.
    WindGust,
    /// Outdoor temperature in degrees Fahrenheit.
    OutdoorTemperature,
    /// Outdoor relative humidity in percent.
    OutdoorHumidity,
    /// UV index.
    UvIndex,
    /// Solar radiation in watts per square meter.
    SolarRadiation,
    /// Indoor temperature in degrees Fahrenheit.
    IndoorTemperature,
    /// Indoor relative humidity in percent.
    IndoorHumidity,
    /// Barometric pressure in inches of mercury.
    Barometer,
    /// Rain fallen since the previous reading, in inches.
    RainIncrement,
}

impl Metric {
    /// All metrics, in table-creation order.
    pub const ALL: [Metric; 11] = [
        Metric::WindDirection,
        Metric::WindSpeed,
        Metric::WindGust,
        Metric::OutdoorTemperature,
        Metric::OutdoorHumidity,
        Metric::UvIndex,
        Metric::SolarRadiation,
        Metric::IndoorTemperature,
        Metric::IndoorHumidity,
        Metric::Barometer,
        Metric::RainIncrement,
    ];

    /// Stable metric name, also the table name without its store prefix.
    pub const fn name(self) -> &'static str {
        match self {
            Self::WindDirection => "winddir_deg",
            Self::WindSpeed => "windspeed_mph",
            Self::WindGust => "windgust_mph",
            Self::OutdoorTemperature => "temp_outdoor_f",
            Self::OutdoorHumidity => "humidity_outdoor",
            Self::UvIndex => "uv_index",
            Self::SolarRadiation => "solarrad",
            Self::IndoorTemperature => "temp_indoor_f",
            Self::IndoorHumidity => "humidity_indoor",
            Self::Barometer => "baro_indoor_inhg",
            Self::RainIncrement => "rain_increment_inches",
        }
    }

    /// Full table name including the logical-store prefix.
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::WindDirection => "wx/winddir_deg",
            Self::WindSpeed => "wx/windspeed_mph",
            Self::WindGust => "wx/windgust_mph",
            Self::OutdoorTemperature => "wx/temp_outdoor_f",
            Self::OutdoorHumidity => "wx/humidity_outdoor",
            Self::UvIndex => "wx/uv_index",
            Self::SolarRadiation => "wx/solarrad",
            Self::IndoorTemperature => "wx/temp_indoor_f",
            Self::IndoorHumidity => "wx/humidity_indoor",
            Self::Barometer => "wx/baro_indoor_inhg",
            Self::RainIncrement => "rain/rain_increment_inches",
        }
    }

    /// Scalar kind the series stores.
    pub const fn kind(self) -> ScalarKind {
        match self {
            Self::UvIndex => ScalarKind::Byte,
            Self::RainIncrement => ScalarKind::FixedPoint4,
            _ => ScalarKind::Double,
        }
    }

    /// Logical store the series belongs to.
    pub const fn store(self) -> LogicalStore {
        match self {
            Self::RainIncrement => LogicalStore::Rain,
            _ => LogicalStore::Weather,
        }
    }

    /// Table definition for this metric's series.
    pub const fn definition(self) -> SeriesDefinition {
        TableDefinition::new(self.table_name())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a string names no metric.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric '{0}'")]
pub struct UnknownMetric(pub String);

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.name().to_string()
    }
}

impl TryFrom<String> for Metric {
    type Error = UnknownMetric;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.name() == s || metric.table_name() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// A series opened for writing inside a write transaction.
pub struct Series<'txn> {
    metric: Metric,
    table: Table<'txn, Timestamp, &'static [u8]>,
}

impl<'txn> Series<'txn> {
    /// Opens (creating if needed) the series for `metric`.
    pub fn open(txn: &'txn WriteTransaction, metric: Metric) -> Result<Self> {
        let table = txn.open_table(metric.definition())?;
        Ok(Self { metric, table })
    }

    /// The metric this series stores.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Appends one sample.
    ///
    /// Fails with [`Error::OutOfOrderWrite`] and writes nothing if
    /// `timestamp` is not strictly greater than the newest stored key.
    ///
    /// The engine has no append hint, so this is a `last()` lookup plus a
    /// regular B-tree insert: O(log n) in the series length.
    pub fn append(&mut self, timestamp: Timestamp, value: ScalarValue) -> Result<()> {
        let expected = self.metric.kind();
        if value.kind() != expected {
            return Err(Error::KindMismatch {
                metric: self.metric,
                expected,
                actual: value.kind(),
            });
        }
        if let Some(latest) = self.latest()?
            && timestamp <= latest
        {
            warn!(
                "rejecting {} write at {timestamp}: latest stored entry is {latest}",
                self.metric
            );
            return Err(Error::OutOfOrderWrite {
                metric: self.metric,
                timestamp,
                latest,
            });
        }
        trace!("appending {value} to {} at {timestamp}", self.metric);
        let bytes = value.encode();
        self.table.insert(timestamp, bytes.as_slice())?;
        Ok(())
    }

    /// Newest key in the series, if any.
    pub fn latest(&self) -> Result<Option<Timestamp>> {
        latest_key(&self.table)
    }

    /// Number of stored samples.
    pub fn len(&self) -> Result<u64> {
        Ok(self.table.len()?)
    }

    /// Returns `true` if the series holds no samples.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Ascending samples starting at the first key `>= from`.
    pub fn range_from(&self, from: Timestamp) -> Result<SeriesRange<'_>> {
        scan(&self.table, self.metric, Some(from))
    }

    /// Administrative clear: removes every sample. Returns how many were removed.
    pub fn clear(&mut self) -> Result<u64> {
        let removed = self.table.len()?;
        self.table.retain(|_, _| false)?;
        Ok(removed)
    }
}

/// A series opened inside a read transaction.
///
/// The view is a snapshot as of the transaction's start.
pub struct SeriesRead {
    metric: Metric,
    table: Option<ReadOnlyTable<Timestamp, &'static [u8]>>,
}

impl SeriesRead {
    /// Opens the series for `metric`. A series that was never created reads
    /// as empty.
    pub fn open(txn: &ReadTransaction, metric: Metric) -> Result<Self> {
        let table = match txn.open_table(metric.definition()) {
            Ok(table) => Some(table),
            Err(TableError::TableDoesNotExist(_)) => None,
            Err(err) => return Err(err.into()),
        };
        Ok(Self { metric, table })
    }

    /// The metric this series stores.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Ascending samples starting at the first key `>= from`.
    ///
    /// Every call returns a fresh, independent cursor. No matching key yields
    /// an empty iterator.
    pub fn range_from(&self, from: Timestamp) -> Result<SeriesRange<'_>> {
        match &self.table {
            Some(table) => scan(table, self.metric, Some(from)),
            None => Ok(SeriesRange::empty(self.metric)),
        }
    }

    /// Every sample in ascending order.
    pub fn list_all(&self) -> Result<SeriesRange<'_>> {
        match &self.table {
            Some(table) => scan(table, self.metric, None),
            None => Ok(SeriesRange::empty(self.metric)),
        }
    }

    /// Newest key in the series, if any.
    pub fn latest(&self) -> Result<Option<Timestamp>> {
        match &self.table {
            Some(table) => latest_key(table),
            None => Ok(None),
        }
    }

    /// Number of stored samples.
    pub fn len(&self) -> Result<u64> {
        match &self.table {
            Some(table) => Ok(table.len()?),
            None => Ok(0),
        }
    }

    /// Returns `true` if the series holds no samples.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn latest_key<T>(table: &T) -> Result<Option<Timestamp>>
where
    T: ReadableTable<Timestamp, &'static [u8]>,
{
    Ok(table.last()?.map(|(key, _)| key.value()))
}

fn scan<T>(table: &T, metric: Metric, from: Option<Timestamp>) -> Result<SeriesRange<'_>>
where
    T: ReadableTable<Timestamp, &'static [u8]>,
{
    let inner = match from {
        Some(from) => table.range(from..)?,
        None => table.iter()?,
    };
    Ok(SeriesRange {
        metric,
        inner: Some(inner),
    })
}

/// A key with its value as decoded, before decode errors are handled.
type RawSample = (Timestamp, std::result::Result<ScalarValue, EncodingError>);

/// Lazy ascending iterator over the samples of one series.
///
/// A sample whose stored bytes fail to decode yields an
/// [`Error::Encoding`] item; iteration can continue past it. See
/// [`SeriesRange::skip_malformed`] to drop such samples instead.
pub struct SeriesRange<'a> {
    metric: Metric,
    inner: Option<redb::Range<'a, Timestamp, &'static [u8]>>,
}

impl<'a> SeriesRange<'a> {
    fn empty(metric: Metric) -> Self {
        Self {
            metric,
            inner: None,
        }
    }

    /// The metric being iterated.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Drops samples whose stored bytes fail to decode, logging each one
    /// with its timestamp. Engine errors still end the scan.
    pub fn skip_malformed(self) -> SkipMalformed<'a> {
        SkipMalformed { inner: self }
    }

    fn next_entry(&mut self) -> Option<Result<RawSample>> {
        let kind = self.metric.kind();
        let entry = self.inner.as_mut()?.next()?;
        Some(
            entry
                .map_err(Error::from)
                .map(|(key, value)| (key.value(), ScalarValue::decode(kind, value.value()))),
        )
    }
}

impl Iterator for SeriesRange<'_> {
    type Item = Result<(Timestamp, ScalarValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.next_entry()?;
        Some(entry.and_then(|(timestamp, decoded)| Ok((timestamp, decoded?))))
    }
}

/// Iterator returned by [`SeriesRange::skip_malformed`].
pub struct SkipMalformed<'a> {
    inner: SeriesRange<'a>,
}

impl SkipMalformed<'_> {
    /// The metric being iterated.
    pub fn metric(&self) -> Metric {
        self.inner.metric
    }
}

impl Iterator for SkipMalformed<'_> {
    type Item = Result<(Timestamp, ScalarValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next_entry()? {
                Ok((timestamp, Ok(value))) => return Some(Ok((timestamp, value))),
                Ok((timestamp, Err(err))) => {
                    warn!(
                        "skipping malformed {} sample at {timestamp}: {err}",
                        self.inner.metric
                    );
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
