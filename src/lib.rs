//! # weatherboi
//!
//! Durable, ordered storage for the readings of an on-premises weather
//! station.
//!
//! Each physical metric is kept as its own append-only series keyed by
//! timestamp. The station's lifetime rain counter is converted into discrete
//! increments on the way in, so rain totals over any trailing window are a
//! short forward scan.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weatherboi::{Metric, Timestamp, WeatherReading, WeatherStore};
//!
//! # fn main() -> Result<(), weatherboi::Error> {
//! let store = WeatherStore::open("/var/lib/weatherboi")?;
//!
//! let mut reading = WeatherReading::new("AMBWeatherPro_V5.2.2", Timestamp::now());
//! reading.outdoor_temperature = Some(76.8);
//! reading.rain_cumulative = Some("0.004".parse()?);
//! store.ingest(&reading)?;
//!
//! let last_hour = store.rain_per_window(Timestamp::now(), 3_600)?;
//! println!("rain in the last hour: {last_hour} in");
//! for (timestamp, value) in store.list_all(Metric::OutdoorTemperature)? {
//!     println!("{timestamp}: {value}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Keys in a series are strictly increasing; an append at or before the
//!   newest key fails with [`Error::OutOfOrderWrite`].
//! - One reading is one write transaction: identity check, rain exchange and
//!   every append commit together or not at all.
//! - The first device seen is pinned; readings from any other device fail
//!   with [`Error::IdentityMismatch`] before anything is written.
//! - Rain amounts are [`FixedPoint4`] integers, so sums are exact.

#![deny(missing_docs)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metadata;
pub mod rain;
pub mod reading;
pub mod series;
pub mod store;
pub mod window;

pub use codec::{EncodingError, FixedPoint4, ScalarKind, ScalarValue, Timestamp};
pub use config::StoreBuilder;
pub use coordinator::IngestReport;
pub use error::{Error, Result};
pub use metadata::{BatteryState, DeviceId, IdentityCheck, MetadataRead, MetadataStore};
pub use rain::{Exchange, ExchangeOutcome, exchange_policy};
pub use reading::WeatherReading;
pub use series::{
    LogicalStore, Metric, Series, SeriesRange, SeriesRead, SkipMalformed, UnknownMetric,
};
pub use store::{RainClear, WeatherStore};
pub use window::{RainEntry, RainRate};
