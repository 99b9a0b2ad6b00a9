//! Per-device singletons: pinned identity, last cumulative rain value and
//! battery state.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use redb::{ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::codec::{EncodingError, FixedPoint4};
use crate::error::{Error, Result};

/// Singleton holding the pinned device identity under [`IDENTITY_KEY`].
pub(crate) const IDENTITY_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("meta/identity");
/// Last observed cumulative rain value per device, `FixedPoint4` encoded.
pub(crate) const CUMULATIVE_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("meta/last_cumulative_rain");
/// Battery state per device, JSON encoded.
pub(crate) const BATTERY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("meta/battery_state");

const IDENTITY_KEY: &str = "device";

/// Opaque identifier a station presents with every reading.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Battery indicators reported by the station's sub-sensors, replaced
/// wholesale on every reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatteryState(BTreeMap<String, String>);

impl BatteryState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one sub-sensor indicator.
    pub fn insert(&mut self, sensor: impl Into<String>, value: impl Into<String>) {
        self.0.insert(sensor.into(), value.into());
    }

    /// Looks up one sub-sensor indicator.
    pub fn get(&self, sensor: &str) -> Option<&str> {
        self.0.get(sensor).map(String::as_str)
    }

    /// Returns `true` if no indicators are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of indicators.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates indicators in sensor-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        serde_json::to_vec(&self.0).map_err(|err| EncodingError::MalformedBlob(err.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|err| EncodingError::MalformedBlob(err.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BatteryState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Outcome of an identity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IdentityCheck {
    /// No identity was pinned; the candidate is now the pinned identity.
    Pinned,
    /// The candidate matches the pinned identity.
    Verified,
}

/// Metadata access inside a write transaction.
///
/// Tables are opened per call, so this can be held alongside open
/// [`crate::series::Series`] handles in the same transaction.
#[derive(Clone, Copy)]
pub struct MetadataStore<'txn> {
    txn: &'txn WriteTransaction,
}

impl<'txn> MetadataStore<'txn> {
    /// Wraps a write transaction.
    pub fn new(txn: &'txn WriteTransaction) -> Self {
        Self { txn }
    }

    /// Trust-on-first-use identity gate.
    ///
    /// Pins `candidate` if nothing is pinned yet, accepts it if it matches
    /// the pinned identity and fails with [`Error::IdentityMismatch`]
    /// otherwise.
    pub fn pin_or_verify_identity(&self, candidate: &DeviceId) -> Result<IdentityCheck> {
        let mut table = self.txn.open_table(IDENTITY_TABLE)?;
        let pinned = table
            .get(IDENTITY_KEY)?
            .map(|guard| DeviceId::new(guard.value()));
        match pinned {
            Some(pinned) if &pinned == candidate => Ok(IdentityCheck::Verified),
            Some(pinned) => {
                warn!("rejecting reading from '{candidate}': store is pinned to '{pinned}'");
                Err(Error::IdentityMismatch {
                    pinned,
                    candidate: candidate.clone(),
                })
            }
            None => {
                table.insert(IDENTITY_KEY, candidate.as_str())?;
                debug!("pinned device identity '{candidate}'");
                Ok(IdentityCheck::Pinned)
            }
        }
    }

    /// The pinned identity, if any.
    pub fn pinned_identity(&self) -> Result<Option<DeviceId>> {
        let table = self.txn.open_table(IDENTITY_TABLE)?;
        read_identity(&table)
    }

    /// Last cumulative rain value stored for `device`, if any.
    pub fn last_cumulative(&self, device: &DeviceId) -> Result<Option<FixedPoint4>> {
        let table = self.txn.open_table(CUMULATIVE_TABLE)?;
        read_cumulative(&table, device)
    }

    /// Last cumulative rain value for `device`, `0` if none is stored.
    pub fn get_last_cumulative(&self, device: &DeviceId) -> Result<FixedPoint4> {
        Ok(self.last_cumulative(device)?.unwrap_or(FixedPoint4::ZERO))
    }

    /// Stores the cumulative rain value for `device`.
    pub fn set_last_cumulative(&self, device: &DeviceId, value: FixedPoint4) -> Result<()> {
        let mut table = self.txn.open_table(CUMULATIVE_TABLE)?;
        table.insert(device.as_str(), value.encode().as_slice())?;
        Ok(())
    }

    /// Removes the cumulative rain value for `device`. Returns whether one
    /// was stored.
    pub fn clear_last_cumulative(&self, device: &DeviceId) -> Result<bool> {
        let mut table = self.txn.open_table(CUMULATIVE_TABLE)?;
        Ok(table.remove(device.as_str())?.is_some())
    }

    /// Replaces the battery state for `device`.
    pub fn set_battery_blob(&self, device: &DeviceId, state: &BatteryState) -> Result<()> {
        let blob = state.encode()?;
        let mut table = self.txn.open_table(BATTERY_TABLE)?;
        table.insert(device.as_str(), blob.as_slice())?;
        Ok(())
    }

    /// Battery state stored for `device`, if any.
    pub fn battery_blob(&self, device: &DeviceId) -> Result<Option<BatteryState>> {
        let table = self.txn.open_table(BATTERY_TABLE)?;
        read_battery(&table, device)
    }
}

/// Metadata access inside a read transaction.
pub struct MetadataRead<'txn> {
    txn: &'txn ReadTransaction,
}

impl<'txn> MetadataRead<'txn> {
    /// Wraps a read transaction.
    pub fn new(txn: &'txn ReadTransaction) -> Self {
        Self { txn }
    }

    /// The pinned identity, if any.
    pub fn pinned_identity(&self) -> Result<Option<DeviceId>> {
        match self.txn.open_table(IDENTITY_TABLE) {
            Ok(table) => read_identity(&table),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Last cumulative rain value for `device`, `0` if none is stored.
    pub fn get_last_cumulative(&self, device: &DeviceId) -> Result<FixedPoint4> {
        match self.txn.open_table(CUMULATIVE_TABLE) {
            Ok(table) => Ok(read_cumulative(&table, device)?.unwrap_or(FixedPoint4::ZERO)),
            Err(TableError::TableDoesNotExist(_)) => Ok(FixedPoint4::ZERO),
            Err(err) => Err(err.into()),
        }
    }

    /// Battery state stored for `device`, if any.
    pub fn battery_blob(&self, device: &DeviceId) -> Result<Option<BatteryState>> {
        match self.txn.open_table(BATTERY_TABLE) {
            Ok(table) => read_battery(&table, device),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn read_identity<T>(table: &T) -> Result<Option<DeviceId>>
where
    T: ReadableTable<&'static str, &'static str>,
{
    Ok(table
        .get(IDENTITY_KEY)?
        .map(|guard| DeviceId::new(guard.value())))
}

fn read_cumulative<T>(table: &T, device: &DeviceId) -> Result<Option<FixedPoint4>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(device.as_str())? {
        Some(guard) => Ok(Some(FixedPoint4::decode(guard.value())?)),
        None => Ok(None),
    }
}

fn read_battery<T>(table: &T, device: &DeviceId) -> Result<Option<BatteryState>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(device.as_str())? {
        Some(guard) => Ok(Some(BatteryState::decode(guard.value())?)),
        None => Ok(None),
    }
}
