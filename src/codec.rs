//! Fixed-width binary encodings for keys and scalar values.
//!
//! Every encoding in this module is order preserving: comparing two encoded
//! values byte by byte gives the same answer as comparing the numbers they
//! represent. The storage engine compares keys as raw bytes, so series keys
//! rely on this directly.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Key, TypeName, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded width of a [`Timestamp`].
pub const TIMESTAMP_WIDTH: usize = 8;
/// Encoded width of a [`ScalarValue::Double`].
pub const DOUBLE_WIDTH: usize = 8;
/// Encoded width of a [`ScalarValue::Byte`].
pub const BYTE_WIDTH: usize = 1;
/// Encoded width of a [`FixedPoint4`].
pub const FIXED_POINT_WIDTH: usize = 4;

const SIGN_BIT: u64 = 1 << 63;

/// Error type for encoding/decoding operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Stored bytes do not have the width the type requires.
    #[error("expected {expected} bytes for {kind}, got {actual}")]
    InvalidLength {
        /// Name of the type being decoded.
        kind: &'static str,
        /// Width the type encodes to.
        expected: usize,
        /// Width that was found.
        actual: usize,
    },
    /// A value cannot be represented by the target type.
    #[error("{value} is out of range for {kind}")]
    OutOfRange {
        /// Name of the target type.
        kind: &'static str,
        /// Rendering of the rejected value.
        value: String,
    },
    /// Text that is not a decimal with at most four fractional digits.
    #[error("invalid decimal literal '{0}'")]
    InvalidDecimal(String),
    /// A serialized blob could not be decoded.
    #[error("malformed blob: {0}")]
    MalformedBlob(String),
}

fn fixed<const N: usize>(kind: &'static str, bytes: &[u8]) -> Result<[u8; N], EncodingError> {
    bytes.try_into().map_err(|_| EncodingError::InvalidLength {
        kind,
        expected: N,
        actual: bytes.len(),
    })
}

/// Seconds since the Unix epoch, UTC. The key type of every series.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The earliest representable timestamp.
    pub const EPOCH: Self = Self(0);

    /// Creates a timestamp from whole seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the number of seconds since the epoch.
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// The current wall-clock time, truncated to whole seconds.
    ///
    /// A clock set before 1970 reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| Self(elapsed.as_secs()))
            .unwrap_or(Self::EPOCH)
    }

    /// Subtracts a number of seconds, clamping at the epoch.
    #[must_use]
    pub const fn saturating_sub(self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    /// Big-endian encoding: byte order equals numeric order.
    pub const fn encode(self) -> [u8; TIMESTAMP_WIDTH] {
        self.0.to_be_bytes()
    }

    /// Decodes a timestamp produced by [`Timestamp::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        Ok(Self(u64::from_be_bytes(fixed("Timestamp", bytes)?)))
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Value for Timestamp {
    type SelfType<'a> = Timestamp;
    type AsBytes<'a> = [u8; TIMESTAMP_WIDTH];

    fn fixed_width() -> Option<usize> {
        Some(TIMESTAMP_WIDTH)
    }

    fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
    where
        Self: 'a,
    {
        assert_eq!(
            data.len(),
            TIMESTAMP_WIDTH,
            "Timestamp must be exactly 8 bytes"
        );
        let mut buf = [0u8; TIMESTAMP_WIDTH];
        buf.copy_from_slice(data);
        Timestamp(u64::from_be_bytes(buf))
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
    where
        Self: 'a + 'b,
    {
        value.encode()
    }

    fn type_name() -> TypeName {
        TypeName::new("weatherboi::Timestamp")
    }
}

impl Key for Timestamp {
    fn compare(data1: &[u8], data2: &[u8]) -> Ordering {
        data1.cmp(data2)
    }
}

/// Order-preserving encoding of an IEEE 754 double.
///
/// Positive values get their sign bit set, negative values have every bit
/// inverted. The result sorts as an unsigned big-endian integer in the same
/// order as the doubles (with `-0.0` just below `+0.0`). The mapping is a
/// bijection on 64-bit patterns, so any 8 bytes decode and re-encode
/// unchanged.
pub fn encode_double(value: f64) -> [u8; DOUBLE_WIDTH] {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_BIT == 0 {
        bits | SIGN_BIT
    } else {
        !bits
    };
    ordered.to_be_bytes()
}

/// Inverse of [`encode_double`].
pub fn decode_double(bytes: &[u8]) -> Result<f64, EncodingError> {
    let ordered = u64::from_be_bytes(fixed("Double", bytes)?);
    let bits = if ordered & SIGN_BIT == 0 {
        !ordered
    } else {
        ordered & !SIGN_BIT
    };
    Ok(f64::from_bits(bits))
}

/// An exact decimal with four fractional digits, stored as ten-thousandths
/// in a `u32`.
///
/// Rain amounts are added and subtracted as integers so repeated arithmetic
/// never drifts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct FixedPoint4(u32);

impl FixedPoint4 {
    /// Number of units in `1.0000`.
    pub const SCALE: u32 = 10_000;
    /// `0.0000`
    pub const ZERO: Self = Self(0);
    /// The smallest positive step, `0.0001`.
    pub const EPSILON: Self = Self(1);
    /// The largest representable value, `429496.7295`.
    pub const MAX: Self = Self(u32::MAX);

    /// Creates a value from its count of ten-thousandths.
    pub const fn from_raw(units: u32) -> Self {
        Self(units)
    }

    /// Returns the count of ten-thousandths.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for `0.0000`.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Converts a float by rounding to the nearest ten-thousandth.
    ///
    /// Rejects NaN, infinities, negatives and anything above [`FixedPoint4::MAX`].
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(value: f64) -> Result<Self, EncodingError> {
        let scaled = (value * f64::from(Self::SCALE)).round();
        if !scaled.is_finite() || scaled < 0.0 || scaled > f64::from(u32::MAX) {
            return Err(EncodingError::OutOfRange {
                kind: "FixedPoint4",
                value: value.to_string(),
            });
        }
        Ok(Self(scaled as u32))
    }

    /// Lossy conversion for display and rate arithmetic.
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }

    /// Exact addition; `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    /// Exact subtraction; `None` if `rhs > self`.
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    /// Exact addition clamped at [`FixedPoint4::MAX`].
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Unsigned 32-bit big-endian encoding of the unit count.
    pub const fn encode(self) -> [u8; FIXED_POINT_WIDTH] {
        self.0.to_be_bytes()
    }

    /// Decodes a value produced by [`FixedPoint4::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        Ok(Self(u32::from_be_bytes(fixed("FixedPoint4", bytes)?)))
    }
}

impl fmt::Display for FixedPoint4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

impl FromStr for FixedPoint4 {
    type Err = EncodingError;

    /// Parses text such as `"2"`, `"0.004"` or `"1.2345"` without going
    /// through a float.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EncodingError::InvalidDecimal(s.to_string());
        let trimmed = s.trim();
        let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 4 || !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().map_err(|_| invalid())?
        };
        let mut frac_units = 0u64;
        for (i, digit) in frac.bytes().enumerate() {
            let place = 10u64.pow(3 - u32::try_from(i).map_err(|_| invalid())?);
            frac_units += u64::from(digit - b'0') * place;
        }
        let units = whole_units
            .checked_mul(u64::from(Self::SCALE))
            .and_then(|units| units.checked_add(frac_units))
            .ok_or_else(invalid)?;
        u32::try_from(units)
            .map(Self)
            .map_err(|_| EncodingError::OutOfRange {
                kind: "FixedPoint4",
                value: s.to_string(),
            })
    }
}

impl From<FixedPoint4> for String {
    fn from(value: FixedPoint4) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for FixedPoint4 {
    type Error = EncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The storage type of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// IEEE 754 double.
    Double,
    /// Single unsigned byte.
    Byte,
    /// Four-digit fixed-point decimal.
    FixedPoint4,
}

impl ScalarKind {
    /// Encoded width of values of this kind.
    pub const fn width(self) -> usize {
        match self {
            Self::Double => DOUBLE_WIDTH,
            Self::Byte => BYTE_WIDTH,
            Self::FixedPoint4 => FIXED_POINT_WIDTH,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Double => "Double",
            Self::Byte => "Byte",
            Self::FixedPoint4 => "FixedPoint4",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// IEEE 754 double.
    Double(f64),
    /// Single unsigned byte.
    Byte(u8),
    /// Four-digit fixed-point decimal.
    FixedPoint4(FixedPoint4),
}

impl ScalarValue {
    /// The kind this value encodes as.
    pub const fn kind(&self) -> ScalarKind {
        match self {
            Self::Double(_) => ScalarKind::Double,
            Self::Byte(_) => ScalarKind::Byte,
            Self::FixedPoint4(_) => ScalarKind::FixedPoint4,
        }
    }

    /// Encodes to exactly `self.kind().width()` bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Double(value) => encode_double(*value).to_vec(),
            Self::Byte(value) => vec![*value],
            Self::FixedPoint4(value) => value.encode().to_vec(),
        }
    }

    /// Decodes bytes stored for a series of the given kind.
    ///
    /// Fails only when `bytes` is not exactly `kind.width()` long.
    pub fn decode(kind: ScalarKind, bytes: &[u8]) -> Result<Self, EncodingError> {
        match kind {
            ScalarKind::Double => decode_double(bytes).map(Self::Double),
            ScalarKind::Byte => {
                let [byte] = fixed::<BYTE_WIDTH>("Byte", bytes)?;
                Ok(Self::Byte(byte))
            }
            ScalarKind::FixedPoint4 => FixedPoint4::decode(bytes).map(Self::FixedPoint4),
        }
    }

    /// Returns the fixed-point payload, if this is one.
    pub const fn as_fixed_point(&self) -> Option<FixedPoint4> {
        match self {
            Self::FixedPoint4(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<u8> for ScalarValue {
    fn from(value: u8) -> Self {
        Self::Byte(value)
    }
}

impl From<FixedPoint4> for ScalarValue {
    fn from(value: FixedPoint4) -> Self {
        Self::FixedPoint4(value)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double(value) => write!(f, "{value}"),
            Self::Byte(value) => write!(f, "{value}"),
            Self::FixedPoint4(value) => write!(f, "{value}"),
        }
    }
}
