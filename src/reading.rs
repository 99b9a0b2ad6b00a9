//! The typed reading record handed to the store by the ingestion layer.

use serde::{Deserialize, Serialize};

use crate::codec::{FixedPoint4, ScalarValue, Timestamp};
use crate::metadata::{BatteryState, DeviceId};
use crate::series::Metric;

/// One reading from the station.
///
/// Every measurement is optional; absent fields are simply not appended for
/// this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// Identity the station presented.
    pub device: DeviceId,
    /// When the reading was taken. Used as the key in every series.
    pub timestamp: Timestamp,
    /// Wind direction in degrees.
    #[serde(default)]
    pub wind_direction: Option<f64>,
    /// Wind speed in miles per hour.
    #[serde(default)]
    pub wind_speed: Option<f64>,
    /// Wind gust in miles per hour.
    #[serde(default)]
    pub wind_gust: Option<f64>,
    /// Outdoor temperature in degrees Fahrenheit.
    #[serde(default)]
    pub outdoor_temperature: Option<f64>,
    /// Outdoor relative humidity in percent.
    #[serde(default)]
    pub outdoor_humidity: Option<f64>,
    /// UV index.
    #[serde(default)]
    pub uv_index: Option<u8>,
    /// Solar radiation in watts per square meter.
    #[serde(default)]
    pub solar_radiation: Option<f64>,
    /// Indoor temperature in degrees Fahrenheit.
    #[serde(default)]
    pub indoor_temperature: Option<f64>,
    /// Indoor relative humidity in percent.
    #[serde(default)]
    pub indoor_humidity: Option<f64>,
    /// Barometric pressure in inches of mercury.
    #[serde(default)]
    pub barometer: Option<f64>,
    /// Lifetime rain counter as reported by the station.
    #[serde(default)]
    pub rain_cumulative: Option<FixedPoint4>,
    /// Sub-sensor battery indicators.
    #[serde(default)]
    pub battery: BatteryState,
}

impl WeatherReading {
    /// A reading with no measurements.
    pub fn new(device: impl Into<DeviceId>, timestamp: Timestamp) -> Self {
        Self {
            device: device.into(),
            timestamp,
            wind_direction: None,
            wind_speed: None,
            wind_gust: None,
            outdoor_temperature: None,
            outdoor_humidity: None,
            uv_index: None,
            solar_radiation: None,
            indoor_temperature: None,
            indoor_humidity: None,
            barometer: None,
            rain_cumulative: None,
            battery: BatteryState::new(),
        }
    }

    /// The directly stored measurements that are present, paired with their
    /// series.
    ///
    /// The rain counter is not included: it is exchanged for an increment
    /// rather than stored as-is.
    pub fn metrics(&self) -> impl Iterator<Item = (Metric, ScalarValue)> + '_ {
        let doubles = [
            (Metric::WindDirection, self.wind_direction),
            (Metric::WindSpeed, self.wind_speed),
            (Metric::WindGust, self.wind_gust),
            (Metric::OutdoorTemperature, self.outdoor_temperature),
            (Metric::OutdoorHumidity, self.outdoor_humidity),
            (Metric::SolarRadiation, self.solar_radiation),
            (Metric::IndoorTemperature, self.indoor_temperature),
            (Metric::IndoorHumidity, self.indoor_humidity),
            (Metric::Barometer, self.barometer),
        ];
        doubles
            .into_iter()
            .filter_map(|(metric, value)| value.map(|v| (metric, ScalarValue::Double(v))))
            .chain(
                self.uv_index
                    .map(|uv| (Metric::UvIndex, ScalarValue::Byte(uv))),
            )
    }

    /// Returns `true` if the reading carries nothing to store.
    pub fn is_empty(&self) -> bool {
        self.metrics().next().is_none()
            && self.rain_cumulative.is_none()
            && self.battery.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_skips_absent_fields() {
        let mut reading = WeatherReading::new("station", Timestamp::from_secs(100));
        assert!(reading.is_empty());
        assert_eq!(reading.metrics().count(), 0);

        reading.outdoor_temperature = Some(76.8);
        reading.uv_index = Some(0);
        reading.rain_cumulative = Some("0.004".parse().unwrap());

        let metrics: Vec<_> = reading.metrics().collect();
        assert_eq!(
            metrics,
            vec![
                (Metric::OutdoorTemperature, ScalarValue::Double(76.8)),
                (Metric::UvIndex, ScalarValue::Byte(0)),
            ]
        );
        assert!(!reading.is_empty());
    }

    #[test]
    fn test_metric_values_match_series_kind() {
        let reading = WeatherReading {
            wind_direction: Some(204.0),
            wind_speed: Some(2.91),
            wind_gust: Some(5.14),
            outdoor_temperature: Some(76.8),
            outdoor_humidity: Some(81.0),
            uv_index: Some(9),
            solar_radiation: Some(1071.51),
            indoor_temperature: Some(85.1),
            indoor_humidity: Some(65.0),
            barometer: Some(29.264),
            ..WeatherReading::new("station", Timestamp::from_secs(100))
        };
        let metrics: Vec<_> = reading.metrics().collect();
        assert_eq!(metrics.len(), 10);
        for (metric, value) in metrics {
            assert_eq!(metric.kind(), value.kind(), "{metric}");
        }
    }

    #[test]
    fn test_reading_deserializes_with_defaults() {
        let json = r#"{"device":"A","timestamp":1751597757,"rain_cumulative":"0.004","battery":{"battout":"1"}}"#;
        let reading: WeatherReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.device, DeviceId::new("A"));
        assert_eq!(reading.rain_cumulative, Some(FixedPoint4::from_raw(40)));
        assert_eq!(reading.battery.get("battout"), Some("1"));
        assert!(reading.wind_speed.is_none());
    }
}
