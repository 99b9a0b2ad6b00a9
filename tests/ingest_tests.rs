use weatherboi::{
    BatteryState, DeviceId, Error, ExchangeOutcome, FixedPoint4, IdentityCheck, Metric,
    ScalarValue, Timestamp, WeatherReading, WeatherStore,
};

fn create_tempdir() -> tempfile::TempDir {
    tempfile::TempDir::new().unwrap()
}

fn fp(s: &str) -> FixedPoint4 {
    s.parse().unwrap()
}

fn full_reading(device: &str, secs: u64, rain: &str) -> WeatherReading {
    let mut reading = WeatherReading::new(device, Timestamp::from_secs(secs));
    reading.wind_direction = Some(225.0);
    reading.wind_speed = Some(3.4);
    reading.wind_gust = Some(8.1);
    reading.outdoor_temperature = Some(76.8);
    reading.outdoor_humidity = Some(63.0);
    reading.uv_index = Some(4);
    reading.solar_radiation = Some(612.4);
    reading.indoor_temperature = Some(71.2);
    reading.indoor_humidity = Some(45.0);
    reading.barometer = Some(29.92);
    reading.rain_cumulative = Some(fp(rain));
    reading.battery.insert("battout", "1");
    reading
}

#[test]
fn test_ingest_full_reading() {
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();

    let report = store.ingest(&full_reading("A", 1_000, "0.5")).unwrap();
    assert_eq!(report.identity, IdentityCheck::Pinned);
    assert_eq!(report.timestamp, Timestamp::from_secs(1_000));
    assert_eq!(report.appended.len(), Metric::ALL.len());
    assert!(report.battery_updated);
    let rain = report.rain.unwrap();
    assert_eq!(rain.delta, fp("0.5"));
    assert_eq!(rain.outcome, ExchangeOutcome::Accumulated);

    for metric in Metric::ALL {
        assert_eq!(store.series_len(metric).unwrap(), 1, "{metric}");
        assert_eq!(
            store.latest(metric).unwrap(),
            Some(Timestamp::from_secs(1_000))
        );
    }
    assert_eq!(
        store.list_all(Metric::UvIndex).unwrap(),
        vec![(Timestamp::from_secs(1_000), ScalarValue::Byte(4))]
    );

    let device = DeviceId::new("A");
    assert_eq!(store.pinned_identity().unwrap(), Some(device.clone()));
    assert_eq!(store.last_cumulative(&device).unwrap(), fp("0.5"));
    assert_eq!(
        store.battery_state(&device).unwrap().unwrap().get("battout"),
        Some("1")
    );

    let report = store.ingest(&full_reading("A", 1_060, "0.5")).unwrap();
    assert_eq!(report.identity, IdentityCheck::Verified);
    assert!(!report.rain.unwrap().has_delta());
    assert!(!report.appended.contains(&Metric::RainIncrement));
    assert_eq!(store.series_len(Metric::RainIncrement).unwrap(), 1);
    assert_eq!(store.series_len(Metric::WindSpeed).unwrap(), 2);
}

#[test]
fn test_identity_gate_rejects_other_device() {
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();

    store.ingest(&full_reading("A", 100, "1.0")).unwrap();
    let before: Vec<_> = Metric::ALL
        .iter()
        .map(|metric| store.list_all(*metric).unwrap())
        .collect();

    let err = store.ingest(&full_reading("B", 200, "5.0")).unwrap_err();
    match err {
        Error::IdentityMismatch { pinned, candidate } => {
            assert_eq!(pinned, DeviceId::new("A"));
            assert_eq!(candidate, DeviceId::new("B"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let after: Vec<_> = Metric::ALL
        .iter()
        .map(|metric| store.list_all(*metric).unwrap())
        .collect();
    assert_eq!(before, after);
    assert_eq!(store.pinned_identity().unwrap(), Some(DeviceId::new("A")));
    assert_eq!(store.last_cumulative(&DeviceId::new("A")).unwrap(), fp("1.0"));
    assert_eq!(
        store.last_cumulative(&DeviceId::new("B")).unwrap(),
        FixedPoint4::ZERO
    );
    assert!(store.battery_state(&DeviceId::new("B")).unwrap().is_none());
}

#[test]
fn test_absent_fields_are_skipped() {
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();

    let mut reading = WeatherReading::new("A", Timestamp::from_secs(50));
    reading.outdoor_temperature = Some(60.5);
    let report = store.ingest(&reading).unwrap();
    assert_eq!(report.appended, vec![Metric::OutdoorTemperature]);
    assert!(report.rain.is_none());
    assert!(!report.battery_updated);

    assert_eq!(store.series_len(Metric::OutdoorTemperature).unwrap(), 1);
    assert_eq!(store.series_len(Metric::WindSpeed).unwrap(), 0);
    assert_eq!(store.series_len(Metric::RainIncrement).unwrap(), 0);
    assert!(store.battery_state(&DeviceId::new("A")).unwrap().is_none());

    // A reading with no values still pins the identity.
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();
    let report = store
        .ingest(&WeatherReading::new("B", Timestamp::from_secs(1)))
        .unwrap();
    assert!(report.appended.is_empty());
    assert_eq!(store.pinned_identity().unwrap(), Some(DeviceId::new("B")));
}

#[test]
fn test_out_of_order_reading_is_all_or_nothing() {
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();

    store.ingest(&full_reading("A", 100, "1.0")).unwrap();
    // Push one series ahead of the others.
    store
        .append(
            Metric::Barometer,
            Timestamp::from_secs(500),
            ScalarValue::Double(30.01),
        )
        .unwrap();

    let err = store.ingest(&full_reading("A", 200, "1.5")).unwrap_err();
    assert!(err.is_out_of_order());

    // Nothing from the rejected reading is visible, including the rain counter.
    let device = DeviceId::new("A");
    assert_eq!(store.last_cumulative(&device).unwrap(), fp("1.0"));
    assert_eq!(store.series_len(Metric::RainIncrement).unwrap(), 1);
    assert_eq!(store.series_len(Metric::WindSpeed).unwrap(), 1);
    assert_eq!(
        store.latest(Metric::OutdoorTemperature).unwrap(),
        Some(Timestamp::from_secs(100))
    );

    let report = store.ingest(&full_reading("A", 600, "1.5")).unwrap();
    assert_eq!(report.rain.unwrap().delta, fp("0.5"));
}

#[test]
fn test_battery_state_is_replaced() {
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();
    let device = DeviceId::new("A");

    let mut reading = WeatherReading::new("A", Timestamp::from_secs(1));
    reading.battery.insert("battout", "1");
    reading.battery.insert("batt_co2", "0");
    store.ingest(&reading).unwrap();

    let mut reading = WeatherReading::new("A", Timestamp::from_secs(2));
    reading.battery.insert("battout", "0");
    store.ingest(&reading).unwrap();

    let state = store.battery_state(&device).unwrap().unwrap();
    let expected: BatteryState = [("battout", "0")].into_iter().collect();
    assert_eq!(state, expected);
    assert_eq!(state.get("batt_co2"), None);

    // An empty battery map leaves the stored state alone.
    store
        .ingest(&WeatherReading::new("A", Timestamp::from_secs(3)))
        .unwrap();
    assert_eq!(store.battery_state(&device).unwrap().unwrap(), expected);
}

#[test]
fn test_reading_from_json() {
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();

    let reading: WeatherReading = serde_json::from_str(
        r#"{
            "device": "AMBWeatherPro_V5.2.2",
            "timestamp": 1751597757,
            "outdoor_temperature": 81.3,
            "uv_index": 6,
            "rain_cumulative": "0.0040",
            "battery": {"battout": "1"}
        }"#,
    )
    .unwrap();
    let report = store.ingest(&reading).unwrap();
    assert_eq!(report.rain.unwrap().delta, fp("0.004"));
    assert_eq!(
        store.rain_increments().unwrap()[0].timestamp,
        Timestamp::from_secs(1_751_597_757)
    );
}
