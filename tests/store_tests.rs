use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use weatherboi::rain;
use weatherboi::{
    DeviceId, FixedPoint4, Metric, ScalarValue, Series, SeriesRead, StoreBuilder, Timestamp,
    WeatherReading, WeatherStore,
};

fn create_tempdir() -> tempfile::TempDir {
    tempfile::TempDir::new().unwrap()
}

fn fp(s: &str) -> FixedPoint4 {
    s.parse().unwrap()
}

#[test]
fn test_reopen_persists_everything() {
    let tmpdir = create_tempdir();
    let device = DeviceId::new("A");
    {
        let store = WeatherStore::open(tmpdir.path()).unwrap();
        let mut reading = WeatherReading::new("A", Timestamp::from_secs(10));
        reading.wind_speed = Some(2.5);
        reading.rain_cumulative = Some(fp("0.75"));
        reading.battery.insert("battout", "1");
        store.ingest(&reading).unwrap();
        store.close();
    }

    let store = WeatherStore::open(tmpdir.path()).unwrap();
    assert_eq!(store.pinned_identity().unwrap(), Some(device.clone()));
    assert_eq!(store.last_cumulative(&device).unwrap(), fp("0.75"));
    assert_eq!(
        store.list_all(Metric::WindSpeed).unwrap(),
        vec![(Timestamp::from_secs(10), ScalarValue::Double(2.5))]
    );
    assert_eq!(
        store.battery_state(&device).unwrap().unwrap().get("battout"),
        Some("1")
    );

    // Ordering is enforced against persisted keys too.
    let err = store
        .append(
            Metric::WindSpeed,
            Timestamp::from_secs(10),
            ScalarValue::Double(3.0),
        )
        .unwrap_err();
    assert!(err.is_out_of_order());
}

#[test]
fn test_builder_file_name() {
    let tmpdir = create_tempdir();
    let store = StoreBuilder::new()
        .cache_size(8 * 1024 * 1024)
        .file_name("backyard.redb")
        .open(tmpdir.path())
        .unwrap();
    assert_eq!(store.path(), tmpdir.path().join("backyard.redb"));
    store
        .append(
            Metric::IndoorTemperature,
            Timestamp::from_secs(1),
            ScalarValue::Double(70.0),
        )
        .unwrap();
    store.close();

    // A store under another file name in the same directory is separate.
    let other = WeatherStore::open(tmpdir.path()).unwrap();
    assert_eq!(other.series_len(Metric::IndoorTemperature).unwrap(), 0);
}

#[test]
fn test_readers_see_a_snapshot() {
    let tmpdir = create_tempdir();
    let store = WeatherStore::open(tmpdir.path()).unwrap();
    let metric = Metric::OutdoorHumidity;
    store
        .append(metric, Timestamp::from_secs(1), ScalarValue::Double(50.0))
        .unwrap();

    let txn = store.begin_read().unwrap();
    let snapshot = SeriesRead::open(&txn, metric).unwrap();

    store
        .append(metric, Timestamp::from_secs(2), ScalarValue::Double(51.0))
        .unwrap();

    assert_eq!(snapshot.len().unwrap(), 1);
    assert_eq!(snapshot.latest().unwrap(), Some(Timestamp::from_secs(1)));
    assert_eq!(store.series_len(metric).unwrap(), 2);
}

#[test]
fn test_concurrent_writers() {
    let tmpdir = create_tempdir();
    let store = Arc::new(WeatherStore::open(tmpdir.path()).unwrap());
    let metrics = [
        Metric::WindDirection,
        Metric::WindSpeed,
        Metric::WindGust,
        Metric::OutdoorTemperature,
    ];
    let barrier = Arc::new(Barrier::new(metrics.len() + 1));

    let mut handles = Vec::new();
    for metric in metrics {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for secs in 1..=50 {
                store
                    .append(
                        metric,
                        Timestamp::from_secs(secs),
                        ScalarValue::Double(secs as f64),
                    )
                    .unwrap();
            }
        }));
    }

    let rain_store = Arc::clone(&store);
    let rain_barrier = Arc::clone(&barrier);
    let rain = thread::spawn(move || {
        let device = DeviceId::new("A");
        rain_barrier.wait();
        for secs in 1..=50u32 {
            rain_store
                .record_rain(
                    &device,
                    Timestamp::from_secs(u64::from(secs)),
                    FixedPoint4::from_raw(secs * 100),
                )
                .unwrap();
        }
    });

    for handle in handles {
        handle.join().unwrap();
    }
    rain.join().unwrap();

    for metric in metrics {
        assert_eq!(store.series_len(metric).unwrap(), 50);
    }
    let entries = store.rain_increments().unwrap();
    assert_eq!(entries.len(), 50);
    assert_eq!(entries.last().unwrap().running_total, fp("0.5"));
    assert_eq!(
        store.last_cumulative(&DeviceId::new("A")).unwrap(),
        fp("0.5")
    );
}

#[test]
fn test_concurrent_readers_during_ingest() {
    let tmpdir = create_tempdir();
    let store = Arc::new(WeatherStore::open(tmpdir.path()).unwrap());

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for secs in 1..=100 {
                let mut reading = WeatherReading::new("A", Timestamp::from_secs(secs));
                reading.barometer = Some(29.9);
                reading.solar_radiation = Some(400.0);
                store.ingest(&reading).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..20 {
                    let txn = store.begin_read().unwrap();
                    let barometer = SeriesRead::open(&txn, Metric::Barometer).unwrap();
                    let solar = SeriesRead::open(&txn, Metric::SolarRadiation).unwrap();
                    // Both series of a reading commit together.
                    assert_eq!(barometer.len().unwrap(), solar.len().unwrap());
                    let keys: Vec<_> = barometer
                        .list_all()
                        .unwrap()
                        .map(|entry| entry.unwrap().0)
                        .collect();
                    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.series_len(Metric::Barometer).unwrap(), 100);
}

#[test]
fn test_concurrent_exchanges_for_one_device() {
    const THREADS: usize = 4;
    const ROUNDS: u32 = 25;

    let tmpdir = create_tempdir();
    let store = Arc::new(WeatherStore::open(tmpdir.path()).unwrap());
    let ticket = Arc::new(AtomicU32::new(0));
    let committed = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let ticket = Arc::clone(&ticket);
            let committed = Arc::clone(&committed);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let device = DeviceId::new("A");
                barrier.wait();
                for _ in 0..ROUNDS {
                    let txn = store.begin_write().unwrap();
                    // Taken under the writer lock, so counters and keys grow in
                    // commit order.
                    let n = ticket.fetch_add(1, Ordering::SeqCst) + 1;
                    let timestamp = Timestamp::from_secs(u64::from(n));
                    let cumulative = FixedPoint4::from_raw(n * 10);
                    let exchange = rain::exchange(&txn, &device, cumulative, |delta| {
                        Series::open(&txn, Metric::RainIncrement)?
                            .append(timestamp, ScalarValue::FixedPoint4(delta))
                    })
                    .unwrap();
                    txn.commit().unwrap();
                    committed.lock().unwrap().push(exchange);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut exchanges = committed.lock().unwrap().clone();
    exchanges.sort_by_key(|exchange| exchange.next);
    assert_eq!(exchanges.len(), THREADS * ROUNDS as usize);

    let mut expected_previous = FixedPoint4::ZERO;
    for exchange in &exchanges {
        assert_eq!(exchange.previous, expected_previous);
        assert_eq!(exchange.delta, FixedPoint4::from_raw(10));
        expected_previous = exchange.next;
    }

    let device = DeviceId::new("A");
    let final_counter = store.last_cumulative(&device).unwrap();
    assert_eq!(final_counter, expected_previous);
    let entries = store.rain_increments().unwrap();
    assert_eq!(entries.len(), exchanges.len());
    assert_eq!(entries.last().unwrap().running_total, final_counter);
}
