//! Integration tests for scalar attribute synchronization.
//!
//! Drives `ScalarBinding` and the `SyncClient` polling loop against the
//! simulated registry: change detection, notification de-duplication,
//! write-then-read consistency and conversion readers/writers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regsync::attribute::convert;
use regsync::config::BridgeConfig;
use regsync::registry::{RemoteHandle, Value};
use regsync::sim::SimBackend;
use regsync::{ScalarBinding, SyncClient};

const KX_PATH: &str = "boards/raf5/signal_processing/position/Kx";

fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.attributes.period_ms = 20;
    config.attributes.idle_period_ms = 20;
    config
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn connected_handle(backend: &SimBackend) -> RemoteHandle {
    let mut handle = RemoteHandle::new(Arc::new(backend.clone()), "127.0.0.1");
    handle.connect().expect("sim registry should connect");
    handle
}

#[test]
fn read_stores_candidate_and_reports_change_once() {
    let backend = SimBackend::new();
    backend.set_value(KX_PATH, Value::ULong(10_000_000));
    let handle = connected_handle(&backend);

    let binding = ScalarBinding::<u32>::new(KX_PATH).seed(10_000_000);

    // Mirror already matches the remote value: no change.
    assert!(!binding.read(&handle).unwrap());
    assert_eq!(binding.get(), 10_000_000);

    // Remote side moves; exactly one change is reported, then quiet again.
    backend.set_value(KX_PATH, Value::ULong(9_000_000));
    assert!(binding.read(&handle).unwrap());
    assert_eq!(binding.get(), 9_000_000);
    assert!(!binding.read(&handle).unwrap());
}

#[test]
fn write_then_read_is_consistent() {
    let backend = SimBackend::new();
    backend.set_value("dsp/threshold", Value::Long(5));
    let handle = connected_handle(&backend);

    let binding = ScalarBinding::<i32>::new("dsp/threshold");
    binding.write(&handle, &123).unwrap();

    assert_eq!(backend.value("dsp/threshold"), Some(Value::Long(123)));
    assert_eq!(binding.get(), 123);
    // The mirror already holds what the remote store returns.
    assert!(!binding.read(&handle).unwrap());
}

#[test]
fn empty_path_binding_never_touches_the_registry() {
    let backend = SimBackend::new();
    let handle = connected_handle(&backend);

    let binding = ScalarBinding::<f64>::local().seed(2.5);
    assert!(!binding.read(&handle).unwrap());
    binding.write(&handle, &9.0).unwrap();
    // Write is a no-op without a backing store.
    assert_eq!(binding.get(), 2.5);
}

#[test]
fn scaled_conversion_round_trips_engineering_units() {
    let backend = SimBackend::new();
    backend.set_value("position/offset_x", Value::Long(1_500_000));
    let handle = connected_handle(&backend);

    // Raw nanometres exposed as millimetres.
    let (reader, writer) = convert::scaled_i32(1e6);
    let binding = ScalarBinding::<f64>::with_access("position/offset_x", reader, writer);

    assert!(binding.read(&handle).unwrap());
    assert_eq!(binding.get(), 1.5);

    binding.write(&handle, &-0.25).unwrap();
    assert_eq!(backend.value("position/offset_x"), Some(Value::Long(-250_000)));
}

#[test]
fn mode_pair_composite_reads_two_nodes() {
    let backend = SimBackend::new();
    backend.set_value("dsc/switching/adjust", Value::Bool(false));
    backend.set_value("dsc/switching/type", Value::LongLong(0));
    let handle = connected_handle(&backend);

    let (reader, writer) = convert::mode_pair();
    let binding = ScalarBinding::<i16>::with_access("dsc/switching", reader, writer);

    assert!(!binding.read(&handle).unwrap()); // mirror default 0 == decoded 0

    binding.write(&handle, &1).unwrap();
    assert_eq!(backend.value("dsc/switching/adjust"), Some(Value::Bool(true)));
    assert_eq!(backend.value("dsc/switching/type"), Some(Value::LongLong(1)));

    binding.write(&handle, &2).unwrap();
    assert_eq!(backend.value("dsc/switching/type"), Some(Value::LongLong(0)));
    assert!(!binding.read(&handle).unwrap()); // decode(adjust=true, type=0) == 2
}

#[test]
fn polling_loop_notifies_on_remote_change() {
    let backend = SimBackend::new();
    backend.set_value(KX_PATH, Value::ULong(10_000_000));

    let client = SyncClient::new(Arc::new(backend.clone()), &fast_config());
    let kx = client.add_scalar(ScalarBinding::<u32>::new(KX_PATH).seed(10_000_000));

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    client.set_notifier(kx, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.connect().unwrap();
    assert!(client.is_connected());

    // Several polling passes with an unchanged remote value: no callback.
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(notifications.load(Ordering::SeqCst), 0);

    backend.set_value(KX_PATH, Value::ULong(9_000_000));
    assert!(wait_until(
        || notifications.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5)
    ));
    assert_eq!(client.value(kx).unwrap(), 9_000_000);

    // And it stays at exactly one while the value stays put.
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_read_latches_error_and_flags_disconnect() {
    let backend = SimBackend::new();
    backend.set_value("present/value", Value::Long(1));

    let client = SyncClient::new(Arc::new(backend.clone()), &fast_config());
    let _ok = client.add_scalar(ScalarBinding::<i32>::new("present/value"));
    // Registered but missing on the remote side: the pass aborts on it.
    let _missing = client.add_scalar(ScalarBinding::<i32>::new("present/not_there"));

    client.connect().unwrap();
    assert!(wait_until(|| !client.is_connected(), Duration::from_secs(5)));
    assert!(client.has_error());
    let record = client.take_error().unwrap();
    assert!(record.message.contains("not_there"));

    // The loop keeps running; a reconnect resumes polling.
    backend.set_value("present/not_there", Value::Long(7));
    client.connect().unwrap();
    assert!(wait_until(|| client.is_connected(), Duration::from_secs(5)));
}

#[test]
fn write_failure_is_latched_but_not_fatal() {
    let backend = SimBackend::new();
    backend.set_value("rw/value", Value::Long(1));

    let client = SyncClient::new(Arc::new(backend.clone()), &fast_config());
    let good = client.add_scalar(ScalarBinding::<i32>::new("rw/value"));
    let bad = client.add_scalar(ScalarBinding::<i32>::new("rw/missing"));

    client.connect().unwrap();
    assert!(client.write(bad, &5).is_err());
    assert!(client.has_error());

    // The client is still usable for the healthy binding.
    client.write(good, &42).unwrap();
    assert_eq!(backend.value("rw/value"), Some(Value::Long(42)));
}
