//! End-to-end tests driving an `HwCodec` over the loopback component.
//!
//! The loopback component copies each input descriptor into a free output
//! buffer, so every delivered buffer can be traced back to the input that
//! produced it by its timestamp.

use hwbridge::prelude::*;
use hwbridge::testing::{LoopbackConfig, LoopbackDriver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup(config: LoopbackConfig) -> (Arc<LoopbackDriver>, DriverSession) {
    init_tracing();
    let driver = Arc::new(LoopbackDriver::new(config));
    let session = DriverSession::new(driver.clone());
    (driver, session)
}

fn codec_config(name: &str) -> CodecConfig {
    CodecConfig::new(name)
        .buffers(4, 4)
        .buffer_sizes(4096, 4096)
        .wait_timeout(Duration::from_secs(2))
        .push_poll_interval(Duration::from_millis(10))
}

type Delivered = Arc<Mutex<Vec<BufferHandle>>>;

fn collector() -> (Delivered, impl Deliver<BufferHandle>) {
    let seen: Delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |handle: BufferHandle| -> Result<()> {
        sink.lock().push(handle);
        Ok(())
    })
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn submit(codec: &HwCodec, seq: u64) {
    let mut input = codec.acquire_free_input_buffer().unwrap();
    input.set_filled(64 + seq as usize);
    input.pts = Some(Duration::from_millis(seq));
    codec.submit_input_buffer(input).unwrap();
}

fn pts_of(seen: &Delivered) -> Vec<u64> {
    seen.lock()
        .iter()
        .map(|h| h.pts.map_or(u64::MAX, |p| p.as_millis() as u64))
        .collect()
}

// ============================================================================
// Full runs
// ============================================================================

/// Every submitted input comes out once, in order, and stop drains both pools.
#[test]
fn test_full_run_delivers_in_order() {
    let (driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("full")).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();

    const N: u64 = 200;
    for seq in 0..N {
        submit(&codec, seq);
    }

    assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == N as usize));
    assert_eq!(pts_of(&seen), (0..N).collect::<Vec<_>>());
    for (seq, handle) in seen.lock().iter().enumerate() {
        assert_eq!(handle.filled_len, 64 + seq);
    }

    codec.stop().unwrap();
    let stats = codec.stats();
    assert_eq!(stats.state, ComponentState::Loaded);
    assert_eq!(stats.input.capacity, 0);
    assert_eq!(stats.output.capacity, 0);
    assert_eq!(stats.submitted, N);

    let component = driver.component("full").unwrap();
    assert_eq!(component.allocated(PortDirection::Input), 0);
    assert_eq!(component.allocated(PortDirection::Output), 0);
}

/// A producer thread and the delivery worker run concurrently.
#[test]
fn test_threaded_producer() {
    let (_driver, session) = setup(LoopbackConfig::default());
    let codec = Arc::new(HwCodec::new(&session, codec_config("threaded")).unwrap());
    let (seen, sink) = collector();
    codec.start(sink).unwrap();

    let producer = {
        let codec = Arc::clone(&codec);
        thread::spawn(move || {
            for seq in 0..500 {
                submit(&codec, seq);
            }
        })
    };
    producer.join().unwrap();

    assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 500));
    assert_eq!(pts_of(&seen), (0..500).collect::<Vec<_>>());
    codec.stop().unwrap();
}

/// The codec can be started again after a stop.
#[test]
fn test_restart_after_stop() {
    let (_driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("restart")).unwrap();

    for round in 0..3 {
        let (seen, sink) = collector();
        codec.start(sink).unwrap();
        for seq in 0..10 {
            submit(&codec, seq);
        }
        assert!(
            wait_until(Duration::from_secs(2), || seen.lock().len() == 10),
            "round {round}"
        );
        codec.stop().unwrap();
    }
}

/// Independent instances share one initialized driver.
#[test]
fn test_instances_coexist() {
    let (driver, session) = setup(LoopbackConfig::default());
    let a = HwCodec::new(&session, codec_config("a")).unwrap();
    let b = HwCodec::new(&session, codec_config("b")).unwrap();
    assert_eq!(driver.init_count(), 1);
    assert_eq!(session.open_count(), 2);

    let (seen_a, sink_a) = collector();
    let (seen_b, sink_b) = collector();
    a.start(sink_a).unwrap();
    b.start(sink_b).unwrap();

    for seq in 0..20 {
        submit(&a, seq);
        submit(&b, 1000 + seq);
    }
    assert!(wait_until(Duration::from_secs(2), || seen_a.lock().len() == 20
        && seen_b.lock().len() == 20));
    assert!(pts_of(&seen_a).iter().all(|&p| p < 1000));
    assert!(pts_of(&seen_b).iter().all(|&p| p >= 1000));

    drop(a);
    assert_eq!(driver.deinit_count(), 0);
    drop(b);
    assert_eq!(driver.deinit_count(), 1);
}

// ============================================================================
// Flush and port control
// ============================================================================

/// Flushing output mid-stream drops in-flight output but keeps order.
#[test]
fn test_flush_output_mid_stream() {
    let (_driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("flush")).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();

    for seq in 0..20 {
        submit(&codec, seq);
    }
    codec.flush_port(PortDirection::Output).unwrap();
    assert!(!codec.port_status(PortDirection::Output).flushing);

    for seq in 100..120 {
        submit(&codec, seq);
    }
    assert!(wait_until(Duration::from_secs(2), || pts_of(&seen).last() == Some(&119)));

    let pts = pts_of(&seen);
    assert!(pts.windows(2).all(|w| w[0] < w[1]), "out of order: {pts:?}");

    codec.stop().unwrap();
    assert_eq!(codec.stats().output.capacity, 0);
}

/// Flushing input returns everything the component holds.
#[test]
fn test_flush_input_while_paused() {
    let (_driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("flush-in")).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();
    codec.pause().unwrap();

    for seq in 0..4 {
        submit(&codec, seq);
    }
    assert_eq!(codec.stats().input.in_use, 4);

    codec.flush_port(PortDirection::Input).unwrap();
    assert_eq!(codec.stats().input.in_use, 0);

    codec.resume().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(seen.lock().is_empty());
    codec.stop().unwrap();
}

/// Disabling and re-enabling the output port frees and reallocates buffers.
#[test]
fn test_output_port_restart() {
    let (driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("port")).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();
    let component = driver.component("port").unwrap();

    submit(&codec, 0);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 1));

    codec.stop_port(PortDirection::Output).unwrap();
    assert!(!codec.port_status(PortDirection::Output).enabled);
    assert_eq!(component.allocated(PortDirection::Output), 0);
    assert!(codec.context().output().is_empty());

    codec.start_port(PortDirection::Output).unwrap();
    assert!(codec.port_status(PortDirection::Output).enabled);
    assert_eq!(component.allocated(PortDirection::Output), 4);

    submit(&codec, 1);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 2));
    codec.stop().unwrap();
}

/// A disabled input port refuses new buffers.
#[test]
fn test_disabled_input_refuses_acquire() {
    let (_driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("disabled")).unwrap();
    let (_seen, sink) = collector();
    codec.start(sink).unwrap();

    codec.stop_port(PortDirection::Input).unwrap();
    assert!(matches!(
        codec.acquire_free_input_buffer(),
        Err(Error::Flushing(PortDirection::Input))
    ));

    codec.start_port(PortDirection::Input).unwrap();
    let input = codec.acquire_free_input_buffer().unwrap();
    codec.release_input_buffer(input.id).unwrap();
    codec.stop().unwrap();
}

// ============================================================================
// Back-pressure and failures
// ============================================================================

/// A paused component holding every input buffer exhausts the pool.
#[test]
fn test_input_exhaustion() {
    let (_driver, session) = setup(LoopbackConfig::default());
    let config = codec_config("exhaust").wait_timeout(Duration::from_millis(100));
    let codec = HwCodec::new(&session, config).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();
    codec.pause().unwrap();

    for seq in 0..4 {
        submit(&codec, seq);
    }

    let start = Instant::now();
    let result = codec.acquire_free_input_buffer();
    assert!(matches!(
        result,
        Err(Error::ResourceExhausted {
            port: PortDirection::Input,
            ..
        })
    ));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(!codec.is_poisoned());

    codec.resume().unwrap();
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 4));
    let input = codec.acquire_free_input_buffer().unwrap();
    codec.release_input_buffer(input.id).unwrap();
    codec.stop().unwrap();
}

/// A failing sink pauses delivery once and reports it once.
#[test]
fn test_delivery_failure_pauses_push_task() {
    let (_driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("failing")).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    codec
        .start(move |_: BufferHandle| -> Result<()> {
            if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                return Err(Error::DeliveryFailed("sink closed".into()));
            }
            Ok(())
        })
        .unwrap();
    let failures = codec.delivery_failures().unwrap();

    for seq in 0..4 {
        submit(&codec, seq);
    }

    let failure = failures.recv().unwrap();
    assert_eq!(failure.delivered, 2);
    assert!(failure.message.contains("sink closed"));

    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(failures.try_recv().unwrap().is_none());
    assert!(!codec.is_poisoned());

    let acknowledged = codec.acknowledge_failure().unwrap();
    assert_eq!(acknowledged, Some(failure));
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 4));

    codec.stop().unwrap();
}

/// A state change the component never confirms poisons the instance.
#[test]
fn test_transition_timeout_poisons() {
    let (driver, session) = setup(LoopbackConfig::default());
    let config = codec_config("stall").wait_timeout(Duration::from_millis(100));
    let codec = HwCodec::new(&session, config).unwrap();
    let (_seen, sink) = collector();
    codec.start(sink).unwrap();

    driver.component("stall").unwrap().set_stall_state_commands(true);

    let start = Instant::now();
    let result = codec.pause();
    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(codec.is_poisoned());

    assert!(matches!(
        codec.acquire_free_input_buffer(),
        Err(Error::ComponentLost(_))
    ));
    assert!(matches!(codec.stop(), Err(Error::ComponentLost(_))));

    drop(codec);
    assert_eq!(session.open_count(), 0);
}

/// An error event fails the pending wait and poisons the instance.
#[test]
fn test_component_error_event() {
    let (driver, session) = setup(LoopbackConfig {
        command_delay: Duration::from_millis(50),
        ..LoopbackConfig::default()
    });
    let codec = HwCodec::new(&session, codec_config("broken")).unwrap();
    let (_seen, sink) = collector();
    codec.start(sink).unwrap();

    driver.component("broken").unwrap().inject_error(0x8000_1001).unwrap();
    assert!(wait_until(Duration::from_secs(1), || codec.status().error.is_some()));

    assert!(matches!(
        codec.acquire_free_input_buffer(),
        Err(Error::Component { code: 0x8000_1001 })
    ));
    assert!(matches!(
        codec.pause(),
        Err(Error::Component { code: 0x8000_1001 })
    ));
    assert!(codec.is_poisoned());
}

/// Port settings changes are surfaced to the pipeline.
#[test]
fn test_port_settings_changed() {
    let (driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("settings")).unwrap();
    let (_seen, sink) = collector();
    codec.start(sink).unwrap();

    driver
        .component("settings")
        .unwrap()
        .emit(hwbridge::driver::ComponentEvent::PortSettingsChanged(
            PortDirection::Output,
        ))
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        codec.port_status(PortDirection::Output).settings_changed
    }));
    assert!(codec.take_settings_changed(PortDirection::Output));
    codec.stop().unwrap();
}

// ============================================================================
// Lifecycle ordering
// ============================================================================

/// Starting a running or paused codec is refused and leaves it working.
#[test]
fn test_second_start_is_refused() {
    let (driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("twice")).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();
    let component = driver.component("twice").unwrap();

    submit(&codec, 0);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 1));

    let (_other, again) = collector();
    assert!(matches!(
        codec.start(again),
        Err(Error::StateMismatch {
            from: ComponentState::Executing,
            to: ComponentState::Idle
        })
    ));
    assert!(!codec.is_poisoned());
    assert_eq!(component.allocated(PortDirection::Input), 4);
    assert_eq!(component.allocated(PortDirection::Output), 4);

    submit(&codec, 1);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 2));
    assert_eq!(pts_of(&seen), vec![0, 1]);

    codec.stop().unwrap();
    assert_eq!(component.allocated(PortDirection::Output), 0);
}

/// Stop while the push task is still handing a delivered buffer back to
/// the component: the recycled buffer must come home before the drain.
#[test]
fn test_stop_during_recycle() {
    let (driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("recycle-stop")).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();
    let component = driver.component("recycle-stop").unwrap();
    component.set_fill_delay(Duration::from_millis(200));

    submit(&codec, 0);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 1));
    // Inside the recycle's slow fill_this_buffer
    thread::sleep(Duration::from_millis(20));

    codec.stop().unwrap();
    assert!(!codec.is_poisoned());
    assert_eq!(codec.state(), ComponentState::Loaded);
    assert_eq!(component.allocated(PortDirection::Input), 0);
    assert_eq!(component.allocated(PortDirection::Output), 0);

    component.set_fill_delay(Duration::ZERO);
    let (seen, sink) = collector();
    codec.start(sink).unwrap();
    submit(&codec, 1);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 1));
    codec.stop().unwrap();
}

/// Disabling the output port while a delivered buffer is being recycled
/// still gets every output buffer back and freed.
#[test]
fn test_stop_output_port_during_recycle() {
    let (driver, session) = setup(LoopbackConfig::default());
    let codec = HwCodec::new(&session, codec_config("recycle-port")).unwrap();
    let (seen, sink) = collector();
    codec.start(sink).unwrap();
    let component = driver.component("recycle-port").unwrap();
    component.set_fill_delay(Duration::from_millis(200));

    submit(&codec, 0);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 1));
    thread::sleep(Duration::from_millis(20));

    codec.stop_port(PortDirection::Output).unwrap();
    assert!(!codec.is_poisoned());
    assert!(!codec.port_status(PortDirection::Output).enabled);
    assert_eq!(component.allocated(PortDirection::Output), 0);
    assert!(codec.context().output().is_empty());

    component.set_fill_delay(Duration::ZERO);
    codec.start_port(PortDirection::Output).unwrap();
    submit(&codec, 1);
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 2));
    assert_eq!(pts_of(&seen), vec![0, 1]);
    codec.stop().unwrap();
}
