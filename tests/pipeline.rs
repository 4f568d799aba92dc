use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};

use framepipe::capture::{Frame, FrameMetadata, FrameSource, PixelFormat};
use framepipe::display::FrameSink;
use framepipe::pipeline::{
    AcquireRetryPolicy, BoundedFrameBuffer, ConsumerExit, Orchestrator, PipelineOptions,
    ProducerExit, PutOutcome,
};
use framepipe::PipelineError;

const TIMEOUT: Duration = Duration::from_millis(20);

type Log = Arc<Mutex<Vec<&'static str>>>;
type Shown = Arc<Mutex<Vec<u64>>>;

fn options() -> PipelineOptions {
    PipelineOptions {
        capacity: 2,
        put_timeout: TIMEOUT,
        take_timeout: TIMEOUT,
        retry: AcquireRetryPolicy::default(),
        resolution: Some((4, 2)),
    }
}

fn frame(sequence: u64) -> Frame {
    Frame::new(
        vec![0u8; 4 * 2 * 3],
        FrameMetadata::packed(sequence, 4, 2, PixelFormat::Rgb24),
    )
}

struct TestSource {
    log: Log,
    available: bool,
    /// Frames to hand out before returning misses forever; `None` is unlimited.
    limit: Option<u64>,
    panic_at: Option<u64>,
    /// Each acquisition waits this long and then misses, like a stalled camera.
    stall: Option<Duration>,
    acquires: Arc<AtomicU64>,
    configured: Arc<Mutex<Option<(u32, u32)>>>,
    produced: u64,
    released: bool,
}

impl TestSource {
    fn new(log: &Log) -> Self {
        Self {
            log: Arc::clone(log),
            available: true,
            limit: None,
            panic_at: None,
            stall: None,
            acquires: Arc::default(),
            configured: Arc::default(),
            produced: 0,
            released: false,
        }
    }
}

impl FrameSource for TestSource {
    fn open(&mut self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(eyre!("no camera attached"))
        }
    }

    fn configure(&mut self, width: u32, height: u32) -> Result<()> {
        *self.configured.lock().unwrap() = Some((width, height));
        Ok(())
    }

    fn acquire(&mut self) -> Option<Frame> {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        if let Some(stall) = self.stall {
            thread::sleep(stall);
            return None;
        }
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }
        self.produced += 1;
        if self.panic_at == Some(self.produced) {
            panic!("camera driver fault");
        }
        Some(frame(self.produced))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.lock().unwrap().push("source");
        }
    }
}

struct TestSink {
    log: Log,
    shown: Shown,
    quit_after: Option<usize>,
    delay: Duration,
    released: bool,
}

impl TestSink {
    fn new(log: &Log, shown: &Shown) -> Self {
        Self {
            log: Arc::clone(log),
            shown: Arc::clone(shown),
            quit_after: None,
            delay: Duration::ZERO,
            released: false,
        }
    }
}

impl FrameSink for TestSink {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        thread::sleep(self.delay);
        self.shown.lock().unwrap().push(frame.sequence());
        Ok(())
    }

    fn poll_quit(&mut self) -> bool {
        self.quit_after
            .is_some_and(|n| self.shown.lock().unwrap().len() >= n)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.lock().unwrap().push("sink");
        }
    }
}

fn passthrough(frame: Frame) -> Frame {
    frame
}

#[test]
fn two_slot_buffer_scenario() {
    let buffer = BoundedFrameBuffer::new(2).unwrap();

    assert_eq!(buffer.try_put(frame(1), TIMEOUT), PutOutcome::Accepted);
    assert_eq!(buffer.try_put(frame(2), TIMEOUT), PutOutcome::Accepted);
    assert_eq!(buffer.try_put(frame(3), TIMEOUT), PutOutcome::Dropped);
    assert_eq!(buffer.try_take(TIMEOUT).map(|f| f.sequence()), Some(1));
    assert_eq!(buffer.try_take(TIMEOUT).map(|f| f.sequence()), Some(2));
    assert!(buffer.try_take(TIMEOUT).is_none());
}

#[test]
fn quit_after_one_frame_stops_a_retrying_producer() {
    let log = Log::default();
    let shown = Shown::default();
    let mut source = TestSource::new(&log);
    source.limit = Some(1);
    let configured = Arc::clone(&source.configured);
    let sink_log = Arc::clone(&log);
    let sink_shown = Arc::clone(&shown);

    let started = Instant::now();
    let report = Orchestrator::new(options())
        .run(source, passthrough, move || {
            let mut sink = TestSink::new(&sink_log, &sink_shown);
            sink.quit_after = Some(1);
            Ok(sink)
        })
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.consumer.exit, ConsumerExit::QuitRequested);
    assert_eq!(report.consumer.shown, 1);
    assert_eq!(report.producer.exit, ProducerExit::Stopped);
    assert_eq!(report.producer.acquired, 1);
    assert_eq!(*shown.lock().unwrap(), vec![1]);
    assert_eq!(*configured.lock().unwrap(), Some((4, 2)));
    assert_eq!(*log.lock().unwrap(), vec!["source", "sink"]);
}

#[test]
fn preset_stop_processes_nothing() {
    let log = Log::default();
    let shown = Shown::default();
    let source = TestSource::new(&log);
    let acquires = Arc::clone(&source.acquires);
    let sink_log = Arc::clone(&log);
    let sink_shown = Arc::clone(&shown);

    let orchestrator = Orchestrator::new(options());
    orchestrator.stop_signal().set();

    let started = Instant::now();
    let report = orchestrator
        .run(source, passthrough, move || {
            Ok(TestSink::new(&sink_log, &sink_shown))
        })
        .unwrap();

    assert!(started.elapsed() < TIMEOUT * 3 + Duration::from_millis(200));
    assert_eq!(acquires.load(Ordering::Relaxed), 0);
    assert_eq!(report.producer.acquired, 0);
    assert_eq!(report.consumer.shown, 0);
    assert_eq!(report.consumer.exit, ConsumerExit::Stopped);
    assert!(shown.lock().unwrap().is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["source", "sink"]);
}

#[test]
fn unavailable_source_never_starts_the_loops() {
    let log = Log::default();
    let mut source = TestSource::new(&log);
    source.available = false;
    let acquires = Arc::clone(&source.acquires);
    let sink_opened = Arc::new(AtomicU64::new(0));
    let opened = Arc::clone(&sink_opened);
    let shown = Shown::default();

    let result = Orchestrator::new(options()).run(source, passthrough, move || {
        opened.fetch_add(1, Ordering::Relaxed);
        Ok(TestSink::new(&Log::default(), &shown))
    });

    match result {
        Err(PipelineError::SourceUnavailable(reason)) => {
            assert!(reason.contains("no camera attached"), "{reason}")
        }
        other => panic!("expected SourceUnavailable, got {other:?}"),
    }
    assert_eq!(acquires.load(Ordering::Relaxed), 0);
    assert_eq!(sink_opened.load(Ordering::Relaxed), 0);
    assert_eq!(*log.lock().unwrap(), vec!["source"]);
}

#[test]
fn external_stop_ends_a_busy_run_promptly() {
    let log = Log::default();
    let shown = Shown::default();
    let source = TestSource::new(&log);
    let sink_log = Arc::clone(&log);
    let sink_shown = Arc::clone(&shown);

    let orchestrator = Orchestrator::new(options());
    let stop = orchestrator.stop_signal();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        stop.set();
        Instant::now()
    });

    let report = orchestrator
        .run(source, passthrough, move || {
            Ok(TestSink::new(&sink_log, &sink_shown))
        })
        .unwrap();
    let stopped_at = stopper.join().unwrap();

    assert!(stopped_at.elapsed() < TIMEOUT * 3 + Duration::from_millis(200));
    assert_eq!(report.producer.exit, ProducerExit::Stopped);
    assert_eq!(report.consumer.exit, ConsumerExit::Stopped);
    assert!(report.producer.acquired > 0);
    assert_eq!(*log.lock().unwrap(), vec!["source", "sink"]);
}

#[test]
fn stalled_camera_with_bounded_waits_still_honours_stop() {
    let log = Log::default();
    let shown = Shown::default();
    let mut source = TestSource::new(&log);
    source.stall = Some(Duration::from_millis(50));
    let acquires = Arc::clone(&source.acquires);
    let sink_log = Arc::clone(&log);
    let sink_shown = Arc::clone(&shown);

    let orchestrator = Orchestrator::new(options());
    let stop = orchestrator.stop_signal();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(120));
        stop.set();
        Instant::now()
    });

    let report = orchestrator
        .run(source, passthrough, move || {
            Ok(TestSink::new(&sink_log, &sink_shown))
        })
        .unwrap();
    let stopped_at = stopper.join().unwrap();

    let longest_stall = Duration::from_millis(50);
    assert!(stopped_at.elapsed() < longest_stall + TIMEOUT * 3 + Duration::from_millis(200));
    assert!(acquires.load(Ordering::Relaxed) >= 2);
    assert_eq!(report.producer.acquired, 0);
    assert_eq!(report.producer.exit, ProducerExit::Stopped);
    assert!(shown.lock().unwrap().is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["source", "sink"]);
}

#[test]
fn slow_display_drops_frames_but_keeps_order() {
    let log = Log::default();
    let shown = Shown::default();
    let source = TestSource::new(&log);
    let sink_log = Arc::clone(&log);
    let sink_shown = Arc::clone(&shown);
    let mut opts = options();
    opts.put_timeout = Duration::from_millis(1);

    let report = Orchestrator::new(opts)
        .run(source, passthrough, move || {
            let mut sink = TestSink::new(&sink_log, &sink_shown);
            sink.delay = Duration::from_millis(10);
            sink.quit_after = Some(10);
            Ok(sink)
        })
        .unwrap();

    let shown = shown.lock().unwrap();
    assert_eq!(shown.len(), 10);
    assert!(shown.windows(2).all(|w| w[0] < w[1]));
    assert!(report.buffer.dropped > 0);
    assert_eq!(report.producer.dropped, report.buffer.dropped);
    assert_eq!(
        report.producer.acquired,
        report.producer.accepted + report.producer.dropped
    );
}

#[test]
fn failing_sink_still_releases_the_source() {
    let log = Log::default();
    let source = TestSource::new(&log);

    let result = Orchestrator::new(options()).run(source, passthrough, || -> Result<TestSink> {
        Err(eyre!("no display"))
    });

    assert!(matches!(result, Err(PipelineError::SinkUnavailable(_))));
    assert_eq!(*log.lock().unwrap(), vec!["source"]);
}

#[test]
fn producer_panic_is_reported_after_ordered_teardown() {
    let log = Log::default();
    let shown = Shown::default();
    let mut source = TestSource::new(&log);
    source.panic_at = Some(3);
    let sink_log = Arc::clone(&log);
    let sink_shown = Arc::clone(&shown);

    let result = Orchestrator::new(options()).run(source, passthrough, move || {
        Ok(TestSink::new(&sink_log, &sink_shown))
    });

    assert!(matches!(
        result,
        Err(PipelineError::WorkerPanicked { unit: "producer" })
    ));
    assert_eq!(*log.lock().unwrap(), vec!["source", "sink"]);
}

#[test]
fn retry_cap_ends_the_run_without_an_error() {
    let log = Log::default();
    let shown = Shown::default();
    let mut source = TestSource::new(&log);
    source.limit = Some(0);
    let sink_log = Arc::clone(&log);
    let sink_shown = Arc::clone(&shown);
    let mut opts = options();
    opts.retry = AcquireRetryPolicy {
        backoff: Duration::from_millis(1),
        max_consecutive_failures: Some(5),
    };

    let report = Orchestrator::new(opts)
        .run(source, passthrough, move || {
            Ok(TestSink::new(&sink_log, &sink_shown))
        })
        .unwrap();

    assert_eq!(report.producer.exit, ProducerExit::SourceFailed);
    assert_eq!(report.producer.acquire_failures, 5);
    assert_eq!(report.consumer.exit, ConsumerExit::Stopped);
    assert_eq!(*log.lock().unwrap(), vec!["source", "sink"]);
}
