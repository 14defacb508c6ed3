use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use snapconvert::converter::{ConversionTask, ConvertError, Converter, ConverterType, TaskLease};
use snapconvert::engine::{BatchEngine, BatchRequest};
use snapconvert::error::SnapError;
use snapconvert::progress::{FnSink, NoopSink, ProgressEvent};

/// Converter that sleeps, tracks how many calls overlap, and fails or
/// panics on inputs whose file name contains a marker.
#[derive(Default)]
struct FakeConverter {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeConverter {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Converter for FakeConverter {
    fn converter_type(&self) -> ConverterType {
        ConverterType::Image
    }

    async fn convert(&self, task: &ConversionTask, _lease: &TaskLease) -> Result<(), ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let name = task.input_path.to_string_lossy().into_owned();
        if name.contains("panic") {
            panic!("decoder exploded");
        }
        if name.contains("bad") {
            return Err(ConvertError::Internal("unreadable input".to_string()));
        }
        Ok(())
    }
}

/// Converter whose work runs on a blocking thread that ignores the async
/// side being dropped, the way image decoding does.
#[derive(Default)]
struct BlockingConverter {
    work: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl Converter for BlockingConverter {
    fn converter_type(&self) -> ConverterType {
        ConverterType::Image
    }

    async fn convert(&self, _task: &ConversionTask, lease: &TaskLease) -> Result<(), ConvertError> {
        let lease = lease.clone();
        let work = self.work;
        let in_flight = self.in_flight.clone();
        let max_in_flight = self.max_in_flight.clone();

        tokio::task::spawn_blocking(move || {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(work);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(lease);
        })
        .await
        .map_err(|e| ConvertError::Internal(e.to_string()))
    }
}

/// Converter that writes its output at once and then stalls.
struct StallingConverter;

#[async_trait]
impl Converter for StallingConverter {
    fn converter_type(&self) -> ConverterType {
        ConverterType::Video
    }

    async fn convert(&self, task: &ConversionTask, _lease: &TaskLease) -> Result<(), ConvertError> {
        tokio::fs::write(&task.output_path, b"partial").await?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

fn engine(converter: Arc<FakeConverter>) -> BatchEngine {
    BatchEngine::with_converters(converter.clone(), converter)
}

fn inputs(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(|n| PathBuf::from(format!("/photos/{}", n))).collect()
}

fn numbered(count: usize) -> Vec<PathBuf> {
    (0..count).map(|i| PathBuf::from(format!("/photos/img{:04}.png", i))).collect()
}

#[tokio::test]
async fn test_every_input_gets_one_outcome() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::from_millis(5));
    let files = inputs(&["a.png", "b.png", "bad.png", "c.png"]);

    let report = engine(converter.clone())
        .run(
            BatchRequest::new(files.clone(), out.path(), "webp", ConverterType::Image),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.total(), 4);
    assert_eq!(report.succeeded_count(), 3);
    assert_eq!(report.failed_count(), 1);

    let seen: HashSet<_> = report.outcomes.iter().map(|o| o.input_path.clone()).collect();
    assert_eq!(seen, files.into_iter().collect());

    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed[0].input_name(), "bad.png");
    assert!(failed[0].error_detail.as_deref().unwrap().contains("unreadable input"));

    for outcome in report.outcomes.iter().filter(|o| o.success) {
        assert_eq!(outcome.output_path.parent(), Some(out.path()));
        assert_eq!(outcome.output_path.extension().unwrap(), "webp");
    }
}

#[tokio::test]
async fn test_empty_batch_emits_nothing() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::ZERO);
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();

    let report = engine(converter.clone())
        .run(
            BatchRequest::new(Vec::new(), out.path().join("never-created"), "png", ConverterType::Image),
            FnSink(move |e: &ProgressEvent| recorded.lock().unwrap().push(e.clone())),
        )
        .await
        .unwrap();

    assert_eq!(report.total(), 0);
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
    assert!(!out.path().join("never-created").exists());
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::from_millis(20));

    let report = engine(converter.clone())
        .run(
            BatchRequest::new(numbered(12), out.path(), "jpg", ConverterType::Image)
                .with_concurrency_limit(Some(3)),
            NoopSink,
        )
        .await
        .unwrap();

    assert!(report.all_succeeded());
    let max = converter.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "{} conversions overlapped", max);
    assert!(max >= 2, "conversions never overlapped");
}

#[tokio::test]
async fn test_progress_is_throttled_and_final_event_arrives() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::ZERO);
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();

    engine(converter)
        .run(
            BatchRequest::new(numbered(200), out.path(), "png", ConverterType::Image)
                .with_concurrency_limit(Some(8)),
            FnSink(move |e: &ProgressEvent| recorded.lock().unwrap().push(e.clone())),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(events.len() < 200, "{} events forwarded", events.len());
    let last = events.last().unwrap();
    assert_eq!((last.completed, last.total), (200, 200));
    assert!(events.windows(2).all(|w| w[0].completed < w[1].completed));
}

#[tokio::test]
async fn test_timeout_fails_only_the_slow_file() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::from_secs(30));

    let report = engine(converter)
        .run(
            BatchRequest::new(inputs(&["slow.mp4"]), out.path(), "mkv", ConverterType::Video)
                .with_task_timeout(Some(Duration::from_millis(50))),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.failed_count(), 1);
    let detail = report.outcomes[0].error_detail.as_deref().unwrap();
    assert!(detail.starts_with("timed out after"), "{}", detail);
}

#[tokio::test]
async fn test_cancellation_reports_every_file() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::from_secs(30));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = engine(converter)
        .run(
            BatchRequest::new(numbered(6), out.path(), "png", ConverterType::Image)
                .with_concurrency_limit(Some(2))
                .with_cancellation(cancel),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.total(), 6);
    assert_eq!(report.failed_count(), 6);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.error_detail.as_deref() == Some("cancelled before completion")));
}

#[tokio::test]
async fn test_cancelled_before_start_converts_nothing() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::ZERO);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine(converter.clone())
        .run(
            BatchRequest::new(numbered(3), out.path(), "png", ConverterType::Image).with_cancellation(cancel),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.failed_count(), 3);
    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_panicking_conversion_is_isolated() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::ZERO);

    let report = engine(converter)
        .run(
            BatchRequest::new(inputs(&["ok.png", "panic.png", "fine.png"]), out.path(), "png", ConverterType::Image),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded_count(), 2);
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].input_name(), "panic.png");
    assert!(failed[0].error_detail.as_deref().unwrap().contains("decoder exploded"));
}

#[tokio::test]
async fn test_same_stem_inputs_get_distinct_outputs() {
    let out = tempfile::tempdir().unwrap();
    std::fs::write(out.path().join("photo.jpg"), b"existing").unwrap();
    let converter = FakeConverter::with_delay(Duration::from_millis(5));
    let files = vec![
        PathBuf::from("/a/photo.png"),
        PathBuf::from("/b/photo.gif"),
        PathBuf::from("/c/photo.bmp"),
    ];

    let report = engine(converter)
        .run(BatchRequest::new(files, out.path(), "JPG", ConverterType::Image), NoopSink)
        .await
        .unwrap();

    let outputs: HashSet<_> = report
        .outcomes
        .iter()
        .map(|o| o.output_path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let expected: HashSet<_> = ["photo_1.jpg", "photo_2.jpg", "photo_3.jpg"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(outputs, expected);
}

#[tokio::test]
async fn test_invalid_requests_fail_before_scheduling() {
    let out = tempfile::tempdir().unwrap();
    let converter = FakeConverter::with_delay(Duration::ZERO);
    let engine = engine(converter.clone());

    let blocker = out.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let result = engine
        .run(
            BatchRequest::new(numbered(2), blocker.join("out"), "png", ConverterType::Image),
            NoopSink,
        )
        .await;
    assert!(matches!(result, Err(SnapError::OutputFolder { .. })));

    let result = engine
        .run(BatchRequest::new(numbered(2), out.path(), "", ConverterType::Image), NoopSink)
        .await;
    assert!(matches!(result, Err(SnapError::InvalidRequest(_))));

    assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_output_folder_is_created() {
    let out = tempfile::tempdir().unwrap();
    let nested = out.path().join("converted").join("today");
    let converter = FakeConverter::with_delay(Duration::ZERO);

    let report = engine(converter)
        .run(BatchRequest::new(numbered(1), &nested, "png", ConverterType::Image), NoopSink)
        .await
        .unwrap();

    assert!(report.all_succeeded());
    assert!(nested.is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_blocking_work_keeps_its_slot() {
    let out = tempfile::tempdir().unwrap();
    let converter = Arc::new(BlockingConverter {
        work: Duration::from_millis(200),
        ..Default::default()
    });

    let report = BatchEngine::with_converters(converter.clone(), converter.clone())
        .run(
            BatchRequest::new(numbered(4), out.path(), "png", ConverterType::Image)
                .with_concurrency_limit(Some(1))
                .with_task_timeout(Some(Duration::from_millis(30))),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.failed_count(), 4);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.error_detail.as_deref().unwrap().starts_with("timed out after")));
    assert_eq!(converter.max_in_flight.load(Ordering::SeqCst), 1);
    // run waits for the abandoned work before returning
    assert_eq!(converter.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_timed_out_conversion_leaves_no_output() {
    let out = tempfile::tempdir().unwrap();
    let converter: Arc<dyn Converter> = Arc::new(StallingConverter);

    let report = BatchEngine::with_converters(converter.clone(), converter)
        .run(
            BatchRequest::new(inputs(&["clip.mp4"]), out.path(), "mkv", ConverterType::Video)
                .with_task_timeout(Some(Duration::from_millis(100))),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.outcomes[0].output_path, out.path().join("clip.mkv"));
    assert!(!out.path().join("clip.mkv").exists());
}

#[tokio::test]
async fn test_cancelled_conversion_leaves_no_output() {
    let out = tempfile::tempdir().unwrap();
    let converter: Arc<dyn Converter> = Arc::new(StallingConverter);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = BatchEngine::with_converters(converter.clone(), converter)
        .run(
            BatchRequest::new(inputs(&["clip.mp4"]), out.path(), "mkv", ConverterType::Video)
                .with_cancellation(cancel),
            NoopSink,
        )
        .await
        .unwrap();

    assert_eq!(report.failed_count(), 1);
    assert!(!out.path().join("clip.mkv").exists());
}
