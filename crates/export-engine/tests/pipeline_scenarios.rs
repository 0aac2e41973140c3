use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snapcut_common::config::EngineConfig;
use snapcut_common::error::{SnapcutError, SnapcutResult};
use snapcut_export_engine::memory::MEMORY_CONTAINER_MAGIC;
use snapcut_export_engine::{
    BitmapPool, ExportOutcome, ExportPipeline, ExportRequest, ExportService, FrameRenderer,
    MemoryBackend, MemoryBackendOptions, RgbaFrame, SilenceSource, TestPattern,
    TestPatternProvider, TestPatternRenderer, TrackKind,
};
use snapcut_export_model::{
    ContainerFormat, ExportProgress, ExportSettings, ExportStatus, ProjectSnapshot, Resolution,
    VideoCodec,
};

fn output_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("snapcut-scenarios-{}", std::process::id()))
        .join(name)
}

fn small_settings(fps: u32) -> ExportSettings {
    ExportSettings {
        resolution: Resolution::new(16, 8),
        frame_rate: fps,
        ..Default::default()
    }
}

fn request(name: &str, duration_ms: u64, settings: ExportSettings) -> ExportRequest {
    ExportRequest {
        project: ProjectSnapshot::new(name, duration_ms),
        settings,
        output_path: output_path(name),
    }
}

/// Run the pipeline directly and collect every progress event.
fn run_with(
    backend: Arc<MemoryBackend>,
    request: &ExportRequest,
    renderer: &mut dyn FrameRenderer,
    audio: bool,
) -> (ExportOutcome, Vec<ExportProgress>) {
    let events = Mutex::new(Vec::new());
    let mut pipeline = ExportPipeline::new(backend, EngineConfig::default());
    let source = audio.then(|| {
        Box::new(SilenceSource::new(
            request.settings.audio_sample_rate_hz,
            request.settings.audio_channels,
        )) as Box<dyn snapcut_export_engine::AudioSource>
    });
    let cancel = AtomicBool::new(false);
    let outcome = pipeline.run(request, renderer, source, &cancel, &|p| {
        events.lock().unwrap().push(p)
    });
    (outcome, events.into_inner().unwrap())
}

fn count(events: &[ExportProgress], status: ExportStatus) -> usize {
    events.iter().filter(|e| e.status == status).count()
}

fn assert_single_terminal(events: &[ExportProgress]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {events:?}");
    assert!(events.last().unwrap().is_terminal());
}

fn assert_all_released(backend: &MemoryBackend) {
    for codec in backend.codec_logs() {
        assert_eq!(codec.releases, 1, "{} released {} times", codec.name, codec.releases);
        assert_eq!(codec.outstanding_outputs(), 0, "{} kept output buffers", codec.name);
    }
    for container in backend.container_logs() {
        assert_eq!(container.releases, 1);
    }
}

/// Renders every other frame and leaves gaps in between.
struct GapRenderer {
    inner: TestPatternRenderer,
    calls: u64,
}

impl FrameRenderer for GapRenderer {
    fn render_frame(
        &mut self,
        project: &ProjectSnapshot,
        timestamp_ms: u64,
        pool: &mut BitmapPool,
    ) -> SnapcutResult<Option<RgbaFrame>> {
        self.calls += 1;
        if self.calls % 2 == 0 {
            return Ok(None);
        }
        self.inner.render_frame(project, timestamp_ms, pool)
    }

    fn name(&self) -> &str {
        "gaps"
    }
}

/// Fails on the third frame.
struct FailingRenderer {
    calls: u64,
}

impl FrameRenderer for FailingRenderer {
    fn render_frame(
        &mut self,
        _project: &ProjectSnapshot,
        _timestamp_ms: u64,
        pool: &mut BitmapPool,
    ) -> SnapcutResult<Option<RgbaFrame>> {
        self.calls += 1;
        if self.calls == 3 {
            return Err(SnapcutError::render("compositor lost its layers"));
        }
        Ok(Some(pool.acquire(16, 8)))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[test]
fn two_seconds_at_ten_fps_is_twenty_frames() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("twenty.mp4", 2000, small_settings(10));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, false);

    let ExportOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.total_frames, 20);
    assert_eq!(summary.frames_encoded, 20);

    assert_eq!(count(&events, ExportStatus::Preparing), 1);
    assert_eq!(count(&events, ExportStatus::Encoding), 20);
    assert_eq!(count(&events, ExportStatus::Finalizing), 1);
    assert_eq!(count(&events, ExportStatus::Completed), 1);
    assert_eq!(events[0].status, ExportStatus::Preparing);
    assert_eq!(events[0].total_frames, 20);

    let last = events.last().unwrap();
    assert_eq!(last.status, ExportStatus::Completed);
    assert_eq!(last.current_frame, 20);
    assert_eq!(last.progress_percent, 100.0);
    assert_single_terminal(&events);

    let log = &backend.container_logs()[0];
    let video = log.samples_for(TrackKind::Video);
    assert_eq!(video.len(), 20);
    let pts: Vec<_> = video.iter().map(|s| s.presentation_time_us).collect();
    assert_eq!(pts[..3], [0, 100_000, 200_000]);
    assert!(video[0].flags.is_key_frame());
    assert_all_released(&backend);

    let bytes = std::fs::read(&request.output_path).unwrap();
    assert!(bytes.starts_with(MEMORY_CONTAINER_MAGIC));
}

#[test]
fn fractional_duration_rounds_frame_count_up() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("ceil.mp4", 1001, small_settings(30));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, _) = run_with(backend, &request, &mut renderer, false);
    let ExportOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.total_frames, 31);
}

#[test]
fn progress_never_goes_backwards() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("monotonic.mp4", 1500, small_settings(12));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (_, events) = run_with(backend, &request, &mut renderer, true);

    for pair in events.windows(2) {
        assert!(pair[0].current_frame <= pair[1].current_frame, "{pair:?}");
        assert!(pair[0].progress_percent <= pair[1].progress_percent, "{pair:?}");
        assert!(pair[0].elapsed_time_ms <= pair[1].elapsed_time_ms, "{pair:?}");
    }
    assert!(events
        .iter()
        .filter(|e| e.status != ExportStatus::Completed)
        .all(|e| e.progress_percent <= 99.0));
}

#[test]
fn container_starts_only_after_every_track_registered() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("tracks.mp4", 1000, small_settings(10));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, _) = run_with(Arc::clone(&backend), &request, &mut renderer, true);
    assert!(matches!(outcome, ExportOutcome::Completed(ref s) if s.has_audio));

    let log = &backend.container_logs()[0];
    assert_eq!(log.starts, 1);
    assert_eq!(log.stops, 1);
    assert_eq!(log.rejected_writes, 0);
    assert_eq!(log.tracks.len(), 2);
    assert!(log.tracks.contains(&TrackKind::Video));
    assert!(log.tracks.contains(&TrackKind::Audio));
    assert_eq!(log.samples_for(TrackKind::Video).len(), 10);
    assert!(!log.samples_for(TrackKind::Audio).is_empty());
    assert_all_released(&backend);
}

#[test]
fn video_only_export_starts_after_single_track() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("video-only.mp4", 500, small_settings(10));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, _) = run_with(Arc::clone(&backend), &request, &mut renderer, false);
    assert!(matches!(outcome, ExportOutcome::Completed(ref s) if !s.has_audio));

    let log = &backend.container_logs()[0];
    assert_eq!(log.tracks, [TrackKind::Video]);
    assert_eq!(log.starts, 1);
    assert_eq!(backend.codec_logs().len(), 1);
}

#[test]
fn missing_audio_encoder_downgrades_to_video_only() {
    let backend = Arc::new(MemoryBackend::new(MemoryBackendOptions {
        audio_available: false,
        ..Default::default()
    }));
    let request = request("no-audio.mp4", 500, small_settings(10));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, true);

    assert!(matches!(outcome, ExportOutcome::Completed(ref s) if !s.has_audio));
    assert_eq!(events.last().unwrap().status, ExportStatus::Completed);
    assert_eq!(backend.container_logs()[0].tracks, [TrackKind::Video]);
}

#[test]
fn incompatible_codec_fails_before_anything_is_created() {
    let backend = Arc::new(MemoryBackend::default());
    let settings = ExportSettings {
        video_codec: VideoCodec::Vp9,
        container_format: ContainerFormat::Mp4,
        ..small_settings(10)
    };
    let request = request("vp9-in-mp4.mp4", 1000, settings);
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, true);

    assert!(matches!(outcome, ExportOutcome::Failed { .. }));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, ExportStatus::Error);
    assert!(events[0].message.as_deref().is_some_and(|m| !m.is_empty()));
    assert!(backend.codec_logs().is_empty());
    assert!(backend.container_logs().is_empty());
    assert!(!request.output_path.exists());
}

#[test]
fn encoder_failure_mid_export_reports_one_error() {
    let backend = Arc::new(MemoryBackend::new(MemoryBackendOptions {
        fail_video_after: Some(5),
        ..Default::default()
    }));
    let request = request("encoder-fail.mp4", 2000, small_settings(10));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, true);

    assert!(matches!(outcome, ExportOutcome::Failed { .. }));
    assert_single_terminal(&events);
    let last = events.last().unwrap();
    assert_eq!(last.status, ExportStatus::Error);
    assert_eq!(last.current_frame, 5);
    assert_eq!(count(&events, ExportStatus::Finalizing), 0);
    assert_all_released(&backend);
}

#[test]
fn container_write_failure_reports_one_error() {
    let backend = Arc::new(MemoryBackend::new(MemoryBackendOptions {
        fail_write_after: Some(3),
        ..Default::default()
    }));
    let request = request("write-fail.mp4", 1000, small_settings(10));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, false);

    assert!(matches!(outcome, ExportOutcome::Failed { .. }));
    assert_single_terminal(&events);
    assert_eq!(events.last().unwrap().status, ExportStatus::Error);
    assert_all_released(&backend);
}

#[test]
fn renderer_failure_is_fatal() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("render-fail.mp4", 1000, small_settings(10));
    let mut renderer = FailingRenderer { calls: 0 };
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, false);

    let ExportOutcome::Failed { message } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(message.contains("compositor lost its layers"));
    assert_single_terminal(&events);
    assert_eq!(events.last().unwrap().current_frame, 2);
    assert_all_released(&backend);
}

#[test]
fn gaps_are_skipped_but_timing_advances() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("gaps.mp4", 1000, small_settings(10));
    let mut renderer = GapRenderer {
        inner: TestPatternRenderer::new(TestPattern::Bars, 16, 8),
        calls: 0,
    };
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, false);

    let ExportOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.total_frames, 10);
    assert_eq!(summary.frames_encoded, 5);
    assert_eq!(count(&events, ExportStatus::Encoding), 10);

    let pts: Vec<_> = backend.container_logs()[0]
        .samples_for(TrackKind::Video)
        .iter()
        .map(|s| s.presentation_time_us)
        .collect();
    assert_eq!(pts, [0, 200_000, 400_000, 600_000, 800_000]);
}

#[test]
fn zero_length_project_completes_without_frames() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("empty.mp4", 0, small_settings(30));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, events) = run_with(backend, &request, &mut renderer, false);

    assert!(matches!(outcome, ExportOutcome::Completed(ref s) if s.total_frames == 0));
    assert_eq!(count(&events, ExportStatus::Encoding), 0);
    assert_eq!(events.last().unwrap().progress_percent, 100.0);
}

#[test]
fn absurd_duration_fails_before_anything_is_created() {
    let backend = Arc::new(MemoryBackend::default());
    let request = request("forever.mp4", u64::MAX / 4, small_settings(10));
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let (outcome, events) = run_with(Arc::clone(&backend), &request, &mut renderer, false);

    assert!(matches!(outcome, ExportOutcome::Failed { .. }));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, ExportStatus::Error);
    assert!(events[0].message.as_deref().unwrap().contains("exceeds"));
    assert!(backend.codec_logs().is_empty());
    assert!(backend.container_logs().is_empty());
}

#[test]
fn day_long_project_at_high_rate_is_counted() {
    // Validation only; the export itself is cancelled up front.
    let backend = Arc::new(MemoryBackend::default());
    let request = request(
        "day.mp4",
        ProjectSnapshot::MAX_DURATION_MS,
        small_settings(240),
    );
    let mut pipeline = ExportPipeline::new(backend, EngineConfig::default());
    let mut renderer = TestPatternRenderer::new(TestPattern::Bars, 16, 8);
    let cancel = AtomicBool::new(true);
    let events = Mutex::new(Vec::new());
    let outcome = pipeline.run(&request, &mut renderer, None, &cancel, &|p| {
        events.lock().unwrap().push(p)
    });

    assert!(matches!(outcome, ExportOutcome::Cancelled { frames_processed: 0 }));
    let events = events.into_inner().unwrap();
    assert_single_terminal(&events);
    assert_eq!(events[0].status, ExportStatus::Preparing);
    assert_eq!(events[0].total_frames, 20_736_000);
}

fn slow_service()-> (ExportService, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new(MemoryBackendOptions {
        encode_delay: Duration::from_millis(15),
        ..Default::default()
    }));
    let service = ExportService::new(
        Arc::clone(&backend) as Arc<dyn snapcut_export_engine::MediaBackend>,
        EngineConfig::default(),
        Arc::new(TestPatternProvider::new(TestPattern::Bars, true)),
    );
    (service, backend)
}

#[test]
fn cancel_mid_encode_ends_with_single_cancelled_event() {
    let (service, backend) = slow_service();
    let mut stream = service
        .export_project_custom(
            ProjectSnapshot::new("cancel", 10_000),
            small_settings(30),
            output_path("cancel.mp4"),
        )
        .unwrap();

    let mut events = Vec::new();
    let mut requested = false;
    while let Some(progress) = stream.blocking_next() {
        if !requested && progress.status == ExportStatus::Encoding && progress.current_frame >= 3 {
            assert!(service.cancel_export());
            requested = true;
        }
        events.push(progress);
    }

    assert!(requested);
    assert_single_terminal(&events);
    let last = events.last().unwrap();
    assert_eq!(last.status, ExportStatus::Cancelled);
    assert!(last.current_frame < 300);
    assert_eq!(count(&events, ExportStatus::Finalizing), 0);
    assert_all_released(&backend);
    assert!(!service.is_exporting());
}

#[test]
fn repeated_cancelled_exports_leave_nothing_behind() {
    let (service, backend) = slow_service();
    for round in 0..3 {
        let mut stream = service
            .export_project_custom(
                ProjectSnapshot::new(format!("round-{round}"), 5_000),
                small_settings(30),
                output_path(&format!("round-{round}.mp4")),
            )
            .unwrap();
        let mut statuses = Vec::new();
        while let Some(progress) = stream.blocking_next() {
            if progress.status == ExportStatus::Preparing {
                service.cancel_export();
            }
            statuses.push(progress.status);
        }
        assert_eq!(statuses.last(), Some(&ExportStatus::Cancelled));
        assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
    }
    assert_all_released(&backend);
    assert_eq!(backend.container_logs().len(), 3);
}

#[tokio::test]
async fn preset_export_through_service() {
    let backend = Arc::new(MemoryBackend::default());
    let service = ExportService::new(
        backend,
        EngineConfig::default(),
        Arc::new(TestPatternProvider::new(TestPattern::Solid([255, 0, 0, 255]), true)),
    );
    let events = service
        .export_project(
            ProjectSnapshot::new("preset", 100),
            "web-webm",
            output_path("preset.webm"),
        )
        .unwrap()
        .collect_until_terminal()
        .await;

    let last = events.last().unwrap();
    assert_eq!(last.status, ExportStatus::Completed, "{events:?}");
    assert_eq!(last.total_frames, 3);
}

#[test]
fn progress_events_serialize_for_observers() {
    let progress = ExportProgress::encoding(5, 20, 25.0, 100, 300);
    let json = serde_json::to_value(&progress).unwrap();
    assert_eq!(json["status"], "encoding");
    assert_eq!(json["current_frame"], 5);
    assert!(json.get("message").is_none());
}
