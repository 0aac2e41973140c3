//! Export request surface.
//!
//! Each export runs on its own named worker thread. Progress flows back
//! through an unbounded channel, so a slow observer never stalls encoding
//! and a dropped observer only loses events. A panic inside the worker is
//! caught and reported as the export's `Error` event.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use snapcut_common::clock::Stopwatch;
use snapcut_common::config::EngineConfig;
use snapcut_common::error::{SnapcutError, SnapcutResult};
use snapcut_export_model::{
    find_preset, preset_catalog, ExportPreset, ExportProgress, ExportSettings, ProjectSnapshot,
};

use crate::codec::MediaBackend;
use crate::pipeline::{ExportPipeline, ExportRequest};
use crate::render::RendererProvider;

type CancelSlot = Arc<Mutex<Option<Arc<AtomicBool>>>>;

/// Ordered progress events of one export.
///
/// The stream ends after the terminal event, once the worker has exited.
#[derive(Debug)]
pub struct ProgressStream {
    receiver: mpsc::UnboundedReceiver<ExportProgress>,
}

impl ProgressStream {
    /// Next event, or `None` once the export has finished.
    pub async fn next(&mut self) -> Option<ExportProgress> {
        self.receiver.recv().await
    }

    /// Blocking variant of [`next`](Self::next). Must not be called from
    /// inside an async runtime.
    pub fn blocking_next(&mut self) -> Option<ExportProgress> {
        self.receiver.blocking_recv()
    }

    /// Gather events up to and including the terminal one.
    pub async fn collect_until_terminal(mut self) -> Vec<ExportProgress> {
        let mut events = Vec::new();
        while let Some(progress) = self.next().await {
            let terminal = progress.is_terminal();
            events.push(progress);
            if terminal {
                break;
            }
        }
        events
    }
}

/// Starts exports and tracks the one that `cancel_export` applies to.
pub struct ExportService {
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    renderers: Arc<dyn RendererProvider>,
    current: CancelSlot,
    exports_started: AtomicU64,
}

impl ExportService {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        config: EngineConfig,
        renderers: Arc<dyn RendererProvider>,
    ) -> Self {
        Self {
            backend,
            config,
            renderers,
            current: Arc::new(Mutex::new(None)),
            exports_started: AtomicU64::new(0),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// The static preset catalog.
    pub fn available_presets(&self) -> Vec<ExportPreset> {
        preset_catalog()
    }

    /// Export with a catalog preset. An unknown id fails before anything starts.
    pub fn export_project(
        &self,
        project: ProjectSnapshot,
        preset_id: &str,
        output_path: impl Into<PathBuf>,
    ) -> SnapcutResult<ProgressStream> {
        let preset = find_preset(preset_id)
            .ok_or_else(|| SnapcutError::config(format!("Unknown export preset: {preset_id}")))?;
        tracing::debug!(preset = %preset.id, platform = preset.platform.as_str(), "Resolved preset");
        self.export_project_custom(project, preset.settings, output_path)
    }

    /// Export with explicit settings. Invalid settings surface as an `Error` event.
    pub fn export_project_custom(
        &self,
        project: ProjectSnapshot,
        settings: ExportSettings,
        output_path: impl Into<PathBuf>,
    ) -> SnapcutResult<ProgressStream> {
        let request = ExportRequest {
            project,
            settings,
            output_path: output_path.into(),
        };
        let (sender, receiver) = mpsc::unbounded_channel();

        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_some() {
                tracing::warn!("Starting an export while another is tracked; cancel now targets the new one");
            }
            *current = Some(Arc::clone(&cancel));
        }

        let id = self.exports_started.fetch_add(1, Ordering::Relaxed) + 1;
        let backend = Arc::clone(&self.backend);
        let renderers = Arc::clone(&self.renderers);
        let engine = self.config.clone();
        let tracked = TrackedExport {
            slot: Arc::clone(&self.current),
            cancel: Arc::clone(&cancel),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("snapcut-export-{id}"))
            .spawn(move || {
                let events = WorkerEvents::new(sender);
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_worker(request, backend, renderers, engine, &tracked.cancel, &events)
                }));
                if let Err(payload) = result {
                    events.worker_panicked(payload.as_ref());
                }
                // Close the channel only after the slot is cleared.
                drop(tracked);
                drop(events);
            });

        if let Err(e) = spawned {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|tracked| Arc::ptr_eq(tracked, &cancel)) {
                *current = None;
            }
            return Err(SnapcutError::setup(format!("cannot spawn export worker: {e}")));
        }
        Ok(ProgressStream { receiver })
    }

    /// Ask the running export to stop after its current frame.
    ///
    /// Returns `false` when no export is running.
    pub fn cancel_export(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                tracing::info!("Export cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Whether an export is currently tracked.
    pub fn is_exporting(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Untracks the worker's cancel flag when dropped, unwinding included.
struct TrackedExport {
    slot: CancelSlot,
    cancel: Arc<AtomicBool>,
}

impl Drop for TrackedExport {
    fn drop(&mut self) {
        let mut current = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if current
            .as_ref()
            .is_some_and(|tracked| Arc::ptr_eq(tracked, &self.cancel))
        {
            *current = None;
        }
    }
}

/// The worker's side of the progress channel.
struct WorkerEvents {
    sender: mpsc::UnboundedSender<ExportProgress>,
    stopwatch: Stopwatch,
    observer_gone: Cell<bool>,
    terminal_sent: Cell<bool>,
    /// `(current_frame, total_frames)` of the last event.
    position: Cell<(u64, u64)>,
}

impl WorkerEvents {
    fn new(sender: mpsc::UnboundedSender<ExportProgress>) -> Self {
        Self {
            sender,
            stopwatch: Stopwatch::start(),
            observer_gone: Cell::new(false),
            terminal_sent: Cell::new(false),
            position: Cell::new((0, 0)),
        }
    }

    fn emit(&self, progress: ExportProgress) {
        if self.terminal_sent.get() {
            return;
        }
        self.position.set((progress.current_frame, progress.total_frames));
        self.terminal_sent.set(progress.is_terminal());
        if self.sender.send(progress).is_err() && !self.observer_gone.replace(true) {
            tracing::warn!("Progress observer dropped, continuing export without it");
        }
    }

    /// Report a caught panic unless the export already ended.
    fn worker_panicked(&self, payload: &(dyn Any + Send)) {
        let reason = panic_reason(payload);
        let (current, total) = self.position.get();
        tracing::error!(frame = current, error = %reason, "Export worker panicked");
        self.emit(ExportProgress::error(
            current,
            total,
            self.stopwatch.elapsed_ms(),
            format!("export worker panicked: {reason}"),
        ));
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason
    } else {
        "unknown panic payload"
    }
}

fn run_worker(
    request: ExportRequest,
    backend: Arc<dyn MediaBackend>,
    renderers: Arc<dyn RendererProvider>,
    engine: EngineConfig,
    cancel: &AtomicBool,
    events: &WorkerEvents,
) {
    let emit = |progress: ExportProgress| events.emit(progress);

    let mut renderer = match renderers.renderer(&request.project, &request.settings) {
        Ok(renderer) => renderer,
        Err(e) => {
            tracing::error!(error = %e, "Renderer unavailable");
            emit(ExportProgress::error(0, 0, 0, e.to_string()));
            return;
        }
    };
    let audio = renderers.audio_source(&request.project, &request.settings);

    let mut pipeline = ExportPipeline::new(backend, engine);
    pipeline.run(&request, renderer.as_mut(), audio, cancel, &emit);
}

impl std::fmt::Debug for ExportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportService")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("exports_started", &self.exports_started.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::pool::BitmapPool;
    use crate::render::{AudioSource, FrameRenderer, RgbaFrame, TestPattern, TestPatternProvider};
    use snapcut_export_model::{ExportStatus, Resolution};

    fn service() -> ExportService {
        ExportService::new(
            Arc::new(MemoryBackend::default()),
            EngineConfig::default(),
            Arc::new(TestPatternProvider::new(TestPattern::Bars, false)),
        )
    }

    fn output(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("snapcut-service-{}", std::process::id()))
            .join(name)
    }

    #[tokio::test]
    async fn test_custom_export_streams_to_completion() {
        let service = service();
        let settings = ExportSettings {
            resolution: Resolution::new(32, 18),
            frame_rate: 10,
            ..Default::default()
        };
        let stream = service
            .export_project_custom(ProjectSnapshot::new("stream", 1000), settings, output("stream.mp4"))
            .unwrap();
        let events = stream.collect_until_terminal().await;

        assert_eq!(events.first().unwrap().status, ExportStatus::Preparing);
        assert_eq!(events.last().unwrap().status, ExportStatus::Completed);
        assert_eq!(events.last().unwrap().current_frame, 10);
    }

    #[tokio::test]
    async fn test_unknown_preset_is_rejected_up_front() {
        let service = service();
        let err = service
            .export_project(ProjectSnapshot::new("x", 1000), "vimeo-8k", output("x.mp4"))
            .unwrap_err();
        assert!(err.is_setup());
        assert!(!service.is_exporting());
    }

    #[test]
    fn test_cancel_without_export_is_a_no_op() {
        assert!(!service().cancel_export());
    }

    #[test]
    fn test_blocking_consumer() {
        let service = service();
        let settings = ExportSettings {
            resolution: Resolution::new(8, 8),
            frame_rate: 5,
            ..Default::default()
        };
        let mut stream = service
            .export_project_custom(ProjectSnapshot::new("blocking", 1000), settings, output("b.mp4"))
            .unwrap();
        let mut statuses = Vec::new();
        while let Some(progress) = stream.blocking_next() {
            statuses.push(progress.status);
        }
        assert_eq!(statuses.last(), Some(&ExportStatus::Completed));
        assert_eq!(
            statuses.iter().filter(|s| **s == ExportStatus::Encoding).count(),
            5
        );
    }

    /// Renders normally until 200ms, then panics.
    struct PanickingRenderer;

    impl FrameRenderer for PanickingRenderer {
        fn render_frame(
            &mut self,
            _project: &ProjectSnapshot,
            timestamp_ms: u64,
            pool: &mut BitmapPool,
        ) -> SnapcutResult<Option<RgbaFrame>> {
            if timestamp_ms >= 200 {
                panic!("layer stack corrupted at {timestamp_ms}ms");
            }
            Ok(Some(pool.acquire(8, 8)))
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    struct PanickingProvider;

    impl RendererProvider for PanickingProvider {
        fn renderer(
            &self,
            _project: &ProjectSnapshot,
            _settings: &ExportSettings,
        ) -> SnapcutResult<Box<dyn FrameRenderer>> {
            Ok(Box::new(PanickingRenderer))
        }

        fn audio_source(
            &self,
            _project: &ProjectSnapshot,
            _settings: &ExportSettings,
        ) -> Option<Box<dyn AudioSource>> {
            None
        }
    }

    #[test]
    fn test_renderer_panic_becomes_single_error_event() {
        let backend = Arc::new(MemoryBackend::default());
        let service = ExportService::new(
            Arc::clone(&backend) as Arc<dyn MediaBackend>,
            EngineConfig::default(),
            Arc::new(PanickingProvider),
        );
        let settings = ExportSettings {
            resolution: Resolution::new(8, 8),
            frame_rate: 10,
            ..Default::default()
        };
        let mut stream = service
            .export_project_custom(ProjectSnapshot::new("panic", 1000), settings, output("panic.mp4"))
            .unwrap();

        let mut events = Vec::new();
        while let Some(progress) = stream.blocking_next() {
            events.push(progress);
        }

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let last = events.last().unwrap();
        assert_eq!(last.status, ExportStatus::Error);
        assert_eq!(last.current_frame, 2);
        assert_eq!(last.total_frames, 10);
        assert!(last.message.as_deref().unwrap().contains("layer stack corrupted at 200ms"));
        assert!(!service.is_exporting());
        assert!(!service.cancel_export());

        // Unwinding still released the encoder.
        let codecs = backend.codec_logs();
        assert_eq!(codecs.len(), 1);
        assert_eq!(codecs[0].releases, 1);
    }

    #[test]
    fn test_presets_match_catalog() {
        assert_eq!(service().available_presets(), preset_catalog());
    }
}
