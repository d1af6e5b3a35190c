//! Offline export: walk the asset frame by frame, filter each frame and
//! append it to a writer.
//!
//! The loop is paced by the decoder and the writer's buffer pool, never by
//! the display clock, and runs on a blocking worker. A frame the decoder has
//! not produced when its turn comes is dropped rather than retried, so an
//! export can never stall indefinitely; the report counts those drops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result, VideoFxError};
use crate::filters::Filter;
use crate::pipeline::events::{EngineEvent, EventSender};
use crate::pipeline::handoff::remove_artifact;
use crate::pipeline::pool::PixelFormat;
use crate::pipeline::stage::FilterStage;
use crate::pipeline::writer::{Container, VideoCodec, VideoWriter, WriterFactory, WriterSettings};
use crate::video::session::VideoSession;
use crate::video::source::FrameSource;
use crate::video::time::MediaTime;
use crate::video::types::DecodedFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Writing,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportState::Completed | ExportState::Failed | ExportState::Cancelled
        )
    }
}

/// Cooperative cancellation flag, checked once per frame
#[derive(Debug, Clone, Default)]
pub struct ExportCancel {
    flag: Arc<AtomicBool>,
}

impl ExportCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    /// Temporary artifact, valid until handed off
    pub output: PathBuf,
    pub frames_appended: u64,
    pub frames_dropped: u64,
    pub total_frames: u64,
}

/// State of one export run
#[derive(Debug)]
pub struct ExportJob {
    state: ExportState,
    output: PathBuf,
    cursor: u64,
    total_frames: u64,
    progress: f64,
    appended: u64,
    dropped: u64,
    last_time: Option<MediaTime>,
}

impl ExportJob {
    pub fn new(output: PathBuf, total_frames: u64) -> Self {
        Self {
            state: ExportState::Idle,
            output,
            cursor: 0,
            total_frames,
            progress: 0.0,
            appended: 0,
            dropped: 0,
            last_time: None,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Last reported progress
    pub fn progress(&self) -> f64 {
        self.progress
    }

    fn transition(&mut self, next: ExportState) {
        debug!("Export {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Record progress, never moving backwards or leaving [0, 1]
    fn advance_progress(&mut self, fraction: f64) -> f64 {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.progress = self.progress.max(fraction);
        self.progress
    }

    fn report(&self) -> ExportReport {
        ExportReport {
            output: self.output.clone(),
            frames_appended: self.appended,
            frames_dropped: self.dropped,
            total_frames: self.total_frames,
        }
    }
}

/// A job and the writer it will feed; setup errors are already behind us
pub struct PreparedExport {
    pub job: ExportJob,
    writer: Box<dyn VideoWriter>,
}

/// `<prefix>_<yyyyMMdd_HHmmss>.mp4` inside `dir`
pub fn output_path(dir: &Path, prefix: &str, at: NaiveDateTime) -> PathBuf {
    dir.join(format!("{}_{}.mp4", prefix, at.format("%Y%m%d_%H%M%S")))
}

pub struct ExportPipeline {
    config: ExportConfig,
    stage: Arc<FilterStage>,
    filter: Arc<dyn Filter>,
    events: EventSender,
    cancel: ExportCancel,
}

impl ExportPipeline {
    pub fn new(
        config: ExportConfig,
        stage: Arc<FilterStage>,
        filter: Arc<dyn Filter>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            stage,
            filter,
            events,
            cancel: ExportCancel::new(),
        }
    }

    pub fn cancel_handle(&self) -> ExportCancel {
        self.cancel.clone()
    }

    /// H.264 in MP4 at the session's presentation size, fed BGRA
    pub fn writer_settings(&self, session: &VideoSession) -> WriterSettings {
        let (width, height) = session.presentation_size();
        WriterSettings {
            codec: VideoCodec::H264,
            container: Container::Mp4,
            pixel_format: PixelFormat::Bgra32,
            width,
            height,
            frame_rate: session.nominal_frame_rate(),
            encoder: self.config.codec.clone(),
            crf: self.config.crf(),
            pool_capacity: self.config.pool_capacity,
        }
    }

    /// Validate settings and construct the writer
    ///
    /// Everything that can fail here is fatal and happens before any frame
    /// is requested.
    pub fn prepare(&self, source: &FrameSource, factory: &dyn WriterFactory) -> Result<PreparedExport> {
        let settings = self.writer_settings(source.session());
        factory.can_apply(&settings)?;

        let dir = self.config.work_dir();
        std::fs::create_dir_all(&dir).map_err(|e| ExportError::WriterSetup {
            reason: format!("Cannot create work directory {}: {}", dir.display(), e),
        })?;
        let output = output_path(&dir, &self.config.file_prefix, Local::now().naive_local());

        let writer = factory.create(&output, &settings)?;
        let job = ExportJob::new(output, source.session().total_frames());

        Ok(PreparedExport { job, writer })
    }

    /// Run a prepared export to completion. Blocks.
    pub fn run(&self, source: &mut FrameSource, prepared: PreparedExport) -> Result<ExportReport> {
        let PreparedExport { mut job, mut writer } = prepared;

        if let Err(e) = self.write_frames(source, &mut job, writer.as_mut()) {
            let cancelled = matches!(e, VideoFxError::Export(ExportError::Cancelled));
            writer.cancel_writing();
            job.transition(if cancelled {
                ExportState::Cancelled
            } else {
                ExportState::Failed
            });
            warn!("Export to {} stopped: {}", job.output.display(), e);
            return Err(e);
        }

        writer.mark_input_finished();
        job.transition(ExportState::Finalizing);
        if let Err(e) = writer.finish_writing() {
            job.transition(ExportState::Failed);
            if let Err(cleanup) = remove_artifact(&job.output) {
                warn!("{}", cleanup);
            }
            warn!("Finalizing {} failed: {}", job.output.display(), e);
            return Err(e);
        }

        source.seek(MediaTime::ZERO);
        job.transition(ExportState::Completed);

        let report = job.report();
        info!(
            "Export complete: {} of {} frames ({} dropped) -> {}",
            report.frames_appended,
            report.total_frames,
            report.frames_dropped,
            report.output.display()
        );
        Ok(report)
    }

    fn write_frames(
        &self,
        source: &mut FrameSource,
        job: &mut ExportJob,
        writer: &mut dyn VideoWriter,
    ) -> Result<()> {
        job.transition(ExportState::Writing);
        info!(
            "Exporting {} frames of {} with filter {}",
            job.total_frames,
            source.session().locator().display(),
            self.filter.name()
        );

        source.seek(MediaTime::ZERO);
        writer.start_session(MediaTime::ZERO)?;

        let throttle = Duration::from_millis(self.config.frame_throttle_ms);
        let total = job.total_frames;
        let mut next_milestone = 0.1;

        for index in 0..total {
            if self.cancel.is_cancelled() {
                return Err(ExportError::Cancelled.into());
            }
            job.cursor = index;

            if !throttle.is_zero() {
                std::thread::sleep(throttle);
            }

            let progress = job.advance_progress(index as f64 / total as f64);
            self.events.send(EngineEvent::ExportProgress(progress));
            if progress >= next_milestone {
                info!("Export {:.0}%", progress * 100.0);
                next_milestone += 0.1;
            }

            let at = source.current_time();
            match source.fetch(at) {
                Some(frame) => self.append(source, job, writer, frame)?,
                None => {
                    debug!("No new frame at {}, dropping frame {}", at, index);
                    job.dropped += 1;
                }
            }

            source.advance_step(1);
        }

        job.cursor = total;
        let progress = job.advance_progress(1.0);
        self.events.send(EngineEvent::ExportProgress(progress));
        Ok(())
    }

    fn append(
        &self,
        source: &FrameSource,
        job: &mut ExportJob,
        writer: &mut dyn VideoWriter,
        frame: DecodedFrame,
    ) -> Result<()> {
        let at = frame.presentation_time;
        if matches!(job.last_time, Some(last) if at < last) {
            warn!("Frame at {} is earlier than the last appended frame, dropping it", at);
            job.dropped += 1;
            return Ok(());
        }

        let filtered = self
            .stage
            .apply(frame, source.session().transform(), self.filter.as_ref())?;

        let pool = writer.pixel_buffer_pool();
        let buffer = match self.config.buffer_wait_secs {
            0 => Some(pool.borrow()),
            secs => pool.borrow_timeout(Duration::from_secs(secs)),
        };
        let mut buffer = buffer.ok_or_else(|| ExportError::AppendFailed {
            reason: "writer did not return a pixel buffer".to_string(),
        })?;
        let (width, height) = (buffer.width(), buffer.height());
        filtered.image.write_bgra(buffer.as_bytes_mut(), width, height);

        writer.append(buffer, at)?;
        job.last_time = Some(at);
        job.appended += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::filters::IdentityFilter;
    use crate::pipeline::events::main_queue;
    use crate::pipeline::writer::RecordingWriterFactory;
    use crate::video::synthetic::{SyntheticAsset, SyntheticLoader};
    use chrono::NaiveDate;
    use tempfile::{tempdir, TempDir};

    fn source_for(asset: SyntheticAsset) -> FrameSource {
        let loader = SyntheticLoader::new();
        loader.register("clip.mp4", asset);
        FrameSource::open(Arc::new(loader), Path::new("clip.mp4"), &SourceConfig::default()).unwrap()
    }

    fn pipeline(dir: &TempDir) -> (ExportPipeline, crate::pipeline::events::MainQueue) {
        let config = ExportConfig {
            frame_throttle_ms: 0,
            work_dir: Some(dir.path().to_path_buf()),
            ..ExportConfig::default()
        };
        let (tx, queue) = main_queue();
        let pipeline = ExportPipeline::new(
            config,
            Arc::new(FilterStage::new(1).unwrap()),
            Arc::new(IdentityFilter),
            tx,
        );
        (pipeline, queue)
    }

    fn progress(queue: &mut crate::pipeline::events::MainQueue) -> Vec<f64> {
        queue
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::ExportProgress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_output_name() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(
            output_path(Path::new("/tmp"), "Output", at),
            PathBuf::from("/tmp/Output_20240102_030405.mp4")
        );
    }

    #[test]
    fn test_exports_every_frame() {
        let dir = tempdir().unwrap();
        let (pipeline, mut queue) = pipeline(&dir);
        let mut source = source_for(SyntheticAsset::new(1.0, 30.0, 8, 6));
        let factory = RecordingWriterFactory::new();

        let prepared = pipeline.prepare(&source, &factory).unwrap();
        assert_eq!(prepared.job.total_frames(), 30);
        let report = pipeline.run(&mut source, prepared).unwrap();

        assert_eq!(report.frames_appended, 30);
        assert_eq!(report.frames_dropped, 0);
        assert!(report.output.exists());

        let recording = factory.recording();
        assert_eq!(recording.timestamps.len(), 30);
        assert!(recording.timestamps.windows(2).all(|w| w[0] <= w[1]));
        assert!(recording.input_finished && recording.finished);

        let fractions = progress(&mut queue);
        assert_eq!(fractions.len(), 31);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fractions.last().copied(), Some(1.0));

        // Left at the start, ready for preview
        assert_eq!(source.current_time(), MediaTime::ZERO);
    }

    #[test]
    fn test_unbounded_buffer_wait() {
        let dir = tempdir().unwrap();
        let config = ExportConfig {
            frame_throttle_ms: 0,
            buffer_wait_secs: 0,
            pool_capacity: 1,
            work_dir: Some(dir.path().to_path_buf()),
            ..ExportConfig::default()
        };
        let (tx, _queue) = main_queue();
        let pipeline = ExportPipeline::new(
            config,
            Arc::new(FilterStage::new(1).unwrap()),
            Arc::new(IdentityFilter),
            tx,
        );
        let mut source = source_for(SyntheticAsset::new(1.0, 10.0, 4, 4));
        let factory = RecordingWriterFactory::new();

        let prepared = pipeline.prepare(&source, &factory).unwrap();
        let report = pipeline.run(&mut source, prepared).unwrap();
        assert_eq!(report.frames_appended, 10);
    }

    #[test]
    fn test_frames_are_filtered_and_swizzled() {
        let dir = tempdir().unwrap();
        let (pipeline, _queue) = pipeline(&dir);
        let asset = SyntheticAsset::new(0.2, 10.0, 2, 2);
        let expected = asset.frame_color(1);
        let mut source = source_for(asset);
        let factory = RecordingWriterFactory::new();

        let prepared = pipeline.prepare(&source, &factory).unwrap();
        pipeline.run(&mut source, prepared).unwrap();

        let [r, g, b, a] = expected;
        assert_eq!(factory.recording().first_pixels[1], [b, g, r, a]);
    }

    #[test]
    fn test_missing_frames_are_dropped() {
        let dir = tempdir().unwrap();
        let (pipeline, mut queue) = pipeline(&dir);
        let mut source = source_for(SyntheticAsset::new(0.5, 10.0, 2, 2).with_stalled_decoders(1));
        let factory = RecordingWriterFactory::new();

        let prepared = pipeline.prepare(&source, &factory).unwrap();
        let report = pipeline.run(&mut source, prepared).unwrap();

        assert_eq!(report.total_frames, 5);
        assert_eq!(report.frames_appended, 0);
        assert_eq!(report.frames_dropped, 5);
        assert_eq!(progress(&mut queue).last().copied(), Some(1.0));
    }

    #[test]
    fn test_rotated_source_sets_writer_size() {
        let dir = tempdir().unwrap();
        let (pipeline, _queue) = pipeline(&dir);
        let source = source_for(SyntheticAsset::new(1.0, 10.0, 8, 4).with_rotation(90.0));

        let settings = pipeline.writer_settings(source.session());
        assert_eq!((settings.width, settings.height), (4, 8));
        assert_eq!(settings.pixel_format, PixelFormat::Bgra32);
    }

    #[test]
    fn test_cancel_discards_output() {
        let dir = tempdir().unwrap();
        let (pipeline, _queue) = pipeline(&dir);
        let mut source = source_for(SyntheticAsset::new(1.0, 10.0, 2, 2));
        let factory = RecordingWriterFactory::new();

        let prepared = pipeline.prepare(&source, &factory).unwrap();
        let output = prepared.job.output().to_path_buf();
        pipeline.cancel_handle().cancel();

        let err = pipeline.run(&mut source, prepared).unwrap_err();
        assert!(matches!(err, VideoFxError::Export(ExportError::Cancelled)));
        assert!(!output.exists());
        assert!(factory.recording().cancelled);
    }

    #[test]
    fn test_finalize_failure_discards_output() {
        let dir = tempdir().unwrap();
        let (pipeline, _queue) = pipeline(&dir);
        let mut source = source_for(SyntheticAsset::new(0.3, 10.0, 2, 2));
        let factory = RecordingWriterFactory::new().failing_finalize();

        let prepared = pipeline.prepare(&source, &factory).unwrap();
        let output = prepared.job.output().to_path_buf();

        let err = pipeline.run(&mut source, prepared).unwrap_err();
        assert!(matches!(err, VideoFxError::Export(ExportError::FinalizeFailed { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_rejected_settings_fail_setup() {
        let dir = tempdir().unwrap();
        let (pipeline, _queue) = pipeline(&dir);
        let source = source_for(SyntheticAsset::new(1.0, 10.0, 2, 2));
        let factory = RecordingWriterFactory::new().rejecting("no h264");

        assert!(matches!(
            pipeline.prepare(&source, &factory),
            Err(VideoFxError::Export(ExportError::UnsupportedSettings { .. }))
        ));
        assert!(factory.recording().output.is_none());
    }

    #[test]
    fn test_progress_never_goes_backwards() {
        let mut job = ExportJob::new(PathBuf::from("x.mp4"), 10);
        assert_eq!(job.advance_progress(0.5), 0.5);
        assert_eq!(job.advance_progress(0.2), 0.5);
        assert_eq!(job.advance_progress(3.0), 1.0);
        assert_eq!(job.advance_progress(f64::NAN), 1.0);
    }
}
