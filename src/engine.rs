//! The single-owner handle over one frame source and its two consumers.
//!
//! Every entry point checks [`Mode`] first. Preview runs inline on the
//! caller's (main) context through `tick`; export moves the frame source
//! into a blocking worker and hands it back when it finishes. While the
//! source is away every entry point that needs it fails with `Busy`.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{EngineError, ExportError, Result, VideoFxError};
use crate::filters::{Filter, FilterConfig, FilterRegistry};
use crate::pipeline::events::{main_queue, EngineEvent, EventSender, MainQueue};
use crate::pipeline::export::{ExportCancel, ExportPipeline, ExportReport};
use crate::pipeline::handoff::{hand_off_and_cleanup, remove_artifact, HandOff};
use crate::pipeline::preview::PreviewLoop;
use crate::pipeline::stage::FilterStage;
use crate::pipeline::writer::WriterFactory;
use crate::video::asset::AssetLoader;
use crate::video::session::VideoSession;
use crate::video::source::FrameSource;
use crate::video::time::MediaTime;

/// Which consumer currently owns the frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Previewing,
    Exporting,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Idle => "idle",
            Mode::Previewing => "previewing",
            Mode::Exporting => "exporting",
        };
        f.write_str(name)
    }
}

struct RunningExport {
    handle: JoinHandle<(FrameSource, Result<ExportReport>)>,
    cancel: ExportCancel,
    output: PathBuf,
    locator: PathBuf,
}

pub struct EffectsEngine {
    config: Config,
    loader: Arc<dyn AssetLoader>,
    writer_factory: Arc<dyn WriterFactory>,
    registry: FilterRegistry,
    filter_config: FilterConfig,
    filter: Arc<dyn Filter>,
    stage: Arc<FilterStage>,
    preview: PreviewLoop,
    source: Option<FrameSource>,
    export: Option<RunningExport>,
    mode: Mode,
    events: EventSender,
}

impl EffectsEngine {
    /// Create an engine and the queue its events arrive on
    pub fn new(
        config: Config,
        loader: Arc<dyn AssetLoader>,
        writer_factory: Arc<dyn WriterFactory>,
    ) -> Result<(Self, MainQueue)> {
        config.validate()?;

        let registry = FilterRegistry::new();
        let filter_config = config.filter.clone();
        let filter = registry.create(&filter_config)?;
        let stage = Arc::new(FilterStage::new(config.export.render_threads)?);
        let (events, queue) = main_queue();
        let preview = PreviewLoop::new(Arc::clone(&stage), events.clone());

        let engine = Self {
            config,
            loader,
            writer_factory,
            registry,
            filter_config,
            filter,
            stage,
            preview,
            source: None,
            export: None,
            mode: Mode::Idle,
            events,
        };
        Ok((engine, queue))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry used by `set_filter`; register custom filters here
    pub fn registry_mut(&mut self) -> &mut FilterRegistry {
        &mut self.registry
    }

    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter_config
    }

    /// The open session, unless an export has the source
    pub fn session(&self) -> Option<&VideoSession> {
        self.source.as_ref().map(FrameSource::session)
    }

    pub fn is_paused(&self) -> bool {
        self.preview.is_paused()
    }

    /// Normalized preview position
    pub fn position(&self) -> f64 {
        self.preview.position()
    }

    /// Open `locator`, replacing any open asset, and show its first frame
    pub fn open(&mut self, locator: &Path) -> Result<()> {
        self.guard("open a video", &[Mode::Idle, Mode::Previewing])?;

        let mut source = FrameSource::open(Arc::clone(&self.loader), locator, &self.config.source)?;
        self.preview.reset();
        self.mode = Mode::Idle;
        self.preview.seek(&mut source, self.filter.as_ref(), 0.0);
        self.source = Some(source);
        Ok(())
    }

    /// Switch filters; the frame on screen is re-rendered with the new one
    ///
    /// A running export keeps the filter it started with.
    pub fn set_filter(&mut self, config: FilterConfig) -> Result<()> {
        config.validate()?;
        let filter = self.registry.create(&config)?;
        info!("Filter set to {} ({:.2})", config.name, config.intensity);
        self.filter = filter;
        self.filter_config = config;

        if let Some(source) = &self.source {
            self.preview.refresh(source, self.filter.as_ref());
        }
        Ok(())
    }

    /// Start clock-driven preview at host time `host` (seconds)
    pub fn play(&mut self, host: f64) -> Result<()> {
        self.guard("play", &[Mode::Idle, Mode::Previewing])?;
        let source = self.source.as_mut().ok_or(EngineError::NoSession)?;
        self.preview.play(source, host);
        self.mode = Mode::Previewing;
        Ok(())
    }

    pub fn pause(&mut self, host: f64) -> Result<()> {
        self.guard("pause", &[Mode::Idle, Mode::Previewing])?;
        if let Some(source) = self.source.as_mut() {
            self.preview.pause(source, host);
        }
        self.mode = Mode::Idle;
        Ok(())
    }

    /// One display refresh
    ///
    /// While paused this only retries a scrub whose frame was not ready.
    pub fn tick(&mut self, host: f64) -> Result<()> {
        self.guard("tick", &[Mode::Idle, Mode::Previewing])?;
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        self.preview.tick(source, self.filter.as_ref(), host);
        if self.mode == Mode::Previewing && self.preview.is_paused() {
            self.mode = Mode::Idle;
        }
        Ok(())
    }

    /// Scrub to a normalized position, showing the frame there
    pub fn seek_normalized(&mut self, fraction: f64) -> Result<()> {
        self.guard("seek", &[Mode::Idle, Mode::Previewing])?;
        let source = self.source.as_mut().ok_or(EngineError::NoSession)?;
        self.preview.seek(source, self.filter.as_ref(), fraction);
        Ok(())
    }

    /// Pause preview and start exporting on a blocking worker
    ///
    /// Writer setup happens before this returns, so setup errors surface
    /// here and leave the engine idle with its source intact. Returns the
    /// temporary output path.
    pub fn start_export(&mut self) -> Result<PathBuf> {
        self.guard("start export", &[Mode::Idle, Mode::Previewing])?;
        let source = self.source.as_mut().ok_or(EngineError::NoSession)?;

        if self.mode == Mode::Previewing {
            let host = source.last_host_time();
            self.preview.pause(source, host);
            self.mode = Mode::Idle;
        }

        let pipeline = ExportPipeline::new(
            self.config.export.clone(),
            Arc::clone(&self.stage),
            Arc::clone(&self.filter),
            self.events.clone(),
        );
        let prepared = pipeline.prepare(source, self.writer_factory.as_ref())?;
        let mut source = self.source.take().ok_or(EngineError::NoSession)?;

        let output = prepared.job.output().to_path_buf();
        let locator = source.session().locator().to_path_buf();
        let cancel = pipeline.cancel_handle();
        let events = self.events.clone();
        let artifact = output.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let run = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&mut source, prepared)));
            let result = run.unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                error!("Export worker panicked: {}", reason);
                if let Err(e) = remove_artifact(&artifact) {
                    warn!("{}", e);
                }
                source.seek(MediaTime::ZERO);
                Err(ExportError::WorkerPanicked { reason }.into())
            });
            match &result {
                Ok(report) => events.send(EngineEvent::ExportCompleted(report.clone())),
                Err(e) => events.send(EngineEvent::ExportFailed {
                    reason: e.user_message(),
                    cancelled: matches!(e, VideoFxError::Export(ExportError::Cancelled)),
                }),
            }
            (source, result)
        });

        info!("Export started -> {}", output.display());
        self.export = Some(RunningExport {
            handle,
            cancel,
            output: output.clone(),
            locator,
        });
        self.mode = Mode::Exporting;
        Ok(output)
    }

    /// Ask the running export to stop at the next frame boundary
    pub fn cancel_export(&self) -> Result<()> {
        let export = self.export.as_ref().ok_or(EngineError::NoExport)?;
        debug!("Cancelling export to {}", export.output.display());
        export.cancel.cancel();
        Ok(())
    }

    /// Wait for the running export and take the frame source back
    pub async fn finish_export(&mut self) -> Result<ExportReport> {
        let export = self.export.take().ok_or(EngineError::NoExport)?;
        let joined = export.handle.await;
        self.mode = Mode::Idle;

        match joined {
            Ok((source, result)) => {
                self.source = Some(source);
                self.preview.reset();
                result
            }
            Err(e) => {
                // The source went down with the worker, open it again
                error!("Export worker for {} died: {}", export.output.display(), e);
                let reason = format!("Export worker failed: {}", e);
                self.events.send(EngineEvent::ExportFailed {
                    reason: reason.clone(),
                    cancelled: false,
                });
                if let Err(e) = remove_artifact(&export.output) {
                    warn!("{}", e);
                }
                match FrameSource::open(Arc::clone(&self.loader), &export.locator, &self.config.source) {
                    Ok(source) => {
                        self.source = Some(source);
                        self.preview.reset();
                    }
                    Err(e) => warn!("Cannot reopen {}: {}", export.locator.display(), e),
                }
                Err(VideoFxError::generic(reason))
            }
        }
    }

    /// Give a finished export to `handoff`, then delete the local artifact
    ///
    /// The artifact is deleted whether or not the hand-off succeeds, unless
    /// it was persisted in place.
    pub async fn hand_off(&self, report: &ExportReport, handoff: Arc<dyn HandOff>) -> Result<PathBuf> {
        let artifact = report.output.clone();
        let result = hand_off_and_cleanup(handoff, artifact.clone()).await;

        self.events.send(EngineEvent::HandOffCompleted {
            artifact,
            persisted: result.as_ref().cloned().map_err(|e| e.user_message()),
        });
        result
    }

    fn guard(&self, requested: &'static str, allowed: &[Mode]) -> Result<()> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(EngineError::Busy {
                requested,
                current: self.mode,
            }
            .into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
