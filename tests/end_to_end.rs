//! End-to-end tests against the synthetic backend and the recording writer.
//!
//! These drive the public engine API the way a UI would: open, scrub, play
//! on a clock, export, hand off.

use std::path::Path;
use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use videofx::error::{EngineError, SourceError, VideoFxError};
use videofx::pipeline::{DirectoryHandOff, EngineEvent, MainQueue, RecordingWriterFactory};
use videofx::video::{SyntheticAsset, SyntheticLoader};
use videofx::{Config, EffectsEngine, FilterConfig, Mode};

struct Harness {
    engine: EffectsEngine,
    queue: MainQueue,
    factory: RecordingWriterFactory,
    _work: TempDir,
}

fn harness(asset: SyntheticAsset) -> Harness {
    let work = tempdir().unwrap();
    let loader = SyntheticLoader::new();
    loader.register("clip.mov", asset);

    let mut config = Config::default();
    config.export.frame_throttle_ms = 0;
    config.export.work_dir = Some(work.path().to_path_buf());
    config.export.render_threads = 2;

    let factory = RecordingWriterFactory::new();
    let (engine, queue) =
        EffectsEngine::new(config, Arc::new(loader), Arc::new(factory.clone())).unwrap();

    Harness {
        engine,
        queue,
        factory,
        _work: work,
    }
}

fn progress_values(events: &[EngineEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::ExportProgress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn ten_second_clip_exports_every_frame() {
    let mut h = harness(SyntheticAsset::new(10.0, 30.0, 16, 8));
    h.engine.open(Path::new("clip.mov")).unwrap();
    h.queue.drain();

    let output = h.engine.start_export().unwrap();
    let report = h.engine.finish_export().await.unwrap();

    assert_eq!(report.output, output);
    assert_eq!(report.total_frames, 300);
    assert_eq!(report.frames_appended, 300);
    assert_eq!(report.frames_dropped, 0);

    let recording = h.factory.recording();
    assert_eq!(recording.timestamps.len(), 300);
    assert!(recording.timestamps.windows(2).all(|w| w[0] <= w[1]));
    let settings = recording.settings.unwrap();
    assert_eq!((settings.width, settings.height), (16, 8));

    let events = h.queue.drain();
    let progress = progress_values(&events);
    assert!(progress.len() >= 300);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(progress.last().copied(), Some(1.0));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::ExportCompleted(r) if r.frames_appended == 300)));
}

#[tokio::test]
async fn hand_off_persists_then_removes_temp() {
    let mut h = harness(SyntheticAsset::new(1.0, 10.0, 4, 4));
    let gallery = tempdir().unwrap();
    h.engine.open(Path::new("clip.mov")).unwrap();

    h.engine.start_export().unwrap();
    let report = h.engine.finish_export().await.unwrap();
    assert!(report.output.exists());

    let saved = h
        .engine
        .hand_off(&report, Arc::new(DirectoryHandOff::new(gallery.path())))
        .await
        .unwrap();

    assert!(saved.exists());
    assert!(!report.output.exists());
    assert!(h.queue.drain().iter().any(|e| matches!(
        e,
        EngineEvent::HandOffCompleted { persisted: Ok(path), .. } if *path == saved
    )));
}

#[tokio::test]
async fn hand_off_into_work_dir_keeps_the_export() {
    let mut h = harness(SyntheticAsset::new(1.0, 10.0, 4, 4));
    h.engine.open(Path::new("clip.mov")).unwrap();

    h.engine.start_export().unwrap();
    let report = h.engine.finish_export().await.unwrap();
    let work_dir = report.output.parent().unwrap().to_path_buf();

    let saved = h
        .engine
        .hand_off(&report, Arc::new(DirectoryHandOff::new(work_dir)))
        .await
        .unwrap();

    assert!(saved.exists());
    assert!(report.output.exists());
    assert!(!std::fs::read(&saved).unwrap().is_empty());
}

#[tokio::test]
async fn asset_without_video_fails_before_decoding() {
    let asset = SyntheticAsset::without_video(10.0);
    let mut h = harness(asset.clone());

    let err = h.engine.open(Path::new("clip.mov")).unwrap_err();
    assert!(matches!(
        err,
        VideoFxError::Source(SourceError::AssetUnavailable { .. })
    ));
    assert_eq!(asset.decoders_opened(), 0);
    assert!(matches!(
        h.engine.start_export(),
        Err(VideoFxError::Engine(EngineError::NoSession))
    ));
}

#[test]
fn playback_recovers_from_a_stalled_decoder() {
    let asset = SyntheticAsset::new(10.0, 30.0, 4, 4).with_stalled_decoders(1);
    let mut h = harness(asset.clone());
    h.engine.open(Path::new("clip.mov")).unwrap();
    h.engine.play(0.0).unwrap();
    h.queue.drain();

    // Twelve misses are tolerated, the thirteenth reopens the asset
    for i in 0..13 {
        h.engine.tick(i as f64 / 60.0).unwrap();
    }
    assert_eq!(asset.decoders_opened(), 2);

    h.engine.tick(14.0 / 60.0).unwrap();
    let events = h.queue.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::SourceReopened { reopen_count: 1 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::FrameRendered { .. })));
}

#[test]
fn preview_pauses_once_at_end() {
    let mut h = harness(SyntheticAsset::new(1.0, 30.0, 4, 4));
    h.engine.open(Path::new("clip.mov")).unwrap();
    h.engine.set_filter(FilterConfig::named("mono", 1.0)).unwrap();
    h.engine.play(0.0).unwrap();
    h.queue.drain();

    for i in 0..120 {
        h.engine.tick(i as f64 / 60.0).unwrap();
    }

    let events = h.queue.drain();
    let positions: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PositionUpdated(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(positions.last().copied(), Some(1.0));

    let pauses = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::PlaybackChanged { paused: true }))
        .count();
    assert_eq!(pauses, 1);
    assert!(h.engine.is_paused());
    assert_eq!(h.engine.mode(), Mode::Idle);
}

#[tokio::test]
async fn export_pauses_preview_and_rejects_second_start() {
    let mut h = harness(SyntheticAsset::new(2.0, 30.0, 4, 4));
    h.engine.open(Path::new("clip.mov")).unwrap();
    h.engine.play(0.0).unwrap();
    h.engine.tick(0.5).unwrap();

    h.engine.start_export().unwrap();
    assert_eq!(h.engine.mode(), Mode::Exporting);
    assert!(h.engine.is_paused());
    assert!(matches!(
        h.engine.start_export(),
        Err(VideoFxError::Engine(EngineError::Busy {
            current: Mode::Exporting,
            ..
        }))
    ));

    let report = h.engine.finish_export().await.unwrap();
    assert_eq!(report.frames_appended, 60);
    assert_eq!(h.engine.mode(), Mode::Idle);
}
