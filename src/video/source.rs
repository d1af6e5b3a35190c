//! The frame source: time-addressed access to decoded frames of one asset.
//!
//! Owns the session, the decoder and the playback clock. Decoders can
//! transiently report "no frame yet" under load; while playing, consecutive
//! misses are counted and once they exceed the stall threshold the source
//! silently reopens its locator with a fresh session and decoder.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::Result;
use crate::video::asset::{AssetLoader, FrameDecoder};
use crate::video::session::VideoSession;
use crate::video::time::{frame_index_at, frame_time, MediaTime};
use crate::video::types::DecodedFrame;

/// Consecutive "no new frame" results observed while playing
#[derive(Debug, Clone)]
pub struct StallCounter {
    count: u32,
    threshold: u32,
}

impl StallCounter {
    pub fn new(threshold: u32) -> Self {
        Self { count: 0, threshold }
    }

    /// Record a miss. Returns true once the count exceeds the threshold.
    pub fn record_miss(&mut self) -> bool {
        self.count += 1;
        self.count > self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Maps host time (seconds on any monotonic clock) onto media time
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    anchor_media: MediaTime,
    anchor_host: Option<f64>,
    last_host: f64,
}

impl PlaybackClock {
    pub fn new(timescale: i32) -> Self {
        Self {
            anchor_media: MediaTime::new(0, timescale),
            anchor_host: None,
            last_host: 0.0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.anchor_host.is_some()
    }

    pub fn play(&mut self, host: f64) {
        self.last_host = host;
        if self.anchor_host.is_none() {
            self.anchor_host = Some(host);
        }
    }

    pub fn pause(&mut self, host: f64) {
        self.anchor_media = self.item_time(host);
        self.anchor_host = None;
    }

    /// Media time shown at `host`
    pub fn item_time(&mut self, host: f64) -> MediaTime {
        self.last_host = self.last_host.max(host);
        match self.anchor_host {
            Some(anchor) => self.anchor_media.offset((host - anchor).max(0.0)),
            None => self.anchor_media,
        }
    }

    /// Most recent host time seen
    pub fn last_host(&self) -> f64 {
        self.last_host
    }

    /// Media time at the most recent host time seen
    pub fn current(&self) -> MediaTime {
        match self.anchor_host {
            Some(anchor) => self.anchor_media.offset((self.last_host - anchor).max(0.0)),
            None => self.anchor_media,
        }
    }

    pub fn set(&mut self, time: MediaTime) {
        self.anchor_media = time;
        if self.anchor_host.is_some() {
            self.anchor_host = Some(self.last_host);
        }
    }
}

/// Time-addressed frame access for one asset
pub struct FrameSource {
    loader: Arc<dyn AssetLoader>,
    session: VideoSession,
    decoder: Box<dyn FrameDecoder>,
    clock: PlaybackClock,
    stalls: StallCounter,
    pending: Option<(MediaTime, DecodedFrame)>,
    last_delivered: Option<MediaTime>,
    reopen_count: usize,
    timescale: i32,
}

impl FrameSource {
    /// Open `locator`. Fails with `AssetUnavailable` when it has no video track.
    pub fn open(loader: Arc<dyn AssetLoader>, locator: &Path, config: &SourceConfig) -> Result<Self> {
        let session = VideoSession::open(loader.as_ref(), locator, config.timescale)?;
        let decoder = session.open_decoder()?;

        Ok(Self {
            loader,
            session,
            decoder,
            clock: PlaybackClock::new(config.timescale),
            stalls: StallCounter::new(config.stall_threshold),
            pending: None,
            last_delivered: None,
            reopen_count: 0,
            timescale: config.timescale,
        })
    }

    pub fn session(&self) -> &VideoSession {
        &self.session
    }

    pub fn stall_count(&self) -> u32 {
        self.stalls.count()
    }

    /// How many times stall recovery has replaced the session
    pub fn reopen_count(&self) -> usize {
        self.reopen_count
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn play(&mut self, host: f64) {
        self.clock.play(host);
    }

    pub fn pause(&mut self, host: f64) {
        self.clock.pause(host);
    }

    /// Most recent host time the clock was driven with
    pub fn last_host_time(&self) -> f64 {
        self.clock.last_host()
    }

    /// Media time at `host`, clamped to the asset
    pub fn current_time_at(&mut self, host: f64) -> MediaTime {
        let time = self.clock.item_time(host);
        self.clamp(time)
    }

    /// Media time of the decode cursor
    pub fn current_time(&self) -> MediaTime {
        self.clamp(self.clock.current())
    }

    /// Position of `time` within the asset, in [0, 1]
    pub fn normalized_time(&self, time: MediaTime) -> f64 {
        let duration = self.session.duration().seconds();
        if duration <= 0.0 {
            return 1.0;
        }
        (time.seconds() / duration).clamp(0.0, 1.0)
    }

    /// True if a frame newer than the last delivered one is ready at `at`
    pub fn has_frame(&mut self, at: MediaTime) -> bool {
        if matches!(&self.pending, Some((requested, _)) if *requested == at) {
            return true;
        }
        self.pending = None;

        match self.decoder.frame_at(at) {
            Ok(Some(frame)) => {
                if self.last_delivered == Some(frame.presentation_time) {
                    return false;
                }
                self.pending = Some((at, frame));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Decoder error at {}: {}", at, e);
                false
            }
        }
    }

    /// Take the frame at `at` if `has_frame(at)` holds
    ///
    /// A miss while playing counts toward the stall threshold; exceeding it
    /// reopens the session.
    pub fn fetch(&mut self, at: MediaTime) -> Option<DecodedFrame> {
        if self.has_frame(at) {
            if let Some((_, frame)) = self.pending.take() {
                self.last_delivered = Some(frame.presentation_time);
                self.stalls.reset();
                return Some(frame);
            }
        }

        if self.clock.is_playing() && self.stalls.record_miss() {
            warn!(
                "No new frame for {} consecutive requests, reopening {}",
                self.stalls.count(),
                self.session.locator().display()
            );
            self.reopen();
        }
        None
    }

    /// Reposition the decode cursor without fetching
    pub fn seek(&mut self, to: MediaTime) {
        let to = self.clamp(to.rescale(self.timescale));
        debug!("Seeking to {}", to);
        self.clock.set(to);
        if let Err(e) = self.decoder.seek(to) {
            warn!("Decoder seek to {} failed: {}", to, e);
        }
        self.pending = None;
        self.last_delivered = None;
    }

    /// Seek to a fraction of the asset's duration
    pub fn seek_normalized(&mut self, fraction: f64) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        let seconds = self.session.duration().seconds() * fraction;
        self.seek(MediaTime::from_seconds(seconds, self.timescale));
    }

    /// Step the decode cursor by whole frames, independent of the clock
    pub fn advance_step(&mut self, count: i64) {
        let fps = self.session.nominal_frame_rate();
        let index = frame_index_at(self.current_time().seconds(), fps) + count;
        let to = self.clamp(frame_time(index.max(0), fps, self.timescale));
        self.clock.set(to);
        if let Err(e) = self.decoder.seek(to) {
            warn!("Decoder step to {} failed: {}", to, e);
        }
    }

    fn clamp(&self, time: MediaTime) -> MediaTime {
        time.max(MediaTime::new(0, self.timescale))
            .min(self.session.duration())
    }

    fn reopen(&mut self) {
        let position = self.current_time();
        let reopened = VideoSession::open(self.loader.as_ref(), self.session.locator(), self.timescale)
            .and_then(|session| {
                let mut decoder = session.open_decoder()?;
                decoder.seek(position)?;
                Ok((session, decoder))
            });

        match reopened {
            Ok((session, decoder)) => {
                self.session = session;
                self.decoder = decoder;
                self.reopen_count += 1;
                info!("Reopened {} at {}", self.session.locator().display(), position);
            }
            Err(e) => warn!("Reopen failed, keeping previous session: {}", e),
        }

        self.stalls.reset();
        self.pending = None;
        self.last_delivered = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::synthetic::{SyntheticAsset, SyntheticLoader};

    fn source_for(asset: SyntheticAsset) -> (FrameSource, SyntheticAsset) {
        let loader = SyntheticLoader::new();
        loader.register("clip.mp4", asset.clone());
        let source = FrameSource::open(Arc::new(loader), Path::new("clip.mp4"), &SourceConfig::default())
            .unwrap();
        (source, asset)
    }

    #[test]
    fn test_same_frame_is_not_new_twice() {
        let (mut source, _) = source_for(SyntheticAsset::new(1.0, 10.0, 2, 2));
        let t = MediaTime::from_seconds(0.25, 600);

        assert!(source.has_frame(t));
        let frame = source.fetch(t).unwrap();
        assert_eq!(frame.presentation_time, MediaTime::from_seconds(0.2, 600));

        assert!(!source.has_frame(t));
        assert!(source.fetch(t).is_none());
        // Paused misses never count as stalls
        assert_eq!(source.stall_count(), 0);
    }

    #[test]
    fn test_seek_makes_frame_deliverable_again() {
        let (mut source, _) = source_for(SyntheticAsset::new(1.0, 10.0, 2, 2));
        source.seek_normalized(0.5);
        let at = source.current_time();
        assert!(source.fetch(at).is_some());
        source.seek_normalized(0.5);
        assert!(source.fetch(at).is_some());
    }

    #[test]
    fn test_advance_step_walks_frames() {
        let (mut source, _) = source_for(SyntheticAsset::new(1.0, 30.0, 2, 2));
        source.seek(MediaTime::ZERO);
        for index in 0..10 {
            let at = source.current_time();
            let frame = source.fetch(at).unwrap();
            assert_eq!(frame.presentation_time, frame_time(index, 30.0, 600));
            source.advance_step(1);
        }
    }

    #[test]
    fn test_stall_reopens_after_threshold() {
        let (mut source, asset) = source_for(SyntheticAsset::new(2.0, 10.0, 2, 2).with_stalled_decoders(1));
        source.play(0.0);

        for tick in 1..=12 {
            let at = source.current_time_at(tick as f64 * 0.01);
            assert!(source.fetch(at).is_none());
            assert_eq!(source.stall_count(), tick);
        }
        assert_eq!(source.reopen_count(), 0);

        // 13th consecutive miss exceeds the threshold
        let at = source.current_time_at(0.13);
        assert!(source.fetch(at).is_none());
        assert_eq!(source.reopen_count(), 1);
        assert_eq!(source.stall_count(), 0);
        assert_eq!(asset.decoders_opened(), 2);

        let at = source.current_time_at(0.14);
        assert!(source.fetch(at).is_some());
        assert_eq!(source.stall_count(), 0);
    }

    #[test]
    fn test_successful_fetch_resets_counter() {
        let (mut source, _) = source_for(SyntheticAsset::new(2.0, 10.0, 2, 2));
        source.play(0.0);
        let t = source.current_time_at(0.0);
        assert!(source.fetch(t).is_some());
        // Same frame again counts as a miss while playing
        assert!(source.fetch(t).is_none());
        assert_eq!(source.stall_count(), 1);
        let later = source.current_time_at(0.5);
        assert!(source.fetch(later).is_some());
        assert_eq!(source.stall_count(), 0);
    }

    #[test]
    fn test_clock_follows_host_time() {
        let (mut source, _) = source_for(SyntheticAsset::new(2.0, 10.0, 2, 2));
        source.play(100.0);
        assert_eq!(source.current_time_at(100.5), MediaTime::new(300, 600));
        source.pause(101.0);
        assert_eq!(source.current_time_at(150.0), MediaTime::new(600, 600));
        // Clamped to the asset duration
        source.play(150.0);
        assert_eq!(source.current_time_at(160.0), MediaTime::new(1200, 600));
        assert_eq!(source.normalized_time(source.current_time()), 1.0);
    }
}
