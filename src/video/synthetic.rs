//! In-memory test-pattern assets.
//!
//! Frames are solid colours whose hue walks around the colour wheel with the
//! frame index, so a frame's identity can be recovered from any pixel. Used
//! by the test suite and by `videofx` when no real decoder is wanted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, SourceError};
use crate::video::asset::{AssetLoader, FrameDecoder, MediaAsset};
use crate::video::geometry::AffineTransform;
use crate::video::time::{frame_index_at, frame_time, MediaTime, DEFAULT_TIMESCALE};
use crate::video::types::{DecodedFrame, Image, TrackInfo};

/// Description of a generated asset
#[derive(Debug, Clone)]
pub struct SyntheticAsset {
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,

    /// Preferred transform rotation in degrees
    pub rotation: f64,

    /// Assets without a video track fail to open
    pub has_video: bool,

    /// The first N decoders opened for this asset never produce a frame
    pub stalled_decoders: usize,

    decoders_opened: Arc<AtomicUsize>,
}

impl SyntheticAsset {
    pub fn new(duration: f64, fps: f64, width: u32, height: u32) -> Self {
        Self {
            duration,
            fps,
            width,
            height,
            rotation: 0.0,
            has_video: true,
            stalled_decoders: 0,
            decoders_opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An asset with no video track (audio-only, for example)
    pub fn without_video(duration: f64) -> Self {
        Self {
            has_video: false,
            ..Self::new(duration, 0.0, 0, 0)
        }
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_stalled_decoders(mut self, count: usize) -> Self {
        self.stalled_decoders = count;
        self
    }

    /// Number of decoders opened so far
    pub fn decoders_opened(&self) -> usize {
        self.decoders_opened.load(Ordering::SeqCst)
    }

    pub fn frame_count(&self) -> i64 {
        (self.duration * self.fps).round() as i64
    }

    /// Colour of frame `index`
    pub fn frame_color(&self, index: i64) -> [u8; 4] {
        let total = self.frame_count().max(1);
        let hue = (index.rem_euclid(total) as f32 / total as f32) * 360.0;
        let [r, g, b] = hsv_to_rgb(hue, 0.7, 0.9);
        [r, g, b, 255]
    }
}

impl MediaAsset for SyntheticAsset {
    fn duration(&self) -> MediaTime {
        MediaTime::from_seconds(self.duration, DEFAULT_TIMESCALE)
    }

    fn video_tracks(&self) -> Vec<TrackInfo> {
        if !self.has_video {
            return Vec::new();
        }
        vec![TrackInfo {
            index: 0,
            nominal_frame_rate: self.fps,
            natural_size: (self.width, self.height),
            preferred_transform: AffineTransform::rotation(self.rotation),
        }]
    }

    fn open_decoder(&self, _track: &TrackInfo) -> Result<Box<dyn FrameDecoder>> {
        let opened = self.decoders_opened.fetch_add(1, Ordering::SeqCst);
        let stalled = opened < self.stalled_decoders;
        debug!("Opening synthetic decoder #{} (stalled: {})", opened, stalled);

        Ok(Box::new(SyntheticDecoder {
            asset: self.clone(),
            stalled,
        }))
    }
}

struct SyntheticDecoder {
    asset: SyntheticAsset,
    stalled: bool,
}

impl FrameDecoder for SyntheticDecoder {
    fn frame_at(&mut self, time: MediaTime) -> Result<Option<DecodedFrame>> {
        if self.stalled {
            return Ok(None);
        }

        let last = self.asset.frame_count() - 1;
        if last < 0 {
            return Ok(None);
        }
        let index = frame_index_at(time.seconds(), self.asset.fps).min(last);
        let image = Image::new_filled(
            self.asset.width,
            self.asset.height,
            self.asset.frame_color(index),
        );

        Ok(Some(DecodedFrame {
            image,
            presentation_time: frame_time(index, self.asset.fps, time.timescale),
        }))
    }

    fn seek(&mut self, _time: MediaTime) -> Result<()> {
        Ok(())
    }
}

/// Loader that serves registered synthetic assets by path
#[derive(Default, Clone)]
pub struct SyntheticLoader {
    assets: Arc<RwLock<HashMap<PathBuf, SyntheticAsset>>>,
}

impl SyntheticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset under a path
    pub fn register<P: Into<PathBuf>>(&self, path: P, asset: SyntheticAsset) {
        self.assets.write().insert(path.into(), asset);
    }

    pub fn get(&self, path: &Path) -> Option<SyntheticAsset> {
        self.assets.read().get(path).cloned()
    }
}

impl AssetLoader for SyntheticLoader {
    fn load(&self, locator: &Path) -> Result<Box<dyn MediaAsset>> {
        let asset = self.get(locator).ok_or_else(|| SourceError::AssetUnavailable {
            locator: locator.display().to_string(),
        })?;
        Ok(Box::new(asset))
    }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    [
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_follow_requested_time() {
        let asset = SyntheticAsset::new(2.0, 30.0, 8, 4);
        let track = asset.video_tracks().remove(0);
        let mut decoder = asset.open_decoder(&track).unwrap();

        let frame = decoder
            .frame_at(MediaTime::from_seconds(0.5, 600))
            .unwrap()
            .unwrap();
        assert_eq!(frame.presentation_time, MediaTime::new(300, 600));
        assert_eq!(frame.image.get_pixel(0, 0), asset.frame_color(15));
    }

    #[test]
    fn test_time_past_end_clamps_to_last_frame() {
        let asset = SyntheticAsset::new(1.0, 10.0, 2, 2);
        let track = asset.video_tracks().remove(0);
        let mut decoder = asset.open_decoder(&track).unwrap();
        let frame = decoder
            .frame_at(MediaTime::from_seconds(5.0, 600))
            .unwrap()
            .unwrap();
        assert_eq!(frame.presentation_time, MediaTime::from_seconds(0.9, 600));
    }

    #[test]
    fn test_stalled_decoders_are_consumed_in_order() {
        let asset = SyntheticAsset::new(1.0, 10.0, 2, 2).with_stalled_decoders(1);
        let track = asset.video_tracks().remove(0);

        let mut first = asset.open_decoder(&track).unwrap();
        assert!(first.frame_at(MediaTime::ZERO).unwrap().is_none());

        let mut second = asset.open_decoder(&track).unwrap();
        assert!(second.frame_at(MediaTime::ZERO).unwrap().is_some());
        assert_eq!(asset.decoders_opened(), 2);
    }

    #[test]
    fn test_unknown_path_is_unavailable() {
        let loader = SyntheticLoader::new();
        assert!(loader.load(Path::new("missing.mp4")).is_err());
    }
}
