use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, SourceError};
use crate::video::asset::{AssetLoader, FrameDecoder, MediaAsset};
use crate::video::geometry::AffineTransform;
use crate::video::time::MediaTime;
use crate::video::types::TrackInfo;

/// Everything learned about an asset when it was opened
///
/// Immutable once created. Stall recovery replaces the whole session.
pub struct VideoSession {
    locator: PathBuf,
    asset: Box<dyn MediaAsset>,
    track: TrackInfo,
    duration: MediaTime,
    presentation_size: (u32, u32),
    transform: AffineTransform,
}

impl VideoSession {
    /// Resolve `locator` and select its first video track
    pub fn open(loader: &dyn AssetLoader, locator: &Path, timescale: i32) -> Result<Self> {
        let asset = loader.load(locator)?;

        let track = asset
            .video_tracks()
            .into_iter()
            .next()
            .filter(|t| t.nominal_frame_rate > 0.0)
            .ok_or_else(|| SourceError::AssetUnavailable {
                locator: locator.display().to_string(),
            })?;

        // Singular orientation matrices are treated as "no rotation"
        let transform = track
            .preferred_transform
            .inverted()
            .unwrap_or_else(AffineTransform::identity);

        let session = Self {
            locator: locator.to_path_buf(),
            duration: asset.duration().rescale(timescale),
            presentation_size: track.presentation_size(),
            transform,
            track,
            asset,
        };

        info!(
            "Opened {}: {}x{} @ {:.2}fps, {}",
            session.locator.display(),
            session.presentation_size.0,
            session.presentation_size.1,
            session.nominal_frame_rate(),
            session.duration
        );

        Ok(session)
    }

    /// Start a fresh decoder for this session's track
    pub fn open_decoder(&self) -> Result<Box<dyn FrameDecoder>> {
        self.asset.open_decoder(&self.track)
    }

    pub fn locator(&self) -> &Path {
        &self.locator
    }

    pub fn track(&self) -> &TrackInfo {
        &self.track
    }

    pub fn nominal_frame_rate(&self) -> f64 {
        self.track.nominal_frame_rate
    }

    pub fn duration(&self) -> MediaTime {
        self.duration
    }

    /// Width and height of upright frames
    pub fn presentation_size(&self) -> (u32, u32) {
        self.presentation_size
    }

    /// Transform that uprights decoded frames (inverse of the track's
    /// preferred transform)
    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    /// Number of frames an export walks: `round(duration * fps)`
    pub fn total_frames(&self) -> u64 {
        (self.duration.seconds() * self.nominal_frame_rate())
            .round()
            .max(0.0) as u64
    }
}

impl fmt::Debug for VideoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoSession")
            .field("locator", &self.locator)
            .field("track", &self.track)
            .field("duration", &self.duration)
            .field("presentation_size", &self.presentation_size)
            .field("transform", &self.transform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::synthetic::{SyntheticAsset, SyntheticLoader};

    #[test]
    fn test_open_reads_track_properties() {
        let loader = SyntheticLoader::new();
        loader.register("clip.mp4", SyntheticAsset::new(10.0, 30.0, 64, 36).with_rotation(-90.0));

        let session = VideoSession::open(&loader, Path::new("clip.mp4"), 600).unwrap();
        assert_eq!(session.nominal_frame_rate(), 30.0);
        assert_eq!(session.presentation_size(), (36, 64));
        assert_eq!(session.total_frames(), 300);
        assert_eq!(*session.transform(), AffineTransform::rotation(90.0));
    }

    #[test]
    fn test_total_frames_rounds() {
        let loader = SyntheticLoader::new();
        loader.register("short.mp4", SyntheticAsset::new(1.49, 10.0, 4, 4));
        let session = VideoSession::open(&loader, Path::new("short.mp4"), 600).unwrap();
        assert_eq!(session.total_frames(), 15);
    }

    #[test]
    fn test_no_video_track_is_unavailable() {
        let loader = SyntheticLoader::new();
        loader.register("audio.m4a", SyntheticAsset::without_video(3.0));

        let err = VideoSession::open(&loader, Path::new("audio.m4a"), 600).unwrap_err();
        assert!(matches!(
            err,
            crate::error::VideoFxError::Source(SourceError::AssetUnavailable { .. })
        ));
    }
}
