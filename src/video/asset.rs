//! Backend seams between the frame source and whatever actually decodes video.

use std::path::Path;

use crate::error::Result;
use crate::video::time::MediaTime;
use crate::video::types::{DecodedFrame, TrackInfo};

/// Resolves locators into decodable assets
pub trait AssetLoader: Send + Sync {
    /// Open the asset at `locator`
    fn load(&self, locator: &Path) -> Result<Box<dyn MediaAsset>>;
}

/// A resolved media asset
pub trait MediaAsset: Send {
    /// Total duration of the asset
    fn duration(&self) -> MediaTime;

    /// Video tracks in container order
    fn video_tracks(&self) -> Vec<TrackInfo>;

    /// Start a decoder for one of this asset's video tracks
    fn open_decoder(&self, track: &TrackInfo) -> Result<Box<dyn FrameDecoder>>;
}

/// Produces decoded frames addressed by media time
pub trait FrameDecoder: Send {
    /// The frame displayed at `time`
    ///
    /// Returns `Ok(None)` when the decoder has not produced that frame yet.
    /// This is a transient condition, not an error.
    fn frame_at(&mut self, time: MediaTime) -> Result<Option<DecodedFrame>>;

    /// Reposition the decode cursor. Does not produce a frame.
    fn seek(&mut self, time: MediaTime) -> Result<()>;
}
