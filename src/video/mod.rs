//! # Video Module
//!
//! Media time, image primitives, asset backends and the frame source.

pub mod asset;
pub mod ffmpeg;
pub mod geometry;
pub mod session;
pub mod source;
pub mod synthetic;
pub mod time;
pub mod types;

pub use asset::{AssetLoader, FrameDecoder, MediaAsset};
pub use ffmpeg::FfmpegLoader;
pub use geometry::{AffineTransform, Rect};
pub use session::VideoSession;
pub use source::{FrameSource, PlaybackClock, StallCounter};
pub use synthetic::{SyntheticAsset, SyntheticLoader};
pub use time::MediaTime;
pub use types::{DecodedFrame, FilteredFrame, Image, TrackInfo};
