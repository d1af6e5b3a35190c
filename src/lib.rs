//! # videofx
//!
//! Decode the frames of a video, run them through an image filter, and
//! either preview the result against a clock or re-encode it to a new file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use videofx::{
//!     config::Config,
//!     engine::EffectsEngine,
//!     filters::FilterConfig,
//!     pipeline::{DirectoryHandOff, FfmpegWriterFactory},
//!     video::FfmpegLoader,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> videofx::Result<()> {
//! let (mut engine, _events) = EffectsEngine::new(
//!     Config::default(),
//!     Arc::new(FfmpegLoader::new()?),
//!     Arc::new(FfmpegWriterFactory::new()),
//! )?;
//!
//! engine.open(Path::new("clip.mov"))?;
//! engine.set_filter(FilterConfig::named("noir", 1.0))?;
//! engine.start_export()?;
//! let report = engine.finish_export().await?;
//! engine.hand_off(&report, Arc::new(DirectoryHandOff::new("gallery"))).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - media time, assets, decoding backends and the frame source
//! - [`filters`] - the filter capability and built-in presets
//! - [`pipeline`] - filter stage, preview loop, export pipeline, writers
//! - [`engine`] - the mode-guarded handle tying them together
//! - [`config`] - configuration management
//!
//! ## Custom Filters
//!
//! Anything implementing [`Filter`](filters::Filter) can be registered:
//!
//! ```rust
//! use std::sync::Arc;
//! use videofx::filters::{from_fn, FilterRegistry};
//!
//! let mut registry = FilterRegistry::new();
//! registry.register("invert", |_| {
//!     Arc::new(from_fn("invert", |mut image: videofx::video::Image| {
//!         for pixel in image.as_image_mut().pixels_mut() {
//!             pixel.0 = [255 - pixel[0], 255 - pixel[1], 255 - pixel[2], pixel[3]];
//!         }
//!         Ok(image)
//!     }))
//! });
//! assert!(registry.has_filter("invert"));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod pipeline;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    engine::{EffectsEngine, Mode},
    error::{Result, VideoFxError},
    filters::{Filter, FilterConfig, FilterRegistry},
};
