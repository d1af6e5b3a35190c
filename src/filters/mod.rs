//! # Filters
//!
//! Image-to-image effects applied to every frame during preview and export.
//! The pipeline treats a filter as an opaque capability: one image in, one
//! image out, with the input always anchored at (0, 0).
//!
//! ## Built-in Filters
//!
//! - **none**: passes frames through
//! - **chrome**, **fade**, **instant**, **process**, **transfer**: colour looks
//! - **mono**, **noir**, **tonal**: black and white looks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use videofx::filters::{FilterConfig, FilterRegistry};
//!
//! let registry = FilterRegistry::new();
//! let noir = registry.create(&FilterConfig::named("noir", 0.8)).unwrap();
//! ```

pub mod photo;
pub mod registry;
pub mod traits;

pub use photo::PhotoEffect;
pub use registry::FilterRegistry;
pub use traits::{from_fn, ConfigValue, Filter, FilterConfig, FilterMetadata, IdentityFilter};
