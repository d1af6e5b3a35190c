use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    error::{ConfigError, Result},
    video::types::Image,
};

/// An image-to-image mapping applied to every frame
///
/// Filters are opaque to the pipeline: it hands over one image and takes
/// back exactly one image, without inspecting what happened in between.
pub trait Filter: Send + Sync {
    /// Returns the unique name of this filter
    fn name(&self) -> &str;

    /// Returns a human-readable description of this filter
    fn description(&self) -> &str {
        ""
    }

    /// Produce the output image for `input`
    ///
    /// The input's extent origin is always (0, 0).
    fn output_image(&self, input: Image) -> Result<Image>;

    /// Get filter-specific metadata or capabilities
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::default()
    }
}

/// Configuration used when instantiating a filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Registered filter name
    pub name: String,

    /// Strength of the effect (0.0 = none, 1.0 = full intensity)
    pub intensity: f32,

    /// Filter-specific parameters
    #[serde(default)]
    pub parameters: HashMap<String, ConfigValue>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            name: "none".to_string(),
            intensity: 1.0,
            parameters: HashMap::new(),
        }
    }
}

impl FilterConfig {
    /// Create a new config for the named filter at the given intensity
    pub fn named<S: Into<String>>(name: S, intensity: f32) -> Self {
        Self {
            name: name.into(),
            intensity: intensity.clamp(0.0, 1.0),
            parameters: HashMap::new(),
        }
    }

    /// Set a parameter value
    pub fn set<K: Into<String>, V: Into<ConfigValue>>(mut self, key: K, value: V) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.parameters.get(key).and_then(|v| v.as_f32())
    }

    pub fn get_f32_or(&self, key: &str, default: f32) -> f32 {
        self.get_f32(key).unwrap_or(default)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.intensity) {
            return Err(ConfigError::InvalidValue {
                key: "filter.intensity".to_string(),
                value: self.intensity.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Flexible configuration value that can hold different types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Float(f32),
    Bool(bool),
    String(String),
    Integer(i32),
}

impl ConfigValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Integer(i) => Some(*i as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f32> for ConfigValue {
    fn from(value: f32) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Integer(value)
    }
}

/// Metadata about a filter's characteristics
#[derive(Debug, Clone, Default)]
pub struct FilterMetadata {
    /// Estimated performance impact (0.0 = minimal, 1.0 = heavy)
    pub performance_impact: f32,

    /// Output has the same extent as the input
    pub preserves_extent: bool,

    /// List of optional parameters with descriptions
    pub optional_parameters: Vec<(String, String)>,
}

/// Passes images through untouched
pub struct IdentityFilter;

impl Filter for IdentityFilter {
    fn name(&self) -> &str {
        "none"
    }

    fn description(&self) -> &str {
        "No effect"
    }

    fn output_image(&self, input: Image) -> Result<Image> {
        Ok(input)
    }

    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            performance_impact: 0.0,
            preserves_extent: true,
            optional_parameters: vec![],
        }
    }
}

/// A filter backed by a closure
pub struct FnFilter<F> {
    name: String,
    f: F,
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(Image) -> Result<Image> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn output_image(&self, input: Image) -> Result<Image> {
        (self.f)(input)
    }
}

/// Wrap a closure as a filter
pub fn from_fn<S, F>(name: S, f: F) -> FnFilter<F>
where
    S: Into<String>,
    F: Fn(Image) -> Result<Image> + Send + Sync,
{
    FnFilter { name: name.into(), f }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_filter_runs_closure() {
        let invert = from_fn("invert", |mut image: Image| {
            for pixel in image.as_image_mut().pixels_mut() {
                pixel.0 = [255 - pixel[0], 255 - pixel[1], 255 - pixel[2], pixel[3]];
            }
            Ok(image)
        });
        let out = invert.output_image(Image::new_filled(1, 1, [0, 10, 255, 255])).unwrap();
        assert_eq!(out.get_pixel(0, 0), [255, 245, 0, 255]);
        assert_eq!(invert.name(), "invert");
    }

    #[test]
    fn test_intensity_out_of_range() {
        let config = FilterConfig {
            intensity: 1.5,
            ..FilterConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(FilterConfig::named("noir", 3.0).intensity, 1.0);
    }

    #[test]
    fn test_parameter_lookup() {
        let config = FilterConfig::named("fade", 0.5).set("lift", 0.2f32).set("steps", 3);
        assert_eq!(config.get_f32("lift"), Some(0.2));
        assert_eq!(config.get_f32("steps"), Some(3.0));
        assert_eq!(config.get_f32_or("contrast", 1.0), 1.0);
    }
}
