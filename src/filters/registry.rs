use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FilterError, Result};
use crate::filters::photo::PhotoEffect;
use crate::filters::traits::{Filter, FilterConfig, IdentityFilter};

type FilterFactory = Box<dyn Fn(&FilterConfig) -> Arc<dyn Filter> + Send + Sync>;

/// Registry for the filters a user can pick from
///
/// Filters are registered by name with a factory that builds a configured
/// instance on demand.
pub struct FilterRegistry {
    filters: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// Create a new registry with all built-in filters
    pub fn new() -> Self {
        let mut registry = Self {
            filters: HashMap::new(),
        };

        registry.register_builtin_filters();
        registry
    }

    fn register_builtin_filters(&mut self) {
        self.register("none", |_| Arc::new(IdentityFilter));

        let presets: [(&str, fn() -> PhotoEffect); 8] = [
            ("chrome", PhotoEffect::chrome),
            ("fade", PhotoEffect::fade),
            ("instant", PhotoEffect::instant),
            ("mono", PhotoEffect::mono),
            ("noir", PhotoEffect::noir),
            ("process", PhotoEffect::process),
            ("tonal", PhotoEffect::tonal),
            ("transfer", PhotoEffect::transfer),
        ];
        for (name, preset) in presets {
            self.register(name, move |config| Arc::new(preset().configured(config)));
        }
    }

    /// Register a custom filter
    ///
    /// # Arguments
    ///
    /// * `name` - Unique name for the filter
    /// * `factory` - Function that creates configured instances of the filter
    pub fn register<S, F>(&mut self, name: S, factory: F)
    where
        S: Into<String>,
        F: Fn(&FilterConfig) -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Box::new(factory));
    }

    /// Instantiate the filter named in `config`
    pub fn create(&self, config: &FilterConfig) -> Result<Arc<dyn Filter>> {
        let factory = self
            .filters
            .get(&config.name)
            .ok_or_else(|| FilterError::NotFound { name: config.name.clone() })?;
        Ok(factory(config))
    }

    /// All registered filter names, "none" first and the rest sorted
    pub fn available_filters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.keys().cloned().collect();
        names.sort_by(|a, b| (a != "none", a).cmp(&(b != "none", b)));
        names
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
