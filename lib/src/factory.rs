//! Resolution of the filter factory that serves a request.

use {
    crate::{
        config::{BridgeConfig, PluginConfig},
        filter::{FilterFactory, PassThroughFilter},
    },
    std::{
        collections::HashMap,
        sync::{Arc, PoisonError, RwLock},
    },
    tracing::{event, Level},
};

/// Turns a plugin's configuration into a filter factory.
///
/// Builders are registered under the name of the filter implementation, which is what a
/// [`PluginConfig`] refers to with its `filter` field.
pub type PluginBuilder =
    Arc<dyn Fn(&PluginConfig) -> anyhow::Result<FilterFactory> + Send + Sync>;

/// The set of filter implementations and plugin configurations known to the bridge.
///
/// Factories are built lazily, the first time a request for a given config id and filter
/// arrives, and cached for every later request that resolves to the same pair. Plugins without
/// a registered config are served by the filter named after them, so two such plugins sharing
/// a config id still get their own factories.
#[derive(Default)]
pub struct FilterFactories {
    builders: RwLock<HashMap<String, PluginBuilder>>,
    configs: RwLock<HashMap<u64, PluginConfig>>,
    factories: RwLock<HashMap<FactoryKey, FilterFactory>>,
}

/// A config id and the name of the filter it resolves to.
type FactoryKey = (u64, String);

impl FilterFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter implementation under `name`.
    ///
    /// Registering the same name again replaces the builder, but not factories that have
    /// already been built from it.
    pub fn register_filter(&self, name: impl Into<String>, builder: PluginBuilder) {
        let name = name.into();
        event!(Level::DEBUG, filter = %name, "filter registered");
        self.builders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, builder);
    }

    /// Record the configuration for one plugin, replacing any earlier one with the same id.
    pub fn register_config(&self, config: PluginConfig) {
        let config_id = config.config_id();
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _), _| *id != config_id);
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config_id, config);
    }

    /// Record every plugin configuration in `config`.
    pub fn load(&self, config: &BridgeConfig) {
        for plugin in config.plugins().values() {
            self.register_config(plugin.clone());
        }
    }

    /// The factory for requests served by `plugin_name` under `config_id`.
    ///
    /// Never fails: a plugin with no registered filter, or whose builder returns an error,
    /// is served by a pass-through filter so the request still flows.
    pub fn get_or_create(&self, plugin_name: &str, config_id: u64) -> FilterFactory {
        let config = self
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config_id)
            .cloned()
            .unwrap_or_else(|| PluginConfig::new(plugin_name, config_id));
        let key = (config_id, config.filter().to_owned());

        if let Some(factory) = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return factory.clone();
        }

        let factory = self.build(&config);
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(factory)
            .clone()
    }

    fn build(&self, config: &PluginConfig) -> FilterFactory {
        let builder = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(config.filter())
            .cloned();
        let builder = match builder {
            Some(builder) => builder,
            None => {
                event!(
                    Level::ERROR,
                    plugin = config.name(),
                    filter = config.filter(),
                    "no filter registered for plugin, requests will pass through"
                );
                return PassThroughFilter::factory();
            }
        };
        match builder(config) {
            Ok(factory) => factory,
            Err(err) => {
                event!(
                    Level::ERROR,
                    plugin = config.name(),
                    filter = config.filter(),
                    "failed to build filter, requests will pass through: {:#}",
                    err
                );
                PassThroughFilter::factory()
            }
        }
    }
}
