//! Bridge configuration.

use {
    self::plugins::PluginsConfig,
    crate::error::BridgeConfigError,
    serde_derive::Deserialize,
    std::{
        collections::HashMap,
        convert::{TryFrom, TryInto},
        fs,
        path::Path,
        str::FromStr,
    },
    toml::value::{Table, Value},
};


/// Types and deserializers for plugin configuration settings.
mod plugins;

pub use self::plugins::PluginConfig;

/// Plugin configurations, keyed by plugin name.
pub type Plugins = HashMap<String, PluginConfig>;

/// The worker concurrency used when a configuration does not name one.
pub const DEFAULT_CONCURRENCY: u32 = 1;

/// Bridge configuration information.
///
/// This `struct` represents the fields and values of a bridge TOML file: the worker
/// concurrency the host runs with, and one entry per plugin naming the filter that serves it.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    concurrency: u32,
    plugins: PluginsConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            plugins: PluginsConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// The number of worker threads the host runs.
    pub fn concurrency(&self) -> u32 {
        self.concurrency
    }

    /// Override the configured worker concurrency.
    pub fn with_concurrency(self, concurrency: u32) -> Result<Self, BridgeConfigError> {
        if concurrency == 0 {
            return Err(BridgeConfigError::ZeroConcurrency);
        }
        Ok(Self {
            concurrency,
            ..self
        })
    }

    /// Get the plugin configurations.
    pub fn plugins(&self) -> &Plugins {
        &self.plugins.0
    }

    /// Get the configuration of one plugin.
    pub fn plugin(&self, name: &str) -> Option<&PluginConfig> {
        self.plugins.0.get(name)
    }

    /// Parse a bridge TOML file into a `BridgeConfig`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BridgeConfigError> {
        fs::read_to_string(path.as_ref())
            .map_err(|err| BridgeConfigError::IoError {
                path: path.as_ref().display().to_string(),
                err,
            })
            .and_then(Self::from_str)
    }

    /// Parse a string containing TOML data into a `BridgeConfig`.
    fn from_str(toml: impl AsRef<str>) -> Result<Self, BridgeConfigError> {
        toml::from_str::<'_, TomlBridgeConfig>(toml.as_ref())
            .map_err(Into::into)
            .and_then(TryInto::try_into)
    }
}

impl FromStr for BridgeConfig {
    type Err = BridgeConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

/// Build a configuration from an already-parsed TOML table, such as the bridge sections of a
/// larger document.
impl TryFrom<Table> for BridgeConfig {
    type Error = BridgeConfigError;
    fn try_from(table: Table) -> Result<Self, Self::Error> {
        let raw = Value::try_into::<TomlBridgeConfig>(Value::Table(table))?;
        TryInto::<BridgeConfig>::try_into(raw)
    }
}

/// Internal deserializer used to read data from a bridge TOML file.
///
/// Once a TOML file has been read using [`toml::from_str`], this can be converted into
/// a [`BridgeConfig`].
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlBridgeConfig {
    bridge: Option<RawBridgeSection>,
    plugins: Option<Table>,
}

/// The `[bridge]` section.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBridgeSection {
    concurrency: Option<u32>,
}

impl TryInto<BridgeConfig> for TomlBridgeConfig {
    type Error = BridgeConfigError;
    fn try_into(self) -> Result<BridgeConfig, Self::Error> {
        let Self { bridge, plugins } = self;
        let concurrency = bridge
            .and_then(|section| section.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(BridgeConfigError::ZeroConcurrency);
        }
        let plugins = plugins
            .map(TryInto::try_into)
            .transpose()?
            .unwrap_or_default();
        Ok(BridgeConfig {
            concurrency,
            plugins,
        })
    }
}
