use {std::collections::HashMap, toml::value::Table};

/// A single plugin definition.
///
/// The `filter` names the filter implementation that serves the plugin; the bridge itself
/// treats it, and the `settings` table, as opaque data for the plugin's builder.
#[derive(Clone, Debug, PartialEq)]
pub struct PluginConfig {
    name: String,
    config_id: u64,
    filter: Option<String>,
    settings: Table,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, config_id: u64) -> Self {
        Self {
            name: name.into(),
            config_id,
            filter: None,
            settings: Table::new(),
        }
    }

    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..self
        }
    }

    pub fn with_settings(self, settings: Table) -> Self {
        Self { settings, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identifier the host passes with every request served by this plugin.
    pub fn config_id(&self) -> u64 {
        self.config_id
    }

    /// The filter implementation to use, defaulting to the plugin name.
    pub fn filter(&self) -> &str {
        self.filter.as_deref().unwrap_or(&self.name)
    }

    pub fn settings(&self) -> &Table {
        &self.settings
    }

    /// A string setting, if present and a string.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    /// An integer setting, if present and an integer.
    pub fn setting_integer(&self, key: &str) -> Option<i64> {
        self.settings.get(key).and_then(|v| v.as_integer())
    }
}

/// A map of [`PluginConfig`] definitions, keyed by their name.
#[derive(Clone, Debug, Default)]
pub struct PluginsConfig(pub HashMap<String, PluginConfig>);

/// This module contains [`TryFrom`] implementations used when deserializing a bridge TOML file.
///
/// These implementations are called indirectly by [`BridgeConfig::from_file`][super::BridgeConfig],
/// and help validate that we have been given an appropriate TOML schema. If the configuration is
/// not valid, a [`BridgeConfigError`] will be returned.
mod deserialization {
    use {
        super::{PluginConfig, PluginsConfig},
        crate::error::{BridgeConfigError, PluginConfigError},
        std::{
            collections::{HashMap, HashSet},
            convert::TryFrom,
        },
        toml::value::{Table, Value},
        tracing::{event, Level},
    };

    /// Helper function for converting a TOML [`Value`] into a [`Table`].
    fn into_table(value: Value) -> Result<Table, PluginConfigError> {
        match value {
            Value::Table(table) => Ok(table),
            _ => Err(PluginConfigError::InvalidEntryType),
        }
    }

    /// Return an [`PluginConfigError::UnrecognizedKey`] error if any unrecognized keys are
    /// found.
    ///
    /// This should be called after we have removed and validated the keys we expect in a
    /// [`Table`].
    fn check_for_unrecognized_keys(table: &Table) -> Result<(), PluginConfigError> {
        if let Some(key) = table.keys().next() {
            Err(PluginConfigError::UnrecognizedKey(key.to_owned()))
        } else {
            Ok(())
        }
    }

    impl TryFrom<Table> for PluginsConfig {
        type Error = BridgeConfigError;
        fn try_from(toml: Table) -> Result<Self, Self::Error> {
            let mut seen_ids = HashSet::new();
            let to_plugin = |(name, defn): (String, Value)| {
                into_table(defn)
                    .and_then(|table| parse_plugin(&name, table))
                    .and_then(|plugin| {
                        if seen_ids.insert(plugin.config_id) {
                            Ok(plugin)
                        } else {
                            Err(PluginConfigError::DuplicateConfigId(plugin.config_id))
                        }
                    })
                    .map(|plugin| (name.clone(), plugin))
                    .map_err(|err| BridgeConfigError::InvalidPluginDefinition { name, err })
            };

            toml.into_iter()
                .map(to_plugin)
                .collect::<Result<HashMap<_, _>, _>>()
                .map(Self)
        }
    }

    fn parse_plugin(name: &str, mut toml: Table) -> Result<PluginConfig, PluginConfigError> {
        let config_id = match toml.remove("config_id") {
            Some(Value::Integer(id)) => {
                u64::try_from(id).map_err(|_| PluginConfigError::InvalidConfigId)?
            }
            Some(_) => return Err(PluginConfigError::InvalidConfigId),
            None => return Err(PluginConfigError::MissingConfigId),
        };

        let filter = match toml.remove("filter") {
            Some(Value::String(filter)) => Some(filter),
            Some(_) => return Err(PluginConfigError::InvalidFilterEntry),
            None => None,
        };

        let settings = match toml.remove("settings") {
            Some(Value::Table(settings)) => settings,
            Some(_) => return Err(PluginConfigError::InvalidSettings),
            None => Table::new(),
        };

        check_for_unrecognized_keys(&toml)?;

        event!(
            Level::DEBUG,
            plugin = name,
            config_id,
            filter = filter.as_deref().unwrap_or(name),
            "plugin configured"
        );

        Ok(PluginConfig {
            name: name.to_owned(),
            config_id,
            filter,
            settings,
        })
    }
}
