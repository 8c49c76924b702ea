//! Error types.

use crate::handle::RequestKey;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The host sent a raw code that does not name any known value.
    #[error("Invalid {kind} code: {code}")]
    InvalidCode { kind: &'static str, code: u64 },
}

/// Errors returned by the sharded request registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A live request was stored a second time; the host and the bridge disagree about which
    /// requests exist.
    #[error("dup request key: {0}")]
    DuplicateRequestKey(RequestKey),
}

/// Errors returned by the proxy core when the bridge, or a filter through the bridge, calls
/// into it.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    /// The request has already finished on the host side.
    #[error("request has been finished")]
    RequestFinished,

    /// The filter has already been destroyed.
    #[error("filter has been destroyed")]
    FilterDestroyed,

    /// The call is not allowed from the current context, e.g. a local reply issued while
    /// the host is not waiting on the filter. The bridge defers such replies.
    #[error("not processing a filter callback")]
    NotInFilterContext,
}

/// Errors that can occur while parsing a bridge configuration file.
#[derive(Debug, thiserror::Error)]
pub enum BridgeConfigError {
    /// An I/O error that occurred while reading the file.
    #[error("error reading '{path}': {err}")]
    IoError {
        path: String,
        #[source]
        err: std::io::Error,
    },

    /// An error that occurred while deserializing the file.
    ///
    /// This represents errors caused by syntactically invalid TOML data, missing fields, etc.
    #[error("error parsing bridge configuration: {0}")]
    InvalidBridgeToml(#[from] toml::de::Error),

    #[error("invalid configuration for plugin '{name}': {err}")]
    InvalidPluginDefinition {
        name: String,
        #[source]
        err: PluginConfigError,
    },

    #[error("worker concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Errors that may occur while validating plugin configurations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PluginConfigError {
    #[error("definition was not provided as a TOML table")]
    InvalidEntryType,

    #[error("missing 'config_id' field")]
    MissingConfigId,

    #[error("'config_id' field was not a non-negative integer")]
    InvalidConfigId,

    #[error("'config_id' {0} is used by more than one plugin")]
    DuplicateConfigId(u64),

    #[error("'filter' field was not a string")]
    InvalidFilterEntry,

    #[error("'settings' field was not a TOML table")]
    InvalidSettings,

    #[error("unrecognized key '{0}'")]
    UnrecognizedKey(String),
}
