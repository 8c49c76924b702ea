//! Scenario files: the requests the harness plays through the bridge.
//!
//! A scenario is a TOML document with one `[[requests]]` table per request. Unless a
//! separate configuration is given on the command line, the same document also carries the
//! `[bridge]` and `[plugins]` sections read by [`BridgeConfig`].

use {
    anyhow::{bail, Context},
    bytes::Bytes,
    filter_bridge_lib::config::BridgeConfig,
    http::{HeaderMap, HeaderName, HeaderValue},
    serde_derive::Deserialize,
    std::{
        collections::{BTreeMap, HashSet},
        convert::TryFrom,
        fs,
        path::Path,
    },
    toml::value::{Table, Value},
};

/// One request as the proxy core would see it.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioRequest {
    /// The host's identity token for the request.
    pub id: u64,
    /// The worker thread that drives the request.
    #[serde(default)]
    pub worker: u32,
    /// The plugin that serves the request.
    pub plugin: String,
    /// Overrides the config id taken from the plugin's configuration.
    pub config_id: Option<u64>,
    /// Emit a downstream-start access log event before the request headers.
    #[serde(default)]
    pub log_downstream_start: bool,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub request_body: Vec<String>,
    pub request_trailers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_body: Vec<String>,
    pub response_trailers: Option<BTreeMap<String, String>>,
    /// Whether the host sends a destroy callback once the request is done.
    #[serde(default = "default_true")]
    pub destroy: bool,
}

fn default_true() -> bool {
    true
}

impl ScenarioRequest {
    pub fn request_headers(&self) -> anyhow::Result<HeaderMap> {
        header_map(&self.request_headers)
    }

    pub fn request_trailers(&self) -> anyhow::Result<Option<HeaderMap>> {
        self.request_trailers.as_ref().map(header_map).transpose()
    }

    pub fn response_headers(&self) -> anyhow::Result<HeaderMap> {
        header_map(&self.response_headers)
    }

    pub fn response_trailers(&self) -> anyhow::Result<Option<HeaderMap>> {
        self.response_trailers.as_ref().map(header_map).transpose()
    }

    pub fn request_body(&self) -> Vec<Bytes> {
        chunks(&self.request_body)
    }

    pub fn response_body(&self) -> Vec<Bytes> {
        chunks(&self.response_body)
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> anyhow::Result<HeaderMap> {
    headers
        .iter()
        .map(|(name, value)| -> anyhow::Result<(HeaderName, HeaderValue)> {
            let name = HeaderName::try_from(name.as_str())
                .with_context(|| format!("invalid header name '{}'", name))?;
            let value = HeaderValue::try_from(value.as_str())
                .with_context(|| format!("invalid value for header '{}'", name))?;
            Ok((name, value))
        })
        .collect()
}

fn chunks(body: &[String]) -> Vec<Bytes> {
    body.iter().map(|chunk| Bytes::from(chunk.clone())).collect()
}

/// A parsed scenario file.
#[derive(Debug)]
pub struct Scenario {
    pub config: BridgeConfig,
    pub requests: Vec<ScenarioRequest>,
}

impl Scenario {
    /// Read a scenario, taking the bridge configuration from `config_path` if given and from
    /// the scenario itself otherwise. `workers` overrides the configured concurrency.
    pub fn load(
        path: &Path,
        config_path: Option<&Path>,
        workers: Option<u32>,
    ) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("error reading '{}'", path.display()))?;
        let mut table: Table = toml::from_str(&text)
            .with_context(|| format!("error parsing scenario '{}'", path.display()))?;

        let requests = match table.remove("requests") {
            Some(requests) => Value::try_into::<Vec<ScenarioRequest>>(requests)
                .context("invalid [[requests]] entry")?,
            None => bail!("scenario '{}' contains no [[requests]]", path.display()),
        };

        let config = match config_path {
            Some(config_path) => BridgeConfig::from_file(config_path)?,
            None => BridgeConfig::try_from(table)?,
        };
        let config = match workers {
            Some(workers) => config.with_concurrency(workers)?,
            None => config,
        };

        let scenario = Self { config, requests };
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for req in &self.requests {
            if req.worker >= self.config.concurrency() {
                bail!(
                    "request {} names worker {} but only {} workers are configured",
                    req.id,
                    req.worker,
                    self.config.concurrency()
                );
            }
            if !seen.insert((req.id, req.worker)) {
                bail!("request {} on worker {} appears twice", req.id, req.worker);
            }
        }
        Ok(())
    }
}
