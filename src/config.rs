use std::{io, path::Path};

use secstr::SecUtf8;
use serde::{Deserialize, Deserializer};

use crate::paths::PathTemplate;

/// 25 MiB, the largest payload GitHub delivers.
const DEFAULT_MAX_PAYLOAD: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_ping_path")]
    pub ping_path: String,
    #[serde(default, deserialize_with = "deserialize_opt_secstr")]
    pub secret: Option<SecUtf8>,
    pub pull_directory: PathTemplate,
    #[serde(default = "default_remote_base")]
    pub remote_base: String,
    #[serde(default)]
    pub deploy_on_create: bool,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

/// `DEPLOYER_*` environment variables, applied on top of the config file.
#[derive(Debug, Default, Deserialize)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub ping_path: Option<String>,
    pub secret: Option<String>,
    pub pull_directory: Option<String>,
    pub remote_base: Option<String>,
    pub deploy_on_create: Option<bool>,
    pub max_payload: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Read(#[from] io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid DEPLOYER_* environment: {0}")]
    Env(#[from] envy::Error),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        let overrides = envy::prefixed("DEPLOYER_").from_env::<Overrides>()?;
        Ok(Self::parse(&raw)?.with_overrides(overrides))
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        let Overrides {
            host,
            port,
            path,
            ping_path,
            secret,
            pull_directory,
            remote_base,
            deploy_on_create,
            max_payload,
        } = overrides;

        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(path) = path {
            self.path = path;
        }
        if let Some(ping_path) = ping_path {
            self.ping_path = ping_path;
        }
        if let Some(secret) = secret {
            self.secret = non_empty_secret(secret);
        }
        if let Some(pull_directory) = pull_directory {
            self.pull_directory = PathTemplate::new(pull_directory);
        }
        if let Some(remote_base) = remote_base {
            self.remote_base = remote_base;
        }
        if let Some(deploy_on_create) = deploy_on_create {
            self.deploy_on_create = deploy_on_create;
        }
        if let Some(max_payload) = max_payload {
            self.max_payload = max_payload;
        }
        self
    }
}

fn non_empty_secret(secret: String) -> Option<SecUtf8> {
    Some(secret)
        .filter(|s| !s.is_empty())
        .map(SecUtf8::from)
}

fn deserialize_opt_secstr<'de, D>(de: D) -> Result<Option<SecUtf8>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(|o| o.and_then(non_empty_secret))
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    80
}

fn default_path() -> String {
    "/webhook".into()
}

fn default_ping_path() -> String {
    "/webhook/ping".into()
}

fn default_remote_base() -> String {
    "https://github.com".into()
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}
