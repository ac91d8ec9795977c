//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{convert::TryFrom, net::SocketAddr, path::PathBuf, time::Duration};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Constants

pub const PROVIDER_SOURCE: &str = "registry.terraform.io/go-gitea/gitea";
pub const PROVIDER_VERSION: &str = "0.7.0";
pub const TERRAFORM_VERSION: &str = "1.5.7";
pub const LISTEN: &str = "0.0.0.0:8080";
pub const POLL_INTERVAL: i64 = 600;
pub const GATE_INTERVAL: i64 = 30;

// -----------------------------------------------------------------------------
// Provider structure

/// terraform provider requirement
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Provider {
    #[serde(rename = "source")]
    pub source: String,
    #[serde(rename = "version")]
    pub version: String,
}

// -----------------------------------------------------------------------------
// Terraform structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Terraform {
    #[serde(rename = "version")]
    pub version: String,
}

// -----------------------------------------------------------------------------
// Operator structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Operator {
    #[serde(rename = "listen")]
    pub listen: SocketAddr,
}

// -----------------------------------------------------------------------------
// Controllers structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Controllers {
    /// wait for the custom resource definition of each kind before starting
    /// its controller
    #[serde(rename = "gated")]
    pub gated: bool,
    /// start controllers of the legacy, cluster-scoped, api groups
    #[serde(rename = "legacy")]
    pub legacy: bool,
    /// start controllers of the modern, namespaced, api groups
    #[serde(rename = "namespaced")]
    pub namespaced: bool,
    /// seconds between two reconciliations of a managed resource
    #[serde(rename = "poll")]
    pub poll: u64,
    /// seconds between two checks of a custom resource definition
    #[serde(rename = "gate")]
    pub gate: u64,
}

impl Controllers {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll)
    }

    pub fn gate_interval(&self) -> Duration {
        Duration::from_secs(self.gate)
    }
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to validate configuration, '{0}' must be greater than zero")]
    Zero(String),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "provider")]
    pub provider: Provider,
    #[serde(rename = "terraform")]
    pub terraform: Terraform,
    #[serde(rename = "operator")]
    pub operator: Operator,
    #[serde(rename = "controllers")]
    pub controllers: Controllers,
}

/// returns a configuration builder with defaults and the environment source
pub(crate) fn defaults() -> Result<ConfigBuilder<DefaultState>, Error> {
    let mut builder = Config::builder();

    for (key, value) in [
        ("provider.source", PROVIDER_SOURCE),
        ("provider.version", PROVIDER_VERSION),
        ("terraform.version", TERRAFORM_VERSION),
        ("operator.listen", LISTEN),
    ] {
        builder = builder
            .set_default(key, value)
            .map_err(|err| Error::Default(key.into(), err))?;
    }

    for (key, value) in [
        ("controllers.gated", false),
        ("controllers.legacy", true),
        ("controllers.namespaced", true),
    ] {
        builder = builder
            .set_default(key, value)
            .map_err(|err| Error::Default(key.into(), err))?;
    }

    for (key, value) in [
        ("controllers.poll", POLL_INTERVAL),
        ("controllers.gate", GATE_INTERVAL),
    ] {
        builder = builder
            .set_default(key, value)
            .map_err(|err| Error::Default(key.into(), err))?;
    }

    Ok(builder.add_source(
        Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_")).separator("__"),
    ))
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        defaults()?
            .add_source(File::from(path).required(true))
            .build()
            .map_err(Error::Build)?
            .try_deserialize::<Self>()
            .map_err(Error::Cast)?
            .validate()
    }
}

impl Configuration {
    /// rejects intervals that would make controllers spin
    pub fn validate(self) -> Result<Self, Error> {
        for (key, value) in [
            ("controllers.poll", self.controllers.poll),
            ("controllers.gate", self.controllers.gate),
        ] {
            if value == 0 {
                return Err(Error::Zero(key.into()));
            }
        }

        Ok(self)
    }

    pub fn try_default() -> Result<Self, Error> {
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!(
                "{}/.config/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            )));
        }

        paths.push(PathBuf::from("config"));

        paths
            .into_iter()
            .fold(defaults()?, |builder, path| {
                builder.add_source(File::from(path).required(false))
            })
            .build()
            .map_err(Error::Build)?
            .try_deserialize::<Self>()
            .map_err(Error::Cast)?
            .validate()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config: Configuration = defaults()
            .expect("defaults to be set")
            .build()
            .expect("configuration to build")
            .try_deserialize()
            .expect("configuration to deserialize");

        assert_eq!(PROVIDER_SOURCE, config.provider.source);
        assert_eq!(PROVIDER_VERSION, config.provider.version);
        assert_eq!(TERRAFORM_VERSION, config.terraform.version);
        assert_eq!(LISTEN.parse::<SocketAddr>().ok(), Some(config.operator.listen));
        assert!(!config.controllers.gated);
        assert!(config.controllers.legacy);
        assert!(config.controllers.namespaced);
        assert_eq!(Duration::from_secs(600), config.controllers.poll_interval());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("provider-gitea-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temporary directory to be created");

        let path = dir.join("config.toml");
        let mut file = std::fs::File::create(&path).expect("configuration file to be created");
        writeln!(
            file,
            "[provider]\nversion = \"0.8.0\"\n\n[controllers]\ngated = true\nlegacy = false"
        )
        .expect("configuration file to be written");

        let config = Configuration::try_from(path).expect("configuration to load");

        assert_eq!("0.8.0", config.provider.version);
        assert_eq!(PROVIDER_SOURCE, config.provider.source);
        assert!(config.controllers.gated);
        assert!(!config.controllers.legacy);

        std::fs::remove_dir_all(dir).expect("temporary directory to be removed");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let dir = std::env::temp_dir().join(format!("provider-gitea-poll-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temporary directory to be created");

        let path = dir.join("config.toml");
        let mut file = std::fs::File::create(&path).expect("configuration file to be created");
        writeln!(file, "[controllers]\npoll = 0").expect("configuration file to be written");

        let result = Configuration::try_from(path);
        std::fs::remove_dir_all(dir).expect("temporary directory to be removed");

        assert!(
            matches!(result, Err(Error::Zero(ref key)) if key == "controllers.poll"),
            "{result:?}"
        );
    }
}
