//! # Custom resource definition module
//!
//! This module provides custom resource module command line interface function
//! implementation

use std::{error::Error, str::FromStr, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition as Definition;
use kube::CustomResourceExt;

use crate::{
    cmd::Executor,
    svc::{
        cfg::Configuration,
        crd::{cluster::ClusterProviderConfig, legacy, namespaced},
    },
};

// -----------------------------------------------------------------------------
// CustomResource enum

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum CustomResource {
    LegacyProviderConfig,
    ProviderConfig,
    ClusterProviderConfig,
}

impl FromStr for CustomResource {
    type Err = Box<dyn Error + Send + Sync>;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy-provider-config" => Ok(Self::LegacyProviderConfig),
            "provider-config" => Ok(Self::ProviderConfig),
            "cluster-provider-config" => Ok(Self::ClusterProviderConfig),
            _ => Err(format!("failed to parse '{s}', available options are 'legacy-provider-config', 'provider-config' or 'cluster-provider-config'").into()),
        }
    }
}

impl CustomResource {
    pub const ALL: [Self; 3] = [
        Self::LegacyProviderConfig,
        Self::ProviderConfig,
        Self::ClusterProviderConfig,
    ];

    pub fn definition(&self) -> Definition {
        match self {
            Self::LegacyProviderConfig => legacy::ProviderConfig::crd(),
            Self::ProviderConfig => namespaced::ProviderConfig::crd(),
            Self::ClusterProviderConfig => ClusterProviderConfig::crd(),
        }
    }
}

// -----------------------------------------------------------------------------
// CustomResourceDefinitionError enum

#[derive(thiserror::Error, Debug)]
pub enum CustomResourceDefinitionError {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// CustomResourceDefinition enum

#[derive(Subcommand, Clone, Debug)]
pub enum CustomResourceDefinition {
    /// View custom resource definition
    #[clap(name = "view", aliases = &["v"])]
    View {
        #[clap(name = "custom-resource")]
        custom_resource: Option<CustomResource>,
    },
}

#[async_trait]
impl Executor for CustomResourceDefinition {
    type Error = CustomResourceDefinitionError;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::View { custom_resource } => view(config, custom_resource).await,
        }
    }
}

// -----------------------------------------------------------------------------
// view function

/// returns the yaml documents of the given custom resource definitions
pub fn render(custom_resources: &[CustomResource]) -> Result<String, CustomResourceDefinitionError> {
    let documents = custom_resources
        .iter()
        .map(|cr| {
            serde_yaml::to_string(&cr.definition())
                .map(|document| format!("---\n{document}"))
                .map_err(CustomResourceDefinitionError::Serialize)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(documents.join(""))
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(_config)))]
pub async fn view(
    _config: Arc<Configuration>,
    custom_resource: &Option<CustomResource>,
) -> Result<(), CustomResourceDefinitionError> {
    let crds = match custom_resource {
        Some(cr) => render(&[*cr])?,
        None => render(&CustomResource::ALL)?,
    };

    print!("{crds}");
    Ok(())
}
