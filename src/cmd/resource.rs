//! # Resource module
//!
//! This module provides the command line interface to inspect the managed
//! resource kinds served by the provider

use std::{
    io::{self, Write},
    sync::Arc,
};

use async_trait::async_trait;
use clap::Subcommand;

use crate::{
    cmd::Executor,
    svc::{
        cfg::Configuration,
        controller::{self, Registration, REGISTRATIONS, VERSION},
    },
};

// -----------------------------------------------------------------------------
// ResourceError enum

#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("failed to write on standard output, {0}")]
    Write(io::Error),
}

// -----------------------------------------------------------------------------
// Resource enum

#[derive(Subcommand, Clone, Debug)]
pub enum Resource {
    /// List managed resource kinds and how their external name is derived
    #[clap(name = "list", aliases = &["ls"])]
    List,
}

#[async_trait]
impl Executor for Resource {
    type Error = ResourceError;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::List => {
                io::stdout()
                    .lock()
                    .write_all(list(&config, REGISTRATIONS).as_bytes())
                    .map_err(ResourceError::Write)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// list function

/// returns one line per registration and enabled scope
pub fn list(config: &Configuration, registrations: &[Registration]) -> String {
    let mut lines = vec![format!(
        "{:<36} {:<48} {:<18} EXTERNAL-NAME\n",
        "TERRAFORM", "API-VERSION", "KIND"
    )];

    for scope in controller::scopes(config) {
        for registration in registrations {
            lines.push(format!(
                "{:<36} {:<48} {:<18} {}\n",
                registration.terraform_name,
                format!("{}/{}", registration.api_group(scope), VERSION),
                registration.kind,
                registration.resource_config().external_name,
            ));
        }
    }

    lines.concat()
}
