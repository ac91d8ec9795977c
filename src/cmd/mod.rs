//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};

use crate::{
    cmd::{crd::CustomResourceDefinitionError, resource::ResourceError, secret::SecretError},
    svc::{
        cfg::Configuration,
        controller::{self, Manager},
        k8s::{client, Context},
        telemetry,
    },
};

pub mod crd;
pub mod resource;
pub mod secret;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(CustomResourceDefinitionError),
    #[error("failed to execute command, {0}")]
    Secret(SecretError),
    #[error("failed to execute command, {0}")]
    Resource(ResourceError),
    #[error("failed to run daemon, {0}")]
    Daemon(DaemonError),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with custom resource definition
    #[clap(name = "custom-resource-definition", aliases = &["crd"], subcommand)]
    CustomResourceDefinition(crd::CustomResourceDefinition),
    /// Interact with the credentials secret of provider configs
    #[clap(name = "secret", subcommand)]
    Secret(secret::Secret),
    /// Interact with managed resource kinds
    #[clap(name = "resource", aliases = &["res"], subcommand)]
    Resource(resource::Resource),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition(crd) => crd
                .execute(config)
                .await
                .map_err(Error::CustomResourceDefinition)
                .map_err(|err| Error::Execution("custom-resource-definition".into(), Arc::new(err))),
            Self::Secret(secret) => secret
                .execute(config)
                .await
                .map_err(Error::Secret)
                .map_err(|err| Error::Execution("secret".into(), Arc::new(err))),
            Self::Resource(resource) => resource
                .execute(config)
                .await
                .map_err(Error::Resource)
                .map_err(|err| Error::Execution("resource".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[clap(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to handle termintion signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to register controllers, {0}")]
    Controller(controller::Error),
}

// -----------------------------------------------------------------------------
// daemon function

#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub async fn daemon(kubeconfig: Option<PathBuf>, config: Arc<Configuration>) -> Result<(), Error> {
    // -------------------------------------------------------------------------
    // Create a new kubernetes client from path if defined, or via the
    // environment or defaults locations
    let kube_client = client::try_new(kubeconfig)
        .await
        .map_err(DaemonError::Client)
        .map_err(Error::Daemon)?;

    // -------------------------------------------------------------------------
    // Create context to give to each reconciler
    let ctx = Arc::new(Context::new(kube_client, config.to_owned()));

    // -------------------------------------------------------------------------
    // Create reconcilers
    let mut manager = Manager::new(ctx);
    let result = if config.controllers.gated {
        controller::setup_gated(&mut manager)
    } else {
        controller::setup(&mut manager)
    };

    result
        .map_err(DaemonError::Controller)
        .map_err(Error::Daemon)?;

    info!(
        controllers = manager.len(),
        gated = config.controllers.gated,
        "Controllers are registered",
    );

    // -------------------------------------------------------------------------
    // Start http server
    let listen = config.operator.listen;
    let server = tokio::spawn(async move {
        if let Err(err) = telemetry::serve(listen).await {
            error!(
                error = err.to_string(),
                listen = listen.to_string(),
                "Could not serve http server",
            );
        }
    });

    // -------------------------------------------------------------------------
    // Wait for termination signal
    tokio::signal::ctrl_c()
        .await
        .map_err(DaemonError::SigTerm)
        .map_err(Error::Daemon)?;

    // -------------------------------------------------------------------------
    // Cancel reconcilers and http server
    server.abort();
    manager.shutdown().await;

    Ok(())
}
