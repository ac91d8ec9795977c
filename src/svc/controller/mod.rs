//! # Controller module
//!
//! This module registers one controller per gitea managed resource kind, for
//! the legacy and the modern api groups, and the provider config controllers.

use std::{future::Future, sync::Arc};

use kube::{core::GroupVersionKind, discovery::ApiResource};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::svc::{
    cfg::Configuration,
    crd::{cluster::ClusterProviderConfig, legacy, namespaced, LEGACY_GROUP, MODERN_GROUP},
    gitea::{
        external_name::{self, ResourceConfig},
        managed::Scope,
    },
    k8s::{Context, Watcher},
};

pub mod gate;
pub mod managed;
pub mod provider_config;

// -----------------------------------------------------------------------------
// Constants

pub const VERSION: &str = "v1alpha1";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to setup controllers, neither legacy nor namespaced api groups are enabled")]
    NoScope,
}

// -----------------------------------------------------------------------------
// Registration structure

/// a gitea managed resource kind and the terraform resource behind it
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Registration {
    pub terraform_name: &'static str,
    pub group: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl Registration {
    pub const fn new(
        terraform_name: &'static str,
        group: &'static str,
        kind: &'static str,
        plural: &'static str,
    ) -> Self {
        Self {
            terraform_name,
            group,
            kind,
            plural,
        }
    }

    /// returns the api group of the kind in the given scope
    pub fn api_group(&self, scope: Scope) -> String {
        match scope {
            Scope::Legacy => format!("{}.{}", self.group, LEGACY_GROUP),
            Scope::Modern => format!("{}.{}", self.group, MODERN_GROUP),
        }
    }

    pub fn api_resource(&self, scope: Scope) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.api_group(scope), VERSION, self.kind);

        ApiResource::from_gvk_with_plural(&gvk, self.plural)
    }

    /// returns the name of the custom resource definition of the kind
    pub fn crd_name(&self, scope: Scope) -> String {
        format!("{}.{}", self.plural, self.api_group(scope))
    }

    /// returns the resource configuration with its external name applied
    pub fn resource_config(&self) -> ResourceConfig {
        let mut resource = ResourceConfig::new(self.terraform_name);

        external_name::configure(&mut resource);
        resource
    }
}

/// every gitea managed resource kind
pub static REGISTRATIONS: &[Registration] = &[
    Registration::new("gitea_git_hook", "git", "Hook", "hooks"),
    Registration::new("gitea_fork", "gitea", "Fork", "forks"),
    Registration::new("gitea_org", "gitea", "Org", "orgs"),
    Registration::new("gitea_repository", "gitea", "Repository", "repositories"),
    Registration::new("gitea_team", "gitea", "Team", "teams"),
    Registration::new("gitea_token", "gitea", "Token", "tokens"),
    Registration::new("gitea_user", "gitea", "User", "users"),
    Registration::new("gitea_gpg_key", "gpg", "Key", "keys"),
    Registration::new("gitea_oauth2_app", "oauth2", "App", "apps"),
    Registration::new("gitea_public_key", "public", "Key", "keys"),
    Registration::new(
        "gitea_repository_actions_secret",
        "repository",
        "ActionsSecret",
        "actionssecrets",
    ),
    Registration::new(
        "gitea_repository_actions_variable",
        "repository",
        "ActionsVariable",
        "actionsvariables",
    ),
    Registration::new(
        "gitea_repository_branch_protection",
        "repository",
        "BranchProtection",
        "branchprotections",
    ),
    Registration::new("gitea_repository_key", "repository", "Key", "keys"),
    Registration::new("gitea_repository_webhook", "repository", "Webhook", "webhooks"),
    Registration::new("gitea_team_members", "team", "Members", "members"),
    Registration::new("gitea_team_membership", "team", "Membership", "memberships"),
];

/// returns the scopes whose controllers are enabled by the configuration
pub fn scopes(config: &Configuration) -> Vec<Scope> {
    let mut scopes = vec![];

    if config.controllers.legacy {
        scopes.push(Scope::Legacy);
    }

    if config.controllers.namespaced {
        scopes.push(Scope::Modern);
    }

    scopes
}

// -----------------------------------------------------------------------------
// Manager structure

/// owns the tasks running the controllers
pub struct Manager {
    pub ctx: Arc<Context>,
    handles: Vec<JoinHandle<()>>,
}

impl Manager {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            handles: vec![],
        }
    }

    /// spawn the given controller future, optionally waiting for the custom
    /// resource definition `gate` to exist before
    pub fn spawn<F>(&mut self, name: String, gate: Option<String>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ctx = self.ctx.to_owned();

        self.handles.push(tokio::spawn(async move {
            if let Some(crd) = gate {
                gate::wait(ctx.kube.to_owned(), &crd, ctx.config.controllers.gate_interval())
                    .await;
            }

            info!(controller = &name, "Start to listen for events of resource");
            fut.await;
            error!(controller = &name, "Controller stopped to listen for events");
        }));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// cancel all controllers and wait for them to stop
    pub async fn shutdown(self) {
        self.handles.iter().for_each(|handle| handle.abort());

        for handle in self.handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(error = err.to_string(), "could not wait for the task to complete");
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Setup functions

fn register(manager: &mut Manager, gated: bool) -> Result<(), Error> {
    let scopes = scopes(&manager.ctx.config);
    if scopes.is_empty() {
        return Err(Error::NoScope);
    }

    for scope in scopes {
        for registration in REGISTRATIONS {
            let reconciler = managed::Reconciler::new(scope, *registration);
            let gate = gated.then(|| registration.crd_name(scope));
            let ctx = manager.ctx.to_owned();

            manager.spawn(reconciler.name(), gate, async move {
                reconciler.watch(ctx).await
            });
        }

        match scope {
            Scope::Legacy => {
                let reconciler = provider_config::Reconciler::<legacy::ProviderConfig>::default();
                let gate = gated.then(|| reconciler.crd_name());
                let ctx = manager.ctx.to_owned();

                manager.spawn(reconciler.crd_name(), gate, async move {
                    reconciler.watch(ctx).await
                });
            }
            Scope::Modern => {
                let reconciler =
                    provider_config::Reconciler::<namespaced::ProviderConfig>::default();
                let gate = gated.then(|| reconciler.crd_name());
                let ctx = manager.ctx.to_owned();

                manager.spawn(reconciler.crd_name(), gate, async move {
                    reconciler.watch(ctx).await
                });

                let reconciler = provider_config::Reconciler::<ClusterProviderConfig>::default();
                let gate = gated.then(|| reconciler.crd_name());
                let ctx = manager.ctx.to_owned();

                manager.spawn(reconciler.crd_name(), gate, async move {
                    reconciler.watch(ctx).await
                });
            }
        }
    }

    Ok(())
}

/// creates all controllers and adds them to the given manager
pub fn setup(manager: &mut Manager) -> Result<(), Error> {
    register(manager, false)
}

/// creates all controllers and adds them to the given manager, each one waits
/// for its custom resource definition to be installed
pub fn setup_gated(manager: &mut Manager) -> Result<(), Error> {
    register(manager, true)
}
