//! # Provider config controller
//!
//! This module provide the reconciler of the three provider config kinds. It
//! keeps the `in-use` finalizer on them and counts the managed resources that
//! reference each one.

use std::{
    fmt::{self, Debug, Display, Formatter},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use kube::{
    api::{DynamicObject, ListParams},
    runtime::{controller::Action as ControllerAction, watcher, Controller},
    Api, Client, CustomResourceExt, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, trace, warn};

use crate::svc::{
    controller::{self, REGISTRATIONS},
    crd::{cluster::ClusterProviderConfig, legacy, namespaced, ProviderConfigExt},
    gitea::{
        managed::{Managed, ManagedObject, Scope},
        ConfigKind,
    },
    k8s::{self, finalizer, recorder, resource, Context, ControllerBuilder},
};

// -----------------------------------------------------------------------------
// Constants

/// delay before checking again if a provider config that is being deleted is
/// still in use
pub const IN_USE_RETRY: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// ProviderConfigResource trait

/// a provider config kind watched by a [`Reconciler`]
pub trait ProviderConfigResource:
    Resource<DynamicType = ()>
    + CustomResourceExt
    + ProviderConfigExt
    + DeserializeOwned
    + Serialize
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
{
    const CONFIG_KIND: ConfigKind;

    /// returns an api to request objects of the kind, in the given namespace
    /// for namespaced kinds
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

impl ProviderConfigResource for legacy::ProviderConfig {
    const CONFIG_KIND: ConfigKind = ConfigKind::Legacy;

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

impl ProviderConfigResource for namespaced::ProviderConfig {
    const CONFIG_KIND: ConfigKind = ConfigKind::Namespaced;

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        }
    }
}

impl ProviderConfigResource for ClusterProviderConfig {
    const CONFIG_KIND: ConfigKind = ConfigKind::Cluster;

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

// -----------------------------------------------------------------------------
// Action enumeration

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Action {
    CountUsers,
    Release,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::CountUsers => write!(f, "CountUsers"),
            Self::Release => write!(f, "Release"),
        }
    }
}

// -----------------------------------------------------------------------------
// ReconcilerError enumeration

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerError {
    #[error("failed to execute request on kubernetes api, {0}")]
    KubeClient(kube::Error),
    #[error("failed to compute diff between the original and modified object, {0}")]
    Diff(serde_json::Error),
    #[error("failed to release provider config '{0}', still used by {1} managed resource(s)")]
    InUse(String, i64),
}

impl From<kube::Error> for ReconcilerError {
    fn from(err: kube::Error) -> Self {
        Self::KubeClient(err)
    }
}

impl From<serde_json::Error> for ReconcilerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Diff(err)
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns whether the managed resource of the given scope references the
/// provider config of kind `kind` named `name` in `namespace`
pub fn uses(
    scope: Scope,
    obj: &DynamicObject,
    kind: ConfigKind,
    namespace: Option<&str>,
    name: &str,
) -> bool {
    let mg = ManagedObject::new(scope, obj);
    let reference = mg.provider_config_reference_or_default();

    if reference.name != name {
        return false;
    }

    match ConfigKind::from_reference(scope, reference.kind.as_deref()) {
        Some(k) if k == kind => !kind.namespaced() || mg.namespace().as_deref() == namespace,
        _ => false,
    }
}

/// returns the number of managed resources, of every registered kind, that
/// reference the given provider config. Kinds without an installed custom
/// resource definition count for zero.
#[cfg_attr(feature = "trace", tracing::instrument(skip(ctx)))]
pub async fn users(
    ctx: &Context,
    kind: ConfigKind,
    namespace: Option<&str>,
    name: &str,
) -> Result<i64, kube::Error> {
    let mut users = 0;

    for scope in controller::scopes(&ctx.config) {
        // namespaced provider configs only exist for the modern api groups
        if kind.namespaced() && scope == Scope::Legacy {
            continue;
        }

        for registration in REGISTRATIONS {
            let ar = registration.api_resource(scope);
            let api: Api<DynamicObject> = match (kind.namespaced(), namespace) {
                (true, Some(namespace)) => {
                    Api::namespaced_with(ctx.kube.to_owned(), namespace, &ar)
                }
                _ => Api::all_with(ctx.kube.to_owned(), &ar),
            };

            let list = match api.list(&ListParams::default()).await {
                Ok(list) => list,
                Err(kube::Error::Api(err)) if err.code == 404 => {
                    trace!(
                        kind = &ar.kind,
                        group = &ar.group,
                        "Skip kind without custom resource definition",
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };

            users += list
                .items
                .iter()
                .filter(|obj| uses(scope, obj, kind, namespace, name))
                .count() as i64;
        }
    }

    Ok(users)
}

// -----------------------------------------------------------------------------
// Reconciler structure

pub struct Reconciler<P> {
    marker: PhantomData<fn() -> P>,
}

impl<P> Default for Reconciler<P> {
    fn default() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<P> Clone for Reconciler<P> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<P> Reconciler<P>
where
    P: ProviderConfigResource,
{
    /// returns the name of the custom resource definition watched
    pub fn crd_name(&self) -> String {
        P::crd_name().to_string()
    }
}

impl<P> ControllerBuilder<P> for Reconciler<P>
where
    P: ProviderConfigResource,
{
    fn build(&self, ctx: Arc<Context>) -> Controller<P> {
        Controller::new(P::api(ctx.kube.to_owned(), None), watcher::Config::default())
    }
}

#[async_trait]
impl<P> k8s::Reconciler<P> for Reconciler<P>
where
    P: ProviderConfigResource,
{
    type Error = ReconcilerError;

    fn kind(&self) -> String {
        P::CONFIG_KIND.to_string()
    }

    async fn upsert(&self, ctx: Arc<Context>, origin: Arc<P>) -> Result<(), ReconcilerError> {
        let kind = self.kind();
        let (namespace, name) = resource::namespaced_name(&*origin);
        let api = P::api(ctx.kube.to_owned(), namespace.as_deref());
        let mut obj = origin.as_ref().to_owned();

        // ---------------------------------------------------------------------
        // Step 1: set finalizer

        if !finalizer::contains(&obj, finalizer::IN_USE) {
            info!(
                kind = &kind,
                namespace = ?namespace,
                name = &name,
                "Add finalizer on provider config",
            );

            let modified = finalizer::add(obj.to_owned(), finalizer::IN_USE);
            let patch = resource::diff(&obj, &modified)?;
            obj = resource::patch(&api, &modified, patch).await?;
        }

        // ---------------------------------------------------------------------
        // Step 2: count users

        let users = users(&ctx, P::CONFIG_KIND, namespace.as_deref(), &name).await?;
        if obj.users() == Some(users) {
            trace!(
                kind = &kind,
                namespace = ?namespace,
                name = &name,
                users = users,
                "Users of provider config are up to date",
            );
            return Ok(());
        }

        debug!(
            kind = &kind,
            namespace = ?namespace,
            name = &name,
            users = users,
            "Update users of provider config",
        );

        let mut modified = obj.to_owned();
        modified.set_users(users);

        let patch = resource::diff(&obj, &modified)?;
        resource::patch_status(&api, modified, patch).await?;

        recorder::normal(
            ctx.kube.to_owned(),
            &*origin,
            &(),
            &Action::CountUsers,
            &format!("Provider config is used by {users} managed resource(s)"),
        )
        .await?;

        Ok(())
    }

    async fn delete(&self, ctx: Arc<Context>, origin: Arc<P>) -> Result<(), ReconcilerError> {
        let kind = self.kind();
        let (namespace, name) = resource::namespaced_name(&*origin);
        let api = P::api(ctx.kube.to_owned(), namespace.as_deref());

        // ---------------------------------------------------------------------
        // Step 1: refuse to release a provider config in use

        let users = users(&ctx, P::CONFIG_KIND, namespace.as_deref(), &name).await?;
        if users > 0 {
            let display = resource::display(&namespace, &name);
            let err = ReconcilerError::InUse(display, users);

            if let Err(record_err) = recorder::warning(
                ctx.kube.to_owned(),
                &*origin,
                &(),
                &Action::Release,
                &err.to_string(),
            )
            .await
            {
                warn!(
                    kind = &kind,
                    namespace = ?namespace,
                    name = &name,
                    error = record_err.to_string(),
                    "Could not record event of provider config in use",
                );
            }

            return Err(err);
        }

        // ---------------------------------------------------------------------
        // Step 2: remove finalizer

        info!(
            kind = &kind,
            namespace = ?namespace,
            name = &name,
            "Remove finalizer on provider config",
        );

        let modified = finalizer::remove(origin.as_ref().to_owned(), finalizer::IN_USE);
        let patch = resource::diff(origin.as_ref(), &modified)?;
        resource::patch(&api, &modified, patch).await?;

        Ok(())
    }

    fn requeue(&self, ctx: &Context) -> ControllerAction {
        ControllerAction::requeue(ctx.config.controllers.poll_interval())
    }

    fn retry(&self, err: &ReconcilerError, _ctx: &Context) -> ControllerAction {
        let duration = match err {
            ReconcilerError::InUse(_, _) => IN_USE_RETRY,
            _ => Duration::from_millis(500),
        };

        trace!(
            kind = self.kind(),
            duration = duration.as_millis() as u64,
            error = err.to_string(),
            "Requeue failed reconciliation",
        );

        ControllerAction::requeue(duration)
    }
}

#[cfg(test)]
mod tests {
    use kube::{core::GroupVersionKind, discovery::ApiResource};
    use serde_json::{json, Value};

    use super::*;

    fn repository(namespace: Option<&str>, data: Value) -> DynamicObject {
        let gvk = GroupVersionKind::gvk("gitea.gitea.m.crossplane.io", "v1alpha1", "Repository");
        let ar = ApiResource::from_gvk(&gvk);
        let obj = DynamicObject::new("repo", &ar).data(data);

        match namespace {
            Some(namespace) => obj.within(namespace),
            None => obj,
        }
    }

    #[test]
    fn modern_resources_default_to_the_cluster_provider_config() {
        let obj = repository(Some("apps"), json!({ "spec": {} }));

        assert!(uses(Scope::Modern, &obj, ConfigKind::Cluster, None, "default"));
        assert!(!uses(Scope::Modern, &obj, ConfigKind::Legacy, None, "default"));
    }

    #[test]
    fn legacy_resources_default_to_the_legacy_provider_config() {
        let obj = repository(None, json!({ "spec": {} }));

        assert!(uses(Scope::Legacy, &obj, ConfigKind::Legacy, None, "default"));
        assert!(!uses(Scope::Legacy, &obj, ConfigKind::Cluster, None, "default"));
    }

    #[test]
    fn namespaced_provider_configs_are_matched_in_the_same_namespace() {
        let obj = repository(
            Some("apps"),
            json!({ "spec": { "providerConfigRef": { "name": "pc", "kind": "ProviderConfig" } } }),
        );

        assert!(uses(Scope::Modern, &obj, ConfigKind::Namespaced, Some("apps"), "pc"));
        assert!(!uses(Scope::Modern, &obj, ConfigKind::Namespaced, Some("other"), "pc"));
        assert!(!uses(Scope::Modern, &obj, ConfigKind::Namespaced, Some("apps"), "default"));
    }

    #[test]
    fn references_with_unknown_kinds_use_nothing() {
        let obj = repository(
            Some("apps"),
            json!({ "spec": { "providerConfigRef": { "name": "pc", "kind": "StoreConfig" } } }),
        );

        for kind in [ConfigKind::Legacy, ConfigKind::Namespaced, ConfigKind::Cluster] {
            assert!(!uses(Scope::Modern, &obj, kind, Some("apps"), "pc"));
        }
    }

    #[test]
    fn reconciler_watches_the_provider_config_definition() {
        assert_eq!(
            "providerconfigs.gitea.crossplane.io",
            Reconciler::<legacy::ProviderConfig>::default().crd_name()
        );
        assert_eq!(
            "providerconfigs.gitea.m.crossplane.io",
            Reconciler::<namespaced::ProviderConfig>::default().crd_name()
        );
        assert_eq!(
            "clusterproviderconfigs.gitea.m.crossplane.io",
            Reconciler::<ClusterProviderConfig>::default().crd_name()
        );
    }

    #[tokio::test]
    async fn users_are_recounted_on_the_poll_interval() {
        let ctx = Context::offline();

        assert_eq!(
            ControllerAction::requeue(ctx.config.controllers.poll_interval()),
            k8s::Reconciler::<legacy::ProviderConfig>::requeue(
                &Reconciler::<legacy::ProviderConfig>::default(),
                &ctx
            )
        );
        assert_eq!(
            ControllerAction::requeue(ctx.config.controllers.poll_interval()),
            k8s::Reconciler::<ClusterProviderConfig>::requeue(
                &Reconciler::<ClusterProviderConfig>::default(),
                &ctx
            )
        );
    }

    #[tokio::test]
    async fn provider_configs_in_use_are_retried_later() {
        let ctx = Context::offline();
        let err = ReconcilerError::InUse("default".to_string(), 2);

        assert_eq!(
            ControllerAction::requeue(IN_USE_RETRY),
            k8s::Reconciler::<legacy::ProviderConfig>::retry(
                &Reconciler::<legacy::ProviderConfig>::default(),
                &err,
                &ctx
            )
        );
    }
}
