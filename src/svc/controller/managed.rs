//! # Managed resource controller
//!
//! This module provide the reconciler of a gitea managed resource kind. The
//! object is handled untyped as a [`DynamicObject`].

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use kube::{
    api::DynamicObject,
    discovery::ApiResource,
    runtime::{controller::Action as ControllerAction, watcher, Controller},
    Api, ResourceExt,
};
use tracing::{debug, info, trace, warn};

use crate::svc::{
    controller::Registration,
    gitea::{
        self,
        external_name::ResourceConfig,
        managed::{ManagedObject, Scope},
    },
    k8s::{self, recorder, resource, Context, ControllerBuilder},
};

// -----------------------------------------------------------------------------
// Constants

pub const EXTERNAL_NAME_ANNOTATION: &str = "crossplane.io/external-name";

/// delay before retrying a reconciliation that failed on the kubernetes api
pub const RETRY: Duration = Duration::from_millis(500);

// -----------------------------------------------------------------------------
// Action enumeration

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Action {
    Connect,
    AssignExternalName,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "Connect"),
            Self::AssignExternalName => write!(f, "AssignExternalName"),
        }
    }
}

// -----------------------------------------------------------------------------
// ReconcilerError enumeration

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerError {
    #[error("failed to build terraform setup, {0}")]
    Setup(gitea::Error),
    #[error("failed to execute request on kubernetes api, {0}")]
    KubeClient(kube::Error),
    #[error("failed to compute diff between the original and modified object, {0}")]
    Diff(serde_json::Error),
}

impl From<gitea::Error> for ReconcilerError {
    fn from(err: gitea::Error) -> Self {
        Self::Setup(err)
    }
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

/// returns the external name written on the object, if any
pub fn external_name(obj: &DynamicObject) -> Option<&str> {
    obj.annotations()
        .get(EXTERNAL_NAME_ANNOTATION)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

/// returns the external name to assign to the object, if it has none yet and
/// one could be derived from its observed state
pub fn derive_external_name(
    config: &ResourceConfig,
    mg: &ManagedObject<'_>,
) -> Option<String> {
    if external_name(mg.obj).is_some() {
        return None;
    }

    match config.external_name.get(&mg.obj.name_any(), mg.at_provider()) {
        Ok(name) if !name.is_empty() => Some(name),
        Ok(_) => None,
        Err(err) => {
            debug!(
                resource = &config.name,
                name = mg.obj.name_any(),
                error = err.to_string(),
                "Could not derive external name of resource yet",
            );
            None
        }
    }
}

// -----------------------------------------------------------------------------
// Reconciler structure

#[derive(Clone, Debug)]
pub struct Reconciler {
    pub scope: Scope,
    pub registration: Registration,
    pub resource: ApiResource,
    pub config: ResourceConfig,
    /// objects whose last terraform setup succeeded
    connected: Arc<Mutex<HashSet<String>>>,
}

impl Reconciler {
    pub fn new(scope: Scope, registration: Registration) -> Self {
        Self {
            scope,
            resource: registration.api_resource(scope),
            config: registration.resource_config(),
            registration,
            connected: Arc::default(),
        }
    }

    /// marks the object as connected, returns true if it was not already
    pub fn connect(&self, key: &str) -> bool {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned())
    }

    /// marks the object as disconnected
    pub fn disconnect(&self, key: &str) {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// returns the name of the custom resource definition watched
    pub fn name(&self) -> String {
        self.registration.crd_name(self.scope)
    }

    fn api(&self, client: kube::Client, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(client, namespace, &self.resource),
            None => Api::all_with(client, &self.resource),
        }
    }
}

impl ControllerBuilder<DynamicObject> for Reconciler {
    fn build(&self, ctx: Arc<Context>) -> Controller<DynamicObject> {
        Controller::new_with(
            Api::all_with(ctx.kube.to_owned(), &self.resource),
            watcher::Config::default(),
            self.resource.to_owned(),
        )
    }
}

#[async_trait]
impl k8s::Reconciler<DynamicObject> for Reconciler {
    type Error = ReconcilerError;

    fn kind(&self) -> String {
        format!("{}.{}", self.resource.kind, self.resource.group)
    }

    async fn upsert(
        &self,
        ctx: Arc<Context>,
        origin: Arc<DynamicObject>,
    ) -> Result<(), ReconcilerError> {
        let kind = self.kind();
        let (namespace, name) = resource::namespaced_name(&*origin);
        let key = resource::display(&namespace, &name);
        let mg = ManagedObject::new(self.scope, &origin);

        // ---------------------------------------------------------------------
        // Step 1: build the terraform setup from the provider config

        let setup = match ctx.setup.setup(&ctx.kube, &mg).await {
            Ok(setup) => setup,
            Err(err) => {
                self.disconnect(&key);

                if let Err(record_err) = recorder::warning(
                    ctx.kube.to_owned(),
                    &*origin,
                    &self.resource,
                    &Action::Connect,
                    &err.to_string(),
                )
                .await
                {
                    warn!(
                        kind = &kind,
                        namespace = ?namespace,
                        name = &name,
                        error = record_err.to_string(),
                        "Could not record event of failed terraform setup",
                    );
                }

                return Err(err.into());
            }
        };

        debug!(
            kind = &kind,
            namespace = ?namespace,
            name = &name,
            setup = ?setup,
            "Built terraform setup for resource",
        );

        if self.connect(&key) {
            recorder::normal(
                ctx.kube.to_owned(),
                &*origin,
                &self.resource,
                &Action::Connect,
                &format!(
                    "Built terraform setup with provider '{}' version '{}'",
                    setup.requirement.source, setup.requirement.version
                ),
            )
            .await?;
        }

        // ---------------------------------------------------------------------
        // Step 2: assign the external name once it is observed

        if let Some(external_name) = derive_external_name(&self.config, &mg) {
            let mut modified = origin.as_ref().to_owned();
            modified
                .annotations_mut()
                .insert(EXTERNAL_NAME_ANNOTATION.to_string(), external_name.to_owned());

            info!(
                kind = &kind,
                namespace = ?namespace,
                name = &name,
                external_name = &external_name,
                strategy = self.config.external_name.to_string(),
                "Assign external name to resource",
            );

            let patch = resource::diff(origin.as_ref(), &modified)?;
            let api = self.api(ctx.kube.to_owned(), namespace.as_deref());
            resource::patch(&api, &modified, patch).await?;

            recorder::normal(
                ctx.kube.to_owned(),
                &*origin,
                &self.resource,
                &Action::AssignExternalName,
                &format!("Assigned external name '{external_name}'"),
            )
            .await?;
        }

        Ok(())
    }

    async fn delete(
        &self,
        _ctx: Arc<Context>,
        origin: Arc<DynamicObject>,
    ) -> Result<(), ReconcilerError> {
        let (namespace, name) = resource::namespaced_name(&*origin);
        self.disconnect(&resource::display(&namespace, &name));

        info!(
            kind = self.kind(),
            namespace = ?namespace,
            name = &name,
            external_name = ?external_name(&origin),
            "Resource is being deleted",
        );

        Ok(())
    }

    fn requeue(&self, ctx: &Context) -> ControllerAction {
        ControllerAction::requeue(ctx.config.controllers.poll_interval())
    }

    fn retry(&self, err: &ReconcilerError, ctx: &Context) -> ControllerAction {
        let duration = match err {
            ReconcilerError::Setup(_) => ctx.config.controllers.poll_interval(),
            _ => RETRY,
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
    use kube::core::GroupVersionKind;
    use serde_json::{json, Value};

    use crate::svc::controller::REGISTRATIONS;

    use super::*;

    fn repository(data: Value) -> DynamicObject {
        let gvk = GroupVersionKind::gvk("gitea.gitea.crossplane.io", "v1alpha1", "Repository");
        let ar = ApiResource::from_gvk(&gvk);

        DynamicObject::new("repo", &ar).data(data)
    }

    fn repository_config() -> ResourceConfig {
        REGISTRATIONS
            .iter()
            .find(|registration| registration.terraform_name == "gitea_repository")
            .map(Registration::resource_config)
            .expect("repository to be registered")
    }

    #[test]
    fn external_name_is_derived_from_the_observed_state() {
        let obj = repository(json!({ "status": { "atProvider": { "id": "12" } } }));
        let mg = ManagedObject::new(Scope::Legacy, &obj);

        assert_eq!(
            Some("12".to_string()),
            derive_external_name(&repository_config(), &mg)
        );
    }

    #[test]
    fn external_name_is_kept_once_assigned() {
        let mut obj = repository(json!({ "status": { "atProvider": { "id": "12" } } }));
        obj.annotations_mut()
            .insert(EXTERNAL_NAME_ANNOTATION.to_string(), "11".to_string());
        let mg = ManagedObject::new(Scope::Legacy, &obj);

        assert_eq!(Some("11"), external_name(&obj));
        assert_eq!(None, derive_external_name(&repository_config(), &mg));
    }

    #[test]
    fn external_name_waits_for_the_observed_state() {
        let obj = repository(json!({ "spec": {} }));
        let mg = ManagedObject::new(Scope::Legacy, &obj);

        assert_eq!(None, external_name(&obj));
        assert_eq!(None, derive_external_name(&repository_config(), &mg));
    }

    #[test]
    fn reconciler_watches_the_scoped_resource() {
        let registration = REGISTRATIONS[0];
        let reconciler = Reconciler::new(Scope::Modern, registration);

        assert_eq!("git.gitea.m.crossplane.io", reconciler.resource.group);
        assert_eq!("hooks.git.gitea.m.crossplane.io", reconciler.name());
        assert_eq!(
            "Hook.git.gitea.m.crossplane.io",
            k8s::Reconciler::<DynamicObject>::kind(&reconciler)
        );
    }

    #[test]
    fn connect_is_reported_once_until_disconnected() {
        let reconciler = Reconciler::new(Scope::Modern, REGISTRATIONS[0]);
        let copy = reconciler.clone();

        assert!(reconciler.connect("apps/hook"));
        assert!(!copy.connect("apps/hook"));
        assert!(reconciler.connect("apps/other"));

        copy.disconnect("apps/hook");
        assert!(reconciler.connect("apps/hook"));
    }

    #[tokio::test]
    async fn setup_failures_are_retried_on_the_poll_interval() {
        let ctx = Context::offline();
        let reconciler = Reconciler::new(Scope::Modern, REGISTRATIONS[0]);
        let err = ReconcilerError::Setup(gitea::Error::SecretKeyMissing(
            "crossplane-system/gitea".to_string(),
            "credentials".to_string(),
        ));

        assert_eq!(
            ControllerAction::requeue(ctx.config.controllers.poll_interval()),
            k8s::Reconciler::<DynamicObject>::retry(&reconciler, &err, &ctx)
        );
    }

    #[tokio::test]
    async fn api_failures_are_retried_shortly() {
        let ctx = Context::offline();
        let reconciler = Reconciler::new(Scope::Modern, REGISTRATIONS[0]);
        let err = ReconcilerError::Diff(
            serde_json::from_str::<Value>("{").expect_err("json to be invalid"),
        );

        assert_eq!(
            ControllerAction::requeue(RETRY),
            k8s::Reconciler::<DynamicObject>::retry(&reconciler, &err, &ctx)
        );
    }
}
