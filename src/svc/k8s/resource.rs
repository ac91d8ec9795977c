//! # Resource module
//!
//! This module provide helpers on kubernetes [`Resource`]

use std::fmt::Debug;

use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

// -----------------------------------------------------------------------------
// Helpers functions

/// returns if the resource is considered from kubernetes point of view as deleted
pub fn deleted<T>(obj: &T) -> bool
where
    T: Resource,
{
    obj.meta().deletion_timestamp.is_some()
}

/// returns the namespace, if any, and name of the kubernetes resource.
pub fn namespaced_name<T>(obj: &T) -> (Option<String>, String)
where
    T: ResourceExt,
{
    (obj.namespace(), obj.name_any())
}

/// returns a human readable '<namespace>/<name>' or '<name>' for cluster-scoped
/// resources
pub fn display(namespace: &Option<String>, name: &str) -> String {
    match namespace {
        Some(namespace) => format!("{namespace}/{name}"),
        None => name.to_string(),
    }
}

/// retrieve the resource with the given name, returns none if kubernetes
/// answers with a not found status
pub async fn get<T>(api: &Api<T>, name: &str) -> Result<Option<T>, kube::Error>
where
    T: Clone + DeserializeOwned + Debug,
{
    debug!(name = name, "execute a request to retrieve resource");
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
        Err(err) => Err(err),
    }
}

/// returns differnce between the two given object serialize as json patch
pub fn diff<T>(origin: &T, modified: &T) -> Result<json_patch::Patch, serde_json::Error>
where
    T: Serialize,
{
    Ok(json_patch::diff(
        &serde_json::to_value(origin)?,
        &serde_json::to_value(modified)?,
    ))
}

/// make a patch request on the given resource using the given patch
pub async fn patch<T>(api: &Api<T>, obj: &T, patch: json_patch::Patch) -> Result<T, kube::Error>
where
    T: Resource + ResourceExt + DeserializeOwned + Serialize + Clone + Debug,
{
    let (namespace, name) = namespaced_name(obj);

    if patch.0.is_empty() {
        debug!(
            namespace = ?namespace,
            name = &name,
            "skip patch request on resource, no operation to apply",
        );
        return Ok(obj.to_owned());
    }

    debug!(
        namespace = ?namespace,
        name = &name,
        operations = patch.0.len(),
        "execute patch request on resource",
    );

    api.patch(&name, &PatchParams::default(), &Patch::Json::<T>(patch))
        .await
}

/// make a patch request on the given resource's status using the given patch
pub async fn patch_status<T>(
    api: &Api<T>,
    obj: T,
    patch: json_patch::Patch,
) -> Result<T, kube::Error>
where
    T: Resource + ResourceExt + DeserializeOwned + Serialize + Clone + Debug,
{
    let (namespace, name) = namespaced_name(&obj);

    if patch.0.is_empty() {
        debug!(
            namespace = ?namespace,
            name = &name,
            "skip patch request on resource's status, no operation to apply",
        );
        return Ok(obj);
    }

    debug!(
        namespace = ?namespace,
        name = &name,
        operations = patch.0.len(),
        "execute patch request on resource's status",
    );

    api.patch_status(&name, &PatchParams::default(), &Patch::Json::<T>(patch))
        .await
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;

    use crate::svc::crd::{
        namespaced::{ProviderConfig, Spec},
        ProviderCredentials, SecretKeySelector,
    };

    use super::*;

    fn provider_config(name: &str) -> ProviderConfig {
        let mut pc = ProviderConfig::new(
            name,
            Spec {
                credentials: ProviderCredentials::secret(SecretKeySelector::new(
                    Some("gitea"),
                    "crossplane-gitea-token",
                    "credentials",
                )),
            },
        );

        pc.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("crossplane-examples".to_string()),
            ..Default::default()
        };

        pc
    }

    #[test]
    fn display_namespaced_and_cluster_names() {
        assert_eq!("gitea/token", display(&Some("gitea".into()), "token"));
        assert_eq!("default", display(&None, "default"));
    }

    #[test]
    fn diff_is_empty_for_identical_objects() {
        let pc = provider_config("app-pc");

        let patch = diff(&pc, &pc).expect("objects to be serializable");
        assert!(patch.0.is_empty());
    }

    #[test]
    fn diff_reports_finalizer_changes() {
        let origin = provider_config("app-pc");
        let mut modified = origin.to_owned();
        modified.metadata.finalizers = Some(vec!["in-use.crossplane.io".into()]);

        let patch = diff(&origin, &modified).expect("objects to be serializable");
        assert_eq!(1, patch.0.len());
    }

    #[test]
    fn deleted_follows_deletion_timestamp() {
        let mut pc = provider_config("app-pc");
        assert!(!deleted(&pc));

        pc.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        assert!(deleted(&pc));
    }
}
