//! # Cluster provider config
//!
//! This module provide the cluster-scoped provider config of the modern api
//! group.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::crd::{self, ProviderCredentials, Status};

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[kube(group = "gitea.m.crossplane.io")]
#[kube(version = "v1beta1")]
#[kube(kind = "ClusterProviderConfig")]
#[kube(singular = "clusterproviderconfig")]
#[kube(plural = "clusterproviderconfigs")]
#[kube(status = "Status")]
#[kube(derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"source", "type":"string", "description":"Credentials source", "jsonPath":".spec.credentials.source"}"#
)]
#[kube(
    printcolumn = r#"{"name":"users", "type":"integer", "description":"Users", "jsonPath":".status.users"}"#
)]
pub struct Spec {
    #[serde(rename = "credentials")]
    pub credentials: ProviderCredentials,
}

impl crd::ProviderConfigExt for ClusterProviderConfig {
    fn credentials(&self) -> &ProviderCredentials {
        &self.spec.credentials
    }

    fn users(&self) -> Option<i64> {
        self.status.as_ref().and_then(|status| status.users)
    }

    fn set_users(&mut self, users: i64) {
        self.status.get_or_insert_with(Status::default).users = Some(users);
    }
}
